// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event fields that keep values of the wrong JSON type instead of failing
//! deserialization, so they can be reported alongside every other problem.

use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum Lenient<T> {
    Valid(T),
    Invalid(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    #[derive(Deserialize)]
    struct Wrapper {
        flag: Option<Lenient<bool>>,
    }
    fn parse(input: &str) -> Option<Lenient<bool>> {
        serde_json::from_str::<Wrapper>(input).unwrap().flag
    }
    #[test]
    fn keeps_mistyped_values() {
        assert_eq!(parse(r#"{"flag": true}"#), Some(Lenient::Valid(true)));
        assert_eq!(
            parse(r#"{"flag": "yes"}"#),
            Some(Lenient::Invalid(Value::String("yes".to_string())))
        );
        assert_eq!(parse(r#"{"flag": null}"#), None);
        assert_eq!(parse(r#"{}"#), None);
    }
}
