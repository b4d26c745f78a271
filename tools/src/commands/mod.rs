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

mod renew;
mod validate;

use super::tokio_block_on as block_on;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
enum SubCommand {
    /// Runs certbot and distributes the certificate.
    Renew(renew::Opts),
    /// Only checks the event.
    Validate(validate::Opts),
}

#[derive(Parser)]
#[clap(name = "certbot-to-acm")]
struct Opts {
    /// Emits logs as JSON lines.
    #[clap(long, global = true)]
    json_logs: bool,
    #[clap(subcommand)]
    sub_command: SubCommand,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Reads the invocation event from `path`, or from stdin if `path` is `-`.
/// Accepts JSON or YAML.
pub fn read_event(path: &str) -> Result<serde_json::Value> {
    let text = if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read event from stdin")?;
        text
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?
    };
    parse_event(&text)
}

fn parse_event(text: &str) -> Result<serde_json::Value> {
    serde_yaml::from_str(text).context("Failed to parse event")
}

pub fn main() -> Result<()> {
    let opts = Opts::parse();
    init_tracing(opts.json_logs);
    match opts.sub_command {
        SubCommand::Renew(opts) => block_on(renew::main(opts)),
        SubCommand::Validate(opts) => validate::main(opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    #[test]
    fn accepts_json_and_yaml_events() {
        let from_json = parse_event(r#"{"domains": ["a.example.com"], "agree-tos": true}"#).unwrap();
        let from_yaml = parse_event("domains:\n  - a.example.com\nagree-tos: true\n").unwrap();
        assert_eq!(from_json, json!({"domains": ["a.example.com"], "agree-tos": true}));
        assert_eq!(from_json, from_yaml);
    }
    #[test]
    fn reads_events_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, r#"{"rsa-key-size": 4096}"#).unwrap();
        let event = read_event(path.to_str().unwrap()).unwrap();
        assert_eq!(event, json!({"rsa-key-size": 4096}));
    }
}
