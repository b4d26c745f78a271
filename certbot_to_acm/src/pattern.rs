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

//! Classifies paths inside the certbot config directory by artifact role.

use anyhow::{Error, Result};
use glob::{MatchOptions, Pattern};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ArtifactRole {
    Certificate,
    Chain,
    FullChain,
    PrivateKey,
}

impl ArtifactRole {
    pub const ALL: [ArtifactRole; 4] = [
        ArtifactRole::Certificate,
        ArtifactRole::Chain,
        ArtifactRole::FullChain,
        ArtifactRole::PrivateKey,
    ];
    /// Path relative to the config directory; the `*` segment is the lineage.
    pub fn template(self) -> &'static str {
        match self {
            ArtifactRole::Certificate => "live/*/cert.pem",
            ArtifactRole::Chain => "live/*/chain.pem",
            ArtifactRole::FullChain => "live/*/fullchain.pem",
            ArtifactRole::PrivateKey => "live/*/privkey.pem",
        }
    }
    /// The file stem certbot uses, both in `live/` and for numbered
    /// generations in `archive/`.
    pub fn file_stem(self) -> &'static str {
        match self {
            ArtifactRole::Certificate => "cert",
            ArtifactRole::Chain => "chain",
            ArtifactRole::FullChain => "fullchain",
            ArtifactRole::PrivateKey => "privkey",
        }
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactRole::Certificate => "live certificate",
            ArtifactRole::Chain => "intermediate certificate",
            ArtifactRole::FullChain => "full certificate chain",
            ArtifactRole::PrivateKey => "private key",
        })
    }
}

// `*` must not cross directory boundaries, so `live/a/b/cert.pem` is not a
// certificate of lineage `a/b`.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub struct PatternMatcher {
    patterns: Vec<(ArtifactRole, Pattern)>,
}

impl PatternMatcher {
    pub fn new() -> Result<Self> {
        let patterns = ArtifactRole::ALL
            .iter()
            .map(|&role| {
                Pattern::new(role.template())
                    .map(|pattern| (role, pattern))
                    .map_err(|e| Error::new(e).context("Invalid artifact path template"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PatternMatcher { patterns })
    }
    /// Returns the role and lineage of `relpath`, which must use `/` as the
    /// separator.
    pub fn classify<'a>(&self, relpath: &'a str) -> Option<(ArtifactRole, &'a str)> {
        let (role, _) = self
            .patterns
            .iter()
            .find(|(_, pattern)| pattern.matches_with(relpath, MATCH_OPTIONS))?;
        let lineage = relpath.split('/').nth(1)?;
        Some((*role, lineage))
    }
}
