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

//! Repairs a restored config directory.
//!
//! Archives written before symlinks were preserved stored `live/` entries as
//! plain copies. Certbot then refused the lineage and started numbered
//! duplicates such as `example.com-0001`. This removes those duplicates and
//! points `live/` back at the newest archived generation. Numbered lineages
//! certbot started for a changed domain set are kept.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

lazy_static! {
    static ref MOVED_LINEAGE: Regex = Regex::new(
        r"^(?P<domain>(?:[0-9a-z][-0-9a-z]*[0-9a-z]|[0-9a-z])(?:\.(?:[0-9a-z][-0-9a-z]*[0-9a-z]|[0-9a-z]))*)-[0-9]{4}(?P<conf>\.conf)?$"
    )
    .unwrap();
    static ref ARCHIVED_FILE: Regex =
        Regex::new(r"^(?P<stem>cert|chain|fullchain|privkey)(?P<version>[0-9]+)\.pem$").unwrap();
}

#[derive(Debug, Default, Eq, PartialEq)]
pub struct FixupReport {
    pub removed: Vec<PathBuf>,
    pub relinked: Vec<PathBuf>,
}

fn sorted_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }
    let mut names = vec![];
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn newest_archived(config_dir: &Path, lineage: &str) -> Result<Option<SystemTime>> {
    let dir = config_dir.join("archive").join(lineage);
    let mut newest = None;
    for name in sorted_names(&dir)? {
        let metadata = fs::symlink_metadata(dir.join(name))?;
        if metadata.is_file() {
            newest = newest.max(Some(metadata.modified()?));
        }
    }
    Ok(newest)
}

// Plain files under `live/` are what a symlink-less archive leaves behind.
fn has_copied_live_files(config_dir: &Path, lineage: &str) -> Result<bool> {
    let dir = config_dir.join("live").join(lineage);
    for name in sorted_names(&dir)? {
        if fs::symlink_metadata(dir.join(name))?.is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

// A numbered lineage is a leftover when its base lineage was damaged, or when
// it holds nothing newer than the base. Otherwise certbot created it for a
// changed domain set and it is the current lineage.
fn is_leftover(config_dir: &Path, base: &str, numbered: &str) -> Result<bool> {
    if has_copied_live_files(config_dir, base)? {
        return Ok(true);
    }
    Ok(newest_archived(config_dir, numbered)? < newest_archived(config_dir, base)?)
}

fn remove_moved_lineages(config_dir: &Path, report: &mut FixupReport) -> Result<()> {
    let lineages: BTreeSet<String> = sorted_names(&config_dir.join("archive"))?
        .into_iter()
        .collect();
    let mut leftovers: BTreeMap<String, bool> = BTreeMap::new();
    let mut doomed = vec![];
    for (parent, is_conf) in [("archive", false), ("live", false), ("renewal", true)] {
        let dir = config_dir.join(parent);
        for name in sorted_names(&dir)? {
            let captures = match MOVED_LINEAGE.captures(&name) {
                Some(captures) => captures,
                None => continue,
            };
            if captures.name("conf").is_some() != is_conf
                || !lineages.contains(&captures["domain"])
            {
                continue;
            }
            let numbered = name.trim_end_matches(".conf").to_string();
            let leftover = match leftovers.get(&numbered) {
                Some(leftover) => *leftover,
                None => {
                    let leftover = is_leftover(config_dir, &captures["domain"], &numbered)?;
                    if !leftover {
                        info!(lineage = %numbered, "Keeping renamed lineage");
                    }
                    leftovers.insert(numbered, leftover);
                    leftover
                }
            };
            if leftover {
                doomed.push(dir.join(&name));
            }
        }
    }
    for path in doomed {
        if fs::symlink_metadata(&path)?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        info!(path = %path.display(), "Removed duplicate lineage");
        report.removed.push(path);
    }
    Ok(())
}

fn relink_lineage(config_dir: &Path, lineage: &str, report: &mut FixupReport) -> Result<()> {
    let archive_dir = config_dir.join("archive").join(lineage);
    let mut latest: BTreeMap<String, u64> = BTreeMap::new();
    for name in sorted_names(&archive_dir)? {
        let captures = match ARCHIVED_FILE.captures(&name) {
            Some(captures) => captures,
            None => continue,
        };
        let path = archive_dir.join(&name);
        if !fs::symlink_metadata(&path)?.is_file() {
            continue;
        }
        let stem = &captures["stem"];
        let mode = if stem == "privkey" { 0o600 } else { 0o644 };
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        let version: u64 = match captures["version"].parse() {
            Ok(version) => version,
            Err(_) => continue,
        };
        let entry = latest.entry(stem.to_string()).or_insert(version);
        *entry = (*entry).max(version);
    }
    if latest.is_empty() {
        return Ok(());
    }
    let live_dir = config_dir.join("live").join(lineage);
    fs::create_dir_all(&live_dir)?;
    for (stem, version) in latest {
        let link = live_dir.join(format!("{}.pem", stem));
        let target = PathBuf::from(format!("../../archive/{}/{}{}.pem", lineage, stem, version));
        if fs::read_link(&link).ok().as_ref() == Some(&target) {
            continue;
        }
        match fs::symlink_metadata(&link) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&link)?,
            Ok(_) => fs::remove_file(&link)?,
            Err(_) => (),
        }
        symlink(&target, &link)?;
        info!(link = %link.display(), target = %target.display(), "Relinked live artifact");
        report.relinked.push(link);
    }
    Ok(())
}

pub fn fixup_config_dir(config_dir: &Path) -> Result<FixupReport> {
    let mut report = FixupReport::default();
    remove_moved_lineages(config_dir, &mut report)?;
    for lineage in sorted_names(&config_dir.join("archive"))? {
        if config_dir.join("archive").join(&lineage).is_dir() {
            relink_lineage(config_dir, &lineage, &mut report)?;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    const LINEAGE: &str = "test1.kanga.org";
    const STEMS: [&str; 4] = ["cert", "chain", "fullchain", "privkey"];
    // Mirrors what an archive that lost its symlinks looks like after
    // certbot ran against it a few times.
    fn broken_config() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("archive").join(LINEAGE)).unwrap();
        fs::create_dir_all(root.join("live").join(LINEAGE)).unwrap();
        fs::create_dir_all(root.join("renewal")).unwrap();
        for stem in STEMS {
            let archived = root.join("archive").join(LINEAGE).join(format!("{}1.pem", stem));
            fs::write(&archived, stem).unwrap();
            fs::set_permissions(&archived, fs::Permissions::from_mode(0o664)).unwrap();
            fs::write(root.join("live").join(LINEAGE).join(format!("{}.pem", stem)), stem)
                .unwrap();
        }
        for n in 1..=3 {
            let moved = format!("{}-{:04}", LINEAGE, n);
            fs::create_dir_all(root.join("archive").join(&moved)).unwrap();
            fs::write(root.join("archive").join(&moved).join("cert1.pem"), "x").unwrap();
            fs::create_dir_all(root.join("live").join(&moved)).unwrap();
            fs::write(root.join("renewal").join(format!("{}.conf", moved)), "x").unwrap();
        }
        fs::write(root.join("renewal").join(format!("{}.conf", LINEAGE)), "keep").unwrap();
        dir
    }
    #[test]
    fn restores_links_and_removes_duplicates() {
        let dir = broken_config();
        let root = dir.path();
        let report = fixup_config_dir(root).unwrap();
        for stem in STEMS {
            let link = root.join("live").join(LINEAGE).join(format!("{}.pem", stem));
            assert_eq!(
                fs::read_link(&link).unwrap(),
                PathBuf::from(format!("../../archive/{}/{}1.pem", LINEAGE, stem))
            );
            let archived = root.join("archive").join(LINEAGE).join(format!("{}1.pem", stem));
            let metadata = fs::symlink_metadata(&archived).unwrap();
            assert!(metadata.is_file());
            let expected = if stem == "privkey" { 0o600 } else { 0o644 };
            assert_eq!(metadata.mode() & 0o777, expected);
        }
        for n in 1..=3 {
            let moved = format!("{}-{:04}", LINEAGE, n);
            assert!(!root.join("archive").join(&moved).exists());
            assert!(!root.join("live").join(&moved).exists());
            assert!(!root.join("renewal").join(format!("{}.conf", moved)).exists());
        }
        assert!(root.join("renewal").join(format!("{}.conf", LINEAGE)).exists());
        assert_eq!(report.removed.len(), 9);
        assert_eq!(report.relinked.len(), 4);
    }
    #[test]
    fn points_at_newest_generation() {
        let dir = broken_config();
        let root = dir.path();
        fs::write(root.join("archive").join(LINEAGE).join("cert2.pem"), "new").unwrap();
        fs::write(root.join("archive").join(LINEAGE).join("cert10.pem"), "newest").unwrap();
        fixup_config_dir(root).unwrap();
        let link = root.join("live").join(LINEAGE).join("cert.pem");
        assert_eq!(fs::read_to_string(link).unwrap(), "newest");
    }
    #[test]
    fn healthy_config_is_untouched() {
        let dir = broken_config();
        let root = dir.path();
        fixup_config_dir(root).unwrap();
        let second = fixup_config_dir(root).unwrap();
        assert_eq!(second, FixupReport::default());
    }
    fn healthy_lineage(root: &Path, lineage: &str, seconds: u64) {
        fs::create_dir_all(root.join("archive").join(lineage)).unwrap();
        fs::create_dir_all(root.join("live").join(lineage)).unwrap();
        fs::create_dir_all(root.join("renewal")).unwrap();
        for stem in STEMS {
            let archived = root.join("archive").join(lineage).join(format!("{}1.pem", stem));
            fs::write(&archived, stem).unwrap();
            fs::File::options()
                .write(true)
                .open(&archived)
                .unwrap()
                .set_modified(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(seconds))
                .unwrap();
            symlink(
                format!("../../archive/{}/{}1.pem", lineage, stem),
                root.join("live").join(lineage).join(format!("{}.pem", stem)),
            )
            .unwrap();
        }
        fs::write(root.join("renewal").join(format!("{}.conf", lineage)), "x").unwrap();
    }
    #[test]
    fn newer_numbered_lineage_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let numbered = format!("{}-0001", LINEAGE);
        healthy_lineage(root, LINEAGE, 1_000);
        healthy_lineage(root, &numbered, 2_000);
        let report = fixup_config_dir(root).unwrap();
        assert_eq!(report, FixupReport::default());
        assert!(root.join("archive").join(&numbered).exists());
        assert!(root.join("live").join(&numbered).join("cert.pem").exists());
        assert!(root.join("renewal").join(format!("{}.conf", numbered)).exists());
    }
    #[test]
    fn older_numbered_lineage_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let numbered = format!("{}-0001", LINEAGE);
        healthy_lineage(root, LINEAGE, 2_000);
        healthy_lineage(root, &numbered, 1_000);
        let report = fixup_config_dir(root).unwrap();
        assert_eq!(report.removed.len(), 3);
        assert!(!root.join("archive").join(&numbered).exists());
        assert!(!root.join("live").join(&numbered).exists());
        assert!(!root.join("renewal").join(format!("{}.conf", numbered)).exists());
        assert!(root.join("archive").join(LINEAGE).exists());
    }
    #[test]
    fn unrelated_numbered_names_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("archive/other.org-0001")).unwrap();
        fs::write(root.join("archive/other.org-0001/cert1.pem"), "x").unwrap();
        let report = fixup_config_dir(root).unwrap();
        assert!(report.removed.is_empty());
        assert!(root.join("archive/other.org-0001").exists());
    }
}
