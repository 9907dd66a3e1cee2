use std::collections::{BTreeMap, HashMap};

use crate::asset::Asset;
use crate::error::{Error, Result};

/// Theme-wide settings are persisted with cross-file consequences on the
/// platform side, so this key is executed last and alone.
pub const SETTINGS_DATA_KEY: &str = "config/settings_data.json";

/// The different types of file operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Upload the local file to the remote theme.
    Update,
    /// Delete the file from the remote theme.
    Remove,
    /// Fetch the remote file and write it locally.
    Get,
    /// The two sides already agree, nothing is transferred.
    Skip,
}

/// How a sync plan treats remote files that have no local counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Upload only the named files.
    Exact,
    /// Full reconciliation: remote files missing locally are removed.
    Mirror,
}

/// A plan maps each asset key to the operation that reconciles it, plus the
/// remote checksums observed at planning time (used as the last-known values
/// for optimistic concurrency).
#[derive(Debug, Default)]
pub struct Plan {
    pub actions: BTreeMap<String, Op>,
    pub remote_checksums: HashMap<String, String>,
}

impl Plan {
    /// Insert an action without letting a Skip shadow an Update already
    /// planned for the same path.
    fn push(&mut self, key: String, op: Op) {
        match self.actions.get(&key) {
            Some(Op::Update) if op == Op::Skip => {}
            _ => {
                self.actions.insert(key, op);
            }
        }
    }
}

/// Produce the action map for an upload-direction sync from the remote
/// listing and the local asset set.
pub fn plan_sync(remote: &[Asset], local: &[Asset], mode: SyncMode) -> Result<Plan> {
    conflict_check(local)?;

    let mut plan = Plan::default();
    for asset in remote {
        plan.remote_checksums
            .insert(asset.key.clone(), asset.checksum.clone());
        if mode == SyncMode::Mirror {
            plan.actions.insert(asset.key.clone(), Op::Remove);
        }
    }

    for asset in local {
        let op = match plan.remote_checksums.get(&asset.key) {
            Some(remote_sum) if *remote_sum == asset.checksum && !asset.checksum.is_empty() => {
                Op::Skip
            }
            _ => Op::Update,
        };
        plan.push(asset.key.clone(), op);
    }

    Ok(plan)
}

/// Produce the action map for a download: requested paths (or the whole
/// remote listing), skipping files whose local checksum already matches.
/// Wildcard paths expand against the remote listing.
pub fn plan_download(
    remote: &[Asset],
    local_checksum: impl Fn(&str) -> Option<String>,
    paths: &[String],
) -> Result<Plan> {
    let mut plan = Plan::default();
    for asset in remote {
        plan.remote_checksums
            .insert(asset.key.clone(), asset.checksum.clone());
    }

    let mut wanted: Vec<String> = Vec::new();
    if paths.is_empty() {
        wanted.extend(remote.iter().map(|a| a.key.clone()));
    } else {
        for path in paths {
            if path.contains('*') {
                let pattern = glob::Pattern::new(path)
                    .map_err(|e| Error::Other(format!("invalid pattern {:?}: {}", path, e)))?;
                wanted.extend(
                    remote
                        .iter()
                        .filter(|a| pattern.matches(&a.key))
                        .map(|a| a.key.clone()),
                );
            } else {
                wanted.push(path.clone());
            }
        }
    }

    for key in wanted {
        let remote_sum = plan.remote_checksums.get(&key);
        let op = match (remote_sum, local_checksum(&key)) {
            (Some(remote_sum), Some(local_sum)) if *remote_sum == local_sum => Op::Skip,
            _ => Op::Get,
        };
        plan.push(key, op);
    }

    Ok(plan)
}

/// Fail planning when a file and its liquid template sibling both exist
/// locally; the platform compiles `x.ext.liquid` into `x.ext`, so uploading
/// both overwrites one with the other.
fn conflict_check(local: &[Asset]) -> Result<()> {
    let mut names: Vec<&str> = local.iter().map(|a| a.key.as_str()).collect();
    names.sort_unstable();

    let conflicts: Vec<String> = names
        .windows(2)
        .filter(|pair| format!("{}.liquid", pair[0]) == pair[1])
        .map(|pair| format!("{} conflicts with {}", pair[0], pair[1]))
        .collect();

    if conflicts.is_empty() {
        return Ok(());
    }

    Err(Error::Other(format!(
        "files would overwrite each other when the platform compiles them:\n\t{}\nignore, rename or delete one of each pair",
        conflicts.join("\n\t")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn asset(key: &str, checksum: &str) -> Asset {
        Asset {
            key: key.to_string(),
            checksum: checksum.to_string(),
            ..Asset::default()
        }
    }

    #[test]
    fn test_mirror_plan_truth_table() {
        let remote = [
            asset("assets/a.js", "1"),
            asset("assets/b.js", "2"),
            asset("assets/logo.png", "3"),
        ];
        let local = [asset("assets/a.js", "changed"), asset("assets/b.js", "2")];

        let plan = plan_sync(&remote, &local, SyncMode::Mirror).unwrap();
        assert_eq!(plan.actions["assets/a.js"], Op::Update);
        assert_eq!(plan.actions["assets/b.js"], Op::Skip);
        assert_eq!(plan.actions["assets/logo.png"], Op::Remove);
    }

    #[test]
    fn test_exact_mode_plans_no_removals() {
        let remote = [asset("assets/a.js", "1"), asset("assets/logo.png", "3")];
        let local = [asset("assets/a.js", "changed")];

        let plan = plan_sync(&remote, &local, SyncMode::Exact).unwrap();
        assert_eq!(plan.actions.get("assets/logo.png"), None);
        assert_eq!(plan.actions["assets/a.js"], Op::Update);
    }

    #[test]
    fn test_local_only_files_upload() {
        let plan = plan_sync(&[], &[asset("assets/new.js", "1")], SyncMode::Mirror).unwrap();
        assert_eq!(plan.actions["assets/new.js"], Op::Update);
    }

    #[test]
    fn test_unchanged_plan_is_all_skip() {
        let remote = [asset("assets/a.js", "1"), asset("assets/b.js", "2")];
        let local = [asset("assets/a.js", "1"), asset("assets/b.js", "2")];

        let plan = plan_sync(&remote, &local, SyncMode::Mirror).unwrap();
        assert!(plan.actions.values().all(|op| *op == Op::Skip));
    }

    #[test]
    fn test_skip_does_not_shadow_update() {
        let remote = [asset("assets/a.js", "1")];
        let local = [asset("assets/a.js", "changed"), asset("assets/a.js", "1")];

        let plan = plan_sync(&remote, &local, SyncMode::Mirror).unwrap();
        assert_eq!(plan.actions["assets/a.js"], Op::Update);
    }

    #[test]
    fn test_liquid_sibling_conflict_fails_planning() {
        let local = [
            asset("assets/app.js", "1"),
            asset("assets/app.js.liquid", "2"),
        ];
        let err = plan_sync(&[], &local, SyncMode::Exact).unwrap_err();
        assert!(format!("{}", err).contains("assets/app.js conflicts with assets/app.js.liquid"));
    }

    #[test]
    fn test_download_plan_skips_matching_checksums() {
        let remote = [asset("assets/a.js", "same"), asset("assets/b.js", "2")];
        let local = |key: &str| match key {
            "assets/a.js" => Some("same".to_string()),
            _ => None,
        };

        let plan = plan_download(&remote, local, &[]).unwrap();
        assert_eq!(plan.actions["assets/a.js"], Op::Skip);
        assert_eq!(plan.actions["assets/b.js"], Op::Get);
    }

    #[test]
    fn test_download_plan_expands_wildcards() {
        let remote = [
            asset("assets/a.js", "1"),
            asset("assets/style.css", "2"),
            asset("templates/index.liquid", "3"),
        ];

        let plan = plan_download(&remote, |_| None, &["assets/*".to_string()]).unwrap();
        assert_eq!(plan.actions.len(), 2);
        assert!(plan.actions.contains_key("assets/a.js"));
        assert!(plan.actions.contains_key("assets/style.css"));
    }

    #[test]
    fn test_download_explicit_path_always_fetched() {
        let plan = plan_download(&[], |_| None, &["assets/only.js".to_string()]).unwrap();
        assert_eq!(plan.actions["assets/only.js"], Op::Get);
    }
}
