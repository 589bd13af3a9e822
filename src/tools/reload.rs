use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Snapshot of the tool tree used to decide whether the registry is stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryFingerprint {
    pub max_mtime: Option<SystemTime>,
    pub file_set: BTreeSet<String>,
}

impl RegistryFingerprint {
    /// Latest mtime anywhere under either root, plus the top-level names of
    /// both (spec-directory names carry a `specs/` prefix).
    pub fn capture(tools_dir: &Path, specs_dir: &Path) -> Self {
        let mut fingerprint = Self::default();
        for root in [tools_dir, specs_dir] {
            for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let Ok(modified) = metadata.modified() else {
                    continue;
                };
                match fingerprint.max_mtime {
                    Some(current) if current >= modified => {}
                    _ => fingerprint.max_mtime = Some(modified),
                }
            }
        }
        fingerprint.file_set.extend(top_level_names(tools_dir, ""));
        fingerprint.file_set.extend(top_level_names(specs_dir, "specs/"));
        fingerprint
    }
}

fn top_level_names(dir: &Path, prefix: &str) -> Vec<String> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    read.flatten()
        .filter_map(|entry| entry.file_name().to_str().map(|name| format!("{prefix}{name}")))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    Explicit,
    Forced,
    Empty,
    Mtime,
    FileSet,
}

impl ReloadReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Forced => "forced",
            Self::Empty => "empty",
            Self::Mtime => "mtime",
            Self::FileSet => "file_set",
        }
    }
}

impl std::fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadRequest {
    pub explicit: bool,
    pub forced: bool,
    pub auto_reload: bool,
    pub registry_len: usize,
}

/// Pure decision over the request flags and two fingerprints. `None` means
/// keep the current registry.
pub fn decide(
    request: &ReloadRequest,
    current: &RegistryFingerprint,
    last_seen: Option<&RegistryFingerprint>,
) -> Option<ReloadReason> {
    if request.explicit {
        return Some(ReloadReason::Explicit);
    }
    if request.forced {
        return Some(ReloadReason::Forced);
    }
    if request.registry_len == 0 {
        return Some(ReloadReason::Empty);
    }
    if !request.auto_reload {
        return None;
    }
    let Some(last_seen) = last_seen else {
        return Some(ReloadReason::Mtime);
    };
    let newer = match (current.max_mtime, last_seen.max_mtime) {
        (Some(now), Some(then)) => now > then,
        (Some(_), None) => true,
        _ => false,
    };
    if newer {
        return Some(ReloadReason::Mtime);
    }
    if current.file_set != last_seen.file_set {
        return Some(ReloadReason::FileSet);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fingerprint(secs: u64, names: &[&str]) -> RegistryFingerprint {
        RegistryFingerprint {
            max_mtime: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
            file_set: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn request(registry_len: usize) -> ReloadRequest {
        ReloadRequest {
            explicit: false,
            forced: false,
            auto_reload: true,
            registry_len,
        }
    }

    #[test]
    fn rules_apply_in_order() {
        let last = fingerprint(10, &["a"]);
        let explicit = ReloadRequest {
            explicit: true,
            ..request(0)
        };
        assert_eq!(decide(&explicit, &last, Some(&last)), Some(ReloadReason::Explicit));
        assert_eq!(decide(&request(0), &last, Some(&last)), Some(ReloadReason::Empty));
        assert_eq!(
            decide(&request(1), &fingerprint(11, &["a"]), Some(&last)),
            Some(ReloadReason::Mtime)
        );
        assert_eq!(
            decide(&request(1), &fingerprint(10, &["a", "b"]), Some(&last)),
            Some(ReloadReason::FileSet)
        );
        assert_eq!(decide(&request(1), &last, Some(&last)), None);
    }

    #[test]
    fn auto_reload_off_only_honours_flags_and_emptiness() {
        let off = ReloadRequest {
            auto_reload: false,
            ..request(3)
        };
        assert_eq!(decide(&off, &fingerprint(99, &["z"]), Some(&fingerprint(1, &[]))), None);
        let forced = ReloadRequest { forced: true, ..off };
        assert_eq!(decide(&forced, &fingerprint(1, &[]), None), Some(ReloadReason::Forced));
    }

    #[test]
    fn older_mtime_does_not_trigger() {
        let last = fingerprint(10, &["a"]);
        assert_eq!(decide(&request(2), &fingerprint(5, &["a"]), Some(&last)), None);
    }
}
