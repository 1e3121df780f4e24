//! Container-to-host path translation.
//!
//! Immich reports asset paths as seen inside its own container (e.g.
//! `/usr/src/app/upload/...`). Before we can link to a file we have to rewrite
//! that path into one reachable on the machine running the sync. The rewrite
//! is driven by an ordered list of prefix rules; the first rule whose
//! container prefix literally matches wins.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::AssetError;

/// One prefix-rewrite rule: paths starting with `container` are remapped
/// under `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub container: String,
    pub host: String,
}

/// Translates a container path to a host path using the first matching rule.
///
/// Matching is a literal byte-wise prefix comparison, no normalization: a
/// rule either matches the front of the path exactly or it doesn't. An empty
/// path or a path no rule matches fails with [`AssetError::NoMappingRule`].
pub fn map_to_host(remote_path: &str, mappings: &[PathMapping]) -> Result<PathBuf, AssetError> {
    if !remote_path.is_empty() {
        for rule in mappings {
            if !rule.container.is_empty() && remote_path.starts_with(&rule.container) {
                let suffix = &remote_path[rule.container.len()..];
                return Ok(PathBuf::from(format!("{}{}", rule.host, suffix)));
            }
        }
    }

    Err(AssetError::NoMappingRule {
        path: remote_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<PathMapping> {
        vec![
            PathMapping {
                container: "/usr/src/app/upload".to_string(),
                host: "/mnt/immich/upload".to_string(),
            },
            PathMapping {
                container: "/external".to_string(),
                host: "/mnt/photos".to_string(),
            },
        ]
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let overlapping = vec![
            PathMapping {
                container: "/data".to_string(),
                host: "/first".to_string(),
            },
            PathMapping {
                container: "/data/library".to_string(),
                host: "/second".to_string(),
            },
        ];

        let mapped = map_to_host("/data/library/a.jpg", &overlapping).unwrap();
        assert_eq!(mapped, PathBuf::from("/first/library/a.jpg"));
    }

    #[test]
    fn test_prefix_is_rewritten() {
        let mapped = map_to_host("/usr/src/app/upload/library/2024/a.heic", &rules()).unwrap();
        assert_eq!(mapped, PathBuf::from("/mnt/immich/upload/library/2024/a.heic"));

        let mapped = map_to_host("/external/trip/b.jpg", &rules()).unwrap();
        assert_eq!(mapped, PathBuf::from("/mnt/photos/trip/b.jpg"));
    }

    #[test]
    fn test_no_match_fails() {
        let err = map_to_host("/somewhere/else/a.jpg", &rules()).unwrap_err();
        assert!(matches!(err, AssetError::NoMappingRule { .. }));
    }

    #[test]
    fn test_empty_path_fails() {
        let err = map_to_host("", &rules()).unwrap_err();
        assert!(matches!(err, AssetError::NoMappingRule { .. }));
    }

    #[test]
    fn test_empty_container_prefix_never_matches() {
        let rules = vec![PathMapping {
            container: String::new(),
            host: "/mnt".to_string(),
        }];
        assert!(map_to_host("/a.jpg", &rules).is_err());
    }

    #[test]
    fn test_translation_is_deterministic() {
        let rules = rules();
        let a = map_to_host("/external/x.jpg", &rules).unwrap();
        let b = map_to_host("/external/x.jpg", &rules).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_normalization_of_case() {
        // Ordinal comparison: a differently-cased prefix is a different path.
        assert!(map_to_host("/External/x.jpg", &rules()).is_err());
    }
}
