//! Common types for the remote store abstraction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker object that tags a top-level prefix as a sync container.
///
/// Discovery only considers prefixes carrying this marker, and orders
/// candidates by the marker's creation time.
pub const CONTAINER_MARKER: &str = ".updraft-container";

/// Opaque identifier of a remote container (a top-level namespace in the
/// configured object store).
///
/// The empty string is an explicit sentinel meaning "unresolved": the
/// resolver always renders configuration with an empty ID and fills it from
/// discovery, so a stale non-empty value can never survive re-resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The unresolved sentinel.
    pub fn unresolved() -> Self {
        Self(String::new())
    }

    pub fn is_unresolved(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A container candidate returned by discovery.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: ContainerId,

    /// Creation time of the container marker, when the backend reports one.
    /// Candidates are ordered by this (then by name) for deterministic
    /// selection.
    pub created: Option<DateTime<Utc>>,
}

/// Data class of a tenant directory tree, deciding sync semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataClass {
    /// Destination is forced to exactly match the source, deletions included.
    /// Idempotent, so a cycle killed midway converges on the next run.
    Mirrored,

    /// Destination only gains files; local deletions never propagate and
    /// existing remote objects are not re-verified.
    AppendOnly,
}

impl DataClass {
    pub fn propagates_deletions(&self) -> bool {
        matches!(self, DataClass::Mirrored)
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataClass::Mirrored => write!(f, "mirrored"),
            DataClass::AppendOnly => write!(f, "append-only"),
        }
    }
}

/// Per-tenant, per-class namespace under a container:
/// `<container>/<class-segment>/<tenant>`.
///
/// This is the only way sync code builds remote keys. The constructor
/// rejects an empty tenant segment, so no operation can ever target a
/// prefix that spans tenants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePrefix {
    prefix: String,
}

impl RemotePrefix {
    pub fn new(container: &ContainerId, class_segment: &str, tenant: &str) -> Option<Self> {
        if container.is_unresolved() || class_segment.is_empty() || tenant.is_empty() {
            return None;
        }
        // Path separators inside a tenant name would escape its namespace.
        if tenant.contains('/') || class_segment.contains('/') {
            return None;
        }
        Some(Self {
            prefix: format!("{}/{}/{}", container.as_str(), class_segment, tenant),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Full object key for a file at `relative` under this prefix.
    pub fn key_for(&self, relative: &str) -> String {
        format!("{}/{}", self.prefix, relative.trim_start_matches('/'))
    }

    /// The portion of `key` below this prefix, if `key` belongs to it.
    /// Membership requires a `/` boundary after the prefix, so a sibling
    /// prefix sharing a leading substring never matches.
    pub fn relative_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

impl fmt::Display for RemotePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

/// Metadata for one remote object.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    /// Full object key within the store.
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time reported by the backend.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Aggregate usage under a prefix (object count, total bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreUsage {
    pub objects: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_sentinel() {
        assert!(ContainerId::unresolved().is_unresolved());
        assert!(ContainerId::new("").is_unresolved());
        assert!(!ContainerId::new("render-output").is_unresolved());
    }

    #[test]
    fn prefix_requires_tenant() {
        let container = ContainerId::new("shared");
        assert!(RemotePrefix::new(&container, "output", "alice").is_some());
        assert!(RemotePrefix::new(&container, "output", "").is_none());
        assert!(RemotePrefix::new(&container, "", "alice").is_none());
        assert!(RemotePrefix::new(&ContainerId::unresolved(), "output", "alice").is_none());
    }

    #[test]
    fn prefix_rejects_separator_in_tenant() {
        let container = ContainerId::new("shared");
        assert!(RemotePrefix::new(&container, "output", "alice/../bob").is_none());
    }

    #[test]
    fn prefix_key_round_trip() {
        let container = ContainerId::new("shared");
        let prefix = RemotePrefix::new(&container, "output", "alice").unwrap();
        assert_eq!(prefix.as_str(), "shared/output/alice");

        let key = prefix.key_for("renders/img_0001.png");
        assert_eq!(key, "shared/output/alice/renders/img_0001.png");
        assert_eq!(prefix.relative_of(&key), Some("renders/img_0001.png"));

        assert_eq!(prefix.relative_of("shared/output/bob/x.png"), None);
        assert_eq!(prefix.relative_of("shared/output/alice"), None);
    }

    #[test]
    fn prefix_rejects_sibling_with_shared_leading_substring() {
        let container = ContainerId::new("shared");
        let prefix = RemotePrefix::new(&container, "output", "alice").unwrap();
        // "alicette" starts with "alice" but is a different tenant.
        assert_eq!(prefix.relative_of("shared/output/alicette/x.png"), None);
        assert_eq!(prefix.relative_of("shared/output/alice/x.png"), Some("x.png"));
    }

    #[test]
    fn data_class_semantics() {
        assert!(DataClass::Mirrored.propagates_deletions());
        assert!(!DataClass::AppendOnly.propagates_deletions());
        assert_eq!(DataClass::Mirrored.to_string(), "mirrored");
        assert_eq!(DataClass::AppendOnly.to_string(), "append-only");
    }
}
