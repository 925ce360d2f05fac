use serde::{Deserialize, Serialize};

/// Store-assigned identity, unique across every resource kind.
pub type EntityId = i64;

/// Tagged reference into the shared reference space: one foreign reference can
/// point at a dataset, a publication or an organisation interchangeably.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub identifier: EntityId,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, identifier: EntityId) -> Self {
        Self {
            kind: kind.into(),
            identifier,
        }
    }
}

/// Row of a shared vocabulary (keyword, license, business category, ...).
///
/// Many resources may point at the same row; it is never deleted as a side
/// effect of deleting one of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedEntity {
    pub identifier: EntityId,
    pub vocabulary: String,
    pub name: String,
}

/// Offset/limit window applied after platform filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(offset: Option<usize>, limit: Option<usize>, default_limit: usize) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(default_limit),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Platform restriction of a listing.
///
/// Resources native to this catalog are stored without a platform, so the
/// local platform's scope also matches rows whose platform is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformScope<'a> {
    pub platform: &'a str,
    pub includes_unset: bool,
}

impl<'a> PlatformScope<'a> {
    pub fn new(platform: &'a str, local_platform: &str) -> Self {
        Self {
            platform,
            includes_unset: platform == local_platform,
        }
    }

    pub fn matches(&self, platform: Option<&str>) -> bool {
        match platform {
            Some(platform) => platform == self.platform,
            None => self.includes_unset,
        }
    }
}
