//! Run context for correlating events with the playback that produced them

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies one playback run
///
/// Every `play` call gets a fresh context. All events published during that
/// run carry it, so a subscriber can tell apart events from a run that was
/// stopped and a run that replaced it. A script handed off through
/// `CallScript` runs under a child context of the caller's run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this run (ULID)
    pub id: String,

    /// Parent run ID when this run was started from another script
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// Create a new context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: None,
        }
    }

    /// Create a context with a specific ID
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_parent() {
        let parent = Context::with_id("run-1");
        let child = parent.child();

        assert_eq!(child.parent_id.as_deref(), Some("run-1"));
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        assert_ne!(Context::new().id, Context::new().id);
    }
}
