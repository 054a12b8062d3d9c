//! Per-request routing options.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

fn default_min_processes() -> u32 {
    1
}

/// Options attached to a single `get`/`async_get` request.
///
/// `app_group_name` is the routing key. Everything else is either consumed
/// by the pool (`noop`, `min_processes`, `app_root`) or passed through to
/// the group implementation uninterpreted (`extra`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOptions {
    /// Name of the application group this request targets.
    pub app_group_name: String,
    /// Filesystem root of the application, used to match groups in
    /// `restart_groups_by_app_root`.
    #[serde(default)]
    pub app_root: String,
    /// Request a group without binding a session to a worker.
    #[serde(default)]
    pub noop: bool,
    /// Number of worker processes the group tries to keep alive.
    #[serde(default = "default_min_processes")]
    pub min_processes: u32,
    /// Group-specific fields the pool forwards without interpretation.
    #[serde(default)]
    pub extra: HashMap<String, String>,
    /// Correlation handle tying this request to an in-flight front-end
    /// transaction. Dropped when the options are persisted on a wait
    /// queue, because the transaction does not outlive the request frame.
    #[serde(skip)]
    pub transaction: Option<Arc<str>>,
}

impl GetOptions {
    /// Options targeting `app_group_name` with everything else defaulted.
    pub fn new(app_group_name: impl Into<String>) -> Self {
        Self {
            app_group_name: app_group_name.into(),
            app_root: String::new(),
            noop: false,
            min_processes: default_min_processes(),
            extra: HashMap::new(),
            transaction: None,
        }
    }

    /// Set the application root.
    #[must_use]
    pub fn with_app_root(mut self, app_root: impl Into<String>) -> Self {
        self.app_root = app_root.into();
        self
    }

    /// Mark this request as a no-op (group wanted, no session).
    #[must_use]
    pub fn with_noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    /// Set the minimum process count the group should maintain.
    #[must_use]
    pub fn with_min_processes(mut self, min: u32) -> Self {
        self.min_processes = min;
        self
    }

    /// Deep-copy the options into a standalone value that can sit on a
    /// wait queue for an arbitrary amount of time.
    #[must_use]
    pub fn copy_and_persist(&self) -> Self {
        self.clone()
    }

    /// Detach the copy from any transient transaction context.
    #[must_use]
    pub fn detach_from_transaction(mut self) -> Self {
        self.transaction = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GetOptions::new("app");
        assert_eq!(options.app_group_name, "app");
        assert_eq!(options.min_processes, 1);
        assert!(!options.noop);
    }

    #[test]
    fn test_persisted_copy_drops_transaction() {
        let mut options = GetOptions::new("app");
        options.transaction = Some(Arc::from("txn-1"));
        let persisted = options.copy_and_persist().detach_from_transaction();
        assert!(persisted.transaction.is_none());
        assert!(options.transaction.is_some());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let options: GetOptions =
            serde_json::from_str(r#"{"app_group_name": "app"}"#).unwrap();
        assert_eq!(options.min_processes, 1);
        assert!(options.extra.is_empty());
    }
}
