use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::ContainerBroker;

/// Keeps at most one [`ContainerBroker`] handle alive per DB path for the
/// life of the process, so concurrent requests against the same container
/// serialize through the same `Mutex<Connection>` instead of each opening
/// their own.
#[derive(Default)]
pub struct BrokerRegistry {
    brokers: Mutex<HashMap<PathBuf, Arc<ContainerBroker>>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_open(
        &self,
        db_path: PathBuf,
        account: impl Into<String>,
        container: impl Into<String>,
        hash: impl Into<String>,
    ) -> Arc<ContainerBroker> {
        let mut brokers = self.brokers.lock();
        brokers
            .entry(db_path.clone())
            .or_insert_with(|| Arc::new(ContainerBroker::open(db_path, account, container, hash)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn repeated_lookups_share_the_same_handle() {
        let dir = TempDir::new().unwrap();
        let registry = BrokerRegistry::new();
        let path = dir.path().join("c.db");
        let a = registry.get_or_open(path.clone(), "acct", "cont", "hash");
        let b = registry.get_or_open(path, "acct", "cont", "hash");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
