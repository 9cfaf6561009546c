//! Per-project async locks for serializing mutations

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes mutating operations per project; different projects never wait
/// on each other.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `project`. Released when the guard drops.
    pub async fn acquire(&self, project: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // forget locks nobody holds or waits for
            locks.retain(|name, lock| name == project || Arc::strong_count(lock) > 1);
            locks
                .entry(project.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_project_waits() {
        let locks = Arc::new(ProjectLocks::new());
        let guard = locks.acquire("alice/roads").await;

        let other = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("alice/roads").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!other.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), other)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_projects_are_independent_and_pruned() {
        let locks = ProjectLocks::new();
        let _a = locks.acquire("alice/roads").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("bob/rivers"))
            .await
            .unwrap();
        drop(b);

        // bob's lock is unused now and goes away on the next acquire
        let _c = locks.acquire("carol/lakes").await;
        assert_eq!(locks.len(), 2);
    }
}
