//! Per-document write serialisation.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per document id.
///
/// Mutations of the same document run one at a time; different documents
/// never wait on each other. An entry lives only while a guard or a waiter
/// holds it.
#[derive(Default)]
pub struct DocumentLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Access ends when the guard drops.
    pub async fn acquire(&self, id: Uuid) -> DocumentGuard<'_> {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        DocumentGuard {
            locks: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one document.
///
/// Dropping it releases the mutex and removes the map entry when no other
/// task is holding or waiting on it.
pub struct DocumentGuard<'a> {
    locks: &'a DocumentLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        // The owned guard keeps its own Arc; release it before counting.
        self.guard.take();
        // Waiters clone the Arc under the shard lock, so a count of one
        // means only the map still refers to the mutex.
        self.locks
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_serialised() {
        let locks = Arc::new(DocumentLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entries_are_removed_once_released() {
        let locks = DocumentLocks::new();
        for _ in 0..100 {
            let _guard = locks.acquire(Uuid::new_v4()).await;
        }
        assert!(locks.is_empty());

        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_a_waiter_is_queued() {
        let locks = Arc::new(DocumentLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);

        let seen_by_waiter = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen_by_waiter, 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let locks = DocumentLocks::new();
        let _first = locks.acquire(Uuid::new_v4()).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
