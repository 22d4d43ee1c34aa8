//! Per-connection serialization.
//!
//! Every sync, refresh, callback and admin action on a connection runs while holding that connection's
//! [`ConnectionClaim`]. The claim is an owned guard, so it is released on every exit path, including when a sync
//! future is dropped on timeout.
//!
//! The map only tracks connections that are claimed or waited on. The last claim to go removes the entry.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db_types::ConnectionId;

type LockMap = Arc<Mutex<HashMap<ConnectionId, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct ConnectionLocks {
    locks: LockMap,
}

pub struct ConnectionClaim {
    id: ConnectionId,
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    locks: LockMap,
}

impl ConnectionClaim {
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionClaim {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Nobody but the map and this claim refers to the lock, so nobody is waiting on it
        let unused = locks.get(&self.id).is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if unused {
            locks.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for ConnectionClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionClaim({})", self.id)
    }
}

impl ConnectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: ConnectionId) -> Arc<AsyncMutex<()>> {
        // A poisoned map is still a valid map
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries left behind by waiters that gave up
        locks.retain(|k, l| *k == id || Arc::strong_count(l) > 1);
        locks.entry(id).or_default().clone()
    }

    fn claimed(&self, id: ConnectionId, lock: Arc<AsyncMutex<()>>, guard: OwnedMutexGuard<()>) -> ConnectionClaim {
        ConnectionClaim { id, guard: Some(guard), lock, locks: Arc::clone(&self.locks) }
    }

    /// Claims the connection if nobody else holds it. Never waits.
    pub fn try_claim(&self, id: ConnectionId) -> Option<ConnectionClaim> {
        let lock = self.lock_for(id);
        let guard = Arc::clone(&lock).try_lock_owned().ok()?;
        Some(self.claimed(id, lock, guard))
    }

    /// Waits until the connection can be claimed.
    pub async fn claim(&self, id: ConnectionId) -> ConnectionClaim {
        let lock = self.lock_for(id);
        let guard = Arc::clone(&lock).lock_owned().await;
        self.claimed(id, lock, guard)
    }

    /// How many connections currently have an entry in the lock map.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn claims_are_exclusive_per_connection() {
        let locks = ConnectionLocks::new();
        let a = ConnectionId::from(1);
        let b = ConnectionId::from(2);
        let claim = locks.try_claim(a).unwrap();
        assert_eq!(claim.connection_id(), a);
        assert!(locks.try_claim(a).is_none());
        assert!(locks.try_claim(b).is_some());
        drop(claim);
        assert!(locks.try_claim(a).is_some());
    }

    #[tokio::test]
    async fn waiting_claims_proceed_once_released() {
        let locks = ConnectionLocks::new();
        let id = ConnectionId::from(7);
        let claim = locks.try_claim(id).unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.claim(id).await.connection_id() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(claim);
        assert_eq!(waiter.await.unwrap(), id);
    }

    #[tokio::test]
    async fn released_connections_are_forgotten() {
        let locks = ConnectionLocks::new();
        for i in 0..100 {
            let claim = locks.claim(ConnectionId::from(i)).await;
            assert_eq!(locks.tracked(), 1);
            drop(claim);
        }
        assert_eq!(locks.tracked(), 0);

        let id = ConnectionId::from(3);
        let claim = locks.try_claim(id).unwrap();
        assert!(locks.try_claim(id).is_none());
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.claim(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The waiter still needs the entry
        drop(claim);
        let second = waiter.await.unwrap();
        assert_eq!(locks.tracked(), 1);
        assert!(locks.try_claim(id).is_none());
        drop(second);
        assert_eq!(locks.tracked(), 0);
    }
}
