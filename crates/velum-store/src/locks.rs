//! Per-organization topic locks.
//!
//! Four named topics order the certificate-producing operations of an
//! organization; advisory locks ride the same mechanism as private
//! pseudo-topics. Semantics mirror SQL row locks: read = `FOR SHARE`,
//! write = `FOR UPDATE`. A writer excludes everyone; readers only
//! exclude writers.
//!
//! All requested locks are taken atomically in one critical section
//! (equivalent to acquiring them in the canonical `common` →
//! `sequester` → `shamir_recovery` → `realm(R)` order), so lock-order
//! deadlocks cannot arise. Waiters park on a notification that fires
//! at every release and re-check from scratch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use velum_core::id::RealmId;

/// Procedures serialized by an advisory lock because their uniqueness
/// predicate cannot be expressed as a plain unique index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdvisoryLock {
    /// One active invitation per claimer email.
    InvitationCreation,
    /// One non-revoked user per email.
    UserCreation,
    /// One SUBMITTED enrollment per email.
    AsyncEnrollmentCreation,
}

/// A lockable topic (or advisory pseudo-topic) of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// User/device/profile/revocation certificates.
    Common,
    /// Sequester authority and service certificates.
    Sequester,
    /// Shamir recovery setups.
    ShamirRecovery,
    /// Everything scoped to one realm.
    Realm(RealmId),
    /// Not a real topic; see [`AdvisoryLock`].
    Advisory(AdvisoryLock),
}

#[derive(Default)]
struct LockState {
    write_locked: HashSet<Topic>,
    read_locked: HashMap<Topic, usize>,
}

impl LockState {
    fn try_acquire(&mut self, read: &[Topic], write: &[Topic]) -> bool {
        if read
            .iter()
            .chain(write)
            .any(|topic| self.write_locked.contains(topic))
        {
            return false;
        }
        if write
            .iter()
            .any(|topic| self.read_locked.get(topic).copied().unwrap_or(0) != 0)
        {
            return false;
        }
        for topic in write {
            self.write_locked.insert(*topic);
        }
        for topic in read {
            *self.read_locked.entry(*topic).or_insert(0) += 1;
        }
        true
    }

    fn release(&mut self, read: &[Topic], write: &[Topic]) {
        for topic in write {
            self.write_locked.remove(topic);
        }
        for topic in read {
            if let Some(count) = self.read_locked.get_mut(topic) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

/// The lock table of one organization.
#[derive(Default)]
pub struct TopicLockTable {
    state: Mutex<LockState>,
    released: Notify,
}

impl TopicLockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `read` in shared mode and `write` in exclusive mode,
    /// suspending until all are available at once.
    pub async fn acquire(self: &Arc<Self>, read: &[Topic], write: &[Topic]) -> LockHold {
        // Canonical ordering; acquisition is atomic so this only
        // affects determinism of diagnostics.
        let mut read = read.to_vec();
        let mut write = write.to_vec();
        read.sort_unstable();
        write.sort_unstable();

        loop {
            let pending = self.released.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.try_acquire(&read, &write) {
                    return LockHold {
                        table: self.clone(),
                        read,
                        write,
                    };
                }
            }
            // The release notification does not say which topic was
            // freed, so re-check everything.
            pending.await;
        }
    }
}

/// Held topic locks; released (with a wakeup) on drop.
pub struct LockHold {
    table: Arc<TopicLockTable>,
    read: Vec<Topic>,
    write: Vec<Topic>,
}

impl LockHold {
    /// Topics held in shared mode.
    pub fn read_topics(&self) -> &[Topic] {
        &self.read
    }

    /// Topics held in exclusive mode.
    pub fn write_topics(&self) -> &[Topic] {
        &self.write
    }
}

impl Drop for LockHold {
    fn drop(&mut self) {
        let mut state = self.table.state.lock().unwrap_or_else(|e| e.into_inner());
        state.release(&self.read, &self.write);
        drop(state);
        self.table.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn readers_share_writers_exclude() {
        let table = Arc::new(TopicLockTable::new());

        let read_a = table.acquire(&[Topic::Common], &[]).await;
        let _read_b = table.acquire(&[Topic::Common], &[]).await;

        // A writer must wait for both readers
        let writer = {
            let table = table.clone();
            tokio::spawn(async move {
                let _hold = table.acquire(&[], &[Topic::Common]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(read_a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(_read_b);
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let table = Arc::new(TopicLockTable::new());
        let write_hold = table.acquire(&[], &[Topic::Sequester]).await;

        let reader = {
            let table = table.clone();
            tokio::spawn(async move {
                let _hold = table.acquire(&[Topic::Sequester], &[]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        drop(write_hold);
        tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_topics_do_not_interfere() {
        let table = Arc::new(TopicLockTable::new());
        let realm_a = RealmId::new();
        let realm_b = RealmId::new();
        let _hold_a = table.acquire(&[], &[Topic::Realm(realm_a)]).await;
        // Completes immediately: different discriminant
        let _hold_b = tokio::time::timeout(
            Duration::from_secs(1),
            table.acquire(&[], &[Topic::Realm(realm_b)]),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn advisory_lock_is_exclusive() {
        let table = Arc::new(TopicLockTable::new());
        let hold = table
            .acquire(&[], &[Topic::Advisory(AdvisoryLock::UserCreation)])
            .await;

        let contender = {
            let table = table.clone();
            tokio::spawn(async move {
                let _hold = table
                    .acquire(&[], &[Topic::Advisory(AdvisoryLock::UserCreation)])
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(hold);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }
}
