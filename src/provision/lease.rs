//! Per-volume-name mutual exclusion.
//!
//! Create and delete hold the lease for the normalized name for their whole
//! duration, so two requests for the same volume issued through one
//! [`super::Provisioner`] run one after the other. Requests from other
//! processes are not covered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Table of named leases.
#[derive(Debug, Default)]
pub struct NameLeases {
    slots: Slots,
}

/// Exclusive hold on one name, released on drop.
#[derive(Debug)]
pub struct NameLease {
    name: String,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLeases {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder owns `name`, then takes it.
    pub async fn acquire(&self, name: &str) -> NameLease {
        let slot = Arc::clone(lock(&self.slots).entry(name.to_owned()).or_default());
        let guard = slot.lock_owned().await;
        NameLease {
            name: name.to_owned(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of names currently held or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        lock(&self.slots).len()
    }
}

impl NameLease {
    /// Name this lease covers.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        drop(self.guard.take());
        // Only the table's reference left means nobody is waiting.
        if slots
            .get(&self.name)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let leases = NameLeases::new();
        let held = leases.acquire("alpha").await;

        let blocked = timeout(Duration::from_millis(20), leases.acquire("alpha")).await;
        assert!(blocked.is_err(), "second holder should wait");

        drop(held);
        let reacquired = timeout(Duration::from_millis(200), leases.acquire("alpha")).await;
        assert!(reacquired.is_ok(), "lease should be free after release");
    }

    #[tokio::test]
    async fn distinct_names_do_not_block() {
        let leases = NameLeases::new();
        let _alpha = leases.acquire("alpha").await;
        let beta = timeout(Duration::from_millis(200), leases.acquire("beta")).await;
        assert!(beta.is_ok());
        assert_eq!(leases.active(), 2);
    }

    #[tokio::test]
    async fn released_names_are_forgotten() {
        let leases = NameLeases::new();
        {
            let lease = leases.acquire("alpha").await;
            assert_eq!(lease.name(), "alpha");
        }
        assert_eq!(leases.active(), 0);
    }
}
