//! Region-wide resource locks (ENQ/DEQ by name).
//!
//! A waiter sleeps on a condition variable that releases signal, and also
//! wakes at the poll interval to observe cancellation. Grants are not fair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::{CicsError, CicsResult};

/// Lock table keyed by resource name; the value is the holding session.
#[derive(Debug)]
pub struct ResourceLockTable {
    held: Mutex<HashMap<String, u64>>,
    released: Condvar,
    poll_interval: Duration,
}

impl ResourceLockTable {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            poll_interval,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `name` is free, then take it for `owner`.
    ///
    /// Taking a lock the owner already holds succeeds at once. Returns
    /// [`CicsError::SessionClosed`] if `cancel` is raised while waiting.
    pub fn acquire(&self, name: &str, owner: u64, cancel: &AtomicBool) -> CicsResult<()> {
        let key = normalize(name);
        let mut held = self.table();
        let mut waited = false;
        loop {
            match held.get(&key) {
                None => {
                    held.insert(key.clone(), owner);
                    if waited {
                        debug!(resource = %key, owner, "Resource lock granted after wait");
                    }
                    return Ok(());
                }
                Some(&holder) if holder == owner => return Ok(()),
                Some(&holder) => {
                    if cancel.load(Ordering::Acquire) {
                        return Err(CicsError::SessionClosed);
                    }
                    if !waited {
                        debug!(resource = %key, owner, holder, "Waiting for resource lock");
                        waited = true;
                    }
                }
            }
            held = self
                .released
                .wait_timeout(held, self.poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take `name` only if it is free (or already ours).
    pub fn try_acquire(&self, name: &str, owner: u64) -> bool {
        let key = normalize(name);
        let mut held = self.table();
        match held.get(&key) {
            Some(&holder) => holder == owner,
            None => {
                held.insert(key, owner);
                true
            }
        }
    }

    /// Release `name` if `owner` holds it.
    pub fn release(&self, name: &str, owner: u64) -> bool {
        let key = normalize(name);
        let mut held = self.table();
        if held.get(&key) != Some(&owner) {
            return false;
        }
        held.remove(&key);
        drop(held);
        self.released.notify_all();
        true
    }

    /// Release everything `owner` holds. Returns the number released.
    pub fn release_all(&self, owner: u64) -> usize {
        let mut held = self.table();
        let before = held.len();
        held.retain(|_, holder| *holder != owner);
        let released = before - held.len();
        drop(held);
        if released > 0 {
            self.released.notify_all();
        }
        released
    }

    /// Session holding `name`, if any.
    pub fn holder(&self, name: &str) -> Option<u64> {
        self.table().get(&normalize(name)).copied()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}
