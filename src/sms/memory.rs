use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{MessageStore, Registration, SmsEntry};

/// Message store which keeps entries in memory
///
/// Every pushed entry notifies all registrations.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<SmsEntry>,
    registrations: BTreeMap<u64, mpsc::UnboundedSender<()>>,
    next_registration_id: u64,
    failing_reads: usize,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a new entry and notifies about the change
    pub fn push(&self, entry: SmsEntry) {
        let mut inner = self.lock();
        inner.entries.push(entry);
        inner.notify();
    }

    /// Notifies about a change without adding a new entry
    pub fn touch(&self) {
        self.lock().notify();
    }

    /// Makes the next `count` reads fail as if the store were unavailable
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Drops all registrations, so that their consumers stop receiving notifications
    pub fn disconnect_all(&self) {
        self.lock().registrations.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active registrations
    pub fn registrations(&self) -> usize {
        self.lock().registrations.len()
    }
}

impl Inner {
    fn notify(&mut self) {
        // receivers which are gone without unregistering are dropped here
        self.registrations.retain(|_, tx| tx.send(()).is_ok());
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn register(&self) -> anyhow::Result<Registration> {
        let mut inner = self.lock();
        let id = inner.next_registration_id;
        inner.next_registration_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.registrations.insert(id, tx);
        debug!(id, "registered for sms changes");
        Ok(Registration::new(id, rx))
    }

    fn unregister(&self, registration: Registration) {
        let id = registration.id();
        if self.lock().registrations.remove(&id).is_some() {
            debug!(id, "unregistered from sms changes");
        }
    }

    async fn latest(&self) -> anyhow::Result<Option<SmsEntry>> {
        let mut inner = self.lock();
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            bail!("message store is unavailable");
        }
        Ok(inner.entries.last().cloned())
    }
}
