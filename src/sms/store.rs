//! Abstraction of a message store

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::SmsEntry;

/// Functionalities of an SMS store required by the watcher, that is, dependency inversion
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Registers for change notifications
    fn register(&self) -> anyhow::Result<Registration>;

    /// Releases the registration; no notifications are delivered to it afterwards
    fn unregister(&self, registration: Registration);

    /// Most recent entry of the store, if any
    async fn latest(&self) -> anyhow::Result<Option<SmsEntry>>;
}

/// Registration for change notifications of a [`MessageStore`]
///
/// The registration is owned by a single consumer. It is given back to the store on
/// unregistering.
#[derive(Debug)]
pub struct Registration {
    id: u64,
    changes: mpsc::UnboundedReceiver<()>,
}

impl Registration {
    pub fn new(id: u64, changes: mpsc::UnboundedReceiver<()>) -> Self {
        Self { id, changes }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next change
    ///
    /// Returns `None` when the store stopped delivering notifications.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await
    }
}
