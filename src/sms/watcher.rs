use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data::Contact;
use crate::phone::PhoneMatcher;
use crate::telemetry::Telemetry;

use super::{MessageStore, Registration, match_recipient};

/// Telemetry event emitted when a sent SMS to one of the recipients was observed
pub const SMS_SENT_EVENT: &str = "sms_sent_success";

const IDLE: u8 = 0;
const WATCHING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Not started yet
    Idle,
    /// Registered with the message store
    Watching,
    /// Matched, stopped or timed out; terminal
    Closed,
}

/// Why a watch session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A sent message to the contact with this id was observed
    Sent { contact_id: i64 },
    /// Stopped by the caller
    Stopped,
    /// Nothing was sent before the timeout elapsed
    TimedOut,
    /// The message store stopped delivering notifications
    Disconnected,
}

/// Shared state of a watch session
///
/// All transitions are single compare-and-set operations, so whoever closes the session first
/// wins, and the callback fires at most once.
#[derive(Debug)]
struct Session {
    state: AtomicU8,
}

impl Session {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    fn state(&self) -> WatchState {
        match self.state.load(Ordering::Acquire) {
            IDLE => WatchState::Idle,
            WATCHING => WatchState::Watching,
            _ => WatchState::Closed,
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn begin(&self) -> bool {
        self.transition(IDLE, WATCHING)
    }

    fn close(&self) -> bool {
        self.transition(WATCHING, CLOSED)
    }
}

type OnSent = Box<dyn FnOnce(bool) + Send>;

/// Registration which is given back to the store when dropped, also while unwinding
struct Subscription {
    store: Arc<dyn MessageStore>,
    registration: Option<Registration>,
}

impl Subscription {
    async fn changed(&mut self) -> Option<()> {
        self.registration.as_mut()?.changed().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.store.unregister(registration);
        }
    }
}

/// Watches a message store for a sent SMS to one of the given recipients
///
/// On each change of the store, the most recent entry is checked. When it is a sent message to
/// one of the recipients, the callback is called with `true`, the watcher unregisters from the
/// store and a [`SMS_SENT_EVENT`] is emitted. When the timeout elapses first, the callback is
/// called with `false`. Stopping the watch explicitly does not call the callback.
pub struct SentSmsWatcher {
    store: Arc<dyn MessageStore>,
    recipients: Vec<Contact>,
    matcher: PhoneMatcher,
    telemetry: Arc<dyn Telemetry>,
    timeout: Option<Duration>,
    session: Arc<Session>,
}

impl SentSmsWatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        recipients: Vec<Contact>,
        matcher: PhoneMatcher,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            store,
            recipients,
            matcher,
            telemetry,
            timeout: None,
            session: Arc::new(Session::new()),
        }
    }

    /// Closes the session after `timeout`; `None` watches until stopped
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }

    pub fn state(&self) -> WatchState {
        self.session.state()
    }

    /// Registers with the message store and starts watching in a background task
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(self, on_sent: F) -> anyhow::Result<WatchHandle>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let runtime = Handle::try_current().context("sms watcher requires a tokio runtime")?;
        anyhow::ensure!(self.session.begin(), "sms watch was already started");

        let registration = match self.store.register() {
            Ok(registration) => registration,
            Err(error) => {
                self.session.close();
                return Err(error.context("failed to register with message store"));
            }
        };
        debug!(
            registration = registration.id(),
            recipients = self.recipients.len(),
            timeout = ?self.timeout,
            "watching for sent sms"
        );

        let session = self.session.clone();
        let cancel = CancellationToken::new();
        let task = runtime.spawn(self.watch(registration, cancel.clone(), Box::new(on_sent)));
        Ok(WatchHandle {
            session,
            cancel,
            task,
        })
    }

    async fn watch(
        self,
        registration: Registration,
        cancel: CancellationToken,
        on_sent: OnSent,
    ) -> WatchOutcome {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut on_sent = Some(on_sent);
        let mut subscription = Subscription {
            store: self.store.clone(),
            registration: Some(registration),
        };

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break WatchOutcome::Stopped,
                _ = wait_until(deadline) => {
                    if !self.session.close() {
                        break WatchOutcome::Stopped;
                    }
                    info!(timeout = ?self.timeout, "no sent sms observed before timeout");
                    if let Some(on_sent) = on_sent.take() {
                        on_sent(false);
                    }
                    break WatchOutcome::TimedOut;
                }
                change = subscription.changed() => {
                    if change.is_none() {
                        warn!("message store stopped delivering notifications");
                        self.session.close();
                        break WatchOutcome::Disconnected;
                    }
                    if self.session.state() != WatchState::Watching {
                        break WatchOutcome::Stopped;
                    }
                    let Some(contact_id) = self.check_latest().await else {
                        continue;
                    };
                    if !self.session.close() {
                        break WatchOutcome::Stopped;
                    }
                    if let Some(on_sent) = on_sent.take() {
                        on_sent(true);
                    }
                    break WatchOutcome::Sent { contact_id };
                }
            }
        };

        drop(subscription);
        if let WatchOutcome::Sent { contact_id } = outcome {
            info!(contact_id, "observed sent sms");
            self.telemetry
                .log_event(SMS_SENT_EVENT, &[("contact_id", contact_id.to_string())]);
        }
        outcome
    }

    /// Returns the id of the recipient of the most recent entry, if it was sent to one
    async fn check_latest(&self) -> Option<i64> {
        let entry = match self.store.latest().await {
            Ok(entry) => entry?,
            Err(error) => {
                // transient; the next change is checked again
                error!("failed to read latest sms: {error:#}");
                return None;
            }
        };
        let contact = match_recipient(&entry, &self.recipients, &self.matcher);
        if contact.is_none() {
            debug!(kind = %entry.kind, "latest sms does not match any recipient");
        }
        contact.map(|contact| contact.id)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Handle of a running watch session
///
/// Dropping the handle does not stop the session.
#[derive(Debug)]
pub struct WatchHandle {
    session: Arc<Session>,
    cancel: CancellationToken,
    task: JoinHandle<WatchOutcome>,
}

impl WatchHandle {
    /// Stops watching without calling the callback
    ///
    /// Has no effect if the session is already closed.
    pub fn stop(&self) {
        if self.session.close() {
            debug!("sms watch stopped");
        }
        self.cancel.cancel();
    }

    pub fn state(&self) -> WatchState {
        self.session.state()
    }

    /// Waits until the session is closed and unregistered from the store
    ///
    /// A panicking callback is reported as [`WatchOutcome::Stopped`].
    pub async fn closed(self) -> WatchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(error) if error.is_panic() => {
                error!(%error, "sms watch callback panicked");
                WatchOutcome::Stopped
            }
            Err(error) => {
                error!(%error, "sms watch task failed");
                WatchOutcome::Stopped
            }
        }
    }
}
