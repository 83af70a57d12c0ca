//! Bounded, cancellable confirmation loop for out-of-band payments.
//!
//! A bank transfer settles in a system this application does not control,
//! so after the operator shows the payment reference the only way to learn
//! the outcome is to ask the billing service again, on a timer, until it
//! answers paid or the window closes.

use crate::domain::invoice::{BillId, PaymentStatusSnapshot};
use crate::domain::ports::DynBillingApi;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Spacing between authoritative checks.
    pub interval: Duration,
    /// Ceiling on the number of checks before the session times out.
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    /// 30 attempts at 10s spacing, a roughly five minute window.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

/// Lifecycle of one confirmation session. `Idle -> Active` on start, then
/// exactly one of the terminal states; terminal states never transition
/// further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerStatus {
    Idle,
    Active,
    Succeeded,
    TimedOut,
    Cancelled,
}

impl PollerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollerStatus::Succeeded | PollerStatus::TimedOut | PollerStatus::Cancelled
        )
    }
}

/// Terminal result handed to the coordinator. Cancellation produces no
/// outcome at all.
#[derive(Debug, Clone)]
pub enum PollerOutcome {
    Confirmed(PaymentStatusSnapshot),
    TimedOut,
}

struct PollerShared {
    status: Mutex<PollerStatus>,
    attempts: AtomicU32,
    terminal: Notify,
}

impl PollerShared {
    /// Moves Active to `next`. Returns false when a terminal state won the
    /// race, in which case the caller must discard whatever it was about to
    /// report.
    fn transition(&self, next: PollerStatus) -> bool {
        let mut status = self.status.lock();
        if *status == PollerStatus::Active {
            *status = next;
            true
        } else {
            false
        }
    }
}

/// A single confirmation session for one bill. Construct with [`new`],
/// then [`start`] it to begin polling; the returned [`PollerHandle`] is the
/// only way to observe or cancel the running session.
///
/// [`new`]: ConfirmationPoller::new
/// [`start`]: ConfirmationPoller::start
pub struct ConfirmationPoller {
    bill_id: BillId,
    billing: DynBillingApi,
    config: PollerConfig,
    shared: Arc<PollerShared>,
    cancel: CancellationToken,
}

impl ConfirmationPoller {
    pub fn new(bill_id: BillId, billing: DynBillingApi, config: PollerConfig) -> Self {
        Self {
            bill_id,
            billing,
            config,
            shared: Arc::new(PollerShared {
                status: Mutex::new(PollerStatus::Idle),
                attempts: AtomicU32::new(0),
                terminal: Notify::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// A handle to this session, usable before [`start`] — e.g. to let the
    /// terminal callback identify its own session.
    ///
    /// [`start`]: ConfirmationPoller::start
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            bill_id: self.bill_id,
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Starts the timer-driven loop. The first check fires one interval
    /// after start, each subsequent check one interval after the previous
    /// tick. `on_terminal` runs once, on success or timeout; a cancelled
    /// session invokes no callback.
    ///
    /// A check whose response is still in flight when the session is
    /// cancelled loses the race: its result is discarded and mutates
    /// nothing.
    pub fn start<F, Fut>(self, on_terminal: F) -> PollerHandle
    where
        F: FnOnce(PollerOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut status = self.shared.status.lock();
            debug_assert_eq!(*status, PollerStatus::Idle);
            *status = PollerStatus::Active;
        }

        let handle = self.handle();

        let Self {
            bill_id,
            billing,
            config,
            shared,
            cancel,
        } = self;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Consume the immediate first tick; the caller has already done
            // an authoritative check before starting the session.
            ticker.tick().await;

            let outcome = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break None,
                    _ = ticker.tick() => {}
                }

                let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;

                let checked = tokio::select! {
                    _ = cancel.cancelled() => break None,
                    result = billing.check_payment_status(bill_id) => result,
                };

                match checked {
                    Ok(snapshot) if snapshot.is_paid => {
                        if shared.transition(PollerStatus::Succeeded) {
                            tracing::info!(%bill_id, attempt, "transfer confirmed");
                            break Some(PollerOutcome::Confirmed(snapshot));
                        }
                        // Cancelled while the check was in flight; the
                        // response is discarded.
                        break None;
                    }
                    Ok(_) => {
                        tracing::trace!(%bill_id, attempt, "transfer not confirmed yet");
                    }
                    Err(e) => {
                        // Transient miss: counted against the window but
                        // never surfaced, the loop keeps going.
                        tracing::debug!(%bill_id, attempt, "confirmation check failed: {e}");
                    }
                }

                if attempt >= config.max_attempts {
                    if shared.transition(PollerStatus::TimedOut) {
                        tracing::warn!(
                            %bill_id,
                            attempts = attempt,
                            "transfer not confirmed within the polling window"
                        );
                        break Some(PollerOutcome::TimedOut);
                    }
                    break None;
                }
            };

            if let Some(outcome) = outcome {
                on_terminal(outcome).await;
            }
            shared.terminal.notify_waiters();
        });

        handle
    }
}

/// Observer and teardown handle for a running session. Clones share the
/// same session.
#[derive(Clone)]
pub struct PollerHandle {
    bill_id: BillId,
    shared: Arc<PollerShared>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("bill_id", &self.bill_id)
            .field("status", &self.status())
            .finish()
    }
}

impl PollerHandle {
    pub fn bill_id(&self) -> BillId {
        self.bill_id
    }

    pub fn status(&self) -> PollerStatus {
        *self.shared.status.lock()
    }

    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Whether two handles observe the same underlying session.
    pub fn same_session(&self, other: &PollerHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Synchronously stops the session. No further checks fire, no callback
    /// runs, and a response already in flight is discarded. Cancelling a
    /// session that already reached a terminal state is a no-op.
    pub fn cancel(&self) {
        if self.shared.transition(PollerStatus::Cancelled) {
            tracing::debug!(bill_id = %self.bill_id, "confirmation session cancelled");
            self.cancel.cancel();
            self.shared.terminal.notify_waiters();
        }
    }

    /// Resolves once the session reaches a terminal state. On success and
    /// timeout the terminal callback has already completed by the time this
    /// returns.
    pub async fn wait(&self) -> PollerStatus {
        loop {
            let notified = self.shared.terminal.notified();
            tokio::pin!(notified);
            // Register before reading the status, so a notification landing
            // in between is not lost.
            notified.as_mut().enable();
            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            notified.await;
        }
    }
}
