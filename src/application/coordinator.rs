//! Drives one payment attempt to a terminal outcome and announces
//! completion.
//!
//! Cash and card are settled synchronously against the billing service and
//! finalized on the spot. A transfer only hands the operator a payment
//! reference; settlement is confirmed later, either by the fast-path check
//! in [`PaymentCoordinator::confirm`] or by the polling session it starts.

use crate::application::poller::{
    ConfirmationPoller, PollerConfig, PollerHandle, PollerOutcome,
};
use crate::domain::invoice::{
    Amount, BillId, Invoice, PaymentMethod, PaymentReference, PaymentStatusSnapshot,
};
use crate::domain::ports::{DynBillingApi, DynReferenceIssuer};
use crate::error::{Result, SettlementError};
use crate::events::{SettlementEvent, SettlementEventBus};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Result of [`PaymentCoordinator::initiate`].
#[derive(Debug, Clone)]
pub enum InitiateOutcome {
    /// Nothing left to pay; no network call was made.
    AlreadySettled,
    /// Cash/card settlement accepted by the billing service.
    Settled(Invoice),
    /// Transfer prepared; the caller displays the reference and confirms
    /// explicitly via [`PaymentCoordinator::confirm`].
    AwaitingTransfer(PaymentReference),
}

/// Result of [`PaymentCoordinator::confirm`].
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// The authoritative fast-path check already saw the transfer.
    Confirmed(PaymentStatusSnapshot),
    /// A polling session was started for this bill.
    Polling(PollerHandle),
    /// A session was already active; no second schedule was created.
    AlreadyPolling(PollerHandle),
}

/// Publishes settlement events and remembers which bills have been seen
/// fully settled, so a repeated confirmation of the same invoice never
/// re-announces it.
#[derive(Clone)]
struct Finalizer {
    events: SettlementEventBus,
    fully_settled: Arc<Mutex<HashSet<BillId>>>,
}

impl Finalizer {
    fn settle(
        &self,
        bill_id: BillId,
        amount: Decimal,
        method: PaymentMethod,
        remaining_after: Decimal,
    ) {
        {
            let mut settled = self.fully_settled.lock();
            if settled.contains(&bill_id) {
                tracing::debug!(%bill_id, "settlement already announced, skipping");
                return;
            }
            if remaining_after <= Decimal::ZERO {
                settled.insert(bill_id);
            }
        }

        tracing::info!(%bill_id, %amount, %method, "settlement completed");
        self.events.publish(SettlementEvent {
            bill_id,
            amount,
            payment_method: method,
            timestamp: Utc::now(),
        });
    }

    fn is_fully_settled(&self, bill_id: BillId) -> bool {
        self.fully_settled.lock().contains(&bill_id)
    }
}

/// One-session-per-bill registry. Terminal sessions are swept on access.
#[derive(Clone, Default)]
struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<BillId, PollerHandle>>>,
}

impl SessionRegistry {
    /// Returns the bill's session if it is still live.
    fn active(&self, bill_id: BillId) -> Option<PollerHandle> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, handle| !handle.status().is_terminal());
        sessions.get(&bill_id).cloned()
    }

    /// Registers a freshly started session. Rejected locally, without any
    /// network call, when a live session already exists for the bill.
    fn register(&self, handle: PollerHandle) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let bill_id = handle.bill_id();
        if let Some(existing) = sessions.get(&bill_id)
            && !existing.status().is_terminal()
        {
            return Err(SettlementError::DuplicateSession(bill_id));
        }
        sessions.insert(bill_id, handle);
        Ok(())
    }

    fn remove(&self, bill_id: BillId) -> Option<PollerHandle> {
        self.sessions.lock().remove(&bill_id)
    }

    /// Deregisters a finished session, but only if it is still the one on
    /// record — a newer session registered for the same bill stays put.
    fn release(&self, handle: &PollerHandle) {
        let mut sessions = self.sessions.lock();
        if let Some(current) = sessions.get(&handle.bill_id())
            && current.same_session(handle)
        {
            sessions.remove(&handle.bill_id());
        }
    }
}

pub struct PaymentCoordinator {
    billing: DynBillingApi,
    issuer: DynReferenceIssuer,
    poller_config: PollerConfig,
    sessions: SessionRegistry,
    finalizer: Finalizer,
}

impl PaymentCoordinator {
    pub fn new(
        billing: DynBillingApi,
        issuer: DynReferenceIssuer,
        events: SettlementEventBus,
        poller_config: PollerConfig,
    ) -> Self {
        Self {
            billing,
            issuer,
            poller_config,
            sessions: SessionRegistry::default(),
            finalizer: Finalizer {
                events,
                fully_settled: Arc::new(Mutex::new(HashSet::new())),
            },
        }
    }

    /// Starts one payment attempt.
    ///
    /// Cash and card settle immediately through the billing service; the
    /// response is authoritative and final. A transfer is not settled here:
    /// a payment reference is prepared and returned so the operator can
    /// display it, and settlement is confirmed later via [`confirm`].
    ///
    /// A bill with nothing remaining short-circuits as a no-op success, so
    /// a stale double-submit cannot double-pay.
    ///
    /// [`confirm`]: PaymentCoordinator::confirm
    pub async fn initiate(
        &self,
        invoice: &Invoice,
        method: PaymentMethod,
        amount: Amount,
    ) -> Result<InitiateOutcome> {
        if invoice.remaining_amount() <= Decimal::ZERO {
            tracing::debug!(bill_id = %invoice.id, "nothing remaining, skipping payment");
            return Ok(InitiateOutcome::AlreadySettled);
        }

        if method.is_operator_confirmed() {
            let updated = self.billing.pay(invoice.id, amount, method).await?;
            self.finalizer.settle(
                invoice.id,
                amount.value(),
                method,
                updated.remaining_amount(),
            );
            return Ok(InitiateOutcome::Settled(updated));
        }

        let reference = self.issuer.payment_reference(invoice, amount);
        tracing::debug!(
            bill_id = %invoice.id,
            content = %reference.content,
            "transfer reference prepared"
        );
        Ok(InitiateOutcome::AwaitingTransfer(reference))
    }

    /// Confirms a transfer against the authoritative source.
    ///
    /// Performs one immediate `check_payment_status`. If the transfer has
    /// already landed the settlement is finalized on the spot (idempotent:
    /// confirming an already-settled bill again announces nothing).
    /// Otherwise a polling session is started for the bill; if one is
    /// already active this call is a no-op that returns the existing
    /// session instead of racing a second one.
    pub async fn confirm(&self, invoice: &Invoice) -> Result<ConfirmOutcome> {
        let bill_id = invoice.id;
        let amount = invoice.remaining_amount();

        let snapshot = self.billing.check_payment_status(bill_id).await?;
        if snapshot.is_paid {
            self.finalizer.settle(
                bill_id,
                amount,
                PaymentMethod::Transfer,
                snapshot.remaining_amount,
            );
            return Ok(ConfirmOutcome::Confirmed(snapshot));
        }

        if let Some(existing) = self.sessions.active(bill_id) {
            tracing::debug!(%bill_id, "confirmation already in progress, reusing session");
            return Ok(ConfirmOutcome::AlreadyPolling(existing));
        }

        let poller = ConfirmationPoller::new(bill_id, self.billing.clone(), self.poller_config);
        let finalizer = self.finalizer.clone();
        let sessions = self.sessions.clone();
        let own_handle = poller.handle();
        let handle = poller.start(move |outcome| async move {
            if let PollerOutcome::Confirmed(snapshot) = outcome {
                finalizer.settle(
                    bill_id,
                    amount,
                    PaymentMethod::Transfer,
                    snapshot.remaining_amount,
                );
            }
            sessions.release(&own_handle);
        });

        match self.sessions.register(handle.clone()) {
            Ok(()) => Ok(ConfirmOutcome::Polling(handle)),
            Err(SettlementError::DuplicateSession(_)) => {
                // Another confirm won the registration race; stand down.
                handle.cancel();
                let existing = self
                    .sessions
                    .active(bill_id)
                    .ok_or(SettlementError::DuplicateSession(bill_id))?;
                Ok(ConfirmOutcome::AlreadyPolling(existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Tears down the bill's confirmation session, if any. Synchronous: no
    /// check fires afterwards and an in-flight response is discarded. Called
    /// when the confirmation view closes.
    pub fn cancel_confirmation(&self, bill_id: BillId) {
        if let Some(handle) = self.sessions.remove(bill_id) {
            handle.cancel();
        }
    }

    /// Whether this coordinator has seen the bill fully settled.
    pub fn is_fully_settled(&self, bill_id: BillId) -> bool {
        self.finalizer.is_fully_settled(bill_id)
    }
}
