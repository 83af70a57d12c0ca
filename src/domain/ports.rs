use super::invoice::{Amount, BillId, Invoice, PaymentMethod, PaymentReference, PaymentStatusSnapshot};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// The authoritative billing service. Every settlement and every
/// confirmation goes through this port; its answers override any local
/// state.
#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn get_by_id(&self, bill_id: BillId) -> Result<Invoice>;

    /// Settles `amount` against the bill. `amount <= remaining` is the only
    /// valid call; the service errors once the remaining amount is zero.
    async fn pay(&self, bill_id: BillId, amount: Amount, method: PaymentMethod)
        -> Result<Invoice>;

    /// Side-effect-free read of the bill's settlement state.
    async fn check_payment_status(&self, bill_id: BillId) -> Result<PaymentStatusSnapshot>;
}

pub type DynBillingApi = Arc<dyn BillingApi>;

/// Produces the payment reference displayed for a bank transfer. The QR
/// image itself is rendered elsewhere; this port only composes the
/// reference string the image encodes.
pub trait ReferenceIssuer: Send + Sync {
    fn payment_reference(&self, invoice: &Invoice, amount: Amount) -> PaymentReference;
}

pub type DynReferenceIssuer = Arc<dyn ReferenceIssuer>;
