use crate::domain::invoice::{Amount, BillId, Invoice, PaymentMethod, PaymentStatusSnapshot};
use crate::domain::ports::BillingApi;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct BillRecord {
    checks_seen: u32,
    pays_seen: u32,
    /// Simulates a transfer landing out of band: once this many checks have
    /// been observed, the remaining amount settles before the snapshot is
    /// taken.
    transfer_lands_after: Option<u32>,
    /// Pending injected transport failures for `check_payment_status`.
    failing_checks: u32,
}

/// An authoritative billing service held in memory.
///
/// Behaves like the real thing (payment validation, forward-only status
/// transitions, rejection once settled) and adds the knobs an asynchronous
/// confirmation flow needs exercised: transfers landing out of band and
/// transient check failures. Used by the whole test suite and usable as a
/// local development backend.
#[derive(Default, Clone)]
pub struct InMemoryBillingService {
    bills: Arc<RwLock<HashMap<BillId, Invoice>>>,
    records: Arc<RwLock<HashMap<BillId, BillRecord>>>,
}

impl InMemoryBillingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, invoice: Invoice) {
        let mut bills = self.bills.write().await;
        bills.insert(invoice.id, invoice);
    }

    /// A bank transfer for the full remaining amount lands now, exactly as
    /// if the patient had scanned the reference and paid.
    pub async fn receive_transfer(&self, bill_id: BillId) -> Result<()> {
        let mut bills = self.bills.write().await;
        let invoice = bills
            .get_mut(&bill_id)
            .ok_or_else(|| SettlementError::Validation(format!("unknown bill {bill_id}")))?;
        let remaining = Amount::new(invoice.remaining_amount())?;
        invoice.record_payment(remaining, PaymentMethod::Transfer)
    }

    /// The transfer lands just before the `n`-th status check is answered.
    pub async fn receive_transfer_after_checks(&self, bill_id: BillId, n: u32) {
        let mut records = self.records.write().await;
        records.entry(bill_id).or_default().transfer_lands_after = Some(n);
    }

    /// The next `n` status checks fail with a transport error.
    pub async fn fail_next_checks(&self, bill_id: BillId, n: u32) {
        let mut records = self.records.write().await;
        records.entry(bill_id).or_default().failing_checks = n;
    }

    pub async fn check_count(&self, bill_id: BillId) -> u32 {
        self.records
            .read()
            .await
            .get(&bill_id)
            .map(|r| r.checks_seen)
            .unwrap_or(0)
    }

    pub async fn pay_count(&self, bill_id: BillId) -> u32 {
        self.records
            .read()
            .await
            .get(&bill_id)
            .map(|r| r.pays_seen)
            .unwrap_or(0)
    }
}

#[async_trait]
impl BillingApi for InMemoryBillingService {
    async fn get_by_id(&self, bill_id: BillId) -> Result<Invoice> {
        let bills = self.bills.read().await;
        bills
            .get(&bill_id)
            .cloned()
            .ok_or_else(|| SettlementError::Validation(format!("unknown bill {bill_id}")))
    }

    async fn pay(
        &self,
        bill_id: BillId,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<Invoice> {
        {
            let mut records = self.records.write().await;
            records.entry(bill_id).or_default().pays_seen += 1;
        }

        let mut bills = self.bills.write().await;
        let invoice = bills
            .get_mut(&bill_id)
            .ok_or_else(|| SettlementError::Validation(format!("unknown bill {bill_id}")))?;
        invoice.record_payment(amount, method)?;
        Ok(invoice.clone())
    }

    async fn check_payment_status(&self, bill_id: BillId) -> Result<PaymentStatusSnapshot> {
        let landing_due = {
            let mut records = self.records.write().await;
            let record = records.entry(bill_id).or_default();
            record.checks_seen += 1;

            if record.failing_checks > 0 {
                record.failing_checks -= 1;
                return Err(SettlementError::Transport(
                    "injected network failure".to_string(),
                ));
            }

            match record.transfer_lands_after {
                Some(n) if record.checks_seen >= n => {
                    record.transfer_lands_after = None;
                    true
                }
                _ => false,
            }
        };

        if landing_due {
            self.receive_transfer(bill_id).await?;
        }

        let bills = self.bills.read().await;
        bills
            .get(&bill_id)
            .map(Invoice::snapshot)
            .ok_or_else(|| SettlementError::Validation(format!("unknown bill {bill_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::invoice::PaymentStatus;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_pay_updates_remaining() {
        let service = InMemoryBillingService::new();
        service.insert(Invoice::new(BillId(1), dec!(500000))).await;

        let updated = service
            .pay(
                BillId(1),
                Amount::new(dec!(200000)).unwrap(),
                PaymentMethod::Cash,
            )
            .await
            .unwrap();
        assert_eq!(updated.remaining_amount(), dec!(300000));
        assert_eq!(updated.payment_status, PaymentStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn test_pay_rejects_when_settled() {
        let service = InMemoryBillingService::new();
        service.insert(Invoice::new(BillId(1), dec!(100))).await;
        service.receive_transfer(BillId(1)).await.unwrap();

        let result = service
            .pay(BillId(1), Amount::new(dec!(1)).unwrap(), PaymentMethod::Cash)
            .await;
        assert!(matches!(result, Err(SettlementError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_check_is_side_effect_free_on_the_bill() {
        let service = InMemoryBillingService::new();
        service.insert(Invoice::new(BillId(1), dec!(100))).await;

        let before = service.get_by_id(BillId(1)).await.unwrap();
        let snapshot = service.check_payment_status(BillId(1)).await.unwrap();
        let after = service.get_by_id(BillId(1)).await.unwrap();

        assert!(!snapshot.is_paid);
        assert_eq!(before, after);
        assert_eq!(service.check_count(BillId(1)).await, 1);
    }

    #[tokio::test]
    async fn test_transfer_lands_on_scheduled_check() {
        let service = InMemoryBillingService::new();
        service.insert(Invoice::new(BillId(1), dec!(100))).await;
        service.receive_transfer_after_checks(BillId(1), 2).await;

        assert!(!service.check_payment_status(BillId(1)).await.unwrap().is_paid);
        assert!(service.check_payment_status(BillId(1)).await.unwrap().is_paid);
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let service = InMemoryBillingService::new();
        service.insert(Invoice::new(BillId(1), dec!(100))).await;
        service.fail_next_checks(BillId(1), 1).await;

        assert!(matches!(
            service.check_payment_status(BillId(1)).await,
            Err(SettlementError::Transport(_))
        ));
        assert!(service.check_payment_status(BillId(1)).await.is_ok());
        // Failed checks still count as observed checks.
        assert_eq!(service.check_count(BillId(1)).await, 2);
    }

    #[tokio::test]
    async fn test_unknown_bill() {
        let service = InMemoryBillingService::new();
        assert!(matches!(
            service.get_by_id(BillId(9)).await,
            Err(SettlementError::Validation(_))
        ));
    }
}
