use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a clinical invoice, owned by the billing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillId(pub u64);

impl BillId {
    /// Human-readable invoice code, embedded in transfer content strings so
    /// the backend can match incoming transfers back to the bill.
    pub fn short_code(&self) -> String {
        format!("INV{:06}", self.0)
    }
}

impl fmt::Display for BillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A strictly positive payment amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(SettlementError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SettlementError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    /// Cash and card settle synchronously at the desk; a transfer settles
    /// out of band and needs asynchronous confirmation.
    pub fn is_operator_confirmed(&self) -> bool {
        matches!(self, PaymentMethod::Cash | PaymentMethod::Card)
    }
}

impl FromStr for PaymentMethod {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "transfer" => Ok(PaymentMethod::Transfer),
            other => Err(SettlementError::Validation(format!(
                "unrecognized payment method: {other}"
            ))),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::Card => write!(f, "card"),
            PaymentMethod::Transfer => write!(f, "transfer"),
        }
    }
}

/// Settlement progress of an invoice. Transitions only move forward:
/// Pending -> PartiallyPaid -> Paid, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

impl PaymentStatus {
    fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::PartiallyPaid => 1,
            PaymentStatus::Paid => 2,
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// A clinical invoice as the billing service reports it.
///
/// The authoritative copy lives in the billing service; this subsystem only
/// reads and mutates it through API calls and never invents a Paid state
/// locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: BillId,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(id: BillId, total_amount: Decimal) -> Self {
        Self {
            id,
            total_amount,
            amount_paid: Decimal::ZERO,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            created_at: Utc::now(),
        }
    }

    /// Outstanding balance, clamped at zero.
    pub fn remaining_amount(&self) -> Decimal {
        (self.total_amount - self.amount_paid).max(Decimal::ZERO)
    }

    pub fn is_settled(&self) -> bool {
        self.remaining_amount() == Decimal::ZERO
    }

    /// Applies a settlement to the invoice. Used by the authoritative side
    /// (the billing service or its in-memory stand-in), never by the client
    /// paths, which only observe snapshots.
    pub fn record_payment(&mut self, amount: Amount, method: PaymentMethod) -> Result<()> {
        if self.is_settled() {
            return Err(SettlementError::Rejected(format!(
                "bill {} is already settled",
                self.id
            )));
        }
        if amount.value() > self.remaining_amount() {
            return Err(SettlementError::Rejected(format!(
                "amount {} exceeds remaining {} on bill {}",
                amount,
                self.remaining_amount(),
                self.id
            )));
        }

        self.amount_paid += amount.value();
        self.payment_method = Some(method);
        let next = if self.remaining_amount() == Decimal::ZERO {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        };
        debug_assert!(self.payment_status.can_transition_to(next));
        self.payment_status = next;
        Ok(())
    }

    pub fn snapshot(&self) -> PaymentStatusSnapshot {
        PaymentStatusSnapshot {
            is_paid: self.payment_status == PaymentStatus::Paid,
            payment_status: self.payment_status,
            amount_paid: self.amount_paid,
            remaining_amount: self.remaining_amount(),
        }
    }
}

/// Authoritative, side-effect-free read of an invoice's settlement state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusSnapshot {
    pub is_paid: bool,
    pub payment_status: PaymentStatus,
    pub amount_paid: Decimal,
    pub remaining_amount: Decimal,
}

/// The reference an operator displays for a bank transfer: bank BIN,
/// receiving account, display template, amount, and a content string the
/// backend matches incoming transfers against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReference {
    pub bank_bin: String,
    pub account_number: String,
    pub template: String,
    pub amount: Decimal,
    pub content: String,
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}?amount={}&addInfo={}",
            self.bank_bin, self.account_number, self.template, self.amount, self.content
        )
    }
}
