use crate::domain::invoice::{Amount, Invoice, PaymentReference};
use crate::domain::ports::ReferenceIssuer;

/// Receiving-account details for transfer references.
#[derive(Debug, Clone)]
pub struct QrConfig {
    /// Bank identification number of the clinic's receiving bank.
    pub bank_bin: String,
    pub account_number: String,
    /// Display template understood by the QR rendering service.
    pub template: String,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            bank_bin: "970422".to_string(),
            account_number: "0001122334455".to_string(),
            template: "compact2".to_string(),
        }
    }
}

/// Issues deterministic payment references for a fixed receiving account.
///
/// The content string embeds the bill's short code; the backend matches
/// incoming transfers against it, so the same invoice and amount must
/// always produce the same reference.
pub struct StaticQrIssuer {
    config: QrConfig,
}

impl StaticQrIssuer {
    pub fn new(config: QrConfig) -> Self {
        Self { config }
    }
}

impl ReferenceIssuer for StaticQrIssuer {
    fn payment_reference(&self, invoice: &Invoice, amount: Amount) -> PaymentReference {
        PaymentReference {
            bank_bin: self.config.bank_bin.clone(),
            account_number: self.config.account_number.clone(),
            template: self.config.template.clone(),
            amount: amount.value(),
            content: format!("PAY {}", invoice.id.short_code()),
        }
    }
}
