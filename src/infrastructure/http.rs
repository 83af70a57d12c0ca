use crate::domain::invoice::{Amount, BillId, Invoice, PaymentMethod, PaymentStatusSnapshot};
use crate::domain::ports::BillingApi;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayRequest {
    amount: Amount,
    method: PaymentMethod,
}

/// Billing REST API client.
///
/// Business rejections (4xx) surface as [`SettlementError::Rejected`] and
/// are not retried; connection failures and 5xx surface as
/// [`SettlementError::Transport`], which a polling tick treats as a miss.
#[derive(Clone)]
pub struct HttpBillingClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBillingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let detail = if body.is_empty() {
                status.to_string()
            } else {
                body
            };
            return Err(SettlementError::Rejected(detail));
        }
        let response = response
            .error_for_status()
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| SettlementError::Transport(e.to_string()))
    }
}

#[async_trait]
impl BillingApi for HttpBillingClient {
    async fn get_by_id(&self, bill_id: BillId) -> Result<Invoice> {
        let url = format!("{}/bills/{}", self.base_url, bill_id);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn pay(
        &self,
        bill_id: BillId,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<Invoice> {
        let url = format!("{}/bills/{}/payments", self.base_url, bill_id);
        let response = self
            .http
            .post(url)
            .json(&PayRequest { amount, method })
            .send()
            .await
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn check_payment_status(&self, bill_id: BillId) -> Result<PaymentStatusSnapshot> {
        let url = format!("{}/bills/{}/payment-status", self.base_url, bill_id);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let client = HttpBillingClient::new("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_pay_request_wire_format() {
        let request = PayRequest {
            amount: Amount::new(dec!(200000)).unwrap(),
            method: PaymentMethod::Card,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"amount":"200000","method":"card"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = HttpBillingClient::new("http://127.0.0.1:1");
        let result = client.get_by_id(BillId(1)).await;
        assert!(matches!(result, Err(SettlementError::Transport(_))));
    }
}
