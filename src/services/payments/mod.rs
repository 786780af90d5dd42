//! Payment processor integration.
//!
//! Business logic talks to the processor only through [`PaymentProcessor`],
//! so the Stripe client can be swapped for [`DisabledProcessor`] (no key
//! configured) or a test double.

pub mod stripe;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;
use crate::models::subscription::Frequency;

/// Errors raised by the payment processor client.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The processor answered with an error; the message is user-presentable.
    #[error("{0}")]
    Api(String),

    /// Network failure, timeout or unreadable response.
    #[error("Payment processor unreachable: {0}")]
    Transport(String),

    /// No processor key configured for this deployment.
    #[error("Payment processing is not configured")]
    NotConfigured,
}

/// Invoice as returned by the processor. Only the fields we act on.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
}

impl Invoice {
    pub fn is_paid(&self) -> bool {
        self.status.as_deref() == Some("paid")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: Option<String>,
}

/// Parameters for a new recurring charge.
#[derive(Debug, Clone)]
pub struct NewProcessorSubscription<'a> {
    pub customer_id: &'a str,
    pub amount_cents: i64,
    pub frequency: Frequency,
    pub subscription_id: Uuid,
    /// Unix timestamp of the first charge when it is in the future
    pub first_charge_at: Option<i64>,
}

/// Parameters for a one-time charge.
#[derive(Debug, Clone)]
pub struct NewPaymentIntent<'a> {
    pub customer_id: &'a str,
    pub amount_cents: i64,
    pub transfer_id: Uuid,
    pub reference: &'a str,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// False for [`DisabledProcessor`]; callers skip processor calls entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: Uuid,
    ) -> Result<String, PaymentError>;

    /// Returns the processor's subscription id.
    async fn create_subscription(
        &self,
        request: &NewProcessorSubscription<'_>,
    ) -> Result<String, PaymentError>;

    async fn cancel_subscription(&self, processor_id: &str) -> Result<(), PaymentError>;

    async fn pause_subscription(&self, processor_id: &str) -> Result<(), PaymentError>;

    async fn resume_subscription(&self, processor_id: &str) -> Result<(), PaymentError>;

    /// Most recent invoice of the subscription still awaiting payment.
    async fn latest_open_invoice(
        &self,
        processor_id: &str,
    ) -> Result<Option<Invoice>, PaymentError>;

    async fn pay_invoice(&self, invoice_id: &str) -> Result<Invoice, PaymentError>;

    async fn create_payment_intent(
        &self,
        request: &NewPaymentIntent<'_>,
    ) -> Result<PaymentIntent, PaymentError>;
}

/// Processor used when no secret key is configured. Every call fails with
/// [`PaymentError::NotConfigured`]; services check `is_enabled` first.
#[derive(Debug, Default)]
pub struct DisabledProcessor;

#[async_trait]
impl PaymentProcessor for DisabledProcessor {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn create_customer(&self, _: &str, _: &str, _: Uuid) -> Result<String, PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn create_subscription(
        &self,
        _: &NewProcessorSubscription<'_>,
    ) -> Result<String, PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn cancel_subscription(&self, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn pause_subscription(&self, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn resume_subscription(&self, _: &str) -> Result<(), PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn latest_open_invoice(&self, _: &str) -> Result<Option<Invoice>, PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn pay_invoice(&self, _: &str) -> Result<Invoice, PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    async fn create_payment_intent(
        &self,
        _: &NewPaymentIntent<'_>,
    ) -> Result<PaymentIntent, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
}

/// Pick the processor for this deployment.
pub fn build_processor(config: &Config) -> Result<Arc<dyn PaymentProcessor>, PaymentError> {
    match config.stripe_secret_key.as_deref().filter(|k| !k.is_empty()) {
        Some(secret_key) => {
            let client = stripe::StripeClient::new(
                &config.stripe_api_base,
                secret_key,
                config.stripe_product_id.clone(),
            )?;
            tracing::info!("Stripe payment processor enabled");
            Ok(Arc::new(client))
        }
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, payment processing disabled");
            Ok(Arc::new(DisabledProcessor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_key_missing() {
        let processor = build_processor(&Config::for_tests()).unwrap();
        assert!(!processor.is_enabled());
    }

    #[test]
    fn enabled_with_key() {
        let mut config = Config::for_tests();
        config.stripe_secret_key = Some("sk_test_123".into());
        let processor = build_processor(&config).unwrap();
        assert!(processor.is_enabled());
    }

    #[tokio::test]
    async fn disabled_processor_refuses_calls() {
        let err = DisabledProcessor.pay_invoice("in_123").await.unwrap_err();
        assert!(matches!(err, PaymentError::NotConfigured));
    }
}
