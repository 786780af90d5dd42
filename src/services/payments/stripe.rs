//! Stripe REST client.
//!
//! Stripe takes form-encoded bodies with bracketed keys
//! (`items[0][price_data][unit_amount]=1500`) and answers JSON. Error bodies
//! look like `{"error": {"message": "Your card was declined."}}`; that
//! message is what callers relay to the user.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{
    Invoice, NewPaymentIntent, NewProcessorSubscription, PaymentError, PaymentIntent,
    PaymentProcessor,
};

const CURRENCY: &str = "cad";

pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    product_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

impl StripeClient {
    pub fn new(
        api_base: &str,
        secret_key: &str,
        product_id: Option<String>,
    ) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PaymentError::Transport(format!("HTTP client error: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            product_id,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, PaymentError> {
        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Stripe request failed");
            return Err(PaymentError::Api(error_message(status.as_u16(), &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| PaymentError::Transport(format!("Unexpected Stripe response: {e}")))
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, PaymentError> {
        self.send(self.request(Method::POST, path).form(params)).await
    }
}

/// Extract Stripe's human-readable message from an error body.
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<StripeErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| format!("Payment processor returned status {status}"))
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Form parameters for `POST /v1/subscriptions`.
fn subscription_params(
    request: &NewProcessorSubscription<'_>,
    product_id: &str,
) -> Vec<(String, String)> {
    let (interval, interval_count) = request.frequency.billing_interval();
    let mut params = vec![
        param("customer", request.customer_id),
        param("items[0][price_data][currency]", CURRENCY),
        param("items[0][price_data][product]", product_id),
        param("items[0][price_data][unit_amount]", request.amount_cents),
        param("items[0][price_data][recurring][interval]", interval),
        param(
            "items[0][price_data][recurring][interval_count]",
            interval_count,
        ),
        param("metadata[subscription_id]", request.subscription_id),
    ];
    if let Some(first_charge_at) = request.first_charge_at {
        params.push(param("trial_end", first_charge_at));
    }
    params
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: Uuid,
    ) -> Result<String, PaymentError> {
        let customer: IdOnly = self
            .post_form(
                "/v1/customers",
                &[
                    param("email", email),
                    param("name", name),
                    param("metadata[user_id]", user_id),
                ],
            )
            .await?;
        Ok(customer.id)
    }

    async fn create_subscription(
        &self,
        request: &NewProcessorSubscription<'_>,
    ) -> Result<String, PaymentError> {
        let product_id = self
            .product_id
            .as_deref()
            .ok_or(PaymentError::NotConfigured)?;
        let subscription: IdOnly = self
            .post_form(
                "/v1/subscriptions",
                &subscription_params(request, product_id),
            )
            .await?;
        Ok(subscription.id)
    }

    async fn cancel_subscription(&self, processor_id: &str) -> Result<(), PaymentError> {
        let _: IdOnly = self
            .send(self.request(Method::DELETE, &format!("/v1/subscriptions/{processor_id}")))
            .await?;
        Ok(())
    }

    async fn pause_subscription(&self, processor_id: &str) -> Result<(), PaymentError> {
        let _: IdOnly = self
            .post_form(
                &format!("/v1/subscriptions/{processor_id}"),
                &[param("pause_collection[behavior]", "void")],
            )
            .await?;
        Ok(())
    }

    async fn resume_subscription(&self, processor_id: &str) -> Result<(), PaymentError> {
        // An empty value unsets pause_collection.
        let _: IdOnly = self
            .post_form(
                &format!("/v1/subscriptions/{processor_id}"),
                &[param("pause_collection", "")],
            )
            .await?;
        Ok(())
    }

    async fn latest_open_invoice(
        &self,
        processor_id: &str,
    ) -> Result<Option<Invoice>, PaymentError> {
        let invoices: List<Invoice> = self
            .send(self.request(Method::GET, "/v1/invoices").query(&[
                ("subscription", processor_id),
                ("status", "open"),
                ("limit", "1"),
            ]))
            .await?;
        Ok(invoices.data.into_iter().next())
    }

    async fn pay_invoice(&self, invoice_id: &str) -> Result<Invoice, PaymentError> {
        self.post_form(&format!("/v1/invoices/{invoice_id}/pay"), &[])
            .await
    }

    async fn create_payment_intent(
        &self,
        request: &NewPaymentIntent<'_>,
    ) -> Result<PaymentIntent, PaymentError> {
        self.post_form(
            "/v1/payment_intents",
            &[
                param("amount", request.amount_cents),
                param("currency", CURRENCY),
                param("customer", request.customer_id),
                param("description", format!("Transfer {}", request.reference)),
                param("metadata[transfer_id]", request.transfer_id),
                param("automatic_payment_methods[enabled]", "true"),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subscription::Frequency;

    #[test]
    fn stripe_error_message_is_extracted() {
        let body = r#"{"error":{"type":"card_error","message":"Your card was declined."}}"#;
        assert_eq!(error_message(402, body), "Your card was declined.");
    }

    #[test]
    fn unreadable_error_body_falls_back_to_status() {
        assert_eq!(
            error_message(502, "<html>bad gateway</html>"),
            "Payment processor returned status 502"
        );
    }

    #[test]
    fn biweekly_subscription_params() {
        let subscription_id = Uuid::new_v4();
        let request = NewProcessorSubscription {
            customer_id: "cus_123",
            amount_cents: 15_549,
            frequency: Frequency::Biweekly,
            subscription_id,
            first_charge_at: Some(1_800_000_000),
        };
        let params = subscription_params(&request, "prod_abc");
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("customer"), Some("cus_123"));
        assert_eq!(get("items[0][price_data][unit_amount]"), Some("15549"));
        assert_eq!(get("items[0][price_data][recurring][interval]"), Some("week"));
        assert_eq!(
            get("items[0][price_data][recurring][interval_count]"),
            Some("2")
        );
        assert_eq!(get("trial_end"), Some("1800000000"));
        assert_eq!(
            get("metadata[subscription_id]"),
            Some(subscription_id.to_string().as_str())
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = StripeClient::new("https://api.stripe.com/", "sk_test", None).unwrap();
        assert_eq!(client.api_base, "https://api.stripe.com");
    }
}
