use reqwest::{Client, Url};

use super::{
    StorePurchase, StoreReceipt, StoreVerifier, VerifyError, read_store_response, store_url,
    transport_error,
};
use crate::config::CafeBazaarConfig;
use crate::models::BillingPlatform;
use crate::util::token_prefix;

const STORE: &str = "cafebazaar";
const SECRET_HEADER: &str = "CAFEBAZAAR-PISHKHAN-API-SECRET";

#[derive(Debug, Clone)]
pub struct CafeBazaarClient {
    client: Client,
    api_base: String,
    package_name: Option<String>,
    api_secret: Option<String>,
}

impl CafeBazaarClient {
    pub fn new(client: Client, config: &CafeBazaarConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            package_name: config.package_name.clone(),
            api_secret: config.api_secret.clone(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), VerifyError> {
        match (&self.package_name, &self.api_secret) {
            (Some(package), Some(secret)) => Ok((package, secret)),
            _ => Err(VerifyError::NotConfigured(STORE)),
        }
    }

    /// `{base}/api/{action}/{package}/inapp/{product}/purchases/{token}/`
    fn purchase_url(
        &self,
        action: &str,
        package: &str,
        product_id: &str,
        token: &str,
    ) -> Result<Url, VerifyError> {
        store_url(
            STORE,
            &self.api_base,
            &["api", action, package, "inapp", product_id, "purchases", token, ""],
        )
    }
}

impl StoreVerifier for CafeBazaarClient {
    fn platform(&self) -> BillingPlatform {
        BillingPlatform::CafeBazaar
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn verify(&self, product_id: &str, purchase_token: &str) -> Result<StorePurchase, VerifyError> {
        let (package, secret) = self.credentials()?;

        tracing::debug!(
            product_id,
            token = %token_prefix(purchase_token),
            "Validating CafeBazaar purchase"
        );

        let response = self
            .client
            .get(self.purchase_url("validate", package, product_id, purchase_token)?)
            .header(SECRET_HEADER, secret)
            .send()
            .await
            .map_err(|e| transport_error(STORE, e))?;

        let body = read_store_response(STORE, response).await?;
        let receipt: StoreReceipt = serde_json::from_value(body.clone()).map_err(|e| {
            VerifyError::Unavailable {
                store: STORE,
                detail: format!("unexpected receipt shape: {}", e),
            }
        })?;
        receipt.into_purchase(body)
    }

    fn requires_acknowledgment(&self) -> bool {
        true
    }

    async fn acknowledge(&self, product_id: &str, purchase_token: &str) -> Result<(), VerifyError> {
        let (package, secret) = self.credentials()?;

        let response = self
            .client
            .post(self.purchase_url("acknowledge", package, product_id, purchase_token)?)
            .header(SECRET_HEADER, secret)
            .send()
            .await
            .map_err(|e| transport_error(STORE, e))?;

        // Body content is irrelevant once the status is 2xx; an empty body is fine.
        if response.status().is_success() {
            return Ok(());
        }
        read_store_response(STORE, response).await.map(|_| ())
    }
}
