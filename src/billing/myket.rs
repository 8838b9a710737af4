use reqwest::Client;

use super::{
    StorePurchase, StoreReceipt, StoreVerifier, VerifyError, read_store_response, store_url,
    transport_error,
};
use crate::config::MyketConfig;
use crate::models::BillingPlatform;
use crate::util::token_prefix;

const STORE: &str = "myket";

/// Myket developer API. Purchases need no acknowledgment.
#[derive(Debug, Clone)]
pub struct MyketClient {
    client: Client,
    api_base: String,
    package_name: Option<String>,
    access_token: Option<String>,
}

impl MyketClient {
    pub fn new(client: Client, config: &MyketConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            package_name: config.package_name.clone(),
            access_token: config.access_token.clone(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), VerifyError> {
        match (&self.package_name, &self.access_token) {
            (Some(package), Some(token)) => Ok((package, token)),
            _ => Err(VerifyError::NotConfigured(STORE)),
        }
    }
}

impl StoreVerifier for MyketClient {
    fn platform(&self) -> BillingPlatform {
        BillingPlatform::Myket
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn verify(&self, product_id: &str, purchase_token: &str) -> Result<StorePurchase, VerifyError> {
        let (package, access_token) = self.credentials()?;

        tracing::debug!(
            product_id,
            token = %token_prefix(purchase_token),
            "Validating Myket purchase"
        );

        let url = store_url(
            STORE,
            &self.api_base,
            &[
                "api",
                "applications",
                package,
                "purchases",
                "products",
                product_id,
                "tokens",
                purchase_token,
            ],
        )?;

        let response = self
            .client
            .get(url)
            .header("X-Access-Token", access_token)
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
}
