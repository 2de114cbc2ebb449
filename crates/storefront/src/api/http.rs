//! `reqwest` implementation of [`RemoteCartStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{CUSTOMER_CART_PATH, CartStoreError, RemoteCartStore};
use crate::auth::AuthenticatedUser;
use crate::cart::Cart;
use crate::config::ApiConfig;

/// Characters of a failing response body kept for diagnostics.
const BODY_SNIPPET_LEN: usize = 200;

/// Response envelope used by every Buildify customer endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// Request body for replacing the cart.
#[derive(Serialize)]
struct ReplaceCartBody<'a> {
    cart: &'a Cart,
}

/// Client for the customer cart endpoints.
#[derive(Clone)]
pub struct HttpCartStore {
    inner: Arc<HttpCartStoreInner>,
}

struct HttpCartStoreInner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCartStore {
    /// Create a new cart store client.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, CartStoreError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            inner: Arc::new(HttpCartStoreInner {
                client,
                endpoint: config.endpoint(CUSTOMER_CART_PATH),
            }),
        })
    }

    /// Full URL of the cart resource.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Turn a response into its body text, mapping non-success statuses.
    async fn read_body(response: reqwest::Response) -> Result<String, CartStoreError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                body = %snippet(&text),
                "Cart API returned non-success status"
            );
            return Err(CartStoreError::Status {
                status: status.as_u16(),
                body: snippet(&text),
            });
        }

        Ok(text)
    }
}

impl std::fmt::Debug for HttpCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCartStore")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteCartStore for HttpCartStore {
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn fetch_cart(&self, user: &AuthenticatedUser) -> Result<Cart, CartStoreError> {
        let response = self
            .inner
            .client
            .get(&self.inner.endpoint)
            .header("Authorization", user.bearer())
            .send()
            .await?;

        let text = Self::read_body(response).await?;
        let cart = decode_cart(&text)?;
        debug!(lines = cart.len(), "Fetched account cart");
        Ok(cart)
    }

    #[instrument(skip(self, user, cart), fields(user_id = %user.id, lines = cart.len()))]
    async fn replace_cart(
        &self,
        user: &AuthenticatedUser,
        cart: &Cart,
    ) -> Result<(), CartStoreError> {
        let response = self
            .inner
            .client
            .put(&self.inner.endpoint)
            .header("Authorization", user.bearer())
            .json(&ReplaceCartBody { cart })
            .send()
            .await?;

        let text = Self::read_body(response).await?;
        // Some deployments answer 204 with no body.
        if !text.trim().is_empty() {
            let envelope: Envelope<serde_json::Value> = serde_json::from_str(&text)?;
            if !envelope.success {
                return Err(rejected(envelope.message));
            }
        }
        debug!("Replaced account cart");
        Ok(())
    }
}

/// Decode a `GET /api/customer/cart` body.
///
/// A successful envelope without `data` is an empty cart.
fn decode_cart(text: &str) -> Result<Cart, CartStoreError> {
    let envelope: Envelope<Cart> = serde_json::from_str(text).map_err(|e| {
        tracing::warn!(
            error = %e,
            body = %snippet(text),
            "Failed to parse cart response"
        );
        CartStoreError::Parse(e)
    })?;

    if !envelope.success {
        return Err(rejected(envelope.message));
    }
    Ok(envelope.data.unwrap_or_default())
}

fn rejected(message: Option<String>) -> CartStoreError {
    CartStoreError::Rejected(message.unwrap_or_else(|| "(no message)".to_string()))
}

fn snippet(text: &str) -> String {
    text.chars().take(BODY_SNIPPET_LEN).collect()
}
