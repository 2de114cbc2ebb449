//! Remote account cart store.
//!
//! # Architecture
//!
//! - The Buildify API is the source of truth for a signed-in customer's cart
//! - The cart is always read and written whole; there are no line-level calls
//! - Every failure is a transport failure to the caller; the API exposes no
//!   business error codes at this layer
//!
//! # Endpoints
//!
//! - `GET /api/customer/cart` - current cart for the bearer token's account
//! - `PUT /api/customer/cart` - replace the cart with `{ "cart": [...] }`

mod http;

pub use http::HttpCartStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::AuthenticatedUser;
use crate::cart::Cart;

/// Path of the customer cart resource.
pub const CUSTOMER_CART_PATH: &str = "/api/customer/cart";

/// Errors that can occur when talking to the remote cart store.
#[derive(Debug, Error)]
pub enum CartStoreError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },

    /// The API answered `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Account-scoped cart storage.
#[async_trait]
pub trait RemoteCartStore: Send + Sync {
    /// Fetch the account's current cart.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError` on any transport or decoding failure.
    async fn fetch_cart(&self, user: &AuthenticatedUser) -> Result<Cart, CartStoreError>;

    /// Replace the account's cart with `cart`.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError` on any transport failure.
    async fn replace_cart(
        &self,
        user: &AuthenticatedUser,
        cart: &Cart,
    ) -> Result<(), CartStoreError>;
}
