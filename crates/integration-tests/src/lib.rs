//! Integration tests for the Buildify cart.
//!
//! Provides [`FakeCartApi`], an in-process `axum` server that speaks the
//! customer cart API (`GET`/`PUT /api/customer/cart`) with switchable
//! failures. Tests point an [`HttpCartStore`] at it and drive a real
//! [`CartManager`] end to end.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p buildify-integration-tests
//! ```
//!
//! [`HttpCartStore`]: buildify_storefront::api::HttpCartStore
//! [`CartManager`]: buildify_storefront::cart::CartManager

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use buildify_core::{ProductSnapshot, UserId};
use buildify_storefront::api::CUSTOMER_CART_PATH;
use buildify_storefront::auth::AuthenticatedUser;
use buildify_storefront::cart::Cart;
use buildify_storefront::config::{ApiConfig, StorefrontConfig};

/// Token the fake API accepts.
pub const TEST_TOKEN: &str = "test-token";

/// Account ID of the test customer.
pub const TEST_USER_ID: &str = "64f0c0ffee";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct FakeState {
    cart: Mutex<Value>,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

/// In-process fake of the customer cart endpoints.
///
/// The stored cart is kept as raw JSON, the way the real backend keeps it.
/// The server stops when this value is dropped.
pub struct FakeCartApi {
    state: Arc<FakeState>,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl FakeCartApi {
    /// Start the fake on an ephemeral local port with an empty cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> Result<Self, BoxError> {
        let state = Arc::new(FakeState {
            cart: Mutex::new(json!([])),
            fail_get: AtomicBool::new(false),
            fail_put: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route(CUSTOMER_CART_PATH, get(get_cart).put(put_cart))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            state,
            addr,
            server,
        })
    }

    /// Base URL of the fake, e.g. `http://127.0.0.1:41234`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Storefront configuration pointing at the fake.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is rejected.
    pub fn config(&self) -> Result<StorefrontConfig, BoxError> {
        let mut api = ApiConfig::new(&self.base_url())?;
        api.timeout = Duration::from_secs(5);
        Ok(StorefrontConfig {
            api,
            session_ttl: Duration::from_secs(300),
            sentry_dsn: None,
            sentry_environment: None,
        })
    }

    /// Replace the stored account cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart cannot be serialized.
    pub fn set_cart(&self, cart: &Cart) -> Result<(), BoxError> {
        *self.lock_cart() = serde_json::to_value(cart)?;
        Ok(())
    }

    /// Store raw JSON as the account cart.
    pub fn set_raw_cart(&self, value: Value) {
        *self.lock_cart() = value;
    }

    /// The stored account cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored JSON is not a valid cart.
    pub fn stored_cart(&self) -> Result<Cart, BoxError> {
        let value = self.lock_cart().clone();
        Ok(serde_json::from_value(value)?)
    }

    /// Make `GET` answer 500.
    pub fn fail_reads(&self, fail: bool) {
        self.state.fail_get.store(fail, Ordering::SeqCst);
    }

    /// Make `PUT` answer 500.
    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_put.store(fail, Ordering::SeqCst);
    }

    /// Number of `GET` requests served.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    /// Number of `PUT` requests served.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }

    fn lock_cart(&self) -> std::sync::MutexGuard<'_, Value> {
        self.state.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FakeCartApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// The customer the fake API accepts.
#[must_use]
pub fn test_user() -> AuthenticatedUser {
    AuthenticatedUser::new(
        UserId::new(TEST_USER_ID),
        SecretString::from(TEST_TOKEN.to_string()),
    )
}

/// A customer whose token the fake API rejects.
#[must_use]
pub fn expired_user() -> AuthenticatedUser {
    AuthenticatedUser::new(
        UserId::new(TEST_USER_ID),
        SecretString::from("expired".to_string()),
    )
}

/// Catalog product as the storefront receives it.
///
/// # Errors
///
/// Returns an error if the product fails validation.
pub fn catalog_product(
    id: &str,
    name: &str,
    price: i64,
    discount: Option<i64>,
) -> Result<ProductSnapshot, BoxError> {
    let mut value = json!({ "_id": id, "name": name, "price": price, "unit": "bag" });
    if let Some(d) = discount {
        value["discountPrice"] = json!(d);
    }
    Ok(ProductSnapshot::from_json(value)?)
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_cart(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&headers) {
        return rejection;
    }
    state.gets.fetch_add(1, Ordering::SeqCst);
    if state.fail_get.load(Ordering::SeqCst) {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable");
    }

    let cart = state
        .cart
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(json!({ "success": true, "data": cart })).into_response()
}

async fn put_cart(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejection) = authorize(&headers) {
        return rejection;
    }
    state.puts.fetch_add(1, Ordering::SeqCst);
    if state.fail_put.load(Ordering::SeqCst) {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable");
    }

    let Some(cart) = body.get("cart").filter(|c| c.is_array()).cloned() else {
        return failure(StatusCode::BAD_REQUEST, "cart must be an array");
    };
    *state.cart.lock().unwrap_or_else(PoisonError::into_inner) = cart.clone();
    Json(json!({ "success": true, "data": cart })).into_response()
}

fn authorize(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {TEST_TOKEN}");
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(failure(StatusCode::UNAUTHORIZED, "Not authorized, token failed")),
    }
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}
