//! Cart state for the current browsing session.
//!
//! - [`model`] - cart lines and the pure operations over them
//! - [`manager`] - in-memory state, persistence and guest-to-account migration
//! - [`events`] - out-of-band notifications about loads, writes and failures
//! - [`summary`] - checkout totals and order payload

pub mod events;
pub mod manager;
pub mod model;
pub mod summary;

pub use events::{CartEvent, CartSource, MigrationOutcome, PersistOutcome};
pub use manager::{CartManager, IdentityTransition, PendingPersist};
pub use model::{Cart, CartLine};
pub use summary::{CartSummary, GST_RATE, OrderItem};

use thiserror::Error;

use buildify_core::ProductError;

use crate::api::CartStoreError;

/// Errors surfaced by cart operations that callers can act on.
///
/// Mutations never return these; only explicit requests (migration, order
/// payload, product decoding) do.
#[derive(Debug, Error)]
pub enum CartError {
    /// There is nothing in the cart.
    #[error("cart is empty")]
    EmptyCart,

    /// The product failed validation at the cart boundary.
    #[error("invalid product: {0}")]
    InvalidProduct(#[from] ProductError),

    /// The remote cart store failed.
    #[error("cart store error: {0}")]
    Store(#[from] CartStoreError),
}
