//! Buildify storefront cart library.
//!
//! Keeps the shopping cart for one browsing session in memory and persists it
//! to the customer's account cart when signed in, or to session storage for
//! guests. On sign-in the guest cart is merged into the account cart.
//!
//! - [`cart::CartManager`] - the cart state and its operations
//! - [`auth::AuthSession`] - identity and change notifications
//! - [`api::RemoteCartStore`] - account cart backend ([`api::HttpCartStore`])
//! - [`storage::SessionStorage`] - guest cart backend ([`storage::EphemeralStorage`])

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod auth;
pub mod cart;
pub mod config;
pub mod error;
pub mod storage;
pub mod telemetry;
