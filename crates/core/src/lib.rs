//! Buildify Core - Shared types library.
//!
//! This crate provides the catalog-facing types used by the Buildify
//! components:
//! - `storefront` - Cart state, persistence and checkout summary
//! - `cli` - Command-line tools for driving a customer cart
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no storage.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, prices and product snapshots

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
