//! Cart notifications delivered through [`CartManager::events`].
//!
//! [`CartManager::events`]: super::CartManager::events

/// Where the in-memory cart was last loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CartSource {
    /// Nothing has been loaded yet.
    #[default]
    Unloaded,
    /// The signed-in customer's account cart.
    Remote,
    /// The guest session store.
    Local,
    /// The session store, because the account cart could not be fetched.
    LocalFallback,
}

/// Where a persisted snapshot ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written to the account cart.
    Remote,
    /// Written to the guest session store.
    Local,
    /// The account write failed; written to the session store instead.
    LocalFallback,
    /// Neither store accepted the write.
    Dropped,
    /// Nothing changed, so nothing was written.
    Unchanged,
}

/// Result of a guest-to-account merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The guest cart was empty; no remote call was made.
    NothingToMigrate,
    /// The guest cart was merged into the account cart.
    Merged {
        /// Distinct products in the merged cart.
        lines: usize,
    },
}

/// Notification emitted by the cart manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    /// A load replaced the in-memory cart.
    Loaded { source: CartSource, lines: usize },
    /// A snapshot was persisted.
    Persisted { outcome: PersistOutcome },
    /// The account write failed (the snapshot went to the fallback store).
    PersistFailed { error: String },
    /// A guest cart was merged into the account cart.
    Migrated { lines: usize },
    /// A migration was aborted; both source carts are untouched.
    MigrationFailed { error: String },
}
