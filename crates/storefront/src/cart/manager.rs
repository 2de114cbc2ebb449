//! The cart state manager.
//!
//! Holds the authoritative in-memory cart for one browsing session and keeps
//! it in the store selected by the session identity:
//!
//! | Identity        | Store                                  |
//! |-----------------|----------------------------------------|
//! | anonymous       | session storage ([`SessionStorage`])   |
//! | authenticated   | account cart ([`RemoteCartStore`])     |
//!
//! Mutations are applied to memory synchronously and then persisted by a
//! spawned task that writes the full snapshot. Persistence failures never
//! reach the caller; they are logged and published on [`CartManager::events`].
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = CartManager::from_config(&config, auth.clone())?;
//! let _observer = manager.watch_identity();
//! manager.load().await;
//!
//! manager.add_item(product, 2).wait().await;
//! println!("{} items, {}", manager.items_count(), manager.summary().grand_total);
//! ```

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use buildify_core::{ProductId, ProductSnapshot};

use super::CartError;
use super::events::{CartEvent, CartSource, MigrationOutcome, PersistOutcome};
use super::model::{Cart, CartLine};
use super::summary::CartSummary;
use crate::api::{CartStoreError, HttpCartStore, RemoteCartStore};
use crate::auth::{AuthSession, AuthenticatedUser, Identity};
use crate::config::StorefrontConfig;
use crate::error::{
    CART_CATEGORY, add_breadcrumb, clear_sentry_user, report_recoverable, set_sentry_user,
};
use crate::storage::{CART_KEY, EphemeralStorage, SessionStorage};

/// Capacity of the event channel; slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 64;

/// How an identity change was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityTransition {
    /// Same identity as before; nothing to do.
    Unchanged,
    /// Anonymous visitor signed in.
    SignedIn,
    /// Customer signed out.
    SignedOut,
    /// A different customer signed in over an existing login.
    SwitchedUser,
}

impl IdentityTransition {
    /// Classify the change from `previous` to `next`.
    #[must_use]
    pub fn between(previous: &Identity, next: &Identity) -> Self {
        match (previous, next) {
            _ if previous.same_as(next) => Self::Unchanged,
            (Identity::Anonymous, Identity::Authenticated(_)) => Self::SignedIn,
            (Identity::Authenticated(_), Identity::Anonymous) => Self::SignedOut,
            _ => Self::SwitchedUser,
        }
    }
}

/// Handle to the persist task spawned by a mutation.
///
/// Dropping it leaves the task running. Await [`PendingPersist::wait`] when
/// the next mutation must observe this one's write.
#[derive(Debug)]
pub struct PendingPersist {
    handle: Option<JoinHandle<PersistOutcome>>,
}

impl PendingPersist {
    /// A mutation that changed nothing and wrote nothing.
    const fn unchanged() -> Self {
        Self { handle: None }
    }

    /// Wait for the snapshot to be written.
    pub async fn wait(self) -> PersistOutcome {
        let Some(handle) = self.handle else {
            return PersistOutcome::Unchanged;
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Cart persist task failed");
                PersistOutcome::Dropped
            }
        }
    }
}

#[derive(Debug, Default)]
struct CartState {
    cart: Cart,
    is_loading: bool,
    source: CartSource,
}

/// Cart state for one browsing session.
///
/// This struct is cheaply cloneable via `Arc`; clones share the same cart.
#[derive(Clone)]
pub struct CartManager {
    inner: Arc<CartManagerInner>,
}

struct CartManagerInner {
    auth: AuthSession,
    remote: Arc<dyn RemoteCartStore>,
    local: Arc<dyn SessionStorage>,
    state: RwLock<CartState>,
    events: broadcast::Sender<CartEvent>,
}

impl CartManager {
    /// Create a manager over explicit collaborators.
    ///
    /// The cart starts empty and unloaded; call [`Self::load`] to populate it.
    #[must_use]
    pub fn new(
        auth: AuthSession,
        remote: Arc<dyn RemoteCartStore>,
        local: Arc<dyn SessionStorage>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CartManagerInner {
                auth,
                remote,
                local,
                state: RwLock::new(CartState::default()),
                events,
            }),
        }
    }

    /// Create a manager backed by the HTTP cart API and in-process session
    /// storage.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError` if the HTTP client cannot be built.
    pub fn from_config(
        config: &StorefrontConfig,
        auth: AuthSession,
    ) -> Result<Self, CartStoreError> {
        let remote = HttpCartStore::new(&config.api)?;
        let local = EphemeralStorage::new(config.session_ttl);
        Ok(Self::new(auth, Arc::new(remote), Arc::new(local)))
    }

    /// The authentication collaborator this manager follows.
    #[must_use]
    pub fn auth(&self) -> &AuthSession {
        &self.inner.auth
    }

    /// Subscribe to cart notifications.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CartEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replace the in-memory cart with the one in the active store.
    ///
    /// Signed in: the account cart, falling back to session storage if the
    /// fetch fails. Anonymous: session storage. Never fails.
    pub async fn load(&self) -> CartSource {
        let identity = self.inner.auth.current();
        self.load_for(&identity).await
    }

    #[instrument(skip_all, fields(authenticated = identity.is_authenticated()))]
    async fn load_for(&self, identity: &Identity) -> CartSource {
        self.write_state().is_loading = true;

        let (cart, source) = match identity.user() {
            Some(user) => match self.inner.remote.fetch_cart(user).await {
                Ok(cart) => (cart, CartSource::Remote),
                Err(e) => {
                    report_recoverable("Failed to load account cart, using session cart", &e);
                    (self.read_local(), CartSource::LocalFallback)
                }
            },
            None => (self.read_local(), CartSource::Local),
        };

        let lines = cart.len();
        {
            let mut state = self.write_state();
            state.cart = cart;
            state.source = source;
            state.is_loading = false;
        }

        debug!(?source, lines, "Cart loaded");
        self.emit(CartEvent::Loaded { source, lines });
        source
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` of `product` (a non-positive quantity counts as 1).
    ///
    /// The change is visible immediately; persistence runs in the background.
    /// Must be called from within a Tokio runtime.
    pub fn add_item(&self, product: ProductSnapshot, quantity: i64) -> PendingPersist {
        let product_id = product.id().clone();
        let snapshot = self.mutate(|cart| cart.add(product, quantity, Utc::now()));
        add_breadcrumb(
            CART_CATEGORY,
            "Added to cart",
            Some(&[("product_id", product_id.as_str())]),
        );
        self.spawn_persist(snapshot)
    }

    /// Set a line's quantity; zero or below removes the line.
    ///
    /// A product that is not in the cart is ignored and nothing is written.
    /// Must be called from within a Tokio runtime.
    pub fn update_quantity(&self, product_id: &ProductId, quantity: i64) -> PendingPersist {
        if quantity <= 0 {
            return self.remove_item(product_id);
        }
        let snapshot = {
            let mut state = self.write_state();
            if !state.cart.set_quantity(product_id, quantity) {
                debug!(%product_id, "Quantity update for product not in cart");
                return PendingPersist::unchanged();
            }
            state.cart.clone()
        };
        self.spawn_persist(snapshot)
    }

    /// Remove the line for `product_id`, if any.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn remove_item(&self, product_id: &ProductId) -> PendingPersist {
        let snapshot = self.mutate(|cart| {
            cart.remove(product_id);
        });
        self.spawn_persist(snapshot)
    }

    /// Empty the cart and write the empty cart to the active store.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn clear(&self) -> PendingPersist {
        let snapshot = self.mutate(Cart::clear);
        self.spawn_persist(snapshot)
    }

    /// Decode catalog JSON and add it, rejecting products that fail
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidProduct` if the product is malformed.
    pub fn add_item_json(
        &self,
        product: serde_json::Value,
        quantity: i64,
    ) -> Result<PendingPersist, CartError> {
        let product = ProductSnapshot::from_json(product)?;
        Ok(self.add_item(product, quantity))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write `cart` to the store for the current identity.
    ///
    /// A failed account write falls back to session storage and is reported,
    /// never retried.
    pub async fn persist(&self, cart: &Cart) -> PersistOutcome {
        let identity = self.inner.auth.current();
        self.persist_for(&identity, cart).await
    }

    #[instrument(skip_all, fields(authenticated = identity.is_authenticated(), lines = cart.len()))]
    async fn persist_for(&self, identity: &Identity, cart: &Cart) -> PersistOutcome {
        let outcome = match identity.user() {
            Some(user) => match self.inner.remote.replace_cart(user, cart).await {
                Ok(()) => PersistOutcome::Remote,
                Err(e) => {
                    report_recoverable("Failed to save account cart, writing session cart", &e);
                    self.emit(CartEvent::PersistFailed {
                        error: e.to_string(),
                    });
                    if self.write_local(cart) {
                        PersistOutcome::LocalFallback
                    } else {
                        PersistOutcome::Dropped
                    }
                }
            },
            None => {
                if self.write_local(cart) {
                    PersistOutcome::Local
                } else {
                    PersistOutcome::Dropped
                }
            }
        };

        self.emit(CartEvent::Persisted { outcome });
        outcome
    }

    fn spawn_persist(&self, snapshot: Cart) -> PendingPersist {
        // The snapshot belongs to whoever was signed in when it was taken.
        let identity = self.inner.auth.current();
        let manager = self.clone();
        let handle =
            tokio::spawn(async move { manager.persist_for(&identity, &snapshot).await });
        PendingPersist {
            handle: Some(handle),
        }
    }

    // =========================================================================
    // Guest-to-account migration
    // =========================================================================

    /// Merge the guest session cart into `user`'s account cart.
    ///
    /// Overlapping products have their quantities summed. On success the
    /// merged cart is written to the account, becomes the in-memory cart and
    /// the session entry is deleted. On any remote failure nothing is
    /// changed, so the next sign-in retries.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Store` if the account cart could not be read or
    /// written.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn migrate_guest_cart(
        &self,
        user: &AuthenticatedUser,
    ) -> Result<MigrationOutcome, CartError> {
        let guest = self.read_local();
        if guest.is_empty() {
            debug!("No guest cart to migrate");
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        let guest_lines = guest.len();
        let merged = async {
            let mut account = self.inner.remote.fetch_cart(user).await?;
            account.merge(guest);
            self.inner.remote.replace_cart(user, &account).await?;
            Ok::<_, CartStoreError>(account)
        }
        .await;

        match merged {
            Ok(cart) => {
                let lines = cart.len();
                {
                    let mut state = self.write_state();
                    state.cart = cart;
                    state.source = CartSource::Remote;
                }
                self.inner.local.remove_item(CART_KEY);

                info!(guest_lines, lines, "Merged guest cart into account cart");
                self.emit(CartEvent::Migrated { lines });
                Ok(MigrationOutcome::Merged { lines })
            }
            Err(e) => {
                report_recoverable("Guest cart migration aborted, session cart kept", &e);
                self.emit(CartEvent::MigrationFailed {
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Identity transitions
    // =========================================================================

    /// React to an identity change.
    ///
    /// - sign-in: migrate the guest cart; if nothing was merged, load
    /// - sign-out: load the session cart (the account cart is left alone)
    /// - different customer: load
    pub async fn handle_identity_change(
        &self,
        previous: &Identity,
        next: &Identity,
    ) -> IdentityTransition {
        let transition = IdentityTransition::between(previous, next);
        debug!(?transition, "Identity changed");

        match (transition, next) {
            (IdentityTransition::Unchanged, _) => {}
            (IdentityTransition::SignedIn, Identity::Authenticated(user)) => {
                set_sentry_user(&user.id);
                let merged = matches!(
                    self.migrate_guest_cart(user).await,
                    Ok(MigrationOutcome::Merged { .. })
                );
                if !merged {
                    self.load_for(next).await;
                }
            }
            (IdentityTransition::SignedOut, _) => {
                clear_sentry_user();
                self.load_for(next).await;
            }
            (_, _) => {
                if let Some(user) = next.user() {
                    set_sentry_user(&user.id);
                }
                self.load_for(next).await;
            }
        }

        transition
    }

    /// Follow the authentication collaborator.
    ///
    /// Spawns a task that calls [`Self::handle_identity_change`] for every
    /// identity notification. The task stops once the manager is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn watch_identity(&self) -> JoinHandle<()> {
        let weak: Weak<CartManagerInner> = Arc::downgrade(&self.inner);
        let mut rx = self.inner.auth.subscribe();
        // Read before spawning so a change made before the task first runs
        // is still seen as a change.
        let mut previous = rx.borrow_and_update().clone();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = Self { inner };
                manager.handle_identity_change(&previous, &next).await;
                previous = next;
            }
            debug!("Cart identity observer stopped");
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of the current cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.read_state().cart.clone()
    }

    /// Snapshot of the current lines.
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.read_state().cart.lines().to_vec()
    }

    /// `true` while a load is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.read_state().is_loading
    }

    /// Where the current cart was loaded from.
    #[must_use]
    pub fn source(&self) -> CartSource {
        self.read_state().source
    }

    /// Sum of `effective price × quantity`.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.read_state().cart.total()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn items_count(&self) -> u64 {
        self.read_state().cart.items_count()
    }

    /// `true` if the product has a line.
    #[must_use]
    pub fn is_in_cart(&self, product_id: &ProductId) -> bool {
        self.read_state().cart.contains(product_id)
    }

    /// The line for a product, if present.
    #[must_use]
    pub fn get_line(&self, product_id: &ProductId) -> Option<CartLine> {
        self.read_state().cart.line(product_id).cloned()
    }

    /// Checkout totals for the current cart.
    #[must_use]
    pub fn summary(&self) -> CartSummary {
        self.read_state().cart.summary()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn mutate(&self, f: impl FnOnce(&mut Cart)) -> Cart {
        let mut state = self.write_state();
        f(&mut state.cart);
        state.cart.clone()
    }

    /// Read the guest cart. Malformed data is deleted and read as empty.
    fn read_local(&self) -> Cart {
        let Some(raw) = self.inner.local.get_item(CART_KEY) else {
            return Cart::new();
        };
        match serde_json::from_str::<Cart>(&raw) {
            Ok(cart) => cart,
            Err(e) => {
                report_recoverable("Discarding malformed session cart", &e);
                self.inner.local.remove_item(CART_KEY);
                Cart::new()
            }
        }
    }

    fn write_local(&self, cart: &Cart) -> bool {
        let raw = match serde_json::to_string(cart) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize cart");
                return false;
            }
        };
        match self.inner.local.set_item(CART_KEY, raw) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to save cart to session storage");
                false
            }
        }
    }

    fn emit(&self, event: CartEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CartState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CartState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CartManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("CartManager")
            .field("lines", &state.cart.len())
            .field("is_loading", &state.is_loading)
            .field("source", &state.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use buildify_core::UserId;
    use secrecy::SecretString;
    use tokio::sync::Notify;

    use super::*;
    use crate::cart::model::tests::{at, product};
    use crate::storage::StorageError;

    /// Customer whose cart `FakeRemote::with_cart` seeds.
    const DEFAULT_USER: &str = "u1";

    /// In-memory account store, one cart per customer, with switchable
    /// failures.
    #[derive(Default)]
    struct FakeRemote {
        carts: Mutex<HashMap<UserId, Cart>>,
        fail_fetch: AtomicBool,
        fail_replace: AtomicBool,
        fetches: AtomicUsize,
        replaces: AtomicUsize,
    }

    impl FakeRemote {
        fn with_cart(cart: Cart) -> Arc<Self> {
            let remote = Self::default();
            remote.set_cart_for(DEFAULT_USER, cart);
            Arc::new(remote)
        }

        fn set_cart_for(&self, user_id: &str, cart: Cart) {
            self.carts.lock().unwrap().insert(UserId::new(user_id), cart);
        }

        fn stored_for(&self, user_id: &str) -> Cart {
            self.carts
                .lock()
                .unwrap()
                .get(&UserId::new(user_id))
                .cloned()
                .unwrap_or_default()
        }

        fn stored(&self) -> Cart {
            self.stored_for(DEFAULT_USER)
        }
    }

    fn server_error() -> CartStoreError {
        CartStoreError::Status {
            status: 503,
            body: "Service Unavailable".to_string(),
        }
    }

    #[async_trait]
    impl RemoteCartStore for FakeRemote {
        async fn fetch_cart(&self, user: &AuthenticatedUser) -> Result<Cart, CartStoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            Ok(self.stored_for(user.id.as_str()))
        }

        async fn replace_cart(
            &self,
            user: &AuthenticatedUser,
            cart: &Cart,
        ) -> Result<(), CartStoreError> {
            self.replaces.fetch_add(1, Ordering::SeqCst);
            if self.fail_replace.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            self.set_cart_for(user.id.as_str(), cart.clone());
            Ok(())
        }
    }

    /// Account store whose fetch blocks until released.
    #[derive(Default)]
    struct GatedRemote {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RemoteCartStore for GatedRemote {
        async fn fetch_cart(&self, _user: &AuthenticatedUser) -> Result<Cart, CartStoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Cart::new())
        }

        async fn replace_cart(
            &self,
            _user: &AuthenticatedUser,
            _cart: &Cart,
        ) -> Result<(), CartStoreError> {
            Ok(())
        }
    }

    /// Session storage that refuses every write.
    struct FullStorage;

    impl SessionStorage for FullStorage {
        fn get_item(&self, _key: &str) -> Option<String> {
            None
        }

        fn set_item(&self, _key: &str, _value: String) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_string()))
        }

        fn remove_item(&self, _key: &str) {}
    }

    fn user(id: &str) -> AuthenticatedUser {
        AuthenticatedUser::new(UserId::new(id), SecretString::from("token".to_string()))
    }

    fn storage() -> Arc<EphemeralStorage> {
        Arc::new(EphemeralStorage::new(Duration::from_secs(300)))
    }

    fn cart_of(lines: &[(&str, i64)]) -> Cart {
        let mut cart = Cart::new();
        for (i, (id, qty)) in lines.iter().enumerate() {
            cart.add(product(id, 10, None), *qty, at(i64::try_from(i).unwrap()));
        }
        cart
    }

    fn seed_local(local: &EphemeralStorage, cart: &Cart) {
        local
            .set_item(CART_KEY, serde_json::to_string(cart).unwrap())
            .unwrap();
    }

    fn local_cart(local: &EphemeralStorage) -> Option<Cart> {
        local
            .get_item(CART_KEY)
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    fn qty(manager: &CartManager, id: &str) -> Option<u32> {
        manager.get_line(&ProductId::new(id)).map(|l| l.quantity)
    }

    #[tokio::test]
    async fn test_add_item_merges_and_persists_locally_when_anonymous() {
        let remote = FakeRemote::with_cart(Cart::new());
        let local = storage();
        let manager = CartManager::new(AuthSession::anonymous(), remote.clone(), local.clone());

        manager.add_item(product("P1", 320, None), 2).wait().await;
        let outcome = manager.add_item(product("P1", 320, None), 3).wait().await;

        assert_eq!(outcome, PersistOutcome::Local);
        assert_eq!(manager.lines().len(), 1);
        assert_eq!(qty(&manager, "P1"), Some(5));
        assert_eq!(local_cart(&local).unwrap(), manager.cart());
        assert_eq!(remote.replaces.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mutation_is_visible_before_persist_completes() {
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            storage(),
        );

        let pending = manager.add_item(product("P1", 10, None), 1);
        assert!(manager.is_in_cart(&ProductId::new("P1")));
        pending.wait().await;
    }

    #[tokio::test]
    async fn test_update_quantity_non_positive_removes() {
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            storage(),
        );
        let p1 = ProductId::new("P1");

        manager.add_item(product("P1", 10, None), 2).wait().await;
        manager.update_quantity(&p1, 0).wait().await;
        assert!(!manager.is_in_cart(&p1));

        manager.add_item(product("P1", 10, None), 2).wait().await;
        manager.update_quantity(&p1, -5).wait().await;
        assert!(!manager.is_in_cart(&p1));
    }

    #[tokio::test]
    async fn test_update_and_remove_unknown_product_are_noops() {
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            storage(),
        );
        manager.add_item(product("P1", 10, None), 2).wait().await;
        let before = manager.cart();

        manager.update_quantity(&ProductId::new("nope"), 4).wait().await;
        manager.remove_item(&ProductId::new("nope")).wait().await;

        assert_eq!(manager.cart(), before);
    }

    #[tokio::test]
    async fn test_update_quantity_for_absent_product_writes_nothing() {
        let remote = FakeRemote::with_cart(cart_of(&[("P1", 2)]));
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth, remote.clone(), storage());
        manager.load().await;

        let outcome = manager.update_quantity(&ProductId::new("nope"), 4).wait().await;

        assert_eq!(outcome, PersistOutcome::Unchanged);
        assert_eq!(remote.replaces.load(Ordering::SeqCst), 0);
        assert_eq!(qty(&manager, "P1"), Some(2));
    }

    #[tokio::test]
    async fn test_session_write_failure_drops_snapshot() {
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            Arc::new(FullStorage),
        );

        let outcome = manager.add_item(product("P1", 10, None), 2).wait().await;

        assert_eq!(outcome, PersistOutcome::Dropped);
        assert_eq!(qty(&manager, "P1"), Some(2));
    }

    #[tokio::test]
    async fn test_clear_twice_is_empty() {
        let local = storage();
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            local.clone(),
        );
        manager.add_item(product("P1", 10, None), 2).wait().await;

        manager.clear().wait().await;
        assert!(manager.cart().is_empty());
        manager.clear().wait().await;

        assert!(manager.cart().is_empty());
        assert_eq!(manager.total(), Decimal::ZERO);
        assert_eq!(manager.items_count(), 0);
        assert_eq!(local_cart(&local), Some(Cart::new()));
    }

    #[tokio::test]
    async fn test_total_with_discount() {
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            storage(),
        );
        manager.add_item(product("P1", 320, None), 2).wait().await;
        manager.add_item(product("P2", 100, Some(80)), 3).wait().await;

        assert_eq!(manager.total(), Decimal::new(880, 0));
        assert_eq!(manager.items_count(), 5);
        assert_eq!(manager.summary().subtotal.amount, Decimal::new(880, 0));
    }

    #[tokio::test]
    async fn test_add_item_json_rejects_malformed_product() {
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            storage(),
        );
        let result = manager.add_item_json(serde_json::json!({ "name": "no id" }), 1);
        assert!(matches!(result, Err(CartError::InvalidProduct(_))));
        assert!(manager.cart().is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_persist_writes_remote() {
        let remote = FakeRemote::with_cart(Cart::new());
        let local = storage();
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth, remote.clone(), local.clone());

        let outcome = manager.add_item(product("P1", 10, None), 2).wait().await;

        assert_eq!(outcome, PersistOutcome::Remote);
        assert_eq!(remote.stored(), manager.cart());
        assert_eq!(local_cart(&local), None);
    }

    #[tokio::test]
    async fn test_remote_write_failure_falls_back_to_session_storage() {
        let remote = FakeRemote::with_cart(Cart::new());
        remote.fail_replace.store(true, Ordering::SeqCst);
        let local = storage();
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth, remote.clone(), local.clone());
        let mut events = manager.events();

        let outcome = manager.add_item(product("P1", 10, None), 2).wait().await;

        assert_eq!(outcome, PersistOutcome::LocalFallback);
        assert_eq!(local_cart(&local).unwrap(), manager.cart());
        assert!(matches!(
            events.recv().await.unwrap(),
            CartEvent::PersistFailed { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            CartEvent::Persisted {
                outcome: PersistOutcome::LocalFallback
            }
        );
    }

    #[tokio::test]
    async fn test_load_anonymous_reads_session_storage() {
        let local = storage();
        let guest = cart_of(&[("P1", 2)]);
        seed_local(&local, &guest);
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            local,
        );

        let source = manager.load().await;

        assert_eq!(source, CartSource::Local);
        assert_eq!(manager.cart(), guest);
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_is_loading_while_fetch_in_flight() {
        let remote = Arc::new(GatedRemote::default());
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth, remote.clone(), storage());
        assert!(!manager.is_loading());

        let loading = tokio::spawn({
            let manager = manager.clone();
            async move { manager.load().await }
        });
        remote.entered.notified().await;

        assert!(manager.is_loading());

        remote.release.notify_one();
        assert_eq!(loading.await.unwrap(), CartSource::Remote);
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_load_discards_malformed_session_cart() {
        let local = storage();
        local.set_item(CART_KEY, "{not json".to_string()).unwrap();
        let manager = CartManager::new(
            AuthSession::anonymous(),
            FakeRemote::with_cart(Cart::new()),
            local.clone(),
        );

        manager.load().await;

        assert!(manager.cart().is_empty());
        assert_eq!(local.get_item(CART_KEY), None);
    }

    #[tokio::test]
    async fn test_load_falls_back_when_remote_fetch_fails() {
        let remote = FakeRemote::with_cart(cart_of(&[("P9", 9)]));
        remote.fail_fetch.store(true, Ordering::SeqCst);
        let local = storage();
        let fallback = cart_of(&[("P1", 2), ("P2", 1)]);
        seed_local(&local, &fallback);
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth, remote, local);

        let source = manager.load().await;

        assert_eq!(source, CartSource::LocalFallback);
        assert_eq!(manager.cart(), fallback);
    }

    #[tokio::test]
    async fn test_load_fallback_with_empty_session_storage_is_empty() {
        let remote = FakeRemote::with_cart(cart_of(&[("P9", 9)]));
        remote.fail_fetch.store(true, Ordering::SeqCst);
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth, remote, storage());

        manager.load().await;

        assert!(manager.cart().is_empty());
        assert_eq!(manager.source(), CartSource::LocalFallback);
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trips() {
        let remote = FakeRemote::with_cart(Cart::new());
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth.clone(), remote, storage());
        let cart = cart_of(&[("P1", 2), ("P2", 5)]);

        assert_eq!(manager.persist(&cart).await, PersistOutcome::Remote);
        manager.load().await;
        assert_eq!(manager.cart(), cart);

        auth.sign_out();
        let guest = cart_of(&[("P3", 1)]);
        assert_eq!(manager.persist(&guest).await, PersistOutcome::Local);
        manager.load().await;
        assert_eq!(manager.cart(), guest);
    }

    #[tokio::test]
    async fn test_migration_sums_overlapping_lines() {
        let remote = FakeRemote::with_cart(cart_of(&[("P1", 1), ("P2", 5)]));
        let local = storage();
        seed_local(&local, &cart_of(&[("P1", 2)]));
        let manager = CartManager::new(AuthSession::anonymous(), remote.clone(), local.clone());

        let outcome = manager.migrate_guest_cart(&user("u1")).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::Merged { lines: 2 });
        let stored = remote.stored();
        assert_eq!(stored.line(&ProductId::new("P1")).unwrap().quantity, 3);
        assert_eq!(stored.line(&ProductId::new("P2")).unwrap().quantity, 5);
        assert_eq!(manager.cart(), stored);
        assert_eq!(local.get_item(CART_KEY), None);
    }

    #[tokio::test]
    async fn test_migration_with_empty_guest_cart_is_noop() {
        let account = cart_of(&[("P1", 1)]);
        let remote = FakeRemote::with_cart(account.clone());
        let manager = CartManager::new(AuthSession::anonymous(), remote.clone(), storage());

        let outcome = manager.migrate_guest_cart(&user("u1")).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::NothingToMigrate);
        assert_eq!(remote.stored(), account);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(remote.replaces.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_migration_failure_keeps_both_carts() {
        let account = cart_of(&[("P2", 5)]);
        let remote = FakeRemote::with_cart(account.clone());
        remote.fail_replace.store(true, Ordering::SeqCst);
        let local = storage();
        let guest = cart_of(&[("P1", 2)]);
        seed_local(&local, &guest);
        let manager = CartManager::new(AuthSession::anonymous(), remote.clone(), local.clone());
        manager.load().await;
        let mut events = manager.events();

        let result = manager.migrate_guest_cart(&user("u1")).await;

        assert!(matches!(result, Err(CartError::Store(_))));
        assert_eq!(remote.stored(), account);
        assert_eq!(local_cart(&local).unwrap(), guest);
        assert_eq!(manager.cart(), guest);
        assert!(matches!(
            events.recv().await.unwrap(),
            CartEvent::MigrationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_migration_fetch_failure_keeps_guest_cart() {
        let remote = FakeRemote::with_cart(cart_of(&[("P2", 5)]));
        remote.fail_fetch.store(true, Ordering::SeqCst);
        let local = storage();
        let guest = cart_of(&[("P1", 2)]);
        seed_local(&local, &guest);
        let manager = CartManager::new(AuthSession::anonymous(), remote.clone(), local.clone());

        let result = manager.migrate_guest_cart(&user("u1")).await;

        assert!(matches!(result, Err(CartError::Store(_))));
        assert_eq!(remote.replaces.load(Ordering::SeqCst), 0);
        assert_eq!(local_cart(&local).unwrap(), guest);
    }

    #[tokio::test]
    async fn test_sign_in_with_failed_migration_loads_account_cart() {
        let account = cart_of(&[("P2", 5)]);
        let remote = FakeRemote::with_cart(account.clone());
        remote.fail_replace.store(true, Ordering::SeqCst);
        let local = storage();
        let guest = cart_of(&[("P1", 2)]);
        seed_local(&local, &guest);
        let auth = AuthSession::anonymous();
        let manager = CartManager::new(auth.clone(), remote.clone(), local.clone());
        manager.load().await;

        let previous = auth.current();
        auth.sign_in(user("u1"));
        let transition = manager.handle_identity_change(&previous, &auth.current()).await;

        assert_eq!(transition, IdentityTransition::SignedIn);
        assert_eq!(manager.cart(), account);
        assert_eq!(manager.source(), CartSource::Remote);
        assert_eq!(local_cart(&local).unwrap(), guest);
    }

    #[tokio::test]
    async fn test_switching_customer_loads_their_cart() {
        let remote = FakeRemote::with_cart(cart_of(&[("P1", 1)]));
        let other = cart_of(&[("P7", 3), ("P8", 1)]);
        remote.set_cart_for("u2", other.clone());
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth.clone(), remote.clone(), storage());
        manager.load().await;
        let fetches_before = remote.fetches.load(Ordering::SeqCst);

        let previous = auth.current();
        auth.sign_in(user("u2"));
        let transition = manager.handle_identity_change(&previous, &auth.current()).await;

        assert_eq!(transition, IdentityTransition::SwitchedUser);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), fetches_before + 1);
        assert_eq!(manager.cart(), other);
        assert_eq!(remote.stored_for("u1"), cart_of(&[("P1", 1)]));
    }

    #[tokio::test]
    async fn test_sign_in_migrates_guest_cart() {
        let remote = FakeRemote::with_cart(cart_of(&[("P2", 5)]));
        let local = storage();
        let auth = AuthSession::anonymous();
        let manager = CartManager::new(auth.clone(), remote.clone(), local.clone());
        manager.add_item(product("P1", 10, None), 2).wait().await;

        let previous = auth.current();
        auth.sign_in(user("u1"));
        let transition = manager.handle_identity_change(&previous, &auth.current()).await;

        assert_eq!(transition, IdentityTransition::SignedIn);
        assert_eq!(manager.items_count(), 7);
        assert_eq!(remote.stored(), manager.cart());
        assert_eq!(local.get_item(CART_KEY), None);
    }

    #[tokio::test]
    async fn test_sign_in_with_empty_guest_cart_loads_account_cart() {
        let account = cart_of(&[("P2", 5)]);
        let remote = FakeRemote::with_cart(account.clone());
        let auth = AuthSession::anonymous();
        let manager = CartManager::new(auth.clone(), remote.clone(), storage());

        let previous = auth.current();
        auth.sign_in(user("u1"));
        manager.handle_identity_change(&previous, &auth.current()).await;

        assert_eq!(manager.cart(), account);
        assert_eq!(manager.source(), CartSource::Remote);
        assert_eq!(remote.replaces.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sign_out_loads_session_cart_and_leaves_account_alone() {
        let account = cart_of(&[("P2", 5)]);
        let remote = FakeRemote::with_cart(account.clone());
        let auth = AuthSession::with_identity(Identity::Authenticated(user("u1")));
        let manager = CartManager::new(auth.clone(), remote.clone(), storage());
        manager.load().await;

        let previous = auth.current();
        auth.sign_out();
        let transition = manager.handle_identity_change(&previous, &auth.current()).await;

        assert_eq!(transition, IdentityTransition::SignedOut);
        assert!(manager.cart().is_empty());
        assert_eq!(manager.source(), CartSource::Local);
        assert_eq!(remote.stored(), account);
    }

    #[test]
    fn test_transition_classification() {
        let anon = Identity::Anonymous;
        let a = Identity::Authenticated(user("a"));
        let b = Identity::Authenticated(user("b"));

        let between = IdentityTransition::between;
        assert_eq!(between(&anon, &anon), IdentityTransition::Unchanged);
        assert_eq!(between(&a, &a), IdentityTransition::Unchanged);
        assert_eq!(between(&anon, &a), IdentityTransition::SignedIn);
        assert_eq!(between(&a, &anon), IdentityTransition::SignedOut);
        assert_eq!(between(&a, &b), IdentityTransition::SwitchedUser);
    }

    #[tokio::test]
    async fn test_watch_identity_runs_migration_on_sign_in() {
        let remote = FakeRemote::with_cart(cart_of(&[("P1", 1)]));
        let auth = AuthSession::anonymous();
        let manager = CartManager::new(auth.clone(), remote.clone(), storage());
        manager.add_item(product("P1", 10, None), 2).wait().await;
        let mut events = manager.events();
        let observer = manager.watch_identity();

        auth.sign_in(user("u1"));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, CartEvent::Migrated { lines: 1 });
        assert_eq!(qty(&manager, "P1"), Some(3));
        observer.abort();
    }

    #[tokio::test]
    async fn test_sign_in_right_after_watch_is_not_missed() {
        let remote = FakeRemote::with_cart(cart_of(&[("P2", 5)]));
        let local = storage();
        seed_local(&local, &cart_of(&[("P1", 2)]));
        let auth = AuthSession::anonymous();
        let manager = CartManager::new(auth.clone(), remote.clone(), local.clone());
        let mut events = manager.events();

        let observer = manager.watch_identity();
        auth.sign_in(user("u1"));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, CartEvent::Migrated { lines: 2 });
        assert_eq!(manager.items_count(), 7);
        assert_eq!(local.get_item(CART_KEY), None);
        observer.abort();
    }
}
