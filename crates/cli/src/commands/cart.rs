//! Cart commands for the configured customer.
//!
//! Every command acts on the account cart. A guest cart only exists inside
//! one process, so `migrate` seeds it from a file first.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use buildify_core::{Price, ProductId};
use buildify_storefront::api::HttpCartStore;
use buildify_storefront::auth::{AuthSession, AuthenticatedUser, Identity};
use buildify_storefront::cart::{Cart, CartManager, CartSource, MigrationOutcome, PersistOutcome};
use buildify_storefront::config::{StorefrontConfig, customer_from_env};
use buildify_storefront::error::set_sentry_user;
use buildify_storefront::storage::{CART_KEY, EphemeralStorage, SessionStorage};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Print the account cart.
///
/// # Errors
///
/// Returns an error if credentials are missing or the cart cannot be fetched.
pub async fn show(config: &StorefrontConfig) -> CommandResult {
    let manager = signed_in_manager(config).await?;
    print_cart(&manager);
    Ok(())
}

/// Add a product given as catalog JSON.
///
/// # Errors
///
/// Returns an error if the product JSON is invalid or the write fails.
pub async fn add(config: &StorefrontConfig, product: &str, quantity: i64) -> CommandResult {
    let product: serde_json::Value = serde_json::from_str(product)?;
    let manager = signed_in_manager(config).await?;

    let outcome = manager.add_item_json(product, quantity)?.wait().await;
    ensure_saved(outcome)?;

    print_cart(&manager);
    Ok(())
}

/// Set a line's quantity.
///
/// # Errors
///
/// Returns an error if the cart cannot be fetched or saved.
pub async fn update(config: &StorefrontConfig, product_id: &str, quantity: i64) -> CommandResult {
    let manager = signed_in_manager(config).await?;
    let product_id = ProductId::new(product_id);

    if !manager.is_in_cart(&product_id) {
        return Err(format!("Product {product_id} is not in the cart").into());
    }
    ensure_saved(manager.update_quantity(&product_id, quantity).wait().await)?;

    print_cart(&manager);
    Ok(())
}

/// Remove a product.
///
/// # Errors
///
/// Returns an error if the cart cannot be fetched or saved.
pub async fn remove(config: &StorefrontConfig, product_id: &str) -> CommandResult {
    let manager = signed_in_manager(config).await?;
    let product_id = ProductId::new(product_id);

    if !manager.is_in_cart(&product_id) {
        info!(%product_id, "Product not in cart, nothing to remove");
        return Ok(());
    }
    ensure_saved(manager.remove_item(&product_id).wait().await)?;

    print_cart(&manager);
    Ok(())
}

/// Empty the account cart.
///
/// # Errors
///
/// Returns an error if the empty cart cannot be saved.
pub async fn clear(config: &StorefrontConfig) -> CommandResult {
    let manager = signed_in_manager(config).await?;
    ensure_saved(manager.clear().wait().await)?;
    info!("Cart cleared");
    Ok(())
}

/// Merge a guest cart file into the account cart.
///
/// # Errors
///
/// Returns an error if the file is not a valid cart or the merge fails. On
/// failure the account cart is unchanged.
pub async fn migrate(config: &StorefrontConfig, guest_file: &Path) -> CommandResult {
    if !guest_file.exists() {
        return Err(format!("File not found: {}", guest_file.display()).into());
    }
    let user = customer_from_env()?;

    let content = tokio::fs::read_to_string(guest_file).await?;
    let guest: Cart = serde_json::from_str(&content)?;
    info!(path = %guest_file.display(), lines = guest.len(), "Loaded guest cart");

    let storage = Arc::new(EphemeralStorage::new(config.session_ttl));
    storage.set_item(CART_KEY, serde_json::to_string(&guest)?)?;

    let remote = HttpCartStore::new(&config.api)?;
    let auth = AuthSession::anonymous();
    let manager = CartManager::new(auth.clone(), Arc::new(remote), storage);
    manager.load().await;

    auth.sign_in(user.clone());
    set_sentry_user(&user.id);

    match manager.migrate_guest_cart(&user).await? {
        MigrationOutcome::NothingToMigrate => info!("Guest cart is empty, nothing to merge"),
        MigrationOutcome::Merged { lines } => {
            info!(lines, "Guest cart merged");
            print_cart(&manager);
        }
    }
    Ok(())
}

/// Build a manager for the configured customer and load their cart.
async fn signed_in_manager(
    config: &StorefrontConfig,
) -> Result<CartManager, Box<dyn std::error::Error>> {
    let user: AuthenticatedUser = customer_from_env()?;
    set_sentry_user(&user.id);

    let auth = AuthSession::with_identity(Identity::Authenticated(user));
    let manager = CartManager::from_config(config, auth)?;

    // The fallback store is empty in a fresh process; editing it would
    // overwrite the account cart with nothing.
    if manager.load().await != CartSource::Remote {
        return Err("Could not load the account cart".into());
    }
    Ok(manager)
}

fn ensure_saved(outcome: PersistOutcome) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        PersistOutcome::Remote | PersistOutcome::Unchanged => Ok(()),
        other => Err(format!("Cart was not saved to the account ({other:?})").into()),
    }
}

#[allow(clippy::print_stdout)]
fn print_cart(manager: &CartManager) {
    let lines = manager.lines();
    if lines.is_empty() {
        println!("Cart is empty");
        return;
    }

    for line in &lines {
        println!(
            "{:>4} x {:<32} {:>12} / {:<8} {:>12}",
            line.quantity,
            line.product.name(),
            line.product.unit_price().to_string(),
            line.product.unit(),
            Price::inr(line.line_total()).to_string(),
        );
    }

    let summary = manager.summary();
    println!();
    println!("Items:       {}", summary.items_count);
    println!("Subtotal:    {}", summary.subtotal);
    println!("GST (18%):   {}", summary.tax.display_rounded());
    println!("Shipping:    {}", summary.shipping.display_rounded());
    println!("Total:       {}", summary.grand_total.display_rounded());
}
