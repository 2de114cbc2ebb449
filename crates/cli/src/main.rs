//! Buildify CLI - customer cart tools.
//!
//! # Usage
//!
//! ```bash
//! # Show the configured customer's account cart
//! bf-cli cart show
//!
//! # Add two bags of cement
//! bf-cli cart add -p '{"_id":"65a1","name":"OPC 53 Cement","price":420,"unit":"bag"}' -q 2
//!
//! # Merge a guest cart exported from a browser session
//! bf-cli cart migrate --guest-file guest-cart.json
//! ```
//!
//! The customer is taken from `BUILDIFY_CUSTOMER_ID` and
//! `BUILDIFY_CUSTOMER_TOKEN`; the API from `BUILDIFY_API_URL`.
//!
//! # Commands
//!
//! - `cart show` - Print the account cart and checkout totals
//! - `cart add` - Add a product
//! - `cart remove` - Remove a product
//! - `cart clear` - Empty the account cart
//! - `cart migrate` - Merge a guest cart file into the account cart

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use buildify_storefront::config::StorefrontConfig;
use buildify_storefront::telemetry;

mod commands;

#[derive(Parser)]
#[command(name = "bf-cli")]
#[command(author, version, about = "Buildify cart tools")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit the customer's cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the account cart and checkout totals
    Show,
    /// Add a product to the account cart
    Add {
        /// Product JSON as returned by the catalog API
        #[arg(short, long)]
        product: String,

        /// Quantity to add (values below 1 add one)
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Set the quantity of a product already in the cart
    Update {
        /// Product ID
        #[arg(long)]
        product_id: String,

        /// New quantity (0 removes the line)
        #[arg(short, long, allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove a product from the account cart
    Remove {
        /// Product ID
        #[arg(long)]
        product_id: String,
    },
    /// Empty the account cart
    Clear,
    /// Merge a guest cart file into the account cart
    Migrate {
        /// JSON array of cart lines, as kept in session storage
        #[arg(long)]
        guest_file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    telemetry::init_tracing(cli.json_logs);

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // Keep the guard alive so queued events are flushed on exit.
    let _sentry = telemetry::init_sentry(&config);

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &StorefrontConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(config).await?,
            CartAction::Add { product, quantity } => {
                commands::cart::add(config, &product, quantity).await?;
            }
            CartAction::Update {
                product_id,
                quantity,
            } => commands::cart::update(config, &product_id, quantity).await?,
            CartAction::Remove { product_id } => {
                commands::cart::remove(config, &product_id).await?;
            }
            CartAction::Clear => commands::cart::clear(config).await?,
            CartAction::Migrate { guest_file } => {
                commands::cart::migrate(config, &guest_file).await?;
            }
        },
    }
    Ok(())
}
