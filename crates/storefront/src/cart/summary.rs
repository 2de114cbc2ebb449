//! Checkout totals and order payload derived from a cart.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use buildify_core::{Price, ProductId};

use super::CartError;
use super::model::Cart;

/// GST applied to construction materials at checkout (18%).
pub const GST_RATE: Decimal = Decimal::from_parts(18, 0, 0, false, 2);

/// Totals shown on the cart and checkout pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartSummary {
    /// Sum of line totals.
    pub subtotal: Price,
    /// GST, rounded to whole rupees.
    pub tax: Price,
    /// Delivery charge (free).
    pub shipping: Price,
    /// `subtotal + tax + shipping`.
    pub grand_total: Price,
    /// Sum of quantities.
    pub items_count: u64,
}

impl CartSummary {
    /// Compute the summary for `cart`.
    #[must_use]
    pub fn for_cart(cart: &Cart) -> Self {
        let subtotal = cart.total();
        let tax = (subtotal * GST_RATE)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let shipping = Decimal::ZERO;

        Self {
            subtotal: Price::inr(subtotal),
            tax: Price::inr(tax),
            shipping: Price::inr(shipping),
            grand_total: Price::inr(subtotal + tax + shipping),
            items_count: cart.items_count(),
        }
    }
}

/// One entry of the order payload submitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl Cart {
    /// Checkout totals for this cart.
    #[must_use]
    pub fn summary(&self) -> CartSummary {
        CartSummary::for_cart(self)
    }

    /// Item payload for placing an order.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::EmptyCart`] when there is nothing to order.
    pub fn order_items(&self) -> Result<Vec<OrderItem>, CartError> {
        if self.is_empty() {
            return Err(CartError::EmptyCart);
        }
        Ok(self
            .lines()
            .iter()
            .map(|line| OrderItem {
                product_id: line.product_id().clone(),
                quantity: line.quantity,
            })
            .collect())
    }
}
