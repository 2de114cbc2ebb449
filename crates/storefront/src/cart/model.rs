//! Cart lines and the pure operations over them.
//!
//! Nothing here performs I/O. The manager applies these operations to its
//! in-memory state and persists the resulting snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use buildify_core::{ProductId, ProductSnapshot};

/// One product's presence in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Catalog snapshot; the cart never mutates it.
    pub product: ProductSnapshot,
    /// Always at least 1 for a line held in a [`Cart`].
    pub quantity: u32,
    /// Set once on insertion.
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// Product identity of this line.
    #[must_use]
    pub const fn product_id(&self) -> &ProductId {
        self.product.id()
    }

    /// `effective price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.product.effective_price() * Decimal::from(self.quantity)
    }
}

/// Ordered cart lines, unique by product identity.
///
/// Serialized as a bare JSON array of lines, the shape both stores use.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Build a cart from lines, enforcing the cart invariants.
    ///
    /// Lines for the same product are merged (quantities summed, the earliest
    /// line kept) and zero-quantity lines are dropped.
    #[must_use]
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Self {
        let mut cart = Self::new();
        for line in lines.into_iter().filter(|l| l.quantity > 0) {
            cart.absorb(line);
        }
        cart
    }

    /// Lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Returns `true` if the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Add `quantity` of `product`.
    ///
    /// A non-positive quantity is treated as 1. An existing line for the same
    /// product has its quantity increased; otherwise a new line stamped with
    /// `now` is appended.
    pub fn add(&mut self, product: ProductSnapshot, quantity: i64, now: DateTime<Utc>) {
        let quantity = normalize_add_quantity(quantity);
        self.absorb(CartLine {
            product,
            quantity,
            added_at: now,
        });
    }

    /// Set the quantity of a line.
    ///
    /// A quantity of zero or below removes the line. Returns `false` if no
    /// line matched (nothing changed).
    pub fn set_quantity(&mut self, product_id: &ProductId, quantity: i64) -> bool {
        if quantity <= 0 {
            return self.remove(product_id);
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        match self.line_mut(product_id) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    /// Remove the line for `product_id`. Returns `false` if it was absent.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.product_id() != product_id);
        self.lines.len() != before
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Merge another cart into this one.
    ///
    /// Lines for products already present have their quantities summed;
    /// other lines are appended unchanged, in their original order.
    pub fn merge(&mut self, other: Self) {
        for line in other.lines {
            self.absorb(line);
        }
    }

    /// Sum of `effective price × quantity` over all lines.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn items_count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Returns `true` if `product_id` has a line.
    #[must_use]
    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.line(product_id).is_some()
    }

    /// Look up the line for `product_id`.
    #[must_use]
    pub fn line(&self, product_id: &ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product_id() == product_id)
    }

    fn line_mut(&mut self, product_id: &ProductId) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|line| line.product_id() == product_id)
    }

    fn absorb(&mut self, line: CartLine) {
        match self.line_mut(line.product_id()) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
            }
            None => self.lines.push(line),
        }
    }
}

impl<'de> Deserialize<'de> for Cart {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let lines = Vec::<CartLine>::deserialize(deserializer)?;
        Ok(Self::from_lines(lines))
    }
}

impl FromIterator<CartLine> for Cart {
    fn from_iter<I: IntoIterator<Item = CartLine>>(iter: I) -> Self {
        Self::from_lines(iter)
    }
}

fn normalize_add_quantity(quantity: i64) -> u32 {
    if quantity <= 0 {
        1
    } else {
        u32::try_from(quantity).unwrap_or(u32::MAX)
    }
}
