//! Product snapshot carried by cart lines.
//!
//! The cart never owns catalog data. It keeps a read-only snapshot of the
//! fields it needs for pricing and display, and round-trips every other field
//! the catalog sent untouched.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::ProductId;
use super::price::Price;

/// Unit of measure used when the catalog omits one.
pub const DEFAULT_UNIT: &str = "piece";

/// Significant digits a price may carry and still survive the float
/// encoding used on the wire.
pub const MAX_PRICE_DIGITS: u32 = 15;

/// Errors that can occur when building a [`ProductSnapshot`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductError {
    /// The product has no identity.
    #[error("product id cannot be empty")]
    MissingId,
    /// A price field is negative.
    #[error("{field} cannot be negative")]
    NegativePrice {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A price carries more significant digits than the JSON wire format
    /// (an IEEE double) preserves.
    #[error("{field} has more than {MAX_PRICE_DIGITS} significant digits")]
    ExcessPrecision {
        /// Name of the offending field.
        field: &'static str,
    },
    /// The input could not be decoded as a product.
    #[error("malformed product: {0}")]
    Malformed(String),
}

/// Catalog fields as they arrive on the wire, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    // Documents may carry `_id`, a virtual `id`, or both.
    #[serde(rename = "_id", default)]
    document_id: Option<ProductId>,
    #[serde(default)]
    id: Option<ProductId>,
    #[serde(default)]
    name: String,
    price: Decimal,
    #[serde(default)]
    discount_price: Option<Decimal>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// A read-only snapshot of a catalog product.
///
/// ## Constraints
///
/// - `id` must not be blank
/// - `price` and `discount_price` must not be negative and must fit in
///   [`MAX_PRICE_DIGITS`] significant digits, since prices travel as JSON
///   numbers
/// - a missing or blank `unit` is normalized to [`DEFAULT_UNIT`]
///
/// ## Examples
///
/// ```
/// use buildify_core::ProductSnapshot;
/// use rust_decimal::Decimal;
///
/// let cement = ProductSnapshot::new("p1", "OPC 53 Cement", Decimal::new(320, 0), "bag")
///     .unwrap()
///     .with_discount_price(Decimal::new(300, 0))
///     .unwrap();
///
/// assert_eq!(cement.effective_price(), Decimal::new(300, 0));
/// assert!(ProductSnapshot::new("", "Sand", Decimal::ONE, "ton").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawProduct")]
pub struct ProductSnapshot {
    #[serde(rename = "_id")]
    id: ProductId,
    name: String,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    price: Decimal,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "rust_decimal::serde::float_option::serialize"
    )]
    discount_price: Option<Decimal>,
    unit: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ProductSnapshot {
    /// Create a snapshot from the required catalog fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProductError::MissingId`] for a blank id,
    /// [`ProductError::NegativePrice`] for a negative price and
    /// [`ProductError::ExcessPrecision`] for a price past [`MAX_PRICE_DIGITS`].
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Decimal,
        unit: impl Into<String>,
    ) -> Result<Self, ProductError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProductError::MissingId);
        }
        check_price("price", price)?;

        Ok(Self {
            id,
            name: name.into(),
            price,
            discount_price: None,
            unit: normalize_unit(Some(unit.into())),
            extra: Map::new(),
        })
    }

    /// Attach a discounted price.
    ///
    /// # Errors
    ///
    /// Returns [`ProductError::NegativePrice`] if the discount is negative and
    /// [`ProductError::ExcessPrecision`] if it is past [`MAX_PRICE_DIGITS`].
    pub fn with_discount_price(mut self, discount: Decimal) -> Result<Self, ProductError> {
        check_price("discountPrice", discount)?;
        self.discount_price = Some(discount);
        Ok(self)
    }

    /// Decode and validate a product from catalog JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProductError::Malformed`] when a field has the wrong type or
    /// `price` is missing, and the validation errors of [`Self::new`]
    /// otherwise.
    pub fn from_json(value: Value) -> Result<Self, ProductError> {
        let raw: RawProduct =
            serde_json::from_value(value).map_err(|e| ProductError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Product identity.
    #[must_use]
    pub const fn id(&self) -> &ProductId {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// List price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Discounted price, if the catalog offers one.
    #[must_use]
    pub const fn discount_price(&self) -> Option<Decimal> {
        self.discount_price
    }

    /// Unit of measure (bag, ton, piece, ...).
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Catalog fields the cart does not interpret.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Price used for totals: the discount when present and non-zero,
    /// otherwise the list price.
    #[must_use]
    pub fn effective_price(&self) -> Decimal {
        match self.discount_price {
            Some(discount) if !discount.is_zero() => discount,
            _ => self.price,
        }
    }

    /// Effective price as a [`Price`] in the storefront currency.
    #[must_use]
    pub fn unit_price(&self) -> Price {
        Price::inr(self.effective_price())
    }
}

impl TryFrom<RawProduct> for ProductSnapshot {
    type Error = ProductError;

    fn try_from(raw: RawProduct) -> Result<Self, Self::Error> {
        let mut extra = raw.extra;
        let id = match (raw.document_id, raw.id) {
            (Some(document_id), virtual_id) => {
                // Keep the virtual id so it is written back unchanged.
                if let Some(virtual_id) = virtual_id {
                    extra.insert("id".to_owned(), Value::String(virtual_id.into_inner()));
                }
                document_id
            }
            (None, Some(virtual_id)) => virtual_id,
            (None, None) => return Err(ProductError::MissingId),
        };

        let mut product = Self::new(id, raw.name, raw.price, raw.unit.unwrap_or_default())?;
        if let Some(discount) = raw.discount_price {
            product = product.with_discount_price(discount)?;
        }
        product.extra = extra;
        Ok(product)
    }
}

fn check_price(field: &'static str, price: Decimal) -> Result<(), ProductError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ProductError::NegativePrice { field });
    }
    let digits = price.normalize().mantissa().unsigned_abs().checked_ilog10().unwrap_or(0) + 1;
    if digits > MAX_PRICE_DIGITS {
        return Err(ProductError::ExcessPrecision { field });
    }
    Ok(())
}

fn normalize_unit(unit: Option<String>) -> String {
    match unit {
        Some(u) if !u.trim().is_empty() => u.trim().to_owned(),
        _ => DEFAULT_UNIT.to_owned(),
    }
}
