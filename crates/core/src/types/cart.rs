//! Per-user cart: item → size → quantity.
//!
//! A cart is never stored as one document. Each (item, size) pair is its own
//! entry, and this type is the materialised view handed to clients. An entry
//! whose quantity drops to zero is removed, so a `Cart` never contains zero
//! quantities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Errors produced by cart mutations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    /// Size label is blank.
    #[error("size is required")]
    EmptySize,
    /// Quantity would exceed `u32::MAX`.
    #[error("quantity is too large")]
    QuantityOverflow,
}

/// One materialised cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartEntry {
    pub item_id: ProductId,
    pub size: String,
    pub quantity: u32,
}

/// A user's cart, serialised as `{ "<itemId>": { "<size>": quantity } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart(BTreeMap<ProductId, BTreeMap<String, u32>>);

impl Cart {
    /// An empty cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cart from stored entries, skipping zero quantities.
    pub fn from_entries(entries: impl IntoIterator<Item = CartEntry>) -> Self {
        let mut cart = Self::new();
        for entry in entries {
            if entry.quantity > 0 {
                cart.0
                    .entry(entry.item_id)
                    .or_default()
                    .insert(entry.size, entry.quantity);
            }
        }
        cart
    }

    /// Quantity for an (item, size) pair, zero when absent.
    #[must_use]
    pub fn quantity(&self, item_id: ProductId, size: &str) -> u32 {
        self.0
            .get(&item_id)
            .and_then(|sizes| sizes.get(size))
            .copied()
            .unwrap_or(0)
    }

    /// Add one unit of an (item, size) pair and return the new quantity.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank size or on overflow.
    pub fn increment(&mut self, item_id: ProductId, size: &str) -> Result<u32, CartError> {
        let size = normalize_size(size)?;
        let slot = self.0.entry(item_id).or_default().entry(size).or_insert(0);
        *slot = slot.checked_add(1).ok_or(CartError::QuantityOverflow)?;
        Ok(*slot)
    }

    /// Set an explicit quantity. Zero removes the entry.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank size.
    pub fn set_quantity(
        &mut self,
        item_id: ProductId,
        size: &str,
        quantity: u32,
    ) -> Result<(), CartError> {
        let size = normalize_size(size)?;
        if quantity == 0 {
            if let Some(sizes) = self.0.get_mut(&item_id) {
                sizes.remove(&size);
                if sizes.is_empty() {
                    self.0.remove(&item_id);
                }
            }
        } else {
            self.0.entry(item_id).or_default().insert(size, quantity);
        }
        Ok(())
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Whether the cart holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all quantities.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.0
            .values()
            .flat_map(BTreeMap::values)
            .map(|&q| u64::from(q))
            .sum()
    }

    /// Flatten into entries, ordered by item then size.
    #[must_use]
    pub fn entries(&self) -> Vec<CartEntry> {
        self.0
            .iter()
            .flat_map(|(item_id, sizes)| {
                sizes.iter().map(|(size, &quantity)| CartEntry {
                    item_id: *item_id,
                    size: size.clone(),
                    quantity,
                })
            })
            .collect()
    }
}

/// Trim a size label and reject blanks.
///
/// # Errors
///
/// Returns [`CartError::EmptySize`] when nothing is left after trimming.
pub fn normalize_size(size: &str) -> Result<String, CartError> {
    let trimmed = size.trim();
    if trimmed.is_empty() {
        return Err(CartError::EmptySize);
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const A: ProductId = ProductId::new(1);
    const B: ProductId = ProductId::new(2);

    #[test]
    fn test_increment_creates_nested_keys() {
        let mut cart = Cart::new();
        assert_eq!(cart.increment(A, "M").unwrap(), 1);
        assert_eq!(cart.increment(A, "M").unwrap(), 2);
        assert_eq!(cart.increment(A, "L").unwrap(), 1);
        assert_eq!(cart.quantity(A, "M"), 2);
        assert_eq!(cart.total_quantity(), 3);
    }

    #[test]
    fn test_set_zero_removes_entry_and_empty_item() {
        let mut cart = Cart::new();
        cart.set_quantity(A, "M", 5).unwrap();
        cart.set_quantity(A, "M", 0).unwrap();
        assert!(cart.is_empty());
        assert_eq!(serde_json::to_string(&cart).unwrap(), "{}");
    }

    #[test]
    fn test_set_zero_on_missing_entry_is_noop() {
        let mut cart = Cart::new();
        cart.set_quantity(B, "S", 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_blank_size_rejected() {
        let mut cart = Cart::new();
        assert_eq!(cart.increment(A, "  "), Err(CartError::EmptySize));
        assert_eq!(cart.set_quantity(A, "", 2), Err(CartError::EmptySize));
    }

    #[test]
    fn test_from_entries_skips_zero() {
        let cart = Cart::from_entries([
            CartEntry {
                item_id: A,
                size: "M".into(),
                quantity: 0,
            },
            CartEntry {
                item_id: B,
                size: "L".into(),
                quantity: 3,
            },
        ]);
        assert_eq!(cart.entries().len(), 1);
        assert_eq!(serde_json::to_value(&cart).unwrap(), serde_json::json!({"2": {"L": 3}}));
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut cart = Cart::new();
        cart.set_quantity(A, "M", u32::MAX).unwrap();
        assert_eq!(cart.increment(A, "M"), Err(CartError::QuantityOverflow));
        assert_eq!(cart.quantity(A, "M"), u32::MAX);
    }
}
