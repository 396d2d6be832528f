//! Shipping address captured with each order.

use serde::{Deserialize, Serialize};

/// A required address field was empty.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("address field `{0}` is required")]
pub struct AddressError(pub &'static str);

/// Delivery address snapshot stored on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    pub country: String,
    pub phone: String,
}

impl ShippingAddress {
    /// Check that every field carries a value.
    ///
    /// # Errors
    ///
    /// Returns the name of the first blank field.
    pub fn validate(&self) -> Result<(), AddressError> {
        let fields = [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("email", &self.email),
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zipcode", &self.zipcode),
            ("country", &self.country),
            ("phone", &self.phone),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(AddressError(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> ShippingAddress {
        serde_json::from_value(serde_json::json!({
            "firstName": "John",
            "lastName": "Doe",
            "email": "john@example.com",
            "street": "123 Main St",
            "city": "New York",
            "state": "NY",
            "zipcode": "10001",
            "country": "USA",
            "phone": "1234567890"
        }))
        .unwrap()
    }

    #[test]
    fn test_complete_address_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_blank_field_is_reported() {
        let mut address = sample();
        address.city = "  ".to_string();
        assert_eq!(address.validate(), Err(AddressError("city")));
    }
}
