//! # Validation Module
//!
//! Business-rule checks applied before a payload becomes a pending record.
//!
//! ## Where Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  enqueue(kind, json)                                                   │
//! │  ├── Shape: EntityPayload::from_wire (serde)                           │
//! │  └── THIS MODULE: field rules                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Local store (SQLite)                                                  │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── status transition guard in the repository                         │
//! │                                                                         │
//! │  Remote entities are NOT re-validated during merge; the authority      │
//! │  is trusted for what it already accepted.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fieldstock_core::validation::{validate_sku, validate_on_hand_quantity};
//!
//! validate_sku("BOLT-M8-40").unwrap();
//! validate_on_hand_quantity(0).unwrap();
//! ```

use crate::error::ValidationError;
use crate::payload::StockMovement;
use crate::{MAX_ENTITY_ID_LEN, MAX_LOCATION_LEN, MAX_STOCK_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a logical entity identifier (item id, transfer id, ...).
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_ENTITY_ID_LEN`] characters
/// - No whitespace or `/` (ids appear in log lines and error texts as `kind/id`)
pub fn validate_entity_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ENTITY_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ENTITY_ID_LEN,
        });
    }

    if id.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace or '/'".to_string(),
        });
    }

    Ok(())
}

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use fieldstock_core::validation::validate_sku;
///
/// assert!(validate_sku("BOLT-M8-40").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates an item name (1..=200 characters after trimming).
pub fn validate_item_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a storage location code.
pub fn validate_location(field: &str, location: &str) -> ValidationResult<()> {
    let location = location.trim();

    if location.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if location.len() > MAX_LOCATION_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_LOCATION_LEN,
        });
    }

    Ok(())
}

/// Validates both ends of a transfer.
///
/// ## Rules
/// - Both locations valid per [`validate_location`]
/// - Source and destination differ (case-insensitive)
pub fn validate_transfer_locations(from: &str, to: &str) -> ValidationResult<()> {
    validate_location("from_location", from)?;
    validate_location("to_location", to)?;

    if from.trim().eq_ignore_ascii_case(to.trim()) {
        return Err(ValidationError::MustDiffer {
            field: "to_location".to_string(),
            other: "from_location".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an on-hand quantity.
///
/// ## Rules
/// - 0..=[`MAX_STOCK_QUANTITY`] (zero means out of stock)
pub fn validate_on_hand_quantity(qty: i64) -> ValidationResult<()> {
    if !(0..=MAX_STOCK_QUANTITY).contains(&qty) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: MAX_STOCK_QUANTITY,
        });
    }

    Ok(())
}

/// Validates the quantity of a stock movement.
///
/// ## Rules
/// ```text
/// ┌─────────────┬───────────────────────────────────────────┐
/// │ Movement    │ Allowed quantity                          │
/// ├─────────────┼───────────────────────────────────────────┤
/// │ Receipt     │ 1 ..= MAX_STOCK_QUANTITY                  │
/// │ Issue       │ 1 ..= MAX_STOCK_QUANTITY                  │
/// │ Adjustment  │ -MAX ..= MAX, never 0                     │
/// └─────────────┴───────────────────────────────────────────┘
/// ```
pub fn validate_movement_quantity(movement: StockMovement, qty: i64) -> ValidationResult<()> {
    match movement {
        StockMovement::Receipt | StockMovement::Issue => {
            if qty <= 0 {
                return Err(ValidationError::MustBePositive {
                    field: "quantity".to_string(),
                });
            }
            if qty > MAX_STOCK_QUANTITY {
                return Err(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 1,
                    max: MAX_STOCK_QUANTITY,
                });
            }
        }
        StockMovement::Adjustment => {
            if qty == 0 {
                return Err(ValidationError::InvalidFormat {
                    field: "quantity".to_string(),
                    reason: "an adjustment of zero changes nothing".to_string(),
                });
            }
            if qty.abs() > MAX_STOCK_QUANTITY {
                return Err(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: -MAX_STOCK_QUANTITY,
                    max: MAX_STOCK_QUANTITY,
                });
            }
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
