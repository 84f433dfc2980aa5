//! # Versioned Payload Schemas
//!
//! Typed payloads for each entity kind, with an explicit schema version so
//! records queued by one app version stay readable by the next.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /api/inventory                                                    │
//! │                                                                         │
//! │  {                                                                      │
//! │    "schema_version": 2,          ← added by to_wire(), stripped on read │
//! │    "item_id": "itm-0042",                                               │
//! │    "sku": "BOLT-M8-40",                                                 │
//! │    "name": "Hex bolt M8x40",                                            │
//! │    "quantity": 120,                                                     │
//! │    "unit": "pcs",                                                       │
//! │    "location": "AISLE-3",                                               │
//! │    "barcode": null                                                      │
//! │  }                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Compatibility Rules
//! - Unknown fields are ignored (a newer writer may add optional fields)
//! - Older versions are upgraded on read (see [`upgrade`])
//! - Versions newer than this build supports are rejected, never guessed at
//!
//! | Kind              | Version | Change                                  |
//! |-------------------|---------|-----------------------------------------|
//! | inventory_item    | 1       | `qty`, no unit                          |
//! | inventory_item    | 2       | `qty` renamed to `quantity`, `unit` added|
//! | stock_transaction | 1       | initial                                 |
//! | transfer          | 1       | initial                                 |

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::EntityKind;
use crate::validation;

/// Field carrying the schema version in wire bodies.
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

impl EntityKind {
    /// Current payload schema version for this kind.
    pub const fn schema_version(&self) -> u32 {
        match self {
            EntityKind::InventoryItem => 2,
            EntityKind::StockTransaction => 1,
            EntityKind::Transfer => 1,
        }
    }

    /// Field holding the entity id in this kind's payload.
    pub const fn id_field(&self) -> &'static str {
        match self {
            EntityKind::InventoryItem => "item_id",
            EntityKind::StockTransaction => "transaction_id",
            EntityKind::Transfer => "transfer_id",
        }
    }
}

// =============================================================================
// Inventory Item
// =============================================================================

/// Current state of an inventory item as counted on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryItemPayload {
    pub item_id: String,
    pub sku: String,
    pub name: String,
    /// On-hand quantity.
    pub quantity: i64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
}

// =============================================================================
// Stock Transaction
// =============================================================================

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockMovement {
    /// Goods received (quantity > 0).
    Receipt,
    /// Goods issued / consumed (quantity > 0).
    Issue,
    /// Count correction (quantity may be negative, never zero).
    Adjustment,
}

/// A stock movement recorded against an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockTransactionPayload {
    pub transaction_id: String,
    pub item_id: String,
    pub movement: StockMovement,
    pub quantity: i64,
    #[serde(default)]
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// Transfer
// =============================================================================

/// A move of stock between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferPayload {
    pub transfer_id: String,
    pub item_id: String,
    pub from_location: String,
    pub to_location: String,
    pub quantity: i64,
    #[ts(as = "String")]
    pub requested_at: DateTime<Utc>,
}

// =============================================================================
// Entity Payload
// =============================================================================

/// A typed payload of any entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityPayload {
    InventoryItem(InventoryItemPayload),
    StockTransaction(StockTransactionPayload),
    Transfer(TransferPayload),
}

impl EntityPayload {
    /// Kind of this payload.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::InventoryItem(_) => EntityKind::InventoryItem,
            EntityPayload::StockTransaction(_) => EntityKind::StockTransaction,
            EntityPayload::Transfer(_) => EntityKind::Transfer,
        }
    }

    /// Logical entity key. Two records with the same kind and entity id
    /// describe the same entity.
    pub fn entity_id(&self) -> &str {
        match self {
            EntityPayload::InventoryItem(p) => &p.item_id,
            EntityPayload::StockTransaction(p) => &p.transaction_id,
            EntityPayload::Transfer(p) => &p.transfer_id,
        }
    }

    /// Human-readable description used as the progress label.
    pub fn label(&self) -> String {
        match self {
            EntityPayload::InventoryItem(p) => format!("Item {} ({})", p.sku, p.name),
            EntityPayload::StockTransaction(p) => {
                let verb = match p.movement {
                    StockMovement::Receipt => "Receipt",
                    StockMovement::Issue => "Issue",
                    StockMovement::Adjustment => "Adjustment",
                };
                format!("{} of {} for item {}", verb, p.quantity, p.item_id)
            }
            EntityPayload::Transfer(p) => format!(
                "Transfer {} x{} {} → {}",
                p.item_id, p.quantity, p.from_location, p.to_location
            ),
        }
    }

    /// Validates business rules for this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EntityPayload::InventoryItem(p) => {
                validation::validate_entity_id("item_id", &p.item_id)?;
                validation::validate_sku(&p.sku)?;
                validation::validate_item_name(&p.name)?;
                validation::validate_on_hand_quantity(p.quantity)?;
                if let Some(ref location) = p.location {
                    validation::validate_location("location", location)?;
                }
                Ok(())
            }
            EntityPayload::StockTransaction(p) => {
                validation::validate_entity_id("transaction_id", &p.transaction_id)?;
                validation::validate_entity_id("item_id", &p.item_id)?;
                validation::validate_movement_quantity(p.movement, p.quantity)
            }
            EntityPayload::Transfer(p) => {
                validation::validate_entity_id("transfer_id", &p.transfer_id)?;
                validation::validate_entity_id("item_id", &p.item_id)?;
                validation::validate_transfer_locations(&p.from_location, &p.to_location)?;
                validation::validate_movement_quantity(StockMovement::Receipt, p.quantity)
            }
        }
    }

    /// Serializes the payload body (without the version field).
    pub fn to_value(&self) -> Value {
        // Serializing plain structs of strings/ints/timestamps cannot fail.
        let result = match self {
            EntityPayload::InventoryItem(p) => serde_json::to_value(p),
            EntityPayload::StockTransaction(p) => serde_json::to_value(p),
            EntityPayload::Transfer(p) => serde_json::to_value(p),
        };
        result.unwrap_or(Value::Null)
    }

    /// Serializes the payload as a wire body carrying `schema_version`.
    pub fn to_wire(&self) -> Value {
        let mut value = self.to_value();
        if let Value::Object(ref mut map) = value {
            map.insert(
                SCHEMA_VERSION_FIELD.to_string(),
                Value::from(self.kind().schema_version()),
            );
        }
        value
    }

    /// Decodes a stored payload written with `version` of the kind's schema.
    ///
    /// A body without the kind's id field is rejected before the version is
    /// looked at, so a body of another kind never reads as "schema too new".
    pub fn from_value(kind: EntityKind, version: u32, value: Value) -> CoreResult<Self> {
        let id_field = kind.id_field();
        if value.get(id_field).is_none() {
            return Err(CoreError::InvalidPayload {
                kind,
                reason: format!("missing field `{}`", id_field),
            });
        }

        let supported = kind.schema_version();
        if version > supported {
            return Err(CoreError::UnsupportedSchemaVersion {
                kind,
                found: version,
                supported,
            });
        }

        let value = upgrade(kind, version, value)?;

        match kind {
            EntityKind::InventoryItem => decode(kind, value).map(EntityPayload::InventoryItem),
            EntityKind::StockTransaction => {
                decode(kind, value).map(EntityPayload::StockTransaction)
            }
            EntityKind::Transfer => decode(kind, value).map(EntityPayload::Transfer),
        }
    }

    /// Decodes a wire body. A missing `schema_version` means the current one.
    pub fn from_wire(kind: EntityKind, mut value: Value) -> CoreResult<Self> {
        let version = match value.as_object_mut() {
            Some(map) => match map.remove(SCHEMA_VERSION_FIELD) {
                Some(v) => v.as_u64().ok_or_else(|| CoreError::InvalidPayload {
                    kind,
                    reason: "schema_version must be a non-negative integer".to_string(),
                })? as u32,
                None => kind.schema_version(),
            },
            None => {
                return Err(CoreError::InvalidPayload {
                    kind,
                    reason: "payload must be a JSON object".to_string(),
                })
            }
        };

        Self::from_value(kind, version, value)
    }
}

impl From<InventoryItemPayload> for EntityPayload {
    fn from(p: InventoryItemPayload) -> Self {
        EntityPayload::InventoryItem(p)
    }
}

impl From<StockTransactionPayload> for EntityPayload {
    fn from(p: StockTransactionPayload) -> Self {
        EntityPayload::StockTransaction(p)
    }
}

impl From<TransferPayload> for EntityPayload {
    fn from(p: TransferPayload) -> Self {
        EntityPayload::Transfer(p)
    }
}

fn decode<T: DeserializeOwned>(kind: EntityKind, value: Value) -> CoreResult<T> {
    serde_json::from_value(value).map_err(|e| CoreError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Rewrites an older payload document into the current schema shape.
pub fn upgrade(kind: EntityKind, version: u32, mut value: Value) -> CoreResult<Value> {
    let Some(map) = value.as_object_mut() else {
        return Err(CoreError::InvalidPayload {
            kind,
            reason: "payload must be a JSON object".to_string(),
        });
    };

    // inventory_item v1 → v2: `qty` became `quantity`
    if kind == EntityKind::InventoryItem && version < 2 {
        if let Some(qty) = map.remove("qty") {
            map.entry("quantity").or_insert(qty);
        }
    }

    Ok(value)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bolt() -> InventoryItemPayload {
        InventoryItemPayload {
            item_id: "itm-0042".into(),
            sku: "BOLT-M8-40".into(),
            name: "Hex bolt M8x40".into(),
            quantity: 120,
            unit: Some("pcs".into()),
            location: Some("AISLE-3".into()),
            barcode: None,
        }
    }

    #[test]
    fn test_wire_body_carries_schema_version() {
        let payload = EntityPayload::from(bolt());
        let wire = payload.to_wire();
        assert_eq!(wire["schema_version"], json!(2));
        assert_eq!(wire["sku"], json!("BOLT-M8-40"));

        let decoded = EntityPayload::from_wire(EntityKind::InventoryItem, wire).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_v1_inventory_item_is_upgraded() {
        let v1 = json!({
            "schema_version": 1,
            "item_id": "itm-7",
            "sku": "NUT-M8",
            "name": "Nut M8",
            "qty": 30
        });

        let decoded = EntityPayload::from_wire(EntityKind::InventoryItem, v1).unwrap();
        match decoded {
            EntityPayload::InventoryItem(item) => {
                assert_eq!(item.quantity, 30);
                assert_eq!(item.unit, None);
            }
            other => panic!("Expected inventory item, got {:?}", other),
        }
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let v9 = json!({ "schema_version": 9, "item_id": "x" });
        let err = EntityPayload::from_wire(EntityKind::InventoryItem, v9).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnsupportedSchemaVersion { found: 9, supported: 2, .. }
        ));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let mut wire = EntityPayload::from(bolt()).to_wire();
        wire["colour"] = json!("zinc");
        assert!(EntityPayload::from_wire(EntityKind::InventoryItem, wire).is_ok());
    }

    #[test]
    fn test_kind_mismatch_is_invalid_payload() {
        let wire = EntityPayload::from(bolt()).to_wire();
        let err = EntityPayload::from_wire(EntityKind::Transfer, wire).unwrap_err();
        assert!(
            matches!(err, CoreError::InvalidPayload { kind: EntityKind::Transfer, ref reason } if reason.contains("transfer_id")),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_kind_mismatch_on_newer_kind_is_invalid_payload() {
        // inventory_item is at v2, stock_transaction at v1
        let wire = EntityPayload::from(bolt()).to_wire();
        assert_eq!(wire["schema_version"], 2);
        let err = EntityPayload::from_wire(EntityKind::StockTransaction, wire).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { .. }), "got {:?}", err);
    }

    #[test]
    fn test_missing_version_defaults_to_current() {
        let body = json!({
            "transfer_id": "trf-1",
            "item_id": "itm-1",
            "from_location": "DOCK",
            "to_location": "AISLE-1",
            "quantity": 4,
            "requested_at": "2026-03-01T08:00:00Z"
        });
        let decoded = EntityPayload::from_wire(EntityKind::Transfer, body).unwrap();
        assert_eq!(decoded.entity_id(), "trf-1");
        assert!(decoded.label().contains("DOCK → AISLE-1"));
    }

    #[test]
    fn test_validate_rejects_bad_item() {
        let mut item = bolt();
        item.sku = "has space".into();
        assert!(EntityPayload::from(item).validate().is_err());
        assert!(EntityPayload::from(bolt()).validate().is_ok());
    }
}
