//! Material <-> vector-store payload conversion
//!
//! The payload carries the material minus its embedding. Timestamps are
//! stored twice: RFC3339 for readability and as epoch seconds for range
//! filter pushdown.

use chrono::{DateTime, Utc};
use matforge_common::model::Material;
use serde_json::{json, Value};

/// Build the stored payload for a material
pub fn material_to_payload(material: &Material) -> Value {
    json!({
        "id": material.id,
        "name": material.name,
        "description": material.description,
        "use_category": material.use_category,
        "unit": material.unit,
        "sku": material.sku,
        "created_at": material.created_at.to_rfc3339(),
        "updated_at": material.updated_at.to_rfc3339(),
        "created_at_ts": material.created_at.timestamp() as f64,
        "updated_at_ts": material.updated_at.timestamp() as f64,
    })
}

/// Rebuild a material from a stored payload
pub fn material_from_payload(payload: &Value) -> Option<Material> {
    let id = payload.get("id")?.as_str()?.to_string();
    let name = payload.get("name")?.as_str()?.to_string();
    let unit = payload.get("unit")?.as_str()?.to_string();

    let parse_ts = |field: &str| {
        payload
            .get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    let opt_str = |field: &str| {
        payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    Some(Material {
        id,
        name,
        description: opt_str("description"),
        use_category: opt_str("use_category"),
        unit,
        sku: opt_str("sku"),
        created_at: parse_ts("created_at").unwrap_or_else(Utc::now),
        updated_at: parse_ts("updated_at").unwrap_or_else(Utc::now),
        embedding: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut material = Material::new("m-1", "Кирпич", "шт");
        material.description = Some("керамический".to_string());
        material.sku = Some("SKU-1".to_string());

        let payload = material_to_payload(&material);
        let restored = material_from_payload(&payload).unwrap();

        assert_eq!(restored.id, material.id);
        assert_eq!(restored.name, material.name);
        assert_eq!(restored.sku, material.sku);
        // Second precision survives the RFC3339 round trip
        assert_eq!(restored.created_at.timestamp(), material.created_at.timestamp());
        assert!(restored.embedding.is_none());
    }

    #[test]
    fn test_malformed_payload_is_none() {
        assert!(material_from_payload(&json!({"name": "x"})).is_none());
        assert!(material_from_payload(&json!(null)).is_none());
    }
}
