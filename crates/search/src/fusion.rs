//! Hybrid fusion
//!
//! Deterministic combination of the vector and SQL result sets: records
//! present on both sides score `0.6·vector + 0.4·sql`, one-sided records
//! keep their score scaled by 0.9, ties break toward the newer
//! `updated_at` and finally by id.

use matforge_common::model::Material;
use std::collections::HashMap;

/// One scored search hit
#[derive(Debug, Clone)]
pub struct Hit {
    pub material: Material,
    pub score: f32,
}

/// Fusion weights for the two sides
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector: f32,
    pub sql: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            sql: 0.4,
        }
    }
}

/// Scale applied to records present on only one side
const SINGLE_SIDE_SCALE: f32 = 0.9;

/// Fuse the two sides by material id
pub fn fuse(vector_hits: Vec<Hit>, sql_hits: Vec<Hit>, weights: FusionWeights) -> Vec<Hit> {
    let mut by_id: HashMap<String, (Option<Hit>, Option<Hit>)> = HashMap::new();

    for hit in vector_hits {
        let id = hit.material.id.clone();
        by_id.entry(id).or_default().0 = Some(hit);
    }
    for hit in sql_hits {
        let id = hit.material.id.clone();
        by_id.entry(id).or_default().1 = Some(hit);
    }

    let mut fused: Vec<Hit> = by_id
        .into_values()
        .filter_map(|sides| match sides {
            (Some(vector), Some(sql)) => {
                let score = weights.vector * vector.score + weights.sql * sql.score;
                // The vector payload is authoritative for the record body
                Some(Hit {
                    material: vector.material,
                    score,
                })
            }
            (Some(only), None) | (None, Some(only)) => Some(Hit {
                score: only.score * SINGLE_SIDE_SCALE,
                material: only.material,
            }),
            (None, None) => None,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.material.updated_at.cmp(&a.material.updated_at))
            .then_with(|| a.material.id.cmp(&b.material.id))
    });
    fused
}
