//! Material CRUD handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::state::AppState;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::Material;
use matforge_search::{BatchOutcome, MaterialPatch};

/// Create payload; id is generated when omitted
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMaterialRequest {
    pub id: Option<String>,

    #[validate(length(min = 1, max = 500))]
    pub name: String,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    pub use_category: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub unit: String,

    pub sku: Option<String>,
}

impl CreateMaterialRequest {
    fn into_material(self) -> Material {
        let mut material = Material::new(
            self.id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            self.name,
            self.unit,
        );
        material.description = self.description;
        material.use_category = self.use_category;
        material.sku = self.sku;
        material
    }
}

/// POST /materials
pub async fn create_material(
    State(state): State<AppState>,
    Json(request): Json<CreateMaterialRequest>,
) -> Result<(StatusCode, Json<Material>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let created = state.repository.create(request.into_material()).await?;
    Ok((
        StatusCode::CREATED,
        Json(Material {
            embedding: None,
            ..created
        }),
    ))
}

/// POST /materials/batch
pub async fn create_materials_batch(
    State(state): State<AppState>,
    Json(requests): Json<Vec<CreateMaterialRequest>>,
) -> Result<Json<Vec<BatchOutcome>>> {
    if requests.is_empty() {
        return Err(AppError::Validation {
            message: "Batch must not be empty".to_string(),
            field: None,
        });
    }

    let mut materials = Vec::with_capacity(requests.len());
    for request in requests {
        request.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: None,
        })?;
        materials.push(request.into_material());
    }

    let outcomes = state.repository.create_batch(materials).await?;
    Ok(Json(outcomes))
}

/// GET /materials/{id}
pub async fn get_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Material>> {
    let material = state
        .repository
        .get(&id)
        .await?
        .ok_or(AppError::MaterialNotFound { id })?;
    Ok(Json(Material {
        embedding: None,
        ..material
    }))
}

/// PUT /materials/{id}
pub async fn update_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<MaterialPatch>,
) -> Result<Json<Material>> {
    let updated = state.repository.update(&id, patch).await?;
    Ok(Json(Material {
        embedding: None,
        ..updated
    }))
}

/// DELETE /materials/{id}
pub async fn delete_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.repository.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::MaterialNotFound { id })
    }
}
