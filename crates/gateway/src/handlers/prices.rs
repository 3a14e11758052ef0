//! Supplier price-list handlers

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};

use crate::state::AppState;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::{PriceList, SourceFormat};
use matforge_ingestion::IngestReport;

fn detect_format(filename: Option<&str>, content_type: Option<&str>) -> Result<SourceFormat> {
    if let Some(name) = filename {
        let lowered = name.to_lowercase();
        if lowered.ends_with(".csv") {
            return Ok(SourceFormat::Csv);
        }
        if lowered.ends_with(".xlsx") {
            return Ok(SourceFormat::Xlsx);
        }
    }
    match content_type {
        Some("text/csv") => Ok(SourceFormat::Csv),
        Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet") => {
            Ok(SourceFormat::Xlsx)
        }
        _ => Err(AppError::Validation {
            message: "Upload must be a .csv or .xlsx file".to_string(),
            field: Some("file".to_string()),
        }),
    }
}

/// POST /prices/process (multipart: file + supplier_id)
pub async fn process_prices(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReport>)> {
    let mut supplier_id: Option<String> = None;
    let mut file: Option<(Option<String>, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation {
            message: format!("Malformed multipart body: {e}"),
            field: None,
        })?
    {
        match field.name() {
            Some("supplier_id") => {
                supplier_id = Some(field.text().await.map_err(|e| AppError::Validation {
                    message: format!("Invalid supplier_id field: {e}"),
                    field: Some("supplier_id".to_string()),
                })?);
            }
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| AppError::Validation {
                    message: format!("Failed to read upload: {e}"),
                    field: Some("file".to_string()),
                })?;
                file = Some((filename, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let supplier_id = supplier_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(AppError::MissingField {
            field: "supplier_id".to_string(),
        })?;
    let (filename, content_type, bytes) = file.ok_or(AppError::MissingField {
        field: "file".to_string(),
    })?;

    let format = detect_format(filename.as_deref(), content_type.as_deref())?;
    let report = state.prices.ingest(&supplier_id, format, &bytes).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /prices/{supplier_id}/latest
pub async fn latest_prices(
    State(state): State<AppState>,
    Path(supplier_id): Path<String>,
) -> Result<Json<PriceList>> {
    let list = state
        .prices
        .latest(&supplier_id)
        .await?
        .ok_or(AppError::PriceListNotFound { supplier_id })?;
    Ok(Json(list))
}

/// DELETE /prices/{supplier_id}
pub async fn delete_prices(
    State(state): State<AppState>,
    Path(supplier_id): Path<String>,
) -> Result<StatusCode> {
    state.prices.delete_supplier(&supplier_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            detect_format(Some("list.csv"), None).unwrap(),
            SourceFormat::Csv
        );
        assert_eq!(
            detect_format(Some("Прайс.XLSX"), None).unwrap(),
            SourceFormat::Xlsx
        );
        assert_eq!(
            detect_format(None, Some("text/csv")).unwrap(),
            SourceFormat::Csv
        );
        assert!(detect_format(Some("list.pdf"), None).is_err());
        assert!(detect_format(None, None).is_err());
    }
}
