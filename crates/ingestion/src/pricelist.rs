//! Supplier price lists
//!
//! Parses CSV (UTF-8, comma, header row) and XLSX (first sheet) uploads
//! into immutable price lists. Required columns are `name` and `unit`;
//! `description`, `price`, and `sku` are optional. Malformed rows are
//! rejected individually with a reason; a missing required column rejects
//! the whole file. Re-ingesting the same file produces a fresh
//! `pricelist_id` and never touches previously stored rows.

use matforge_common::db::SqlBackend;
use matforge_common::embeddings::Embedder;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::{PriceList, PriceRow, SourceFormat};
use matforge_common::vector::{VectorRecord, VectorStore};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Maximum sheets considered in an XLSX workbook (first sheet only)
const XLSX_FIRST_SHEET: usize = 1;

/// A rejected input row with its reason
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRow {
    /// 1-based data row number (excluding the header)
    pub row: usize,
    pub reason: String,
}

/// Result of parsing one uploaded file
#[derive(Debug)]
pub struct ParsedRows {
    pub rows: Vec<PriceRow>,
    pub rejected: Vec<RejectedRow>,
}

/// Ingest summary returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub supplier_id: String,
    pub pricelist_id: String,
    pub accepted: usize,
    pub rejected: Vec<RejectedRow>,
}

/// Header-indexed accessor over one raw row
struct Columns {
    name: usize,
    unit: usize,
    description: Option<usize>,
    price: Option<usize>,
    sku: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Result<Self> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();

        let name = *index.get("name").ok_or_else(|| AppError::Validation {
            message: "Required column missing: name".to_string(),
            field: Some("name".to_string()),
        })?;
        let unit = *index.get("unit").ok_or_else(|| AppError::Validation {
            message: "Required column missing: unit".to_string(),
            field: Some("unit".to_string()),
        })?;

        Ok(Self {
            name,
            unit,
            description: index.get("description").copied(),
            price: index.get("price").copied(),
            sku: index.get("sku").copied(),
        })
    }

    fn cell<'a>(row: &'a [String], idx: Option<usize>) -> Option<&'a str> {
        idx.and_then(|i| row.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn to_price_row(&self, row: &[String]) -> std::result::Result<PriceRow, String> {
        let name = Self::cell(row, Some(self.name)).ok_or("empty name")?;
        let unit = Self::cell(row, Some(self.unit)).ok_or("empty unit")?;

        let price = match Self::cell(row, self.price) {
            None => 0.0,
            Some(raw) => raw
                .replace(',', ".")
                .replace(' ', "")
                .parse::<f64>()
                .map_err(|_| format!("unparseable price: {raw}"))?,
        };
        if price < 0.0 {
            return Err(format!("negative price: {price}"));
        }

        Ok(PriceRow {
            material_ref: None,
            raw_name: name.to_string(),
            unit: unit.to_string(),
            price,
            description: Self::cell(row, self.description).map(str::to_string),
            sku: Self::cell(row, self.sku).map(str::to_string),
        })
    }
}

fn collect_rows(headers: Vec<String>, raw_rows: Vec<Vec<String>>) -> Result<ParsedRows> {
    let columns = Columns::from_headers(&headers)?;
    let mut rows = Vec::new();
    let mut rejected = Vec::new();

    for (idx, raw) in raw_rows.into_iter().enumerate() {
        if raw.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        match columns.to_price_row(&raw) {
            Ok(row) => rows.push(row),
            Err(reason) => rejected.push(RejectedRow {
                row: idx + 1,
                reason,
            }),
        }
    }

    Ok(ParsedRows { rows, rejected })
}

/// Parse a CSV upload
pub fn parse_csv(bytes: &[u8]) -> Result<ParsedRows> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Validation {
            message: format!("Invalid CSV header: {e}"),
            field: None,
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut raw_rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::Validation {
            message: format!("Invalid CSV row: {e}"),
            field: None,
        })?;
        raw_rows.push(record.iter().map(str::to_string).collect());
    }

    collect_rows(headers, raw_rows)
}

/// Column letter prefix of a cell reference ("B12" -> 1)
fn column_index(cell_ref: &str) -> usize {
    let mut index = 0usize;
    for c in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    index.saturating_sub(1)
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    use std::io::Read;
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)
                .map_err(|e| AppError::Validation {
                    message: format!("Corrupt XLSX entry {name}: {e}"),
                    field: None,
                })?;
            Ok(Some(buffer))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(AppError::Validation {
            message: format!("Corrupt XLSX archive: {e}"),
            field: None,
        }),
    }
}

fn read_shared_strings(archive: &mut zip::ZipArchive<Cursor<&[u8]>>) -> Result<Vec<String>> {
    let Some(xml) = read_zip_entry(archive, "xl/sharedStrings.xml")? else {
        return Ok(Vec::new());
    };

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                    current.clear();
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_si => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(current.clone());
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(AppError::Validation {
                    message: format!("Corrupt sharedStrings.xml: {e}"),
                    field: None,
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Parse an XLSX upload; only the first worksheet is read
pub fn parse_xlsx(bytes: &[u8]) -> Result<ParsedRows> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| AppError::Validation {
            message: format!("Not an XLSX archive: {e}"),
            field: None,
        })?;

    let shared = read_shared_strings(&mut archive)?;

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let Some(sheet_name) = sheet_names.into_iter().take(XLSX_FIRST_SHEET).next() else {
        return Err(AppError::Validation {
            message: "XLSX contains no worksheets".to_string(),
            field: None,
        });
    };
    let xml = read_zip_entry(&mut archive, &sheet_name)?.unwrap_or_default();

    let mut all_rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut row: Vec<String> = Vec::new();
    let mut in_row = false;
    let mut in_value = false;
    let mut cell_col = 0usize;
    let mut cell_is_shared = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    row.clear();
                }
                b"c" if in_row => {
                    cell_is_shared = false;
                    cell_col = row.len();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                let reference =
                                    String::from_utf8_lossy(attr.value.as_ref()).to_string();
                                cell_col = column_index(&reference);
                            }
                            b"t" => {
                                cell_is_shared = attr.value.as_ref() == b"s";
                            }
                            _ => {}
                        }
                    }
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default().to_string();
                let value = if cell_is_shared {
                    raw.parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    raw
                };
                // Omitted empty cells leave gaps; keep columns aligned
                while row.len() < cell_col {
                    row.push(String::new());
                }
                if row.len() == cell_col {
                    row.push(value);
                } else {
                    row[cell_col] = value;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"row" => {
                    in_row = false;
                    all_rows.push(row.clone());
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(AppError::Validation {
                    message: format!("Corrupt worksheet XML: {e}"),
                    field: None,
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if all_rows.is_empty() {
        return Err(AppError::Validation {
            message: "XLSX sheet is empty".to_string(),
            field: None,
        });
    }
    let headers = all_rows.remove(0);
    collect_rows(headers, all_rows)
}

/// Persistence facade over supplier price lists
pub struct PriceListService {
    vector: Arc<dyn VectorStore>,
    sql: Option<Arc<dyn SqlBackend>>,
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    max_file_bytes: usize,
}

impl PriceListService {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        sql: Option<Arc<dyn SqlBackend>>,
        embedder: Arc<dyn Embedder>,
        dimension: usize,
        max_file_bytes: usize,
    ) -> Self {
        Self {
            vector,
            sql,
            embedder,
            dimension,
            max_file_bytes,
        }
    }

    fn collection_name(supplier_id: &str) -> String {
        format!("supplier_{}_prices", supplier_id)
    }

    /// Parse and persist one uploaded file
    pub async fn ingest(
        &self,
        supplier_id: &str,
        format: SourceFormat,
        bytes: &[u8],
    ) -> Result<IngestReport> {
        if bytes.len() > self.max_file_bytes {
            return Err(AppError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_file_bytes,
            });
        }

        let parsed = match format {
            SourceFormat::Csv => parse_csv(bytes)?,
            SourceFormat::Xlsx => parse_xlsx(bytes)?,
        };

        // Every upload gets a fresh id; prior lists stay untouched
        let pricelist_id = Uuid::new_v4().to_string();
        let uploaded_at = Utc::now();
        let list = PriceList {
            supplier_id: supplier_id.to_string(),
            pricelist_id: pricelist_id.clone(),
            uploaded_at,
            rows: parsed.rows,
            source_format: format,
        };

        if !list.rows.is_empty() {
            let collection = Self::collection_name(supplier_id);
            self.vector
                .ensure_collection(&collection, self.dimension)
                .await?;

            let names: Vec<String> = list.rows.iter().map(|r| r.raw_name.clone()).collect();
            let embeddings = self.embedder.embed_batch(&names).await?;

            let records: Vec<VectorRecord> = list
                .rows
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(idx, (row, embedding))| VectorRecord {
                    id: format!("{}:{}", pricelist_id, idx),
                    vector: Some(embedding),
                    payload: json!({
                        "id": format!("{}:{}", pricelist_id, idx),
                        "supplier_id": supplier_id,
                        "pricelist_id": pricelist_id,
                        "raw_name": row.raw_name,
                        "unit": row.unit,
                        "price": row.price,
                        "description": row.description,
                        "sku": row.sku,
                        "uploaded_at": uploaded_at.to_rfc3339(),
                        "uploaded_at_ts": uploaded_at.timestamp_millis() as f64,
                        "source_format": match format {
                            SourceFormat::Csv => "csv",
                            SourceFormat::Xlsx => "xlsx",
                        },
                    }),
                })
                .collect();
            self.vector.upsert(&collection, records).await?;

            if let Some(sql) = &self.sql {
                if let Err(e) = sql.insert_price_list(&list).await {
                    warn!(error = %e, supplier_id, "SQL price-list mirror failed");
                }
            }
        }

        info!(
            supplier_id,
            pricelist_id = %pricelist_id,
            accepted = list.rows.len(),
            rejected = parsed.rejected.len(),
            "Price list ingested"
        );
        Ok(IngestReport {
            supplier_id: supplier_id.to_string(),
            pricelist_id,
            accepted: list.rows.len(),
            rejected: parsed.rejected,
        })
    }

    /// The most recently uploaded list for a supplier
    pub async fn latest(&self, supplier_id: &str) -> Result<Option<PriceList>> {
        if let Some(sql) = &self.sql {
            return sql.latest_price_list(supplier_id).await;
        }

        let collection = Self::collection_name(supplier_id);
        let records = match self.vector.scroll(&collection, None, 10_000).await {
            Ok(records) => records,
            // The collection does not exist until the first upload
            Err(_) => return Ok(None),
        };
        if records.is_empty() {
            return Ok(None);
        }

        let newest = records
            .iter()
            .max_by(|a, b| {
                let a_ts = a.payload.get("uploaded_at_ts").and_then(|v| v.as_f64());
                let b_ts = b.payload.get("uploaded_at_ts").and_then(|v| v.as_f64());
                a_ts.partial_cmp(&b_ts).unwrap_or(std::cmp::Ordering::Equal)
            })
            .and_then(|r| r.payload.get("pricelist_id").and_then(|v| v.as_str()))
            .map(str::to_string);
        let Some(pricelist_id) = newest else {
            return Ok(None);
        };

        let mut rows: Vec<(String, PriceRow)> = records
            .into_iter()
            .filter(|r| {
                r.payload.get("pricelist_id").and_then(|v| v.as_str())
                    == Some(pricelist_id.as_str())
            })
            .map(|r| {
                let get = |field: &str| {
                    r.payload
                        .get(field)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                (
                    r.id.clone(),
                    PriceRow {
                        material_ref: None,
                        raw_name: get("raw_name").unwrap_or_default(),
                        unit: get("unit").unwrap_or_default(),
                        price: r.payload.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        description: get("description"),
                        sku: get("sku"),
                    },
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Some(PriceList {
            supplier_id: supplier_id.to_string(),
            pricelist_id,
            uploaded_at: Utc::now(),
            rows: rows.into_iter().map(|(_, row)| row).collect(),
            source_format: SourceFormat::Csv,
        }))
    }

    /// Cascade delete everything stored for a supplier
    pub async fn delete_supplier(&self, supplier_id: &str) -> Result<()> {
        let collection = Self::collection_name(supplier_id);
        self.vector.delete_collection(&collection).await?;
        if let Some(sql) = &self.sql {
            let deleted = sql.delete_supplier_prices(supplier_id).await?;
            info!(supplier_id, deleted, "Supplier price rows deleted from SQL");
        }
        Ok(())
    }
}
