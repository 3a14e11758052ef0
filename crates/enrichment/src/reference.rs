//! Reference-collection service
//!
//! Serves the `colors` and `units` reference sets. Reads go through an
//! atomic snapshot pointer so the hot path takes no lock; admin writes
//! rebuild the snapshot and swap it in. Seeded at startup, regenerating
//! any missing embeddings through the embedding client.

use arc_swap::ArcSwap;
use matforge_common::embeddings::Embedder;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::ReferenceEntry;
use matforge_common::vector::cosine_similarity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Canonical units seeded on startup, with common supplier spellings
pub const UNIT_SEEDS: &[(&str, &[&str])] = &[
    ("шт", &["штука", "штук", "шт.", "pcs", "piece"]),
    ("кг", &["килограмм", "кг.", "kilogram", "kg"]),
    ("т", &["тонна", "тонн", "т."]),
    ("м", &["метр", "м.", "пог. м", "пог.м", "п.м", "погонный метр"]),
    ("м2", &["м^2", "кв. м", "кв.м", "квадратный метр", "м²"]),
    ("м3", &["м^3", "куб. м", "куб.м", "кубический метр", "м³"]),
    ("л", &["литр", "л.", "liter"]),
    ("упак", &["упаковка", "уп", "уп.", "pack"]),
    ("рулон", &["рул", "рул.", "roll"]),
    ("мешок", &["меш", "меш.", "bag"]),
    ("лист", &["л-т", "sheet"]),
    ("комплект", &["компл", "компл.", "кт", "set"]),
];

/// Canonical colors seeded on startup
pub const COLOR_SEEDS: &[(&str, &[&str])] = &[
    ("белый", &["белая", "белое", "белые", "бел.", "white"]),
    ("черный", &["чёрный", "черная", "черное", "black"]),
    ("красный", &["красная", "красное", "red"]),
    ("серый", &["серая", "серое", "gray", "grey"]),
    ("синий", &["синяя", "синее", "blue"]),
    ("зеленый", &["зелёный", "зеленая", "green"]),
    ("коричневый", &["коричневая", "brown"]),
    ("бежевый", &["бежевая", "beige"]),
    ("желтый", &["жёлтый", "желтая", "yellow"]),
    ("оранжевый", &["оранжевая", "orange"]),
];

/// Fold case and collapse whitespace for alias matching
pub fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Immutable read snapshot of one collection
struct Snapshot {
    entries: Vec<ReferenceEntry>,
    /// folded alias or canonical -> entry index
    alias_index: HashMap<String, usize>,
}

impl Snapshot {
    fn build(entries: Vec<ReferenceEntry>) -> Self {
        let mut alias_index = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            alias_index.insert(fold(&entry.canonical_name), idx);
            for alias in &entry.aliases {
                alias_index.insert(fold(alias), idx);
            }
        }
        Self {
            entries,
            alias_index,
        }
    }
}

/// One reference collection (colors or units)
pub struct ReferenceCollection {
    name: String,
    snapshot: ArcSwap<Snapshot>,
    /// Serializes admin writes; readers never take it
    write_lock: Mutex<()>,
}

impl ReferenceCollection {
    fn new(name: &str, entries: Vec<ReferenceEntry>) -> Self {
        Self {
            name: name.to_string(),
            snapshot: ArcSwap::from_pointee(Snapshot::build(entries)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact alias match, case- and whitespace-normalized
    pub fn lookup_exact(&self, name: &str) -> Option<String> {
        let snapshot = self.snapshot.load();
        snapshot
            .alias_index
            .get(&fold(name))
            .map(|&idx| snapshot.entries[idx].canonical_name.clone())
    }

    /// Nearest canonicals by cosine similarity, best first
    pub fn lookup_nearest(&self, vector: &[f32], k: usize) -> Vec<(String, f32)> {
        let snapshot = self.snapshot.load();
        let mut scored: Vec<(String, f32)> = snapshot
            .entries
            .iter()
            .filter_map(|entry| {
                entry.embedding.as_ref().map(|emb| {
                    (
                        entry.canonical_name.clone(),
                        cosine_similarity(vector, emb),
                    )
                })
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Fuzzy match over canonicals by normalized Levenshtein, best first
    pub fn lookup_fuzzy(&self, name: &str, k: usize) -> Vec<(String, f64)> {
        let folded = fold(name);
        let snapshot = self.snapshot.load();
        let mut scored: Vec<(String, f64)> = snapshot
            .entries
            .iter()
            .map(|entry| {
                let similarity =
                    strsim::normalized_levenshtein(&folded, &fold(&entry.canonical_name));
                (entry.canonical_name.clone(), similarity)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// All entries of the current snapshot
    pub fn entries(&self) -> Vec<ReferenceEntry> {
        self.snapshot.load().entries.clone()
    }

    /// Insert or replace an entry, regenerating its embedding.
    /// Admin-only; the snapshot is rebuilt and swapped atomically.
    pub async fn upsert(&self, mut entry: ReferenceEntry, embedder: &dyn Embedder) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // Embedding is regenerated whenever aliases change, so simply
        // regenerate on every write
        entry.embedding = Some(embedder.embed(&entry.canonical_name).await?);

        let mut entries = self.snapshot.load().entries.clone();
        let folded = fold(&entry.canonical_name);
        match entries
            .iter()
            .position(|e| fold(&e.canonical_name) == folded)
        {
            Some(idx) => entries[idx] = entry,
            None => entries.push(entry),
        }

        self.verify_disjoint_aliases(&entries)?;
        self.snapshot.store(Arc::new(Snapshot::build(entries)));
        Ok(())
    }

    fn verify_disjoint_aliases(&self, entries: &[ReferenceEntry]) -> Result<()> {
        let mut seen = HashMap::new();
        for entry in entries {
            for alias in std::iter::once(&entry.canonical_name).chain(entry.aliases.iter()) {
                let folded = fold(alias);
                if let Some(other) = seen.insert(folded.clone(), &entry.canonical_name) {
                    if other != &entry.canonical_name {
                        return Err(AppError::Conflict {
                            message: format!(
                                "Alias '{}' is claimed by both '{}' and '{}' in {}",
                                alias, other, entry.canonical_name, self.name
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// The two reference collections used by normalization
pub struct ReferenceService {
    pub colors: ReferenceCollection,
    pub units: ReferenceCollection,
}

impl ReferenceService {
    /// Seed both collections and backfill any missing embeddings
    pub async fn seed(embedder: &dyn Embedder) -> Result<Self> {
        let units = Self::seed_collection("units", UNIT_SEEDS, embedder).await?;
        let colors = Self::seed_collection("colors", COLOR_SEEDS, embedder).await?;
        info!(
            units = units.len(),
            colors = colors.len(),
            "Reference collections seeded"
        );
        Ok(Self { colors, units })
    }

    async fn seed_collection(
        name: &str,
        seeds: &[(&str, &[&str])],
        embedder: &dyn Embedder,
    ) -> Result<ReferenceCollection> {
        let canonicals: Vec<String> = seeds.iter().map(|(c, _)| c.to_string()).collect();
        let embeddings = embedder.embed_batch(&canonicals).await?;

        let entries: Vec<ReferenceEntry> = seeds
            .iter()
            .zip(embeddings)
            .map(|((canonical, aliases), embedding)| ReferenceEntry {
                canonical_name: canonical.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                embedding: Some(embedding),
            })
            .collect();

        Ok(ReferenceCollection::new(name, entries))
    }

    /// Build from explicit entries (tests, admin import)
    pub fn from_entries(colors: Vec<ReferenceEntry>, units: Vec<ReferenceEntry>) -> Self {
        Self {
            colors: ReferenceCollection::new("colors", colors),
            units: ReferenceCollection::new("units", units),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matforge_common::embeddings::MockEmbedder;

    #[tokio::test]
    async fn test_seed_and_exact_lookup() {
        let embedder = MockEmbedder::new(64);
        let service = ReferenceService::seed(&embedder).await.unwrap();

        assert_eq!(service.units.lookup_exact("ШТУКА").as_deref(), Some("шт"));
        assert_eq!(service.units.lookup_exact("кв. м").as_deref(), Some("м2"));
        assert_eq!(service.colors.lookup_exact("White").as_deref(), Some("белый"));
        assert_eq!(service.units.lookup_exact("фунт"), None);
    }

    #[tokio::test]
    async fn test_nearest_finds_seeded_canonical() {
        let embedder = MockEmbedder::new(64);
        let service = ReferenceService::seed(&embedder).await.unwrap();

        // The mock embedder is deterministic, so embedding the canonical
        // itself must come back as the top hit with similarity ~1
        let query = embedder.embed("кг").await.unwrap();
        let hits = service.units.lookup_nearest(&query, 3);
        assert_eq!(hits[0].0, "кг");
        assert!(hits[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_fuzzy_tolerates_typo() {
        let embedder = MockEmbedder::new(64);
        let service = ReferenceService::seed(&embedder).await.unwrap();

        let hits = service.colors.lookup_fuzzy("белыи", 1);
        assert_eq!(hits[0].0, "белый");
        assert!(hits[0].1 >= 0.75);
    }

    #[tokio::test]
    async fn test_upsert_swaps_snapshot() {
        let embedder = MockEmbedder::new(64);
        let service = ReferenceService::seed(&embedder).await.unwrap();
        let before = service.units.len();

        service
            .units
            .upsert(
                ReferenceEntry {
                    canonical_name: "бухта".to_string(),
                    aliases: vec!["бухт.".to_string()],
                    embedding: None,
                },
                &embedder,
            )
            .await
            .unwrap();

        assert_eq!(service.units.len(), before + 1);
        assert_eq!(service.units.lookup_exact("бухт.").as_deref(), Some("бухта"));
        // Embedding was regenerated on write
        let entry = service
            .units
            .entries()
            .into_iter()
            .find(|e| e.canonical_name == "бухта")
            .unwrap();
        assert!(entry.embedding.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_alias_rejected() {
        let embedder = MockEmbedder::new(64);
        let service = ReferenceService::seed(&embedder).await.unwrap();

        let err = service
            .units
            .upsert(
                ReferenceEntry {
                    canonical_name: "пачка".to_string(),
                    // Already an alias of "шт"
                    aliases: vec!["штука".to_string()],
                    embedding: None,
                },
                &embedder,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[test]
    fn test_fold_collapses_whitespace() {
        assert_eq!(fold("  Кв.   М  "), "кв. м");
    }
}
