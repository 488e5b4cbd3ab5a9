//! Dataset module
//!
//! Loads JacRED-format corpora and derives the inputs the pipeline needs:
//! stratified dev document selection, the few-shot demonstration, and the
//! domain/range constraint table.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    ConstraintTable, ExtractionOutput, GoldLabel, KgError, Mention, PredictedEntity,
    RelationRecord, Result, VertexSet,
};

// ============================================================================
// Document
// ============================================================================

/// A JacRED document with its gold annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,

    /// Tokenized sentences
    #[serde(default)]
    pub sents: Vec<Vec<String>>,

    /// Gold coreference clusters
    #[serde(rename = "vertexSet")]
    pub vertex_set: VertexSet,

    /// Gold relation labels
    #[serde(default)]
    pub labels: Vec<GoldLabel>,
}

impl Document {
    /// Plain text: tokens concatenated without separators
    pub fn text(&self) -> String {
        self.sents.iter().flatten().map(String::as_str).collect()
    }

    /// Total characters over all tokens
    pub fn char_count(&self) -> usize {
        self.sents
            .iter()
            .flatten()
            .map(|tok| tok.chars().count())
            .sum()
    }

    /// Sentence text by index
    pub fn sentence(&self, idx: usize) -> Option<String> {
        self.sents.get(idx).map(|sent| sent.concat())
    }

    /// First mention of a gold cluster
    pub fn first_mention(&self, cluster: usize) -> Result<&Mention> {
        self.vertex_set
            .get(cluster)
            .and_then(|mentions| mentions.first())
            .ok_or_else(|| {
                KgError::InvalidInput(format!(
                    "document '{}': cluster {} is missing or empty ({} clusters)",
                    self.title,
                    cluster,
                    self.vertex_set.len()
                ))
            })
    }

    /// Check the structural preconditions of the gold annotations:
    /// every cluster is non-empty and every label points at a cluster.
    pub fn validate(&self) -> Result<()> {
        if let Some(idx) = self.vertex_set.iter().position(Vec::is_empty) {
            return Err(KgError::InvalidInput(format!(
                "document '{}': gold cluster {} has no mentions",
                self.title, idx
            )));
        }

        let clusters = self.vertex_set.len();
        for label in &self.labels {
            if label.h >= clusters || label.t >= clusters {
                return Err(KgError::InvalidInput(format!(
                    "document '{}': label ({}, {}, {}) references a cluster outside 0..{}",
                    self.title, label.h, label.t, label.r, clusters
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// All JacRED splits plus relation metadata
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub train: Vec<Document>,
    pub dev: Vec<Document>,
    pub test: Vec<Document>,

    /// Relation code -> English relation name
    pub rel_info: BTreeMap<String, String>,
}

impl Dataset {
    /// Load every split from a JacRED directory
    pub fn load(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let dataset = Self {
            train: read_json(&base.join("train.json"))?,
            dev: read_json(&base.join("dev.json"))?,
            test: read_json(&base.join("test.json"))?,
            rel_info: read_json(&base.join("meta").join("rel_info.json"))?,
        };

        tracing::info!(
            path = %base.display(),
            train = dataset.train.len(),
            dev = dataset.dev.len(),
            test = dataset.test.len(),
            relations = dataset.rel_info.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Relation codes known to the dataset
    pub fn relation_codes(&self) -> impl Iterator<Item = &str> {
        self.rel_info.keys().map(String::as_str)
    }
}

/// Load one split file
pub fn load_split(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    read_json(path.as_ref())
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| KgError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content)
        .map_err(|e| KgError::ParseError(format!("{}: {}", path.display(), e)))
}

// ============================================================================
// Document Selection
// ============================================================================

/// Pick `n` documents spread evenly over the size distribution.
///
/// Documents are sorted by character count (stable) and the document at
/// `floor(total * (i + 0.5) / n)` is taken for each `i` in `0..n`.
pub fn select_dev_docs(docs: &[Document], n: usize) -> Vec<Document> {
    if n == 0 || docs.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&Document> = docs.iter().collect();
    sorted.sort_by_key(|doc| doc.char_count());

    let total = sorted.len();
    (0..n)
        .map(|i| sorted[total * (2 * i + 1) / (2 * n)].clone())
        .collect()
}

/// Bounds for choosing the few-shot demonstration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FewShotCriteria {
    pub min_chars: usize,
    pub max_chars: usize,
    pub min_entities: usize,
    pub max_entities: usize,
    pub min_labels: usize,
    pub max_labels: usize,
}

impl Default for FewShotCriteria {
    fn default() -> Self {
        Self {
            min_chars: 150,
            max_chars: 250,
            min_entities: 5,
            max_entities: 12,
            min_labels: 3,
            max_labels: 15,
        }
    }
}

impl FewShotCriteria {
    fn accepts(&self, doc: &Document) -> bool {
        let chars = doc.char_count();
        let entities = doc.vertex_set.len();
        let labels = doc.labels.len();
        (self.min_chars..=self.max_chars).contains(&chars)
            && (self.min_entities..=self.max_entities).contains(&entities)
            && (self.min_labels..=self.max_labels).contains(&labels)
    }
}

/// Select a short, clear training document as the few-shot example.
///
/// Takes the shortest document inside the criteria; otherwise the shortest
/// document with at least `min_labels` labels.
pub fn select_few_shot(train: &[Document], criteria: &FewShotCriteria) -> Option<Document> {
    let mut candidates: Vec<&Document> = train.iter().filter(|d| criteria.accepts(d)).collect();
    candidates.sort_by_key(|doc| doc.char_count());

    if let Some(doc) = candidates.first() {
        return Some((*doc).clone());
    }

    tracing::warn!("No few-shot candidate inside criteria, falling back to shortest labelled doc");
    let mut sorted: Vec<&Document> = train.iter().collect();
    sorted.sort_by_key(|doc| doc.char_count());
    sorted
        .into_iter()
        .find(|doc| doc.labels.len() >= criteria.min_labels)
        .cloned()
}

/// Render a gold document as the extraction output a model should produce
pub fn few_shot_output(doc: &Document) -> Result<ExtractionOutput> {
    let entities = (0..doc.vertex_set.len())
        .map(|i| {
            let mention = doc.first_mention(i)?;
            Ok(PredictedEntity::new(
                format!("e{i}"),
                mention.name.clone(),
                mention.entity_type.clone(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    doc.validate()?;
    let relations = doc
        .labels
        .iter()
        .map(|label| RelationRecord {
            head: format!("e{}", label.h),
            relation: label.r.clone(),
            tail: format!("e{}", label.t),
            evidence: label
                .evidence
                .iter()
                .filter_map(|&sid| doc.sentence(sid))
                .collect(),
        })
        .collect();

    Ok(ExtractionOutput {
        entities,
        relations,
    })
}

/// Collect observed `(head_type, tail_type)` pairs per relation from the
/// first mention of each labelled cluster
pub fn build_constraint_table(train: &[Document]) -> Result<ConstraintTable> {
    let mut table = ConstraintTable::new();
    for doc in train {
        for label in &doc.labels {
            let head = doc.first_mention(label.h)?;
            let tail = doc.first_mention(label.t)?;
            table.insert(
                label.r.clone(),
                head.entity_type.clone(),
                tail.entity_type.clone(),
            );
        }
    }
    Ok(table)
}

// ============================================================================
// Tests
// ============================================================================
