//! kgeval Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout kgeval:
//! - Gold standard models (coreference clusters, relation labels)
//! - Extraction models (predicted entities, denormalized triples)
//! - Common error types
//! - The generation service trait used by the extraction pipeline
//! - Configuration management
//! - Dataset loading (JacRED format)

pub mod config;
pub mod dataset;

pub use config::{
    AppConfig, ConfigError, DataConfig, EvaluationConfig, ExtractionConfig, LoggingConfig,
};
pub use dataset::{Dataset, Document, FewShotCriteria};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for kgeval operations
#[derive(Error, Debug)]
pub enum KgError {
    /// Input violates a structural precondition of the data model
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for KgError {
    fn from(e: ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KgError>;

// ============================================================================
// Gold Standard Models
// ============================================================================

/// One surface mention inside a gold coreference cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Surface string as annotated
    pub name: String,

    /// Entity type tag (PER, ORG, LOC, ...)
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Sentence the mention occurs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_id: Option<usize>,

    /// Token span inside the sentence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pos: Vec<usize>,
}

impl Mention {
    /// Create a mention with only a name and a type
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            sent_id: None,
            pos: Vec::new(),
        }
    }
}

/// A document's gold coreference clusters.
///
/// The position of a cluster in this sequence is the gold entity identifier
/// used by [`GoldLabel`].
pub type VertexSet = Vec<Vec<Mention>>;

/// A gold relation label `(h, t, r)` with optional evidence sentences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldLabel {
    /// Head cluster index
    pub h: usize,

    /// Tail cluster index
    pub t: usize,

    /// Relation code (Wikidata P-code)
    pub r: String,

    /// Supporting sentence indices
    #[serde(default)]
    pub evidence: Vec<usize>,
}

impl GoldLabel {
    pub fn new(h: usize, t: usize, r: impl Into<String>) -> Self {
        Self {
            h,
            t,
            r: r.into(),
            evidence: Vec::new(),
        }
    }

    /// The fact this label asserts, without evidence
    pub fn fact(&self) -> GoldFact {
        GoldFact {
            head_idx: self.h,
            tail_idx: self.t,
            relation: self.r.clone(),
        }
    }
}

/// A distinct gold fact keyed by cluster indices and relation code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoldFact {
    pub head_idx: usize,
    pub tail_idx: usize,
    pub relation: String,
}

// ============================================================================
// Extraction Models
// ============================================================================

/// An entity produced by one extraction pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedEntity {
    /// Identifier, unique only within the pass that produced it
    pub id: String,

    /// Surface name
    pub name: String,

    /// Entity type tag
    #[serde(rename = "type")]
    pub entity_type: String,
}

impl PredictedEntity {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A relation record as returned by the generation service, before its
/// entity references are joined against the entity list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub head: String,
    pub relation: String,
    pub tail: String,
    #[serde(default)]
    pub evidence: String,
}

/// A denormalized relation triple.
///
/// Name and type copies are taken from the referenced entities when the
/// triple is built, so scoring never needs a live entity lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    /// Head entity id
    pub head: String,
    pub head_name: String,
    pub head_type: String,

    /// Relation code
    pub relation: String,

    /// Tail entity id
    pub tail: String,
    pub tail_name: String,
    pub tail_type: String,

    /// Evidence text quoted by the extractor
    #[serde(default)]
    pub evidence: String,
}

impl Triple {
    /// Build a triple from a relation record and its resolved entities
    pub fn from_record(
        record: &RelationRecord,
        head: &PredictedEntity,
        tail: &PredictedEntity,
    ) -> Self {
        Self {
            head: head.id.clone(),
            head_name: head.name.clone(),
            head_type: head.entity_type.clone(),
            relation: record.relation.clone(),
            tail: tail.id.clone(),
            tail_name: tail.name.clone(),
            tail_type: tail.entity_type.clone(),
            evidence: record.evidence.clone(),
        }
    }

    /// Copy of this triple pointing at different entity ids
    pub fn with_ids(&self, head: impl Into<String>, tail: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            tail: tail.into(),
            ..self.clone()
        }
    }
}

/// Raw structured output of one extraction call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    #[serde(default)]
    pub entities: Vec<PredictedEntity>,
    #[serde(default)]
    pub relations: Vec<RelationRecord>,
}

impl ExtractionOutput {
    /// Join relations against the entity list.
    ///
    /// Relations whose head or tail id is not in the entity list are dropped.
    pub fn into_triples(self) -> (Vec<PredictedEntity>, Vec<Triple>) {
        let by_id: HashMap<&str, &PredictedEntity> =
            self.entities.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut triples = Vec::with_capacity(self.relations.len());
        for record in &self.relations {
            match (
                by_id.get(record.head.as_str()),
                by_id.get(record.tail.as_str()),
            ) {
                (Some(head), Some(tail)) => triples.push(Triple::from_record(record, head, tail)),
                _ => tracing::debug!(
                    head = %record.head,
                    tail = %record.tail,
                    relation = %record.relation,
                    "Dropping relation with unresolved entity reference"
                ),
            }
        }

        (self.entities, triples)
    }
}

// ============================================================================
// Domain/Range Constraints
// ============================================================================

/// Observed `(head_type, tail_type)` pairs per relation code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintTable {
    table: BTreeMap<String, BTreeSet<(String, String)>>,
}

impl ConstraintTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `relation` was observed between these entity types
    pub fn insert(
        &mut self,
        relation: impl Into<String>,
        head_type: impl Into<String>,
        tail_type: impl Into<String>,
    ) {
        self.table
            .entry(relation.into())
            .or_default()
            .insert((head_type.into(), tail_type.into()));
    }

    /// Whether the type pair is allowed for `relation`.
    ///
    /// Returns `None` when the relation has never been observed.
    pub fn allows(&self, relation: &str, head_type: &str, tail_type: &str) -> Option<bool> {
        self.table
            .get(relation)
            .map(|pairs| pairs.contains(&(head_type.to_string(), tail_type.to_string())))
    }

    /// Number of relation codes in the table
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Relation codes in the table, in sorted order
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Per-call sampling settings for a generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
}

impl GenerationOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

/// A text-generation service returning JSON that conforms to a schema.
///
/// Implementations may fail transiently; callers wrap them in a retry
/// policy and treat a successful result as already validated.
#[async_trait::async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate a structured response with the given model and temperature
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &serde_json::Value,
        options: &GenerationOptions,
    ) -> Result<serde_json::Value>;

    /// Service name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
