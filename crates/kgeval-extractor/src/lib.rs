//! kgeval Extractor - LLM extraction pipeline
//!
//! Wraps a [`GenerationService`](kgeval_core::GenerationService) with retry,
//! parses structured extraction output into triples, filters the triples,
//! and runs the baseline, relation-split and two-stage conditions.

pub mod filter;
pub mod pipeline;
pub mod retry;
pub mod schema;

pub use filter::{
    apply_domain_range_constraints, filter_invalid_entity_types, filter_invalid_labels,
};
pub use pipeline::{ExtractionMode, ExtractionRun, Extractor, PromptSource, RelInfo, StageStats};
pub use retry::{RetryPolicy, RetryingService};
pub use schema::{
    extraction_schema, relation_group, verification_schema, RelationGroup, VerificationOutput,
    ENTITY_TYPES, RELATION_GROUPS,
};
