//! kgeval Eval - Entity alignment and relation scoring
//!
//! Resolves predicted entities to gold coreference clusters, scores
//! predicted triples against gold relation labels and micro-averages the
//! per-document scores. Multi-pass extraction output is unioned with the
//! [`merge`] module before scoring.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use kgeval_core::{Document, KgError, PredictedEntity, Result, Triple};

pub mod align;
pub mod merge;
pub mod metrics;
pub mod normalize;

pub use align::{align_entities, AlignedEntity, Alignment, EntityAligner, MatchKind};
pub use merge::{merge_passes, MergedExtraction, PassMerger};
pub use metrics::{
    aggregate, score_relations, AggregateRecord, FalsePositive, FalsePositiveReason, ScoreRecord,
};
pub use normalize::normalize;

/// Scores for one document plus the counts needed to read them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub title: String,
    pub num_gold_entities: usize,
    pub num_gold_labels: usize,
    pub num_predicted: usize,
    pub num_entities_aligned: usize,
    #[serde(flatten)]
    pub score: ScoreRecord,
}

impl DocumentResult {
    /// One-line summary for progress output
    pub fn summary(&self) -> String {
        format!(
            "{}: P={:.2} R={:.2} F1={:.2} (TP={} FP={} FN={}, aligned {}/{})",
            self.title,
            self.score.precision,
            self.score.recall,
            self.score.f1,
            self.score.true_positives,
            self.score.false_positives,
            self.score.false_negatives,
            self.num_entities_aligned,
            self.num_predicted,
        )
    }
}

/// Evaluate one document's predictions.
///
/// Fails with [`KgError::InvalidInput`] when the gold document is
/// malformed or a triple references an entity id missing from `entities`.
pub fn evaluate_document(
    entities: &[PredictedEntity],
    triples: &[Triple],
    doc: &Document,
    aligner: &EntityAligner,
) -> Result<DocumentResult> {
    doc.validate()?;

    let ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    for triple in triples {
        for id in [&triple.head, &triple.tail] {
            if !ids.contains(id.as_str()) {
                return Err(KgError::InvalidInput(format!(
                    "{}: triple ({}, {}, {}) references unknown entity id {}",
                    doc.title, triple.head, triple.relation, triple.tail, id
                )));
            }
        }
    }

    let alignment = aligner.align(entities, &doc.vertex_set);
    let score = score_relations(triples, &doc.labels, &alignment);

    tracing::info!(
        title = %doc.title,
        predicted = triples.len(),
        aligned = alignment.len(),
        tp = score.true_positives,
        fp = score.false_positives,
        fn_ = score.false_negatives,
        "Evaluated document"
    );

    Ok(DocumentResult {
        title: doc.title.clone(),
        num_gold_entities: doc.vertex_set.len(),
        num_gold_labels: doc.labels.len(),
        num_predicted: triples.len(),
        num_entities_aligned: alignment.len(),
        score,
    })
}

// ============================================================================
// Tests
// ============================================================================
