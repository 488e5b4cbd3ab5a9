//! Relation Metrics module
//!
//! Scores predicted triples against gold relation labels through an entity
//! alignment, and micro-averages per-document scores over a corpus.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use kgeval_core::{GoldFact, GoldLabel, Triple};

use crate::align::Alignment;

// ============================================================================
// Ratios
// ============================================================================

/// Precision, recall and F1 from raw counts.
///
/// Each ratio is 0.0 when its denominator is zero.
pub fn ratios(tp: usize, fp: usize, fn_: usize) -> (f64, f64, f64) {
    let precision = if tp + fp == 0 {
        0.0
    } else {
        tp as f64 / (tp + fp) as f64
    };
    let recall = if tp + fn_ == 0 {
        0.0
    } else {
        tp as f64 / (tp + fn_) as f64
    };
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    (precision, recall, f1)
}

// ============================================================================
// Score Details
// ============================================================================

/// Why a predicted triple counted as a false positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FalsePositiveReason {
    /// Head or tail has no gold cluster
    EntityNotAligned,
    /// Resolved fact is not gold, or was already matched
    WrongRelation,
}

impl std::fmt::Display for FalsePositiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntityNotAligned => write!(f, "entity_not_aligned"),
            Self::WrongRelation => write!(f, "wrong_relation"),
        }
    }
}

/// A false positive, described by the predicted surface names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FalsePositive {
    pub head: String,
    pub relation: String,
    pub tail: String,
    pub reason: FalsePositiveReason,
}

impl FalsePositive {
    fn new(triple: &Triple, reason: FalsePositiveReason) -> Self {
        Self {
            head: triple.head_name.clone(),
            relation: triple.relation.clone(),
            tail: triple.tail_name.clone(),
            reason,
        }
    }
}

// ============================================================================
// Document Scores
// ============================================================================

/// Relation scores for one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    #[serde(rename = "tp")]
    pub true_positives: usize,
    #[serde(rename = "fp")]
    pub false_positives: usize,
    #[serde(rename = "fn")]
    pub false_negatives: usize,
    /// One entry per false positive, in prediction order
    pub fp_details: Vec<FalsePositive>,
    /// Unmatched gold facts, in label order
    pub fn_details: Vec<GoldFact>,
}

impl ScoreRecord {
    /// Build a record from details; counts and ratios are derived
    pub fn new(
        true_positives: usize,
        fp_details: Vec<FalsePositive>,
        fn_details: Vec<GoldFact>,
    ) -> Self {
        let (precision, recall, f1) =
            ratios(true_positives, fp_details.len(), fn_details.len());
        Self {
            precision,
            recall,
            f1,
            true_positives,
            false_positives: fp_details.len(),
            false_negatives: fn_details.len(),
            fp_details,
            fn_details,
        }
    }

    /// False positives with a given reason
    pub fn false_positives_by(&self, reason: FalsePositiveReason) -> usize {
        self.fp_details.iter().filter(|d| d.reason == reason).count()
    }
}

/// Score predicted triples against gold labels.
///
/// Duplicate gold labels collapse into one fact. Each gold fact can be
/// matched once; a second prediction resolving to an already matched fact
/// is a `wrong_relation` false positive.
pub fn score_relations(
    triples: &[Triple],
    labels: &[GoldLabel],
    alignment: &Alignment,
) -> ScoreRecord {
    // Distinct gold facts, in first-seen label order
    let mut gold: Vec<GoldFact> = Vec::with_capacity(labels.len());
    let mut gold_set: HashSet<GoldFact> = HashSet::with_capacity(labels.len());
    for label in labels {
        let fact = label.fact();
        if gold_set.insert(fact.clone()) {
            gold.push(fact);
        }
    }

    let mut true_positives = 0;
    let mut fp_details = Vec::new();
    let mut matched: HashSet<GoldFact> = HashSet::new();

    for triple in triples {
        let (Some(head_idx), Some(tail_idx)) =
            (alignment.get(&triple.head), alignment.get(&triple.tail))
        else {
            fp_details.push(FalsePositive::new(
                triple,
                FalsePositiveReason::EntityNotAligned,
            ));
            continue;
        };

        let key = GoldFact {
            head_idx,
            tail_idx,
            relation: triple.relation.clone(),
        };
        if gold_set.contains(&key) && !matched.contains(&key) {
            true_positives += 1;
            matched.insert(key);
        } else {
            fp_details.push(FalsePositive::new(
                triple,
                FalsePositiveReason::WrongRelation,
            ));
        }
    }

    let fn_details: Vec<GoldFact> = gold
        .into_iter()
        .filter(|fact| !matched.contains(fact))
        .collect();

    ScoreRecord::new(true_positives, fp_details, fn_details)
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Micro-averaged scores over a set of documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    #[serde(rename = "tp")]
    pub true_positives: usize,
    #[serde(rename = "fp")]
    pub false_positives: usize,
    #[serde(rename = "fn")]
    pub false_negatives: usize,
    pub num_documents: usize,
}

impl AggregateRecord {
    /// Sum counts over `records` and derive ratios from the sums
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ScoreRecord>) -> Self {
        let mut aggregate = Self::default();
        for record in records {
            aggregate.true_positives += record.true_positives;
            aggregate.false_positives += record.false_positives;
            aggregate.false_negatives += record.false_negatives;
            aggregate.num_documents += 1;
        }
        aggregate.recompute();
        aggregate
    }

    /// Add one document's counts
    pub fn add(&mut self, record: &ScoreRecord) {
        self.true_positives += record.true_positives;
        self.false_positives += record.false_positives;
        self.false_negatives += record.false_negatives;
        self.num_documents += 1;
        self.recompute();
    }

    fn recompute(&mut self) {
        let (precision, recall, f1) = ratios(
            self.true_positives,
            self.false_positives,
            self.false_negatives,
        );
        self.precision = precision;
        self.recall = recall;
        self.f1 = f1;
    }

    /// Single-line summary
    pub fn summary(&self) -> String {
        format!(
            "P={:.2} R={:.2} F1={:.2} (TP={} FP={} FN={})",
            self.precision,
            self.recall,
            self.f1,
            self.true_positives,
            self.false_positives,
            self.false_negatives,
        )
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        format!(
            "=== Relation Extraction Report ===\n\n\
             Documents evaluated: {}\n\n\
               Precision: {:.1}%\n\
               Recall:    {:.1}%\n\
               F1 Score:  {:.1}%\n\
               TP: {} | FP: {} | FN: {}\n",
            self.num_documents,
            self.precision * 100.0,
            self.recall * 100.0,
            self.f1 * 100.0,
            self.true_positives,
            self.false_positives,
            self.false_negatives,
        )
    }
}

/// Micro-average a list of per-document records
pub fn aggregate(records: &[ScoreRecord]) -> AggregateRecord {
    AggregateRecord::from_records(records)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::align_entities;
    use kgeval_core::{Mention, PredictedEntity, VertexSet};

    fn triple(head: &str, relation: &str, tail: &str) -> Triple {
        Triple {
            head: head.to_string(),
            head_name: format!("{head}-name"),
            head_type: "PER".to_string(),
            relation: relation.to_string(),
            tail: tail.to_string(),
            tail_name: format!("{tail}-name"),
            tail_type: "LOC".to_string(),
            evidence: String::new(),
        }
    }

    /// Alignment e0 -> 0, e1 -> 1, e2 -> 2
    fn identity_alignment() -> Alignment {
        let gold: VertexSet = ["A", "B", "C"]
            .iter()
            .map(|n| vec![Mention::new(*n, "PER")])
            .collect();
        let predicted = [
            PredictedEntity::new("e0", "A", "PER"),
            PredictedEntity::new("e1", "B", "PER"),
            PredictedEntity::new("e2", "C", "PER"),
        ];
        align_entities(&predicted, &gold)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ratios_zero_denominators() {
        assert_eq!(ratios(0, 0, 0), (0.0, 0.0, 0.0));
        assert_eq!(ratios(0, 3, 0), (0.0, 0.0, 0.0));
        assert_eq!(ratios(0, 0, 2), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_perfect_prediction() {
        let record = score_relations(
            &[triple("e0", "P27", "e1")],
            &[GoldLabel::new(0, 1, "P27")],
            &identity_alignment(),
        );

        assert_eq!(record.true_positives, 1);
        assert_eq!(record.false_positives, 0);
        assert_eq!(record.false_negatives, 0);
        assert!(approx(record.precision, 1.0));
        assert!(approx(record.recall, 1.0));
        assert!(approx(record.f1, 1.0));
    }

    #[test]
    fn test_no_predictions() {
        let record = score_relations(&[], &[GoldLabel::new(0, 1, "P27")], &identity_alignment());

        assert_eq!(record.true_positives, 0);
        assert_eq!(record.false_positives, 0);
        assert_eq!(record.false_negatives, 1);
        assert_eq!((record.precision, record.recall, record.f1), (0.0, 0.0, 0.0));
        assert_eq!(
            record.fn_details,
            vec![GoldFact {
                head_idx: 0,
                tail_idx: 1,
                relation: "P27".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicate_correct_prediction_is_false_positive() {
        let record = score_relations(
            &[triple("e0", "P27", "e1"), triple("e0", "P27", "e1")],
            &[GoldLabel::new(0, 1, "P27")],
            &identity_alignment(),
        );

        assert_eq!(record.true_positives, 1);
        assert_eq!(record.false_positives, 1);
        assert_eq!(record.fp_details[0].reason, FalsePositiveReason::WrongRelation);
        assert!(approx(record.precision, 0.5));
        assert!(approx(record.recall, 1.0));
    }

    #[test]
    fn test_unaligned_entity() {
        let record = score_relations(
            &[triple("e0", "P27", "e9")],
            &[GoldLabel::new(0, 1, "P27")],
            &identity_alignment(),
        );

        assert_eq!(record.false_positives, 1);
        assert_eq!(
            record.fp_details[0],
            FalsePositive {
                head: "e0-name".to_string(),
                relation: "P27".to_string(),
                tail: "e9-name".to_string(),
                reason: FalsePositiveReason::EntityNotAligned,
            }
        );
        assert_eq!(record.false_negatives, 1);
    }

    #[test]
    fn test_wrong_relation_and_direction() {
        let record = score_relations(
            &[
                triple("e0", "P19", "e1"),
                triple("e1", "P27", "e0"),
                triple("e0", "P27", "e1"),
            ],
            &[GoldLabel::new(0, 1, "P27")],
            &identity_alignment(),
        );

        assert_eq!(record.true_positives, 1);
        assert_eq!(record.false_positives_by(FalsePositiveReason::WrongRelation), 2);
        assert_eq!(record.false_negatives, 0);
    }

    #[test]
    fn test_duplicate_gold_labels_collapse() {
        let mut with_evidence = GoldLabel::new(0, 1, "P27");
        with_evidence.evidence = vec![0, 2];
        let labels = [GoldLabel::new(0, 1, "P27"), with_evidence, GoldLabel::new(1, 2, "P131")];

        let record = score_relations(&[], &labels, &identity_alignment());

        assert_eq!(record.false_negatives, 2);
        assert_eq!(record.fn_details[0].relation, "P27");
        assert_eq!(record.fn_details[1].relation, "P131");
    }

    #[test]
    fn test_score_record_serialization() {
        let record = score_relations(
            &[triple("e0", "P27", "e9")],
            &[GoldLabel::new(0, 1, "P27")],
            &identity_alignment(),
        );
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["tp"], 0);
        assert_eq!(json["fp"], 1);
        assert_eq!(json["fn"], 1);
        assert_eq!(json["fp_details"][0]["reason"], "entity_not_aligned");
        assert_eq!(json["fn_details"][0]["head_idx"], 0);
    }

    #[test]
    fn test_aggregate_is_micro_average() {
        // Doc 1: P=1.0 from 1 relation; doc 2: P=0.25 from 4 relations
        let doc1 = ScoreRecord::new(1, vec![], vec![]);
        let miss = FalsePositive::new(&triple("e0", "P1", "e1"), FalsePositiveReason::WrongRelation);
        let doc2 = ScoreRecord::new(1, vec![miss; 3], vec![]);

        let agg = aggregate(&[doc1, doc2]);

        assert_eq!(agg.true_positives, 2);
        assert_eq!(agg.false_positives, 3);
        assert_eq!(agg.num_documents, 2);
        assert!(approx(agg.precision, 0.4));
        // Macro average would be 0.625
        assert!(!approx(agg.precision, 0.625));
    }

    #[test]
    fn test_aggregate_add_matches_from_records() {
        let missed = GoldFact {
            head_idx: 0,
            tail_idx: 1,
            relation: "P27".to_string(),
        };
        let records = vec![
            ScoreRecord::new(3, vec![], vec![missed]),
            ScoreRecord::new(0, vec![], vec![]),
        ];

        let mut incremental = AggregateRecord::default();
        for r in &records {
            incremental.add(r);
        }

        assert_eq!(incremental, aggregate(&records));
        assert!(approx(incremental.recall, 0.75));
    }

    #[test]
    fn test_aggregate_empty() {
        let agg = aggregate(&[]);
        assert_eq!(agg.num_documents, 0);
        assert_eq!((agg.precision, agg.recall, agg.f1), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_aggregate_report() {
        let agg = aggregate(&[ScoreRecord::new(1, vec![], vec![])]);
        let report = agg.report();
        assert!(report.contains("Documents evaluated: 1"));
        assert!(report.contains("Precision: 100.0%"));
        assert_eq!(agg.summary(), "P=1.00 R=1.00 F1=1.00 (TP=1 FP=0 FN=0)");
    }
}
