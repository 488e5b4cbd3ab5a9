//! Evaluation report assembly

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kgeval_core::{Document, ExtractionOutput, KgError, PredictedEntity, Result, Triple};
use kgeval_eval::{evaluate_document, merge_passes, AggregateRecord, DocumentResult, EntityAligner};

/// Extraction output for one document, one entry per pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSet {
    pub title: String,
    pub passes: Vec<ExtractionOutput>,
}

impl PredictionSet {
    /// Resolve every pass into triples; several passes are merged into one
    pub fn resolve(&self) -> Result<(Vec<PredictedEntity>, Vec<Triple>)> {
        let (entity_lists, triple_lists): (Vec<_>, Vec<_>) = self
            .passes
            .iter()
            .cloned()
            .map(ExtractionOutput::into_triples)
            .unzip();

        if entity_lists.len() == 1 {
            let entities = entity_lists.into_iter().flatten().collect();
            let triples = triple_lists.into_iter().flatten().collect();
            return Ok((entities, triples));
        }

        let merged = merge_passes(&entity_lists, &triple_lists)?;
        Ok((merged.entities, merged.triples))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub min_substring_overlap: usize,
    pub documents: Vec<DocumentResult>,
    pub aggregate: AggregateRecord,
}

/// Evaluate every prediction set against the gold document with its title
pub fn build_report(
    gold: &[Document],
    predictions: &[PredictionSet],
    aligner: &EntityAligner,
) -> Result<EvaluationReport> {
    let by_title: HashMap<&str, &Document> = gold.iter().map(|d| (d.title.as_str(), d)).collect();

    let mut documents = Vec::with_capacity(predictions.len());
    let mut aggregate = AggregateRecord::default();

    for prediction in predictions {
        let doc = by_title
            .get(prediction.title.as_str())
            .ok_or_else(|| KgError::NotFound(format!("gold document '{}'", prediction.title)))?;

        let (entities, triples) = prediction.resolve()?;
        let result = evaluate_document(&entities, &triples, doc, aligner)?;
        aggregate.add(&result.score);
        documents.push(result);
    }

    Ok(EvaluationReport {
        generated_at: Utc::now(),
        min_substring_overlap: aligner.min_substring_overlap(),
        documents,
        aggregate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgeval_core::{GoldLabel, Mention, RelationRecord};

    fn gold() -> Vec<Document> {
        vec![Document {
            title: "大阪城".to_string(),
            sents: vec![vec!["大阪城".to_string(), "は".to_string(), "大阪".to_string()]],
            vertex_set: vec![
                vec![Mention::new("大阪城", "LOC")],
                vec![Mention::new("大阪市", "LOC"), Mention::new("大阪", "LOC")],
                vec![Mention::new("豊臣秀吉", "PER")],
            ],
            labels: vec![GoldLabel::new(0, 1, "P131"), GoldLabel::new(0, 2, "P112")],
        }]
    }

    fn pass(entities: &[(&str, &str)], relations: &[(&str, &str, &str)]) -> ExtractionOutput {
        ExtractionOutput {
            entities: entities
                .iter()
                .map(|(id, name)| PredictedEntity::new(*id, *name, "LOC"))
                .collect(),
            relations: relations
                .iter()
                .map(|(h, r, t)| RelationRecord {
                    head: h.to_string(),
                    relation: r.to_string(),
                    tail: t.to_string(),
                    evidence: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_single_pass_report() {
        let predictions = vec![PredictionSet {
            title: "大阪城".to_string(),
            passes: vec![pass(
                &[("e0", "大阪城"), ("e1", "大阪")],
                &[("e0", "P131", "e1")],
            )],
        }];

        let report = build_report(&gold(), &predictions, &EntityAligner::new()).unwrap();

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.aggregate.true_positives, 1);
        assert_eq!(report.aggregate.false_negatives, 1);
        assert_eq!(report.aggregate.precision, 1.0);
        assert_eq!(report.aggregate.recall, 0.5);
    }

    #[test]
    fn test_multi_pass_predictions_are_merged() {
        let predictions = vec![PredictionSet {
            title: "大阪城".to_string(),
            passes: vec![
                pass(&[("e0", "大阪城"), ("e1", "大阪")], &[("e0", "P131", "e1")]),
                pass(
                    &[("e0", "豊臣秀吉"), ("e1", "大阪城")],
                    &[("e1", "P112", "e0"), ("e1", "P131", "e0")],
                ),
            ],
        }];

        let (entities, triples) = predictions[0].resolve().unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(triples.len(), 3);

        let report = build_report(&gold(), &predictions, &EntityAligner::new()).unwrap();
        let doc = &report.documents[0];
        assert_eq!(doc.score.true_positives, 2);
        assert_eq!(doc.score.false_positives, 1);
        assert_eq!(doc.score.false_negatives, 0);
    }

    #[test]
    fn test_unknown_title_is_not_found() {
        let predictions = vec![PredictionSet {
            title: "京都".to_string(),
            passes: vec![ExtractionOutput::default()],
        }];

        let err = build_report(&gold(), &predictions, &EntityAligner::new()).unwrap_err();
        assert!(matches!(err, KgError::NotFound(_)));
    }

    #[test]
    fn test_no_passes_scores_all_gold_as_missed() {
        let predictions = vec![PredictionSet {
            title: "大阪城".to_string(),
            passes: Vec::new(),
        }];

        let report = build_report(&gold(), &predictions, &EntityAligner::new()).unwrap();
        assert_eq!(report.aggregate.false_negatives, 2);
        assert_eq!(report.aggregate.f1, 0.0);
    }
}
