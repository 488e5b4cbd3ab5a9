//! Extraction conditions
//!
//! Each runner turns one document into predicted entities and triples:
//! a single baseline call, one call per relation group merged across
//! passes, or a recall-oriented call followed by batch verification and
//! domain/range constraints.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use kgeval_core::dataset::few_shot_output;
use kgeval_core::{
    ConstraintTable, Document, ExtractionConfig, ExtractionOutput, GenerationOptions,
    GenerationService, PredictedEntity, Result, Triple,
};
use kgeval_eval::PassMerger;

use crate::filter::{
    apply_domain_range_constraints, filter_invalid_entity_types, filter_invalid_labels,
};
use crate::schema::{
    extraction_schema, parse_extraction, parse_verification, verification_schema, RelationGroup,
    ENTITY_TYPES, RELATION_GROUPS,
};

/// Relation code -> relation name
pub type RelInfo = BTreeMap<String, String>;

/// What an extraction prompt should ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode<'a> {
    Baseline,
    /// Favor recall; a verification stage follows
    Recall,
    /// Only the relations of one group
    Group(&'a RelationGroup),
}

/// Builds the prompts sent to the generation service
pub trait PromptSource: Send + Sync {
    /// System prompt for extraction; `group` narrows the relation list
    fn system_prompt(&self, rel_info: &RelInfo, group: Option<&RelationGroup>) -> String;

    /// User prompt for extraction, with a worked example
    fn extraction_prompt(
        &self,
        doc_text: &str,
        example_text: &str,
        example_output: &ExtractionOutput,
        mode: ExtractionMode<'_>,
    ) -> String;

    fn verification_system_prompt(&self) -> String;

    /// User prompt listing one batch of candidates; candidate `i` of the
    /// batch is answered with `candidate_index = i`
    fn verification_prompt(&self, doc_text: &str, batch: &[Triple], rel_info: &RelInfo)
        -> String;
}

// ============================================================================
// Results
// ============================================================================

/// Triple counts after each stage of the two-stage condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub stage1_candidates: usize,
    pub stage2_kept: usize,
    pub after_constraints: usize,
}

/// Output of one extraction condition on one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub entities: Vec<PredictedEntity>,
    pub triples: Vec<Triple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StageStats>,
}

// ============================================================================
// Extractor
// ============================================================================

/// Runs the extraction conditions against a generation service
pub struct Extractor<S, P> {
    service: S,
    prompts: P,
    rel_info: RelInfo,
    valid_relations: HashSet<String>,
    valid_types: HashSet<String>,
    verify_batch_size: usize,
    options: GenerationOptions,
}

impl<S: GenerationService, P: PromptSource> Extractor<S, P> {
    pub fn new(service: S, prompts: P, rel_info: RelInfo) -> Self {
        let valid_relations = rel_info.keys().cloned().collect();
        Self {
            service,
            prompts,
            rel_info,
            valid_relations,
            valid_types: ENTITY_TYPES.iter().map(|t| t.to_string()).collect(),
            verify_batch_size: 10,
            options: GenerationOptions::default(),
        }
    }

    /// Take model, entity types and batch size from configuration
    pub fn with_config(mut self, config: &ExtractionConfig) -> Self {
        self.valid_types = config.valid_entity_types.iter().cloned().collect();
        self.verify_batch_size = config.verify_batch_size.max(1);
        self.options = GenerationOptions::from_config(config);
        self
    }

    pub fn with_verify_batch_size(mut self, verify_batch_size: usize) -> Self {
        self.verify_batch_size = verify_batch_size.max(1);
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Baseline: one extraction call, then label and type filters
    pub async fn run_baseline(
        &self,
        doc: &Document,
        few_shot: &Document,
    ) -> Result<ExtractionRun> {
        let example = few_shot_output(few_shot)?;
        let system = self.prompts.system_prompt(&self.rel_info, None);
        let user = self.prompts.extraction_prompt(
            &doc.text(),
            &few_shot.text(),
            &example,
            ExtractionMode::Baseline,
        );

        let (entities, triples) = self.extract(&system, &user).await?;
        let triples = self.apply_filters(triples);

        tracing::info!(
            title = %doc.title,
            entities = entities.len(),
            triples = triples.len(),
            "Baseline extraction complete"
        );

        Ok(ExtractionRun {
            entities,
            triples,
            stats: None,
        })
    }

    /// One extraction pass per relation group, merged by entity name
    pub async fn run_relation_split(
        &self,
        doc: &Document,
        few_shot: &Document,
    ) -> Result<ExtractionRun> {
        let example = few_shot_output(few_shot)?;
        let doc_text = doc.text();
        let example_text = few_shot.text();
        let mut merger = PassMerger::new();

        for group in &RELATION_GROUPS {
            let group_example = ExtractionOutput {
                entities: example.entities.clone(),
                relations: example
                    .relations
                    .iter()
                    .filter(|r| group.contains(&r.relation))
                    .cloned()
                    .collect(),
            };
            let system = self.prompts.system_prompt(&self.rel_info, Some(group));
            let user = self.prompts.extraction_prompt(
                &doc_text,
                &example_text,
                &group_example,
                ExtractionMode::Group(group),
            );

            let (entities, triples) = self.extract(&system, &user).await?;
            let triples: Vec<Triple> = self
                .apply_filters(triples)
                .into_iter()
                .filter(|t| group.contains(&t.relation))
                .collect();

            tracing::debug!(
                group = group.name,
                entities = entities.len(),
                triples = triples.len(),
                "Relation group pass complete"
            );
            merger.add_pass(&entities, &triples);
        }

        let passes = merger.pass_count();
        let merged = merger.finish();
        tracing::info!(
            title = %doc.title,
            passes,
            entities = merged.entities.len(),
            triples = merged.triples.len(),
            "Relation-split extraction complete"
        );

        Ok(ExtractionRun {
            entities: merged.entities,
            triples: merged.triples,
            stats: None,
        })
    }

    /// Recall-oriented extraction, batch verification, then constraints
    pub async fn run_two_stage(
        &self,
        doc: &Document,
        few_shot: &Document,
        constraints: &ConstraintTable,
    ) -> Result<ExtractionRun> {
        let example = few_shot_output(few_shot)?;
        let doc_text = doc.text();
        let system = self.prompts.system_prompt(&self.rel_info, None);
        let user = self.prompts.extraction_prompt(
            &doc_text,
            &few_shot.text(),
            &example,
            ExtractionMode::Recall,
        );

        let (entities, candidates) = self.extract(&system, &user).await?;
        let candidates = self.apply_filters(candidates);
        let stage1_candidates = candidates.len();

        let verified = self.verify(&doc_text, &candidates).await?;
        let stage2_kept = verified.len();

        let triples = apply_domain_range_constraints(verified, constraints);
        let stats = StageStats {
            stage1_candidates,
            stage2_kept,
            after_constraints: triples.len(),
        };

        tracing::info!(
            title = %doc.title,
            stage1 = stats.stage1_candidates,
            stage2 = stats.stage2_kept,
            final_count = stats.after_constraints,
            "Two-stage extraction complete"
        );

        Ok(ExtractionRun {
            entities,
            triples,
            stats: Some(stats),
        })
    }

    async fn extract(
        &self,
        system: &str,
        user: &str,
    ) -> Result<(Vec<PredictedEntity>, Vec<Triple>)> {
        let response = self
            .service
            .generate(system, user, &extraction_schema(), &self.options)
            .await?;
        Ok(parse_extraction(response)?.into_triples())
    }

    fn apply_filters(&self, triples: Vec<Triple>) -> Vec<Triple> {
        let triples = filter_invalid_labels(triples, &self.valid_relations);
        filter_invalid_entity_types(triples, &self.valid_types)
    }

    async fn verify(&self, doc_text: &str, candidates: &[Triple]) -> Result<Vec<Triple>> {
        let system = self.prompts.verification_system_prompt();
        let schema = verification_schema();
        let mut verified = Vec::with_capacity(candidates.len());

        for batch in candidates.chunks(self.verify_batch_size) {
            let user = self
                .prompts
                .verification_prompt(doc_text, batch, &self.rel_info);
            let response = self
                .service
                .generate(&system, &user, &schema, &self.options)
                .await?;
            let decisions = parse_verification(response)?;

            verified.extend(
                batch
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| decisions.keeps(*i))
                    .map(|(_, t)| t.clone()),
            );
        }

        Ok(verified)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{RetryPolicy, RetryingService};
    use kgeval_core::{GoldLabel, KgError, Mention};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records the prompts and models it was given
    struct ScriptedService {
        responses: Mutex<VecDeque<Result<Value>>>,
        prompts: Mutex<Vec<(String, String)>>,
        models: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn new(responses: Vec<Result<Value>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
                models: Mutex::new(Vec::new()),
            }
        }

        fn user_prompts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|(_, u)| u.clone())
                .collect()
        }

        fn models(&self) -> Vec<String> {
            self.models.lock().unwrap().clone()
        }

        fn system_prompts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|(s, _)| s.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl GenerationService for ScriptedService {
        async fn generate(
            &self,
            system_prompt: &str,
            user_prompt: &str,
            _schema: &Value,
            options: &GenerationOptions,
        ) -> Result<Value> {
            self.models.lock().unwrap().push(options.model.clone());
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(KgError::GenerationError("script exhausted".to_string())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct PlainPrompts;

    impl PromptSource for PlainPrompts {
        fn system_prompt(&self, rel_info: &RelInfo, group: Option<&RelationGroup>) -> String {
            match group {
                Some(group) => format!("extract {}", group.name),
                None => format!("extract {} relations", rel_info.len()),
            }
        }

        fn extraction_prompt(
            &self,
            doc_text: &str,
            _example_text: &str,
            example_output: &ExtractionOutput,
            mode: ExtractionMode<'_>,
        ) -> String {
            format!(
                "{mode:?} ({} example relations): {doc_text}",
                example_output.relations.len()
            )
        }

        fn verification_system_prompt(&self) -> String {
            "verify".to_string()
        }

        fn verification_prompt(
            &self,
            _doc_text: &str,
            batch: &[Triple],
            _rel_info: &RelInfo,
        ) -> String {
            format!("{} candidates", batch.len())
        }
    }

    fn rel_info(codes: &[&str]) -> RelInfo {
        codes
            .iter()
            .map(|c| (c.to_string(), format!("relation {c}")))
            .collect()
    }

    fn doc() -> Document {
        Document {
            title: "夏目漱石".to_string(),
            sents: vec![
                vec!["夏目漱石".to_string(), "は".to_string(), "東京".to_string()],
                vec!["妻".to_string(), "は".to_string(), "鏡子".to_string()],
            ],
            vertex_set: vec![
                vec![Mention::new("夏目漱石", "PER")],
                vec![Mention::new("東京", "LOC")],
                vec![Mention::new("鏡子", "PER")],
            ],
            labels: vec![GoldLabel::new(0, 1, "P19"), GoldLabel::new(0, 2, "P26")],
        }
    }

    fn extraction(entities: &[(&str, &str, &str)], relations: &[(&str, &str, &str)]) -> Value {
        json!({
            "entities": entities
                .iter()
                .map(|(id, name, ty)| json!({ "id": id, "name": name, "type": ty }))
                .collect::<Vec<_>>(),
            "relations": relations
                .iter()
                .map(|(h, r, t)| json!({ "head": h, "relation": r, "tail": t, "evidence": "" }))
                .collect::<Vec<_>>(),
        })
    }

    #[tokio::test]
    async fn test_run_baseline_filters() {
        let service = ScriptedService::new(vec![Ok(extraction(
            &[("e0", "夏目漱石", "PER"), ("e1", "東京", "LOC"), ("e2", "猫", "ANIMAL")],
            &[
                ("e0", "P19", "e1"),
                ("e0", "P999", "e1"),
                ("e0", "P19", "e2"),
                ("e0", "P19", "e7"),
            ],
        ))]);
        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19", "P26"]));

        let run = extractor.run_baseline(&doc(), &doc()).await.unwrap();

        assert_eq!(run.entities.len(), 3);
        assert_eq!(run.triples.len(), 1);
        assert_eq!(run.triples[0].relation, "P19");
        assert_eq!(run.triples[0].tail_name, "東京");
        assert!(run.stats.is_none());
    }

    #[tokio::test]
    async fn test_run_relation_split_merges_groups() {
        let mut responses = vec![
            Ok(extraction(
                &[("e0", "夏目漱石", "PER"), ("e1", "東京", "LOC")],
                &[("e0", "P19", "e1"), ("e0", "P26", "e1")],
            )),
            Ok(extraction(
                &[("e0", "鏡子", "PER"), ("e1", "夏目漱石", "PER")],
                &[("e1", "P26", "e0")],
            )),
        ];
        responses.extend((0..3).map(|_| Ok(json!({}))));
        let service = ScriptedService::new(responses);
        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19", "P26"]));

        let run = extractor.run_relation_split(&doc(), &doc()).await.unwrap();

        let names: Vec<&str> = run.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["夏目漱石", "東京", "鏡子"]);

        let keys: Vec<(&str, &str, &str)> = run
            .triples
            .iter()
            .map(|t| (t.head.as_str(), t.relation.as_str(), t.tail.as_str()))
            .collect();
        assert_eq!(keys, vec![("m0", "P19", "m1"), ("m0", "P26", "m2")]);

        let systems = extractor.service().system_prompts();
        assert_eq!(systems.len(), 5);
        assert_eq!(systems[0], "extract biographical");
        assert_eq!(systems[4], "extract creative_media");

        // The worked example keeps only the codes of each pass's group
        let example_counts: Vec<bool> = extractor
            .service()
            .user_prompts()
            .iter()
            .zip([1, 1, 0, 0, 0])
            .map(|(user, n)| user.contains(&format!("({n} example relations)")))
            .collect();
        assert_eq!(example_counts, vec![true; 5]);
    }

    #[tokio::test]
    async fn test_run_two_stage_counts() {
        let service = ScriptedService::new(vec![
            Ok(extraction(
                &[("e0", "夏目漱石", "PER"), ("e1", "東京", "LOC"), ("e2", "朝日新聞", "ORG")],
                &[
                    ("e0", "P19", "e1"),
                    ("e0", "P20", "e1"),
                    ("e0", "P108", "e2"),
                    ("e0", "BAD", "e1"),
                    ("e0", "P27", "e9"),
                ],
            )),
            Ok(json!({ "decisions": [
                { "candidate_index": 0, "keep": true },
                { "candidate_index": 1, "keep": false },
            ]})),
            Ok(json!({ "decisions": [] })),
        ]);
        let extractor = Extractor::new(
            service,
            PlainPrompts,
            rel_info(&["P19", "P20", "P27", "P108"]),
        )
        .with_verify_batch_size(2);

        let mut constraints = ConstraintTable::new();
        constraints.insert("P19", "PER", "LOC");
        constraints.insert("P108", "PER", "LOC");

        let run = extractor
            .run_two_stage(&doc(), &doc(), &constraints)
            .await
            .unwrap();

        assert_eq!(
            run.stats,
            Some(StageStats {
                stage1_candidates: 3,
                stage2_kept: 2,
                after_constraints: 1,
            })
        );
        assert_eq!(run.triples[0].relation, "P19");
        assert_eq!(extractor.service().system_prompts()[1], "verify");
    }

    #[tokio::test]
    async fn test_with_config_sets_model_types_and_batch() {
        let service = ScriptedService::new(vec![
            Ok(extraction(
                &[("e0", "夏目漱石", "PER"), ("e1", "東京", "LOC"), ("e2", "鏡子", "PER")],
                &[("e0", "P19", "e1"), ("e0", "P26", "e2"), ("e2", "P19", "e1")],
            )),
            Ok(json!({ "decisions": [] })),
            Ok(json!({ "decisions": [] })),
        ]);
        let mut config = ExtractionConfig::default();
        config.model = "verifier-model".to_string();
        config.verify_batch_size = 2;
        config.valid_entity_types = vec!["PER".to_string(), "LOC".to_string()];

        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19", "P26"]))
            .with_config(&config);
        let run = extractor
            .run_two_stage(&doc(), &doc(), &ConstraintTable::new())
            .await
            .unwrap();

        assert_eq!(run.stats.unwrap().stage2_kept, 3);
        assert_eq!(extractor.service().models(), vec!["verifier-model"; 3]);
        assert_eq!(extractor.service().user_prompts()[2], "1 candidates");
    }

    #[tokio::test]
    async fn test_run_two_stage_without_candidates_skips_verification() {
        let service = ScriptedService::new(vec![Ok(json!({ "entities": [], "relations": [] }))]);
        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19"]));

        let run = extractor
            .run_two_stage(&doc(), &doc(), &ConstraintTable::new())
            .await
            .unwrap();

        assert_eq!(run.stats.unwrap().stage1_candidates, 0);
        assert_eq!(extractor.service().system_prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_error_propagates() {
        let service = RetryingService::new(
            ScriptedService::new(vec![
                Err(KgError::GenerationError("quota".to_string())),
                Err(KgError::GenerationError("quota".to_string())),
            ]),
            RetryPolicy::new(2, 0, 0),
        );
        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19"]));

        let err = extractor.run_baseline(&doc(), &doc()).await.unwrap_err();
        assert!(matches!(err, KgError::GenerationError(_)));
    }

    #[tokio::test]
    async fn test_retry_recovers_inside_pipeline() {
        let service = RetryingService::new(
            ScriptedService::new(vec![
                Err(KgError::GenerationError("timeout".to_string())),
                Ok(extraction(
                    &[("e0", "夏目漱石", "PER"), ("e1", "東京", "LOC")],
                    &[("e0", "P19", "e1")],
                )),
            ]),
            RetryPolicy::new(3, 0, 0),
        );
        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19"]));

        let run = extractor.run_baseline(&doc(), &doc()).await.unwrap();
        assert_eq!(run.triples.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_is_parse_error() {
        let service = ScriptedService::new(vec![Ok(json!({ "relations": 3 }))]);
        let extractor = Extractor::new(service, PlainPrompts, rel_info(&["P19"]));

        let err = extractor.run_baseline(&doc(), &doc()).await.unwrap_err();
        assert!(matches!(err, KgError::ParseError(_)));
    }
}
