//! Cross-Pass Merge module
//!
//! Unions the output of several extraction passes over one document into a
//! single entity list and triple list. Entities are identified by
//! normalized name only; each distinct name gets one merged id.
//! Merged ids (`m0`, `m1`, ...) never share a namespace with the `e{n}`
//! ids extraction passes use, so an unmapped reference cannot land on a
//! merged entity by accident.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use kgeval_core::{KgError, PredictedEntity, Result, Triple};

use crate::normalize::normalize;

/// Entities and triples after merging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedExtraction {
    pub entities: Vec<PredictedEntity>,
    pub triples: Vec<Triple>,
}

impl MergedExtraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.triples.is_empty()
    }
}

// ============================================================================
// Pass Merger
// ============================================================================

/// Incremental merger; passes are merged in the order they are added.
///
/// The first entity seen under a normalized name fixes the merged entity's
/// name and type. Merged ids are `m0`, `m1`, ... in first-seen order.
#[derive(Debug, Default)]
pub struct PassMerger {
    /// Normalized name -> position in `entities`
    by_name: HashMap<String, usize>,
    /// (pass index, pass-local id) -> merged id
    id_map: HashMap<(usize, String), String>,
    /// Merged entities
    entities: Vec<PredictedEntity>,
    /// Triples per pass, still in pass-local ids
    passes: Vec<Vec<Triple>>,
}

impl PassMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one pass; returns its pass index
    pub fn add_pass(&mut self, entities: &[PredictedEntity], triples: &[Triple]) -> usize {
        let pass = self.passes.len();

        for entity in entities {
            let key = normalize(&entity.name);
            let merged_id = match self.by_name.get(&key) {
                Some(&pos) => self.entities[pos].id.clone(),
                None => {
                    let merged = PredictedEntity::new(
                        format!("m{}", self.entities.len()),
                        entity.name.clone(),
                        entity.entity_type.clone(),
                    );
                    let id = merged.id.clone();
                    self.by_name.insert(key, self.entities.len());
                    self.entities.push(merged);
                    id
                }
            };

            let slot = (pass, entity.id.clone());
            if let Some(existing) = self.id_map.get(&slot) {
                if *existing != merged_id {
                    tracing::warn!(
                        pass,
                        id = %entity.id,
                        kept = %existing,
                        ignored = %merged_id,
                        "Duplicate entity id within pass, keeping first binding"
                    );
                }
                continue;
            }
            self.id_map.insert(slot, merged_id);
        }

        self.passes.push(triples.to_vec());
        pass
    }

    /// Merged id bound to a pass-local id
    pub fn merged_id(&self, pass: usize, local_id: &str) -> Option<&str> {
        self.id_map
            .get(&(pass, local_id.to_string()))
            .map(String::as_str)
    }

    /// Merged entities so far
    pub fn entities(&self) -> &[PredictedEntity] {
        &self.entities
    }

    /// Number of passes added
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Remap every triple to merged ids and drop repeated
    /// `(head, relation, tail)` keys, keeping the first occurrence
    pub fn finish(self) -> MergedExtraction {
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut triples = Vec::new();

        for (pass, pass_triples) in self.passes.iter().enumerate() {
            for triple in pass_triples {
                let head = self.remap(pass, &triple.head);
                let tail = self.remap(pass, &triple.tail);
                let key = (head.clone(), triple.relation.clone(), tail.clone());
                if seen.insert(key) {
                    triples.push(triple.with_ids(head, tail));
                }
            }
        }

        tracing::debug!(
            passes = self.passes.len(),
            entities = self.entities.len(),
            triples = triples.len(),
            "Merged extraction passes"
        );

        MergedExtraction {
            entities: self.entities,
            triples,
        }
    }

    /// Unmapped references pass through unchanged
    fn remap(&self, pass: usize, local_id: &str) -> String {
        match self.merged_id(pass, local_id) {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!(pass, id = %local_id, "Triple references unknown entity id");
                local_id.to_string()
            }
        }
    }
}

/// Merge parallel per-pass entity and triple lists
pub fn merge_passes(
    entity_lists: &[Vec<PredictedEntity>],
    triple_lists: &[Vec<Triple>],
) -> Result<MergedExtraction> {
    if entity_lists.len() != triple_lists.len() {
        return Err(KgError::InvalidInput(format!(
            "pass lists differ in length: {} entity lists, {} triple lists",
            entity_lists.len(),
            triple_lists.len()
        )));
    }

    let mut merger = PassMerger::new();
    for (entities, triples) in entity_lists.iter().zip(triple_lists) {
        merger.add_pass(entities, triples);
    }
    Ok(merger.finish())
}

// ============================================================================
// Tests
// ============================================================================
