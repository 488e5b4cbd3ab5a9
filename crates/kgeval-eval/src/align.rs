//! Entity Alignment module
//!
//! Resolves run-local predicted entity ids to gold coreference cluster
//! indices. Three passes run in order (exact, normalized, substring) and
//! share one set of consumed clusters, so the resulting map is injective.
//!
//! Iteration order is part of the contract: predicted entities are visited
//! in input order and gold clusters in vertex-set order, and the first
//! qualifying cluster wins every tie.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use kgeval_core::{PredictedEntity, VertexSet};

use crate::normalize::normalize;

/// Default minimum overlap for the substring pass
pub const DEFAULT_MIN_SUBSTRING_OVERLAP: usize = 2;

// ============================================================================
// Alignment
// ============================================================================

/// Which pass produced an alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Raw name equals a gold mention
    Exact,
    /// Names equal after normalization
    Normalized,
    /// One normalized name contains the other
    Substring,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Normalized => write!(f, "normalized"),
            Self::Substring => write!(f, "substring"),
        }
    }
}

/// One aligned predicted entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedEntity {
    pub gold_idx: usize,
    pub kind: MatchKind,
}

/// Partial injective map from predicted entity id to gold cluster index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    entries: HashMap<String, AlignedEntity>,
}

impl Alignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gold cluster index for a predicted id
    pub fn get(&self, predicted_id: &str) -> Option<usize> {
        self.entries.get(predicted_id).map(|a| a.gold_idx)
    }

    /// Full alignment entry, including the pass that produced it
    pub fn entry(&self, predicted_id: &str) -> Option<&AlignedEntity> {
        self.entries.get(predicted_id)
    }

    pub fn contains(&self, predicted_id: &str) -> bool {
        self.entries.contains_key(predicted_id)
    }

    /// Number of aligned predicted entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aligned entities produced by one pass
    pub fn count_by_kind(&self, kind: MatchKind) -> usize {
        self.entries.values().filter(|a| a.kind == kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AlignedEntity)> {
        self.entries.iter().map(|(id, a)| (id.as_str(), a))
    }

    fn insert(&mut self, predicted_id: &str, gold_idx: usize, kind: MatchKind) {
        self.entries
            .insert(predicted_id.to_string(), AlignedEntity { gold_idx, kind });
    }
}

// ============================================================================
// Aligner
// ============================================================================

/// Three-pass entity aligner
#[derive(Debug, Clone)]
pub struct EntityAligner {
    /// Substring matches shorter than this are ignored
    min_substring_overlap: usize,
}

impl EntityAligner {
    /// Create an aligner with the default overlap floor
    pub fn new() -> Self {
        Self {
            min_substring_overlap: DEFAULT_MIN_SUBSTRING_OVERLAP,
        }
    }

    /// Set the minimum substring overlap
    pub fn with_min_overlap(mut self, min_substring_overlap: usize) -> Self {
        self.min_substring_overlap = min_substring_overlap;
        self
    }

    pub fn min_substring_overlap(&self) -> usize {
        self.min_substring_overlap
    }

    /// Align predicted entities to gold clusters.
    ///
    /// Entity types are ignored; only names are compared. Entities that
    /// match nothing are simply absent from the result.
    pub fn align(&self, predicted: &[PredictedEntity], vertex_set: &VertexSet) -> Alignment {
        let mut alignment = Alignment::new();
        let mut used: HashSet<usize> = HashSet::new();

        let normalized: Vec<Vec<String>> = vertex_set
            .iter()
            .map(|mentions| mentions.iter().map(|m| normalize(&m.name)).collect())
            .collect();
        let predicted_normalized: Vec<String> =
            predicted.iter().map(|e| normalize(&e.name)).collect();

        // Pass 1: exact
        assign_first_match(
            predicted,
            &mut alignment,
            &mut used,
            vertex_set.len(),
            MatchKind::Exact,
            |pos, idx| vertex_set[idx].iter().any(|m| m.name == predicted[pos].name),
        );

        // Pass 2: normalized
        assign_first_match(
            predicted,
            &mut alignment,
            &mut used,
            vertex_set.len(),
            MatchKind::Normalized,
            |pos, idx| normalized[idx].contains(&predicted_normalized[pos]),
        );

        // Pass 3: substring, longest overlap wins
        for (entity, pred) in predicted.iter().zip(&predicted_normalized) {
            if alignment.contains(&entity.id) {
                continue;
            }
            let pred_len = pred.chars().count();

            let mut best: Option<(usize, usize)> = None;
            for (idx, names) in normalized.iter().enumerate() {
                if used.contains(&idx) {
                    continue;
                }
                for name in names {
                    if name.contains(pred.as_str()) || pred.contains(name.as_str()) {
                        let overlap = pred_len.min(name.chars().count());
                        if overlap > best.map_or(0, |(_, o)| o) {
                            best = Some((idx, overlap));
                        }
                    }
                }
            }

            if let Some((idx, overlap)) = best {
                if overlap >= self.min_substring_overlap {
                    alignment.insert(&entity.id, idx, MatchKind::Substring);
                    used.insert(idx);
                }
            }
        }

        tracing::debug!(
            predicted = predicted.len(),
            gold = vertex_set.len(),
            exact = alignment.count_by_kind(MatchKind::Exact),
            normalized = alignment.count_by_kind(MatchKind::Normalized),
            substring = alignment.count_by_kind(MatchKind::Substring),
            "Aligned entities"
        );

        alignment
    }
}

impl Default for EntityAligner {
    fn default() -> Self {
        Self::new()
    }
}

/// For each unaligned entity, claim the first unused cluster accepted by
/// `matches(entity position, cluster index)`
fn assign_first_match<F>(
    predicted: &[PredictedEntity],
    alignment: &mut Alignment,
    used: &mut HashSet<usize>,
    clusters: usize,
    kind: MatchKind,
    matches: F,
) where
    F: Fn(usize, usize) -> bool,
{
    for (pos, entity) in predicted.iter().enumerate() {
        if alignment.contains(&entity.id) {
            continue;
        }
        let hit = (0..clusters).find(|idx| !used.contains(idx) && matches(pos, *idx));
        if let Some(idx) = hit {
            alignment.insert(&entity.id, idx, kind);
            used.insert(idx);
        }
    }
}

/// Align with the default aligner
pub fn align_entities(predicted: &[PredictedEntity], vertex_set: &VertexSet) -> Alignment {
    EntityAligner::new().align(predicted, vertex_set)
}

// ============================================================================
// Tests
// ============================================================================
