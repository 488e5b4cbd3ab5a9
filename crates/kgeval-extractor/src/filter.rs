//! Post-extraction triple filters

use std::collections::HashSet;

use kgeval_core::{ConstraintTable, Triple};

/// Keep triples whose relation code is known
pub fn filter_invalid_labels(
    triples: Vec<Triple>,
    valid_relations: &HashSet<String>,
) -> Vec<Triple> {
    let before = triples.len();
    let kept: Vec<Triple> = triples
        .into_iter()
        .filter(|t| valid_relations.contains(&t.relation))
        .collect();

    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), "Filtered unknown relation codes");
    }
    kept
}

/// Keep triples whose head and tail types are both valid
pub fn filter_invalid_entity_types(
    triples: Vec<Triple>,
    valid_types: &HashSet<String>,
) -> Vec<Triple> {
    let before = triples.len();
    let kept: Vec<Triple> = triples
        .into_iter()
        .filter(|t| valid_types.contains(&t.head_type) && valid_types.contains(&t.tail_type))
        .collect();

    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), "Filtered invalid entity types");
    }
    kept
}

/// Drop triples whose type pair was never observed for their relation.
///
/// Relations missing from the table are kept.
pub fn apply_domain_range_constraints(
    triples: Vec<Triple>,
    constraints: &ConstraintTable,
) -> Vec<Triple> {
    let before = triples.len();
    let kept: Vec<Triple> = triples
        .into_iter()
        .filter(|t| {
            constraints
                .allows(&t.relation, &t.head_type, &t.tail_type)
                .unwrap_or(true)
        })
        .collect();

    if kept.len() < before {
        tracing::debug!(
            dropped = before - kept.len(),
            "Filtered by domain/range constraints"
        );
    }
    kept
}
