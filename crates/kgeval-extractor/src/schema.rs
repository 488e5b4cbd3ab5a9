//! Response schemas and relation groups

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use kgeval_core::{ExtractionOutput, KgError, Result};

/// Entity type tags used by JacRED
pub const ENTITY_TYPES: [&str; 8] = ["PER", "ORG", "LOC", "ART", "DAT", "TIM", "MON", "%"];

/// JSON schema for an extraction response
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "type": { "type": "string", "enum": ENTITY_TYPES },
                    },
                    "required": ["id", "name", "type"],
                },
            },
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "head": { "type": "string" },
                        "relation": { "type": "string" },
                        "tail": { "type": "string" },
                        "evidence": { "type": "string" },
                    },
                    "required": ["head", "relation", "tail", "evidence"],
                },
            },
        },
        "required": ["entities", "relations"],
    })
}

/// JSON schema for a verification response
pub fn verification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "decisions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "candidate_index": { "type": "integer" },
                        "keep": { "type": "boolean" },
                    },
                    "required": ["candidate_index", "keep"],
                },
            },
        },
        "required": ["decisions"],
    })
}

// ============================================================================
// Verification Output
// ============================================================================

/// Keep/drop decision for one candidate, indexed within its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub candidate_index: usize,
    pub keep: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutput {
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl VerificationOutput {
    /// Decision for a candidate; missing decisions keep the candidate and
    /// a repeated index takes its last decision
    pub fn keeps(&self, candidate_index: usize) -> bool {
        self.decisions
            .iter()
            .rev()
            .find(|d| d.candidate_index == candidate_index)
            .map_or(true, |d| d.keep)
    }
}

pub fn parse_extraction(value: Value) -> Result<ExtractionOutput> {
    serde_json::from_value(value)
        .map_err(|e| KgError::ParseError(format!("extraction response: {e}")))
}

pub fn parse_verification(value: Value) -> Result<VerificationOutput> {
    serde_json::from_value(value)
        .map_err(|e| KgError::ParseError(format!("verification response: {e}")))
}

// ============================================================================
// Relation Groups
// ============================================================================

/// A named subset of relation codes targeted by one extraction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationGroup {
    pub name: &'static str,
    pub relations: &'static [&'static str],
}

impl RelationGroup {
    pub fn contains(&self, relation: &str) -> bool {
        self.relations.iter().any(|code| *code == relation)
    }
}

pub static RELATION_GROUPS: [RelationGroup; 5] = [
    RelationGroup {
        name: "biographical",
        relations: &["P569", "P570", "P19", "P20", "P27", "P69", "P108", "P937"],
    },
    RelationGroup {
        name: "family_social",
        relations: &["P40", "P3373", "P26"],
    },
    RelationGroup {
        name: "geographic",
        relations: &["P131", "P276", "P1376", "P36", "P361", "P527"],
    },
    RelationGroup {
        name: "organizational",
        relations: &["P463", "P6", "P112", "P127", "P137", "P1830", "P121", "P166"],
    },
    RelationGroup {
        name: "creative_media",
        relations: &[
            "P170", "P175", "P123", "P1441", "P400", "P674", "P155", "P156", "P1344", "P710",
        ],
    },
];

/// Look up a relation group by name
pub fn relation_group(name: &str) -> Option<&'static RelationGroup> {
    RELATION_GROUPS.iter().find(|g| g.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_groups_are_disjoint() {
        let mut seen = HashSet::new();
        for group in &RELATION_GROUPS {
            for code in group.relations {
                assert!(seen.insert(*code), "{code} appears in two groups");
            }
        }
        assert_eq!(seen.len(), 35);
    }

    #[test]
    fn test_relation_group_lookup() {
        let group = relation_group("family_social").unwrap();
        assert!(group.contains("P26"));
        assert!(!group.contains("P19"));
        assert!(relation_group("unknown").is_none());
    }

    #[test]
    fn test_extraction_schema_entity_types() {
        let schema = extraction_schema();
        let types = &schema["properties"]["entities"]["items"]["properties"]["type"]["enum"];
        assert_eq!(types.as_array().unwrap().len(), 8);
        assert_eq!(schema["required"], json!(["entities", "relations"]));
    }

    #[test]
    fn test_missing_decision_keeps() {
        let output = parse_verification(json!({
            "decisions": [
                { "candidate_index": 0, "keep": false },
                { "candidate_index": 2, "keep": true },
            ]
        }))
        .unwrap();

        assert!(!output.keeps(0));
        assert!(output.keeps(1));
        assert!(output.keeps(2));
    }

    #[test]
    fn test_parse_extraction_rejects_bad_shape() {
        let err = parse_extraction(json!({ "entities": "none" })).unwrap_err();
        assert!(matches!(err, KgError::ParseError(_)));
    }

    #[test]
    fn test_parse_extraction_defaults_missing_lists() {
        let output = parse_extraction(json!({})).unwrap();
        assert!(output.entities.is_empty());
        assert!(output.relations.is_empty());
    }
}
