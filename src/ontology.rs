//! Closed ontology for the knowledge graph
//!
//! Entity and relationship types form closed sets; anything the extraction
//! model produces outside these sets is discarded during validation.

use serde::{Deserialize, Serialize};

/// Entity types the extractor is allowed to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Person,
    Topic,
    ResearchMethod,
    Paper,
    Concept,
    Organization,
    Dataset,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Person,
        EntityKind::Topic,
        EntityKind::ResearchMethod,
        EntityKind::Paper,
        EntityKind::Concept,
        EntityKind::Organization,
        EntityKind::Dataset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "PERSON",
            EntityKind::Topic => "TOPIC",
            EntityKind::ResearchMethod => "RESEARCH_METHOD",
            EntityKind::Paper => "PAPER",
            EntityKind::Concept => "CONCEPT",
            EntityKind::Organization => "ORGANIZATION",
            EntityKind::Dataset => "DATASET",
        }
    }

    /// Parse a type name, tolerating case and surrounding whitespace
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
    }
}

/// Relationship types the extractor is allowed to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Authored,
    AffiliatedWith,
    Cites,
    About,
    Studies,
    UsesMethod,
    UsesDataset,
    BasedOn,
    Extends,
    Contradicts,
    Proposes,
    RelatedTo,
}

impl RelationKind {
    pub const ALL: [RelationKind; 12] = [
        RelationKind::Authored,
        RelationKind::AffiliatedWith,
        RelationKind::Cites,
        RelationKind::About,
        RelationKind::Studies,
        RelationKind::UsesMethod,
        RelationKind::UsesDataset,
        RelationKind::BasedOn,
        RelationKind::Extends,
        RelationKind::Contradicts,
        RelationKind::Proposes,
        RelationKind::RelatedTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Authored => "AUTHORED",
            RelationKind::AffiliatedWith => "AFFILIATED_WITH",
            RelationKind::Cites => "CITES",
            RelationKind::About => "ABOUT",
            RelationKind::Studies => "STUDIES",
            RelationKind::UsesMethod => "USES_METHOD",
            RelationKind::UsesDataset => "USES_DATASET",
            RelationKind::BasedOn => "BASED_ON",
            RelationKind::Extends => "EXTENDS",
            RelationKind::Contradicts => "CONTRADICTS",
            RelationKind::Proposes => "PROPOSES",
            RelationKind::RelatedTo => "RELATED_TO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
    }

    /// Fixed ranking weight used as a tie-breaker in graph expansion
    pub fn type_weight(&self) -> f64 {
        match self {
            RelationKind::Cites => 2.0,
            RelationKind::Authored => 1.8,
            RelationKind::Proposes => 1.5,
            RelationKind::Extends => 1.3,
            RelationKind::BasedOn => 1.3,
            RelationKind::UsesMethod => 1.2,
            RelationKind::UsesDataset => 1.2,
            RelationKind::Studies => 1.1,
            RelationKind::About => 1.1,
            RelationKind::Contradicts => 1.0,
            RelationKind::RelatedTo => 0.8,
            RelationKind::AffiliatedWith => 0.7,
        }
    }

    /// Whether this relationship admits the given endpoint types
    pub fn permits(&self, source: EntityKind, target: EntityKind) -> bool {
        use EntityKind::*;
        match self {
            RelationKind::Authored => source == Person && target == Paper,
            RelationKind::AffiliatedWith => source == Person && target == Organization,
            RelationKind::Cites => source == Paper && target == Paper,
            RelationKind::About => {
                source == Paper && matches!(target, Topic | Concept)
            }
            RelationKind::Studies => {
                matches!(source, Person | Paper)
                    && matches!(target, Topic | Concept | Person | ResearchMethod | Dataset)
            }
            RelationKind::UsesMethod => {
                matches!(source, Person | Paper) && target == ResearchMethod
            }
            RelationKind::UsesDataset => matches!(source, Person | Paper) && target == Dataset,
            RelationKind::BasedOn | RelationKind::Extends => {
                matches!(source, Paper | Concept | ResearchMethod)
                    && matches!(target, Paper | Concept | ResearchMethod)
            }
            RelationKind::Contradicts => {
                matches!(source, Paper | Concept | Person)
                    && matches!(target, Paper | Concept | Person)
            }
            RelationKind::Proposes => {
                matches!(source, Person | Paper)
                    && matches!(target, Concept | ResearchMethod | Topic)
            }
            RelationKind::RelatedTo => true,
        }
    }
}

/// Ranking weight for a relationship type name as stored in the database.
/// Unknown names default to 1.0.
pub fn type_weight_of(type_name: &str) -> f64 {
    RelationKind::parse(type_name)
        .map(|k| k.type_weight())
        .unwrap_or(1.0)
}
