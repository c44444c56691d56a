//! Search Query Builder
//!
//! Conjunctive tag predicates rendered into RediSearch query syntax.

use crate::domain::instance::{InstanceType, WorldInstance};
use std::fmt;

// =============================================================================
// Tag Fields
// =============================================================================

/// Indexed tag fields of an instance document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagField {
    WorldId,
    InstanceType,
    OverCapacity,
    ShortName,
    SecureName,
    Players,
}

impl TagField {
    pub const ALL: [TagField; 6] = [
        TagField::ShortName,
        TagField::SecureName,
        TagField::WorldId,
        TagField::InstanceType,
        TagField::OverCapacity,
        TagField::Players,
    ];

    /// Attribute name in the index
    pub fn attribute(&self) -> &'static str {
        match self {
            TagField::WorldId => "worldId",
            TagField::InstanceType => "instanceType",
            TagField::OverCapacity => "overCapacity",
            TagField::ShortName => "shortName",
            TagField::SecureName => "secureName",
            TagField::Players => "players",
        }
    }

    /// JSONPath of the indexed value inside the document
    pub fn json_path(&self) -> &'static str {
        match self {
            TagField::WorldId => "$.worldId",
            TagField::InstanceType => "$.instanceType",
            TagField::OverCapacity => "$.overCapacity",
            TagField::ShortName => "$.shortName",
            TagField::SecureName => "$.secureName",
            TagField::Players => "$.players[*]",
        }
    }
}

// =============================================================================
// Query
// =============================================================================

/// One `@field:{value}` predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPredicate {
    pub field: TagField,
    pub value: String,
}

/// Conjunction of tag predicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    predicates: Vec<TagPredicate>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate
    pub fn tag(mut self, field: TagField, value: impl Into<String>) -> Self {
        self.predicates.push(TagPredicate {
            field,
            value: value.into(),
        });
        self
    }

    pub fn world_id(self, world_id: &str) -> Self {
        self.tag(TagField::WorldId, world_id)
    }

    pub fn instance_type(self, instance_type: InstanceType) -> Self {
        self.tag(TagField::InstanceType, instance_type.as_str())
    }

    pub fn over_capacity(self, over: bool) -> Self {
        self.tag(TagField::OverCapacity, over.to_string())
    }

    pub fn short_name(self, name: &str) -> Self {
        self.tag(TagField::ShortName, name)
    }

    pub fn secure_name(self, name: &str) -> Self {
        self.tag(TagField::SecureName, name)
    }

    pub fn player(self, player_id: &str) -> Self {
        self.tag(TagField::Players, player_id)
    }

    pub fn predicates(&self) -> &[TagPredicate] {
        &self.predicates
    }

    /// Render into RediSearch dialect; every value is tag-escaped
    pub fn to_query_string(&self) -> String {
        if self.predicates.is_empty() {
            return "*".to_string();
        }

        self.predicates
            .iter()
            .map(|p| format!("@{}:{{{}}}", p.field.attribute(), escape_tag_value(&p.value)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Evaluate the query against a document (exact tag match)
    pub fn matches(&self, instance: &WorldInstance) -> bool {
        self.predicates.iter().all(|p| match p.field {
            TagField::WorldId => instance.world_id == p.value,
            TagField::InstanceType => instance.instance_type.as_str() == p.value,
            TagField::OverCapacity => instance.over_capacity.to_string() == p.value,
            TagField::ShortName => instance.short_name == p.value,
            TagField::SecureName => instance.secure_name == p.value,
            TagField::Players => instance.is_member(&p.value),
        })
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

/// Escape a value for use inside a `{...}` tag clause.
///
/// Punctuation and whitespace are tokenizer separators or query operators
/// and must be backslash-escaped to be matched literally.
pub fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if (c.is_ascii_punctuation() && c != '_') || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
