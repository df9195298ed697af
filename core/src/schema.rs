//! Schema packs and the effective-schema merge
//!
//! A schema pack is an installable bundle of object and relationship type
//! schemas plus optional extraction prompt templates. A project's effective
//! schema is the merge of all of its active packs: later packs override
//! earlier ones per type, and each merged type records the pack names that
//! contributed to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// JSON-schema-shaped definition of an object type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectTypeSchema {
    /// What this type represents
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the type's properties
    #[serde(default)]
    pub properties: Value,
    /// Required property names
    #[serde(default)]
    pub required: Vec<String>,
    /// Example instances shown to the LLM
    #[serde(default)]
    pub examples: Vec<Value>,
}

/// Definition of a relationship type with its allowed endpoint types
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipTypeSchema {
    /// What this relationship represents
    #[serde(default)]
    pub description: String,
    /// Allowed source object types; empty means unrestricted
    #[serde(default)]
    pub source_types: Vec<String>,
    /// Allowed target object types; empty means unrestricted
    #[serde(default)]
    pub target_types: Vec<String>,
}

/// An installable extraction schema bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaPack {
    /// Pack name; also the `_sources` entry for contributed types
    pub name: String,
    /// Pack version
    pub version: String,
    /// Whether the pack participates in the effective schema
    pub active: bool,
    /// Object type schemas keyed by type name
    #[serde(default)]
    pub object_schemas: BTreeMap<String, ObjectTypeSchema>,
    /// Relationship type schemas keyed by type name
    #[serde(default)]
    pub relationship_schemas: BTreeMap<String, RelationshipTypeSchema>,
    /// Named extraction prompt templates
    #[serde(default)]
    pub extraction_prompts: BTreeMap<String, String>,
    /// Which prompt template to use when none is requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_prompt_key: Option<String>,
}

impl SchemaPack {
    /// Create an empty active pack
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            active: true,
            object_schemas: BTreeMap::new(),
            relationship_schemas: BTreeMap::new(),
            extraction_prompts: BTreeMap::new(),
            default_prompt_key: None,
        }
    }

    /// Add an object type schema
    pub fn with_object_schema(
        mut self,
        type_name: impl Into<String>,
        schema: ObjectTypeSchema,
    ) -> Self {
        self.object_schemas.insert(type_name.into(), schema);
        self
    }

    /// Add a relationship type schema
    pub fn with_relationship_schema(
        mut self,
        type_name: impl Into<String>,
        schema: RelationshipTypeSchema,
    ) -> Self {
        self.relationship_schemas.insert(type_name.into(), schema);
        self
    }

    /// Add a named extraction prompt
    pub fn with_prompt(mut self, key: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.extraction_prompts.insert(key.into(), prompt.into());
        self
    }
}

/// An object type schema with the packs that contributed to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedObjectSchema {
    #[serde(flatten)]
    pub schema: ObjectTypeSchema,
    /// Contributing pack names, in merge order
    #[serde(rename = "_sources")]
    pub sources: Vec<String>,
}

/// A relationship type schema with the packs that contributed to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedRelationshipSchema {
    #[serde(flatten)]
    pub schema: RelationshipTypeSchema,
    /// Contributing pack names, in merge order
    #[serde(rename = "_sources")]
    pub sources: Vec<String>,
}

/// The merge of all active schema packs for a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectiveSchema {
    /// Merged object type schemas
    pub object_schemas: BTreeMap<String, MergedObjectSchema>,
    /// Merged relationship type schemas
    pub relationship_schemas: BTreeMap<String, MergedRelationshipSchema>,
    /// Merged prompt templates; later packs override per key
    pub extraction_prompts: BTreeMap<String, String>,
    /// Default prompt key from the last pack that set one
    pub default_prompt_key: Option<String>,
}

impl EffectiveSchema {
    /// Merge active packs in order. Per type, the later pack's fields
    /// overwrite the earlier's; `_sources` accumulates pack names.
    pub fn merge(packs: &[SchemaPack]) -> Self {
        let mut merged = EffectiveSchema::default();
        for pack in packs.iter().filter(|p| p.active) {
            for (type_name, schema) in &pack.object_schemas {
                match merged.object_schemas.get_mut(type_name) {
                    Some(existing) => {
                        existing.schema = schema.clone();
                        if !existing.sources.contains(&pack.name) {
                            existing.sources.push(pack.name.clone());
                        }
                    }
                    None => {
                        merged.object_schemas.insert(
                            type_name.clone(),
                            MergedObjectSchema {
                                schema: schema.clone(),
                                sources: vec![pack.name.clone()],
                            },
                        );
                    }
                }
            }
            for (type_name, schema) in &pack.relationship_schemas {
                match merged.relationship_schemas.get_mut(type_name) {
                    Some(existing) => {
                        existing.schema = schema.clone();
                        if !existing.sources.contains(&pack.name) {
                            existing.sources.push(pack.name.clone());
                        }
                    }
                    None => {
                        merged.relationship_schemas.insert(
                            type_name.clone(),
                            MergedRelationshipSchema {
                                schema: schema.clone(),
                                sources: vec![pack.name.clone()],
                            },
                        );
                    }
                }
            }
            for (key, prompt) in &pack.extraction_prompts {
                merged.extraction_prompts.insert(key.clone(), prompt.clone());
            }
            if pack.default_prompt_key.is_some() {
                merged.default_prompt_key = pack.default_prompt_key.clone();
            }
        }
        merged
    }

    /// Whether any object schemas are available for extraction
    pub fn has_object_schemas(&self) -> bool {
        !self.object_schemas.is_empty()
    }

    /// The type names of the merged object schemas
    pub fn object_type_names(&self) -> Vec<String> {
        self.object_schemas.keys().cloned().collect()
    }

    /// Look up a relationship schema by type name
    pub fn relationship_schema(&self, type_name: &str) -> Option<&MergedRelationshipSchema> {
        self.relationship_schemas.get(type_name)
    }

    /// The default prompt template, resolved through `default_prompt_key`
    pub fn default_prompt(&self) -> Option<&str> {
        self.default_prompt_key
            .as_deref()
            .and_then(|key| self.extraction_prompts.get(key))
            .map(String::as_str)
    }
}
