use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Logical field type as declared on a model or collection field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    DateTime,
    Uuid,
    Json,
    List(Box<FieldType>),
    /// Reference to another declared model
    Ref(String),
}

impl FieldType {
    /// Parse a declared type name such as `string`, `int?` or `[Tag]`
    pub fn parse(declared: &str) -> Self {
        let declared = declared.trim().trim_end_matches('?');

        if let Some(inner) = declared
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return FieldType::List(Box::new(FieldType::parse(inner)));
        }

        match declared.to_ascii_lowercase().as_str() {
            "string" | "text" | "email" | "url" => FieldType::String,
            "int" | "integer" | "i32" | "i64" => FieldType::Int,
            "float" | "number" | "decimal" | "f64" => FieldType::Float,
            "bool" | "boolean" => FieldType::Bool,
            "datetime" | "timestamp" | "date" => FieldType::DateTime,
            "uuid" | "id" => FieldType::Uuid,
            "json" | "object" | "map" => FieldType::Json,
            _ => FieldType::Ref(declared.to_string()),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Ref(_))
    }
}

/// Where an endpoint reads its request payload from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    #[default]
    Body,
    Query,
    Path,
    Header,
}
