use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{FieldType, ModelSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Model,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMeta {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    pub primary: bool,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMeta {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

/// Field and index metadata of one model or collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelType {
    pub name: String,
    pub kind: ModelKind,
    pub fields: Vec<FieldMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl ModelType {
    pub fn from_spec(spec: &ModelSpec, kind: ModelKind) -> Self {
        let fields = spec
            .fields
            .iter()
            .map(|f| FieldMeta {
                name: f.name.clone(),
                field_type: FieldType::parse(&f.field_type),
                required: f.required,
                unique: f.unique,
                primary: f.primary,
                default: f.default.clone(),
            })
            .collect();

        let indexes = spec
            .indexes
            .iter()
            .map(|i| IndexMeta {
                name: i
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}_idx", spec.name, i.fields.join("_"))),
                fields: i.fields.clone(),
                unique: i.unique,
            })
            .collect();

        Self {
            name: spec.name.clone(),
            kind,
            fields,
            indexes,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.primary)
    }

    /// Required fields without a default that are absent or null in `record`
    pub fn missing_required(&self, record: &Value) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required && f.default.is_none() && !f.primary)
            .filter(|f| record.get(&f.name).map_or(true, Value::is_null))
            .map(|f| f.name.clone())
            .collect()
    }
}

/// Model and collection types by name
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, ModelType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ModelType) {
        if self.types.contains_key(&model.name) {
            log::warn!("Type '{}' declared more than once, keeping the last declaration", model.name);
        }
        self.types.insert(model.name.clone(), model);
    }

    pub fn get(&self, name: &str) -> Option<&ModelType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldSpec, IndexSpec};
    use serde_json::json;

    fn users_spec() -> ModelSpec {
        let mut email = FieldSpec::new("email", "string").required();
        email.unique = true;
        let mut active = FieldSpec::new("active", "bool").required();
        active.default = Some(json!(true));

        ModelSpec {
            name: "users".into(),
            fields: vec![
                FieldSpec::new("id", "uuid").primary(),
                FieldSpec::new("name", "string").required(),
                email,
                active,
                FieldSpec::new("team", "Team"),
            ],
            indexes: vec![IndexSpec {
                name: None,
                fields: vec!["email".into()],
                unique: true,
            }],
        }
    }

    #[test]
    fn test_model_type_from_spec() {
        let model = ModelType::from_spec(&users_spec(), ModelKind::Model);

        assert_eq!(model.primary_key().map(|f| f.name.as_str()), Some("id"));
        assert_eq!(model.field("team").unwrap().field_type, FieldType::Ref("Team".into()));
        assert!(model.field("email").unwrap().unique);
        assert_eq!(model.indexes[0].name, "users_email_idx");
    }

    #[test]
    fn test_missing_required() {
        let model = ModelType::from_spec(&users_spec(), ModelKind::Model);

        let missing = model.missing_required(&json!({"name": "Ada"}));
        assert_eq!(missing, vec!["email".to_string()]);

        let missing = model.missing_required(&json!({"name": null, "email": "a@b.c"}));
        assert_eq!(missing, vec!["name".to_string()]);

        assert!(model
            .missing_required(&json!({"name": "Ada", "email": "a@b.c"}))
            .is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = TypeRegistry::new();
        registry.register(ModelType::from_spec(&users_spec(), ModelKind::Model));
        registry.register(ModelType::from_spec(
            &ModelSpec {
                name: "audit".into(),
                fields: vec![],
                indexes: vec![],
            },
            ModelKind::Collection,
        ));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["audit", "users"]);
        assert_eq!(registry.get("audit").unwrap().kind, ModelKind::Collection);
        assert!(registry.get("orders").is_none());
    }
}
