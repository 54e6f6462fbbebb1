//! Schema descriptors for extraction targets.
//!
//! A [`SchemaDescriptor`] is an explicit, immutable list of target fields.
//! It is built once by the caller (by hand, from a JSON file, or derived
//! from a `schemars::JsonSchema` type) and passed by reference into every
//! scrape. The descriptor is also the trust boundary for model output:
//! [`SchemaDescriptor::validate`] type-checks, coerces and measures the
//! completeness of whatever JSON the model produced.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::SchemaError;

/// Semantic type of a field.
///
/// Serialized as a compact type expression: `string`, `int`, `float`,
/// `bool`, `object`, `any`, `list<T>` (bare `list` means `list<any>`) and
/// `optional<T>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    List(Box<FieldType>),
    Object,
    /// Null is an accepted value.
    Optional(Box<FieldType>),
    /// Any JSON value.
    Any,
}

impl FieldType {
    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    /// JSON Schema fragment used in prompts.
    pub fn to_json_schema(&self) -> Value {
        match self {
            FieldType::String => json!({ "type": "string" }),
            FieldType::Int => json!({ "type": "integer" }),
            FieldType::Float => json!({ "type": "number" }),
            FieldType::Bool => json!({ "type": "boolean" }),
            FieldType::Object => json!({ "type": "object" }),
            FieldType::Any => json!({}),
            FieldType::List(inner) => json!({ "type": "array", "items": inner.to_json_schema() }),
            FieldType::Optional(inner) => {
                json!({ "anyOf": [inner.to_json_schema(), { "type": "null" }] })
            }
        }
    }

    /// Check `value` against this type, applying lax coercions.
    ///
    /// Accepted coercions: integral floats and numeric strings to `int`,
    /// numeric strings to `float`, `"true"`/`"false"`/`0`/`1` to `bool`,
    /// numbers and booleans to `string`.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (FieldType::Any, v) => Ok(v.clone()),
            (FieldType::Optional(_), Value::Null) => Ok(Value::Null),
            (FieldType::Optional(inner), v) => inner.coerce(v),
            (_, Value::Null) => Err("null is not allowed".to_string()),

            (FieldType::String, Value::String(_)) => Ok(value.clone()),
            (FieldType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (FieldType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

            (FieldType::Int, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Ok(value.clone())
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.is_finite() => Ok(json!(f as i64)),
                        _ => Err(format!("expected integer, got {}", n)),
                    }
                }
            }
            (FieldType::Int, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .map_err(|_| format!("expected integer, got {:?}", s)),

            (FieldType::Float, Value::Number(_)) => Ok(value.clone()),
            (FieldType::Float, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(json!(f)),
                _ => Err(format!("expected number, got {:?}", s)),
            },

            (FieldType::Bool, Value::Bool(_)) => Ok(value.clone()),
            (FieldType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got {:?}", s)),
            },
            (FieldType::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("expected boolean, got {}", n)),
            },

            (FieldType::List(inner), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| inner.coerce(item).map_err(|e| format!("[{}]: {}", i, e)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),

            (FieldType::Object, Value::Object(_)) => Ok(value.clone()),

            (expected, other) => Err(format!(
                "expected {}, got {}",
                expected,
                json_type_name(other)
            )),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Object => f.write_str("object"),
            FieldType::Any => f.write_str("any"),
            FieldType::List(inner) => write!(f, "list<{}>", inner),
            FieldType::Optional(inner) => write!(f, "optional<{}>", inner),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();

        if let Some(inner) = strip_wrapper(&lower, "list") {
            return Ok(FieldType::list(inner.parse()?));
        }
        if let Some(inner) = strip_wrapper(&lower, "optional") {
            return Ok(FieldType::optional(inner.parse()?));
        }

        match lower.as_str() {
            "string" | "str" => Ok(FieldType::String),
            "int" | "integer" => Ok(FieldType::Int),
            "float" | "number" => Ok(FieldType::Float),
            "bool" | "boolean" => Ok(FieldType::Bool),
            "object" | "dict" => Ok(FieldType::Object),
            "list" | "array" => Ok(FieldType::list(FieldType::Any)),
            "any" => Ok(FieldType::Any),
            other => Err(format!("unknown field type: {}", other)),
        }
    }
}

fn strip_wrapper<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// One target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Extraction guidance, also the keyword source for relevance scoring
    #[serde(default)]
    pub description: String,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    /// A required field.
    pub fn required(
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: description.into(),
            required: true,
        }
    }

    /// An optional field (may be absent or null).
    pub fn optional(
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: description.into(),
            required: false,
        }
    }
}

#[derive(Deserialize)]
struct RawSchema {
    fields: Vec<FieldSpec>,
}

/// Ordered, immutable set of target fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDescriptor {
    fields: Vec<FieldSpec>,
}

impl<'de> Deserialize<'de> for SchemaDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawSchema::deserialize(deserializer)?;
        SchemaDescriptor::new(raw.fields).map_err(serde::de::Error::custom)
    }
}

/// Outcome of checking one model output against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    /// Coerced record with every declared field, present only when valid
    pub record: Option<IndexMap<String, Value>>,

    /// Human-readable reasons the output was rejected
    pub violations: Vec<String>,

    /// Fraction of declared fields present and non-empty
    pub completeness: f32,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.record.is_some()
    }
}

impl SchemaDescriptor {
    /// Build a schema, rejecting empty field lists and duplicate names.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::NoFields);
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(SchemaError::EmptyFieldName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }

        Ok(Self { fields })
    }

    /// Start a builder.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parse a schema from its JSON file form.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Unsupported(e.to_string()))
    }

    /// Derive the field list from a type's JSON schema.
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Self, SchemaError> {
        let root = schemars::schema_for!(T);
        let value =
            serde_json::to_value(&root).map_err(|e| SchemaError::Unsupported(e.to_string()))?;
        Self::from_json_schema(&value)
    }

    /// Derive the field list from a JSON Schema object document.
    ///
    /// Reads `properties`, `required` and per-property `description`.
    /// Nullable unions (`["string", "null"]`, `anyOf [.., null]`) become
    /// [`FieldType::Optional`]; `$ref`s are resolved against `definitions`
    /// or `$defs`.
    pub fn from_json_schema(schema: &Value) -> Result<Self, SchemaError> {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SchemaError::Unsupported("root has no properties".to_string()))?;

        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = properties
            .iter()
            .map(|(name, prop)| FieldSpec {
                name: name.clone(),
                field_type: json_schema_type(prop, schema, 0),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                required: required.contains(name.as_str()),
            })
            .collect();

        Self::new(fields)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false: a schema has at least one field.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// JSON Schema rendering embedded in extraction prompts.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = field.field_type.to_json_schema();
            if let (Value::Object(obj), false) = (&mut prop, field.description.is_empty()) {
                obj.insert("description".to_string(), json!(field.description));
            }
            properties.insert(field.name.clone(), prop);
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate parsed model output.
    ///
    /// A required field that is absent or null invalidates the output,
    /// whatever its declared type; so does any value that cannot be
    /// coerced to its declared type. Absent optional fields are recorded as
    /// null and undeclared keys are dropped. Completeness is computed from
    /// the raw output whether or not it is valid.
    pub fn validate(&self, output: &Value) -> Validation {
        let Some(object) = output.as_object() else {
            return Validation {
                record: None,
                violations: vec![format!("expected a JSON object, got {}", json_type_name(output))],
                completeness: 0.0,
            };
        };

        let mut record = IndexMap::with_capacity(self.fields.len());
        let mut violations = Vec::new();

        for field in &self.fields {
            match object.get(&field.name) {
                None if field.required => {
                    violations.push(format!("missing required field `{}`", field.name));
                }
                None => {
                    record.insert(field.name.clone(), Value::Null);
                }
                Some(Value::Null) if !field.required => {
                    record.insert(field.name.clone(), Value::Null);
                }
                Some(Value::Null) => {
                    violations.push(format!("required field `{}` is null", field.name));
                }
                Some(value) => match field.field_type.coerce(value) {
                    Ok(coerced) => {
                        record.insert(field.name.clone(), coerced);
                    }
                    Err(reason) => {
                        violations.push(format!("field `{}`: {}", field.name, reason));
                    }
                },
            }
        }

        Validation {
            record: violations.is_empty().then_some(record),
            violations,
            completeness: self.completeness(object),
        }
    }

    /// Fraction of declared fields present and non-empty in `object`.
    pub fn completeness(&self, object: &Map<String, Value>) -> f32 {
        let filled = self
            .fields
            .iter()
            .filter(|f| object.get(&f.name).is_some_and(|v| !is_empty_value(v)))
            .count();
        filled as f32 / self.fields.len() as f32
    }

    /// Share of declared fields that are absent or empty in `record`.
    pub fn empty_ratio(&self, record: &IndexMap<String, Value>) -> f32 {
        let empty = self
            .fields
            .iter()
            .filter(|f| record.get(&f.name).map_or(true, is_empty_value))
            .count();
        empty as f32 / self.fields.len() as f32
    }
}

/// Null, blank strings, empty arrays and empty objects count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

const MAX_REF_DEPTH: usize = 8;

fn json_schema_type(prop: &Value, root: &Value, depth: usize) -> FieldType {
    if depth > MAX_REF_DEPTH {
        return FieldType::Any;
    }

    if let Some(reference) = prop.get("$ref").and_then(Value::as_str) {
        return resolve_ref(reference, root)
            .map(|target| json_schema_type(target, root, depth + 1))
            .unwrap_or(FieldType::Object);
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(variants) = prop.get(key).and_then(Value::as_array) {
            let non_null: Vec<&Value> = variants
                .iter()
                .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
                .collect();
            let nullable = non_null.len() < variants.len();
            let inner = match non_null.as_slice() {
                [single] => json_schema_type(single, root, depth + 1),
                _ => FieldType::Any,
            };
            return if nullable { FieldType::optional(inner) } else { inner };
        }
    }

    if let Some([single]) = prop.get("allOf").and_then(Value::as_array).map(Vec::as_slice) {
        return json_schema_type(single, root, depth + 1);
    }

    match prop.get("type") {
        Some(Value::String(t)) => primitive_type(t, prop, root, depth),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            let inner = match names
                .iter()
                .filter(|t| **t != "null")
                .collect::<Vec<_>>()
                .as_slice()
            {
                [single] => primitive_type(single, prop, root, depth),
                _ => FieldType::Any,
            };
            if nullable {
                FieldType::optional(inner)
            } else {
                inner
            }
        }
        _ if prop.get("enum").is_some() => FieldType::String,
        _ => FieldType::Any,
    }
}

fn primitive_type(name: &str, prop: &Value, root: &Value, depth: usize) -> FieldType {
    match name {
        "string" => FieldType::String,
        "integer" => FieldType::Int,
        "number" => FieldType::Float,
        "boolean" => FieldType::Bool,
        "object" => FieldType::Object,
        "array" => FieldType::list(
            prop.get("items")
                .map(|items| json_schema_type(items, root, depth + 1))
                .unwrap_or(FieldType::Any),
        ),
        _ => FieldType::Any,
    }
}

fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Option<&'a Value> {
    let name = reference
        .strip_prefix("#/definitions/")
        .or_else(|| reference.strip_prefix("#/$defs/"))?;
    root.get("definitions")
        .and_then(|d| d.get(name))
        .or_else(|| root.get("$defs").and_then(|d| d.get(name)))
}

/// Builder for [`SchemaDescriptor`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldSpec>,
}

impl SchemaBuilder {
    /// Add a field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a required field.
    pub fn required(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.field(FieldSpec::required(name, field_type, description))
    }

    /// Add an optional field.
    pub fn optional(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.field(FieldSpec::optional(name, field_type, description))
    }

    pub fn build(self) -> Result<SchemaDescriptor, SchemaError> {
        SchemaDescriptor::new(self.fields)
    }
}
