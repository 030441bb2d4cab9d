use jsonschema::error::ValidationErrorKind;
use jsonschema::{validator_for, ValidationError};
use serde_json::Value;

use crate::error::{FieldError, McpError};

#[derive(Debug, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("Schema parse error: {0}")]
    SchemaParse(#[from] serde_json::Error),
    #[error("Schema compile error: {0}")]
    SchemaCompile(String),
    #[error("Instance validation failed: {0:?}")]
    ValidationFailed(Vec<String>),
}

/// Validate a JSON instance against a JSON Schema (draft 2020-12).
/// Both arguments are JSON text.
pub fn validate_json(schema_str: &str, instance_str: &str) -> Result<(), SchemaValidationError> {
    let schema_json: Value = serde_json::from_str(schema_str)?;
    let instance_json: Value = serde_json::from_str(instance_str)?;
    validate_value(&schema_json, &instance_json)
}

/// Validate an already-parsed instance, collecting every violation.
pub fn validate_value(schema: &Value, instance: &Value) -> Result<(), SchemaValidationError> {
    let validator =
        validator_for(schema).map_err(|e| SchemaValidationError::SchemaCompile(e.to_string()))?;

    if validator.is_valid(instance) {
        return Ok(());
    }
    let errors = validator.iter_errors(instance).map(|e| e.to_string()).collect();
    Err(SchemaValidationError::ValidationFailed(errors))
}

/// Check request params against `schema`, reporting violations as a
/// validation fault with one field error per violation. Each field is a JSON
/// pointer into the params (`/uri`, `/options/depth`); violations of the
/// params object as a whole are reported under `params`.
///
/// Absent params are checked as `{}`.
pub fn validate_params(method: &str, schema: &Value, params: Option<&Value>) -> Result<(), McpError> {
    let empty = Value::Object(Default::default());
    let instance = params.unwrap_or(&empty);
    let validator = validator_for(schema)
        .map_err(|e| McpError::internal(format!("schema for {method} is unusable: {e}")))?;

    let mut field_errors: Vec<FieldError> = validator
        .iter_errors(instance)
        .map(|e| FieldError::new(field_path(&e), e.to_string()))
        .collect();
    if field_errors.is_empty() {
        return Ok(());
    }
    field_errors.sort_by(|a, b| a.field.cmp(&b.field));
    Err(McpError::validation(format!("invalid params for {method}"), field_errors))
}

/// A missing required property is reported at its own path, not its parent's.
fn field_path(error: &ValidationError<'_>) -> String {
    let path = error.instance_path().as_str();
    match error.kind() {
        ValidationErrorKind::Required {
            property: Value::String(name),
        } => format!("{path}/{name}"),
        _ if path.is_empty() => "params".to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uri_schema() -> Value {
        json!({
            "type": "object",
            "required": ["uri"],
            "properties": { "uri": { "type": "string" } }
        })
    }

    #[test]
    fn accepts_conforming_params() {
        let params = json!({ "uri": "file:///a" });
        assert!(validate_params("resources/subscribe", &uri_schema(), Some(&params)).is_ok());
    }

    #[test]
    fn missing_params_are_checked_as_empty_object() {
        let err = validate_params("resources/subscribe", &uri_schema(), None).unwrap_err();
        match err {
            McpError::Validation { field_errors, .. } => {
                assert_eq!(field_errors.len(), 1);
                assert_eq!(field_errors[0].field, "/uri");
                assert!(field_errors[0].message.contains("uri"));
            }
            other => panic!("expected validation fault, got {other:?}"),
        }
    }

    #[test]
    fn field_errors_point_at_the_offending_field() {
        let schema = json!({
            "type": "object",
            "required": ["uri"],
            "properties": {
                "uri": { "type": "string" },
                "options": { "type": "object" }
            }
        });
        let params = json!({ "uri": 42, "options": 3 });
        let err = validate_params("resources/subscribe", &schema, Some(&params)).unwrap_err();
        let McpError::Validation { field_errors, .. } = err else {
            panic!("expected validation fault");
        };
        let fields: Vec<&str> = field_errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["/options", "/uri"]);
    }

    #[test]
    fn non_object_params_are_reported_as_a_whole() {
        let err = validate_params("resources/subscribe", &uri_schema(), Some(&json!([1]))).unwrap_err();
        let McpError::Validation { field_errors, .. } = err else {
            panic!("expected validation fault");
        };
        assert_eq!(field_errors[0].field, "params");
    }

    #[test]
    fn collects_every_violation() {
        let schema = json!({
            "type": "object",
            "required": ["a", "b"]
        });
        let err = validate_value(&schema, &json!({})).unwrap_err();
        match err {
            SchemaValidationError::ValidationFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn text_entry_point_reports_parse_errors() {
        assert!(matches!(
            validate_json("{", "{}"),
            Err(SchemaValidationError::SchemaParse(_))
        ));
    }
}
