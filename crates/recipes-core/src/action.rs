use crate::error::{RecipeError, Result};
use crate::paths;
use crate::signing::{self, Signature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Executable code a recipe refers to by name.
///
/// An action is never edited in place: registering a different implementation
/// under the same name produces a fresh record with its own hash and no
/// signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub implementation: String,
    pub implementation_hash: String,
    #[serde(default = "empty_schema")]
    pub arguments_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    pub created_at: DateTime<Utc>,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({})
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        implementation: impl Into<String>,
        arguments_schema: serde_json::Value,
    ) -> Result<Self> {
        let name = name.into();
        paths::validate_action_name(&name)?;
        compile_schema(&arguments_schema)?;
        let implementation = implementation.into();
        Ok(Self {
            implementation_hash: hash_implementation(&implementation),
            name,
            implementation,
            arguments_schema,
            signature: None,
            created_at: Utc::now(),
        })
    }

    /// Bytes covered by the action's signature.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        signing::canonical_json(&serde_json::json!({
            "name": self.name,
            "implementation_hash": self.implementation_hash,
            "arguments_schema": self.arguments_schema,
        }))
    }

    /// The stored signature, if it verifies against the action as it is now.
    pub fn current_signature(&self) -> Option<&Signature> {
        self.signature
            .as_ref()
            .filter(|s| s.verify(&self.canonical_bytes()))
    }

    /// Same code and schema, i.e. re-registering would be a no-op.
    pub fn same_content(&self, other: &Action) -> bool {
        self.implementation_hash == other.implementation_hash
            && self.arguments_schema == other.arguments_schema
    }

    /// Check recipe arguments against the action's JSON Schema. The error
    /// names the first offending argument, e.g. `arguments.surveyId`.
    pub fn validate_arguments(&self, arguments: &serde_json::Value) -> Result<()> {
        if !arguments.is_object() {
            return Err(RecipeError::validation("arguments", "must be a JSON object"));
        }
        let validator = compile_schema(&self.arguments_schema)?;
        let mut field = None;
        let mut messages = Vec::new();
        for error in validator.iter_errors(arguments) {
            if field.is_none() {
                field = Some(argument_field(&error.instance_path.to_string()));
            }
            messages.push(error.to_string());
        }
        match field {
            None => Ok(()),
            Some(field) => Err(RecipeError::validation(
                field,
                format!(
                    "does not match the schema of action '{}': {}",
                    self.name,
                    messages.join("; ")
                ),
            )),
        }
    }

    /// Where the implementation is served under the API prefix `api_root`,
    /// e.g. `/api/v1`.
    pub fn implementation_url(&self, api_root: &str) -> String {
        format!(
            "{}/action/{}/implementation/{}/",
            api_root.trim_end_matches('/'),
            self.name,
            self.implementation_hash
        )
    }

    /// Wire form. The implementation itself is served separately.
    pub fn to_json(&self, api_root: &str) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "implementation_url": self.implementation_url(api_root),
            "implementation_hash": self.implementation_hash,
            "arguments_schema": self.arguments_schema,
            "signature": self.current_signature(),
        })
    }
}

fn compile_schema(schema: &serde_json::Value) -> Result<jsonschema::Validator> {
    if !schema.is_object() {
        return Err(RecipeError::validation(
            "arguments_schema",
            "must be a JSON object",
        ));
    }
    jsonschema::options()
        .build(schema)
        .map_err(|e| RecipeError::validation("arguments_schema", e.to_string()))
}

/// `""` -> `arguments`, `/repeat/0` -> `arguments.repeat.0`
fn argument_field(instance_path: &str) -> String {
    let mut field = String::from("arguments");
    for segment in instance_path.split('/').filter(|s| !s.is_empty()) {
        field.push('.');
        field.push_str(&segment.replace("~1", "/").replace("~0", "~"));
    }
    field
}

pub fn hash_implementation(implementation: &str) -> String {
    signing::digest_hex(implementation.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::Signer;
    use serde_json::json;

    #[test]
    fn hash_tracks_implementation() {
        let a = Action::new("console-log", "console.log(1)", json!({})).unwrap();
        let b = Action::new("console-log", "console.log(2)", json!({})).unwrap();
        assert_eq!(a.implementation_hash.len(), 64);
        assert_ne!(a.implementation_hash, b.implementation_hash);
        assert!(!a.same_content(&b));
    }

    #[test]
    fn invalid_name_is_rejected() {
        assert!(Action::new("bad name", "x", json!({})).is_err());
    }

    #[test]
    fn signature_goes_stale_when_schema_changes() {
        let signer = Signer::generate();
        let mut action = Action::new("show-heartbeat", "run()", json!({})).unwrap();
        action.signature = Some(signer.sign(&action.canonical_bytes()));
        assert!(action.current_signature().is_some());

        action.arguments_schema = json!({"required": ["surveyId"]});
        assert!(action.current_signature().is_none());
    }

    #[test]
    fn required_arguments_are_enforced() {
        let action = Action::new(
            "show-heartbeat",
            "run()",
            json!({"required": ["surveyId", "message"]}),
        )
        .unwrap();
        assert!(action
            .validate_arguments(&json!({"surveyId": "a", "message": "hi"}))
            .is_ok());
        let err = action
            .validate_arguments(&json!({"surveyId": "a"}))
            .unwrap_err();
        assert!(err.to_string().contains("message"));
        assert!(action.validate_arguments(&json!([1, 2])).is_err());
    }

    #[test]
    fn argument_types_and_enums_are_enforced() {
        let action = Action::new(
            "show-heartbeat",
            "run()",
            json!({
                "type": "object",
                "properties": {
                    "surveyId": {"type": "string"},
                    "repeat": {"enum": ["once", "xdays"]}
                }
            }),
        )
        .unwrap();
        assert!(action
            .validate_arguments(&json!({"surveyId": "a", "repeat": "once"}))
            .is_ok());

        match action.validate_arguments(&json!({"surveyId": 5, "repeat": "once"})) {
            Err(RecipeError::Validation { field, .. }) => assert_eq!(field, "arguments.surveyId"),
            other => panic!("expected a validation error, got {other:?}"),
        }
        match action.validate_arguments(&json!({"surveyId": "a", "repeat": "forever"})) {
            Err(RecipeError::Validation { field, .. }) => assert_eq!(field, "arguments.repeat"),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_schema_is_rejected_at_registration() {
        let err = Action::new("console-log", "x", json!({"type": 12})).unwrap_err();
        assert!(matches!(
            err,
            RecipeError::Validation { ref field, .. } if field == "arguments_schema"
        ));
        assert!(Action::new("console-log", "x", json!([])).is_err());
    }

    #[test]
    fn forged_signature_is_not_current() {
        let signer = Signer::generate();
        let mut action = Action::new("console-log", "x", json!({})).unwrap();
        let mut signature = signer.sign(&action.canonical_bytes());
        signature.signature = Signer::generate()
            .sign(&action.canonical_bytes())
            .signature;
        action.signature = Some(signature);
        assert!(action.current_signature().is_none());
    }

    #[test]
    fn implementation_url_follows_api_root() {
        let action = Action::new("console-log", "x", json!({})).unwrap();
        let url = action.implementation_url("/api/v3");
        assert!(url.starts_with("/api/v3/action/console-log/implementation/"));
        let wire = action.to_json("/api/v1/");
        assert_eq!(wire["implementation_url"], action.implementation_url("/api/v1"));
    }
}
