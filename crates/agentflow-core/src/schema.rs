//! JSON Schema checks for tool arguments and interaction responses.

use std::fmt;

use jsonschema::Validator;
use serde_json::Value;

/// A JSON Schema compiled once and checked many times.
pub struct SchemaValidator {
    validator: Validator,
}

impl SchemaValidator {
    /// Compile `schema`. The error describes why it is not a valid schema.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let validator = Validator::new(schema).map_err(|e| e.to_string())?;
        Ok(Self { validator })
    }

    /// Every violation of `instance`, empty when it conforms.
    pub fn violations(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect()
    }

    /// `Ok(())` when `instance` conforms, otherwise the violations joined.
    pub fn check(&self, instance: &Value) -> Result<(), String> {
        let violations = self.violations(instance);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}
