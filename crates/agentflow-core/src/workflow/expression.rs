//! JEXL guard evaluation for conditional nodes.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of string transforms and
//! adds the one check JEXL itself does not do: a guard that reads a variable
//! absent from state is an error, not `null`.
//!
//! State is always passed as the evaluation context, never interpolated into
//! the expression text.

use serde_json::{json, Map, Value};

use agentflow_types::execution::ExecutionState;

use crate::error::EvaluationError;

/// Low-level evaluation failure.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// Identifiers JEXL treats as literals or operators.
const KEYWORDS: &[&str] = &["true", "false", "null", "in"];

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with the standard transforms registered.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(|v| v.as_str()).unwrap_or("")
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = str_arg(args, 0).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::value_to_bool(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an edge guard against execution state.
    ///
    /// Every variable path the guard reads must exist in state, either as a
    /// top-level key (`category`) or under the `state` root
    /// (`state.category`). The result must be a boolean: a guard such as
    /// `state.category` that yields a string is malformed, not truthy.
    pub fn evaluate_guard(
        &self,
        expression: &str,
        state: &ExecutionState,
    ) -> Result<bool, EvaluationError> {
        let context = guard_context(state);
        check_defined(expression, &context)?;

        let malformed = |reason: String| EvaluationError::Malformed {
            expression: expression.to_string(),
            reason,
        };
        match self
            .evaluate_value(expression, &context)
            .map_err(|e| malformed(e.to_string()))?
        {
            Value::Bool(b) => Ok(b),
            other => Err(malformed(format!("guard must evaluate to a boolean, got {other}"))),
        }
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// `{ ...state, "state": state }`.
pub fn guard_context(state: &ExecutionState) -> Value {
    let mut context: Map<String, Value> = state.clone();
    context.insert("state".to_string(), Value::Object(state.clone()));
    Value::Object(context)
}

// ---------------------------------------------------------------------------
// Undefined variable detection
// ---------------------------------------------------------------------------

fn check_defined(expression: &str, context: &Value) -> Result<(), EvaluationError> {
    for path in referenced_paths(expression) {
        let mut current = context;
        for (depth, segment) in path.iter().enumerate() {
            let next = match current {
                Value::Object(map) => map.get(segment),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => {
                    return Err(EvaluationError::UndefinedVariable {
                        expression: expression.to_string(),
                        variable: path[..=depth].join("."),
                    });
                }
            }
        }
    }
    Ok(())
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Dotted identifier paths read by `expression`.
///
/// Skips string and number literals, keywords, transform names (after `|`),
/// property names after a non-identifier (`items[0].name`) and object
/// literal keys.
fn referenced_paths(expression: &str) -> Vec<Vec<String>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut paths = Vec::new();
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            prev = Some(c);
            continue;
        }

        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            prev = Some('0');
            continue;
        }

        if is_ident_start(c) {
            let mut segments = Vec::new();
            loop {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                segments.push(chars[start..i].iter().collect::<String>());
                if i + 1 < chars.len() && chars[i] == '.' && is_ident_start(chars[i + 1]) {
                    i += 1;
                } else {
                    break;
                }
            }

            let next = chars[i..].iter().find(|c| !c.is_whitespace()).copied();
            let is_member_or_transform = matches!(prev, Some('|') | Some('.'));
            let is_object_key = next == Some(':') && matches!(prev, Some('{') | Some(','));
            let is_keyword = KEYWORDS.contains(&segments[0].as_str());

            if !is_member_or_transform && !is_object_key && !is_keyword {
                paths.push(segments);
            }
            prev = Some('a');
            continue;
        }

        if !c.is_whitespace() {
            prev = Some(c);
        }
        i += 1;
    }

    paths
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new()
    }

    fn state(value: Value) -> ExecutionState {
        value.as_object().cloned().unwrap()
    }

    // -------------------------------------------------------------------
    // Raw evaluation
    // -------------------------------------------------------------------

    #[test]
    fn test_dot_notation_nested() {
        let ctx = json!({ "ticket": { "author": { "name": "Alice" } } });
        let result = evaluator()
            .evaluate_value("ticket.author.name", &ctx)
            .unwrap();
        assert_eq!(result, json!("Alice"));
    }

    #[test]
    fn test_boolean_operators() {
        let ctx = json!({ "kind": "bug", "team": "core" });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("kind == 'bug' && team == 'core'", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_value("kind == 'bug' && team == 'web'", &ctx).unwrap(), json!(false));
        assert_eq!(eval.evaluate_value("kind == 'feature' || team == 'core'", &ctx).unwrap(), json!(true));
    }

    #[test]
    fn test_transform_chaining() {
        let ctx = json!({ "name": "  Hello World  " });
        let result = evaluator().evaluate_value("name|trim|lower", &ctx).unwrap();
        assert_eq!(result, json!("hello world"));
    }

    #[test]
    fn test_length_comparison() {
        let ctx = json!({ "items": ["a", "b", "c", "d", "e"] });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("items|length > 3", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_value("items|length > 10", &ctx).unwrap(), json!(false));
    }

    #[test]
    fn test_in_operator_array() {
        let ctx = json!({ "labels": ["urgent", "billing"] });
        assert_eq!(
            evaluator().evaluate_value("'urgent' in labels", &ctx).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_invalid_context_not_object() {
        let err = evaluator().evaluate_value("1", &json!([1])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    // -------------------------------------------------------------------
    // Guards
    // -------------------------------------------------------------------

    #[test]
    fn test_guard_reads_state_root_and_bare_keys() {
        let s = state(json!({ "category": "urgent" }));
        let eval = evaluator();
        assert!(eval.evaluate_guard("state.category == 'urgent'", &s).unwrap());
        assert!(eval.evaluate_guard("category == 'urgent'", &s).unwrap());
        assert!(!eval.evaluate_guard("category == 'routine'", &s).unwrap());
    }

    #[test]
    fn test_guard_undefined_top_level_variable() {
        let s = state(json!({ "category": "urgent" }));
        let err = evaluator().evaluate_guard("priority == 'high'", &s).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::UndefinedVariable {
                expression: "priority == 'high'".into(),
                variable: "priority".into(),
            }
        );
    }

    #[test]
    fn test_guard_undefined_nested_variable() {
        let s = state(json!({ "ticket": { "title": "x" } }));
        let err = evaluator()
            .evaluate_guard("state.ticket.owner == 'bob'", &s)
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::UndefinedVariable { ref variable, .. } if variable == "state.ticket.owner"
        ));
    }

    #[test]
    fn test_guard_null_value_is_defined() {
        let s = state(json!({ "owner": null }));
        assert!(evaluator().evaluate_guard("owner == null", &s).unwrap());
    }

    #[test]
    fn test_guard_malformed_expression() {
        let s = state(json!({ "category": "urgent" }));
        let err = evaluator()
            .evaluate_guard("category == == 'urgent'", &s)
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Malformed { .. }));
    }

    #[test]
    fn test_guard_non_boolean_result_is_malformed() {
        let s = state(json!({ "category": "routine", "count": 3, "owner": null }));
        let eval = evaluator();
        for guard in ["state.category", "count", "owner", "state"] {
            let err = eval.evaluate_guard(guard, &s).unwrap_err();
            assert!(
                matches!(err, EvaluationError::Malformed { ref expression, .. } if expression == guard),
                "{guard}: {err}"
            );
        }
    }

    #[test]
    fn test_guard_string_literals_are_not_variables() {
        let s = state(json!({ "reply": "see state.missing" }));
        assert!(evaluator()
            .evaluate_guard("reply|contains('state.missing')", &s)
            .unwrap());
    }

    // -------------------------------------------------------------------
    // Path scanning
    // -------------------------------------------------------------------

    #[test]
    fn test_referenced_paths_skips_transforms_and_keywords() {
        let paths = referenced_paths("name|lower == 'x' && flag == true && 'a' in tags");
        assert_eq!(
            paths,
            vec![
                vec!["name".to_string()],
                vec!["flag".to_string()],
                vec!["tags".to_string()],
            ]
        );
    }

    #[test]
    fn test_referenced_paths_index_access() {
        let paths = referenced_paths("items[0].name == 'a' && score > 1.5");
        assert_eq!(paths, vec![vec!["items".to_string()], vec!["score".to_string()]]);
    }

    #[test]
    fn test_referenced_paths_dotted() {
        let paths = referenced_paths("state.ticket.owner");
        assert_eq!(paths, vec![vec!["state", "ticket", "owner"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()]);
    }
}
