//! Execution state helpers: template rendering and state merging.
//!
//! Templates reference state with `{{ key }}`, `{{ key.path }}` or
//! `{{ state.key }}`. Unknown references are left as-is (not an error).

use serde_json::{Map, Value};

use agentflow_types::execution::ExecutionState;

/// Initial state of an execution: workflow variables overlaid with the input.
pub fn initial_state(variables: &Map<String, Value>, input: &ExecutionState) -> ExecutionState {
    let mut state = variables.clone();
    merge_state(&mut state, input.clone());
    state
}

/// Merge `delta` into `state`. Later keys overwrite earlier ones.
pub fn merge_state(state: &mut ExecutionState, delta: ExecutionState) {
    for (key, value) in delta {
        state.insert(key, value);
    }
}

/// Resolve a dotted path against state. A leading `state.` is optional.
pub fn lookup<'a>(state: &'a ExecutionState, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path.strip_prefix("state.").unwrap_or(path);
    let mut segments = path.split('.');
    let mut current = state.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace every resolvable `{{ path }}` in `template` with its state value.
pub fn render_template(template: &str, state: &ExecutionState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        out.push_str(&rest[..start]);

        let path = &rest[start + 2..end - 2];
        match lookup(state, path) {
            Some(value) => out.push_str(&value_to_string(value)),
            None => out.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Render templates inside a JSON value.
///
/// A string consisting of a single placeholder is replaced by the raw value
/// (so `"{{ items }}"` stays an array); other strings are rendered as text.
/// Objects and arrays are rendered recursively.
pub fn render_value(value: &Value, state: &ExecutionState) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(inner) = trimmed
                .strip_prefix("{{")
                .and_then(|t| t.strip_suffix("}}"))
                .filter(|inner| !inner.contains("{{") && !inner.contains("}}"))
            {
                if let Some(found) = lookup(state, inner) {
                    return found.clone();
                }
            }
            Value::String(render_template(s, state))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, state)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Display form of a value inside rendered text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> ExecutionState {
        json!({
            "ticket": { "title": "Printer on fire", "tags": ["hw", "urgent"] },
            "category": "urgent",
            "count": 3
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_render_simple_and_nested() {
        let s = state();
        assert_eq!(
            render_template("Classify: {{ ticket.title }} ({{category}})", &s),
            "Classify: Printer on fire (urgent)"
        );
        assert_eq!(render_template("{{ state.count }} items", &s), "3 items");
        assert_eq!(render_template("first tag {{ ticket.tags.0 }}", &s), "first tag hw");
    }

    #[test]
    fn test_unknown_reference_left_asis() {
        let s = state();
        assert_eq!(
            render_template("Hello {{ customer.name }}!", &s),
            "Hello {{ customer.name }}!"
        );
    }

    #[test]
    fn test_unterminated_placeholder() {
        let s = state();
        assert_eq!(render_template("{{ category", &s), "{{ category");
    }

    #[test]
    fn test_objects_render_as_json() {
        let s = state();
        assert_eq!(
            render_template("{{ ticket.tags }}", &s),
            r#"["hw","urgent"]"#
        );
    }

    #[test]
    fn test_render_value_keeps_raw_type_for_single_placeholder() {
        let s = state();
        let args = json!({
            "tags": "{{ ticket.tags }}",
            "summary": "{{ category }}: {{ ticket.title }}",
            "n": 7
        });
        let rendered = render_value(&args, &s);
        assert_eq!(rendered["tags"], json!(["hw", "urgent"]));
        assert_eq!(rendered["summary"], "urgent: Printer on fire");
        assert_eq!(rendered["n"], 7);
    }

    #[test]
    fn test_initial_state_overlays_input() {
        let variables = json!({ "lang": "en", "limit": 5 }).as_object().cloned().unwrap();
        let input = json!({ "limit": 10 }).as_object().cloned().unwrap();
        let s = initial_state(&variables, &input);
        assert_eq!(s["lang"], "en");
        assert_eq!(s["limit"], 10);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut s = state();
        merge_state(&mut s, json!({ "category": "routine", "new": true }).as_object().cloned().unwrap());
        assert_eq!(s["category"], "routine");
        assert_eq!(s["new"], true);
    }
}
