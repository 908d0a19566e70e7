//! Built-in in-process tools.

use std::path::PathBuf;

use agentflow_types::tool::{ToolDescriptor, ToolKind};
use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ToolError;

use super::internal::Tool;

/// Largest file `file_reader` will return.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

fn descriptor<T: JsonSchema>(name: &str, description: &str) -> ToolDescriptor {
    let schema = schemars::schema_for!(T);
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: serde_json::to_value(schema).unwrap_or_else(|_| json!({ "type": "object" })),
        kind: ToolKind::Internal,
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// Arithmetic expression, e.g. `(2 + 3) * 4`.
    pub expression: String,
}

/// Evaluates arithmetic with a bare JEXL evaluator and an empty context, so
/// expressions cannot read anything or call transforms.
pub struct CalculatorTool {
    descriptor: ToolDescriptor,
}

impl CalculatorTool {
    pub fn new() -> Self {
        Self {
            descriptor: descriptor::<CalculatorArgs>(
                "calculator",
                "Evaluate an arithmetic expression and return the number.",
            ),
        }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculatorTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: CalculatorArgs = parse_args("calculator", arguments)?;
        let value = jexl_eval::Evaluator::new()
            .eval_in_context(&args.expression, json!({}))
            .map_err(|e| ToolError::InvalidArguments {
                tool: "calculator".into(),
                reason: e.to_string(),
            })?;

        match value.as_f64() {
            Some(n) if n.is_finite() => Ok(json!(n)),
            Some(_) => Err(ToolError::Failed {
                tool: "calculator".into(),
                reason: "result is not a finite number".into(),
            }),
            None => Err(ToolError::InvalidArguments {
                tool: "calculator".into(),
                reason: format!("expression did not produce a number: {value}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// text_processor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextOperation {
    Upper,
    Lower,
    Reverse,
    CountWords,
    CountChars,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TextProcessorArgs {
    pub text: String,
    pub operation: TextOperation,
}

pub struct TextProcessorTool {
    descriptor: ToolDescriptor,
}

impl TextProcessorTool {
    pub fn new() -> Self {
        Self {
            descriptor: descriptor::<TextProcessorArgs>(
                "text_processor",
                "Transform text (upper, lower, reverse) or count its words or characters.",
            ),
        }
    }
}

impl Default for TextProcessorTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for TextProcessorTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: TextProcessorArgs = parse_args("text_processor", arguments)?;
        let text = args.text;
        Ok(match args.operation {
            TextOperation::Upper => json!(text.to_uppercase()),
            TextOperation::Lower => json!(text.to_lowercase()),
            TextOperation::Reverse => json!(text.chars().rev().collect::<String>()),
            TextOperation::CountWords => json!(text.split_whitespace().count()),
            TextOperation::CountChars => json!(text.chars().count()),
        })
    }
}

// ---------------------------------------------------------------------------
// file_reader
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FileReaderArgs {
    /// Path of a UTF-8 text file.
    pub file_path: PathBuf,
}

pub struct FileReaderTool {
    descriptor: ToolDescriptor,
}

impl FileReaderTool {
    pub fn new() -> Self {
        Self {
            descriptor: descriptor::<FileReaderArgs>(
                "file_reader",
                "Read a UTF-8 text file (up to 1 MiB).",
            ),
        }
    }
}

impl Default for FileReaderTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FileReaderTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: FileReaderArgs = parse_args("file_reader", arguments)?;
        let failed = |reason: String| ToolError::Failed {
            tool: "file_reader".into(),
            reason,
        };

        let metadata = tokio::fs::metadata(&args.file_path)
            .await
            .map_err(|e| failed(format!("{}: {e}", args.file_path.display())))?;
        if !metadata.is_file() {
            return Err(failed(format!("{} is not a file", args.file_path.display())));
        }
        if metadata.len() > MAX_FILE_BYTES {
            return Err(failed(format!(
                "{} is {} bytes, limit is {MAX_FILE_BYTES}",
                args.file_path.display(),
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(&args.file_path)
            .await
            .map_err(|e| failed(format!("{}: {e}", args.file_path.display())))?;
        Ok(json!(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calculator_arithmetic() {
        let tool = CalculatorTool::new();
        let result = tool.call(json!({ "expression": "(2 + 3) * 4" })).await.unwrap();
        assert_eq!(result.as_f64(), Some(20.0));
    }

    #[tokio::test]
    async fn test_calculator_rejects_non_numeric() {
        let tool = CalculatorTool::new();
        let err = tool.call(json!({ "expression": "'abc'" })).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_calculator_missing_expression() {
        let tool = CalculatorTool::new();
        let err = tool.call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref tool, .. } if tool == "calculator"));
    }

    #[tokio::test]
    async fn test_text_processor_operations() {
        let tool = TextProcessorTool::new();
        let call = |op: &str| tool.call(json!({ "text": "Hello big World", "operation": op }));

        assert_eq!(call("upper").await.unwrap(), json!("HELLO BIG WORLD"));
        assert_eq!(call("lower").await.unwrap(), json!("hello big world"));
        assert_eq!(call("reverse").await.unwrap(), json!("dlroW gib olleH"));
        assert_eq!(call("count_words").await.unwrap(), json!(3));
        assert_eq!(call("count_chars").await.unwrap(), json!(15));
    }

    #[tokio::test]
    async fn test_text_processor_unknown_operation() {
        let tool = TextProcessorTool::new();
        let err = tool
            .call(json!({ "text": "x", "operation": "shout" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_file_reader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "remember the milk").unwrap();

        let tool = FileReaderTool::new();
        let result = tool.call(json!({ "file_path": path })).await.unwrap();
        assert_eq!(result, json!("remember the milk"));
    }

    #[tokio::test]
    async fn test_file_reader_missing_file() {
        let tool = FileReaderTool::new();
        let err = tool
            .call(json!({ "file_path": "/nonexistent/file.txt" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }

    #[test]
    fn test_descriptor_schema_lists_required_fields() {
        let tool = TextProcessorTool::new();
        let required = tool.descriptor().input_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("text")));
        assert!(required.contains(&json!("operation")));
    }
}
