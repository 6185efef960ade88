use serde_json::Value;

use crate::protocol::anthropic::AnthropicTool;

// ---------------------------------------------------------------------------
// Tool list rendering
// ---------------------------------------------------------------------------

/// Render one parameter line: its description, else its JSON type.
fn format_param_line(name: &str, schema: &Value) -> String {
    let detail = schema
        .get("description")
        .and_then(Value::as_str)
        .or_else(|| schema.get("type").and_then(Value::as_str))
        .unwrap_or("unknown");
    format!("    - {name}: {detail}")
}

fn format_tool(tool: &AnthropicTool) -> String {
    let schema = &tool.input_schema;

    let params: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, info)| format_param_line(name, info))
                .collect()
        })
        .unwrap_or_default();
    let params_block = if params.is_empty() {
        "    (no parameters)".to_string()
    } else {
        params.join("\n")
    };

    // Non-string entries are skipped rather than rejected.
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let required_str = if required.is_empty() {
        "none".to_string()
    } else {
        required.join(", ")
    };

    format!(
        "- **{name}**: {description}\n  Parameters:\n{params_block}\n  Required: {required_str}",
        name = tool.name,
        description = tool.description.as_deref().unwrap_or(""),
    )
}

// ---------------------------------------------------------------------------
// Prompt template
// ---------------------------------------------------------------------------

fn prompt_template(tools_list: &str) -> String {
    format!(
        r#"
IMPORTANT: whenever a task calls for one of the tools below, answer with a tool call in exactly this format instead of describing the action or asking me to run it:
<function_calls>
<invoke name="TOOL_NAME">
<parameter name="PARAM_NAME">PARAM_VALUE</parameter>
</invoke>
</function_calls>

RULES:
1. Output the markup as PLAIN TEXT. It is parsed and the tool is executed locally.
2. Call several tools at once by placing several <invoke> blocks inside one <function_calls> block.
3. Stop writing right after the closing </function_calls> tag.
4. Tool results come back inside <function_results> tags.

Available tools:

{tools_list}

Example, reading a file:
<function_calls>
<invoke name="Read">
<parameter name="file_path">/path/to/file.ts</parameter>
</invoke>
</function_calls>

Example, several tool calls:
<function_calls>
<invoke name="Glob">
<parameter name="pattern">**/*.ts</parameter>
</invoke>
<invoke name="Grep">
<parameter name="pattern">function</parameter>
<parameter name="path">/src</parameter>
</invoke>
</function_calls>
"#
    )
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Build the tool-calling instructions placed in front of the system prompt.
///
/// Returns an empty string when the request declares no tools.
#[must_use]
pub fn generate_tool_instructions(tools: &[AnthropicTool]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let tools_list = tools
        .iter()
        .map(format_tool)
        .collect::<Vec<_>>()
        .join("\n\n");
    prompt_template(&tools_list)
}
