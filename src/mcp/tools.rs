//! Tool definitions for the Phloem MCP server

use serde_json::Value;

use super::protocol::ToolDefinition;

/// All tool definitions: (name, description, input schema)
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "remember",
        "Store a memory. Causal phrases in the content ('because X', 'so that X', ...) are linked to earlier memories in the same scope.",
        r#"{
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The content to remember"},
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Tags for categorization (lowercase, max 64)"},
                "context": {"type": "string", "description": "Where this memory came from (file, conversation, ticket)"},
                "scope": {"type": "string", "description": "Namespace such as github.com/owner/repo. Defaults to the current repository; empty string is the global scope"}
            },
            "required": ["content"]
        }"#,
    ),
    (
        "recall",
        "Retrieve memories by semantic similarity to a query, filtered by scope and tags.",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Natural-language query"},
                "limit": {"type": "integer", "default": 10, "description": "Maximum results"},
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Results must carry ALL of these tags"},
                "scope": {"type": "string", "description": "Restrict to one scope; empty string searches everything"}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "forget",
        "Delete a memory. Its edges and citations are removed with it.",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Memory ID"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "list_memories",
        "List memories with filtering and pagination, newest first.",
        r#"{
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "scope": {"type": "string"},
                "since": {"type": "string", "description": "Only memories created at or after this RFC3339 instant"},
                "limit": {"type": "integer", "default": 20},
                "offset": {"type": "integer", "default": 0}
            }
        }"#,
    ),
    (
        "memory_stats",
        "Totals, per-scope counts, top tags, database size, and last activity.",
        r#"{
            "type": "object",
            "properties": {}
        }"#,
    ),
    (
        "session_context",
        "Resolved scope, recent memories in it, and store statistics - a session warm-up bundle.",
        r#"{
            "type": "object",
            "properties": {
                "scope": {"type": "string", "description": "Defaults to the current repository"},
                "limit": {"type": "integer", "default": 10, "description": "Recent memories to include"}
            }
        }"#,
    ),
    (
        "add_citation",
        "Link a memory to a file line range. The cited text is captured as a snippet for later drift detection.",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"},
                "file_path": {"type": "string", "description": "Absolute or ~-relative path"},
                "start_line": {"type": "integer", "description": "1-based inclusive start line"},
                "end_line": {"type": "integer", "description": "1-based inclusive end line"},
                "snippet": {"type": "string", "description": "Cited text; read from the file when omitted"}
            },
            "required": ["memory_id", "file_path", "start_line", "end_line"]
        }"#,
    ),
    (
        "get_citations",
        "List the citations of a memory.",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"}
            },
            "required": ["memory_id"]
        }"#,
    ),
    (
        "verify_citation",
        "Re-read the cited file and update status (valid/drifted/missing) and confidence.",
        r#"{
            "type": "object",
            "properties": {
                "citation_id": {"type": "string"}
            },
            "required": ["citation_id"]
        }"#,
    ),
    (
        "verify_memory",
        "Verify every citation of a memory and return the aggregate.",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"}
            },
            "required": ["memory_id"]
        }"#,
    ),
    (
        "causal_query",
        "Traverse the edge graph around a memory: neighbors, ancestors (what led here), or descendants (what this led to).",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"},
                "kind": {"type": "string", "enum": ["neighbors", "ancestors", "descendants"], "default": "neighbors"}
            },
            "required": ["memory_id"]
        }"#,
    ),
    (
        "compose",
        "Two-query retrieval: recall both queries independently and re-rank by summed similarity.",
        r#"{
            "type": "object",
            "properties": {
                "query_a": {"type": "string"},
                "query_b": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "tags": {"type": "array", "items": {"type": "string"}},
                "scope": {"type": "string"}
            },
            "required": ["query_a", "query_b"]
        }"#,
    ),
    (
        "prefetch",
        "Batch recall for a list of queries - warm up context before starting a task.",
        r#"{
            "type": "object",
            "properties": {
                "queries": {"type": "array", "items": {"type": "string"}, "description": "Queries to recall, one group of results per query"},
                "limit": {"type": "integer", "default": 5, "description": "Results per query"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "scope": {"type": "string"}
            },
            "required": ["queries"]
        }"#,
    ),
    (
        "prefetch_suggest",
        "Suggest prefetch queries from the most frequent tags and most recent memories in scope.",
        r#"{
            "type": "object",
            "properties": {
                "scope": {"type": "string"},
                "limit": {"type": "integer", "default": 5}
            }
        }"#,
    ),
];

/// Parse the static tool table into protocol descriptors
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str(schema).unwrap_or(Value::Null),
        })
        .collect()
}

/// Find a tool's input schema by name
pub fn schema_for(name: &str) -> Option<Value> {
    TOOL_DEFINITIONS
        .iter()
        .find(|(tool_name, _, _)| *tool_name == name)
        .and_then(|(_, _, schema)| serde_json::from_str(schema).ok())
}

/// Validate arguments against a declared input schema.
///
/// Checks required properties and the primitive type of every declared
/// property that is present; unknown fields are ignored.
pub fn validate_arguments(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let empty = serde_json::Map::new();
    let object = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err("arguments must be an object".to_string()),
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !object.contains_key(name) || object[name].is_null() {
                return Err(format!("missing required argument: {}", name));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
        return Ok(());
    };

    for (name, declared) in properties {
        let Some(value) = object.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let Some(expected) = declared.get("type").and_then(|v| v.as_str()) else {
            continue;
        };
        let matches = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(format!("argument '{}' must be a {}", name, expected));
        }
        if let Some(allowed) = declared.get("enum").and_then(|v| v.as_array()) {
            if !allowed.contains(value) {
                return Err(format!(
                    "argument '{}' must be one of {}",
                    name,
                    serde_json::to_string(allowed).unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}
