//! Request handler wiring the tool surface to the memory engine

use std::sync::Arc;

use chrono::DateTime;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use super::protocol::{
    methods, InitializeResult, McpHandler, McpRequest, McpResponse, ToolCallResult,
};
use super::tools::{get_tool_definitions, schema_for, validate_arguments};
use crate::causal::{causal_query, link_memory};
use crate::citations::{add_citation, verify_citation, verify_memory};
use crate::embedding::Embedder;
use crate::error::{PhloemError, Result};
use crate::search::{compose, recall};
use crate::storage::{citations as citation_rows, queries, Store};
use crate::types::{Cancellation, ListOptions, MemoryFilters, TraversalKind};

/// Fixed resource URIs
pub const RESOURCE_RECENT: &str = "phloem://memories/recent";
pub const RESOURCE_STATS: &str = "phloem://memories/stats";
pub const RESOURCE_SESSION: &str = "phloem://context/session";

/// MCP request handler owning the store and embedder
pub struct PhloemHandler {
    store: Store,
    embedder: Arc<dyn Embedder>,
    /// Ambient repository scope, resolved lazily from the working directory
    ambient_scope: OnceCell<Option<String>>,
}

impl PhloemHandler {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            ambient_scope: OnceCell::new(),
        }
    }

    /// Scope for a request: the explicit argument wins (empty string means
    /// global); otherwise the current repository, if any.
    fn resolve_scope(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(scope) => scope.to_string(),
            None => self
                .ambient_scope
                .get_or_init(|| {
                    std::env::current_dir()
                        .ok()
                        .and_then(|dir| crate::scope::detect_scope(&dir))
                })
                .clone()
                .unwrap_or_default(),
        }
    }

    fn arg_str<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
        params.get(name).and_then(|v| v.as_str())
    }

    fn arg_tags(params: &Value) -> Vec<String> {
        params
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn arg_limit(params: &Value, default: i64) -> usize {
        params
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(default)
            .clamp(0, 1000) as usize
    }

    fn filters(&self, params: &Value) -> MemoryFilters {
        MemoryFilters {
            tags: Self::arg_tags(params),
            scope: Some(self.resolve_scope(Self::arg_str(params, "scope"))),
        }
    }

    fn dispatch_tool(&self, name: &str, params: &Value) -> Result<Value> {
        match name {
            "remember" => self.tool_remember(params),
            "recall" => self.tool_recall(params),
            "forget" => self.tool_forget(params),
            "list_memories" => self.tool_list_memories(params),
            "memory_stats" => self.tool_memory_stats(),
            "session_context" => self.tool_session_context(params),
            "add_citation" => self.tool_add_citation(params),
            "get_citations" => self.tool_get_citations(params),
            "verify_citation" => self.tool_verify_citation(params),
            "verify_memory" => self.tool_verify_memory(params),
            "causal_query" => self.tool_causal_query(params),
            "compose" => self.tool_compose(params),
            "prefetch" => self.tool_prefetch(params),
            "prefetch_suggest" => self.tool_prefetch_suggest(params),
            _ => Err(PhloemError::Validation(format!("Unknown tool: {}", name))),
        }
    }

    fn tool_remember(&self, params: &Value) -> Result<Value> {
        let content = Self::arg_str(params, "content").unwrap_or_default().to_string();
        let scope = self.resolve_scope(Self::arg_str(params, "scope"));
        let context = Self::arg_str(params, "context").map(String::from);
        let tags = Self::arg_tags(params);

        let embedding = self.embedder.embed(&content)?;
        let model = self.embedder.model_name().to_string();
        let embedder = self.embedder.clone();
        let config = self.store.config().clone();

        let (outcome, link) = self.store.with_write(|conn| {
            let outcome = queries::insert_memory(
                conn,
                &queries::InsertMemory {
                    content: content.clone(),
                    tags: tags.clone(),
                    context: context.clone(),
                    scope: scope.clone(),
                    embedding: embedding.clone(),
                    model: model.clone(),
                },
            )?;
            let link = if outcome.created {
                Some(link_memory(
                    conn,
                    embedder.as_ref(),
                    &config,
                    &outcome.memory,
                    &Cancellation::none(),
                )?)
            } else {
                None
            };
            Ok((outcome, link))
        })?;

        Ok(json!({
            "memory": outcome.memory,
            "created": outcome.created,
            "linked": link,
        }))
    }

    fn tool_recall(&self, params: &Value) -> Result<Value> {
        let query = Self::arg_str(params, "query").unwrap_or_default();
        let limit = Self::arg_limit(params, 10);
        let filters = self.filters(params);

        let results = recall(
            &self.store,
            self.embedder.as_ref(),
            query,
            limit,
            &filters,
            &Cancellation::none(),
        )?;
        let count = results.len();
        Ok(json!({"results": results, "count": count}))
    }

    fn tool_forget(&self, params: &Value) -> Result<Value> {
        let id = Self::arg_str(params, "id").unwrap_or_default().to_string();
        let report = self
            .store
            .with_write(|conn| queries::delete_memory(conn, &id))?;
        Ok(json!({
            "id": id,
            "forgotten": true,
            "edges_removed": report.edges_removed,
            "citations_removed": report.citations_removed,
        }))
    }

    fn tool_list_memories(&self, params: &Value) -> Result<Value> {
        let since = match Self::arg_str(params, "since") {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|_| {
                        PhloemError::Validation(format!("Invalid RFC3339 instant: {}", raw))
                    })?,
            ),
            None => None,
        };

        let options = ListOptions {
            tags: Self::arg_tags(params),
            scope: Some(self.resolve_scope(Self::arg_str(params, "scope"))),
            since,
            limit: Some(Self::arg_limit(params, 20) as i64),
            offset: params.get("offset").and_then(|v| v.as_i64()),
        };

        let memories = self
            .store
            .with_connection(|conn| queries::list_memories(conn, &options))?;
        let count = memories.len();
        Ok(json!({"memories": memories, "count": count}))
    }

    fn tool_memory_stats(&self) -> Result<Value> {
        let mut stats = self.store.with_connection(queries::collect_stats)?;
        stats.db_size_bytes = self.store.db_size()?;
        Ok(serde_json::to_value(stats)?)
    }

    fn tool_session_context(&self, params: &Value) -> Result<Value> {
        let scope = self.resolve_scope(Self::arg_str(params, "scope"));
        let limit = Self::arg_limit(params, 10);
        self.session_context_payload(&scope, limit)
    }

    fn session_context_payload(&self, scope: &str, limit: usize) -> Result<Value> {
        let recent = self.store.with_connection(|conn| {
            queries::list_memories(
                conn,
                &ListOptions {
                    scope: Some(scope.to_string()),
                    limit: Some(limit as i64),
                    ..Default::default()
                },
            )
        })?;
        let mut stats = self.store.with_connection(queries::collect_stats)?;
        stats.db_size_bytes = self.store.db_size()?;

        Ok(json!({
            "scope": scope,
            "recent": recent,
            "stats": stats,
        }))
    }

    fn tool_add_citation(&self, params: &Value) -> Result<Value> {
        let memory_id = Self::arg_str(params, "memory_id").unwrap_or_default();
        let file_path = Self::arg_str(params, "file_path").unwrap_or_default();
        let start_line = params
            .get("start_line")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let end_line = params.get("end_line").and_then(|v| v.as_i64()).unwrap_or(0);
        if start_line < 0 || end_line < 0 || start_line > u32::MAX as i64 || end_line > u32::MAX as i64 {
            return Err(PhloemError::Validation("Line numbers out of range".into()));
        }
        let snippet = Self::arg_str(params, "snippet").map(String::from);

        let citation = add_citation(
            &self.store,
            memory_id,
            file_path,
            start_line as u32,
            end_line as u32,
            snippet,
        )?;
        Ok(serde_json::to_value(citation)?)
    }

    fn tool_get_citations(&self, params: &Value) -> Result<Value> {
        let memory_id = Self::arg_str(params, "memory_id").unwrap_or_default().to_string();
        let citations = self.store.with_connection(|conn| {
            queries::get_memory(conn, &memory_id)?;
            citation_rows::citations_for_memory(conn, &memory_id)
        })?;
        let count = citations.len();
        Ok(json!({"citations": citations, "count": count}))
    }

    fn tool_verify_citation(&self, params: &Value) -> Result<Value> {
        let citation_id = Self::arg_str(params, "citation_id").unwrap_or_default();
        let citation = verify_citation(&self.store, citation_id)?;
        Ok(serde_json::to_value(citation)?)
    }

    fn tool_verify_memory(&self, params: &Value) -> Result<Value> {
        let memory_id = Self::arg_str(params, "memory_id").unwrap_or_default();
        let report = verify_memory(&self.store, memory_id)?;
        Ok(serde_json::to_value(report)?)
    }

    fn tool_causal_query(&self, params: &Value) -> Result<Value> {
        let memory_id = Self::arg_str(params, "memory_id").unwrap_or_default();
        let kind: TraversalKind = Self::arg_str(params, "kind")
            .unwrap_or("neighbors")
            .parse()
            .map_err(PhloemError::Validation)?;

        let results = causal_query(
            &self.store,
            memory_id,
            kind,
            self.store.config(),
            &Cancellation::none(),
        )?;
        let count = results.len();
        Ok(json!({"results": results, "count": count}))
    }

    fn tool_compose(&self, params: &Value) -> Result<Value> {
        let query_a = Self::arg_str(params, "query_a").unwrap_or_default();
        let query_b = Self::arg_str(params, "query_b").unwrap_or_default();
        let limit = Self::arg_limit(params, 10);
        let filters = self.filters(params);

        let results = compose(
            &self.store,
            self.embedder.as_ref(),
            query_a,
            query_b,
            limit,
            &filters,
            &Cancellation::none(),
        )?;
        let count = results.len();
        Ok(json!({"results": results, "count": count}))
    }

    fn tool_prefetch(&self, params: &Value) -> Result<Value> {
        let queries: Vec<String> = params
            .get("queries")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let limit = Self::arg_limit(params, 5);
        let filters = self.filters(params);

        // Warm the embedder in one batch before the per-query recalls
        let refs: Vec<&str> = queries.iter().map(String::as_str).collect();
        self.embedder.embed_batch(&refs)?;

        let mut groups = Vec::with_capacity(queries.len());
        for query in &queries {
            let results = recall(
                &self.store,
                self.embedder.as_ref(),
                query,
                limit,
                &filters,
                &Cancellation::none(),
            )?;
            groups.push(json!({"query": query, "results": results}));
        }
        Ok(json!({"groups": groups}))
    }

    fn tool_prefetch_suggest(&self, params: &Value) -> Result<Value> {
        let scope = self.resolve_scope(Self::arg_str(params, "scope"));
        let limit = Self::arg_limit(params, 5);

        let stats = self.store.with_connection(queries::collect_stats)?;
        let recent = self.store.with_connection(|conn| {
            queries::list_memories(
                conn,
                &ListOptions {
                    scope: Some(scope.clone()),
                    limit: Some(limit as i64),
                    ..Default::default()
                },
            )
        })?;

        let mut suggestions: Vec<String> = Vec::new();
        for (tag, _) in stats.top_tags.iter().take(limit) {
            suggestions.push(tag.clone());
        }
        for memory in &recent {
            if suggestions.len() >= limit * 2 {
                break;
            }
            let head: String = memory.content.split_whitespace().take(6).collect::<Vec<_>>().join(" ");
            if !head.is_empty() && !suggestions.contains(&head) {
                suggestions.push(head);
            }
        }

        Ok(json!({"scope": scope, "suggestions": suggestions}))
    }

    fn handle_tools_call(&self, request: &McpRequest) -> McpResponse {
        let name = request
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let arguments = request
            .params
            .get("arguments")
            .cloned()
            .unwrap_or(json!({}));

        let Some(schema) = schema_for(name) else {
            return McpResponse::error(
                request.id.clone(),
                -32602,
                format!("Unknown tool: {}", name),
            );
        };
        if let Err(reason) = validate_arguments(&schema, &arguments) {
            return McpResponse::error(
                request.id.clone(),
                -32602,
                format!("Invalid params for {}: {}", name, reason),
            );
        }

        match self.dispatch_tool(name, &arguments) {
            Ok(result) => {
                McpResponse::success(request.id.clone(), json!(ToolCallResult::json(&result)))
            }
            Err(e) => match e {
                // Storage-layer and internal failures are protocol errors
                PhloemError::Database(_)
                | PhloemError::Storage(_)
                | PhloemError::StorageBusy(_)
                | PhloemError::StorageCorrupt(_)
                | PhloemError::Serialization(_)
                | PhloemError::Internal(_) => {
                    tracing::error!(tool = name, error = %e, "tool call failed internally");
                    McpResponse::error(request.id.clone(), -32603, e.to_string())
                }
                // Domain errors stay inside a successful tool result
                domain => McpResponse::success(
                    request.id.clone(),
                    json!(ToolCallResult::error(domain.to_string())),
                ),
            },
        }
    }

    fn handle_resources_list(&self, request: &McpRequest) -> McpResponse {
        let resources = json!([
            {
                "uri": RESOURCE_RECENT,
                "name": "Recent memories",
                "description": "The most recently created memories",
                "mimeType": "application/json"
            },
            {
                "uri": RESOURCE_STATS,
                "name": "Store statistics",
                "description": "Totals, scopes, tags, and database size",
                "mimeType": "application/json"
            },
            {
                "uri": RESOURCE_SESSION,
                "name": "Session context",
                "description": "Current scope with its recent memories and stats",
                "mimeType": "application/json"
            }
        ]);
        McpResponse::success(request.id.clone(), json!({"resources": resources}))
    }

    fn handle_resources_read(&self, request: &McpRequest) -> McpResponse {
        let uri = request
            .params
            .get("uri")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let payload = match uri {
            RESOURCE_RECENT => self.store.with_connection(|conn| {
                let memories = queries::list_memories(
                    conn,
                    &ListOptions {
                        limit: Some(20),
                        ..Default::default()
                    },
                )?;
                Ok(json!({"memories": memories}))
            }),
            RESOURCE_STATS => self.tool_memory_stats(),
            RESOURCE_SESSION => {
                let scope = self.resolve_scope(None);
                self.session_context_payload(&scope, 10)
            }
            other => {
                return McpResponse::error(
                    request.id.clone(),
                    -32602,
                    format!("Unknown resource: {}", other),
                )
            }
        };

        match payload {
            Ok(value) => McpResponse::success(
                request.id.clone(),
                json!({
                    "contents": [{
                        "uri": uri,
                        "mimeType": "application/json",
                        "text": serde_json::to_string_pretty(&value).unwrap_or_default(),
                    }]
                }),
            ),
            Err(e) => McpResponse::error(request.id.clone(), -32603, e.to_string()),
        }
    }
}

impl McpHandler for PhloemHandler {
    fn handle_request(&self, request: McpRequest) -> McpResponse {
        match request.method.as_str() {
            methods::INITIALIZE => {
                McpResponse::success(request.id, json!(InitializeResult::default()))
            }
            methods::INITIALIZED => McpResponse::success(request.id, json!({})),
            methods::LIST_TOOLS => {
                McpResponse::success(request.id, json!({"tools": get_tool_definitions()}))
            }
            methods::CALL_TOOL => self.handle_tools_call(&request),
            methods::LIST_RESOURCES => self.handle_resources_list(&request),
            methods::READ_RESOURCE => self.handle_resources_read(&request),
            other => McpResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", other),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedder;

    fn handler() -> PhloemHandler {
        let store = Store::open_in_memory().unwrap();
        PhloemHandler::new(store, Arc::new(LocalEmbedder::default()))
    }

    fn call(handler: &PhloemHandler, tool: &str, args: Value) -> McpResponse {
        handler.handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: methods::CALL_TOOL.to_string(),
            params: json!({"name": tool, "arguments": args}),
        })
    }

    fn tool_payload(response: &McpResponse) -> (Value, bool) {
        let result = response.result.as_ref().expect("tool result");
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let text = result["content"][0]["text"].as_str().unwrap_or("");
        let value = serde_json::from_str(text).unwrap_or(Value::String(text.to_string()));
        (value, is_error)
    }

    #[test]
    fn initialize_reports_protocol_and_name() {
        let response = handler().handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: methods::INITIALIZE.to_string(),
            params: Value::Null,
        });
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "phloem");
    }

    #[test]
    fn unknown_method_is_32601() {
        let response = handler().handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: "bogus/method".to_string(),
            params: Value::Null,
        });
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn unknown_tool_is_32602() {
        let response = call(&handler(), "astral_project", json!({}));
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn schema_violation_is_32602() {
        let response = call(&handler(), "remember", json!({}));
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn remember_then_recall_roundtrip() {
        let handler = handler();
        let response = call(
            &handler,
            "remember",
            json!({"content": "The sky is blue", "scope": ""}),
        );
        let (value, is_error) = tool_payload(&response);
        assert!(!is_error);
        assert_eq!(value["created"], true);

        let response = call(
            &handler,
            "recall",
            json!({"query": "sky color", "limit": 5, "scope": ""}),
        );
        let (value, is_error) = tool_payload(&response);
        assert!(!is_error);
        let top = value["results"][0]["memory"]["content"].as_str().unwrap();
        assert!(top.contains("sky is blue"));
    }

    #[test]
    fn domain_error_is_tool_error_not_rpc_error() {
        let response = call(
            &handler(),
            "forget",
            json!({"id": crate::types::new_id()}),
        );
        assert!(response.error.is_none(), "not-found must not be an RPC error");
        let (_, is_error) = tool_payload(&response);
        assert!(is_error);
    }

    #[test]
    fn resources_read_recent() {
        let handler = handler();
        call(&handler, "remember", json!({"content": "note", "scope": ""}));

        let response = handler.handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(9)),
            method: methods::READ_RESOURCE.to_string(),
            params: json!({"uri": RESOURCE_RECENT}),
        });
        let result = response.result.unwrap();
        assert_eq!(result["contents"][0]["uri"], RESOURCE_RECENT);

        let unknown = handler.handle_request(McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(10)),
            method: methods::READ_RESOURCE.to_string(),
            params: json!({"uri": "phloem://nope"}),
        });
        assert_eq!(unknown.error.unwrap().code, -32602);
    }

    #[test]
    fn dedup_reports_created_false() {
        let handler = handler();
        let first = call(&handler, "remember", json!({"content": "same", "scope": "s"}));
        let (first_value, _) = tool_payload(&first);
        let second = call(&handler, "remember", json!({"content": "same", "scope": "s"}));
        let (second_value, _) = tool_payload(&second);

        assert_eq!(second_value["created"], false);
        assert_eq!(
            first_value["memory"]["id"],
            second_value["memory"]["id"]
        );
    }
}
