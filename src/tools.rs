//! Static MCP tool catalog.
//!
//! Definitions only; routing lives in `dispatch`. Names are unique and every
//! required parameter appears in `properties`.

use serde::Serialize;
use serde_json::{Value, json};

/// MCP tool definition for tools/list response
#[derive(Debug, Serialize)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The complete tool catalog, in the order it is listed to clients.
pub fn catalog() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "list_containers",
            description: "List Docker containers visible under the security policy",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "all": { "type": "boolean", "description": "Include stopped containers", "default": true }
                }
            }),
        },
        ToolDef {
            name: "get_logs",
            description: "Fetch logs from a container (output is masked)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "tail": { "type": "string", "description": "Number of lines from the end, or \"all\"", "default": "all" },
                    "since": { "type": "string", "description": "RFC3339 timestamp or relative offset like \"10m\"" }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "get_stats",
            description: "One-shot resource usage snapshot for a container",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "exec_command",
            description: "Execute a whitelisted command in a container",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "command": { "type": "string", "description": "Command to execute" },
                    "dangerously": { "type": "boolean", "description": "Use the dangerously-allowed command list (file inspection commands subject to blocked-path checks)", "default": false }
                },
                "required": ["container", "command"]
            }),
        },
        ToolDef {
            name: "inspect_container",
            description: "Full inspect record for a container (environment values masked)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "search_logs",
            description: "Search container logs with a regex; masking runs before matching",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "pattern": { "type": "string", "description": "Regex to search for" },
                    "tail": { "type": "string", "description": "Number of log lines to search", "default": "1000" },
                    "context_lines": { "type": "integer", "description": "Context lines around each match", "default": 2, "minimum": 0 }
                },
                "required": ["container", "pattern"]
            }),
        },
        ToolDef {
            name: "list_files",
            description: "List files at a path inside a container",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "path": { "type": "string", "description": "Directory path inside the container", "default": "/" }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "read_file",
            description: "Read a file inside a container (subject to blocked-path rules)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "path": { "type": "string", "description": "File path inside the container" },
                    "max_lines": { "type": "integer", "description": "Maximum lines to return; 0 means all", "default": 0, "minimum": 0 }
                },
                "required": ["container", "path"]
            }),
        },
        ToolDef {
            name: "get_allowed_commands",
            description: "Show the exec whitelist for a container or all containers",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name (omit for all)" }
                }
            }),
        },
        ToolDef {
            name: "get_security_policy",
            description: "Dump the active security policy",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDef {
            name: "get_blocked_paths",
            description: "List blocked-path rules",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name (omit for all)" }
                }
            }),
        },
        ToolDef {
            name: "restart_container",
            description: "Restart a container",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "timeout": { "type": "integer", "description": "Seconds to wait before killing", "default": 10, "minimum": 0 }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "stop_container",
            description: "Stop a container",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" },
                    "timeout": { "type": "integer", "description": "Seconds to wait before killing", "default": 10, "minimum": 0 }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "start_container",
            description: "Start a stopped container",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "container": { "type": "string", "description": "Container name" }
                },
                "required": ["container"]
            }),
        },
        ToolDef {
            name: "list_host_tools",
            description: "List operator-approved host tools",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDef {
            name: "get_host_tool_info",
            description: "Usage and examples for one host tool",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Tool name" }
                },
                "required": ["name"]
            }),
        },
        ToolDef {
            name: "run_host_tool",
            description: "Run an approved host tool",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Tool name" },
                    "args": { "type": "array", "items": { "type": "string" }, "description": "Arguments passed to the tool" }
                },
                "required": ["name"]
            }),
        },
        ToolDef {
            name: "exec_host_command",
            description: "Run a whitelisted command on the host in the workspace root",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command to execute" },
                    "dangerously": { "type": "boolean", "description": "Use the dangerously-allowed command list", "default": false }
                },
                "required": ["command"]
            }),
        },
    ]
}

/// Result payload for tools/list.
pub fn tools_list_result() -> Value {
    json!({ "tools": catalog() })
}
