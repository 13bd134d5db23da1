//! Integration tests for the MCP protocol surface.
//!
//! Exercises request/response framing, the tool catalog schemas and the
//! blocked-response format without requiring Docker.

use dkmcp::jsonrpc::{JsonRpcRequest, JsonRpcResponse, code};
use dkmcp::tools;
use serde_json::{Value, json};

/// Helper to create a JSON-RPC request
fn make_request(id: impl Into<Value>, method: &str, params: Option<Value>) -> String {
    let mut req = json!({
        "jsonrpc": "2.0",
        "id": id.into(),
        "method": method,
    });
    if let Some(p) = params {
        req["params"] = p;
    }
    serde_json::to_string(&req).unwrap()
}

mod protocol_tests {
    use super::*;

    #[test]
    fn test_initialize_request_parses() {
        let raw = make_request(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "test-client",
                    "version": "1.0.0"
                }
            })),
        );

        let request: JsonRpcRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(request.method, "initialize");
        assert_eq!(request.id, Some(json!(1)));
        assert_eq!(request.params["clientInfo"]["name"], "test-client");
    }

    #[test]
    fn test_tools_call_request_parses() {
        let raw = make_request(
            3,
            "tools/call",
            Some(json!({
                "name": "get_logs",
                "arguments": {
                    "container": "api"
                }
            })),
        );

        let request: JsonRpcRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(request.method, "tools/call");
        assert_eq!(request.params["name"], "get_logs");
        assert_eq!(request.params["arguments"]["container"], "api");
    }

    #[test]
    fn test_string_ids_round_trip() {
        let raw = make_request("request-1", "tools/list", None);
        let request: JsonRpcRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(request.id, Some(json!("request-1")));

        let response = JsonRpcResponse::success(request.id.clone(), json!({}));
        let parsed: Value = serde_json::from_str(&response.to_frame()).unwrap();
        assert_eq!(parsed["id"], "request-1");
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(serde_json::from_str::<JsonRpcRequest>("not valid json").is_err());
    }

    #[test]
    fn test_parse_missing_method() {
        assert!(serde_json::from_str::<JsonRpcRequest>(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
    }
}

mod response_format_tests {
    use super::*;

    #[test]
    fn test_success_response_format() {
        let response = JsonRpcResponse::success(
            Some(json!(1)),
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": { "name": "dkmcp", "version": "0.1.0" },
                "capabilities": { "tools": {} }
            }),
        );

        let parsed: Value = serde_json::from_str(&response.to_frame()).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(parsed["result"]["serverInfo"]["name"], "dkmcp");
        assert!(parsed.get("error").is_none());
    }

    #[test]
    fn test_error_response_format() {
        let response =
            JsonRpcResponse::error(Some(json!(1)), code::METHOD_NOT_FOUND, "Method not found");
        let parsed: Value = serde_json::from_str(&response.to_frame()).unwrap();

        assert_eq!(parsed["error"]["code"], -32601);
        assert_eq!(parsed["error"]["message"], "Method not found");
        assert!(parsed.get("result").is_none());
    }

    #[test]
    fn test_tool_result_content_shape() {
        let response = JsonRpcResponse::success(
            Some(json!(3)),
            json!({
                "content": [{
                    "type": "text",
                    "text": "{\"exit_code\":0,\"output\":\"ok\"}"
                }]
            }),
        );

        let parsed: Value = serde_json::from_str(&response.to_frame()).unwrap();
        let content = &parsed["result"]["content"][0];
        assert_eq!(content["type"], "text");

        let inner: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
        assert_eq!(inner["exit_code"], 0);
    }

    #[test]
    fn test_blocked_response_is_a_success() {
        // Blocked paths are normal results the assistant can explain, not
        // tool failures.
        let body = json!({
            "blocked": true,
            "container": "api",
            "path": "/.env",
            "reason": "manual_block",
            "details": {
                "pattern": "/.env",
                "source": "config:blocked_paths.manual",
                "original_path": "/.env"
            },
            "hint": "This path is blocked by the operator's security policy."
        });
        let text = format!(
            "⚠️ Access Blocked:\n\n```json\n{}\n```",
            serde_json::to_string_pretty(&body).unwrap()
        );
        let response = JsonRpcResponse::success(
            Some(json!(4)),
            json!({"content": [{"type": "text", "text": text}]}),
        );

        let parsed: Value = serde_json::from_str(&response.to_frame()).unwrap();
        assert!(parsed.get("error").is_none());
        let rendered = parsed["result"]["content"][0]["text"].as_str().unwrap();
        assert!(rendered.starts_with("⚠️ Access Blocked:"));
        assert!(rendered.contains("\"blocked\": true"));
        assert!(rendered.contains("\"reason\": \"manual_block\""));
    }
}

mod tools_schema_tests {
    use super::*;

    fn find_tool(name: &str) -> Value {
        let tools = tools::tools_list_result();
        tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == name)
            .unwrap_or_else(|| panic!("tool {name} not in catalog"))
            .clone()
    }

    #[test]
    fn test_exec_command_schema() {
        let tool = find_tool("exec_command");
        let schema = &tool["inputSchema"];

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["container", "command"]));
        assert_eq!(schema["properties"]["dangerously"]["type"], "boolean");
        assert_eq!(schema["properties"]["dangerously"]["default"], false);
    }

    #[test]
    fn test_get_logs_schema_defaults() {
        let tool = find_tool("get_logs");
        let schema = &tool["inputSchema"];

        assert_eq!(schema["required"], json!(["container"]));
        assert_eq!(schema["properties"]["tail"]["default"], "all");
    }

    #[test]
    fn test_search_logs_schema() {
        let tool = find_tool("search_logs");
        let schema = &tool["inputSchema"];

        assert_eq!(schema["required"], json!(["container", "pattern"]));
        assert_eq!(schema["properties"]["context_lines"]["type"], "integer");
        assert_eq!(schema["properties"]["context_lines"]["default"], 2);
        assert_eq!(schema["properties"]["context_lines"]["minimum"], 0);
    }

    #[test]
    fn test_read_file_schema() {
        let tool = find_tool("read_file");
        let schema = &tool["inputSchema"];

        assert_eq!(schema["required"], json!(["container", "path"]));
        assert_eq!(schema["properties"]["max_lines"]["default"], 0);
    }

    #[test]
    fn test_introspection_tools_take_no_required_params() {
        for name in ["get_security_policy", "get_blocked_paths", "get_allowed_commands"] {
            let tool = find_tool(name);
            assert!(
                tool["inputSchema"].get("required").is_none(),
                "{name} should have no required parameters"
            );
        }
    }

    #[test]
    fn test_every_tool_has_description() {
        let tools = tools::tools_list_result();
        for tool in tools["tools"].as_array().unwrap() {
            assert!(!tool["description"].as_str().unwrap().is_empty());
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }
}

mod json_rpc_error_codes {
    use super::*;

    #[test]
    fn test_code_constants() {
        assert_eq!(code::PARSE_ERROR, -32700);
        assert_eq!(code::INVALID_REQUEST, -32600);
        assert_eq!(code::METHOD_NOT_FOUND, -32601);
        assert_eq!(code::INVALID_PARAMS, -32602);
        assert_eq!(code::INTERNAL_ERROR, -32603);
        assert_eq!(code::NOT_INITIALIZED, -32000);
    }
}
