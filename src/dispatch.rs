//! Tool dispatcher.
//!
//! Routes `tools/call` to a handler. Every handler follows the same
//! template: coerce arguments, ask the policy engine, call the collaborator,
//! mask the output, wrap as text content. Host-path masking runs on every
//! outbound text after content masking.

use std::sync::Arc;

use regex::Regex;
use serde_json::{Value, json};

use crate::audit::{self, AuditCategory, AuditLog};
use crate::docker::{ContainerRuntime, LogQuery};
use crate::host::{HostCommandRunner, HostError, HostToolsManager};
use crate::jsonrpc::{JsonRpcResponse, code};
use crate::policy::{BlockedMatch, CommandVerdict, ExecDenial, Policy};
use crate::tools;

/// Everything a tool handler needs, shared across sessions.
pub struct ToolContext {
    pub policy: Arc<Policy>,
    pub docker: Arc<dyn ContainerRuntime>,
    pub host_tools: Option<HostToolsManager>,
    pub host_commands: Option<HostCommandRunner>,
    pub audit: Option<AuditLog>,
}

/// What one handler produced, before wrapping into a JSON-RPC frame.
enum Outcome {
    /// Successful tool output.
    Text(String),
    /// A blocked-path rule fired; surfaced as a *successful* structured
    /// result so the assistant can explain it rather than report a failure.
    Blocked(BlockedMatch),
    /// Policy denial for a non-file operation.
    Denied(String),
    /// Argument coercion failed.
    InvalidParams(String),
    /// Collaborator or execution failure.
    Failed(String),
}

pub fn tools_list(id: Option<Value>) -> JsonRpcResponse {
    JsonRpcResponse::success(id, tools::tools_list_result())
}

/// Handle a `tools/call` request.
pub async fn tools_call(ctx: &ToolContext, id: Option<Value>, params: &Value) -> JsonRpcResponse {
    let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    tracing::debug!(tool = %tool_name, "Dispatching tool call");

    let outcome = match tool_name {
        "list_containers" => list_containers(ctx, &arguments).await,
        "get_logs" => get_logs(ctx, &arguments).await,
        "get_stats" => get_stats(ctx, &arguments).await,
        "exec_command" => exec_command(ctx, &arguments).await,
        "inspect_container" => inspect_container(ctx, &arguments).await,
        "search_logs" => search_logs(ctx, &arguments).await,
        "list_files" => list_files(ctx, &arguments).await,
        "read_file" => read_file(ctx, &arguments).await,
        "get_allowed_commands" => get_allowed_commands(ctx, &arguments),
        "get_security_policy" => get_security_policy(ctx),
        "get_blocked_paths" => get_blocked_paths(ctx, &arguments),
        "restart_container" => lifecycle(ctx, &arguments, Lifecycle::Restart).await,
        "stop_container" => lifecycle(ctx, &arguments, Lifecycle::Stop).await,
        "start_container" => lifecycle(ctx, &arguments, Lifecycle::Start).await,
        "list_host_tools" => list_host_tools(ctx),
        "get_host_tool_info" => get_host_tool_info(ctx, &arguments),
        "run_host_tool" => run_host_tool(ctx, &arguments).await,
        "exec_host_command" => exec_host_command(ctx, &arguments).await,
        _ => {
            return JsonRpcResponse::error(
                id,
                code::INTERNAL_ERROR,
                format!("unknown tool: {tool_name}"),
            );
        }
    };

    finish(ctx, id, tool_name, &arguments, outcome)
}

/// Wrap an outcome into the JSON-RPC frame and feed the audit log.
fn finish(
    ctx: &ToolContext,
    id: Option<Value>,
    tool_name: &str,
    arguments: &Value,
    outcome: Outcome,
) -> JsonRpcResponse {
    let container = arguments
        .get("container")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    match outcome {
        Outcome::Text(text) => {
            audit::record(
                &ctx.audit,
                AuditCategory::ToolCalls,
                json!({"tool": tool_name, "container": container, "outcome": "ok"}),
            );
            text_result(ctx, id, text)
        }
        Outcome::Blocked(hit) => {
            audit::record(
                &ctx.audit,
                AuditCategory::ToolCalls,
                json!({"tool": tool_name, "container": container, "outcome": "blocked"}),
            );
            audit::record(
                &ctx.audit,
                AuditCategory::AccessDenied,
                json!({
                    "tool": tool_name,
                    "container": hit.container,
                    "path": hit.path,
                    "reason": hit.reason.tag(),
                }),
            );
            let body = json!({
                "blocked": true,
                "container": hit.container,
                "path": hit.path,
                "reason": hit.reason.tag(),
                "details": {
                    "pattern": hit.pattern,
                    "source": hit.source,
                    "original_path": hit.original,
                },
                "hint": hit.reason.hint(),
            });
            let text = format!(
                "⚠️ Access Blocked:\n\n```json\n{}\n```",
                pretty(&body)
            );
            text_result(ctx, id, text)
        }
        Outcome::Denied(message) => {
            audit::record(
                &ctx.audit,
                AuditCategory::ToolCalls,
                json!({"tool": tool_name, "container": container, "outcome": "denied"}),
            );
            audit::record(
                &ctx.audit,
                AuditCategory::AccessDenied,
                json!({"tool": tool_name, "container": container, "reason": message}),
            );
            tracing::info!(tool = %tool_name, reason = %message, "Tool call denied by policy");
            JsonRpcResponse::error(id, code::INTERNAL_ERROR, message)
        }
        Outcome::InvalidParams(message) => {
            JsonRpcResponse::error(id, code::INVALID_PARAMS, message)
        }
        Outcome::Failed(message) => {
            audit::record(
                &ctx.audit,
                AuditCategory::ToolCalls,
                json!({"tool": tool_name, "container": container, "outcome": "error"}),
            );
            tracing::error!(tool = %tool_name, error = %message, "Tool execution failed");
            JsonRpcResponse::error(id, code::INTERNAL_ERROR, message)
        }
    }
}

/// Host-path masking runs on every outbound text, after any content masking
/// the handler already applied.
fn text_result(ctx: &ToolContext, id: Option<Value>, text: String) -> JsonRpcResponse {
    let text = ctx.policy.mask_host_paths(&text);
    JsonRpcResponse::success(
        id,
        json!({
            "content": [{
                "type": "text",
                "text": text
            }]
        }),
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// Argument coercion helpers. Numeric fields may arrive as floats over JSON
// and are truncated where the schema declares an integer.

fn req_str(args: &Value, key: &str) -> Result<String, Outcome> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(Outcome::InvalidParams(format!(
            "missing required argument '{key}'"
        ))),
    }
}

fn opt_str(args: &Value, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

fn opt_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn opt_u64(args: &Value, key: &str, default: u64) -> u64 {
    match args.get(key) {
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(default),
        None => default,
    }
}

fn opt_i64(args: &Value, key: &str, default: i64) -> i64 {
    match args.get(key) {
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        None => default,
    }
}

/// Shared gate: permission toggle plus container allow-glob.
fn gate(ctx: &ToolContext, permission: (&str, bool), container: &str) -> Option<Outcome> {
    let (name, enabled) = permission;
    if !enabled {
        return Some(Outcome::Denied(format!(
            "{name} access is disabled by the security policy"
        )));
    }
    if !ctx.policy.container_allowed(container) {
        return Some(Outcome::Denied(format!(
            "container '{container}' is not in the allowed containers list"
        )));
    }
    None
}

async fn list_containers(ctx: &ToolContext, args: &Value) -> Outcome {
    let all = opt_bool(args, "all", true);
    match ctx.docker.list_containers(all).await {
        Ok(containers) => {
            let visible: Vec<_> = containers
                .into_iter()
                .filter(|c| ctx.policy.container_allowed(&c.name))
                .collect();
            Outcome::Text(pretty(&json!({ "containers": visible })))
        }
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn get_logs(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    if let Some(denied) = gate(ctx, ("logs", ctx.policy.permissions().logs), &container) {
        return denied;
    }

    let query = LogQuery {
        container,
        tail: opt_str(args, "tail", "all"),
        since: args.get("since").and_then(|v| v.as_str()).map(String::from),
    };
    match ctx.docker.logs(query).await {
        Ok(text) => Outcome::Text(ctx.policy.mask_logs(&text)),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn get_stats(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    if let Some(denied) = gate(ctx, ("stats", ctx.policy.permissions().stats), &container) {
        return denied;
    }

    match ctx.docker.stats(&container).await {
        Ok(stats) => Outcome::Text(pretty(&stats)),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn exec_command(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    let command = match req_str(args, "command") {
        Ok(command) => command,
        Err(outcome) => return outcome,
    };
    let dangerously = opt_bool(args, "dangerously", false);

    if let Some(denied) = gate(ctx, ("exec", ctx.policy.permissions().exec), &container) {
        return denied;
    }

    if dangerously {
        match ctx.policy.can_exec_dangerously(&container, &command) {
            Ok(()) => {}
            Err(ExecDenial::BlockedPath(hit)) => return Outcome::Blocked(hit),
            Err(e) => return Outcome::Denied(e.to_string()),
        }
    } else {
        match ctx.policy.command_allowed(&container, &command) {
            CommandVerdict::Allowed => {}
            CommandVerdict::NeedsDangerously => {
                return Outcome::Denied(format!(
                    "command '{command}' requires dangerously=true (file inspection commands are gated)"
                ));
            }
            CommandVerdict::Denied => {
                return Outcome::Denied(format!(
                    "command '{command}' is not in the exec whitelist for container '{container}'"
                ));
            }
        }
    }

    match ctx.docker.exec(&container, &command).await {
        Ok(result) => Outcome::Text(pretty(&json!({
            "exit_code": result.exit_code,
            "output": ctx.policy.mask_exec(&result.output),
        }))),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn inspect_container(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    if let Some(denied) = gate(ctx, ("inspect", ctx.policy.permissions().inspect), &container) {
        return denied;
    }

    match ctx.docker.inspect(&container).await {
        Ok(record) => Outcome::Text(ctx.policy.mask_inspect(&pretty(&record))),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn search_logs(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    let pattern = match req_str(args, "pattern") {
        Ok(pattern) => pattern,
        Err(outcome) => return outcome,
    };
    if let Some(denied) = gate(ctx, ("logs", ctx.policy.permissions().logs), &container) {
        return denied;
    }

    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(e) => return Outcome::InvalidParams(format!("invalid search pattern: {e}")),
    };
    let context_lines = opt_u64(args, "context_lines", 2) as usize;

    let query = LogQuery {
        container: container.clone(),
        tail: opt_str(args, "tail", "1000"),
        since: None,
    };
    let raw = match ctx.docker.logs(query).await {
        Ok(raw) => raw,
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    // Mask before matching: a pattern like "password=" must not reveal that
    // something was masked at a given line.
    let masked = ctx.policy.mask_logs(&raw);
    let lines: Vec<&str> = masked.lines().collect();

    let mut matches = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if !regex.is_match(line) {
            continue;
        }
        let mut context = Vec::new();
        let start = index.saturating_sub(context_lines);
        for before in &lines[start..index] {
            context.push(format!("- {before}"));
        }
        let end = (index + 1 + context_lines).min(lines.len());
        for after in &lines[index + 1..end] {
            context.push(format!("+ {after}"));
        }
        matches.push(json!({
            "line_number": index + 1,
            "line": line,
            "context": context,
        }));
    }

    Outcome::Text(pretty(&json!({
        "container": container,
        "pattern": pattern,
        "total_lines": lines.len(),
        "matches_count": matches.len(),
        "matches": matches,
    })))
}

async fn list_files(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    let path = opt_str(args, "path", "/");

    if !ctx.policy.container_allowed(&container) {
        return Outcome::Denied(format!(
            "container '{container}' is not in the allowed containers list"
        ));
    }
    if let Some(hit) = ctx.policy.path_blocked(&container, &path) {
        return Outcome::Blocked(hit);
    }

    match ctx.docker.list_files(&container, &path).await {
        Ok(listing) => Outcome::Text(listing),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn read_file(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    let path = match req_str(args, "path") {
        Ok(path) => path,
        Err(outcome) => return outcome,
    };
    let max_lines = opt_u64(args, "max_lines", 0);

    if !ctx.policy.container_allowed(&container) {
        return Outcome::Denied(format!(
            "container '{container}' is not in the allowed containers list"
        ));
    }
    // A blocked path never reaches the collaborator; the file bytes stay in
    // the container.
    if let Some(hit) = ctx.policy.path_blocked(&container, &path) {
        return Outcome::Blocked(hit);
    }

    match ctx.docker.read_file(&container, &path, max_lines).await {
        Ok(content) => Outcome::Text(content),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

// Introspection tools are never blocked, in every mode, so the operator or
// the AI can diagnose why everything else is refused.

fn get_allowed_commands(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = args.get("container").and_then(|v| v.as_str());
    Outcome::Text(pretty(&ctx.policy.allowed_commands_json(container)))
}

fn get_security_policy(ctx: &ToolContext) -> Outcome {
    audit::record(
        &ctx.audit,
        AuditCategory::SecurityPolicy,
        json!({"action": "policy_dump"}),
    );
    Outcome::Text(pretty(&ctx.policy.snapshot()))
}

fn get_blocked_paths(ctx: &ToolContext, args: &Value) -> Outcome {
    let container = args.get("container").and_then(|v| v.as_str());
    Outcome::Text(pretty(&ctx.policy.blocked_paths_json(container)))
}

enum Lifecycle {
    Start,
    Stop,
    Restart,
}

async fn lifecycle(ctx: &ToolContext, args: &Value, verb: Lifecycle) -> Outcome {
    let container = match req_str(args, "container") {
        Ok(container) => container,
        Err(outcome) => return outcome,
    };
    if let Some(denied) = gate(
        ctx,
        ("lifecycle", ctx.policy.permissions().lifecycle),
        &container,
    ) {
        return denied;
    }
    let timeout = opt_i64(args, "timeout", 10);

    let result = match verb {
        Lifecycle::Start => ctx.docker.start(&container).await.map(|()| "started"),
        Lifecycle::Stop => ctx
            .docker
            .stop(&container, timeout)
            .await
            .map(|()| "stopped"),
        Lifecycle::Restart => ctx
            .docker
            .restart(&container, timeout)
            .await
            .map(|()| "restarted"),
    };

    match result {
        Ok(verb) => Outcome::Text(format!("Container '{container}' {verb}")),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

fn list_host_tools(ctx: &ToolContext) -> Outcome {
    let Some(manager) = &ctx.host_tools else {
        return Outcome::Denied("host tools are not configured".to_string());
    };
    Outcome::Text(pretty(&json!({ "tools": manager.list() })))
}

fn get_host_tool_info(ctx: &ToolContext, args: &Value) -> Outcome {
    let Some(manager) = &ctx.host_tools else {
        return Outcome::Denied("host tools are not configured".to_string());
    };
    let name = match req_str(args, "name") {
        Ok(name) => name,
        Err(outcome) => return outcome,
    };
    match manager.info(&name) {
        Ok(info) => Outcome::Text(pretty(&serde_json::to_value(info).unwrap_or_default())),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn run_host_tool(ctx: &ToolContext, args: &Value) -> Outcome {
    let Some(manager) = &ctx.host_tools else {
        return Outcome::Denied("host tools are not configured".to_string());
    };
    let name = match req_str(args, "name") {
        Ok(name) => name,
        Err(outcome) => return outcome,
    };
    let tool_args: Vec<String> = args
        .get("args")
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    match manager.run(&name, &tool_args).await {
        Ok(result) => Outcome::Text(pretty(&json!({
            "exit_code": result.exit_code,
            "output": ctx.policy.mask_exec(&result.output),
        }))),
        Err(e @ (HostError::NotApproved(_) | HostError::HashMismatch(_))) => {
            Outcome::Denied(e.to_string())
        }
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

async fn exec_host_command(ctx: &ToolContext, args: &Value) -> Outcome {
    let Some(runner) = &ctx.host_commands else {
        return Outcome::Denied("host commands are not configured".to_string());
    };
    let command = match req_str(args, "command") {
        Ok(command) => command,
        Err(outcome) => return outcome,
    };
    let dangerously = opt_bool(args, "dangerously", false);

    if let Err(e) = runner.check(&command, dangerously) {
        return Outcome::Denied(e.to_string());
    }

    match runner.run(&command).await {
        Ok(result) => Outcome::Text(pretty(&json!({
            "exit_code": result.exit_code,
            "output": ctx.policy.mask_exec(&result.output),
        }))),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::docker::{ContainerInfo, DockerError, ExecOutput};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Canned collaborator that records whether it was touched.
    struct MockRuntime {
        logs: String,
        touched: Mutex<Vec<String>>,
    }

    impl MockRuntime {
        fn new(logs: &str) -> Self {
            Self {
                logs: logs.to_string(),
                touched: Mutex::new(Vec::new()),
            }
        }

        fn touch(&self, op: &str) {
            self.touched.lock().unwrap().push(op.to_string());
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn ping(&self) -> Result<(), DockerError> {
            Ok(())
        }

        async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerInfo>, DockerError> {
            self.touch("list");
            Ok(vec![
                ContainerInfo {
                    id: "aaa".into(),
                    name: "api".into(),
                    image: "app:latest".into(),
                    state: "running".into(),
                    status: "Up 2 hours".into(),
                },
                ContainerInfo {
                    id: "bbb".into(),
                    name: "db".into(),
                    image: "postgres:16".into(),
                    state: "running".into(),
                    status: "Up 2 hours".into(),
                },
            ])
        }

        async fn inspect(&self, _container: &str) -> Result<Value, DockerError> {
            self.touch("inspect");
            Ok(json!({"Config": {"Env": ["PASSWORD=topsecret", "PORT=8080"]}}))
        }

        async fn stats(&self, _container: &str) -> Result<Value, DockerError> {
            self.touch("stats");
            Ok(json!({"cpu_stats": {}}))
        }

        async fn logs(&self, _query: LogQuery) -> Result<String, DockerError> {
            self.touch("logs");
            Ok(self.logs.clone())
        }

        async fn exec(&self, _container: &str, _command: &str) -> Result<ExecOutput, DockerError> {
            self.touch("exec");
            Ok(ExecOutput {
                exit_code: 0,
                output: "ran\n".into(),
            })
        }

        async fn start(&self, _container: &str) -> Result<(), DockerError> {
            self.touch("start");
            Ok(())
        }

        async fn stop(&self, _container: &str, _timeout: i64) -> Result<(), DockerError> {
            self.touch("stop");
            Ok(())
        }

        async fn restart(&self, _container: &str, _timeout: i64) -> Result<(), DockerError> {
            self.touch("restart");
            Ok(())
        }

        async fn list_files(&self, _container: &str, _path: &str) -> Result<String, DockerError> {
            self.touch("list_files");
            Ok("total 0\n".into())
        }

        async fn read_file(
            &self,
            _container: &str,
            _path: &str,
            _max_lines: u64,
        ) -> Result<String, DockerError> {
            self.touch("read_file");
            Ok("contents\n".into())
        }
    }

    fn context(
        security: impl FnOnce(&mut SecurityConfig),
        logs: &str,
    ) -> (ToolContext, Arc<MockRuntime>) {
        let mut cfg = SecurityConfig::default();
        security(&mut cfg);
        let docker = Arc::new(MockRuntime::new(logs));
        let ctx = ToolContext {
            policy: Arc::new(Policy::from_config(&cfg, "")),
            docker: docker.clone(),
            host_tools: None,
            host_commands: None,
            audit: None,
        };
        (ctx, docker)
    }

    fn call_params(name: &str, arguments: Value) -> Value {
        json!({"name": name, "arguments": arguments})
    }

    fn result_text(response: &JsonRpcResponse) -> String {
        response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let (ctx, _) = context(|_| {}, "");
        let response = tools_call(&ctx, Some(json!(1)), &call_params("no_such_tool", json!({}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, code::INTERNAL_ERROR);
        assert!(error.message.contains("unknown tool"));
    }

    #[tokio::test]
    async fn disallowed_container_is_denied_without_touching_docker() {
        let (ctx, docker) = context(|_| {}, ""); // strict + empty allow-list
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("get_logs", json!({"container": "not-in-allowlist"})),
        )
        .await;

        let error = response.error.unwrap();
        assert!(error.message.contains("not-in-allowlist"));
        assert!(error.message.contains("allowed containers"));
        assert!(docker.touched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_containers_filters_by_allow_glob() {
        let (ctx, _) = context(
            |s| s.allowed_containers = vec!["api".to_string()],
            "",
        );
        let response = tools_call(&ctx, Some(json!(1)), &call_params("list_containers", json!({}))).await;
        let text = result_text(&response);
        assert!(text.contains("\"api\""));
        assert!(!text.contains("\"db\""));
    }

    #[tokio::test]
    async fn logs_are_masked() {
        let (ctx, _) = context(
            |s| s.allowed_containers = vec!["api".to_string()],
            "DATABASE_URL=postgres://admin:secret123@db:5432/app\n",
        );
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("get_logs", json!({"container": "api"})),
        )
        .await;

        let text = result_text(&response);
        assert!(text.contains("DATABASE_URL=[MASKED]db:5432/app"));
        assert!(!text.contains("secret123"));
    }

    #[tokio::test]
    async fn logs_permission_toggle() {
        let (ctx, docker) = context(
            |s| {
                s.allowed_containers = vec!["api".to_string()];
                s.permissions.logs = false;
            },
            "line\n",
        );
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("get_logs", json!({"container": "api"})),
        )
        .await;

        assert!(response.error.unwrap().message.contains("logs access is disabled"));
        assert!(docker.touched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exec_requires_whitelist_without_dangerously() {
        let (ctx, docker) = context(
            |s| {
                s.allowed_containers = vec!["api".to_string()];
                s.exec_whitelist =
                    [("api".to_string(), vec!["npm test".to_string()])].into_iter().collect();
            },
            "",
        );

        let denied = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("exec_command", json!({"container": "api", "command": "rm -rf /"})),
        )
        .await;
        assert!(denied.error.unwrap().message.contains("exec whitelist"));
        assert!(docker.touched.lock().unwrap().is_empty());

        let allowed = tools_call(
            &ctx,
            Some(json!(2)),
            &call_params("exec_command", json!({"container": "api", "command": "npm test"})),
        )
        .await;
        let text = result_text(&allowed);
        assert!(text.contains("\"exit_code\": 0"));
        assert_eq!(docker.touched.lock().unwrap().as_slice(), ["exec"]);
    }

    #[tokio::test]
    async fn dangerous_exec_blocked_path_is_structured() {
        let (ctx, docker) = context(
            |s| {
                s.allowed_containers = vec!["api".to_string()];
                s.exec_dangerously.enabled = true;
                s.exec_dangerously.commands =
                    [("api".to_string(), vec!["tail".to_string()])].into_iter().collect();
                s.blocked_paths.manual =
                    [("api".to_string(), vec!["/secrets/*".to_string()])].into_iter().collect();
            },
            "",
        );

        // base word accepted, path argument hits the blocked rule
        let blocked = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params(
                "exec_command",
                json!({"container": "api", "command": "tail -100 /secrets/key", "dangerously": true}),
            ),
        )
        .await;
        assert!(blocked.error.is_none());
        let text = result_text(&blocked);
        assert!(text.starts_with("⚠️ Access Blocked:"));
        assert!(text.contains("\"blocked\": true"));
        assert!(text.contains("manual_block"));
        assert!(docker.touched.lock().unwrap().is_empty());

        // same command against a clean path runs
        let ran = tools_call(
            &ctx,
            Some(json!(2)),
            &call_params(
                "exec_command",
                json!({"container": "api", "command": "tail -100 /var/log/app.log", "dangerously": true}),
            ),
        )
        .await;
        assert!(ran.error.is_none());
        assert!(result_text(&ran).contains("exit_code"));
    }

    #[tokio::test]
    async fn read_file_blocked_path_never_touches_docker() {
        let (ctx, docker) = context(
            |s| {
                s.allowed_containers = vec!["api".to_string()];
                s.blocked_paths.manual =
                    [("api".to_string(), vec!["/.env".to_string()])].into_iter().collect();
            },
            "",
        );

        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("read_file", json!({"container": "api", "path": "/.env"})),
        )
        .await;

        assert!(response.error.is_none());
        let text = result_text(&response);
        assert!(text.contains("\"blocked\": true"));
        assert!(text.contains("\"container\": \"api\""));
        assert!(text.contains("\"path\": \"/.env\""));
        assert!(text.contains("\"reason\": \"manual_block\""));
        assert!(text.contains("hint"));
        assert!(docker.touched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_file_clean_path_returns_content() {
        let (ctx, _) = context(|s| s.allowed_containers = vec!["api".to_string()], "");
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("read_file", json!({"container": "api", "path": "/app/main.py"})),
        )
        .await;
        assert_eq!(result_text(&response), "contents\n");
    }

    #[tokio::test]
    async fn search_logs_masks_before_matching() {
        let (ctx, _) = context(
            |s| s.allowed_containers = vec!["api".to_string()],
            "boot ok\npassword=hunter2\nready\n",
        );

        // The secret is masked before matching, so a pattern aimed at the
        // secret value finds nothing.
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("search_logs", json!({"container": "api", "pattern": "hunter2"})),
        )
        .await;
        let body: Value = serde_json::from_str(&result_text(&response)).unwrap();
        assert_eq!(body["matches_count"], 0);

        // Matching the replacement works and context lines carry markers.
        let response = tools_call(
            &ctx,
            Some(json!(2)),
            &call_params(
                "search_logs",
                json!({"container": "api", "pattern": "MASKED", "context_lines": 1}),
            ),
        )
        .await;
        let body: Value = serde_json::from_str(&result_text(&response)).unwrap();
        assert_eq!(body["matches_count"], 1);
        assert_eq!(body["total_lines"], 3);
        let hit = &body["matches"][0];
        assert_eq!(hit["line_number"], 2);
        assert_eq!(hit["context"][0], "- boot ok");
        assert_eq!(hit["context"][1], "+ ready");
    }

    #[tokio::test]
    async fn search_logs_rejects_bad_pattern() {
        let (ctx, _) = context(|s| s.allowed_containers = vec!["api".to_string()], "");
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("search_logs", json!({"container": "api", "pattern": "[unclosed"})),
        )
        .await;
        assert_eq!(response.error.unwrap().code, code::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn inspect_masks_env_values() {
        let (ctx, _) = context(|s| s.allowed_containers = vec!["api".to_string()], "");
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("inspect_container", json!({"container": "api"})),
        )
        .await;
        let text = result_text(&response);
        assert!(!text.contains("topsecret"));
        assert!(text.contains("PORT=8080"));
    }

    #[tokio::test]
    async fn introspection_works_under_strict_with_empty_allowlist() {
        let (ctx, _) = context(|_| {}, "");

        for tool in ["get_allowed_commands", "get_security_policy", "get_blocked_paths"] {
            let response = tools_call(&ctx, Some(json!(1)), &call_params(tool, json!({}))).await;
            assert!(response.error.is_none(), "{tool} should never be blocked");
        }
    }

    #[tokio::test]
    async fn lifecycle_toggle_and_success_text() {
        let (ctx, docker) = context(
            |s| s.allowed_containers = vec!["api".to_string()],
            "",
        );
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("restart_container", json!({"container": "api", "timeout": 5})),
        )
        .await;
        assert_eq!(result_text(&response), "Container 'api' restarted");
        assert_eq!(docker.touched.lock().unwrap().as_slice(), ["restart"]);

        let (ctx, docker) = context(
            |s| {
                s.allowed_containers = vec!["api".to_string()];
                s.permissions.lifecycle = false;
            },
            "",
        );
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("stop_container", json!({"container": "api"})),
        )
        .await;
        assert!(response.error.unwrap().message.contains("lifecycle"));
        assert!(docker.touched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn float_arguments_truncate_to_integers() {
        let (ctx, _) = context(
            |s| s.allowed_containers = vec!["api".to_string()],
            "a\nb\nc\n",
        );
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params(
                "search_logs",
                json!({"container": "api", "pattern": "b", "context_lines": 1.9}),
            ),
        )
        .await;
        let body: Value = serde_json::from_str(&result_text(&response)).unwrap();
        // 1.9 truncates to 1 context line each side
        assert_eq!(body["matches"][0]["context"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let (ctx, _) = context(|_| {}, "");
        let response = tools_call(&ctx, Some(json!(1)), &call_params("get_logs", json!({}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, code::INVALID_PARAMS);
        assert!(error.message.contains("container"));
    }

    #[tokio::test]
    async fn host_tools_unconfigured() {
        let (ctx, _) = context(|_| {}, "");
        let response =
            tools_call(&ctx, Some(json!(1)), &call_params("list_host_tools", json!({}))).await;
        assert!(response.error.unwrap().message.contains("not configured"));
    }

    #[tokio::test]
    async fn host_path_masking_applies_to_output() {
        let (ctx, _) = context(
            |s| s.allowed_containers = vec!["api".to_string()],
            "config at /Users/alice/dev/app.yaml\n",
        );
        let response = tools_call(
            &ctx,
            Some(json!(1)),
            &call_params("get_logs", json!({"container": "api"})),
        )
        .await;
        let text = result_text(&response);
        assert!(text.contains("[HOST_PATH]/dev/app.yaml"));
        assert!(!text.contains("alice"));
    }
}
