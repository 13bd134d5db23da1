//! Security policy engine.
//!
//! Pure functions over a policy compiled at load time: is a container
//! visible, is a command whitelisted, is a path blocked, what must be masked.
//! Everything here is immutable after construction and safe to share across
//! request handlers; a tool call never parses policy text.
//!
//! Check order for dangerous execs: base word, shell metacharacters, path
//! traversal, then blocked-path rules.

mod import;
mod masking;

pub use import::{DEFAULT_GLOBAL_PATTERNS, ImportedRule};
pub use masking::{DEFAULT_PATTERNS, HostPathMasker, MaskKind, OutputMasker};

use std::collections::HashMap;

use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::SecurityConfig;

/// Security mode. Strict denies everything an empty allow-list doesn't name;
/// moderate treats an empty allow-list as open; permissive additionally drops
/// the default mask and global-pattern sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Strict,
    Moderate,
    Permissive,
}

impl SecurityMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "strict" => Some(Self::Strict),
            "moderate" => Some(Self::Moderate),
            "permissive" => Some(Self::Permissive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Moderate => "moderate",
            Self::Permissive => "permissive",
        }
    }
}

/// Per-operation permission toggles.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Permissions {
    pub logs: bool,
    pub inspect: bool,
    pub stats: bool,
    pub exec: bool,
    pub lifecycle: bool,
}

/// Why a path is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    ManualBlock,
    AutoImportedBlock,
    GlobalPattern,
    VolumeMountToDevNull,
    TmpfsMount,
    DevcontainerBindMount,
    DevcontainerTmpfsMount,
    ClaudeCodeSettingsDeny,
}

impl BlockReason {
    pub fn tag(self) -> &'static str {
        match self {
            Self::ManualBlock => "manual_block",
            Self::AutoImportedBlock => "auto_imported_block",
            Self::GlobalPattern => "global_pattern",
            Self::VolumeMountToDevNull => "volume_mount_to_dev_null",
            Self::TmpfsMount => "tmpfs_mount",
            Self::DevcontainerBindMount => "devcontainer_bind_mount",
            Self::DevcontainerTmpfsMount => "devcontainer_tmpfs_mount",
            Self::ClaudeCodeSettingsDeny => "claude_code_settings_deny",
        }
    }

    /// Human explanation surfaced in the structured blocked response so the
    /// assistant can describe the situation instead of reporting a failure.
    pub fn hint(self) -> &'static str {
        match self {
            Self::ManualBlock => "This path is blocked by the operator's security policy.",
            Self::AutoImportedBlock => {
                "This path was imported from an ignore-style block list and is hidden from AI access."
            }
            Self::GlobalPattern => {
                "This path matches a globally blocked pattern for sensitive files."
            }
            Self::VolumeMountToDevNull => {
                "This path is masked with a /dev/null mount in the compose file; the sandbox hides it."
            }
            Self::TmpfsMount => {
                "This path is a tmpfs mount declared in the compose file and is hidden from AI access."
            }
            Self::DevcontainerBindMount => {
                "This path is masked with a /dev/null bind mount in the devcontainer configuration."
            }
            Self::DevcontainerTmpfsMount => {
                "This path is a tmpfs mount declared in the devcontainer configuration."
            }
            Self::ClaudeCodeSettingsDeny => {
                "This path is denied by the assistant settings (permissions.deny)."
            }
        }
    }
}

/// A compiled blocked-path rule.
#[derive(Debug)]
pub struct BlockedPathRule {
    pub container: String,
    pub pattern: String,
    matcher: GlobMatcher,
    pub reason: BlockReason,
    pub source: String,
    pub original: String,
}

/// The rule that blocked a concrete (container, path) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedMatch {
    pub container: String,
    pub path: String,
    pub reason: BlockReason,
    pub pattern: String,
    pub source: String,
    pub original: String,
}

/// Verdict for a non-dangerous exec request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Command matches the exec whitelist.
    Allowed,
    /// Not whitelisted, but its base word is in the dangerously list; the
    /// caller may retry with `dangerously=true`.
    NeedsDangerously,
    /// Not permitted at all.
    Denied,
}

/// Why a dangerous exec was refused.
#[derive(Debug, Error)]
pub enum ExecDenial {
    #[error("dangerous commands are not enabled for this server")]
    NotEnabled,

    #[error("command '{0}' is not in the dangerously-allowed commands for this container")]
    BaseNotAllowed(String),

    #[error("command contains forbidden shell construct '{0}'")]
    ShellConstruct(&'static str),

    #[error("command contains a path traversal segment")]
    Traversal,

    #[error("path '{}' is blocked ({})", .0.path, .0.reason.tag())]
    BlockedPath(BlockedMatch),
}

/// Immutable, concurrency-safe security policy.
#[derive(Debug)]
pub struct Policy {
    mode: SecurityMode,
    container_patterns: Vec<String>,
    container_globs: Vec<GlobMatcher>,
    exec_whitelist: HashMap<String, Vec<String>>,
    dangerously_enabled: bool,
    dangerously_commands: HashMap<String, Vec<String>>,
    permissions: Permissions,
    blocked: Vec<BlockedPathRule>,
    masker: OutputMasker,
    host_paths: HostPathMasker,
}

impl Policy {
    /// Compile a policy from validated config. Bad globs and regexes are
    /// skipped with a warning; only structural config errors fail the boot,
    /// and those are caught by `Config::validate` before this runs.
    pub fn from_config(security: &SecurityConfig, workspace_root: &str) -> Self {
        // validate() has already rejected unknown modes.
        let mode = SecurityMode::parse(&security.mode).unwrap_or(SecurityMode::Strict);

        let mut container_patterns = Vec::new();
        let mut container_globs = Vec::new();
        for pattern in &security.allowed_containers {
            match compile_glob(pattern) {
                Ok(matcher) => {
                    container_patterns.push(pattern.clone());
                    container_globs.push(matcher);
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid container glob");
                }
            }
        }

        let blocked = import::collect_rules(&security.blocked_paths, mode, workspace_root)
            .into_iter()
            .filter_map(|rule| match compile_glob(&rule.pattern) {
                Ok(matcher) => Some(BlockedPathRule {
                    container: rule.container,
                    pattern: rule.pattern,
                    matcher,
                    reason: rule.reason,
                    source: rule.source,
                    original: rule.original,
                }),
                Err(e) => {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "Skipping invalid blocked-path glob");
                    None
                }
            })
            .collect();

        Self {
            mode,
            container_patterns,
            container_globs,
            exec_whitelist: security.exec_whitelist.clone(),
            dangerously_enabled: security.exec_dangerously.enabled,
            dangerously_commands: security.exec_dangerously.commands.clone(),
            permissions: Permissions {
                logs: security.permissions.logs,
                inspect: security.permissions.inspect,
                stats: security.permissions.stats,
                exec: security.permissions.exec,
                lifecycle: security.permissions.lifecycle,
            },
            blocked,
            masker: OutputMasker::from_config(&security.output_masking, mode),
            host_paths: HostPathMasker::from_config(&security.host_path_masking),
        }
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Container visibility. Strict mode with an empty allow-list denies
    /// every container; moderate and permissive treat empty as open.
    pub fn container_allowed(&self, name: &str) -> bool {
        if self.container_globs.is_empty() {
            return self.mode != SecurityMode::Strict;
        }
        self.container_globs.iter().any(|g| g.is_match(name))
    }

    /// Non-dangerous exec check against the whitelist (container-specific
    /// entries plus the `*` defaults).
    pub fn command_allowed(&self, container: &str, command: &str) -> CommandVerdict {
        let command = command.trim();
        if self
            .whitelist_entries(container)
            .any(|pattern| pattern_matches(pattern, command))
        {
            return CommandVerdict::Allowed;
        }
        if self.dangerously_enabled {
            if let Some(base) = command.split_whitespace().next() {
                if self
                    .dangerously_entries(container)
                    .any(|allowed| allowed == base)
                {
                    return CommandVerdict::NeedsDangerously;
                }
            }
        }
        CommandVerdict::Denied
    }

    /// Full dangerous-exec check: base word whitelist, shell constructs,
    /// traversal, then every path-looking token against the blocked rules.
    pub fn can_exec_dangerously(&self, container: &str, command: &str) -> Result<(), ExecDenial> {
        if !self.dangerously_enabled {
            return Err(ExecDenial::NotEnabled);
        }
        let command = command.trim();
        let base = command.split_whitespace().next().unwrap_or_default();
        if base.is_empty()
            || !self
                .dangerously_entries(container)
                .any(|allowed| allowed == base)
        {
            return Err(ExecDenial::BaseNotAllowed(base.to_string()));
        }
        if let Some(construct) = find_shell_construct(command) {
            return Err(ExecDenial::ShellConstruct(construct));
        }
        for token in command.split_whitespace() {
            if has_traversal(token) {
                return Err(ExecDenial::Traversal);
            }
        }
        for path in path_like_tokens(command) {
            if let Some(hit) = self.path_blocked(container, &path) {
                return Err(ExecDenial::BlockedPath(hit));
            }
        }
        Ok(())
    }

    /// First matching rule wins and supplies the reason tag.
    pub fn path_blocked(&self, container: &str, path: &str) -> Option<BlockedMatch> {
        self.blocked
            .iter()
            .find(|rule| {
                (rule.container == "*" || rule.container == container)
                    && rule.matcher.is_match(path)
            })
            .map(|rule| BlockedMatch {
                container: container.to_string(),
                path: path.to_string(),
                reason: rule.reason,
                pattern: rule.pattern.clone(),
                source: rule.source.clone(),
                original: rule.original.clone(),
            })
    }

    pub fn blocked_rules(&self) -> &[BlockedPathRule] {
        &self.blocked
    }

    pub fn mask_logs(&self, text: &str) -> String {
        self.mask_kind(MaskKind::Logs, text)
    }

    pub fn mask_exec(&self, text: &str) -> String {
        self.mask_kind(MaskKind::Exec, text)
    }

    pub fn mask_inspect(&self, text: &str) -> String {
        self.mask_kind(MaskKind::Inspect, text)
    }

    fn mask_kind(&self, kind: MaskKind, text: &str) -> String {
        if self.masker.applies_to(kind) {
            self.masker.mask(text)
        } else {
            text.to_string()
        }
    }

    /// Host-path masking runs on every tool output after content masking so
    /// masked fragments cannot re-reveal a username.
    pub fn mask_host_paths(&self, text: &str) -> String {
        self.host_paths.mask(text)
    }

    fn whitelist_entries<'a>(&'a self, container: &'a str) -> impl Iterator<Item = &'a String> {
        self.exec_whitelist
            .get("*")
            .into_iter()
            .chain(self.exec_whitelist.get(container))
            .flatten()
    }

    fn dangerously_entries<'a>(&'a self, container: &'a str) -> impl Iterator<Item = &'a String> {
        self.dangerously_commands
            .get("*")
            .into_iter()
            .chain(self.dangerously_commands.get(container))
            .flatten()
    }

    pub fn dangerously_enabled(&self) -> bool {
        self.dangerously_enabled
    }

    /// Exec-whitelist listing for `get_allowed_commands`.
    pub fn allowed_commands_json(&self, container: Option<&str>) -> Value {
        let whitelist_view = |map: &HashMap<String, Vec<String>>| -> Value {
            match container {
                Some(name) => {
                    let mut merged: Vec<String> = map.get("*").cloned().unwrap_or_default();
                    if name != "*" {
                        merged.extend(map.get(name).cloned().unwrap_or_default());
                    }
                    let mut view = serde_json::Map::new();
                    view.insert(name.to_string(), json!(merged));
                    Value::Object(view)
                }
                None => {
                    let mut keys: Vec<_> = map.keys().collect();
                    keys.sort();
                    let all: serde_json::Map<String, Value> = keys
                        .into_iter()
                        .map(|k| (k.clone(), json!(map[k])))
                        .collect();
                    Value::Object(all)
                }
            }
        };

        let mut result = json!({ "exec_whitelist": whitelist_view(&self.exec_whitelist) });
        if self.dangerously_enabled {
            result["exec_dangerously"] = whitelist_view(&self.dangerously_commands);
        }
        result
    }

    /// Policy dump for `get_security_policy`.
    pub fn snapshot(&self) -> Value {
        json!({
            "mode": self.mode.as_str(),
            "allowed_containers": self.container_patterns,
            "permissions": self.permissions,
            "exec_whitelist": self.exec_whitelist,
            "exec_dangerously": {
                "enabled": self.dangerously_enabled,
                "commands": self.dangerously_commands,
            },
            "blocked_paths": self.blocked.len(),
            "output_masking": {
                "patterns": self.masker.pattern_sources().len(),
                "replacement": self.masker.replacement(),
                "apply_to": self.masker.apply_to(),
            },
            "host_path_masking": {
                "replacement": self.host_paths.replacement(),
            },
        })
    }

    /// Blocked-rule listing for `get_blocked_paths`.
    pub fn blocked_paths_json(&self, container: Option<&str>) -> Value {
        let rules: Vec<Value> = self
            .blocked
            .iter()
            .filter(|rule| match container {
                Some(name) => rule.container == "*" || rule.container == name,
                None => true,
            })
            .map(|rule| {
                json!({
                    "container": rule.container,
                    "pattern": rule.pattern,
                    "reason": rule.reason.tag(),
                    "source": rule.source,
                    "original_path": rule.original,
                })
            })
            .collect();
        json!({ "blocked_paths": rules })
    }
}

/// Whitelist entry match: exact string, or trailing `*` meaning prefix match
/// with a space boundary. `"npm test"` matches only `npm test`; `"echo *"`
/// matches `echo hello` but not `echoing`.
pub fn pattern_matches(pattern: &str, command: &str) -> bool {
    let pattern = pattern.trim();
    if let Some(prefix) = pattern.strip_suffix('*') {
        let prefix = prefix.trim_end();
        if prefix.is_empty() {
            return true;
        }
        command == prefix || command.starts_with(&format!("{prefix} "))
    } else {
        command == pattern
    }
}

/// Shell constructs that are a hard reject in dangerous execs and host
/// commands: pipes, redirects, chaining, substitution.
pub fn find_shell_construct(command: &str) -> Option<&'static str> {
    const CONSTRUCTS: &[&str] = &["&&", "||", "$(", "|", ">", "<", ";", "`"];
    CONSTRUCTS.iter().find(|c| command.contains(**c)).copied()
}

fn has_traversal(token: &str) -> bool {
    let trimmed = token.trim_matches(|c| c == '"' || c == '\'');
    trimmed == ".." || trimmed.starts_with("../") || trimmed.ends_with("/..") || trimmed.contains("/../")
}

/// Tokens that look like container paths: absolute, `./`-relative, or bare
/// words with a separator that are not option flags.
fn path_like_tokens(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .skip(1)
        .filter_map(|token| {
            let token = token.trim_matches(|c| c == '"' || c == '\'');
            if token.starts_with('/') {
                Some(token.to_string())
            } else if let Some(rest) = token.strip_prefix("./") {
                Some(format!("/{rest}"))
            } else if token.contains('/') && !token.starts_with('-') {
                Some(format!("/{token}"))
            } else {
                None
            }
        })
        .collect()
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    // One dialect everywhere: `*` stays inside a path component, `**` spans
    // components.
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}
