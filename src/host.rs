//! Host-access subsystem.
//!
//! Two independent opt-in features: operator-staged host tools (with an
//! optional promote-by-hash approval step) and a whitelist of plain host
//! commands executed in the workspace root. Output from both flows through
//! the policy engine's masking before it reaches the client.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{HostCommandsConfig, HostToolsConfig};
use crate::policy::{find_shell_construct, pattern_matches};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown host tool: {0}")]
    UnknownTool(String),

    #[error("host tool '{0}' is not approved; run with --sync to promote staged tools")]
    NotApproved(String),

    #[error("host tool '{0}' changed since approval (hash mismatch); re-run --sync")]
    HashMismatch(String),

    #[error("command not in host whitelist: {0}")]
    NotWhitelisted(String),

    #[error("command denied by host policy: {0}")]
    Denied(String),

    #[error("command contains forbidden shell construct '{0}'")]
    ShellConstruct(&'static str),

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a host tool or host command; exit codes are data, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct HostOutput {
    pub exit_code: i64,
    pub output: String,
}

/// Discovered host tool with its parsed header.
#[derive(Debug, Clone, Serialize)]
pub struct HostToolInfo {
    pub name: String,
    pub path: String,
    pub description: String,
    pub usage: Vec<String>,
    pub examples: Vec<String>,
    pub approved: bool,
}

/// Promotion record for one approved tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApprovedEntry {
    path: String,
    sha256: String,
}

const MANIFEST_NAME: &str = ".approved.json";

/// Host-tool discovery and execution.
///
/// Legacy mode (no approved dir): every discovered tool in the staging dir
/// runs in place. Secure mode: only tools promoted into the approved dir by
/// `sync` are executable; staged tools appear in listings only when
/// configured, and can never run.
pub struct HostToolsManager {
    staging_dir: PathBuf,
    approved_dir: Option<PathBuf>,
    timeout: Duration,
    list_staging: bool,
}

impl HostToolsManager {
    pub fn from_config(cfg: &HostToolsConfig) -> Option<Self> {
        if !cfg.enabled || cfg.tools_dir.is_empty() {
            return None;
        }
        Some(Self {
            staging_dir: PathBuf::from(&cfg.tools_dir),
            approved_dir: cfg.approved_dir.as_ref().map(PathBuf::from),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1) as u64),
            list_staging: cfg.list_staging,
        })
    }

    fn secure(&self) -> bool {
        match &self.approved_dir {
            Some(dir) => dir != &self.staging_dir,
            None => false,
        }
    }

    /// Inventory for `list_host_tools`.
    pub fn list(&self) -> Vec<HostToolInfo> {
        let mut tools = Vec::new();

        if self.secure() {
            let manifest = self.load_manifest();
            let mut names: Vec<_> = manifest.keys().cloned().collect();
            names.sort();
            for name in names {
                if let Some(info) = self.describe(&manifest[&name].path, true) {
                    tools.push(info);
                }
            }
            if self.list_staging {
                for info in discover_dir(&self.staging_dir, false) {
                    if !tools.iter().any(|t| t.name == info.name) {
                        tools.push(info);
                    }
                }
            }
        } else {
            tools = discover_dir(&self.staging_dir, true);
        }

        tools
    }

    pub fn info(&self, name: &str) -> Result<HostToolInfo, HostError> {
        self.list()
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| HostError::UnknownTool(name.to_string()))
    }

    /// Promote every staged tool: record path + sha256 in the approved-dir
    /// manifest and copy the script alongside it.
    pub fn sync(&self) -> Result<usize, HostError> {
        let Some(approved_dir) = &self.approved_dir else {
            // Legacy layout has nothing to promote.
            return Ok(0);
        };
        std::fs::create_dir_all(approved_dir)?;

        let mut manifest: HashMap<String, ApprovedEntry> = HashMap::new();
        for info in discover_dir(&self.staging_dir, false) {
            let source = PathBuf::from(&info.path);
            let digest = file_sha256(&source)?;
            let target = approved_dir.join(&info.name);
            std::fs::copy(&source, &target)?;
            manifest.insert(
                info.name.clone(),
                ApprovedEntry {
                    path: target.display().to_string(),
                    sha256: digest,
                },
            );
        }

        let manifest_path = approved_dir.join(MANIFEST_NAME);
        let body = serde_json::to_string_pretty(&manifest)
            .map_err(|e| HostError::Io(std::io::Error::other(e)))?;
        std::fs::write(&manifest_path, body)?;

        tracing::info!(count = manifest.len(), dir = %approved_dir.display(), "Promoted host tools");
        Ok(manifest.len())
    }

    /// Execute a tool by name with the configured timeout.
    pub async fn run(&self, name: &str, args: &[String]) -> Result<HostOutput, HostError> {
        let path = if self.secure() {
            let manifest = self.load_manifest();
            let entry = manifest
                .get(name)
                .ok_or_else(|| HostError::NotApproved(name.to_string()))?;
            let path = PathBuf::from(&entry.path);
            if file_sha256(&path)? != entry.sha256 {
                return Err(HostError::HashMismatch(name.to_string()));
            }
            path
        } else {
            discover_dir(&self.staging_dir, true)
                .into_iter()
                .find(|t| t.name == name)
                .map(|t| PathBuf::from(t.path))
                .ok_or_else(|| HostError::UnknownTool(name.to_string()))?
        };

        run_process(&path, args, None, self.timeout).await
    }

    fn load_manifest(&self) -> HashMap<String, ApprovedEntry> {
        let Some(approved_dir) = &self.approved_dir else {
            return HashMap::new();
        };
        let path = approved_dir.join(MANIFEST_NAME);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Malformed approval manifest");
                HashMap::new()
            }
        }
    }

    fn describe(&self, path: &str, approved: bool) -> Option<HostToolInfo> {
        let path = Path::new(path);
        let name = path.file_name()?.to_str()?.to_string();
        let content = std::fs::read_to_string(path).ok()?;
        let header = parse_tool_header(&content);
        Some(HostToolInfo {
            name,
            path: path.display().to_string(),
            description: header.description,
            usage: header.usage,
            examples: header.examples,
            approved,
        })
    }
}

fn discover_dir(dir: &Path, approved: bool) -> Vec<HostToolInfo> {
    let mut tools = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == MANIFEST_NAME || name.starts_with('.') {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let header = parse_tool_header(&content);
        tools.push(HostToolInfo {
            name,
            path: entry.path().display().to_string(),
            description: header.description,
            usage: header.usage,
            examples: header.examples,
            approved,
        });
    }
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    tools
}

#[derive(Debug, Default)]
struct ToolHeader {
    description: String,
    usage: Vec<String>,
    examples: Vec<String>,
}

/// Parse the leading comment block of a script: first line of prose is the
/// description, `Usage:` and `Examples:` open blocks, and `---`, a
/// `package` line or the end of the comment block stop the scan.
fn parse_tool_header(content: &str) -> ToolHeader {
    #[derive(PartialEq)]
    enum Block {
        Prose,
        Usage,
        Examples,
    }

    let mut header = ToolHeader::default();
    let mut block = Block::Prose;

    for (index, line) in content.lines().enumerate() {
        if index == 0 && line.starts_with("#!") {
            continue;
        }
        let Some(comment) = line
            .trim_start()
            .strip_prefix("#")
            .or_else(|| line.trim_start().strip_prefix("//"))
        else {
            break;
        };
        let text = comment.trim();
        if text == "---" || text.starts_with("package ") {
            break;
        }
        if let Some(rest) = text.strip_prefix("Usage:") {
            block = Block::Usage;
            let rest = rest.trim();
            if !rest.is_empty() {
                header.usage.push(rest.to_string());
            }
            continue;
        }
        if let Some(rest) = text.strip_prefix("Examples:") {
            block = Block::Examples;
            let rest = rest.trim();
            if !rest.is_empty() {
                header.examples.push(rest.to_string());
            }
            continue;
        }
        match block {
            Block::Prose => {
                if header.description.is_empty() && !text.is_empty() {
                    header.description = text.to_string();
                }
            }
            Block::Usage => {
                if !text.is_empty() {
                    header.usage.push(text.to_string());
                }
            }
            Block::Examples => {
                if !text.is_empty() {
                    header.examples.push(text.to_string());
                }
            }
        }
    }

    header
}

fn file_sha256(path: &Path) -> Result<String, HostError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Whitelisted host-command execution.
pub struct HostCommandRunner {
    whitelist: HashMap<String, Vec<String>>,
    dangerously: HashMap<String, Vec<String>>,
    deny: Vec<String>,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl HostCommandRunner {
    pub fn from_config(cfg: &HostCommandsConfig, workspace_root: &str) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        Some(Self {
            whitelist: cfg.whitelist.clone(),
            dangerously: cfg.dangerously.clone(),
            deny: cfg.deny.clone(),
            workspace_root: PathBuf::from(workspace_root),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1) as u64),
        })
    }

    /// Whitelist check. Deny entries override both whitelists; any shell
    /// construct is a hard reject regardless of whitelist.
    pub fn check(&self, command: &str, dangerously: bool) -> Result<(), HostError> {
        let command = command.trim();
        if let Some(construct) = find_shell_construct(command) {
            return Err(HostError::ShellConstruct(construct));
        }
        if self
            .deny
            .iter()
            .any(|pattern| pattern_matches(pattern, command))
        {
            return Err(HostError::Denied(command.to_string()));
        }

        let (base, tail) = match command.split_once(char::is_whitespace) {
            Some((base, tail)) => (base, tail.trim()),
            None => (command, ""),
        };

        let permitted = |map: &HashMap<String, Vec<String>>| {
            map.get(base)
                .is_some_and(|patterns| patterns.iter().any(|p| pattern_matches(p, tail)))
        };

        if permitted(&self.whitelist) || (dangerously && permitted(&self.dangerously)) {
            Ok(())
        } else {
            Err(HostError::NotWhitelisted(command.to_string()))
        }
    }

    /// Execute a pre-checked command in the workspace root.
    pub async fn run(&self, command: &str) -> Result<HostOutput, HostError> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            return Err(HostError::NotWhitelisted(command.to_string()));
        };
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        run_process(Path::new(program), &args, Some(&self.workspace_root), self.timeout).await
    }
}

async fn run_process(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<HostOutput, HostError> {
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| HostError::Timeout(timeout))??;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    Ok(HostOutput {
        exit_code: i64::from(output.status.code().unwrap_or(-1)),
        output: text,
    })
}
