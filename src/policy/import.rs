//! Block-list importer.
//!
//! Runs once at policy construction and turns external developer-tool files
//! (compose YAML, devcontainer JSON, AI-assistant settings, gitignore-style
//! lists) into blocked-path rules. Malformed sources never fail the load; the
//! importer logs a warning and keeps what it could parse.

use std::path::Path;

use walkdir::WalkDir;

use super::{BlockReason, SecurityMode};
use crate::config::{BlockedPathsConfig, SettingsImportConfig};

/// A blocked-path rule before glob compilation.
#[derive(Debug, Clone)]
pub struct ImportedRule {
    /// Container scope: a specific name or `*`.
    pub container: String,
    /// Normalized glob pattern.
    pub pattern: String,
    pub reason: BlockReason,
    /// Source file descriptor.
    pub source: String,
    /// The pattern as it appeared in the source, pre-normalization.
    pub original: String,
}

/// Basenames blocked by default in strict and moderate modes.
pub const DEFAULT_GLOBAL_PATTERNS: &[&str] = &[".env", "*.key", "*.pem", "secrets/*"];

/// Collect every blocked-path rule in load order: manual blocks, compose
/// imports, devcontainer imports, assistant-settings imports, gitignore
/// imports, then global patterns. Any matching rule blocks; the first match
/// supplies the reason tag.
pub fn collect_rules(
    cfg: &BlockedPathsConfig,
    mode: SecurityMode,
    workspace_root: &str,
) -> Vec<ImportedRule> {
    let mut rules = Vec::new();

    for (container, patterns) in sorted(&cfg.manual) {
        for pattern in patterns {
            rules.push(ImportedRule {
                container: container.clone(),
                pattern: normalize_pattern(pattern),
                reason: BlockReason::ManualBlock,
                source: "config:blocked_paths.manual".to_string(),
                original: pattern.clone(),
            });
        }
    }

    if cfg.auto_import.enabled {
        for file in &cfg.auto_import.compose_files {
            rules.extend(import_compose(Path::new(file)));
        }
        for file in &cfg.auto_import.devcontainer_files {
            rules.extend(import_devcontainer(Path::new(file)));
        }
    }

    if cfg.claude_code_settings.enabled {
        rules.extend(import_settings(
            &cfg.claude_code_settings,
            workspace_root,
            ".claude/settings.json",
            BlockReason::ClaudeCodeSettingsDeny,
        ));
    }
    if cfg.gemini_settings.enabled {
        // The reason-tag vocabulary has no gemini-specific entry; these rules
        // surface as generic auto-imports with the file as source.
        rules.extend(import_settings(
            &cfg.gemini_settings,
            workspace_root,
            ".gemini/settings.json",
            BlockReason::AutoImportedBlock,
        ));
    }

    if cfg.auto_import.enabled {
        for file in &cfg.auto_import.gitignore_files {
            rules.extend(import_gitignore(Path::new(file)));
        }
    }

    let globals: Vec<String> = match &cfg.auto_import.global_patterns {
        Some(patterns) => patterns.clone(),
        None if mode == SecurityMode::Permissive => Vec::new(),
        None => DEFAULT_GLOBAL_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
    };
    for pattern in globals {
        rules.push(ImportedRule {
            container: "*".to_string(),
            pattern: anchor_anywhere(&pattern),
            reason: BlockReason::GlobalPattern,
            source: "builtin:global_patterns".to_string(),
            original: pattern,
        });
    }

    rules
}

/// Deterministic rule order for map-shaped config sections.
fn sorted(
    map: &std::collections::HashMap<String, Vec<String>>,
) -> Vec<(&String, &Vec<String>)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// Gitignore-style normalization. Trailing `/` means directory (block the
/// whole subtree); a pattern with no `/` is unanchored and matches at any
/// depth; anything else is anchored at the container root.
fn normalize_pattern(raw: &str) -> String {
    let mut pattern = raw.trim().to_string();
    let is_dir = pattern.ends_with('/');
    if is_dir {
        pattern.truncate(pattern.len() - 1);
    }
    let anchored = if pattern.starts_with('/') || pattern.starts_with("**") {
        pattern
    } else if pattern.contains('/') {
        format!("/{pattern}")
    } else {
        format!("**/{pattern}")
    };
    if is_dir {
        format!("{anchored}/**")
    } else {
        anchored
    }
}

/// Normalization for basename-style global patterns: always match at any
/// depth, regardless of embedded slashes (`secrets/*` blocks every
/// `secrets` directory, not only one at the root).
fn anchor_anywhere(raw: &str) -> String {
    let pattern = raw.trim().trim_end_matches('/');
    if pattern.starts_with('/') || pattern.starts_with("**") {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    }
}

/// Compose YAML: `/dev/null` bind targets and tmpfs mounts per service.
fn import_compose(path: &Path) -> Vec<ImportedRule> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable compose file");
            return Vec::new();
        }
    };
    let doc: serde_yaml::Value = match serde_yaml::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping malformed compose file");
            return Vec::new();
        }
    };

    let mut rules = Vec::new();
    let source = path.display().to_string();
    let Some(services) = doc.get("services").and_then(|s| s.as_mapping()) else {
        tracing::warn!(file = %source, "Compose file has no services section");
        return rules;
    };

    for (key, service) in services {
        let service_name = key.as_str().unwrap_or_default();
        let container = service
            .get("container_name")
            .and_then(|n| n.as_str())
            .unwrap_or(service_name)
            .to_string();
        if container.is_empty() {
            continue;
        }

        if let Some(volumes) = service.get("volumes").and_then(|v| v.as_sequence()) {
            for volume in volumes {
                if let Some((host, target, original)) = compose_volume_parts(volume) {
                    if host == "/dev/null" {
                        rules.push(ImportedRule {
                            container: container.clone(),
                            pattern: normalize_pattern(&target),
                            reason: BlockReason::VolumeMountToDevNull,
                            source: source.clone(),
                            original,
                        });
                    }
                }
            }
        }

        if let Some(tmpfs) = service.get("tmpfs") {
            let targets: Vec<String> = match tmpfs {
                serde_yaml::Value::String(s) => vec![s.clone()],
                serde_yaml::Value::Sequence(seq) => seq
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            for target in targets {
                // tmpfs entries may carry mount options after a colon
                let clean = target.split(':').next().unwrap_or(&target).to_string();
                rules.push(ImportedRule {
                    container: container.clone(),
                    pattern: normalize_pattern(&clean),
                    reason: BlockReason::TmpfsMount,
                    source: source.clone(),
                    original: target,
                });
            }
        }
    }
    rules
}

/// Extract (host, target, original) from a compose volume entry, covering
/// both the short string syntax and the long mapping syntax.
fn compose_volume_parts(volume: &serde_yaml::Value) -> Option<(String, String, String)> {
    match volume {
        serde_yaml::Value::String(entry) => {
            let mut parts = entry.splitn(3, ':');
            let host = parts.next()?.to_string();
            let target = parts.next()?.to_string();
            Some((host, target, entry.clone()))
        }
        serde_yaml::Value::Mapping(_) => {
            let host = volume.get("source")?.as_str()?.to_string();
            let target = volume.get("target")?.as_str()?.to_string();
            Some((host.clone(), target.clone(), format!("{host}:{target}")))
        }
        _ => None,
    }
}

/// DevContainer JSON: same `/dev/null` and tmpfs semantics over its
/// `mounts` array. DevContainers name no container, so the scope is `*`.
fn import_devcontainer(path: &Path) -> Vec<ImportedRule> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable devcontainer file");
            return Vec::new();
        }
    };
    let doc: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping malformed devcontainer file");
            return Vec::new();
        }
    };

    let mut rules = Vec::new();
    let source = path.display().to_string();
    let Some(mounts) = doc.get("mounts").and_then(|m| m.as_array()) else {
        return rules;
    };

    for mount in mounts {
        let Some(entry) = mount.as_str() else { continue };
        let mut mount_type = "";
        let mut mount_source = "";
        let mut target = "";
        for part in entry.split(',') {
            match part.split_once('=') {
                Some(("type", v)) => mount_type = v,
                Some(("source" | "src", v)) => mount_source = v,
                Some(("target" | "dst", v)) => target = v,
                _ => {}
            }
        }
        if target.is_empty() {
            continue;
        }
        let reason = match mount_type {
            "bind" if mount_source == "/dev/null" => BlockReason::DevcontainerBindMount,
            "tmpfs" => BlockReason::DevcontainerTmpfsMount,
            _ => continue,
        };
        rules.push(ImportedRule {
            container: "*".to_string(),
            pattern: normalize_pattern(target),
            reason,
            source: source.clone(),
            original: entry.to_string(),
        });
    }
    rules
}

/// AI-assistant settings: `permissions.deny` entries of shape
/// `Read(<pattern>)`. Files are taken from the configured explicit paths plus
/// a bounded-depth scan below the workspace root (`max_depth` 0 = root only).
fn import_settings(
    cfg: &SettingsImportConfig,
    workspace_root: &str,
    relative_name: &str,
    reason: BlockReason,
) -> Vec<ImportedRule> {
    let mut files: Vec<std::path::PathBuf> = cfg.paths.iter().map(Into::into).collect();

    if !workspace_root.is_empty() {
        for entry in WalkDir::new(workspace_root)
            .max_depth(cfg.max_depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
        {
            let candidate = entry.path().join(relative_name);
            if candidate.is_file() {
                files.push(candidate);
            }
        }
    }

    let mut rules = Vec::new();
    for file in files {
        rules.extend(import_settings_file(&file, reason));
    }
    rules
}

fn import_settings_file(path: &Path, reason: BlockReason) -> Vec<ImportedRule> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable settings file");
            return Vec::new();
        }
    };
    let doc: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping malformed settings file");
            return Vec::new();
        }
    };

    let mut rules = Vec::new();
    let source = path.display().to_string();
    let deny = doc
        .get("permissions")
        .and_then(|p| p.get("deny"))
        .and_then(|d| d.as_array());
    let Some(deny) = deny else { return rules };

    for entry in deny {
        let Some(entry) = entry.as_str() else { continue };
        let Some(pattern) = entry
            .strip_prefix("Read(")
            .and_then(|rest| rest.strip_suffix(')'))
        else {
            continue;
        };
        rules.push(ImportedRule {
            container: "*".to_string(),
            pattern: normalize_pattern(pattern),
            reason,
            source: source.clone(),
            original: entry.to_string(),
        });
    }
    rules
}

/// Gitignore-style file: one pattern per non-comment line. Negations are not
/// supported; an AI block-list is additive.
fn import_gitignore(path: &Path) -> Vec<ImportedRule> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable ignore file");
            return Vec::new();
        }
    };

    let mut rules = Vec::new();
    let source = path.display().to_string();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('!') {
            tracing::warn!(file = %source, pattern = %line, "Ignoring negation in block-list import");
            continue;
        }
        rules.push(ImportedRule {
            container: "*".to_string(),
            pattern: normalize_pattern(line),
            reason: BlockReason::AutoImportedBlock,
            source: source.clone(),
            original: line.to_string(),
        });
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoImportConfig;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn normalize_patterns() {
        assert_eq!(normalize_pattern("/.env"), "/.env");
        assert_eq!(normalize_pattern("node_modules"), "**/node_modules");
        assert_eq!(normalize_pattern("cache/"), "**/cache/**");
        assert_eq!(normalize_pattern("secrets/keys"), "/secrets/keys");
        assert_eq!(normalize_pattern("**/dist"), "**/dist");
    }

    #[test]
    fn global_patterns_match_anywhere() {
        assert_eq!(anchor_anywhere("secrets/*"), "**/secrets/*");
        assert_eq!(anchor_anywhere(".env"), "**/.env");
        assert_eq!(anchor_anywhere("/var/run"), "/var/run");
    }

    #[test]
    fn compose_import_dev_null_and_tmpfs() {
        let dir = tempfile::tempdir().unwrap();
        let compose = write_file(
            dir.path(),
            "docker-compose.yml",
            r#"
services:
  api:
    container_name: api-1
    volumes:
      - ./src:/app/src
      - /dev/null:/app/.env
    tmpfs:
      - /app/tmp:size=64m
  worker:
    volumes:
      - type: bind
        source: /dev/null
        target: /secrets
"#,
        );

        let rules = import_compose(&compose);
        assert_eq!(rules.len(), 3);

        assert_eq!(rules[0].container, "api-1");
        assert_eq!(rules[0].pattern, "/app/.env");
        assert_eq!(rules[0].reason, BlockReason::VolumeMountToDevNull);
        assert_eq!(rules[0].original, "/dev/null:/app/.env");

        assert_eq!(rules[1].container, "api-1");
        assert_eq!(rules[1].pattern, "/app/tmp");
        assert_eq!(rules[1].reason, BlockReason::TmpfsMount);

        // service key used when container_name is absent
        assert_eq!(rules[2].container, "worker");
        assert_eq!(rules[2].pattern, "/secrets");
        assert_eq!(rules[2].reason, BlockReason::VolumeMountToDevNull);
    }

    #[test]
    fn compose_import_malformed_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let compose = write_file(dir.path(), "bad.yml", "services: [not: {valid");
        assert!(import_compose(&compose).is_empty());
        assert!(import_compose(Path::new("/nonexistent/compose.yml")).is_empty());
    }

    #[test]
    fn devcontainer_import() {
        let dir = tempfile::tempdir().unwrap();
        let devcontainer = write_file(
            dir.path(),
            "devcontainer.json",
            r#"{
  "mounts": [
    "source=/dev/null,target=/workspace/.env,type=bind",
    "target=/scratch,type=tmpfs",
    "source=/home/me/code,target=/workspace,type=bind"
  ]
}"#,
        );

        let rules = import_devcontainer(&devcontainer);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "/workspace/.env");
        assert_eq!(rules[0].reason, BlockReason::DevcontainerBindMount);
        assert_eq!(rules[1].pattern, "/scratch");
        assert_eq!(rules[1].reason, BlockReason::DevcontainerTmpfsMount);
    }

    #[test]
    fn settings_import_deny_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            ".claude/settings.json",
            r#"{"permissions": {"deny": ["Read(/secrets/**)", "Read(.env)", "Bash(rm *)"]}}"#,
        );

        let cfg = SettingsImportConfig {
            enabled: true,
            paths: Vec::new(),
            max_depth: 0,
        };
        let rules = import_settings(
            &cfg,
            dir.path().to_str().unwrap(),
            ".claude/settings.json",
            BlockReason::ClaudeCodeSettingsDeny,
        );

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "/secrets/**");
        assert_eq!(rules[0].reason, BlockReason::ClaudeCodeSettingsDeny);
        assert_eq!(rules[1].pattern, "**/.env");
        assert_eq!(rules[1].original, "Read(.env)");
    }

    #[test]
    fn settings_scan_respects_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "sub/project/.claude/settings.json",
            r#"{"permissions": {"deny": ["Read(/deep)"]}}"#,
        );

        let shallow = SettingsImportConfig {
            enabled: true,
            paths: Vec::new(),
            max_depth: 0,
        };
        assert!(import_settings(
            &shallow,
            dir.path().to_str().unwrap(),
            ".claude/settings.json",
            BlockReason::ClaudeCodeSettingsDeny,
        )
        .is_empty());

        let deep = SettingsImportConfig {
            enabled: true,
            paths: Vec::new(),
            max_depth: 2,
        };
        assert_eq!(
            import_settings(
                &deep,
                dir.path().to_str().unwrap(),
                ".claude/settings.json",
                BlockReason::ClaudeCodeSettingsDeny,
            )
            .len(),
            1
        );
    }

    #[test]
    fn gitignore_import() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = write_file(
            dir.path(),
            ".aiignore",
            "# comment\n\n*.pem\n!keep.pem\nbuild/\n/root-only.txt\n",
        );

        let rules = import_gitignore(&ignore);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].pattern, "**/*.pem");
        assert_eq!(rules[1].pattern, "**/build/**");
        assert_eq!(rules[2].pattern, "/root-only.txt");
        assert!(rules.iter().all(|r| r.reason == BlockReason::AutoImportedBlock));
    }

    #[test]
    fn collect_rules_order_and_defaults() {
        let cfg = BlockedPathsConfig {
            manual: [("api".to_string(), vec!["/.env".to_string()])]
                .into_iter()
                .collect(),
            auto_import: AutoImportConfig::default(),
            ..BlockedPathsConfig::default()
        };

        let rules = collect_rules(&cfg, SecurityMode::Strict, "");
        assert_eq!(rules[0].reason, BlockReason::ManualBlock);
        assert_eq!(rules[0].container, "api");
        // defaults appended with container scope "*"
        let globals: Vec<_> = rules
            .iter()
            .filter(|r| r.reason == BlockReason::GlobalPattern)
            .collect();
        assert_eq!(globals.len(), DEFAULT_GLOBAL_PATTERNS.len());
        assert!(globals.iter().all(|r| r.container == "*"));

        // permissive mode ships no default globals
        let permissive = collect_rules(&cfg, SecurityMode::Permissive, "");
        assert!(permissive.iter().all(|r| r.reason != BlockReason::GlobalPattern));
    }
}
