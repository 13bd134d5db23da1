//! Docker collaborator.
//!
//! The dispatcher talks to [`ContainerRuntime`]; the bollard-backed
//! [`DockerRuntime`] is the production implementation. File access inside a
//! container rides on exec (`ls -la`, `cat`/`head`) so the surface stays a
//! plain Engine-API client.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    ListContainersOptions, LogOutput, LogsOptions, RestartContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_stream::StreamExt;

/// Errors that can occur during Docker operations
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Failed to talk to Docker daemon: {0}")]
    Connection(#[from] bollard::errors::Error),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}

/// One row of a container listing, pre-shaped for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
}

/// Log fetch parameters.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub container: String,
    /// "all" or a line count, passed through to the Engine API.
    pub tail: String,
    /// RFC3339 timestamp or relative offset like "10m".
    pub since: Option<String>,
}

/// Exec result; a non-zero exit code is part of the normal result, not an
/// error.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

/// Abstract surface the core calls.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<(), DockerError>;
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, DockerError>;
    async fn inspect(&self, container: &str) -> Result<Value, DockerError>;
    async fn stats(&self, container: &str) -> Result<Value, DockerError>;
    async fn logs(&self, query: LogQuery) -> Result<String, DockerError>;
    async fn exec(&self, container: &str, command: &str) -> Result<ExecOutput, DockerError>;
    async fn start(&self, container: &str) -> Result<(), DockerError>;
    async fn stop(&self, container: &str, timeout_secs: i64) -> Result<(), DockerError>;
    async fn restart(&self, container: &str, timeout_secs: i64) -> Result<(), DockerError>;
    async fn list_files(&self, container: &str, path: &str) -> Result<String, DockerError>;
    async fn read_file(
        &self,
        container: &str,
        path: &str,
        max_lines: u64,
    ) -> Result<String, DockerError>;
}

/// Engine-API implementation over bollard.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the default socket.
    pub fn connect() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_socket_defaults()?;
        Ok(Self { docker })
    }

    /// Connect to a specific socket path.
    pub fn connect_socket(socket_path: &str) -> Result<Self, DockerError> {
        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker })
    }

    async fn run_exec(&self, container: &str, cmd: Vec<&str>) -> Result<ExecOutput, DockerError> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let start_result = self.docker.start_exec(&exec.id, None).await?;

        let mut output = String::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = start_result
        {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(chunk) => output.push_str(&chunk.to_string()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Error reading exec output");
                        break;
                    }
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }
}

/// Parse the `since` argument: RFC3339, or a relative offset with an
/// s/m/h/d suffix. Unparseable values mean "no lower bound".
fn since_to_unix(since: Option<&str>) -> i64 {
    let Some(raw) = since else { return 0 };
    let raw = raw.trim();
    if raw.is_empty() || raw == "all" {
        return 0;
    }
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return ts.unix_timestamp();
    }
    if let Some((value, unit)) = raw.split_at_checked(raw.len().saturating_sub(1)) {
        if let Ok(n) = value.parse::<i64>() {
            let seconds = match unit {
                "s" => Some(n),
                "m" => Some(n * 60),
                "h" => Some(n * 3600),
                "d" => Some(n * 86400),
                _ => None,
            };
            if let Some(seconds) = seconds {
                return OffsetDateTime::now_utc().unix_timestamp() - seconds;
            }
        }
    }
    tracing::warn!(since = %raw, "Unparseable since value, fetching full log range");
    0
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), DockerError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, DockerError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await?;

        Ok(summaries
            .into_iter()
            .map(|c| {
                let id = c.id.unwrap_or_default();
                let name = c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                ContainerInfo {
                    id: id.chars().take(12).collect(),
                    name,
                    image: c.image.unwrap_or_default(),
                    state: c.state.unwrap_or_default(),
                    status: c.status.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn inspect(&self, container: &str) -> Result<Value, DockerError> {
        let record = self.docker.inspect_container(container, None).await?;
        serde_json::to_value(record)
            .map_err(|e| DockerError::OperationFailed(format!("serializing inspect record: {e}")))
    }

    async fn stats(&self, container: &str) -> Result<Value, DockerError> {
        let mut stream = self.docker.stats(
            container,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );

        match stream.next().await {
            Some(Ok(stats)) => serde_json::to_value(stats)
                .map_err(|e| DockerError::OperationFailed(format!("serializing stats: {e}"))),
            Some(Err(e)) => Err(DockerError::Connection(e)),
            None => Err(DockerError::ContainerNotFound(container.to_string())),
        }
    }

    async fn logs(&self, query: LogQuery) -> Result<String, DockerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            since: since_to_unix(query.since.as_deref()),
            tail: query.tail.clone(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(&query.container, Some(options));
        let mut text = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message }) => {
                    text.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Error reading log stream");
                    break;
                }
            }
        }

        Ok(text)
    }

    async fn exec(&self, container: &str, command: &str) -> Result<ExecOutput, DockerError> {
        // No shell involved: the policy layer has already rejected shell
        // constructs, and a plain argv keeps it that way.
        let cmd: Vec<&str> = command.split_whitespace().collect();
        if cmd.is_empty() {
            return Err(DockerError::OperationFailed("empty command".to_string()));
        }
        self.run_exec(container, cmd).await
    }

    async fn start(&self, container: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, container: &str, timeout_secs: i64) -> Result<(), DockerError> {
        self.docker
            .stop_container(container, Some(StopContainerOptions { t: timeout_secs }))
            .await?;
        Ok(())
    }

    async fn restart(&self, container: &str, timeout_secs: i64) -> Result<(), DockerError> {
        self.docker
            .restart_container(
                container,
                Some(RestartContainerOptions {
                    t: timeout_secs as isize,
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_files(&self, container: &str, path: &str) -> Result<String, DockerError> {
        let result = self.run_exec(container, vec!["ls", "-la", path]).await?;
        if result.exit_code != 0 {
            return Err(DockerError::OperationFailed(format!(
                "listing {path}: {}",
                result.output.trim()
            )));
        }
        Ok(result.output)
    }

    async fn read_file(
        &self,
        container: &str,
        path: &str,
        max_lines: u64,
    ) -> Result<String, DockerError> {
        let lines = max_lines.to_string();
        let cmd = if max_lines > 0 {
            vec!["head", "-n", lines.as_str(), path]
        } else {
            vec!["cat", path]
        };
        let result = self.run_exec(container, cmd).await?;
        if result.exit_code != 0 {
            return Err(DockerError::OperationFailed(format!(
                "reading {path}: {}",
                result.output.trim()
            )));
        }
        Ok(result.output)
    }
}
