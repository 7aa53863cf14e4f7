use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tether_worker::{LanguageService, WorkerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::error::{HostError, HostResult};

/// Byte streams to a freshly started worker.
pub struct WorkerStreams {
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
    /// The worker's process, when it runs out of process.
    pub process: Option<Child>,
}

impl std::fmt::Debug for WorkerStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStreams")
            .field("pid", &self.process.as_ref().and_then(Child::id))
            .finish()
    }
}

/// Starts workers. Called once per worker generation.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> HostResult<WorkerStreams>;
}

/// Runs the worker as a child process speaking frames over stdin/stdout.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Launcher for the configured worker, falling back to the running
    /// executable.
    pub fn from_config(config: &HostConfig) -> HostResult<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, config.worker_args.clone()))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> HostResult<WorkerStreams> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::Launch(format!("{}: {e}", self.program.display())))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Launch("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Launch("worker stdout not captured".into()))?;
        info!(program = %self.program.display(), pid = ?child.id(), "worker process started");
        Ok(WorkerStreams {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}

/// Runs the worker as a task in this process, connected by an in-memory
/// pipe.
pub struct InProcessLauncher {
    config: WorkerConfig,
    service: Arc<dyn LanguageService>,
    buffer: usize,
}

impl InProcessLauncher {
    pub fn new(config: WorkerConfig, service: Arc<dyn LanguageService>) -> Self {
        Self {
            config,
            service,
            buffer: 256 * 1024,
        }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self) -> HostResult<WorkerStreams> {
        let (host_side, worker_side) = tokio::io::duplex(self.buffer);
        let (worker_reader, worker_writer) = tokio::io::split(worker_side);
        let config = self.config.clone();
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            if let Err(e) = tether_worker::serve(worker_reader, worker_writer, &config, service).await {
                warn!(error = %e, "in-process worker failed");
            }
        });
        let (reader, writer) = tokio::io::split(host_side);
        Ok(WorkerStreams {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        })
    }
}

impl std::fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessLauncher")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_protocol::{FrameCodec, Message};
    use tether_types::RequestId;

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let launcher = ProcessLauncher::new("/nonexistent/tether-worker", vec![]);
        let err = launcher.launch().await.unwrap_err();
        assert!(matches!(err, HostError::Launch(_)));
    }

    #[test]
    fn from_config_defaults_to_current_exe() {
        let launcher = ProcessLauncher::from_config(&HostConfig::default()).unwrap();
        assert_eq!(launcher.program, std::env::current_exe().unwrap());
        assert_eq!(launcher.args, vec!["worker"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_streams_are_piped() {
        // `cat` echoes frames back unchanged.
        let launcher = ProcessLauncher::new("cat", vec![]);
        let mut streams = launcher.launch().await.unwrap();
        let msg = Message::request(RequestId::new(1), "echo", &json!({"n": 1})).unwrap();
        FrameCodec::write_frame(&mut streams.writer, &msg).await.unwrap();
        let back = FrameCodec::read_frame(&mut streams.reader).await.unwrap();
        assert_eq!(back, Some(msg));
    }
}
