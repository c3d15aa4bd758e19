//! Process Transport
//!
//! Spawns a child process and speaks newline-delimited JSON-RPC over its
//! stdin/stdout. The child's stderr is drained on a separate task and logged;
//! it is never parsed as protocol traffic. Closing the transport kills the
//! child and waits for it to exit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::errors::Error;
use crate::transport::Transport;
use crate::transport::stdio::StdioTransport;

/// How to launch the server process
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Executable to run
    pub command: String,
    /// Arguments to pass to the command
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub env: HashMap<String, String>,
    /// Working directory for the child
    pub current_dir: Option<PathBuf>,
}

impl ProcessOptions {
    /// Run `command` with no arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Append arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set an environment variable for the child
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run the child in `dir`
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Transport that owns a spawned child process
pub struct ProcessTransport {
    io: StdioTransport<ChildStdout, ChildStdin>,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessTransport {
    /// Spawn the process and wire up its standard streams
    pub fn spawn(options: &ProcessOptions) -> Result<Self, Error> {
        tracing::info!(command = %options.command, args = ?options.args, "Spawning MCP server process");

        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .envs(&options.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &options.current_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", options.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get stdout handle".to_string()))?;

        let pid = child.id();
        let stderr_task = child.stderr.take().map(|stderr| {
            let command = options.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "mcp_engine::process::stderr", command = %command, "{}", line);
                }
            })
        });

        tracing::info!(pid = ?pid, "MCP server process started");

        Ok(Self {
            io: StdioTransport::with_io(stdout, stdin),
            child: Mutex::new(Some(child)),
            pid,
            stderr_task,
        })
    }

    /// OS process id of the child, if it is still known
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Kill the child without closing the streams first
    pub async fn kill(&self) -> Result<(), Error> {
        let mut child = self.child.lock().await;
        if let Some(child) = child.as_mut() {
            child.kill().await?;
        }
        Ok(())
    }

    /// Wait for the child to exit on its own
    pub async fn wait(&self) -> Result<Option<std::process::ExitStatus>, Error> {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(child) => Ok(Some(child.wait().await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn read_line(&self) -> Result<Option<String>, Error> {
        self.io.read_line().await
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        self.io.write(bytes).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.io.close().await?;

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        // start_kill is a no-op error if the child already exited
        if let Err(e) = child.start_kill() {
            tracing::debug!("Process already exited: {}", e);
        }
        let status = child.wait().await?;
        tracing::info!(pid = ?self.pid, status = %status, "MCP server process exited");

        if let Some(task) = &self.stderr_task {
            task.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.io.is_connected()
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}
