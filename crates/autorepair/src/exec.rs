//! Remote command invocation.
//!
//! [`ExecRequest`] describes what to run and where; a [`RemoteExecutor`]
//! turns it into a live [`ExecStream`]. The Kubernetes-backed executor lives
//! in [`crate::cluster`]; tests plug in in-memory executors.

use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::Result;

/// One exec call into a container. Built fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
    /// Attach stdin. Always off for repairs.
    pub stdin: bool,
    /// Capture stdout.
    pub stdout: bool,
    /// Capture stderr. With a TTY the remote side folds it into stdout.
    pub stderr: bool,
    /// Allocate a pseudo-terminal.
    pub tty: bool,
}

impl ExecRequest {
    /// Build a request with the repair stream flags: no stdin, stdout and
    /// stderr captured, TTY allocated.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
        command: &[String],
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
            command: command.to_vec(),
            stdin: false,
            stdout: true,
            stderr: true,
            tty: true,
        }
    }
}

impl fmt::Display for ExecRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} [{}]: {}",
            self.namespace,
            self.pod,
            self.container,
            self.command.join(" ")
        )
    }
}

/// Handle to a command running remotely.
#[async_trait]
pub trait RemoteProcess: Send {
    /// Wait for the command to finish after its output has been drained.
    async fn wait(&mut self) -> Result<()>;

    /// Tear down the remote stream.
    fn abort(&mut self);
}

/// Live output of a remote command plus the handle that reports how it ended.
pub struct ExecStream {
    /// Combined stdout/stderr bytes.
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn RemoteProcess>,
}

impl fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStream").finish_non_exhaustive()
    }
}

/// Opens exec channels into containers.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Open the channel and start the command. Failures are reported as
    /// `RepairError::ExecSetupFailed`.
    async fn exec(&self, request: &ExecRequest) -> Result<ExecStream>;
}

/// Build the request for one attempt and open the exec channel.
pub async fn invoke<E>(
    executor: &E,
    namespace: &str,
    pod: &str,
    container: &str,
    command: &[String],
) -> Result<ExecStream>
where
    E: RemoteExecutor + ?Sized,
{
    let request = ExecRequest::new(namespace, pod, container, command);
    debug!(request = %request, "Opening exec channel");
    executor.exec(&request).await
}
