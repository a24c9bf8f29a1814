//! Error taxonomy for a repair run.

use thiserror::Error;

/// Errors that can occur while discovering pods and running repairs.
#[derive(Error, Debug)]
pub enum RepairError {
    /// Could not build a Kubernetes client.
    #[error("Failed to connect to Kubernetes: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// No namespace was supplied through the environment or the command line.
    #[error("Unable to detect namespace: {0} is not set")]
    NamespaceMissing(String),

    /// Listing pods in the namespace failed.
    #[error("Unable to list pods in namespace {namespace}")]
    ListFailed {
        namespace: String,
        #[source]
        source: kube::Error,
    },

    /// The pod does not host the requested container.
    #[error("No such container '{requested}' in pod {pod}")]
    NoSuchContainer { pod: String, requested: String },

    /// The exec channel could not be opened.
    #[error("Failed to exec into {pod} [{container}]: {message}")]
    ExecSetupFailed {
        pod: String,
        container: String,
        message: String,
    },

    /// The remote command failed after the stream was established.
    #[error("Remote command failed: {0}")]
    StreamFailed(String),

    /// The run was cancelled while the remote command was in flight.
    #[error("Repair cancelled")]
    Cancelled,

    /// The background relay task died before it could close its pipe.
    #[error("Output relay task failed: {0}")]
    RelayTaskFailed(String),
}

/// Underlying cause of a connection failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for repair results.
pub type Result<T, E = RepairError> = std::result::Result<T, E>;

impl RepairError {
    /// Whether this error aborts the whole run rather than a single attempt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::NamespaceMissing(_)
                | Self::ListFailed { .. }
                | Self::RelayTaskFailed(_)
        )
    }
}
