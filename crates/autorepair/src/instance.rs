//! Pod snapshot types used by the repair loop.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

use crate::error::Result;

/// Source of point-in-time pod listings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceSource: Send + Sync {
    /// List every pod in `namespace`. One snapshot, not a watch.
    async fn list_instances(&self, namespace: &str) -> Result<Vec<Instance>>;
}

/// Pod lifecycle phase as reported in `status.phase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Read-only view of one pod: just the fields the repair loop looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Pod name.
    pub name: String,
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Current phase.
    pub phase: PodPhase,
    /// Pod annotations.
    pub annotations: BTreeMap<String, String>,
    /// Container names in declaration order.
    pub containers: Vec<String>,
}

impl Instance {
    /// Build an instance by hand (tests and fakes).
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        phase: PodPhase,
        containers: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase,
            annotations: BTreeMap::new(),
            containers: containers.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Look up an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }
}

impl From<&Pod> for Instance {
    fn from(pod: &Pod) -> Self {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map_or(PodPhase::Unknown, PodPhase::from);

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            phase,
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
            containers,
        }
    }
}
