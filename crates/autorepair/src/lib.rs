//! Automatic `nodetool repair` for Cassandra pods running in Kubernetes.
//!
//! Pods opt in with an annotation whose value names the container to repair:
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     cassandra-autorepair.jmkeyes.ca/autorepair: cassandra
//! ```
//!
//! Each run lists the namespace once, keeps the running pods carrying the
//! annotation, and execs `nodetool repair -pr` into them one at a time,
//! logging the command output line by line as it arrives.
//!
//! ## Example
//!
//! ```ignore
//! use cassandra_autorepair::{cluster, KubeCluster, Orchestrator, RepairConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = cluster::connect(None).await?;
//! let cluster = KubeCluster::new(client);
//! let orchestrator = Orchestrator::new(cluster.clone(), cluster, RepairConfig::default());
//!
//! let report = orchestrator.run("cassandra", &CancellationToken::new()).await?;
//! println!("{} repaired, {} failed", report.completed(), report.failed());
//! ```

pub mod cluster;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod exec;
pub mod instance;
pub mod orchestrator;
pub mod relay;
pub mod selector;

pub use cluster::KubeCluster;
pub use config::{resolve_namespace, RepairConfig};
pub use eligibility::{filter_eligible, EligibleInstance};
pub use error::{RepairError, Result};
pub use exec::{ExecRequest, ExecStream, RemoteExecutor, RemoteProcess};
pub use instance::{Instance, InstanceSource, PodPhase};
pub use orchestrator::{AttemptReport, AttemptState, Orchestrator, RunReport};
pub use relay::{relay, OutputLines, Relay};
pub use selector::select_container;
