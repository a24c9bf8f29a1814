//! Kubernetes-backed collaborators: client construction, pod listing and
//! exec transport.

use std::path::Path;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, AttachedProcess, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::error::{RepairError, Result};
use crate::exec::{ExecRequest, ExecStream, RemoteExecutor, RemoteProcess};
use crate::instance::{Instance, InstanceSource};

/// Set inside every pod by the kubelet.
const IN_CLUSTER_ENV: &str = "KUBERNETES_SERVICE_HOST";

fn connection_error<E>(message: &str, e: E) -> RepairError
where
    E: std::error::Error + Send + Sync + 'static,
{
    RepairError::Connection {
        message: message.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Build a Kubernetes client.
///
/// An explicit kubeconfig path wins. Otherwise the in-cluster service
/// account is used when running inside a pod, and the local kubeconfig
/// (`$KUBECONFIG` or `~/.kube/config`) everywhere else.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = if let Some(path) = kubeconfig {
        info!(path = %path.display(), "Using explicit kubeconfig");
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| connection_error("Error loading kubernetes configuration", e))?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| connection_error("Error loading kubernetes configuration", e))?
    } else if std::env::var_os(IN_CLUSTER_ENV).is_some() {
        info!("Running within cluster; using in-cluster configuration");
        Config::incluster().map_err(|e| connection_error("Failed to get in-cluster config", e))?
    } else {
        info!("Not running within cluster; using local kubeconfig");
        Config::from_kubeconfig(&KubeConfigOptions::default())
            .await
            .map_err(|e| connection_error("Error loading kubernetes configuration", e))?
    };

    Client::try_from(config).map_err(|e| connection_error("Failed to construct the client", e))
}

/// Pod listing and exec against a live cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl InstanceSource for KubeCluster {
    async fn list_instances(&self, namespace: &str) -> Result<Vec<Instance>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|source| RepairError::ListFailed {
                namespace: namespace.to_string(),
                source,
            })?;

        debug!(namespace = %namespace, count = pods.items.len(), "Listed pods");
        Ok(pods.items.iter().map(Instance::from).collect())
    }
}

#[async_trait]
impl RemoteExecutor for KubeCluster {
    async fn exec(&self, request: &ExecRequest) -> Result<ExecStream> {
        let setup_error = |message: String| RepairError::ExecSetupFailed {
            pod: request.pod.clone(),
            container: request.container.clone(),
            message,
        };

        let mut attached = self
            .pods(&request.namespace)
            .exec(&request.pod, request.command.clone(), &attach_params(request))
            .await
            .map_err(|e| setup_error(e.to_string()))?;

        let output = attached
            .stdout()
            .ok_or_else(|| setup_error("exec channel has no output stream".to_string()))?;
        let status = attached.take_status().map(FutureExt::boxed);

        Ok(ExecStream {
            output: Box::new(output),
            process: Box::new(KubeProcess { attached, status }),
        })
    }
}

/// Kubernetes rejects exec requests that ask for both a TTY and a separate
/// stderr stream; with a TTY the two are already merged into stdout.
fn attach_params(request: &ExecRequest) -> AttachParams {
    AttachParams::default()
        .container(request.container.clone())
        .stdin(request.stdin)
        .stdout(request.stdout)
        .stderr(request.stderr && !request.tty)
        .tty(request.tty)
}

struct KubeProcess {
    attached: AttachedProcess,
    status: Option<BoxFuture<'static, Option<Status>>>,
}

#[async_trait]
impl RemoteProcess for KubeProcess {
    async fn wait(&mut self) -> Result<()> {
        let Some(status) = self.status.take() else {
            return Ok(());
        };

        match status.await {
            Some(status) => status_result(&status),
            None => Err(RepairError::StreamFailed(
                "exec stream closed before the command reported a status".to_string(),
            )),
        }
    }

    fn abort(&mut self) {
        self.attached.abort();
    }
}

fn status_result(status: &Status) -> Result<()> {
    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }

    let message = status
        .message
        .clone()
        .or_else(|| status.reason.clone())
        .unwrap_or_else(|| "command failed".to_string());
    Err(RepairError::StreamFailed(message))
}
