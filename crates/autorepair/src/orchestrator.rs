//! The repair loop.
//!
//! One snapshot of the namespace is taken per run. Eligible pods are then
//! processed strictly one after another: select a container, open the exec
//! channel, relay and log the output. Every attempt ends in either
//! [`AttemptState::Completed`] or [`AttemptState::Failed`], and the loop moves
//! on to the next pod regardless. Only fatal errors stop the run.

use std::fmt;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::RepairConfig;
use crate::eligibility::{filter_eligible, EligibleInstance};
use crate::error::{RepairError, Result};
use crate::exec::{invoke, RemoteExecutor};
use crate::instance::InstanceSource;
use crate::relay::relay;
use crate::selector::select_container;

/// Where a single repair attempt currently is.
#[derive(Debug)]
pub enum AttemptState {
    Discovered,
    TargetSelected,
    Invoked,
    Streaming,
    Completed,
    Failed(RepairError),
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::TargetSelected => write!(f, "target_selected"),
            Self::Invoked => write!(f, "invoked"),
            Self::Streaming => write!(f, "streaming"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub struct AttemptReport {
    pub namespace: String,
    pub pod: String,
    /// Set once a container has been selected.
    pub container: Option<String>,
    /// Terminal state.
    pub state: AttemptState,
    /// Number of output lines relayed.
    pub lines: usize,
    pub elapsed: Duration,
}

impl AttemptReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.state, AttemptState::Completed)
    }

    pub fn error(&self) -> Option<&RepairError> {
        match &self.state {
            AttemptState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Summary of a whole run, one entry per eligible pod that was attempted.
#[derive(Debug, Default)]
pub struct RunReport {
    pub listed: usize,
    pub eligible: usize,
    pub attempts: Vec<AttemptReport>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempts.len() - self.completed()
    }

    /// Pod names in the order they were attempted.
    pub fn pods(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.pod.as_str()).collect()
    }
}

/// Tracks one attempt through its state machine.
struct Attempt {
    namespace: String,
    pod: String,
    container: Option<String>,
    state: AttemptState,
    lines: usize,
    started: Instant,
}

impl Attempt {
    fn new(candidate: &EligibleInstance) -> Self {
        Self {
            namespace: candidate.instance.namespace.clone(),
            pod: candidate.instance.name.clone(),
            container: None,
            state: AttemptState::Discovered,
            lines: 0,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: AttemptState) {
        debug!(from = %self.state, to = %next, "Attempt state change");
        self.state = next;
    }

    fn into_report(self) -> AttemptReport {
        AttemptReport {
            namespace: self.namespace,
            pod: self.pod,
            container: self.container,
            state: self.state,
            lines: self.lines,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Drives repair runs over a namespace.
pub struct Orchestrator<S, E> {
    source: S,
    executor: E,
    config: RepairConfig,
}

impl<S, E> Orchestrator<S, E>
where
    S: InstanceSource,
    E: RemoteExecutor,
{
    pub fn new(source: S, executor: E, config: RepairConfig) -> Self {
        Self {
            source,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Run one pass over `namespace`.
    ///
    /// Per-pod failures are logged and recorded in the report. A listing
    /// failure or a broken relay task aborts the run with an error.
    /// Cancelling `token` stops the in-flight command and skips the pods
    /// that have not been started yet.
    pub async fn run(&self, namespace: &str, token: &CancellationToken) -> Result<RunReport> {
        let instances = self.source.list_instances(namespace).await?;
        let eligible = filter_eligible(&instances, &self.config.annotation_key);

        info!(
            namespace = %namespace,
            listed = instances.len(),
            eligible = eligible.len(),
            "Discovered pods"
        );

        let mut report = RunReport {
            listed: instances.len(),
            eligible: eligible.len(),
            attempts: Vec::with_capacity(eligible.len()),
        };

        for candidate in &eligible {
            if token.is_cancelled() {
                warn!(
                    namespace = %namespace,
                    remaining = eligible.len() - report.attempts.len(),
                    "Run cancelled; skipping remaining pods"
                );
                break;
            }

            let span = info_span!(
                "repair",
                namespace = %candidate.instance.namespace,
                pod = %candidate.instance.name,
                container = tracing::field::Empty,
            );
            let attempt = self.attempt(candidate, token).instrument(span).await?;
            report.attempts.push(attempt);
        }

        info!(
            namespace = %namespace,
            attempted = report.attempts.len(),
            completed = report.completed(),
            failed = report.failed(),
            "Repair run finished"
        );

        Ok(report)
    }

    async fn attempt(
        &self,
        candidate: &EligibleInstance,
        token: &CancellationToken,
    ) -> Result<AttemptReport> {
        let mut attempt = Attempt::new(candidate);

        match self.drive(&mut attempt, candidate, token).await {
            Ok(()) => {
                attempt.advance(AttemptState::Completed);
                info!(
                    namespace = %attempt.namespace,
                    pod = %attempt.pod,
                    container = attempt.container.as_deref().unwrap_or_default(),
                    lines = attempt.lines,
                    elapsed_secs = attempt.started.elapsed().as_secs(),
                    "Finished repair"
                );
            }
            Err(e) if e.is_fatal() => {
                error!(
                    namespace = %attempt.namespace,
                    pod = %attempt.pod,
                    error = %e,
                    "Repair aborted"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    namespace = %attempt.namespace,
                    pod = %attempt.pod,
                    container = attempt.container.as_deref().unwrap_or_default(),
                    state = %attempt.state,
                    error = %e,
                    "Repair attempt failed"
                );
                attempt.advance(AttemptState::Failed(e));
            }
        }

        Ok(attempt.into_report())
    }

    async fn drive(
        &self,
        attempt: &mut Attempt,
        candidate: &EligibleInstance,
        token: &CancellationToken,
    ) -> Result<()> {
        let container = select_container(&candidate.instance, &candidate.requested_container)?;
        Span::current().record("container", container.as_str());
        attempt.container = Some(container.clone());
        attempt.advance(AttemptState::TargetSelected);

        info!(
            namespace = %attempt.namespace,
            pod = %attempt.pod,
            container = %container,
            "Started repair"
        );

        let stream = tokio::select! {
            () = token.cancelled() => return Err(RepairError::Cancelled),
            stream = invoke(
                &self.executor,
                &attempt.namespace,
                &attempt.pod,
                &container,
                &self.config.command,
            ) => stream?,
        };
        attempt.advance(AttemptState::Invoked);

        let mut relay = relay(stream, self.config.output_buffer, token.child_token());
        attempt.advance(AttemptState::Streaming);

        while let Some(line) = relay.lines.next_line().await {
            attempt.lines += 1;
            info!(stream = "output", "   {}", line);
        }

        relay.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecRequest, ExecStream, RemoteProcess};
    use crate::instance::{Instance, MockInstanceSource, PodPhase};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const KEY: &str = "cassandra-autorepair.jmkeyes.ca/autorepair";

    struct DoneProcess;

    #[async_trait]
    impl RemoteProcess for DoneProcess {
        async fn wait(&mut self) -> Result<()> {
            Ok(())
        }

        fn abort(&mut self) {}
    }

    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<ExecRequest>>,
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn exec(&self, request: &ExecRequest) -> Result<ExecStream> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(ExecStream {
                output: Box::new(&b"Repair session finished\n"[..]),
                process: Box::new(DoneProcess),
            })
        }
    }

    fn running(name: &str, containers: &[&str], annotation: &str) -> Instance {
        Instance::new(name, "db", PodPhase::Running, containers).with_annotation(KEY, annotation)
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let mut source = MockInstanceSource::new();
        source.expect_list_instances().returning(|namespace| {
            Err(RepairError::ListFailed {
                namespace: namespace.to_string(),
                source: kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "pods is forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                }),
            })
        });

        let orchestrator =
            Orchestrator::new(source, ScriptedExecutor::default(), RepairConfig::default());
        let err = orchestrator
            .run("db", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::ListFailed { ref namespace, .. } if namespace == "db"));
        assert!(err.is_fatal());
        assert!(orchestrator.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_the_requested_namespace_once() {
        let mut source = MockInstanceSource::new();
        source
            .expect_list_instances()
            .withf(|namespace: &str| namespace == "db")
            .times(1)
            .returning(|_| Ok(vec![running("c1", &["cassandra"], "cassandra")]));

        let orchestrator =
            Orchestrator::new(source, ScriptedExecutor::default(), RepairConfig::default());
        let report = orchestrator.run("db", &CancellationToken::new()).await.unwrap();

        assert_eq!(report.pods(), vec!["c1"]);
        assert_eq!(report.attempts[0].lines, 1);
        assert_eq!(report.attempts[0].container.as_deref(), Some("cassandra"));
    }

    #[tokio::test]
    async fn test_configured_command_and_annotation_are_used() {
        let mut source = MockInstanceSource::new();
        source.expect_list_instances().returning(|_| {
            Ok(vec![
                running("c1", &["cassandra"], "cassandra"),
                Instance::new("c2", "db", PodPhase::Running, &["cassandra"])
                    .with_annotation("example.com/repair", "cassandra"),
            ])
        });

        let config = RepairConfig::default()
            .with_annotation_key("example.com/repair")
            .with_command(["nodetool", "repair", "-full"]);
        let orchestrator = Orchestrator::new(source, ScriptedExecutor::default(), config);
        let report = orchestrator.run("db", &CancellationToken::new()).await.unwrap();

        assert_eq!(report.pods(), vec!["c2"]);
        let calls = orchestrator.executor.calls.lock().unwrap();
        assert_eq!(calls[0].command, vec!["nodetool", "repair", "-full"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let mut source = MockInstanceSource::new();
        source
            .expect_list_instances()
            .returning(|_| Ok(vec![running("c1", &["cassandra"], "cassandra")]));

        let token = CancellationToken::new();
        token.cancel();

        let orchestrator =
            Orchestrator::new(source, ScriptedExecutor::default(), RepairConfig::default());
        let report = orchestrator.run("db", &token).await.unwrap();

        assert_eq!(report.eligible, 1);
        assert!(report.attempts.is_empty());
        assert!(orchestrator.executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_terminal_states() {
        assert!(AttemptState::Completed.is_terminal());
        assert!(AttemptState::Failed(RepairError::Cancelled).is_terminal());
        assert!(!AttemptState::Streaming.is_terminal());
        assert_eq!(AttemptState::TargetSelected.to_string(), "target_selected");
    }
}
