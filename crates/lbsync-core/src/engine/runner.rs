// ── Flow runner ──
//
// Executes a flow against a store. On an execute failure the tasks already
// executed in the failing flow are reverted newest-first, each with the
// snapshot it ran with. Revert failures are logged and collected; they
// never stop earlier tasks from being reverted.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::flow::{Flow, FlowKind, Node};
use super::store::Store;
use super::task::Task;
use crate::error::CoreError;

/// A task that failed, during execute or revert.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: CoreError,
}

/// Result of a flow that ran to completion.
#[derive(Debug, Default)]
pub struct FlowReport {
    pub flow: String,
    pub executed: usize,
    /// Failures absorbed by best-effort unordered flows.
    pub suppressed: Vec<TaskFailure>,
}

/// A flow that stopped on a terminal task failure.
#[derive(Debug, Error)]
#[error("flow {flow} failed at task {task}: {source}")]
pub struct FlowError {
    pub flow: String,
    pub task: String,
    #[source]
    pub source: CoreError,
    pub revert_failures: Vec<TaskFailure>,
    pub suppressed: Vec<TaskFailure>,
}

impl FlowError {
    /// True when compensation did not complete and the device may diverge.
    pub fn is_divergent(&self) -> bool {
        !self.revert_failures.is_empty()
    }
}

struct Executed {
    task: Arc<dyn Task>,
    inputs: Store,
}

#[derive(Default)]
struct Progress {
    executed: Vec<Executed>,
    suppressed: Vec<TaskFailure>,
}

struct Failure {
    task: String,
    error: CoreError,
    revert_failures: Vec<TaskFailure>,
    suppressed: Vec<TaskFailure>,
}

impl Failure {
    fn at(task: &str, error: CoreError) -> Self {
        Self {
            task: task.to_owned(),
            error,
            revert_failures: Vec::new(),
            suppressed: Vec::new(),
        }
    }
}

/// Runs flows. Stateless; one instance can serve every worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine;

impl Engine {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, flow: &Flow, store: &Store) -> Result<FlowReport, FlowError> {
        if let Err(e) = flow.check() {
            return Err(FlowError {
                flow: flow.name().to_owned(),
                task: "<check>".into(),
                source: e,
                revert_failures: Vec::new(),
                suppressed: Vec::new(),
            });
        }

        info!(flow = flow.name(), "flow started");
        match self.run_flow(flow, store).await {
            Ok(progress) => {
                info!(
                    flow = flow.name(),
                    executed = progress.executed.len(),
                    suppressed = progress.suppressed.len(),
                    "flow completed"
                );
                Ok(FlowReport {
                    flow: flow.name().to_owned(),
                    executed: progress.executed.len(),
                    suppressed: progress.suppressed,
                })
            }
            Err(failure) => {
                warn!(
                    flow = flow.name(),
                    task = %failure.task,
                    error = %failure.error,
                    revert_failures = failure.revert_failures.len(),
                    "flow failed and was reverted"
                );
                Err(FlowError {
                    flow: flow.name().to_owned(),
                    task: failure.task,
                    source: failure.error,
                    revert_failures: failure.revert_failures,
                    suppressed: failure.suppressed,
                })
            }
        }
    }

    fn run_node<'a>(&'a self, node: &'a Node, store: &'a Store) -> BoxFuture<'a, Result<Progress, Failure>> {
        async move {
            match node {
                Node::Task(task) => self.execute_task(task, store).await.map(|done| Progress {
                    executed: vec![done],
                    suppressed: Vec::new(),
                }),
                Node::Flow(flow) => self.run_flow(flow, store).await,
            }
        }
        .boxed()
    }

    async fn run_flow(&self, flow: &Flow, store: &Store) -> Result<Progress, Failure> {
        match flow.kind() {
            FlowKind::Linear => self.run_linear(flow, store).await,
            FlowKind::Unordered => self.run_unordered(flow, store).await,
        }
    }

    async fn run_linear(&self, flow: &Flow, store: &Store) -> Result<Progress, Failure> {
        let mut progress = Progress::default();
        for node in flow.nodes() {
            match self.run_node(node, store).await {
                Ok(done) => {
                    progress.executed.extend(done.executed);
                    progress.suppressed.extend(done.suppressed);
                }
                Err(mut failure) => {
                    debug!(flow = flow.name(), task = %failure.task, "reverting linear flow");
                    failure
                        .revert_failures
                        .extend(self.revert_all(progress.executed).await);
                    failure.suppressed.extend(progress.suppressed);
                    return Err(failure);
                }
            }
        }
        Ok(progress)
    }

    async fn run_unordered(&self, flow: &Flow, store: &Store) -> Result<Progress, Failure> {
        let results = join_all(flow.nodes().iter().map(|n| self.run_node(n, store))).await;

        let mut progress = Progress::default();
        let mut failures = Vec::new();
        for (node, result) in flow.nodes().iter().zip(results) {
            match result {
                Ok(done) => {
                    progress.executed.extend(done.executed);
                    progress.suppressed.extend(done.suppressed);
                }
                Err(failure) => failures.push((node.name().to_owned(), failure)),
            }
        }

        if failures.is_empty() {
            return Ok(progress);
        }

        if flow.is_best_effort() {
            for (branch, failure) in failures {
                warn!(flow = flow.name(), branch = %branch, error = %failure.error, "best-effort branch failed");
                progress.suppressed.extend(failure.suppressed);
                progress.suppressed.extend(failure.revert_failures);
                progress.suppressed.push(TaskFailure {
                    task: failure.task,
                    error: failure.error,
                });
            }
            return Ok(progress);
        }

        let mut failures = failures.into_iter();
        let Some((_, mut first)) = failures.next() else {
            return Ok(progress);
        };
        for (_, other) in failures {
            first.revert_failures.extend(other.revert_failures);
            first.suppressed.push(TaskFailure {
                task: other.task,
                error: other.error,
            });
        }
        first
            .revert_failures
            .extend(self.revert_all(progress.executed).await);
        first.suppressed.extend(progress.suppressed);
        Err(first)
    }

    async fn execute_task(&self, task: &Arc<dyn Task>, store: &Store) -> Result<Executed, Failure> {
        let name = task.name();
        let inputs = store.snapshot(task.requires());
        debug!(task = name, "executing");

        let result = match task.retry() {
            Some(policy) => policy.run(name, || task.execute(store)).await,
            None => task.execute(store).await,
        };

        match result {
            Ok(()) => {
                store.copy_into(&inputs, task.provides());
                Ok(Executed {
                    task: Arc::clone(task),
                    inputs,
                })
            }
            Err(e) => {
                warn!(task = name, error = %e, "task failed");
                Err(Failure::at(name, e))
            }
        }
    }

    async fn revert_all(&self, executed: Vec<Executed>) -> Vec<TaskFailure> {
        let mut failures = Vec::new();
        for done in executed.into_iter().rev() {
            let name = done.task.name().to_owned();
            debug!(task = %name, "reverting");
            if let Err(e) = done.task.revert(&done.inputs).await {
                error!(task = %name, error = %e, "revert failed, continuing");
                failures.push(TaskFailure {
                    task: name,
                    error: e,
                });
            }
        }
        failures
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::{Key, RetryPolicy};

    type Log = Arc<Mutex<Vec<String>>>;

    const SEEN: Key<u32> = Key::new("seen");
    const SEEN_KEYS: &[&str] = &[SEEN.name()];

    struct Step {
        name: &'static str,
        log: Log,
        fail: bool,
        fail_revert: bool,
    }

    impl Step {
        fn ok(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail: false,
                fail_revert: false,
            }
        }

        fn failing(name: &'static str, log: &Log) -> Self {
            Self {
                fail: true,
                ..Self::ok(name, log)
            }
        }

        fn bad_revert(name: &'static str, log: &Log) -> Self {
            Self {
                fail_revert: true,
                ..Self::ok(name, log)
            }
        }
    }

    #[async_trait]
    impl Task for Step {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
            self.log.lock().unwrap().push(format!("exec:{}", self.name));
            if self.fail {
                return Err(CoreError::Internal(format!("{} failed", self.name)));
            }
            Ok(())
        }

        async fn revert(&self, _inputs: &Store) -> Result<(), CoreError> {
            self.log.lock().unwrap().push(format!("revert:{}", self.name));
            if self.fail_revert {
                return Err(CoreError::Internal("revert broke".into()));
            }
            Ok(())
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn failure_reverts_predecessors_newest_first() {
        let log = Log::default();
        let flow = Flow::linear("f")
            .task(Step::ok("a", &log))
            .task(Step::ok("b", &log))
            .task(Step::ok("c", &log))
            .task(Step::failing("d", &log))
            .task(Step::ok("e", &log));

        let err = Engine::new().run(&flow, &Store::new()).await.unwrap_err();
        assert_eq!(err.task, "d");
        assert!(!err.is_divergent());
        assert_eq!(
            entries(&log),
            vec![
                "exec:a", "exec:b", "exec:c", "exec:d", "revert:c", "revert:b", "revert:a"
            ]
        );
    }

    #[tokio::test]
    async fn revert_failure_does_not_block_earlier_reverts() {
        let log = Log::default();
        let flow = Flow::linear("f")
            .task(Step::ok("a", &log))
            .task(Step::bad_revert("b", &log))
            .task(Step::failing("c", &log));

        let err = Engine::new().run(&flow, &Store::new()).await.unwrap_err();
        assert!(err.is_divergent());
        assert_eq!(err.revert_failures.len(), 1);
        assert_eq!(err.revert_failures[0].task, "b");
        assert!(entries(&log).contains(&"revert:a".to_owned()));
    }

    #[tokio::test]
    async fn nested_flow_failure_reverts_outer_tasks() {
        let log = Log::default();
        let inner = Flow::linear("inner")
            .task(Step::ok("i1", &log))
            .task(Step::failing("i2", &log));
        let flow = Flow::linear("outer")
            .task(Step::ok("o1", &log))
            .flow(inner)
            .task(Step::ok("o2", &log));

        Engine::new().run(&flow, &Store::new()).await.unwrap_err();
        assert_eq!(
            entries(&log),
            vec!["exec:o1", "exec:i1", "exec:i2", "revert:i1", "revert:o1"]
        );
    }

    #[tokio::test]
    async fn unordered_failure_reverts_successful_siblings() {
        let log = Log::default();
        let group = Flow::unordered("group")
            .task(Step::ok("x", &log))
            .task(Step::failing("y", &log));
        let flow = Flow::linear("f").task(Step::ok("a", &log)).flow(group);

        let err = Engine::new().run(&flow, &Store::new()).await.unwrap_err();
        assert_eq!(err.task, "y");
        let seen = entries(&log);
        assert!(seen.contains(&"revert:x".to_owned()));
        assert!(seen.contains(&"revert:a".to_owned()));
        assert!(!seen.contains(&"revert:y".to_owned()));
    }

    #[tokio::test]
    async fn best_effort_group_records_and_continues() {
        let log = Log::default();
        let group = Flow::unordered("teardown")
            .best_effort()
            .task(Step::failing("x", &log))
            .task(Step::ok("y", &log));
        let flow = Flow::linear("f").flow(group).task(Step::ok("after", &log));

        let report = Engine::new().run(&flow, &Store::new()).await.unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(report.suppressed.len(), 1);
        assert_eq!(report.suppressed[0].task, "x");
        assert!(entries(&log).contains(&"exec:after".to_owned()));
    }

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Task for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn provides(&self) -> &[&'static str] {
            SEEN_KEYS
        }

        fn retry(&self) -> Option<RetryPolicy> {
            Some(RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(5)))
        }

        async fn execute(&self, store: &Store) -> Result<(), CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                return Err(CoreError::TransientConnection {
                    reason: "refused".into(),
                });
            }
            store.insert(SEEN, n);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_task_is_retried_inside_flow() {
        let flow = Flow::linear("f").task(Flaky {
            calls: AtomicU32::new(0),
        });
        let store = Store::new();
        Engine::new().run(&flow, &store).await.unwrap();
        assert_eq!(*store.get(SEEN).unwrap(), 3);
    }

    #[tokio::test]
    async fn duplicate_unordered_writers_are_rejected_before_running() {
        let log = Log::default();
        let flow = Flow::unordered("dup")
            .task(Flaky {
                calls: AtomicU32::new(0),
            })
            .task(Flaky {
                calls: AtomicU32::new(0),
            })
            .task(Step::ok("never", &log));

        let err = Engine::new().run(&flow, &Store::new()).await.unwrap_err();
        assert_eq!(err.task, "<check>");
        assert!(entries(&log).is_empty());
    }
}
