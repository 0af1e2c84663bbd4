use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nmap_task_rs::validate::Target;
use nmap_task_rs::{
    EngineConfig, ExecutionError, RawOutput, RegistryConfig, ScanRunner, TaskRegistry, TaskSnapshot,
    TaskStatus, ValidatedCommand, ValidationError,
};

const SCANME: &str = include_str!("fixtures/scanme.xml");

/// Scripted scanner that counts invocations and tracks overlap.
struct FakeRunner {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    respond: fn(&ValidatedCommand) -> Result<RawOutput, ExecutionError>,
}

impl FakeRunner {
    fn new(respond: fn(&ValidatedCommand) -> Result<RawOutput, ExecutionError>) -> Arc<Self> {
        Self::with_delay(respond, Duration::ZERO)
    }

    fn with_delay(
        respond: fn(&ValidatedCommand) -> Result<RawOutput, ExecutionError>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
            respond,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanRunner for FakeRunner {
    async fn run(&self, command: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(command)
    }
}

fn scanme_ok(_: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
    Ok(RawOutput {
        stdout: SCANME.to_string(),
        warning: None,
    })
}

fn registry(runner: Arc<FakeRunner>, config: RegistryConfig) -> TaskRegistry {
    TaskRegistry::new(EngineConfig::default(), runner, config)
}

async fn wait_for_terminal(registry: &TaskRegistry, id: &str) -> TaskSnapshot {
    for _ in 0..500 {
        let snap = registry.get(id).await.expect("task exists");
        if snap.status.is_terminal() {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never finished");
}

#[tokio::test]
async fn scan_completes_with_summary() {
    let runner = FakeRunner::with_delay(scanme_ok, Duration::from_millis(50));
    let registry = registry(runner.clone(), RegistryConfig::default());

    let id = registry.submit("scanme.nmap.org", Some("-T4 -F")).await.unwrap();
    let pending = registry.get(&id).await.unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert_eq!(pending.flags, "-T4 -F");
    assert!(pending.result.is_none() && pending.error.is_none());

    let done = wait_for_terminal(&registry, &id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.error.is_none());
    let report = done.result.expect("completed task has a result");
    assert!(report.summary.contains("Host:"));
    assert!(report.summary.contains("/tcp -"));
    assert_eq!(report.scan.hosts.len(), 1);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn invalid_target_never_reaches_the_scanner() {
    let runner = FakeRunner::new(scanme_ok);
    let registry = registry(runner.clone(), RegistryConfig::default());

    let err = registry
        .submit("<script>alert(1)</script>", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::InvalidTarget(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.calls(), 0);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn out_of_range_port_is_rejected_synchronously() {
    let runner = FakeRunner::new(scanme_ok);
    let registry = registry(runner.clone(), RegistryConfig::default());

    let err = registry.submit("10.0.0.1", Some("-p 1-70000")).await.unwrap_err();
    assert_eq!(err, ValidationError::InvalidPortSpec("1-70000".into()));
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn default_flags_are_recorded() {
    let registry = registry(FakeRunner::new(scanme_ok), RegistryConfig::default());
    let id = registry.submit("10.0.0.1", None).await.unwrap();
    assert_eq!(registry.get(&id).await.unwrap().flags, "-T4 -p 1-1000");
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn execution_failure_marks_task_failed() {
    fn timeout(_: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
        Err(ExecutionError::Timeout(Duration::from_secs(300)))
    }
    let registry = registry(FakeRunner::new(timeout), RegistryConfig::default());

    let id = registry.submit("10.0.0.1", Some("-F")).await.unwrap();
    let done = wait_for_terminal(&registry, &id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.result.is_none());
    assert!(done.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn unparsable_output_marks_task_failed() {
    fn garbage(_: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
        Ok(RawOutput {
            stdout: "Starting Nmap 7.94 ( https://nmap.org )".into(),
            warning: None,
        })
    }
    let registry = registry(FakeRunner::new(garbage), RegistryConfig::default());

    let id = registry.submit("10.0.0.1", Some("-F")).await.unwrap();
    let done = wait_for_terminal(&registry, &id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("failed to parse nmap XML output"));
}

#[tokio::test]
async fn stderr_warning_is_kept_on_success() {
    fn noisy(_: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
        Ok(RawOutput {
            stdout: SCANME.to_string(),
            warning: Some("Warning: 45.33.32.156 giving up on port".into()),
        })
    }
    let registry = registry(FakeRunner::new(noisy), RegistryConfig::default());

    let id = registry.submit("scanme.nmap.org", None).await.unwrap();
    let done = wait_for_terminal(&registry, &id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.warning.unwrap().starts_with("Warning:"));
}

#[tokio::test]
async fn one_failing_task_does_not_affect_another() {
    fn by_target(cmd: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
        match cmd.target() {
            Target::Hostname(_) => scanme_ok(cmd),
            _ => Err(ExecutionError::OutputTooLarge { limit: 10 }),
        }
    }
    let registry = registry(FakeRunner::new(by_target), RegistryConfig::default());

    let good = registry.submit("scanme.nmap.org", None).await.unwrap();
    let bad = registry.submit("10.0.0.0/24", None).await.unwrap();
    assert_ne!(good, bad);

    assert_eq!(wait_for_terminal(&registry, &good).await.status, TaskStatus::Completed);
    assert_eq!(wait_for_terminal(&registry, &bad).await.status, TaskStatus::Failed);
}

#[tokio::test]
async fn unknown_task_is_none() {
    let registry = registry(FakeRunner::new(scanme_ok), RegistryConfig::default());
    assert!(registry.get("no-such-task").await.is_none());
}

#[tokio::test]
async fn concurrency_cap_limits_overlap() {
    let runner = FakeRunner::with_delay(scanme_ok, Duration::from_millis(40));
    let config = RegistryConfig {
        max_concurrent_scans: Some(1),
        ..RegistryConfig::default()
    };
    let registry = registry(runner.clone(), config);

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(registry.submit("10.0.0.1", Some("-F")).await.unwrap());
    }
    for id in &ids {
        assert_eq!(wait_for_terminal(&registry, id).await.status, TaskStatus::Completed);
    }
    assert_eq!(runner.calls(), 3);
    assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn uncapped_scans_overlap() {
    let runner = FakeRunner::with_delay(scanme_ok, Duration::from_millis(200));
    let registry = registry(runner.clone(), RegistryConfig::default());

    let a = registry.submit("10.0.0.1", Some("-F")).await.unwrap();
    let b = registry.submit("10.0.0.2", Some("-F")).await.unwrap();
    wait_for_terminal(&registry, &a).await;
    wait_for_terminal(&registry, &b).await;
    assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn finished_tasks_expire_after_ttl() {
    let config = RegistryConfig {
        task_ttl: Some(Duration::from_millis(50)),
        ..RegistryConfig::default()
    };
    let registry = registry(FakeRunner::new(scanme_ok), config);

    let id = registry.submit("10.0.0.1", Some("-F")).await.unwrap();
    wait_for_terminal(&registry, &id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(registry.purge_expired().await, 1);
    assert!(registry.get(&id).await.is_none());
}

#[tokio::test]
async fn panicking_runner_fails_the_task() {
    struct Exploding;

    #[async_trait]
    impl ScanRunner for Exploding {
        async fn run(&self, _: &ValidatedCommand) -> Result<RawOutput, ExecutionError> {
            panic!("runner blew up");
        }
    }

    let registry = TaskRegistry::new(EngineConfig::default(), Arc::new(Exploding), RegistryConfig::default());
    let id = registry.submit("10.0.0.1", Some("-F")).await.unwrap();
    let done = wait_for_terminal(&registry, &id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("aborted"));
}
