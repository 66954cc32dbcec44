//! Streaming plan execution.
//!
//! A plan runs as a supervised task that writes events into a bounded
//! channel; the HTTP layer drains the channel into the wire stream. Each
//! step spawns at most one child process. Cancellation propagates through
//! a token: SIGTERM, a two-second grace window, then SIGKILL. Timeouts
//! use the same termination sequence and synthesize a stderr tail the
//! handler matcher can classify.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use opsdeck_profile::SystemProfile;

use crate::chain::{ChainSummary, ChainTracker};
use crate::events::ExecutionEvent;
use crate::matcher::match_failure;
use crate::plan::{ExpectedExit, InstallPlan, InstallStep, StepKind};
use crate::probe::HostProbe;
use crate::remediate::RemediationPlanner;
use crate::resolve::Resolver;
use crate::sudo::{prepare_command, redact_secret, StdinFeed};

/// Grace window between SIGTERM and SIGKILL.
pub const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Longest log line forwarded unmodified; the rest is truncated.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Stderr lines retained per step for handler matching.
pub const STDERR_TAIL_LINES: usize = 64;

/// Event channel capacity per execution.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const TRUNCATION_SENTINEL: &str = " …[truncated]";

/// A running (or finished) plan execution.
pub struct ExecutionHandle {
    /// Opaque id clients use to re-observe the terminal event.
    pub plan_id: String,
    /// Cancels the execution; idempotent.
    pub cancel: CancellationToken,
    /// Ordered event stream ending with exactly one `done`.
    pub events: mpsc::Receiver<ExecutionEvent>,
}

/// The install engine: resolver, executor, matcher, remediation planner
/// and chain tracker wired over one registry and host probe.
pub struct InstallEngine {
    resolver: Arc<Resolver>,
    planner: RemediationPlanner,
    chains: Arc<ChainTracker>,
}

impl InstallEngine {
    /// Wire an engine over a resolver and the probe it shares.
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, probe: Arc<dyn HostProbe>) -> Self {
        let planner = RemediationPlanner::new(Arc::clone(&resolver), probe);
        Self {
            resolver,
            planner,
            chains: Arc::new(ChainTracker::new()),
        }
    }

    /// The resolver this engine plans with.
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// The escalation chain tracker.
    #[must_use]
    pub fn chains(&self) -> &Arc<ChainTracker> {
        &self.chains
    }

    /// Execute a plan, streaming events.
    ///
    /// The returned handle carries the plan id, the cancellation token and
    /// the event receiver. The execution task owns the plan; it survives a
    /// dropped receiver so the terminal event is always computed.
    #[must_use]
    pub fn execute(
        &self,
        plan: InstallPlan,
        profile: Arc<SystemProfile>,
        sudo_secret: Option<String>,
        chain_id: Option<String>,
    ) -> ExecutionHandle {
        let plan_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let task = ExecutionTask {
            resolver: Arc::clone(&self.resolver),
            planner: self.planner.clone(),
            chains: Arc::clone(&self.chains),
            plan,
            profile,
            sudo_secret,
            chain_id,
            plan_id: plan_id.clone(),
            cancel: cancel.clone(),
            tx,
        };
        tokio::spawn(task.run());

        ExecutionHandle {
            plan_id,
            cancel,
            events: rx,
        }
    }
}

struct ExecutionTask {
    resolver: Arc<Resolver>,
    planner: RemediationPlanner,
    chains: Arc<ChainTracker>,
    plan: InstallPlan,
    profile: Arc<SystemProfile>,
    sudo_secret: Option<String>,
    chain_id: Option<String>,
    plan_id: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<ExecutionEvent>,
}

impl ExecutionTask {
    async fn run(mut self) {
        let total = self.plan.steps.len();
        let tool_id = self.plan.tool_id.clone();
        let steps = std::mem::take(&mut self.plan.steps);

        for (step_idx, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.emit_done(false, true, None, None).await;
                return;
            }

            self.emit(ExecutionEvent::StepStart {
                step_idx,
                total,
                label: step.label.clone(),
            })
            .await;

            let result = self.run_step(step, step_idx).await;

            if result.cancelled {
                // Cancellation terminates the stream without a step
                // terminal; the done event is the only closure.
                self.emit_done(false, true, None, None).await;
                return;
            }

            if result.ok(step.expected_exit) {
                self.emit(ExecutionEvent::StepDone {
                    step_idx,
                    exit_code: result.exit_code.unwrap_or(0),
                    duration_ms: result.duration.as_millis() as u64,
                })
                .await;
                continue;
            }

            let stderr_tail = result.stderr_tail.join("\n");
            self.emit(ExecutionEvent::StepFailed {
                step_idx,
                exit_code: result.exit_code,
                stderr_tail: stderr_tail.clone(),
            })
            .await;

            let (remediation, chain) = self
                .classify_failure(&tool_id, step, result.exit_code, &stderr_tail)
                .await;
            self.emit_done(false, false, remediation.map(Box::new), chain)
                .await;
            return;
        }

        let chain = self
            .chain_id
            .as_deref()
            .and_then(|cid| self.chains.record_success(cid, &tool_id));
        self.emit_done(true, false, None, chain).await;
    }

    async fn classify_failure(
        &self,
        tool_id: &str,
        step: &InstallStep,
        exit_code: Option<i32>,
        stderr_tail: &str,
    ) -> (
        Option<crate::remediate::RemediationResponse>,
        Option<ChainSummary>,
    ) {
        let registry = self.resolver.registry();
        let recipe = registry.lookup(tool_id);
        let matched = match_failure(recipe, step.method_family, exit_code, stderr_tail);

        let Some(matched) = matched else {
            debug!("no handler matched for '{tool_id}' step '{}'", step.label);
            let chain = self.chain_id.as_deref().and_then(|cid| {
                self.chains.record_failure(cid, tool_id, "unhandled")
            });
            return (None, chain);
        };

        let chain = match (&self.chain_id, matched.handler.chain_forward) {
            (Some(cid), _) => {
                self.chains
                    .record_failure(cid, tool_id, &matched.handler.failure_id)
            }
            (None, true) => {
                let label = recipe
                    .map_or_else(|| format!("Install {tool_id}"), |r| format!("Install {}", r.spec.label));
                let cid = self.chains.start(tool_id, &label);
                self.chains
                    .record_failure(&cid, tool_id, &matched.handler.failure_id)
            }
            (None, false) => None,
        };

        let response = self
            .planner
            .build(&matched, tool_id, &self.profile, chain.clone())
            .await;
        (Some(response), chain)
    }

    async fn emit(&self, event: ExecutionEvent) {
        // A dropped receiver must not stop the execution; the terminal
        // state still has to be reached and recorded.
        if self.tx.send(event).await.is_err() {
            debug!("event receiver for plan {} dropped", self.plan_id);
        }
    }

    async fn emit_done(
        &self,
        ok: bool,
        cancelled: bool,
        remediation: Option<Box<crate::remediate::RemediationResponse>>,
        chain: Option<ChainSummary>,
    ) {
        self.emit(ExecutionEvent::Done {
            ok,
            cancelled,
            remediation,
            chain,
            plan_id: self.plan_id.clone(),
        })
        .await;
    }

    async fn run_step(&self, step: &InstallStep, step_idx: usize) -> StepResult {
        let started = Instant::now();

        // Advisory steps execute nothing.
        if step.kind == StepKind::PostEnv || step.command.is_empty() {
            return StepResult::success(started.elapsed());
        }

        let caps = &self.profile.capabilities;
        let prepared = prepare_command(
            &step.command,
            step.needs_sudo,
            caps.is_root,
            caps.passwordless_sudo,
            self.sudo_secret.is_some(),
        );
        let Some((program, args)) = prepared.argv.split_first() else {
            return StepResult::success(started.elapsed());
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(match prepared.stdin {
                StdinFeed::SecretOnce => Stdio::piped(),
                StdinFeed::Closed => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let line = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{program}: command not found")
                } else {
                    format!("failed to spawn {program}: {e}")
                };
                self.emit(ExecutionEvent::Log {
                    step_idx,
                    line: line.clone(),
                })
                .await;
                return StepResult {
                    exit_code: Some(127),
                    stderr_tail: vec![line],
                    duration: started.elapsed(),
                    timed_out: false,
                    cancelled: false,
                };
            }
        };

        if prepared.stdin == StdinFeed::SecretOnce {
            if let (Some(mut stdin), Some(secret)) =
                (child.stdin.take(), self.sudo_secret.as_deref())
            {
                let mut payload = secret.as_bytes().to_vec();
                payload.push(b'\n');
                if let Err(e) = stdin.write_all(&payload).await {
                    warn!("failed to feed sudo stdin: {e}");
                }
                // Dropping closes the pipe: the secret went through once.
            }
        }

        let tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let secret = self.sudo_secret.clone();

        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(stream_lines(
                out,
                self.tx.clone(),
                step_idx,
                secret.clone(),
                None,
            ))
        });
        let stderr_task = child.stderr.take().map(|err| {
            tokio::spawn(stream_lines(
                err,
                self.tx.clone(),
                step_idx,
                secret.clone(),
                Some(Arc::clone(&tail)),
            ))
        });

        enum WaitOutcome {
            Exited(Option<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status.ok()),
            () = tokio::time::sleep(step.timeout()) => WaitOutcome::TimedOut,
            () = self.cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let mut timed_out = false;
        let mut cancelled = false;
        let status = match outcome {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::TimedOut => {
                timed_out = true;
                terminate_child(&mut child).await;
                None
            }
            WaitOutcome::Cancelled => {
                cancelled = true;
                terminate_child(&mut child).await;
                None
            }
        };

        // Drain remaining output so log events precede the step terminal.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let mut stderr_tail: Vec<String> = tail
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        let exit_code = if timed_out || cancelled {
            None
        } else {
            status.and_then(exit_code_of)
        };

        if timed_out {
            stderr_tail.push(format!("Step timed out after {}s", step.timeout_secs));
        }

        StepResult {
            exit_code,
            stderr_tail,
            duration: started.elapsed(),
            timed_out,
            cancelled,
        }
    }
}

/// Outcome of one step.
#[derive(Debug)]
struct StepResult {
    exit_code: Option<i32>,
    stderr_tail: Vec<String>,
    duration: Duration,
    timed_out: bool,
    cancelled: bool,
}

impl StepResult {
    fn success(duration: Duration) -> Self {
        Self {
            exit_code: Some(0),
            stderr_tail: Vec::new(),
            duration,
            timed_out: false,
            cancelled: false,
        }
    }

    fn ok(&self, expected: ExpectedExit) -> bool {
        if self.timed_out || self.cancelled {
            return false;
        }
        match expected {
            ExpectedExit::Zero => self.exit_code == Some(0),
            ExpectedExit::Any => true,
        }
    }
}

/// SIGTERM, grace window, SIGKILL, then reap.
async fn terminate_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: signalling our own child process by pid.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(CANCEL_GRACE, child.wait()).await.is_err() {
        if let Err(e) = child.start_kill() {
            warn!("SIGKILL after grace window failed: {e}");
        }
        let _ = child.wait().await;
    }
}

/// Exit code of a finished child; killed-by-signal reports `128 + signo`
/// so handler exit-code constraints (e.g. OOM-kill 137) match uniformly.
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal().map(|sig| 128 + sig)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Forward one output stream line-by-line as log events, capping line
/// length, scrubbing the secret, and optionally retaining a stderr tail.
async fn stream_lines<R>(
    reader: R,
    tx: mpsc::Sender<ExecutionEvent>,
    step_idx: usize,
    secret: Option<String>,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(raw)) = lines.next_line().await {
        let line = cap_line(&redact_secret(&raw, secret.as_deref()));
        if let Some(tail) = &tail {
            let mut tail = tail.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }
        if tx
            .send(ExecutionEvent::Log { step_idx, line })
            .await
            .is_err()
        {
            // Receiver gone; keep draining for the stderr tail.
            continue;
        }
    }
}

fn cap_line(line: &str) -> String {
    if line.len() <= MAX_LINE_BYTES {
        return line.to_string();
    }
    let mut cut = MAX_LINE_BYTES;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut capped = line[..cut].to_string();
    capped.push_str(TRUNCATION_SENTINEL);
    capped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepProduct;
    use crate::probe::testing::FakeProbe;
    use opsdeck_recipes::{builtin_catalog, RecipeRegistry};

    fn engine() -> InstallEngine {
        let registry = Arc::new(RecipeRegistry::new(builtin_catalog()).unwrap());
        let probe: Arc<dyn HostProbe> = Arc::new(FakeProbe::default());
        let resolver = Arc::new(Resolver::new(registry, Arc::clone(&probe)));
        InstallEngine::new(resolver, probe)
    }

    fn shell_step(label: &str, script: &str) -> InstallStep {
        InstallStep {
            kind: StepKind::InstallTarget,
            label: label.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            needs_sudo: false,
            timeout_secs: 300,
            expected_exit: ExpectedExit::Zero,
            produces: StepProduct::Nothing,
            method_family: None,
        }
    }

    fn plan_of(steps: Vec<InstallStep>) -> InstallPlan {
        InstallPlan {
            tool_id: "ruff".to_string(),
            profile_snapshot_id: "snap-test".to_string(),
            steps,
            already_installed: false,
            needs_sudo_overall: false,
            advisory_ephemeral: false,
        }
    }

    async fn collect(mut handle: ExecutionHandle) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_successful_plan_event_ordering() {
        let plan = plan_of(vec![
            shell_step("one", "echo first"),
            shell_step("two", "echo second"),
        ]);
        let handle = engine().execute(
            plan,
            Arc::new(SystemProfile::unknown()),
            None,
            None,
        );
        let events = collect(handle).await;

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ExecutionEvent::StepStart { .. } => "start",
                ExecutionEvent::Log { .. } => "log",
                ExecutionEvent::StepDone { .. } => "done",
                ExecutionEvent::StepFailed { .. } => "failed",
                ExecutionEvent::Done { .. } => "terminal",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["start", "log", "done", "start", "log", "done", "terminal"]
        );

        match events.last().unwrap() {
            ExecutionEvent::Done { ok, cancelled, .. } => {
                assert!(ok);
                assert!(!cancelled);
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exactly_one_done_event() {
        let plan = plan_of(vec![shell_step("boom", "echo oops >&2; exit 3")]);
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let events = collect(handle).await;

        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_failed_step_carries_stderr_tail() {
        let plan = plan_of(vec![shell_step("boom", "echo totally novel error >&2; exit 3")]);
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let events = collect(handle).await;

        let failed = events
            .iter()
            .find_map(|e| match e {
                ExecutionEvent::StepFailed {
                    exit_code,
                    stderr_tail,
                    ..
                } => Some((exit_code, stderr_tail)),
                _ => None,
            })
            .expect("step_failed missing");
        assert_eq!(*failed.0, Some(3));
        assert!(failed.1.contains("totally novel error"));

        // Unmatched failure: done carries no remediation.
        match events.last().unwrap() {
            ExecutionEvent::Done {
                ok, remediation, ..
            } => {
                assert!(!ok);
                assert!(remediation.is_none());
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_matched_failure_produces_remediation() {
        let mut step = shell_step("pip install", "echo 'error: externally-managed-environment' >&2; exit 1");
        step.method_family = Some(opsdeck_recipes::MethodFamily::Pip);
        let plan = plan_of(vec![step]);
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let events = collect(handle).await;

        match events.last().unwrap() {
            ExecutionEvent::Done {
                ok,
                remediation: Some(remediation),
                ..
            } => {
                assert!(!ok);
                assert_eq!(remediation.failure.failure_id, "pep668");
            }
            other => panic!("expected remediation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let mut step = shell_step("slow", "sleep 30");
        step.timeout_secs = 1;
        let plan = plan_of(vec![step]);

        let started = Instant::now();
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let events = collect(handle).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        let tail = events
            .iter()
            .find_map(|e| match e {
                ExecutionEvent::StepFailed { stderr_tail, .. } => Some(stderr_tail.clone()),
                _ => None,
            })
            .expect("step_failed missing");
        assert!(tail.contains("Step timed out after 1s"));
    }

    #[tokio::test]
    async fn test_cancellation_skips_step_terminal() {
        let plan = plan_of(vec![
            shell_step("slow", "echo started; sleep 30"),
            shell_step("never", "echo never"),
        ]);
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let cancel = handle.cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let events = collect(handle).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        assert!(events
            .iter()
            .all(|e| !matches!(e, ExecutionEvent::StepDone { .. } | ExecutionEvent::StepFailed { .. })));
        match events.last().unwrap() {
            ExecutionEvent::Done { ok, cancelled, .. } => {
                assert!(!ok);
                assert!(cancelled);
            }
            other => panic!("unexpected terminal {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_idempotent() {
        let plan = plan_of(vec![shell_step("slow", "sleep 30")]);
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        handle.cancel.cancel();
        handle.cancel.cancel();
        let events = collect(handle).await;
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_secret_never_reaches_events() {
        let secret = "hunter2-sentinel-98f3";
        let plan = plan_of(vec![shell_step(
            "echoes",
            &format!("echo {secret}; echo {secret} >&2; exit 1"),
        )]);
        let handle = engine().execute(
            plan,
            Arc::new(SystemProfile::unknown()),
            Some(secret.to_string()),
            None,
        );
        let events = collect(handle).await;

        for event in &events {
            let wire = event.to_wire_line();
            assert!(!wire.contains(secret), "secret leaked in {wire}");
        }
    }

    #[tokio::test]
    async fn test_already_installed_plan_completes_immediately() {
        let plan = InstallPlan::already_installed("ruff", "snap-test");
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let events = collect(handle).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn test_missing_binary_classifies_as_spawn_failure() {
        let plan = plan_of(vec![InstallStep {
            kind: StepKind::InstallTarget,
            label: "ghost".to_string(),
            command: vec!["definitely-not-a-binary-423".to_string()],
            needs_sudo: false,
            timeout_secs: 10,
            expected_exit: ExpectedExit::Zero,
            produces: StepProduct::Nothing,
            method_family: None,
        }]);
        let handle = engine().execute(plan, Arc::new(SystemProfile::unknown()), None, None);
        let events = collect(handle).await;

        let failed = events.iter().find_map(|e| match e {
            ExecutionEvent::StepFailed {
                exit_code,
                stderr_tail,
                ..
            } => Some((exit_code, stderr_tail.clone())),
            _ => None,
        });
        let (code, tail) = failed.expect("step_failed missing");
        assert_eq!(*code, Some(127));
        assert!(tail.contains("command not found"));
    }

    #[test]
    fn test_cap_line() {
        let short = "hello";
        assert_eq!(cap_line(short), "hello");

        let long = "x".repeat(MAX_LINE_BYTES + 10);
        let capped = cap_line(&long);
        assert!(capped.ends_with(TRUNCATION_SENTINEL));
        assert!(capped.len() < long.len());
    }
}
