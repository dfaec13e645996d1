//! Single scenario orchestration.
//!
//! A scenario binds a listener, connects to it, streams the payload through
//! the originating side in random slices, waits for both participants,
//! tears everything down, and then decides the verdict.

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::monitor::CompletionMonitor;
use crate::participant::EchoParticipant;
use crate::payload::{Payload, SliceSchedule};
use crate::runtime::{
    CompletionHandle, Connection, Dialer, DispatchPool, HandlerBinding, Listener, Reactor, Role,
};
use crate::teardown::teardown;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Where participant callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the reactor thread.
    Inline,
    /// On the shared dispatch pool.
    Offloaded,
}

/// How the originating side issues its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// A fresh completion handle per write.
    Acknowledged,
    /// The shared void handle for every write.
    FireAndForget,
}

/// One point of the configuration matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfiguration {
    pub dispatch: DispatchMode,
    pub send: SendMode,
}

impl RunConfiguration {
    /// All four combinations, in a fixed order.
    pub const ALL: [RunConfiguration; 4] = [
        RunConfiguration::new(DispatchMode::Inline, SendMode::Acknowledged),
        RunConfiguration::new(DispatchMode::Offloaded, SendMode::Acknowledged),
        RunConfiguration::new(DispatchMode::Inline, SendMode::FireAndForget),
        RunConfiguration::new(DispatchMode::Offloaded, SendMode::FireAndForget),
    ];

    pub const fn new(dispatch: DispatchMode, send: SendMode) -> Self {
        Self { dispatch, send }
    }
}

impl fmt::Display for RunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dispatch = match self.dispatch {
            DispatchMode::Inline => "inline",
            DispatchMode::Offloaded => "offloaded",
        };
        let send = match self.send {
            SendMode::Acknowledged => "acknowledged",
            SendMode::FireAndForget => "fire-and-forget",
        };
        write!(f, "{dispatch}/{send}")
    }
}

impl FromStr for RunConfiguration {
    type Err = String;

    /// Parse `<inline|offloaded>/<acknowledged|fire-and-forget>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RunConfiguration::ALL
            .into_iter()
            .find(|run| run.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<String> = RunConfiguration::ALL.iter().map(|r| r.to_string()).collect();
                format!("unknown scenario '{s}', expected one of: {}", known.join(", "))
            })
    }
}

/// Deliberate fault for exercising the failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultInjection {
    /// The participant on `role`'s side expects a flipped byte at `offset`.
    ForcedMismatch { role: Role, offset: usize },
    /// The accepting participant verifies but never echoes.
    DropEcho,
}

/// Final state of one participant.
#[derive(Debug, Clone)]
pub struct ParticipantSummary {
    pub received: usize,
    /// First recorded failure.
    pub failure: Option<HarnessError>,
    /// Failures reported in total, including the first.
    pub failures_observed: usize,
}

impl ParticipantSummary {
    fn of(participant: &EchoParticipant) -> Self {
        Self {
            received: participant.received(),
            failure: participant.failure().get().cloned(),
            failures_observed: participant.failure().observed(),
        }
    }

    fn empty() -> Self {
        Self {
            received: 0,
            failure: None,
            failures_observed: 0,
        }
    }
}

/// Everything observed during one scenario.
#[derive(Debug)]
pub struct ScenarioReport {
    pub run: RunConfiguration,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Payload length.
    pub total: usize,
    /// Number of slices written by the originating side.
    pub slices: usize,
    pub originating: ParticipantSummary,
    pub accepting: ParticipantSummary,
    /// `Err` carries the root cause of a failed scenario.
    pub outcome: Result<()>,
    /// Transient transport errors that did not fail the scenario.
    pub suppressed: Vec<HarnessError>,
    pub teardown_errors: Vec<HarnessError>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The report if passed, the root cause otherwise.
    pub fn check(self) -> Result<Self> {
        match &self.outcome {
            Ok(()) => Ok(self),
            Err(e) => Err(e.clone()),
        }
    }

    fn log(&self) {
        match &self.outcome {
            Ok(()) => info!(
                scenario = %self.run,
                elapsed_ms = self.elapsed.as_millis() as u64,
                slices = self.slices,
                bytes = self.total,
                suppressed = self.suppressed.len(),
                teardown_errors = self.teardown_errors.len(),
                "Scenario passed"
            ),
            Err(e) => error!(
                scenario = %self.run,
                elapsed_ms = self.elapsed.as_millis() as u64,
                kind = e.kind(),
                error = %e,
                originating = self.originating.received,
                accepting = self.accepting.received,
                total = self.total,
                "Scenario failed"
            ),
        }
    }
}

/// Shared inputs of a scenario run.
pub struct ScenarioContext<'a> {
    pub config: &'a Config,
    pub payload: &'a Payload,
    /// Required by offloaded runs.
    pub pool: Option<&'a DispatchPool>,
    pub fault: Option<FaultInjection>,
}

/// Drive one scenario to a verdict. Never panics on scenario failure; the
/// outcome is in the report.
pub fn run_scenario(ctx: &ScenarioContext<'_>, run: RunConfiguration) -> ScenarioReport {
    let span = info_span!("scenario", name = %run);
    let _enter = span.enter();

    let started_at = Utc::now();
    let clock = Instant::now();
    let deadline = clock + ctx.config.deadline;
    let total = ctx.payload.len();

    let report = |slices, originating, accepting, outcome, suppressed, teardown_errors| {
        let report = ScenarioReport {
            run,
            started_at,
            elapsed: clock.elapsed(),
            total,
            slices,
            originating,
            accepting,
            outcome,
            suppressed,
            teardown_errors,
        };
        report.log();
        report
    };
    let setup_failed = |e: HarnessError| {
        report(
            0,
            ParticipantSummary::empty(),
            ParticipantSummary::empty(),
            Err(e),
            Vec::new(),
            Vec::new(),
        )
    };

    // 1. Fresh participants
    let monitor = CompletionMonitor::new();
    let (originating, accepting) = build_participants(ctx, &monitor);

    // 2. Attach according to the dispatch mode
    let (server_binding, client_binding) = match (run.dispatch, ctx.pool) {
        (DispatchMode::Inline, _) => (
            HandlerBinding::inline(Arc::clone(&accepting)),
            HandlerBinding::inline(Arc::clone(&originating)),
        ),
        (DispatchMode::Offloaded, Some(pool)) => (
            HandlerBinding::offloaded(pool.clone(), Arc::clone(&accepting)),
            HandlerBinding::offloaded(pool.clone(), Arc::clone(&originating)),
        ),
        (DispatchMode::Offloaded, None) => {
            return setup_failed(HarnessError::Harness(
                "offloaded dispatch requires a dispatch pool".to_string(),
            ));
        }
    };

    // 3. Bind, then connect
    let reactor = match Reactor::start(ctx.config.reactor.clone()) {
        Ok(reactor) => reactor,
        Err(e) => return setup_failed(e.into()),
    };
    let listener = match Listener::new(server_binding).bind(&reactor, ctx.config.listen) {
        Ok(listener) => listener,
        Err(e) => return setup_failed(e),
    };
    let client = match Dialer::new(client_binding).connect(&reactor, listener.local_addr()) {
        Ok(client) => client,
        Err(e) => {
            let _ = listener.close().wait_timeout(ctx.config.teardown_timeout);
            return setup_failed(e);
        }
    };
    debug!(addr = %listener.local_addr(), "Listener bound and client connected");

    // 4. Stream the payload
    let schedule = SliceSchedule::new(ctx.config.slice_seed, total, ctx.config.max_slice);
    let (slices, streamed) = stream_payload(&client, ctx.payload, run.send, schedule);

    // 5. Wait for both sides
    let waited = streamed.and_then(|()| {
        monitor
            .await_completion(
                &originating,
                &accepting,
                total,
                ctx.config.poll_interval,
                deadline,
            )
            .map(|completion| debug!(?completion, "Monitor returned"))
    });

    // 6. Teardown, whatever happened above
    let teardown_errors = teardown(
        accepting.endpoint(),
        &client,
        &listener,
        ctx.config.teardown_timeout,
    );
    reactor.shutdown();

    // 7. Verdict
    let originating = ParticipantSummary::of(&originating);
    let accepting = ParticipantSummary::of(&accepting);
    let completed = originating.received >= total && accepting.received >= total;
    let (outcome, suppressed) = verdict(
        accepting.failure.as_ref(),
        originating.failure.as_ref(),
        completed,
        waited,
    );
    for err in &suppressed {
        warn!(error = %err, "Suppressed transient transport error");
    }

    report(
        slices,
        originating,
        accepting,
        outcome,
        suppressed,
        teardown_errors,
    )
}

fn build_participants(
    ctx: &ScenarioContext<'_>,
    monitor: &CompletionMonitor,
) -> (Arc<EchoParticipant>, Arc<EchoParticipant>) {
    let mut originating = EchoParticipant::new("client", ctx.payload.clone(), monitor.signal());
    let mut accepting = EchoParticipant::new("server", ctx.payload.clone(), monitor.signal());

    match ctx.fault {
        Some(FaultInjection::ForcedMismatch {
            role: Role::Originating,
            offset,
        }) => originating = originating.with_forced_mismatch(offset),
        Some(FaultInjection::ForcedMismatch {
            role: Role::Accepting,
            offset,
        }) => accepting = accepting.with_forced_mismatch(offset),
        Some(FaultInjection::DropEcho) => accepting = accepting.without_echo(),
        None => {}
    }

    (Arc::new(originating), Arc::new(accepting))
}

/// Write every slice to `conn`, checking the returned handle against the
/// send mode. Returns the slice count and whether the contract held.
fn stream_payload(
    conn: &Connection,
    payload: &Payload,
    send: SendMode,
    schedule: SliceSchedule,
) -> (usize, Result<()>) {
    let void = CompletionHandle::void();
    let mut slices = 0;
    let mut sent = 0;

    for range in schedule {
        let data = payload.slice(range);
        sent += data.len();
        slices += 1;

        let handle = match send {
            SendMode::Acknowledged => conn.write_and_flush(data),
            SendMode::FireAndForget => conn.write_and_flush_with(data, void.clone()),
        };
        let is_void = handle.ptr_eq(&void);
        match send {
            SendMode::Acknowledged if is_void => {
                return (
                    slices,
                    Err(HarnessError::Harness(format!(
                        "acknowledged write {slices} returned the void handle"
                    ))),
                );
            }
            SendMode::FireAndForget if !is_void => {
                return (
                    slices,
                    Err(HarnessError::Harness(format!(
                        "fire-and-forget write {slices} returned a fresh handle"
                    ))),
                );
            }
            SendMode::Acknowledged | SendMode::FireAndForget => {}
        }
    }

    if sent != payload.len() {
        return (
            slices,
            Err(HarnessError::Harness(format!(
                "streamed {sent} of {} payload bytes",
                payload.len()
            ))),
        );
    }
    debug!(slices, bytes = sent, "Payload streamed");
    (slices, Ok(()))
}

/// Pick the scenario's root cause.
///
/// Priority: verification, harness contract, non-transient transport,
/// timeout, transient transport. Transient transport errors are suppressed
/// when both sides received the full payload. The accepting side is
/// consulted before the originating side at each level.
pub(crate) fn verdict(
    accepting: Option<&HarnessError>,
    originating: Option<&HarnessError>,
    completed: bool,
    waited: Result<()>,
) -> (Result<()>, Vec<HarnessError>) {
    let captured: Vec<&HarnessError> = accepting.into_iter().chain(originating).collect();
    let wait_error = waited.err();

    if let Some(e) = captured.iter().find(|e| e.is_verification()) {
        return (Err((*e).clone()), Vec::new());
    }
    if let Some(e) = captured
        .iter()
        .copied()
        .chain(wait_error.as_ref())
        .find(|e| matches!(e, HarnessError::Harness(_)))
    {
        return (Err(e.clone()), Vec::new());
    }
    if let Some(e) = captured.iter().find(|e| !e.is_transient()) {
        return (Err((*e).clone()), Vec::new());
    }
    if let Some(e) = wait_error {
        return (Err(e), Vec::new());
    }

    let transient: Vec<HarnessError> = captured.into_iter().cloned().collect();
    match transient.first() {
        Some(first) if !completed => (Err(first.clone()), Vec::new()),
        _ => (Ok(()), transient),
    }
}
