//! Pipeline engine: runs a stage list against a bundle on a dedicated thread

use crate::bundle::Bundle;
use crate::error::{EngineError, ExecutionError, StageError};
use crate::stage::Flow;
use crate::stage_list::StageList;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const NO_STOP: u8 = 0;
const STOP_GRACEFUL: u8 = 1;
const STOP_IMMEDIATE: u8 = 2;

/// Engine configuration
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineConfig {
    /// Tick rate; `None` runs ticks back-to-back
    pub target_fps: Option<f64>,
}

impl EngineConfig {
    pub fn with_target_fps(fps: f64) -> Self {
        Self {
            target_fps: Some(fps),
        }
    }

    fn tick_interval(&self) -> Option<Duration> {
        self.target_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps))
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    StopRequested,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration limit was reached
    Completed,

    /// A stage returned [`Flow::Stop`] or set the `cancel` key
    StageStopped,

    /// [`Engine::stop`] or [`EngineHandle::request_stop`] was called
    Requested,

    /// A stage failed; see [`Engine::last_error`]
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::Completed => "iteration limit reached",
            StopReason::StageStopped => "stopped by stage",
            StopReason::Requested => "stop requested",
            StopReason::Failed => "stage failed",
        };
        f.write_str(reason)
    }
}

/// Lifecycle notification
///
/// Within one run the order is always `Starting`, at most one `Error`, then
/// `Stopped`.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Starting,
    Error(Arc<ExecutionError>),
    Stopped { ticks: u64, reason: StopReason },
}

struct Shared {
    state: Mutex<EngineState>,
    changed: Condvar,
    stop_mode: AtomicU8,
    ticks: AtomicU64,
    last_error: Mutex<Option<Arc<ExecutionError>>>,
    last_reason: Mutex<Option<StopReason>>,
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn stop_mode(&self) -> u8 {
        self.stop_mode.load(Ordering::SeqCst)
    }

    fn request_stop(&self, graceful: bool) {
        let mut state = self.state.lock();
        if *state == EngineState::Stopped {
            return;
        }

        let mode = if graceful { STOP_GRACEFUL } else { STOP_IMMEDIATE };
        // An immediate request is never downgraded
        self.stop_mode.fetch_max(mode, Ordering::SeqCst);
        if *state == EngineState::Running {
            *state = EngineState::StopRequested;
        }
        debug!(
            "{} stop requested",
            if graceful { "Graceful" } else { "Immediate" }
        );
        self.changed.notify_all();
    }

    /// Sleep until `deadline`, waking early on a stop request
    fn pace(&self, deadline: Instant) {
        let mut state = self.state.lock();
        while self.stop_mode() == NO_STOP {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    fn finish(&self, ticks: u64, reason: StopReason) {
        // Stopped is emitted under the state lock so a run() racing with us
        // cannot emit its Starting first
        let mut state = self.state.lock();
        *self.last_reason.lock() = Some(reason);
        self.emit(EngineEvent::Stopped { ticks, reason });
        *state = EngineState::Stopped;
        self.changed.notify_all();
    }
}

/// Cloneable handle to a running engine, available to stages via the bundle
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Ask the engine to stop; see [`Engine::stop`]
    pub fn request_stop(&self, graceful: bool) {
        self.shared.request_stop(graceful);
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            EngineState::Running | EngineState::StopRequested
        )
    }

    /// Ticks completed in the current run
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

/// Runs a stage list repeatedly on a dedicated thread
pub struct Engine {
    config: EngineConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::Stopped),
                changed: Condvar::new(),
                stop_mode: AtomicU8::new(NO_STOP),
                ticks: AtomicU64::new(0),
                last_error: Mutex::new(None),
                last_reason: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Start running `stages` against a bundle seeded with `seed`
    ///
    /// Returns as soon as the loop thread is started. `iterations == 0` runs
    /// until a stage or a caller stops it.
    pub fn run(&self, stages: StageList, seed: Bundle, iterations: u64) -> Result<(), EngineError> {
        {
            let mut state = self.shared.state.lock();
            if *state != EngineState::Stopped {
                return Err(EngineError::AlreadyRunning);
            }
            *state = EngineState::Starting;
        }

        self.join_worker();
        self.shared.stop_mode.store(NO_STOP, Ordering::SeqCst);
        self.shared.ticks.store(0, Ordering::SeqCst);
        *self.shared.last_error.lock() = None;
        *self.shared.last_reason.lock() = None;

        self.shared.emit(EngineEvent::Starting);
        {
            let mut state = self.shared.state.lock();
            if *state == EngineState::Starting {
                *state = EngineState::Running;
            }
        }

        info!(
            "Engine starting: {} stages, {}",
            stages.len(),
            match iterations {
                0 => "unbounded".to_string(),
                n => format!("{n} iterations"),
            }
        );

        let shared = Arc::clone(&self.shared);
        let interval = self.config.tick_interval();
        let spawned = std::thread::Builder::new()
            .name("filterkit-engine".to_string())
            .spawn(move || run_loop(shared, stages, seed, iterations, interval));

        match spawned {
            Ok(worker) => {
                *self.worker.lock() = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.shared.finish(0, StopReason::Failed);
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Request the running loop to stop
    ///
    /// Graceful lets the in-flight tick run its whole chain; immediate skips
    /// the remaining stages of the current tick. A no-op when stopped. Does
    /// not block; use [`Engine::wait`] to wait for the loop to end.
    pub fn stop(&self, graceful: bool) {
        self.shared.request_stop(graceful);
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            EngineState::Running | EngineState::StopRequested
        )
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// The failure that ended the last run, if it failed
    pub fn last_error(&self) -> Option<Arc<ExecutionError>> {
        self.shared.last_error.lock().clone()
    }

    /// Why the last run ended; `None` before the first run ends
    pub fn last_stop_reason(&self) -> Option<StopReason> {
        *self.shared.last_reason.lock()
    }

    /// Ticks completed in the current or last run
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    /// Receive lifecycle notifications from now on
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until the engine is stopped
    ///
    /// Must not be called from a stage.
    pub fn wait(&self) {
        {
            let mut state = self.shared.state.lock();
            while *state != EngineState::Stopped {
                self.shared.changed.wait(&mut state);
            }
        }
        self.join_worker();
    }

    /// Like [`Engine::wait`] with a deadline; returns whether the engine stopped
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let stopped = {
            let mut state = self.shared.state.lock();
            while *state != EngineState::Stopped {
                if self
                    .shared
                    .changed
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            *state == EngineState::Stopped
        };
        if stopped {
            self.join_worker();
        }
        stopped
    }

    fn join_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Engine thread terminated abnormally");
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // The loop thread is detached, not joined
        self.shared.request_stop(false);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .finish()
    }
}

enum TickOutcome {
    Completed,
    Stopped,
    Aborted,
    Failed(ExecutionError),
}

fn run_loop(
    shared: Arc<Shared>,
    stages: StageList,
    mut bundle: Bundle,
    iterations: u64,
    interval: Option<Duration>,
) {
    bundle.set_engine(EngineHandle {
        shared: Arc::clone(&shared),
    });

    let mut tick: u64 = 0;
    let reason = loop {
        if iterations > 0 && tick >= iterations {
            break StopReason::Completed;
        }
        if shared.stop_mode() != NO_STOP {
            break StopReason::Requested;
        }

        let started = Instant::now();
        match run_tick(&shared, &stages, &mut bundle, tick) {
            TickOutcome::Completed => {}
            TickOutcome::Stopped => {
                tick += 1;
                shared.ticks.store(tick, Ordering::SeqCst);
                break StopReason::StageStopped;
            }
            TickOutcome::Aborted => break StopReason::Requested,
            TickOutcome::Failed(err) => {
                error!("{}", err);
                let err = Arc::new(err);
                *shared.last_error.lock() = Some(Arc::clone(&err));
                shared.emit(EngineEvent::Error(err));
                break StopReason::Failed;
            }
        }

        tick += 1;
        shared.ticks.store(tick, Ordering::SeqCst);

        if let Some(interval) = interval {
            shared.pace(started + interval);
        }
    };

    info!("Engine stopped after {} ticks: {}", tick, reason);
    // Stages may hold resources in the bundle; release them before reporting
    drop(bundle);
    shared.finish(tick, reason);
}

fn run_tick(shared: &Shared, stages: &StageList, bundle: &mut Bundle, tick: u64) -> TickOutcome {
    for (index, handle) in stages.iter().enumerate() {
        if shared.stop_mode() == STOP_IMMEDIATE {
            debug!("Tick {} aborted before stage #{}", tick, index);
            return TickOutcome::Aborted;
        }

        let result = {
            let mut stage = handle.lock();
            catch_unwind(AssertUnwindSafe(|| stage.execute(bundle)))
                .unwrap_or_else(|payload| Err(StageError::Panicked(panic_message(payload))))
        };

        match result {
            Ok(Flow::Continue) if bundle.is_cancelled() => return TickOutcome::Stopped,
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => return TickOutcome::Stopped,
            Err(source) => {
                return TickOutcome::Failed(ExecutionError {
                    stage_index: index,
                    stage_name: handle.type_name().to_string(),
                    tick,
                    source,
                })
            }
        }
    }
    TickOutcome::Completed
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageHandle;
    use crate::test_support::{new_log, Behavior, ExecLog, Recorder};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn recorder(label: &'static str, log: &ExecLog, behavior: Behavior) -> StageHandle {
        StageHandle::anonymous(Recorder::new(label, log, behavior))
    }

    fn run_to_end(engine: &Engine, stages: StageList, iterations: u64) {
        engine.run(stages, Bundle::new(), iterations).unwrap();
        assert!(engine.wait_timeout(TIMEOUT), "engine did not stop");
    }

    #[test]
    fn test_error_aborts_tick_and_run() {
        let log = new_log();
        let stages: StageList = [
            recorder("a", &log, Behavior::Continue),
            recorder("b", &log, Behavior::FailOn(0)),
            recorder("c", &log, Behavior::Continue),
        ]
        .into_iter()
        .collect();

        let engine = Engine::default();
        let events = engine.subscribe();
        run_to_end(&engine, stages, 0);

        assert_eq!(*log.lock(), vec!["a:0", "b:0"]);
        let err = engine.last_error().unwrap();
        assert_eq!(err.stage_index, 1);
        assert_eq!(err.tick, 0);
        assert!(matches!(err.source, StageError::ExecutionFailed(_)));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.last_stop_reason(), Some(StopReason::Failed));

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], EngineEvent::Starting));
        assert!(matches!(events[1], EngineEvent::Error(_)));
        assert!(matches!(
            events[2],
            EngineEvent::Stopped {
                ticks: 0,
                reason: StopReason::Failed
            }
        ));
    }

    #[test]
    fn test_flow_stop_ends_run_after_tick() {
        let log = new_log();
        let stages: StageList = [
            recorder("a", &log, Behavior::Continue),
            recorder("b", &log, Behavior::StopOn(1)),
            recorder("c", &log, Behavior::Continue),
        ]
        .into_iter()
        .collect();

        let engine = Engine::default();
        let events = engine.subscribe();
        run_to_end(&engine, stages, 0);

        assert_eq!(*log.lock(), vec!["a:0", "b:0", "c:0", "a:1", "b:1"]);
        assert_eq!(engine.ticks(), 2);
        assert!(engine.last_error().is_none());
        assert!(events.try_iter().any(|e| matches!(
            e,
            EngineEvent::Stopped {
                reason: StopReason::StageStopped,
                ..
            }
        )));
    }

    #[test]
    fn test_bounded_run() {
        let log = new_log();
        let stages: StageList = [
            recorder("a", &log, Behavior::Continue),
            recorder("b", &log, Behavior::Continue),
        ]
        .into_iter()
        .collect();

        let engine = Engine::default();
        run_to_end(&engine, stages, 3);

        assert_eq!(
            *log.lock(),
            vec!["a:0", "b:0", "a:1", "b:1", "a:2", "b:2"]
        );
        assert_eq!(engine.ticks(), 3);
        assert_eq!(engine.last_stop_reason(), Some(StopReason::Completed));
    }

    #[test]
    fn test_run_while_running_is_rejected() {
        let log = new_log();
        let stages: StageList = [recorder(
            "slow",
            &log,
            Behavior::Sleep(Duration::from_millis(5)),
        )]
        .into_iter()
        .collect();

        let engine = Engine::default();
        engine.run(stages.clone(), Bundle::new(), 0).unwrap();
        assert!(engine.is_running());
        assert!(matches!(
            engine.run(stages, Bundle::new(), 0),
            Err(EngineError::AlreadyRunning)
        ));

        engine.stop(true);
        assert!(engine.wait_timeout(TIMEOUT));
        assert!(!engine.is_running());
    }

    fn blocking_first_stage(entered: Sender<()>) -> StageHandle {
        StageHandle::from_fn(move |_| {
            let _ = entered.send(());
            std::thread::sleep(Duration::from_millis(100));
            Ok(Flow::Continue)
        })
    }

    #[test]
    fn test_graceful_stop_finishes_tick() {
        let log = new_log();
        let (tx, rx) = crossbeam_channel::unbounded();
        let stages: StageList = [
            blocking_first_stage(tx),
            recorder("b", &log, Behavior::Continue),
        ]
        .into_iter()
        .collect();

        let engine = Engine::default();
        engine.run(stages, Bundle::new(), 0).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        engine.stop(true);
        assert_eq!(engine.state(), EngineState::StopRequested);
        assert!(engine.wait_timeout(TIMEOUT));

        assert_eq!(*log.lock(), vec!["b:0"]);
        assert_eq!(engine.ticks(), 1);
    }

    #[test]
    fn test_immediate_stop_skips_rest_of_tick() {
        let log = new_log();
        let (tx, rx) = crossbeam_channel::unbounded();
        let stages: StageList = [
            blocking_first_stage(tx),
            recorder("b", &log, Behavior::Continue),
        ]
        .into_iter()
        .collect();

        let engine = Engine::default();
        let events = engine.subscribe();
        engine.run(stages, Bundle::new(), 0).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        engine.stop(false);
        assert!(engine.wait_timeout(TIMEOUT));

        assert!(log.lock().is_empty());
        assert_eq!(engine.ticks(), 0);
        assert!(events.try_iter().any(|e| matches!(
            e,
            EngineEvent::Stopped {
                reason: StopReason::Requested,
                ..
            }
        )));
    }

    #[test]
    fn test_cancel_key_ends_run_after_stage() {
        let log = new_log();
        let stages: StageList = [
            recorder("a", &log, Behavior::CancelOn(1)),
            recorder("b", &log, Behavior::Continue),
        ]
        .into_iter()
        .collect();

        let engine = Engine::default();
        run_to_end(&engine, stages, 0);
        assert_eq!(*log.lock(), vec!["a:0", "b:0", "a:1"]);
    }

    #[test]
    fn test_panic_is_captured_as_error() {
        let log = new_log();
        let stages: StageList = [recorder("a", &log, Behavior::PanicOn(0))]
            .into_iter()
            .collect();

        let engine = Engine::default();
        run_to_end(&engine, stages, 0);

        let err = engine.last_error().unwrap();
        match &err.source {
            StageError::Panicked(message) => assert_eq!(message, "a panicked"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_stage_can_stop_engine_through_bundle() {
        let stages: StageList = [StageHandle::from_fn(|bundle| {
            if let Some(engine) = bundle.engine() {
                assert!(engine.is_running());
                engine.request_stop(true);
            }
            Ok(Flow::Continue)
        })]
        .into_iter()
        .collect();

        let engine = Engine::default();
        run_to_end(&engine, stages, 0);
        assert_eq!(engine.ticks(), 1);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let engine = Engine::default();
        engine.stop(false);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_pacing_and_early_wakeup() {
        let log = new_log();
        let stages: StageList = [recorder("a", &log, Behavior::Continue)]
            .into_iter()
            .collect();

        let engine = Engine::new(EngineConfig::with_target_fps(100.0));
        let started = Instant::now();
        run_to_end(&engine, stages.clone(), 3);
        assert!(started.elapsed() >= Duration::from_millis(20));

        // A two second tick interval is cut short by the stop request
        let engine = Engine::new(EngineConfig::with_target_fps(0.5));
        engine.run(stages, Bundle::new(), 0).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let stop_at = Instant::now();
        engine.stop(true);
        assert!(engine.wait_timeout(TIMEOUT));
        assert!(stop_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_engine_can_be_restarted() {
        let log = new_log();
        let stages: StageList = [recorder("a", &log, Behavior::Continue)]
            .into_iter()
            .collect();

        let engine = Engine::default();
        let events = engine.subscribe();
        run_to_end(&engine, stages.clone(), 1);
        run_to_end(&engine, stages, 1);

        assert_eq!(*log.lock(), vec!["a:0", "a:1"]);
        let kinds: Vec<_> = events
            .try_iter()
            .map(|e| match e {
                EngineEvent::Starting => "starting",
                EngineEvent::Error(_) => "error",
                EngineEvent::Stopped { .. } => "stopped",
            })
            .collect();
        assert_eq!(kinds, vec!["starting", "stopped", "starting", "stopped"]);
    }
}
