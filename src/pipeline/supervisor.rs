//! The bridge supervisor: three execution contexts over shared pipes.
//!
//! - The **supervisor** (the thread that calls [`Bridge::run`]) owns the
//!   state machine, the scheduler policy, the modem event queue and every
//!   timeout. It performs no I/O.
//! - The **serial worker** owns the serial transport. It feeds DTE bytes
//!   through the serial-ingress chain, writes echo/responses back, and
//!   drains the N2S pipeline onto the line under scheduler grants.
//! - The **network worker** is spawned per call. It dials, runs the telnet
//!   engine over the socket, fills the N2S pipe, and drains the S2N
//!   pipeline into the socket under scheduler grants.
//!
//! The workers suspend on short-deadline reads and timed pipe operations;
//! shutdown flips one flag and closes both pipes, and everyone falls out
//! at their next suspension point.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use telnet_protocol::{TelnetEngine, WindowSize};

use crate::bytepipe::BytePipe;
use crate::config::{AutoAnswerMode, BridgeConfig};
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{CallEvent, CallLog, EventReceiver, EventSender, ModemEvent, event_channel};
use crate::modem::{ModemEngine, ModemState, response::ResultCode};
use crate::network::NetworkEndpoint;
use crate::pipeline::buffer::{BufferCounters, DoubleBuffer};
use crate::pipeline::scheduler::{Direction, Grant, QuantumScheduler};
use crate::pipeline::state::{
    StateMachine, SupervisorEvent, SupervisorState, TimeoutDisposition,
};
use crate::pipeline::{NetworkIngressChain, Pipeline, SerialIngressChain};
use crate::serial::SerialIo;
use crate::stats::{SharedCounters, StatsSnapshot};

/// Supervisor tick period.
const TICK: Duration = Duration::from_millis(10);
/// Worker idle nap when nothing moved.
const WORKER_NAP: Duration = Duration::from_millis(5);
/// Deadline slice for timed pipe writes inside workers.
const PIPE_SLICE: Duration = Duration::from_millis(20);
/// Software auto-answer: this many rings inside the window answer the call.
const ANSWER_RINGS: usize = 2;
/// Software auto-answer window.
const ANSWER_WINDOW: Duration = Duration::from_secs(10);
/// Negotiation-quiet window that ends NEGOTIATING early.
const NEGOTIATION_QUIET: Duration = Duration::from_secs(3);
/// Modem event queue depth.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Events the workers report to the supervisor.
#[derive(Debug)]
enum WorkerEvent {
    /// TCP established to the peer
    TcpUp(std::net::SocketAddr),
    /// Dial failed; the mapped result code goes to the DTE
    ConnectFailed(ResultCode, String),
    /// The telnet option exchange settled (or went quiet)
    NegotiationSettled,
    /// Peer closed or reset the connection
    PeerClosed(String),
    /// The serial device failed fatally
    SerialFatal(String),
}

/// Grant arbitration between the two drain sides.
///
/// Each worker asks only for its own direction. The scheduler's pick is
/// binding: when it chooses the other side, the grant is parked until that
/// side collects it.
pub struct SchedulerGate {
    scheduler: Mutex<QuantumScheduler>,
    parked: Mutex<Option<Grant>>,
    pending: [AtomicBool; 2],
}

impl SchedulerGate {
    fn new(scheduler: QuantumScheduler) -> Self {
        Self {
            scheduler: Mutex::new(scheduler),
            parked: Mutex::new(None),
            pending: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    /// Publish whether a direction has work waiting to drain.
    pub fn set_pending(&self, direction: Direction, pending: bool, now: Instant) {
        self.pending[direction.index()].store(pending, Ordering::Relaxed);
        if !pending {
            self.lock_sched().mark_idle(direction, now);
        }
    }

    /// Try to obtain a grant for `direction`.
    pub fn try_acquire(&self, direction: Direction, now: Instant) -> Option<Grant> {
        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(grant) = parked.take() {
            if grant.direction == direction {
                return Some(grant);
            }
            // Parked for the other side; keep it unless that side gave up
            if self.pending[grant.direction.index()].load(Ordering::Relaxed) {
                *parked = Some(grant);
                return None;
            }
        }

        let pending = [
            self.pending[0].load(Ordering::Relaxed),
            self.pending[1].load(Ordering::Relaxed),
        ];
        let grant = self.lock_sched().next_grant(pending, now)?;
        if grant.direction == direction {
            Some(grant)
        } else {
            *parked = Some(grant);
            None
        }
    }

    /// Report drain progress mid-quantum.
    pub fn report_progress(&self, direction: Direction, bytes: usize, now: Instant) {
        self.lock_sched().report_progress(direction, bytes, now);
    }

    /// Close out a quantum (feeds the adaptive sizing).
    pub fn end_quantum(&self, elapsed: Duration, bytes: usize) {
        self.lock_sched().end_quantum(elapsed, bytes);
    }

    /// Whether the opposite direction is currently starving; drainers use
    /// this as an early-relinquish signal.
    pub fn peer_starving(&self, direction: Direction, now: Instant) -> bool {
        let peer = direction.opposite();
        if !self.pending[peer.index()].load(Ordering::Relaxed) {
            return false;
        }
        let sched = self.lock_sched();
        sched.waiting_for(peer, now) >= Duration::from_millis(500)
    }

    fn counters(&self) -> crate::pipeline::scheduler::SchedulerCounters {
        self.lock_sched().counters()
    }

    fn lock_sched(&self) -> MutexGuard<'_, QuantumScheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State shared between the supervisor and both workers.
pub struct SharedState {
    /// Process-wide stop flag
    pub shutdown: AtomicBool,
    /// A network worker is running
    pub call_active: AtomicBool,
    /// Ask the current network worker to wind down
    pub call_stop: AtomicBool,
    /// Buffers are being flushed toward the serial side
    pub flushing: AtomicBool,
    /// Serial ingress toward the network
    pub pipe_s2n: BytePipe,
    /// Network ingress toward the serial line
    pub pipe_n2s: BytePipe,
    /// Modem responses awaiting the serial writer, never interleaved with
    /// N2S data mid-chunk
    pub serial_outbox: Mutex<VecDeque<u8>>,
    /// Bytes still staged in the serial worker's N2S double buffer
    pub n2s_buffered: AtomicU64,
    /// Published totals of the long-lived N2S double buffer
    pub n2s_buffer_counters: Mutex<BufferCounters>,
    /// Aggregated totals of the per-call S2N double buffers
    pub s2n_buffer_counters: Mutex<BufferCounters>,
    pub gate: SchedulerGate,
    pub counters: SharedCounters,
    /// Buffer sizing the workers build their double buffers from
    pub pipeline_cfg: crate::config::PipelineConfig,
}

impl SharedState {
    fn new_buffer(&self) -> DoubleBuffer {
        DoubleBuffer::new(
            self.pipeline_cfg.buffer_min,
            self.pipeline_cfg.buffer_max,
            self.pipeline_cfg.buffer_step,
        )
    }
}

impl SharedState {
    fn push_outbox(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut outbox = self.serial_outbox.lock().unwrap_or_else(|e| e.into_inner());
        outbox.extend(bytes);
    }

    fn outbox_empty(&self) -> bool {
        self.serial_outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Handle for requesting shutdown from outside the supervisor thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<SharedState>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }
}

/// The assembled bridge.
pub struct Bridge<S: SerialIo + 'static> {
    config: BridgeConfig,
    serial: Option<S>,
    modem: Arc<Mutex<ModemEngine>>,
    machine: StateMachine,
    shared: Arc<SharedState>,
    modem_events: EventReceiver,
    modem_event_tx: EventSender,
    call_log: CallLog,
    ring_times: VecDeque<Instant>,
    current_peer: Option<String>,
    network_worker: Option<JoinHandle<()>>,
    worker_tx: Sender<WorkerEvent>,
    worker_rx: Receiver<WorkerEvent>,
}

impl<S: SerialIo + 'static> Bridge<S> {
    pub fn new(config: BridgeConfig, serial: S) -> BridgeResult<Self> {
        let (event_tx, event_rx) = event_channel(EVENT_QUEUE_DEPTH);
        let modem = Arc::new(Mutex::new(ModemEngine::new(
            event_tx.clone(),
            config.modem.auto_answer,
        )));

        let shared = Arc::new(SharedState {
            shutdown: AtomicBool::new(false),
            call_active: AtomicBool::new(false),
            call_stop: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            pipe_s2n: BytePipe::new(config.pipeline.pipe_capacity)?,
            pipe_n2s: BytePipe::new(config.pipeline.pipe_capacity)?,
            serial_outbox: Mutex::new(VecDeque::new()),
            n2s_buffered: AtomicU64::new(0),
            n2s_buffer_counters: Mutex::new(BufferCounters::default()),
            s2n_buffer_counters: Mutex::new(BufferCounters::default()),
            gate: SchedulerGate::new(QuantumScheduler::new(&config.pipeline)),
            counters: SharedCounters::default(),
            pipeline_cfg: config.pipeline.clone(),
        });

        let (worker_tx, worker_rx) = channel();

        Ok(Self {
            config,
            serial: Some(serial),
            modem,
            machine: StateMachine::new(),
            shared,
            modem_events: event_rx,
            modem_event_tx: event_tx,
            call_log: CallLog::new(64),
            ring_times: VecDeque::new(),
            current_peer: None,
            network_worker: None,
            worker_tx,
            worker_rx,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the bridge to termination. Returns the terminal state.
    pub fn run(&mut self) -> BridgeResult<SupervisorState> {
        let now = Instant::now();
        self.machine.apply(SupervisorEvent::Init, now)?;

        // Serial worker owns the transport for the life of the bridge
        let serial = self
            .serial
            .take()
            .ok_or_else(|| BridgeError::InvalidArgument("bridge already ran".to_string()))?;
        let serial_handle = spawn_serial_worker(
            serial,
            Arc::clone(&self.modem),
            Arc::clone(&self.shared),
            self.modem_event_tx.clone(),
            self.worker_tx.clone(),
            self.config.modem.auto_answer == AutoAnswerMode::Hardware,
        );

        self.run_modem_init();
        {
            let mut modem = lock_modem(&self.modem);
            modem.initialize();
        }
        self.machine.apply(SupervisorEvent::InitOk, Instant::now())?;
        info!("bridge ready");

        // The supervisor tick loop
        while self.machine.state() != SupervisorState::Terminated {
            let now = Instant::now();
            self.drain_modem_events(now);
            self.drain_worker_events(now);
            self.check_state_deadlines(now);
            self.drive_lifecycle(now);
            thread::sleep(TICK);
        }

        // Reap workers; the state machine already accounted for stragglers
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.pipe_s2n.close();
        self.shared.pipe_n2s.close();
        if let Some(handle) = self.network_worker.take() {
            let _ = handle.join();
        }
        let _ = serial_handle.join();

        self.log_final_stats();
        Ok(self.machine.state())
    }

    /// Run the configured one-shot initialization commands through the
    /// engine. Their responses are internal and never reach the DTE.
    fn run_modem_init(&mut self) {
        let init = self.config.modem.init_string.clone();
        let mut modem = lock_modem(&self.modem);
        for cmd in init.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            debug!(command = cmd, "running init command");
            let mut line = cmd.as_bytes().to_vec();
            line.push(b'\r');
            let _ = modem.feed_serial(&line, Instant::now());
        }
    }

    fn drain_modem_events(&mut self, now: Instant) {
        for event in self.modem_events.drain() {
            debug!(?event, state = %self.machine.state(), "modem event");
            match event {
                ModemEvent::DialRequested(dial) => self.start_call(Some(dial), now),
                ModemEvent::AnswerRequested => self.start_call(None, now),
                ModemEvent::HangupRequested | ModemEvent::ResetRequested(_) => {
                    self.hangup(now);
                }
                ModemEvent::EscapedToCommand => {
                    // Call stays up; the serial worker stops draining N2S
                    // while the modem sits in command mode
                }
                ModemEvent::ReturnOnlineRequested => {
                    let bytes = lock_modem(&self.modem).resume_online();
                    self.shared.push_outbox(&bytes);
                }
                ModemEvent::RingObserved { count } => {
                    self.note_ring(count, now);
                }
                ModemEvent::HardwareConnect(speed) => {
                    info!(?speed, "hardware modem reports connect");
                    if self.machine.state() == SupervisorState::Ready {
                        self.start_call(None, now);
                    }
                }
                ModemEvent::HardwareCarrierLost => {
                    self.carrier_lost("carrier lost", now);
                }
            }
        }
    }

    fn drain_worker_events(&mut self, now: Instant) {
        while let Ok(event) = self.worker_rx.try_recv() {
            debug!(?event, state = %self.machine.state(), "worker event");
            match event {
                WorkerEvent::TcpUp(peer) => {
                    if self.machine.state() == SupervisorState::Connecting {
                        self.current_peer = Some(peer.to_string());
                        let _ = self.apply(SupervisorEvent::TcpUp, now);
                    }
                }
                WorkerEvent::ConnectFailed(code, reason) => {
                    warn!(reason = %reason, "connect failed");
                    if self.machine.state() == SupervisorState::Connecting {
                        let _ = self.apply(SupervisorEvent::Disconnect, now);
                    }
                    let bytes = lock_modem(&self.modem).on_connect_failed(code);
                    self.shared.push_outbox(&bytes);
                    self.reap_network_worker();
                }
                WorkerEvent::NegotiationSettled => {
                    if self.machine.state() == SupervisorState::Negotiating {
                        let _ = self.apply(SupervisorEvent::NegotiationComplete, now);
                        let speed = Some(self.config.serial.baud);
                        let bytes = lock_modem(&self.modem).on_connect_established(speed);
                        self.shared.push_outbox(&bytes);
                        self.shared
                            .counters
                            .add(&self.shared.counters.connects, 1);
                        if let Some(peer) = &self.current_peer {
                            self.call_log.record(peer, CallEvent::Connected, None);
                        }
                    }
                }
                WorkerEvent::PeerClosed(reason) => {
                    self.carrier_lost(&reason, now);
                }
                WorkerEvent::SerialFatal(reason) => {
                    error!(reason = %reason, "serial worker died");
                    let _ = self.apply(SupervisorEvent::Fatal(reason), now);
                    self.stop_call();
                }
            }
        }
    }

    fn check_state_deadlines(&mut self, now: Instant) {
        match self.machine.check_timeout(now) {
            Some(TimeoutDisposition::ToError(reason)) => {
                warn!(reason = %reason, "state deadline expired");
                if self.machine.state() == SupervisorState::Connecting {
                    let bytes =
                        lock_modem(&self.modem).on_connect_failed(ResultCode::NoAnswer);
                    self.shared.push_outbox(&bytes);
                }
                self.stop_call();
                let _ = self.apply(SupervisorEvent::Fatal(reason), now);
            }
            Some(TimeoutDisposition::ToTerminated) => {
                self.machine.force_terminate();
            }
            None => {}
        }
    }

    /// Per-tick lifecycle chores that are not event-driven.
    fn drive_lifecycle(&mut self, now: Instant) {
        // External shutdown request
        if self.shared.shutting_down()
            && !matches!(
                self.machine.state(),
                SupervisorState::ShuttingDown | SupervisorState::Terminated
            )
        {
            info!("shutdown requested");
            self.stop_call();
            let _ = self.apply(SupervisorEvent::Shutdown, now);
        }

        match self.machine.state() {
            SupervisorState::Flushing => {
                self.shared.flushing.store(true, Ordering::Relaxed);
                if self.flush_complete() {
                    self.shared.flushing.store(false, Ordering::Relaxed);
                    self.discard_stale_pipes();
                    self.reap_network_worker();
                    let _ = self.apply(SupervisorEvent::Drained, now);
                }
            }
            SupervisorState::ShuttingDown => {
                // Stop the workers and wake anything blocked on a pipe;
                // whatever they could not deliver is abandoned with them
                self.shared.shutdown.store(true, Ordering::Relaxed);
                self.shared.pipe_s2n.close();
                self.shared.pipe_n2s.close();
                if !self.shared.call_active.load(Ordering::Relaxed) {
                    let _ = self.apply(SupervisorEvent::Drained, now);
                }
            }
            SupervisorState::Error => {
                if self.config.network.reconnect && self.machine.recovery_due(now) {
                    info!("attempting recovery from error state");
                    self.discard_stale_pipes();
                    let _ = self.apply(SupervisorEvent::Reset, now);
                }
            }
            _ => {}
        }
    }

    /// Start an outbound call (dial or software/hardware answer).
    fn start_call(&mut self, dial: Option<String>, now: Instant) {
        if self.machine.state() != SupervisorState::Ready {
            warn!(state = %self.machine.state(), "call request while busy");
            let bytes = lock_modem(&self.modem).on_connect_failed(ResultCode::Error);
            self.shared.push_outbox(&bytes);
            return;
        }
        if self.apply(SupervisorEvent::ConnectRequest, now).is_err() {
            return;
        }

        if let Some(dial) = dial {
            debug!(dial = %dial, "dial string recorded");
        }

        self.shared.call_stop.store(false, Ordering::Relaxed);
        self.shared.call_active.store(true, Ordering::Relaxed);

        let host = self.config.network.host.clone();
        let port = self.config.network.port;
        let connect_timeout = self.config.network.connect_timeout;
        let terminal_type = self.config.modem.terminal_type.clone();
        let shared = Arc::clone(&self.shared);
        let tx = self.worker_tx.clone();

        self.network_worker = Some(
            thread::Builder::new()
                .name("network-worker".to_string())
                .spawn(move || {
                    network_call(host, port, connect_timeout, terminal_type, shared, tx);
                })
                .unwrap_or_else(|e| {
                    // Spawn failure is as fatal as it gets; park a dummy
                    // handle and let the connect timeout surface it
                    error!("failed to spawn network worker: {}", e);
                    thread::spawn(|| {})
                }),
        );
    }

    /// ATH / ATZ / DTR-drop teardown of an active call.
    fn hangup(&mut self, now: Instant) {
        match self.machine.state() {
            SupervisorState::DataTransfer | SupervisorState::Negotiating => {
                self.stop_call();
                let _ = self.apply(SupervisorEvent::Disconnect, now);
                lock_modem(&self.modem).on_hangup_complete();
                self.shared
                    .counters
                    .add(&self.shared.counters.disconnects, 1);
                if let Some(peer) = self.current_peer.take() {
                    self.call_log
                        .record(&peer, CallEvent::Disconnected, Some("hangup".to_string()));
                }
            }
            SupervisorState::Connecting => {
                self.stop_call();
                let _ = self.apply(SupervisorEvent::Disconnect, now);
                lock_modem(&self.modem).on_hangup_complete();
            }
            _ => {
                lock_modem(&self.modem).on_hangup_complete();
            }
        }
    }

    /// Carrier loss from any source: peer close, reset, DCD fall.
    fn carrier_lost(&mut self, reason: &str, now: Instant) {
        match self.machine.state() {
            SupervisorState::DataTransfer | SupervisorState::Negotiating => {
                info!(reason = %reason, "call dropped");
                self.stop_call();
                let _ = self.apply(SupervisorEvent::Disconnect, now);
                let bytes = lock_modem(&self.modem).on_carrier_lost();
                self.shared.push_outbox(&bytes);
                self.shared
                    .counters
                    .add(&self.shared.counters.disconnects, 1);
                if let Some(peer) = self.current_peer.take() {
                    self.call_log
                        .record(&peer, CallEvent::Disconnected, Some(reason.to_string()));
                }
            }
            SupervisorState::Connecting => {
                let _ = self.apply(SupervisorEvent::Disconnect, now);
                let bytes = lock_modem(&self.modem).on_connect_failed(ResultCode::NoCarrier);
                self.shared.push_outbox(&bytes);
            }
            _ => {}
        }
    }

    /// Software-mediated auto-answer: two rings inside the window.
    fn note_ring(&mut self, count: u8, now: Instant) {
        debug!(count, "ring observed");
        if self.config.modem.auto_answer != AutoAnswerMode::Software {
            return;
        }
        self.ring_times.push_back(now);
        while let Some(&front) = self.ring_times.front() {
            if now.duration_since(front) > ANSWER_WINDOW {
                self.ring_times.pop_front();
            } else {
                break;
            }
        }
        if self.ring_times.len() >= ANSWER_RINGS && self.machine.state() == SupervisorState::Ready
        {
            info!("software auto-answer");
            self.ring_times.clear();
            self.start_call(None, now);
        }
    }

    fn stop_call(&mut self) {
        self.shared.call_stop.store(true, Ordering::Relaxed);
    }

    fn reap_network_worker(&mut self) {
        if !self.shared.call_active.load(Ordering::Relaxed) {
            if let Some(handle) = self.network_worker.take() {
                let _ = handle.join();
            }
        }
    }

    /// Everything deliverable has been delivered.
    fn flush_complete(&self) -> bool {
        !self.shared.call_active.load(Ordering::Relaxed)
            && self.shared.pipe_n2s.is_empty()
            && self.shared.n2s_buffered.load(Ordering::Relaxed) == 0
            && self.shared.outbox_empty()
    }

    /// Throw away anything staged toward a connection that no longer
    /// exists, so the next call starts clean.
    fn discard_stale_pipes(&self) {
        let mut sink = [0u8; 256];
        while let Ok(n) = self.shared.pipe_s2n.read(&mut sink) {
            if n == 0 {
                break;
            }
        }
    }

    fn apply(&mut self, event: SupervisorEvent, now: Instant) -> BridgeResult<SupervisorState> {
        self.machine.apply(event, now)
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.machine.error_reason()
    }

    fn log_final_stats(&mut self) {
        let modem_counters = lock_modem(&self.modem).counters();
        let s2n_buffer = *self
            .shared
            .s2n_buffer_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let n2s_buffer = *self
            .shared
            .n2s_buffer_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let snapshot = StatsSnapshot::collect(
            &self.shared.counters,
            s2n_buffer,
            n2s_buffer,
            modem_counters,
            self.shared.gate.counters(),
            self.machine.transitions(),
            self.call_log.entries().cloned().collect(),
        );
        info!(stats = %snapshot.to_json(), "final statistics");
    }
}

fn lock_modem(modem: &Mutex<ModemEngine>) -> MutexGuard<'_, ModemEngine> {
    modem.lock().unwrap_or_else(|e| e.into_inner())
}

fn spawn_serial_worker<S: SerialIo + 'static>(
    serial: S,
    modem: Arc<Mutex<ModemEngine>>,
    shared: Arc<SharedState>,
    modem_events: EventSender,
    worker_tx: Sender<WorkerEvent>,
    hardware_mode: bool,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("serial-worker".to_string())
        .spawn(move || {
            serial_worker(serial, modem, shared, modem_events, worker_tx, hardware_mode)
        })
        .expect("serial worker spawn")
}

/// Ceiling on the hardware-message scratch before it is force-drained.
const HW_LINE_SCRATCH_MAX: usize = 4096;

/// The serial worker: DTE ingress, echo/response egress, N2S drain.
///
/// In `hardware_mode` the serial peer is a real modem, not a DTE: while no
/// call is up, its CR/LF-framed chatter (RING, CONNECT, NO CARRIER,
/// command responses) is classified out-of-band instead of being parsed as
/// AT input.
fn serial_worker<S: SerialIo>(
    mut serial: S,
    modem: Arc<Mutex<ModemEngine>>,
    shared: Arc<SharedState>,
    modem_events: EventSender,
    worker_tx: Sender<WorkerEvent>,
    hardware_mode: bool,
) {
    let mut chain = SerialIngressChain::new(Arc::clone(&modem));
    let mut n2s = Pipeline::new(Direction::NetToSerial, shared.new_buffer());
    // Bytes accepted from the chain but not yet fitted into the S2N pipe
    let mut carry: Vec<u8> = Vec::new();
    // Partial hardware-modem lines awaiting their terminator
    let mut hw_scratch: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; 512];
    let mut signal_divider = 0u32;
    let mut prev_dcd: Option<bool> = None;
    let mut prev_dsr: Option<bool> = None;
    // ANSI sequences already reported to the shared counters
    let mut ansi_reported = 0u64;

    while !shared.shutting_down() {
        let now = Instant::now();
        let mut moved = false;

        // 1. Serial ingress: Hayes chain for a DTE, line classification
        // for fronted modem hardware in command mode
        match serial.read(&mut read_buf) {
            Ok(0) => {}
            Ok(n) => {
                moved = true;
                let online = {
                    let m = lock_modem(&modem);
                    m.state() == ModemState::Online
                };
                if hardware_mode && !online {
                    hw_scratch.extend_from_slice(&read_buf[..n]);
                    {
                        let mut m = lock_modem(&modem);
                        while let Some(record) = crate::serial::extract_record(&mut hw_scratch) {
                            if m.feed_modem_line(&record).is_none() {
                                // Response chatter from the device (OK,
                                // ERROR, echo); nothing for us in it
                                debug!("ignoring modem line");
                            }
                        }
                    }
                    if hw_scratch.len() > HW_LINE_SCRATCH_MAX {
                        hw_scratch.clear();
                    }
                } else {
                    let out = chain.process(&read_buf[..n], now);
                    if !out.to_serial.is_empty() && serial.write_all(&out.to_serial).is_err() {
                        let _ = worker_tx.send(WorkerEvent::SerialFatal(
                            "echo write failed".to_string(),
                        ));
                        return;
                    }
                    carry.extend(out.to_net);
                }
            }
            Err(e) => {
                let _ = worker_tx.send(WorkerEvent::SerialFatal(e.to_string()));
                return;
            }
        }

        // 2. Escape-detector guard windows
        let polled = chain.poll(now);
        if !polled.to_serial.is_empty() {
            let _ = serial.write_all(&polled.to_serial);
        }
        carry.extend(polled.to_net);

        // 3. Push filtered ingress into the S2N pipe (bounded wait)
        if !carry.is_empty() {
            match shared.pipe_s2n.write_timed(&carry, now + PIPE_SLICE) {
                Ok(written) if written > 0 => {
                    carry.drain(..written);
                    moved = true;
                }
                Ok(_) => {}
                Err(_) => carry.clear(), // pipe closed: shutdown in progress
            }
        }

        // 4. Modem responses first, so they never split a data chunk
        {
            let pending: Vec<u8> = {
                let mut outbox = shared
                    .serial_outbox
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                outbox.drain(..).collect()
            };
            if !pending.is_empty() {
                moved = true;
                if serial.write_all(&pending).is_err() {
                    let _ = worker_tx.send(WorkerEvent::SerialFatal(
                        "response write failed".to_string(),
                    ));
                    return;
                }
            }
        }

        // 5. Drain N2S toward the DTE under a scheduler grant. Data only
        // flows while the modem is online (or the supervisor is flushing
        // a dead call); in command mode it stays buffered.
        let deliverable = {
            let m = lock_modem(&modem);
            m.state() == ModemState::Online
        } || shared.flushing.load(Ordering::Relaxed);

        let has_work = !shared.pipe_n2s.is_empty() || !n2s.buffer.is_empty();
        shared
            .gate
            .set_pending(Direction::NetToSerial, has_work && deliverable, now);

        if has_work && deliverable {
            if let Some(grant) = shared.gate.try_acquire(Direction::NetToSerial, now) {
                moved = true;
                drain_n2s(&mut serial, &shared, &mut n2s, &grant, &worker_tx);
            }
        }
        shared
            .n2s_buffered
            .store(n2s.buffer.buffered() as u64, Ordering::Relaxed);
        *shared
            .n2s_buffer_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = n2s.buffer.counters();

        // Report newly-stripped ANSI sequences as a delta
        let ansi_total = chain.ansi_dropped();
        if ansi_total > ansi_reported {
            shared
                .counters
                .add(&shared.counters.ansi_dropped, ansi_total - ansi_reported);
            ansi_reported = ansi_total;
        }

        // 6. Modem-control edges, polled at a gentler cadence
        signal_divider += 1;
        if signal_divider >= 10 {
            signal_divider = 0;
            if let Ok(dcd) = serial.get_dcd() {
                if prev_dcd == Some(true) && !dcd {
                    // A DCD drop is only a carrier event under &C1;
                    // &C0 treats the line as always asserted
                    if !lock_modem(&modem).carrier_present(false) {
                        modem_events.send(ModemEvent::HardwareCarrierLost);
                    }
                }
                prev_dcd = Some(dcd);
            }
            if let Ok(dsr) = serial.get_dsr() {
                if prev_dsr == Some(true) && !dsr {
                    let bytes = lock_modem(&modem).on_dtr_change(false);
                    if !bytes.is_empty() {
                        let _ = serial.write_all(&bytes);
                    }
                }
                prev_dsr = Some(dsr);
            }
        }

        if !moved {
            thread::sleep(WORKER_NAP);
        }
    }
    debug!("serial worker exiting");
}

/// One granted N2S quantum: pipe -> double buffer -> serial line.
fn drain_n2s<S: SerialIo>(
    serial: &mut S,
    shared: &SharedState,
    n2s: &mut Pipeline,
    grant: &Grant,
    worker_tx: &Sender<WorkerEvent>,
) {
    let start = Instant::now();
    n2s.begin_quantum(start);
    let mut chunk = [0u8; 512];

    loop {
        let now = Instant::now();
        if shared.shutting_down()
            || n2s.quantum_exhausted(grant, now)
            || shared.gate.peer_starving(Direction::NetToSerial, now)
        {
            break;
        }

        // Refill the buffer only with what it will certainly accept
        let room = n2s.buffer.writable().min(chunk.len());
        if room > 0 {
            if let Ok(n) = shared.pipe_n2s.read(&mut chunk[..room]) {
                if n > 0 {
                    n2s.buffer.write(&chunk[..n]);
                }
            }
        }

        let n = n2s.buffer.read(&mut chunk);
        if n == 0 {
            break;
        }
        if serial.write_all(&chunk[..n]).is_err() {
            let _ = worker_tx.send(WorkerEvent::SerialFatal(
                "data write failed".to_string(),
            ));
            n2s.set_error();
            break;
        }
        n2s.note_bytes(n);
        shared
            .counters
            .add(&shared.counters.n2s_bytes, n as u64);
        shared
            .gate
            .report_progress(Direction::NetToSerial, n, Instant::now());
    }

    let (elapsed, bytes) = n2s.end_quantum(Instant::now());
    shared.gate.end_quantum(elapsed, bytes);
}

/// The per-call network worker: dial, negotiate, move bytes, report.
fn network_call(
    host: String,
    port: u16,
    connect_timeout: Duration,
    terminal_type: String,
    shared: Arc<SharedState>,
    tx: Sender<WorkerEvent>,
) {
    let result = NetworkEndpoint::connect(&host, port, connect_timeout);
    let mut endpoint = match result {
        Ok(endpoint) => endpoint,
        Err(e) => {
            let code = match &e {
                BridgeError::Timeout(_) => ResultCode::NoAnswer,
                BridgeError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                    ResultCode::Busy
                }
                _ => ResultCode::NoCarrier,
            };
            let _ = tx.send(WorkerEvent::ConnectFailed(code, e.to_string()));
            shared.call_active.store(false, Ordering::Relaxed);
            return;
        }
    };
    let _ = tx.send(WorkerEvent::TcpUp(endpoint.peer_addr()));

    let mut telnet = TelnetEngine::new(Some(&terminal_type), WindowSize::default());
    if endpoint.write_all(&telnet.open()).is_err() {
        let _ = tx.send(WorkerEvent::PeerClosed("write failed".to_string()));
        shared.call_active.store(false, Ordering::Relaxed);
        return;
    }

    let mut n2s_chain = NetworkIngressChain::new();
    let mut s2n = Pipeline::new(Direction::SerialToNet, shared.new_buffer());
    let mut read_buf = [0u8; 2048];
    let mut carry: Vec<u8> = Vec::new();
    let mut last_negotiation = Instant::now();
    let mut settled_sent = false;

    let close_reason: Option<String> = loop {
        if shared.shutting_down() || shared.call_stop.load(Ordering::Relaxed) {
            break None;
        }
        let now = Instant::now();
        let mut moved = false;

        // 1. Socket ingress through the telnet engine
        match endpoint.read(&mut read_buf) {
            Ok(0) => {}
            Ok(n) => {
                moved = true;
                let out = telnet.receive(&read_buf[..n]);
                if out.violations > 0 {
                    shared.counters.add(
                        &shared.counters.telnet_violations,
                        u64::from(out.violations),
                    );
                }
                if out.negotiated {
                    last_negotiation = now;
                }
                if !out.replies.is_empty() && endpoint.write_all(&out.replies).is_err() {
                    break Some("reply write failed".to_string());
                }
                carry.extend(n2s_chain.process(&out.data));
            }
            Err(BridgeError::Closed) => break Some("peer closed".to_string()),
            Err(e) => break Some(e.to_string()),
        }

        // 2. Settle detection for the NEGOTIATING phase
        if !settled_sent
            && (telnet.negotiation_settled()
                || now.duration_since(last_negotiation) >= NEGOTIATION_QUIET)
        {
            settled_sent = true;
            let _ = tx.send(WorkerEvent::NegotiationSettled);
        }

        // 3. Hand parsed data to the serial side (bounded wait)
        if !carry.is_empty() {
            match shared.pipe_n2s.write_timed(&carry, now + PIPE_SLICE) {
                Ok(written) if written > 0 => {
                    carry.drain(..written);
                    moved = true;
                }
                Ok(_) => {}
                Err(_) => break None, // pipe closed under us
            }
        }

        // 4. Drain S2N into the socket under a scheduler grant
        let has_work = !shared.pipe_s2n.is_empty() || !s2n.buffer.is_empty();
        shared.gate.set_pending(Direction::SerialToNet, has_work, now);
        if has_work {
            if let Some(grant) = shared.gate.try_acquire(Direction::SerialToNet, now) {
                moved = true;
                if let Err(reason) = drain_s2n(&mut endpoint, &shared, &mut s2n, &grant) {
                    break Some(reason);
                }
            }
        }

        if !moved {
            thread::sleep(Duration::from_millis(2));
        }
    };

    shared.gate.set_pending(Direction::SerialToNet, false, Instant::now());
    endpoint.close();
    // This call's buffer dies with the worker; fold its totals into the
    // lifetime figures first
    shared
        .s2n_buffer_counters
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .merge(s2n.buffer.counters());
    shared.call_active.store(false, Ordering::Relaxed);
    if let Some(reason) = close_reason {
        let _ = tx.send(WorkerEvent::PeerClosed(reason));
    }
    debug!("network worker exiting");
}

/// One granted S2N quantum: pipe -> double buffer -> socket.
fn drain_s2n(
    endpoint: &mut NetworkEndpoint,
    shared: &SharedState,
    s2n: &mut Pipeline,
    grant: &Grant,
) -> Result<(), String> {
    let start = Instant::now();
    s2n.begin_quantum(start);
    let mut chunk = [0u8; 512];

    loop {
        let now = Instant::now();
        if shared.shutting_down()
            || s2n.quantum_exhausted(grant, now)
            || shared.gate.peer_starving(Direction::SerialToNet, now)
        {
            break;
        }

        let room = s2n.buffer.writable().min(chunk.len());
        if room > 0 {
            if let Ok(n) = shared.pipe_s2n.read(&mut chunk[..room]) {
                if n > 0 {
                    s2n.buffer.write(&chunk[..n]);
                }
            }
        }

        let n = s2n.buffer.read(&mut chunk);
        if n == 0 {
            break;
        }
        if endpoint.write_all(&chunk[..n]).is_err() {
            s2n.set_error();
            let (elapsed, bytes) = s2n.end_quantum(Instant::now());
            shared.gate.end_quantum(elapsed, bytes);
            return Err("socket write failed".to_string());
        }
        s2n.note_bytes(n);
        shared
            .counters
            .add(&shared.counters.s2n_bytes, n as u64);
        shared
            .gate
            .report_progress(Direction::SerialToNet, n, Instant::now());
    }

    let (elapsed, bytes) = s2n.end_quantum(Instant::now());
    shared.gate.end_quantum(elapsed, bytes);
    Ok(())
}
