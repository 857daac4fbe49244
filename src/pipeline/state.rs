//! The supervising connection state machine.
//!
//! Ten states, and every change is validated against the static transition
//! table - a disallowed edge is a programming bug and surfaces as
//! `BridgeError::InvalidState` rather than silently bending the lifecycle.
//! Four states carry deadlines; an expired deadline routes to ERROR, except
//! in SHUTTING_DOWN where the only sane place left to go is TERMINATED.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::errors::{BridgeError, BridgeResult};

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Uninitialized,
    Initializing,
    Ready,
    Connecting,
    Negotiating,
    DataTransfer,
    Flushing,
    ShuttingDown,
    Terminated,
    Error,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SupervisorState::Uninitialized => "UNINITIALIZED",
            SupervisorState::Initializing => "INITIALIZING",
            SupervisorState::Ready => "READY",
            SupervisorState::Connecting => "CONNECTING",
            SupervisorState::Negotiating => "NEGOTIATING",
            SupervisorState::DataTransfer => "DATA_TRANSFER",
            SupervisorState::Flushing => "FLUSHING",
            SupervisorState::ShuttingDown => "SHUTTING_DOWN",
            SupervisorState::Terminated => "TERMINATED",
            SupervisorState::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Events that drive transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Begin initialization
    Init,
    /// Initialization finished
    InitOk,
    /// A dial or answer wants a connection
    ConnectRequest,
    /// TCP established
    TcpUp,
    /// Telnet option exchange settled (or went quiet)
    NegotiationComplete,
    /// Call ended: peer closed, DCD fell, or ATH
    Disconnect,
    /// Buffers drained after a disconnect or during shutdown
    Drained,
    /// Orderly shutdown requested
    Shutdown,
    /// Unrecoverable fault
    Fatal(String),
    /// Recovery attempt out of ERROR
    Reset,
}

impl SupervisorEvent {
    fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::Init => "init",
            SupervisorEvent::InitOk => "init_ok",
            SupervisorEvent::ConnectRequest => "connect_request",
            SupervisorEvent::TcpUp => "tcp_up",
            SupervisorEvent::NegotiationComplete => "neg_complete",
            SupervisorEvent::Disconnect => "disconnect",
            SupervisorEvent::Drained => "drained",
            SupervisorEvent::Shutdown => "shutdown",
            SupervisorEvent::Fatal(_) => "fatal",
            SupervisorEvent::Reset => "reset",
        }
    }
}

/// Where an expired state deadline leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutDisposition {
    /// The state gave up; record why and go to ERROR
    ToError(String),
    /// SHUTTING_DOWN overran: abandon the workers and terminate
    ToTerminated,
}

/// The static transition table. `None` means the edge does not exist.
fn next_state(from: SupervisorState, event: &SupervisorEvent) -> Option<SupervisorState> {
    use SupervisorEvent as E;
    use SupervisorState as S;

    // Global edges available from every live state
    match event {
        E::Shutdown if !matches!(from, S::Terminated | S::ShuttingDown) => {
            return Some(S::ShuttingDown);
        }
        E::Fatal(_) if !matches!(from, S::Terminated) => {
            return Some(S::Error);
        }
        _ => {}
    }

    match (from, event) {
        (S::Uninitialized, E::Init) => Some(S::Initializing),
        (S::Initializing, E::InitOk) => Some(S::Ready),
        (S::Ready, E::ConnectRequest) => Some(S::Connecting),
        (S::Connecting, E::TcpUp) => Some(S::Negotiating),
        // A failed dial has nothing to flush
        (S::Connecting, E::Disconnect) => Some(S::Ready),
        (S::Negotiating, E::NegotiationComplete) => Some(S::DataTransfer),
        (S::Negotiating, E::Disconnect) => Some(S::Flushing),
        (S::DataTransfer, E::Disconnect) => Some(S::Flushing),
        (S::Flushing, E::Drained) => Some(S::Ready),
        (S::ShuttingDown, E::Drained) => Some(S::Terminated),
        (S::Error, E::Reset) => Some(S::Ready),
        _ => None,
    }
}

/// Deadline budget for states that carry one.
fn state_timeout(state: SupervisorState) -> Option<Duration> {
    match state {
        SupervisorState::Connecting => Some(Duration::from_secs(30)),
        SupervisorState::Negotiating => Some(Duration::from_secs(15)),
        SupervisorState::Flushing => Some(Duration::from_secs(10)),
        SupervisorState::ShuttingDown => Some(Duration::from_secs(10)),
        _ => None,
    }
}

/// Recovery backoff cap after repeated errors.
const MAX_BACKOFF: Duration = Duration::from_secs(32);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// The validated state machine with deadlines and recovery backoff.
#[derive(Debug)]
pub struct StateMachine {
    state: SupervisorState,
    deadline: Option<Instant>,
    error_reason: Option<String>,
    backoff: Duration,
    /// When the next ERROR -> READY attempt may run
    retry_at: Option<Instant>,
    transitions: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Uninitialized,
            deadline: None,
            error_reason: None,
            backoff: INITIAL_BACKOFF,
            retry_at: None,
            transitions: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Apply an event, or fail with `InvalidState` if the table has no
    /// such edge.
    pub fn apply(&mut self, event: SupervisorEvent, now: Instant) -> BridgeResult<SupervisorState> {
        let Some(next) = next_state(self.state, &event) else {
            warn!(state = %self.state, event = event.name(), "invalid transition");
            return Err(BridgeError::InvalidState {
                from: self.state.to_string(),
                event: event.name().to_string(),
            });
        };

        info!(from = %self.state, to = %next, event = event.name(), "state transition");

        if let SupervisorEvent::Fatal(reason) = &event {
            self.error_reason = Some(reason.clone());
            // Each trip through ERROR doubles the recovery delay
            self.retry_at = Some(now + self.backoff);
            self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        }
        if next == SupervisorState::DataTransfer {
            // A working call proves recovery; reset the backoff ladder
            self.backoff = INITIAL_BACKOFF;
        }
        if event == SupervisorEvent::Reset {
            self.error_reason = None;
            self.retry_at = None;
        }

        self.state = next;
        self.deadline = state_timeout(next).map(|t| now + t);
        self.transitions += 1;
        Ok(next)
    }

    /// Whether the current state's deadline has expired, and where that
    /// leads. Does not mutate; the caller applies the resulting event.
    pub fn check_timeout(&self, now: Instant) -> Option<TimeoutDisposition> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        Some(match self.state {
            SupervisorState::ShuttingDown => TimeoutDisposition::ToTerminated,
            state => TimeoutDisposition::ToError(format!("{} timed out", state)),
        })
    }

    /// Force TERMINATED when SHUTTING_DOWN overran its budget and the
    /// workers are being abandoned.
    pub fn force_terminate(&mut self) {
        warn!("shutdown overran, abandoning workers");
        self.state = SupervisorState::Terminated;
        self.deadline = None;
        self.transitions += 1;
    }

    /// Whether an ERROR -> READY recovery attempt is due.
    pub fn recovery_due(&self, now: Instant) -> bool {
        self.state == SupervisorState::Error
            && self.retry_at.is_some_and(|t| now >= t)
    }

    /// Time until the current state's deadline, if any.
    pub fn time_left(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}
