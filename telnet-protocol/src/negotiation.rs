//! # Telnet Option Negotiation
//!
//! This module implements WILL/WONT/DO/DONT option negotiation for the
//! bridge's option subset, on top of **RFC 854**'s negotiation rules.
//!
//! ## Key Concepts:
//!
//! ### Two independent directions
//! Every option can be enabled separately on each side of the connection:
//! - `local_enabled[opt]` - *we* are doing the option (negotiated with
//!   WILL from us / DO from the peer)
//! - `remote_enabled[opt]` - the *peer* is doing the option (negotiated
//!   with WILL from the peer / DO from us)
//!
//! ### Loop prevention
//! RFC 854's naive rules allow two implementations to volley WILL/DO at
//! each other forever. The rule applied here: **only respond when the
//! requested state differs from the recorded state**. A re-request that
//! changes nothing is silently acknowledged. Requests we originated are
//! tracked as pending so the peer's answer doesn't trigger a second
//! round-trip.
//!
//! ### Supported subset
//! BINARY, ECHO, SUPPRESS-GO-AHEAD, TERMINAL-TYPE, NAWS and LINEMODE.
//! ECHO is asymmetric: we accept the peer echoing (WILL ECHO) but refuse
//! to echo ourselves (DO ECHO gets WONT). Every other option code is
//! refused: the peer's WILL gets DONT, the peer's DO gets WONT.

use crate::protocol::{TelnetCommand, TelnetSequence, option};

/// Options we are willing to enable on our own side (answering WILL to DO)
const SUPPORTED_LOCAL: &[u8] = &[
    option::BINARY,
    option::SUPPRESS_GO_AHEAD,
    option::TERMINAL_TYPE,
    option::NAWS,
    option::LINEMODE,
];

/// Options we are willing to let the peer enable (answering DO to WILL)
const SUPPORTED_REMOTE: &[u8] = &[
    option::BINARY,
    option::ECHO,
    option::SUPPRESS_GO_AHEAD,
    option::TERMINAL_TYPE,
    option::LINEMODE,
];

/// What happened as a result of processing one negotiation command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResult {
    /// Sequence to send back to the peer, if any
    pub response: Option<TelnetSequence>,
    /// An option changed state (either direction, either polarity)
    pub changed: bool,
    /// The option just became enabled on our side; the caller may need to
    /// follow up (e.g. send a NAWS report after DO NAWS)
    pub local_activated: Option<u8>,
}

impl NegotiationResult {
    fn silent() -> Self {
        Self {
            response: None,
            changed: false,
            local_activated: None,
        }
    }
}

/// Per-connection option negotiation state
///
/// Tracks both directions for all 256 option codes plus the set of
/// requests we originated and are still waiting on.
#[derive(Debug, Clone)]
pub struct OptionNegotiator {
    /// "We are doing opt" - indexed by option code
    local_enabled: [bool; 256],
    /// "Peer is doing opt" - indexed by option code
    remote_enabled: [bool; 256],
    /// Outstanding WILL we sent, awaiting DO/DONT
    pending_local: [bool; 256],
    /// Outstanding DO we sent, awaiting WILL/WONT
    pending_remote: [bool; 256],
}

impl Default for OptionNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionNegotiator {
    /// Create a new negotiator with all options disabled
    pub fn new() -> Self {
        Self {
            local_enabled: [false; 256],
            remote_enabled: [false; 256],
            pending_local: [false; 256],
            pending_remote: [false; 256],
        }
    }

    /// Check if we have an option enabled on our side
    pub fn local_enabled(&self, opt: u8) -> bool {
        self.local_enabled[opt as usize]
    }

    /// Check if the peer has an option enabled
    pub fn remote_enabled(&self, opt: u8) -> bool {
        self.remote_enabled[opt as usize]
    }

    /// True when Go Ahead is suppressed in either direction
    pub fn suppress_go_ahead(&self) -> bool {
        self.local_enabled(option::SUPPRESS_GO_AHEAD) || self.remote_enabled(option::SUPPRESS_GO_AHEAD)
    }

    /// True once every request we originated has been answered
    ///
    /// The supervisor uses this to decide when the NEGOTIATING phase is done.
    pub fn is_settled(&self) -> bool {
        !self.pending_local.iter().any(|&p| p) && !self.pending_remote.iter().any(|&p| p)
    }

    /// The proactive option requests sent right after the TCP connect:
    /// WILL SGA, DO SGA, DO ECHO, WILL TERMINAL-TYPE.
    ///
    /// Marks each request pending so the peer's answers settle silently.
    pub fn initial_requests(&mut self) -> Vec<TelnetSequence> {
        vec![
            self.request_local(option::SUPPRESS_GO_AHEAD),
            self.request_remote(option::SUPPRESS_GO_AHEAD),
            self.request_remote(option::ECHO),
            self.request_local(option::TERMINAL_TYPE),
        ]
    }

    /// Originate a WILL for an option on our side
    fn request_local(&mut self, opt: u8) -> TelnetSequence {
        self.pending_local[opt as usize] = true;
        TelnetSequence::Negotiation {
            command: TelnetCommand::WILL,
            option: opt,
        }
    }

    /// Originate a DO for an option on the peer's side
    fn request_remote(&mut self, opt: u8) -> TelnetSequence {
        self.pending_remote[opt as usize] = true;
        TelnetSequence::Negotiation {
            command: TelnetCommand::DO,
            option: opt,
        }
    }

    /// Process one incoming WILL/WONT/DO/DONT
    pub fn receive(&mut self, command: TelnetCommand, opt: u8) -> NegotiationResult {
        match command {
            TelnetCommand::WILL => self.receive_will(opt),
            TelnetCommand::WONT => self.receive_wont(opt),
            TelnetCommand::DO => self.receive_do(opt),
            TelnetCommand::DONT => self.receive_dont(opt),
            _ => NegotiationResult::silent(),
        }
    }

    /// Peer announces it will do `opt`
    fn receive_will(&mut self, opt: u8) -> NegotiationResult {
        let i = opt as usize;

        if self.pending_remote[i] {
            // Answer to our DO - record and stay quiet
            self.pending_remote[i] = false;
            let changed = !self.remote_enabled[i];
            self.remote_enabled[i] = true;
            return NegotiationResult {
                response: None,
                changed,
                local_activated: None,
            };
        }

        if self.remote_enabled[i] {
            // Re-request with no state change: silently acknowledged
            return NegotiationResult::silent();
        }

        if SUPPORTED_REMOTE.contains(&opt) {
            self.remote_enabled[i] = true;
            NegotiationResult {
                response: Some(TelnetSequence::Negotiation {
                    command: TelnetCommand::DO,
                    option: opt,
                }),
                changed: true,
                local_activated: None,
            }
        } else {
            NegotiationResult {
                response: Some(TelnetSequence::Negotiation {
                    command: TelnetCommand::DONT,
                    option: opt,
                }),
                changed: false,
                local_activated: None,
            }
        }
    }

    /// Peer announces it won't do `opt`
    fn receive_wont(&mut self, opt: u8) -> NegotiationResult {
        let i = opt as usize;

        if self.pending_remote[i] {
            // Peer refused our DO
            self.pending_remote[i] = false;
            return NegotiationResult::silent();
        }

        if self.remote_enabled[i] {
            self.remote_enabled[i] = false;
            return NegotiationResult {
                response: Some(TelnetSequence::Negotiation {
                    command: TelnetCommand::DONT,
                    option: opt,
                }),
                changed: true,
                local_activated: None,
            };
        }

        NegotiationResult::silent()
    }

    /// Peer asks us to do `opt`
    fn receive_do(&mut self, opt: u8) -> NegotiationResult {
        let i = opt as usize;

        if self.pending_local[i] {
            // Answer to our WILL
            self.pending_local[i] = false;
            let changed = !self.local_enabled[i];
            self.local_enabled[i] = true;
            return NegotiationResult {
                response: None,
                changed,
                local_activated: if changed { Some(opt) } else { None },
            };
        }

        if self.local_enabled[i] {
            return NegotiationResult::silent();
        }

        if SUPPORTED_LOCAL.contains(&opt) {
            self.local_enabled[i] = true;
            NegotiationResult {
                response: Some(TelnetSequence::Negotiation {
                    command: TelnetCommand::WILL,
                    option: opt,
                }),
                changed: true,
                local_activated: Some(opt),
            }
        } else {
            NegotiationResult {
                response: Some(TelnetSequence::Negotiation {
                    command: TelnetCommand::WONT,
                    option: opt,
                }),
                changed: false,
                local_activated: None,
            }
        }
    }

    /// Peer asks us to stop doing `opt`
    fn receive_dont(&mut self, opt: u8) -> NegotiationResult {
        let i = opt as usize;

        if self.pending_local[i] {
            // Peer refused our WILL
            self.pending_local[i] = false;
            return NegotiationResult::silent();
        }

        if self.local_enabled[i] {
            self.local_enabled[i] = false;
            return NegotiationResult {
                response: Some(TelnetSequence::Negotiation {
                    command: TelnetCommand::WONT,
                    option: opt,
                }),
                changed: true,
                local_activated: None,
            };
        }

        NegotiationResult::silent()
    }

    /// Reset all option state (new connection)
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neg_response(result: &NegotiationResult) -> Option<(TelnetCommand, u8)> {
        match &result.response {
            Some(TelnetSequence::Negotiation { command, option }) => Some((*command, *option)),
            _ => None,
        }
    }

    #[test]
    fn test_peer_will_supported_option() {
        let mut neg = OptionNegotiator::new();

        let result = neg.receive(TelnetCommand::WILL, option::SUPPRESS_GO_AHEAD);

        assert_eq!(
            neg_response(&result),
            Some((TelnetCommand::DO, option::SUPPRESS_GO_AHEAD))
        );
        assert!(neg.remote_enabled(option::SUPPRESS_GO_AHEAD));
        assert!(result.changed);
    }

    #[test]
    fn test_peer_will_echo_enables_remote_not_local() {
        let mut neg = OptionNegotiator::new();

        let result = neg.receive(TelnetCommand::WILL, option::ECHO);

        assert_eq!(neg_response(&result), Some((TelnetCommand::DO, option::ECHO)));
        assert!(neg.remote_enabled(option::ECHO));
        assert!(!neg.local_enabled(option::ECHO));
    }

    #[test]
    fn test_do_echo_is_refused() {
        let mut neg = OptionNegotiator::new();

        let result = neg.receive(TelnetCommand::DO, option::ECHO);

        assert_eq!(neg_response(&result), Some((TelnetCommand::WONT, option::ECHO)));
        assert!(!neg.local_enabled(option::ECHO));
    }

    #[test]
    fn test_duplicate_will_gets_exactly_one_reply() {
        let mut neg = OptionNegotiator::new();

        let first = neg.receive(TelnetCommand::WILL, option::SUPPRESS_GO_AHEAD);
        let second = neg.receive(TelnetCommand::WILL, option::SUPPRESS_GO_AHEAD);

        assert!(first.response.is_some());
        assert!(second.response.is_none());
        assert!(!second.changed);
    }

    #[test]
    fn test_unknown_option_refused_both_directions() {
        let mut neg = OptionNegotiator::new();

        let will = neg.receive(TelnetCommand::WILL, 49);
        assert_eq!(neg_response(&will), Some((TelnetCommand::DONT, 49)));
        assert!(!neg.remote_enabled(49));

        let do_req = neg.receive(TelnetCommand::DO, 49);
        assert_eq!(neg_response(&do_req), Some((TelnetCommand::WONT, 49)));
        assert!(!neg.local_enabled(49));
    }

    #[test]
    fn test_initial_requests_settle_without_echo_storm() {
        let mut neg = OptionNegotiator::new();

        let requests = neg.initial_requests();
        assert_eq!(requests.len(), 4);
        assert!(!neg.is_settled());

        // Peer accepts everything we asked for
        let r1 = neg.receive(TelnetCommand::DO, option::SUPPRESS_GO_AHEAD);
        let r2 = neg.receive(TelnetCommand::WILL, option::SUPPRESS_GO_AHEAD);
        let r3 = neg.receive(TelnetCommand::WILL, option::ECHO);
        let r4 = neg.receive(TelnetCommand::DO, option::TERMINAL_TYPE);

        // Answers to our own requests never generate another reply
        assert!(r1.response.is_none());
        assert!(r2.response.is_none());
        assert!(r3.response.is_none());
        assert!(r4.response.is_none());

        assert!(neg.is_settled());
        assert!(neg.local_enabled(option::SUPPRESS_GO_AHEAD));
        assert!(neg.remote_enabled(option::ECHO));
        assert!(neg.local_enabled(option::TERMINAL_TYPE));
    }

    #[test]
    fn test_refused_request_settles() {
        let mut neg = OptionNegotiator::new();
        neg.initial_requests();

        neg.receive(TelnetCommand::DONT, option::SUPPRESS_GO_AHEAD);
        neg.receive(TelnetCommand::WONT, option::SUPPRESS_GO_AHEAD);
        neg.receive(TelnetCommand::WONT, option::ECHO);
        neg.receive(TelnetCommand::DONT, option::TERMINAL_TYPE);

        assert!(neg.is_settled());
        assert!(!neg.local_enabled(option::SUPPRESS_GO_AHEAD));
        assert!(!neg.remote_enabled(option::ECHO));
    }

    #[test]
    fn test_wont_disables_enabled_option() {
        let mut neg = OptionNegotiator::new();
        neg.receive(TelnetCommand::WILL, option::ECHO);
        assert!(neg.remote_enabled(option::ECHO));

        let result = neg.receive(TelnetCommand::WONT, option::ECHO);
        assert_eq!(neg_response(&result), Some((TelnetCommand::DONT, option::ECHO)));
        assert!(!neg.remote_enabled(option::ECHO));

        // Second WONT changes nothing and stays silent
        let again = neg.receive(TelnetCommand::WONT, option::ECHO);
        assert!(again.response.is_none());
    }

    #[test]
    fn test_do_naws_activates_local_side() {
        let mut neg = OptionNegotiator::new();

        let result = neg.receive(TelnetCommand::DO, option::NAWS);

        assert_eq!(neg_response(&result), Some((TelnetCommand::WILL, option::NAWS)));
        assert_eq!(result.local_activated, Some(option::NAWS));
    }

    #[test]
    fn test_suppress_go_ahead_either_direction() {
        let mut neg = OptionNegotiator::new();
        assert!(!neg.suppress_go_ahead());

        neg.receive(TelnetCommand::WILL, option::SUPPRESS_GO_AHEAD);
        assert!(neg.suppress_go_ahead());
    }
}
