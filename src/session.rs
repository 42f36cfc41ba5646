//! IPMI v1.5 session state.
//!
//! The session owns the sequence counters and decides whether a reply is in
//! order. It performs no I/O; [`crate::client::Connection`] drives it.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::BridgeReply;
use crate::types::{AuthType, ChannelAuthCapabilities, PrivilegeLevel};

/// Consecutive streak errors tolerated before the session is force-closed.
pub const MAX_ERROR_STREAK: u32 = 9;

/// Largest forward jump of the reply sequence still accepted as in order.
const SEQ_WINDOW: u32 = 7;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session; the next request runs the handshake.
    #[default]
    Closed,
    /// Auth type negotiated, challenge not yet received.
    Authenticating,
    /// Temporary session id and challenge received.
    ChallengeIssued,
    /// Session activated and privilege raised.
    Active,
}

/// Controller behaviors the session has to accommodate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFeatures {
    /// How bridged requests are answered.
    pub bridge_reply: BridgeReply,
    /// Out-of-order reply sequences are expected and not counted as errors.
    pub tolerate_nonmonotonic_seq: bool,
}

/// Outcome of checking a reply's session sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// The reply advanced the sequence by 1..=7.
    InOrder,
    /// The reply jumped more than 7 ahead; the stored value was resynchronized.
    Resynced,
    /// The reply repeated or preceded the stored value; the stored value was advanced by one.
    Stale,
}

impl SeqCheck {
    /// Whether the reply was out of order.
    pub fn is_out_of_order(self) -> bool {
        !matches!(self, Self::InOrder)
    }
}

/// State of one controller session.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    /// Session sequence of the last request sent.
    send_seq: u32,
    /// Session sequence of the last reply accepted.
    recv_seq: u32,
    session_id: u32,
    challenge: [u8; 16],
    rq_seq: u8,
    auth: AuthType,
    privilege: PrivilegeLevel,
    timeout: Duration,
    features: SessionFeatures,
    streak: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, SessionFeatures::default())
    }
}

impl Session {
    /// A closed session using `timeout` per request.
    pub fn new(timeout: Duration, features: SessionFeatures) -> Self {
        Self {
            state: SessionState::Closed,
            send_seq: 0,
            recv_seq: 0,
            session_id: 0,
            challenge: [0; 16],
            rq_seq: 0,
            auth: AuthType::None,
            privilege: PrivilegeLevel::Operator,
            timeout,
            features,
            streak: 0,
        }
    }

    /// Return to the zero state. Timeout and features survive.
    pub fn reset(&mut self) {
        *self = Self::new(self.timeout, self.features);
    }

    /// Current handshake state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session is usable for ordinary requests.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Sequence number of the last request sent.
    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    /// Sequence number of the last reply accepted.
    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }

    /// Current (temporary or activated) session id.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Negotiated auth type.
    pub fn auth(&self) -> AuthType {
        self.auth
    }

    /// Privilege requested at activation.
    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Controller behaviors in effect.
    pub fn features(&self) -> SessionFeatures {
        self.features
    }

    /// Consecutive streak errors so far.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Replace the per-request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Replace the controller behaviors.
    pub fn set_features(&mut self, features: SessionFeatures) {
        self.features = features;
    }

    pub(crate) fn challenge(&self) -> &[u8; 16] {
        &self.challenge
    }

    pub(crate) fn begin(&mut self, auth: AuthType, privilege: PrivilegeLevel) {
        self.reset();
        self.auth = auth;
        self.privilege = privilege;
        self.state = SessionState::Authenticating;
    }

    pub(crate) fn challenge_issued(&mut self, temporary_session_id: u32, challenge: [u8; 16]) {
        self.session_id = temporary_session_id;
        self.challenge = challenge;
        self.state = SessionState::ChallengeIssued;
    }

    /// Record the activated session.
    ///
    /// `controller_initial_seq` is the first sequence the controller expects
    /// from us; `our_initial_seq` is the first it will send back. Both counters
    /// store the value preceding those so the next send or reply lines up.
    pub(crate) fn activated(
        &mut self,
        session_id: u32,
        controller_initial_seq: u32,
        our_initial_seq: u32,
    ) {
        self.session_id = session_id;
        self.send_seq = controller_initial_seq.wrapping_sub(1);
        self.recv_seq = our_initial_seq.wrapping_sub(1);
        self.challenge = [0; 16];
    }

    pub(crate) fn privilege_set(&mut self) {
        self.state = SessionState::Active;
        self.streak = 0;
    }

    /// Allocate the next 6-bit request sequence (1..=63, wrapping to 1).
    pub(crate) fn next_rq_seq(&mut self) -> u8 {
        self.rq_seq = if self.rq_seq >= 0x3F { 1 } else { self.rq_seq + 1 };
        self.rq_seq
    }

    /// Allocate the session sequence for the next in-session request.
    pub(crate) fn next_send_seq(&mut self) -> u32 {
        self.send_seq = self.send_seq.wrapping_add(1);
        self.send_seq
    }

    /// Check a reply's 6-bit message sequence and 4-byte session sequence.
    ///
    /// Updates the stored receive sequence. Returns an error when the reply
    /// must be rejected.
    pub(crate) fn check_reply(
        &mut self,
        sent_rq_seq: u8,
        reply_rq_seq: u8,
        reply_seq: u32,
    ) -> Result<SeqCheck> {
        if reply_rq_seq != sent_rq_seq {
            return Err(Error::SequenceViolation("message sequence mismatch"));
        }

        let delta = reply_seq.wrapping_sub(self.recv_seq);
        let check = if delta == 0 || delta > SEQ_WINDOW {
            if delta > SEQ_WINDOW {
                self.recv_seq = reply_seq;
                SeqCheck::Resynced
            } else {
                self.recv_seq = self.recv_seq.wrapping_add(1);
                SeqCheck::Stale
            }
        } else {
            self.recv_seq = reply_seq;
            SeqCheck::InOrder
        };

        if check.is_out_of_order() && !self.features.tolerate_nonmonotonic_seq {
            return Err(Error::SequenceViolation("session sequence out of order"));
        }
        Ok(check)
    }

    /// Count one streak error. Returns `true` when the streak limit was
    /// exceeded and the session has been closed.
    pub(crate) fn record_streak_error(&mut self) -> bool {
        self.streak += 1;
        if self.streak > MAX_ERROR_STREAK {
            self.reset();
            return true;
        }
        false
    }

    pub(crate) fn clear_streak(&mut self) {
        self.streak = 0;
    }
}

/// Pick the first auth type in `preference` the channel advertises.
pub fn select_auth(
    caps: &ChannelAuthCapabilities,
    preference: &[AuthType],
) -> Result<AuthType> {
    preference
        .iter()
        .copied()
        .find(|&auth| caps.supports(auth))
        .ok_or(Error::Negotiation("no mutually supported auth type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(recv_seq: u32) -> Session {
        let mut session = Session::default();
        session.begin(AuthType::None, PrivilegeLevel::Operator);
        session.challenge_issued(1, [0; 16]);
        session.activated(2, 5, recv_seq.wrapping_add(1));
        session.privilege_set();
        session
    }

    #[test]
    fn activation_lines_up_first_send() {
        let mut session = active(0);
        assert_eq!(session.send_seq(), 4);
        assert_eq!(session.next_send_seq(), 5);
        assert_eq!(session.send_seq(), 5);
        assert!(session.is_active());
    }

    #[test]
    fn rq_seq_wraps_to_one() {
        let mut session = Session::default();
        let seqs: Vec<u8> = (0..64).map(|_| session.next_rq_seq()).collect();
        assert_eq!(seqs[0], 1);
        assert_eq!(seqs[62], 63);
        assert_eq!(seqs[63], 1);
    }

    #[test]
    fn in_order_reply_is_accepted() {
        let mut session = active(10);
        assert_eq!(session.check_reply(3, 3, 11).expect("ok"), SeqCheck::InOrder);
        assert_eq!(session.recv_seq(), 11);
        assert_eq!(session.check_reply(4, 4, 18).expect("ok"), SeqCheck::InOrder);
        assert_eq!(session.recv_seq(), 18);
    }

    #[test]
    fn message_sequence_off_by_one_is_violation() {
        let mut session = active(10);
        assert!(matches!(
            session.check_reply(3, 2, 11),
            Err(Error::SequenceViolation(_))
        ));
        assert!(matches!(
            session.check_reply(3, 4, 11),
            Err(Error::SequenceViolation(_))
        ));
    }

    #[test]
    fn repeated_reply_advances_by_one() {
        let mut session = active(10);
        assert!(session.check_reply(1, 1, 10).is_err());
        assert_eq!(session.recv_seq(), 11);
    }

    #[test]
    fn reply_one_behind_resynchronizes() {
        let mut session = active(10);
        assert!(matches!(
            session.check_reply(1, 1, 9),
            Err(Error::SequenceViolation(_))
        ));
        assert_eq!(session.recv_seq(), 9);
        assert_eq!(session.check_reply(2, 2, 10).expect("ok"), SeqCheck::InOrder);
    }

    #[test]
    fn jump_ahead_resynchronizes() {
        let mut session = active(10);
        assert!(session.check_reply(1, 1, 100).is_err());
        assert_eq!(session.recv_seq(), 100);
        assert_eq!(session.check_reply(2, 2, 101).expect("ok"), SeqCheck::InOrder);
    }

    #[test]
    fn sequence_wraps_around() {
        let mut session = active(u32::MAX);
        assert_eq!(session.check_reply(1, 1, 0).expect("ok"), SeqCheck::InOrder);
        assert_eq!(session.recv_seq(), 0);
    }

    #[test]
    fn tolerant_platform_accepts_out_of_order() {
        let mut session = active(10);
        session.set_features(SessionFeatures {
            tolerate_nonmonotonic_seq: true,
            ..SessionFeatures::default()
        });
        assert_eq!(session.check_reply(1, 1, 10).expect("ok"), SeqCheck::Stale);
        assert_eq!(session.check_reply(2, 2, 3).expect("ok"), SeqCheck::Resynced);
        assert_eq!(session.recv_seq(), 3);
    }

    #[test]
    fn tenth_streak_error_closes_session() {
        let mut session = active(10);
        for _ in 0..MAX_ERROR_STREAK {
            assert!(!session.record_streak_error());
        }
        assert!(session.is_active());
        assert!(session.record_streak_error());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.streak(), 0);
    }

    #[test]
    fn reset_keeps_timeout_and_features() {
        let features = SessionFeatures {
            bridge_reply: BridgeReply::AckThenReply,
            tolerate_nonmonotonic_seq: true,
        };
        let mut session = Session::new(Duration::from_millis(500), features);
        session.begin(AuthType::Password, PrivilegeLevel::Operator);
        session.reset();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.timeout(), Duration::from_millis(500));
        assert_eq!(session.features(), features);
    }

    #[test]
    fn auth_selection_follows_preference() {
        let caps = ChannelAuthCapabilities {
            channel_number: 1,
            enabled_auth_types: 0x14,
            per_message_auth_disabled: false,
            user_level_auth_disabled: false,
            non_null_usernames: true,
            null_usernames: false,
            anonymous_login_enabled: false,
            oem_id: None,
        };
        let pref = [AuthType::None, AuthType::Password, AuthType::Md5];
        assert_eq!(select_auth(&caps, &pref).expect("auth"), AuthType::Password);
        assert!(matches!(
            select_auth(&caps, &[AuthType::None]),
            Err(Error::Negotiation(_))
        ));
    }
}
