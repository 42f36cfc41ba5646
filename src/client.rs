use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::commands::{
    ActivateSession, ChassisControlCommand, CloseSession, Command, GetChannelAuthCapabilities,
    GetChassisStatus, GetDeviceId, GetSessionChallenge, SetSessionPrivilege,
};
use crate::crypto::{self, SecretBytes};
use crate::debug::{DebugLevel, dump_hex};
use crate::error::{Error, Result};
use crate::protocol::{
    BridgeReply, DecodedFrame, PresencePong, ResponseLayout, Route, SessionHeader,
    decode_frame, decode_presence_pong, encode_frame, encode_presence_ping,
    encode_routed_message,
};
use crate::session::{DEFAULT_TIMEOUT, MAX_ERROR_STREAK, Session, SessionFeatures, select_auth};
use crate::transport::{Transport, UdpTransport};
use crate::types::{AuthType, ChassisControl, ChassisStatus, DeviceId, PrivilegeLevel, RawResponse};

/// Channel number meaning "the channel this request arrived on".
const CURRENT_CHANNEL: u8 = 0x0E;

/// Request sequence used by the handshake commands.
const HANDSHAKE_RQ_SEQ: u8 = 0;

/// Session parameters shared by every (re)connect of one controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    username: Vec<u8>,
    password: SecretBytes,
    privilege_level: PrivilegeLevel,
    timeout: Duration,
    initial_outbound_seq: u32,
    auth_preference: Vec<AuthType>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: Vec::new(),
            password: SecretBytes::default(),
            privilege_level: PrivilegeLevel::Operator,
            timeout: DEFAULT_TIMEOUT,
            initial_outbound_seq: rand::random_range(1..=0x7FFF_FFFF),
            auth_preference: vec![AuthType::None, AuthType::Password, AuthType::Md5],
        }
    }
}

/// Builder for [`Client`] and [`Connection`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    target: SocketAddr,
    name: Option<String>,
    config: SessionConfig,
    features: SessionFeatures,
    debug: DebugLevel,
}

impl ClientBuilder {
    /// Create a new builder.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            name: None,
            config: SessionConfig::default(),
            features: SessionFeatures::default(),
            debug: DebugLevel::OFF,
        }
    }

    /// Name used in log fields (defaults to the target address).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the username (bytes).
    pub fn username_bytes(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Set the username (UTF-8 string).
    pub fn username(self, username: impl AsRef<str>) -> Self {
        self.username_bytes(username.as_ref().as_bytes().to_vec())
    }

    /// Set the password (bytes).
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.config.password = SecretBytes::new(password.into());
        self
    }

    /// Set the password (UTF-8 string).
    pub fn password(self, password: impl AsRef<str>) -> Self {
        self.password_bytes(password.as_ref().as_bytes().to_vec())
    }

    /// Set requested session privilege level.
    pub fn privilege_level(mut self, level: PrivilegeLevel) -> Self {
        self.config.privilege_level = level;
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the first session sequence the controller should use in its replies.
    ///
    /// Defaults to a random value.
    pub fn initial_outbound_seq(mut self, seq: u32) -> Self {
        self.config.initial_outbound_seq = seq;
        self
    }

    /// Set the auth types to try, most preferred first.
    pub fn auth_preference(mut self, preference: impl Into<Vec<AuthType>>) -> Self {
        self.config.auth_preference = preference.into();
        self
    }

    /// Set controller behaviors known up front.
    pub fn features(mut self, features: SessionFeatures) -> Self {
        self.features = features;
        self
    }

    /// Set debug verbosity.
    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.debug = level;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.config.username.len() > crypto::KEY_LEN {
            return Err(Error::InvalidArgument("username longer than 16 bytes"));
        }
        if self.config.password.expose().len() > crypto::KEY_LEN {
            return Err(Error::InvalidArgument("password longer than 16 bytes"));
        }
        if self.config.auth_preference.is_empty() {
            return Err(Error::InvalidArgument("auth preference list is empty"));
        }
        Ok(())
    }

    /// Build an unopened [`Connection`] over `transport`.
    pub fn with_transport(self, transport: Box<dyn Transport + Send>) -> Result<Connection> {
        self.validate()?;
        let name = self.name.unwrap_or_else(|| self.target.to_string());
        let session = Session::new(self.config.timeout, self.features);
        Ok(Connection {
            name,
            transport,
            config: self.config,
            session,
            debug: self.debug,
            ping_tag: rand::random(),
        })
    }

    /// Bind a UDP socket and build an unopened [`Connection`].
    pub fn connect(self) -> Result<Connection> {
        let transport = UdpTransport::connect(self.target)?;
        self.with_transport(Box::new(transport))
    }

    /// Establish the session and build the [`Client`].
    pub fn build(self) -> Result<Client> {
        let mut connection = self.connect()?;
        connection.open()?;
        Ok(Client {
            inner: Arc::new(Mutex::new(connection)),
        })
    }
}

/// One controller's transport plus its session.
///
/// Every method takes `&mut self`: the owner serializes access, and there
/// is never more than one request in flight.
pub struct Connection {
    name: String,
    transport: Box<dyn Transport + Send>,
    config: SessionConfig,
    session: Session,
    debug: DebugLevel,
    ping_tag: u8,
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("session", &self.session)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Name used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Debug verbosity.
    pub fn debug_level(&self) -> DebugLevel {
        self.debug
    }

    /// Change debug verbosity.
    pub fn set_debug_level(&mut self, level: DebugLevel) {
        self.debug = level;
    }

    /// Apply controller behaviors learned after identification.
    pub fn configure(&mut self, timeout: Duration, features: SessionFeatures) {
        self.session.set_timeout(timeout);
        self.session.set_features(features);
    }

    /// Run the four-step handshake.
    ///
    /// Any failure leaves the session closed; retrying is up to the caller.
    pub fn open(&mut self) -> Result<()> {
        self.session.reset();
        let result = self.handshake();
        match &result {
            Ok(()) => {
                if self.debug >= DebugLevel::SESSION {
                    tracing::info!(
                        device = %self.name,
                        session_id = self.session.session_id(),
                        auth = ?self.session.auth(),
                        "session active"
                    );
                }
            }
            Err(err) => {
                self.session.reset();
                tracing::warn!(device = %self.name, error = %err, "session handshake failed");
            }
        }
        result
    }

    fn handshake(&mut self) -> Result<()> {
        let privilege = self.config.privilege_level;

        let caps = self.handshake_step(
            &GetChannelAuthCapabilities::new(CURRENT_CHANNEL, privilege),
            AuthType::None,
            0,
            0,
        )?;
        let auth = select_auth(&caps, &self.config.auth_preference)?;
        self.session.begin(auth, privilege);

        let challenge = self.handshake_step(
            &GetSessionChallenge {
                auth,
                username: crypto::pad_key(&self.config.username),
            },
            AuthType::None,
            0,
            0,
        )?;
        self.session
            .challenge_issued(challenge.temporary_session_id, challenge.challenge);

        let activate = ActivateSession {
            auth,
            privilege,
            challenge: *self.session.challenge(),
            initial_outbound_seq: self.config.initial_outbound_seq,
        };
        let activated = self.handshake_step(&activate, auth, self.session.session_id(), 0)?;
        if AuthType::from_u8(activated.auth_type) != Some(auth) {
            return Err(Error::Negotiation("controller changed the auth type"));
        }
        self.session.activated(
            activated.session_id,
            activated.initial_inbound_seq,
            self.config.initial_outbound_seq,
        );

        let seq = self.session.next_send_seq();
        let header = SessionHeader {
            auth,
            seq,
            session_id: self.session.session_id(),
            auth_code: None,
        };
        let set_privilege = SetSessionPrivilege { privilege };
        let frame = self.transact(
            header,
            &Route::BMC,
            HANDSHAKE_RQ_SEQ,
            SetSessionPrivilege::NETFN,
            SetSessionPrivilege::CMD,
            &set_privilege.request_data(),
            None,
        )?;
        self.session
            .check_reply(HANDSHAKE_RQ_SEQ, frame.msg_seq, frame.session_seq)?;
        set_privilege.parse_response(raw(frame))?;

        self.session.privilege_set();
        Ok(())
    }

    fn handshake_step<C: Command>(
        &mut self,
        command: &C,
        auth: AuthType,
        session_id: u32,
        seq: u32,
    ) -> Result<C::Output> {
        let header = SessionHeader {
            auth,
            seq,
            session_id,
            ..SessionHeader::pre_session()
        };
        let frame = self.transact(
            header,
            &Route::BMC,
            HANDSHAKE_RQ_SEQ,
            C::NETFN,
            C::CMD,
            &command.request_data(),
            command.expected_len(),
        )?;
        command.parse_response(raw(frame))
    }

    /// Send `Close Session` (best effort) and return to the closed state.
    pub fn close(&mut self) -> Result<()> {
        if !self.session.is_active() {
            self.session.reset();
            return Ok(());
        }
        let close = CloseSession {
            session_id: self.session.session_id(),
        };
        let result = self.execute(&Route::BMC, &close);
        self.session.reset();
        if self.debug >= DebugLevel::SESSION {
            tracing::info!(device = %self.name, "session closed");
        }
        match result {
            Err(Error::NoReply) | Err(Error::SessionClosed) => Ok(()),
            other => other,
        }
    }

    /// Execute a typed command along `route`.
    pub fn execute<C: Command>(&mut self, route: &Route, command: &C) -> Result<C::Output> {
        let response = self.request(
            route,
            C::NETFN,
            C::CMD,
            &command.request_data(),
            command.expected_len(),
        )?;
        command.parse_response(response)
    }

    /// Send a raw request along `route` inside the session and return the
    /// raw response.
    ///
    /// A closed session is re-established first. Non-zero completion codes
    /// are returned, not raised.
    pub fn request(
        &mut self,
        route: &Route,
        netfn: u8,
        cmd: u8,
        data: &[u8],
        expected_len: Option<usize>,
    ) -> Result<RawResponse> {
        if !self.session.is_active() {
            self.open()?;
        }

        let rq_seq = self.session.next_rq_seq();
        let header = SessionHeader {
            auth: self.session.auth(),
            seq: self.session.next_send_seq(),
            session_id: self.session.session_id(),
            auth_code: None,
        };

        let start = Instant::now();
        let result = match self.transact(header, route, rq_seq, netfn, cmd, data, expected_len) {
            Ok(frame) => self
                .session
                .check_reply(rq_seq, frame.msg_seq, frame.session_seq)
                .map(|_| raw(frame)),
            Err(err) => Err(err),
        };
        let elapsed = start.elapsed();

        match &result {
            Ok(resp) => {
                self.session.clear_streak();
                crate::observe::record_ok(&self.name, netfn, cmd, elapsed, resp.completion_code);
                if self.debug >= DebugLevel::REQUESTS {
                    tracing::info!(
                        device = %self.name,
                        netfn,
                        cmd,
                        completion_code = resp.completion_code,
                        len = resp.data.len(),
                        "reply"
                    );
                }
            }
            Err(err) => {
                crate::observe::record_err(&self.name, netfn, cmd, elapsed, err);
                if err.is_streak_error() && self.session.record_streak_error() {
                    crate::observe::record_reconnect(&self.name, MAX_ERROR_STREAK + 1);
                }
            }
        }
        result
    }

    /// Encode, send and decode one exchange without sequence validation.
    #[allow(clippy::too_many_arguments)]
    fn transact(
        &mut self,
        header: SessionHeader,
        route: &Route,
        rq_seq: u8,
        netfn: u8,
        cmd: u8,
        data: &[u8],
        expected_len: Option<usize>,
    ) -> Result<DecodedFrame> {
        let message = encode_routed_message(route, rq_seq, netfn, cmd, data)?;
        let auth_code = crypto::auth_code(
            header.auth,
            &self.config.password,
            header.session_id,
            header.seq,
            &message,
        );
        let frame = encode_frame(&SessionHeader { auth_code, ..header }, &message)?;
        dump_hex(self.debug, &self.name, "request", &frame);

        let timeout = self.session.timeout();
        let reply = self.receive(self.transport.write_read(&frame, timeout)?)?;

        let ack_then_reply = self.session.features().bridge_reply == BridgeReply::AckThenReply;
        if route.depth() > 0 && ack_then_reply {
            let ack = decode_frame(&reply, reply_layout(&reply, header.auth, 0), None)?;
            if ack.completion_code != 0x00 {
                return Ok(ack);
            }
            let reply = self.receive(self.transport.read(timeout)?)?;
            return decode_frame(&reply, reply_layout(&reply, header.auth, 0), expected_len);
        }

        let layout = reply_layout(&reply, header.auth, route.depth());
        decode_frame(&reply, layout, expected_len)
    }

    fn receive(&self, reply: Vec<u8>) -> Result<Vec<u8>> {
        if reply.is_empty() {
            return Err(Error::NoReply);
        }
        dump_hex(self.debug, &self.name, "reply", &reply);
        Ok(reply)
    }

    /// Send an RMCP/ASF presence ping outside any session.
    pub fn presence_ping(&mut self) -> Result<PresencePong> {
        self.ping_tag = self.ping_tag.wrapping_add(1);
        let tag = self.ping_tag;
        let ping = encode_presence_ping(tag);
        dump_hex(self.debug, &self.name, "ping", &ping);
        let reply = self.transport.write_read(&ping, self.session.timeout())?;
        if reply.is_empty() {
            return Err(Error::Timeout);
        }
        dump_hex(self.debug, &self.name, "pong", &reply);
        decode_presence_pong(&reply, tag)
    }
}

/// Layout of `reply`, taking the auth type from its session header.
fn reply_layout(reply: &[u8], fallback: AuthType, nested_layers: usize) -> ResponseLayout {
    let auth = reply
        .get(4)
        .copied()
        .and_then(AuthType::from_u8)
        .unwrap_or(fallback);
    ResponseLayout::new(auth, nested_layers)
}

fn raw(frame: DecodedFrame) -> RawResponse {
    RawResponse {
        completion_code: frame.completion_code,
        data: frame.data,
    }
}

/// A blocking IPMI v1.5 LAN client for one controller.
///
/// `Client` is a cheaply cloneable handle around a [`Connection`]; every
/// request is made under its lock.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Connection>>,
}

impl Client {
    /// Create a [`ClientBuilder`].
    pub fn builder(target: SocketAddr) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    /// Execute a typed command on the LAN-attached controller.
    pub fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        self.execute_routed(&Route::BMC, command)
    }

    /// Execute a typed command along `route`.
    pub fn execute_routed<C: Command>(&self, route: &Route, command: C) -> Result<C::Output> {
        self.lock_inner()?.execute(route, &command)
    }

    /// Send a raw request to the LAN-attached controller.
    pub fn send_raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        self.lock_inner()?
            .request(&Route::BMC, netfn, cmd, data, None)
    }

    /// Convenience wrapper for `Get Device ID` (App NetFn, cmd 0x01).
    pub fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId)
    }

    /// Convenience wrapper for `Get Chassis Status` (Chassis NetFn, cmd 0x01).
    pub fn get_chassis_status(&self) -> Result<ChassisStatus> {
        self.execute(GetChassisStatus)
    }

    /// Run `Chassis Control` (Chassis NetFn, cmd 0x02).
    pub fn chassis_control(&self, control: ChassisControl) -> Result<()> {
        self.execute(ChassisControlCommand { control })
    }

    /// Send an RMCP presence ping.
    pub fn presence_ping(&self) -> Result<PresencePong> {
        self.lock_inner()?.presence_ping()
    }

    /// Close the session (App NetFn, cmd 0x3C).
    ///
    /// A silent controller still leaves the client locally closed; the next
    /// request opens a fresh session.
    pub fn close_session(&self) -> Result<()> {
        self.lock_inner()?.close()
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|_| Error::Protocol("client lock poisoned"))
    }
}
