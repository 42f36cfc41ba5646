//! IPMI v1.5 over RMCP framing.
//!
//! A request frame is laid out as:
//!
//! ```text
//! RMCP header (4) | auth type (1) | session seq (4) | session id (4) | [auth code (16)] | len (1)
//! rsAddr | netFn<<2 | rsLUN | chk1 | rqAddr | rqSeq<<2 | rqLUN | cmd | data... | chk2
//! ```
//!
//! Bridged requests wrap the target message in one or two `Send Message`
//! envelopes, each carrying its own pair of checksums.

use crate::error::{Error, Result};
use crate::types::AuthType;

/// RMCP header values.
const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
const RMCP_CLASS_ASF: u8 = 0x06;
const RMCP_CLASS_IPMI: u8 = 0x07;

/// ASF presence ping/pong values.
const ASF_IANA: u32 = 0x0000_11BE;
const ASF_PRESENCE_PING: u8 = 0x80;
const ASF_PRESENCE_PONG: u8 = 0x40;

/// Length of the RMCP header.
pub const RMCP_HEADER_LEN: usize = 4;
/// Offset of the 4-byte session sequence number in every frame.
pub const SESSION_SEQ_OFFSET: usize = RMCP_HEADER_LEN + 1;
/// Session header length without an auth code (auth type, seq, id, length).
const SESSION_HEADER_LEN: usize = 10;
/// Bytes added to the session header by the auth code field.
const AUTH_CODE_LEN: usize = 16;
/// Bytes each nested bridging layer adds in front of the completion code.
const BRIDGE_LAYER_LEN: usize = 7;

/// Slave address of the BMC / MCH as seen from the LAN.
pub const BMC_ADDR: u8 = 0x20;
/// Software id used by the remote console.
pub const REMOTE_SWID: u8 = 0x81;
/// LUN used by the BMC for bridged responses routed back to the console.
const SMS_LUN: u8 = 0x02;
/// "Track request" bit in the `Send Message` channel byte.
const TRACK_REQUEST: u8 = 0x40;

/// Network function codes.
pub mod netfn {
    /// Chassis.
    pub const CHASSIS: u8 = 0x00;
    /// Sensor/Event.
    pub const SENSOR: u8 = 0x04;
    /// Application.
    pub const APP: u8 = 0x06;
    /// Storage (SDR, FRU).
    pub const STORAGE: u8 = 0x0A;
    /// Group extension (PICMG).
    pub const PICMG: u8 = 0x2C;
}

/// `Send Message` (App NetFn) command code.
pub const CMD_SEND_MESSAGE: u8 = 0x34;

/// Where a request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Sent to the LAN-attached controller itself.
    Direct {
        /// Responder LUN.
        lun: u8,
    },
    /// Forwarded once by the LAN-attached controller.
    Bridged {
        /// Channel on which the controller forwards the message.
        channel: u8,
        /// Slave address of the target controller.
        target: u8,
        /// Responder LUN on the target.
        lun: u8,
    },
    /// Forwarded by the LAN-attached controller to a transit controller, which
    /// forwards it again.
    DoubleBridged {
        /// Channel on which the LAN-attached controller forwards the message.
        channel: u8,
        /// Slave address of the transit controller.
        transit: u8,
        /// Channel on which the transit controller forwards the message.
        transit_channel: u8,
        /// Slave address of the target controller.
        target: u8,
        /// Responder LUN on the target.
        lun: u8,
    },
}

impl Route {
    /// Route to the LAN-attached controller, LUN 0.
    pub const BMC: Self = Self::Direct { lun: 0 };

    /// Number of `Send Message` envelopes.
    pub fn depth(&self) -> usize {
        match self {
            Self::Direct { .. } => 0,
            Self::Bridged { .. } => 1,
            Self::DoubleBridged { .. } => 2,
        }
    }

    /// Slave address of the controller that finally executes the command.
    pub fn target(&self) -> u8 {
        match *self {
            Self::Direct { .. } => BMC_ADDR,
            Self::Bridged { target, .. } | Self::DoubleBridged { target, .. } => target,
        }
    }
}

/// How a controller answers a bridged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeReply {
    /// One frame carrying the `Send Message` reply with the target's reply nested inside.
    #[default]
    Combined,
    /// A bare `Send Message` acknowledgement frame, then the target's reply as
    /// a separate, un-nested frame.
    AckThenReply,
}

/// Session wrapper fields of an outgoing frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionHeader {
    pub auth: AuthType,
    pub seq: u32,
    pub session_id: u32,
    pub auth_code: Option<[u8; 16]>,
}

impl SessionHeader {
    /// Header used for the pre-session handshake commands.
    pub(crate) fn pre_session() -> Self {
        Self {
            auth: AuthType::None,
            seq: 0,
            session_id: 0,
            auth_code: None,
        }
    }
}

/// Compute the standard 2's complement checksum used by IPMI messages.
pub(crate) fn ipmi_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

fn sums_to_zero(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

/// Encode one IPMB-style message: part 1 (responder) and part 2 (requester,
/// command, data), each closed by its checksum.
#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_message(
    rs_addr: u8,
    netfn: u8,
    rs_lun: u8,
    rq_addr: u8,
    rq_seq: u8,
    rq_lun: u8,
    cmd: u8,
    data: &[u8],
) -> Vec<u8> {
    let netfn_lun = (netfn << 2) | (rs_lun & 0x03);
    let csum1 = ipmi_checksum(&[rs_addr, netfn_lun]);
    let rq_seq_lun = ((rq_seq & 0x3F) << 2) | (rq_lun & 0x03);

    let mut msg = Vec::with_capacity(7 + data.len());
    msg.push(rs_addr);
    msg.push(netfn_lun);
    msg.push(csum1);

    msg.push(rq_addr);
    msg.push(rq_seq_lun);
    msg.push(cmd);
    msg.extend_from_slice(data);

    let csum2 = ipmi_checksum(&msg[3..]);
    msg.push(csum2);
    msg
}

fn send_message_data(channel: u8, inner: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + inner.len());
    data.push((channel & 0x0F) | TRACK_REQUEST);
    data.extend_from_slice(inner);
    data
}

/// Encode the IPMI message for `route`, wrapping it in as many `Send Message`
/// envelopes as the route needs.
pub(crate) fn encode_routed_message(
    route: &Route,
    rq_seq: u8,
    netfn: u8,
    cmd: u8,
    data: &[u8],
) -> Result<Vec<u8>> {
    if rq_seq > 0x3F {
        return Err(Error::InvalidArgument("rq_seq must be 6-bit"));
    }

    let msg = match *route {
        Route::Direct { lun } => {
            encode_message(BMC_ADDR, netfn, lun, REMOTE_SWID, rq_seq, 0, cmd, data)
        }
        Route::Bridged {
            channel,
            target,
            lun,
        } => {
            let inner = encode_message(target, netfn, lun, BMC_ADDR, rq_seq, SMS_LUN, cmd, data);
            encode_message(
                BMC_ADDR,
                netfn::APP,
                0,
                REMOTE_SWID,
                rq_seq,
                0,
                CMD_SEND_MESSAGE,
                &send_message_data(channel, &inner),
            )
        }
        Route::DoubleBridged {
            channel,
            transit,
            transit_channel,
            target,
            lun,
        } => {
            let inner = encode_message(target, netfn, lun, transit, rq_seq, SMS_LUN, cmd, data);
            let middle = encode_message(
                transit,
                netfn::APP,
                0,
                BMC_ADDR,
                rq_seq,
                SMS_LUN,
                CMD_SEND_MESSAGE,
                &send_message_data(transit_channel, &inner),
            );
            encode_message(
                BMC_ADDR,
                netfn::APP,
                0,
                REMOTE_SWID,
                rq_seq,
                0,
                CMD_SEND_MESSAGE,
                &send_message_data(channel, &middle),
            )
        }
    };

    if msg.len() > usize::from(u8::MAX) {
        return Err(Error::InvalidArgument("message too large"));
    }
    Ok(msg)
}

/// Prepend the RMCP header and session wrapper to an encoded message.
pub(crate) fn encode_frame(header: &SessionHeader, message: &[u8]) -> Result<Vec<u8>> {
    let msg_len: u8 = message
        .len()
        .try_into()
        .map_err(|_| Error::InvalidArgument("message too large"))?;

    let mut frame =
        Vec::with_capacity(RMCP_HEADER_LEN + SESSION_HEADER_LEN + AUTH_CODE_LEN + message.len());

    frame.push(RMCP_VERSION);
    frame.push(RMCP_RESERVED);
    frame.push(RMCP_SEQ_NO_ACK);
    frame.push(RMCP_CLASS_IPMI);

    frame.push(header.auth.as_u8());
    frame.extend_from_slice(&header.seq.to_le_bytes());
    frame.extend_from_slice(&header.session_id.to_le_bytes());
    if header.auth.has_auth_code() {
        let code = header
            .auth_code
            .ok_or(Error::Protocol("auth code required for authenticated frame"))?;
        frame.extend_from_slice(&code);
    }
    frame.push(msg_len);
    frame.extend_from_slice(message);
    Ok(frame)
}

/// Offsets describing where the interesting fields of a reply frame sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLayout {
    header_len: usize,
    nested_layers: usize,
}

impl ResponseLayout {
    /// Layout of a reply using `auth`, carrying `nested_layers` bridged replies
    /// inside the outer message.
    pub fn new(auth: AuthType, nested_layers: usize) -> Self {
        let auth_len = if auth.has_auth_code() {
            AUTH_CODE_LEN
        } else {
            0
        };
        Self {
            header_len: RMCP_HEADER_LEN + SESSION_HEADER_LEN + auth_len,
            nested_layers,
        }
    }

    /// Layout of the reply for `route` under `behavior`.
    pub fn for_route(auth: AuthType, route: &Route, behavior: BridgeReply) -> Self {
        let nested = match behavior {
            BridgeReply::Combined => route.depth(),
            BridgeReply::AckThenReply => 0,
        };
        Self::new(auth, nested)
    }

    /// Offset of the first IPMI message byte.
    pub fn message_offset(&self) -> usize {
        self.header_len
    }

    /// Offset of the 6-bit message sequence byte of the outer message.
    pub fn msg_seq_offset(&self) -> usize {
        self.header_len + 4
    }

    /// Offset of the completion code of the innermost reply.
    pub fn completion_offset(&self) -> usize {
        self.header_len + 6 + BRIDGE_LAYER_LEN * self.nested_layers
    }

    /// Offset of the first payload byte after the completion code.
    pub fn payload_offset(&self) -> usize {
        self.completion_offset() + 1
    }

    /// Number of checksum bytes closing the frame.
    pub fn trailer_len(&self) -> usize {
        1 + self.nested_layers
    }
}

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedFrame {
    pub session_seq: u32,
    pub msg_seq: u8,
    pub completion_code: u8,
    pub data: Vec<u8>,
}

/// Decode a reply frame.
///
/// `expected_len` is the number of payload bytes the caller needs; `None`
/// accepts whatever the controller sent and reports it through the returned
/// data length. Non-zero completion codes are returned, not raised.
pub(crate) fn decode_frame(
    buf: &[u8],
    layout: ResponseLayout,
    expected_len: Option<usize>,
) -> Result<DecodedFrame> {
    let h = layout.header_len;
    if buf.len() < h + 8 {
        return Err(Error::Decode("reply too short"));
    }
    if buf[0] != RMCP_VERSION {
        return Err(Error::Protocol("unexpected RMCP version"));
    }
    if buf[3] != RMCP_CLASS_IPMI {
        return Err(Error::Protocol("unexpected RMCP class"));
    }

    let seq = &buf[SESSION_SEQ_OFFSET..SESSION_SEQ_OFFSET + 4];
    let session_seq = u32::from_le_bytes([seq[0], seq[1], seq[2], seq[3]]);

    let msg_len = usize::from(buf[h - 1]);
    let end = if msg_len > 0 && h + msg_len <= buf.len() {
        h + msg_len
    } else {
        buf.len()
    };
    let msg = &buf[h..end];
    if msg.len() < 8 {
        return Err(Error::Decode("reply message too short"));
    }
    if !sums_to_zero(&msg[..3]) {
        return Err(Error::Decode("invalid reply checksum 1"));
    }
    if !sums_to_zero(&msg[3..]) {
        return Err(Error::Decode("invalid reply checksum 2"));
    }

    let msg_seq = msg[4] >> 2;
    let trailer = layout.trailer_len();

    let mut off = 6;
    for layer in 1..=layout.nested_layers {
        let bridge_cc = msg[off];
        if bridge_cc != 0x00 {
            return Ok(DecodedFrame {
                session_seq,
                msg_seq,
                completion_code: bridge_cc,
                data: Vec::new(),
            });
        }
        // Each layer's reply ends one checksum before the enclosing one.
        let inner = msg
            .get(off + 1..msg.len() - layer)
            .filter(|inner| inner.len() >= 8)
            .ok_or(Error::Decode("bridged reply too short"))?;
        if !sums_to_zero(&inner[..3]) || !sums_to_zero(&inner[3..]) {
            return Err(Error::Decode("invalid bridged reply checksum"));
        }
        off += BRIDGE_LAYER_LEN;
        if msg.len() < off + trailer + 1 {
            return Err(Error::Decode("bridged reply too short"));
        }
    }

    let completion_code = msg[off];
    let data = msg
        .get(off + 1..msg.len() - trailer)
        .map(<[u8]>::to_vec)
        .unwrap_or_default();

    if completion_code == 0x00 {
        if let Some(n) = expected_len {
            if data.len() < n {
                return Err(Error::decode_owned(format!(
                    "reply payload {} bytes, expected {n}",
                    data.len()
                )));
            }
        }
    }

    Ok(DecodedFrame {
        session_seq,
        msg_seq,
        completion_code,
        data,
    })
}

/// Build an RMCP/ASF presence ping.
pub(crate) fn encode_presence_ping(tag: u8) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12);
    packet.push(RMCP_VERSION);
    packet.push(RMCP_RESERVED);
    packet.push(RMCP_SEQ_NO_ACK);
    packet.push(RMCP_CLASS_ASF);
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.push(ASF_PRESENCE_PING);
    packet.push(tag);
    packet.push(0x00);
    packet.push(0x00);
    packet
}

/// Presence pong contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePong {
    /// IANA enterprise number of the responder.
    pub iana: u32,
    /// Supported entities; bit 7 set means IPMI is supported.
    pub supported_entities: u8,
}

impl PresencePong {
    /// The responder advertises IPMI support.
    pub fn supports_ipmi(&self) -> bool {
        self.supported_entities & 0x80 != 0
    }
}

/// Parse an RMCP/ASF presence pong answering the ping tagged `tag`.
pub(crate) fn decode_presence_pong(buf: &[u8], tag: u8) -> Result<PresencePong> {
    if buf.len() < 12 {
        return Err(Error::Decode("presence pong too short"));
    }
    if buf[0] != RMCP_VERSION || buf[3] & 0x1F != RMCP_CLASS_ASF {
        return Err(Error::Protocol("not an ASF message"));
    }
    if buf[8] != ASF_PRESENCE_PONG {
        return Err(Error::Protocol("not a presence pong"));
    }
    if buf[9] != tag {
        return Err(Error::Protocol("presence pong tag mismatch"));
    }
    let data = &buf[12..];
    if data.len() < 10 {
        return Err(Error::Decode("presence pong data too short"));
    }
    Ok(PresencePong {
        iana: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        supported_entities: data[8],
    })
}

#[cfg(test)]
pub(crate) fn encode_presence_pong(tag: u8) -> Vec<u8> {
    let mut packet = vec![
        RMCP_VERSION,
        RMCP_RESERVED,
        RMCP_SEQ_NO_ACK,
        RMCP_CLASS_ASF,
    ];
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.extend_from_slice(&[ASF_PRESENCE_PONG, tag, 0x00, 0x10]);
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 0, 0x81, 0x00, 0, 0, 0, 0, 0, 0]);
    packet
}
