//! An in-memory controller for tests.
//!
//! Answers the session handshake, bridged requests (in both reply styles),
//! repository and FRU reads, sensor readings and the PICMG commands the
//! platform layer issues.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::platform::manufacturer;
use crate::protocol::{
    BridgeReply, CMD_SEND_MESSAGE, SessionHeader, encode_frame, encode_message,
    encode_presence_pong, netfn,
};
use crate::transport::Transport;
use crate::types::{AuthType, completion_code};

const TEMP_SESSION_ID: u32 = 1;
const SESSION_ID: u32 = 2;
const INITIAL_INBOUND_SEQ: u32 = 5;
const MAX_SDR_SLICE: usize = 22;

/// Simulated controller state. Tests set the public fields directly.
#[derive(Debug, Clone)]
pub(crate) struct SimController {
    /// Auth type support bits advertised by the channel.
    pub auth_types: u8,
    /// Drop every datagram.
    pub silent: bool,
    /// Reuse the previous reply's session sequence.
    pub repeat_seq: bool,
    /// How bridged requests are answered.
    pub bridge_reply: BridgeReply,
    /// Manufacturer id reported by `Get Device ID`.
    pub manufacturer_id: u32,
    /// `Get SDR` requests still to be refused with "reservation canceled".
    pub cancel_reservations: usize,
    /// Addition timestamp of every repository.
    pub sdr_timestamp: u32,
    /// Repository contents per controller address; record id = position.
    pub sdr: BTreeMap<u8, Vec<Vec<u8>>>,
    /// Next record id handed out after a repository's last record instead
    /// of the end marker.
    pub sdr_loop_back: BTreeMap<u8, u16>,
    /// FRU inventory images per (controller address, FRU id).
    pub fru: BTreeMap<(u8, u8), Vec<u8>>,
    /// Raw readings per (controller address, sensor number); missing
    /// sensors answer "not present".
    pub readings: BTreeMap<(u8, u8), u8>,
    /// Fan override levels per (controller address, FRU id).
    pub fan_levels: BTreeMap<(u8, u8), u8>,
    /// `Set FRU Activation` requests as (address, FRU id, activate).
    pub activations: Vec<(u8, u8, bool)>,
    /// `Chassis Control` codes received.
    pub chassis_controls: Vec<u8>,
    /// Sessions activated.
    pub handshakes: usize,
    /// `Close Session` requests received.
    pub closes: usize,
    /// `Get Sensor Reading` requests received.
    pub sensor_reads: usize,
    /// Deepest bridging seen.
    pub max_bridge_depth: usize,
    pub(crate) next_seq: u32,
    pub(crate) last_seq: u32,
    pub(crate) pending: Option<Vec<u8>>,
}

impl Default for SimController {
    fn default() -> Self {
        Self {
            auth_types: 0x01,
            silent: false,
            repeat_seq: false,
            bridge_reply: BridgeReply::Combined,
            manufacturer_id: manufacturer::NAT,
            cancel_reservations: 0,
            sdr_timestamp: 0x6500_0000,
            sdr: BTreeMap::new(),
            sdr_loop_back: BTreeMap::new(),
            fru: BTreeMap::new(),
            readings: BTreeMap::new(),
            fan_levels: BTreeMap::new(),
            activations: Vec::new(),
            chassis_controls: Vec::new(),
            handshakes: 0,
            closes: 0,
            sensor_reads: 0,
            max_bridge_depth: 0,
            next_seq: 0,
            last_seq: 0,
            pending: None,
        }
    }
}

/// One decoded IPMB message.
struct Message {
    rs_addr: u8,
    netfn: u8,
    rs_lun: u8,
    rq_addr: u8,
    rq_seq: u8,
    rq_lun: u8,
    cmd: u8,
    data: Vec<u8>,
}

impl Message {
    fn parse(msg: &[u8]) -> Option<Self> {
        if msg.len() < 7 {
            return None;
        }
        Some(Self {
            rs_addr: msg[0],
            netfn: msg[1] >> 2,
            rs_lun: msg[1] & 0x03,
            rq_addr: msg[3],
            rq_seq: msg[4] >> 2,
            rq_lun: msg[4] & 0x03,
            cmd: msg[5],
            data: msg[6..msg.len() - 1].to_vec(),
        })
    }

    fn is_send_message(&self) -> bool {
        self.netfn == netfn::APP && self.cmd == CMD_SEND_MESSAGE && !self.data.is_empty()
    }

    /// The reply to this message carrying `payload` (completion code first).
    fn reply(&self, payload: &[u8]) -> Vec<u8> {
        encode_message(
            self.rq_addr,
            self.netfn + 1,
            self.rq_lun,
            self.rs_addr,
            self.rq_seq,
            self.rs_lun,
            self.cmd,
            payload,
        )
    }
}

fn ok(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend_from_slice(data);
    out
}

fn cc(code: u8) -> Vec<u8> {
    vec![code]
}

impl SimController {
    fn handle(&mut self, frame: &[u8]) -> Vec<u8> {
        if self.silent {
            return Vec::new();
        }
        if frame.len() >= 10 && frame[3] == 0x06 {
            return encode_presence_pong(frame[9]);
        }
        let Some(&auth_byte) = frame.get(4) else {
            return Vec::new();
        };
        let auth = AuthType::from_u8(auth_byte).unwrap_or(AuthType::None);
        let len_at = if auth.has_auth_code() { 29 } else { 13 };
        let Some(msg) = frame
            .get(len_at)
            .and_then(|&len| frame.get(len_at + 1..len_at + 1 + usize::from(len)))
        else {
            return Vec::new();
        };
        let Some(outer) = Message::parse(msg) else {
            return Vec::new();
        };

        // Peel Send Message envelopes down to the target's request.
        let mut layers = vec![];
        let mut current = outer;
        while current.is_send_message() {
            let Some(inner) = Message::parse(&current.data[1..]) else {
                return Vec::new();
            };
            layers.push(current);
            current = inner;
        }
        self.max_bridge_depth = self.max_bridge_depth.max(layers.len());

        let payload = self.execute(&current);
        let pre_session = matches!(current.cmd, 0x38..=0x3A) && current.netfn == netfn::APP;
        let target_reply = current.reply(&payload);

        let message = if layers.is_empty() {
            target_reply
        } else if self.bridge_reply == BridgeReply::AckThenReply {
            let ack = self.frame(auth, false, &layers[0].reply(&[0x00]));
            self.pending = Some(self.frame(auth, false, &target_reply));
            return ack;
        } else {
            let mut nested = target_reply;
            for layer in layers.iter().rev() {
                nested = layer.reply(&ok(&nested));
            }
            nested
        };
        self.frame(auth, pre_session, &message)
    }

    fn frame(&mut self, auth: AuthType, pre_session: bool, message: &[u8]) -> Vec<u8> {
        let (seq, session_id) = if pre_session {
            (0, 0)
        } else {
            if !self.repeat_seq {
                self.last_seq = self.next_seq;
                self.next_seq = self.next_seq.wrapping_add(1);
            }
            (self.last_seq, SESSION_ID)
        };
        let header = SessionHeader {
            auth,
            seq,
            session_id,
            auth_code: auth.has_auth_code().then_some([0u8; 16]),
        };
        encode_frame(&header, message).unwrap_or_default()
    }

    fn execute(&mut self, req: &Message) -> Vec<u8> {
        let target = req.rs_addr;
        let d = req.data.as_slice();
        match (req.netfn, req.cmd) {
            (netfn::APP, 0x01) => {
                let [m0, m1, m2, _] = self.manufacturer_id.to_le_bytes();
                ok(&[target, 0x01, 0x01, 0x00, 0x51, 0xBF, m0, m1, m2, 0x01, 0x00, 0, 0, 0, 0])
            }
            (netfn::APP, 0x38) => ok(&[0x01, self.auth_types, 0x04, 0x00, 0, 0, 0, 0]),
            (netfn::APP, 0x39) => {
                let mut data = TEMP_SESSION_ID.to_le_bytes().to_vec();
                data.extend([0xA5; 16]);
                ok(&data)
            }
            (netfn::APP, 0x3A) => {
                if d.len() < 22 {
                    return cc(0xC7);
                }
                self.handshakes += 1;
                self.next_seq = u32::from_le_bytes([d[18], d[19], d[20], d[21]]);
                let mut data = vec![d[0]];
                data.extend(SESSION_ID.to_le_bytes());
                data.extend(INITIAL_INBOUND_SEQ.to_le_bytes());
                data.push(d[1]);
                ok(&data)
            }
            (netfn::APP, 0x3B) => ok(&[d.first().copied().unwrap_or(0x04)]),
            (netfn::APP, 0x3C) => {
                self.closes += 1;
                ok(&[])
            }
            (netfn::CHASSIS, 0x01) => ok(&[0x01, 0x00, 0x00, 0x00]),
            (netfn::CHASSIS, 0x02) => {
                self.chassis_controls.push(d.first().copied().unwrap_or(0));
                ok(&[])
            }
            (netfn::STORAGE, 0x20) => match self.sdr.get(&target) {
                Some(records) => {
                    let [c0, c1] = (records.len() as u16).to_le_bytes();
                    let ts = self.sdr_timestamp.to_le_bytes();
                    let mut data = vec![0x51, c0, c1, 0xFF, 0xFF];
                    data.extend(ts);
                    data.extend([0, 0, 0, 0, 0x0F]);
                    ok(&data)
                }
                None => cc(completion_code::NOT_PRESENT),
            },
            (netfn::SENSOR, 0x20) => match self.sdr.get(&target) {
                Some(records) => ok(&[records.len() as u8, 0x01]),
                None => cc(completion_code::NOT_PRESENT),
            },
            (netfn::STORAGE, 0x22) | (netfn::SENSOR, 0x22) => ok(&[0x34, 0x12]),
            (netfn::STORAGE, 0x23) | (netfn::SENSOR, 0x21) => self.sdr_slice(target, d),
            (netfn::STORAGE, 0x10) => {
                let fru_id = d.first().copied().unwrap_or(0);
                match self.fru.get(&(target, fru_id)) {
                    Some(image) => {
                        let [s0, s1] = (image.len() as u16).to_le_bytes();
                        ok(&[s0, s1, 0x00])
                    }
                    None => cc(completion_code::NOT_PRESENT),
                }
            }
            (netfn::STORAGE, 0x11) => self.fru_slice(target, d),
            (netfn::SENSOR, 0x2D) => {
                self.sensor_reads += 1;
                let number = d.first().copied().unwrap_or(0);
                match self.readings.get(&(target, number)) {
                    Some(&raw) => ok(&[raw, 0xC0, 0x00]),
                    None => cc(completion_code::NOT_PRESENT),
                }
            }
            (netfn::PICMG, cmd) => self.picmg(target, cmd, d),
            _ => cc(0xC1),
        }
    }

    fn sdr_slice(&mut self, target: u8, d: &[u8]) -> Vec<u8> {
        if d.len() < 6 {
            return cc(0xC7);
        }
        if self.cancel_reservations > 0 {
            self.cancel_reservations -= 1;
            return cc(completion_code::RESERVATION_CANCELED);
        }
        let Some(records) = self.sdr.get(&target) else {
            return cc(completion_code::NOT_PRESENT);
        };
        let id = usize::from(u16::from_le_bytes([d[2], d[3]]));
        let (offset, count) = (usize::from(d[4]), usize::from(d[5]));
        if count > MAX_SDR_SLICE {
            return cc(completion_code::CANNOT_RETURN_BYTES);
        }
        let Some(record) = records.get(id) else {
            return cc(completion_code::NOT_PRESENT);
        };
        let next = if id + 1 < records.len() {
            id as u16 + 1
        } else {
            self.sdr_loop_back.get(&target).copied().unwrap_or(0xFFFF)
        };
        let end = (offset + count).min(record.len());
        let mut data = next.to_le_bytes().to_vec();
        data.extend(record.get(offset..end).unwrap_or_default());
        ok(&data)
    }

    fn fru_slice(&self, target: u8, d: &[u8]) -> Vec<u8> {
        if d.len() < 4 {
            return cc(0xC7);
        }
        let Some(image) = self.fru.get(&(target, d[0])) else {
            return cc(completion_code::NOT_PRESENT);
        };
        let offset = usize::from(u16::from_le_bytes([d[1], d[2]]));
        if offset >= image.len() {
            return cc(completion_code::PARAMETER_OUT_OF_RANGE);
        }
        let end = (offset + usize::from(d[3])).min(image.len());
        let mut data = vec![(end - offset) as u8];
        data.extend(&image[offset..end]);
        ok(&data)
    }

    fn picmg(&mut self, target: u8, cmd: u8, d: &[u8]) -> Vec<u8> {
        let fru_id = d.get(1).copied().unwrap_or(0);
        match cmd {
            0x01 => ok(&[0x00, 0x41, target, 0xFF, fru_id, fru_id.max(1), 0x00]),
            0x0C => {
                self.activations
                    .push((target, fru_id, d.get(2).copied() == Some(1)));
                ok(&[0x00])
            }
            0x12 => ok(&[0x00, 0x01, 0x00, 0x0A, 0x02, 0x04]),
            0x14 => ok(&[0x00, 0x00, 0x0F, 0x08, 0x80]),
            0x15 => {
                self.fan_levels
                    .insert((target, fru_id), d.get(2).copied().unwrap_or(0));
                ok(&[0x00])
            }
            0x16 => {
                let level = self.fan_levels.get(&(target, fru_id)).copied().unwrap_or(0xFF);
                ok(&[0x00, level, 0x08, 0x01])
            }
            _ => cc(0xC1),
        }
    }
}

/// Cloneable transport handle onto a shared [`SimController`].
#[derive(Debug, Clone)]
pub(crate) struct SimTransport(Arc<Mutex<SimController>>);

impl SimTransport {
    pub(crate) fn new(controller: SimController) -> Self {
        Self(Arc::new(Mutex::new(controller)))
    }

    /// Inspect or change the controller.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut SimController) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl Transport for SimTransport {
    fn write_read(&self, request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        Ok(self.with(|c| c.handle(request)))
    }

    fn read(&self, _timeout: Duration) -> Result<Vec<u8>> {
        Ok(self.with(|c| {
            if c.silent {
                return Vec::new();
            }
            c.pending.take().unwrap_or_default()
        }))
    }
}
