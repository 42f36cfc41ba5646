#![deny(unsafe_code)]
#![warn(missing_docs)]

//! IPMI v1.5 LAN engine for monitoring MicroTCA crates, ATCA shelves and
//! server BMCs.
//!
//! The crate implements:
//! - RMCP framing with single and double Send Message bridging
//! - Session activation with none, password and MD5 authentication
//! - SDR repository and FRU inventory reading
//! - Platform-aware topology discovery (Vadatech and N.A.T. MCHs, ATCA
//!   shelf managers, server BMCs)
//! - Sensor scanning with threshold evaluation
//! - A tokio supervisor that probes, rediscovers and scans each device
//!
//! A single [`Connection`] talks to one controller synchronously. A
//! [`device::DeviceRegistry`] owns many of them and
//! [`supervisor::spawn`] keeps them up to date in the background.

mod client;
mod crypto;
mod error;
mod observe;
mod types;

pub mod commands;
pub mod convert;
pub mod debug;
pub mod device;
pub mod fru;
pub mod platform;
pub mod protocol;
pub mod sdr;
pub mod session;
pub mod supervisor;
pub mod topology;
pub mod transport;

#[cfg(test)]
mod sim;

pub use crate::client::{Client, ClientBuilder, Connection};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::types::{
    ActivatedSession, AddressInfo, AuthType, ChannelAuthCapabilities, ChassisControl,
    ChassisStatus, DeviceId, FanLevel, FanProperties, FruAreaInfo, LastPowerEvent, PowerLevel,
    PowerRestorePolicy, PrivilegeLevel, RawResponse, RepositoryInfo, SensorReading,
    SessionChallenge, completion_code,
};
