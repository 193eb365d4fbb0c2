#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A virtual IPMI v1.5 Baseboard Management Controller.
//!
//! The crate serves IPMI-over-LAN so that stock tooling
//! (`ipmitool -I lan ... chassis power on|off|cycle|reset|soft|status`) can drive a software
//! stand-in for server hardware. It implements:
//! - RMCP framing and the IPMI v1.5 session wrapper
//! - NONE, straight-password and MD5 session authentication
//! - the session handshake (challenge, activate, privilege, close)
//! - Chassis status, control and boot-device commands, delegated to a [`PowerTarget`]
//! - ASF presence ping/pong
//!
//! [`Bmc`] is the engine: it owns users, sessions, targets and the command table, and
//! turns one inbound datagram into at most one reply. The `transport` module feeds it
//! from UDP sockets.

pub mod commands;
pub mod config;
pub mod crypto;
mod debug;
pub mod dispatch;
mod error;
mod observe;
pub mod protocol;
pub mod server;
pub mod session;
pub mod target;
pub mod transport;
mod types;

pub use crate::config::Config;
pub use crate::crypto::SecretBytes;
pub use crate::error::{Error, Result};
pub use crate::server::{Bmc, BmcBuilder, BmcState};
pub use crate::session::{Session, SessionRegistry, SessionState, User};
pub use crate::target::{PowerTarget, SimulatedMachine, TargetMap, VirtualBoxMachine};
pub use crate::types::{
    AuthType, BootDevice, ChassisControl, ChassisStatus, DeviceIdentity, PrivilegeLevel,
    power_state,
};

#[cfg(feature = "blocking")]
pub use crate::transport::blocking::UdpServer as BlockingUdpServer;
#[cfg(feature = "async")]
pub use crate::transport::tokio::UdpServer;
