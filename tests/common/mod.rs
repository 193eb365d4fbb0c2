#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use bmc::crypto::compute_auth_code;
use bmc::protocol::{BMC_SLAVE_ADDR, IpmiFrame, IpmiMessage, RmcpHeader, SessionHeader};
use bmc::{AuthType, Bmc, PrivilegeLevel, SecretBytes, SimulatedMachine, User};

pub const LOCAL: &str = "127.0.0.1:623";
pub const PEER: &str = "127.0.0.1:45000";

pub fn admin() -> User {
    User::new("admin", SecretBytes::from("pass"), PrivilegeLevel::Administrator).expect("user")
}

/// A BMC with user admin/pass and `machine` answering on 127.0.0.1.
pub fn bmc_with(machine: Arc<SimulatedMachine>) -> Bmc {
    let local: SocketAddr = LOCAL.parse().expect("addr");
    Bmc::builder()
        .user(admin())
        .target(local.ip(), machine)
        .build()
        .expect("bmc")
}

pub fn send(bmc: &Bmc, datagram: &[u8]) -> Option<Vec<u8>> {
    bmc.handle_datagram(
        LOCAL.parse().expect("addr"),
        PEER.parse().expect("addr"),
        datagram,
    )
}

/// A user name as the 16-byte NUL-padded field Get Session Challenge carries.
pub fn name_field(name: &str) -> [u8; 16] {
    let mut field = [0u8; 16];
    field[..name.len()].copy_from_slice(name.as_bytes());
    field
}

/// The requester side of an IPMI v1.5 LAN session, as ipmitool plays it.
pub struct Console {
    pub session_id: u32,
    pub auth_type: AuthType,
    pub sequence: u32,
    secret: SecretBytes,
    rq_seq: u8,
}

impl Console {
    pub fn sessionless() -> Self {
        Self::in_session(0, AuthType::None, "", 0)
    }

    pub fn in_session(session_id: u32, auth_type: AuthType, password: &str, sequence: u32) -> Self {
        Self {
            session_id,
            auth_type,
            sequence,
            secret: SecretBytes::from(password),
            rq_seq: 0,
        }
    }

    /// Encode the next request. The session sequence moves once it is non-zero.
    pub fn encode(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
        self.rq_seq = (self.rq_seq + 1) & 0x3F;
        let message = IpmiMessage {
            target_addr: BMC_SLAVE_ADDR,
            netfn,
            target_lun: 0,
            source_addr: 0x81,
            sequence: self.rq_seq,
            source_lun: 0,
            cmd,
            data: data.to_vec(),
        };
        let auth_code = compute_auth_code(
            self.auth_type,
            &self.secret,
            self.session_id,
            &message,
            self.sequence,
        )
        .expect("auth code");
        let frame = IpmiFrame {
            rmcp: RmcpHeader::ipmi(),
            session: SessionHeader {
                auth_type: self.auth_type,
                sequence: self.sequence,
                session_id: self.session_id,
                auth_code,
            },
            message,
        };
        if self.sequence != 0 {
            self.sequence = self.sequence.wrapping_add(1);
        }
        frame.encode().expect("encode")
    }

    /// Decode a reply and check it answers our last request and is correctly signed.
    pub fn check_reply(&self, bytes: &[u8]) -> IpmiFrame {
        let frame = IpmiFrame::decode(bytes).expect("decode reply");
        assert!(frame.message.is_response());
        assert_eq!(frame.message.sequence, self.rq_seq);
        assert_eq!(frame.message.target_addr, 0x81);
        assert_eq!(frame.message.source_addr, BMC_SLAVE_ADDR);

        let expected = compute_auth_code(
            frame.session.auth_type,
            &self.secret,
            frame.session.session_id,
            &frame.message,
            frame.session.sequence,
        )
        .expect("auth code");
        assert_eq!(frame.session.auth_code, expected, "reply auth code");
        frame
    }
}
