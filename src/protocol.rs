//! RMCP / IPMI v1.5 LAN wire codec.
//!
//! Every structure has an explicit `encode`/`decode` pair; nothing relies on in-memory layout.
//! The IPMI v1.5 session header carries its sequence number and session id least-significant
//! byte first. ASF presence messages carry the IANA enterprise number most-significant byte
//! first. All other fields are single bytes.

use crate::error::{Error, Result};
use crate::types::AuthType;

/// RMCP header values.
pub const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
/// RMCP sequence number meaning "no RMCP ACK requested".
pub const RMCP_SEQ_NO_ACK: u8 = 0xFF;
/// RMCP message class: IPMI.
pub const RMCP_CLASS_IPMI: u8 = 0x07;
/// RMCP message class: ASF.
pub const RMCP_CLASS_ASF: u8 = 0x06;
const RMCP_CLASS_ACK_BIT: u8 = 0x80;

const ASF_IANA: u32 = 0x0000_11BE;
const ASF_TYPE_PING: u8 = 0x80;
const ASF_TYPE_PONG: u8 = 0x40;
const ASF_ENTITIES_IPMI: u8 = 0x81;

/// Width of the authentication code field.
pub const AUTH_CODE_LEN: usize = 16;

/// Bytes of an IPMI LAN message that surround the data field.
const MESSAGE_OVERHEAD: usize = 7;

/// Largest data field that still fits the one-byte message length.
pub const MAX_MESSAGE_DATA: usize = u8::MAX as usize - MESSAGE_OVERHEAD;

/// Default responder (BMC) slave address.
pub const BMC_SLAVE_ADDR: u8 = 0x20;

/// Network function codes (request values; responses add [`netfn::RESPONSE`]).
pub mod netfn {
    /// Chassis.
    pub const CHASSIS: u8 = 0x00;
    /// Application.
    pub const APP: u8 = 0x06;
    /// Marker bit for responses.
    pub const RESPONSE: u8 = 0x01;
}

/// Command codes handled by this crate.
pub mod cmd {
    /// App: Get Device ID.
    pub const GET_DEVICE_ID: u8 = 0x01;
    /// App: Get Channel Authentication Capabilities.
    pub const GET_CHANNEL_AUTH_CAPABILITIES: u8 = 0x38;
    /// App: Get Session Challenge.
    pub const GET_SESSION_CHALLENGE: u8 = 0x39;
    /// App: Activate Session.
    pub const ACTIVATE_SESSION: u8 = 0x3A;
    /// App: Set Session Privilege Level.
    pub const SET_SESSION_PRIVILEGE: u8 = 0x3B;
    /// App: Close Session.
    pub const CLOSE_SESSION: u8 = 0x3C;

    /// Chassis: Get Chassis Capabilities.
    pub const GET_CHASSIS_CAPABILITIES: u8 = 0x00;
    /// Chassis: Get Chassis Status.
    pub const GET_CHASSIS_STATUS: u8 = 0x01;
    /// Chassis: Chassis Control.
    pub const CHASSIS_CONTROL: u8 = 0x02;
    /// Chassis: Chassis Identify.
    pub const CHASSIS_IDENTIFY: u8 = 0x04;
    /// Chassis: Set System Boot Options.
    pub const SET_SYSTEM_BOOT_OPTIONS: u8 = 0x08;
    /// Chassis: Get System Boot Options.
    pub const GET_SYSTEM_BOOT_OPTIONS: u8 = 0x09;
}

/// Completion codes.
pub mod completion {
    /// Command completed normally.
    pub const OK: u8 = 0x00;
    /// Get Session Challenge: invalid user name.
    /// Set Session Privilege Level: level not available for this user.
    pub const INVALID_USER_OR_LEVEL: u8 = 0x81;
    /// Get Session Challenge: null user name not enabled.
    pub const NULL_USER_DISABLED: u8 = 0x82;
    /// Activate Session: session sequence number out of range.
    pub const SEQUENCE_OUT_OF_RANGE: u8 = 0x84;
    /// Activate Session: invalid session id.
    pub const INVALID_SESSION_ID: u8 = 0x85;
    /// Activate Session: requested maximum privilege exceeds the user's limit.
    pub const PRIVILEGE_EXCEEDS_LIMIT: u8 = 0x86;
    /// Close Session: invalid session id in request.
    pub const INVALID_SESSION_ID_IN_REQUEST: u8 = 0x87;
    /// Node busy.
    pub const NODE_BUSY: u8 = 0xC0;
    /// Request data length invalid.
    pub const REQUEST_DATA_LENGTH_INVALID: u8 = 0xC7;
    /// Session privilege is below what the command requires.
    pub const INSUFFICIENT_PRIVILEGE: u8 = 0xD4;
    /// Invalid data field in request.
    pub const INVALID_DATA_FIELD: u8 = 0xCC;
    /// Unspecified error.
    pub const UNSPECIFIED: u8 = 0xFF;
}

/// Compute the standard 2's complement checksum used by IPMI LAN messages.
pub(crate) fn ipmi_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

fn sums_to_zero(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

fn read_u32_le(bytes: &[u8], at: usize) -> Result<u32> {
    let raw: [u8; 4] = bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(Error::Protocol("truncated session header"))?;
    Ok(u32::from_le_bytes(raw))
}

/// The four-byte RMCP envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmcpHeader {
    /// RMCP sequence number.
    pub sequence: u8,
    /// Message class.
    pub class: u8,
}

impl RmcpHeader {
    /// Encoded length.
    pub const LEN: usize = 4;

    /// Envelope for an IPMI payload, no RMCP ACK requested.
    pub fn ipmi() -> Self {
        Self {
            sequence: RMCP_SEQ_NO_ACK,
            class: RMCP_CLASS_IPMI,
        }
    }

    /// Append the encoded header.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[RMCP_VERSION, RMCP_RESERVED, self.sequence, self.class]);
    }

    /// Decode the first four bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let &[version, _reserved, sequence, class, ..] = bytes else {
            return Err(Error::Protocol("packet too short for RMCP header"));
        };
        if version != RMCP_VERSION {
            return Err(Error::Protocol("unexpected RMCP version"));
        }
        if class & RMCP_CLASS_ACK_BIT != 0 {
            return Err(Error::Unsupported("RMCP ACK messages are not handled"));
        }
        Ok(Self { sequence, class })
    }
}

/// IPMI v1.5 session header ("session wrapper"), minus the message length which is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHeader {
    /// Authentication type.
    pub auth_type: AuthType,
    /// Session sequence number.
    pub sequence: u32,
    /// Session id, `0` outside a session.
    pub session_id: u32,
    /// Authentication code. Not transmitted (and kept zero) when `auth_type` is NONE.
    pub auth_code: [u8; AUTH_CODE_LEN],
}

impl SessionHeader {
    /// Header used for pre-session traffic.
    pub fn unauthenticated() -> Self {
        Self {
            auth_type: AuthType::None,
            sequence: 0,
            session_id: 0,
            auth_code: [0; AUTH_CODE_LEN],
        }
    }

    /// Encoded length excluding the trailing message length byte.
    pub fn encoded_len(&self) -> usize {
        match self.auth_type {
            AuthType::None => 9,
            _ => 9 + AUTH_CODE_LEN,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.auth_type.as_u8());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.session_id.to_le_bytes());
        if self.auth_type != AuthType::None {
            out.extend_from_slice(&self.auth_code);
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw_type = *bytes
            .first()
            .ok_or(Error::Protocol("missing session header"))?;
        let auth_type = AuthType::from_u8(raw_type).ok_or_else(|| {
            Error::protocol_owned(format!("unsupported session auth type {raw_type:#04x}"))
        })?;
        let sequence = read_u32_le(bytes, 1)?;
        let session_id = read_u32_le(bytes, 5)?;

        let mut auth_code = [0u8; AUTH_CODE_LEN];
        if auth_type != AuthType::None {
            let code = bytes
                .get(9..9 + AUTH_CODE_LEN)
                .ok_or(Error::Protocol("truncated authentication code"))?;
            auth_code.copy_from_slice(code);
        }

        Ok(Self {
            auth_type,
            sequence,
            session_id,
            auth_code,
        })
    }
}

/// An IPMI LAN message.
///
/// Field names are positional: the first address/LUN pair is whoever the message is sent
/// to, the second is whoever sent it. For a request that is (BMC, console); for a response
/// the pairs swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiMessage {
    /// Destination slave address.
    pub target_addr: u8,
    /// Network function (6 bits).
    pub netfn: u8,
    /// Destination LUN (2 bits).
    pub target_lun: u8,
    /// Source address (software id for a remote console).
    pub source_addr: u8,
    /// Requester sequence number (6 bits).
    pub sequence: u8,
    /// Source LUN (2 bits).
    pub source_lun: u8,
    /// Command code.
    pub cmd: u8,
    /// Command-specific data. For responses, the completion code is the first byte.
    pub data: Vec<u8>,
}

impl IpmiMessage {
    /// Encoded length including both checksums.
    pub fn encoded_len(&self) -> usize {
        MESSAGE_OVERHEAD + self.data.len()
    }

    /// Whether the netfn carries the response marker.
    pub fn is_response(&self) -> bool {
        self.netfn & netfn::RESPONSE != 0
    }

    /// Encode with freshly computed checksums.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        let netfn_lun = ((self.netfn & 0x3F) << 2) | (self.target_lun & 0x03);
        out.push(self.target_addr);
        out.push(netfn_lun);
        out.push(ipmi_checksum(&[self.target_addr, netfn_lun]));

        out.push(self.source_addr);
        out.push(((self.sequence & 0x3F) << 2) | (self.source_lun & 0x03));
        out.push(self.cmd);
        out.extend_from_slice(&self.data);

        let csum = ipmi_checksum(&out[start + 3..]);
        out.push(csum);
    }

    /// Decode exactly one message occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MESSAGE_OVERHEAD {
            return Err(Error::Protocol("IPMI message too short"));
        }
        if !sums_to_zero(&bytes[..3]) {
            return Err(Error::Protocol("invalid IPMI header checksum"));
        }
        if !sums_to_zero(&bytes[3..]) {
            return Err(Error::Protocol("invalid IPMI data checksum"));
        }

        Ok(Self {
            target_addr: bytes[0],
            netfn: bytes[1] >> 2,
            target_lun: bytes[1] & 0x03,
            source_addr: bytes[3],
            sequence: bytes[4] >> 2,
            source_lun: bytes[4] & 0x03,
            cmd: bytes[5],
            data: bytes[6..bytes.len() - 1].to_vec(),
        })
    }

    /// Build the response to this request: addresses swapped, response netfn, same
    /// command and requester sequence, data prefixed with `completion_code`.
    pub fn response(&self, completion_code: u8, body: &[u8]) -> Self {
        let mut data = Vec::with_capacity(1 + body.len());
        data.push(completion_code);
        data.extend_from_slice(body);
        Self {
            target_addr: self.source_addr,
            netfn: self.netfn | netfn::RESPONSE,
            target_lun: self.source_lun,
            source_addr: self.target_addr,
            sequence: self.sequence,
            source_lun: self.target_lun,
            cmd: self.cmd,
            data,
        }
    }
}

/// A complete RMCP + session + IPMI message datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiFrame {
    /// RMCP envelope.
    pub rmcp: RmcpHeader,
    /// Session wrapper.
    pub session: SessionHeader,
    /// The wrapped message.
    pub message: IpmiMessage,
}

impl IpmiFrame {
    /// Encode the datagram.
    ///
    /// Fails only when the message data exceeds [`MAX_MESSAGE_DATA`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let msg_len: u8 = self
            .message
            .encoded_len()
            .try_into()
            .map_err(|_| Error::InvalidArgument("IPMI message too long for session wrapper"))?;

        let mut out = Vec::with_capacity(
            RmcpHeader::LEN + self.session.encoded_len() + 1 + msg_len as usize,
        );
        self.rmcp.encode_into(&mut out);
        self.session.encode_into(&mut out);
        out.push(msg_len);
        self.message.encode_into(&mut out);
        Ok(out)
    }

    /// Decode an IPMI-class datagram.
    ///
    /// Bytes after the declared message length are ignored (some consoles append a legacy
    /// pad byte); a buffer shorter than the declared length is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rmcp = RmcpHeader::decode(bytes)?;
        if rmcp.class != RMCP_CLASS_IPMI {
            return Err(Error::Protocol("not an IPMI-class RMCP message"));
        }
        Self::decode_body(rmcp, &bytes[RmcpHeader::LEN..])
    }

    fn decode_body(rmcp: RmcpHeader, body: &[u8]) -> Result<Self> {
        let session = SessionHeader::decode(body)?;
        let len_at = session.encoded_len();
        let msg_len = *body
            .get(len_at)
            .ok_or(Error::Protocol("missing message length"))? as usize;
        let message_bytes = body
            .get(len_at + 1..len_at + 1 + msg_len)
            .ok_or(Error::Protocol("truncated IPMI message"))?;
        let message = IpmiMessage::decode(message_bytes)?;

        Ok(Self {
            rmcp,
            session,
            message,
        })
    }
}

/// ASF presence ping / pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsfPresence {
    /// RMCP sequence number, echoed in the pong.
    pub rmcp_sequence: u8,
    /// ASF message tag, echoed in the pong.
    pub tag: u8,
}

impl AsfPresence {
    const HEADER_LEN: usize = 8;
    const PONG_DATA_LEN: u8 = 16;

    fn decode_body(rmcp: RmcpHeader, body: &[u8]) -> Result<Self> {
        if body.len() < Self::HEADER_LEN {
            return Err(Error::Protocol("ASF message too short"));
        }
        let iana = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        if iana != ASF_IANA {
            return Err(Error::Protocol("unexpected ASF IANA number"));
        }
        if body[4] != ASF_TYPE_PING {
            return Err(Error::Unsupported("only ASF presence ping is handled"));
        }
        Ok(Self {
            rmcp_sequence: rmcp.sequence,
            tag: body[5],
        })
    }

    /// Encode a ping (what a console sends).
    pub fn encode_ping(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RmcpHeader::LEN + Self::HEADER_LEN);
        RmcpHeader {
            sequence: self.rmcp_sequence,
            class: RMCP_CLASS_ASF,
        }
        .encode_into(&mut out);
        out.extend_from_slice(&ASF_IANA.to_be_bytes());
        out.extend_from_slice(&[ASF_TYPE_PING, self.tag, 0x00, 0x00]);
        out
    }

    /// Encode the presence pong answering this ping, advertising IPMI support.
    pub fn encode_pong(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(RmcpHeader::LEN + Self::HEADER_LEN + Self::PONG_DATA_LEN as usize);
        RmcpHeader {
            sequence: self.rmcp_sequence,
            class: RMCP_CLASS_ASF,
        }
        .encode_into(&mut out);
        out.extend_from_slice(&ASF_IANA.to_be_bytes());
        out.extend_from_slice(&[ASF_TYPE_PONG, self.tag, 0x00, Self::PONG_DATA_LEN]);
        out.extend_from_slice(&ASF_IANA.to_be_bytes());
        // OEM-defined: none.
        out.extend_from_slice(&[0x00; 4]);
        out.push(ASF_ENTITIES_IPMI);
        // Supported interactions, then 6 reserved bytes.
        out.extend_from_slice(&[0x00; 7]);
        out
    }
}

/// Any datagram the BMC understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// IPMI v1.5 message.
    Ipmi(IpmiFrame),
    /// ASF presence ping.
    AsfPing(AsfPresence),
}

impl Packet {
    /// Decode a datagram by its RMCP class.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rmcp = RmcpHeader::decode(bytes)?;
        let body = &bytes[RmcpHeader::LEN..];
        match rmcp.class {
            RMCP_CLASS_IPMI => IpmiFrame::decode_body(rmcp, body).map(Self::Ipmi),
            RMCP_CLASS_ASF => AsfPresence::decode_body(rmcp, body).map(Self::AsfPing),
            _ => Err(Error::Unsupported("RMCP message class")),
        }
    }
}
