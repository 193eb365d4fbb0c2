mod common;

use std::sync::Arc;

use bmc::protocol::{SessionHeader, cmd, completion, netfn};
use bmc::{AuthType, PowerTarget, SessionState, SimulatedMachine};

use common::{Console, bmc_with, name_field, send};

#[test]
fn ipmitool_style_login_power_on_and_logout() {
    let machine = Arc::new(SimulatedMachine::new(false));
    let bmc = bmc_with(Arc::clone(&machine));

    // Pre-session: capabilities, then a challenge.
    let mut anon = Console::sessionless();
    let request = anon.encode(netfn::APP, cmd::GET_CHANNEL_AUTH_CAPABILITIES, &[0x0E, 0x04]);
    let reply = anon.check_reply(&send(&bmc, &request).expect("capabilities"));
    assert_eq!(reply.session, SessionHeader::unauthenticated());
    assert_eq!(reply.message.data[0], completion::OK);
    assert_ne!(reply.message.data[2] & (1 << AuthType::Md5.as_u8()), 0);

    let mut data = vec![AuthType::Md5.as_u8()];
    data.extend_from_slice(&name_field("admin"));
    let request = anon.encode(netfn::APP, cmd::GET_SESSION_CHALLENGE, &data);
    let reply = anon.check_reply(&send(&bmc, &request).expect("challenge"));
    assert_eq!(reply.session, SessionHeader::unauthenticated());
    assert_eq!(reply.message.data[0], completion::OK);
    let body = &reply.message.data[1..];
    let session_id = u32::from_le_bytes(body[..4].try_into().expect("id"));
    let challenge = body[4..20].to_vec();

    // Activate with the challenge; the reply is signed with sequence 0.
    let mut console = Console::in_session(session_id, AuthType::Md5, "pass", 0);
    let outbound_start: u32 = 0x0000_0010;
    let mut data = vec![AuthType::Md5.as_u8(), 0x04];
    data.extend_from_slice(&challenge);
    data.extend_from_slice(&outbound_start.to_le_bytes());
    let request = console.encode(netfn::APP, cmd::ACTIVATE_SESSION, &data);
    let reply = console.check_reply(&send(&bmc, &request).expect("activate"));
    assert_eq!(reply.session.session_id, session_id);
    assert_eq!(reply.session.sequence, 0);
    assert_eq!(reply.session.auth_type, AuthType::Md5);
    let body = &reply.message.data;
    assert_eq!(body[0], completion::OK);
    assert_eq!(body[1], AuthType::Md5.as_u8());
    assert_eq!(u32::from_le_bytes(body[2..6].try_into().expect("id")), session_id);
    let inbound_start = u32::from_le_bytes(body[6..10].try_into().expect("seq"));
    assert_eq!(body[10], 0x04);

    console.sequence = inbound_start;

    let request = console.encode(netfn::APP, cmd::SET_SESSION_PRIVILEGE, &[0x04]);
    let reply = console.check_reply(&send(&bmc, &request).expect("privilege"));
    assert_eq!(reply.message.data, vec![completion::OK, 0x04]);
    assert_eq!(reply.session.sequence, outbound_start);

    let request = console.encode(netfn::CHASSIS, cmd::CHASSIS_CONTROL, &[0x01]);
    let reply = console.check_reply(&send(&bmc, &request).expect("power on"));
    assert_eq!(reply.message.data, vec![completion::OK]);
    assert_eq!(reply.session.sequence, outbound_start + 1);
    assert!(machine.is_running().expect("state"));

    let request = console.encode(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
    let reply = console.check_reply(&send(&bmc, &request).expect("status"));
    assert_eq!(reply.message.data[1] & 0x01, 0x01);
    assert_eq!(reply.session.sequence, outbound_start + 2);

    let session = bmc.sessions().lookup(session_id).expect("session").snapshot();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.local_sequence(), outbound_start + 2);
    assert_eq!(session.remote_sequence(), inbound_start.wrapping_add(2));

    let request = console.encode(netfn::APP, cmd::CLOSE_SESSION, &session_id.to_le_bytes());
    let reply = console.check_reply(&send(&bmc, &request).expect("close"));
    assert_eq!(reply.message.data, vec![completion::OK]);
    assert!(bmc.sessions().is_empty());

    let request = console.encode(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
    assert!(send(&bmc, &request).is_none());
}

#[test]
fn straight_password_session() {
    let machine = Arc::new(SimulatedMachine::new(true));
    let bmc = bmc_with(machine);

    let mut anon = Console::sessionless();
    let mut data = vec![AuthType::Password.as_u8()];
    data.extend_from_slice(&name_field("admin"));
    let request = anon.encode(netfn::APP, cmd::GET_SESSION_CHALLENGE, &data);
    let reply = anon.check_reply(&send(&bmc, &request).expect("challenge"));
    let body = &reply.message.data[1..];
    let session_id = u32::from_le_bytes(body[..4].try_into().expect("id"));

    let mut console = Console::in_session(session_id, AuthType::Password, "pass", 0);
    let mut data = vec![AuthType::Password.as_u8(), 0x02];
    data.extend_from_slice(&body[4..20]);
    data.extend_from_slice(&1u32.to_le_bytes());
    let request = console.encode(netfn::APP, cmd::ACTIVATE_SESSION, &data);
    let reply = console.check_reply(&send(&bmc, &request).expect("activate"));
    assert_eq!(reply.session.auth_code[..4], *b"pass");
    console.sequence = u32::from_le_bytes(reply.message.data[6..10].try_into().expect("seq"));

    let request = console.encode(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
    let reply = console.check_reply(&send(&bmc, &request).expect("status"));
    assert_eq!(reply.message.data, vec![completion::OK, 0x01, 0, 0, 0]);
    assert_eq!(reply.session.sequence, 1);
}

#[test]
fn wrong_password_is_logged_but_answered() {
    let machine = Arc::new(SimulatedMachine::new(false));
    let bmc = bmc_with(machine);
    bmc.sessions()
        .insert(bmc::Session::active(7, common::admin(), AuthType::Md5, 0, 0))
        .expect("insert");

    let mut console = Console::in_session(7, AuthType::Md5, "wrong", 1);
    let request = console.encode(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
    let reply = send(&bmc, &request).expect("advisory authentication still answers");
    let frame = bmc::protocol::IpmiFrame::decode(&reply).expect("decode");
    assert_eq!(frame.message.data[0], completion::OK);
}
