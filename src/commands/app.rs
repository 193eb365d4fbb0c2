//! App network function: device identity and the IPMI v1.5 session handshake.

use rand::Rng;

use crate::dispatch::{Command, Handler, Outcome, Request, Response, SessionScope};
use crate::error::Error;
use crate::observe;
use crate::protocol::{cmd, completion, netfn};
use crate::server::BmcState;
use crate::session::{CHALLENGE_LEN, MAX_USERNAME_LEN, SessionState};
use crate::types::{AuthType, PrivilegeLevel};

/// Channel number reported when the request asks for "this channel".
const CURRENT_CHANNEL: u8 = 0x0E;
const LAN_CHANNEL: u8 = 0x01;

const LOGIN_ANONYMOUS: u8 = 0x01;
const LOGIN_NULL_USER: u8 = 0x02;
const LOGIN_NON_NULL_USER: u8 = 0x04;

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy, Default)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = cmd::GET_DEVICE_ID;
}

impl Handler for GetDeviceId {
    fn handle(&self, state: &BmcState, _request: &Request<'_>) -> Outcome {
        Response::ok(state.device().to_bytes()).into()
    }
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
///
/// Answers before any session exists. Reports the enabled authentication types and which
/// kinds of login the user table allows.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetChannelAuthCapabilities;

impl Command for GetChannelAuthCapabilities {
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = cmd::GET_CHANNEL_AUTH_CAPABILITIES;
}

impl Handler for GetChannelAuthCapabilities {
    fn scope(&self) -> SessionScope {
        SessionScope::Sessionless
    }

    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome {
        let &[channel, privilege, ..] = request.data() else {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        };
        if PrivilegeLevel::from_u8(privilege).is_none() {
            return Response::code(completion::INVALID_DATA_FIELD).into();
        }
        let channel = match channel & 0x0F {
            CURRENT_CHANNEL => LAN_CHANNEL,
            other => other,
        };

        let auth_mask = state
            .auth_types()
            .iter()
            .fold(0u8, |mask, t| mask | t.capability_bit());

        let mut login = 0u8;
        for user in state.users().iter() {
            if !user.name().is_empty() {
                login |= LOGIN_NON_NULL_USER;
            } else if user.secret().is_empty() {
                login |= LOGIN_ANONYMOUS;
            } else {
                login |= LOGIN_NULL_USER;
            }
        }

        // OEM id and aux data stay zero.
        Response::ok([channel, auth_mask, login, 0x00, 0x00, 0x00, 0x00, 0x00]).into()
    }
}

/// `Get Session Challenge` (App NetFn, cmd 0x39).
///
/// Creates a pending session and hands back its temporary id with a random challenge.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetSessionChallenge;

impl Command for GetSessionChallenge {
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = cmd::GET_SESSION_CHALLENGE;
}

impl Handler for GetSessionChallenge {
    fn scope(&self) -> SessionScope {
        SessionScope::Sessionless
    }

    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome {
        let data = request.data();
        if data.len() < 1 + MAX_USERNAME_LEN {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        }
        let auth_type = match AuthType::from_u8(data[0] & 0x0F) {
            Some(t) if state.auth_type_enabled(t) => t,
            _ => return Response::code(completion::INVALID_DATA_FIELD).into(),
        };

        let name_field = &data[1..1 + MAX_USERNAME_LEN];
        let Some(user) = state.users().find(name_field) else {
            let code = if name_field.iter().all(|&b| b == 0) {
                completion::NULL_USER_DISABLED
            } else {
                completion::INVALID_USER_OR_LEVEL
            };
            observe::unknown_user(request.peer);
            return Response::code(code).into();
        };

        match state.sessions().create_pending(user.clone(), auth_type) {
            Ok(handle) => {
                let session = handle.snapshot();
                observe::session_opened(session.id(), request.peer);
                let mut body = Vec::with_capacity(4 + CHALLENGE_LEN);
                body.extend_from_slice(&session.id().to_le_bytes());
                body.extend_from_slice(session.challenge());
                Response::ok(body).into()
            }
            Err(Error::SessionLimit(limit)) => {
                observe::session_limit(limit);
                Response::code(completion::NODE_BUSY).into()
            }
            Err(err) => {
                observe::handler_failed(Self::NETFN, Self::CMD, &err);
                Response::code(completion::UNSPECIFIED).into()
            }
        }
    }
}

/// `Activate Session` (App NetFn, cmd 0x3A).
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivateSession;

impl Command for ActivateSession {
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = cmd::ACTIVATE_SESSION;
}

impl Handler for ActivateSession {
    fn scope(&self) -> SessionScope {
        SessionScope::Activating
    }

    fn handle(&self, _state: &BmcState, request: &Request<'_>) -> Outcome {
        let Some(handle) = request.session else {
            return Outcome::Ignore;
        };
        let data = request.data();
        if data.len() < 2 + CHALLENGE_LEN + 4 {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        }
        let requested_auth = data[0] & 0x0F;
        let requested_privilege = data[1];
        let challenge = &data[2..2 + CHALLENGE_LEN];
        let outbound_start = u32::from_le_bytes([data[18], data[19], data[20], data[21]]);

        handle.with(|session| -> Outcome {
            if session.state() != SessionState::Pending {
                return Response::code(completion::INVALID_SESSION_ID).into();
            }
            if requested_auth != session.auth_type().as_u8() {
                return Response::code(completion::INVALID_DATA_FIELD).into();
            }
            if !crate::crypto::ct_eq(challenge, session.challenge()) {
                observe::challenge_mismatch(session.id(), request.peer);
                return Outcome::Ignore;
            }
            let Some(privilege) = PrivilegeLevel::from_u8(requested_privilege) else {
                return Response::code(completion::INVALID_DATA_FIELD).into();
            };
            if privilege > session.user().max_privilege() {
                return Response::code(completion::PRIVILEGE_EXCEEDS_LIMIT).into();
            }
            if outbound_start == 0 {
                return Response::code(completion::SEQUENCE_OUT_OF_RANGE).into();
            }

            let inbound_start: u32 = rand::rng().random_range(1..=u32::MAX);
            session.activate(privilege, outbound_start, inbound_start);
            observe::session_activated(session.id(), privilege);

            let mut body = Vec::with_capacity(10);
            body.push(session.auth_type().as_u8());
            body.extend_from_slice(&session.id().to_le_bytes());
            body.extend_from_slice(&inbound_start.to_le_bytes());
            body.push(privilege.as_u8());
            Response::ok(body).into()
        })
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
#[derive(Debug, Clone, Copy, Default)]
pub struct SetSessionPrivilegeLevel;

impl Command for SetSessionPrivilegeLevel {
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = cmd::SET_SESSION_PRIVILEGE;
}

impl Handler for SetSessionPrivilegeLevel {
    fn privilege(&self) -> PrivilegeLevel {
        PrivilegeLevel::Callback
    }

    fn handle(&self, _state: &BmcState, request: &Request<'_>) -> Outcome {
        let Some(handle) = request.session else {
            return Outcome::Ignore;
        };
        let Some(&requested) = request.data().first() else {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        };

        handle.with(|session| -> Outcome {
            if requested & 0x0F == 0 {
                return Response::ok([session.privilege().as_u8()]).into();
            }
            let Some(privilege) = PrivilegeLevel::from_u8(requested) else {
                return Response::code(completion::INVALID_DATA_FIELD).into();
            };
            if privilege > session.max_privilege() || privilege > session.user().max_privilege()
            {
                return Response::code(completion::INVALID_USER_OR_LEVEL).into();
            }
            session.set_privilege(privilege);
            Response::ok([privilege.as_u8()]).into()
        })
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
///
/// Any session may close itself; closing another one takes Administrator privilege. The
/// response still goes out on the closed session; the pipeline holds its own handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseSession;

impl Command for CloseSession {
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = cmd::CLOSE_SESSION;
}

impl Handler for CloseSession {
    fn privilege(&self) -> PrivilegeLevel {
        PrivilegeLevel::Callback
    }

    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome {
        let Some(own) = request.session else {
            return Outcome::Ignore;
        };
        let &[a, b, c, d, ..] = request.data() else {
            return Response::code(completion::REQUEST_DATA_LENGTH_INVALID).into();
        };
        let session_id = u32::from_le_bytes([a, b, c, d]);
        if session_id != own.id() && own.privilege() < PrivilegeLevel::Administrator {
            return Response::code(completion::INSUFFICIENT_PRIVILEGE).into();
        }
        match state.sessions().remove(session_id) {
            Some(_) => {
                observe::session_closed(session_id);
                Response::code(completion::OK).into()
            }
            None => Response::code(completion::INVALID_SESSION_ID_IN_REQUEST).into(),
        }
    }
}
