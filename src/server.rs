//! The BMC engine: state shared by handlers and the per-datagram request pipeline.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::crypto::{compute_auth_code, verify_auth_code};
use crate::debug;
use crate::dispatch::{Dispatcher, Outcome, Request, Response, Route, SessionScope};
use crate::error::{Error, Result};
use crate::observe;
use crate::protocol::{IpmiFrame, IpmiMessage, Packet, RmcpHeader, SessionHeader, completion};
use crate::session::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS, Session, SessionHandle, SessionRegistry, SessionState, User, UserStore,
};
use crate::target::{PowerTarget, TargetMap};
use crate::types::{AuthType, DeviceIdentity};

/// Standard RMCP port.
pub const DEFAULT_PORT: u16 = 623;

/// Everything handlers may read or mutate while serving a request.
#[derive(Debug)]
pub struct BmcState {
    users: UserStore,
    sessions: SessionRegistry,
    targets: TargetMap,
    device: DeviceIdentity,
    auth_types: Vec<AuthType>,
    strict_authentication: bool,
}

impl BmcState {
    /// Configured users.
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// The session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Local address to target map.
    pub fn targets(&self) -> &TargetMap {
        &self.targets
    }

    /// Target answering for the local address a datagram arrived on.
    pub fn target_for(&self, local: SocketAddr) -> Option<Arc<dyn PowerTarget>> {
        self.targets.get(local.ip())
    }

    /// Identity reported by Get Device ID.
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Authentication types offered to consoles.
    pub fn auth_types(&self) -> &[AuthType] {
        &self.auth_types
    }

    /// Whether consoles may open sessions with `auth_type`.
    pub fn auth_type_enabled(&self, auth_type: AuthType) -> bool {
        self.auth_types.contains(&auth_type)
    }

    /// Whether requests failing authentication are dropped.
    pub fn strict_authentication(&self) -> bool {
        self.strict_authentication
    }
}

/// An emulated BMC: decodes datagrams, runs commands against targets, encodes replies.
///
/// `Bmc` owns no sockets. The transports feed it datagrams through
/// [`Bmc::handle_datagram`]; tests can do the same.
#[derive(Debug)]
pub struct Bmc {
    state: BmcState,
    dispatcher: Dispatcher,
    port: u16,
}

/// Builder for [`Bmc`].
#[derive(Debug)]
pub struct BmcBuilder {
    users: Vec<User>,
    targets: TargetMap,
    device: DeviceIdentity,
    auth_types: Vec<AuthType>,
    max_sessions: usize,
    session_timeout: Duration,
    strict_authentication: bool,
    port: u16,
    dispatcher: Option<Dispatcher>,
}

impl Default for BmcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BmcBuilder {
    /// Create a new builder: no users, no targets, NONE/MD5/password authentication.
    pub fn new() -> Self {
        Self {
            users: Vec::new(),
            targets: TargetMap::new(),
            device: DeviceIdentity::default(),
            auth_types: vec![AuthType::None, AuthType::Md5, AuthType::Password],
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_timeout: DEFAULT_IDLE_TIMEOUT,
            strict_authentication: false,
            port: DEFAULT_PORT,
            dispatcher: None,
        }
    }

    /// Add a user account.
    pub fn user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Serve `target` for datagrams arriving on `addr`.
    pub fn target(mut self, addr: IpAddr, target: Arc<dyn PowerTarget>) -> Self {
        self.targets.insert(addr, target);
        self
    }

    /// Identity reported by Get Device ID.
    pub fn device(mut self, device: DeviceIdentity) -> Self {
        self.device = device;
        self
    }

    /// Authentication types offered to consoles. MD2 and OEM are rejected by [`Self::build`].
    pub fn auth_types(mut self, auth_types: impl IntoIterator<Item = AuthType>) -> Self {
        self.auth_types = auth_types.into_iter().collect();
        self
    }

    /// Maximum number of registered sessions (pending and active).
    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// How long a session may go without a request before it is discarded.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Drop requests whose authentication code does not verify instead of only logging.
    pub fn strict_authentication(mut self, strict: bool) -> Self {
        self.strict_authentication = strict;
        self
    }

    /// UDP port the transports bind on each target address.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replace the standard command table.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Build the BMC.
    pub fn build(self) -> Result<Bmc> {
        if self.auth_types.is_empty() {
            return Err(Error::InvalidArgument("at least one auth type must be enabled"));
        }
        if self
            .auth_types
            .iter()
            .any(|t| matches!(t, AuthType::Md2 | AuthType::Oem))
        {
            return Err(Error::Unsupported("only NONE, MD5 and password auth are served"));
        }
        if self.max_sessions == 0 {
            return Err(Error::InvalidArgument("max_sessions must be non-zero"));
        }
        if self.session_timeout.is_zero() {
            return Err(Error::InvalidArgument("session timeout must be non-zero"));
        }

        let mut auth_types = self.auth_types;
        auth_types.sort_by_key(|t| t.as_u8());
        auth_types.dedup();

        Ok(Bmc {
            state: BmcState {
                users: UserStore::new(self.users)?,
                sessions: SessionRegistry::with_idle_timeout(
                    self.max_sessions,
                    self.session_timeout,
                ),
                targets: self.targets,
                device: self.device,
                auth_types,
                strict_authentication: self.strict_authentication,
            },
            dispatcher: self.dispatcher.unwrap_or_else(Dispatcher::standard),
            port: self.port,
        })
    }
}

impl Bmc {
    /// Start building a BMC.
    pub fn builder() -> BmcBuilder {
        BmcBuilder::new()
    }

    /// Build a BMC from a parsed configuration file.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.to_builder()?.build()
    }

    /// Shared state handed to handlers.
    pub fn state(&self) -> &BmcState {
        &self.state
    }

    /// The session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.state.sessions
    }

    /// One UDP endpoint per target address.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        let mut endpoints: Vec<SocketAddr> = self
            .state
            .targets
            .addresses()
            .map(|ip| SocketAddr::new(ip, self.port))
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Process one inbound datagram received on `local` from `peer`.
    ///
    /// Returns the datagram to send back, or `None` when the request is dropped. Nothing
    /// here is fatal: every failure is logged and turned into "no reply".
    pub fn handle_datagram(
        &self,
        local: SocketAddr,
        peer: SocketAddr,
        datagram: &[u8],
    ) -> Option<Vec<u8>> {
        debug::dump_hex("rx", datagram);

        let frame = match Packet::decode(datagram) {
            Ok(Packet::Ipmi(frame)) => frame,
            Ok(Packet::AsfPing(ping)) => {
                observe::asf_ping(peer);
                let pong = ping.encode_pong();
                debug::dump_hex("tx", &pong);
                return Some(pong);
            }
            Err(err) => {
                observe::datagram_dropped(peer, &err);
                return None;
            }
        };

        let reply = self.handle_frame(local, peer, &frame)?;
        debug::dump_hex("tx", &reply);
        Some(reply)
    }

    fn handle_frame(
        &self,
        local: SocketAddr,
        peer: SocketAddr,
        frame: &IpmiFrame,
    ) -> Option<Vec<u8>> {
        let started = Instant::now();
        let header = &frame.session;
        let message = &frame.message;
        if message.is_response() {
            observe::datagram_dropped(peer, &Error::Protocol("response message sent to BMC"));
            return None;
        }

        let route = self.dispatcher.route(message.netfn, message.cmd);
        if matches!(route, Route::Unsupported) {
            observe::unsupported_command(peer, message.netfn, message.cmd);
        }
        let handler = route.handler();
        let scope = handler.scope();

        let session = match scope {
            SessionScope::Sessionless => None,
            SessionScope::Activating | SessionScope::Established => {
                Some(self.resolve_session(peer, header, message, scope)?)
            }
        };

        let request = Request {
            local,
            peer,
            header,
            message,
            session: session.as_ref(),
        };
        let denied = match (scope, &session) {
            (SessionScope::Established, Some(handle)) => {
                let have = handle.privilege();
                let need = handler.privilege();
                if have < need {
                    observe::insufficient_privilege(peer, handle.id(), have, need);
                }
                have < need
            }
            _ => false,
        };
        let response = if denied {
            Response::code(completion::INSUFFICIENT_PRIVILEGE)
        } else {
            match handler.handle(&self.state, &request) {
                Outcome::Respond(response) => response,
                Outcome::Ignore => {
                    observe::request_ignored(message.netfn, message.cmd);
                    return None;
                }
            }
        };

        let reply = message.response(response.completion_code, &response.data);
        let session_header = match (scope, &session) {
            (SessionScope::Activating, Some(handle)) => stamp(&handle.snapshot(), 0, &reply)?,
            (SessionScope::Established, Some(handle)) => {
                let (sequence, session) = handle.advance();
                stamp(&session, sequence, &reply)?
            }
            _ => SessionHeader::unauthenticated(),
        };

        let out = IpmiFrame {
            rmcp: RmcpHeader::ipmi(),
            session: session_header,
            message: reply,
        };
        match out.encode() {
            Ok(bytes) => {
                observe::request_handled(
                    message.netfn,
                    message.cmd,
                    header.session_id,
                    response.completion_code,
                    started.elapsed(),
                );
                Some(bytes)
            }
            Err(err) => {
                observe::handler_failed(message.netfn, message.cmd, &err);
                None
            }
        }
    }

    /// Look the session up and check the request's authentication code against it.
    fn resolve_session(
        &self,
        peer: SocketAddr,
        header: &SessionHeader,
        message: &IpmiMessage,
        scope: SessionScope,
    ) -> Option<SessionHandle> {
        let handle = match self.state.sessions.get(header.session_id) {
            Ok(handle) => handle,
            Err(err) => {
                observe::session_not_found(peer, &err);
                return None;
            }
        };
        let session = handle.snapshot();
        if scope == SessionScope::Established && session.state() != SessionState::Active {
            observe::session_not_active(peer, header.session_id);
            return None;
        }

        let verified = if header.auth_type == session.auth_type() {
            verify_auth_code(
                header.auth_type,
                session.user().secret(),
                session.id(),
                message,
                header.sequence,
                &header.auth_code,
            )
        } else {
            Err(Error::AuthenticationFailed("auth type differs from session"))
        };
        match verified {
            Ok(()) => observe::auth_verified(session.id()),
            Err(err) => {
                observe::auth_failed(peer, session.id(), &err);
                if self.state.strict_authentication {
                    return None;
                }
            }
        }
        Some(handle)
    }
}

/// Session wrapper for an outbound message, authenticated with the session's secret.
fn stamp(session: &Session, sequence: u32, reply: &IpmiMessage) -> Option<SessionHeader> {
    let auth_type = session.auth_type();
    match compute_auth_code(auth_type, session.user().secret(), session.id(), reply, sequence) {
        Ok(auth_code) => Some(SessionHeader {
            auth_type,
            sequence,
            session_id: session.id(),
            auth_code,
        }),
        Err(err) => {
            observe::handler_failed(reply.netfn, reply.cmd, &err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretBytes;
    use crate::protocol::{AsfPresence, BMC_SLAVE_ADDR, cmd, completion, netfn};
    use crate::target::SimulatedMachine;
    use crate::types::PrivilegeLevel;

    const LOCAL: &str = "127.0.0.1:623";
    const PEER: &str = "127.0.0.1:50000";

    fn bmc(strict: bool) -> Bmc {
        let local: SocketAddr = LOCAL.parse().expect("addr");
        Bmc::builder()
            .user(
                User::new("admin", SecretBytes::from("pass"), PrivilegeLevel::Administrator)
                    .expect("user"),
            )
            .target(local.ip(), Arc::new(SimulatedMachine::new(false)))
            .strict_authentication(strict)
            .build()
            .expect("bmc")
    }

    fn request(netfn: u8, cmd: u8, data: &[u8]) -> IpmiMessage {
        IpmiMessage {
            target_addr: BMC_SLAVE_ADDR,
            netfn,
            target_lun: 0,
            source_addr: 0x81,
            sequence: 3,
            source_lun: 0,
            cmd,
            data: data.to_vec(),
        }
    }

    fn send(bmc: &Bmc, header: SessionHeader, message: IpmiMessage) -> Option<IpmiFrame> {
        let bytes = IpmiFrame {
            rmcp: RmcpHeader::ipmi(),
            session: header,
            message,
        }
        .encode()
        .expect("encode");
        bmc.handle_datagram(
            LOCAL.parse().expect("addr"),
            PEER.parse().expect("addr"),
            &bytes,
        )
        .map(|reply| IpmiFrame::decode(&reply).expect("decode reply"))
    }

    fn signed_header(session: &Session, sequence: u32, message: &IpmiMessage) -> SessionHeader {
        SessionHeader {
            auth_type: AuthType::Md5,
            sequence,
            session_id: session.id(),
            auth_code: compute_auth_code(
                AuthType::Md5,
                session.user().secret(),
                session.id(),
                message,
                sequence,
            )
            .expect("code"),
        }
    }

    #[test]
    fn sessionless_reply_is_unauthenticated() {
        let bmc = bmc(false);
        let reply = send(
            &bmc,
            SessionHeader::unauthenticated(),
            request(netfn::APP, cmd::GET_CHANNEL_AUTH_CAPABILITIES, &[0x0E, 0x04]),
        )
        .expect("reply");
        assert_eq!(reply.session, SessionHeader::unauthenticated());
        assert_eq!(reply.message.netfn, netfn::APP | netfn::RESPONSE);
        assert_eq!(reply.message.sequence, 3);
        assert_eq!(reply.message.data[0], completion::OK);
    }

    #[test]
    fn established_reply_is_stamped_with_advanced_local_sequence() {
        let bmc = bmc(false);
        let user = User::new("admin", SecretBytes::from("pass"), PrivilegeLevel::Administrator)
            .expect("user");
        let handle = bmc
            .sessions()
            .insert(Session::active(9, user, AuthType::Md5, 100, 200))
            .expect("insert");

        let message = request(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
        let header = signed_header(&handle.snapshot(), 201, &message);
        let reply = send(&bmc, header, message).expect("reply");

        assert_eq!(reply.session.session_id, 9);
        assert_eq!(reply.session.sequence, 101);
        let expected = compute_auth_code(
            AuthType::Md5,
            &SecretBytes::from("pass"),
            9,
            &reply.message,
            101,
        )
        .expect("code");
        assert_eq!(reply.session.auth_code, expected);
        assert_eq!(reply.message.netfn, netfn::CHASSIS | netfn::RESPONSE);

        let session = handle.snapshot();
        assert_eq!(session.local_sequence(), 101);
        assert_eq!(session.remote_sequence(), 201);
    }

    #[test]
    fn unknown_session_and_garbage_are_dropped() {
        let bmc = bmc(false);
        let header = SessionHeader {
            session_id: 0xDEAD_BEEF,
            ..SessionHeader::unauthenticated()
        };
        let message = request(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
        assert!(send(&bmc, header, message).is_none());

        let local: SocketAddr = LOCAL.parse().expect("addr");
        let peer: SocketAddr = PEER.parse().expect("addr");
        assert!(bmc.handle_datagram(local, peer, &[0x06, 0x00]).is_none());
        assert!(bmc.handle_datagram(local, peer, &[]).is_none());
    }

    #[test]
    fn pending_sessions_cannot_run_regular_commands() {
        let bmc = bmc(false);
        let user = User::new("admin", SecretBytes::from("pass"), PrivilegeLevel::Administrator)
            .expect("user");
        let handle = bmc
            .sessions()
            .create_pending(user, AuthType::Md5)
            .expect("pending");
        let message = request(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
        let header = signed_header(&handle.snapshot(), 0, &message);
        assert!(send(&bmc, header, message).is_none());
    }

    #[test]
    fn bad_auth_code_is_advisory_unless_strict() {
        for strict in [false, true] {
            let bmc = bmc(strict);
            let user =
                User::new("admin", SecretBytes::from("pass"), PrivilegeLevel::Administrator)
                    .expect("user");
            let handle = bmc
                .sessions()
                .insert(Session::active(5, user, AuthType::Md5, 0, 0))
                .expect("insert");

            let message = request(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
            let mut header = signed_header(&handle.snapshot(), 1, &message);
            header.auth_code[0] ^= 0xFF;
            let reply = send(&bmc, header, message);

            assert_eq!(reply.is_some(), !strict, "strict = {strict}");
            let expected = if strict { 0 } else { 1 };
            assert_eq!(handle.snapshot().local_sequence(), expected);
        }
    }

    #[test]
    fn session_privilege_gates_chassis_control() {
        let machine = Arc::new(SimulatedMachine::new(true));
        let local: SocketAddr = LOCAL.parse().expect("addr");
        let viewer =
            User::new("viewer", SecretBytes::from("look"), PrivilegeLevel::User).expect("user");
        let bmc = Bmc::builder()
            .user(viewer.clone())
            .target(local.ip(), Arc::clone(&machine) as Arc<dyn PowerTarget>)
            .build()
            .expect("bmc");
        let handle = bmc
            .sessions()
            .insert(Session::active(11, viewer, AuthType::Md5, 0, 0))
            .expect("insert");

        let message = request(netfn::CHASSIS, cmd::CHASSIS_CONTROL, &[0x00]);
        let header = signed_header(&handle.snapshot(), 1, &message);
        let reply = send(&bmc, header, message).expect("denial is still answered");
        assert_eq!(reply.message.data, vec![completion::INSUFFICIENT_PRIVILEGE]);
        assert_eq!(reply.session.sequence, 1);
        assert!(machine.is_running().expect("state"));
        assert!(machine.history().is_empty());

        let message = request(netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
        let header = signed_header(&handle.snapshot(), 2, &message);
        let reply = send(&bmc, header, message).expect("status");
        assert_eq!(reply.message.data, vec![completion::OK, 0x01, 0, 0, 0]);

        let message = request(netfn::CHASSIS, cmd::SET_SYSTEM_BOOT_OPTIONS, &[0x05, 0x80, 0x04]);
        let header = signed_header(&handle.snapshot(), 3, &message);
        let reply = send(&bmc, header, message).expect("boot options");
        assert_eq!(reply.message.data, vec![completion::INSUFFICIENT_PRIVILEGE]);
        assert_eq!(machine.boot_device(), None);
    }

    #[test]
    fn asf_ping_is_answered() {
        let bmc = bmc(false);
        let ping = AsfPresence {
            rmcp_sequence: 0xFF,
            tag: 7,
        };
        let pong = bmc
            .handle_datagram(
                LOCAL.parse().expect("addr"),
                PEER.parse().expect("addr"),
                &ping.encode_ping(),
            )
            .expect("pong");
        assert_eq!(pong.len(), 28);
        assert_eq!(pong[8], 0x40);
        assert_eq!(pong[9], 7);
    }

    #[test]
    fn builder_rejects_unsupported_auth_and_zero_capacity() {
        assert!(Bmc::builder().auth_types([AuthType::Md2]).build().is_err());
        assert!(Bmc::builder().auth_types([]).build().is_err());
        assert!(Bmc::builder().max_sessions(0).build().is_err());
        assert!(Bmc::builder().session_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn endpoints_follow_targets() {
        let bmc = Bmc::builder()
            .port(6230)
            .target(
                "127.0.0.2".parse().expect("ip"),
                Arc::new(SimulatedMachine::new(false)),
            )
            .target(
                "127.0.0.1".parse().expect("ip"),
                Arc::new(SimulatedMachine::new(false)),
            )
            .build()
            .expect("bmc");
        assert_eq!(
            bmc.endpoints(),
            vec![
                "127.0.0.1:6230".parse::<SocketAddr>().expect("addr"),
                "127.0.0.2:6230".parse::<SocketAddr>().expect("addr"),
            ]
        );
    }
}
