//! Table-driven routing of `(netfn, cmd)` to handlers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::{IpmiMessage, SessionHeader};
use crate::server::BmcState;
use crate::session::SessionHandle;
use crate::types::PrivilegeLevel;

/// Which session, if any, a handler needs before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Runs outside any session; answered with session id 0 and no authentication.
    Sessionless,
    /// Needs a registered session in any state (Activate Session).
    Activating,
    /// Needs an active session; counters advance on every response.
    Established,
}

/// A decoded request as handlers see it.
#[derive(Debug)]
pub struct Request<'a> {
    /// Local address the datagram arrived on. Selects the target.
    pub local: SocketAddr,
    /// Remote console address.
    pub peer: SocketAddr,
    /// Session wrapper as received.
    pub header: &'a SessionHeader,
    /// The IPMI message.
    pub message: &'a IpmiMessage,
    /// Resolved session for scoped handlers, `None` for sessionless ones.
    pub session: Option<&'a SessionHandle>,
}

impl Request<'_> {
    /// Request data bytes.
    pub fn data(&self) -> &[u8] {
        &self.message.data
    }
}

/// Completion code plus response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Completion code.
    pub completion_code: u8,
    /// Body following the completion code.
    pub data: Vec<u8>,
}

impl Response {
    /// Successful response with a body.
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self {
            completion_code: crate::protocol::completion::OK,
            data: data.into(),
        }
    }

    /// Response carrying only a completion code.
    pub fn code(completion_code: u8) -> Self {
        Self {
            completion_code,
            data: Vec::new(),
        }
    }
}

/// What a handler decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send nothing and change nothing.
    Ignore,
    /// Send this response.
    Respond(Response),
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Self::Respond(response)
    }
}

/// One IPMI command implementation.
pub trait Handler: Send + Sync {
    /// Session requirement. Most commands need an active session.
    fn scope(&self) -> SessionScope {
        SessionScope::Established
    }

    /// Lowest session privilege allowed to run this command on an established session.
    fn privilege(&self) -> PrivilegeLevel {
        PrivilegeLevel::User
    }

    /// Handle one request.
    fn handle(&self, state: &BmcState, request: &Request<'_>) -> Outcome;
}

/// A handler bound to a fixed network function and command number.
pub trait Command: Handler + 'static {
    /// Network Function (NetFn) of the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;
}

/// The fallback for commands nobody registered: no response, no state change.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl Handler for Unsupported {
    fn scope(&self) -> SessionScope {
        SessionScope::Sessionless
    }

    fn handle(&self, _state: &BmcState, _request: &Request<'_>) -> Outcome {
        Outcome::Ignore
    }
}

/// Result of a route lookup.
#[derive(Clone)]
pub enum Route {
    /// A registered handler.
    Handler(Arc<dyn Handler>),
    /// No handler for this `(netfn, cmd)`.
    Unsupported,
}

impl Route {
    /// The handler to run; [`Unsupported`] for unknown routes.
    pub fn handler(&self) -> Arc<dyn Handler> {
        match self {
            Self::Handler(handler) => Arc::clone(handler),
            Self::Unsupported => Arc::new(Unsupported),
        }
    }
}

/// netfn → command → handler, built once at startup.
#[derive(Default, Clone)]
pub struct Dispatcher {
    netfns: HashMap<u8, HashMap<u8, Arc<dyn Handler>>>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut routes: Vec<(u8, u8)> = self
            .netfns
            .iter()
            .flat_map(|(netfn, cmds)| cmds.keys().map(move |cmd| (*netfn, *cmd)))
            .collect();
        routes.sort_unstable();
        f.debug_struct("Dispatcher").field("routes", &routes).finish()
    }
}

impl Dispatcher {
    /// Empty table: everything is unsupported.
    pub fn new() -> Self {
        Self::default()
    }

    /// The App and Chassis commands this BMC serves.
    pub fn standard() -> Self {
        let mut dispatcher = Self::new();
        crate::commands::register_all(&mut dispatcher);
        dispatcher
    }

    /// Register a typed command under its own netfn and command number.
    pub fn register<C: Command>(&mut self, command: C) -> &mut Self {
        self.insert(C::NETFN, C::CMD, Arc::new(command))
    }

    /// Register a handler under an explicit route, replacing any previous one.
    pub fn insert(&mut self, netfn: u8, cmd: u8, handler: Arc<dyn Handler>) -> &mut Self {
        self.netfns.entry(netfn).or_default().insert(cmd, handler);
        self
    }

    /// Find the handler for a request. The response marker bit of `netfn` is ignored.
    pub fn route(&self, netfn: u8, cmd: u8) -> Route {
        self.netfns
            .get(&(netfn & !crate::protocol::netfn::RESPONSE))
            .and_then(|cmds| cmds.get(&cmd))
            .map_or(Route::Unsupported, |h| Route::Handler(Arc::clone(h)))
    }
}
