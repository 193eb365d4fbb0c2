//! Session registry: the one piece of mutable state shared across requests.
//!
//! The map is behind an `RwLock` and each session behind its own `Mutex`, so a counter update
//! only contends with other requests on the same session id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::observe;
use crate::types::{AuthType, PrivilegeLevel};

/// Maximum user name length carried by Get Session Challenge.
pub const MAX_USERNAME_LEN: usize = 16;

/// Maximum password length an IPMI v1.5 authentication code can carry.
pub const MAX_PASSWORD_LEN: usize = 16;

/// Length of the Get Session Challenge challenge string.
pub const CHALLENGE_LEN: usize = 16;

/// Default number of concurrently registered sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 32;

/// IPMI v1.5 default session inactivity timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A BMC user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    name: Vec<u8>,
    secret: SecretBytes,
    max_privilege: PrivilegeLevel,
}

impl User {
    /// Create a user. Names and passwords longer than 16 bytes are rejected.
    pub fn new(
        name: impl Into<Vec<u8>>,
        secret: SecretBytes,
        max_privilege: PrivilegeLevel,
    ) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_USERNAME_LEN {
            return Err(Error::InvalidArgument("user name longer than 16 bytes"));
        }
        if secret.len() > MAX_PASSWORD_LEN {
            return Err(Error::InvalidArgument("password longer than 16 bytes"));
        }
        Ok(Self {
            name,
            secret,
            max_privilege,
        })
    }

    /// User name bytes (may be empty for the null user).
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Shared secret used for authentication codes.
    pub fn secret(&self) -> &SecretBytes {
        &self.secret
    }

    /// Highest privilege this user may hold.
    pub fn max_privilege(&self) -> PrivilegeLevel {
        self.max_privilege
    }
}

/// The credential store: user name to account.
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Vec<User>,
}

impl UserStore {
    /// Build a store, rejecting duplicate names.
    pub fn new(users: Vec<User>) -> Result<Self> {
        for (i, user) in users.iter().enumerate() {
            if users[..i].iter().any(|u| u.name == user.name) {
                return Err(Error::InvalidArgument("duplicate user name"));
            }
        }
        Ok(Self { users })
    }

    /// Look a user up by the name field of Get Session Challenge (NUL padded).
    pub fn find(&self, name_field: &[u8]) -> Option<&User> {
        let end = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_field.len());
        let name = &name_field[..end];
        self.users.iter().find(|u| u.name == name)
    }

    /// Iterate over all users.
    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Challenge issued, waiting for Activate Session.
    Pending,
    /// Activated; regular commands are accepted.
    Active,
}

/// One authenticated management conversation.
#[derive(Debug, Clone)]
pub struct Session {
    id: u32,
    user: User,
    auth_type: AuthType,
    state: SessionState,
    challenge: [u8; CHALLENGE_LEN],
    max_privilege: PrivilegeLevel,
    privilege: PrivilegeLevel,
    local_sequence: u32,
    remote_sequence: u32,
    last_activity: Instant,
}

impl Session {
    /// An already-active session with explicit counters, operating at the user's maximum
    /// privilege.
    pub fn active(
        id: u32,
        user: User,
        auth_type: AuthType,
        local_sequence: u32,
        remote_sequence: u32,
    ) -> Self {
        let max_privilege = user.max_privilege;
        Self {
            id,
            user,
            auth_type,
            state: SessionState::Active,
            challenge: [0; CHALLENGE_LEN],
            max_privilege,
            privilege: max_privilege,
            local_sequence,
            remote_sequence,
            last_activity: Instant::now(),
        }
    }

    fn pending(id: u32, user: User, auth_type: AuthType, challenge: [u8; CHALLENGE_LEN]) -> Self {
        let max_privilege = user.max_privilege;
        Self {
            id,
            user,
            auth_type,
            state: SessionState::Pending,
            challenge,
            max_privilege,
            privilege: PrivilegeLevel::User.min(max_privilege),
            local_sequence: 0,
            remote_sequence: 0,
            last_activity: Instant::now(),
        }
    }

    /// Session id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The authenticated user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Negotiated authentication type.
    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Challenge string issued by Get Session Challenge.
    pub fn challenge(&self) -> &[u8; CHALLENGE_LEN] {
        &self.challenge
    }

    /// Maximum privilege negotiated at activation.
    pub fn max_privilege(&self) -> PrivilegeLevel {
        self.max_privilege
    }

    /// Current operating privilege.
    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    /// Messages the BMC has sent on this session.
    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    /// Messages received from the remote console on this session.
    pub fn remote_sequence(&self) -> u32 {
        self.remote_sequence
    }

    /// When the session last handled a request.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn idle_longer_than(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    /// Move a pending session to active.
    ///
    /// `outbound_start` is the first sequence number the console wants on BMC messages,
    /// `inbound_start` the first one the BMC expects from the console.
    pub(crate) fn activate(
        &mut self,
        max_privilege: PrivilegeLevel,
        outbound_start: u32,
        inbound_start: u32,
    ) {
        self.state = SessionState::Active;
        self.max_privilege = max_privilege;
        self.privilege = PrivilegeLevel::User.min(max_privilege);
        self.local_sequence = outbound_start.wrapping_sub(1);
        self.remote_sequence = inbound_start.wrapping_sub(1);
        self.last_activity = Instant::now();
    }

    pub(crate) fn set_privilege(&mut self, privilege: PrivilegeLevel) {
        self.privilege = privilege;
    }

    fn advance(&mut self) -> u32 {
        self.remote_sequence = self.remote_sequence.wrapping_add(1);
        self.local_sequence = self.local_sequence.wrapping_add(1);
        self.last_activity = Instant::now();
        self.local_sequence
    }
}

/// Shared handle to one registered session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u32,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            id: session.id,
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current operating privilege.
    pub fn privilege(&self) -> PrivilegeLevel {
        self.lock().privilege
    }

    /// A copy of the session as it is right now.
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.lock())
    }

    /// Record one handled request and one response about to be sent.
    ///
    /// Both counters move by exactly one under the session lock. Returns the updated
    /// local sequence (the value for the outbound session header) together with a copy
    /// of the session as it stood after the update.
    pub fn advance(&self) -> (u32, Session) {
        let mut session = self.lock();
        let sequence = session.advance();
        (sequence, session.clone())
    }
}

/// Process-wide table of sessions keyed by session id, owned by the server.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u32, SessionHandle>>,
    capacity: usize,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionRegistry {
    /// Empty registry holding at most `capacity` sessions, with the default idle timeout.
    pub fn new(capacity: usize) -> Self {
        Self::with_idle_timeout(capacity, DEFAULT_IDLE_TIMEOUT)
    }

    /// Empty registry whose sessions expire after `idle_timeout` without a request.
    pub fn with_idle_timeout(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity,
            idle_timeout,
        }
    }

    /// Make room for one more session.
    ///
    /// Expired sessions go first. If the table is still full, the oldest pending session is
    /// evicted: pending sessions hold no authenticated state and anyone who knows a user
    /// name can create them.
    fn make_room(&self, sessions: &mut HashMap<u32, SessionHandle>) -> Result<()> {
        let now = Instant::now();
        sessions.retain(|id, handle| {
            let expired = handle.lock().idle_longer_than(self.idle_timeout, now);
            if expired {
                observe::session_expired(*id);
            }
            !expired
        });
        if sessions.len() < self.capacity {
            return Ok(());
        }

        let oldest_pending = sessions
            .values()
            .map(|handle| handle.lock().clone())
            .filter(|session| session.state == SessionState::Pending)
            .min_by_key(|session| session.last_activity)
            .map(|session| session.id);
        match oldest_pending {
            Some(id) => {
                sessions.remove(&id);
                observe::session_evicted(id);
                Ok(())
            }
            None => Err(Error::SessionLimit(self.capacity)),
        }
    }

    /// Register a session under its own id.
    pub fn insert(&self, session: Session) -> Result<SessionHandle> {
        if session.id == 0 {
            return Err(Error::InvalidArgument("session id 0 is reserved"));
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session.id) {
            return Err(Error::InvalidArgument("session id already registered"));
        }
        if sessions.len() >= self.capacity {
            self.make_room(&mut sessions)?;
        }
        let handle = SessionHandle::new(session);
        sessions.insert(handle.id, handle.clone());
        Ok(handle)
    }

    /// Create a pending session with a fresh random id and challenge.
    pub fn create_pending(&self, user: User, auth_type: AuthType) -> Result<SessionHandle> {
        let mut rng = rand::rng();
        let mut challenge = [0u8; CHALLENGE_LEN];
        rng.fill_bytes(&mut challenge);

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.len() >= self.capacity {
            self.make_room(&mut sessions)?;
        }
        let id = loop {
            let candidate = rng.next_u32();
            if candidate != 0 && !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let handle = SessionHandle::new(Session::pending(id, user, auth_type, challenge));
        sessions.insert(id, handle.clone());
        Ok(handle)
    }

    /// Find a session by id. Sessions idle past the timeout are not returned.
    pub fn lookup(&self, session_id: u32) -> Option<SessionHandle> {
        self.get(session_id).ok()
    }

    /// Like [`Self::lookup`], reporting a miss as [`Error::SessionNotFound`].
    pub fn get(&self, session_id: u32) -> Result<SessionHandle> {
        let handle = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(session_id))?;
        if handle
            .lock()
            .idle_longer_than(self.idle_timeout, Instant::now())
        {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(handle)
    }

    /// Remove a session. Handles already held by in-flight requests stay usable.
    pub fn remove(&self, session_id: u32) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured inactivity timeout.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}
