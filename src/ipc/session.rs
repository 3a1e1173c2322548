//! The IPC session table (§4.9): `SessionID` assignment, the
//! request/notify channel pair, and idle reaping.
//!
//! Grounded on `original_source/core/src/common/ipc_session.c`'s
//! `SessionID = getpid() * 7487 + counter` scheme and its `LastUsed`
//! timestamp; the reaping entry point is this crate's own addition (see
//! `DESIGN.md`), matching the teacher's "nothing runs implicitly, the
//! platform calls tick functions" cooperative model (§5).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::time::Clock;

const SESSION_ID_MULTIPLIER: i32 = 7487;

/// One IPC client's session state.
#[derive(Debug, Clone)]
pub struct Session {
  /// The assigned SessionID.
  pub id: i32,
  /// Peer address the request channel talks to.
  pub request_peer: SocketAddr,
  /// Peer address the notify channel talks to, once established via
  /// `EstablishNotify`.
  pub notify_peer: Option<SocketAddr>,
  last_active: Instant,
}

/// Errors a session-table lookup can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
  /// No session exists with this id (never assigned, or since
  /// disconnected/reaped).
  UnknownSession,
}

impl std::fmt::Display for SessionError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("unknown IPC session id")
  }
}

impl std::error::Error for SessionError {}

/// The table of live IPC sessions, keyed by SessionID.
#[derive(Debug)]
pub struct SessionRouter {
  pid_component: i32,
  counter: i32,
  idle_timeout: Duration,
  sessions: Vec<Session>,
}

impl SessionRouter {
  /// A fresh, empty session table. Sessions idle for longer than
  /// `idle_timeout` become eligible for [`SessionRouter::reap_idle`].
  pub fn new(idle_timeout: Duration) -> Self {
    SessionRouter { pid_component: (std::process::id() as i32).wrapping_mul(SESSION_ID_MULTIPLIER),
                    counter: 0,
                    idle_timeout,
                    sessions: Vec::new() }
  }

  /// Handle a `Connect`: assign a fresh SessionID for `peer` and create
  /// its session entry. A peer that already held a session gets a new,
  /// unrelated one — `original_source`'s "Connect (re)assigns a fresh
  /// SessionID" behavior — the old id, if any, is left to be explicitly
  /// `Disconnect`ed or idle-reaped.
  pub fn connect(&mut self, clock: &dyn Clock, peer: SocketAddr) -> i32 {
    self.counter = self.counter.wrapping_add(1);
    let id = self.pid_component.wrapping_add(self.counter);
    self.sessions.push(Session { id, request_peer: peer, notify_peer: None, last_active: clock.now() });
    id
  }

  /// Handle `EstablishNotify`: attach a notify peer to an existing
  /// session.
  pub fn establish_notify(&mut self,
                           clock: &dyn Clock,
                           session_id: i32,
                           peer: SocketAddr)
                           -> Result<(), SessionError> {
    let session = self.session_mut(session_id)?;
    session.notify_peer = Some(peer);
    session.last_active = clock.now();
    Ok(())
  }

  /// Handle `Disconnect`: drop the session. The same SessionID is
  /// invalid on any later message.
  pub fn disconnect(&mut self, session_id: i32) -> Result<(), SessionError> {
    let before = self.sessions.len();
    self.sessions.retain(|s| s.id != session_id);
    if self.sessions.len() == before {
      Err(SessionError::UnknownSession)
    } else {
      Ok(())
    }
  }

  /// Validate that `session_id` is live and refresh its activity
  /// timestamp — every non-`Connect` request does this before its
  /// handler runs, per §4.9 ("all other messages must reference a valid
  /// existing SessionID or are rejected with BadRequest").
  pub fn touch(&mut self, clock: &dyn Clock, session_id: i32) -> Result<&Session, SessionError> {
    let session = self.session_mut(session_id)?;
    session.last_active = clock.now();
    Ok(&*session)
  }

  /// Look up a session without refreshing its activity timestamp.
  pub fn get(&self, session_id: i32) -> Option<&Session> {
    self.sessions.iter().find(|s| s.id == session_id)
  }

  /// Find the session whose notify channel is `peer`, if any — used by
  /// the tick loop to turn an IPC-originated observation's emission back
  /// into a `<Notification>` envelope addressed to the right `SessionID`.
  pub fn session_id_for_notify_peer(&self, peer: SocketAddr) -> Option<i32> {
    self.sessions.iter().find(|s| s.notify_peer == Some(peer)).map(|s| s.id)
  }

  /// Remove every session idle for longer than the configured timeout,
  /// returning their ids. The binaries call this on a periodic tick;
  /// nothing reaps sessions implicitly.
  pub fn reap_idle(&mut self, clock: &dyn Clock) -> Vec<i32> {
    let now = clock.now();
    let timeout = self.idle_timeout;
    let mut reaped = Vec::new();
    self.sessions.retain(|s| {
      let idle = now.saturating_duration_since(s.last_active);
      if idle >= timeout {
        reaped.push(s.id);
        false
      } else {
        true
      }
    });
    reaped
  }

  /// Number of currently live sessions.
  pub fn len(&self) -> usize {
    self.sessions.len()
  }

  /// Whether the table holds no sessions.
  pub fn is_empty(&self) -> bool {
    self.sessions.is_empty()
  }

  fn session_mut(&mut self, session_id: i32) -> Result<&mut Session, SessionError> {
    self.sessions
        .iter_mut()
        .find(|s| s.id == session_id)
        .ok_or(SessionError::UnknownSession)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{dummy_addr, FakeClock};

  #[test]
  fn connect_assigns_distinct_ids() {
    let mut router = SessionRouter::new(Duration::from_secs(300));
    let clock = FakeClock::new();
    let a = router.connect(&clock, dummy_addr());
    let b = router.connect(&clock, dummy_addr());
    assert_ne!(a, b);
    assert_eq!(router.len(), 2);
  }

  #[test]
  fn operations_on_an_unknown_session_are_rejected() {
    let mut router = SessionRouter::new(Duration::from_secs(300));
    let clock = FakeClock::new();
    assert_eq!(router.touch(&clock, 999).err(), Some(SessionError::UnknownSession));
    assert_eq!(router.disconnect(999), Err(SessionError::UnknownSession));
  }

  #[test]
  fn disconnect_invalidates_the_session_id() {
    let mut router = SessionRouter::new(Duration::from_secs(300));
    let clock = FakeClock::new();
    let id = router.connect(&clock, dummy_addr());
    router.disconnect(id).unwrap();
    assert!(router.get(id).is_none());
  }

  #[test]
  fn reap_idle_drops_sessions_past_the_timeout() {
    let mut router = SessionRouter::new(Duration::from_secs(10));
    let clock = FakeClock::new();
    let id = router.connect(&clock, dummy_addr());

    clock.advance(Duration::from_secs(5));
    assert!(router.reap_idle(&clock).is_empty());

    clock.advance(Duration::from_secs(10));
    assert_eq!(router.reap_idle(&clock), vec![id]);
    assert!(router.is_empty());
  }

  #[test]
  fn establish_notify_attaches_the_notify_peer() {
    let mut router = SessionRouter::new(Duration::from_secs(300));
    let clock = FakeClock::new();
    let id = router.connect(&clock, dummy_addr());
    router.establish_notify(&clock, id, dummy_addr()).unwrap();
    assert!(router.get(id).unwrap().notify_peer.is_some());
  }

  #[test]
  fn session_id_for_notify_peer_resolves_the_owning_session() {
    use crate::test::dummy_addr_2;

    let mut router = SessionRouter::new(Duration::from_secs(300));
    let clock = FakeClock::new();
    let id = router.connect(&clock, dummy_addr());
    router.establish_notify(&clock, id, dummy_addr_2()).unwrap();

    assert_eq!(router.session_id_for_notify_peer(dummy_addr_2()), Some(id));
    assert_eq!(router.session_id_for_notify_peer(dummy_addr()), None);
  }
}
