//! The DTLS session cache (§4.8, component I): a fixed-capacity table of
//! per-peer DTLS state, grounded on
//! `original_source/core/src/common/dtls_abstraction.h`'s
//! `DTLS_Init`/`DTLS_Decrypt`/`DTLS_Encrypt`/`DTLS_Reset` contract.
//!
//! The teacher's own demo binaries drive DTLS through
//! `openssl::ssl::{SslConnector, SslMethod, SslVerifyMode}` over a real
//! blocking socket (`examples/blocking/secure_{client,server}.rs`); this
//! module uses the same `openssl` crate but drives the handshake over
//! the in-memory [`crate::dtls::io::DatagramIo`] adapter instead, since
//! a cache has to hold several peers' state at once rather than own one
//! blocking connection per process.

use std::net::SocketAddr;
use std::time::Instant;

use openssl::pkey::PKey;
use openssl::ssl::{HandshakeError, MidHandshakeSslStream, Ssl, SslContext, SslContextBuilder,
                    SslMethod, SslStream, SslVerifyMode};
use openssl::x509::X509;

use crate::dtls::credentials::{CertificateFormat, Credentials};
use crate::dtls::io::DatagramIo;
use crate::time::Clock;

/// Which side of the handshake a cache plays. A server accepts
/// connections from many clients; a client connects to one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// `DTLS_Init`-as-server: accepts incoming `ClientHello`s.
  Server,
  /// `DTLS_Init`-as-client: initiates the handshake.
  Client,
}

/// Failure modes a session cache operation can surface. Any of these
/// tears down the offending session — per the spec, a broken session is
/// never retried in place, only fresh on the next packet.
#[derive(Debug)]
pub enum DtlsError {
  /// Building the OpenSSL context (loading credentials) failed.
  ContextSetup(openssl::error::ErrorStack),
  /// The handshake could not proceed (a real protocol failure, not a
  /// would-block).
  HandshakeFailed,
  /// A record could not be decrypted or encrypted.
  CryptoFailed,
  /// The cache holds no live session for this peer.
  NoSession,
  /// `encrypt` was called before the handshake finished.
  NotEstablished,
}

impl std::fmt::Display for DtlsError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      | DtlsError::ContextSetup(e) => write!(f, "dtls context setup failed: {e}"),
      | DtlsError::HandshakeFailed => f.write_str("dtls handshake failed"),
      | DtlsError::CryptoFailed => f.write_str("dtls encrypt/decrypt failed"),
      | DtlsError::NoSession => f.write_str("no cached dtls session for this peer"),
      | DtlsError::NotEstablished => f.write_str("dtls session has not finished handshaking"),
    }
  }
}

impl std::error::Error for DtlsError {}

/// A received datagram's effect on a session: handshake records to
/// flush back to the peer, and/or application data that decrypted
/// cleanly.
#[derive(Debug, Default)]
pub struct DecryptOutcome {
  /// Bytes to send back to the peer (handshake flight or alert), if
  /// processing the datagram produced any.
  pub to_send: Option<Vec<u8>>,
  /// Decrypted application data, present once the handshake is
  /// established and the record carried data.
  pub plaintext: Option<Vec<u8>>,
}

enum Machine {
  Handshaking(MidHandshakeSslStream<DatagramIo>),
  Established(SslStream<DatagramIo>),
}

/// One peer's cached DTLS state.
pub struct Session {
  peer: SocketAddr,
  machine: Machine,
  last_active: Instant,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
     .field("peer", &self.peer)
     .field("phase", &self.phase())
     .finish()
  }
}

impl Session {
  /// Current lifecycle phase, matching `dtls_abstraction.h`'s implicit
  /// New → Handshaking → Established progression (there's no
  /// `New` here: a [`Session`] is only ever constructed already
  /// mid-handshake or, in the unlikely event OpenSSL completes it
  /// synchronously, already established).
  pub fn phase(&self) -> Phase {
    match self.machine {
      | Machine::Handshaking(_) => Phase::Handshaking,
      | Machine::Established(_) => Phase::Established,
    }
  }

  /// The peer this session is cached for.
  pub fn peer(&self) -> SocketAddr {
    self.peer
  }
}

/// A session's handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// The handshake has not yet completed.
  Handshaking,
  /// The handshake completed; application data may be exchanged.
  Established,
}

fn build_context(role: Role, credentials: &Credentials) -> Result<SslContext, DtlsError> {
  let mut builder: SslContextBuilder =
    SslContext::builder(SslMethod::dtls()).map_err(DtlsError::ContextSetup)?;
  builder.set_verify(SslVerifyMode::NONE);

  match credentials.clone() {
    | Credentials::Psk { identity, key } => match role {
      | Role::Server => {
        builder.set_psk_server_callback(move |_ssl, _identity_hint, psk_out| {
          let n = key.len().min(psk_out.len());
          psk_out[..n].copy_from_slice(&key[..n]);
          Ok(n)
        });
      },
      | Role::Client => {
        builder.set_psk_client_callback(move |_ssl, _hint, identity_out, psk_out| {
          let id_bytes = identity.as_bytes();
          let id_n = id_bytes.len().min(identity_out.len().saturating_sub(1));
          identity_out[..id_n].copy_from_slice(&id_bytes[..id_n]);
          identity_out[id_n] = 0;
          let psk_n = key.len().min(psk_out.len());
          psk_out[..psk_n].copy_from_slice(&key[..psk_n]);
          Ok(psk_n)
        });
      },
    },
    | Credentials::Certificate { certificate, private_key, format } => {
      let cert = match format {
        | CertificateFormat::Der => X509::from_der(&certificate),
        | CertificateFormat::Pem => X509::from_pem(&certificate),
      }.map_err(DtlsError::ContextSetup)?;
      let key = match format {
        | CertificateFormat::Der => PKey::private_key_from_der(&private_key),
        | CertificateFormat::Pem => PKey::private_key_from_pem(&private_key),
      }.map_err(DtlsError::ContextSetup)?;
      builder.set_certificate(&cert).map_err(DtlsError::ContextSetup)?;
      builder.set_private_key(&key).map_err(DtlsError::ContextSetup)?;
    },
  }

  Ok(builder.build())
}

fn begin_handshake(context: &SslContext, role: Role) -> Result<Machine, DtlsError> {
  let ssl = Ssl::new(context).map_err(DtlsError::ContextSetup)?;
  let io = DatagramIo::new();
  let result = match role {
    | Role::Server => ssl.accept(io),
    | Role::Client => ssl.connect(io),
  };
  match result {
    | Ok(stream) => Ok(Machine::Established(stream)),
    | Err(HandshakeError::WouldBlock(mid)) => Ok(Machine::Handshaking(mid)),
    | Err(HandshakeError::Failure(_)) => Err(DtlsError::HandshakeFailed),
    | Err(HandshakeError::SetupFailure(e)) => Err(DtlsError::ContextSetup(e)),
  }
}

fn drain_outbound(machine: &mut Machine) -> Option<Vec<u8>> {
  let io = match machine {
    | Machine::Handshaking(mid) => mid.get_mut(),
    | Machine::Established(stream) => stream.get_mut(),
  };
  let bytes = io.take_outbound();
  if bytes.is_empty() { None } else { Some(bytes) }
}

fn advance_handshake(machine: Machine, datagram: &[u8]) -> Result<Machine, DtlsError> {
  match machine {
    | Machine::Established(mut stream) => {
      stream.get_mut().push_inbound(datagram);
      Ok(Machine::Established(stream))
    },
    | Machine::Handshaking(mut mid) => {
      mid.get_mut().push_inbound(datagram);
      match mid.handshake() {
        | Ok(stream) => Ok(Machine::Established(stream)),
        | Err(HandshakeError::WouldBlock(mid)) => Ok(Machine::Handshaking(mid)),
        | Err(HandshakeError::Failure(_)) => Err(DtlsError::HandshakeFailed),
        | Err(HandshakeError::SetupFailure(e)) => Err(DtlsError::ContextSetup(e)),
      }
    },
  }
}

/// A fixed-capacity table of cached DTLS sessions, one per peer
/// address. §4.8: `MAX_DTLS_SESSIONS` (default 3, see
/// [`crate::config::Lwm2m::max_dtls_sessions`]); on overflow the least
/// recently used session is evicted rather than rejecting the new peer,
/// since a constrained gateway is more likely to be cycling through a
/// small rotating set of devices than serving more than `capacity`
/// genuinely concurrent handshakes.
pub struct SessionCache {
  role: Role,
  credentials: Credentials,
  context: SslContext,
  capacity: usize,
  sessions: Vec<Session>,
}

impl SessionCache {
  /// Build a cache that will play `role`, authenticating with
  /// `credentials`, holding at most `capacity` concurrent peer
  /// sessions.
  pub fn new(role: Role, credentials: Credentials, capacity: usize) -> Result<Self, DtlsError> {
    let context = build_context(role, &credentials)?;
    Ok(SessionCache { role, credentials, context, capacity: capacity.max(1), sessions: Vec::new() })
  }

  fn index_of(&self, peer: SocketAddr) -> Option<usize> {
    self.sessions.iter().position(|s| s.peer == peer)
  }

  fn evict_lru_if_full(&mut self) {
    if self.sessions.len() < self.capacity {
      return;
    }
    if let Some((idx, _)) =
      self.sessions.iter().enumerate().min_by_key(|(_, s)| s.last_active)
    {
      self.sessions.remove(idx);
    }
  }

  /// Drop any cached state for `peer`, matching `DTLS_Reset`. The next
  /// datagram from that peer starts a fresh handshake.
  pub fn reset(&mut self, peer: SocketAddr) {
    self.sessions.retain(|s| s.peer != peer);
  }

  /// Feed one received datagram through the session for `peer`,
  /// creating a session (and beginning a handshake) if none is cached
  /// yet. Returns any bytes that should be sent back to `peer` and any
  /// application data the record carried.
  ///
  /// On error the session is torn down (removed from the cache); the
  /// caller should treat the peer as unauthenticated until it sends
  /// another datagram.
  pub fn decrypt(&mut self,
                 clock: &dyn Clock,
                 peer: SocketAddr,
                 datagram: &[u8])
                 -> Result<DecryptOutcome, DtlsError> {
    let idx = match self.index_of(peer) {
      | Some(idx) => idx,
      | None => {
        self.evict_lru_if_full();
        let machine = begin_handshake(&self.context, self.role)?;
        self.sessions.push(Session { peer, machine, last_active: clock.now() });
        self.sessions.len() - 1
      },
    };

    let session = self.sessions.remove(idx);
    let result = advance_handshake(session.machine, datagram);
    let machine = match result {
      | Ok(machine) => machine,
      | Err(e) => return Err(e),
    };

    let mut session = Session { peer, machine, last_active: clock.now() };
    let to_send = drain_outbound(&mut session.machine);

    let plaintext = match &mut session.machine {
      | Machine::Established(stream) => {
        let mut buf = vec![0u8; 4096];
        match std::io::Read::read(stream, &mut buf) {
          | Ok(0) => None,
          | Ok(n) => Some(buf[..n].to_vec()),
          | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
          | Err(_) => {
            return Err(DtlsError::CryptoFailed);
          },
        }
      },
      | Machine::Handshaking(_) => None,
    };

    self.sessions.push(session);
    Ok(DecryptOutcome { to_send, plaintext })
  }

  /// Encrypt `plaintext` for `peer`, whose session must already be
  /// [`Phase::Established`] (typically by a prior [`SessionCache::decrypt`]
  /// call completing the handshake).
  pub fn encrypt(&mut self, peer: SocketAddr, plaintext: &[u8]) -> Result<Vec<u8>, DtlsError> {
    let idx = self.index_of(peer).ok_or(DtlsError::NoSession)?;
    let session = &mut self.sessions[idx];
    let stream = match &mut session.machine {
      | Machine::Established(stream) => stream,
      | Machine::Handshaking(_) => return Err(DtlsError::NotEstablished),
    };

    std::io::Write::write_all(stream, plaintext).map_err(|_| DtlsError::CryptoFailed)?;
    let io = stream.get_mut();
    Ok(io.take_outbound())
  }

  /// Current number of cached peer sessions.
  pub fn len(&self) -> usize {
    self.sessions.len()
  }

  /// Whether the cache holds no sessions.
  pub fn is_empty(&self) -> bool {
    self.sessions.is_empty()
  }

  /// The phase of the session cached for `peer`, if any.
  pub fn phase(&self, peer: SocketAddr) -> Option<Phase> {
    self.index_of(peer).map(|i| self.sessions[i].phase())
  }

  /// The credentials new sessions are currently authenticated with.
  pub fn credentials(&self) -> &Credentials {
    &self.credentials
  }

  /// Rebuild the OpenSSL context (e.g. after rotating credentials),
  /// dropping every cached session since none of them are valid under
  /// the new credentials.
  pub fn rotate_credentials(&mut self, credentials: Credentials) -> Result<(), DtlsError> {
    self.context = build_context(self.role, &credentials)?;
    self.credentials = credentials;
    self.sessions.clear();
    Ok(())
  }
}

impl std::fmt::Debug for SessionCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionCache")
     .field("role", &self.role)
     .field("capacity", &self.capacity)
     .field("sessions", &self.sessions.len())
     .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn psk_credentials() -> Credentials {
    Credentials::Psk { identity: "device-1".into(), key: vec![0xAA; 16] }
  }

  #[test]
  fn new_cache_starts_empty_with_clamped_capacity() {
    let cache = SessionCache::new(Role::Server, psk_credentials(), 0).unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.capacity, 1, "capacity of 0 is clamped to 1, a cache must hold someone");
  }

  #[test]
  fn reset_on_an_unknown_peer_is_a_no_op() {
    let mut cache = SessionCache::new(Role::Server, psk_credentials(), 3).unwrap();
    let peer: SocketAddr = "127.0.0.1:5003".parse().unwrap();
    cache.reset(peer);
    assert_eq!(cache.len(), 0);
  }

  #[test]
  fn encrypt_without_a_session_is_rejected() {
    let mut cache = SessionCache::new(Role::Client, psk_credentials(), 3).unwrap();
    let peer: SocketAddr = "127.0.0.1:5004".parse().unwrap();
    let err = cache.encrypt(peer, b"hello").unwrap_err();
    assert!(matches!(err, DtlsError::NoSession));
  }

  #[test]
  fn phase_of_an_unknown_peer_is_none() {
    let cache = SessionCache::new(Role::Server, psk_credentials(), 3).unwrap();
    let peer: SocketAddr = "127.0.0.1:5005".parse().unwrap();
    assert!(cache.phase(peer).is_none());
  }

  #[test]
  fn rotate_credentials_clears_cached_sessions() {
    let mut cache = SessionCache::new(Role::Server, psk_credentials(), 3).unwrap();
    cache.rotate_credentials(Credentials::Psk { identity: "device-2".into(), key: vec![0xBB; 16] })
         .unwrap();
    assert!(cache.is_empty());
  }
}
