//! The single-threaded cooperative tick loop (§5): binds every listener
//! the LwM2M runtime needs and drives one pass of "poll what's ready,
//! process it, return" per [`Runtime::tick`].
//!
//! Adapted from the teacher's `core::Core::tick`/`poll_req`/`poll_resp`
//! shape — "nothing runs implicitly, the platform calls tick" — but
//! concrete rather than generic over a `Platform`: this crate drives one
//! fixed set of listeners (plain CoAP, optionally CoAP-over-DTLS, and
//! the two IPC sockets) rather than a user-composed transport stack.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::coap::dispatcher::Dispatcher;
use crate::coap::request::Path;
use crate::coap::wire::{self, DecodedRequest};
use crate::codec::ContentFormat;
use crate::config::Config;
use crate::ipc::directory::ClientDirectory;
use crate::ipc::handlers::{handle_request, HandlerContext};
use crate::ipc::session::SessionRouter;
use crate::ipc::xml::{self, NotificationEnvelope};
use crate::logging;
use crate::net::{self, Addrd, Socket};
use crate::observe::registry::{Emission, ObservedPath};
use crate::time::Clock;

#[cfg(feature = "dtls")]
use crate::dtls::credentials::Credentials;
#[cfg(feature = "dtls")]
use crate::dtls::session::{Role, SessionCache};

/// Datagrams larger than this are rejected at the socket read, matching
/// the teacher's fixed-capacity receive buffer shape rather than
/// growing one per packet.
const RECV_BUFFER_SIZE: usize = 2048;

/// Owns every listener socket and piece of mutable state a tick touches:
/// the CoAP dispatcher, the IPC session/directory tables, and (with the
/// `dtls` feature) the CoAP-over-DTLS listener and its session cache.
pub struct Runtime {
  config: Config,
  dispatcher: Dispatcher,
  sessions: SessionRouter,
  directory: ClientDirectory,
  coap_sock: UdpSocket,
  ipc_request_sock: UdpSocket,
  ipc_notify_sock: UdpSocket,
  #[cfg(feature = "dtls")]
  coaps_sock: Option<UdpSocket>,
  #[cfg(feature = "dtls")]
  dtls: Option<SessionCache>,
  next_notification_message_id: u16,
}

impl std::fmt::Debug for Runtime {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Runtime")
     .field("config", &self.config)
     .field("dispatcher", &self.dispatcher)
     .field("sessions", &self.sessions)
     .field("directory", &self.directory)
     .finish()
  }
}

impl Runtime {
  /// Bind the plain-CoAP and IPC listeners named by `config`, and start
  /// driving `dispatcher`. DTLS is opt-in, via [`Runtime::enable_dtls`].
  pub fn new(config: Config, dispatcher: Dispatcher) -> io::Result<Self> {
    let coap_sock = net::bind(config.lwm2m.coap_bind_addr)?;
    let ipc_request_sock = net::bind(config.lwm2m.ipc_request_addr)?;
    let ipc_notify_sock = net::bind(config.lwm2m.ipc_notify_addr)?;

    // Every listener is polled once per tick; a short read timeout
    // keeps a tick from blocking on a socket nobody's written to.
    for sock in [&coap_sock, &ipc_request_sock, &ipc_notify_sock] {
      Socket::set_read_timeout(sock, Some(std::time::Duration::from_millis(10)))?;
    }

    let sessions = SessionRouter::new(config_idle_timeout(&config));

    Ok(Runtime { config,
                dispatcher,
                sessions,
                directory: ClientDirectory::new(),
                coap_sock,
                ipc_request_sock,
                ipc_notify_sock,
                #[cfg(feature = "dtls")]
                coaps_sock: None,
                #[cfg(feature = "dtls")]
                dtls: None,
                next_notification_message_id: 1 })
  }

  /// Bind the CoAP-over-DTLS listener and start a session cache playing
  /// `role`, authenticated with `credentials`. Credentials aren't part
  /// of [`Config`] since they're typically loaded from a keystore or
  /// provisioning flow the config file doesn't model — this binary
  /// supplies them separately, after `Config` is otherwise settled.
  #[cfg(feature = "dtls")]
  pub fn enable_dtls(&mut self, role: Role, credentials: Credentials) -> io::Result<()> {
    let sock = net::bind(self.config.lwm2m.coaps_bind_addr)?;
    Socket::set_read_timeout(&sock, Some(std::time::Duration::from_millis(10)))?;
    let cache = SessionCache::new(role, credentials, self.config.lwm2m.max_dtls_sessions)
      .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    self.coaps_sock = Some(sock);
    self.dtls = Some(cache);
    Ok(())
  }

  /// Run one cooperative pass: poll every listener for at most one
  /// datagram each, dispatch what's ready, run the Observe emission
  /// pass, and reap idle IPC sessions/expired client registrations.
  /// Call this in a loop; nothing here runs on its own.
  pub fn tick(&mut self, clock: &dyn Clock) -> io::Result<()> {
    self.poll_coap(clock)?;
    #[cfg(feature = "dtls")]
    self.poll_coaps(clock)?;
    self.poll_ipc_request(clock)?;
    self.emit_due_notifications(clock)?;
    self.reap_idle(clock);
    Ok(())
  }

  fn poll_coap(&mut self, clock: &dyn Clock) -> io::Result<()> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let Some(Addrd(n, peer)) = Socket::poll(&self.coap_sock, &mut buf)? else { return Ok(()) };

    match wire::decode_request(&buf[..n]) {
      | Ok(decoded) => {
        let reply = self.handle_decoded(clock, peer, &decoded);
        Socket::send(&self.coap_sock, Addrd(&reply, peer))?;
      },
      | Err(e) => log::debug!("dropping malformed CoAP datagram from {peer}: {e}"),
    }
    Ok(())
  }

  #[cfg(feature = "dtls")]
  fn poll_coaps(&mut self, clock: &dyn Clock) -> io::Result<()> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let polled = match &self.coaps_sock {
      | Some(sock) => Socket::poll(sock, &mut buf)?,
      | None => return Ok(()),
    };
    let Some(Addrd(n, peer)) = polled else { return Ok(()) };

    let Some(dtls) = &mut self.dtls else { return Ok(()) };
    let outcome = match dtls.decrypt(clock, peer, &buf[..n]) {
      | Ok(outcome) => outcome,
      | Err(e) => {
        log::debug!("dropping undecryptable DTLS datagram from {peer}: {e}");
        return Ok(());
      },
    };

    if let Some(flight) = &outcome.to_send {
      if let Some(sock) = &self.coaps_sock {
        Socket::send(sock, Addrd(flight.as_slice(), peer))?;
      }
    }

    let Some(plaintext) = outcome.plaintext else { return Ok(()) };
    match wire::decode_request(&plaintext) {
      | Ok(decoded) => {
        let reply = self.handle_decoded(clock, peer, &decoded);
        let encrypted = self.dtls.as_mut().and_then(|d| d.encrypt(peer, &reply).ok());
        if let Some(encrypted) = encrypted {
          if let Some(sock) = &self.coaps_sock {
            Socket::send(sock, Addrd(&encrypted, peer))?;
          }
        }
      },
      | Err(e) => log::debug!("dropping malformed CoAP-over-DTLS datagram from {peer}: {e}"),
    }
    Ok(())
  }

  fn handle_decoded(&mut self, clock: &dyn Clock, peer: SocketAddr, decoded: &DecodedRequest) -> Vec<u8> {
    log::trace!("{}", logging::request_summary(decoded.request.method,
                                               &decoded.request.path.to_path_string(),
                                               decoded.request.payload.len()));
    let resp = self.dispatcher.dispatch(clock, peer, &decoded.request);
    log::trace!("{}", logging::response_summary(&resp.code.to_string(), resp.payload.len()));
    wire::encode_response(decoded, &resp).unwrap_or_default()
  }

  fn poll_ipc_request(&mut self, clock: &dyn Clock) -> io::Result<()> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let Some(Addrd(n, peer)) = Socket::poll(&self.ipc_request_sock, &mut buf)? else { return Ok(()) };

    let text = String::from_utf8_lossy(&buf[..n]);
    let req = match xml::parse_request(&text) {
      | Ok(req) => req,
      | Err(e) => {
        log::debug!("dropping malformed IPC request from {peer}: {e}");
        return Ok(());
      },
    };

    let mut ctx = HandlerContext { dispatcher: &mut self.dispatcher,
                                   sessions: &mut self.sessions,
                                   directory: &mut self.directory };
    let resp = handle_request(&mut ctx, clock, peer, &req);
    let out = xml::write_response(&resp);
    Socket::send(&self.ipc_request_sock, Addrd(out.as_bytes(), peer))?;
    Ok(())
  }

  /// Run the Observe emission pass and deliver each due notification:
  /// over CoAP (optionally DTLS-encrypted) for an observer registered
  /// via a CoAP GET+Observe, or as an IPC `<Notification>` envelope for
  /// one registered via IPC `Subscribe`/`Observe`.
  fn emit_due_notifications(&mut self, clock: &dyn Clock) -> io::Result<()> {
    let due = self.dispatcher.observers.emission_pass(clock);
    for emission in due {
      if let Some(session_id) = self.sessions.session_id_for_notify_peer(emission.peer) {
        self.send_ipc_notification(session_id, &emission);
      } else {
        self.send_coap_notification(&emission)?;
      }
    }
    Ok(())
  }

  fn send_coap_notification(&mut self, emission: &Emission) -> io::Result<()> {
    let Some((format, payload)) = self.encode_emission_value(emission) else { return Ok(()) };
    let message_id = self.next_notification_message_id;
    self.next_notification_message_id = self.next_notification_message_id.wrapping_add(1);
    let datagram = wire::encode_notification(message_id, &emission.token, emission.sequence, format, &payload);

    #[cfg(feature = "dtls")]
    if let Some(dtls) = &mut self.dtls {
      if dtls.phase(emission.peer).is_some() {
        if let Ok(encrypted) = dtls.encrypt(emission.peer, &datagram) {
          if let Some(sock) = &self.coaps_sock {
            Socket::send(sock, Addrd(&encrypted, emission.peer))?;
          }
        }
        return Ok(());
      }
    }

    Socket::send(&self.coap_sock, Addrd(&datagram, emission.peer))?;
    Ok(())
  }

  fn send_ipc_notification(&mut self, session_id: i32, emission: &Emission) {
    let Some((_, payload)) = self.encode_emission_value(emission) else { return };
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
    let content = format!("<Path>{}</Path><Value>{encoded}</Value>", path_from_observed(&emission.path).to_path_string());
    let notif = NotificationEnvelope { subtype: "Notify".into(), session_id, content };
    let out = xml::write_notification(&notif);
    if let Err(e) = Socket::send(&self.ipc_notify_sock, Addrd(out.as_bytes(), emission.peer)) {
      log::debug!("failed to deliver IPC notification for session {session_id}: {e}");
    }
  }

  fn encode_emission_value(&self, emission: &Emission) -> Option<(ContentFormat, Vec<u8>)> {
    let path = path_from_observed(&emission.path);
    let object_def = self.dispatcher.registry.lookup_object(path.object_id)?;
    let tree = self.dispatcher.read_tree(object_def, &path)?;
    let payload = self.dispatcher.encode_tree(object_def, &path, &tree, emission.content_type).ok()?;
    log::trace!("{}", logging::response_summary(&emission.content_type.number().to_string(), payload.len()));
    Some((emission.content_type, payload))
  }

  fn reap_idle(&mut self, clock: &dyn Clock) {
    for id in self.sessions.reap_idle(clock) {
      log::trace!("reaped idle IPC session {id}");
    }
    for id in self.directory.expired(clock) {
      self.directory.deregister(id);
      log::trace!("expired client registration {id}");
    }
  }

  /// The underlying dispatcher, for a binary to seed with object
  /// definitions/instances before the tick loop starts.
  pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
    &mut self.dispatcher
  }
}

fn config_idle_timeout(config: &Config) -> std::time::Duration {
  config.lwm2m.ipc_session_idle_timeout
}

fn path_from_observed(path: &ObservedPath) -> Path {
  Path { object_id: path.object_id,
        instance_id: (path.instance_id >= 0).then_some(path.instance_id),
        resource_id: path.resource_id,
        resource_instance_id: path.resource_instance_id }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::model::container::OrderedMap;
  use crate::model::tree::Value;
  use crate::model::types::{ObjectDefinition, Operations, ResourceDefinition, ResourceType};
  use crate::test::FakeClock;

  fn local_config() -> Config {
    let mut config = Config::default();
    config.lwm2m.coap_bind_addr = "127.0.0.1:0".parse().unwrap();
    config.lwm2m.coaps_bind_addr = "127.0.0.1:0".parse().unwrap();
    config.lwm2m.ipc_request_addr = "127.0.0.1:0".parse().unwrap();
    config.lwm2m.ipc_notify_addr = "127.0.0.1:0".parse().unwrap();
    config
  }

  fn dispatcher_with_temperature() -> Dispatcher {
    let mut d = Dispatcher::new();
    let mut resources = OrderedMap::new();
    resources.insert(5700,
                      ResourceDefinition { id: 5700,
                                           name: "Sensor Value".into(),
                                           kind: ResourceType::Float,
                                           min_instances: 1,
                                           max_instances: 1,
                                           operation: Operations::READ,
                                           default_value: None,
                                           handler: None });
    d.registry
     .register_object(ObjectDefinition { id: 3303,
                                         name: "Temperature".into(),
                                         min_instances: 0,
                                         max_instances: 0,
                                         handler: None,
                                         resources })
     .unwrap();
    d.store.create_object(3303, 0);
    let inst = d.store.create_object_instance(3303, Some(0)).unwrap();
    d.store.create_resource(3303, inst, 5700).unwrap();
    let bytes = crate::codec::tlv::encode_value(ResourceType::Float, &Value::Float(21.5));
    let len = bytes.len();
    d.store.set_resource_instance_value(3303, inst, 5700, 0, 0, &bytes, len).unwrap();
    d
  }

  #[test]
  fn new_binds_every_listener_on_an_ephemeral_port() {
    let runtime = Runtime::new(local_config(), Dispatcher::new()).unwrap();
    assert!(Socket::local_addr(&runtime.coap_sock).unwrap().port() != 0);
    assert!(Socket::local_addr(&runtime.ipc_request_sock).unwrap().port() != 0);
  }

  #[test]
  fn a_coap_get_round_trips_through_the_tick_loop() {
    let mut runtime = Runtime::new(local_config(), dispatcher_with_temperature()).unwrap();
    let clock = FakeClock::new();

    let client = net::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server_addr = Socket::local_addr(&runtime.coap_sock).unwrap();

    let mut req: coap_lite::CoapRequest<SocketAddr> = coap_lite::CoapRequest::new();
    req.set_method(coap_lite::RequestType::Get);
    req.set_path("3303/0/5700");
    req.message.header.message_id = 1;
    req.message.set_token(vec![7]);
    let bytes = req.message.to_bytes().unwrap();

    Socket::send(&client, Addrd(&bytes, server_addr)).unwrap();
    runtime.tick(&clock).unwrap();

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    Socket::set_read_timeout(&client, Some(std::time::Duration::from_millis(200))).unwrap();
    let Addrd(n, _) = Socket::recv(&client, &mut buf).unwrap();
    let reply = coap_lite::Packet::from_bytes(&buf[..n]).unwrap();
    assert_eq!(reply.header.message_id, 1);
    assert_eq!(reply.get_token(), &vec![7u8]);
    assert!(!reply.payload.is_empty(), "a GET on a populated resource should carry a TLV payload");
  }

  #[test]
  fn an_ipc_connect_round_trips_through_the_tick_loop() {
    let mut runtime = Runtime::new(local_config(), Dispatcher::new()).unwrap();
    let clock = FakeClock::new();

    let client = net::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server_addr = Socket::local_addr(&runtime.ipc_request_sock).unwrap();

    let req = "<Request><Type>Connect</Type><SessionID>0</SessionID><Content></Content></Request>";
    Socket::send(&client, Addrd(req.as_bytes(), server_addr)).unwrap();
    runtime.tick(&clock).unwrap();

    Socket::set_read_timeout(&client, Some(std::time::Duration::from_millis(200))).unwrap();
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let Addrd(n, _) = Socket::recv(&client, &mut buf).unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.contains("<Code>Success</Code>"));
  }

  #[test]
  fn reap_idle_drops_sessions_and_expired_registrations() {
    let mut runtime = Runtime::new(local_config(), Dispatcher::new()).unwrap();
    let clock = FakeClock::new();
    runtime.sessions.connect(&clock, "127.0.0.1:1".parse().unwrap());
    runtime.directory.register(&clock, "node-1".into(), 1, vec![]);

    clock.advance(std::time::Duration::from_secs(600));
    runtime.reap_idle(&clock);

    assert!(runtime.sessions.is_empty());
    assert!(runtime.directory.list().is_empty());
  }
}
