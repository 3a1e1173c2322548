//! Runtime configuration: retry/timing knobs for the CoAP transport, plus
//! the bind addresses and capacity limits that make up the LwM2M
//! runtime as a whole.
//!
//! Adapted from the teacher's `Config`/`Msg`/`Con`/`Non` shape (still
//! std::time-based per [`crate::retry`]) and extended with the fields a
//! hosted LwM2M client/server needs: CoAP/DTLS bind addresses, the IPC
//! listen addresses, and the DTLS session cache capacity. Loadable from
//! a TOML file via `serde`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{Attempts, Strategy};

/// Bytes / second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BytesPerSecond(pub u16);

/// Retry configuration for outbound Confirmable requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Con {
  /// Retry strategy for CON requests that have not yet been ACKed.
  ///
  /// Defaults to an exponential retry strategy:
  /// ```
  /// use std::time::Duration;
  /// use toad_lwm2m::config::Con;
  /// use toad_lwm2m::retry::Strategy;
  ///
  /// assert_eq!(Con::default().unacked_retry_strategy,
  ///            Strategy::Exponential { init_min: Duration::from_millis(500),
  ///                                    init_max: Duration::from_millis(1_000) });
  /// ```
  pub unacked_retry_strategy: Strategy,

  /// Retry strategy for CON requests that have already been ACKed, but
  /// not yet carried a separate response. Usually lazier than
  /// `unacked_retry_strategy`.
  ///
  /// ```
  /// use std::time::Duration;
  /// use toad_lwm2m::config::Con;
  /// use toad_lwm2m::retry::Strategy;
  ///
  /// assert_eq!(Con::default().acked_retry_strategy,
  ///            Strategy::Exponential { init_min: Duration::from_millis(1_000),
  ///                                    init_max: Duration::from_millis(2_000) });
  /// ```
  pub acked_retry_strategy: Strategy,

  /// Number of times a CON request may be resent before erroring.
  ///
  /// ```
  /// use toad_lwm2m::config::Con;
  /// use toad_lwm2m::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(4));
  /// ```
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { unacked_retry_strategy: Strategy::Exponential { init_min: Duration::from_millis(500),
                                                          init_max: Duration::from_millis(1_000) },
          acked_retry_strategy: Strategy::Exponential { init_min: Duration::from_millis(1_000),
                                                        init_max: Duration::from_millis(2_000) },
          max_attempts: Attempts(4) }
  }
}

/// Retry configuration for outbound Non-confirmable requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Non {
  /// Strategy used when a NON request hasn't yet received a response.
  ///
  /// ```
  /// use std::time::Duration;
  /// use toad_lwm2m::config::Non;
  /// use toad_lwm2m::retry::Strategy;
  ///
  /// assert_eq!(Non::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Duration::from_millis(250),
  ///                                    init_max: Duration::from_millis(500) });
  /// ```
  pub retry_strategy: Strategy,

  /// Number of times a NON request may be resent before erroring.
  pub max_attempts: Attempts,
}

impl Default for Non {
  fn default() -> Self {
    Non { retry_strategy: Strategy::Exponential { init_min: Duration::from_millis(250),
                                                  init_max: Duration::from_millis(500) },
          max_attempts: Attempts(4) }
  }
}

/// Configuration related to parsing & handling messages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Msg {
  /// Seed used to generate message tokens. Defaults to 0, although it's
  /// best practice to set this to something else (e.g. a random integer
  /// or machine identifier) so tokens aren't trivially guessable.
  pub token_seed: u16,

  /// Transmission rate we should do our best not to exceed while
  /// waiting for responses to NON requests or acked CON requests.
  pub probing_rate: BytesPerSecond,

  /// See [`Con`].
  pub con: Con,

  /// See [`Non`].
  pub non: Non,

  /// Maximum delay (actual delay is random between zero and this) before
  /// responding to a multicast request.
  #[serde(with = "duration_millis")]
  pub multicast_response_leisure: Duration,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          probing_rate: BytesPerSecond(1000),
          con: Con::default(),
          non: Non::default(),
          multicast_response_leisure: Duration::from_millis(5000) }
  }
}

/// LwM2M-specific runtime configuration: where the CoAP, DTLS, and IPC
/// listeners bind, and how many concurrent DTLS sessions may be cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lwm2m {
  /// Bind address for plaintext CoAP. Defaults to `0.0.0.0:5683`.
  pub coap_bind_addr: SocketAddr,

  /// Bind address for CoAP over DTLS. Defaults to `0.0.0.0:5684`.
  pub coaps_bind_addr: SocketAddr,

  /// Bind address the IPC server listens for client session requests on.
  pub ipc_request_addr: SocketAddr,

  /// Bind address the IPC server sends notifications from.
  pub ipc_notify_addr: SocketAddr,

  /// Maximum number of concurrently cached DTLS peer sessions.
  pub max_dtls_sessions: usize,

  /// Idle duration after which an IPC session is reaped.
  #[serde(with = "duration_millis")]
  pub ipc_session_idle_timeout: Duration,
}

impl Default for Lwm2m {
  fn default() -> Self {
    Lwm2m { coap_bind_addr: "0.0.0.0:5683".parse().unwrap(),
            coaps_bind_addr: "0.0.0.0:5684".parse().unwrap(),
            ipc_request_addr: "127.0.0.1:12345".parse().unwrap(),
            ipc_notify_addr: "127.0.0.1:54321".parse().unwrap(),
            max_dtls_sessions: 3,
            ipc_session_idle_timeout: Duration::from_secs(300) }
  }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
  /// See [`Msg`].
  pub msg: Msg,

  /// Maximum number of requests that can be in flight at once. Defaults
  /// to `1` (no concurrency).
  pub max_concurrent_requests: u8,

  /// See [`Lwm2m`].
  pub lwm2m: Lwm2m,
}

impl Config {
  /// Parse configuration from a TOML document, falling back to
  /// [`Config::default`] for any field the document omits.
  pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(s)
  }

  pub(crate) fn max_transmit_span_millis(&self) -> u64 {
    let acked_con = self.msg
                        .con
                        .acked_retry_strategy
                        .max_time(self.msg.con.max_attempts - Attempts(1))
                        .as_millis() as u64;

    let unacked_con = self.msg
                          .con
                          .unacked_retry_strategy
                          .max_time(self.msg.con.max_attempts - Attempts(1))
                          .as_millis() as u64;

    let non = self.msg
                  .non
                  .retry_strategy
                  .max_time(self.msg.non.max_attempts - Attempts(1))
                  .as_millis() as u64;

    acked_con.max(unacked_con).max(non)
  }

  pub(crate) fn max_transmit_wait_millis(&self) -> u64 {
    let acked_con = self.msg
                        .con
                        .acked_retry_strategy
                        .max_time(self.msg.con.max_attempts)
                        .as_millis() as u64;

    let unacked_con = self.msg
                          .con
                          .unacked_retry_strategy
                          .max_time(self.msg.con.max_attempts)
                          .as_millis() as u64;

    let non = self.msg
                  .non
                  .retry_strategy
                  .max_time(self.msg.non.max_attempts)
                  .as_millis() as u64;

    acked_con.max(unacked_con).max(non)
  }

  pub(crate) fn max_latency_millis(&self) -> u64 {
    100_000
  }

  pub(crate) fn expected_processing_delay_millis(&self) -> u64 {
    200
  }

  pub(crate) fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.expected_processing_delay_millis()
  }
}

mod duration_millis {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_ports_match_registry() {
    let cfg = Config::default();
    assert_eq!(cfg.lwm2m.coap_bind_addr.port(), 5683);
    assert_eq!(cfg.lwm2m.coaps_bind_addr.port(), 5684);
  }

  #[test]
  fn toml_overrides_merge_over_defaults() {
    let cfg = Config::from_toml(r#"
          max_concurrent_requests = 1

          [msg]
          token_seed = 7
          probing_rate = 1000
          multicast_response_leisure = 5000

          [msg.con]
          unacked_retry_strategy = { Exponential = { init_min = 500, init_max = 1000 } }
          acked_retry_strategy = { Exponential = { init_min = 1000, init_max = 2000 } }
          max_attempts = 4

          [msg.non]
          retry_strategy = { Exponential = { init_min = 250, init_max = 500 } }
          max_attempts = 4

          [lwm2m]
          coap_bind_addr = "127.0.0.1:9999"
          coaps_bind_addr = "0.0.0.0:5684"
          ipc_request_addr = "127.0.0.1:12345"
          ipc_notify_addr = "127.0.0.1:54321"
          max_dtls_sessions = 3
          ipc_session_idle_timeout = 300000
        "#).unwrap();
    assert_eq!(cfg.lwm2m.coap_bind_addr.port(), 9999);
    assert_eq!(cfg.msg.token_seed, 7);
  }
}
