//! Test doubles shared across this crate's unit tests: a controllable
//! [`FakeClock`] and an in-memory [`FakeSocket`] transport.
//!
//! Adapted from the teacher's `ClockMock`/`SockMock` pair onto this
//! crate's `time::Clock`/`net::Socket` traits.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::net::{Addrd, Socket};
use crate::time::Clock;

/// A clock whose `now()` can be advanced manually, for deterministic
/// retry/observe timing tests.
pub struct FakeClock {
  base: Instant,
  offset: Cell<Duration>,
}

impl FakeClock {
  /// A fresh clock pinned to the real time at construction, offset zero.
  pub fn new() -> Self {
    Self { base: Instant::now(), offset: Cell::new(Duration::ZERO) }
  }

  /// Move the clock forward by `by`.
  pub fn advance(&self, by: Duration) {
    self.offset.set(self.offset.get() + by);
  }

  /// Set the clock's offset from its base instant directly.
  pub fn set(&self, offset: Duration) {
    self.offset.set(offset);
  }
}

impl Clock for FakeClock {
  fn now(&self) -> Instant {
    self.base + self.offset.get()
  }
}

pub fn dummy_addr() -> SocketAddr {
  "192.168.0.1:8080".parse().unwrap()
}

pub fn dummy_addr_2() -> SocketAddr {
  "192.168.0.2:8080".parse().unwrap()
}

pub fn dummy_addr_3() -> SocketAddr {
  "192.168.0.3:8080".parse().unwrap()
}

/// An in-memory socket double: datagrams "sent" on one end are queued
/// for the other to "receive", with no actual OS socket involved.
#[derive(Debug, Default)]
pub struct FakeSocket {
  pub local: SocketAddr,
  /// Inbound datagrams, as if received from a remote peer.
  pub rx: Mutex<VecDeque<Addrd<Vec<u8>>>>,
  /// Outbound datagrams, recorded for assertions.
  pub tx: Mutex<Vec<Addrd<Vec<u8>>>>,
}

impl FakeSocket {
  pub fn new(local: SocketAddr) -> Self {
    Self { local, rx: Mutex::new(VecDeque::new()), tx: Mutex::new(Vec::new()) }
  }

  /// Queue a datagram as if it arrived from `from`.
  pub fn deliver(&self, payload: &[u8], from: SocketAddr) {
    self.rx.lock().unwrap().push_back(Addrd(payload.to_vec(), from));
  }

  /// Drain everything sent via [`Socket::send`] so far.
  pub fn sent(&self) -> Vec<Addrd<Vec<u8>>> {
    self.tx.lock().unwrap().drain(..).collect()
  }
}

impl Socket for FakeSocket {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    Ok(self.local)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<usize> {
    let n = msg.data().len();
    self.tx.lock().unwrap().push(msg.map(Vec::from));
    Ok(n)
  }

  fn recv(&self, buffer: &mut [u8]) -> io::Result<Addrd<usize>> {
    let mut rx = self.rx.lock().unwrap();
    match rx.pop_front() {
      | Some(Addrd(bytes, addr)) => {
        let n = bytes.len().min(buffer.len());
        buffer[..n].copy_from_slice(&bytes[..n]);
        Ok(Addrd(n, addr))
      },
      | None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no datagram queued")),
    }
  }

  fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fake_clock_advances_deterministically() {
    let clock = FakeClock::new();
    let t0 = clock.now();
    clock.advance(Duration::from_secs(5));
    assert_eq!(clock.now().saturating_duration_since(t0), Duration::from_secs(5));
  }

  #[test]
  fn fake_socket_delivers_queued_datagrams() {
    let sock = FakeSocket::new(dummy_addr());
    sock.deliver(b"ping", dummy_addr_2());

    let mut buf = [0u8; 8];
    let got = Socket::recv(&sock, &mut buf).unwrap();
    assert_eq!(&buf[..*got.data()], b"ping");
    assert_eq!(got.addr(), dummy_addr_2());
  }
}
