//! Socket abstractions: [`Addrd`], a value tagged with the address it
//! came from or is going to, and [`Socket`], a minimal datagram socket
//! trait implemented over [`std::net::UdpSocket`].
//!
//! Adapted from the teacher's `no_std_net`/`nb`-generic pair onto
//! `std::net` — this crate runs hosted, so there's no reason to stay
//! generic over an embedded network stack.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Data that came from (or is going to) a network socket.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this `Addrd`.
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the address and get the data.
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the contained data.
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Map the contained data, with a copy of the address.
  pub fn map_with_addr<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> Addrd<R> {
    Addrd(f(self.0, self.1), self.1)
  }

  /// Borrow the contained data.
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contained data.
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address.
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Turn the whole structure into something else.
  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// A UDP datagram socket, abstracted so the DTLS layer and tests can
/// substitute a fake transport. Unlike the teacher's embedded-nal-style
/// trait this is blocking: the runtime's tick loop uses a short read
/// timeout rather than polling a non-blocking socket.
pub trait Socket {
  /// Local bound address.
  fn local_addr(&self) -> io::Result<SocketAddr>;

  /// Send `payload` to `addr`.
  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<usize>;

  /// Send a message bypassing DTLS. For sockets that don't participate
  /// in DTLS this is just an alias for [`Socket::send`].
  fn insecure_send(&self, msg: Addrd<&[u8]>) -> io::Result<usize> {
    self.send(msg)
  }

  /// Receive a single datagram into `buffer`, blocking (up to the
  /// configured read timeout) until one arrives.
  fn recv(&self, buffer: &mut [u8]) -> io::Result<Addrd<usize>>;

  /// Set the blocking read timeout used by [`Socket::recv`]. `None`
  /// blocks forever.
  fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

  /// Poll the socket for at most one datagram, translating a timed-out
  /// read into `Ok(None)` rather than an error.
  fn poll(&self, buffer: &mut [u8]) -> io::Result<Option<Addrd<usize>>> {
    match self.recv(buffer) {
      | Ok(a) => Ok(Some(a)),
      | Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
        Ok(None)
      },
      | Err(e) => Err(e),
    }
  }
}

impl Socket for UdpSocket {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    UdpSocket::local_addr(self)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<usize> {
    self.send_to(msg.0, msg.1)
  }

  fn recv(&self, buffer: &mut [u8]) -> io::Result<Addrd<usize>> {
    let (n, addr) = self.recv_from(buffer)?;
    Ok(Addrd(n, addr))
  }

  fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
    UdpSocket::set_read_timeout(self, timeout)
  }
}

/// Bind a UDP socket to `addr`.
pub fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
  UdpSocket::bind(addr)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn addrd_map_preserves_address() {
    let addr: SocketAddr = "127.0.0.1:5683".parse().unwrap();
    let a = Addrd(1u8, addr);
    let b = a.map(|n| n + 1);
    assert_eq!(*b.data(), 2);
    assert_eq!(b.addr(), addr);
  }

  #[test]
  fn udp_sockets_can_talk_to_each_other() {
    let a = bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let b = bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let b_addr = Socket::local_addr(&b).unwrap();

    Socket::send(&a, Addrd(b"hello", b_addr)).unwrap();

    let mut buf = [0u8; 16];
    let got = Socket::recv(&b, &mut buf).unwrap();
    assert_eq!(&buf[..*got.data()], b"hello");
  }
}
