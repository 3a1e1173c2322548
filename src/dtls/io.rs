//! An in-memory `Read`/`Write` adapter standing in for the datagram
//! socket underneath an OpenSSL DTLS state machine.
//!
//! `openssl::ssl::SslStream` wants a blocking `Read + Write` transport;
//! we don't have one — a single UDP datagram already arrived off
//! [`crate::net::Socket::recv`] and any bytes the handshake or
//! `Encrypt` produces need to go back out the same way. This adapter
//! just buffers one direction at a time: feed received ciphertext in
//! with [`DatagramIo::push_inbound`], drain produced ciphertext out with
//! [`DatagramIo::take_outbound`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// A byte-buffer transport: `read` drains what was pushed in, `write`
/// appends to what can be taken out.
#[derive(Debug, Default)]
pub struct DatagramIo {
  inbound: VecDeque<u8>,
  outbound: Vec<u8>,
}

impl DatagramIo {
  /// A transport with nothing buffered in either direction.
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a received datagram's bytes for the next `read` calls.
  pub fn push_inbound(&mut self, bytes: &[u8]) {
    self.inbound.extend(bytes.iter().copied());
  }

  /// Take whatever has been `write`n so far, for sending as one
  /// outbound datagram. Leaves the adapter empty on that side.
  pub fn take_outbound(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.outbound)
  }
}

impl Read for DatagramIo {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if self.inbound.is_empty() {
      return Err(io::Error::new(io::ErrorKind::WouldBlock, "no datagram buffered"));
    }
    let n = self.inbound.len().min(buf.len());
    for slot in buf.iter_mut().take(n) {
      *slot = self.inbound.pop_front().unwrap();
    }
    Ok(n)
  }
}

impl Write for DatagramIo {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.outbound.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn read_drains_pushed_bytes() {
    let mut io = DatagramIo::new();
    io.push_inbound(b"hello");
    let mut buf = [0u8; 8];
    let n = io.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
  }

  #[test]
  fn read_with_nothing_buffered_would_block() {
    let mut io = DatagramIo::new();
    let mut buf = [0u8; 8];
    let err = io.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
  }

  #[test]
  fn write_then_take_outbound_round_trips() {
    let mut io = DatagramIo::new();
    io.write_all(b"ciphertext").unwrap();
    assert_eq!(io.take_outbound(), b"ciphertext");
    assert!(io.take_outbound().is_empty());
  }
}
