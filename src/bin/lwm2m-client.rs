//! A tiny IPC control client: drives a running `lwm2m-server` over its
//! XML-over-UDP control surface — `Connect`, an optional `Get` on a path
//! given as an argument, then `Disconnect` — and prints what came back.
//!
//! Mirrors the teacher's blocking example clients in shape (connect, send
//! a couple of requests, log the outcome) but speaks the IPC envelope
//! protocol instead of raw CoAP.

use std::net::UdpSocket;
use std::time::Duration;

use toad_lwm2m::config::Config;

fn send_and_receive(sock: &UdpSocket, server: &str, request: &str) -> String {
  sock.send_to(request.as_bytes(), server).expect("failed to send IPC request");

  let mut buf = [0u8; 2048];
  let n = sock.recv(&mut buf).expect("failed to read IPC response");
  String::from_utf8_lossy(&buf[..n]).into_owned()
}

/// Pull `<SessionID>…</SessionID>`'s text content out of a response
/// envelope; `ipc::xml` owns the real parser, but this binary only needs
/// one field and isn't worth linking the library's internal reader for it.
fn session_id_of(xml: &str) -> i32 {
  let start = xml.find("<SessionID>").expect("response missing SessionID") + "<SessionID>".len();
  let end = xml[start..].find("</SessionID>").expect("response missing SessionID") + start;
  xml[start..end].parse().expect("SessionID was not an integer")
}

fn main() {
  env_logger::init();

  let config = match std::env::args().nth(1) {
    | Some(path) => {
      let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read config file {path}: {e}"));
      Config::from_toml(&contents).unwrap_or_else(|e| panic!("invalid config file {path}: {e}"))
    },
    | None => Config::default(),
  };
  let path = std::env::args().nth(2).unwrap_or_else(|| "3/0".into());

  let sock = UdpSocket::bind("127.0.0.1:0").expect("failed to bind a local UDP socket");
  sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

  let connect = "<Request><Type>Connect</Type><SessionID>0</SessionID><Content></Content></Request>";
  let connected = send_and_receive(&sock, &config.lwm2m.ipc_request_addr.to_string(), connect);
  let session_id = session_id_of(&connected);
  log::info!("connected, SessionID={session_id}");

  let get = format!("<Request><Type>Get</Type><SessionID>{session_id}</SessionID><Content><Path>{path}</Path></Content></Request>");
  let got = send_and_receive(&sock, &config.lwm2m.ipc_request_addr.to_string(), &get);
  log::info!("Get {path} -> {got}");

  let disconnect =
    format!("<Request><Type>Disconnect</Type><SessionID>{session_id}</SessionID><Content></Content></Request>");
  let disconnected = send_and_receive(&sock, &config.lwm2m.ipc_request_addr.to_string(), &disconnect);
  log::info!("disconnected -> {disconnected}");
}
