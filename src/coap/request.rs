//! CoAP request parsing (§6): path decomposition, Observe option, and
//! Content-Format/Accept negotiation.

use crate::coap::method::Method;
use crate::codec::ContentFormat;

/// An LwM2M resource path, `/<obj>/<inst>/<res>/<resInst>`, with any
/// suffix absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Path {
  /// Object ID.
  pub object_id: u16,
  /// Object Instance ID, if the path names one.
  pub instance_id: Option<i32>,
  /// Resource ID, if the path names one.
  pub resource_id: Option<u16>,
  /// Resource Instance ID, if the path names one.
  pub resource_instance_id: Option<u16>,
}

/// Errors encountered while parsing a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
  /// The path was empty, or a segment wasn't a valid non-negative integer.
  Malformed,
}

impl std::fmt::Display for PathError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("malformed LwM2M resource path")
  }
}

impl std::error::Error for PathError {}

impl Path {
  /// Parse a CoAP Uri-Path (segments already split, e.g. from
  /// `coap_lite::CoapRequest::get_path()`) into an LwM2M path.
  pub fn parse(segments: &[&str]) -> Result<Self, PathError> {
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
      return Err(PathError::Malformed);
    }
    let parse = |s: &str| s.parse().map_err(|_| PathError::Malformed);

    let object_id: u16 = parse(segments[0])?;
    let instance_id = segments.get(1).map(|s| parse(s)).transpose()?;
    let resource_id = segments.get(2).map(|s| parse(s)).transpose()?;
    let resource_instance_id = segments.get(3).map(|s| parse(s)).transpose()?;

    Ok(Path { object_id, instance_id, resource_id, resource_instance_id })
  }

  /// Render back to a `/`-joined path string.
  pub fn to_path_string(self) -> String {
    let mut segs = vec![self.object_id.to_string()];
    if let Some(i) = self.instance_id {
      segs.push(i.to_string());
    }
    if let Some(r) = self.resource_id {
      segs.push(r.to_string());
    }
    if let Some(ri) = self.resource_instance_id {
      segs.push(ri.to_string());
    }
    segs.join("/")
  }
}

/// Whether an Observe option establishes (`0`) or cancels (`1`) an
/// observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observe {
  /// Observe: 0 — establish.
  Register,
  /// Observe: 1 — cancel.
  Deregister,
}

impl Observe {
  /// Decode the Observe option's numeric value.
  pub fn from_value(v: u32) -> Option<Self> {
    match v {
      | 0 => Some(Self::Register),
      | 1 => Some(Self::Deregister),
      | _ => None,
    }
  }
}

/// Who is making the request: a remote LwM2M Server over CoAP, or the
/// local application driving the object store directly (§4.6 step 3).
/// A Server request must satisfy each resource's Operations bitmask; a
/// Client request — originating from this device's own management
/// logic rather than the network — is trusted and bypasses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// Decoded off a CoAP or CoAP-over-DTLS listener.
  Server,
  /// Synthesized locally, not subject to the operation bitmask.
  Client,
}

/// A parsed CoAP request ready for dispatch.
#[derive(Debug, Clone)]
pub struct Request {
  /// The request method.
  pub method: Method,
  /// The parsed resource path.
  pub path: Path,
  /// CoAP message token, echoed on the response.
  pub token: Vec<u8>,
  /// Observe option, if present.
  pub observe: Option<Observe>,
  /// Content-Format of `payload`, if present (required on PUT/POST).
  pub content_format: Option<ContentFormat>,
  /// Accept option, if present — the format the client wants the
  /// response encoded with.
  pub accept: Option<ContentFormat>,
  /// Request body.
  pub payload: Vec<u8>,
  /// Which listener accepted the datagram this request was decoded
  /// from.
  pub origin: Origin,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_full_path() {
    let path = Path::parse(&["3303", "0", "5700"]).unwrap();
    assert_eq!(path.object_id, 3303);
    assert_eq!(path.instance_id, Some(0));
    assert_eq!(path.resource_id, Some(5700));
    assert_eq!(path.resource_instance_id, None);
  }

  #[test]
  fn rejects_empty_path() {
    assert_eq!(Path::parse(&[]), Err(PathError::Malformed));
  }

  #[test]
  fn round_trips_to_string() {
    let path = Path::parse(&["3", "0"]).unwrap();
    assert_eq!(path.to_path_string(), "3/0");
  }
}
