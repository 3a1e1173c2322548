//! CoAP response codes and the response builder (§6).
//!
//! Adapted from the teacher's `resp::code` module and its `code!`
//! macro: same RFC 7252-numbered constants, built over a concrete
//! `Code(u8, u8)` instead of `toad_msg::Code`, and without the
//! `toad_macros::rfc_7252_doc!` doc-generation macro this crate has no
//! use for.

use crate::codec::ContentFormat;

/// A CoAP response code, `class.detail` (e.g. `2.05` is `CONTENT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8, pub u8);

impl Code {
  /// Construct a code from its class and detail digits.
  pub const fn new(class: u8, detail: u8) -> Self {
    Self(class, detail)
  }

  /// The response class: 2 (success), 4 (client error), 5 (server error).
  pub fn class(self) -> u8 {
    self.0
  }

  /// Whether this is a `2.xx` success code.
  pub fn is_success(self) -> bool {
    self.0 == 2
  }
}

impl std::fmt::Display for Code {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{:02}", self.0, self.1)
  }
}

macro_rules! code {
  ($(#[$meta:meta])* $name:ident = $c:literal.$d:literal) => {
    $(#[$meta])*
    pub const $name: Code = Code::new($c, $d);
  };
}

// 2.xx
code!(
  /// 2.01 Created — POST created an Object Instance; `Location-Path` carries its path.
  CREATED = 2.01
);
code!(
  /// 2.02 Deleted.
  DELETED = 2.02
);
code!(
  /// 2.04 Changed — write succeeded.
  CHANGED = 2.04
);
code!(
  /// 2.05 Content — read succeeded, payload attached.
  CONTENT = 2.05
);

// 4.xx
code!(
  /// 4.00 Bad Request — malformed path, TLV, or JSON envelope.
  BAD_REQUEST = 4.00
);
code!(
  /// 4.01 Unauthorized.
  UNAUTHORIZED = 4.01
);
code!(
  /// 4.03 Forbidden.
  FORBIDDEN = 4.03
);
code!(
  /// 4.04 Not Found — path doesn't resolve to a known object/instance/resource.
  NOT_FOUND = 4.04
);
code!(
  /// 4.05 Method Not Allowed — operation not permitted for this resource.
  METHOD_NOT_ALLOWED = 4.05
);
code!(
  /// 4.06 Not Acceptable — no codec for the requested Content-Format.
  NOT_ACCEPTABLE = 4.06
);

// 5.xx
code!(
  /// 5.00 Internal Server Error.
  INTERNAL_SERVER_ERROR = 5.00
);
code!(
  /// 5.04 Gateway Timeout — used here for CON retransmission exhaustion.
  GATEWAY_TIMEOUT = 5.04
);

/// A CoAP response ready to be encoded and sent.
#[derive(Debug, Clone)]
pub struct Response {
  /// Response code.
  pub code: Code,
  /// `Location-Path` segments, set on `2.01 Created`.
  pub location_path: Vec<String>,
  /// Negotiated Content-Format of `payload`, if any is attached.
  pub content_format: Option<ContentFormat>,
  /// Response body.
  pub payload: Vec<u8>,
}

impl Response {
  /// A response with `code` and an empty payload.
  pub fn new(code: Code) -> Self {
    Self { code, location_path: Vec::new(), content_format: None, payload: Vec::new() }
  }

  /// Attach a payload and its Content-Format.
  ///
  /// ```
  /// use toad_lwm2m::coap::response::{Response, CONTENT};
  /// use toad_lwm2m::codec::ContentFormat;
  ///
  /// let resp = Response::new(CONTENT).with_payload(ContentFormat::Tlv, vec![1, 2, 3]);
  /// assert_eq!(resp.payload, vec![1, 2, 3]);
  /// ```
  pub fn with_payload(mut self, format: ContentFormat, payload: Vec<u8>) -> Self {
    self.content_format = Some(format);
    self.payload = payload;
    self
  }

  /// Attach a `Location-Path`, set on `2.01 Created` responses to a
  /// successful POST-create.
  pub fn with_location_path(mut self, segments: Vec<String>) -> Self {
    self.location_path = segments;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn code_formats_as_dotted_string() {
    assert_eq!(CONTENT.to_string(), "2.05");
    assert_eq!(NOT_FOUND.to_string(), "4.04");
  }

  #[test]
  fn created_response_carries_location_path() {
    let resp = Response::new(CREATED).with_location_path(vec!["3".into(), "0".into()]);
    assert_eq!(resp.location_path, vec!["3", "0"]);
  }
}
