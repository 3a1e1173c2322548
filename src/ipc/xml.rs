//! XML envelope parsing and serialization for the IPC surface (§4.9):
//! `<Request>`/`<Response>`/`<Notification>`, plus the per-leaf
//! `<Result><Error>…</Error>[<LWM2MError>…</LWM2MError>]</Result>`
//! outcome every response embeds.
//!
//! Grounded on `original_source/core/src/client/lwm2m_client_xml_handlers.c`'s
//! envelope shape. The teacher has no XML surface of its own — this
//! reads/writes with `quick_xml`'s low-level `Reader`/`Writer` rather
//! than its `serde` integration, since `<Content>` holds an arbitrary,
//! subtype-specific XML subtree that a single `#[derive(Deserialize)]`
//! struct can't describe generically.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::api::Api;
use crate::error::protocol::Protocol;

/// Errors encountered parsing an IPC envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
  /// The document wasn't well-formed XML.
  Malformed,
  /// A required element (`Type`, `SessionID`, the outer envelope tag)
  /// was missing.
  MissingField(&'static str),
}

impl std::fmt::Display for XmlError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      | XmlError::Malformed => f.write_str("malformed IPC envelope"),
      | XmlError::MissingField(name) => write!(f, "IPC envelope missing <{name}>"),
    }
  }
}

impl std::error::Error for XmlError {}

/// A parsed `<Request>` envelope. `content` is the raw inner XML of
/// `<Content>`, left unparsed — each subtype handler knows its own
/// shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
  /// `<Type>`: the request subtype (`Connect`, `Get`, `Define`, ...).
  pub subtype: String,
  /// `<SessionID>`.
  pub session_id: i32,
  /// Raw inner XML of `<Content>`, or empty if the request carried
  /// none.
  pub content: String,
}

/// A `<Response>` envelope ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
  /// `<Type>`: echoes the request subtype.
  pub subtype: String,
  /// `<Code>`: the overall outcome, rendered via [`Api`]'s `Debug` form.
  pub code: Api,
  /// `<SessionID>`: echoes the request's, or the freshly assigned one
  /// for `Connect`.
  pub session_id: i32,
  /// Raw inner XML for `<Content>`, already rendered by the handler
  /// (e.g. a concatenation of per-leaf `<Result>` elements).
  pub content: String,
}

/// A `<Notification>` envelope, sent unprompted on a session's notify
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEnvelope {
  /// `<Type>`: what kind of event this is (`Notify`, `ClientRegister`, ...).
  pub subtype: String,
  /// `<SessionID>` the notification is addressed to.
  pub session_id: i32,
  /// Raw inner XML for `<Content>`.
  pub content: String,
}

/// One leaf's outcome within a multi-leaf `Set`/`Get`/`Define`/`Delete`
/// response (§7's partial-result propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafResult {
  /// The IPC-facing outcome.
  pub error: Api,
  /// The underlying protocol result, when a CoAP-facing store/registry
  /// operation produced one.
  pub lwm2m_error: Option<Protocol>,
}

impl LeafResult {
  /// A successful leaf outcome.
  pub fn ok() -> Self {
    LeafResult { error: Api::Success, lwm2m_error: None }
  }

  /// A failed leaf outcome, with the protocol result that caused it.
  pub fn from_protocol(result: Protocol, ambiguous_default: Api) -> Self {
    let error = crate::error::api::from_protocol(result, ambiguous_default);
    let lwm2m_error = (!matches!(result, Protocol::Success
                                         | Protocol::Created
                                         | Protocol::Deleted
                                         | Protocol::Changed
                                         | Protocol::Content)).then_some(result);
    LeafResult { error, lwm2m_error }
  }

  /// Render as `<Result><Error>…</Error>[<LWM2MError>…</LWM2MError>]</Result>`.
  pub fn to_xml(self) -> String {
    match self.lwm2m_error {
      | Some(lwm2m) => format!("<Result><Error>{:?}</Error><LWM2MError>{lwm2m:?}</LWM2MError></Result>",
                               self.error),
      | None => format!("<Result><Error>{:?}</Error></Result>", self.error),
    }
  }
}

/// Parse a `<Request>` envelope.
pub fn parse_request(xml: &str) -> Result<RequestEnvelope, XmlError> {
  let (subtype, session_id, content) = parse_envelope(xml, "Request")?;
  Ok(RequestEnvelope { subtype, session_id, content })
}

/// Render a `<Response>` envelope.
pub fn write_response(resp: &ResponseEnvelope) -> String {
  write_envelope("Response",
                 &resp.subtype,
                 resp.session_id,
                 &format!("<Code>{:?}</Code>{}", resp.code, resp.content))
}

/// Render a `<Notification>` envelope.
pub fn write_notification(notif: &NotificationEnvelope) -> String {
  write_envelope("Notification", &notif.subtype, notif.session_id, &notif.content)
}

/// Shared envelope parser: extract `<Type>`, `<SessionID>`, and the raw
/// inner XML of `<Content>` from any of the three envelope kinds.
fn parse_envelope(xml: &str, root_tag: &'static str) -> Result<(String, i32, String), XmlError> {
  let mut reader = Reader::from_str(xml);

  let mut subtype: Option<String> = None;
  let mut session_id: Option<i32> = None;
  let mut content = String::new();
  let mut saw_root = false;

  loop {
    match reader.read_event().map_err(|_| XmlError::Malformed)? {
      | Event::Start(tag) if tag.name().as_ref() == root_tag.as_bytes() => saw_root = true,
      | Event::Start(tag) if tag.name().as_ref() == b"Type" => {
        subtype = Some(read_text(&mut reader)?);
      },
      | Event::Start(tag) if tag.name().as_ref() == b"SessionID" => {
        let text = read_text(&mut reader)?;
        session_id = Some(text.parse().map_err(|_| XmlError::Malformed)?);
      },
      | Event::Start(tag) if tag.name().as_ref() == b"Content" => {
        content = read_inner_xml(&mut reader, tag.name().as_ref())?;
      },
      | Event::Eof => break,
      | _ => {},
    }
  }

  if !saw_root {
    return Err(XmlError::MissingField(root_tag));
  }
  let subtype = subtype.ok_or(XmlError::MissingField("Type"))?;
  let session_id = session_id.ok_or(XmlError::MissingField("SessionID"))?;
  Ok((subtype, session_id, content))
}

/// Read the plain-text contents of the current element, up to its
/// matching end tag.
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
  let mut text = String::new();
  loop {
    match reader.read_event().map_err(|_| XmlError::Malformed)? {
      | Event::Text(t) => text.push_str(&t.unescape().map_err(|_| XmlError::Malformed)?),
      | Event::End(_) => break,
      | Event::Eof => return Err(XmlError::Malformed),
      | _ => {},
    }
  }
  Ok(text)
}

/// Read everything between the current start tag and its matching end
/// tag, re-serialized verbatim, so nested subtype-specific XML passes
/// through unparsed.
fn read_inner_xml(reader: &mut Reader<&[u8]>, tag_name: &[u8]) -> Result<String, XmlError> {
  let mut depth = 0usize;
  let mut buf = Vec::new();
  let mut writer = Writer::new(&mut buf);

  loop {
    match reader.read_event().map_err(|_| XmlError::Malformed)? {
      | Event::Start(t) => {
        depth += 1;
        writer.write_event(Event::Start(t.into_owned())).ok();
      },
      | Event::End(t) if t.name().as_ref() == tag_name && depth == 0 => break,
      | Event::End(t) => {
        depth = depth.saturating_sub(1);
        writer.write_event(Event::End(t.into_owned())).ok();
      },
      | Event::Text(t) => {
        writer.write_event(Event::Text(t.into_owned())).ok();
      },
      | Event::Empty(t) => {
        writer.write_event(Event::Empty(t.into_owned())).ok();
      },
      | Event::Eof => return Err(XmlError::Malformed),
      | _ => {},
    }
  }

  Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_envelope(root_tag: &str, subtype: &str, session_id: i32, body: &str) -> String {
  let mut buf = Vec::new();
  let mut writer = Writer::new(&mut buf);

  writer.write_event(Event::Start(BytesStart::new(root_tag))).ok();

  writer.write_event(Event::Start(BytesStart::new("Type"))).ok();
  writer.write_event(Event::Text(BytesText::new(subtype))).ok();
  writer.write_event(Event::End(BytesEnd::new("Type"))).ok();

  writer.write_event(Event::Start(BytesStart::new("SessionID"))).ok();
  writer.write_event(Event::Text(BytesText::new(&session_id.to_string()))).ok();
  writer.write_event(Event::End(BytesEnd::new("SessionID"))).ok();

  let body_bytes = format!("<Body>{body}</Body>");
  writer.get_mut().extend_from_slice(strip_wrapper(&body_bytes).as_bytes());

  writer.write_event(Event::End(BytesEnd::new(root_tag))).ok();

  String::from_utf8_lossy(&buf).into_owned()
}

/// `write_envelope` needs to splice an already-rendered XML fragment
/// (the response `Code`/`Content`, or a notification's `Content`) in
/// verbatim, which `Writer` has no direct "write raw bytes" event for;
/// wrapping then unwrapping a throwaway `<Body>` tag keeps the splice
/// one line instead of hand-rolling buffer surgery.
fn strip_wrapper(wrapped: &str) -> &str {
  wrapped.strip_prefix("<Body>")
         .and_then(|s| s.strip_suffix("</Body>"))
         .unwrap_or(wrapped)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_a_connect_request() {
    let xml = "<Request><Type>Connect</Type><SessionID>0</SessionID><Content></Content></Request>";
    let req = parse_request(xml).unwrap();
    assert_eq!(req.subtype, "Connect");
    assert_eq!(req.session_id, 0);
    assert_eq!(req.content, "");
  }

  #[test]
  fn preserves_nested_content_xml() {
    let xml = "<Request><Type>Get</Type><SessionID>42</SessionID><Content><Path>3303/0/5700</Path></Content></Request>";
    let req = parse_request(xml).unwrap();
    assert_eq!(req.session_id, 42);
    assert!(req.content.contains("<Path>3303/0/5700</Path>"));
  }

  #[test]
  fn missing_session_id_is_an_error() {
    let xml = "<Request><Type>Connect</Type><Content></Content></Request>";
    assert_eq!(parse_request(xml), Err(XmlError::MissingField("SessionID")));
  }

  #[test]
  fn response_round_trips_type_and_session_id() {
    let resp = ResponseEnvelope { subtype: "Get".into(),
                                  code: Api::Success,
                                  session_id: 7,
                                  content: "<Value>21.5</Value>".into() };
    let xml = write_response(&resp);
    assert!(xml.contains("<Type>Get</Type>"));
    assert!(xml.contains("<SessionID>7</SessionID>"));
    assert!(xml.contains("<Code>Success</Code>"));
    assert!(xml.contains("<Value>21.5</Value>"));
  }

  #[test]
  fn leaf_result_renders_lwm2m_error_only_on_failure() {
    assert_eq!(LeafResult::ok().to_xml(), "<Result><Error>Success</Error></Result>");

    let failed = LeafResult::from_protocol(Protocol::NotFound, Api::PathInvalid);
    assert_eq!(failed.to_xml(),
               "<Result><Error>PathNotFound</Error><LWM2MError>NotFound</LWM2MError></Result>");
  }
}
