//! Small helpers for producing human-readable summaries of CoAP
//! exchanges for [`log`] output, in place of allocating a full `Display`
//! impl on every message type we shuttle through the dispatcher.

use crate::coap::method::Method;

pub(crate) fn request_summary(method: Method, path: &str, payload_len: usize) -> String {
  format!("{method:?} {path} with {payload_len} byte payload")
}

pub(crate) fn response_summary(code_human: &str, payload_len: usize) -> String {
  format!("{code_human} with {payload_len} byte payload")
}
