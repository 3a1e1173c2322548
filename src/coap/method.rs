//! CoAP request methods (§6: GET/PUT/POST/DELETE) and the method
//! predicates the dispatcher uses to route a request to Read/Write/
//! Create/Delete handling.
//!
//! Adapted from the teacher's `server::method::{is, is_one_of, get, post,
//! put, delete}` predicate-pipe pattern, with the `Ap`/`naan` combinator
//! plumbing stripped out in favor of plain `bool`-returning functions —
//! this crate's dispatcher is a straightforward `match`, not a DSL
//! pipeline.

use coap_lite::RequestType;

/// One of the four LwM2M-relevant CoAP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  /// GET: read.
  Get,
  /// PUT: write/replace.
  Put,
  /// POST: write-partial/create/execute.
  Post,
  /// DELETE: delete.
  Delete,
}

impl Method {
  /// Map from `coap-lite`'s wire-level request type.
  pub fn from_wire(ty: RequestType) -> Option<Self> {
    Some(match ty {
      | RequestType::Get => Self::Get,
      | RequestType::Put => Self::Put,
      | RequestType::Post => Self::Post,
      | RequestType::Delete => Self::Delete,
      | _ => return None,
    })
  }

  /// Map to `coap-lite`'s wire-level request type.
  pub fn to_wire(self) -> RequestType {
    match self {
      | Self::Get => RequestType::Get,
      | Self::Put => RequestType::Put,
      | Self::Post => RequestType::Post,
      | Self::Delete => RequestType::Delete,
    }
  }

  /// Whether `self` is one of `methods`.
  pub fn is_one_of(self, methods: &[Method]) -> bool {
    methods.contains(&self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wire_round_trips() {
    for m in [Method::Get, Method::Put, Method::Post, Method::Delete] {
      assert_eq!(Method::from_wire(m.to_wire()), Some(m));
    }
  }

  #[test]
  fn is_one_of_matches_set() {
    assert!(Method::Get.is_one_of(&[Method::Get, Method::Put]));
    assert!(!Method::Delete.is_one_of(&[Method::Get, Method::Put]));
  }
}
