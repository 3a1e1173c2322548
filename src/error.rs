//! The two error taxonomies that flow through the core (§7): a
//! [`protocol`] result aligned with LwM2M/CoAP response semantics, and
//! an [`api`] error aligned with the IPC surface, plus the mapping
//! between them.
//!
//! Adapted from the teacher's hand-rolled `core::error::{Error, When,
//! What}` enums: plain enums with manual `Display`/`Error` impls rather
//! than `thiserror`, matching the teacher's own choice not to pull in a
//! derive-macro error crate.

/// LwM2M/CoAP-facing result of a dispatcher operation.
pub mod protocol {
  /// Every outcome a store/registry/codec operation can produce,
  /// collapsed onto the CoAP response codes they surface as (§6, §7).
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub enum Protocol {
    /// 2.01/2.02/2.04/2.05 family: operation succeeded.
    Success,
    /// 2.01 Created.
    Created,
    /// 2.02 Deleted.
    Deleted,
    /// 2.04 Changed.
    Changed,
    /// 2.05 Content.
    Content,
    /// 4.00 Bad Request.
    BadRequest,
    /// 4.01 Unauthorized.
    Unauthorized,
    /// 4.03 Forbidden.
    Forbidden,
    /// 4.04 Not Found.
    NotFound,
    /// 4.05 Method Not Allowed.
    MethodNotAllowed,
    /// 5.00 Internal Server Error.
    InternalError,
    /// Synthesized: an allocation/capacity limit was hit.
    OutOfMemory,
    /// Synthesized: a definition with this identifier already exists.
    AlreadyRegistered,
    /// Synthesized: a definition conflicts with one already registered.
    MismatchedDefinition,
    /// Synthesized: an instance with this identifier already exists.
    AlreadyCreated,
    /// Synthesized: operation recognized but not implemented.
    Unsupported,
    /// Synthesized: no more specific outcome applies.
    Unspecified,
  }

  impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      std::fmt::Debug::fmt(self, f)
    }
  }

  impl std::error::Error for Protocol {}
}

/// IPC-facing API error, per §6/§7.
pub mod api {
  use super::protocol::Protocol;

  /// Errors surfaced to an IPC client.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub enum Api {
    /// Operation succeeded.
    Success,
    /// The addressed path does not exist in the object model.
    PathNotFound,
    /// The addressed path is not a well-formed LwM2M path.
    PathInvalid,
    /// A supplied value or range was out of bounds for the resource.
    RangeInvalid,
    /// An Object Instance or Resource Instance could not be created.
    CannotCreate,
    /// An Object Instance or Resource Instance could not be deleted.
    CannotDelete,
    /// The referenced subscription/observation is invalid or unknown.
    SubscriptionInvalid,
    /// A transport-level IPC failure (malformed envelope, unknown
    /// session).
    IPCError,
    /// An internal error with no more specific IPC-facing cause.
    Internal,
    /// No more specific outcome applies.
    Unspecified,
  }

  impl std::fmt::Display for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      std::fmt::Debug::fmt(self, f)
    }
  }

  impl std::error::Error for Api {}

  /// Map a [`Protocol`] result onto an [`Api`] error, per §7's mapping
  /// function. `ambiguous_default` is used for outcomes with no single
  /// obvious IPC-facing meaning (e.g. `MethodNotAllowed`, which callers
  /// may want mapped to either `PathInvalid` or `CannotCreate`/
  /// `CannotDelete` depending on which operation was attempted).
  pub fn from_protocol(result: Protocol, ambiguous_default: Api) -> Api {
    match result {
      | Protocol::Success | Protocol::Created | Protocol::Deleted | Protocol::Changed | Protocol::Content => {
        Api::Success
      },
      | Protocol::NotFound => Api::PathNotFound,
      | Protocol::BadRequest => Api::PathInvalid,
      | Protocol::MethodNotAllowed => ambiguous_default,
      | Protocol::Unauthorized | Protocol::Forbidden => Api::IPCError,
      | Protocol::AlreadyCreated => Api::CannotCreate,
      | Protocol::AlreadyRegistered | Protocol::MismatchedDefinition => Api::Internal,
      | Protocol::OutOfMemory | Protocol::InternalError => Api::Internal,
      | Protocol::Unsupported => Api::PathInvalid,
      | Protocol::Unspecified => Api::Unspecified,
    }
  }

  #[cfg(test)]
  mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_path_not_found() {
      assert_eq!(from_protocol(Protocol::NotFound, Api::Internal), Api::PathNotFound);
    }

    #[test]
    fn method_not_allowed_uses_caller_default() {
      assert_eq!(from_protocol(Protocol::MethodNotAllowed, Api::CannotDelete),
                 Api::CannotDelete);
    }
  }
}
