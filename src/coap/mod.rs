//! CoAP request/response plumbing and the dispatcher that ties it to the
//! object model (§4.6, §6).

pub mod dispatcher;
pub mod method;
pub mod request;
pub mod response;
pub mod wire;
