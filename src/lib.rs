//! `toad-lwm2m` is a Rust implementation of an OMA LwM2M device
//! management runtime: a CoAP/UDP (optionally DTLS-secured) protocol
//! engine, paired with the object model, codecs, and observation
//! machinery LwM2M layers on top of it, plus an XML-over-UDP IPC surface
//! for driving a running client/server from another local process.
//!
//! ## LwM2M
//! LwM2M (Lightweight M2M) describes a management/reporting protocol
//! between a server and constrained devices, with resources addressed
//! as `/{Object}/{Instance}/{Resource}` and read/written with one of
//! several binary or text encodings (TLV, plain text, JSON).
//!
//! This crate is split into the protocol-agnostic object model
//! ([`model`]), the resource codecs ([`codec`]), the observation/
//! attribute machinery ([`observe`]), the CoAP transport
//! ([`coap`], [`net`], [`retry`]), the DTLS session layer ([`dtls`]),
//! the local IPC control surface ([`ipc`]), and the single-threaded
//! [`runtime`] tying them together.

// docs
#![doc(html_root_url = "https://docs.rs/toad-lwm2m/0.1.0")]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// customizable retrying of fallible operations
pub mod retry;

/// time abstractions
pub mod time;

/// network abstractions
pub mod net;

/// configuring runtime behavior
pub mod config;

/// error taxonomies shared across the protocol and API layers
pub mod error;

/// the LwM2M object model: ordered containers, the tagged tree node,
/// the definition registry, and the object store
pub mod model;

/// resource (de)serialization: TLV, plain-text, and JSON
pub mod codec;

/// observation registry and notification-attribute evaluation
pub mod observe;

/// CoAP request/response types and the dispatcher state machine
pub mod coap;

/// DTLS session cache
#[cfg(feature = "dtls")]
pub mod dtls;

/// XML-over-UDP IPC session router
pub mod ipc;

/// the single-threaded cooperative event loop tying the above together
pub mod runtime;
