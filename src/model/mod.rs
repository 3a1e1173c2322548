//! The typed object model and value store: Definition Registry, Object
//! Store, and the polymorphic tree node shared by every codec.

pub mod container;
pub mod registry;
pub mod store;
pub mod tree;
pub mod types;
