//! The polymorphic tree node: the canonical intermediate form every codec
//! and store operation reads from or builds into.

use crate::model::types::ResourceType;

/// A decoded resource value, tagged by [`ResourceType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  /// `ResourceType::String`.
  String(String),
  /// `ResourceType::Integer`.
  Integer(i64),
  /// `ResourceType::Float`.
  Float(f64),
  /// `ResourceType::Boolean`.
  Boolean(bool),
  /// `ResourceType::Opaque`.
  Opaque(Vec<u8>),
  /// `ResourceType::Time`, seconds since epoch.
  Time(i64),
  /// `ResourceType::ObjectLink`, `(ObjectID, ObjectInstanceID)`.
  ObjectLink(u16, u16),
}

impl Value {
  /// The [`ResourceType`] this value is tagged with.
  pub fn kind(&self) -> ResourceType {
    match self {
      | Self::String(_) => ResourceType::String,
      | Self::Integer(_) => ResourceType::Integer,
      | Self::Float(_) => ResourceType::Float,
      | Self::Boolean(_) => ResourceType::Boolean,
      | Self::Opaque(_) => ResourceType::Opaque,
      | Self::Time(_) => ResourceType::Time,
      | Self::ObjectLink(..) => ResourceType::ObjectLink,
    }
  }

  /// Numeric projection used by attribute evaluation (`gt`/`lt`/`stp`).
  /// `None` for non-numeric types.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      | Self::Integer(n) => Some(*n as f64),
      | Self::Float(n) => Some(*n),
      | Self::Time(n) => Some(*n as f64),
      | _ => None,
    }
  }
}

/// Which of the four LwM2M tree-node variants a [`TreeNode`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
  /// An Object (children are Object Instances).
  Object,
  /// An Object Instance (children are Resources).
  ObjectInstance,
  /// A Resource (children are Resource Instances, if multi-instance).
  Resource,
  /// A Resource Instance (leaf, optionally carries a [`Value`]).
  ResourceInstance,
}

/// A node in the polymorphic object-model tree.
///
/// Every tree is a single-rooted arborescence: a child appears in exactly
/// one parent's child list. [`TreeNode::delete_recursive`] traverses
/// post-order, matching the source's ownership discipline despite `std`
/// giving us a real allocator to lean on instead of manual frees.
#[derive(Debug, Clone)]
pub struct TreeNode {
  /// Which variant this node represents.
  pub kind: NodeKind,
  /// ID at this level, or `-1` if unspecified (e.g. a freshly-POSTed
  /// Object Instance awaiting assignment).
  pub id: i32,
  /// Decoded value, present only on `ResourceInstance` nodes that carry
  /// data (executable resources and bare containers have none).
  pub value: Option<Value>,
  /// Set when this node represents a new instance that should be created
  /// rather than merged into an existing one.
  pub create: bool,
  /// Set when a write should replace the entire node rather than merge
  /// leaf-by-leaf.
  pub replace: bool,
  /// Children, in discovery order.
  pub children: Vec<TreeNode>,
}

impl TreeNode {
  /// Construct an empty node of the given kind and id.
  pub fn new(kind: NodeKind, id: i32) -> Self {
    Self { kind,
           id,
           value: None,
           create: false,
           replace: false,
           children: Vec::new() }
  }

  /// Construct a leaf `ResourceInstance` node carrying `value`, with
  /// `id = 0` (the single-instance default).
  pub fn resource_instance_value(value: Value) -> Self {
    Self { kind: NodeKind::ResourceInstance,
           id: 0,
           value: Some(value),
           create: false,
           replace: false,
           children: Vec::new() }
  }

  /// `Lwm2mTreeNode_FindOrCreateChildNode`: linear lookup by id among this
  /// node's children, appending a fresh child if absent. Preserves
  /// discovery order.
  pub fn find_or_create_child(&mut self, id: i32, kind: NodeKind) -> &mut TreeNode {
    if let Some(pos) = self.children.iter().position(|c| c.id == id && c.kind == kind) {
      &mut self.children[pos]
    } else {
      self.children.push(TreeNode::new(kind, id));
      self.children.last_mut().unwrap()
    }
  }

  /// Look up a child by id without creating one.
  pub fn find_child(&self, id: i32, kind: NodeKind) -> Option<&TreeNode> {
    self.children.iter().find(|c| c.id == id && c.kind == kind)
  }

  /// Deep copy: payloads included, any borrowed definition context is
  /// naturally shared since `TreeNode` never owns one (see
  /// `model::registry` for how definitions are looked up alongside a
  /// tree rather than stored in it).
  pub fn copy_recursive(&self) -> TreeNode {
    self.clone()
  }

  /// Structural comparison: variant, id, value, and recursive equality of
  /// children in order.
  pub fn compare_recursive(&self, other: &TreeNode) -> bool {
    self.kind == other.kind
    && self.id == other.id
    && self.value == other.value
    && self.children.len() == other.children.len()
    && self.children
           .iter()
           .zip(other.children.iter())
           .all(|(a, b)| a.compare_recursive(b))
  }

  /// Post-order traversal dropping payload and node; with an owning `Vec`
  /// of children this is just `self` going out of scope, but the explicit
  /// method keeps the intent visible at call sites that free a subtree
  /// pulled out of a parent (e.g. CoAP DELETE).
  pub fn delete_recursive(mut self) {
    for child in self.children.drain(..) {
      child.delete_recursive();
    }
  }
}

impl PartialEq for TreeNode {
  fn eq(&self, other: &Self) -> bool {
    self.compare_recursive(other)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn find_or_create_preserves_discovery_order() {
    let mut root = TreeNode::new(NodeKind::Object, 3);
    root.find_or_create_child(1, NodeKind::ObjectInstance);
    root.find_or_create_child(0, NodeKind::ObjectInstance);
    root.find_or_create_child(1, NodeKind::ObjectInstance);
    let ids: Vec<_> = root.children.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 0]);
  }

  #[test]
  fn compare_recursive_checks_structure_and_values() {
    let mut a = TreeNode::new(NodeKind::Resource, 0);
    a.children.push(TreeNode::resource_instance_value(Value::Integer(42)));
    let mut b = TreeNode::new(NodeKind::Resource, 0);
    b.children.push(TreeNode::resource_instance_value(Value::Integer(42)));
    assert_eq!(a, b);

    let mut c = TreeNode::new(NodeKind::Resource, 0);
    c.children.push(TreeNode::resource_instance_value(Value::Integer(43)));
    assert_ne!(a, c);
  }
}
