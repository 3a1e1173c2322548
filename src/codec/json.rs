//! The LwM2M JSON codec (§4.5, `application/vnd.oma.lwm2m+json`).
//!
//! Shares tree-walking logic with the TLV codec conceptually (walk Object
//! Instance → Resource → Resource Instance); only the frame layer
//! differs, so this module does its own flat walk rather than reusing
//! `codec::tlv`'s frame types.

use serde::{Deserialize, Serialize};

use crate::model::registry::DefinitionRegistry;
use crate::model::tree::{NodeKind, TreeNode, Value};
use crate::model::types::ResourceType;

/// Errors raised while decoding LwM2M JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
  /// The document wasn't valid JSON, or didn't match the expected shape.
  Malformed,
  /// A record's `n` path didn't resolve to a known resource.
  UnknownIdentifier,
  /// A record carried a value of the wrong variant for its resource type.
  TypeMismatch,
}

impl std::fmt::Display for JsonError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      | Self::Malformed => "malformed LwM2M JSON document",
      | Self::UnknownIdentifier => "JSON record path not defined",
      | Self::TypeMismatch => "JSON record value doesn't match resource type",
    };
    f.write_str(s)
  }
}

impl std::error::Error for JsonError {}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct Record {
  n: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  v: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  sv: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  bv: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  ov: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Document {
  bt: i64,
  e: Vec<Record>,
}

/// Serialize a tree rooted at an Object Instance into LwM2M JSON.
///
/// Per the resolved Open Question in §9, `bt` is always emitted as `0`.
pub fn encode(object_id: u16, instance_id: i32, root: &TreeNode) -> Result<String, JsonError> {
  let resources: &[TreeNode] = match root.kind {
    | NodeKind::ObjectInstance => &root.children,
    | _ => return Err(JsonError::Malformed),
  };

  let mut records = Vec::new();
  for resource in resources {
    for ri in &resource.children {
      let value = ri.value.as_ref().ok_or(JsonError::TypeMismatch)?;
      let n = if ri.id == 0 && resource.children.len() == 1 {
        format!("{object_id}/{instance_id}/{}", resource.id)
      } else {
        format!("{object_id}/{instance_id}/{}/{}", resource.id, ri.id)
      };
      records.push(record_for(n, value));
    }
  }

  serde_json::to_string(&Document { bt: 0, e: records }).map_err(|_| JsonError::Malformed)
}

fn record_for(n: String, value: &Value) -> Record {
  let mut rec = Record { n, ..Default::default() };
  match value {
    | Value::Integer(i) => rec.v = Some(*i as f64),
    | Value::Time(t) => rec.v = Some(*t as f64),
    | Value::Float(f) => rec.v = Some(*f),
    | Value::Boolean(b) => rec.bv = Some(*b),
    | Value::String(s) => rec.sv = Some(s.clone()),
    | Value::Opaque(b) => rec.sv = Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
    | Value::ObjectLink(o, i) => rec.ov = Some(format!("{o}:{i}")),
  }
  rec
}

/// Deserialize an LwM2M JSON document into a tree rooted at an Object
/// Instance, consulting the registry for resource types. `bt` is accepted
/// but ignored on parse, per the resolved Open Question.
pub fn decode(registry: &DefinitionRegistry,
              object_id: u16,
              target_instance_id: i32,
              json: &str)
              -> Result<TreeNode, JsonError> {
  let doc: Document = serde_json::from_str(json).map_err(|_| JsonError::Malformed)?;
  let object_def = registry.lookup_object(object_id).ok_or(JsonError::UnknownIdentifier)?;
  let mut root = TreeNode::new(NodeKind::ObjectInstance, target_instance_id);

  for rec in doc.e {
    let mut parts = rec.n.trim_start_matches('/').split('/');
    let obj: u16 = parts.next().and_then(|s| s.parse().ok()).ok_or(JsonError::Malformed)?;
    if obj != object_id {
      return Err(JsonError::Malformed);
    }
    let _inst: i32 = parts.next().and_then(|s| s.parse().ok()).ok_or(JsonError::Malformed)?;
    let res: u16 = parts.next().and_then(|s| s.parse().ok()).ok_or(JsonError::Malformed)?;
    let ri: u16 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let res_def = object_def.resources.get(&res).ok_or(JsonError::UnknownIdentifier)?;
    let value = value_from_record(res_def.kind, &rec)?;

    let resource = root.find_or_create_child(res as i32, NodeKind::Resource);
    let mut leaf = TreeNode::resource_instance_value(value);
    leaf.id = ri as i32;
    resource.children.push(leaf);
  }

  Ok(root)
}

fn value_from_record(kind: ResourceType, rec: &Record) -> Result<Value, JsonError> {
  Ok(match kind {
    | ResourceType::Integer => Value::Integer(rec.v.ok_or(JsonError::TypeMismatch)? as i64),
    | ResourceType::Time => Value::Time(rec.v.ok_or(JsonError::TypeMismatch)? as i64),
    | ResourceType::Float => Value::Float(rec.v.ok_or(JsonError::TypeMismatch)?),
    | ResourceType::Boolean => Value::Boolean(rec.bv.ok_or(JsonError::TypeMismatch)?),
    | ResourceType::String => Value::String(rec.sv.clone().ok_or(JsonError::TypeMismatch)?),
    | ResourceType::Opaque | ResourceType::None => {
      let sv = rec.sv.as_ref().ok_or(JsonError::TypeMismatch)?;
      Value::Opaque(base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sv)
                                          .map_err(|_| JsonError::TypeMismatch)?)
    },
    | ResourceType::ObjectLink => {
      let ov = rec.ov.as_ref().ok_or(JsonError::TypeMismatch)?;
      let (o, i) = ov.split_once(':').ok_or(JsonError::TypeMismatch)?;
      Value::ObjectLink(o.parse().map_err(|_| JsonError::TypeMismatch)?,
                         i.parse().map_err(|_| JsonError::TypeMismatch)?)
    },
    | ResourceType::Invalid => return Err(JsonError::TypeMismatch),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::container::OrderedMap;
  use crate::model::types::{ObjectDefinition, Operations, ResourceDefinition};

  fn registry() -> DefinitionRegistry {
    let mut resources = OrderedMap::new();
    resources.insert(5700,
                      ResourceDefinition { id: 5700,
                                           name: "Sensor Value".into(),
                                           kind: ResourceType::Float,
                                           min_instances: 1,
                                           max_instances: 1,
                                           operation: Operations::READ,
                                           default_value: None,
                                           handler: None });
    let mut reg = DefinitionRegistry::new();
    reg.register_object(ObjectDefinition { id: 3303,
                                           name: "Temperature".into(),
                                           min_instances: 0,
                                           max_instances: 0,
                                           handler: None,
                                           resources })
       .unwrap();
    reg
  }

  #[test]
  fn encode_always_emits_bt_zero() {
    let mut root = TreeNode::new(NodeKind::ObjectInstance, 0);
    root.find_or_create_child(5700, NodeKind::Resource)
        .children
        .push(TreeNode::resource_instance_value(Value::Float(21.5)));

    let json = encode(3303, 0, &root).unwrap();
    assert!(json.contains("\"bt\":0"));
  }

  #[test]
  fn round_trip_through_json() {
    let reg = registry();
    let mut root = TreeNode::new(NodeKind::ObjectInstance, 0);
    root.find_or_create_child(5700, NodeKind::Resource)
        .children
        .push(TreeNode::resource_instance_value(Value::Float(21.5)));

    let json = encode(3303, 0, &root).unwrap();
    let decoded = decode(&reg, 3303, 0, &json).unwrap();
    assert_eq!(root, decoded);
  }

  #[test]
  fn decode_ignores_bt_value() {
    let reg = registry();
    let json = r#"{"bt":123456,"e":[{"n":"3303/0/5700","v":21.5}]}"#;
    assert!(decode(&reg, 3303, 0, json).is_ok());
  }
}
