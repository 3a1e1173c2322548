//! The binary TLV codec (§4.4) — the hardest subsystem per the spec, and
//! the one whose bit layout must match exactly.
//!
//! Sign convention: this codec encodes signed integers in **two's
//! complement**, not the legacy "sign bit in the MSB of the first byte"
//! variant the source also supports behind a macro. See `DESIGN.md`.

use crate::model::registry::DefinitionRegistry;
use crate::model::tree::{NodeKind, TreeNode, Value};
use crate::model::types::{ResourceDefinition, ResourceType};

/// Errors raised while decoding or encoding TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
  /// Buffer ended in the middle of a header or value.
  Truncated,
  /// A length field claimed more bytes than remain in the buffer.
  LengthOutOfRange,
  /// The identifier is not defined for the current context.
  UnknownIdentifier,
  /// A resource-instance frame appeared outside a Multi-Resource frame,
  /// or vice-versa.
  NestingViolation,
  /// The decoded value's byte length doesn't match what the resource's
  /// type requires (e.g. a 3-byte integer, or a 5-byte object link).
  TypeMismatch,
  /// A single decoded Object-Instance frame's id didn't match the target
  /// instance id in the request path.
  InstanceIdMismatch,
  /// The output buffer was too small (encode only).
  Overflow,
}

impl std::fmt::Display for TlvError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      | Self::Truncated => "truncated TLV header or value",
      | Self::LengthOutOfRange => "TLV length exceeds remaining buffer",
      | Self::UnknownIdentifier => "TLV identifier not defined for this context",
      | Self::NestingViolation => "TLV frame nesting violation",
      | Self::TypeMismatch => "TLV value length doesn't match resource type",
      | Self::InstanceIdMismatch => "decoded instance id doesn't match request path",
      | Self::Overflow => "output buffer too small",
    };
    f.write_str(s)
  }
}

impl std::error::Error for TlvError {}

const TYPE_OBJECT_INSTANCE: u8 = 0b0000_0000;
const TYPE_RESOURCE_INSTANCE: u8 = 0b0100_0000;
const TYPE_MULTI_RESOURCE: u8 = 0b1000_0000;
const TYPE_RESOURCE_VALUE: u8 = 0b1100_0000;
const IDENT_TYPE_MASK: u8 = 0b1100_0000;
const IDENT_LEN_16BIT: u8 = 0b0010_0000;
const LENGTH_TYPE_MASK: u8 = 0b0001_1000;
const LENGTH_8BIT: u8 = 0b0000_1000;
const LENGTH_16BIT: u8 = 0b0001_0000;
const LENGTH_24BIT: u8 = 0b0001_1000;
const LENGTH_INLINE_MASK: u8 = 0b0000_0111;

/// A single decoded TLV frame header plus its value bytes.
struct Frame<'a> {
  ident_type: u8,
  id: u16,
  value: &'a [u8],
}

/// Write a TLV header with the narrowest representation that fits,
/// mirroring `TlvEncodeHeader`.
fn encode_header(out: &mut Vec<u8>, ident_type: u8, id: u16, len: usize) -> Result<(), TlvError> {
  if len > 0xff_ffff {
    return Err(TlvError::Overflow);
  }

  let mut first = ident_type & IDENT_TYPE_MASK;
  let mut header_tail = Vec::with_capacity(5);

  if id <= 0xff {
    header_tail.push(id as u8);
  } else {
    first |= IDENT_LEN_16BIT;
    header_tail.push((id >> 8) as u8);
    header_tail.push(id as u8);
  }

  if len > 0xffff {
    first |= LENGTH_24BIT;
    header_tail.push((len >> 16) as u8);
    header_tail.push((len >> 8) as u8);
    header_tail.push(len as u8);
  } else if len > 0xff {
    first |= LENGTH_16BIT;
    header_tail.push((len >> 8) as u8);
    header_tail.push(len as u8);
  } else if len > LENGTH_INLINE_MASK as usize {
    first |= LENGTH_8BIT;
    header_tail.push(len as u8);
  } else {
    first |= len as u8 & LENGTH_INLINE_MASK;
  }

  out.push(first);
  out.extend_from_slice(&header_tail);
  Ok(())
}

fn parse_header<'a>(buf: &'a [u8]) -> Result<(Frame<'a>, usize), TlvError> {
  if buf.is_empty() {
    return Err(TlvError::Truncated);
  }
  let first = buf[0];
  let ident_type = first & IDENT_TYPE_MASK;
  let mut pos = 1usize;

  let id = if first & IDENT_LEN_16BIT != 0 {
    let hi = *buf.get(pos).ok_or(TlvError::Truncated)? as u16;
    let lo = *buf.get(pos + 1).ok_or(TlvError::Truncated)? as u16;
    pos += 2;
    (hi << 8) | lo
  } else {
    let b = *buf.get(pos).ok_or(TlvError::Truncated)? as u16;
    pos += 1;
    b
  };

  let len = match first & LENGTH_TYPE_MASK {
    | LENGTH_24BIT => {
      let b0 = *buf.get(pos).ok_or(TlvError::Truncated)? as usize;
      let b1 = *buf.get(pos + 1).ok_or(TlvError::Truncated)? as usize;
      let b2 = *buf.get(pos + 2).ok_or(TlvError::Truncated)? as usize;
      pos += 3;
      (b0 << 16) | (b1 << 8) | b2
    },
    | LENGTH_16BIT => {
      let b0 = *buf.get(pos).ok_or(TlvError::Truncated)? as usize;
      let b1 = *buf.get(pos + 1).ok_or(TlvError::Truncated)? as usize;
      pos += 2;
      (b0 << 8) | b1
    },
    | LENGTH_8BIT => {
      let b0 = *buf.get(pos).ok_or(TlvError::Truncated)? as usize;
      pos += 1;
      b0
    },
    | _ => (first & LENGTH_INLINE_MASK) as usize,
  };

  if pos + len > buf.len() {
    return Err(TlvError::LengthOutOfRange);
  }

  let value = &buf[pos..pos + len];
  Ok((Frame { ident_type, id, value }, pos + len))
}

/// The narrowest width in {1,2,4,8} that losslessly represents `v` in
/// two's complement.
fn integer_width(v: i64) -> usize {
  if v >= i8::MIN as i64 && v <= i8::MAX as i64 {
    1
  } else if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
    2
  } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
    4
  } else {
    8
  }
}

/// Encode a signed integer as two's complement big-endian bytes at the
/// narrowest width that fits, per §8 scenario 2 (`-17` → `0xEF`, `-1024` →
/// `0xFC 0x00`, etc).
fn encode_integer(v: i64) -> Vec<u8> {
  match integer_width(v) {
    | 1 => vec![v as i8 as u8],
    | 2 => (v as i16).to_be_bytes().to_vec(),
    | 4 => (v as i32).to_be_bytes().to_vec(),
    | _ => v.to_be_bytes().to_vec(),
  }
}

/// Decode two's-complement big-endian bytes of width 1/2/4/8 back to
/// `i64`, sign-extending from the narrow width.
fn decode_integer(bytes: &[u8]) -> Result<i64, TlvError> {
  Ok(match bytes.len() {
    | 1 => bytes[0] as i8 as i64,
    | 2 => i16::from_be_bytes(bytes.try_into().unwrap()) as i64,
    | 4 => i32::from_be_bytes(bytes.try_into().unwrap()) as i64,
    | 8 => i64::from_be_bytes(bytes.try_into().unwrap()),
    | _ => return Err(TlvError::TypeMismatch),
  })
}

/// Encode a float as binary32 if the round trip is lossless, else
/// binary64.
fn encode_float(v: f64) -> Vec<u8> {
  if v as f32 as f64 == v {
    (v as f32).to_be_bytes().to_vec()
  } else {
    v.to_be_bytes().to_vec()
  }
}

fn decode_float(bytes: &[u8]) -> Result<f64, TlvError> {
  Ok(match bytes.len() {
    | 4 => f32::from_be_bytes(bytes.try_into().unwrap()) as f64,
    | 8 => f64::from_be_bytes(bytes.try_into().unwrap()),
    | _ => return Err(TlvError::TypeMismatch),
  })
}

/// Encode a single typed value into its raw (headerless) byte
/// representation — the same representation [`crate::model::store::ObjectStore`]
/// keeps per resource instance. Shared with the dispatcher so a decoded
/// `Value` can be written straight into the store.
pub(crate) fn encode_value(kind: ResourceType, value: &Value) -> Vec<u8> {
  match (kind, value) {
    | (ResourceType::Integer | ResourceType::Time, Value::Integer(v)) => encode_integer(*v),
    | (ResourceType::Integer | ResourceType::Time, Value::Time(v)) => encode_integer(*v),
    | (ResourceType::Boolean, Value::Boolean(b)) => vec![if *b { 1 } else { 0 }],
    | (ResourceType::Float, Value::Float(v)) => encode_float(*v),
    | (ResourceType::String, Value::String(s)) => s.as_bytes().to_vec(),
    | (ResourceType::Opaque | ResourceType::None, Value::Opaque(b)) => b.clone(),
    | (ResourceType::ObjectLink, Value::ObjectLink(o, i)) => {
      let mut v = Vec::with_capacity(4);
      v.extend_from_slice(&o.to_be_bytes());
      v.extend_from_slice(&i.to_be_bytes());
      v
    },
    | _ => Vec::new(),
  }
}

/// Decode a resource's raw stored bytes back into a typed [`Value`].
/// The inverse of [`encode_value`]; used by the dispatcher to build a
/// response tree out of [`crate::model::store::ObjectStore`]'s raw bytes.
pub(crate) fn decode_value(kind: ResourceType, bytes: &[u8]) -> Result<Value, TlvError> {
  Ok(match kind {
    | ResourceType::Integer => Value::Integer(decode_integer(bytes)?),
    | ResourceType::Time => Value::Time(decode_integer(bytes)?),
    | ResourceType::Boolean => Value::Boolean(*bytes.first().ok_or(TlvError::TypeMismatch)? != 0),
    | ResourceType::Float => Value::Float(decode_float(bytes)?),
    | ResourceType::String => {
      Value::String(String::from_utf8(bytes.to_vec()).map_err(|_| TlvError::TypeMismatch)?)
    },
    | ResourceType::Opaque | ResourceType::None => Value::Opaque(bytes.to_vec()),
    | ResourceType::ObjectLink => {
      if bytes.len() != 4 {
        return Err(TlvError::TypeMismatch);
      }
      let o = u16::from_be_bytes([bytes[0], bytes[1]]);
      let i = u16::from_be_bytes([bytes[2], bytes[3]]);
      Value::ObjectLink(o, i)
    },
    | ResourceType::Invalid => return Err(TlvError::TypeMismatch),
  })
}

/// Serialize a tree rooted at an Object Instance (or bare Object, for
/// multi-instance reads) into TLV bytes, per §4.4's serialization walk.
pub fn encode(registry: &DefinitionRegistry, object_id: u16, root: &TreeNode) -> Result<Vec<u8>, TlvError> {
  let mut out = Vec::new();
  let object_def = registry.lookup_object(object_id).ok_or(TlvError::UnknownIdentifier)?;

  let instances: Vec<&TreeNode> = match root.kind {
    | NodeKind::Object => root.children.iter().collect(),
    | NodeKind::ObjectInstance => vec![root],
    | _ => return Err(TlvError::NestingViolation),
  };

  let wrap_instances = instances.len() > 1;

  for instance in instances {
    let mut inst_body = Vec::new();
    for resource in &instance.children {
      let res_def = object_def.resources
                               .get(&(resource.id as u16))
                               .ok_or(TlvError::UnknownIdentifier)?;
      encode_resource(&mut inst_body, res_def, resource)?;
    }

    if wrap_instances {
      encode_header(&mut out, TYPE_OBJECT_INSTANCE, instance.id as u16, inst_body.len())?;
      out.extend_from_slice(&inst_body);
    } else {
      out.extend_from_slice(&inst_body);
    }
  }

  Ok(out)
}

fn encode_resource(out: &mut Vec<u8>, res_def: &ResourceDefinition, resource: &TreeNode) -> Result<(), TlvError> {
  let kind = res_def.kind;

  if res_def.is_multi_instance() {
    let mut body = Vec::new();
    for ri in &resource.children {
      let value = ri.value.as_ref().ok_or(TlvError::TypeMismatch)?;
      let bytes = encode_value(kind, value);
      encode_header(&mut body, TYPE_RESOURCE_INSTANCE, ri.id as u16, bytes.len())?;
      body.extend_from_slice(&bytes);
    }
    encode_header(out, TYPE_MULTI_RESOURCE, resource.id as u16, body.len())?;
    out.extend_from_slice(&body);
  } else {
    let value = resource.children[0].value.as_ref().ok_or(TlvError::TypeMismatch)?;
    let bytes = encode_value(kind, value);
    encode_header(out, TYPE_RESOURCE_VALUE, resource.id as u16, bytes.len())?;
    out.extend_from_slice(&bytes);
  }
  Ok(())
}

/// Deserialize TLV bytes into a tree rooted at an Object Instance,
/// consulting the registry for resource types.
///
/// `target_instance_id` is the instance id named by the request path; if
/// the bytes encode a single Object-Instance frame whose id doesn't match,
/// this is a protocol error (`InstanceIdMismatch`, mapped to BadRequest by
/// the dispatcher).
pub fn decode(registry: &DefinitionRegistry,
              object_id: u16,
              target_instance_id: i32,
              bytes: &[u8])
              -> Result<TreeNode, TlvError> {
  let object_def = registry.lookup_object(object_id).ok_or(TlvError::UnknownIdentifier)?;
  let mut root = TreeNode::new(NodeKind::ObjectInstance, target_instance_id);

  let mut pos = 0;
  let mut saw_wrapped_instance = false;

  while pos < bytes.len() {
    let (frame, consumed) = parse_header(&bytes[pos..])?;
    pos += consumed;

    match frame.ident_type {
      | TYPE_OBJECT_INSTANCE => {
        if frame.id as i32 != target_instance_id {
          return Err(TlvError::InstanceIdMismatch);
        }
        saw_wrapped_instance = true;
        decode_resources_into(&mut root, object_def, frame.value)?;
      },
      | TYPE_RESOURCE_VALUE | TYPE_MULTI_RESOURCE => {
        if saw_wrapped_instance {
          return Err(TlvError::NestingViolation);
        }
        decode_one_resource_frame(&mut root, object_def, &frame)?;
      },
      | _ => return Err(TlvError::NestingViolation),
    }
  }

  Ok(root)
}

fn decode_resources_into(root: &mut TreeNode,
                          object_def: &crate::model::types::ObjectDefinition,
                          bytes: &[u8])
                          -> Result<(), TlvError> {
  let mut pos = 0;
  while pos < bytes.len() {
    let (frame, consumed) = parse_header(&bytes[pos..])?;
    pos += consumed;
    decode_one_resource_frame(root, object_def, &frame)?;
  }
  Ok(())
}

fn decode_one_resource_frame(root: &mut TreeNode,
                              object_def: &crate::model::types::ObjectDefinition,
                              frame: &Frame)
                              -> Result<(), TlvError> {
  let res_def = object_def.resources.get(&frame.id).ok_or(TlvError::UnknownIdentifier)?;

  match frame.ident_type {
    | TYPE_RESOURCE_VALUE => {
      let value = decode_value(res_def.kind, frame.value)?;
      let resource = root.find_or_create_child(frame.id as i32, NodeKind::Resource);
      resource.children.push(TreeNode::resource_instance_value(value));
    },
    | TYPE_MULTI_RESOURCE => {
      let resource = root.find_or_create_child(frame.id as i32, NodeKind::Resource);
      let mut pos = 0;
      while pos < frame.value.len() {
        let (inner, consumed) = parse_header(&frame.value[pos..])?;
        pos += consumed;
        if inner.ident_type != TYPE_RESOURCE_INSTANCE {
          return Err(TlvError::NestingViolation);
        }
        let value = decode_value(res_def.kind, inner.value)?;
        let mut leaf = TreeNode::resource_instance_value(value);
        leaf.id = inner.id as i32;
        resource.children.push(leaf);
      }
    },
    | _ => return Err(TlvError::NestingViolation),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::container::OrderedMap;
  use crate::model::types::{Operations, ObjectDefinition, ResourceDefinition};

  fn device_registry() -> DefinitionRegistry {
    let mut resources = OrderedMap::new();
    resources.insert(0, ResourceDefinition { id: 0,
                                             name: "Manufacturer".into(),
                                             kind: ResourceType::String,
                                             min_instances: 1,
                                             max_instances: 1,
                                             operation: Operations::READ,
                                             default_value: None,
                                             handler: None });
    resources.insert(13, ResourceDefinition { id: 13,
                                              name: "CurrentTime".into(),
                                              kind: ResourceType::Integer,
                                              min_instances: 1,
                                              max_instances: 1,
                                              operation: Operations::READ_WRITE,
                                              default_value: None,
                                              handler: None });
    let mut reg = DefinitionRegistry::new();
    reg.register_object(ObjectDefinition { id: 3,
                                           name: "Device".into(),
                                           min_instances: 1,
                                           max_instances: 1,
                                           handler: None,
                                           resources })
       .unwrap();
    reg
  }

  #[test]
  fn round_trip_single_resource() {
    let reg = device_registry();
    let mut root = TreeNode::new(NodeKind::ObjectInstance, 0);
    let res = root.find_or_create_child(0, NodeKind::Resource);
    res.children.push(TreeNode::resource_instance_value(Value::String("Imagination Technologies".into())));

    let bytes = encode(&reg, 3, &root).unwrap();
    let decoded = decode(&reg, 3, 0, &bytes).unwrap();
    assert_eq!(root, decoded);
  }

  #[test]
  fn signed_integer_extremes_match_spec_scenario_2() {
    assert_eq!(encode_integer(-17), vec![0xEF]);
    assert_eq!(encode_integer(-1024), vec![0xFC, 0x00]);
    assert_eq!(encode_integer(-65536), vec![0xFF, 0xFF, 0x00, 0x00]);
    assert_eq!(encode_integer(-8589934636),
               vec![0xFF, 0xFF, 0xFF, 0xFD, 0xFF, 0xFF, 0xFF, 0xD4]);

    for v in [-17i64, -1024, -65536, -8589934636] {
      let bytes = encode_integer(v);
      assert_eq!(decode_integer(&bytes).unwrap(), v);
    }
  }

  #[test]
  fn float_width_chosen_by_round_trip() {
    assert_eq!(encode_float(1.5).len(), 4);
    assert_eq!(encode_float(1.0 / 3.0).len(), 8);
  }

  #[test]
  fn multi_instance_resource_with_one_instance_still_uses_multi_resource_frame() {
    let mut resources = OrderedMap::new();
    resources.insert(0, ResourceDefinition { id: 0,
                                             name: "Plain Text Files".into(),
                                             kind: ResourceType::String,
                                             min_instances: 0,
                                             max_instances: 10,
                                             operation: Operations::READ,
                                             default_value: None,
                                             handler: None });
    let mut reg = DefinitionRegistry::new();
    reg.register_object(ObjectDefinition { id: 19,
                                           name: "BinaryAppDataContainer".into(),
                                           min_instances: 0,
                                           max_instances: 0,
                                           handler: None,
                                           resources })
       .unwrap();

    let mut root = TreeNode::new(NodeKind::ObjectInstance, 0);
    let res = root.find_or_create_child(0, NodeKind::Resource);
    let mut instance = TreeNode::resource_instance_value(Value::String("only one".into()));
    instance.id = 0;
    res.children.push(instance);

    let bytes = encode(&reg, 19, &root).unwrap();
    let (frame, _) = parse_header(&bytes).unwrap();
    assert_eq!(frame.ident_type, TYPE_MULTI_RESOURCE,
               "a resource defined as multi-instance must wire-encode as a Multi-Resource frame \
                even when it currently holds exactly one instance at id 0");

    let decoded = decode(&reg, 19, 0, &bytes).unwrap();
    assert_eq!(root, decoded);
  }

  #[test]
  fn instance_id_mismatch_is_rejected() {
    let reg = device_registry();
    let mut root = TreeNode::new(NodeKind::ObjectInstance, 0);
    root.find_or_create_child(0, NodeKind::Resource)
        .children
        .push(TreeNode::resource_instance_value(Value::String("x".into())));
    let bytes = encode(&reg, 3, &root).unwrap();

    // wrap in an object-instance frame carrying a *different* id
    let mut wrapped = Vec::new();
    encode_header(&mut wrapped, TYPE_OBJECT_INSTANCE, 1, bytes.len()).unwrap();
    wrapped.extend_from_slice(&bytes);

    assert_eq!(decode(&reg, 3, 0, &wrapped), Err(TlvError::InstanceIdMismatch));
  }
}
