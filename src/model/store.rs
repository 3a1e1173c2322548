//! The Object Store: live instances of defined objects.

use crate::model::container::OrderedMap;

/// Errors the store's mutating operations can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
  /// The object has not been created.
  ObjectNotFound,
  /// The object instance has not been created.
  InstanceNotFound,
  /// The resource has not been created on this instance.
  ResourceNotFound,
  /// Creating another instance would exceed the object's `maxInstances`.
  MethodNotAllowed,
  /// The requested instance id is already in use.
  AlreadyCreated,
}

impl std::fmt::Display for StoreError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      | Self::ObjectNotFound => "object not found",
      | Self::InstanceNotFound => "object instance not found",
      | Self::ResourceNotFound => "resource not found",
      | Self::MethodNotAllowed => "would exceed maxInstances",
      | Self::AlreadyCreated => "instance id already in use",
    };
    f.write_str(s)
  }
}

impl std::error::Error for StoreError {}

/// A single resource-instance's byte buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInstance {
  /// The owned byte buffer.
  pub bytes: Vec<u8>,
}

/// A resource within an object instance: zero or more resource instances.
#[derive(Debug, Clone, Default)]
pub struct ResourceSlot {
  pub(crate) instances: OrderedMap<u16, ResourceInstance>,
}

/// An object instance: resources keyed by resource id.
#[derive(Debug, Clone, Default)]
pub struct ObjectInstance {
  pub(crate) resources: OrderedMap<u16, ResourceSlot>,
}

/// An object: instances keyed by instance id, plus the `maxInstances` cap
/// this level enforces on `CreateObjectInstance`.
#[derive(Debug, Clone, Default)]
pub struct ObjectSlot {
  pub(crate) instances: OrderedMap<i32, ObjectInstance>,
  pub(crate) max_instances: i32,
}

/// The four-level live instance tree: Object → Object Instance → Resource
/// → Resource Instance, each resource instance owning a heap buffer.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
  objects: OrderedMap<u16, ObjectSlot>,
}

impl ObjectStore {
  /// Construct an empty store.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an object id with the store so instances may be created
  /// under it. `max_instances <= 0` is treated as unbounded.
  pub fn create_object(&mut self, object_id: u16, max_instances: i32) {
    self.objects
        .insert(object_id,
                ObjectSlot { instances: OrderedMap::new(), max_instances });
  }

  /// Create an object instance. If `instance_id` is `None`, the store
  /// assigns the smallest non-colliding non-negative id.
  ///
  /// Fails with [`StoreError::MethodNotAllowed`] if this would exceed the
  /// object's `maxInstances`, or [`StoreError::AlreadyCreated`] if
  /// `instance_id` is already in use.
  pub fn create_object_instance(&mut self,
                                 object_id: u16,
                                 instance_id: Option<i32>)
                                 -> Result<i32, StoreError> {
    let slot = self.objects.get_mut(&object_id).ok_or(StoreError::ObjectNotFound)?;

    if slot.max_instances > 0 && slot.instances.len() as i32 >= slot.max_instances {
      return Err(StoreError::MethodNotAllowed);
    }

    let id = match instance_id {
      | Some(id) => {
        if slot.instances.contains(&id) {
          return Err(StoreError::AlreadyCreated);
        }
        id
      },
      | None => slot.instances.smallest_unused_key(),
    };

    slot.instances.insert(id, ObjectInstance::default());
    Ok(id)
  }

  /// Create a resource slot on an instance (empty; resource instances are
  /// added separately via [`Self::set_resource_instance_value`]).
  pub fn create_resource(&mut self,
                          object_id: u16,
                          instance_id: i32,
                          resource_id: u16)
                          -> Result<(), StoreError> {
    let inst = self.instance_mut(object_id, instance_id)?;
    inst.resources.insert(resource_id, ResourceSlot::default());
    Ok(())
  }

  /// Partial-buffer write per §4.2: if `total_len` differs from the
  /// current buffer size, the buffer is resized (zero-filled), then
  /// `[src_offset, src_offset + src.len())` is overwritten by `src`.
  /// Returns whether any byte actually differs from the prior contents.
  pub fn set_resource_instance_value(&mut self,
                                      object_id: u16,
                                      instance_id: i32,
                                      resource_id: u16,
                                      resource_instance_id: u16,
                                      src_offset: usize,
                                      src: &[u8],
                                      total_len: usize)
                                      -> Result<bool, StoreError> {
    let inst = self.instance_mut(object_id, instance_id)?;
    let slot = inst.resources.get_mut(&resource_id).ok_or(StoreError::ResourceNotFound)?;
    let entry = slot.instances.get_mut(&resource_instance_id);
    let prior = entry.map(|e| e.bytes.clone()).unwrap_or_default();

    let mut buf = prior.clone();
    if buf.len() != total_len {
      buf.resize(total_len, 0);
    }
    let end = (src_offset + src.len()).min(buf.len());
    if src_offset < end {
      buf[src_offset..end].copy_from_slice(&src[..end - src_offset]);
    }

    let changed = buf != prior;
    slot.instances.insert(resource_instance_id, ResourceInstance { bytes: buf });
    Ok(changed)
  }

  /// Read a resource instance's buffer.
  pub fn get_resource_instance_value(&self,
                                      object_id: u16,
                                      instance_id: i32,
                                      resource_id: u16,
                                      resource_instance_id: u16)
                                      -> Result<&[u8], StoreError> {
    let inst = self.instance(object_id, instance_id)?;
    let slot = inst.resources.get(&resource_id).ok_or(StoreError::ResourceNotFound)?;
    slot.instances
        .get(&resource_instance_id)
        .map(|r| r.bytes.as_slice())
        .ok_or(StoreError::ResourceNotFound)
  }

  /// Whether `(object, instance, resource)` exists, per the
  /// `Exists(o,i,r) ⇔ GetNext* traversal lists (o,i,r)` invariant.
  pub fn exists(&self, object_id: u16, instance_id: i32, resource_id: i32) -> bool {
    let Some(inst) = self.instance(object_id, instance_id).ok() else { return false };
    if resource_id < 0 {
      true
    } else {
      inst.resources.contains(&(resource_id as u16))
    }
  }

  /// `GetNextObjectInstanceID`: next instance id after `after` in
  /// registration order, or `-1` when exhausted.
  pub fn get_next_object_instance_id(&self, object_id: u16, after: i32) -> i32 {
    let Some(slot) = self.objects.get(&object_id) else { return -1 };
    let after = if after < 0 { None } else { Some(after) };
    slot.instances.next_after(after).unwrap_or(-1)
  }

  /// `GetNextResourceID`: next resource id after `after` in registration
  /// order, or `-1` when exhausted.
  pub fn get_next_resource_id(&self, object_id: u16, instance_id: i32, after: i32) -> i32 {
    let Ok(inst) = self.instance(object_id, instance_id) else { return -1 };
    let after = if after < 0 { None } else { Some(after as u16) };
    inst.resources.next_after(after).map(|id| id as i32).unwrap_or(-1)
  }

  /// `GetNextResourceInstanceID`: next resource-instance id after `after`
  /// in registration order, or `-1` when exhausted.
  pub fn get_next_resource_instance_id(&self,
                                        object_id: u16,
                                        instance_id: i32,
                                        resource_id: u16,
                                        after: i32)
                                        -> i32 {
    let Ok(inst) = self.instance(object_id, instance_id) else { return -1 };
    let Some(slot) = inst.resources.get(&resource_id) else { return -1 };
    let after = if after < 0 { None } else { Some(after as u16) };
    slot.instances.next_after(after).map(|id| id as i32).unwrap_or(-1)
  }

  /// Delete per §4.2's three forms:
  /// - `(o, -1, -1)` removes all instances of the object, keeping the
  ///   object registration.
  /// - `(o, i, -1)` removes the instance and all its resources.
  /// - `(o, i, r)` removes a single resource from an instance.
  pub fn delete(&mut self, object_id: u16, instance_id: i32, resource_id: i32) -> Result<(), StoreError> {
    let slot = self.objects.get_mut(&object_id).ok_or(StoreError::ObjectNotFound)?;

    if instance_id < 0 {
      slot.instances = OrderedMap::new();
      return Ok(());
    }

    if resource_id < 0 {
      slot.instances.remove(&instance_id).ok_or(StoreError::InstanceNotFound)?;
      return Ok(());
    }

    let inst = slot.instances.get_mut(&instance_id).ok_or(StoreError::InstanceNotFound)?;
    inst.resources.remove(&(resource_id as u16)).ok_or(StoreError::ResourceNotFound)?;
    Ok(())
  }

  fn instance(&self, object_id: u16, instance_id: i32) -> Result<&ObjectInstance, StoreError> {
    self.objects
        .get(&object_id)
        .ok_or(StoreError::ObjectNotFound)?
        .instances
        .get(&instance_id)
        .ok_or(StoreError::InstanceNotFound)
  }

  fn instance_mut(&mut self, object_id: u16, instance_id: i32) -> Result<&mut ObjectInstance, StoreError> {
    self.objects
        .get_mut(&object_id)
        .ok_or(StoreError::ObjectNotFound)?
        .instances
        .get_mut(&instance_id)
        .ok_or(StoreError::InstanceNotFound)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn create_object_instance_assigns_smallest_free_id() {
    let mut store = ObjectStore::new();
    store.create_object(3, 0);
    assert_eq!(store.create_object_instance(3, None).unwrap(), 0);
    assert_eq!(store.create_object_instance(3, None).unwrap(), 1);
    store.delete(3, 0, -1).unwrap();
    assert_eq!(store.create_object_instance(3, None).unwrap(), 0);
  }

  #[test]
  fn create_object_instance_respects_max_instances() {
    let mut store = ObjectStore::new();
    store.create_object(3, 1);
    store.create_object_instance(3, None).unwrap();
    assert_eq!(store.create_object_instance(3, None), Err(StoreError::MethodNotAllowed));
  }

  #[test]
  fn set_resource_instance_value_partial_write_and_changed_flag() {
    let mut store = ObjectStore::new();
    store.create_object(3303, 0);
    let inst = store.create_object_instance(3303, Some(0)).unwrap();
    store.create_resource(3303, inst, 5700).unwrap();

    let changed = store.set_resource_instance_value(3303, inst, 5700, 0, 0, b"hello", 5).unwrap();
    assert!(changed);
    assert_eq!(store.get_resource_instance_value(3303, inst, 5700, 0).unwrap(), b"hello");

    let changed_again = store.set_resource_instance_value(3303, inst, 5700, 0, 0, b"hello", 5).unwrap();
    assert!(!changed_again);

    // resize with zero-fill, then overwrite a slice
    store.set_resource_instance_value(3303, inst, 5700, 0, 0, b"hi", 5).unwrap();
    assert_eq!(store.get_resource_instance_value(3303, inst, 5700, 0).unwrap(), &[b'h', b'i', 0, 0, 0]);
  }

  #[test]
  fn delete_forms_match_spec() {
    let mut store = ObjectStore::new();
    store.create_object(3, 0);
    let i0 = store.create_object_instance(3, Some(0)).unwrap();
    store.create_resource(3, i0, 1).unwrap();

    store.delete(3, i0, 1).unwrap();
    assert!(!store.exists(3, i0, 1));
    assert!(store.exists(3, i0, -1));

    store.create_object_instance(3, Some(1)).unwrap();
    store.delete(3, -1, -1).unwrap();
    assert_eq!(store.get_next_object_instance_id(3, -1), -1);
  }

  #[test]
  fn get_next_traversal_returns_neg_one_when_exhausted() {
    let mut store = ObjectStore::new();
    store.create_object(3, 0);
    store.create_object_instance(3, Some(0)).unwrap();
    assert_eq!(store.get_next_object_instance_id(3, -1), 0);
    assert_eq!(store.get_next_object_instance_id(3, 0), -1);
  }
}
