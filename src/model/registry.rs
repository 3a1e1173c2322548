//! The Definition Registry: the catalog of object/resource type metadata.

use crate::model::container::OrderedMap;
use crate::model::tree::TreeNode;
use crate::model::types::{ObjectDefinition, ResourceDefinition};

/// Errors the registry's mutating operations can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
  /// An object or resource with this id is already registered with
  /// different scalar fields.
  MismatchedDefinition,
  /// An object with this id is already registered (harmless
  /// re-registration with identical scalars; still rejected since
  /// definitions are append-only).
  AlreadyDefined,
  /// The target object for `RegisterResource` doesn't exist.
  ObjectNotFound,
}

impl std::fmt::Display for RegistryError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      | Self::MismatchedDefinition => "object or resource already registered with different fields",
      | Self::AlreadyDefined => "object or resource already registered",
      | Self::ObjectNotFound => "object not found",
    };
    f.write_str(s)
  }
}

impl std::error::Error for RegistryError {}

/// Catalog of object/resource type metadata, keyed by object id, in
/// registration order.
///
/// Definitions are added at startup or via the IPC `Define` message and
/// are never deleted (§3 Lifecycle).
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
  objects: OrderedMap<u16, ObjectDefinition>,
}

impl DefinitionRegistry {
  /// Construct an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a new object definition.
  ///
  /// Adding a duplicate id is rejected with [`RegistryError::AlreadyDefined`]
  /// if every scalar field matches the existing registration, or
  /// [`RegistryError::MismatchedDefinition`] otherwise.
  pub fn register_object(&mut self, def: ObjectDefinition) -> Result<(), RegistryError> {
    if let Some(existing) = self.objects.get(&def.id) {
      return if existing.scalars_match(&def) {
        Err(RegistryError::AlreadyDefined)
      } else {
        Err(RegistryError::MismatchedDefinition)
      };
    }
    self.objects.insert(def.id, def);
    Ok(())
  }

  /// Register a resource under an already-registered object.
  pub fn register_resource(&mut self,
                            object_id: u16,
                            def: ResourceDefinition)
                            -> Result<(), RegistryError> {
    let obj = self.objects
                  .get_mut(&object_id)
                  .ok_or(RegistryError::ObjectNotFound)?;
    if let Some(existing) = obj.resources.get(&def.id) {
      return if *existing == def {
        Err(RegistryError::AlreadyDefined)
      } else {
        Err(RegistryError::MismatchedDefinition)
      };
    }
    obj.resources.insert(def.id, def);
    Ok(())
  }

  /// Look up an object definition by id.
  pub fn lookup_object(&self, object_id: u16) -> Option<&ObjectDefinition> {
    self.objects.get(&object_id)
  }

  /// Look up a resource definition by `(object, resource)`.
  pub fn lookup_resource(&self, object_id: u16, resource_id: u16) -> Option<&ResourceDefinition> {
    self.objects.get(&object_id)?.resources.get(&resource_id)
  }

  /// Registration-order traversal: the next object id strictly after
  /// `after`, or `None` when exhausted. `after = None` yields the first.
  pub fn get_next_object(&self, after: Option<u16>) -> Option<u16> {
    self.objects.next_after(after)
  }

  /// Registration-order traversal over one object's resources.
  pub fn get_next_resource(&self, object_id: u16, after: Option<u16>) -> Option<u16> {
    self.objects.get(&object_id)?.resources.next_after(after)
  }

  /// Deep-copy an object definition (resources included). Handler slots
  /// are `Arc`-shared, matching "the registry stores them verbatim."
  pub fn copy_object(def: &ObjectDefinition) -> ObjectDefinition {
    def.clone()
  }

  /// The well-defined zero value for a resource's type (§3, §4.1).
  pub fn allocate_sensible_default(res_def: &ResourceDefinition) -> TreeNode {
    res_def.kind.sensible_default()
  }

  /// Iterate all registered objects in registration order.
  pub fn objects(&self) -> impl Iterator<Item = &ObjectDefinition> {
    self.objects.values()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::container::OrderedMap;
  use crate::model::types::Operations;

  fn device_object() -> ObjectDefinition {
    ObjectDefinition { id: 3,
                       name: "Device".into(),
                       min_instances: 1,
                       max_instances: 1,
                       handler: None,
                       resources: OrderedMap::new() }
  }

  #[test]
  fn register_object_rejects_mismatched_duplicate() {
    let mut reg = DefinitionRegistry::new();
    reg.register_object(device_object()).unwrap();

    let mut mismatched = device_object();
    mismatched.max_instances = 2;
    assert_eq!(reg.register_object(mismatched), Err(RegistryError::MismatchedDefinition));

    assert_eq!(reg.register_object(device_object()), Err(RegistryError::AlreadyDefined));
  }

  #[test]
  fn get_next_object_is_registration_order() {
    let mut reg = DefinitionRegistry::new();
    let mut a = device_object();
    a.id = 3303;
    let mut b = device_object();
    b.id = 3;
    reg.register_object(a).unwrap();
    reg.register_object(b).unwrap();

    assert_eq!(reg.get_next_object(None), Some(3303));
    assert_eq!(reg.get_next_object(Some(3303)), Some(3));
    assert_eq!(reg.get_next_object(Some(3)), None);
  }

  #[test]
  fn allocate_sensible_default_matches_type() {
    use crate::model::tree::Value;
    use crate::model::types::ResourceType;

    let def = ResourceDefinition { id: 0,
                                   name: "Manufacturer".into(),
                                   kind: ResourceType::String,
                                   min_instances: 1,
                                   max_instances: 1,
                                   operation: Operations::READ,
                                   default_value: None,
                                   handler: None };
    let default = DefinitionRegistry::allocate_sensible_default(&def);
    assert_eq!(default.value, Some(Value::String(String::new())));
  }
}
