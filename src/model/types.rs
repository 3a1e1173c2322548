//! Typed definitions for LwM2M objects and resources.

use std::fmt;

use crate::model::tree::TreeNode;

/// The type of value a resource holds.
///
/// Executable resources use [`ResourceType::None`]; every other variant
/// carries a concrete value shape. See the LwM2M data model for the
/// canonical list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
  /// No value; used for executable resources.
  None,
  /// UTF-8 string.
  String,
  /// 64-bit signed integer.
  Integer,
  /// IEEE-754 binary32 or binary64, chosen by the codec at encode time.
  Float,
  /// Boolean.
  Boolean,
  /// Opaque byte blob.
  Opaque,
  /// Integer seconds since the Unix epoch.
  Time,
  /// A reference to another object instance: `(ObjectID, ObjectInstanceID)`.
  ObjectLink,
  /// Not a recognized type; only produced when parsing untrusted input.
  Invalid,
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      | Self::None => "None",
      | Self::String => "String",
      | Self::Integer => "Integer",
      | Self::Float => "Float",
      | Self::Boolean => "Boolean",
      | Self::Opaque => "Opaque",
      | Self::Time => "Time",
      | Self::ObjectLink => "ObjectLink",
      | Self::Invalid => "Invalid",
    };
    f.write_str(s)
  }
}

impl ResourceType {
  /// Parse the data-type strings used in definition-file XML
  /// (`String, Integer, Float, Boolean, Opaque, Time, ObjectLink, None`).
  pub fn from_xml_str(s: &str) -> Option<Self> {
    Some(match s {
      | "String" => Self::String,
      | "Integer" => Self::Integer,
      | "Float" => Self::Float,
      | "Boolean" => Self::Boolean,
      | "Opaque" => Self::Opaque,
      | "Time" => Self::Time,
      | "ObjectLink" => Self::ObjectLink,
      | "None" => Self::None,
      | _ => return None,
    })
  }

  /// The well-defined zero value for this type, per the registry's
  /// `AllocateSensibleDefault` contract: `""`, `0`, `0.0`, `false`, empty
  /// opaque, epoch-0 Time, or `ObjectLink{0,0}`.
  pub fn sensible_default(self) -> TreeNode {
    use crate::model::tree::Value;
    let value = match self {
      | Self::None => Value::Opaque(Vec::new()),
      | Self::String => Value::String(String::new()),
      | Self::Integer => Value::Integer(0),
      | Self::Float => Value::Float(0.0),
      | Self::Boolean => Value::Boolean(false),
      | Self::Opaque => Value::Opaque(Vec::new()),
      | Self::Time => Value::Time(0),
      | Self::ObjectLink => Value::ObjectLink(0, 0),
      | Self::Invalid => Value::Opaque(Vec::new()),
    };
    TreeNode::resource_instance_value(value)
  }
}

/// Access permissions for a resource.
///
/// Modeled as a bitmask (`None, Read, Write, ReadWrite, Execute`) rather
/// than an enum of four mutually exclusive values so permission checks
/// are a single bit test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Operations(u8);

impl Operations {
  /// No operations permitted.
  pub const NONE: Self = Self(0);
  /// Read permitted.
  pub const READ: Self = Self(0b001);
  /// Write permitted.
  pub const WRITE: Self = Self(0b010);
  /// Read and write permitted.
  pub const READ_WRITE: Self = Self(0b011);
  /// Execute permitted (mutually meaningful only for `ResourceType::None`
  /// resources).
  pub const EXECUTE: Self = Self(0b100);

  /// Whether `self` permits reading.
  pub fn readable(self) -> bool {
    self.0 & Self::READ.0 != 0
  }

  /// Whether `self` permits writing.
  pub fn writable(self) -> bool {
    self.0 & Self::WRITE.0 != 0
  }

  /// Whether `self` permits execution.
  pub fn executable(self) -> bool {
    self.0 & Self::EXECUTE.0 != 0
  }

  /// Parse the access strings used in definition-file XML.
  pub fn from_xml_str(s: &str) -> Option<Self> {
    Some(match s {
      | "None" => Self::NONE,
      | "Read" => Self::READ,
      | "Write" => Self::WRITE,
      | "ReadWrite" => Self::READ_WRITE,
      | "Execute" => Self::EXECUTE,
      | _ => return None,
    })
  }
}

/// A per-resource or per-object callback slot.
///
/// The registry stores these verbatim and never invokes them; dispatch
/// (e.g. Execute) is the dispatcher's job, consulting the registry for the
/// slot.
pub type Handler = std::sync::Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Metadata describing one resource of an object.
#[derive(Clone)]
pub struct ResourceDefinition {
  /// Resource ID, unique within the owning object.
  pub id: u16,
  /// Human-readable name (definition-file `SerialisationName`).
  pub name: String,
  /// The resource's value type.
  pub kind: ResourceType,
  /// Minimum number of instances; > 0 means mandatory.
  pub min_instances: u16,
  /// Maximum number of instances; > 1 means multi-instance.
  pub max_instances: u16,
  /// Permitted operations.
  pub operation: Operations,
  /// Default value applied when an instance is created without one.
  pub default_value: Option<TreeNode>,
  /// Optional callback, e.g. for Execute.
  pub handler: Option<Handler>,
}

impl fmt::Debug for ResourceDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResourceDefinition")
     .field("id", &self.id)
     .field("name", &self.name)
     .field("kind", &self.kind)
     .field("min_instances", &self.min_instances)
     .field("max_instances", &self.max_instances)
     .field("operation", &self.operation)
     .field("default_value", &self.default_value)
     .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
     .finish()
  }
}

impl ResourceDefinition {
  /// Whether this resource may appear more than once per instance.
  pub fn is_multi_instance(&self) -> bool {
    self.max_instances > 1
  }

  /// Whether this resource must be present in every instance.
  pub fn is_mandatory(&self) -> bool {
    self.min_instances > 0
  }

  /// Whether the resource's shape is valid per §3: executable resources
  /// must be `ResourceType::None` with single cardinality.
  pub fn shape_is_valid(&self) -> bool {
    if self.operation.executable() {
      self.kind == ResourceType::None && !self.is_multi_instance()
    } else {
      true
    }
  }
}

impl PartialEq for ResourceDefinition {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
    && self.name == other.name
    && self.kind == other.kind
    && self.min_instances == other.min_instances
    && self.max_instances == other.max_instances
    && self.operation == other.operation
  }
}

/// Metadata describing an object and its resources.
#[derive(Debug, Clone)]
pub struct ObjectDefinition {
  /// Object ID.
  pub id: u16,
  /// Human-readable name.
  pub name: String,
  /// Minimum number of instances (0 or 1 in practice; mandatory singleton
  /// objects use 1).
  pub min_instances: u16,
  /// Maximum number of instances; 1 means the object is a singleton.
  pub max_instances: u16,
  /// Optional object-level callback.
  pub handler: Option<Handler>,
  /// Resources, in registration order, keyed by id.
  pub resources: crate::model::container::OrderedMap<u16, ResourceDefinition>,
}

impl ObjectDefinition {
  /// Whether every scalar field (everything but `resources`/`handler`)
  /// matches `other`. Used by the registry to distinguish a harmless
  /// re-registration from `MismatchedDefinition`.
  pub fn scalars_match(&self, other: &Self) -> bool {
    self.id == other.id
    && self.name == other.name
    && self.min_instances == other.min_instances
    && self.max_instances == other.max_instances
  }

  /// Whether the object is a singleton (at most one instance).
  pub fn is_singleton(&self) -> bool {
    self.max_instances <= 1
  }
}
