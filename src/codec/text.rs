//! The plain-text codec (§4.5), used only for single resource-instance
//! reads/writes.

use base64::Engine;

use crate::model::tree::Value;
use crate::model::types::ResourceType;

/// Errors raised while decoding plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextError {
  /// The text couldn't be parsed as the target resource type.
  Malformed,
  /// The resource type has no plain-text representation (e.g.
  /// multi-instance containers).
  Unsupported,
}

impl std::fmt::Display for TextError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      | Self::Malformed => "malformed plain-text value",
      | Self::Unsupported => "resource type has no plain-text representation",
    };
    f.write_str(s)
  }
}

impl std::error::Error for TextError {}

/// Encode a single value as plain text.
pub fn encode(value: &Value) -> String {
  match value {
    | Value::String(s) => s.clone(),
    | Value::Integer(n) => n.to_string(),
    | Value::Time(n) => n.to_string(),
    | Value::Float(f) => format!("{f}"),
    | Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
    | Value::Opaque(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
    | Value::ObjectLink(o, i) => format!("{o}:{i}"),
  }
}

/// Decode plain text into a value of the given type.
///
/// Decoding is lenient on leading/trailing whitespace.
pub fn decode(kind: ResourceType, text: &str) -> Result<Value, TextError> {
  let text = text.trim();
  Ok(match kind {
    | ResourceType::String => Value::String(text.to_string()),
    | ResourceType::Integer => Value::Integer(text.parse().map_err(|_| TextError::Malformed)?),
    | ResourceType::Time => Value::Time(text.parse().map_err(|_| TextError::Malformed)?),
    | ResourceType::Float => Value::Float(text.parse().map_err(|_| TextError::Malformed)?),
    | ResourceType::Boolean => match text {
      | "true" => Value::Boolean(true),
      | "false" => Value::Boolean(false),
      | _ => return Err(TextError::Malformed),
    },
    | ResourceType::Opaque => {
      Value::Opaque(base64::engine::general_purpose::STANDARD.decode(text)
                                                              .map_err(|_| TextError::Malformed)?)
    },
    | ResourceType::ObjectLink => {
      let (o, i) = text.split_once(':').ok_or(TextError::Malformed)?;
      Value::ObjectLink(o.parse().map_err(|_| TextError::Malformed)?,
                         i.parse().map_err(|_| TextError::Malformed)?)
    },
    | ResourceType::None | ResourceType::Invalid => return Err(TextError::Unsupported),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_every_type() {
    let cases = [(ResourceType::Integer, Value::Integer(-42)),
                 (ResourceType::Float, Value::Float(1.5)),
                 (ResourceType::Boolean, Value::Boolean(true)),
                 (ResourceType::String, Value::String("hi".into())),
                 (ResourceType::Time, Value::Time(1_700_000_000)),
                 (ResourceType::ObjectLink, Value::ObjectLink(3, 0))];
    for (kind, value) in cases {
      let text = encode(&value);
      assert_eq!(decode(kind, &text).unwrap(), value);
    }
  }

  #[test]
  fn decode_trims_whitespace() {
    assert_eq!(decode(ResourceType::Integer, "  42 \n").unwrap(), Value::Integer(42));
  }

  #[test]
  fn opaque_round_trips_through_base64() {
    let value = Value::Opaque(vec![1, 2, 3, 255]);
    let text = encode(&value);
    assert_eq!(decode(ResourceType::Opaque, &text).unwrap(), value);
  }
}
