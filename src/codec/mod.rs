//! The resource (de)serialization engine: TLV, plain-text, and JSON
//! codecs, plus the content-format negotiation tying them to CoAP.

pub mod json;
pub mod text;
pub mod tlv;

/// The CoAP Content-Format numbers this codec understands (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
  /// `text/plain`, format number 0.
  Text,
  /// `application/octet-stream`, format number 42.
  OctetStream,
  /// `application/vnd.oma.lwm2m+tlv`, format number 11542.
  Tlv,
  /// `application/vnd.oma.lwm2m+json`, format number 11543.
  Json,
}

impl ContentFormat {
  /// The CoAP Content-Format registry number for this format.
  pub fn number(self) -> u16 {
    match self {
      | Self::Text => 0,
      | Self::OctetStream => 42,
      | Self::Tlv => 11542,
      | Self::Json => 11543,
    }
  }

  /// Map a Content-Format/Accept option number to a known format.
  pub fn from_number(n: u16) -> Option<Self> {
    Some(match n {
      | 0 => Self::Text,
      | 42 => Self::OctetStream,
      | 11542 => Self::Tlv,
      | 11543 => Self::Json,
      | _ => return None,
    })
  }

  /// GET without an Accept option uses TLV by default (§4.5).
  pub fn default_for_get() -> Self {
    Self::Tlv
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn numbers_match_registry() {
    assert_eq!(ContentFormat::Tlv.number(), 11542);
    assert_eq!(ContentFormat::Json.number(), 11543);
  }

  #[test]
  fn from_number_roundtrips() {
    for fmt in [ContentFormat::Text, ContentFormat::OctetStream, ContentFormat::Tlv, ContentFormat::Json] {
      assert_eq!(ContentFormat::from_number(fmt.number()), Some(fmt));
    }
  }
}
