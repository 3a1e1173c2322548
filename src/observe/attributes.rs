//! Notification attributes (§4.7): `pmin`/`pmax`/`gt`/`lt`/`stp`/`cancel`,
//! inherited resource → instance → object with the most specific set
//! value winning, and the `MarkChanged` evaluation they gate.
//!
//! Grounded on `original_source/core/src/common/lwm2m_attributes.c`'s
//! `AttributeCharacteristicsTable`, which maps each attribute to its
//! CoRE-Link parameter name and value type; reproduced here as a plain
//! Rust table rather than a C array of structs.

/// One LwM2M notification attribute kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
  /// Minimum seconds between emissions.
  Pmin,
  /// Maximum seconds without emission (unconditional re-emit).
  Pmax,
  /// Numeric "greater than" threshold.
  Gt,
  /// Numeric "less than" threshold.
  Lt,
  /// Minimum numeric delta between old and new value.
  Stp,
  /// Explicit cancellation.
  Cancel,
}

/// A single row of `AttributeCharacteristicsTable`: the CoRE-Link
/// parameter name used on the wire, and whether the value is numeric
/// (float-valued) or not (e.g. `cancel` carries no value).
#[derive(Debug, Clone, Copy)]
pub struct AttributeCharacteristics {
  /// The attribute this row describes.
  pub kind: AttributeKind,
  /// CoRE-Link query parameter name, e.g. `"pmin"`.
  pub param_name: &'static str,
  /// Whether the attribute carries a numeric value.
  pub numeric: bool,
}

/// The fixed table of recognized attributes, in the order the spec
/// lists them.
pub const ATTRIBUTE_CHARACTERISTICS: &[AttributeCharacteristics] =
  &[AttributeCharacteristics { kind: AttributeKind::Pmin, param_name: "pmin", numeric: true },
    AttributeCharacteristics { kind: AttributeKind::Pmax, param_name: "pmax", numeric: true },
    AttributeCharacteristics { kind: AttributeKind::Gt, param_name: "gt", numeric: true },
    AttributeCharacteristics { kind: AttributeKind::Lt, param_name: "lt", numeric: true },
    AttributeCharacteristics { kind: AttributeKind::Stp, param_name: "stp", numeric: true },
    AttributeCharacteristics { kind: AttributeKind::Cancel, param_name: "cancel", numeric: false }];

fn characteristics_for(param_name: &str) -> Option<&'static AttributeCharacteristics> {
  ATTRIBUTE_CHARACTERISTICS.iter().find(|c| c.param_name == param_name)
}

/// A set of notification attributes attached at one level of the
/// object/instance/resource hierarchy. `None` means "not set at this
/// level".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attributes {
  /// `pmin`, in seconds.
  pub pmin: Option<i64>,
  /// `pmax`, in seconds. `Some(-1)` disables unconditional re-emission.
  pub pmax: Option<i64>,
  /// `gt` threshold.
  pub gt: Option<f64>,
  /// `lt` threshold.
  pub lt: Option<f64>,
  /// `stp` minimum delta.
  pub stp: Option<f64>,
  /// Whether `cancel` was set explicitly at this level.
  pub cancel: bool,
}

impl Attributes {
  /// Parse a single `name=value` (or bare `name`, for `cancel`) CoRE-Link
  /// parameter into an `Attributes` with just that one field set.
  pub fn parse_param(param: &str) -> Option<Self> {
    let (name, value) = match param.split_once('=') {
      | Some((n, v)) => (n, Some(v)),
      | None => (param, None),
    };
    let characteristics = characteristics_for(name)?;

    let mut attrs = Attributes::default();
    match characteristics.kind {
      | AttributeKind::Pmin => attrs.pmin = Some(value?.parse().ok()?),
      | AttributeKind::Pmax => attrs.pmax = Some(value?.parse().ok()?),
      | AttributeKind::Gt => attrs.gt = Some(value?.parse().ok()?),
      | AttributeKind::Lt => attrs.lt = Some(value?.parse().ok()?),
      | AttributeKind::Stp => attrs.stp = Some(value?.parse().ok()?),
      | AttributeKind::Cancel => attrs.cancel = true,
    }
    Some(attrs)
  }

  /// Merge `more_specific` over `self`, with any field `more_specific`
  /// sets taking precedence. Used to fold object → instance → resource
  /// attribute sets into one effective set.
  pub fn overlay(self, more_specific: Attributes) -> Attributes {
    Attributes { pmin: more_specific.pmin.or(self.pmin),
                 pmax: more_specific.pmax.or(self.pmax),
                 gt: more_specific.gt.or(self.gt),
                 lt: more_specific.lt.or(self.lt),
                 stp: more_specific.stp.or(self.stp),
                 cancel: more_specific.cancel || self.cancel }
  }
}

/// Evaluate whether a new value should mark an observer `changed`,
/// given the effective attribute set and the previously notified value.
///
/// For numeric resources, a change is marked if ANY configured predicate
/// among gt/lt/stp passes (§8 scenario 5: a `stp` delta can trigger
/// emission even when `gt` doesn't report a crossing, and vice versa).
/// For non-numeric resources, only value inequality is checked.
pub fn evaluate_changed(attrs: &Attributes, old: Option<f64>, new: Option<f64>, old_bytes: &[u8], new_bytes: &[u8]) -> bool {
  match (old, new) {
    | (Some(old), Some(new)) => {
      let mut any_configured = false;
      let mut any_pass = false;

      if let Some(gt) = attrs.gt {
        any_configured = true;
        any_pass |= (old <= gt) != (new <= gt);
      }
      if let Some(lt) = attrs.lt {
        any_configured = true;
        any_pass |= (old >= lt) != (new >= lt);
      }
      if let Some(stp) = attrs.stp {
        any_configured = true;
        any_pass |= (new - old).abs() >= stp;
      }

      if any_configured {
        any_pass
      } else {
        old != new
      }
    },
    | _ => old_bytes != new_bytes,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_pmin_param() {
    let attrs = Attributes::parse_param("pmin=2").unwrap();
    assert_eq!(attrs.pmin, Some(2));
  }

  #[test]
  fn overlay_prefers_more_specific() {
    let object = Attributes { pmin: Some(5), ..Default::default() };
    let resource = Attributes { pmin: Some(1), ..Default::default() };
    assert_eq!(object.overlay(resource).pmin, Some(1));
  }

  #[test]
  fn gt_and_stp_both_gate_scenario_5() {
    let attrs = Attributes { gt: Some(25.0), stp: Some(5.0), ..Default::default() };

    assert!(!evaluate_changed(&attrs, Some(20.0), Some(22.0), &[], &[]));
    assert!(evaluate_changed(&attrs, Some(22.0), Some(26.0), &[], &[]));
    assert!(!evaluate_changed(&attrs, Some(26.0), Some(27.0), &[], &[]));
    assert!(evaluate_changed(&attrs, Some(26.0), Some(31.0), &[], &[]));
  }
}
