//! Observation registry (§4.7, component G): per-observer state and the
//! emission pass that walks it each tick.
//!
//! Grounded on `original_source/core/src/common/lwm2m_observers.c`'s
//! observer list plus `pmin`/`pmax` gating, and on the teacher's
//! `retry::RetryTimer` for the "has enough time passed" shape (here
//! applied to notification cadence instead of CON retransmission).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::codec::ContentFormat;
use crate::model::container::OrderedMap;
use crate::observe::attributes::{evaluate_changed, Attributes};
use crate::time::Clock;

/// Opaque handle identifying one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// The path an observer is watching: object / instance / optional
/// resource / optional resource-instance (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedPath {
  /// Object ID.
  pub object_id: u16,
  /// Object Instance ID.
  pub instance_id: i32,
  /// Resource ID, if the observation targets a resource or narrower.
  pub resource_id: Option<u16>,
  /// Resource Instance ID, if the observation targets a single instance.
  pub resource_instance_id: Option<u16>,
}

impl ObservedPath {
  /// Whether `self` is covered by (i.e. is this path or a descendant
  /// of) `prefix`. Used to cascade-cancel observers on delete.
  pub fn covered_by(&self, prefix: &ObservedPath) -> bool {
    if self.object_id != prefix.object_id {
      return false;
    }
    if prefix.instance_id != self.instance_id && prefix.instance_id >= 0 {
      return false;
    }
    match (prefix.resource_id, self.resource_id) {
      | (Some(p), Some(s)) if p != s => return false,
      | (Some(_), None) => return false,
      | _ => {},
    }
    match (prefix.resource_instance_id, self.resource_instance_id) {
      | (Some(p), Some(s)) if p != s => return false,
      | (Some(_), None) => return false,
      | _ => {},
    }
    true
  }
}

/// Per-observer state (§4.7).
#[derive(Debug, Clone)]
pub struct Observer {
  /// The remote peer that issued the Observe.
  pub peer: SocketAddr,
  /// The path being watched.
  pub path: ObservedPath,
  /// Negotiated Content-Format for notifications.
  pub content_type: ContentFormat,
  /// CoAP token to echo on every notification.
  pub token: Vec<u8>,
  /// Notification sequence number, incremented on each emission.
  pub sequence: u32,
  /// Instant of the last emission (or registration, before the first).
  last_emit: Instant,
  /// Whether the watched value has changed since the last emission.
  pub changed: bool,
  /// The last value notified, as raw encoded bytes — compared against
  /// on every write, not the last write's bytes.
  pub old_value: Option<Vec<u8>>,
  /// The last value notified, as an `f64` when the resource is numeric.
  pub old_numeric: Option<f64>,
  /// Effective (already-overlaid) attributes for this observer.
  pub attrs: Attributes,
}

/// One notification due to be sent, yielded by [`ObservationRegistry::emission_pass`].
#[derive(Debug, Clone)]
pub struct Emission {
  /// Handle of the observer this emission is for.
  pub id: ObserverId,
  /// Remote peer to send to.
  pub peer: SocketAddr,
  /// Notification sequence number (post-increment).
  pub sequence: u32,
  /// CoAP token to echo.
  pub token: Vec<u8>,
  /// Path the notification concerns.
  pub path: ObservedPath,
  /// Content-Format to encode the notification payload with.
  pub content_type: ContentFormat,
}

/// The set of all active observers, and the machinery to mark values
/// changed and run the periodic emission pass.
#[derive(Debug, Default)]
pub struct ObservationRegistry {
  observers: OrderedMap<u64, Observer>,
  next_id: u64,
}

impl ObservationRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a new observer, returning its handle.
  pub fn add(&mut self, observer: Observer) -> ObserverId {
    let id = self.next_id;
    self.next_id += 1;
    self.observers.insert(id, observer);
    ObserverId(id)
  }

  /// Remove a single observer by handle.
  pub fn remove(&mut self, id: ObserverId) -> Option<Observer> {
    self.observers.remove(&id.0)
  }

  /// Cascade-cancel: remove every observer whose path is covered by
  /// `prefix` (e.g. deleting `/3/0` cancels an observer on `/3/0/1`).
  pub fn remove_path_prefix(&mut self, prefix: ObservedPath) -> Vec<Observer> {
    let doomed: Vec<u64> = self.observers
                               .iter()
                               .filter(|(_, o)| o.path.covered_by(&prefix))
                               .map(|(id, _)| *id)
                               .collect();
    doomed.into_iter().filter_map(|id| self.observers.remove(&id)).collect()
  }

  /// Evaluate `MarkChanged` for every observer exactly matching `path`,
  /// given the newly written value. `numeric` is `Some` for resources
  /// with a meaningful numeric representation (Integer/Float/Time).
  pub fn mark_changed(&mut self, path: ObservedPath, new_bytes: &[u8], numeric: Option<f64>) {
    for observer in self.observers.values_mut() {
      if observer.path != path {
        continue;
      }
      let old_bytes = observer.old_value.as_deref().unwrap_or(&[]);
      let changed = evaluate_changed(&observer.attrs, observer.old_numeric, numeric, old_bytes, new_bytes);
      if changed {
        observer.changed = true;
        observer.old_value = Some(new_bytes.to_vec());
        observer.old_numeric = numeric;
      }
    }
  }

  /// Mutable access to every observer, for IPC `WriteAttributes` to
  /// overlay a newly received attribute set onto whichever observers
  /// match its target path.
  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Observer> {
    self.observers.values_mut()
  }

  /// Run the periodic emission pass (§4.7): for each observer that is
  /// `changed` and past `pmin`, or unconditionally past `pmax`, emit a
  /// notification, reset `changed`, and bump `lastEmit`.
  pub fn emission_pass(&mut self, clock: &dyn Clock) -> Vec<Emission> {
    let now = clock.now();
    let mut due = Vec::new();

    for (id, observer) in self.observers.iter_mut() {
      let elapsed = now.saturating_duration_since(observer.last_emit);
      let pmin = observer.attrs.pmin.unwrap_or(0).max(0) as u64;
      let past_pmin = elapsed >= Duration::from_secs(pmin);
      let past_pmax = match observer.attrs.pmax {
        | Some(pmax) if pmax >= 0 => elapsed >= Duration::from_secs(pmax as u64),
        | _ => false,
      };

      if (observer.changed && past_pmin) || past_pmax {
        observer.sequence += 1;
        observer.changed = false;
        observer.last_emit = now;
        due.push(Emission { id: ObserverId(*id),
                            peer: observer.peer,
                            sequence: observer.sequence,
                            token: observer.token.clone(),
                            path: observer.path,
                            content_type: observer.content_type });
      }
    }

    due
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::FakeClock;

  fn path() -> ObservedPath {
    ObservedPath { object_id: 3303, instance_id: 0, resource_id: Some(5700), resource_instance_id: None }
  }

  fn observer(attrs: Attributes, last_emit: Instant) -> Observer {
    Observer { peer: "127.0.0.1:1".parse().unwrap(),
              path: path(),
              content_type: ContentFormat::Tlv,
              token: vec![1],
              sequence: 0,
              last_emit,
              changed: false,
              old_value: None,
              old_numeric: None,
              attrs }
  }

  #[test]
  fn prefix_deletion_cancels_descendant_observer() {
    let mut reg = ObservationRegistry::new();
    let clock = FakeClock::new();
    let id = reg.add(observer(Attributes::default(), clock.now()));

    let prefix = ObservedPath { object_id: 3303, instance_id: 0, resource_id: None, resource_instance_id: None };
    let removed = reg.remove_path_prefix(prefix);
    assert_eq!(removed.len(), 1);
    assert!(reg.remove(id).is_none());
  }

  #[test]
  fn pmin_gating_scenario_4() {
    let mut reg = ObservationRegistry::new();
    let clock = FakeClock::new();
    let attrs = Attributes { pmin: Some(2), pmax: Some(10), ..Default::default() };
    reg.add(observer(attrs, clock.now()));

    reg.mark_changed(path(), b"a", Some(1.0));
    reg.mark_changed(path(), b"b", Some(2.0));
    reg.mark_changed(path(), b"c", Some(3.0));
    clock.advance(Duration::from_millis(500));

    let due = reg.emission_pass(&clock);
    assert!(due.is_empty(), "pmin not yet elapsed");

    clock.advance(Duration::from_secs(2));
    let due = reg.emission_pass(&clock);
    assert_eq!(due.len(), 1);

    clock.advance(Duration::from_secs(10));
    let due = reg.emission_pass(&clock);
    assert_eq!(due.len(), 1, "pmax unconditional re-emit with no writes");
  }
}
