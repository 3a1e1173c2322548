//! The registered-client directory backing `ListClients`/
//! `ClientRegister`/`ClientDeregister`/`ClientUpdate` (§4.9).
//!
//! Grounded on `original_source/daemon/src/common/lwm2m_ipc.c`'s client
//! table (endpoint name, lifetime, registered object list). A full
//! implementation proxies CoAP operations out to the named remote
//! client; this build keeps only the bookkeeping table and serves
//! `Write`/`Read`/`Observe`/`Execute`/`WriteAttributes`/`Discover`
//! straight off the local [`crate::coap::dispatcher::Dispatcher`]
//! instead of opening a second CoAP exchange to a proxied device — see
//! `DESIGN.md`.

use std::time::{Duration, Instant};

/// One registered LwM2M client, as tracked by the IPC server.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
  /// Server-assigned client id.
  pub id: i32,
  /// Client-chosen endpoint name.
  pub endpoint_name: String,
  /// Registered lifetime, in seconds.
  pub lifetime: u32,
  /// `</object/instance>` paths reported at registration or update.
  pub objects: Vec<String>,
  last_update: Instant,
}

/// The table of currently registered clients.
#[derive(Debug, Default)]
pub struct ClientDirectory {
  clients: Vec<RegisteredClient>,
  next_id: i32,
}

impl ClientDirectory {
  /// An empty directory.
  pub fn new() -> Self {
    Self::default()
  }

  /// Handle `ClientRegister`: add a new client, returning its assigned id.
  pub fn register(&mut self, clock: &dyn crate::time::Clock, endpoint_name: String, lifetime: u32, objects: Vec<String>) -> i32 {
    self.next_id += 1;
    let id = self.next_id;
    self.clients.push(RegisteredClient { id, endpoint_name, lifetime, objects, last_update: clock.now() });
    id
  }

  /// Handle `ClientUpdate`: refresh an existing client's lifetime/object
  /// list.
  pub fn update(&mut self,
                clock: &dyn crate::time::Clock,
                id: i32,
                lifetime: Option<u32>,
                objects: Option<Vec<String>>)
                -> bool {
    let Some(client) = self.clients.iter_mut().find(|c| c.id == id) else { return false };
    if let Some(lifetime) = lifetime {
      client.lifetime = lifetime;
    }
    if let Some(objects) = objects {
      client.objects = objects;
    }
    client.last_update = clock.now();
    true
  }

  /// Handle `ClientDeregister`: remove a client by id.
  pub fn deregister(&mut self, id: i32) -> bool {
    let before = self.clients.len();
    self.clients.retain(|c| c.id != id);
    self.clients.len() != before
  }

  /// Handle `ListClients`: every currently registered client.
  pub fn list(&self) -> &[RegisteredClient] {
    &self.clients
  }

  /// Look up a client by id.
  pub fn get(&self, id: i32) -> Option<&RegisteredClient> {
    self.clients.iter().find(|c| c.id == id)
  }

  /// Clients whose registration lifetime has lapsed, by `last_update +
  /// lifetime < clock.now()`. Mirrors [`crate::ipc::session::SessionRouter::reap_idle`]'s
  /// explicit-tick reaping shape.
  pub fn expired(&self, clock: &dyn crate::time::Clock) -> Vec<i32> {
    let now = clock.now();
    self.clients
        .iter()
        .filter(|c| now.saturating_duration_since(c.last_update) >= Duration::from_secs(c.lifetime as u64))
        .map(|c| c.id)
        .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::FakeClock;

  #[test]
  fn register_then_list_then_deregister() {
    let mut dir = ClientDirectory::new();
    let clock = FakeClock::new();
    let id = dir.register(&clock, "node-1".into(), 300, vec!["/3/0".into()]);

    assert_eq!(dir.list().len(), 1);
    assert_eq!(dir.get(id).unwrap().endpoint_name, "node-1");

    assert!(dir.deregister(id));
    assert!(dir.list().is_empty());
  }

  #[test]
  fn update_refreshes_lifetime_and_objects() {
    let mut dir = ClientDirectory::new();
    let clock = FakeClock::new();
    let id = dir.register(&clock, "node-1".into(), 300, vec![]);

    assert!(dir.update(&clock, id, Some(600), Some(vec!["/3303/0".into()])));
    assert_eq!(dir.get(id).unwrap().lifetime, 600);
    assert_eq!(dir.get(id).unwrap().objects, vec!["/3303/0".to_string()]);
  }

  #[test]
  fn expired_clients_are_reported_past_their_lifetime() {
    let mut dir = ClientDirectory::new();
    let clock = FakeClock::new();
    let id = dir.register(&clock, "node-1".into(), 10, vec![]);

    clock.advance(Duration::from_secs(5));
    assert!(dir.expired(&clock).is_empty());

    clock.advance(Duration::from_secs(10));
    assert_eq!(dir.expired(&clock), vec![id]);
  }
}
