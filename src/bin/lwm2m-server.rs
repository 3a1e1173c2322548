//! Standalone LwM2M server: binds the plain-CoAP, (optionally) CoAP-over-
//! DTLS, and IPC listeners described by a config file, seeds a minimal
//! built-in object catalog, and drives the tick loop until killed.

use std::time::Duration;

use toad_lwm2m::config::Config;
use toad_lwm2m::model::container::OrderedMap;
use toad_lwm2m::model::tree::Value;
use toad_lwm2m::model::types::{ObjectDefinition, Operations, ResourceDefinition, ResourceType};
use toad_lwm2m::runtime::Runtime;
use toad_lwm2m::time::SystemClock;

#[cfg(feature = "dtls")]
use toad_lwm2m::dtls::credentials::Credentials;
#[cfg(feature = "dtls")]
use toad_lwm2m::dtls::session::Role;

const DEVICE_OBJECT: u16 = 3;
const MANUFACTURER: u16 = 0;
const MODEL_NUMBER: u16 = 1;

fn load_config() -> Config {
  match std::env::args().nth(1) {
    | Some(path) => {
      let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read config file {path}: {e}"));
      Config::from_toml(&contents).unwrap_or_else(|e| panic!("invalid config file {path}: {e}"))
    },
    | None => Config::default(),
  }
}

/// Seed the built-in Device object (id 3), present on every LwM2M client,
/// with a single instance carrying static Manufacturer/Model values.
fn seed_device_object(runtime: &mut Runtime) {
  let mut resources = OrderedMap::new();
  resources.insert(MANUFACTURER,
                    ResourceDefinition { id: MANUFACTURER,
                                         name: "Manufacturer".into(),
                                         kind: ResourceType::String,
                                         min_instances: 1,
                                         max_instances: 1,
                                         operation: Operations::READ,
                                         default_value: None,
                                         handler: None });
  resources.insert(MODEL_NUMBER,
                    ResourceDefinition { id: MODEL_NUMBER,
                                         name: "Model Number".into(),
                                         kind: ResourceType::String,
                                         min_instances: 1,
                                         max_instances: 1,
                                         operation: Operations::READ,
                                         default_value: None,
                                         handler: None });

  let dispatcher = runtime.dispatcher_mut();
  dispatcher.registry
            .register_object(ObjectDefinition { id: DEVICE_OBJECT,
                                                name: "Device".into(),
                                                min_instances: 1,
                                                max_instances: 1,
                                                handler: None,
                                                resources })
            .expect("Device object definition should not already be registered");

  dispatcher.store.create_object(DEVICE_OBJECT, 1);
  let instance = dispatcher.store
                           .create_object_instance(DEVICE_OBJECT, Some(0))
                           .expect("fresh store should accept instance 0");
  dispatcher.store.create_resource(DEVICE_OBJECT, instance, MANUFACTURER).unwrap();
  dispatcher.store.create_resource(DEVICE_OBJECT, instance, MODEL_NUMBER).unwrap();

  write_string(dispatcher, instance, MANUFACTURER, "toad-lwm2m");
  write_string(dispatcher, instance, MODEL_NUMBER, "generic");
}

fn write_string(dispatcher: &mut toad_lwm2m::coap::dispatcher::Dispatcher,
                instance: i32,
                resource_id: u16,
                value: &str) {
  let bytes = toad_lwm2m::codec::tlv::encode_value(ResourceType::String, &Value::String(value.into()));
  let len = bytes.len();
  dispatcher.store
            .set_resource_instance_value(DEVICE_OBJECT, instance, resource_id, 0, 0, &bytes, len)
            .unwrap();
}

#[cfg(feature = "dtls")]
fn psk_credentials() -> Credentials {
  let identity = std::env::var("LWM2M_PSK_IDENTITY").unwrap_or_else(|_| "toad-lwm2m".into());
  let key = std::env::var("LWM2M_PSK_KEY").unwrap_or_else(|_| "change-me".into());
  Credentials::Psk { identity, key: key.into_bytes() }
}

fn main() {
  env_logger::init();

  let config = load_config();
  let mut runtime = Runtime::new(config, toad_lwm2m::coap::dispatcher::Dispatcher::new())
    .unwrap_or_else(|e| panic!("failed to bind listeners: {e}"));

  seed_device_object(&mut runtime);

  #[cfg(feature = "dtls")]
  if std::env::var_os("LWM2M_ENABLE_DTLS").is_some() {
    runtime.enable_dtls(Role::Server, psk_credentials())
           .unwrap_or_else(|e| panic!("failed to start DTLS listener: {e}"));
    log::info!("CoAP-over-DTLS listener enabled");
  }

  log::info!("lwm2m-server ready");

  let clock = SystemClock;
  loop {
    if let Err(e) = runtime.tick(&clock) {
      log::error!("tick failed: {e}");
    }
    std::thread::sleep(Duration::from_millis(10));
  }
}
