pub mod bayeux_bus;

pub use bayeux_bus::{BayeuxBusClient, BayeuxBusConfig, BayeuxClientFactory};
