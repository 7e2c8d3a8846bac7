//! Device identity resolution and Home Assistant discovery payloads for
//! decoded radio events.

mod identity;
mod mapper;
mod tracker;

pub use identity::{resolve, sanitize};
pub use mapper::{
    build_discovery, Annotation, DeviceDescriptor, DeviceDiscovery, EntityDescriptor,
    MANUFACTURER,
};
pub use tracker::DiscoveryTracker;

use types::DeviceIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Root of the `<prefix>/sensor/<identity>/<field>/config` topics.
    pub discovery_prefix: String,
    /// Root of the per-device state topics.
    pub topic_prefix: String,
    /// Retain flag applied to discovery messages. State updates are never retained.
    pub retain: bool,
}

impl DiscoveryConfig {
    pub fn state_topic(&self, identity: &DeviceIdentity) -> String {
        format!("{}/{}", self.topic_prefix, identity)
    }

    pub fn config_topic(&self, identity: &DeviceIdentity, field: &str) -> String {
        format!("{}/sensor/{}/{}/config", self.discovery_prefix, identity, field)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            topic_prefix: "rtl_433".to_string(),
            retain: true,
        }
    }
}
