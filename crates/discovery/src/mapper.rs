use serde::Serialize;
use tracing::debug;

use types::{DecodedEvent, DeviceIdentity};

use crate::identity::model_name;
use crate::DiscoveryConfig;

pub const MANUFACTURER: &str = "RTL_433";

/// Home Assistant `device` block shared by every entity of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<DeviceIdentity>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
}

/// Discovery config for one reading of a device, minus the `device` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub value_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotation {
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub entity_category: Option<&'static str>,
}

const ANNOTATIONS: &[(&str, Annotation)] = &[
    (
        "temperature_C",
        Annotation {
            unit: Some("°C"),
            device_class: Some("temperature"),
            entity_category: None,
        },
    ),
    (
        "temperature_F",
        Annotation {
            unit: Some("°F"),
            device_class: Some("temperature"),
            entity_category: None,
        },
    ),
    (
        "humidity",
        Annotation {
            unit: Some("%"),
            device_class: Some("humidity"),
            entity_category: None,
        },
    ),
    (
        "battery_ok",
        Annotation {
            unit: None,
            device_class: Some("battery"),
            entity_category: Some("diagnostic"),
        },
    ),
];

impl Annotation {
    /// Case-sensitive lookup; unknown fields get no annotation.
    pub fn for_field(field: &str) -> Self {
        ANNOTATIONS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, annotation)| *annotation)
            .unwrap_or_default()
    }
}

/// Everything needed to announce one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDiscovery {
    pub device: DeviceDescriptor,
    /// `(config topic, descriptor)` in the order the fields appeared.
    pub entities: Vec<(String, EntityDescriptor)>,
}

#[derive(Serialize)]
struct Payload<'a> {
    #[serde(flatten)]
    entity: &'a EntityDescriptor,
    device: &'a DeviceDescriptor,
}

impl DeviceDiscovery {
    /// JSON body for one entity with the shared device block merged in.
    pub fn payload(&self, entity: &EntityDescriptor) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Payload {
            entity,
            device: &self.device,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Builds the device block and one sensor entity per numeric reading.
///
/// Pure: it neither publishes nor records the identity as announced.
pub fn build_discovery(
    event: &DecodedEvent,
    identity: &DeviceIdentity,
    config: &DiscoveryConfig,
) -> DeviceDiscovery {
    let model = model_name(event);
    let id = event.get("id").map(ToString::to_string).unwrap_or_default();
    let device = DeviceDescriptor {
        identifiers: vec![identity.clone()],
        name: format!("RTL_433 {model} {id}"),
        model: model.clone(),
        manufacturer: MANUFACTURER.to_string(),
    };

    let state_topic = config.state_topic(identity);
    let mut entities = Vec::new();
    for (field, value) in event.readings() {
        if !value.is_numeric() {
            debug!(identity = %identity, field, "skipping non-numeric field");
            continue;
        }

        let annotation = Annotation::for_field(field);
        let descriptor = EntityDescriptor {
            name: format!("{model} {field}"),
            unique_id: format!("{identity}_{field}"),
            state_topic: state_topic.clone(),
            value_template: format!("{{{{ value_json.{field} }}}}"),
            unit_of_measurement: annotation.unit,
            device_class: annotation.device_class,
            entity_category: annotation.entity_category,
        };
        entities.push((config.config_topic(identity, field), descriptor));
    }

    DeviceDiscovery { device, entities }
}
