use serde::{Deserialize, Serialize};

use crate::miot_api::models::property::PropertyAddress;

/// Capability document enumerating a device's exposed services and
/// properties, fetched once from the spec site per run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstanceDocument {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub services: Vec<InstanceService>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstanceService {
    pub iid: i32,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub properties: Vec<InstanceProperty>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstanceProperty {
    pub iid: i32,
    #[serde(rename = "type")]
    pub r#type: String,
}

impl InstanceDocument {
    /// Look up the address of the property whose urn carries the given
    /// semantic key, e.g. "wifi-sta-cnt" in
    /// "urn:miot-spec-v2:property:wifi-sta-cnt:00000001:...". Returns `None`
    /// when the document does not expose the key.
    pub fn definition_with_key(&self, key: &str) -> Option<PropertyAddress> {
        for service in &self.services {
            for property in &service.properties {
                if property.r#type.split(':').any(|segment| segment == key) {
                    return Some(PropertyAddress::new(service.iid, property.iid));
                }
            }
        }
        None
    }
}
