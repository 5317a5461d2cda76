use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One property on the device's capability model, identified by its
/// service-index/property-index pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAddress {
    pub siid: i32,
    pub piid: i32,
}

impl PropertyAddress {
    pub const fn new(siid: i32, piid: i32) -> Self {
        Self { siid, piid }
    }

    /// Push-channel key for this property, e.g. "prop.2.1"
    pub fn prop_key(&self) -> String {
        format!("prop.{}.{}", self.siid, self.piid)
    }

    pub fn matches(&self, siid: i32, piid: i32) -> bool {
        self.siid == siid && self.piid == piid
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetPropertyRequest {
    pub did: String,
    pub siid: i32,
    pub piid: i32,
}

impl GetPropertyRequest {
    pub fn new(did: &str, address: PropertyAddress) -> Self {
        Self {
            did: did.to_string(),
            siid: address.siid,
            piid: address.piid,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetPropertyRequest {
    pub did: String,
    pub siid: i32,
    pub piid: i32,
    pub value: Value,
}

impl SetPropertyRequest {
    pub fn new(did: &str, address: PropertyAddress, value: Value) -> Self {
        Self {
            did: did.to_string(),
            siid: address.siid,
            piid: address.piid,
            value,
        }
    }
}

/// Per-property outcome of a batched get or set. A non-zero `code` means the
/// entry failed individually; `code == 1` on a set means the device is still
/// processing and a push message will carry the final value.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PropertyResult {
    pub siid: i32,
    pub piid: i32,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}
