use crate::miot_api::models::instance::InstanceDocument;
use crate::miot_api::models::property::PropertyAddress;

pub const SWITCH_KEY: &str = "on";
pub const WIFI_STA_CNT_KEY: &str = "wifi-sta-cnt";
pub const BLUETOOTH_CNT_KEY: &str = "bluetooth-cnt";
pub const ILLUMINATION_KEY: &str = "illumination";
pub const BLUETOOTH_NAME_KEY: &str = "bluetooth-name";

/// Per-screen property addresses, resolved once at startup and never
/// changed afterwards. An unresolved entry disables every downstream fetch
/// and subscribe for that key.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProps {
    pub switch: Option<PropertyAddress>,
    pub wifi_sta_cnt: Option<PropertyAddress>,
    pub bluetooth_cnt: Option<PropertyAddress>,
    pub illumination: Option<PropertyAddress>,
    pub bluetooth_name: Option<PropertyAddress>,
    pub bluetooth_match: Option<PropertyAddress>,
}

impl ResolvedProps {
    /// Resolve the six semantic keys. The counters and illumination follow
    /// the instance document; power and the two bluetooth scan properties
    /// are pinned to the firmware's addresses even when the document
    /// disagrees, matching the device's shipped behavior.
    pub fn from_instance(instance: &InstanceDocument) -> Self {
        Self {
            switch: Some(PropertyAddress::new(2, 1)),
            wifi_sta_cnt: instance.definition_with_key(WIFI_STA_CNT_KEY),
            bluetooth_cnt: instance.definition_with_key(BLUETOOTH_CNT_KEY),
            illumination: instance.definition_with_key(ILLUMINATION_KEY),
            bluetooth_name: Some(PropertyAddress::new(7, 4)),
            bluetooth_match: Some(PropertyAddress::new(7, 3)),
        }
    }

    /// Push keys for the status screen. The bluetooth target list is
    /// deliberately absent here; the target-list editor holds its own
    /// subscription for it.
    pub fn subscription_keys(&self) -> Vec<String> {
        [
            self.switch,
            self.wifi_sta_cnt,
            self.bluetooth_cnt,
            self.illumination,
            self.bluetooth_match,
        ]
        .iter()
        .flatten()
        .map(|address| address.prop_key())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with(urn_key: &str, siid: i32, piid: i32) -> InstanceDocument {
        serde_json::from_str(&format!(
            r#"{{
                "type": "urn:miot-spec-v2:device:switch:0000A003:youxam-smsw:1",
                "services": [
                    {{
                        "iid": {siid},
                        "type": "urn:miot-spec-v2:service:x:00007801:youxam-smsw:1",
                        "properties": [
                            {{"iid": {piid}, "type": "urn:miot-spec-v2:property:{urn_key}:00000001:youxam-smsw:1"}}
                        ]
                    }}
                ]
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn counters_follow_the_instance_document() {
        let props = ResolvedProps::from_instance(&instance_with(WIFI_STA_CNT_KEY, 5, 3));
        assert_eq!(props.wifi_sta_cnt, Some(PropertyAddress::new(5, 3)));
        assert!(props.bluetooth_cnt.is_none());
        assert!(props.illumination.is_none());
    }

    #[test]
    fn pinned_addresses_override_the_lookup() {
        // even when the document claims a different address for the switch,
        // the pinned one wins
        let props = ResolvedProps::from_instance(&instance_with(SWITCH_KEY, 9, 9));
        assert_eq!(props.switch, Some(PropertyAddress::new(2, 1)));
        assert_eq!(props.bluetooth_name, Some(PropertyAddress::new(7, 4)));
        assert_eq!(props.bluetooth_match, Some(PropertyAddress::new(7, 3)));
    }

    #[test]
    fn subscription_keys_skip_unresolved_and_target_list() {
        let props = ResolvedProps::from_instance(&instance_with(ILLUMINATION_KEY, 5, 2));
        let keys = props.subscription_keys();
        assert!(keys.contains(&"prop.2.1".to_string()));
        assert!(keys.contains(&"prop.5.2".to_string()));
        assert!(keys.contains(&"prop.7.3".to_string()));
        // target list has its own subscription on the editor screen
        assert!(!keys.contains(&"prop.7.4".to_string()));
        assert_eq!(keys.len(), 3);
    }
}
