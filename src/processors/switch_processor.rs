use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::miot_api::models::property::{
    GetPropertyRequest, PropertyResult, SetPropertyRequest,
};
use crate::miot_api::models::scene::Scene;
use crate::miot_api::resolver::ResolvedProps;
use crate::miot_api::spec_client::SpecApi;
use crate::processors::PushProcessor;
use crate::push_client::PushMessage;
use crate::scenes::{MergedSceneState, merge};
use crate::transition::Transition;

pub const SWITCH_FAIL_TIP: &str = "Operation failed";

/// How long a transient failure tip stays visible before auto-dismissing.
const TIP_DISMISS_DELAY: Duration = Duration::from_millis(300);

/// Retry hint passed to batched reads; allows a short transient
/// inconsistency on the transport side.
const READ_RETRY_HINT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A power write is in flight (or acknowledged with "still processing");
    /// further toggles are ignored until a settle.
    Handling,
}

/// Last known values of the six tracked properties.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub on: bool,
    pub wifi_sta_cnt: i64,
    pub bluetooth_cnt: i64,
    pub illumination: f64,
    pub bluetooth_target_list_raw: String,
    pub bluetooth_match: bool,
}

/// Snapshot published on the state topic every scene tick.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub on: bool,
    pub wifi_sta_cnt: i64,
    pub bluetooth_cnt: i64,
    pub illumination: f64,
    pub bluetooth_scan: &'static str,
    pub status_line: String,
    pub timing_active: bool,
    pub countdown_active: bool,
    pub transition_level: f32,
}

/// Reconciles the device's property store into a single status record and
/// drives the debounced power toggle. All mutation happens on the owning
/// task; remote pushes are ground truth and settle any pending toggle.
pub struct SwitchProcessor<T>
where
    T: SpecApi + Send + Sync + 'static,
{
    client: T,
    did: String,
    props: ResolvedProps,
    status: DeviceStatus,
    phase: Phase,
    transition: Transition,
    scenes: Vec<Scene>,
    merged: MergedSceneState,
    fail_tip: Option<(String, Instant)>,
}

impl<T> SwitchProcessor<T>
where
    T: SpecApi + Send + Sync + 'static,
{
    pub fn new(client: T, did: &str, props: ResolvedProps) -> Self {
        Self {
            client,
            did: did.to_string(),
            props,
            status: DeviceStatus::default(),
            phase: Phase::Idle,
            transition: Transition::new(),
            scenes: Vec::new(),
            merged: MergedSceneState::default(),
            fail_tip: None,
        }
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn merged(&self) -> &MergedSceneState {
        &self.merged
    }

    /// The transient failure tip, if one is still within its display window.
    pub fn current_tip(&self) -> Option<&str> {
        match &self.fail_tip {
            Some((tip, shown_at)) if shown_at.elapsed() < TIP_DISMISS_DELAY => Some(tip),
            _ => None,
        }
    }

    /// Flip the power state. Ignored while a previous toggle is unresolved
    /// or when the power address never resolved. Optimistic: the visual
    /// transition starts bouncing immediately; the acknowledgment code
    /// decides the outcome (0 confirm, 1 wait for push, anything else
    /// revert + transient tip).
    pub async fn toggle(&mut self, now: DateTime<Utc>) {
        let Some(switch) = self.props.switch else {
            return;
        };
        if self.phase == Phase::Handling {
            // debounce high-frequency taps
            return;
        }
        self.phase = Phase::Handling;
        let target = !self.status.on;
        if target {
            self.transition.ping_pong(0.0, 0.5);
        } else {
            self.transition.ping_pong(0.5, 1.0);
        }

        let request = SetPropertyRequest::new(&self.did, switch, Value::Bool(target));
        match self.client.set_properties_value(vec![request]).await {
            Ok(results) => match results.first().map(|result| result.code) {
                // still processing; the push message settles it later
                Some(1) => {}
                Some(0) => {
                    self.dismiss_tip();
                    self.settle(target, now);
                }
                other => {
                    warn!("switch write rejected: {:?}", other);
                    self.settle(!target, now);
                    self.show_fail_tip();
                }
            },
            Err(e) => {
                error!("switch write failed: {:?}", e);
                self.settle(!target, now);
                self.show_fail_tip();
            }
        }
    }

    /// Accept a value as ground truth in any phase: stop the bounce, pin the
    /// transition, clear the handling guard and reframe the scene status.
    pub fn settle(&mut self, on: bool, now: DateTime<Utc>) {
        self.transition.settle(on);
        self.phase = Phase::Idle;
        self.status.on = on;
        self.recompute_scenes(now);
    }

    /// Batched refresh of all six tracked properties, then the scene list as
    /// a continuation so the merge always runs against fresh on/off state.
    pub async fn get_device_props(&mut self, now: DateTime<Utc>) {
        let Some(switch) = self.props.switch else {
            return;
        };
        let mut requests = vec![GetPropertyRequest::new(&self.did, switch)];
        requests.extend(
            [
                self.props.wifi_sta_cnt,
                self.props.bluetooth_cnt,
                self.props.illumination,
                self.props.bluetooth_name,
                self.props.bluetooth_match,
            ]
            .into_iter()
            .flatten()
            .map(|address| GetPropertyRequest::new(&self.did, address)),
        );

        match self
            .client
            .get_properties_value(requests, READ_RETRY_HINT)
            .await
        {
            Ok(results) => {
                self.apply_results(&results, now);
                self.load_scenes(now).await;
            }
            Err(e) => {
                debug!("property refresh failed, keeping last known state: {:?}", e);
            }
        }
    }

    /// Reload the scene list and recompute the merged status.
    pub async fn load_scenes(&mut self, now: DateTime<Utc>) {
        match self.client.load_timer_scenes(&self.did).await {
            Ok(scenes) => {
                self.scenes = scenes;
                self.recompute_scenes(now);
            }
            Err(e) => {
                debug!("scene list fetch failed, keeping last known scenes: {:?}", e);
            }
        }
    }

    /// The periodic 2-second recompute against the cached scene list.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.recompute_scenes(now);
    }

    fn recompute_scenes(&mut self, now: DateTime<Utc>) {
        self.merged = merge(&self.scenes, self.status.on, now);
    }

    fn apply_results(&mut self, results: &[PropertyResult], now: DateTime<Utc>) {
        for result in results {
            // entries that failed individually keep their previous value
            if result.code != 0 {
                continue;
            }
            let Some(value) = result.value.as_ref() else {
                continue;
            };
            if let Some(address) = self.props.switch
                && address.matches(result.siid, result.piid)
                && let Some(on) = value.as_bool()
            {
                self.change_state(on, now);
            } else if let Some(address) = self.props.wifi_sta_cnt
                && address.matches(result.siid, result.piid)
                && let Some(count) = value.as_i64()
            {
                self.status.wifi_sta_cnt = count;
            } else if let Some(address) = self.props.bluetooth_cnt
                && address.matches(result.siid, result.piid)
                && let Some(count) = value.as_i64()
            {
                self.status.bluetooth_cnt = count;
            } else if let Some(address) = self.props.illumination
                && address.matches(result.siid, result.piid)
                && let Some(level) = value.as_f64()
            {
                self.status.illumination = level;
            } else if let Some(address) = self.props.bluetooth_name
                && address.matches(result.siid, result.piid)
                && let Some(raw) = value.as_str()
            {
                self.status.bluetooth_target_list_raw = raw.to_string();
            } else if let Some(address) = self.props.bluetooth_match
                && address.matches(result.siid, result.piid)
                && let Some(matched) = value.as_bool()
            {
                self.status.bluetooth_match = matched;
            }
        }
    }

    // A fetched power value updates state and transition but, unlike a
    // settle, leaves a pending handling guard in place.
    fn change_state(&mut self, on: bool, now: DateTime<Utc>) {
        if on == self.status.on {
            return;
        }
        self.status.on = on;
        self.transition.settle(on);
        self.recompute_scenes(now);
    }

    pub fn handle_push(&mut self, msg: &PushMessage, now: DateTime<Utc>) {
        if let Some(address) = self.props.switch
            && let Some(on) = msg.get(&address.prop_key()).and_then(Value::as_bool)
        {
            self.settle(on, now);
        }
        if let Some(address) = self.props.wifi_sta_cnt
            && let Some(count) = msg.get(&address.prop_key()).and_then(Value::as_i64)
        {
            self.status.wifi_sta_cnt = count;
        }
        if let Some(address) = self.props.bluetooth_cnt
            && let Some(count) = msg.get(&address.prop_key()).and_then(Value::as_i64)
        {
            self.status.bluetooth_cnt = count;
        }
        if let Some(address) = self.props.illumination
            && let Some(level) = msg.get(&address.prop_key()).and_then(Value::as_f64)
        {
            self.status.illumination = level;
        }
        if let Some(address) = self.props.bluetooth_match
            && let Some(matched) = msg.get(&address.prop_key()).and_then(Value::as_bool)
        {
            self.status.bluetooth_match = matched;
        }
    }

    /// On/off parameter pair handed to the external timer and countdown
    /// authoring pages; the resulting scenes come back through the scene
    /// list, not through this call.
    pub fn scene_params(&self) -> Option<(SetPropertyRequest, SetPropertyRequest)> {
        let switch = self.props.switch?;
        Some((
            SetPropertyRequest::new(&self.did, switch, Value::Bool(true)),
            SetPropertyRequest::new(&self.did, switch, Value::Bool(false)),
        ))
    }

    pub fn bluetooth_scan_text(&self) -> &'static str {
        let raw = &self.status.bluetooth_target_list_raw;
        if raw.is_empty() || raw == "[]" {
            "no targets configured"
        } else if self.status.bluetooth_match {
            "target device found"
        } else {
            "target device not found"
        }
    }

    /// The single human-readable status line: the merged scene text when any
    /// scene is pending, otherwise the plain power state.
    pub fn status_line(&self) -> String {
        if self.merged.status_text.is_empty() {
            if self.status.on {
                "Powered on".to_string()
            } else {
                "Powered off".to_string()
            }
        } else {
            self.merged.status_text.clone()
        }
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            on: self.status.on,
            wifi_sta_cnt: self.status.wifi_sta_cnt,
            bluetooth_cnt: self.status.bluetooth_cnt,
            illumination: self.status.illumination,
            bluetooth_scan: self.bluetooth_scan_text(),
            status_line: self.status_line(),
            timing_active: self.merged.timing_active,
            countdown_active: self.merged.countdown_active,
            transition_level: self.transition.level(),
        }
    }

    fn show_fail_tip(&mut self) {
        self.fail_tip = Some((SWITCH_FAIL_TIP.to_string(), Instant::now()));
    }

    fn dismiss_tip(&mut self) {
        self.fail_tip = None;
    }
}

impl<T> PushProcessor for SwitchProcessor<T>
where
    T: SpecApi + Send + Sync + 'static,
{
    async fn handle(&mut self, msg: &PushMessage) -> anyhow::Result<()> {
        self.handle_push(msg, Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miot_api::models::property::PropertyAddress;
    use crate::miot_api::models::scene::{Scene, SceneSetting};
    use crate::miot_api::spec_client::testing::MockSpecApi;
    use chrono::{NaiveDateTime, TimeZone};
    use serde_json::json;
    use std::sync::Arc;

    fn at(raw: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    fn all_props() -> ResolvedProps {
        ResolvedProps {
            switch: Some(PropertyAddress::new(2, 1)),
            wifi_sta_cnt: Some(PropertyAddress::new(5, 3)),
            bluetooth_cnt: Some(PropertyAddress::new(7, 1)),
            illumination: Some(PropertyAddress::new(5, 2)),
            bluetooth_name: Some(PropertyAddress::new(7, 4)),
            bluetooth_match: Some(PropertyAddress::new(7, 3)),
        }
    }

    fn processor(client: Arc<MockSpecApi>) -> SwitchProcessor<Arc<MockSpecApi>> {
        SwitchProcessor::new(client, "did.1234", all_props())
    }

    fn timing_scene(on_time: &str, off_time: &str) -> Scene {
        Scene {
            scene_id: 1,
            status: 0,
            setting: SceneSetting {
                enable_timer: "1".to_string(),
                timer_type: "0".to_string(),
                on_time: on_time.to_string(),
                off_time: off_time.to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn toggle_success_confirms_the_target_state() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_set_code(0);
        let mut switch = processor(client.clone());
        switch.toggle(at("2024-03-05 07:00:00")).await;
        assert!(switch.status().on);
        assert_eq!(switch.phase(), Phase::Idle);
        assert!(switch.current_tip().is_none());
        // the write carried the optimistic target
        let calls = client.set_calls.lock().unwrap();
        assert_eq!(calls[0][0].value, json!(true));
    }

    #[tokio::test]
    async fn toggle_while_handling_is_a_no_op() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_set_code(1); // leaves the machine handling
        let mut switch = processor(client.clone());
        switch.toggle(at("2024-03-05 07:00:00")).await;
        assert_eq!(switch.phase(), Phase::Handling);
        switch.toggle(at("2024-03-05 07:00:01")).await;
        assert_eq!(client.set_call_count(), 1);
        assert_eq!(switch.phase(), Phase::Handling);
    }

    #[tokio::test]
    async fn push_resolves_a_still_processing_toggle() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_set_code(1);
        let mut switch = processor(client);
        switch.toggle(at("2024-03-05 07:00:00")).await;
        assert_eq!(switch.phase(), Phase::Handling);

        let msg = PushMessage::from_pairs(&[("prop.2.1", json!(true))]);
        switch.handle_push(&msg, at("2024-03-05 07:00:02"));
        assert_eq!(switch.phase(), Phase::Idle);
        assert!(switch.status().on);
    }

    #[tokio::test]
    async fn failed_toggle_reverts_and_shows_a_transient_tip() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_set_code(-704);
        let mut switch = processor(client);
        switch.toggle(at("2024-03-05 07:00:00")).await;
        assert!(!switch.status().on);
        assert_eq!(switch.phase(), Phase::Idle);
        assert_eq!(switch.current_tip(), Some(SWITCH_FAIL_TIP));
        tokio::time::sleep(TIP_DISMISS_DELAY + Duration::from_millis(50)).await;
        assert!(switch.current_tip().is_none());
    }

    #[tokio::test]
    async fn transport_error_behaves_like_a_failed_code() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_set(Err(anyhow::anyhow!("offline")));
        let mut switch = processor(client);
        switch.toggle(at("2024-03-05 07:00:00")).await;
        assert!(!switch.status().on);
        assert_eq!(switch.phase(), Phase::Idle);
        assert!(switch.current_tip().is_some());
    }

    #[tokio::test]
    async fn unresolved_switch_address_disables_toggle_and_refresh() {
        let client = Arc::new(MockSpecApi::default());
        let mut switch =
            SwitchProcessor::new(client.clone(), "did.1234", ResolvedProps::default());
        switch.toggle(at("2024-03-05 07:00:00")).await;
        switch.get_device_props(at("2024-03-05 07:00:00")).await;
        assert_eq!(client.set_call_count(), 0);
        assert!(client.get_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_applies_only_zero_code_entries() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_get(Ok(vec![
            PropertyResult {
                siid: 2,
                piid: 1,
                code: 0,
                value: Some(json!(true)),
            },
            PropertyResult {
                siid: 5,
                piid: 3,
                code: -4004,
                value: Some(json!(99)),
            },
            PropertyResult {
                siid: 7,
                piid: 4,
                code: 0,
                value: Some(json!(r#"["tv"]"#)),
            },
            PropertyResult {
                siid: 7,
                piid: 3,
                code: 0,
                value: Some(json!(true)),
            },
        ]));
        let mut switch = processor(client);
        switch.get_device_props(at("2024-03-05 07:00:00")).await;
        assert!(switch.status().on);
        assert_eq!(switch.status().wifi_sta_cnt, 0); // failed entry skipped
        assert_eq!(switch.status().bluetooth_target_list_raw, r#"["tv"]"#);
        assert_eq!(switch.bluetooth_scan_text(), "target device found");
    }

    #[tokio::test]
    async fn refresh_continues_into_a_scene_recompute() {
        let client = Arc::new(MockSpecApi::default());
        client.queue_get(Ok(vec![PropertyResult {
            siid: 2,
            piid: 1,
            code: 0,
            value: Some(json!(false)),
        }]));
        *client.scenes.lock().unwrap() = vec![timing_scene("08:00", "20:00")];
        let mut switch = processor(client);
        switch.get_device_props(at("2024-03-05 07:00:00")).await;
        assert!(switch.merged().timing_active);
        assert_eq!(switch.status_line(), "Will turn on at 08:00");
    }

    #[tokio::test]
    async fn confirmed_toggle_reframes_the_scene_status() {
        let client = Arc::new(MockSpecApi::default());
        *client.scenes.lock().unwrap() = vec![timing_scene("08:00", "20:00")];
        let mut switch = processor(client.clone());
        switch.load_scenes(at("2024-03-05 07:00:00")).await;
        assert_eq!(switch.merged().status_text, "Will turn on at 08:00");

        client.queue_set_code(0);
        switch.toggle(at("2024-03-05 07:00:05")).await;
        // now on, so the merger looks at the off transition immediately
        assert_eq!(switch.merged().status_text, "Will turn off at 20:00");
    }

    #[tokio::test]
    async fn push_updates_the_plain_properties() {
        let client = Arc::new(MockSpecApi::default());
        let mut switch = processor(client);
        let msg = PushMessage::from_pairs(&[
            ("prop.5.3", json!(4)),
            ("prop.7.1", json!(2)),
            ("prop.5.2", json!(123.5)),
            ("prop.7.3", json!(true)),
        ]);
        switch.handle_push(&msg, at("2024-03-05 07:00:00"));
        assert_eq!(switch.status().wifi_sta_cnt, 4);
        assert_eq!(switch.status().bluetooth_cnt, 2);
        assert_eq!(switch.status().illumination, 123.5);
        assert!(switch.status().bluetooth_match);
    }

    #[tokio::test]
    async fn status_line_falls_back_to_the_power_state() {
        let client = Arc::new(MockSpecApi::default());
        let mut switch = processor(client);
        assert_eq!(switch.status_line(), "Powered off");
        switch.settle(true, at("2024-03-05 07:00:00"));
        assert_eq!(switch.status_line(), "Powered on");
    }

    #[tokio::test]
    async fn scene_params_carry_both_directions() {
        let client = Arc::new(MockSpecApi::default());
        let switch = processor(client);
        let (on_param, off_param) = switch.scene_params().unwrap();
        assert_eq!(on_param.value, json!(true));
        assert_eq!(off_param.value, json!(false));
        assert_eq!(on_param.siid, 2);
        assert_eq!(on_param.piid, 1);
    }
}
