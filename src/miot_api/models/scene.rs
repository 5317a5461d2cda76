use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A stored automation rule (timer or countdown) that will issue a power-set
/// command at a future time. Read-only here; authoring happens elsewhere and
/// is observed again through the scene list.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Scene {
    #[serde(rename = "sceneID")]
    pub scene_id: i64,
    /// 0 means the scene has not fired yet.
    pub status: i32,
    pub setting: SceneSetting,
}

/// Vendor scene settings. The enable flags are the strings "0"/"1", not
/// booleans, and `timer_type == "1"` marks a one-shot countdown.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SceneSetting {
    #[serde(default)]
    pub enable_timer: String,
    #[serde(default)]
    pub timer_type: String,
    #[serde(default)]
    pub enable_timer_on: String,
    #[serde(default)]
    pub enable_timer_off: String,
    #[serde(default)]
    pub on_time: String,
    #[serde(default)]
    pub off_time: String,
}

impl Scene {
    pub fn enabled(&self) -> bool {
        self.setting.enable_timer == "1"
    }

    pub fn is_countdown(&self) -> bool {
        self.setting.timer_type == "1"
    }

    pub fn pending(&self) -> bool {
        self.status == 0
    }
}

/// Interpret a stored timer time as an absolute timestamp. Countdown scenes
/// carry a full "YYYY-MM-DD HH:MM:SS" stamp; daily timers carry a time of
/// day, anchored to `now`'s date. Unparseable input yields `None`.
pub fn parse_timer_time(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&stamp));
    }
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()?;
    Some(Utc.from_utc_datetime(&now.date_naive().and_time(time)))
}
