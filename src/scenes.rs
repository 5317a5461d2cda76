use chrono::{DateTime, Timelike, Utc};

use crate::miot_api::models::scene::{Scene, parse_timer_time};

/// Reconciled view of the device's timer and countdown scenes: which kinds
/// are pending, and the single status line shown for the soonest one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSceneState {
    pub timing_active: bool,
    pub countdown_active: bool,
    pub status_text: String,
}

struct PendingScene<'a> {
    scene: &'a Scene,
    time: DateTime<Utc>,
}

/// Merge the scene list against the current power state. Each scene lands in
/// at most one partition; both partitions only keep enabled, not-yet-fired
/// scenes whose next trigger lies strictly after `now`. The trigger is
/// always the transition away from the current state: `off_time` while on,
/// `on_time` while off.
pub fn merge(scenes: &[Scene], on: bool, now: DateTime<Utc>) -> MergedSceneState {
    let timing: Vec<PendingScene> = scenes
        .iter()
        .filter(|scene| scene.enabled() && !scene.is_countdown() && scene.pending())
        .filter_map(|scene| pending_at(scene, on, now))
        .collect();

    let countdown: Vec<PendingScene> = scenes
        .iter()
        .filter(|scene| scene.enabled() && scene.is_countdown() && scene.pending())
        .filter(|scene| {
            if on {
                scene.setting.enable_timer_off == "1"
            } else {
                scene.setting.enable_timer_on == "1"
            }
        })
        .filter_map(|scene| pending_at(scene, on, now))
        .collect();

    let timing_active = !timing.is_empty();
    let countdown_active = !countdown.is_empty();

    // soonest across both partitions; min_by_key keeps the first of equals
    let status_text = timing
        .iter()
        .chain(countdown.iter())
        .min_by_key(|pending| pending.time)
        .map(|pending| status_text_for(pending, on, now))
        .unwrap_or_default();

    MergedSceneState {
        timing_active,
        countdown_active,
        status_text,
    }
}

fn pending_at<'a>(scene: &'a Scene, on: bool, now: DateTime<Utc>) -> Option<PendingScene<'a>> {
    let raw = if on {
        &scene.setting.off_time
    } else {
        &scene.setting.on_time
    };
    let time = parse_timer_time(raw, now)?;
    (time > now).then_some(PendingScene { scene, time })
}

fn status_text_for(pending: &PendingScene, on: bool, now: DateTime<Utc>) -> String {
    if !pending.scene.is_countdown() {
        let clock = format!("{:02}:{:02}", pending.time.hour(), pending.time.minute());
        return if on {
            format!("Will turn off at {clock}")
        } else {
            format!("Will turn on at {clock}")
        };
    }
    let diff_minutes = ((pending.time - now).num_seconds() as f64 / 60.0).ceil() as i64;
    let hours = diff_minutes / 60;
    let minutes = diff_minutes - hours * 60;
    if on {
        format!("Will turn off in {hours} h {minutes} min")
    } else {
        format!("Will turn on in {hours} h {minutes} min")
    }
}
