use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

const PING_PONG_PERIOD: Duration = Duration::from_millis(300);

/// Shared interpolation level in [0.0, 1.0]; 0.0 is fully off, 1.0 fully on.
#[derive(Clone, Default)]
pub struct Level(Arc<AtomicU32>);

impl Level {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Repeating-transition primitive standing in for the plugin's ping-pong
/// animation. While a toggle is in flight the level bounces between two
/// endpoints; settling cancels the bounce and pins the terminal level.
pub struct Transition {
    level: Level,
    task: Option<JoinHandle<()>>,
}

impl Transition {
    pub fn new() -> Self {
        Self {
            level: Level::default(),
            task: None,
        }
    }

    pub fn level(&self) -> f32 {
        self.level.get()
    }

    /// Bounce between the endpoints until cancelled or settled.
    pub fn ping_pong(&mut self, low: f32, high: f32) {
        self.cancel();
        let level = self.level.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_PONG_PERIOD);
            let mut at_high = false;
            loop {
                interval.tick().await;
                level.set(if at_high { high } else { low });
                at_high = !at_high;
            }
        }));
    }

    /// Stop any bounce and pin the terminal level for the given state.
    pub fn settle(&mut self, on: bool) {
        self.cancel();
        self.level.set(if on { 1.0 } else { 0.0 });
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Default for Transition {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transition {
    fn drop(&mut self) {
        self.cancel();
    }
}
