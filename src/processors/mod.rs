use crate::push_client::PushMessage;

pub mod switch_processor;
pub mod targets_processor;

/// Trait for a processor that reconciles pushed property values into its
/// local state.
pub trait PushProcessor: Send + 'static {
    async fn handle(&mut self, msg: &PushMessage) -> anyhow::Result<()>;
}
