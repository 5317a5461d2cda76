use rumqttc::ClientError;
use rumqttc::{AsyncClient, QoS};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// A push message: one MQTT payload mapping property keys ("prop.siid.piid")
/// to the latest values pushed by the device.
#[derive(Debug, Clone, Default)]
pub struct PushMessage {
    values: HashMap<String, Vec<Value>>,
}

impl PushMessage {
    pub fn parse(payload: &str) -> Option<Self> {
        serde_json::from_str::<HashMap<String, Vec<Value>>>(payload)
            .ok()
            .map(|values| Self { values })
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// First value pushed for the key, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(|values| values.first())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, Value)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(key, value)| (key.to_string(), vec![value.clone()]))
                .collect(),
        }
    }
}

/// A wrapper around `AsyncClient` that pairs every subscription with a
/// releasable handle, so teardown is explicit on every exit path.
#[derive(Clone)]
pub struct PushClient {
    mqtt_client: AsyncClient,
}

impl PushClient {
    pub fn new(mqtt_client: AsyncClient) -> Self {
        Self { mqtt_client }
    }

    /// Subscribe to the device's push topic, watching the given property
    /// keys. Dropping (or removing) the returned handle releases the
    /// registration.
    pub async fn subscribe_messages(
        &self,
        topic: &str,
        keys: &[String],
    ) -> anyhow::Result<Subscription> {
        self.mqtt_client.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(Subscription {
            client: Some(self.mqtt_client.clone()),
            topic: topic.to_string(),
            keys: keys.to_vec(),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, qos: QoS) -> Result<(), ClientError> {
        self.mqtt_client.subscribe(topic, qos).await
    }

    pub async fn publish<S, V>(
        &self,
        topic: S,
        qos: QoS,
        retain: bool,
        payload: V,
    ) -> Result<(), ClientError>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        self.mqtt_client.publish(topic, qos, retain, payload).await
    }
}

/// Handle for one push registration. Once removed, `watches` answers false
/// for every key, so a dispatcher holding a stale handle stops delivering
/// even before the broker-side unsubscribe completes.
pub struct Subscription {
    client: Option<AsyncClient>,
    topic: String,
    keys: Vec<String>,
    alive: Arc<AtomicBool>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn watches(&self, key: &str) -> bool {
        self.is_active() && self.keys.iter().any(|k| k == key)
    }

    pub fn remove(&mut self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(client) = self.client.take() {
            let topic = self.topic.clone();
            tokio::spawn(async move {
                if let Err(e) = client.unsubscribe(&topic).await {
                    warn!("Failed to unsubscribe from {}: {:?}", topic, e);
                }
            });
        }
    }

    #[cfg(test)]
    pub fn detached(keys: &[&str]) -> Self {
        Self {
            client: None,
            topic: String::new(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
