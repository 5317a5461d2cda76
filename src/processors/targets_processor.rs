use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::miot_api::models::property::{GetPropertyRequest, PropertyAddress, SetPropertyRequest};
use crate::miot_api::spec_client::SpecApi;
use crate::processors::PushProcessor;
use crate::push_client::PushMessage;

/// One Bluetooth device name the switch scans for. The id is local to this
/// process and regenerated on every load; only names go over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub name: String,
}

fn fresh_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Editor state for the Bluetooth target list, backed by a single remote
/// string property holding a JSON array of names. Local edits are optimistic
/// and write the whole list back; a push replaces the whole list.
///
/// A push arriving between an optimistic edit and its acknowledgment can
/// revert that edit. The push reflects remote state and wins; this race is
/// an accepted policy, not a bug.
pub struct TargetsProcessor<T>
where
    T: SpecApi + Send + Sync + 'static,
{
    client: T,
    did: String,
    address: PropertyAddress,
    targets: Vec<Target>,
}

impl<T> TargetsProcessor<T>
where
    T: SpecApi + Send + Sync + 'static,
{
    pub fn new(client: T, did: &str, address: PropertyAddress) -> Self {
        Self {
            client,
            did: did.to_string(),
            address,
            targets: Vec::new(),
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn prop_key(&self) -> String {
        self.address.prop_key()
    }

    /// Fetch the remote list and replace local state. A transport failure
    /// keeps the previous list; a malformed value becomes the empty list.
    pub async fn load(&mut self) {
        let request = GetPropertyRequest::new(&self.did, self.address);
        match self.client.get_properties_value(vec![request], 2).await {
            Ok(results) => {
                if let Some(raw) = results
                    .first()
                    .and_then(|result| result.value.as_ref())
                    .and_then(Value::as_str)
                {
                    self.targets = parse_or_empty(raw);
                }
            }
            Err(e) => {
                debug!("target list fetch failed, keeping last known list: {:?}", e);
            }
        }
    }

    /// Append a target locally, then write the full name list back. An empty
    /// (trimmed) name is a no-op.
    pub async fn add(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let mut names: Vec<String> = self.targets.iter().map(|t| t.name.clone()).collect();
        names.push(name.to_string());
        self.targets.push(Target {
            id: fresh_token(),
            name: name.to_string(),
        });
        self.write_back(names).await;
    }

    /// Remove a target locally, then write the filtered name list back.
    pub async fn delete(&mut self, id: &str) {
        self.targets.retain(|target| target.id != id);
        let names: Vec<String> = self.targets.iter().map(|t| t.name.clone()).collect();
        self.write_back(names).await;
    }

    /// Pushed remote state replaces the local list unconditionally.
    pub fn on_push(&mut self, raw: &str) {
        self.targets = parse_or_empty(raw);
    }

    // Write failures are logged, not retried and not reconciled: local
    // state already reflects the intended result either way.
    async fn write_back(&self, names: Vec<String>) {
        let serialized = match serde_json::to_string(&names) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!("failed to serialize target list: {:?}", e);
                return;
            }
        };
        let request =
            SetPropertyRequest::new(&self.did, self.address, Value::String(serialized));
        match self.client.set_properties_value(vec![request]).await {
            Ok(results) => {
                if let Some(result) = results.first()
                    && result.code != 0
                {
                    warn!("target list write rejected with code {}", result.code);
                }
            }
            Err(e) => {
                error!("target list write failed: {:?}", e);
            }
        }
    }
}

/// Parse a JSON array of names into fresh-id targets; anything malformed is
/// the empty list. Data loss on parse failure is accepted by the design.
fn parse_or_empty(raw: &str) -> Vec<Target> {
    serde_json::from_str::<Vec<String>>(raw)
        .map(|names| {
            names
                .into_iter()
                .map(|name| Target {
                    id: fresh_token(),
                    name,
                })
                .collect()
        })
        .unwrap_or_default()
}

impl<T> PushProcessor for TargetsProcessor<T>
where
    T: SpecApi + Send + Sync + 'static,
{
    async fn handle(&mut self, msg: &PushMessage) -> anyhow::Result<()> {
        if let Some(raw) = msg.get(&self.address.prop_key()).and_then(Value::as_str) {
            self.on_push(raw);
        }
        Ok(())
    }
}
