use anyhow::Result;
use moka::future::Cache;
use std::time::Duration;

use crate::miot_api::models::instance::InstanceDocument;
use crate::miot_api::models::property::{GetPropertyRequest, PropertyResult, SetPropertyRequest};
use crate::miot_api::models::scene::Scene;
use crate::miot_api::spec_client::SpecApi;

/// Caching wrapper for a SpecApi. Instance documents are effectively
/// immutable per firmware and cached for a long time; scene lists are cached
/// just long enough to absorb back-to-back refreshes. Property get/set go
/// straight through.
#[derive(Clone)]
pub struct CachedSpecClient<T>
where
    T: SpecApi,
{
    client: T,
    instance_cache: Cache<String, InstanceDocument>,
    scene_cache: Cache<String, Vec<Scene>>,
}

impl<T> SpecApi for CachedSpecClient<T>
where
    T: SpecApi + Send + Sync,
{
    async fn get_properties_value(
        &self,
        props: Vec<GetPropertyRequest>,
        retry_hint: u8,
    ) -> Result<Vec<PropertyResult>> {
        // live values, never cached
        self.client.get_properties_value(props, retry_hint).await
    }

    async fn set_properties_value(
        &self,
        props: Vec<SetPropertyRequest>,
    ) -> Result<Vec<PropertyResult>> {
        self.client.set_properties_value(props).await
    }

    async fn get_instance(&self, model: &str) -> Result<InstanceDocument> {
        let key = model.to_string();

        self.instance_cache
            .try_get_with(key.clone(), async move {
                self.client.get_instance(&key).await
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch instance: {}", e))
    }

    async fn load_timer_scenes(&self, did: &str) -> Result<Vec<Scene>> {
        let key = did.to_string();

        self.scene_cache
            .try_get_with(key.clone(), async move {
                self.client.load_timer_scenes(&key).await
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch scenes: {}", e))
    }
}

impl<T> CachedSpecClient<T>
where
    T: SpecApi,
{
    pub fn new(client: T) -> Self {
        Self {
            client,
            instance_cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .build(),
            scene_cache: Cache::builder()
                .time_to_live(Duration::from_secs(5))
                .build(),
        }
    }
}
