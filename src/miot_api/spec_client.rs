use anyhow::Context;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::miot_api::models::instance::InstanceDocument;
use crate::miot_api::models::property::{GetPropertyRequest, PropertyResult, SetPropertyRequest};
use crate::miot_api::models::scene::Scene;

/// HTTP client for the vendor spec API: property get/set, capability
/// instance lookup and the stored timer/countdown scene list.
#[derive(Clone)]
pub struct MiotSpecClient {
    client: reqwest::Client,
    api_base: String,
    spec_base: String,
}

#[derive(Deserialize)]
struct SceneListResponse {
    result: Vec<Scene>,
}

impl MiotSpecClient {
    pub fn new(api_base: &str, spec_base: &str, access_token: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            format!("Bearer {}", access_token)
                .parse()
                .context("access token is not a valid header value")?,
        );

        Ok(Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .build()
                .context("failed to build http client")?,
            api_base: api_base.trim_end_matches('/').to_string(),
            spec_base: spec_base.trim_end_matches('/').to_string(),
        })
    }
}

impl SpecApi for MiotSpecClient {
    async fn get_properties_value(
        &self,
        props: Vec<GetPropertyRequest>,
        retry_hint: u8,
    ) -> anyhow::Result<Vec<PropertyResult>> {
        let url = format!("{}/miotspec/prop/get", self.api_base);
        let response = self
            .client
            .post(url)
            .json(&json!({ "params": props, "retry": retry_hint }))
            .send()
            .await?;

        let contents = response.text().await?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Unable to deserialize response. Body was: \"{}\"", contents))
    }

    async fn set_properties_value(
        &self,
        props: Vec<SetPropertyRequest>,
    ) -> anyhow::Result<Vec<PropertyResult>> {
        let url = format!("{}/miotspec/prop/set", self.api_base);
        let response = self
            .client
            .post(url)
            .json(&json!({ "params": props }))
            .send()
            .await?;

        let contents = response.text().await?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Unable to deserialize response. Body was: \"{}\"", contents))
    }

    async fn get_instance(&self, model: &str) -> anyhow::Result<InstanceDocument> {
        let url = format!("{}/miot-spec-v2/instance?type={}", self.spec_base, model);
        let response = self.client.get(url).send().await?;
        let contents = response.text().await?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Unable to deserialize response. Body was: \"{}\"", contents))
    }

    async fn load_timer_scenes(&self, did: &str) -> anyhow::Result<Vec<Scene>> {
        let url = format!("{}/scene/list", self.api_base);
        let response = self
            .client
            .post(url)
            .json(&json!({ "did": did, "identify": did }))
            .send()
            .await?;
        let contents = response.text().await?;
        let parsed: SceneListResponse = serde_json::from_str(&contents)
            .with_context(|| format!("Unable to deserialize response. Body was: \"{}\"", contents))?;
        Ok(parsed.result)
    }
}

pub trait SpecApi {
    /// Batched property read. `retry_hint` is forwarded to the transport and
    /// allows a short transient inconsistency, it is not a hard constraint.
    fn get_properties_value(
        &self,
        props: Vec<GetPropertyRequest>,
        retry_hint: u8,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<PropertyResult>>> + Send;
    fn set_properties_value(
        &self,
        props: Vec<SetPropertyRequest>,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<PropertyResult>>> + Send;
    fn get_instance(
        &self,
        model: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<InstanceDocument>> + Send;
    fn load_timer_scenes(
        &self,
        did: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<Scene>>> + Send;
}

// Implement SpecApi for Arc<T> where T: SpecApi
impl<T> SpecApi for Arc<T>
where
    T: SpecApi + Send + Sync,
{
    async fn get_properties_value(
        &self,
        props: Vec<GetPropertyRequest>,
        retry_hint: u8,
    ) -> anyhow::Result<Vec<PropertyResult>> {
        self.as_ref().get_properties_value(props, retry_hint).await
    }

    async fn set_properties_value(
        &self,
        props: Vec<SetPropertyRequest>,
    ) -> anyhow::Result<Vec<PropertyResult>> {
        self.as_ref().set_properties_value(props).await
    }

    async fn get_instance(&self, model: &str) -> anyhow::Result<InstanceDocument> {
        self.as_ref().get_instance(model).await
    }

    async fn load_timer_scenes(&self, did: &str) -> anyhow::Result<Vec<Scene>> {
        self.as_ref().load_timer_scenes(did).await
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scriptable in-memory SpecApi for processor tests. Queued results are
    /// consumed in order; an empty queue answers a get with an empty batch
    /// and a set with per-entry success.
    #[derive(Default)]
    pub struct MockSpecApi {
        pub get_results: Mutex<VecDeque<anyhow::Result<Vec<PropertyResult>>>>,
        pub set_results: Mutex<VecDeque<anyhow::Result<Vec<PropertyResult>>>>,
        pub set_calls: Mutex<Vec<Vec<SetPropertyRequest>>>,
        pub get_calls: Mutex<Vec<Vec<GetPropertyRequest>>>,
        pub scenes: Mutex<Vec<Scene>>,
    }

    impl MockSpecApi {
        pub fn queue_get(&self, result: anyhow::Result<Vec<PropertyResult>>) {
            self.get_results.lock().unwrap().push_back(result);
        }

        pub fn queue_set(&self, result: anyhow::Result<Vec<PropertyResult>>) {
            self.set_results.lock().unwrap().push_back(result);
        }

        /// Queue a single-entry set acknowledgment with the given code.
        pub fn queue_set_code(&self, code: i32) {
            self.queue_set(Ok(vec![PropertyResult {
                siid: 0,
                piid: 0,
                code,
                value: None,
            }]));
        }

        pub fn set_call_count(&self) -> usize {
            self.set_calls.lock().unwrap().len()
        }
    }

    impl SpecApi for MockSpecApi {
        async fn get_properties_value(
            &self,
            props: Vec<GetPropertyRequest>,
            _retry_hint: u8,
        ) -> anyhow::Result<Vec<PropertyResult>> {
            self.get_calls.lock().unwrap().push(props);
            self.get_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }

        async fn set_properties_value(
            &self,
            props: Vec<SetPropertyRequest>,
        ) -> anyhow::Result<Vec<PropertyResult>> {
            let fallback: Vec<PropertyResult> = props
                .iter()
                .map(|p| PropertyResult {
                    siid: p.siid,
                    piid: p.piid,
                    code: 0,
                    value: None,
                })
                .collect();
            self.set_calls.lock().unwrap().push(props);
            self.set_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(fallback))
        }

        async fn get_instance(&self, _model: &str) -> anyhow::Result<InstanceDocument> {
            anyhow::bail!("no instance configured")
        }

        async fn load_timer_scenes(&self, _did: &str) -> anyhow::Result<Vec<Scene>> {
            Ok(self.scenes.lock().unwrap().clone())
        }
    }
}
