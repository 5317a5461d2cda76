mod config;
pub mod miot_api;
mod processors;
mod push_client;
mod scenes;
mod transition;

use tracing::{debug, error, trace, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt};

use crate::config::Config;
use crate::miot_api::cached_spec_client::CachedSpecClient;
use crate::miot_api::resolver::ResolvedProps;
use crate::miot_api::spec_client::{MiotSpecClient, SpecApi};
use crate::processors::PushProcessor;
use crate::processors::switch_processor::SwitchProcessor;
use crate::processors::targets_processor::TargetsProcessor;
use crate::push_client::{PushClient, PushMessage};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_file("config.toml").or_else(|e| {
        println!("Config file not found. Creating example config.toml...");
        Config::save_example("config.toml")?;
        println!("Please edit config.toml with your settings and restart the application.");
        Err(e)
    })?;

    // Directory for logs
    let log_dir = &config.logging.directory;

    // One file per level
    let debug_file = rolling::daily(log_dir, &config.logging.debug_file);
    let info_file = rolling::daily(log_dir, &config.logging.info_file);
    let warn_file = rolling::daily(log_dir, &config.logging.warn_file);
    let error_file = rolling::daily(log_dir, &config.logging.error_file);

    // Build layers, filtering each level
    let debug_layer = fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug"));

    let info_layer = fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::INFO);

    let warn_layer = fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let error_layer = fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

    // Console pretty logger
    let console_layer = fmt::layer()
        .pretty()
        .with_filter(EnvFilter::new(&config.logging.console_level));

    // Compose subscriber
    tracing_subscriber::registry()
        .with(console_layer)
        .with(debug_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .init();

    let spec_client = Arc::new(CachedSpecClient::new(MiotSpecClient::new(
        &config.spec_api.api_base,
        &config.spec_api.spec_base,
        &config.spec_api.access_token,
    )?));

    loop {
        if let Err(e) = run_switch_client(&config, spec_client.clone()).await {
            error!("Switch client {} failed: {:?}", config.device.did, e);
            tokio::time::sleep(Duration::from_secs(config.intervals.reconnect_delay_seconds))
                .await;
        }
    }
}

async fn run_switch_client<T>(config: &Config, spec_client: Arc<T>) -> anyhow::Result<()>
where
    T: SpecApi + Send + Sync + 'static,
{
    let did = config.device.did.clone();
    let push_topic = format!("smsw/{}/prop", did);
    let command_filter = format!("smsw/{}/+/set", did);
    let status_topic = format!("smsw/{}/status", did);

    // --- Per-device MQTT connection ---
    let mut mqttoptions = MqttOptions::new(&config.mqtt.client_id, &config.mqtt.host, config.mqtt.port);
    mqttoptions.set_clean_session(true);
    if !config.mqtt.username.is_empty() {
        mqttoptions.set_credentials(&config.mqtt.username, &config.mqtt.password);
    }
    mqttoptions.set_keep_alive(Duration::from_secs(
        config.intervals.mqtt_keep_alive_seconds,
    ));

    let (raw_client, mut event_loop) = AsyncClient::new(mqttoptions, config.limits.mqtt_queue_size);
    let client = PushClient::new(raw_client);

    // Addresses resolve once per run and never change afterwards
    let instance = spec_client.get_instance(&config.device.model).await?;
    let props = ResolvedProps::from_instance(&instance);
    debug!("Resolved property addresses: {:?}", props);

    let mut switch = SwitchProcessor::new(spec_client.clone(), &did, props.clone());
    let mut targets = props
        .bluetooth_name
        .map(|address| TargetsProcessor::new(spec_client.clone(), &did, address));

    debug!("Subscribing to {}", &push_topic);
    let status_subscription = client
        .subscribe_messages(&push_topic, &props.subscription_keys())
        .await?;
    let mut targets_subscription = match (&targets, props.bluetooth_name) {
        (Some(_), Some(address)) => Some(
            client
                .subscribe_messages(&push_topic, &[address.prop_key()])
                .await?,
        ),
        _ => None,
    };
    client.subscribe(&command_filter, QoS::AtLeastOnce).await?;

    // Initial state: batched property fetch with the scene list as a
    // continuation, then the target list
    switch.get_device_props(Utc::now()).await;
    if let Some(targets) = targets.as_mut() {
        targets.load().await;
    }

    let mut scene_tick =
        tokio::time::interval(Duration::from_secs(config.intervals.scene_tick_seconds));
    let mut prev_message_hash: Option<u64> = None; // Store the hash of the previous push payload

    loop {
        tokio::select! {
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let payload_str = String::from_utf8_lossy(&p.payload).to_string();
                    if p.topic == push_topic {
                        let mut hasher = DefaultHasher::new();
                        payload_str.hash(&mut hasher);
                        let current_hash = hasher.finish();
                        // Skip processing duplicate push payloads
                        if let Some(prev_hash) = prev_message_hash
                            && prev_hash == current_hash
                        {
                            continue;
                        }
                        prev_message_hash = Some(current_hash);

                        match PushMessage::parse(&payload_str) {
                            Some(msg) => {
                                if msg.keys().any(|key| status_subscription.watches(key))
                                    && let Err(e) = switch.handle(&msg).await
                                {
                                    error!("Error occurred while processing push data: {:?}", e);
                                }
                                if let (Some(targets), Some(subscription)) =
                                    (targets.as_mut(), targets_subscription.as_mut())
                                    && msg.keys().any(|key| subscription.watches(key))
                                    && let Err(e) = targets.handle(&msg).await
                                {
                                    error!("Error occurred while processing target push: {:?}", e);
                                }
                            }
                            None => {
                                error!("Unable to deserialize push payload: \"{}\"", payload_str)
                            }
                        }
                    } else {
                        match command_topic_parser(&p.topic, &payload_str) {
                            None => {
                                warn!("Failed to parse topic: {:?}", p.topic);
                            }
                            Some(parse_result) => {
                                if parse_result.device_id != did {
                                    error!(
                                        "Received command for device_id {} that is not this device",
                                        parse_result.device_id
                                    );
                                } else {
                                    handle_command(
                                        parse_result.command,
                                        &mut switch,
                                        targets.as_mut(),
                                    )
                                    .await;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    // Bubble up to trigger restart; both subscriptions are
                    // released when their handles drop on return
                    error!("MQTT event loop error: {:?}", e);
                    return Err(anyhow::Error::from(e));
                }
                e => {
                    trace!("{:?}", e)
                }
            },
            _ = scene_tick.tick() => {
                switch.tick(Utc::now());
                match serde_json::to_string(&switch.report()) {
                    Ok(payload) => {
                        if let Err(e) = client
                            .publish(&status_topic, QoS::AtMostOnce, true, payload)
                            .await
                        {
                            error!(
                                "Error occurred while publishing to {}: {:?}",
                                &status_topic, e
                            );
                            return Err(anyhow::Error::from(e));
                        }
                    }
                    Err(e) => error!("Failed to serialize status report: {:?}", e),
                }
            }
        }
    }
}

async fn handle_command<T>(
    command: Command,
    switch: &mut SwitchProcessor<Arc<T>>,
    targets: Option<&mut TargetsProcessor<Arc<T>>>,
) where
    T: SpecApi + Send + Sync + 'static,
{
    match command {
        Command::Toggle => switch.toggle(Utc::now()).await,
        Command::Target(target_command) => {
            let Some(targets) = targets else {
                warn!("Received target command but the list address never resolved");
                return;
            };
            match target_command {
                TargetCommand::Add { name } => targets.add(&name).await,
                TargetCommand::Delete { id } => targets.delete(&id).await,
            }
        }
        Command::Refresh => {
            switch.get_device_props(Utc::now()).await;
            if let Some(targets) = targets {
                targets.load().await;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Toggle,
    Target(TargetCommand),
    Refresh,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TargetCommand {
    Add { name: String },
    Delete { id: String },
}

pub struct TopicParseResult {
    pub device_id: String,
    pub command: Command,
}

pub fn command_topic_parser(topic: &str, payload: &str) -> Option<TopicParseResult> {
    let mut parts: Vec<&str> = topic.split('/').collect();
    parts.resize(5, "");

    if payload.is_empty() {
        error!("Empty payload for topic: {:?}", topic);
        // No command
        return None;
    }

    match (parts[0], parts[1], parts[2], parts[3], parts[4]) {
        ("smsw", device_id, "switch", "set", "") => Some(TopicParseResult {
            device_id: device_id.to_string(),
            command: Command::Toggle,
        }),
        //smsw/DID/target/set
        ("smsw", device_id, "target", "set", "") => {
            if let Ok(target_command) = serde_json::from_str::<TargetCommand>(payload) {
                Some(TopicParseResult {
                    device_id: device_id.to_string(),
                    command: Command::Target(target_command),
                })
            } else {
                error!(
                    "Unable to deserialize payload: {:?} for topic: {:?}",
                    payload, topic
                );
                None
            }
        }
        ("smsw", device_id, "refresh", "set", "") => Some(TopicParseResult {
            device_id: device_id.to_string(),
            command: Command::Refresh,
        }),
        _ => None,
    }
}
