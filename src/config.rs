use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub device: DeviceConfig,
    pub spec_api: SpecApiConfig,
    pub mqtt: MqttConfig,
    pub intervals: IntervalConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub directory: String,
    pub debug_file: String,
    pub info_file: String,
    pub warn_file: String,
    pub error_file: String,
    pub console_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Device identifier used in every property request.
    pub did: String,
    /// Model urn resolved against the spec site, e.g.
    /// "urn:miot-spec-v2:device:switch:0000A003:youxam-smsw:1".
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpecApiConfig {
    pub api_base: String,
    pub spec_base: String,
    pub access_token: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IntervalConfig {
    pub scene_tick_seconds: u64,
    pub reconnect_delay_seconds: u64,
    pub mqtt_keep_alive_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub mqtt_queue_size: usize,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_example(path: &str) -> Result<()> {
        let example_config = Config {
            logging: LoggingConfig {
                directory: "./logs".to_string(),
                debug_file: "log_debug.log".to_string(),
                info_file: "log_info.log".to_string(),
                warn_file: "log_warn.log".to_string(),
                error_file: "log_error.log".to_string(),
                console_level: "debug".to_string(),
            },
            device: DeviceConfig {
                did: "REPLACE_WITH_YOUR_DEVICE_ID".to_string(),
                model: "urn:miot-spec-v2:device:switch:0000A003:youxam-smsw:1".to_string(),
            },
            spec_api: SpecApiConfig {
                api_base: "https://api.home.example.com/app".to_string(),
                spec_base: "https://miot-spec.example.com".to_string(),
                access_token: "REPLACE_WITH_YOUR_ACCESS_TOKEN".to_string(),
            },
            mqtt: MqttConfig {
                host: "localhost".to_string(),
                port: 1883,
                username: "".to_string(),
                password: "".to_string(),
                client_id: "smsw-controller".to_string(),
            },
            intervals: IntervalConfig {
                scene_tick_seconds: 2,
                reconnect_delay_seconds: 10,
                mqtt_keep_alive_seconds: 30,
            },
            limits: LimitsConfig {
                mqtt_queue_size: 100,
            },
        };

        let toml_string = toml::to_string_pretty(&example_config)?;
        fs::write(path, toml_string)?;
        Ok(())
    }
}
