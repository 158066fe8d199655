use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub network_name: String,
    pub grace_period_secs: u64,
    pub bind: SocketAddr,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConf {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String, // ex: "healthnet/clients/failed@v1"
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "healthnet/clients/failed@v1".into()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            network_name: "healthnet".into(),
            grace_period_secs: 30,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            mqtt: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("HEALTHNET_MQTT_PORT={0} set but no MQTT host is configured")]
    MqttPortWithoutHost(String),
}

impl KernelConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Surcharges par variables d'environnement (ou toute autre source clé/valeur)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("HEALTHNET_NETWORK_NAME") {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue { key: "HEALTHNET_NETWORK_NAME", value: name });
            }
            self.network_name = name;
        }
        if let Some(v) = lookup("HEALTHNET_GRACE_PERIOD") {
            self.grace_period_secs = parse_value("HEALTHNET_GRACE_PERIOD", v)?;
        }
        if let Some(v) = lookup("HEALTHNET_BIND") {
            self.bind = parse_value("HEALTHNET_BIND", v)?;
        }
        if let Some(host) = lookup("HEALTHNET_MQTT_HOST") {
            let mqtt = self.mqtt.get_or_insert_with(|| MqttConf {
                host: String::new(),
                port: default_mqtt_port(),
                topic: default_mqtt_topic(),
            });
            mqtt.host = host;
        }
        if let Some(v) = lookup("HEALTHNET_MQTT_PORT") {
            let port = parse_value("HEALTHNET_MQTT_PORT", v.clone())?;
            match self.mqtt.as_mut() {
                Some(mqtt) => mqtt.port = port,
                None => return Err(ConfigError::MqttPortWithoutHost(v)),
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

/// Fichier YAML (HEALTHNET_KERNEL_CONFIG, défaut kernel.yaml) puis surcharges env
pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("HEALTHNET_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = read_config_file(&path).await;
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(cfg)
}

async fn read_config_file(path: &str) -> KernelConfig {
    if !Path::new(path).exists() {
        warn!(path, "no kernel config file, using defaults");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        warn!(path, error = %e, "invalid kernel config, using defaults");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.network_name, "healthnet");
        assert_eq!(cfg.grace_period(), Duration::from_secs(30));
        assert_eq!(cfg.bind.port(), 8080);
        assert!(cfg.mqtt.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let cfg = parse_config("network_name: lab\nmqtt:\n  host: broker.local\n").unwrap();
        assert_eq!(cfg.network_name, "lab");
        assert_eq!(cfg.grace_period_secs, 30);
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topic, "healthnet/clients/failed@v1");
    }

    #[test]
    fn test_parse_empty_yaml() {
        let cfg = parse_config("  \n").unwrap();
        assert_eq!(cfg.network_name, "healthnet");
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = KernelConfig::default();
        cfg.apply_overrides(env(&[
            ("HEALTHNET_NETWORK_NAME", "office"),
            ("HEALTHNET_GRACE_PERIOD", "5"),
            ("HEALTHNET_BIND", "127.0.0.1:9000"),
            ("HEALTHNET_MQTT_HOST", "mqtt.local"),
            ("HEALTHNET_MQTT_PORT", "1884"),
        ]))
        .unwrap();

        assert_eq!(cfg.network_name, "office");
        assert_eq!(cfg.grace_period_secs, 5);
        assert_eq!(cfg.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.host, "mqtt.local");
        assert_eq!(mqtt.port, 1884);
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let mut cfg = KernelConfig::default();
        let err = cfg.apply_overrides(env(&[("HEALTHNET_GRACE_PERIOD", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "HEALTHNET_GRACE_PERIOD", .. }));

        let err = cfg.apply_overrides(env(&[("HEALTHNET_NETWORK_NAME", " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "HEALTHNET_NETWORK_NAME", .. }));
    }

    #[test]
    fn test_mqtt_port_requires_a_host() {
        let mut cfg = KernelConfig::default();
        let err = cfg.apply_overrides(env(&[("HEALTHNET_MQTT_PORT", "1884")])).unwrap_err();
        assert!(matches!(err, ConfigError::MqttPortWithoutHost(ref v) if v == "1884"));
        assert!(cfg.mqtt.is_none());

        let mut cfg = parse_config("mqtt:\n  host: broker.lan\n").unwrap();
        cfg.apply_overrides(env(&[("HEALTHNET_MQTT_PORT", "1884")])).unwrap();
        assert_eq!(cfg.mqtt.unwrap().port, 1884);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let cfg = read_config_file("/nonexistent/healthnet/kernel.yaml").await;
        assert_eq!(cfg.network_name, "healthnet");
    }
}
