//! Config module tests

use std::io::Write;

use super::*;
use crate::topic::IdentityLayout;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("FG_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${FG_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("FG_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("FG_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${FG_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("FG_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${FG_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("FG_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("FG_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${FG_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    std::env::set_var("FG_TEST_BROKER_HOST", "mqtt.internal");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[broker]
address = "${{FG_TEST_BROKER_HOST}}:${{FG_TEST_BROKER_PORT:-1884}}"
keep_alive = "30s"

[store]
conf = "tcp::addr=${{FG_TEST_STORE_HOST:-questdb}}:9009;"
flush_interval = "250ms"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.address, "mqtt.internal:1884");
    assert_eq!(config.broker.keep_alive, Duration::from_secs(30));
    assert_eq!(config.store.conf, "tcp::addr=questdb:9009;");
    assert_eq!(config.store.flush_interval, Duration::from_millis(250));
    // Untouched sections keep their defaults
    assert_eq!(config.queues.download, 1_000_000);

    std::env::remove_var("FG_TEST_BROKER_HOST");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.http.bind.port(), 8080);
    assert_eq!(config.broker.command_qos, 2);
    assert_eq!(config.dispatch.completion, CompletionMode::Awaited);
}

#[test]
fn test_env_override_with_prefix() {
    std::env::set_var("FLEETGATE__QUEUES__SALES", "77");

    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.queues.sales, 77);

    std::env::remove_var("FLEETGATE__QUEUES__SALES");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.http.max_body_bytes, 1024 * 1024);
    assert_eq!(config.broker.address, "localhost:1883");
    assert!(!config.broker.clean_session);
    assert_eq!(config.broker.telemetry_qos, 1);
    assert_eq!(config.broker.layout, IdentityLayout::Device);
    assert_eq!(config.store.flush_interval, Duration::from_secs(1));
    assert_eq!(config.queues.system_status, 10_000);
    assert_eq!(
        config.normalizer.malformed_topic,
        MalformedTopicPolicy::Sentinel
    );
    assert!(config.metrics.enabled);
    config.validate().unwrap();
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.broker.client_id, "fleetgate");
    assert_eq!(config.broker.topic_prefix, "v1");
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[http]
bind = "127.0.0.1:9090"
max_body_bytes = 4096

[broker]
address = "broker.local:8883"
protocol = "mqtts"
client_id = "gw-01"
username = "gateway"
password = "secret"
keep_alive = "45s"
clean_session = true
reconnect_interval = "2s"
max_reconnect_interval = "2m"
connect_timeout = "5s"
ack_timeout = "10s"
startup_attempts = 5
inflight = 50
inbound_capacity = 256
telemetry_qos = 0
command_qos = 1
topic_prefix = "fleet"
layout = "region_group_device"

[store]
conf = "tcp::addr=10.0.0.5:9009;"
flush_interval = "2s"
max_buffer_bytes = 1024

[queues]
download = 500
sales = 20

[dispatch]
completion = "detached"

[normalizer]
malformed_topic = "reject"

[metrics]
enabled = false

[registration]
backend_url = "http://backend:8080/"
timeout = "3s"
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.http.bind.to_string(), "127.0.0.1:9090");
    assert_eq!(config.broker.protocol, BrokerProtocol::Mqtts);
    assert_eq!(config.broker.username.as_deref(), Some("gateway"));
    assert_eq!(config.broker.max_reconnect_interval, Duration::from_secs(120));
    assert_eq!(config.broker.layout, IdentityLayout::RegionGroupDevice);
    assert_eq!(config.broker.host_port().unwrap(), ("broker.local".to_string(), 8883));
    assert_eq!(config.store.max_buffer_bytes, 1024);
    assert_eq!(config.queues.download, 500);
    assert_eq!(config.queues.error_log, 10_000);
    assert_eq!(config.dispatch.completion, CompletionMode::Detached);
    assert_eq!(config.normalizer.malformed_topic, MalformedTopicPolicy::Reject);
    assert!(!config.metrics.enabled);
    assert_eq!(config.registration.timeout, Duration::from_secs(3));
    assert_eq!(
        config.registration.endpoint().as_deref(),
        Some("http://backend:8080/api/devices/register")
    );
}

#[test]
fn test_registration_disabled_by_default() {
    let config = Config::default();
    assert!(!config.registration.enabled());
    assert_eq!(config.registration.endpoint(), None);
    assert_eq!(config.registration.qos, 1);
}

#[test]
fn test_registration_requires_http_url() {
    let result = Config::parse("[registration]\nbackend_url = \"https://backend\"\n");
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.starts_with("registration.backend_url")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_host_port_defaults_by_protocol() {
    let mut broker = BrokerConfig {
        address: "broker.local".to_string(),
        ..BrokerConfig::default()
    };
    assert_eq!(broker.host_port().unwrap().1, 1883);

    broker.protocol = BrokerProtocol::Mqtts;
    assert_eq!(broker.host_port().unwrap().1, 8883);

    broker.address = ":1883".to_string();
    assert!(broker.host_port().is_err());
}

#[test]
fn test_invalid_qos() {
    let result = Config::parse("[broker]\ncommand_qos = 3\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_keep_alive() {
    let result = Config::parse("[broker]\nkeep_alive = \"2s\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_reconnect_bounds() {
    let result = Config::parse(
        "[broker]\nreconnect_interval = \"10s\"\nmax_reconnect_interval = \"5s\"\n",
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_zero_queue_capacity_rejected() {
    let result = Config::parse("[queues]\nhealth_status = 0\n");
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.contains("health_status")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_zero_flush_interval_rejected() {
    let result = Config::parse("[store]\nflush_interval = \"0s\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_bad_store_conf_rejected() {
    let result = Config::parse("[store]\nconf = \"http::addr=localhost:9000;\"\n");
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.starts_with("store.conf")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_unknown_enum_value_is_parse_error() {
    let result = Config::parse("[dispatch]\ncompletion = \"eventually\"\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
