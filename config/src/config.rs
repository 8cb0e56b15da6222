use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::settings::Settings;

pub const DEFAULT_CONFIG_FILENAME: &str = "fenceq.toml";
pub const ENV_CONFIG_KEY: &str = "FENCEQ_CONFIG";

/// Resolve the config path and a human-readable description of where it
/// came from: explicit flag, env var, then `fenceq.toml` in the cwd.
pub fn resolve_config_source(config_path: Option<&str>) -> (Option<String>, String) {
    if let Some(path) = config_path {
        return (Some(path.to_string()), "--config parameter".to_string());
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_KEY)
        && !env_path.is_empty()
    {
        return (Some(env_path), format!("{ENV_CONFIG_KEY} env var"));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
    if default_path.is_file() {
        return (
            Some(default_path.to_string_lossy().to_string()),
            format!("{DEFAULT_CONFIG_FILENAME} in cwd"),
        );
    }

    (None, "not found".to_string())
}

/// Load settings from TOML with `FENCEQ_*` environment overrides merged on
/// top. A missing config file is fine: defaults plus env overrides apply.
pub fn load_settings(config_path: Option<&str>) -> Result<Settings> {
    dotenvy::dotenv().ok();

    let (path, _) = resolve_config_source(config_path);
    let file_value = match path {
        Some(path) => {
            let payload = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {path}"))?;
            parse_toml_payload(&payload).with_context(|| format!("invalid config at {path}"))?
        }
        None => Value::Object(Map::new()),
    };

    let merged = deep_merge(file_value, env_overrides()?);
    let settings: Settings = serde_json::from_value(merged)
        .map_err(|err| anyhow::anyhow!("invalid fenceq config: {err}"))?;
    settings.validate()?;
    Ok(settings)
}

pub(crate) fn parse_toml_payload(payload: &str) -> Result<Value> {
    let toml_value: toml::Value = toml::from_str(payload).context("failed to parse TOML")?;
    let json_value = serde_json::to_value(toml_value).context("failed to convert TOML to JSON")?;
    normalize_toml_payload(json_value)
}

fn normalize_toml_payload(payload: Value) -> Result<Value> {
    // Accept both a bare table and a [fenceq] section.
    if let Value::Object(mut map) = payload {
        if let Some(inner) = map.remove("fenceq") {
            return Ok(inner);
        }
        return Ok(Value::Object(map));
    }
    Err(anyhow::anyhow!("fenceq config must be a TOML table"))
}

fn env_overrides() -> Result<Value> {
    let mut payload = Map::new();

    if let Ok(raw) = std::env::var("FENCEQ_STORE_ENDPOINTS")
        && !raw.is_empty()
    {
        let endpoints: Vec<Value> = raw
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| Value::String(endpoint.to_string()))
            .collect();
        payload.insert("store_endpoints".to_string(), Value::Array(endpoints));
    }

    set_env_string(&mut payload, "queue_name", "FENCEQ_QUEUE_NAME");
    set_env_string(&mut payload, "lock_resource", "FENCEQ_LOCK_RESOURCE");
    set_env_int(&mut payload, "lock_ttl_ms", "FENCEQ_LOCK_TTL_MS")?;
    set_env_int(
        &mut payload,
        "lock_safety_margin_ms",
        "FENCEQ_LOCK_SAFETY_MARGIN_MS",
    )?;
    set_env_int(&mut payload, "lock_retry_limit", "FENCEQ_LOCK_RETRY_LIMIT")?;
    set_env_int(&mut payload, "max_attempts", "FENCEQ_MAX_ATTEMPTS")?;
    set_env_float(
        &mut payload,
        "base_retry_delay_seconds",
        "FENCEQ_BASE_RETRY_DELAY_SECONDS",
    )?;
    set_env_float(
        &mut payload,
        "visibility_timeout_seconds",
        "FENCEQ_VISIBILITY_TIMEOUT_SECONDS",
    )?;
    set_env_float(&mut payload, "poll_delay_seconds", "FENCEQ_POLL_DELAY_SECONDS")?;
    set_env_int(&mut payload, "worker_concurrency", "FENCEQ_WORKER_CONCURRENCY")?;
    set_env_bool(&mut payload, "instrument_locks", "FENCEQ_INSTRUMENT_LOCKS")?;

    let mut producer = Map::new();
    set_env_int(&mut producer, "count", "FENCEQ_PRODUCER_COUNT")?;
    set_env_int(&mut producer, "interval_ms", "FENCEQ_PRODUCER_INTERVAL_MS")?;
    set_env_int(
        &mut producer,
        "max_in_flight",
        "FENCEQ_PRODUCER_MAX_IN_FLIGHT",
    )?;
    if !producer.is_empty() {
        payload.insert("producer".to_string(), Value::Object(producer));
    }

    Ok(Value::Object(payload))
}

fn set_env_string(payload: &mut Map<String, Value>, key: &str, env_key: &str) {
    if let Ok(value) = std::env::var(env_key)
        && !value.is_empty()
    {
        payload.insert(key.to_string(), Value::String(value));
    }
}

fn set_env_int(payload: &mut Map<String, Value>, key: &str, env_key: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env_key)
        && !value.is_empty()
    {
        let parsed: i64 = value
            .parse()
            .with_context(|| format!("{env_key} must be an integer, got {value:?}"))?;
        payload.insert(key.to_string(), Value::Number(parsed.into()));
    }
    Ok(())
}

fn set_env_float(payload: &mut Map<String, Value>, key: &str, env_key: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env_key)
        && !value.is_empty()
    {
        let parsed: f64 = value
            .parse()
            .with_context(|| format!("{env_key} must be a number, got {value:?}"))?;
        let number = serde_json::Number::from_f64(parsed)
            .ok_or_else(|| anyhow::anyhow!("{env_key} must be a finite number"))?;
        payload.insert(key.to_string(), Value::Number(number));
    }
    Ok(())
}

fn set_env_bool(payload: &mut Map<String, Value>, key: &str, env_key: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env_key)
        && !value.is_empty()
    {
        let parsed = match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => anyhow::bail!("{env_key} must be a boolean, got {other:?}"),
        };
        payload.insert(key.to_string(), Value::Bool(parsed));
    }
    Ok(())
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_table() {
        let value = parse_toml_payload("queue_name = \"jobs\"\nmax_attempts = 3\n").unwrap();
        let settings: Settings = serde_json::from_value(value).unwrap();
        assert_eq!(settings.queue_name, "jobs");
        assert_eq!(settings.max_attempts, 3);
    }

    #[test]
    fn parse_fenceq_section() {
        let payload = r#"
[fenceq]
queue_name = "jobs"
store_endpoints = ["redis://a:6379/0", "redis://b:6379/0", "redis://c:6379/0"]

[fenceq.producer]
max_in_flight = 7
"#;
        let value = parse_toml_payload(payload).unwrap();
        let settings: Settings = serde_json::from_value(value).unwrap();
        assert_eq!(settings.store_endpoints.len(), 3);
        assert_eq!(settings.producer.max_in_flight, 7);
        // untouched fields keep their defaults
        assert_eq!(settings.producer.interval_ms, 2_500);
    }

    #[test]
    fn deep_merge_prefers_overlay_and_keeps_base() {
        let base = serde_json::json!({"queue_name": "a", "producer": {"count": 5, "interval_ms": 10}});
        let overlay = serde_json::json!({"producer": {"count": 9}});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["queue_name"], "a");
        assert_eq!(merged["producer"]["count"], 9);
        assert_eq!(merged["producer"]["interval_ms"], 10);
    }

    #[test]
    fn rejects_non_table_payload() {
        assert!(parse_toml_payload("= nonsense").is_err());
    }
}
