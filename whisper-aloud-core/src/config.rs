//! Persistent engine configuration (JSON document, §6).
//!
//! Loading follows the teacher's `AppSettings` idiom (load → normalize →
//! env-override) but the schema is the nested four-groups-plus-three shape
//! required by §6, and overrides are driven by a generic
//! `WHISPER_ALOUD_<PATH_SNAKE_UPPER>` convention rather than one env var per
//! field.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Auto,
    Cpu,
    Gpu,
}

impl Default for ComputeDevice {
    fn default() -> Self {
        ComputeDevice::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelConfig {
    pub name: String,
    pub compute_device: ComputeDevice,
    pub precision: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "base.en".into(),
            compute_device: ComputeDevice::Auto,
            precision: "fp32".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TranscriptionConfig {
    pub language_hint: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language_hint: "auto".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioConfig {
    pub device_id: Option<String>,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub chunk_duration_ms: u32,
    pub max_recording_duration_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate_hz: 16_000,
            channels: 1,
            chunk_duration_ms: 100,
            max_recording_duration_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioProcessingConfig {
    pub noise_gate_enabled: bool,
    pub noise_gate_threshold_db: f32,
    pub noise_gate_attack_ms: f32,
    pub noise_gate_release_ms: f32,

    pub agc_enabled: bool,
    pub agc_target_db: f32,
    pub agc_max_gain_db: f32,
    pub agc_min_gain_db: f32,
    pub agc_attack_ms: f32,
    pub agc_release_ms: f32,
    pub agc_window_ms: f32,

    pub denoise_enabled: bool,
    pub denoise_strength: f32,

    pub limiter_enabled: bool,
    pub limiter_ceiling_db: f32,
}

impl Default for AudioProcessingConfig {
    fn default() -> Self {
        Self {
            noise_gate_enabled: true,
            noise_gate_threshold_db: -40.0,
            noise_gate_attack_ms: 5.0,
            noise_gate_release_ms: 50.0,

            agc_enabled: true,
            agc_target_db: -18.0,
            agc_max_gain_db: 30.0,
            agc_min_gain_db: -10.0,
            agc_attack_ms: 10.0,
            agc_release_ms: 100.0,
            agc_window_ms: 300.0,

            denoise_enabled: true,
            denoise_strength: 0.5,

            limiter_enabled: true,
            limiter_ceiling_db: -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClipboardConfig {
    pub copy_after: bool,
    pub paste_after: bool,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            copy_after: true,
            paste_after: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistenceConfig {
    pub archive_audio: bool,
    pub retention_days: u32,
    pub max_entries: Option<u32>,
    pub save_empty: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            archive_audio: false,
            retention_days: 90,
            max_entries: None,
            save_empty: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct HotkeyConfig {
    pub toggle_shortcut: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            toggle_shortcut: "Ctrl+Shift+Space".into(),
        }
    }
}

/// A nested immutable configuration snapshot (§3).
///
/// Cloned cheaply and swapped behind an `Arc` at idle boundaries by the
/// Session Controller — never mutated in place while shared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub model: ModelConfig,
    pub transcription: TranscriptionConfig,
    pub audio: AudioConfig,
    pub audio_processing: AudioProcessingConfig,
    pub clipboard: ClipboardConfig,
    pub persistence: PersistenceConfig,
    pub hotkey: HotkeyConfig,

    /// Keys not recognized by this schema version, preserved verbatim on
    /// save so a newer-schema file round-trips through an older binary.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            transcription: TranscriptionConfig::default(),
            audio: AudioConfig::default(),
            audio_processing: AudioProcessingConfig::default(),
            clipboard: ClipboardConfig::default(),
            persistence: PersistenceConfig::default(),
            hotkey: HotkeyConfig::default(),
            unknown: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Validates value ranges; returns `ConfigInvalid` naming the first
    /// offending field.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate_hz == 0 {
            return Err(CoreError::ConfigInvalid("audio.sampleRateHz must be > 0".into()));
        }
        if self.audio.channels == 0 {
            return Err(CoreError::ConfigInvalid("audio.channels must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.audio_processing.denoise_strength) {
            return Err(CoreError::ConfigInvalid(
                "audioProcessing.denoiseStrength must be in [0, 1]".into(),
            ));
        }
        if self.audio_processing.agc_min_gain_db > self.audio_processing.agc_max_gain_db {
            return Err(CoreError::ConfigInvalid(
                "audioProcessing.agcMinGainDb must be <= agcMaxGainDb".into(),
            ));
        }
        match self.model.compute_device {
            ComputeDevice::Auto | ComputeDevice::Cpu | ComputeDevice::Gpu => {}
        }
        Ok(())
    }

    /// Merges `changes` (a partial JSON document using the same key shape)
    /// over this config, for recognized keys; unknown keys are preserved.
    pub fn merged_with(&self, changes: &Value) -> Result<Config> {
        let mut current =
            serde_json::to_value(self).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
        merge_json(&mut current, changes);
        serde_json::from_value(current).map_err(|e| CoreError::ConfigInvalid(e.to_string()))
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                merge_json(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

pub const ENV_PREFIX: &str = "WHISPER_ALOUD_";

/// Applies `WHISPER_ALOUD_<PATH_SNAKE_UPPER>` environment overrides onto a
/// JSON document in place, walking every leaf scalar. Env overrides defeat
/// file values unconditionally (§6).
fn apply_env_overrides(value: &mut Value, path: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(to_snake(key));
                apply_env_overrides(child, path);
                path.pop();
            }
        }
        leaf => {
            let var_name = format!("{ENV_PREFIX}{}", path.join("_").to_uppercase());
            if let Ok(raw) = std::env::var(&var_name) {
                *leaf = coerce_like(leaf, &raw);
            }
        }
    }
}

fn to_snake(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 4);
    for (i, c) in camel.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn coerce_like(existing: &Value, raw: &str) -> Value {
    match existing {
        Value::Bool(_) => Value::Bool(matches!(raw, "1" | "true" | "yes" | "on")),
        Value::Number(_) => serde_json::Number::from_f64(raw.parse::<f64>().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Value::Null => {
            if raw.is_empty() {
                Value::Null
            } else {
                Value::String(raw.to_string())
            }
        }
        _ => Value::String(raw.to_string()),
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("whisper_aloud")
            .join("config.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("whisper_aloud")
            .join("config.json")
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("whisper_aloud")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("whisper_aloud")
    }
}

/// Loads config from `path`, applying defaults for missing keys and
/// environment overrides, then validates. Falls back to pure defaults (still
/// env-overridden) if the file is absent or unparsable.
pub fn load_config(path: &Path) -> Result<Config> {
    let defaults = serde_json::to_value(Config::default()).expect("Config serializes");
    let mut merged = defaults.clone();
    if let Ok(raw) = fs::read_to_string(path) {
        match serde_json::from_str::<Value>(&raw) {
            Ok(file_value) => merge_json(&mut merged, &file_value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config file is not valid JSON, using defaults");
            }
        }
    }
    apply_env_overrides(&mut merged, &mut Vec::new());

    let config: Config =
        serde_json::from_value(merged).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn snake_case_path_matches_env_convention() {
        assert_eq!(to_snake("sampleRateHz"), "sample_rate_hz");
        assert_eq!(to_snake("name"), "name");
    }

    #[test]
    fn env_override_defeats_file_value() {
        std::env::set_var("WHISPER_ALOUD_MODEL_NAME", "tiny.en");
        let mut value = serde_json::to_value(Config::default()).unwrap();
        apply_env_overrides(&mut value, &mut Vec::new());
        assert_eq!(value["model"]["name"], "tiny.en");
        std::env::remove_var("WHISPER_ALOUD_MODEL_NAME");
    }

    #[test]
    fn unknown_top_level_keys_round_trip() {
        let mut value = serde_json::to_value(Config::default()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("futureFeature".into(), serde_json::json!({"enabled": true}));
        let config: Config = serde_json::from_value(value).unwrap();
        assert!(config.unknown.contains_key("futureFeature"));
        let round_tripped = serde_json::to_value(&config).unwrap();
        assert_eq!(round_tripped["futureFeature"]["enabled"], true);
    }

    #[test]
    fn merged_with_preserves_prior_values_for_unspecified_keys() {
        let config = Config::default();
        let changes = serde_json::json!({"model": {"name": "tiny"}});
        let merged = config.merged_with(&changes).unwrap();
        assert_eq!(merged.model.name, "tiny");
        assert_eq!(merged.audio.sample_rate_hz, config.audio.sample_rate_hz);
    }

    #[test]
    fn invalid_denoise_strength_rejected() {
        let mut config = Config::default();
        config.audio_processing.denoise_strength = 2.0;
        assert!(config.validate().is_err());
    }
}
