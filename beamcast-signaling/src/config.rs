//! Signaling configuration

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::quality::Quality;

/// Settings applied to a room when it is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomSettings {
    /// Maximum number of simultaneously attached viewers
    #[serde(alias = "max_viewers")]
    pub max_viewers: usize,
    /// Ordered set of tiers viewers may select from. Repeated tiers are
    /// dropped on load, keeping the first occurrence.
    #[serde(alias = "allowed_qualities", deserialize_with = "deserialize_tiers")]
    pub allowed_qualities: Vec<Quality>,
    #[serde(alias = "recording_enabled")]
    pub recording_enabled: bool,
    #[serde(alias = "low_latency_mode")]
    pub low_latency_mode: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_viewers: 1000,
            allowed_qualities: vec![Quality::P1080, Quality::P720, Quality::P480, Quality::P360],
            recording_enabled: false,
            low_latency_mode: false,
        }
    }
}

/// Partial settings update from the admin surface. Absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettingsPatch {
    pub max_viewers: Option<usize>,
    pub allowed_qualities: Option<Vec<Quality>>,
    pub recording_enabled: Option<bool>,
    pub low_latency_mode: Option<bool>,
}

impl RoomSettings {
    /// Merge `patch` into a copy of these settings
    #[must_use]
    pub fn merged(&self, patch: &RoomSettingsPatch) -> Self {
        let allowed = patch
            .allowed_qualities
            .as_deref()
            .unwrap_or(&self.allowed_qualities);

        Self {
            max_viewers: patch.max_viewers.unwrap_or(self.max_viewers),
            allowed_qualities: unique_tiers(allowed.iter().copied()),
            recording_enabled: patch.recording_enabled.unwrap_or(self.recording_enabled),
            low_latency_mode: patch.low_latency_mode.unwrap_or(self.low_latency_mode),
        }
    }

    /// Copy with repeated tiers removed
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.allowed_qualities = unique_tiers(self.allowed_qualities);
        self
    }
}

fn unique_tiers(tiers: impl IntoIterator<Item = Quality>) -> Vec<Quality> {
    tiers.into_iter().collect::<IndexSet<_>>().into_iter().collect()
}

fn deserialize_tiers<'de, D>(deserializer: D) -> Result<Vec<Quality>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<Quality>::deserialize(deserializer).map(unique_tiers)
}

/// Signaling core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Interval between stats pushes (seconds)
    pub stats_interval_secs: u64,
    /// Interval between reaper sweeps (seconds)
    pub cleanup_interval_secs: u64,
    /// Minimum age of a disconnected peer before it is evicted (seconds)
    pub peer_timeout_secs: u64,
    /// Maximum accepted stream key length in bytes
    pub max_stream_key_length: usize,
    /// Settings for newly created rooms
    pub default_room_settings: RoomSettings,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 5,
            cleanup_interval_secs: 30,
            peer_timeout_secs: 60,
            max_stream_key_length: 128,
            default_room_settings: RoomSettings::default(),
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    #[must_use]
    pub const fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    /// Check the configuration, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.stats_interval_secs == 0 {
            errors.push("signaling.stats_interval_secs must be greater than 0".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            errors.push("signaling.cleanup_interval_secs must be greater than 0".to_string());
        }
        if self.max_stream_key_length == 0 {
            errors.push("signaling.max_stream_key_length must be greater than 0".to_string());
        }
        if self.default_room_settings.allowed_qualities.is_empty() {
            errors.push(
                "signaling.default_room_settings.allowedQualities must not be empty".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SignalingConfig::default();
        assert_eq!(config.stats_interval(), Duration::from_secs(5));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(30));
        assert_eq!(config.peer_timeout(), Duration::from_secs(60));
        assert_eq!(config.default_room_settings.max_viewers, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = SignalingConfig {
            stats_interval_secs: 0,
            cleanup_interval_secs: 0,
            default_room_settings: RoomSettings {
                allowed_qualities: Vec::new(),
                ..RoomSettings::default()
            },
            ..SignalingConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().len(), 3);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let settings = RoomSettings::default();
        let patch = RoomSettingsPatch {
            max_viewers: Some(10),
            low_latency_mode: Some(true),
            ..RoomSettingsPatch::default()
        };

        let merged = settings.merged(&patch);
        assert_eq!(merged.max_viewers, 10);
        assert!(merged.low_latency_mode);
        assert!(!merged.recording_enabled);
        assert_eq!(merged.allowed_qualities, settings.allowed_qualities);
    }

    #[test]
    fn test_merge_dedups_allowed_qualities() {
        let patch = RoomSettingsPatch {
            allowed_qualities: Some(vec![Quality::P480, Quality::P720, Quality::P480]),
            ..RoomSettingsPatch::default()
        };
        let merged = RoomSettings::default().merged(&patch);
        assert_eq!(merged.allowed_qualities, vec![Quality::P480, Quality::P720]);
    }

    #[test]
    fn test_repeated_tiers_dropped_on_load() {
        let settings: RoomSettings =
            serde_json::from_str(r#"{"allowedQualities":["720p","480p","720p"]}"#).unwrap();
        assert_eq!(settings.allowed_qualities, vec![Quality::P720, Quality::P480]);
        assert_eq!(settings.max_viewers, 1000);

        let settings = RoomSettings {
            allowed_qualities: vec![Quality::P360, Quality::P360],
            ..RoomSettings::default()
        }
        .normalized();
        assert_eq!(settings.allowed_qualities, vec![Quality::P360]);
    }

    #[test]
    fn test_settings_wire_names() {
        let json = serde_json::to_value(RoomSettings::default()).unwrap();
        assert_eq!(json["maxViewers"], 1000);
        assert_eq!(json["allowedQualities"][1], "720p");
    }
}
