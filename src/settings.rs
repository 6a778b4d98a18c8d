use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    baseline::BaselineConfig,
    collaborators::RosterProvider,
    escalation::EscalationConfig,
    fall::FallConfig,
    inactivity::{is_valid_threshold, InactivityConfig, QuietHours, DEFAULT_THRESHOLD_HOURS},
    models::{Contact, LocationContext},
};

const DEFAULT_FALL_COUNTDOWN_SECS: u64 = 60;
const DEFAULT_ESCALATION_GRACE_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuietHoursSettings {
    /// "HH:MM"
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringSettings {
    pub display_name: String,
    pub contacts: Vec<Contact>,
    pub inactivity_threshold_hours: f64,
    pub quiet_hours: Option<QuietHoursSettings>,
    pub relaxed_night: bool,
    pub fall_detection_enabled: bool,
    pub fall_countdown_secs: u64,
    pub escalation_grace_secs: u64,
    pub location: Option<LocationContext>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            display_name: "HearthGuard user".into(),
            contacts: Vec::new(),
            inactivity_threshold_hours: DEFAULT_THRESHOLD_HOURS,
            quiet_hours: None,
            relaxed_night: false,
            fall_detection_enabled: true,
            fall_countdown_secs: DEFAULT_FALL_COUNTDOWN_SECS,
            escalation_grace_secs: DEFAULT_ESCALATION_GRACE_SECS,
            location: None,
        }
    }
}

impl MonitoringSettings {
    /// Copy with every out-of-range value replaced by its default.
    pub fn sanitized(&self) -> Self {
        let mut clean = self.clone();
        let threshold = clean.inactivity_threshold_hours;
        if !is_valid_threshold(threshold) {
            warn!("inactivity threshold {threshold}h is not allowed, using {DEFAULT_THRESHOLD_HOURS}h");
            clean.inactivity_threshold_hours = DEFAULT_THRESHOLD_HOURS;
        }
        if clean.fall_countdown_secs == 0 {
            warn!("fall countdown of 0s is not allowed, using {DEFAULT_FALL_COUNTDOWN_SECS}s");
            clean.fall_countdown_secs = DEFAULT_FALL_COUNTDOWN_SECS;
        }
        if let Some(window) = &clean.quiet_hours {
            if QuietHours::parse(&window.start, &window.end).is_none() {
                warn!(
                    "ignoring unparsable quiet hours {}-{}",
                    window.start, window.end
                );
                clean.quiet_hours = None;
            }
        }
        clean
    }

    pub fn quiet_hours(&self) -> Option<QuietHours> {
        let window = self.quiet_hours.as_ref()?;
        QuietHours::parse(&window.start, &window.end)
    }

    pub fn inactivity_config(&self) -> InactivityConfig {
        let clean = self.sanitized();
        InactivityConfig::new(clean.inactivity_threshold_hours, clean.quiet_hours())
    }

    pub fn fall_config(&self) -> FallConfig {
        let clean = self.sanitized();
        FallConfig {
            enabled: clean.fall_detection_enabled,
            response_countdown: Duration::from_secs(clean.fall_countdown_secs),
            ..FallConfig::default()
        }
    }

    pub fn escalation_config(&self) -> EscalationConfig {
        let grace = Duration::from_secs(self.escalation_grace_secs);
        EscalationConfig {
            inactivity_grace: grace,
            pattern_grace: grace,
            ..EscalationConfig::default()
        }
    }

    pub fn baseline_config(&self) -> BaselineConfig {
        BaselineConfig {
            relaxed_night: self.relaxed_night,
            ..BaselineConfig::default()
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitoringSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("settings at {} unreadable ({err}), using defaults", path.display());
                MonitoringSettings::default()
            })
        } else {
            MonitoringSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> MonitoringSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: MonitoringSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &MonitoringSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitoringSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitoringSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RosterProvider for SettingsStore {
    fn display_name(&self) -> String {
        self.read().display_name.clone()
    }

    fn contacts(&self) -> Vec<Contact> {
        self.read().contacts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), MonitoringSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let settings = MonitoringSettings {
            display_name: "Ada".into(),
            contacts: vec![Contact {
                name: "Grace".into(),
                phone: "+15550001".into(),
            }],
            quiet_hours: Some(QuietHoursSettings {
                start: "22:00".into(),
                end: "07:00".into(),
            }),
            ..MonitoringSettings::default()
        };
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.settings(), settings);
        assert_eq!(reopened.display_name(), "Ada");
        assert_eq!(reopened.contacts().len(), 1);
        assert!(reopened.settings().quiet_hours().is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"inactivityThresholdHours": 6}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().settings();
        assert_eq!(settings.inactivity_threshold_hours, 6.0);
        assert_eq!(settings.fall_countdown_secs, 60);
    }

    #[test]
    fn sanitized_replaces_invalid_values() {
        let settings = MonitoringSettings {
            inactivity_threshold_hours: f64::NAN,
            fall_countdown_secs: 0,
            ..MonitoringSettings::default()
        };
        let clean = settings.sanitized();
        assert_eq!(clean.inactivity_threshold_hours, 4.0);
        assert_eq!(clean.fall_countdown_secs, 60);
    }

    #[test]
    fn huge_threshold_falls_back_to_default() {
        let settings = MonitoringSettings {
            inactivity_threshold_hours: 1e13,
            ..MonitoringSettings::default()
        };
        assert_eq!(settings.sanitized().inactivity_threshold_hours, 4.0);
        assert_eq!(
            settings.inactivity_config().threshold,
            chrono::Duration::hours(4)
        );
    }

    #[test]
    fn invalid_values_are_replaced() {
        let settings = MonitoringSettings {
            inactivity_threshold_hours: -1.0,
            fall_countdown_secs: 0,
            quiet_hours: Some(QuietHoursSettings {
                start: "soon".into(),
                end: "07:00".into(),
            }),
            ..MonitoringSettings::default()
        };

        let inactivity = settings.inactivity_config();
        assert_eq!(inactivity.threshold, chrono::Duration::hours(4));
        assert!(inactivity.quiet_hours.is_none());
        assert_eq!(settings.fall_config().response_countdown, Duration::from_secs(60));
    }
}
