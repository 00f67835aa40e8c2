//! Camera and servo settings model.
//!
//! A [`SettingsSnapshot`] is the complete set of adjustable parameters,
//! exchanged wholesale with the peer. Every setting is either enumerated
//! (a selection out of a fixed list) or bounded (an integer inside a range),
//! and the set of names is closed: anything the peer sends under another
//! key fails to decode.

pub mod catalog;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ValidationError;

/// Every setting the agent knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SettingName {
    #[serde(rename = "awb_mode")]
    AwbMode,
    #[serde(rename = "brightness")]
    Brightness,
    #[serde(rename = "contrast")]
    Contrast,
    #[serde(rename = "effect")]
    Effect,
    #[serde(rename = "iso")]
    Iso,
    #[serde(rename = "resolution")]
    Resolution,
    #[serde(rename = "saturation")]
    Saturation,
    #[serde(rename = "servos.pan")]
    ServoPan,
    #[serde(rename = "servos.tilt")]
    ServoTilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Enumerated,
    Bounded,
}

impl SettingName {
    pub const ALL: [SettingName; 9] = [
        Self::AwbMode,
        Self::Brightness,
        Self::Contrast,
        Self::Effect,
        Self::Iso,
        Self::Resolution,
        Self::Saturation,
        Self::ServoPan,
        Self::ServoTilt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwbMode => "awb_mode",
            Self::Brightness => "brightness",
            Self::Contrast => "contrast",
            Self::Effect => "effect",
            Self::Iso => "iso",
            Self::Resolution => "resolution",
            Self::Saturation => "saturation",
            Self::ServoPan => "servos.pan",
            Self::ServoTilt => "servos.tilt",
        }
    }

    /// Servo settings are gated by the pan/tilt capability flag.
    pub fn is_servo(self) -> bool {
        matches!(self, Self::ServoPan | Self::ServoTilt)
    }

    fn shape(self) -> Shape {
        match self {
            Self::AwbMode | Self::Effect | Self::Iso | Self::Resolution => Shape::Enumerated,
            Self::Brightness
            | Self::Contrast
            | Self::Saturation
            | Self::ServoPan
            | Self::ServoTilt => Shape::Bounded,
        }
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown setting {0:?}")]
pub struct UnknownSetting(pub String);

impl FromStr for SettingName {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownSetting(s.to_string()))
    }
}

/// One legal value of an enumerated setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Text(String),
    Number(i64),
}

impl Choice {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for Choice {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for Choice {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// One adjustable parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    Enumerated {
        selected: Choice,
        available: Vec<Choice>,
    },
    Bounded {
        value: i32,
        min: i32,
        max: i32,
    },
}

impl Setting {
    fn enumerated<T: Into<Choice> + Copy>(selected: T, available: &[T]) -> Self {
        Self::Enumerated {
            selected: selected.into(),
            available: available.iter().map(|&c| c.into()).collect(),
        }
    }

    fn bounded((value, min, max): (i32, i32, i32)) -> Self {
        Self::Bounded { value, min, max }
    }

    fn shape(&self) -> Shape {
        match self {
            Self::Enumerated { .. } => Shape::Enumerated,
            Self::Bounded { .. } => Shape::Bounded,
        }
    }

    /// Check the setting's own invariant: selection is available, value is in range.
    pub fn validate(&self, name: SettingName) -> Result<(), ValidationError> {
        match self {
            Self::Enumerated {
                selected,
                available,
            } => {
                if available.contains(selected) {
                    Ok(())
                } else {
                    Err(ValidationError::NotAvailable {
                        name,
                        value: selected.to_string(),
                    })
                }
            }
            Self::Bounded { value, min, max } => {
                if min <= value && value <= max {
                    Ok(())
                } else {
                    Err(ValidationError::OutOfBounds {
                        name,
                        value: *value,
                        min: *min,
                        max: *max,
                    })
                }
            }
        }
    }

    /// Whether both settings share the same legal range / choice list.
    fn same_bounds(&self, other: &Setting) -> bool {
        match (self, other) {
            (Self::Enumerated { available: a, .. }, Self::Enumerated { available: b, .. }) => {
                a == b
            }
            (
                Self::Bounded { min: a0, max: a1, .. },
                Self::Bounded { min: b0, max: b1, .. },
            ) => a0 == b0 && a1 == b1,
            _ => false,
        }
    }
}

/// The complete current set of setting values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub pan_tilt_enabled: bool,
    settings: BTreeMap<SettingName, Setting>,
}

impl SettingsSnapshot {
    /// Factory defaults.
    pub fn defaults(pan_tilt_enabled: bool) -> Self {
        use catalog::*;

        let mut settings = BTreeMap::new();
        settings.insert(
            SettingName::AwbMode,
            Setting::enumerated(DEFAULT_AWB_MODE, AWB_MODES),
        );
        settings.insert(SettingName::Brightness, Setting::bounded(BRIGHTNESS));
        settings.insert(SettingName::Contrast, Setting::bounded(CONTRAST));
        settings.insert(
            SettingName::Effect,
            Setting::enumerated(DEFAULT_EFFECT, EFFECTS),
        );
        settings.insert(SettingName::Iso, Setting::enumerated(DEFAULT_ISO, ISO_VALUES));
        settings.insert(
            SettingName::Resolution,
            Setting::enumerated(DEFAULT_RESOLUTION, RESOLUTIONS),
        );
        settings.insert(SettingName::Saturation, Setting::bounded(SATURATION));
        settings.insert(SettingName::ServoPan, Setting::bounded(SERVO_PAN));
        settings.insert(SettingName::ServoTilt, Setting::bounded(SERVO_TILT));

        Self {
            pan_tilt_enabled,
            settings,
        }
    }

    pub fn get(&self, name: SettingName) -> Option<&Setting> {
        self.settings.get(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingName, &Setting)> {
        self.settings.iter().map(|(name, setting)| (*name, setting))
    }

    /// Current value of a bounded setting.
    pub fn value(&self, name: SettingName) -> Option<i32> {
        match self.settings.get(&name)? {
            Setting::Bounded { value, .. } => Some(*value),
            Setting::Enumerated { .. } => None,
        }
    }

    /// Current selection of an enumerated setting.
    pub fn selected(&self, name: SettingName) -> Option<&Choice> {
        match self.settings.get(&name)? {
            Setting::Enumerated { selected, .. } => Some(selected),
            Setting::Bounded { .. } => None,
        }
    }

    pub fn pan(&self) -> Option<i32> {
        self.value(SettingName::ServoPan)
    }

    pub fn tilt(&self) -> Option<i32> {
        self.value(SettingName::ServoTilt)
    }

    /// Set a bounded value, refusing anything outside its range.
    pub fn set_value(&mut self, name: SettingName, new: i32) -> Result<(), ValidationError> {
        match self.settings.get_mut(&name) {
            Some(Setting::Bounded { value, min, max }) => {
                if new < *min || new > *max {
                    return Err(ValidationError::OutOfBounds {
                        name,
                        value: new,
                        min: *min,
                        max: *max,
                    });
                }
                *value = new;
                Ok(())
            }
            Some(Setting::Enumerated { .. }) => Err(ValidationError::WrongShape(name)),
            None => Err(ValidationError::Missing(name)),
        }
    }

    /// Select one of an enumerated setting's available choices.
    pub fn select(&mut self, name: SettingName, choice: Choice) -> Result<(), ValidationError> {
        match self.settings.get_mut(&name) {
            Some(Setting::Enumerated {
                selected,
                available,
            }) => {
                if !available.contains(&choice) {
                    return Err(ValidationError::NotAvailable {
                        name,
                        value: choice.to_string(),
                    });
                }
                *selected = choice;
                Ok(())
            }
            Some(Setting::Bounded { .. }) => Err(ValidationError::WrongShape(name)),
            None => Err(ValidationError::Missing(name)),
        }
    }

    /// Set a setting from its textual form, e.g. `"80"` or `"1280x720"`.
    pub fn set_raw(&mut self, name: SettingName, raw: &str) -> Result<(), ValidationError> {
        let unparseable = || ValidationError::Unparseable {
            name,
            value: raw.to_string(),
        };
        match self.settings.get(&name) {
            Some(Setting::Bounded { .. }) => {
                let value = raw.trim().parse::<i32>().map_err(|_| unparseable())?;
                self.set_value(name, value)
            }
            Some(Setting::Enumerated { available, .. }) => {
                let choice = available
                    .iter()
                    .find(|c| c.to_string() == raw.trim())
                    .cloned()
                    .ok_or_else(|| ValidationError::NotAvailable {
                        name,
                        value: raw.to_string(),
                    })?;
                self.select(name, choice)
            }
            None => Err(ValidationError::Missing(name)),
        }
    }

    /// Full structural and range check: every name present with its fixed
    /// shape, every value legal.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for name in SettingName::ALL {
            let setting = self.get(name).ok_or(ValidationError::Missing(name))?;
            if setting.shape() != name.shape() {
                return Err(ValidationError::WrongShape(name));
            }
            setting.validate(name)?;
        }
        Ok(())
    }

    /// Check that `request` is a legal successor of this snapshot: same
    /// capability flag, same bounds and choice lists, legal values.
    pub fn check_update(&self, request: &SettingsSnapshot) -> Result<(), ValidationError> {
        if request.pan_tilt_enabled != self.pan_tilt_enabled {
            return Err(ValidationError::CapabilityChanged);
        }
        request.validate()?;
        for (name, current) in self.iter() {
            let proposed = request.get(name).ok_or(ValidationError::Missing(name))?;
            if !current.same_bounds(proposed) {
                return Err(ValidationError::BoundsChanged(name));
            }
        }
        Ok(())
    }

    /// Whether `other` moves either servo away from this snapshot's angles.
    pub fn servos_differ(&self, other: &SettingsSnapshot) -> bool {
        self.pan() != other.pan() || self.tilt() != other.tilt()
    }

    /// Names whose values differ between the two snapshots.
    pub fn changed(&self, other: &SettingsSnapshot) -> Vec<SettingName> {
        SettingName::ALL
            .into_iter()
            .filter(|&name| self.get(name) != other.get(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let snap = SettingsSnapshot::defaults(true);
        snap.validate().unwrap();
        assert_eq!(snap.value(SettingName::Brightness), Some(50));
        assert_eq!(snap.pan(), Some(90));
        assert_eq!(snap.tilt(), Some(30));
        assert_eq!(
            snap.selected(SettingName::Resolution),
            Some(&Choice::from("720x480"))
        );
        assert_eq!(catalog::RESOLUTIONS.len(), 86);
    }

    #[test]
    fn test_setting_names_round_trip_through_text() {
        for name in SettingName::ALL {
            assert_eq!(name.as_str().parse::<SettingName>().unwrap(), name);
        }
        assert!("exposure".parse::<SettingName>().is_err());
    }

    #[test]
    fn test_set_value_respects_bounds() {
        let mut snap = SettingsSnapshot::defaults(true);
        snap.set_value(SettingName::Brightness, 80).unwrap();
        assert_eq!(snap.value(SettingName::Brightness), Some(80));

        let err = snap.set_value(SettingName::Brightness, 150).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfBounds { value: 150, .. }));
        assert_eq!(snap.value(SettingName::Brightness), Some(80));

        assert!(matches!(
            snap.set_value(SettingName::Effect, 1),
            Err(ValidationError::WrongShape(SettingName::Effect))
        ));
    }

    #[test]
    fn test_set_raw_parses_by_shape() {
        let mut snap = SettingsSnapshot::defaults(false);
        snap.set_raw(SettingName::Iso, "400").unwrap();
        snap.set_raw(SettingName::Resolution, "1280x720").unwrap();
        snap.set_raw(SettingName::Contrast, "-20").unwrap();

        assert_eq!(snap.selected(SettingName::Iso), Some(&Choice::Number(400)));
        assert_eq!(
            snap.selected(SettingName::Resolution),
            Some(&Choice::from("1280x720"))
        );
        assert_eq!(snap.value(SettingName::Contrast), Some(-20));

        assert!(matches!(
            snap.set_raw(SettingName::Iso, "123"),
            Err(ValidationError::NotAvailable { .. })
        ));
        assert!(matches!(
            snap.set_raw(SettingName::Brightness, "bright"),
            Err(ValidationError::Unparseable { .. })
        ));
    }

    #[test]
    fn test_check_update_rejects_bound_edits() {
        let current = SettingsSnapshot::defaults(true);
        let mut request = current.clone();
        request
            .settings
            .insert(SettingName::Brightness, Setting::bounded((150, 0, 200)));

        assert!(matches!(
            current.check_update(&request),
            Err(ValidationError::BoundsChanged(SettingName::Brightness))
        ));
    }

    #[test]
    fn test_check_update_rejects_capability_flip() {
        let current = SettingsSnapshot::defaults(false);
        let mut request = current.clone();
        request.pan_tilt_enabled = true;

        assert!(matches!(
            current.check_update(&request),
            Err(ValidationError::CapabilityChanged)
        ));
    }

    #[test]
    fn test_validate_catches_missing_and_misshapen() {
        let mut snap = SettingsSnapshot::defaults(true);
        snap.settings.remove(&SettingName::Saturation);
        assert!(matches!(
            snap.validate(),
            Err(ValidationError::Missing(SettingName::Saturation))
        ));

        let mut snap = SettingsSnapshot::defaults(true);
        snap.settings
            .insert(SettingName::Iso, Setting::bounded((0, 0, 800)));
        assert!(matches!(
            snap.validate(),
            Err(ValidationError::WrongShape(SettingName::Iso))
        ));
    }

    #[test]
    fn test_json_uses_dotted_servo_names_and_rejects_unknown_keys() {
        let snap = SettingsSnapshot::defaults(true);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"servos.pan\""));

        let back: SettingsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);

        let bogus = json.replace("\"servos.pan\"", "\"servos.zoom\"");
        assert!(serde_json::from_str::<SettingsSnapshot>(&bogus).is_err());
    }

    #[test]
    fn test_changed_lists_differences() {
        let a = SettingsSnapshot::defaults(true);
        let mut b = a.clone();
        b.set_value(SettingName::ServoPan, 10).unwrap();
        b.set_raw(SettingName::Effect, "sketch").unwrap();

        assert_eq!(a.changed(&b), vec![SettingName::Effect, SettingName::ServoPan]);
        assert!(a.servos_differ(&b));
        assert!(!a.servos_differ(&a.clone()));
    }
}
