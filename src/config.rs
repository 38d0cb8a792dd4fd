//! Declarative aircraft profiles.
//!
//! A profile decouples the bridge from a particular aircraft model: it
//! names the simulator variables that drive each display region, maps key
//! indices to actions, and declares reactions to simulator-side changes.
//! Variable names may contain the `{unit}` placeholder, which the
//! [`UnitTranslator`][crate::unit::UnitTranslator] resolves to a concrete
//! MCDU unit.
//!
//! Profiles are data, not code: they are loaded from JSON files into an
//! explicit registration table ([`AircraftLibrary`]) built once at
//! startup.

use std::{
    collections::HashMap,
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    codec::Color,
    device::{
        BrightnessTarget,
        Led,
    },
};

/// Errors from loading or validating aircraft profiles.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("profile {name} declares no MCDU units")]
    NoUnits { name: String },

    #[error("profile {name} declares no aircraft keys")]
    NoAircraft { name: String },

    #[error("profile {name} uses display line {line}, outside 1..=6")]
    LineOutOfRange { name: String, line: u8 },
}

/// Identity of an aircraft model, as reported by the simulator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AircraftKey {
    pub author: String,
    pub icao: String,
}

impl AircraftKey {
    pub fn new(author: impl Into<String>, icao: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            icao: icao.into(),
        }
    }

    /// Normalized lookup key.
    pub fn key(&self) -> String {
        format!("{}::{}", self.author.trim(), self.icao.trim())
    }
}

/// Screen region (or device indicator) a display variable drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "region")]
pub enum Region {
    /// Line 0.
    Title,
    /// Label line `line` in 1..=6, rendered above its content line.
    Label { line: u8 },
    /// Content line `line` in 1..=6.
    Content { line: u8 },
    /// The scratchpad line at the bottom of the page.
    StatusLine,
    /// Vertical-slew arrows in the lower right corner.
    Slew,
    /// An annunciator LED following the variable's value.
    Annunciator { led: Led },
    /// A backlight level following the variable's value.
    Brightness { target: BrightnessTarget },
}

impl Region {
    /// Page row for text regions; indicator regions have none.
    pub fn row(&self) -> Option<usize> {
        match self {
            Region::Title => Some(0),
            Region::Label { line } => Some(2 * *line as usize - 1),
            Region::Content { line } => Some(2 * *line as usize),
            Region::StatusLine => Some(crate::page::PAGE_LINES - 1),
            Region::Slew | Region::Annunciator { .. } | Region::Brightness { .. } => None,
        }
    }
}

/// Binds a simulator variable to a display region.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DisplayBinding {
    /// Simulator variable name template.
    pub variable: String,
    #[serde(flatten)]
    pub region: Region,
    #[serde(default)]
    pub color: Option<Color>,
    #[serde(default)]
    pub small: bool,
}

/// What triggers a key binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Press,
    Release,
}

/// The closed action vocabulary for key and reaction bindings.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum Action {
    /// Fire a simulator command.
    ExecuteCommand { command: String },
    /// Write a fixed value to a simulator variable.
    SetValue { variable: String, value: f64 },
    /// Invert a 0/1 simulator variable.
    ToggleValue { variable: String },
    /// Request a display refresh.
    RefreshDisplay,
    /// Drive an annunciator LED from the triggering value.
    SetLed { led: Led },
    /// Drive a backlight level from the triggering value.
    SetBrightness { target: BrightnessTarget },
    /// The simulator switched aircraft models.
    ChangeAircraft,
    /// Switch to the next declared MCDU unit.
    ChangeUnit,
}

/// Maps a device key index to an action.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KeyBinding {
    pub key: u8,
    #[serde(default)]
    pub on: Trigger,
    pub action: Action,
}

/// Maps a simulator variable change to an action.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReactionBinding {
    pub variable: String,
    pub action: Action,
}

/// A complete declarative aircraft mapping.
///
/// Immutable once loaded; replaced wholesale on aircraft change.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AircraftProfile {
    pub name: String,
    pub aircraft: Vec<AircraftKey>,
    /// MCDU units this aircraft exposes (e.g. 1 = captain, 2 = first
    /// officer).
    pub units: Vec<u8>,
    /// Character encoding of byte-string variables, when the aircraft
    /// declares one. Without it, best-effort detection is used.
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub display: Vec<DisplayBinding>,
    #[serde(default)]
    pub keys: Vec<KeyBinding>,
    #[serde(default)]
    pub reactions: Vec<ReactionBinding>,
}

impl AircraftProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.units.is_empty() {
            return Err(ProfileError::NoUnits {
                name: self.name.clone(),
            });
        }
        if self.aircraft.is_empty() {
            return Err(ProfileError::NoAircraft {
                name: self.name.clone(),
            });
        }
        for binding in &self.display {
            if let Region::Label { line } | Region::Content { line } = binding.region {
                if !(1..=6).contains(&line) {
                    return Err(ProfileError::LineOutOfRange {
                        name: self.name.clone(),
                        line,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, ProfileError> {
        let raw = fs::read_to_string(path).map_err(|source| {
            ProfileError::Io {
                path: path.to_owned(),
                source,
            }
        })?;
        let profile: AircraftProfile = serde_json::from_str(&raw).map_err(|source| {
            ProfileError::Parse {
                path: path.to_owned(),
                source,
            }
        })?;
        profile.validate()?;
        Ok(profile)
    }
}

/// Registration table mapping aircraft identity to profiles.
///
/// Built once at startup and handed to the session; lookups that find
/// nothing return `None`, which the readiness state machine treats as
/// "keep waiting".
#[derive(Clone, Debug, Default)]
pub struct AircraftLibrary {
    profiles: HashMap<String, Arc<AircraftProfile>>,
}

impl AircraftLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` profile in a directory.
    pub fn load_dir(path: &Path) -> Result<Self, ProfileError> {
        let mut library = Self::new();
        let entries = fs::read_dir(path).map_err(|source| {
            ProfileError::Io {
                path: path.to_owned(),
                source,
            }
        })?;
        for entry in entries.flatten() {
            let file = entry.path();
            if file.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            library.register(AircraftProfile::from_file(&file)?);
        }
        Ok(library)
    }

    pub fn register(&mut self, profile: AircraftProfile) {
        let profile = Arc::new(profile);
        for key in &profile.aircraft {
            let key = key.key();
            if let Some(previous) = self.profiles.insert(key.clone(), profile.clone()) {
                tracing::warn!(
                    %key,
                    previous = %previous.name,
                    replacement = %profile.name,
                    "duplicate aircraft key, keeping the replacement"
                );
            }
        }
    }

    pub fn find(&self, author: &str, icao: &str) -> Option<Arc<AircraftProfile>> {
        self.profiles
            .get(&AircraftKey::new(author, icao).key())
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Known aircraft keys, for "waiting for aircraft" diagnostics.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_profile() -> AircraftProfile {
        serde_json::from_value(serde_json::json!({
            "name": "Test Airbus",
            "aircraft": [{"author": "Test Author", "icao": "A339"}],
            "units": [1, 2],
            "display": [
                {"variable": "tst/MCDU{unit}/title", "region": "title"},
                {
                    "variable": "tst/MCDU{unit}/label1",
                    "region": "label",
                    "line": 1,
                    "color": "white",
                    "small": true
                },
                {"variable": "tst/MCDU{unit}/rdy", "region": "annunciator", "led": "rdy"}
            ],
            "keys": [
                {"key": 0, "action": {"type": "execute-command", "command": "tst/MCDU{unit}/lsk1l"}},
                {"key": 8, "on": "release", "action": {"type": "change-unit"}}
            ],
            "reactions": [
                {"variable": "tst/brightness", "action": {"type": "set-brightness", "target": "backlight"}}
            ]
        }))
        .expect("profile json")
    }

    #[test]
    fn profile_deserializes_and_validates() {
        let profile = minimal_profile();
        profile.validate().expect("valid");
        assert_eq!(profile.display.len(), 3);
        assert_eq!(profile.display[0].region, Region::Title);
        assert_eq!(profile.display[1].region, Region::Label { line: 1 });
        assert!(profile.display[1].small);
        assert_eq!(profile.keys[1].on, Trigger::Release);
        assert_eq!(
            profile.reactions[0].action,
            Action::SetBrightness {
                target: BrightnessTarget::Backlight,
            }
        );
    }

    #[test]
    fn out_of_range_line_is_rejected() {
        let mut profile = minimal_profile();
        profile.display.push(DisplayBinding {
            variable: "tst/bad".into(),
            region: Region::Content { line: 7 },
            color: None,
            small: false,
        });
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::LineOutOfRange { line: 7, .. })
        ));
    }

    #[test]
    fn library_finds_by_identity() {
        let mut library = AircraftLibrary::new();
        library.register(minimal_profile());
        assert!(library.find("Test Author", "A339").is_some());
        assert!(library.find("Someone Else", "A339").is_none());
    }

    #[test]
    fn region_rows_follow_the_page_layout() {
        assert_eq!(Region::Title.row(), Some(0));
        assert_eq!(Region::Label { line: 1 }.row(), Some(1));
        assert_eq!(Region::Content { line: 1 }.row(), Some(2));
        assert_eq!(Region::Label { line: 6 }.row(), Some(11));
        assert_eq!(Region::Content { line: 6 }.row(), Some(12));
        assert_eq!(Region::StatusLine.row(), Some(13));
        assert_eq!(Region::Slew.row(), None);
    }
}
