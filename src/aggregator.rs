//! Aggregates out-of-order simulator updates into a consistent page.
//!
//! Updates arrive one variable at a time, in any order. Each is classified
//! by the declarative bindings of the loaded aircraft profile and applied:
//! text regions re-render their page row, indicator bindings yield a
//! [`Directive`] for the caller, and completeness of the required variable
//! set decides when a redraw may be signalled. A partially-filled page is
//! never shown: blank cells fill the gaps until the required set is
//! complete.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
};

use crate::{
    codec::Color,
    config::{
        Action,
        AircraftProfile,
        DisplayBinding,
        Region,
        Trigger,
    },
    device::{
        BrightnessTarget,
        Led,
    },
    page::{
        Cell,
        PAGE_CHARS_PER_LINE,
        PAGE_LINES,
        Page,
    },
    simulator::{
        Value,
        decode_text,
    },
    unit::{
        UnitTranslator,
        UnsupportedUnit,
    },
};

/// Simulator variable naming the aircraft model's author.
pub const AUTHOR_VARIABLE: &str = "sim/aircraft/view/acf_author";

/// Simulator variable naming the aircraft model's ICAO type.
pub const ICAO_VARIABLE: &str = "sim/aircraft/view/acf_ICAO";

/// A resolved runtime action, ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    ExecuteCommand { name: String },
    SetValue { name: String, value: Value },
    ToggleValue { name: String },
    RefreshDisplay,
    SetLed { led: Led, on: bool },
    SetBrightness { target: BrightnessTarget, level: u8 },
    ChangeAircraft,
    ChangeUnit,
}

/// What applying one update asks of the caller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyOutcome {
    /// The page changed and the required set is complete: render.
    pub redraw: bool,
    pub directive: Option<Directive>,
}

/// Variable names to (un)monitor after a unit switch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitSwap {
    pub unmonitor: Vec<String>,
    pub monitor: Vec<String>,
}

/// Owns the received-value state and the model page for one device.
///
/// Exactly one writer mutates this (behind the session's lock); the
/// display task only snapshots the page.
pub struct ReportAggregator {
    profile: Option<Arc<AircraftProfile>>,
    translator: Option<UnitTranslator>,
    active_unit: u8,

    /// Concrete (unit-resolved) variable name -> display binding.
    display: HashMap<String, DisplayBinding>,
    /// Page row -> concrete names rendering into it, in declaration order.
    rows: HashMap<usize, Vec<String>>,
    /// Concrete variable name -> reaction action.
    reactions: HashMap<String, Action>,
    keys: HashMap<(u8, Trigger), Action>,

    received: HashMap<String, Value>,
    required: HashSet<String>,
    all_required: bool,

    page: Page,
}

impl ReportAggregator {
    pub fn new(default_unit: u8) -> Self {
        let mut reactions = HashMap::new();
        // the identity variables are monitored for the whole session, so
        // an aircraft switch is noticed even between profiles
        reactions.insert(AUTHOR_VARIABLE.to_owned(), Action::ChangeAircraft);
        reactions.insert(ICAO_VARIABLE.to_owned(), Action::ChangeAircraft);

        Self {
            profile: None,
            translator: None,
            active_unit: default_unit,
            display: HashMap::new(),
            rows: HashMap::new(),
            reactions,
            keys: HashMap::new(),
            received: HashMap::new(),
            required: HashSet::new(),
            all_required: false,
            page: Page::new(),
        }
    }

    pub fn active_unit(&self) -> u8 {
        self.active_unit
    }

    pub fn has_profile(&self) -> bool {
        self.profile.is_some()
    }

    pub fn profile_name(&self) -> Option<&str> {
        self.profile.as_deref().map(|profile| profile.name.as_str())
    }

    pub fn all_required(&self) -> bool {
        self.all_required
    }

    pub fn required_len(&self) -> usize {
        self.required.len()
    }

    pub fn missing_count(&self) -> usize {
        self.required
            .iter()
            .filter(|name| !self.received.contains_key(*name))
            .count()
    }

    /// Last received text of a variable, if any.
    pub fn text_of(&self, name: &str) -> Option<String> {
        self.received.get(name)?.as_text().map(str::to_owned)
    }

    pub fn page_snapshot(&self) -> Page {
        self.page.clone()
    }

    /// The next unit to switch to, per the profile's declared set.
    pub fn next_unit(&self) -> Option<u8> {
        self.translator.as_ref()?.next_unit(self.active_unit)
    }

    /// Install a profile and build the concrete-name indexes for `unit`.
    ///
    /// Falls back to the profile's first declared unit when the device's
    /// default unit is not in the aircraft's set. Returns the variable
    /// names the caller must monitor.
    pub fn load(&mut self, profile: Arc<AircraftProfile>, unit: u8) -> Vec<String> {
        let translator = UnitTranslator::new(profile.units.iter().copied());
        let unit = if translator.supports(unit) {
            unit
        }
        else {
            let fallback = translator.first_unit().unwrap_or(unit);
            tracing::warn!(
                unit,
                fallback,
                profile = %profile.name,
                "device unit not declared by the profile"
            );
            fallback
        };

        self.profile = Some(profile);
        self.translator = Some(translator);
        self.active_unit = unit;
        self.rebuild_indexes()
    }

    /// Drop the profile-derived state, keeping the identity values.
    ///
    /// Returns the names that should be unmonitored.
    pub fn unload(&mut self) -> Vec<String> {
        let monitored = self.monitored_names();

        self.profile = None;
        self.translator = None;
        self.display.clear();
        self.rows.clear();
        self.keys.clear();
        self.reactions
            .retain(|name, _| name == AUTHOR_VARIABLE || name == ICAO_VARIABLE);
        self.required.clear();
        self.all_required = false;
        self.received
            .retain(|name, _| name == AUTHOR_VARIABLE || name == ICAO_VARIABLE);
        self.page.clear();

        monitored
    }

    /// Forget every received value, e.g. after a simulator reconnect.
    pub fn reset_values(&mut self) {
        self.received.clear();
        self.all_required = false;
        self.page.clear();
    }

    /// Re-index for another unit of the same profile.
    pub fn change_unit(&mut self, unit: u8) -> Result<UnitSwap, UnsupportedUnit> {
        let Some(translator) = &self.translator else {
            return Err(UnsupportedUnit { unit });
        };
        if !translator.supports(unit) {
            return Err(UnsupportedUnit { unit });
        }

        let unmonitor = self.monitored_names();
        self.active_unit = unit;
        // values of the previous unit are stale for the new screen
        self.reset_values();
        let monitor = self.rebuild_indexes();

        Ok(UnitSwap { unmonitor, monitor })
    }

    fn monitored_names(&self) -> Vec<String> {
        self.display
            .keys()
            .chain(
                self.reactions
                    .keys()
                    .filter(|name| *name != AUTHOR_VARIABLE && *name != ICAO_VARIABLE),
            )
            .cloned()
            .collect()
    }

    fn rebuild_indexes(&mut self) -> Vec<String> {
        self.display.clear();
        self.rows.clear();
        self.reactions
            .retain(|name, _| name == AUTHOR_VARIABLE || name == ICAO_VARIABLE);
        self.keys.clear();
        self.required.clear();
        self.all_required = false;
        self.page.clear();

        let Some(profile) = self.profile.clone() else {
            return Vec::new();
        };

        for binding in &profile.display {
            let Some(name) = self.translate(&binding.variable) else {
                continue;
            };
            if let Some(row) = binding.region.row() {
                self.rows.entry(row).or_default().push(name.clone());
            }
            // indicator bindings do not gate completeness of the screen
            if !matches!(
                binding.region,
                Region::Annunciator { .. } | Region::Brightness { .. }
            ) {
                self.required.insert(name.clone());
            }
            self.display.insert(name, binding.clone());
        }

        for reaction in &profile.reactions {
            let Some(name) = self.translate(&reaction.variable) else {
                continue;
            };
            self.reactions.insert(name, reaction.action.clone());
        }

        for key in &profile.keys {
            self.keys.insert((key.key, key.on), key.action.clone());
        }

        self.monitored_names()
    }

    fn translate(&self, template: &str) -> Option<String> {
        match &self.translator {
            Some(translator) => {
                match translator.translate(template, self.active_unit) {
                    Ok(name) => Some(name),
                    Err(error) => {
                        tracing::warn!(%error, template, "cannot address template");
                        None
                    }
                }
            }
            None => Some(template.to_owned()),
        }
    }

    /// Apply one simulator update.
    ///
    /// Updates are applied in arrival order. Unknown variables are dropped
    /// with a debug log; before a profile is loaded that is the expected
    /// fate of everything but the identity variables, and the full set is
    /// re-requested after the profile loads.
    pub fn apply(&mut self, name: &str, value: Value) -> ApplyOutcome {
        let value = self.normalize(name, value);

        let changed = self.received.get(name) != Some(&value);
        self.received.insert(name.to_owned(), value.clone());

        if let Some(binding) = self.display.get(name).cloned() {
            self.route(&binding, &value);

            let directive = match binding.region {
                Region::Annunciator { led } => {
                    Some(Directive::SetLed {
                        led,
                        on: value.is_on(),
                    })
                }
                Region::Brightness { target } => {
                    Some(Directive::SetBrightness {
                        target,
                        level: value.as_number().unwrap_or(0.0).clamp(0.0, 255.0) as u8,
                    })
                }
                _ => None,
            };

            let was_complete = self.all_required;
            if !self.all_required
                && !self.required.is_empty()
                && self
                    .required
                    .iter()
                    .all(|required| self.received.contains_key(required))
            {
                self.all_required = true;
                tracing::debug!(
                    count = self.required.len(),
                    "all required display variables received"
                );
            }

            ApplyOutcome {
                redraw: self.all_required && (changed || !was_complete),
                directive,
            }
        }
        else if let Some(action) = self.reactions.get(name).cloned() {
            ApplyOutcome {
                redraw: false,
                directive: self.runtime_directive(&action, &value),
            }
        }
        else {
            tracing::debug!(name, "update for unbound variable dropped");
            ApplyOutcome::default()
        }
    }

    /// Resolve a key event through the profile's key bindings.
    pub fn key_directive(&self, key: u8, pressed: bool) -> Option<Directive> {
        let trigger = if pressed { Trigger::Press } else { Trigger::Release };
        let action = self.keys.get(&(key, trigger))?;
        self.runtime_directive(action, &Value::Number(pressed as u8 as f64))
    }

    fn runtime_directive(&self, action: &Action, value: &Value) -> Option<Directive> {
        match action {
            Action::ExecuteCommand { command } => {
                Some(Directive::ExecuteCommand {
                    name: self.translate(command)?,
                })
            }
            Action::SetValue { variable, value } => {
                Some(Directive::SetValue {
                    name: self.translate(variable)?,
                    value: Value::Number(*value),
                })
            }
            Action::ToggleValue { variable } => {
                Some(Directive::ToggleValue {
                    name: self.translate(variable)?,
                })
            }
            Action::RefreshDisplay => Some(Directive::RefreshDisplay),
            Action::SetLed { led } => {
                Some(Directive::SetLed {
                    led: *led,
                    on: value.is_on(),
                })
            }
            Action::SetBrightness { target } => {
                Some(Directive::SetBrightness {
                    target: *target,
                    level: value.as_number().unwrap_or(0.0).clamp(0.0, 255.0) as u8,
                })
            }
            Action::ChangeAircraft => Some(Directive::ChangeAircraft),
            Action::ChangeUnit => Some(Directive::ChangeUnit),
        }
    }

    fn normalize(&self, name: &str, value: Value) -> Value {
        let Value::Bytes(raw) = value else {
            return value;
        };
        let declared = self
            .profile
            .as_deref()
            .and_then(|profile| profile.encoding.as_deref());
        match decode_text(&raw, declared) {
            Some(text) => Value::Text(text),
            None => {
                tracing::warn!(name, "cannot decode byte value, keeping raw bytes");
                Value::Bytes(raw)
            }
        }
    }

    fn route(&mut self, binding: &DisplayBinding, value: &Value) {
        match binding.region {
            Region::Title
            | Region::Label { .. }
            | Region::Content { .. }
            | Region::StatusLine => {
                if let Some(row) = binding.region.row() {
                    self.render_row(row);
                }
            }
            Region::Slew => self.render_slew(value),
            // indicator regions are handled as directives by the caller
            Region::Annunciator { .. } | Region::Brightness { .. } => {}
        }
    }

    /// Re-render one page row from every binding that targets it.
    ///
    /// Variants of the same region (large and small font renditions, for
    /// instance) merge with first-non-blank-wins semantics, in profile
    /// declaration order.
    fn render_row(&mut self, row: usize) {
        let Some(names) = self.rows.get(&row).cloned() else {
            return;
        };

        let mut merged = Page::new();
        for name in names {
            let Some(binding) = self.display.get(&name) else {
                continue;
            };
            let Some(text) = self.received.get(&name).and_then(Value::as_text) else {
                continue;
            };
            let text = sanitize(text);

            let mut layer = Page::new();
            layer.write_line(
                row,
                0,
                &text,
                binding.color.unwrap_or_default(),
                binding.small,
            );
            merged.overlay(&layer);
        }
        self.page.copy_line(row, &merged);
    }

    /// Vertical-slew arrows in the lower right corner: 1 shows both, 2 the
    /// up arrow, 3 the down arrow.
    fn render_slew(&mut self, value: &Value) {
        let key = value.as_number().unwrap_or(0.0) as i64;
        let row = PAGE_LINES - 1;

        let up = if key == 1 || key == 2 { '↑' } else { ' ' };
        let down = if key == 1 || key == 3 { '↓' } else { ' ' };
        self.page.set(
            row,
            PAGE_CHARS_PER_LINE - 2,
            Cell {
                ch: up,
                color: Color::White,
                small: false,
            },
        );
        self.page.set(
            row,
            PAGE_CHARS_PER_LINE - 1,
            Cell {
                ch: down,
                color: Color::White,
                small: false,
            },
        );
    }
}

/// Map simulator text conventions onto the device's glyph set.
fn sanitize(text: &str) -> String {
    text.chars()
        .take(PAGE_CHARS_PER_LINE)
        .map(|ch| if ch == '`' { '°' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AircraftKey,
        KeyBinding,
        ReactionBinding,
    };

    fn profile() -> Arc<AircraftProfile> {
        Arc::new(AircraftProfile {
            name: "Test Airbus".into(),
            aircraft: vec![AircraftKey::new("Test Author", "A339")],
            units: vec![1, 2],
            encoding: Some("ascii".into()),
            display: vec![
                DisplayBinding {
                    variable: "tst/MCDU{unit}/title".into(),
                    region: Region::Title,
                    color: None,
                    small: false,
                },
                DisplayBinding {
                    variable: "tst/MCDU{unit}/stitle".into(),
                    region: Region::Title,
                    color: Some(Color::Cyan),
                    small: true,
                },
                DisplayBinding {
                    variable: "tst/MCDU{unit}/label1".into(),
                    region: Region::Label { line: 1 },
                    color: Some(Color::White),
                    small: true,
                },
                DisplayBinding {
                    variable: "tst/MCDU{unit}/cont1".into(),
                    region: Region::Content { line: 1 },
                    color: Some(Color::Green),
                    small: false,
                },
                DisplayBinding {
                    variable: "tst/MCDU{unit}/sp".into(),
                    region: Region::StatusLine,
                    color: Some(Color::Amber),
                    small: false,
                },
                DisplayBinding {
                    variable: "tst/MCDU{unit}/rdy".into(),
                    region: Region::Annunciator { led: Led::Rdy },
                    color: None,
                    small: false,
                },
            ],
            keys: vec![
                KeyBinding {
                    key: 0,
                    on: Trigger::Press,
                    action: Action::ExecuteCommand {
                        command: "tst/MCDU{unit}/lsk1l".into(),
                    },
                },
                KeyBinding {
                    key: 9,
                    on: Trigger::Press,
                    action: Action::ChangeUnit,
                },
            ],
            reactions: vec![ReactionBinding {
                variable: "tst/brightness".into(),
                action: Action::SetBrightness {
                    target: BrightnessTarget::ScreenBacklight,
                },
            }],
        })
    }

    fn loaded() -> (ReportAggregator, Vec<String>) {
        let mut aggregator = ReportAggregator::new(1);
        let names = aggregator.load(profile(), 1);
        (aggregator, names)
    }

    #[test]
    fn load_resolves_unit_placeholders() {
        let (aggregator, names) = loaded();
        assert!(names.contains(&"tst/MCDU1/title".to_owned()));
        assert!(names.contains(&"tst/brightness".to_owned()));
        assert_eq!(aggregator.required_len(), 5);
        assert_eq!(aggregator.active_unit(), 1);
    }

    #[test]
    fn completeness_requires_every_display_variable() {
        let (mut aggregator, _) = loaded();

        let names = [
            "tst/MCDU1/title",
            "tst/MCDU1/stitle",
            "tst/MCDU1/label1",
            "tst/MCDU1/cont1",
        ];
        for name in names {
            let outcome = aggregator.apply(name, Value::from("X"));
            assert!(!outcome.redraw, "{name} should not complete the set");
        }
        assert!(!aggregator.all_required());

        // the fifth text variable completes the set; the annunciator
        // binding was never part of it
        let outcome = aggregator.apply("tst/MCDU1/sp", Value::from("READY"));
        assert!(aggregator.all_required());
        assert!(outcome.redraw);
    }

    #[test]
    fn completing_update_signals_exactly_once_when_repeated() {
        let (mut aggregator, _) = loaded();
        for name in [
            "tst/MCDU1/title",
            "tst/MCDU1/stitle",
            "tst/MCDU1/label1",
            "tst/MCDU1/cont1",
        ] {
            aggregator.apply(name, Value::from("X"));
        }

        let first = aggregator.apply("tst/MCDU1/sp", Value::from("READY"));
        let second = aggregator.apply("tst/MCDU1/sp", Value::from("READY"));
        assert!(first.redraw);
        assert!(!second.redraw, "identical repeat must not signal again");

        // but an actual change after completeness does
        let third = aggregator.apply("tst/MCDU1/sp", Value::from("DONE"));
        assert!(third.redraw);
    }

    #[test]
    fn title_variants_merge_with_first_non_blank_wins() {
        let (mut aggregator, _) = loaded();
        aggregator.apply("tst/MCDU1/title", Value::from("INIT    "));
        aggregator.apply("tst/MCDU1/stitle", Value::from("     9/9"));

        let page = aggregator.page_snapshot();
        assert_eq!(&page.line_text(0)[..8], "INIT 9/9");
        assert_eq!(page.get(0, 0).map(|c| c.color), Some(Color::White));
        assert_eq!(page.get(0, 5).map(|c| c.color), Some(Color::Cyan));
        assert_eq!(page.get(0, 5).map(|c| c.small), Some(true));
    }

    #[test]
    fn byte_values_decode_with_the_declared_encoding() {
        let (mut aggregator, _) = loaded();
        aggregator.apply("tst/MCDU1/title", Value::Bytes(b"INIT\x00\x00".to_vec()));
        assert_eq!(aggregator.text_of("tst/MCDU1/title").as_deref(), Some("INIT"));
        assert_eq!(&aggregator.page_snapshot().line_text(0)[..4], "INIT");
    }

    #[test]
    fn indicator_bindings_yield_device_directives() {
        let (mut aggregator, _) = loaded();
        let outcome = aggregator.apply("tst/MCDU1/rdy", Value::Number(1.0));
        assert!(!outcome.redraw);
        assert_eq!(
            outcome.directive,
            Some(Directive::SetLed {
                led: Led::Rdy,
                on: true,
            })
        );

        let outcome = aggregator.apply("tst/brightness", Value::Number(200.0));
        assert_eq!(
            outcome.directive,
            Some(Directive::SetBrightness {
                target: BrightnessTarget::ScreenBacklight,
                level: 200,
            })
        );
    }

    #[test]
    fn updates_before_any_profile_are_dropped() {
        let mut aggregator = ReportAggregator::new(1);
        let outcome = aggregator.apply("tst/MCDU1/title", Value::from("X"));
        assert_eq!(outcome, ApplyOutcome::default());

        // except the identity variables, which always react
        let outcome = aggregator.apply(ICAO_VARIABLE, Value::from("A339"));
        assert_eq!(outcome.directive, Some(Directive::ChangeAircraft));
        assert_eq!(aggregator.text_of(ICAO_VARIABLE).as_deref(), Some("A339"));
    }

    #[test]
    fn key_directives_translate_for_the_active_unit() {
        let (mut aggregator, _) = loaded();
        assert_eq!(
            aggregator.key_directive(0, true),
            Some(Directive::ExecuteCommand {
                name: "tst/MCDU1/lsk1l".into(),
            })
        );
        assert_eq!(aggregator.key_directive(0, false), None);
        assert_eq!(aggregator.key_directive(9, true), Some(Directive::ChangeUnit));

        let swap = aggregator.change_unit(2).expect("unit 2");
        assert!(swap.unmonitor.contains(&"tst/MCDU1/title".to_owned()));
        assert!(swap.monitor.contains(&"tst/MCDU2/title".to_owned()));
        assert_eq!(
            aggregator.key_directive(0, true),
            Some(Directive::ExecuteCommand {
                name: "tst/MCDU2/lsk1l".into(),
            })
        );
    }

    #[test]
    fn change_unit_rejects_undeclared_units() {
        let (mut aggregator, _) = loaded();
        assert!(aggregator.change_unit(4).is_err());
    }

    #[test]
    fn unload_keeps_identity_reactions_only() {
        let (mut aggregator, _) = loaded();
        aggregator.apply("tst/MCDU1/title", Value::from("X"));
        aggregator.apply(ICAO_VARIABLE, Value::from("A339"));

        let unmonitor = aggregator.unload();
        assert!(unmonitor.contains(&"tst/MCDU1/title".to_owned()));
        assert!(!unmonitor.contains(&ICAO_VARIABLE.to_owned()));
        assert!(!aggregator.has_profile());
        assert_eq!(aggregator.text_of(ICAO_VARIABLE).as_deref(), Some("A339"));
        assert_eq!(aggregator.text_of("tst/MCDU1/title"), None);
    }
}
