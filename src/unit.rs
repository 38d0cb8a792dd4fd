//! Rewrites variable/command name templates to address a physical MCDU
//! unit (captain, first officer, observer).

use std::collections::BTreeSet;

/// Placeholder inside name templates that stands for the unit number.
pub const UNIT_PLACEHOLDER: &str = "{unit}";

/// Error for a unit id the aircraft does not declare.
///
/// Sending a malformed variable name to the simulator is worse than
/// failing loud, so this is an explicit error rather than a fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("MCDU unit {unit} is not declared by the aircraft profile")]
pub struct UnsupportedUnit {
    pub unit: u8,
}

/// Pure string rewriter for the aircraft's unit-naming convention.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitTranslator {
    units: BTreeSet<u8>,
}

impl UnitTranslator {
    pub fn new(units: impl IntoIterator<Item = u8>) -> Self {
        Self {
            units: units.into_iter().collect(),
        }
    }

    pub fn supports(&self, unit: u8) -> bool {
        self.units.contains(&unit)
    }

    pub fn units(&self) -> impl Iterator<Item = u8> + '_ {
        self.units.iter().copied()
    }

    /// First declared unit, used when the device's default unit is not in
    /// the aircraft's set.
    pub fn first_unit(&self) -> Option<u8> {
        self.units.first().copied()
    }

    /// The next declared unit after `current`, wrapping around; `None`
    /// when there is nothing to switch to.
    pub fn next_unit(&self, current: u8) -> Option<u8> {
        if self.units.len() < 2 {
            return None;
        }
        self.units
            .range(current.saturating_add(1)..)
            .next()
            .or_else(|| self.units.first())
            .copied()
    }

    /// Rewrite `template` for `unit`.
    ///
    /// Total for every declared unit; templates without the placeholder
    /// pass through unchanged.
    pub fn translate(&self, template: &str, unit: u8) -> Result<String, UnsupportedUnit> {
        if !self.supports(unit) {
            return Err(UnsupportedUnit { unit });
        }
        Ok(template.replace(UNIT_PLACEHOLDER, &unit.to_string()))
    }
}
