// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Unit tables for option parsing and report formatting.
//!
//! Internal units are millimetres, cubic millimetres and grams.

use crate::error::{QaError, QaResult};
use serde::{Deserialize, Serialize};

/// Which physical quantity a unit measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Length,
    Volume,
    Mass,
}

/// A named unit and its factor to the internal unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub name: &'static str,
    pub factor: f64,
}

const fn unit(factor: f64, name: &'static str) -> Unit {
    Unit { name, factor }
}

/// Length units, factors to millimetres. First entry is the default.
pub const LENGTH_UNITS: &[Unit] = &[
    unit(1.0, "mm"),
    unit(1.0e-7, "angstrom"),
    unit(1.0e-6, "nm"),
    unit(1.0e-3, "um"),
    unit(1.0e-3, "micron"),
    unit(1.0, "millimeter"),
    unit(10.0, "cm"),
    unit(10.0, "centimeter"),
    unit(1000.0, "m"),
    unit(1000.0, "meter"),
    unit(1.0e6, "km"),
    unit(25.4, "in"),
    unit(25.4, "inch"),
    unit(25.4, "inches"),
    unit(304.8, "ft"),
    unit(304.8, "foot"),
    unit(304.8, "feet"),
    unit(914.4, "yd"),
    unit(914.4, "yard"),
    unit(1_609_344.0, "mi"),
    unit(1_609_344.0, "mile"),
];

/// Volume units, factors to cubic millimetres.
pub const VOLUME_UNITS: &[Unit] = &[
    unit(1.0, "cu mm"),
    unit(1.0, "mm"),
    unit(1.0, "mm^3"),
    unit(1.0e3, "cm"),
    unit(1.0e3, "cm^3"),
    unit(1.0e3, "cu cm"),
    unit(1.0e3, "cc"),
    unit(1.0e6, "l"),
    unit(1.0e6, "liter"),
    unit(1.0e6, "litre"),
    unit(1.0e9, "m"),
    unit(1.0e9, "m^3"),
    unit(1.0e9, "cu m"),
    unit(16387.064, "in"),
    unit(16387.064, "in^3"),
    unit(16387.064, "cu in"),
    unit(28_316_846.592, "ft"),
    unit(28_316_846.592, "ft^3"),
    unit(28_316_846.592, "cu ft"),
];

/// Mass units, factors to grams.
pub const MASS_UNITS: &[Unit] = &[
    unit(1.0, "grams"),
    unit(1.0, "g"),
    unit(0.0648, "gr"),
    unit(0.0648, "grains"),
    unit(1.0e3, "kg"),
    unit(1.0e3, "kilos"),
    unit(1.0e3, "kilograms"),
    unit(28.35, "oz"),
    unit(28.35, "ounce"),
    unit(453.6, "lb"),
    unit(453.6, "lbs"),
];

impl UnitKind {
    pub fn table(self) -> &'static [Unit] {
        match self {
            UnitKind::Length => LENGTH_UNITS,
            UnitKind::Volume => VOLUME_UNITS,
            UnitKind::Mass => MASS_UNITS,
        }
    }

    pub fn default_unit(self) -> Unit {
        self.table()[0]
    }
}

/// Find a unit by name, case-sensitive like the tables
pub fn lookup(kind: UnitKind, name: &str) -> Option<Unit> {
    let name = name.trim();
    kind.table().iter().copied().find(|u| u.name == name)
}

/// Parse a quantity such as `"5"`, `"5mm"` or `"0.5 cu cm"` into internal units.
///
/// A bare number is taken to be in the internal unit.
pub fn parse_quantity(text: &str, kind: UnitKind) -> QaResult<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .unwrap_or(text.len());

    let (number, suffix) = text.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| QaError::invalid_config(format!("cannot parse quantity {text:?}")))?;

    let suffix = suffix.trim();
    if suffix.is_empty() {
        return Ok(value);
    }

    lookup(kind, suffix)
        .map(|u| value * u.factor)
        .ok_or_else(|| QaError::invalid_config(format!("unknown {kind:?} unit {suffix:?}")))
}

/// Units used when printing a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportUnits {
    pub length: String,
    pub volume: String,
    pub mass: String,
}

impl Default for ReportUnits {
    fn default() -> Self {
        Self {
            length: UnitKind::Length.default_unit().name.to_string(),
            volume: UnitKind::Volume.default_unit().name.to_string(),
            mass: UnitKind::Mass.default_unit().name.to_string(),
        }
    }
}

impl ReportUnits {
    /// Parse a `"length,volume,mass"` triple; empty fields keep defaults.
    pub fn parse(spec: &str) -> QaResult<Self> {
        let mut units = Self::default();
        let mut fields = spec.split(',').map(str::trim);

        for (kind, slot) in [
            (UnitKind::Length, &mut units.length),
            (UnitKind::Volume, &mut units.volume),
            (UnitKind::Mass, &mut units.mass),
        ] {
            match fields.next() {
                Some(name) if !name.is_empty() => {
                    let unit = lookup(kind, name).ok_or_else(|| {
                        QaError::invalid_config(format!("unknown {kind:?} unit {name:?}"))
                    })?;
                    *slot = unit.name.to_string();
                }
                _ => {}
            }
        }

        Ok(units)
    }

    pub fn resolve(&self, kind: UnitKind) -> Unit {
        let name = match kind {
            UnitKind::Length => &self.length,
            UnitKind::Volume => &self.volume,
            UnitKind::Mass => &self.mass,
        };
        lookup(kind, name).unwrap_or_else(|| kind.default_unit())
    }

    /// Convert an internal value into the report unit
    pub fn scale(&self, kind: UnitKind, value: f64) -> f64 {
        value / self.resolve(kind).factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_quantity() {
        assert_relative_eq!(parse_quantity("5", UnitKind::Length).unwrap(), 5.0);
        assert_relative_eq!(parse_quantity("2cm", UnitKind::Length).unwrap(), 20.0);
        assert_relative_eq!(parse_quantity("1 in", UnitKind::Length).unwrap(), 25.4);
        assert_relative_eq!(parse_quantity("0.5 cu cm", UnitKind::Volume).unwrap(), 500.0);
        assert_relative_eq!(parse_quantity("2 kg", UnitKind::Mass).unwrap(), 2000.0);
    }

    #[test]
    fn test_parse_quantity_rejects_unknown_unit() {
        assert!(parse_quantity("3 parsecs", UnitKind::Length).is_err());
        assert!(parse_quantity("abc", UnitKind::Length).is_err());
    }

    #[test]
    fn test_report_units() {
        let units = ReportUnits::parse("cm,,kg").unwrap();
        assert_eq!(units.length, "cm");
        assert_eq!(units.volume, "cu mm");
        assert_eq!(units.mass, "kg");
        assert_relative_eq!(units.scale(UnitKind::Mass, 1500.0), 1.5);
        assert!(ReportUnits::parse("furlong").is_err());
    }
}
