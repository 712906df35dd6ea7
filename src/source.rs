//! A single detection and its measured parameters
//!
//! A source is a unique integer ID, a display name and a dictionary of
//! named [`Measurement`]s. The detector seeds it with a position (`X`, `Y`,
//! `Z`); mask optimisation and parametrisation add or replace entries.

use std::collections::BTreeMap;

use crate::measurement::Measurement;
use crate::unit::Unit;

#[derive(Debug, Clone, Default)]
pub struct Source {
    id: u32,
    name: String,
    parameters: BTreeMap<String, Measurement>,
}

impl Source {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Insert or replace a parameter, keyed on the measurement's name
    pub fn set_parameter(&mut self, measurement: Measurement) {
        self.parameters
            .insert(measurement.name().to_string(), measurement);
    }

    /// Convenience for a plain value with unit and no uncertainty
    pub fn set_value(&mut self, name: &str, value: f64, unit: Unit) {
        self.set_parameter(Measurement::new(name, value, 0.0, unit));
    }

    pub fn parameter(&self, name: &str) -> Option<&Measurement> {
        self.parameters.get(name)
    }

    /// Value of a named parameter; NaN when the parameter is absent
    pub fn value_of(&self, name: &str) -> f64 {
        self.parameters
            .get(name)
            .map_or(f64::NAN, Measurement::value)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<Measurement> {
        self.parameters.remove(name)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Iterate parameters in lexicographic name order
    pub fn parameters(&self) -> impl Iterator<Item = &Measurement> {
        self.parameters.values()
    }
}
