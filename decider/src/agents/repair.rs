//! Field-level repair between raw backend output and typed stage outputs.
//!
//! Each field is read on its own. A missing, ill-typed, out-of-enum or out-of-range field
//! takes the caller's neutral default and its name is recorded, so a stage always ends up
//! with a complete record instead of failing on the first bad field.

use std::ops::RangeInclusive;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Markers some models emit instead of leaving a field empty.
const PLACEHOLDER_MARKERS: [&str; 3] = ["[skip]", "n/a", "null"];

pub(crate) struct Repair<'a> {
    raw: Option<&'a Map<String, Value>>,
    repaired: Vec<String>,
}

impl<'a> Repair<'a> {
    pub(crate) fn new(raw: &'a Value) -> Self {
        Self {
            raw: raw.as_object(),
            repaired: Vec::new(),
        }
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        self.raw.and_then(|obj| obj.get(name))
    }

    fn mark(&mut self, name: &str) {
        self.repaired.push(name.to_string());
    }

    pub(crate) fn bool(&mut self, name: &str, default: bool) -> bool {
        match self.field(name).and_then(Value::as_bool) {
            Some(value) => value,
            None => {
                self.mark(name);
                default
            }
        }
    }

    pub(crate) fn int_in(&mut self, name: &str, range: RangeInclusive<u8>, default: u8) -> u8 {
        let parsed = self
            .field(name)
            .and_then(Value::as_i64)
            .and_then(|raw| u8::try_from(raw).ok())
            .filter(|value| range.contains(value));
        match parsed {
            Some(value) => value,
            None => {
                self.mark(name);
                default
            }
        }
    }

    pub(crate) fn text(&mut self, name: &str, default: &str) -> String {
        match self.field(name).and_then(Value::as_str).and_then(clean) {
            Some(text) => text,
            None => {
                self.mark(name);
                default.to_string()
            }
        }
    }

    /// String list; non-string and placeholder items are dropped (and the field marked).
    pub(crate) fn text_list(&mut self, name: &str) -> Vec<String> {
        let Some(items) = self.field(name).and_then(Value::as_array) else {
            self.mark(name);
            return Vec::new();
        };
        let cleaned: Vec<String> = items
            .iter()
            .filter_map(|item| item.as_str().and_then(clean))
            .collect();
        if cleaned.len() != items.len() {
            self.mark(name);
        }
        cleaned
    }

    /// Enum-valued field decoded through serde, so the accepted set matches the type.
    pub(crate) fn choice<T: DeserializeOwned>(&mut self, name: &str, default: T) -> T {
        match self
            .field(name)
            .and_then(|value| serde_json::from_value::<T>(value.clone()).ok())
        {
            Some(value) => value,
            None => {
                self.mark(name);
                default
            }
        }
    }

    /// Nullable enum field; an explicit `null` is a valid answer.
    pub(crate) fn optional_choice<T: DeserializeOwned>(&mut self, name: &str) -> Option<T> {
        match self.field(name) {
            Some(Value::Null) => None,
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    self.mark(name);
                    None
                }
            },
            None => {
                self.mark(name);
                None
            }
        }
    }

    /// Array of records; items that do not decode are dropped (and the field marked).
    pub(crate) fn records<T: DeserializeOwned>(&mut self, name: &str) -> Vec<T> {
        let Some(items) = self.field(name).and_then(Value::as_array) else {
            self.mark(name);
            return Vec::new();
        };
        let decoded: Vec<T> = items
            .iter()
            .filter_map(|item| serde_json::from_value::<T>(item.clone()).ok())
            .collect();
        if decoded.len() != items.len() {
            self.mark(name);
        }
        decoded
    }

    /// Names of every field that fell back to its default, in read order.
    pub(crate) fn finish(self) -> Vec<String> {
        self.repaired
    }
}

fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty()
        || PLACEHOLDER_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        return None;
    }
    Some(trimmed.to_string())
}
