//! Generic option bags attached to tables, columns and indexes.
//!
//! Keys are case-insensitive. Besides directly set keys, a bag may carry an
//! `option_list` string of the form `key=value,flag,other=value`; keys that
//! are not set directly are looked up there.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

/// Key under which the free-form option list is stored.
pub const OPTION_LIST_KEY: &str = "option_list";

/// A single option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(i64),
    String(String),
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(n: i64) -> Self {
        OptionValue::Number(n)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::String(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::String(s)
    }
}

/// Boolean reading of a textual option: empty, `y...`, `Y...` or a non-zero
/// integer is true.
pub fn parse_bool_text(text: &str) -> bool {
    let text = text.trim();
    text.is_empty()
        || text.starts_with('y')
        || text.starts_with('Y')
        || text.parse::<i64>().map(|n| n != 0).unwrap_or(false)
}

/// Split an option list into `(key, value)` pairs. A bare key has an empty value.
pub fn parse_option_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .filter(|item| !item.trim().is_empty())
        .map(|item| match item.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (item.trim().to_string(), String::new()),
        })
        .collect()
}

/// Case-insensitive key/value bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, OptionValue>", into = "BTreeMap<String, OptionValue>")]
pub struct OptionBag {
    entries: BTreeMap<String, OptionValue>,
}

impl From<BTreeMap<String, OptionValue>> for OptionBag {
    fn from(map: BTreeMap<String, OptionValue>) -> Self {
        let mut bag = OptionBag::default();
        for (k, v) in map {
            bag.set(&k, v);
        }
        bag
    }
}

impl From<OptionBag> for BTreeMap<String, OptionValue> {
    fn from(bag: OptionBag) -> Self {
        bag.entries
    }
}

impl OptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<OptionValue>) {
        self.entries.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directly set value for `key`, ignoring the option list.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(&key.to_ascii_lowercase())
    }

    /// Value for `key` from the option list, if present there.
    fn list_value(&self, key: &str) -> Option<String> {
        if key.eq_ignore_ascii_case(OPTION_LIST_KEY) {
            return None;
        }
        match self.get(OPTION_LIST_KEY) {
            Some(OptionValue::String(list)) => parse_option_list(list)
                .into_iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// String value of `key`, falling back to the option list.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(OptionValue::String(s)) => Some(s.clone()),
            Some(OptionValue::Number(n)) => Some(n.to_string()),
            Some(OptionValue::Bool(b)) => Some(if *b { "1" } else { "0" }.to_string()),
            None => self.list_value(key),
        }
    }

    /// String value of `key`, or `default` when unset.
    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    /// Boolean value of `key`, or `default` when unset.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(OptionValue::Bool(b)) => *b,
            Some(OptionValue::Number(n)) => *n != 0,
            Some(OptionValue::String(s)) => parse_bool_text(s),
            None => self
                .list_value(key)
                .map(|v| parse_bool_text(&v))
                .unwrap_or(default),
        }
    }

    /// Integer value of `key`; `None` when unset or not numeric.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(OptionValue::Number(n)) => Some(*n),
            Some(OptionValue::Bool(b)) => Some(i64::from(*b)),
            Some(OptionValue::String(s)) => s.trim().parse().ok(),
            None => self.list_value(key).and_then(|v| v.trim().parse().ok()),
        }
    }
}

macro_rules! option_set {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub OptionBag);

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn with(self, key: &str, value: impl Into<OptionValue>) -> Self {
                Self(self.0.with(key, value))
            }

            /// String value of `key`, treating an empty string as unset.
            pub fn non_empty(&self, key: &str) -> Option<String> {
                self.0.get_string(key).filter(|s| !s.is_empty())
            }
        }

        impl Deref for $name {
            type Target = OptionBag;

            fn deref(&self) -> &OptionBag {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut OptionBag {
                &mut self.0
            }
        }
    };
}

option_set!(
    /// Options describing an external table (type, file, connection, layout).
    TableOptionSet
);
option_set!(
    /// Options describing one column's external representation.
    FieldOptionSet
);
option_set!(
    /// Options describing how one index is stored.
    IndexOptionSet
);

impl TableOptionSet {
    /// Declared table type, defaulting to `MYSQL` when a source definition is
    /// given, `PROXY` when a target table name is given, `DOS` otherwise.
    pub fn table_type(&self) -> String {
        if let Some(t) = self.non_empty("type") {
            return t.to_ascii_uppercase();
        }
        if self.non_empty("srcdef").is_some() {
            "MYSQL".to_string()
        } else if self.non_empty("tabname").is_some() {
            "PROXY".to_string()
        } else {
            "DOS".to_string()
        }
    }

    pub fn filename(&self) -> Option<String> {
        self.non_empty("filename")
    }

    pub fn tabname(&self) -> Option<String> {
        self.non_empty("tabname")
    }

    pub fn dbname(&self) -> Option<String> {
        self.non_empty("dbname").or_else(|| self.non_empty("database"))
    }

    pub fn connect(&self) -> Option<String> {
        self.non_empty("connect")
    }

    pub fn srcdef(&self) -> Option<String> {
        self.non_empty("srcdef")
    }

    pub fn separator(&self) -> Option<String> {
        self.non_empty("separator")
    }

    pub fn optname(&self) -> Option<String> {
        self.non_empty("optname")
    }

    pub fn lrecl(&self) -> Option<i64> {
        self.get_int("lrecl")
    }

    pub fn elements(&self) -> Option<i64> {
        self.get_int("elements")
    }

    pub fn header(&self) -> Option<i64> {
        self.get_int("header")
    }

    pub fn quoted(&self) -> Option<i64> {
        self.get_int("quoted")
    }

    pub fn ending(&self) -> Option<i64> {
        self.get_int("ending")
    }

    pub fn compressed(&self) -> Option<i64> {
        self.get_int("compressed")
    }

    pub fn multiple(&self) -> Option<i64> {
        self.get_int("multiple")
    }

    pub fn readonly(&self) -> bool {
        self.get_bool("readonly", false)
    }

    /// Whether each index is stored in its own artifact.
    pub fn sepindex(&self) -> bool {
        self.get_bool("sepindex", false)
    }

    pub fn mapped(&self) -> bool {
        self.get_bool("mapped", false)
    }
}

impl FieldOptionSet {
    pub fn offset(&self) -> Option<i64> {
        self.get_int("offset")
    }

    pub fn fldlen(&self) -> Option<i64> {
        self.get_int("fldlen")
    }

    pub fn dateformat(&self) -> Option<String> {
        self.non_empty("dateformat")
    }

    pub fn fieldformat(&self) -> Option<String> {
        self.non_empty("fieldformat")
    }

    /// Name of the synthetic column this field maps to (e.g. `TABID`).
    pub fn special(&self) -> Option<String> {
        self.non_empty("special")
    }
}

impl IndexOptionSet {
    pub fn dynamic(&self) -> bool {
        self.get_bool("dynamic", false)
    }

    pub fn mapped(&self) -> bool {
        self.get_bool("mapped", false)
    }
}
