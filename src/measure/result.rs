use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::Measure;

/// Declared type of a measure's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    String,
    Integer,
    Floating,
    Boolean,
    StringList,
    IntegerList,
    FloatingList,
    BooleanList,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::String => "string",
            ResultType::Integer => "integer",
            ResultType::Floating => "floating",
            ResultType::Boolean => "boolean",
            ResultType::StringList => "string_list",
            ResultType::IntegerList => "integer_list",
            ResultType::FloatingList => "floating_list",
            ResultType::BooleanList => "boolean_list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ResultValue>),
}

impl ResultValue {
    pub fn result_type(&self) -> ResultType {
        match self {
            ResultValue::Bool(_) => ResultType::Boolean,
            ResultValue::Int(_) => ResultType::Integer,
            ResultValue::Float(_) => ResultType::Floating,
            ResultValue::Str(_) => ResultType::String,
            ResultValue::List(items) => match items.first() {
                Some(ResultValue::Bool(_)) => ResultType::BooleanList,
                Some(ResultValue::Int(_)) => ResultType::IntegerList,
                Some(ResultValue::Float(_)) => ResultType::FloatingList,
                _ => ResultType::StringList,
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResultValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ResultValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResultValue::List(items.into_iter().map(|s| ResultValue::Str(s.into())).collect())
    }

    /// Convert into a YAML node for the ir_metadata document.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            ResultValue::Bool(b) => serde_yaml::Value::Bool(*b),
            ResultValue::Int(i) => serde_yaml::Value::Number((*i).into()),
            ResultValue::Float(f) => serde_yaml::Value::Number((*f).into()),
            ResultValue::Str(s) => serde_yaml::Value::String(s.clone()),
            ResultValue::List(items) => {
                serde_yaml::Value::Sequence(items.iter().map(ResultValue::to_yaml).collect())
            }
        }
    }
}

impl From<&str> for ResultValue {
    fn from(value: &str) -> Self {
        ResultValue::Str(value.to_string())
    }
}

impl From<String> for ResultValue {
    fn from(value: String) -> Self {
        ResultValue::Str(value)
    }
}

impl From<bool> for ResultValue {
    fn from(value: bool) -> Self {
        ResultValue::Bool(value)
    }
}

impl From<i64> for ResultValue {
    fn from(value: i64) -> Self {
        ResultValue::Int(value)
    }
}

impl From<f64> for ResultValue {
    fn from(value: f64) -> Self {
        ResultValue::Float(value)
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Bool(b) => write!(f, "{}", b),
            ResultValue::Int(i) => write!(f, "{}", i),
            ResultValue::Float(v) => write!(f, "{}", v),
            ResultValue::Str(s) => f.write_str(s),
            ResultValue::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        ResultValue::Str(s) => write!(f, "{:?}", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// One reported fact. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    source: Measure,
    value: ResultValue,
    #[serde(rename = "type")]
    result_type: ResultType,
}

impl ResultEntry {
    pub fn new(source: Measure, value: impl Into<ResultValue>) -> Self {
        let value = value.into();
        let result_type = value.result_type();
        Self {
            source,
            value,
            result_type,
        }
    }

    pub fn source(&self) -> Measure {
        self.source
    }

    pub fn value(&self) -> &ResultValue {
        &self.value
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }
}

/// Mapping from measure to result entry. Later inserts for the same measure win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    entries: BTreeMap<Measure, ResultEntry>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ResultEntry) {
        self.entries.insert(entry.source(), entry);
    }

    pub fn set(&mut self, measure: Measure, value: impl Into<ResultValue>) {
        self.insert(ResultEntry::new(measure, value));
    }

    /// Absorb `other`; its entries replace ours on conflict.
    pub fn merge(&mut self, other: ResultSet) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, measure: Measure) -> Option<&ResultEntry> {
        self.entries.get(&measure)
    }

    pub fn value(&self, measure: Measure) -> Option<&ResultValue> {
        self.get(measure).map(ResultEntry::value)
    }

    pub fn contains(&self, measure: Measure) -> bool {
        self.entries.contains_key(&measure)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ResultEntry> for ResultSet {
    fn from_iter<T: IntoIterator<Item = ResultEntry>>(iter: T) -> Self {
        let mut set = ResultSet::new();
        for entry in iter {
            set.insert(entry);
        }
        set
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (measure, entry) in &self.entries {
            map.serialize_entry(measure.as_str(), entry)?;
        }
        map.end()
    }
}
