//! Value tree held by tracked objects.
//!
//! Compound variants keep their payload behind an `Arc`, so cloning a value is a
//! structural copy that shares children. Writers go through the `*_mut`
//! accessors, which use `Arc::make_mut` and therefore copy a shared payload
//! before touching it. `deep_clone` produces a value that shares nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A value stored under a key of a tracked object.
///
/// # Examples
///
/// ```
/// use membrane::Value;
///
/// let account = Value::record([("balance", Value::Int(1000))]);
/// let copy = account.clone();
///
/// assert_eq!(account, copy);
/// assert!(account.shares_structure(&copy));
/// assert!(!account.deep_clone().shares_structure(&account));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Regex(RegexValue),
    List(Arc<Vec<Value>>),
    /// Plain string-keyed structure.
    Record(Arc<BTreeMap<String, Value>>),
    /// Keyed collection with arbitrary keys, in insertion order.
    Map(Arc<Vec<(Value, Value)>>),
    /// Duplicate-free collection, in insertion order.
    Set(Arc<Vec<Value>>),
}

impl Value {
    /// Builds a list value.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::List(Arc::new(items.into_iter().collect()))
    }

    /// Builds a record value from string-keyed fields.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Record(Arc::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Builds a keyed collection. A repeated key overwrites the earlier entry in place.
    pub fn map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let mut out: Vec<(Value, Value)> = Vec::new();
        for (key, value) in entries {
            match out.iter_mut().find(|(k, _)| k.same_value(&key)) {
                Some(slot) => slot.1 = value,
                None => out.push((key, value)),
            }
        }
        Self::Map(Arc::new(out))
    }

    /// Builds a set, dropping duplicates while keeping first-seen order.
    pub fn set<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut out: Vec<Value> = Vec::new();
        for item in items {
            if !out.iter().any(|existing| existing.same_value(&item)) {
                out.push(item);
            }
        }
        Self::Set(Arc::new(out))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_compound(&self) -> bool {
        matches!(
            self,
            Self::List(_) | Self::Record(_) | Self::Map(_) | Self::Set(_)
        )
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_regex(&self) -> Option<&RegexValue> {
        match self {
            Self::Regex(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Record(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Map(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[Value]> {
        match self {
            Self::Set(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Mutable access to a list, copying the payload first if it is shared.
    pub fn list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::List(v) => Some(Arc::make_mut(v)),
            _ => None,
        }
    }

    /// Mutable access to a record, copying the payload first if it is shared.
    pub fn record_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Self::Record(v) => Some(Arc::make_mut(v)),
            _ => None,
        }
    }

    /// Looks up a field of a record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(name))
    }

    /// Looks up an entry of a keyed collection.
    pub fn lookup(&self, key: &Value) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.same_value(key))
            .map(|(_, v)| v)
    }

    /// Returns true if a set contains `item`.
    pub fn contains(&self, item: &Value) -> bool {
        self.as_set()
            .is_some_and(|items| items.iter().any(|v| v.same_value(item)))
    }

    /// Recursively copies every compound payload so the result shares no
    /// allocation with `self`.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        match self {
            Self::List(items) => Self::List(Arc::new(items.iter().map(Self::deep_clone).collect())),
            Self::Record(fields) => Self::Record(Arc::new(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            )),
            Self::Map(entries) => Self::Map(Arc::new(
                entries
                    .iter()
                    .map(|(k, v)| (k.deep_clone(), v.deep_clone()))
                    .collect(),
            )),
            Self::Set(items) => Self::Set(Arc::new(items.iter().map(Self::deep_clone).collect())),
            scalar => scalar.clone(),
        }
    }

    /// Returns true if both values are compounds backed by the same allocation.
    ///
    /// Scalars never share structure.
    pub fn shares_structure(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) | (Self::Set(a), Self::Set(b)) => Arc::ptr_eq(a, b),
            (Self::Record(a), Self::Record(b)) => Arc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural equality with same-value float semantics: `NaN` equals `NaN`
    /// and `0.0` differs from `-0.0`.
    ///
    /// This is the comparison used for change detection; unlike `==` it never
    /// reports a value as different from an unchanged copy of itself.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::List(a), Self::List(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_value(y)))
            }
            // Sets and maps hold unique members, so equal length plus membership
            // is equality regardless of insertion order.
            (Self::Set(a), Self::Set(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.same_value(y))))
            }
            (Self::Record(a), Self::Record(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter()
                            .zip(b.iter())
                            .all(|((ka, va), (kb, vb))| ka == kb && va.same_value(vb)))
            }
            (Self::Map(a), Self::Map(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter().all(|(ka, va)| {
                            b.iter()
                                .find(|(kb, _)| ka.same_value(kb))
                                .is_some_and(|(_, vb)| va.same_value(vb))
                        }))
            }
            (a, b) => a == b,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Regex(_) => "regex",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Regex(v) => write!(f, "{v}"),
            Self::List(v) => write!(f, "list[{}]", v.len()),
            Self::Record(v) => write!(f, "record{{{}}}", v.len()),
            Self::Map(v) => write!(f, "map[{}]", v.len()),
            Self::Set(v) => write!(f, "set[{}]", v.len()),
        }
    }
}

/// A regular expression value: source text plus flags.
///
/// Flags follow the familiar single-letter convention: `i` (case-insensitive),
/// `m` (multi-line), `s` (dot matches newline), `x` (verbose), plus `g` and `u`
/// which are accepted and carried but do not change matching.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "RegexParts", into = "RegexParts")]
pub struct RegexValue {
    source: String,
    flags: String,
    compiled: regex::Regex,
}

#[derive(Serialize, Deserialize)]
struct RegexParts {
    source: String,
    flags: String,
}

impl RegexValue {
    /// Compiles a regex value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnsupportedRegexFlag` for an unknown flag and
    /// `ValidationError::InvalidRegex` if the source does not compile.
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Result<Self, ValidationError> {
        let source = source.into();
        let flags = flags.into();

        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' | 'x' => {
                    if !inline.contains(flag) {
                        inline.push(flag);
                    }
                }
                'g' | 'u' => {}
                other => return Err(ValidationError::UnsupportedRegexFlag { flag: other }),
            }
        }

        let pattern = if inline.is_empty() {
            source.clone()
        } else {
            format!("(?{inline}){source}")
        };

        let compiled = regex::Regex::new(&pattern).map_err(|e| ValidationError::InvalidRegex {
            source_text: source.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source,
            flags,
            compiled,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Returns true if the expression matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.flags == other.flags
    }
}

impl fmt::Debug for RegexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexValue")
            .field("source", &self.source)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RegexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

impl TryFrom<RegexParts> for RegexValue {
    type Error = ValidationError;

    fn try_from(parts: RegexParts) -> Result<Self, Self::Error> {
        Self::new(parts.source, parts.flags)
    }
}

impl From<RegexValue> for RegexParts {
    fn from(value: RegexValue) -> Self {
        Self {
            source: value.source,
            flags: value.flags,
        }
    }
}

// Convenient From implementations
impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<RegexValue> for Value {
    fn from(v: RegexValue) -> Self {
        Self::Regex(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(Arc::new(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert!(Value::Null.is_null());
        assert!(Value::Bool(true).as_int().is_none());
    }

    #[test]
    fn test_clone_shares_and_deep_clone_copies() {
        let nested = Value::record([("inner", Value::list([Value::Int(1), Value::Int(2)]))]);
        let shallow = nested.clone();
        assert!(nested.shares_structure(&shallow));

        let deep = nested.deep_clone();
        assert!(!nested.shares_structure(&deep));
        assert!(!nested
            .field("inner")
            .unwrap()
            .shares_structure(deep.field("inner").unwrap()));
        assert_eq!(nested, deep);
    }

    #[test]
    fn test_copy_on_write_leaves_original_untouched() {
        let original = Value::record([("count", Value::Int(1))]);
        let mut copy = original.clone();
        copy.record_mut()
            .unwrap()
            .insert("count".to_string(), Value::Int(2));

        assert_eq!(original.field("count"), Some(&Value::Int(1)));
        assert_eq!(copy.field("count"), Some(&Value::Int(2)));
        assert!(!original.shares_structure(&copy));
    }

    #[test]
    fn test_same_value_semantics() {
        assert!(Value::Float(f64::NAN).same_value(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).same_value(&Value::Float(-0.0)));

        let a = Value::list([Value::Int(1), Value::record([("x", Value::Null)])]);
        assert!(a.same_value(&a.deep_clone()));
        assert!(!a.same_value(&Value::list([Value::Int(1)])));
    }

    #[test]
    fn test_same_value_ignores_set_and_map_order() {
        let set = Value::set([Value::Int(1), Value::Int(2)]);
        assert!(set.same_value(&Value::set([Value::Int(2), Value::Int(1)])));
        assert!(!set.same_value(&Value::set([Value::Int(1), Value::Int(3)])));

        let map = Value::map([(Value::Int(1), Value::from("a")), (Value::Int(2), Value::from("b"))]);
        assert!(map.same_value(&Value::map([
            (Value::Int(2), Value::from("b")),
            (Value::Int(1), Value::from("a")),
        ])));
        assert!(!map.same_value(&Value::map([
            (Value::Int(2), Value::from("a")),
            (Value::Int(1), Value::from("b")),
        ])));

        // Lists stay order-sensitive.
        assert!(!Value::list([Value::Int(1), Value::Int(2)]).same_value(&Value::list([Value::Int(2), Value::Int(1)])));
    }

    #[test]
    fn test_map_and_set_keep_insertion_order() {
        let map = Value::map([
            (Value::Int(2), Value::from("two")),
            (Value::Int(1), Value::from("one")),
            (Value::Int(2), Value::from("deux")),
        ]);
        let entries = map.as_map().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, Value::Int(2));
        assert_eq!(map.lookup(&Value::Int(2)), Some(&Value::from("deux")));

        let set = Value::set([Value::Int(3), Value::Int(1), Value::Int(3)]);
        assert_eq!(set.as_set().unwrap(), &[Value::Int(3), Value::Int(1)]);
        assert!(set.contains(&Value::Int(1)));
        assert!(!set.contains(&Value::Int(2)));
    }

    #[test]
    fn test_regex_value_flags() {
        let re = RegexValue::new("^ab+c$", "i").unwrap();
        assert!(re.is_match("ABBC"));
        assert_eq!(format!("{re}"), "/^ab+c$/i");

        let err = RegexValue::new("a", "y").unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedRegexFlag { flag: 'y' }));

        let err = RegexValue::new("(", "").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRegex { .. }));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::from("hi")), "\"hi\"");
        assert_eq!(format!("{}", Value::list([Value::Null])), "list[1]");
        assert_eq!(format!("{}", Value::Null), "null");
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::record([
            ("when", Value::Date(Utc::now())),
            ("pattern", Value::Regex(RegexValue::new("a+", "m").unwrap())),
            ("tags", Value::set([Value::from("x")])),
            ("index", Value::map([(Value::Int(1), Value::Bool(false))])),
        ]);
        let json = serde_json::to_string(&val).unwrap();
        let deserialized: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, deserialized);
    }

    #[test]
    fn test_invalid_regex_fails_deserialization() {
        let json = r#"{"type":"regex","value":{"source":"(","flags":""}}"#;
        assert!(serde_json::from_str::<Value>(json).is_err());
    }

    #[test]
    fn test_value_from_conversions() {
        assert_eq!(Value::from(()), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(vec![Value::Int(1)]), Value::list([Value::Int(1)]));
    }
}
