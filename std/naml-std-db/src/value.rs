///
/// Runtime-facing values and rows.
///
/// `DbValue` is what coercion produces and what callers see in fetched rows.
/// It is loose: the legacy APIs hand almost everything back as
/// strings, and the conversions here follow the scripting runtime's rules
/// (a string converts to the integer formed by its leading digits, an empty
/// string is 0, and so on).
///

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::driver::{LargeObject, LobKind};

/// How a large-object locator is exposed to script code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobFlavor {
    Plain,
    /// Wrapped as an OCI-Lob descriptor.
    OciDescriptor,
}

#[derive(Debug, Clone)]
pub struct LobHandle {
    locator: Arc<dyn LargeObject>,
    flavor: LobFlavor,
}

impl LobHandle {
    pub fn new(locator: Arc<dyn LargeObject>, flavor: LobFlavor) -> Self {
        Self { locator, flavor }
    }

    pub fn kind(&self) -> LobKind {
        self.locator.kind()
    }

    pub fn flavor(&self) -> LobFlavor {
        self.flavor
    }

    pub fn locator(&self) -> &Arc<dyn LargeObject> {
        &self.locator
    }
}

impl PartialEq for LobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.locator, &other.locator) && self.flavor == other.flavor
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    Lob(LobHandle),
}

impl DbValue {
    pub fn str(s: impl Into<String>) -> Self {
        DbValue::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DbValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_int(&self) -> i64 {
        match self {
            DbValue::Null | DbValue::Lob(_) => 0,
            DbValue::Bool(b) => *b as i64,
            DbValue::Int(i) => *i,
            DbValue::Double(d) => *d as i64,
            DbValue::Str(s) => leading_int(s),
            DbValue::Bytes(b) => leading_int(&String::from_utf8_lossy(b)),
        }
    }

    pub fn to_double(&self) -> f64 {
        match self {
            DbValue::Null | DbValue::Lob(_) => 0.0,
            DbValue::Bool(b) => *b as i64 as f64,
            DbValue::Int(i) => *i as f64,
            DbValue::Double(d) => *d,
            DbValue::Str(s) => leading_double(s),
            DbValue::Bytes(b) => leading_double(&String::from_utf8_lossy(b)),
        }
    }

    /// String form. Booleans follow the runtime: true is `"1"`, false is `""`.
    pub fn to_text(&self) -> String {
        match self {
            DbValue::Null | DbValue::Lob(_) => String::new(),
            DbValue::Bool(true) => "1".to_string(),
            DbValue::Bool(false) => String::new(),
            DbValue::Int(i) => i.to_string(),
            DbValue::Double(d) => format_double(*d),
            DbValue::Str(s) => s.clone(),
            DbValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Display length in bytes, as reported by `lengths()`.
    pub fn byte_len(&self) -> usize {
        match self {
            DbValue::Str(s) => s.len(),
            DbValue::Bytes(b) => b.len(),
            DbValue::Lob(_) | DbValue::Null => 0,
            other => other.to_text().len(),
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "NULL"),
            DbValue::Lob(lob) => write!(f, "<lob {:?}>", lob.kind()),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

/// Shortest text that parses back to the same double; whole numbers print
/// without a fractional part. Magnitudes outside `1e-4..1e16` use exponent
/// form (`1e300`, `2.5e-7`).
pub fn format_double(d: f64) -> String {
    if d == 0.0 {
        return "0".to_string();
    }
    let text = format!("{:?}", d);
    match text.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => text,
    }
}

fn numeric_prefix(s: &str, allow_fraction: bool) -> &str {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut has_digits = end > digits_start;

    if allow_fraction {
        if end < bytes.len() && bytes[end] == b'.' {
            let frac_start = end + 1;
            let mut frac_end = frac_start;
            while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
                frac_end += 1;
            }
            if has_digits || frac_end > frac_start {
                has_digits = true;
                end = frac_end;
            }
        }
        if has_digits && end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
            let mut exp_end = end + 1;
            if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
                exp_end += 1;
            }
            let exp_digits = exp_end;
            while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            if exp_end > exp_digits {
                end = exp_end;
            }
        }
    }

    if has_digits { &s[..end] } else { "" }
}

fn leading_int(s: &str) -> i64 {
    let prefix = numeric_prefix(s, false);
    if prefix.is_empty() {
        return 0;
    }
    prefix.parse::<i64>().unwrap_or_else(|_| {
        if prefix.starts_with('-') {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}

fn leading_double(s: &str) -> f64 {
    numeric_prefix(s, true).parse::<f64>().unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Numeric,
    Associative,
    Both,
}

impl FetchMode {
    pub fn numeric_keys(self) -> bool {
        matches!(self, FetchMode::Numeric | FetchMode::Both)
    }

    pub fn name_keys(self) -> bool {
        matches!(self, FetchMode::Associative | FetchMode::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Index(usize),
    Name(String),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Index(i) => write!(f, "{}", i),
            RowKey::Name(n) => write!(f, "{}", n),
        }
    }
}

/// One fetched row. Keys keep insertion order; re-inserting an existing key
/// replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<RowKey, DbValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: RowKey, value: DbValue) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &RowKey) -> Option<&DbValue> {
        self.values.get(key)
    }

    pub fn index(&self, i: usize) -> Option<&DbValue> {
        self.values.get(&RowKey::Index(i))
    }

    pub fn name(&self, name: &str) -> Option<&DbValue> {
        self.values.get(&RowKey::Name(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &DbValue)> {
        self.values.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.values.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &DbValue> {
        self.values.values()
    }
}
