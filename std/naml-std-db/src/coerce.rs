///
/// Per-SQL-type value coercion.
///
/// Turns the native value of one column in the cursor's current row into
/// the value a legacy script API hands back. Almost everything becomes a
/// string; binary columns stay bytes and large objects stay handles.
///
/// Failure policy: a driver error while reading a value yields NULL, except
/// for timestamp columns where it yields the zero timestamp (drivers reject
/// `0000-00-00 00:00:00` on read; the script API expects to see it back).
///

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::{debug, trace};

use crate::backend::{Backend, DecodeOptions};
use crate::driver::{ColumnInfo, Cursor, NativeValue, SqlType};
use crate::value::{format_double, DbValue, LobHandle};

pub const ZERO_TIMESTAMP: &str = "0000-00-00 00:00:00";

#[derive(Clone, Copy)]
pub struct Coercion<'a> {
    pub backend: &'a dyn Backend,
    pub decode: DecodeOptions,
}

impl<'a> Coercion<'a> {
    pub fn new(backend: &'a dyn Backend, decode: DecodeOptions) -> Self {
        Self { backend, decode }
    }

    /// Coerced value of 0-based `column` in the cursor's current row.
    pub fn column(&self, cursor: &dyn Cursor, column: usize) -> DbValue {
        let Some(info) = cursor.columns().get(column) else {
            return DbValue::Null;
        };
        match cursor.value(column) {
            Ok(native) => self.native(info, native),
            Err(e) if info.sql_type == SqlType::Timestamp => {
                trace!(column = %info.label, error = %e, "unreadable timestamp");
                DbValue::str(ZERO_TIMESTAMP)
            }
            Err(e) => {
                debug!(column = %info.label, error = %e, "column read failed");
                DbValue::Null
            }
        }
    }

    pub fn native(&self, info: &ColumnInfo, native: NativeValue) -> DbValue {
        if native.is_null() {
            return DbValue::Null;
        }

        match info.sql_type {
            SqlType::Null => DbValue::Null,
            SqlType::Bit if info.type_name != "bool" => self.generic(native),
            SqlType::Bit | SqlType::Boolean => match truthy(&native) {
                Some(true) => DbValue::str("t"),
                Some(false) => DbValue::str("f"),
                None => DbValue::Null,
            },
            t if t.is_integer() => match native {
                NativeValue::Int(i) => DbValue::Str(i.to_string()),
                NativeValue::Bool(b) => DbValue::Str((b as i64).to_string()),
                NativeValue::Double(d) => DbValue::Str((d as i64).to_string()),
                other => self.generic(other),
            },
            t if t.is_floating() => match as_double(&native) {
                Some(d) if info.currency => DbValue::Str(format!("${}", format_double(d))),
                Some(d) => DbValue::Str(format_double(d)),
                None => self.generic(native),
            },
            SqlType::Blob | SqlType::Clob => match native {
                NativeValue::Lob(lob) => DbValue::Lob(LobHandle::new(lob, self.backend.lob_flavor())),
                NativeValue::Bytes(b) if info.sql_type == SqlType::Blob => DbValue::Bytes(b),
                other => self.generic(other),
            },
            t if t.is_binary() => match native {
                NativeValue::Bytes(b) | NativeValue::Text(b) => DbValue::Bytes(b),
                other => self.generic(other),
            },
            t if t.is_character() => match native {
                NativeValue::Text(bytes) => {
                    DbValue::Str(self.backend.decode_column_string(info, &bytes, self.decode))
                }
                other => self.generic(other),
            },
            SqlType::Time => match native {
                NativeValue::Time(t) => DbValue::Str(format_time(t)),
                other => self.generic(other),
            },
            SqlType::Date => match native {
                NativeValue::Date(d) => DbValue::Str(format_date(d)),
                other => self.generic(other),
            },
            SqlType::Timestamp => match native {
                NativeValue::Timestamp(ts) => DbValue::Str(format_timestamp(ts)),
                other => match self.generic(other) {
                    DbValue::Str(s) => DbValue::Str(strip_zero_fraction(s)),
                    v => v,
                },
            },
            _ => self.generic(native),
        }
    }

    /// Generic string form of a native value.
    pub fn generic(&self, native: NativeValue) -> DbValue {
        match native {
            NativeValue::Null => DbValue::Null,
            NativeValue::Bool(b) => DbValue::str(if b { "1" } else { "0" }),
            NativeValue::Int(i) => DbValue::Str(i.to_string()),
            NativeValue::Double(d) => DbValue::Str(format_double(d)),
            NativeValue::Text(bytes) | NativeValue::Bytes(bytes) => {
                DbValue::Str(self.decode.encoding.decode(&bytes))
            }
            NativeValue::Date(d) => DbValue::Str(format_date(d)),
            NativeValue::Time(t) => DbValue::Str(format_time(t)),
            NativeValue::Timestamp(ts) => DbValue::Str(format_timestamp(ts)),
            NativeValue::Lob(lob) => DbValue::Lob(LobHandle::new(lob, self.backend.lob_flavor())),
        }
    }
}

fn truthy(native: &NativeValue) -> Option<bool> {
    match native {
        NativeValue::Bool(b) => Some(*b),
        NativeValue::Int(i) => Some(*i != 0),
        NativeValue::Double(d) => Some(*d != 0.0),
        NativeValue::Text(bytes) | NativeValue::Bytes(bytes) => {
            let s = String::from_utf8_lossy(bytes);
            let s = s.trim();
            let falsy = s.is_empty()
                || s == "0"
                || s.eq_ignore_ascii_case("f")
                || s.eq_ignore_ascii_case("false");
            Some(!falsy)
        }
        _ => None,
    }
}

fn as_double(native: &NativeValue) -> Option<f64> {
    match native {
        NativeValue::Double(d) => Some(*d),
        NativeValue::Int(i) => Some(*i as f64),
        NativeValue::Text(bytes) => String::from_utf8_lossy(bytes).trim().parse().ok(),
        _ => None,
    }
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

/// `YYYY-MM-DD HH:MM:SS` plus the fractional seconds with trailing zeros
/// removed; no fraction at all for whole seconds.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    let base = ts.format("%Y-%m-%d %H:%M:%S").to_string();
    let nanos = ts.nanosecond();
    if nanos == 0 {
        return base;
    }
    let frac = format!("{:09}", nanos);
    format!("{}.{}", base, frac.trim_end_matches('0'))
}

fn strip_zero_fraction(s: String) -> String {
    match s.strip_suffix(".0") {
        Some(stripped) => stripped.to_string(),
        None => s,
    }
}
