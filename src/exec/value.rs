// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Typed row values and the engine's value conversion table.
//!
//! Responsibilities:
//! - Defines runtime values plus the connector-native values that only exist
//!   between a connector and the coercion pipeline.
//! - Defines LOB references backed by a connector source, inline bytes, or a spool store.
//! - Implements raw-to-runtime conversion and runtime-to-desired transformation.
//!
//! Key exported interfaces:
//! - Types: `DataType`, `Value`, `Row`, `LobKind`, `LobRef`, `LobSource`, `LobStream`.
//! - Functions: `to_runtime`, `transform`.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::runtime::buffer_manager::FileStore;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub type Row = Vec<Value>;

/// Engine runtime types a projected column can expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    BigInteger,
    Float,
    Double,
    Char,
    String,
    Date,
    Time,
    Timestamp,
    Varbinary,
    Blob,
    Clob,
    Xml,
    /// Untyped column; values pass through without transformation.
    Object,
}

impl DataType {
    pub fn is_lob(self) -> bool {
        matches!(self, DataType::Blob | DataType::Clob | DataType::Xml)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Byte => "byte",
            DataType::Short => "short",
            DataType::Integer => "integer",
            DataType::Long => "long",
            DataType::BigInteger => "biginteger",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Char => "char",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Timestamp => "timestamp",
            DataType::Varbinary => "varbinary",
            DataType::Blob => "blob",
            DataType::Clob => "clob",
            DataType::Xml => "xml",
            DataType::Object => "object",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LobKind {
    Blob,
    Clob,
    Xml,
}

/// Re-readable large object content owned by a connector.
pub trait LobSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

#[derive(Clone)]
enum LobData {
    /// Still backed by the connector; may become unreadable once it closes.
    Source(Arc<dyn LobSource>),
    Inline(Arc<[u8]>),
    Spooled {
        store: Arc<dyn FileStore>,
        offset: u64,
        len: u64,
    },
}

/// Reference to large object content.
#[derive(Clone)]
pub struct LobRef {
    kind: LobKind,
    data: LobData,
}

impl LobRef {
    pub fn from_source(kind: LobKind, source: Arc<dyn LobSource>) -> Self {
        Self {
            kind,
            data: LobData::Source(source),
        }
    }

    pub fn inline(kind: LobKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            data: LobData::Inline(bytes.into()),
        }
    }

    pub fn spooled(kind: LobKind, store: Arc<dyn FileStore>, offset: u64, len: u64) -> Self {
        Self {
            kind,
            data: LobData::Spooled { store, offset, len },
        }
    }

    pub fn kind(&self) -> LobKind {
        self.kind
    }

    pub fn with_kind(&self, kind: LobKind) -> Self {
        Self {
            kind,
            data: self.data.clone(),
        }
    }

    /// True while the content is only reachable through the connector.
    pub fn is_connector_backed(&self) -> bool {
        matches!(self.data, LobData::Source(_))
    }

    pub fn is_spooled(&self) -> bool {
        matches!(self.data, LobData::Spooled { .. })
    }

    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.data {
            LobData::Source(source) => source.open(),
            LobData::Inline(bytes) => Ok(Box::new(io::Cursor::new(Arc::clone(bytes)))),
            LobData::Spooled { store, offset, len } => Ok(Box::new(SpoolReader {
                store: Arc::clone(store),
                pos: *offset,
                end: offset + len,
            })),
        }
    }

    pub fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn read_to_string(&self) -> io::Result<String> {
        String::from_utf8(self.read_to_end()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl fmt::Debug for LobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match &self.data {
            LobData::Source(_) => "source".to_string(),
            LobData::Inline(bytes) => format!("inline({} bytes)", bytes.len()),
            LobData::Spooled { store, offset, len } => {
                format!("spooled({}@{}+{})", store.name(), offset, len)
            }
        };
        f.debug_struct("LobRef")
            .field("kind", &self.kind)
            .field("storage", &storage)
            .finish()
    }
}

impl PartialEq for LobRef {
    // Identity of the backing storage, never the content.
    fn eq(&self, other: &Self) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match (&self.data, &other.data) {
            (LobData::Source(a), LobData::Source(b)) => Arc::ptr_eq(a, b),
            (LobData::Inline(a), LobData::Inline(b)) => a == b,
            (
                LobData::Spooled {
                    store: sa,
                    offset: oa,
                    len: la,
                },
                LobData::Spooled {
                    store: sb,
                    offset: ob,
                    len: lb,
                },
            ) => Arc::ptr_eq(sa, sb) && oa == ob && la == lb,
            _ => false,
        }
    }
}

struct SpoolReader {
    store: Arc<dyn FileStore>,
    pos: u64,
    end: u64,
}

impl Read for SpoolReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end || buf.is_empty() {
            return Ok(0);
        }
        let remaining = (self.end - self.pos).min(buf.len() as u64) as usize;
        let n = self.store.read_at(self.pos, &mut buf[..remaining])?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Binary,
    Character,
}

/// Connector-native LOB stream, not yet typed as blob, clob, or xml.
#[derive(Clone)]
pub struct LobStream {
    pub kind: StreamKind,
    pub source: Arc<dyn LobSource>,
}

impl fmt::Debug for LobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobStream").field("kind", &self.kind).finish()
    }
}

impl PartialEq for LobStream {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && Arc::ptr_eq(&self.source, &other.source)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    BigInteger(i128),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Varbinary(Vec<u8>),
    Blob(LobRef),
    Clob(LobRef),
    Xml(LobRef),
    // Connector-native values, converted before rows leave the data tier.
    Utc(DateTime<Utc>),
    UnsignedLong(u64),
    Stream(LobStream),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime type of the value; `None` for null and connector-native values.
    pub fn data_type(&self) -> Option<DataType> {
        let ty = match self {
            Value::Null | Value::Utc(_) | Value::UnsignedLong(_) | Value::Stream(_) => {
                return None;
            }
            Value::Boolean(_) => DataType::Boolean,
            Value::Byte(_) => DataType::Byte,
            Value::Short(_) => DataType::Short,
            Value::Integer(_) => DataType::Integer,
            Value::Long(_) => DataType::Long,
            Value::BigInteger(_) => DataType::BigInteger,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Char(_) => DataType::Char,
            Value::String(_) => DataType::String,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Varbinary(_) => DataType::Varbinary,
            Value::Blob(_) => DataType::Blob,
            Value::Clob(_) => DataType::Clob,
            Value::Xml(_) => DataType::Xml,
        };
        Some(ty)
    }

    pub fn is_lob(&self) -> bool {
        matches!(self, Value::Blob(_) | Value::Clob(_) | Value::Xml(_))
    }

    pub fn as_lob(&self) -> Option<&LobRef> {
        match self {
            Value::Blob(lob) | Value::Clob(lob) | Value::Xml(lob) => Some(lob),
            _ => None,
        }
    }

    pub fn from_lob(lob: LobRef) -> Self {
        match lob.kind() {
            LobKind::Blob => Value::Blob(lob),
            LobKind::Clob => Value::Clob(lob),
            LobKind::Xml => Value::Xml(lob),
        }
    }
}

/// Converts a connector value into its runtime representation.
///
/// Returns `None` when the value already is a runtime value.
pub fn to_runtime(value: &Value, target: DataType) -> Option<Value> {
    match value {
        Value::Stream(stream) => {
            let kind = match stream.kind {
                StreamKind::Binary => LobKind::Blob,
                StreamKind::Character if target == DataType::Xml => LobKind::Xml,
                StreamKind::Character => LobKind::Clob,
            };
            Some(Value::from_lob(LobRef::from_source(
                kind,
                Arc::clone(&stream.source),
            )))
        }
        Value::Utc(ts) => Some(Value::Timestamp(ts.naive_utc())),
        Value::UnsignedLong(v) => Some(Value::BigInteger(i128::from(*v))),
        _ => None,
    }
}

/// Transforms a runtime value into `target`.
///
/// Returns `Ok(None)` when the value already has the target type.
pub fn transform(value: &Value, target: DataType) -> Result<Option<Value>, String> {
    let Some(source) = value.data_type() else {
        return Ok(None);
    };
    if source == target || target == DataType::Object {
        return Ok(None);
    }
    let unsupported = || format!("cannot transform {} to {}", source, target);
    let out = match target {
        DataType::Byte
        | DataType::Short
        | DataType::Integer
        | DataType::Long
        | DataType::BigInteger
        | DataType::Float
        | DataType::Double => to_numeric(value, target).ok_or_else(unsupported)??,
        DataType::Boolean => match value {
            Value::String(s) => Value::Boolean(parse_bool(s)?),
            other => match as_f64(other) {
                Some(n) => Value::Boolean(n != 0.0),
                None => return Err(unsupported()),
            },
        },
        DataType::String => Value::String(to_string(value).map_err(|e| {
            format!("cannot transform {} to string: {}", source, e)
        })?),
        DataType::Char => match value {
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(format!("'{}' is not a single character", s)),
                }
            }
            _ => return Err(unsupported()),
        },
        DataType::Date => match value {
            Value::String(s) => Value::Date(
                NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .map_err(|e| format!("invalid date '{}': {}", s, e))?,
            ),
            Value::Timestamp(ts) => Value::Date(ts.date()),
            _ => return Err(unsupported()),
        },
        DataType::Time => match value {
            Value::String(s) => Value::Time(
                NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
                    .map_err(|e| format!("invalid time '{}': {}", s, e))?,
            ),
            Value::Timestamp(ts) => Value::Time(ts.time()),
            _ => return Err(unsupported()),
        },
        DataType::Timestamp => match value {
            Value::String(s) => Value::Timestamp(
                NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
                    .map_err(|e| format!("invalid timestamp '{}': {}", s, e))?,
            ),
            Value::Date(d) => Value::Timestamp(d.and_hms_opt(0, 0, 0).ok_or_else(unsupported)?),
            Value::Time(t) => Value::Timestamp(NaiveDateTime::new(
                NaiveDate::from_ymd_opt(1970, 1, 1).ok_or_else(unsupported)?,
                *t,
            )),
            _ => return Err(unsupported()),
        },
        DataType::Varbinary => match value {
            Value::Blob(lob) => Value::Varbinary(
                lob.read_to_end()
                    .map_err(|e| format!("cannot read blob: {}", e))?,
            ),
            _ => return Err(unsupported()),
        },
        DataType::Blob => match value {
            Value::Varbinary(bytes) => Value::Blob(LobRef::inline(LobKind::Blob, bytes.clone())),
            _ => return Err(unsupported()),
        },
        DataType::Clob => match value {
            Value::String(s) => Value::Clob(LobRef::inline(LobKind::Clob, s.as_bytes())),
            Value::Xml(lob) => Value::Clob(lob.with_kind(LobKind::Clob)),
            _ => return Err(unsupported()),
        },
        DataType::Xml => match value {
            Value::String(s) => Value::Xml(LobRef::inline(LobKind::Xml, s.as_bytes())),
            Value::Clob(lob) => Value::Xml(lob.with_kind(LobKind::Xml)),
            _ => return Err(unsupported()),
        },
        DataType::Object => unreachable!("object targets return early"),
    };
    Ok(Some(out))
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("invalid boolean '{}'", s)),
    }
}

fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::Boolean(b) => Some(i128::from(*b)),
        Value::Byte(v) => Some(i128::from(*v)),
        Value::Short(v) => Some(i128::from(*v)),
        Value::Integer(v) => Some(i128::from(*v)),
        Value::Long(v) => Some(i128::from(*v)),
        Value::BigInteger(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) => Some(f64::from(*v)),
        Value::Double(v) => Some(*v),
        other => as_i128(other).map(|v| v as f64),
    }
}

// Rounds up to exactly 2^127.
const I128_BOUND: f64 = i128::MAX as f64;

// Outer None: source type has no numeric conversion. Inner Err: out of range or unparsable.
fn to_numeric(value: &Value, target: DataType) -> Option<Result<Value, String>> {
    if let Value::String(s) = value {
        let s = s.trim();
        let parsed = if matches!(target, DataType::Float | DataType::Double) {
            s.parse::<f64>().map(Value::Double).map_err(|e| e.to_string())
        } else {
            s.parse::<i128>()
                .map(Value::BigInteger)
                .map_err(|e| e.to_string())
        };
        return Some(
            parsed
                .map_err(|e| format!("invalid {} '{}': {}", target, s, e))
                .and_then(|v| to_numeric(&v, target).unwrap_or(Ok(v))),
        );
    }
    if matches!(value, Value::Float(_) | Value::Double(_)) {
        let v = as_f64(value)?;
        return Some(match target {
            DataType::Float => Ok(Value::Float(v as f32)),
            DataType::Double => Ok(Value::Double(v)),
            _ => {
                if !v.is_finite() || v.trunc() != v {
                    return Some(Err(format!("{} is not an exact {}", v, target)));
                }
                // `as` saturates; 2^127 itself is already out of range.
                if v >= I128_BOUND || v < -I128_BOUND {
                    return Some(Err(format!("{} is out of range for {}", v, target)));
                }
                integral(v as i128, target)
            }
        });
    }
    let v = as_i128(value)?;
    Some(match target {
        DataType::Float => Ok(Value::Float(v as f32)),
        DataType::Double => Ok(Value::Double(v as f64)),
        _ => integral(v, target),
    })
}

fn integral(v: i128, target: DataType) -> Result<Value, String> {
    let out_of_range = || format!("{} is out of range for {}", v, target);
    Ok(match target {
        DataType::Byte => Value::Byte(i8::try_from(v).map_err(|_| out_of_range())?),
        DataType::Short => Value::Short(i16::try_from(v).map_err(|_| out_of_range())?),
        DataType::Integer => Value::Integer(i32::try_from(v).map_err(|_| out_of_range())?),
        DataType::Long => Value::Long(i64::try_from(v).map_err(|_| out_of_range())?),
        DataType::BigInteger => Value::BigInteger(v),
        _ => return Err(format!("{} is not an integral type", target)),
    })
}

fn to_string(value: &Value) -> io::Result<String> {
    Ok(match value {
        Value::Null => String::new(),
        Value::Boolean(v) => v.to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::BigInteger(v) => v.to_string(),
        Value::UnsignedLong(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Char(c) => c.to_string(),
        Value::String(s) => s.clone(),
        Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        Value::Time(t) => t.format(TIME_FORMAT).to_string(),
        Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        Value::Utc(ts) => ts.naive_utc().format(TIMESTAMP_FORMAT).to_string(),
        Value::Varbinary(bytes) => bytes.iter().map(|b| format!("{:02X}", b)).collect(),
        Value::Clob(lob) | Value::Xml(lob) => lob.read_to_string()?,
        Value::Blob(_) | Value::Stream(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "binary large objects have no string form",
            ));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bytes(&'static [u8]);

    impl LobSource for Bytes {
        fn open(&self) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(io::Cursor::new(self.0)))
        }
    }

    #[test]
    fn runtime_values_need_no_raw_conversion() {
        assert_eq!(to_runtime(&Value::Integer(1), DataType::Long), None);
        assert_eq!(to_runtime(&Value::Null, DataType::Long), None);
    }

    #[test]
    fn connector_native_values_become_runtime_values() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+02:00")
            .expect("parse ts")
            .with_timezone(&Utc);
        assert_eq!(
            to_runtime(&Value::Utc(ts), DataType::Timestamp),
            Some(Value::Timestamp(
                NaiveDateTime::parse_from_str("2024-03-01 08:00:00", TIMESTAMP_FORMAT)
                    .expect("parse naive")
            ))
        );
        assert_eq!(
            to_runtime(&Value::UnsignedLong(u64::MAX), DataType::BigInteger),
            Some(Value::BigInteger(u64::MAX as i128))
        );
    }

    #[test]
    fn character_stream_becomes_xml_only_for_xml_columns() {
        let stream = Value::Stream(LobStream {
            kind: StreamKind::Character,
            source: Arc::new(Bytes(b"<a/>")),
        });
        let xml = to_runtime(&stream, DataType::Xml).expect("converted");
        assert!(matches!(&xml, Value::Xml(lob) if lob.is_connector_backed()));
        let clob = to_runtime(&stream, DataType::Clob).expect("converted");
        let Value::Clob(lob) = clob else {
            panic!("expected clob");
        };
        assert_eq!(lob.read_to_string().expect("read"), "<a/>");
    }

    #[test]
    fn numeric_transform_checks_range() {
        assert_eq!(
            transform(&Value::Integer(7), DataType::Long),
            Ok(Some(Value::Long(7)))
        );
        assert!(transform(&Value::Integer(300), DataType::Byte).is_err());
        assert_eq!(
            transform(&Value::Double(3.0), DataType::Short),
            Ok(Some(Value::Short(3)))
        );
        assert!(transform(&Value::Double(3.5), DataType::Short).is_err());
        assert_eq!(
            transform(&Value::String(" 12 ".into()), DataType::Integer),
            Ok(Some(Value::Integer(12)))
        );
    }

    #[test]
    fn same_type_and_object_targets_are_no_ops() {
        assert_eq!(transform(&Value::Long(1), DataType::Long), Ok(None));
        assert_eq!(transform(&Value::Long(1), DataType::Object), Ok(None));
        assert_eq!(transform(&Value::Null, DataType::Integer), Ok(None));
    }

    #[test]
    fn temporal_and_string_transforms() {
        let ts = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", TIMESTAMP_FORMAT)
            .expect("parse");
        assert_eq!(
            transform(&Value::Timestamp(ts), DataType::Date),
            Ok(Some(Value::Date(ts.date())))
        );
        assert_eq!(
            transform(&Value::Timestamp(ts), DataType::String),
            Ok(Some(Value::String("2024-01-02 03:04:05".into())))
        );
        assert_eq!(
            transform(&Value::String("true".into()), DataType::Boolean),
            Ok(Some(Value::Boolean(true)))
        );
        assert!(transform(&Value::Date(ts.date()), DataType::Varbinary).is_err());
    }

    #[test]
    fn whole_floats_beyond_big_integer_range_are_rejected() {
        assert!(transform(&Value::Double(1e39), DataType::BigInteger).is_err());
        assert!(transform(&Value::Double(-1e39), DataType::BigInteger).is_err());
        assert!(transform(&Value::Double(I128_BOUND), DataType::BigInteger).is_err());
        assert_eq!(
            transform(&Value::Double(-I128_BOUND), DataType::BigInteger),
            Ok(Some(Value::BigInteger(i128::MIN)))
        );
        assert_eq!(
            transform(&Value::Float(1024.0), DataType::BigInteger),
            Ok(Some(Value::BigInteger(1024)))
        );
    }

    #[test]
    fn string_to_clob_is_inline() {
        let out = transform(&Value::String("abc".into()), DataType::Clob)
            .expect("transform")
            .expect("changed");
        let lob = out.as_lob().expect("lob");
        assert!(!lob.is_connector_backed());
        assert_eq!(lob.read_to_string().expect("read"), "abc");
    }
}
