//! UPnP data types and typed values.
//!
//! [`DataType`] is the fixed set of `dataType` names a service description may
//! declare. Each type knows how to turn the wire string into a [`Value`]
//! (`coerce`) and back (`to_upnp`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// A `dataType` from a service description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Ui1,
    Ui2,
    Ui4,
    Ui8,
    I1,
    I2,
    I4,
    I8,
    Int,
    R4,
    R8,
    Number,
    Fixed14_4,
    Float,
    Char,
    String,
    Boolean,
    BinBase64,
    BinHex,
    Uri,
    Uuid,
    Date,
    DateTime,
    DateTimeTz,
    Time,
    TimeTz,
}

/// Returned by [`DataType::from_str`] for names outside the UPnP table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown UPnP data type: {0:?}")]
pub struct UnknownDataType(pub String);

/// A wire string that does not fit the declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot coerce {value:?} to {data_type}")]
pub struct CoercionError {
    pub data_type: DataType,
    pub value: String,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Ui1 => "ui1",
            DataType::Ui2 => "ui2",
            DataType::Ui4 => "ui4",
            DataType::Ui8 => "ui8",
            DataType::I1 => "i1",
            DataType::I2 => "i2",
            DataType::I4 => "i4",
            DataType::I8 => "i8",
            DataType::Int => "int",
            DataType::R4 => "r4",
            DataType::R8 => "r8",
            DataType::Number => "number",
            DataType::Fixed14_4 => "fixed.14.4",
            DataType::Float => "float",
            DataType::Char => "char",
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::BinBase64 => "bin.base64",
            DataType::BinHex => "bin.hex",
            DataType::Uri => "uri",
            DataType::Uuid => "uuid",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::DateTimeTz => "dateTime.tz",
            DataType::Time => "time",
            DataType::TimeTz => "time.tz",
        }
    }

    /// Inclusive bounds for the integer types.
    fn integer_bounds(&self) -> Option<(i128, i128)> {
        match self {
            DataType::Ui1 => Some((0, u8::MAX as i128)),
            DataType::Ui2 => Some((0, u16::MAX as i128)),
            DataType::Ui4 => Some((0, u32::MAX as i128)),
            DataType::Ui8 => Some((0, u64::MAX as i128)),
            DataType::I1 => Some((i8::MIN as i128, i8::MAX as i128)),
            DataType::I2 => Some((i16::MIN as i128, i16::MAX as i128)),
            DataType::I4 => Some((i32::MIN as i128, i32::MAX as i128)),
            DataType::I8 | DataType::Int => Some((i64::MIN as i128, i64::MAX as i128)),
            _ => None,
        }
    }

    fn is_unsigned(&self) -> bool {
        matches!(self, DataType::Ui1 | DataType::Ui2 | DataType::Ui4 | DataType::Ui8)
    }

    /// `dateTime.tz` and `time.tz` values must carry an offset.
    pub fn requires_timezone(&self) -> bool {
        matches!(self, DataType::DateTimeTz | DataType::TimeTz)
    }

    /// Parse a wire string into a typed value.
    ///
    /// Integers are range-checked against the type's width. Booleans accept
    /// `1`, `true` and `yes` in any case as true and anything else as false.
    /// The `.tz` types accept naive values here; the offset requirement is
    /// enforced by [`DataType::check`].
    pub fn coerce(&self, raw: &str) -> Result<Value, CoercionError> {
        let fail = || CoercionError {
            data_type: *self,
            value: raw.to_string(),
        };

        if let Some((min, max)) = self.integer_bounds() {
            let parsed: i128 = raw.trim().parse().map_err(|_| fail())?;
            if parsed < min || parsed > max {
                return Err(fail());
            }
            return Ok(if self.is_unsigned() {
                Value::UnsignedInteger(parsed as u64)
            } else {
                Value::Integer(parsed as i64)
            });
        }

        match self {
            DataType::R4 | DataType::R8 | DataType::Number | DataType::Fixed14_4 | DataType::Float => {
                raw.trim().parse().map(Value::Float).map_err(|_| fail())
            }
            DataType::Char
            | DataType::String
            | DataType::BinBase64
            | DataType::BinHex
            | DataType::Uri
            | DataType::Uuid => Ok(Value::String(raw.to_string())),
            DataType::Boolean => Ok(Value::Boolean(matches!(
                raw.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ))),
            DataType::Date => match parse_date_time(raw) {
                Some(value @ Value::Date(_)) => Ok(value),
                _ => Err(fail()),
            },
            DataType::DateTime | DataType::DateTimeTz => match parse_date_time(raw) {
                Some(value @ (Value::DateTime(_) | Value::DateTimeTz(_))) => Ok(value),
                _ => Err(fail()),
            },
            DataType::Time | DataType::TimeTz => match parse_date_time(raw) {
                Some(value @ (Value::Time(_) | Value::TimeTz(..))) => Ok(value),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        }
    }

    /// Type check followed by the timezone requirement of the `.tz` types.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if let Some((min, max)) = self.integer_bounds() {
            let as_wide = match value {
                Value::Integer(v) => *v as i128,
                Value::UnsignedInteger(v) => *v as i128,
                other => return Err(format!("expected integer, got {}", other.kind())),
            };
            if as_wide < min || as_wide > max {
                return Err(format!("{} out of range for {}", as_wide, self));
            }
            return Ok(());
        }

        let type_ok = match self {
            DataType::R4 | DataType::R8 | DataType::Number | DataType::Fixed14_4 | DataType::Float => {
                matches!(value, Value::Float(_))
            }
            DataType::Char
            | DataType::String
            | DataType::BinBase64
            | DataType::BinHex
            | DataType::Uri
            | DataType::Uuid => matches!(value, Value::String(_)),
            DataType::Boolean => matches!(value, Value::Boolean(_)),
            DataType::Date => matches!(value, Value::Date(_)),
            DataType::DateTime | DataType::DateTimeTz => {
                matches!(value, Value::DateTime(_) | Value::DateTimeTz(_))
            }
            DataType::Time | DataType::TimeTz => matches!(value, Value::Time(_) | Value::TimeTz(..)),
            _ => false,
        };
        if !type_ok {
            return Err(format!("expected {}, got {}", self, value.kind()));
        }

        if self.requires_timezone() && matches!(value, Value::DateTime(_) | Value::Time(_)) {
            return Err("Requires tzinfo".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data_type = match s {
            "ui1" => DataType::Ui1,
            "ui2" => DataType::Ui2,
            "ui4" => DataType::Ui4,
            "ui8" => DataType::Ui8,
            "i1" => DataType::I1,
            "i2" => DataType::I2,
            "i4" => DataType::I4,
            "i8" => DataType::I8,
            "int" => DataType::Int,
            "r4" => DataType::R4,
            "r8" => DataType::R8,
            "number" => DataType::Number,
            "fixed.14.4" => DataType::Fixed14_4,
            "float" => DataType::Float,
            "char" => DataType::Char,
            "string" => DataType::String,
            "boolean" => DataType::Boolean,
            "bin.base64" => DataType::BinBase64,
            "bin.hex" => DataType::BinHex,
            "uri" => DataType::Uri,
            "uuid" => DataType::Uuid,
            "date" => DataType::Date,
            "dateTime" => DataType::DateTime,
            "dateTime.tz" => DataType::DateTimeTz,
            "time" => DataType::Time,
            "time.tz" => DataType::TimeTz,
            other => return Err(UnknownDataType(other.to_string())),
        };
        Ok(data_type)
    }
}

/// A typed state-variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Time(NaiveTime),
    TimeTz(NaiveTime, FixedOffset),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::UnsignedInteger(_) => "unsigned integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::DateTime(_) => "dateTime",
            Value::DateTimeTz(_) => "dateTime.tz",
            Value::Time(_) => "time",
            Value::TimeTz(..) => "time.tz",
        }
    }

    /// Render in UPnP wire form.
    pub fn to_upnp(&self) -> String {
        match self {
            Value::Integer(v) => v.to_string(),
            Value::UnsignedInteger(v) => v.to_string(),
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => format!("{:.1}", v),
            Value::Float(v) => v.to_string(),
            Value::Boolean(true) => "1".to_string(),
            Value::Boolean(false) => "0".to_string(),
            Value::String(v) => v.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Value::DateTimeTz(dt) => dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
            Value::TimeTz(t, offset) => format!("{}{}", t.format("%H:%M:%S"), offset),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::UnsignedInteger(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(v) => u64::try_from(*v).ok(),
            Value::UnsignedInteger(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_upnp())
    }
}

/// Ordering for range checks. Values of unrelated kinds are unordered.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::UnsignedInteger(a), Value::UnsignedInteger(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::UnsignedInteger(b)) => (*a as i128).partial_cmp(&(*b as i128)),
            (Value::UnsignedInteger(a), Value::Integer(b)) => (*a as i128).partial_cmp(&(*b as i128)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            (Value::DateTimeTz(a), Value::DateTimeTz(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            (Value::TimeTz(a, oa), Value::TimeTz(b, ob)) => {
                match a.partial_cmp(b) {
                    Some(Ordering::Equal) => oa.local_minus_utc().partial_cmp(&ob.local_minus_utc()),
                    ordering => ordering,
                }
            }
            _ => None,
        }
    }
}

/// Shape of an accepted date/time literal. `d` is a digit, `s` a sign.
const SHAPE_DATE: &str = "dddd-dd-dd";
const SHAPE_TIME: &str = "dd:dd:dd";
const SHAPE_DATETIME_T: &str = "dddd-dd-ddTdd:dd:dd";
const SHAPE_DATETIME_SPACE: &str = "dddd-dd-dd dd:dd:dd";
const SHAPE_TIME_OFFSET: &str = "dd:dd:ddsdddd";
const SHAPE_TIME_SPACE_OFFSET: &str = "dd:dd:dd sdddd";
const SHAPE_DATETIME_LOWER_Z: &str = "dddd-dd-ddTdd:dd:ddz";
const SHAPE_DATETIME_UPPER_Z: &str = "dddd-dd-ddTdd:dd:ddZ";
const SHAPE_DATETIME_OFFSET: &str = "dddd-dd-ddTdd:dd:ddsdddd";
const SHAPE_DATETIME_SPACE_OFFSET: &str = "dddd-dd-ddTdd:dd:dd sdddd";

fn has_shape(value: &str, shape: &str) -> bool {
    value.len() == shape.len()
        && value.bytes().zip(shape.bytes()).all(|(v, s)| match s {
            b'd' => v.is_ascii_digit(),
            b's' => v == b'+' || v == b'-',
            literal => v == literal,
        })
}

/// Parse a trailing `±HHMM` offset.
fn parse_offset(offset: &str) -> Option<FixedOffset> {
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let hours: i32 = offset.get(1..3)?.parse().ok()?;
    let minutes: i32 = offset.get(3..5)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parse a date, time or date-time literal into the matching [`Value`].
///
/// An offset written `±HH:MM` is normalised to `±HHMM` first.
pub fn parse_date_time(value: &str) -> Option<Value> {
    let normalized;
    let bytes = value.as_bytes();
    let value = if bytes.len() >= 6
        && matches!(bytes[bytes.len() - 6], b'+' | b'-')
        && bytes[bytes.len() - 3] == b':'
    {
        normalized = format!("{}{}", &value[..value.len() - 3], &value[value.len() - 2..]);
        normalized.as_str()
    } else {
        value
    };

    if has_shape(value, SHAPE_DATE) {
        return NaiveDate::parse_from_str(value, "%Y-%m-%d").ok().map(Value::Date);
    }
    if has_shape(value, SHAPE_TIME) {
        return NaiveTime::parse_from_str(value, "%H:%M:%S").ok().map(Value::Time);
    }
    if has_shape(value, SHAPE_DATETIME_T) {
        return NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(Value::DateTime);
    }
    if has_shape(value, SHAPE_DATETIME_SPACE) {
        return NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(Value::DateTime);
    }
    if has_shape(value, SHAPE_TIME_OFFSET) || has_shape(value, SHAPE_TIME_SPACE_OFFSET) {
        let time = NaiveTime::parse_from_str(&value[..8], "%H:%M:%S").ok()?;
        let offset = parse_offset(&value[value.len() - 5..])?;
        return Some(Value::TimeTz(time, offset));
    }
    if has_shape(value, SHAPE_DATETIME_LOWER_Z) || has_shape(value, SHAPE_DATETIME_UPPER_Z) {
        let naive = NaiveDateTime::parse_from_str(&value[..19], "%Y-%m-%dT%H:%M:%S").ok()?;
        let utc = FixedOffset::east_opt(0)?;
        return naive.and_local_timezone(utc).single().map(Value::DateTimeTz);
    }
    if has_shape(value, SHAPE_DATETIME_OFFSET) || has_shape(value, SHAPE_DATETIME_SPACE_OFFSET) {
        let naive = NaiveDateTime::parse_from_str(&value[..19], "%Y-%m-%dT%H:%M:%S").ok()?;
        let offset = parse_offset(&value[value.len() - 5..])?;
        return naive.and_local_timezone(offset).single().map(Value::DateTimeTz);
    }
    None
}
