//! Binary layout of one key column value.
//!
//! Every key column occupies a fixed number of bytes in the key buffer. Nullable
//! columns get one extra leading flag byte (`1` = null, followed by zero fill).
//! Numbers are little-endian; character columns are zero padded and then stored
//! byte-reversed, which is the layout the server hashes.

use super::KeyHasher;
use crate::core::{ColumnSpec, ColumnType, IngestError, Result, Value};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Scale applied to decimal key values.
const DECIMAL_SCALE_DIGITS: usize = 4;
const DECIMAL_SCALE: i64 = 10_000;

/// Years the packed date formats can represent.
const MIN_YEAR: i32 = 1000;
const MAX_YEAR: i32 = 2900;

/// Encoded width of a key value of this type, excluding the null flag.
pub fn key_width(column_type: ColumnType) -> Result<usize> {
    match column_type {
        ColumnType::Char1
        | ColumnType::Char2
        | ColumnType::Char4
        | ColumnType::Char8
        | ColumnType::Char16
        | ColumnType::Char32
        | ColumnType::Char64
        | ColumnType::Char128
        | ColumnType::Char256 => column_type
            .char_width()
            .ok_or(IngestError::UnsupportedKeyType(column_type)),
        ColumnType::Int8 => Ok(1),
        ColumnType::Int16 => Ok(2),
        ColumnType::Int | ColumnType::Float | ColumnType::Date | ColumnType::Time => Ok(4),
        ColumnType::Long
        | ColumnType::Double
        | ColumnType::Timestamp
        | ColumnType::DateTime
        | ColumnType::Decimal
        | ColumnType::String => Ok(8),
        ColumnType::Bytes | ColumnType::Ipv4 => Err(IngestError::UnsupportedKeyType(column_type)),
    }
}

/// Width the column occupies in a key buffer, including the null flag.
pub fn component_width(column: &ColumnSpec) -> Result<usize> {
    let width = key_width(column.column_type)?;
    Ok(if column.is_nullable() { width + 1 } else { width })
}

/// Appends the key encoding of `value` for `column` to `out`.
pub fn encode_key_value(
    column: &ColumnSpec,
    value: &Value,
    hasher: &dyn KeyHasher,
    out: &mut Vec<u8>,
) -> Result<()> {
    let width = key_width(column.column_type)?;

    if column.is_nullable() {
        if value.is_null() {
            out.push(1);
            out.resize(out.len() + width, 0);
            return Ok(());
        }
        out.push(0);
    } else if value.is_null() {
        return Err(invalid(column, "null value in a non-nullable key column"));
    }

    match column.column_type {
        ColumnType::Char1
        | ColumnType::Char2
        | ColumnType::Char4
        | ColumnType::Char8
        | ColumnType::Char16
        | ColumnType::Char32
        | ColumnType::Char64
        | ColumnType::Char128
        | ColumnType::Char256 => {
            let text = expect_text(column, value)?;
            let mut slot = vec![0u8; width];
            let bytes = text.as_bytes();
            let len = bytes.len().min(width);
            slot[..len].copy_from_slice(&bytes[..len]);
            slot.reverse();
            out.extend_from_slice(&slot);
        }
        ColumnType::Int8 => {
            let v = expect_int(column, value, i64::from(i8::MIN), i64::from(i8::MAX))?;
            out.extend_from_slice(&(v as i8).to_le_bytes());
        }
        ColumnType::Int16 => {
            let v = expect_int(column, value, i64::from(i16::MIN), i64::from(i16::MAX))?;
            out.extend_from_slice(&(v as i16).to_le_bytes());
        }
        ColumnType::Int => {
            let v = expect_int(column, value, i64::from(i32::MIN), i64::from(i32::MAX))?;
            out.extend_from_slice(&(v as i32).to_le_bytes());
        }
        ColumnType::Long => {
            let v = expect_int(column, value, i64::MIN, i64::MAX)?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        ColumnType::Float => {
            let v = expect_float(column, value)?;
            out.extend_from_slice(&(v as f32).to_le_bytes());
        }
        ColumnType::Double => {
            let v = expect_float(column, value)?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        ColumnType::String => {
            let text = expect_text(column, value)?;
            let (h1, _) = hasher.hash128(text.as_bytes())?;
            out.extend_from_slice(&h1.to_le_bytes());
        }
        ColumnType::Timestamp => {
            let millis = timestamp_millis(column, value)?;
            out.extend_from_slice(&millis.to_le_bytes());
        }
        ColumnType::Date => {
            let date = expect_date(column, value)?;
            out.extend_from_slice(&pack_date(date).to_le_bytes());
        }
        ColumnType::Time => {
            let time = expect_time(column, value)?;
            out.extend_from_slice(&pack_time(time).to_le_bytes());
        }
        ColumnType::DateTime => {
            let datetime = expect_datetime(column, value)?;
            out.extend_from_slice(&pack_datetime(datetime).to_le_bytes());
        }
        ColumnType::Decimal => {
            let scaled = scaled_decimal(column, value)?;
            out.extend_from_slice(&scaled.to_le_bytes());
        }
        ColumnType::Bytes | ColumnType::Ipv4 => {
            return Err(IngestError::UnsupportedKeyType(column.column_type));
        }
    }
    Ok(())
}

fn invalid(column: &ColumnSpec, detail: impl Into<String>) -> IngestError {
    IngestError::InvalidValue {
        column: column.name.clone(),
        detail: detail.into(),
    }
}

fn type_error(column: &ColumnSpec, value: &Value) -> IngestError {
    invalid(
        column,
        format!(
            "expected a value for {} column, got {}",
            column.column_type,
            value.type_name()
        ),
    )
}

fn expect_text<'a>(column: &ColumnSpec, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| type_error(column, value))
}

fn expect_int(column: &ColumnSpec, value: &Value, min: i64, max: i64) -> Result<i64> {
    let v = value.as_i64().ok_or_else(|| type_error(column, value))?;
    if v < min || v > max {
        return Err(invalid(
            column,
            format!("{} is out of range for {}", v, column.column_type),
        ));
    }
    Ok(v)
}

fn expect_float(column: &ColumnSpec, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| type_error(column, value))
}

fn check_year(column: &ColumnSpec, year: i32) -> Result<()> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(invalid(
            column,
            format!("year {} is outside {}..={}", year, MIN_YEAR, MAX_YEAR),
        ));
    }
    Ok(())
}

fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    let text = text.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn expect_date(column: &ColumnSpec, value: &Value) -> Result<NaiveDate> {
    let date = match value {
        Value::Date(d) => *d,
        Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|err| invalid(column, format!("'{}' is not a date: {}", s, err)))?,
        other => return Err(type_error(column, other)),
    };
    check_year(column, date.year())?;
    Ok(date)
}

fn expect_time(column: &ColumnSpec, value: &Value) -> Result<NaiveTime> {
    match value {
        Value::Time(t) => Ok(*t),
        Value::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
            .map_err(|err| invalid(column, format!("'{}' is not a time: {}", s, err))),
        other => Err(type_error(column, other)),
    }
}

fn expect_datetime(column: &ColumnSpec, value: &Value) -> Result<NaiveDateTime> {
    let datetime = match value {
        Value::DateTime(dt) => *dt,
        Value::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| invalid(column, "date has no midnight"))?,
        Value::Text(s) => parse_datetime_text(s)
            .ok_or_else(|| invalid(column, format!("'{}' is not a datetime", s)))?,
        other => return Err(type_error(column, other)),
    };
    check_year(column, datetime.year())?;
    Ok(datetime)
}

fn timestamp_millis(column: &ColumnSpec, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(ms) => Ok(*ms),
        Value::DateTime(dt) => Ok(dt.and_utc().timestamp_millis()),
        Value::Text(s) => parse_datetime_text(s)
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| invalid(column, format!("'{}' is not a timestamp", s))),
        other => Err(type_error(column, other)),
    }
}

fn millis_of(time: &impl Timelike) -> u32 {
    (time.nanosecond() / 1_000_000).min(999)
}

/// `((year-1900)<<21)|(month<<17)|(day<<12)|(day_of_year<<3)|day_of_week`, Sunday = 1.
pub(crate) fn pack_date(date: NaiveDate) -> i32 {
    ((date.year() - 1900) << 21)
        | ((date.month() as i32) << 17)
        | ((date.day() as i32) << 12)
        | ((date.ordinal() as i32) << 3)
        | date.weekday().number_from_sunday() as i32
}

pub(crate) fn pack_time(time: NaiveTime) -> i32 {
    ((time.hour() as i32) << 26)
        | ((time.minute() as i32) << 20)
        | ((time.second() as i32) << 14)
        | ((millis_of(&time) as i32) << 4)
}

pub(crate) fn pack_datetime(dt: NaiveDateTime) -> i64 {
    (i64::from(dt.year() - 1900) << 53)
        | (i64::from(dt.month()) << 49)
        | (i64::from(dt.day()) << 44)
        | (i64::from(dt.hour()) << 39)
        | (i64::from(dt.minute()) << 33)
        | (i64::from(dt.second()) << 27)
        | (i64::from(millis_of(&dt)) << 17)
        | (i64::from(dt.ordinal()) << 8)
        | (i64::from(dt.weekday().number_from_sunday()) << 5)
}

fn scaled_decimal(column: &ColumnSpec, value: &Value) -> Result<i64> {
    let overflow = || invalid(column, "decimal value overflows 64 bits");
    match value {
        Value::Integer(i) => i.checked_mul(DECIMAL_SCALE).ok_or_else(overflow),
        // parsed from the shortest round-trip text, truncated like `Value::Text`
        Value::Float(f) => parse_decimal(&f.to_string()).ok_or_else(overflow),
        Value::Text(s) => parse_decimal(s).ok_or_else(|| {
            invalid(column, format!("'{}' is not a decimal in 64-bit range", s))
        }),
        other => Err(type_error(column, other)),
    }
}

/// Parses `[-+]digits[.digits]` into an integer scaled by 10^4; extra fraction digits are truncated.
fn parse_decimal(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole_value: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut fraction_digits: String = fraction.chars().take(DECIMAL_SCALE_DIGITS).collect();
    while fraction_digits.len() < DECIMAL_SCALE_DIGITS {
        fraction_digits.push('0');
    }
    let fraction_value: i64 = fraction_digits.parse().ok()?;

    let magnitude = whole_value
        .checked_mul(DECIMAL_SCALE)?
        .checked_add(fraction_value)?;
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Murmur3KeyHasher;

    fn encode(column: &ColumnSpec, value: impl Into<Value>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        encode_key_value(column, &value.into(), &Murmur3KeyHasher::default(), &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_char_values_are_padded_and_reversed() {
        let column = ColumnSpec::new("code", ColumnType::Char4);
        assert_eq!(encode(&column, "ab").unwrap(), vec![0, 0, b'b', b'a']);
        assert_eq!(encode(&column, "abcdef").unwrap(), vec![b'd', b'c', b'b', b'a']);
    }

    #[test]
    fn test_integers_are_little_endian_and_range_checked() {
        let column = ColumnSpec::new("n", ColumnType::Int16);
        assert_eq!(encode(&column, 258).unwrap(), vec![2, 1]);
        assert!(matches!(
            encode(&column, 70_000),
            Err(IngestError::InvalidValue { .. })
        ));

        let long = ColumnSpec::new("l", ColumnType::Long);
        assert_eq!(encode(&long, -1).unwrap(), vec![0xff; 8]);
    }

    #[test]
    fn test_nullable_columns_use_a_flag_byte() {
        let column = ColumnSpec::new("n", ColumnType::Int).nullable();
        assert_eq!(encode(&column, Value::Null).unwrap(), vec![1, 0, 0, 0, 0]);
        assert_eq!(encode(&column, 7).unwrap(), vec![0, 7, 0, 0, 0]);
        assert_eq!(component_width(&column).unwrap(), 5);

        let required = ColumnSpec::new("n", ColumnType::Int);
        assert!(encode(&required, Value::Null).is_err());
    }

    #[test]
    fn test_string_values_are_hashed_to_eight_bytes() {
        let column = ColumnSpec::new("s", ColumnType::String);
        let short = encode(&column, "a").unwrap();
        let long = encode(&column, "a much longer string value").unwrap();
        assert_eq!(short.len(), 8);
        assert_eq!(long.len(), 8);
        assert_ne!(short, long);
        assert_eq!(short, encode(&column, "a").unwrap());
    }

    #[test]
    fn test_unsupported_types() {
        assert!(matches!(
            key_width(ColumnType::Bytes),
            Err(IngestError::UnsupportedKeyType(ColumnType::Bytes))
        ));
        assert!(key_width(ColumnType::Ipv4).is_err());
    }

    #[test]
    fn test_packed_date_and_time() {
        // 2000-01-01 was a Saturday, day 1 of the year.
        let date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(pack_date(date), (100 << 21) | (1 << 17) | (1 << 12) | (1 << 3) | 7);

        let time = NaiveTime::from_hms_milli_opt(1, 2, 3, 4).unwrap();
        assert_eq!(pack_time(time), (1 << 26) | (2 << 20) | (3 << 14) | (4 << 4));

        let column = ColumnSpec::new("d", ColumnType::Date);
        assert_eq!(
            encode(&column, "2000-01-01").unwrap(),
            pack_date(date).to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_datetime_text_and_native_agree() {
        let column = ColumnSpec::new("at", ColumnType::DateTime);
        let native = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(10, 20, 30, 400)
            .unwrap();
        assert_eq!(
            encode(&column, "2024-03-05 10:20:30.400").unwrap(),
            encode(&column, native).unwrap()
        );
        assert!(encode(&column, "0999-01-01 00:00:00").is_err());
    }

    #[test]
    fn test_decimal_scaling() {
        assert_eq!(parse_decimal("12.5"), Some(125_000));
        assert_eq!(parse_decimal("-0.00015"), Some(-1));
        assert_eq!(parse_decimal(".25"), Some(2_500));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("-"), None);

        let column = ColumnSpec::new("price", ColumnType::Decimal);
        assert_eq!(encode(&column, "1.5").unwrap(), encode(&column, 1.5).unwrap());
    }

    #[test]
    fn test_decimal_float_and_text_truncate_alike() {
        let column = ColumnSpec::new("price", ColumnType::Decimal);
        for (float, text) in [(1.23456, "1.23456"), (-1.23456, "-1.23456"), (0.29, "0.29")] {
            assert_eq!(encode(&column, float).unwrap(), encode(&column, text).unwrap());
        }
        assert_eq!(
            encode(&column, 1.23456).unwrap(),
            12_345i64.to_le_bytes().to_vec()
        );
        assert!(encode(&column, f64::NAN).is_err());
    }
}
