//! MongoDB extended JSON normalisation
//!
//! Change-stream post-images arrive as relaxed or canonical extended JSON. Type
//! wrappers (`$oid`, `$date`, `$numberInt`, `$numberLong`, `$numberDouble`,
//! `$numberDecimal`, `$binary`) are collapsed into plain JSON so the regular serde
//! derive on [`crate::Event`] can decode them. Dates become RFC 3339 strings and
//! binary values become their base64 text.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::error::{EventError, Result};

pub fn normalize(value: Value) -> Result<Value> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(normalize)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            if let Some(converted) = convert_wrapper(&map)? {
                return Ok(converted);
            }
            map.into_iter()
                .map(|(key, value)| Ok((key, normalize(value)?)))
                .collect::<Result<Map<String, Value>>>()
                .map(Value::Object)
        }
        other => Ok(other),
    }
}

fn convert_wrapper(map: &Map<String, Value>) -> Result<Option<Value>> {
    if map.len() == 2 {
        // Legacy binary: {"$binary": "<base64>", "$type": "00"}
        if let (Some(Value::String(data)), Some(_)) = (map.get("$binary"), map.get("$type")) {
            return Ok(Some(Value::String(data.clone())));
        }
        return Ok(None);
    }
    if map.len() != 1 {
        return Ok(None);
    }

    let Some((key, inner)) = map.iter().next() else {
        return Ok(None);
    };

    let converted = match key.as_str() {
        "$oid" | "$numberDecimal" => Value::String(expect_str(key, inner)?.to_string()),
        "$numberInt" | "$numberLong" => Value::Number(parse_integer(key, expect_str(key, inner)?)?),
        "$numberDouble" => {
            let raw = expect_str(key, inner)?;
            let parsed = raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(|| decode_error(key, raw))?;
            Value::Number(parsed)
        }
        "$date" => Value::String(convert_date(inner)?),
        "$binary" => match inner {
            Value::Object(fields) => match fields.get("base64") {
                Some(Value::String(data)) => Value::String(data.clone()),
                _ => return Err(decode_error(key, &inner.to_string())),
            },
            _ => return Err(decode_error(key, &inner.to_string())),
        },
        _ => return Ok(None),
    };

    Ok(Some(converted))
}

fn convert_date(inner: &Value) -> Result<String> {
    let millis = match inner {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| decode_error("$date", s))?;
            return Ok(format_millis(parsed.with_timezone(&Utc)));
        }
        Value::Object(fields) => match fields.get("$numberLong") {
            Some(Value::String(s)) => s.parse::<i64>().ok(),
            _ => None,
        },
        _ => None,
    }
    .ok_or_else(|| decode_error("$date", &inner.to_string()))?;

    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(format_millis)
        .ok_or_else(|| decode_error("$date", &millis.to_string()))
}

fn format_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| decode_error(key, &value.to_string()))
}

fn parse_integer(key: &str, raw: &str) -> Result<Number> {
    raw.parse::<i64>()
        .map(Number::from)
        .map_err(|_| decode_error(key, raw))
}

fn decode_error(key: &str, raw: &str) -> EventError {
    EventError::Decode(format!("invalid extended JSON {} value: {}", key, raw))
}
