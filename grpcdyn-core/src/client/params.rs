//! Strict parsing of the generic parameter objects scripts pass to `connect` and `invoke`.
//!
//! Unknown keys and malformed values are rejected instead of ignored.
use crate::error::ErrorKind;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Connection timeout used when the script does not set one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("unknown connect param: {0:?}")]
    UnknownConnectParam(String),
    #[error("unknown param: {0:?}")]
    UnknownParam(String),
    #[error("{what} must be an object, got '{value}'")]
    NotAnObject { what: &'static str, value: Value },
    #[error("invalid plaintext value: '{0}', it needs to be boolean")]
    InvalidPlaintext(Value),
    #[error("invalid reflect value: '{0}', it needs to be boolean")]
    InvalidReflect(Value),
    #[error("invalid duration '{0}'")]
    InvalidDuration(Value),
    #[error("invalid {param} value: '{value}', it needs to be an integer")]
    NotAnInteger { param: &'static str, value: Value },
    #[error("invalid {param} value: '{value}', it needs to be a positive integer")]
    NotPositive { param: &'static str, value: i64 },
    #[error("metadata {key:?} contains an invalid value: '{value}', it needs to be a string or an array of strings")]
    InvalidMetadata { key: String, value: Value },
    #[error("tag {key:?} contains an invalid value: '{value}', it needs to be a string")]
    InvalidTag { key: String, value: Value },
}

impl ParamsError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

/// Options accepted by `connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    /// Skip TLS and talk h2c.
    pub plaintext: bool,
    /// Deadline for establishing the connection, also the default per-call deadline.
    pub timeout: Duration,
    /// Bootstrap the registry from the server's reflection service.
    pub reflect: bool,
    pub max_receive_size: Option<usize>,
    pub max_send_size: Option<usize>,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            plaintext: false,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            reflect: false,
            max_receive_size: None,
            max_send_size: None,
        }
    }
}

impl ConnectParams {
    /// Parses the optional params object given to `connect`.
    ///
    /// `null` and an absent value both mean "all defaults".
    pub fn parse(params: Option<&Value>) -> Result<Self, ParamsError> {
        let mut parsed = Self::default();

        let Some(object) = as_object("connect params", params)? else {
            return Ok(parsed);
        };

        for (key, value) in object {
            match key.as_str() {
                "plaintext" => {
                    parsed.plaintext = value
                        .as_bool()
                        .ok_or_else(|| ParamsError::InvalidPlaintext(value.clone()))?;
                }
                "timeout" => parsed.timeout = parse_timeout(value)?,
                "reflect" => {
                    parsed.reflect = value
                        .as_bool()
                        .ok_or_else(|| ParamsError::InvalidReflect(value.clone()))?;
                }
                "maxReceiveSize" => {
                    parsed.max_receive_size = Some(parse_size("maxReceiveSize", value)?);
                }
                "maxSendSize" => {
                    parsed.max_send_size = Some(parse_size("maxSendSize", value)?);
                }
                _ => return Err(ParamsError::UnknownConnectParam(key.clone())),
            }
        }

        Ok(parsed)
    }
}

/// Options accepted by `invoke`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    /// Outgoing metadata, one entry per value. Keys keep the script's casing here.
    pub metadata: Vec<(String, String)>,
    /// Per-call deadline overriding the connection timeout.
    pub timeout: Option<Duration>,
    /// Extra tags attached to the call's metric sample.
    pub tags: BTreeMap<String, String>,
}

impl RequestParams {
    pub fn parse(params: Option<&Value>) -> Result<Self, ParamsError> {
        let mut parsed = Self::default();

        let Some(object) = as_object("params", params)? else {
            return Ok(parsed);
        };

        for (key, value) in object {
            match key.as_str() {
                "metadata" => parsed.metadata = parse_metadata(value)?,
                "timeout" => parsed.timeout = Some(parse_timeout(value)?),
                "tags" => parsed.tags = parse_tags(value)?,
                _ => return Err(ParamsError::UnknownParam(key.clone())),
            }
        }

        Ok(parsed)
    }
}

fn as_object<'a>(
    what: &'static str,
    params: Option<&'a Value>,
) -> Result<Option<&'a Map<String, Value>>, ParamsError> {
    match params {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(object)) => Ok(Some(object)),
        Some(other) => Err(ParamsError::NotAnObject {
            what,
            value: other.clone(),
        }),
    }
}

fn parse_metadata(value: &Value) -> Result<Vec<(String, String)>, ParamsError> {
    let object = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Object(object) => object,
        other => {
            return Err(ParamsError::NotAnObject {
                what: "metadata",
                value: other.clone(),
            });
        }
    };

    let mut metadata = Vec::with_capacity(object.len());
    for (key, value) in object {
        let invalid = || ParamsError::InvalidMetadata {
            key: key.clone(),
            value: value.clone(),
        };

        match value {
            Value::String(text) => metadata.push((key.clone(), text.clone())),
            Value::Array(items) => {
                for item in items {
                    let text = item.as_str().ok_or_else(invalid)?;
                    metadata.push((key.clone(), text.to_string()));
                }
            }
            _ => return Err(invalid()),
        }
    }

    Ok(metadata)
}

fn parse_tags(value: &Value) -> Result<BTreeMap<String, String>, ParamsError> {
    let object = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(object) => object,
        other => {
            return Err(ParamsError::NotAnObject {
                what: "tags",
                value: other.clone(),
            });
        }
    };

    object
        .iter()
        .map(|(key, value)| match value {
            Value::String(text) => Ok((key.clone(), text.clone())),
            other => Err(ParamsError::InvalidTag {
                key: key.clone(),
                value: other.clone(),
            }),
        })
        .collect()
}

fn parse_size(param: &'static str, value: &Value) -> Result<usize, ParamsError> {
    let not_an_integer = || ParamsError::NotAnInteger {
        param,
        value: value.clone(),
    };

    let size = match value {
        Value::Number(number) => match number.as_i64() {
            Some(size) => size,
            None => number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
                .ok_or_else(not_an_integer)?,
        },
        _ => return Err(not_an_integer()),
    };

    if size <= 0 {
        return Err(ParamsError::NotPositive { param, value: size });
    }

    usize::try_from(size).map_err(|_| not_an_integer())
}

/// Parses a timeout given either as a duration string (`"1h3s"`, `"500ms"`) or as a
/// number of milliseconds (integer or float).
pub fn parse_timeout(value: &Value) -> Result<Duration, ParamsError> {
    let invalid = || ParamsError::InvalidDuration(value.clone());

    match value {
        Value::String(text) => parse_duration(text).ok_or_else(invalid),
        Value::Number(number) => number
            .as_f64()
            .filter(|millis| *millis >= 0.0)
            .and_then(|millis| Duration::try_from_secs_f64(millis / 1000.0).ok())
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Parses a Go-style duration: a sequence of decimal numbers, each with a unit suffix
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). A bare `"0"` is accepted, negative durations
/// are not.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let mut rest = text.trim();
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let mut seconds = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];

        seconds += number * scale;
    }

    Duration::try_from_secs_f64(seconds).ok()
}
