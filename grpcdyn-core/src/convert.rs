//! # Dynamic message conversion
//!
//! Converts script values (`serde_json::Value`) into protobuf messages and back, driven
//! only by runtime descriptors. The mapping follows the canonical protobuf JSON encoding:
//!
//! * Fields are keyed by their JSON name (`oauthScope`); the proto name is accepted on input.
//! * 64-bit integers are emitted as decimal strings, `bytes` as standard base64 and enums by name.
//! * Every field is emitted on output, populated or not. Unset message fields become `null`.
//! * `google.protobuf.Any` carries its type in an `"@type"` key; the embedded type is looked
//!   up in the [`DescriptorRegistry`], so it only needs to have been loaded from some source.
//! * Other well-known types (`Timestamp`, `Duration`, wrappers, `Struct`, ...) use their
//!   special JSON forms.
//!
//! [`encode`] and [`decode`] are thin entry points over one recursive pair,
//! `encode_value` and `decode_value`, which dispatch on the field [`Kind`].
use crate::error::ErrorKind;
use crate::registry::{DescriptorRegistry, RegistryError};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use prost::Message;
use prost_reflect::{
    DynamicMessage, EnumDescriptor, FieldDescriptor, Kind, MapKey, MessageDescriptor,
    ReflectMessage, SerializeOptions, Value,
};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::HashMap;

const ANY: &str = "google.protobuf.Any";
const NULL_VALUE: &str = "google.protobuf.NullValue";
const ANY_TYPE_KEY: &str = "@type";

/// Well-known types whose JSON form is not a plain object of their fields.
const SPECIAL_JSON_TYPES: &[&str] = &[
    "google.protobuf.Timestamp",
    "google.protobuf.Duration",
    "google.protobuf.FieldMask",
    "google.protobuf.Struct",
    "google.protobuf.Value",
    "google.protobuf.ListValue",
    "google.protobuf.BoolValue",
    "google.protobuf.BytesValue",
    "google.protobuf.DoubleValue",
    "google.protobuf.FloatValue",
    "google.protobuf.Int32Value",
    "google.protobuf.Int64Value",
    "google.protobuf.StringValue",
    "google.protobuf.UInt32Value",
    "google.protobuf.UInt64Value",
];

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid value for field \"{field}\": expected {expected}, got {found}")]
    InvalidValue {
        field: String,
        expected: String,
        found: String,
    },
    #[error("unknown field \"{field}\" in message {message}")]
    UnknownField { field: String, message: String },
    #[error("Any value is missing the \"@type\" key")]
    MissingAnyType,
    #[error(transparent)]
    AnyType(#[from] RegistryError),
    #[error("invalid {message} value: {reason}")]
    WellKnown { message: String, reason: String },
    #[error("failed to decode the {type_url} payload of an Any value: {source}")]
    AnyPayload {
        type_url: String,
        source: prost::DecodeError,
    },
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AnyType(e) => e.kind(),
            Self::AnyPayload { .. } => ErrorKind::Decode,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

/// Builds a message of type `descriptor` from a script value.
pub fn encode(
    registry: &DescriptorRegistry,
    descriptor: &MessageDescriptor,
    value: &JsonValue,
) -> Result<DynamicMessage, ConvertError> {
    encode_message(registry, descriptor, value, descriptor.full_name())
}

/// Renders a message as a script value.
pub fn decode(
    registry: &DescriptorRegistry,
    message: &DynamicMessage,
) -> Result<JsonValue, ConvertError> {
    decode_message(registry, message)
}

fn encode_message(
    registry: &DescriptorRegistry,
    descriptor: &MessageDescriptor,
    value: &JsonValue,
    context: &str,
) -> Result<DynamicMessage, ConvertError> {
    match descriptor.full_name() {
        ANY => return encode_any(registry, descriptor, value, context),
        name if SPECIAL_JSON_TYPES.contains(&name) => {
            return DynamicMessage::deserialize(descriptor.clone(), value.clone()).map_err(|e| {
                ConvertError::WellKnown {
                    message: name.to_string(),
                    reason: e.to_string(),
                }
            });
        }
        _ => {}
    }

    let object = value.as_object().ok_or_else(|| ConvertError::InvalidValue {
        field: context.to_string(),
        expected: format!("an object for {}", descriptor.full_name()),
        found: describe(value),
    })?;

    let mut message = DynamicMessage::new(descriptor.clone());
    for (key, item) in object {
        let field = descriptor
            .get_field_by_json_name(key)
            .or_else(|| descriptor.get_field_by_name(key))
            .ok_or_else(|| ConvertError::UnknownField {
                field: key.clone(),
                message: descriptor.full_name().to_string(),
            })?;

        if item.is_null() && !accepts_null(&field) {
            continue;
        }

        let value = encode_field(registry, &field, item)?;
        message
            .try_set_field(&field, value)
            .map_err(|e| ConvertError::InvalidValue {
                field: field.full_name().to_string(),
                expected: kind_name(&field.kind()),
                found: e.to_string(),
            })?;
    }

    Ok(message)
}

fn encode_field(
    registry: &DescriptorRegistry,
    field: &FieldDescriptor,
    value: &JsonValue,
) -> Result<Value, ConvertError> {
    if field.is_map() {
        let Kind::Message(entry) = field.kind() else {
            return Err(mismatch(field, "a map entry", value));
        };
        let key_field = entry.map_entry_key_field();
        let value_field = entry.map_entry_value_field();

        let object = value
            .as_object()
            .ok_or_else(|| mismatch(field, "an object", value))?;

        let mut map = HashMap::with_capacity(object.len());
        for (key, item) in object {
            let key = encode_map_key(field, &key_field.kind(), key)?;
            if item.is_null() && !accepts_null(&value_field) {
                continue;
            }
            let item = encode_value(registry, field, &value_field.kind(), item)?;
            map.insert(key, item);
        }
        return Ok(Value::Map(map));
    }

    if field.is_list() {
        let items = value
            .as_array()
            .ok_or_else(|| mismatch(field, "an array", value))?;

        let kind = field.kind();
        let list = items
            .iter()
            .map(|item| encode_value(registry, field, &kind, item))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::List(list));
    }

    encode_value(registry, field, &field.kind(), value)
}

fn encode_value(
    registry: &DescriptorRegistry,
    field: &FieldDescriptor,
    kind: &Kind,
    value: &JsonValue,
) -> Result<Value, ConvertError> {
    let converted = match kind {
        Kind::Double => float(value).map(Value::F64),
        Kind::Float => float(value).map(|f| Value::F32(f as f32)),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => signed(value)
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::I32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => signed(value).map(Value::I64),
        Kind::Uint32 | Kind::Fixed32 => unsigned(value)
            .and_then(|u| u32::try_from(u).ok())
            .map(Value::U32),
        Kind::Uint64 | Kind::Fixed64 => unsigned(value).map(Value::U64),
        Kind::Bool => value.as_bool().map(Value::Bool),
        Kind::String => value.as_str().map(|s| Value::String(s.to_string())),
        Kind::Bytes => value
            .as_str()
            .and_then(decode_base64)
            .map(|bytes| Value::Bytes(bytes.into())),
        Kind::Enum(descriptor) => enum_number(descriptor, value).map(Value::EnumNumber),
        Kind::Message(descriptor) => {
            return encode_message(registry, descriptor, value, field.full_name())
                .map(Value::Message);
        }
    };

    converted.ok_or_else(|| mismatch(field, &kind_name(kind), value))
}

fn encode_map_key(
    field: &FieldDescriptor,
    kind: &Kind,
    key: &str,
) -> Result<MapKey, ConvertError> {
    let converted = match kind {
        Kind::String => Some(MapKey::String(key.to_string())),
        Kind::Bool => match key {
            "true" => Some(MapKey::Bool(true)),
            "false" => Some(MapKey::Bool(false)),
            _ => None,
        },
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => key.parse().ok().map(MapKey::I32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => key.parse().ok().map(MapKey::I64),
        Kind::Uint32 | Kind::Fixed32 => key.parse().ok().map(MapKey::U32),
        Kind::Uint64 | Kind::Fixed64 => key.parse().ok().map(MapKey::U64),
        _ => None,
    };

    converted.ok_or_else(|| ConvertError::InvalidValue {
        field: field.full_name().to_string(),
        expected: format!("a {} map key", kind_name(kind)),
        found: format!("\"{key}\""),
    })
}

fn encode_any(
    registry: &DescriptorRegistry,
    descriptor: &MessageDescriptor,
    value: &JsonValue,
    context: &str,
) -> Result<DynamicMessage, ConvertError> {
    let object = value.as_object().ok_or_else(|| ConvertError::InvalidValue {
        field: context.to_string(),
        expected: format!("an object for {ANY}"),
        found: describe(value),
    })?;

    let mut any = DynamicMessage::new(descriptor.clone());
    if object.is_empty() {
        return Ok(any);
    }

    let type_url = object
        .get(ANY_TYPE_KEY)
        .and_then(JsonValue::as_str)
        .ok_or(ConvertError::MissingAnyType)?;
    let embedded = registry.resolve_any_type(type_url)?;

    let payload = if SPECIAL_JSON_TYPES.contains(&embedded.full_name()) {
        let inner = object.get("value").cloned().unwrap_or(JsonValue::Null);
        encode_message(registry, &embedded, &inner, context)?
    } else {
        let mut fields = object.clone();
        fields.remove(ANY_TYPE_KEY);
        encode_message(registry, &embedded, &JsonValue::Object(fields), context)?
    };

    any.set_field_by_name("type_url", Value::String(type_url.to_string()));
    any.set_field_by_name("value", Value::Bytes(payload.encode_to_vec().into()));
    Ok(any)
}

fn decode_message(
    registry: &DescriptorRegistry,
    message: &DynamicMessage,
) -> Result<JsonValue, ConvertError> {
    let descriptor = message.descriptor();

    match descriptor.full_name() {
        ANY => return decode_any(registry, message),
        name if SPECIAL_JSON_TYPES.contains(&name) => {
            let options = SerializeOptions::new().stringify_64_bit_integers(true);
            return message
                .serialize_with_options(serde_json::value::Serializer, &options)
                .map_err(|e| ConvertError::WellKnown {
                    message: name.to_string(),
                    reason: e.to_string(),
                });
        }
        _ => {}
    }

    let mut object = Map::new();
    for field in descriptor.fields() {
        // Oneof members (including proto3 `optional`) only show up when set.
        if field.containing_oneof().is_some() && !message.has_field(&field) {
            continue;
        }

        let singular_message =
            !field.is_list() && !field.is_map() && matches!(field.kind(), Kind::Message(_));
        let rendered = if singular_message && !message.has_field(&field) {
            JsonValue::Null
        } else {
            decode_field(registry, &field, &message.get_field(&field))?
        };

        object.insert(field.json_name().to_string(), rendered);
    }

    Ok(JsonValue::Object(object))
}

fn decode_field(
    registry: &DescriptorRegistry,
    field: &FieldDescriptor,
    value: &Value,
) -> Result<JsonValue, ConvertError> {
    match value {
        Value::Map(entries) => {
            let value_kind = match field.kind() {
                Kind::Message(entry) => entry.map_entry_value_field().kind(),
                other => other,
            };

            let mut object = Map::new();
            for (key, item) in entries {
                let item = decode_value(registry, &value_kind, item)?;
                object.insert(map_key_string(key), item);
            }
            Ok(JsonValue::Object(object))
        }
        Value::List(items) => {
            let kind = field.kind();
            items
                .iter()
                .map(|item| decode_value(registry, &kind, item))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array)
        }
        single => decode_value(registry, &field.kind(), single),
    }
}

fn decode_value(
    registry: &DescriptorRegistry,
    kind: &Kind,
    value: &Value,
) -> Result<JsonValue, ConvertError> {
    let rendered = match value {
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::I32(i) => JsonValue::from(*i),
        Value::U32(u) => JsonValue::from(*u),
        Value::I64(i) => JsonValue::String(i.to_string()),
        Value::U64(u) => JsonValue::String(u.to_string()),
        Value::F32(f) => float_to_json(f64::from(*f)),
        Value::F64(f) => float_to_json(*f),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(bytes) => JsonValue::String(STANDARD.encode(bytes)),
        Value::EnumNumber(number) => match kind {
            Kind::Enum(descriptor) if descriptor.full_name() == NULL_VALUE => JsonValue::Null,
            Kind::Enum(descriptor) => descriptor
                .get_value(*number)
                .map(|v| JsonValue::String(v.name().to_string()))
                .unwrap_or_else(|| JsonValue::from(*number)),
            _ => JsonValue::from(*number),
        },
        Value::Message(message) => decode_message(registry, message)?,
        Value::List(items) => items
            .iter()
            .map(|item| decode_value(registry, kind, item))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array)?,
        Value::Map(entries) => {
            let mut object = Map::new();
            for (key, item) in entries {
                object.insert(map_key_string(key), decode_value(registry, kind, item)?);
            }
            JsonValue::Object(object)
        }
    };

    Ok(rendered)
}

fn decode_any(
    registry: &DescriptorRegistry,
    any: &DynamicMessage,
) -> Result<JsonValue, ConvertError> {
    let type_url = any
        .get_field_by_name("type_url")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    if type_url.is_empty() {
        return Ok(JsonValue::Object(Map::new()));
    }

    let payload = any
        .get_field_by_name("value")
        .and_then(|v| v.as_bytes().cloned())
        .unwrap_or_default();

    let embedded = registry.resolve_any_type(&type_url)?;
    let message = DynamicMessage::decode(embedded.clone(), payload).map_err(|source| {
        ConvertError::AnyPayload {
            type_url: type_url.clone(),
            source,
        }
    })?;

    let rendered = decode_message(registry, &message)?;

    let mut object = Map::new();
    object.insert(ANY_TYPE_KEY.to_string(), JsonValue::String(type_url));
    match rendered {
        JsonValue::Object(fields) if !SPECIAL_JSON_TYPES.contains(&embedded.full_name()) => {
            object.extend(fields);
        }
        other => {
            object.insert("value".to_string(), other);
        }
    }

    Ok(JsonValue::Object(object))
}

fn accepts_null(field: &FieldDescriptor) -> bool {
    match field.kind() {
        Kind::Message(descriptor) => descriptor.full_name() == "google.protobuf.Value",
        Kind::Enum(descriptor) => descriptor.full_name() == NULL_VALUE,
        _ => false,
    }
}

fn float(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.parse().ok(),
        },
        _ => None,
    }
}

fn signed(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| integral(n).map(|f| f as i64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn unsigned(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| integral(n).filter(|f| *f >= 0.0).map(|f| f as u64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Floats with no fractional part are accepted where integers are expected, as scripts
/// in dynamic languages often cannot tell the two apart.
fn integral(n: &Number) -> Option<f64> {
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
}

fn enum_number(descriptor: &EnumDescriptor, value: &JsonValue) -> Option<i32> {
    match value {
        JsonValue::Null if descriptor.full_name() == NULL_VALUE => Some(0),
        JsonValue::String(name) => descriptor.get_value_by_name(name).map(|v| v.number()),
        JsonValue::Number(n) => n.as_i64().and_then(|i| i32::try_from(i).ok()),
        _ => None,
    }
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .into_iter()
        .find_map(|engine| engine.decode(text).ok())
}

fn float_to_json(f: f64) -> JsonValue {
    if f.is_nan() {
        JsonValue::String("NaN".to_string())
    } else if f == f64::INFINITY {
        JsonValue::String("Infinity".to_string())
    } else if f == f64::NEG_INFINITY {
        JsonValue::String("-Infinity".to_string())
    } else {
        Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
    }
}

fn map_key_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(i) => i.to_string(),
        MapKey::I64(i) => i.to_string(),
        MapKey::U32(u) => u.to_string(),
        MapKey::U64(u) => u.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

fn kind_name(kind: &Kind) -> String {
    match kind {
        Kind::Double => "double".into(),
        Kind::Float => "float".into(),
        Kind::Int32 => "int32".into(),
        Kind::Int64 => "int64".into(),
        Kind::Uint32 => "uint32".into(),
        Kind::Uint64 => "uint64".into(),
        Kind::Sint32 => "sint32".into(),
        Kind::Sint64 => "sint64".into(),
        Kind::Fixed32 => "fixed32".into(),
        Kind::Fixed64 => "fixed64".into(),
        Kind::Sfixed32 => "sfixed32".into(),
        Kind::Sfixed64 => "sfixed64".into(),
        Kind::Bool => "bool".into(),
        Kind::String => "string".into(),
        Kind::Bytes => "base64 bytes".into(),
        Kind::Enum(descriptor) => format!("a {} value", descriptor.full_name()),
        Kind::Message(descriptor) => descriptor.full_name().to_string(),
    }
}

fn mismatch(field: &FieldDescriptor, expected: &str, found: &JsonValue) -> ConvertError {
    ConvertError::InvalidValue {
        field: field.full_name().to_string(),
        expected: expected.to_string(),
        found: describe(found),
    }
}

fn describe(value: &JsonValue) -> String {
    let text = value.to_string();
    if text.len() > 64 {
        let mut end = 64;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> DescriptorRegistry {
        let mut registry = DescriptorRegistry::new();
        registry
            .load_from_protoset_bytes(test_service::FILE_DESCRIPTOR_SET)
            .expect("test descriptors load");
        registry
    }

    fn message(registry: &DescriptorRegistry, name: &str) -> MessageDescriptor {
        registry.pool().get_message_by_name(name).expect("known message")
    }

    #[test]
    fn accepts_json_and_proto_field_names() {
        let registry = registry();
        let desc = message(&registry, "grpc.testing.SimpleRequest");

        let by_json = encode(&registry, &desc, &json!({ "fillUsername": true })).unwrap();
        let by_proto = encode(&registry, &desc, &json!({ "fill_username": true })).unwrap();

        assert_eq!(by_json, by_proto);
        assert_eq!(
            by_json.get_field_by_name("fill_username").unwrap().as_bool(),
            Some(true)
        );
    }

    #[test]
    fn bytes_are_base64_on_both_sides() {
        let registry = registry();
        let desc = message(&registry, "grpc.testing.SimpleRequest");

        let msg = encode(
            &registry,
            &desc,
            &json!({ "payload": { "body": "6LSf6L295rWL6K+V" } }),
        )
        .unwrap();

        let payload = msg.get_field_by_name("payload").unwrap();
        let body = payload
            .as_message()
            .unwrap()
            .get_field_by_name("body")
            .unwrap();
        assert_eq!(body.as_bytes().unwrap().as_ref(), "负载测试".as_bytes());

        let rendered = decode(&registry, &msg).unwrap();
        assert_eq!(rendered["payload"]["body"], "6LSf6L295rWL6K+V");
    }

    #[test]
    fn unpopulated_fields_are_emitted() {
        let registry = registry();
        let desc = message(&registry, "grpc.testing.SimpleResponse");

        let rendered = decode(&registry, &DynamicMessage::new(desc)).unwrap();

        assert_eq!(
            rendered,
            json!({ "payload": null, "username": "", "oauthScope": "" })
        );
    }

    #[test]
    fn sixty_four_bit_integers_accept_numbers_and_strings() {
        let registry = registry();
        let desc = message(&registry, "grpc.any.testing.SumRequestData");

        let msg = encode(&registry, &desc, &json!({ "a": 1, "b": "2" })).unwrap();
        assert_eq!(decode(&registry, &msg).unwrap(), json!({ "a": "1", "b": "2" }));
    }

    #[test]
    fn any_fields_use_the_type_key() {
        let registry = registry();
        let desc = message(&registry, "grpc.any.testing.SumRequest");
        let input = json!({
            "data": {
                "@type": "type.googleapis.com/grpc.any.testing.SumRequestData",
                "a": "1",
                "b": "2",
            }
        });

        let msg = encode(&registry, &desc, &input).unwrap();
        assert_eq!(decode(&registry, &msg).unwrap(), input);
    }

    #[test]
    fn unknown_any_types_are_not_found() {
        let registry = registry();
        let desc = message(&registry, "grpc.any.testing.SumRequest");

        let err = encode(
            &registry,
            &desc,
            &json!({ "data": { "@type": "type.googleapis.com/nope.Missing" } }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = encode(&registry, &desc, &json!({ "data": { "a": 1 } })).unwrap_err();
        assert!(matches!(err, ConvertError::MissingAnyType));
    }

    #[test]
    fn well_known_types_use_their_json_form() {
        let registry = registry();
        let desc = message(&registry, "grpcdyn.echo.EchoMessage");

        let msg = encode(
            &registry,
            &desc,
            &json!({ "createdAt": "2024-01-02T03:04:05Z", "nickname": "k6" }),
        )
        .unwrap();
        let rendered = decode(&registry, &msg).unwrap();

        assert_eq!(rendered["createdAt"], "2024-01-02T03:04:05Z");
        assert_eq!(rendered["nickname"], "k6");
    }

    #[test]
    fn rejects_mismatched_input() {
        let registry = registry();
        let desc = message(&registry, "grpcdyn.echo.EchoMessage");

        let err = encode(&registry, &desc, &json!({ "unknown": 1 })).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownField { .. }));

        let err = encode(&registry, &desc, &json!({ "flag": "yes" })).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidValue { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = encode(&registry, &desc, &json!({ "color": "PURPLE" })).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidValue { .. }));

        let err = encode(&registry, &desc, &json!({ "lookup": { "one": {} } })).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidValue { .. }));

        let err = encode(&registry, &desc, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidValue { .. }));
    }

    #[test]
    fn null_leaves_fields_unset() {
        let registry = registry();
        let desc = message(&registry, "grpcdyn.echo.EchoMessage");

        let msg = encode(&registry, &desc, &json!({ "text": null, "inner": null })).unwrap();
        assert_eq!(msg, DynamicMessage::new(desc));
    }

    #[test]
    fn special_floats_round_trip_as_strings() {
        let registry = registry();
        let desc = message(&registry, "grpcdyn.echo.EchoMessage");

        let input = json!({ "ratio": "NaN", "small": "-Infinity" });
        let msg = encode(&registry, &desc, &input).unwrap();
        let rendered = decode(&registry, &msg).unwrap();

        assert_eq!(rendered["ratio"], "NaN");
        assert_eq!(rendered["small"], "-Infinity");
    }
}
