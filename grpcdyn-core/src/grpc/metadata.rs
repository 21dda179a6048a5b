//! Conversions between script-level metadata (plain strings) and `tonic`'s `MetadataMap`.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;
use tonic::metadata::{
    Ascii, Binary, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue,
    errors::{InvalidMetadataKey, InvalidMetadataValue},
};

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

/// Builds outgoing metadata.
///
/// Keys are lowercased. Keys ending in `-bin` are sent as binary metadata, with the value's
/// raw bytes as payload (the transport takes care of the base64 wire encoding). Repeated
/// keys keep every value in order.
pub fn to_metadata_map(pairs: &[(String, String)]) -> Result<MetadataMap, MetadataError> {
    let mut map = MetadataMap::new();

    for (key, value) in pairs {
        let key = key.to_lowercase();

        if key.ends_with("-bin") {
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|source| MetadataError::InvalidKey {
                    key: key.clone(),
                    source,
                })?;
            map.append_bin(name, MetadataValue::from_bytes(value.as_bytes()));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes()).map_err(|source| {
                MetadataError::InvalidKey {
                    key: key.clone(),
                    source,
                }
            })?;
            let value = MetadataValue::<Ascii>::try_from(value.as_str())
                .map_err(|source| MetadataError::InvalidValue { key, source })?;
            map.append(name, value);
        }
    }

    Ok(map)
}

/// Flattens received metadata into `name -> values`.
///
/// ASCII values that are not visible text and binary values are rendered as base64.
pub fn to_string_map(map: &MetadataMap) -> BTreeMap<String, Vec<String>> {
    let mut rendered: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entry in map.iter() {
        let (key, value) = match entry {
            KeyAndValueRef::Ascii(key, value) => (
                key.as_str(),
                value
                    .to_str()
                    .map(str::to_string)
                    .unwrap_or_else(|_| STANDARD.encode(value.as_encoded_bytes())),
            ),
            KeyAndValueRef::Binary(key, value) => (
                key.as_str(),
                value
                    .to_bytes()
                    .map(|bytes| STANDARD.encode(bytes))
                    .unwrap_or_else(|_| {
                        String::from_utf8_lossy(value.as_encoded_bytes()).into_owned()
                    }),
            ),
        };

        rendered.entry(key.to_string()).or_default().push(value);
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_lowercased_and_repeated_values_kept() {
        let map = to_metadata_map(&[
            ("X-Load-Tester".to_string(), "k6".to_string()),
            ("multi".to_string(), "a".to_string()),
            ("multi".to_string(), "b".to_string()),
        ])
        .unwrap();

        let rendered = to_string_map(&map);
        assert_eq!(rendered["x-load-tester"], vec!["k6"]);
        assert_eq!(rendered["multi"], vec!["a", "b"]);
    }

    #[test]
    fn binary_keys_carry_raw_bytes() {
        let map = to_metadata_map(&[("Trace-Bin".to_string(), "abc".to_string())]).unwrap();

        let value = map.get_bin("trace-bin").unwrap();
        assert_eq!(value.to_bytes().unwrap().as_ref(), b"abc");
        assert_eq!(to_string_map(&map)["trace-bin"], vec![STANDARD.encode("abc")]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = to_metadata_map(&[("key".to_string(), "line\nbreak".to_string())]).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { .. }));

        let err = to_metadata_map(&[("bad key".to_string(), "v".to_string())]).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidKey { .. }));
    }
}
