//! YAML decoding for embedded manifests
//!
//! Manifests are parsed with yaml-rust2 and converted to `serde_json::Value`,
//! which is the representation every other part of the bootstrapper works with.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Error produced while decoding YAML
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct YamlError(String);

/// Parse a multi-document YAML stream.
///
/// Documents separated by `---` are returned in stream order. Empty documents
/// (a bare separator, or comments only) are dropped. Conversion errors name
/// the document's position in the stream and the field path inside it.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .enumerate()
        .filter(|(_, doc)| !matches!(doc, Yaml::Null))
        .map(|(index, doc)| {
            manifest_value(doc, "").map_err(|e| YamlError(format!("document {index}: {e}")))
        })
        .collect()
}

/// Convert one node, `at` being its dotted path from the document root
fn manifest_value(node: Yaml, at: &str) -> Result<Value, String> {
    match node {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(i.into()),
        Yaml::String(s) => Ok(Value::String(s)),
        // .inf and .nan have no JSON form and would be rejected by the server
        Yaml::Real(raw) => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("{}: {raw:?} is not a finite number", location(at))),
        Yaml::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| manifest_value(item, &format!("{at}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(entries) => {
            let mut fields = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = field_name(key)
                    .ok_or_else(|| format!("{}: mapping keys must be scalars", location(at)))?;
                let child = if at.is_empty() {
                    key.clone()
                } else {
                    format!("{at}.{key}")
                };
                fields.insert(key, manifest_value(value, &child)?);
            }
            Ok(Value::Object(fields))
        }
        Yaml::Alias(_) => Err(format!("{}: aliases are not supported", location(at))),
        Yaml::BadValue => Err(format!("{}: unreadable value", location(at))),
    }
}

fn field_name(key: Yaml) -> Option<String> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Some(s),
        Yaml::Integer(i) => Some(i.to_string()),
        Yaml::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn location(at: &str) -> &str {
    if at.is_empty() {
        "<document root>"
    } else {
        at
    }
}
