//! Parameter substitution helpers for component and trait properties.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A value that is substituted into a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Translate a parameter list into a typed struct.
pub fn translate<T: DeserializeOwned>(params: &[ParameterValue]) -> Result<T> {
    let props: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.clone(), Value::String(p.value.clone())))
        .collect();
    serde_json::from_value(Value::Object(props)).context("translating parameter values")
}

/// Translate a flat struct back into a parameter list.
pub fn translate_reverse<T: Serialize>(value: &T) -> Result<Vec<ParameterValue>> {
    let props: Map<String, Value> =
        serde_json::from_value(serde_json::to_value(value)?).context("flattening parameters")?;
    let mut out = Vec::with_capacity(props.len());
    for (name, v) in props {
        let value = match v {
            Value::String(s) => s,
            other => other.to_string(),
        };
        out.push(ParameterValue { name, value });
    }
    Ok(out)
}

/// Substitute `${parameter_key}` placeholders in raw JSON properties,
/// recursing into nested objects. Unmatched keys substitute to "".
pub fn extract_params(params: &[ParameterValue], raw: &Value) -> Result<Map<String, Value>> {
    let mut values: Map<String, Value> =
        serde_json::from_value(raw.clone()).context("parsing raw properties")?;
    extract_from_map(params, &mut values);
    Ok(values)
}

fn extract_from_map(params: &[ParameterValue], values: &mut Map<String, Value>) {
    for (_k, v) in values.iter_mut() {
        let substituted = match v {
            Value::String(s) => {
                match_pattern(s).map(|key| Value::String(param_value(params, &key).to_string()))
            }
            Value::Object(sub) => {
                extract_from_map(params, sub);
                None
            }
            _ => None,
        };
        if let Some(s) = substituted {
            *v = s;
        }
    }
}

fn match_pattern(value: &str) -> Option<String> {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(|key| key.to_string())
}

fn param_value<'a>(params: &'a [ParameterValue], key: &str) -> &'a str {
    params.iter().find(|p| p.name == key).map(|p| p.value.as_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_substitutes_nested_placeholders() {
        let params = vec![
            ParameterValue::new("image", "nginx:1.25"),
            ParameterValue::new("port", "8080"),
        ];
        let raw = json!({
            "image": "${image}",
            "fixed": "as-is",
            "nested": { "port": " ${port} " },
        });
        let out = extract_params(&params, &raw).unwrap();
        assert_eq!(out["image"], json!("nginx:1.25"));
        assert_eq!(out["fixed"], json!("as-is"));
        assert_eq!(out["nested"]["port"], json!("8080"));
    }

    #[test]
    fn unmatched_placeholder_becomes_empty() {
        let raw = json!({ "v": "${missing}" });
        let out = extract_params(&[], &raw).unwrap();
        assert_eq!(out["v"], json!(""));
    }

    #[test]
    fn translate_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Rollout {
            strategy: String,
        }
        let params = vec![ParameterValue::new("strategy", "canary")];
        let typed: Rollout = translate(&params).unwrap();
        assert_eq!(typed, Rollout { strategy: "canary".into() });
        let back = translate_reverse(&typed).unwrap();
        assert_eq!(back, params);
    }
}
