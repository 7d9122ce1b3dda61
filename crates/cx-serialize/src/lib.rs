#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MAX_LAYER_PAYLOAD_BYTES: usize = 65_536;

const LAYER_FIELDS: [&str; 6] = [
    "name",
    "type",
    "bottom",
    "top",
    "complex_igaussian_param",
    "complex_siglog_param",
];

/// Parameters of the complex inverse-Gaussian ("energy") activation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplexIGaussianParameter {
    /// Variance-like scale `σ²`.
    pub sigma_sq: f64,
}

/// Shape parameters of the complex sigmoid-log activation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplexSiglogParameter {
    pub s: f64,
    pub d: f64,
    pub r: f64,
    pub c: f64,
}

/// One layer definition as supplied by a network description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub bottom: Vec<String>,
    #[serde(default)]
    pub top: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complex_igaussian_param: Option<ComplexIGaussianParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complex_siglog_param: Option<ComplexSiglogParameter>,
}

impl LayerParameter {
    #[must_use]
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            bottom: Vec::new(),
            top: Vec::new(),
            complex_igaussian_param: None,
            complex_siglog_param: None,
        }
    }

    #[must_use]
    pub fn with_bottom(mut self, bottom: impl Into<String>) -> Self {
        self.bottom.push(bottom.into());
        self
    }

    #[must_use]
    pub fn with_top(mut self, top: impl Into<String>) -> Self {
        self.top.push(top.into());
        self
    }

    #[must_use]
    pub fn with_complex_igaussian(mut self, sigma_sq: f64) -> Self {
        self.complex_igaussian_param = Some(ComplexIGaussianParameter { sigma_sq });
        self
    }

    #[must_use]
    pub fn with_complex_siglog(mut self, param: ComplexSiglogParameter) -> Self {
        self.complex_siglog_param = Some(param);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Any field outside the schema is an error.
    Strict,
    /// Unknown top-level fields are dropped with a warning.
    Hardened,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("invalid json: {diagnostic}")]
    InvalidJson { diagnostic: String },
    #[error("unknown field '{field}'")]
    UnknownField { field: String },
    #[error("layer definition has an empty type")]
    MissingType,
    #[error("incompatible payload: {reason}")]
    IncompatiblePayload { reason: String },
}

pub fn decode_layer_parameter(
    input: &str,
    mode: DecodeMode,
) -> Result<LayerParameter, SerializeError> {
    validate_payload_size(input)?;
    let param = match mode {
        DecodeMode::Strict => decode_strict(input)?,
        DecodeMode::Hardened => decode_hardened(input)?,
    };
    if param.layer_type.trim().is_empty() {
        return Err(SerializeError::MissingType);
    }
    Ok(param)
}

pub fn encode_layer_parameter(param: &LayerParameter) -> Result<String, SerializeError> {
    serde_json::to_string(param).map_err(|error| SerializeError::IncompatiblePayload {
        reason: format!("layer encoding failed: {error}"),
    })
}

fn decode_strict(input: &str) -> Result<LayerParameter, SerializeError> {
    serde_json::from_str(input).map_err(|error| {
        if let Some(field) = extract_unknown_field(error.to_string().as_str()) {
            SerializeError::UnknownField { field }
        } else {
            SerializeError::InvalidJson {
                diagnostic: bounded(error.to_string().as_str(), 200),
            }
        }
    })
}

fn decode_hardened(input: &str) -> Result<LayerParameter, SerializeError> {
    let mut raw: Value = serde_json::from_str(input).map_err(|error| SerializeError::InvalidJson {
        diagnostic: bounded(
            format!(
                "{error}; payload_prefix={}",
                bounded(input.replace('\n', " ").as_str(), 96)
            )
            .as_str(),
            220,
        ),
    })?;

    let obj = raw
        .as_object_mut()
        .ok_or_else(|| SerializeError::IncompatiblePayload {
            reason: "layer definition must be a JSON object".to_string(),
        })?;

    let allowed: BTreeSet<&str> = BTreeSet::from(LAYER_FIELDS);
    let unknown: Vec<String> = obj
        .keys()
        .filter(|key| !allowed.contains(key.as_str()))
        .cloned()
        .collect();
    for key in unknown {
        warn!("dropping unknown layer field '{key}'");
        obj.remove(&key);
    }

    serde_json::from_value(raw).map_err(|error| {
        if let Some(field) = extract_unknown_field(error.to_string().as_str()) {
            SerializeError::UnknownField { field }
        } else {
            SerializeError::IncompatiblePayload {
                reason: bounded(error.to_string().as_str(), 200),
            }
        }
    })
}

fn validate_payload_size(input: &str) -> Result<(), SerializeError> {
    let actual = input.len();
    if actual > MAX_LAYER_PAYLOAD_BYTES {
        return Err(SerializeError::IncompatiblePayload {
            reason: format!(
                "layer payload exceeds max bytes: actual={actual} max={MAX_LAYER_PAYLOAD_BYTES}"
            ),
        });
    }
    Ok(())
}

fn extract_unknown_field(message: &str) -> Option<String> {
    // serde_json message shape: "unknown field `x`, expected ..."
    let marker = "unknown field `";
    let start = message.find(marker)? + marker.len();
    let tail = &message[start..];
    let end = tail.find('`')?;
    Some(tail[..end].to_string())
}

fn bounded(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        input.to_string()
    } else {
        let mut boundary = max_len;
        while boundary > 0 && !input.is_char_boundary(boundary) {
            boundary -= 1;
        }
        format!("{}...", &input[..boundary])
    }
}
