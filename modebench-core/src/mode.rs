//! Optimization modes and model size tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RequestError;

/// An inference optimization mode under benchmark.
///
/// Variants are declared in alphabetical order of their wire tag, so the derived
/// `Ord` gives the lexicographic key order used by summary maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Baseline,
    Batched,
    Onnx,
    Quantized,
    Torchscript,
}

impl Mode {
    /// Every mode, in the order they are registered and swept.
    pub const SWEEP_ORDER: [Mode; 5] = [
        Mode::Baseline,
        Mode::Quantized,
        Mode::Torchscript,
        Mode::Onnx,
        Mode::Batched,
    ];

    /// Wire tag for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Baseline => "baseline",
            Mode::Batched => "batched",
            Mode::Onnx => "onnx",
            Mode::Quantized => "quantized",
            Mode::Torchscript => "torchscript",
        }
    }

    /// Whether requests for this mode go through the batcher instead of a
    /// dedicated backend.
    pub fn is_batched(&self) -> bool {
        matches!(self, Mode::Batched)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseline" => Ok(Mode::Baseline),
            "batched" => Ok(Mode::Batched),
            "onnx" => Ok(Mode::Onnx),
            "quantized" => Ok(Mode::Quantized),
            "torchscript" => Ok(Mode::Torchscript),
            other => Err(RequestError::UnknownMode(other.to_string())),
        }
    }
}

/// Model size tag echoed back in inference responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    /// gpt2, 124M parameters
    #[default]
    Small,
    /// gpt2-medium, 355M parameters
    Medium,
}

impl ModelSize {
    /// Model name behind this size tag
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelSize::Small => "gpt2",
            ModelSize::Medium => "gpt2-medium",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_roundtrip_tags() {
        for mode in Mode::SWEEP_ORDER {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_unknown_mode() {
        let err = "tensorrt".parse::<Mode>().unwrap_err();
        assert_eq!(err, RequestError::UnknownMode("tensorrt".to_string()));
    }

    #[test]
    fn test_mode_order_is_lexicographic() {
        let mut modes = Mode::SWEEP_ORDER.to_vec();
        modes.sort();
        let tags: Vec<&str> = modes.iter().map(|m| m.as_str()).collect();
        let mut sorted_tags = tags.clone();
        sorted_tags.sort();
        assert_eq!(tags, sorted_tags);
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&Mode::Torchscript).unwrap(), "\"torchscript\"");
        let mode: Mode = serde_json::from_str("\"onnx\"").unwrap();
        assert_eq!(mode, Mode::Onnx);
        assert!(serde_json::from_str::<Mode>("\"bogus\"").is_err());
    }

    #[test]
    fn test_model_size() {
        assert_eq!(ModelSize::default(), ModelSize::Small);
        assert_eq!(ModelSize::Medium.model_name(), "gpt2-medium");
    }
}
