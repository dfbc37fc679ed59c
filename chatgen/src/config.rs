//! Static generation configuration.
//!
//! Every field is fixed for the lifetime of an engine. The struct can be
//! built in code, taken from [`Default`], or read from a JSON file in which
//! missing fields keep their defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Names of the tensors exchanged with the model port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorNames {
    pub input_ids: String,
    pub attention_mask: String,
    pub logits: String,
}

impl Default for TensorNames {
    fn default() -> Self {
        Self {
            input_ids: "input_ids".to_string(),
            attention_mask: "attention_mask".to_string(),
            logits: "logits".to_string(),
        }
    }
}

/// Locations of the files backing the tokenizer and the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePaths {
    /// `tokenizer.json` or a SentencePiece `.vocab` piece list.
    pub vocabulary: PathBuf,
    /// Optional `special_tokens_map.json`-style document.
    pub special_tokens: Option<PathBuf>,
    /// Model weights, interpreted by whichever port implementation loads them.
    pub model: PathBuf,
}

/// Tunables for one engine instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Softmax temperature; clamped away from zero when sampling.
    pub temperature: f32,
    /// Keep only the K most likely tokens (0 = disabled).
    pub top_k: usize,
    /// Nucleus threshold; values `<= 0` or `>= 1` disable it.
    pub top_p: f32,
    /// Upper bound on generated tokens per turn.
    pub max_new_tokens: usize,
    /// Bound on both the prompt window and the rolling context.
    pub max_context_tokens: usize,
    /// Mask EOS on the first step so a turn never ends empty.
    pub suppress_eos_on_first_step: bool,
    /// Seed for the sampler (None = entropy).
    pub seed: Option<u64>,
    pub tensors: TensorNames,
    pub sources: SourcePaths,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            max_new_tokens: 64,
            max_context_tokens: 512,
            suppress_eos_on_first_step: true,
            seed: None,
            tensors: TensorNames::default(),
            sources: SourcePaths::default(),
        }
    }
}

impl GenerationConfig {
    /// Read a config from a JSON file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the ranges that do not depend on the vocabulary.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(invalid(
                "temperature",
                format!("must be a positive finite number, got {}", self.temperature),
            ));
        }
        if self.top_p.is_nan() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(invalid(
                "top_p",
                format!("must lie in [0, 1], got {}", self.top_p),
            ));
        }
        if self.max_context_tokens == 0 {
            return Err(invalid(
                "max_context_tokens",
                "must be at least 1".to_string(),
            ));
        }
        let names = [
            ("tensors.input_ids", &self.tensors.input_ids),
            ("tensors.attention_mask", &self.tensors.attention_mask),
            ("tensors.logits", &self.tensors.logits),
        ];
        for (field, name) in names {
            if name.trim().is_empty() {
                return Err(invalid(field, "tensor name must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Check `top_k` against the vocabulary size of the tokenizer in use.
    pub fn validate_for_vocab(&self, vocab_size: usize) -> Result<(), ConfigError> {
        self.validate()?;
        if self.top_k > vocab_size {
            return Err(invalid(
                "top_k",
                format!("{} exceeds vocabulary size {}", self.top_k, vocab_size),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
