//! Error types shared across the crate.
//!
//! Construction-time failures ([`TokenizerError`], [`ConfigError`]) surface
//! through [`EngineError`]. [`ModelError`] is turn-scoped: the engine reports
//! it inside a [`crate::TurnReply`] instead of returning it.

use std::path::PathBuf;

/// Failures while loading a vocabulary.
#[derive(thiserror::Error, Debug)]
pub enum TokenizerError {
    #[error("vocabulary source not found: {0}")]
    VocabularyNotFound(PathBuf),

    #[error("malformed vocabulary in {path}: {reason}")]
    MalformedVocabulary { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Violations of the model port contract, or a failure inside the port.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model output `{0}` not found")]
    MissingOutput(String),

    #[error("model output `{name}` has element type {found}, expected f32")]
    WrongElementType { name: String, found: &'static str },

    #[error("model output shape {shape:?} does not match buffer of {len} elements")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    #[error("model output layout {shape:?} does not fit a sequence of length {seq_len}")]
    UnexpectedLayout { shape: Vec<usize>, seq_len: usize },

    #[error("model vocabulary size {found} differs from tokenizer vocabulary size {expected}")]
    VocabularyMismatch { expected: usize, found: usize },

    #[error("model runtime error: {0}")]
    Runtime(String),
}

/// Invalid generation configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building a [`crate::GenerationEngine`].
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
