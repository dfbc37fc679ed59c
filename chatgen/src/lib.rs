//! Library crate driving local chat generation.
//!
//! Text goes through the [`tokenizer`], the [`engine`] repeatedly asks a
//! [`port::ModelPort`] for next-token scores and the [`sampler`] picks the
//! continuation. [`session`] moves the engine onto a worker thread for
//! interactive front ends and [`transcript`] keeps a SQLite record of turns.

pub mod config;
pub mod engine;
pub mod error;
pub mod port;
pub mod sampler;
pub mod session;
pub mod tokenizer;
pub mod transcript;

pub use config::{GenerationConfig, SourcePaths, TensorNames};
pub use engine::{CancelToken, GenerationEngine, StopReason, TurnReply, TurnStatus};
pub use error::{ConfigError, EngineError, ModelError, TokenizerError};
pub use port::{ModelInputs, ModelOutputs, ModelPort, OutputTensor, TensorData};
pub use sampler::{Sampler, SamplingParams};
pub use session::{ChatSession, PendingReply, SessionError};
pub use tokenizer::{SpecialTokens, TokenId, Tokenizer};
