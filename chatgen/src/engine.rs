//! Autoregressive generation loop with a bounded rolling context.
//!
//! One call to [`GenerationEngine::generate`] is one conversational turn:
//! build the prompt from the rolling context and the user text, call the
//! model once per step over the full working sequence, sample, and stop on
//! EOS or after `max_new_tokens` steps. Only a turn that completes cleanly
//! touches the rolling context; aborted and cancelled turns leave it as it
//! was.

use crate::config::GenerationConfig;
use crate::error::{ConfigError, EngineError, ModelError};
use crate::port::{last_position_scores, ModelInputs, ModelPort};
use crate::sampler::{Sampler, SamplingParams};
use crate::tokenizer::{load_tokenizer, TokenId, Tokenizer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between generation steps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfSequence,
    MaxNewTokens,
}

/// How a turn ended.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnStatus {
    /// Finished cleanly; the rolling context was updated.
    Completed(StopReason),
    /// Blank input: no model call, no context change.
    Skipped,
    /// Stopped between steps on request; context unchanged.
    Cancelled,
    /// The model port failed or broke its contract; context unchanged.
    Aborted(ModelError),
}

/// Result of one turn. On abort or cancellation `tokens` holds whatever was
/// generated before the loop stopped.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    pub text: String,
    pub tokens: Vec<TokenId>,
    pub status: TurnStatus,
}

impl TurnReply {
    pub fn skipped() -> Self {
        Self {
            text: String::new(),
            tokens: Vec::new(),
            status: TurnStatus::Skipped,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TurnStatus::Completed(_))
    }

    pub fn error(&self) -> Option<&ModelError> {
        match &self.status {
            TurnStatus::Aborted(err) => Some(err),
            _ => None,
        }
    }
}

/// Token history carried between turns, never longer than `max_len`.
#[derive(Clone, Debug)]
pub struct RollingContext {
    tokens: Vec<TokenId>,
    max_len: usize,
}

impl RollingContext {
    pub fn new(max_len: usize) -> Self {
        Self {
            tokens: Vec::new(),
            max_len,
        }
    }

    /// Append, then evict the oldest tokens beyond the bound.
    pub fn extend<I: IntoIterator<Item = TokenId>>(&mut self, ids: I) {
        self.tokens.extend(ids);
        keep_suffix(&mut self.tokens, self.max_len);
    }

    pub fn as_slice(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}

pub struct GenerationEngine<M, T> {
    model: M,
    tokenizer: T,
    sampler: Sampler,
    params: SamplingParams,
    config: GenerationConfig,
    context: RollingContext,
    separator: Option<TokenId>,
}

impl<M: ModelPort> GenerationEngine<M, Box<dyn Tokenizer>> {
    /// Load the tokenizer named in `config.sources` and wrap `model`.
    pub fn from_sources(config: GenerationConfig, model: M) -> Result<Self, EngineError> {
        let tokenizer = load_tokenizer(&config.sources)?;
        Self::new(config, tokenizer, model)
    }
}

impl<M: ModelPort, T: Tokenizer> GenerationEngine<M, T> {
    pub fn new(config: GenerationConfig, tokenizer: T, model: M) -> Result<Self, EngineError> {
        let vocab_size = tokenizer.vocab_size();
        if vocab_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sources.vocabulary",
                reason: "tokenizer has an empty vocabulary".to_string(),
            }
            .into());
        }
        config.validate_for_vocab(vocab_size)?;

        let separator = tokenizer.encode(" ", false, false).first().copied();
        let params = SamplingParams {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
        };
        tracing::info!(
            "Generation engine ready: vocab={} max_new_tokens={} max_context_tokens={}",
            vocab_size,
            config.max_new_tokens,
            config.max_context_tokens
        );
        Ok(Self {
            model,
            tokenizer,
            sampler: Sampler::new(config.seed),
            params,
            context: RollingContext::new(config.max_context_tokens),
            config,
            separator,
        })
    }

    /// Run one turn to completion.
    pub fn generate(&mut self, text: &str) -> TurnReply {
        self.generate_with_cancel(text, &CancelToken::new())
    }

    /// Run one turn, checking `cancel` before every model call.
    pub fn generate_with_cancel(&mut self, text: &str, cancel: &CancelToken) -> TurnReply {
        if text.trim().is_empty() {
            return TurnReply::skipped();
        }

        let mut working = self.build_prompt(text);
        if working.is_empty() {
            tracing::debug!("Prompt encoded to no tokens, skipping turn");
            return TurnReply::skipped();
        }
        tracing::info!(
            "Turn started: prompt={} tokens, context={} tokens",
            working.len(),
            self.context.len()
        );

        let mut generated = Vec::new();
        let mut stop = StopReason::MaxNewTokens;
        for step in 0..self.config.max_new_tokens {
            if cancel.is_cancelled() {
                tracing::info!("Turn cancelled after {} tokens", generated.len());
                return self.reply(generated, TurnStatus::Cancelled);
            }
            let next = match self.step(&working, step) {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!("Turn aborted at step {}: {}", step, err);
                    return self.reply(generated, TurnStatus::Aborted(err));
                }
            };
            if Some(next) == self.tokenizer.special_tokens().eos {
                stop = StopReason::EndOfSequence;
                break;
            }
            working.push(next);
            generated.push(next);
        }

        self.context.extend(self.separator.into_iter().chain(generated.iter().copied()));
        tracing::info!("Turn completed ({:?}): {} new tokens", stop, generated.len());
        self.reply(generated, TurnStatus::Completed(stop))
    }

    /// `[BOS] + context + encode(text)`, keeping the newest
    /// `max_context_tokens`.
    fn build_prompt(&self, text: &str) -> Vec<TokenId> {
        let mut prompt: Vec<TokenId> = self.tokenizer.special_tokens().bos.into_iter().collect();
        prompt.extend_from_slice(self.context.as_slice());
        prompt.extend(self.tokenizer.encode(text, false, false));
        keep_suffix(&mut prompt, self.config.max_context_tokens);
        prompt
    }

    fn step(&mut self, working: &[TokenId], step: usize) -> Result<TokenId, ModelError> {
        let names = &self.config.tensors;
        let inputs = ModelInputs::for_sequence(working, &names.input_ids, &names.attention_mask);
        let outputs = self.model.run(&inputs)?;
        let scores = last_position_scores(
            &outputs,
            &names.logits,
            working.len(),
            self.tokenizer.vocab_size(),
        )?;

        let next = match self.tokenizer.special_tokens().eos {
            Some(eos) if step == 0 && self.config.suppress_eos_on_first_step => {
                let mut masked = scores.to_vec();
                if let Some(score) = masked.get_mut(eos as usize) {
                    *score = f32::NEG_INFINITY;
                }
                self.sampler.sample(&masked, &self.params)
            }
            _ => self.sampler.sample(scores, &self.params),
        };
        let next = next.ok_or_else(|| ModelError::Runtime("empty score vector".to_string()))?;
        tracing::debug!("Step {}: sampled token {}", step, next);
        Ok(next)
    }

    fn reply(&self, tokens: Vec<TokenId>, status: TurnStatus) -> TurnReply {
        TurnReply {
            text: self.tokenizer.decode(&tokens),
            tokens,
            status,
        }
    }

    pub fn context(&self) -> &[TokenId] {
        self.context.as_slice()
    }

    pub fn reset_context(&mut self) {
        self.context.clear();
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }
}

fn keep_suffix(tokens: &mut Vec<TokenId>, max_len: usize) {
    if tokens.len() > max_len {
        let excess = tokens.len() - max_len;
        tokens.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_context_evicts_oldest() {
        let mut context = RollingContext::new(4);
        context.extend([1, 2, 3]);
        context.extend([4, 5, 6]);
        assert_eq!(context.as_slice(), &[3, 4, 5, 6]);
    }

    #[test]
    fn keep_suffix_leaves_short_sequences() {
        let mut tokens = vec![1, 2];
        keep_suffix(&mut tokens, 5);
        assert_eq!(tokens, vec![1, 2]);
        keep_suffix(&mut tokens, 1);
        assert_eq!(tokens, vec![2]);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
