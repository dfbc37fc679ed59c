#![allow(dead_code)]

use chatgen::tokenizer::{SpecialTokens, UnigramTokenizer, Vocab};
use chatgen::{
    CancelToken, GenerationConfig, ModelError, ModelInputs, ModelOutputs, ModelPort, OutputTensor,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

pub const VOCAB: [&str; 9] = [
    "<unk>", "<s>", "</s>", "<pad>", "▁", "▁hello", "▁world", "▁there", "▁hi",
];
pub const BOS: u32 = 1;
pub const EOS: u32 = 2;
pub const SPACE: u32 = 4;
pub const HELLO: u32 = 5;
pub const WORLD: u32 = 6;
pub const THERE: u32 = 7;
pub const HI: u32 = 8;

pub fn tokenizer() -> UnigramTokenizer {
    let vocab = Vocab::from_pieces(VOCAB.iter().map(|p| (*p, -1.0)));
    let specials = SpecialTokens::fallback(vocab.len(), "test vocabulary");
    UnigramTokenizer::new(vocab, specials)
}

/// Greedy, seeded config over the test vocabulary.
pub fn config(max_new_tokens: usize, max_context_tokens: usize) -> GenerationConfig {
    GenerationConfig {
        temperature: 1.0,
        top_k: 1,
        top_p: 1.0,
        max_new_tokens,
        max_context_tokens,
        seed: Some(0),
        ..Default::default()
    }
}

/// What the scripted model answers on one call.
#[derive(Clone, Debug)]
pub enum Step {
    /// `[1, L, V]` logits strongly favoring one id.
    Favor(u32),
    /// `[1, 1, V]` logits favoring one id.
    SingleStep(u32),
    /// Flat `[1, L, V]` logits.
    Flat,
    Fail(ModelError),
    Raw(OutputTensor),
}

/// Model port double that replays a script and records its inputs.
pub struct ScriptedModel {
    pub vocab_size: usize,
    pub script: VecDeque<Step>,
    pub fallback: Step,
    pub calls: Arc<AtomicUsize>,
    pub inputs: Arc<Mutex<Vec<Vec<i64>>>>,
    pub cancel_after: Option<(usize, CancelToken)>,
    pub gate: Option<Receiver<()>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            vocab_size: VOCAB.len(),
            script: script.into(),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
            cancel_after: None,
            gate: None,
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(Vec::new(), step)
    }

    fn logits(&self, len: usize, favored: u32) -> Vec<f32> {
        let mut data = vec![0.0; len * self.vocab_size];
        data[(len - 1) * self.vocab_size + favored as usize] = 100.0;
        data
    }
}

impl ModelPort for ScriptedModel {
    fn run(&mut self, inputs: &ModelInputs) -> Result<ModelOutputs, ModelError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        let ids = inputs.get("input_ids").expect("input_ids tensor");
        let mask = inputs.get("attention_mask").expect("attention_mask tensor");
        assert_eq!(ids.shape(), mask.shape());
        assert_eq!(ids.shape()[0], 1);
        self.inputs.lock().unwrap().push(ids.row(0).to_vec());

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if call >= *after {
                token.cancel();
            }
        }

        let len = ids.shape()[1];
        let step = self.script.pop_front().unwrap_or_else(|| self.fallback.clone());
        let vocab = self.vocab_size;
        let tensor = match step {
            Step::Favor(id) => OutputTensor::float(vec![1, len, vocab], self.logits(len, id)),
            Step::SingleStep(id) => OutputTensor::float(vec![1, 1, vocab], self.logits(1, id)),
            Step::Flat => OutputTensor::float(vec![1, len, vocab], vec![0.0; len * vocab]),
            Step::Fail(err) => return Err(err),
            Step::Raw(tensor) => tensor,
        };
        Ok(ModelOutputs::new().with("logits", tensor))
    }
}
