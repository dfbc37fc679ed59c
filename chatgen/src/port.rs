//! Boundary to the inference runtime.
//!
//! The engine hands a [`ModelPort`] named `[1, L]` integer tensors and reads
//! back a named score tensor. Nothing here knows how the model computes; the
//! runtime is free to be an ONNX session, a quantized toy model or a test
//! double.

use crate::error::ModelError;
use crate::tokenizer::TokenId;
use ndarray::Array2;
use std::collections::HashMap;

/// Stateless tensor computation called once per generation step.
pub trait ModelPort {
    fn run(&mut self, inputs: &ModelInputs) -> Result<ModelOutputs, ModelError>;
}

impl<M: ModelPort + ?Sized> ModelPort for Box<M> {
    fn run(&mut self, inputs: &ModelInputs) -> Result<ModelOutputs, ModelError> {
        (**self).run(inputs)
    }
}

/// Named integer input tensors, batch dimension 1.
#[derive(Clone, Debug, Default)]
pub struct ModelInputs {
    tensors: HashMap<String, Array2<i64>>,
}

impl ModelInputs {
    /// `input_ids` holding `ids` and an all-ones `attention_mask` of the same
    /// length, under the given names.
    pub fn for_sequence(ids: &[TokenId], input_ids: &str, attention_mask: &str) -> Self {
        let len = ids.len();
        let ids = Array2::from_shape_fn((1, len), |(_, i)| ids[i] as i64);
        let mask: Array2<i64> = Array2::ones((1, len));
        let mut tensors = HashMap::with_capacity(2);
        tensors.insert(input_ids.to_string(), ids);
        tensors.insert(attention_mask.to_string(), mask);
        Self { tensors }
    }

    pub fn get(&self, name: &str) -> Option<&Array2<i64>> {
        self.tensors.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Array2<i64>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }
}

/// Typed flat buffer of an output tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Float32(Vec<f32>),
    Int64(Vec<i64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TensorData::Float32(_) => "f32",
            TensorData::Int64(_) => "i64",
        }
    }
}

/// Output tensor as reported by the runtime: declared shape plus row-major
/// data. The two are not guaranteed to agree.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl OutputTensor {
    pub fn float(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            shape,
            data: TensorData::Float32(data),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelOutputs {
    tensors: HashMap<String, OutputTensor>,
}

impl ModelOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, tensor: OutputTensor) -> Self {
        self.tensors.insert(name.into(), tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OutputTensor> {
        self.tensors.get(name)
    }
}

/// Score vector for the final position of a `seq_len`-long input.
///
/// Accepts `[1, L, V]` (full sequence) and `[1, 1, V]` / `[1, V]` (single
/// time step) layouts. `V` must equal `vocab_size`.
pub fn last_position_scores<'a>(
    outputs: &'a ModelOutputs,
    name: &str,
    seq_len: usize,
    vocab_size: usize,
) -> Result<&'a [f32], ModelError> {
    let tensor = outputs
        .get(name)
        .ok_or_else(|| ModelError::MissingOutput(name.to_string()))?;
    let data = match &tensor.data {
        TensorData::Float32(data) => data,
        other => {
            return Err(ModelError::WrongElementType {
                name: name.to_string(),
                found: other.type_name(),
            });
        }
    };

    let shape = &tensor.shape;
    let declared = shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
    if shape.is_empty() || declared != Some(data.len()) {
        return Err(ModelError::ShapeMismatch {
            shape: shape.clone(),
            len: data.len(),
        });
    }

    let vocab = shape[shape.len() - 1];
    if vocab != vocab_size {
        return Err(ModelError::VocabularyMismatch {
            expected: vocab_size,
            found: vocab,
        });
    }

    let steps = match shape.as_slice() {
        [1, steps, _] => *steps,
        [1, _] => 1,
        _ => {
            return Err(ModelError::UnexpectedLayout {
                shape: shape.clone(),
                seq_len,
            })
        }
    };
    let offset = if steps == 1 {
        0
    } else if steps == seq_len {
        (seq_len - 1) * vocab
    } else {
        return Err(ModelError::UnexpectedLayout {
            shape: shape.clone(),
            seq_len,
        });
    };
    Ok(&data[offset..offset + vocab])
}
