//! Mobile front end for `chatgen`.
//!
//! [`QuantizedModel`] is a small int8 model (embedding + output head) that
//! implements [`ModelPort`], enough to drive the engine on a phone or in
//! demos without an external runtime. [`ffi`] exposes the chat session to a
//! native UI.

use bytemuck::cast_slice;
use chatgen::{ModelError, ModelInputs, ModelOutputs, ModelPort, OutputTensor, TensorNames};
use memmap2::MmapOptions;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub mod ffi;

/// Symmetric int8 quantization of a tensor with a single scale factor.
fn quantize_tensor(t: &Array2<f32>) -> (Vec<i8>, f32) {
    let max = t.iter().fold(0.0_f32, |m, &v| m.max(v.abs()));
    let scale = if max == 0.0 { 1.0 } else { 127.0 / max };
    let data = t.iter().map(|&v| (v * scale).round() as i8).collect();
    (data, 1.0 / scale)
}

/// Row-major int8 matrix.
#[derive(Clone, Debug)]
pub struct QMatrix {
    data: Vec<i8>,
    scale: f32,
    rows: usize,
    cols: usize,
}

impl QMatrix {
    pub fn quantize(t: &Array2<f32>) -> Self {
        let (data, scale) = quantize_tensor(t);
        Self {
            data,
            scale,
            rows: t.nrows(),
            cols: t.ncols(),
        }
    }

    pub fn dequantize(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.rows, self.cols), |(i, j)| {
            self.data[i * self.cols + j] as f32 * self.scale
        })
    }

    fn row(&self, i: usize) -> impl Iterator<Item = f32> + '_ {
        self.data[i * self.cols..(i + 1) * self.cols]
            .iter()
            .map(move |&q| q as f32 * self.scale)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.rows as u32).to_le_bytes())?;
        w.write_all(&(self.cols as u32).to_le_bytes())?;
        w.write_all(&self.scale.to_le_bytes())?;
        w.write_all(cast_slice(&self.data))
    }

    fn read_from(reader: &mut ByteReader<'_>) -> io::Result<Self> {
        let rows = reader.u32()? as usize;
        let cols = reader.u32()? as usize;
        let scale = reader.f32()?;
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| invalid_data("matrix dimensions overflow"))?;
        let data = cast_slice::<u8, i8>(reader.take(len)?).to_vec();
        Ok(Self {
            data,
            scale,
            rows,
            cols,
        })
    }
}

/// Embedding table plus output head. The hidden state at position `t` is the
/// mean of the embeddings of tokens `0..=t`, so every step depends on the full
/// sequence.
#[derive(Clone, Debug)]
pub struct QuantizedModel {
    embed: QMatrix,
    head: QMatrix,
    bias: Option<Array1<f32>>,
    names: TensorNames,
}

impl QuantizedModel {
    /// Random weights for a vocabulary of `vocab` tokens.
    pub fn random(vocab: usize, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let embed = Array2::from_shape_fn((vocab, dim), |_| rng.gen_range(-0.1..0.1));
        let head = Array2::from_shape_fn((vocab, dim), |_| rng.gen_range(-0.1..0.1));
        let bias = Array1::from_shape_fn(vocab, |_| rng.gen_range(-0.1..0.1));
        Self {
            embed: QMatrix::quantize(&embed),
            head: QMatrix::quantize(&head),
            bias: Some(bias),
            names: TensorNames::default(),
        }
    }

    /// Read tensors under `names` instead of the defaults.
    pub fn with_tensor_names(mut self, names: TensorNames) -> Self {
        self.names = names;
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.head.rows
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut f = File::create(path)?;
        self.embed.write_to(&mut f)?;
        self.head.write_to(&mut f)?;
        match &self.bias {
            Some(b) => {
                f.write_all(&[1u8])?;
                for v in b.iter() {
                    f.write_all(&v.to_le_bytes())?;
                }
            }
            None => f.write_all(&[0u8])?,
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn load_mmap<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_bytes(&mmap[..])
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = ByteReader { buf: bytes, pos: 0 };
        let embed = QMatrix::read_from(&mut reader)?;
        let head = QMatrix::read_from(&mut reader)?;
        if embed.rows != head.rows || embed.cols != head.cols {
            return Err(invalid_data("embedding and head shapes differ"));
        }
        let bias = match reader.take(1)?[0] {
            0 => None,
            _ => {
                let mut b = Vec::with_capacity(head.rows);
                for _ in 0..head.rows {
                    b.push(reader.f32()?);
                }
                Some(Array1::from(b))
            }
        };
        Ok(Self {
            embed,
            head,
            bias,
            names: TensorNames::default(),
        })
    }

    /// Logits for every position, `tokens.len() x vocab`.
    pub fn forward(&self, tokens: &[usize]) -> Result<Array2<f32>, ModelError> {
        let dim = self.embed.cols;
        let mut hidden = Array2::<f32>::zeros((tokens.len(), dim));
        let mut running = vec![0.0f32; dim];
        for (t, &tok) in tokens.iter().enumerate() {
            if tok >= self.embed.rows {
                return Err(ModelError::Runtime(format!(
                    "token id {} outside vocabulary of {}",
                    tok, self.embed.rows
                )));
            }
            for (acc, v) in running.iter_mut().zip(self.embed.row(tok)) {
                *acc += v;
            }
            let n = (t + 1) as f32;
            for (d, acc) in running.iter().enumerate() {
                hidden[[t, d]] = acc / n;
            }
        }

        let mut out = hidden.dot(&self.head.dequantize().t());
        if let Some(b) = &self.bias {
            out += &b.view().insert_axis(Axis(0));
        }
        Ok(out)
    }
}

impl ModelPort for QuantizedModel {
    fn run(&mut self, inputs: &ModelInputs) -> Result<ModelOutputs, ModelError> {
        let ids = inputs.get(&self.names.input_ids).ok_or_else(|| {
            ModelError::Runtime(format!("missing input `{}`", self.names.input_ids))
        })?;
        if let Some(mask) = inputs.get(&self.names.attention_mask) {
            if mask.shape() != ids.shape() {
                return Err(ModelError::Runtime(
                    "attention mask shape differs from input ids".to_string(),
                ));
            }
        }

        let tokens = ids
            .row(0)
            .iter()
            .map(|&id| {
                usize::try_from(id)
                    .map_err(|_| ModelError::Runtime(format!("negative token id {}", id)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let logits = self.forward(&tokens)?;
        let (len, vocab) = logits.dim();
        let data = logits.iter().copied().collect();
        let tensor = OutputTensor::float(vec![1, len, vocab], data);
        Ok(ModelOutputs::new().with(self.names.logits.clone(), tensor))
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        let end = end.ok_or_else(|| invalid_data("model file truncated"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> io::Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn f32(&mut self) -> io::Result<f32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(f32::from_le_bytes(raw))
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
