//! Vocabulary tables and the file formats they are read from.

use super::TokenId;
use crate::error::TokenizerError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Largest run of unused ids a sparse vocabulary file may introduce.
const MAX_ID_GAP: usize = 1 << 16;

/// Segmentation family a vocabulary file was written for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VocabKind {
    /// Scored subword pieces, segmented with Viterbi search.
    Unigram,
    /// Whole words separated by whitespace.
    WordLevel,
}

/// Immutable piece <-> id table with per-piece scores.
#[derive(Clone, Debug)]
pub struct Vocab {
    pieces: Vec<String>,
    scores: Vec<f32>,
    index: HashMap<String, TokenId>,
    kind: VocabKind,
}

impl Vocab {
    /// Build from `(piece, score)` pairs; the id of a piece is its position.
    pub fn from_pieces<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let entries = pieces
            .into_iter()
            .enumerate()
            .map(|(id, (piece, score))| (id as TokenId, piece.into(), score))
            .collect();
        Self::from_entries(entries, VocabKind::Unigram)
    }

    /// Build a word-level table where every word has the same score.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = words
            .into_iter()
            .enumerate()
            .map(|(id, word)| (id as TokenId, word.into(), 0.0))
            .collect();
        Self::from_entries(entries, VocabKind::WordLevel)
    }

    /// Build from sparse `(id, piece, score)` entries. The table grows to the
    /// highest id; later entries overwrite earlier ones at the same id and
    /// holes stay as empty pieces that never match.
    pub fn from_entries(entries: Vec<(TokenId, String, f32)>, kind: VocabKind) -> Self {
        let size = entries.iter().map(|(id, _, _)| *id as usize + 1).max().unwrap_or(0);
        let mut pieces = vec![String::new(); size];
        let mut scores = vec![0.0; size];
        for (id, piece, score) in entries {
            pieces[id as usize] = piece;
            scores[id as usize] = score;
        }

        let mut index = HashMap::with_capacity(size);
        for (id, piece) in pieces.iter().enumerate() {
            if !piece.is_empty() {
                // lowest id wins for duplicated pieces
                index.entry(piece.clone()).or_insert(id as TokenId);
            }
        }
        Self {
            pieces,
            scores,
            index,
            kind,
        }
    }

    /// Load a `tokenizer.json`, a JSON piece list, or a SentencePiece
    /// `.vocab` file (`piece<TAB>score` per line).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TokenizerError::VocabularyNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let trimmed = text.trim_start();
        let vocab = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let doc: Value =
                serde_json::from_str(&text).map_err(|e| malformed(path, e.to_string()))?;
            Self::from_json(&doc).map_err(|reason| malformed(path, reason))?
        } else {
            Self::from_piece_list(&text).map_err(|reason| malformed(path, reason))?
        };
        if vocab.is_empty() {
            return Err(malformed(path, "vocabulary is empty".to_string()));
        }
        tracing::info!(
            "Loaded {} vocabulary with {} entries from {:?}",
            vocab.kind.label(),
            vocab.len(),
            path
        );
        Ok(vocab)
    }

    fn from_json(doc: &Value) -> Result<Self, String> {
        // bare piece list: [["piece", score], ...]
        if let Value::Array(items) = doc {
            let entries = scored_pieces(items)?;
            return Ok(Self::from_entries(entries, VocabKind::Unigram));
        }

        let model = doc.get("model").ok_or("missing `model` section")?;
        let (mut entries, kind) = match model.get("vocab") {
            Some(Value::Array(items)) => (scored_pieces(items)?, VocabKind::Unigram),
            Some(Value::Object(map)) => {
                let mut entries = Vec::with_capacity(map.len());
                for (piece, id) in map {
                    let id = id
                        .as_u64()
                        .ok_or_else(|| format!("id of `{}` is not an unsigned integer", piece))?;
                    entries.push((to_token_id(id)?, piece.clone(), 0.0));
                }
                let kind = match model.get("type").and_then(Value::as_str) {
                    Some("WordLevel") => VocabKind::WordLevel,
                    _ => VocabKind::Unigram,
                };
                (entries, kind)
            }
            _ => return Err("`model.vocab` must be an array or an object".to_string()),
        };

        if let Some(added) = doc.get("added_tokens") {
            let added = added.as_array().ok_or("`added_tokens` must be an array")?;
            for token in added {
                let id = token
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or("added token without a numeric `id`")?;
                let content = token
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or("added token without `content`")?;
                entries.push((to_token_id(id)?, content.to_string(), 0.0));
            }
        }
        check_id_range(&entries)?;
        Ok(Self::from_entries(entries, kind))
    }

    fn from_piece_list(text: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let (piece, score) = match line.rsplit_once('\t') {
                Some((piece, score)) => {
                    let score = score
                        .trim()
                        .parse::<f32>()
                        .map_err(|_| format!("line {}: bad score `{}`", line_no + 1, score))?;
                    (piece, score)
                }
                None => (line, 0.0),
            };
            entries.push((entries.len() as TokenId, piece.to_string(), score));
        }
        Ok(Self::from_entries(entries, VocabKind::Unigram))
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn kind(&self) -> VocabKind {
        self.kind
    }

    pub fn id_of(&self, piece: &str) -> Option<TokenId> {
        self.index.get(piece).copied()
    }

    /// Piece for `id`, or None outside `[0, len)`.
    pub fn piece(&self, id: TokenId) -> Option<&str> {
        self.pieces.get(id as usize).map(String::as_str)
    }

    pub fn score(&self, id: TokenId) -> f32 {
        self.scores.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn min_score(&self) -> f32 {
        self.scores.iter().copied().fold(f32::INFINITY, f32::min).min(0.0)
    }

    /// Length in chars of the longest piece.
    pub fn max_piece_chars(&self) -> usize {
        self.pieces.iter().map(|p| p.chars().count()).max().unwrap_or(0)
    }
}

impl VocabKind {
    fn label(self) -> &'static str {
        match self {
            VocabKind::Unigram => "unigram",
            VocabKind::WordLevel => "word-level",
        }
    }
}

fn scored_pieces(items: &[Value]) -> Result<Vec<(TokenId, String, f32)>, String> {
    items
        .iter()
        .enumerate()
        .map(|(id, item)| {
            let pair = item
                .as_array()
                .ok_or_else(|| format!("entry {} is not a [piece, score] pair", id))?;
            let piece = pair
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| format!("entry {} has no piece string", id))?;
            let score = pair.get(1).and_then(Value::as_f64).unwrap_or(0.0) as f32;
            Ok((id as TokenId, piece.to_string(), score))
        })
        .collect()
}

/// Sparse ids may leave holes, but not more than `MAX_ID_GAP` past the
/// number of entries; the piece table is sized by the highest id.
fn check_id_range(entries: &[(TokenId, String, f32)]) -> Result<(), String> {
    let limit = entries.len().saturating_add(MAX_ID_GAP);
    match entries.iter().map(|(id, _, _)| *id as usize).max() {
        Some(max) if max >= limit => Err(format!(
            "token id {} is too far beyond the {} vocabulary entries",
            max,
            entries.len()
        )),
        _ => Ok(()),
    }
}

fn to_token_id(id: u64) -> Result<TokenId, String> {
    TokenId::try_from(id).map_err(|_| format!("token id {} out of range", id))
}

fn malformed(path: &Path, reason: String) -> TokenizerError {
    TokenizerError::MalformedVocabulary {
        path: path.to_path_buf(),
        reason,
    }
}
