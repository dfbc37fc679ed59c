//! Resolution of the BOS/EOS/UNK/PAD ids.

use super::vocab::Vocab;
use super::TokenId;
use serde_json::Value;
use std::path::Path;

const FALLBACK_UNK: TokenId = 0;
const FALLBACK_BOS: TokenId = 1;
const FALLBACK_EOS: TokenId = 2;
const FALLBACK_PAD: TokenId = 3;

/// Where the special ids came from.
#[derive(Clone, Debug, PartialEq)]
pub enum SpecialTokenOrigin {
    /// Read from the side-channel document.
    Configured,
    /// Hard-coded fallbacks; `reason` says why the document was not used.
    Fallback { reason: String },
}

/// Special-token ids. `None` means the role has no token.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecialTokens {
    pub bos: Option<TokenId>,
    pub eos: Option<TokenId>,
    pub unk: Option<TokenId>,
    pub pad: Option<TokenId>,
    pub origin: SpecialTokenOrigin,
}

impl SpecialTokens {
    /// The fixed `{unk:0, bos:1, eos:2, pad:3}` assignment, limited to ids
    /// that exist in a vocabulary of `vocab_size` entries.
    pub fn fallback(vocab_size: usize, reason: impl Into<String>) -> Self {
        Self {
            bos: in_range(FALLBACK_BOS, vocab_size),
            eos: in_range(FALLBACK_EOS, vocab_size),
            unk: in_range(FALLBACK_UNK, vocab_size),
            pad: in_range(FALLBACK_PAD, vocab_size),
            origin: SpecialTokenOrigin::Fallback {
                reason: reason.into(),
            },
        }
    }

    /// Resolve against `vocab`, reading the optional side-channel at `path`.
    ///
    /// A missing or unreadable document degrades to [`SpecialTokens::fallback`]
    /// with a warning; it never fails.
    pub fn resolve(vocab: &Vocab, path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::fallback(vocab.len(), "no special-token map configured");
        };
        let doc = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {:?}: {}", path, e))
            .and_then(|text| {
                serde_json::from_str::<Value>(&text)
                    .map_err(|e| format!("cannot parse {:?}: {}", path, e))
            });
        match doc {
            Ok(doc) if doc.is_object() => Self::from_document(vocab, &doc),
            Ok(_) => degraded(vocab, format!("{:?} is not a JSON object", path)),
            Err(reason) => degraded(vocab, reason),
        }
    }

    /// Resolve from an already parsed side-channel document. Fields that are
    /// absent or name unknown pieces keep their fallback id.
    pub fn from_document(vocab: &Vocab, doc: &Value) -> Self {
        let size = vocab.len();
        Self {
            bos: role(vocab, doc, "bos", FALLBACK_BOS),
            eos: role(vocab, doc, "eos", FALLBACK_EOS),
            unk: role(vocab, doc, "unk", FALLBACK_UNK),
            pad: role(vocab, doc, "pad", FALLBACK_PAD),
            origin: SpecialTokenOrigin::Configured,
        }
        .clamped(size)
    }

    /// Whether `id` carries no surface text.
    pub fn is_silent(&self, id: TokenId) -> bool {
        Some(id) == self.bos || Some(id) == self.eos || Some(id) == self.pad
    }

    fn clamped(mut self, size: usize) -> Self {
        self.bos = self.bos.and_then(|id| in_range(id, size));
        self.eos = self.eos.and_then(|id| in_range(id, size));
        self.unk = self.unk.and_then(|id| in_range(id, size));
        self.pad = self.pad.and_then(|id| in_range(id, size));
        self
    }
}

fn degraded(vocab: &Vocab, reason: String) -> SpecialTokens {
    tracing::warn!("Special-token map unusable, using fallback ids: {}", reason);
    SpecialTokens::fallback(vocab.len(), reason)
}

/// `<role>_token_id` wins over `<role>_token`; negative ids mean "absent".
fn role(vocab: &Vocab, doc: &Value, role: &str, fallback: TokenId) -> Option<TokenId> {
    if let Some(id) = doc.get(format!("{}_token_id", role)).and_then(Value::as_i64) {
        return TokenId::try_from(id).ok();
    }
    let literal = match doc.get(format!("{}_token", role)) {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Object(obj)) => obj.get("content").and_then(Value::as_str),
        _ => None,
    };
    match literal {
        Some(piece) => match vocab.id_of(piece) {
            Some(id) => Some(id),
            None => {
                tracing::warn!(
                    "Special token {:?} for role {} is not in the vocabulary",
                    piece,
                    role
                );
                Some(fallback)
            }
        },
        None => Some(fallback),
    }
}

fn in_range(id: TokenId, size: usize) -> Option<TokenId> {
    ((id as usize) < size).then_some(id)
}
