//! Subword tokenization.
//!
//! [`Tokenizer`] is the capability the engine depends on. Two backends
//! implement it: [`UnigramTokenizer`] for scored SentencePiece-style
//! vocabularies and [`WordTokenizer`] for whitespace word lists. The backend
//! is chosen once, in [`load_tokenizer`], from the vocabulary file.

mod special;
mod unigram;
mod vocab;
mod word;

#[cfg(test)]
mod tests;

pub use special::{SpecialTokenOrigin, SpecialTokens};
pub use unigram::UnigramTokenizer;
pub use vocab::{Vocab, VocabKind};
pub use word::WordTokenizer;

use crate::config::SourcePaths;
use crate::error::TokenizerError;

pub type TokenId = u32;

/// Word-boundary marker used by metaspace vocabularies.
pub const METASPACE: char = '▁';
/// Text emitted for ids outside the vocabulary.
pub const UNK_MARKER: &str = "<unk>";

pub trait Tokenizer: Send {
    /// Split `text` into ids. Never fails: unmapped text becomes UNK.
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<TokenId>;

    /// Render ids as text, dropping BOS/EOS/PAD and trimming whitespace.
    fn decode(&self, ids: &[TokenId]) -> String;

    fn special_tokens(&self) -> &SpecialTokens;

    fn vocab_size(&self) -> usize;
}

impl<T: Tokenizer + ?Sized> Tokenizer for Box<T> {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<TokenId> {
        (**self).encode(text, add_bos, add_eos)
    }

    fn decode(&self, ids: &[TokenId]) -> String {
        (**self).decode(ids)
    }

    fn special_tokens(&self) -> &SpecialTokens {
        (**self).special_tokens()
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

/// Load the vocabulary named by `sources`, resolve its special tokens and
/// pick the matching backend.
pub fn load_tokenizer(sources: &SourcePaths) -> Result<Box<dyn Tokenizer>, TokenizerError> {
    let vocab = Vocab::load(&sources.vocabulary)?;
    let specials = SpecialTokens::resolve(&vocab, sources.special_tokens.as_deref());
    tracing::debug!(
        "Special tokens: bos={:?} eos={:?} unk={:?} pad={:?} ({:?})",
        specials.bos,
        specials.eos,
        specials.unk,
        specials.pad,
        specials.origin
    );
    Ok(match vocab.kind() {
        VocabKind::Unigram => Box::new(UnigramTokenizer::new(vocab, specials)),
        VocabKind::WordLevel => Box::new(WordTokenizer::new(vocab, specials)),
    })
}

/// Surround `ids` with BOS/EOS when requested and defined.
fn wrap(
    mut ids: Vec<TokenId>,
    specials: &SpecialTokens,
    add_bos: bool,
    add_eos: bool,
) -> Vec<TokenId> {
    if add_bos {
        if let Some(bos) = specials.bos {
            ids.insert(0, bos);
        }
    }
    if add_eos {
        if let Some(eos) = specials.eos {
            ids.push(eos);
        }
    }
    ids
}

/// Parse a `<0xXX>` byte-fallback piece.
fn byte_piece(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}
