use super::special::SpecialTokens;
use super::vocab::Vocab;
use super::{wrap, TokenId, Tokenizer, UNK_MARKER};

/// Whitespace tokenizer backed by a fixed word list.
#[derive(Clone, Debug)]
pub struct WordTokenizer {
    vocab: Vocab,
    specials: SpecialTokens,
}

impl WordTokenizer {
    pub fn new(vocab: Vocab, specials: SpecialTokens) -> Self {
        Self { vocab, specials }
    }

    /// Word list whose first four entries take the fallback special roles.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vocab = Vocab::from_words(words);
        let specials = SpecialTokens::fallback(vocab.len(), "built from a word list");
        Self::new(vocab, specials)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.vocab.id_of(word).is_some()
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<TokenId> {
        let ids = text
            .split_whitespace()
            .filter_map(|word| self.vocab.id_of(word).or(self.specials.unk))
            .collect();
        wrap(ids, &self.specials, add_bos, add_eos)
    }

    fn decode(&self, ids: &[TokenId]) -> String {
        ids.iter()
            .filter(|&&id| !self.specials.is_silent(id))
            .map(|&id| self.vocab.piece(id).unwrap_or(UNK_MARKER))
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    fn special_tokens(&self) -> &SpecialTokens {
        &self.specials
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}
