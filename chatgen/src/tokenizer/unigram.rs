use super::special::SpecialTokens;
use super::vocab::Vocab;
use super::{byte_piece, wrap, TokenId, Tokenizer, METASPACE, UNK_MARKER};

/// Penalty below the lowest piece score for one unknown character.
const UNK_PENALTY: f64 = 10.0;

/// SentencePiece-style tokenizer: metaspace pre-tokenization followed by a
/// Viterbi search for the segmentation with the highest summed score.
#[derive(Clone, Debug)]
pub struct UnigramTokenizer {
    vocab: Vocab,
    specials: SpecialTokens,
    byte_ids: Vec<Option<TokenId>>,
    max_piece_chars: usize,
    unk_score: f64,
}

/// Best path ending at a char boundary.
#[derive(Clone, Copy)]
struct Node {
    score: f64,
    start: usize,
    // None marks a single unknown char
    token: Option<TokenId>,
}

impl UnigramTokenizer {
    pub fn new(vocab: Vocab, specials: SpecialTokens) -> Self {
        let byte_ids = (0..=255u8).map(|b| vocab.id_of(&format!("<0x{:02X}>", b))).collect();
        let max_piece_chars = vocab.max_piece_chars().max(1);
        let unk_score = vocab.min_score() as f64 - UNK_PENALTY;
        Self {
            vocab,
            specials,
            byte_ids,
            max_piece_chars,
            unk_score,
        }
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Pieces the segmenter may emit: special and byte pieces only appear
    /// through explicit flags or fallback.
    fn matchable(&self, piece: &str) -> Option<TokenId> {
        let id = self.vocab.id_of(piece)?;
        let special = Some(id) == self.specials.bos
            || Some(id) == self.specials.eos
            || Some(id) == self.specials.unk
            || Some(id) == self.specials.pad;
        (!special && byte_piece(piece).is_none()).then_some(id)
    }

    fn segment(&self, text: &str) -> Vec<TokenId> {
        let mut normalized = String::with_capacity(text.len() + METASPACE.len_utf8());
        normalized.push(METASPACE);
        normalized.extend(text.chars().map(|c| if c == ' ' { METASPACE } else { c }));

        let bounds: Vec<usize> = normalized
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(normalized.len()))
            .collect();
        let n = bounds.len() - 1;

        let mut lattice: Vec<Node> = Vec::with_capacity(n + 1);
        lattice.push(Node {
            score: 0.0,
            start: 0,
            token: None,
        });
        for end in 1..=n {
            // every boundary is reachable through the unknown-char edge
            let mut best = Node {
                score: lattice[end - 1].score + self.unk_score,
                start: end - 1,
                token: None,
            };
            let longest = self.max_piece_chars.min(end);
            for len in (1..=longest).rev() {
                let start = end - len;
                let piece = &normalized[bounds[start]..bounds[end]];
                if let Some(id) = self.matchable(piece) {
                    let score = lattice[start].score + self.vocab.score(id) as f64;
                    if best.token.is_none() || score > best.score {
                        best = Node {
                            score,
                            start,
                            token: Some(id),
                        };
                    }
                }
            }
            lattice.push(best);
        }

        let mut path = Vec::new();
        let mut end = n;
        while end > 0 {
            let node = lattice[end];
            path.push((node.start, end, node.token));
            end = node.start;
        }
        path.reverse();

        let mut ids = Vec::with_capacity(path.len());
        let mut last_was_unk = false;
        for (start, end, token) in path {
            match token {
                Some(id) => {
                    ids.push(id);
                    last_was_unk = false;
                }
                None => {
                    let ch = &normalized[bounds[start]..bounds[end]];
                    if let Some(bytes) = self.byte_fallback(ch) {
                        ids.extend(bytes);
                        last_was_unk = false;
                    } else if !last_was_unk {
                        if let Some(unk) = self.specials.unk {
                            ids.push(unk);
                        }
                        last_was_unk = true;
                    }
                }
            }
        }
        ids
    }

    fn byte_fallback(&self, ch: &str) -> Option<Vec<TokenId>> {
        ch.bytes().map(|b| self.byte_ids[b as usize]).collect()
    }
}

impl Tokenizer for UnigramTokenizer {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<TokenId> {
        let ids = if text.is_empty() { Vec::new() } else { self.segment(text) };
        wrap(ids, &self.specials, add_bos, add_eos)
    }

    fn decode(&self, ids: &[TokenId]) -> String {
        let mut bytes = Vec::new();
        for &id in ids {
            if self.specials.is_silent(id) {
                continue;
            }
            match self.vocab.piece(id) {
                Some(piece) => match byte_piece(piece) {
                    Some(b) => bytes.push(b),
                    None => bytes.extend_from_slice(piece.as_bytes()),
                },
                None => bytes.extend_from_slice(UNK_MARKER.as_bytes()),
            }
        }
        String::from_utf8_lossy(&bytes)
            .replace(METASPACE, " ")
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
