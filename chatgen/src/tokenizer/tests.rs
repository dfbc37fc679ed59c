use super::*;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn scenario_vocab() -> Vocab {
    Vocab::from_pieces([
        ("<unk>", 0.0),
        ("<s>", 0.0),
        ("</s>", 0.0),
        ("<pad>", 0.0),
        ("▁hi", 0.0),
    ])
}

fn scored_vocab() -> Vocab {
    Vocab::from_pieces([
        ("<unk>", 0.0),
        ("<s>", 0.0),
        ("</s>", 0.0),
        ("<pad>", 0.0),
        ("▁", -3.0),
        ("▁hello", -2.0),
        ("▁world", -2.5),
        ("▁he", -4.0),
        ("llo", -4.0),
        ("h", -5.0),
        ("e", -5.0),
        ("l", -5.0),
        ("o", -5.0),
        ("w", -5.0),
        ("r", -5.0),
        ("d", -5.0),
    ])
}

fn unigram(vocab: Vocab) -> UnigramTokenizer {
    let specials = SpecialTokens::fallback(vocab.len(), "test");
    UnigramTokenizer::new(vocab, specials)
}

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn encode_with_bos_and_eos() {
    let tokenizer = unigram(scenario_vocab());
    assert_eq!(tokenizer.encode("hi", true, true), vec![1, 4, 2]);
    assert_eq!(tokenizer.encode("hi", false, false), vec![4]);
}

#[test]
fn decode_drops_special_tokens() {
    let tokenizer = unigram(scenario_vocab());
    assert_eq!(tokenizer.decode(&[1, 4, 2]), "hi");
    assert_eq!(tokenizer.decode(&[3, 4, 3]), "hi");
}

#[test]
fn viterbi_prefers_higher_scoring_segmentation() {
    let tokenizer = unigram(scored_vocab());
    // ▁hello (-2) beats ▁he + llo (-8)
    assert_eq!(tokenizer.encode("hello", false, false), vec![5]);
    assert_eq!(tokenizer.encode("hello world", false, false), vec![5, 6]);
}

#[test]
fn round_trip_representable_text() {
    let tokenizer = unigram(scored_vocab());
    for text in ["hello", "hello world", "world hello world", "held"] {
        let ids = tokenizer.encode(text, false, false);
        assert_eq!(tokenizer.decode(&ids), text);
    }
}

#[test]
fn unknown_characters_collapse_into_one_unk() {
    let tokenizer = unigram(scored_vocab());
    let ids = tokenizer.encode("hello ZZZ", false, false);
    assert_eq!(ids, vec![5, 4, 0]);
}

#[test]
fn byte_fallback_used_when_available() {
    let mut pieces: Vec<(String, f32)> = vec![
        ("<unk>".into(), 0.0),
        ("<s>".into(), 0.0),
        ("</s>".into(), 0.0),
        ("<pad>".into(), 0.0),
        ("▁".into(), -1.0),
    ];
    for b in 0..=255u8 {
        pieces.push((format!("<0x{:02X}>", b), -10.0));
    }
    let tokenizer = unigram(Vocab::from_pieces(pieces));
    let ids = tokenizer.encode("é", false, false);
    // ▁ then the two UTF-8 bytes of é
    assert_eq!(ids, vec![4, 5 + 0xC3, 5 + 0xA9]);
    assert_eq!(tokenizer.decode(&ids), "é");
}

#[test]
fn byte_pieces_are_not_matched_literally() {
    let vocab = Vocab::from_pieces([("<unk>", 0.0), ("▁", -1.0), ("<0x41>", 5.0)]);
    let doc = json!({
        "unk_token_id": 0,
        "bos_token_id": -1,
        "eos_token_id": -1,
        "pad_token_id": -1
    });
    let specials = SpecialTokens::from_document(&vocab, &doc);
    let tokenizer = UnigramTokenizer::new(vocab, specials);
    // '<' has no byte piece, so the whole literal is one unknown run
    assert_eq!(tokenizer.encode("<0x41>", false, false), vec![1, 0]);
}

#[test]
fn decode_out_of_range_ids_as_unk_marker() {
    let tokenizer = unigram(scored_vocab());
    assert_eq!(tokenizer.decode(&[5, 999]), "hello<unk>");
}

#[test]
fn encode_empty_text() {
    let tokenizer = unigram(scored_vocab());
    assert!(tokenizer.encode("", false, false).is_empty());
    assert_eq!(tokenizer.encode("", true, true), vec![1, 2]);
}

#[test]
fn fallback_drops_ids_outside_small_vocab() {
    let specials = SpecialTokens::fallback(2, "tiny");
    assert_eq!(specials.unk, Some(0));
    assert_eq!(specials.bos, Some(1));
    assert_eq!(specials.eos, None);
    assert_eq!(specials.pad, None);
}

#[test]
fn side_channel_literals_and_ids() {
    let vocab = Vocab::from_pieces([
        ("<pad>", 0.0),
        ("<|begin|>", 0.0),
        ("<|end|>", 0.0),
        ("<unk>", 0.0),
        ("▁hi", 0.0),
    ]);
    let doc = json!({
        "bos_token": "<|begin|>",
        "eos_token": { "content": "<|end|>", "lstrip": false },
        "unk_token_id": 3,
        "pad_token_id": -1,
    });
    let specials = SpecialTokens::from_document(&vocab, &doc);
    assert_eq!(specials.bos, Some(1));
    assert_eq!(specials.eos, Some(2));
    assert_eq!(specials.unk, Some(3));
    assert_eq!(specials.pad, None);
    assert_eq!(specials.origin, SpecialTokenOrigin::Configured);
}

#[test]
fn side_channel_unknown_literal_keeps_fallback() {
    let vocab = scenario_vocab();
    let specials = SpecialTokens::from_document(&vocab, &json!({ "eos_token": "<|missing|>" }));
    assert_eq!(specials.eos, Some(2));
}

#[test]
fn malformed_side_channel_degrades() {
    let file = write_temp("{ not json");
    let specials = SpecialTokens::resolve(&scenario_vocab(), Some(file.path()));
    assert!(matches!(specials.origin, SpecialTokenOrigin::Fallback { .. }));
    assert_eq!(
        (specials.unk, specials.bos, specials.eos, specials.pad),
        (Some(0), Some(1), Some(2), Some(3))
    );
}

#[test]
fn missing_side_channel_degrades() {
    let path = PathBuf::from("/nonexistent/special_tokens_map.json");
    let specials = SpecialTokens::resolve(&scenario_vocab(), Some(&path));
    assert!(matches!(specials.origin, SpecialTokenOrigin::Fallback { .. }));
}

#[test]
fn load_tokenizer_json_with_sparse_added_tokens() {
    let doc = json!({
        "model": {
            "type": "Unigram",
            "vocab": [["<unk>", 0.0], ["<s>", 0.0], ["</s>", 0.0], ["▁hi", -1.0]]
        },
        "added_tokens": [
            { "id": 6, "content": "<|im_end|>", "special": true },
            { "id": 3, "content": "▁hey", "special": false }
        ]
    });
    let file = write_temp(&doc.to_string());
    let vocab = Vocab::load(file.path()).unwrap();
    assert_eq!(vocab.len(), 7);
    assert_eq!(vocab.id_of("<|im_end|>"), Some(6));
    assert_eq!(vocab.id_of("▁hey"), Some(3));
    assert_eq!(vocab.id_of("▁hi"), None);
    assert_eq!(vocab.piece(4), Some(""));
    assert_eq!(vocab.kind(), VocabKind::Unigram);
}

#[test]
fn added_token_id_far_past_vocab_is_malformed() {
    let doc = json!({
        "model": { "vocab": [["<unk>", 0.0]] },
        "added_tokens": [{ "id": 4000000000u64, "content": "<x>" }]
    });
    let file = write_temp(&doc.to_string());
    let err = Vocab::load(file.path()).unwrap_err();
    assert!(
        matches!(err, crate::error::TokenizerError::MalformedVocabulary { .. }),
        "got {:?}",
        err
    );
}

#[test]
fn word_level_id_far_past_vocab_is_malformed() {
    let doc = json!({
        "model": { "type": "WordLevel", "vocab": { "<unk>": 0, "far": 3000000000u64 } }
    });
    let file = write_temp(&doc.to_string());
    let err = Vocab::load(file.path()).unwrap_err();
    assert!(
        matches!(err, crate::error::TokenizerError::MalformedVocabulary { .. }),
        "got {:?}",
        err
    );
}

#[test]
fn load_word_level_json_selects_word_backend() {
    let doc = json!({
        "model": {
            "type": "WordLevel",
            "vocab": { "<unk>": 0, "<s>": 1, "</s>": 2, "<pad>": 3, "hello": 4, "world": 5 }
        }
    });
    let file = write_temp(&doc.to_string());
    let sources = crate::config::SourcePaths {
        vocabulary: file.path().to_path_buf(),
        ..Default::default()
    };
    let tokenizer = load_tokenizer(&sources).unwrap();
    assert_eq!(tokenizer.encode("hello there world", true, false), vec![1, 4, 0, 5]);
    assert_eq!(tokenizer.decode(&[1, 4, 5, 2]), "hello world");
}

#[test]
fn load_sentencepiece_piece_list() {
    let file = write_temp("<unk>\t0\n<s>\t0\n</s>\t0\n<pad>\t0\n▁hi\t-1.5\n");
    let vocab = Vocab::load(file.path()).unwrap();
    assert_eq!(vocab.len(), 5);
    assert_eq!(vocab.score(4), -1.5);
}

#[test]
fn missing_vocabulary_is_not_found() {
    let err = Vocab::load("/nonexistent/tokenizer.json").unwrap_err();
    assert!(matches!(err, crate::error::TokenizerError::VocabularyNotFound(_)));
}

#[test]
fn malformed_vocabulary_is_fatal() {
    let file = write_temp(r#"{"model": {"vocab": 42}}"#);
    let err = Vocab::load(file.path()).unwrap_err();
    assert!(matches!(err, crate::error::TokenizerError::MalformedVocabulary { .. }));
}

#[test]
fn word_tokenizer_unknown_word() {
    let tokenizer = WordTokenizer::from_words(["<unk>", "<s>", "</s>", "<pad>", "foo"]);
    assert_eq!(tokenizer.encode("bar", false, false), vec![0]);
    assert_eq!(tokenizer.decode(&[0]), "<unk>");
    assert!(tokenizer.contains("foo"));
    assert!(!tokenizer.contains("bar"));
    assert_eq!(tokenizer.vocab_size(), 5);
}
