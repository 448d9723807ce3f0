// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Beam search tests against scripted logit tables
//!
//! Verify that decoding:
//! - Ends on EOS and returns the best-scoring hypothesis
//! - Respects the max_new_tokens budget
//! - Never repeats an n-gram of the configured size

use florence_docvqa_api::vision::florence::{beam_search, GenerationConfig};
use std::collections::HashSet;

const EOS: u32 = 2;
const BOS: u32 = 0;
const VOCAB: usize = 10;

fn peaked(token: u32, height: f32) -> Vec<f32> {
    let mut row = vec![0.0; VOCAB];
    row[token as usize] = height;
    row
}

#[test]
fn test_scripted_answer_is_reproduced() {
    // Decoder that "wants" to emit 5 7 9 then stop
    let script = [5u32, 7, 9, EOS];
    let config = GenerationConfig::default();

    let result = beam_search(&config, &[EOS, BOS], EOS, |beams| {
        Ok(beams
            .iter()
            .map(|b| {
                let step = b.len() - 2;
                peaked(*script.get(step).unwrap_or(&EOS), 12.0)
            })
            .collect())
    })
    .unwrap();

    assert_eq!(result.tokens, vec![EOS, BOS, 5, 7, 9, EOS]);
    assert!(result.score <= 0.0);
}

#[test]
fn test_budget_limits_generation() {
    let config = GenerationConfig {
        max_new_tokens: 6,
        no_repeat_ngram_size: 0,
        ..Default::default()
    };

    let result = beam_search(&config, &[EOS, BOS], EOS, |beams| {
        // EOS is never likely
        Ok(beams.iter().map(|_| peaked(4, 8.0)).collect())
    })
    .unwrap();

    assert!(result.tokens.len() <= 2 + 6);
}

#[test]
fn test_no_repeated_trigrams() {
    let config = GenerationConfig {
        num_beams: 2,
        max_new_tokens: 12,
        no_repeat_ngram_size: 3,
        ..Default::default()
    };

    // Strongly prefers cycling 3 4 3 4 ..., which the ban must break
    let result = beam_search(&config, &[EOS, BOS], EOS, |beams| {
        Ok(beams
            .iter()
            .map(|b| {
                let mut row = vec![0.0; VOCAB];
                let favourite = if b.last() == Some(&3) { 4 } else { 3 };
                row[favourite] = 10.0;
                row[EOS as usize] = -5.0;
                row
            })
            .collect())
    })
    .unwrap();

    let mut seen = HashSet::new();
    for trigram in result.tokens.windows(3) {
        assert!(seen.insert(trigram.to_vec()), "repeated {:?}", trigram);
    }
}

#[test]
fn test_decoder_error_propagates() {
    let config = GenerationConfig::default();
    let result = beam_search(&config, &[EOS, BOS], EOS, |_| {
        Err(anyhow::anyhow!("onnx session failed"))
    });
    assert!(result.unwrap_err().to_string().contains("onnx session failed"));
}
