// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Beam-search decoding
//!
//! The search only needs a function from the live beams to their next-token
//! logits, so it runs the same against the ONNX decoder and against fixed
//! logit tables in tests.

use anyhow::Result;
use std::cmp::Ordering;
use tracing::debug;

/// Default number of beams (Florence-2 generation default)
pub const DEFAULT_NUM_BEAMS: usize = 3;

/// Default generation budget
pub const DEFAULT_MAX_NEW_TOKENS: usize = 1024;

/// Default size of n-grams that may not repeat
pub const DEFAULT_NO_REPEAT_NGRAM_SIZE: usize = 3;

/// Decoding parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub num_beams: usize,
    pub max_new_tokens: usize,
    /// Stop as soon as `num_beams` hypotheses have finished
    pub early_stopping: bool,
    /// Exponent applied to the hypothesis length when scoring
    pub length_penalty: f32,
    /// 0 disables the n-gram ban
    pub no_repeat_ngram_size: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            num_beams: DEFAULT_NUM_BEAMS,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            early_stopping: true,
            length_penalty: 1.0,
            no_repeat_ngram_size: DEFAULT_NO_REPEAT_NGRAM_SIZE,
        }
    }
}

/// A finished sequence and its length-normalised score
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    log_prob: f32,
}

/// The best `num_beams` finished hypotheses seen so far
#[derive(Debug)]
struct FinishedHypotheses {
    capacity: usize,
    length_penalty: f32,
    early_stopping: bool,
    hypotheses: Vec<Hypothesis>,
}

impl FinishedHypotheses {
    fn new(config: &GenerationConfig) -> Self {
        Self {
            capacity: config.num_beams,
            length_penalty: config.length_penalty,
            early_stopping: config.early_stopping,
            hypotheses: Vec::with_capacity(config.num_beams + 1),
        }
    }

    fn normalise(&self, log_prob: f32, generated_len: usize) -> f32 {
        log_prob / (generated_len.max(1) as f32).powf(self.length_penalty)
    }

    fn worst_score(&self) -> f32 {
        self.hypotheses
            .iter()
            .map(|h| h.score)
            .fold(f32::INFINITY, f32::min)
    }

    fn is_full(&self) -> bool {
        self.hypotheses.len() >= self.capacity
    }

    fn add(&mut self, tokens: Vec<u32>, log_prob: f32, generated_len: usize) {
        let score = self.normalise(log_prob, generated_len);
        if self.is_full() && score <= self.worst_score() {
            return;
        }

        self.hypotheses.push(Hypothesis { tokens, score });
        if self.hypotheses.len() > self.capacity {
            if let Some(worst) = self
                .hypotheses
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
                .map(|(i, _)| i)
            {
                self.hypotheses.remove(worst);
            }
        }
    }

    /// Whether no running beam can still improve the finished set
    fn is_done(&self, best_running_log_prob: f32, generated_len: usize) -> bool {
        if !self.is_full() {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst_score() >= self.normalise(best_running_log_prob, generated_len)
    }

    fn best(self) -> Option<Hypothesis> {
        self.hypotheses
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
    }
}

/// Run beam search from `prefix` until `eos` or the token budget
///
/// `next_logits` receives the live beams (all of equal length) and must
/// return one row of vocabulary logits per beam. Returned tokens include
/// the prefix and, when generation finished normally, the trailing `eos`.
pub fn beam_search<F>(
    config: &GenerationConfig,
    prefix: &[u32],
    eos: u32,
    mut next_logits: F,
) -> Result<Hypothesis>
where
    F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
{
    if config.num_beams == 0 {
        anyhow::bail!("num_beams must be at least 1");
    }
    if prefix.is_empty() {
        anyhow::bail!("beam search needs a non-empty decoder prefix");
    }

    let num_beams = config.num_beams;
    let prefix_len = prefix.len();
    let mut beams = vec![Beam {
        tokens: prefix.to_vec(),
        log_prob: 0.0,
    }];
    let mut finished = FinishedHypotheses::new(config);
    let mut done = false;

    for step in 0..config.max_new_tokens {
        let sequences: Vec<Vec<u32>> = beams.iter().map(|b| b.tokens.clone()).collect();
        let logits = next_logits(&sequences)?;
        if logits.len() != beams.len() {
            anyhow::bail!(
                "decoder returned {} logit rows for {} beams",
                logits.len(),
                beams.len()
            );
        }

        // (cumulative log prob, beam index, token)
        let mut candidates: Vec<(f32, usize, u32)> = Vec::with_capacity(2 * num_beams * beams.len());
        for (beam_idx, (beam, row)) in beams.iter().zip(&logits).enumerate() {
            let mut log_probs = log_softmax(row);
            ban_repeated_ngrams(&beam.tokens, config.no_repeat_ngram_size, &mut log_probs);

            for (token, lp) in top_k(&log_probs, 2 * num_beams) {
                candidates.push((beam.log_prob + lp, beam_idx, token));
            }
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        candidates.truncate(2 * num_beams);

        let generated_len = step + 1;
        let mut next_beams = Vec::with_capacity(num_beams);
        for (rank, (log_prob, beam_idx, token)) in candidates.into_iter().enumerate() {
            let mut tokens = beams[beam_idx].tokens.clone();
            tokens.push(token);

            if token == eos {
                // Only EOS among the top `num_beams` may close a hypothesis
                if rank < num_beams {
                    finished.add(tokens, log_prob, generated_len);
                }
            } else {
                next_beams.push(Beam { tokens, log_prob });
            }

            if next_beams.len() == num_beams {
                break;
            }
        }

        if next_beams.is_empty() {
            done = true;
            break;
        }
        beams = next_beams;

        if finished.is_done(beams[0].log_prob, generated_len) {
            debug!("Beam search finished after {} steps", generated_len);
            done = true;
            break;
        }
    }

    if !done {
        debug!(
            "Beam search hit max_new_tokens ({}), closing running beams",
            config.max_new_tokens
        );
        for beam in beams {
            let generated_len = beam.tokens.len() - prefix_len;
            finished.add(beam.tokens, beam.log_prob, generated_len);
        }
    }

    finished
        .best()
        .ok_or_else(|| anyhow::anyhow!("beam search produced no hypothesis"))
}

/// Numerically stable log-softmax
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }

    let sum: f32 = logits.iter().map(|&v| (v - max).exp()).sum();
    let log_sum = sum.ln() + max;
    logits.iter().map(|&v| v - log_sum).collect()
}

/// Set to -inf every token that would complete an n-gram already in `tokens`
pub fn ban_repeated_ngrams(tokens: &[u32], ngram_size: usize, log_probs: &mut [f32]) {
    if ngram_size == 0 || tokens.len() + 1 < ngram_size {
        return;
    }

    let prefix = &tokens[tokens.len() + 1 - ngram_size..];
    for window in tokens.windows(ngram_size) {
        if &window[..ngram_size - 1] == prefix {
            if let Some(lp) = log_probs.get_mut(window[ngram_size - 1] as usize) {
                *lp = f32::NEG_INFINITY;
            }
        }
    }
}

/// The `k` largest finite entries as `(token, value)`, best first
fn top_k(values: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i as u32, v))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    indexed.truncate(k);
    indexed
}
