// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! DocVQA prompt construction and answer extraction

/// Florence-2 task token for document question answering
pub const DOCVQA_TASK: &str = "<DocVQA>";

/// Answer returned when generation leaves nothing after cleanup
pub const UNPARSEABLE_ANSWER: &str = "Could not parse answer.";

const SPECIAL_TOKENS: [&str; 3] = ["<s>", "</s>", "<pad>"];

/// Prefix the question with the DocVQA task token
pub fn build_prompt(question: &str) -> String {
    format!("{}{}", DOCVQA_TASK, question)
}

/// Clean decoded generator output into the answer text
///
/// Returns `None` when nothing remains after removing special tokens.
pub fn parse_answer(generated: &str) -> Option<String> {
    let mut text = generated.to_string();
    for token in SPECIAL_TOKENS {
        text = text.replace(token, "");
    }

    let answer = text.trim();
    if answer.is_empty() {
        None
    } else {
        Some(answer.to_string())
    }
}

/// [`parse_answer`] with the fallback message for empty output
pub fn answer_or_fallback(generated: &str) -> String {
    parse_answer(generated).unwrap_or_else(|| UNPARSEABLE_ANSWER.to_string())
}
