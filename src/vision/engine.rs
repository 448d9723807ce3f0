// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Question-answering engine seam between the HTTP layer and the model

use image::DynamicImage;

use super::florence::{Device, FlorenceModel};

/// Answers natural-language questions about a document image
///
/// Implementations are blocking and must be safe to share across requests.
#[cfg_attr(test, mockall::automock)]
pub trait DocumentQa: Send + Sync {
    /// Answer `question` about `image`
    fn answer(&self, image: &DynamicImage, question: &str) -> anyhow::Result<String>;

    /// Device inference runs on
    fn device(&self) -> Device;

    fn model_name(&self) -> String;
}

impl DocumentQa for FlorenceModel {
    fn answer(&self, image: &DynamicImage, question: &str) -> anyhow::Result<String> {
        FlorenceModel::answer(self, image, question)
    }

    fn device(&self) -> Device {
        FlorenceModel::device(self)
    }

    fn model_name(&self) -> String {
        self.name().to_string()
    }
}
