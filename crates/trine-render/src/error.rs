// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Display;

use thiserror::Error;
use trine_core::ArenaError;

/// Unrecoverable renderer failures.
///
/// Out-of-date and suboptimal surfaces never show up here; they are state
/// transitions inside [`crate::FramePacer`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{call} failed: {reason}")]
    Api { call: &'static str, reason: String },

    #[error("swap chain not supported: surface reports no formats or present modes")]
    SwapchainUnsupported,

    #[error("failed to find suitable memory type")]
    NoMemoryType,

    #[error("no suitable GPU: {0}")]
    NoSuitableGpu(String),

    #[error("shader {path}: {reason}")]
    Shader { path: String, reason: String },

    #[error(transparent)]
    Arena(#[from] ArenaError),
}

impl RenderError {
    pub fn api(call: &'static str, reason: impl Display) -> Self {
        RenderError::Api {
            call,
            reason: reason.to_string(),
        }
    }
}
