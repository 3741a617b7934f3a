//! Tunables for the recognition pipeline.

use crate::matcher::DEFAULT_SIMILARITY_THRESHOLD;
use crate::quality::QualityConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cosine similarity a match must strictly exceed.
    pub similarity_threshold: f32,
    pub quality: QualityConfig,
    pub timeouts: StageTimeouts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            quality: QualityConfig::default(),
            timeouts: StageTimeouts::default(),
        }
    }
}

/// Optional per-collaborator time limits in milliseconds. `None` waits forever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub detect_ms: Option<u64>,
    pub embed_ms: Option<u64>,
    pub search_ms: Option<u64>,
    pub liveness_ms: Option<u64>,
}

impl StageTimeouts {
    pub fn detect(&self) -> Option<Duration> {
        self.detect_ms.map(Duration::from_millis)
    }

    pub fn embed(&self) -> Option<Duration> {
        self.embed_ms.map(Duration::from_millis)
    }

    pub fn search(&self) -> Option<Duration> {
        self.search_ms.map(Duration::from_millis)
    }

    pub fn liveness(&self) -> Option<Duration> {
        self.liveness_ms.map(Duration::from_millis)
    }
}
