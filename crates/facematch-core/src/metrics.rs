//! Per-frame latency aggregation.

use serde::Serialize;
use std::time::Duration;

/// Stage latencies for one frame.
///
/// Each mean covers the regions that attempted that stage, whether the
/// attempt succeeded or failed. `None` means no region reached the stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub detection_latency: Duration,
    pub mean_embedding_latency: Option<Duration>,
    pub mean_search_latency: Option<Duration>,
    pub mean_liveness_latency: Option<Duration>,
}

/// Stage timings recorded while one region moved through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct RegionTimings {
    pub embed: Option<Duration>,
    pub search: Option<Duration>,
    pub liveness: Option<Duration>,
}

#[derive(Default)]
struct Mean {
    total: Duration,
    count: u32,
}

impl Mean {
    fn add(&mut self, sample: Option<Duration>) {
        if let Some(d) = sample {
            self.total += d;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

impl FrameMetrics {
    pub(crate) fn aggregate(detection_latency: Duration, regions: &[RegionTimings]) -> Self {
        let (mut embed, mut search, mut liveness) = (Mean::default(), Mean::default(), Mean::default());
        for t in regions {
            embed.add(t.embed);
            search.add(t.search);
            liveness.add(t.liveness);
        }
        Self {
            detection_latency,
            mean_embedding_latency: embed.value(),
            mean_search_latency: search.value(),
            mean_liveness_latency: liveness.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    #[test]
    fn test_means_only_count_regions_reaching_stage() {
        let regions = [
            RegionTimings { embed: ms(10), search: ms(2), liveness: ms(30) },
            // Embedding failed: nothing downstream
            RegionTimings { embed: ms(20), search: None, liveness: None },
            RegionTimings { embed: ms(30), search: ms(4), liveness: ms(10) },
        ];
        let m = FrameMetrics::aggregate(Duration::from_millis(5), &regions);
        assert_eq!(m.detection_latency, Duration::from_millis(5));
        assert_eq!(m.mean_embedding_latency, ms(20));
        assert_eq!(m.mean_search_latency, ms(3));
        assert_eq!(m.mean_liveness_latency, ms(20));
    }

    #[test]
    fn test_stage_never_reached_is_none() {
        let regions = [RegionTimings { embed: ms(8), search: None, liveness: None }];
        let m = FrameMetrics::aggregate(Duration::ZERO, &regions);
        assert_eq!(m.mean_embedding_latency, ms(8));
        assert_eq!(m.mean_search_latency, None);
        assert_eq!(m.mean_liveness_latency, None);
    }
}
