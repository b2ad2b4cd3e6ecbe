//! Fixed-interval frame sampler

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::frame::Frame;
use super::pipeline::FramePipeline;
use super::source::FrameSource;
use crate::config::FrameConfig;
use crate::{Error, Result};

/// What a sampler did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplerReport {
    pub ticks: u64,
    pub captured: u64,
    pub failures: u64,
}

/// Captures a frame every interval and feeds it to the pipeline
///
/// A tick that overruns the interval is not followed by a burst of catch-up
/// captures; late ticks are skipped.
pub struct FrameSampler {
    source: Box<dyn FrameSource>,
    pipeline: Arc<FramePipeline>,
    interval: Duration,
    quality: u8,
    capture_timeout: Duration,
}

impl FrameSampler {
    #[must_use]
    pub fn new(
        source: Box<dyn FrameSource>,
        pipeline: Arc<FramePipeline>,
        config: &FrameConfig,
    ) -> Self {
        Self {
            source,
            pipeline,
            interval: config.interval,
            quality: config.jpeg_quality,
            capture_timeout: config.capture_timeout,
        }
    }

    /// Sample until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> SamplerReport {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = SamplerReport::default();

        tracing::info!(
            participant = %self.pipeline.participant(),
            interval_ms = self.interval.as_millis(),
            "frame sampler started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            report.ticks += 1;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = self.sample() => outcome,
            };
            match outcome {
                Ok(()) => report.captured += 1,
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(
                        participant = %self.pipeline.participant(),
                        error = %e,
                        "frame not processed"
                    );
                }
            }
        }

        tracing::info!(
            participant = %self.pipeline.participant(),
            ticks = report.ticks,
            captured = report.captured,
            failures = report.failures,
            "frame sampler stopped"
        );
        report
    }

    async fn sample(&mut self) -> Result<()> {
        let raw = tokio::time::timeout(self.capture_timeout, self.source.capture())
            .await
            .map_err(|_| Error::Timeout(format!("frame capture exceeded {:?}", self.capture_timeout)))??;

        let quality = self.quality;
        let frame = tokio::task::spawn_blocking(move || Frame::encode(&raw, quality))
            .await
            .map_err(|e| Error::Frame(format!("encode task failed: {e}")))??;

        self.pipeline.submit(frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::vision::{ChangeGate, HasherKind, RawFrame, hasher_for};

    struct FlakySource {
        calls: u32,
    }

    #[async_trait]
    impl FrameSource for FlakySource {
        async fn capture(&mut self) -> Result<RawFrame> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(Error::Frame("camera hiccup".into()));
            }
            Ok(RawFrame::new(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90]))))
        }
    }

    fn config() -> FrameConfig {
        FrameConfig {
            interval: Duration::from_millis(10),
            capture_timeout: Duration::from_secs(1),
            ..FrameConfig::default()
        }
    }

    #[tokio::test]
    async fn capture_failures_do_not_stop_sampling() {
        let (pipeline, _transmitter) = FramePipeline::new(
            "alice",
            "frames",
            hasher_for(HasherKind::Difference),
            Arc::new(ChangeGate::new(0.9)),
            8,
        );
        let pipeline = Arc::new(pipeline);
        let sampler = FrameSampler::new(Box::new(FlakySource { calls: 0 }), Arc::clone(&pipeline), &config());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        let report = task.await.unwrap();

        assert!(report.ticks >= 3);
        assert!(report.captured >= 1);
        assert!(report.failures >= 1);
        // identical captures: only the first is accepted
        assert_eq!(pipeline.stats().backlog, 1);
    }
}
