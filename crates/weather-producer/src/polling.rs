//! The fetch → publish → flush → sleep loop.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;

use crate::config::LoopConfig;
use crate::error::IterationError;
use crate::publisher::EventPublisher;
use crate::shutdown;
use crate::snapshot::{PublishRequest, WeatherSnapshot};
use crate::source::WeatherSource;

/// Lifecycle of a `PollingLoop`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Iterations started
    pub iterations: u64,
    /// Snapshots published and flushed
    pub published: u64,
    /// Iterations that ended in an error
    pub failures: u64,
}

/// Polls one location and publishes every snapshot until shutdown.
///
/// The loop owns its source and publisher. Iteration errors are logged and
/// never end the loop; the cadence is not changed by failures.
pub struct PollingLoop<S, P> {
    config: LoopConfig,
    source: S,
    publisher: P,
    state: LoopState,
    report: LoopReport,
}

impl<S, P> PollingLoop<S, P>
where
    S: WeatherSource,
    P: EventPublisher,
{
    pub fn new(config: LoopConfig, source: S, publisher: P) -> Self {
        Self {
            config,
            source,
            publisher,
            state: LoopState::Running,
            report: LoopReport::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn report(&self) -> &LoopReport {
        &self.report
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    ///
    /// An iteration in flight when the signal arrives completes; no new one
    /// starts. The interval sleep is cut short by the signal. After leaving
    /// `Running`, the publisher is flushed exactly once, whichever way the
    /// loop body exited.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<()>) -> LoopReport {
        if self.state == LoopState::Stopped {
            log::warn!("Polling loop already stopped");
            return self.report.clone();
        }

        log::info!(
            "Starting weather data retrieval for location: {}",
            self.config.query()
        );
        log::info!(
            "Polling every {} seconds, publishing to '{}'. Press Ctrl+C to stop.",
            self.config.interval().as_secs(),
            self.config.topic()
        );

        let body = AssertUnwindSafe(self.poll_until_shutdown(&mut shutdown))
            .catch_unwind()
            .await;

        self.state = LoopState::Stopped;
        log::info!("Stopped weather data retrieval");
        self.final_flush().await;

        if let Err(payload) = body {
            std::panic::resume_unwind(payload);
        }
        self.report.clone()
    }

    /// One fetch → serialize → publish → flush pass.
    pub async fn poll_once(&self) -> Result<WeatherSnapshot, IterationError> {
        let snapshot = self
            .source
            .fetch(self.config.query(), self.config.lang())
            .await?;

        let request = PublishRequest::from_snapshot(
            self.config.topic(),
            self.config.query(),
            &snapshot,
        )
        .map_err(|e| IterationError::Unexpected(format!("failed to serialize snapshot: {}", e)))?;

        self.publisher.publish(request)?;
        self.publisher.flush(self.config.flush_timeout()).await?;
        Ok(snapshot)
    }

    async fn poll_until_shutdown(&mut self, shutdown: &mut watch::Receiver<()>) {
        while !shutdown::is_requested(shutdown) {
            self.iterate().await;

            tokio::select! {
                biased;
                _ = shutdown::requested(shutdown) => break,
                _ = tokio::time::sleep(self.config.interval()) => {}
            }
        }
    }

    async fn iterate(&mut self) {
        self.report.iterations += 1;

        let outcome = AssertUnwindSafe(self.poll_once())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(IterationError::from_panic(payload)));

        match outcome {
            Ok(snapshot) => {
                self.report.published += 1;
                log::info!(
                    "Weather data fetched and published to '{}' (key '{}'):",
                    self.config.topic(),
                    self.config.query()
                );
                log::info!("{}", snapshot);
            }
            Err(IterationError::Fetch(e)) => {
                self.report.failures += 1;
                log::error!(
                    "Exception when fetching realtime weather for '{}': {}",
                    self.config.query(),
                    e
                );
            }
            Err(IterationError::Publish(e)) => {
                self.report.failures += 1;
                log::error!("Failed to publish weather data: {}", e);
            }
            Err(e) => {
                self.report.failures += 1;
                log::error!("Unexpected error in iteration {}: {:?}", self.report.iterations, e);
            }
        }
    }

    async fn final_flush(&self) {
        match self.publisher.flush(self.config.flush_timeout()).await {
            Ok(()) => log::info!("Final flush complete"),
            Err(e) => log::error!("Final flush failed: {}", e),
        }
    }
}
