use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Result};
use crossbeam_channel::{select, tick, Receiver, Sender, TrySendError};

use crate::camera::VideoSource;
use crate::config::Config;
use crate::inference::PoseEstimator;
use crate::overlay::{self, Surface};
use crate::posture::{MissReason, PostureClassifier, PostureState, Reading};

const DEFAULT_KEYPOINT_RADIUS: u32 = 5;
const STATUS_BACKLOG: usize = 16;
/// How often the surface gets to handle UI events between ticks.
const SURFACE_POLL_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Source not ready or no frame available.
    Skipped,
    Classified(Reading),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: PostureState,
    pub current: PostureState,
}

/// Samples frames, classifies posture and redraws the overlay, one tick at a time.
pub struct FrameSampler<V, E, S> {
    source: V,
    estimator: E,
    surface: S,
    classifier: PostureClassifier,
    keypoint_radius: u32,
    subscribers: Vec<Sender<StatusChange>>,
}

impl<V, E, S> FrameSampler<V, E, S>
where
    V: VideoSource,
    E: PoseEstimator,
    S: Surface,
{
    pub fn new(source: V, estimator: E, surface: S, classifier: PostureClassifier) -> Self {
        Self {
            source,
            estimator,
            surface,
            classifier,
            keypoint_radius: DEFAULT_KEYPOINT_RADIUS,
            subscribers: Vec::new(),
        }
    }

    pub fn from_config(source: V, estimator: E, surface: S, config: &Config) -> Self {
        Self::new(source, estimator, surface, PostureClassifier::from_config(config))
            .with_keypoint_radius(config.keypoint_radius)
    }

    pub fn with_keypoint_radius(mut self, radius: u32) -> Self {
        self.keypoint_radius = radius;
        self
    }

    pub fn classifier(&self) -> &PostureClassifier {
        &self.classifier
    }

    pub fn state(&self) -> PostureState {
        self.classifier.state()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// Receives every posture transition. Changes are dropped, not queued
    /// indefinitely, when the receiver falls behind.
    pub fn subscribe(&mut self) -> Receiver<StatusChange> {
        let (tx, rx) = crossbeam_channel::bounded(STATUS_BACKLOG);
        self.subscribers.push(tx);
        rx
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.source.is_ready() {
            tracing::trace!("video source not ready, skipping tick");
            return TickOutcome::Skipped;
        }

        let (width, height) = self.source.dimensions();
        if let Err(err) = self.surface.resize(width, height) {
            tracing::warn!(error = %err, width, height, "failed to resize overlay");
        }

        let frame = match self.source.capture() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::trace!("no frame available, skipping tick");
                return TickOutcome::Skipped;
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame capture failed, skipping tick");
                return TickOutcome::Skipped;
            }
        };
        if let Err(err) = self.surface.set_backdrop(&frame) {
            tracing::warn!(error = %err, "failed to update overlay backdrop");
        }

        let previous = self.classifier.state();
        let (pose, reading) = match self.estimator.estimate(&frame) {
            Ok(poses) => {
                let pose = poses.into_iter().next();
                let reading = self.classifier.observe(pose.as_ref());
                (pose, reading)
            }
            Err(err) => {
                tracing::warn!(error = %err, "pose estimation failed");
                (None, self.classifier.record_miss(MissReason::EstimatorFailed))
            }
        };
        log_reading(&reading);

        let state = reading.state();
        if let Err(err) = overlay::render(
            &mut self.surface,
            pose.as_ref(),
            state,
            self.classifier.thresholds().min_score,
            self.keypoint_radius,
        ) {
            tracing::warn!(error = %err, "failed to draw overlay");
        }

        if state != previous {
            self.notify(StatusChange {
                previous,
                current: state,
            });
        }

        TickOutcome::Classified(reading)
    }

    /// Ticks every `period` until `shutdown` fires or disconnects.
    ///
    /// Ticks run inline, so estimation calls never overlap; the ticker holds
    /// at most one pending tick and drops the rest while a tick is running.
    /// While idle the surface is polled so window events are not held back
    /// until the next tick.
    pub fn run(&mut self, period: Duration, shutdown: &Receiver<()>) {
        let ticker = tick(period);
        tracing::info!(period_ms = period.as_millis() as u64, "frame sampler started");

        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {
                    self.tick();
                }
                default(SURFACE_POLL_INTERVAL) => {
                    if let Err(err) = self.surface.poll() {
                        tracing::warn!(error = %err, "failed to poll overlay");
                    }
                }
            }
        }

        tracing::info!(state = %self.classifier.state(), "frame sampler stopped");
    }

    fn notify(&mut self, change: StatusChange) {
        match change.current {
            PostureState::Poor => tracing::warn!(previous = %change.previous, "poor posture detected"),
            current => tracing::info!(previous = %change.previous, %current, "posture changed"),
        }

        self.subscribers.retain(|tx| match tx.try_send(change) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl<V, E, S> FrameSampler<V, E, S>
where
    V: VideoSource + Send + 'static,
    E: PoseEstimator + Send + 'static,
    S: Surface + Send + 'static,
{
    /// Runs [`FrameSampler::run`] on its own thread.
    pub fn spawn(mut self, period: Duration) -> Result<SamplerHandle<V, E, S>> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let thread = thread::Builder::new()
            .name("frame-sampler".to_string())
            .spawn(move || {
                self.run(period, &shutdown_rx);
                self
            })?;

        Ok(SamplerHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn log_reading(reading: &Reading) {
    match *reading {
        Reading::Measured { distance, state } => {
            tracing::debug!(distance, %state, "posture measured");
        }
        Reading::Missed {
            reason,
            streak,
            state,
        } => {
            tracing::debug!(?reason, streak, %state, "required keypoints unavailable");
        }
    }
}

/// Owns a running sampler thread; stops it when dropped.
pub struct SamplerHandle<V, E, S> {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<FrameSampler<V, E, S>>>,
}

impl<V, E, S> SamplerHandle<V, E, S> {
    /// Stops further ticks and hands back the sampler once the current tick finishes.
    pub fn stop(mut self) -> Result<FrameSampler<V, E, S>> {
        self.signal();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("frame sampler already stopped"))?;
        thread
            .join()
            .map_err(|_| anyhow!("frame sampler thread panicked"))
    }

    fn signal(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
    }
}

impl<V, E, S> Drop for SamplerHandle<V, E, S> {
    fn drop(&mut self) {
        self.signal();
        if let Some(thread) = self.thread.take() {
            tracing::debug!("shutting down frame sampler");
            let _ = thread.join();
        }
    }
}
