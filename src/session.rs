use tracing::{debug, info, instrument};

use crate::error::TrackError;
use crate::frame::Frame;
use crate::model::{ModelError, TrackedPoint, TrackingModel};
use crate::query::QuerySeed;
use crate::window::FrameWindow;

/// One continuous tracking task: a fixed set of points followed through a
/// stream of frames, from `reset` to the next `reset`.
///
/// Frames are buffered in a sliding window. Once the window holds `capacity`
/// frames every `step` runs the model over the whole window; the query seed
/// is passed along only on the first of those runs.
#[derive(Debug)]
pub struct TrackingSession {
    window: FrameWindow,
    seed: Option<QuerySeed>,
    /// True until the first successful model invocation after `reset`
    awaiting_seed: bool,
    model: Box<dyn TrackingModel>,
    // Frames received since the last reset, including the initial one
    frame_number: usize,
}

impl TrackingSession {
    /// `window_size` overrides the window capacity, which is otherwise twice
    /// the model stride.
    pub fn new(model: Box<dyn TrackingModel>, window_size: Option<usize>) -> Result<Self, TrackError> {
        let capacity = window_size.unwrap_or(2 * model.stride());
        if capacity == 0 {
            return Err(TrackError::InvalidInput(
                "window capacity must be at least one frame".to_string(),
            ));
        }
        Ok(Self {
            window: FrameWindow::new(capacity),
            seed: None,
            awaiting_seed: false,
            model,
            frame_number: 0,
        })
    }

    /// Start a new session from `frame` with the points to track in it.
    /// On error the previous state is left as it was.
    #[instrument(level = "debug", skip_all, fields(points = points.len()))]
    pub fn reset(&mut self, frame: Frame, points: &[[f64; 2]]) -> Result<(), TrackError> {
        validate_points(&frame, points)?;

        self.window.restart(frame);
        self.seed = Some(QuerySeed::from_coordinates(points));
        self.awaiting_seed = true;
        self.frame_number = 1;
        info!(
            points = points.len(),
            capacity = self.window.capacity(),
            "tracking session reset"
        );
        Ok(())
    }

    /// Submit the next frame and get every point's position in it, in
    /// registration order.
    #[instrument(level = "debug", skip_all, fields(frame = self.frame_number))]
    pub fn step(&mut self, frame: Frame) -> Result<Vec<TrackedPoint>, TrackError> {
        if self.seed.is_none() {
            return Err(TrackError::NotInitialized);
        }

        let evicted = self.window.push(frame);
        self.frame_number += 1;
        if evicted > 0 {
            debug!(evicted, "window full, dropped oldest frames");
        }
        if !self.window.is_full() {
            return Err(TrackError::InsufficientContext {
                buffered: self.window.len(),
                required: self.window.capacity(),
            });
        }

        let seed = if self.awaiting_seed { self.seed.as_ref() } else { None };
        let point_count = self.seed.as_ref().map_or(0, QuerySeed::len);
        let batch = self.window.as_batch();
        let batch_len = batch.len();
        debug!(frames = batch_len, seeded = seed.is_some(), "invoking tracking model");
        let mut output = self.model.invoke(batch, seed)?;

        if output.tracks.len() != batch_len {
            return Err(malformed(format!(
                "model returned {} frames for a batch of {batch_len}",
                output.tracks.len()
            )));
        }
        let latest = output.tracks.pop().unwrap_or_default();
        if latest.len() != point_count {
            return Err(malformed(format!(
                "model returned {} points, {point_count} are tracked",
                latest.len()
            )));
        }

        self.awaiting_seed = false;
        Ok(latest)
    }

    pub fn window(&self) -> &FrameWindow {
        &self.window
    }

    pub fn seed(&self) -> Option<&QuerySeed> {
        self.seed.as_ref()
    }

    pub fn is_awaiting_seed(&self) -> bool {
        self.awaiting_seed
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn is_initialized(&self) -> bool {
        self.seed.is_some()
    }
}

fn malformed(message: String) -> TrackError {
    TrackError::ModelInvocation(ModelError::Malformed(message))
}

fn validate_points(frame: &Frame, points: &[[f64; 2]]) -> Result<(), TrackError> {
    if points.is_empty() {
        return Err(TrackError::InvalidInput("at least one keypoint is required".to_string()));
    }
    let (width, height) = frame.size();
    for (index, &[x, y]) in points.iter().enumerate() {
        if !x.is_finite() || !y.is_finite() {
            return Err(TrackError::InvalidInput(format!(
                "keypoint {index} has a non-finite coordinate ({x}, {y})"
            )));
        }
        if x < 0. || y < 0. || x >= width as f64 || y >= height as f64 {
            return Err(TrackError::InvalidInput(format!(
                "keypoint {index} ({x}, {y}) lies outside the {width}x{height} frame"
            )));
        }
    }
    Ok(())
}
