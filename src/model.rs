use std::fmt::Debug;

use thiserror::Error;

use crate::frame::Frame;
use crate::query::QuerySeed;

/// Position and visibility of one point in one frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPoint {
    pub x: f64,
    pub y: f64,
    pub visible: bool,
}

/// Result of one model invocation: `tracks[frame][point]` for every frame of
/// the submitted batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelOutput {
    pub tracks: Vec<Vec<TrackedPoint>>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("frame {index} has size {actual:?}, expected {expected:?}")]
    FrameShapeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("model was invoked without a seed before being seeded")]
    NotSeeded,
    #[error("model was invoked with an empty batch")]
    EmptyBatch,
    #[error("model failure: {0}")]
    Malformed(String),
}

/// A point tracker that is stateful once seeded.
///
/// The first call of a session carries the query seed and the whole window.
/// Every later call carries the refreshed window only, whose last frame is
/// the new evidence; the model keeps whatever continuity it needs between
/// calls.
pub trait TrackingModel: Debug + Send {
    /// Native processing stride of the model, in frames
    fn stride(&self) -> usize;

    /// Track the seed through `frames`, or continue an earlier seeding when
    /// `seed` is None. Seed frame offsets index into `frames`.
    fn invoke(
        &mut self,
        frames: &[Frame],
        seed: Option<&QuerySeed>,
    ) -> Result<ModelOutput, ModelError>;
}

/// Builds one independent model per session
pub type ModelFactory = Box<dyn Fn() -> Box<dyn TrackingModel> + Send + Sync>;
