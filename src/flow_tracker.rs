use std::collections::VecDeque;

use log::{debug, warn};

use crate::frame::{Frame, PyramidFrame};
use crate::model::{ModelError, ModelOutput, TrackedPoint, TrackingModel};
use crate::my_types::Vector2d;
use crate::optical_flow::{LkParams, OpticalFlow};
use crate::query::QuerySeed;

/// Hidden state kept between invocations once seeded
#[derive(Debug)]
struct FlowState {
    size: (usize, usize),
    /// Per-frame results, aligned with the tail of the last batch
    history: VecDeque<Vec<TrackedPoint>>,
    last_frame: PyramidFrame,
}

/// Tracking model backed by frame-to-frame pyramidal Lucas-Kanade flow.
///
/// Seeding tracks the points through the whole batch. Afterwards each call
/// only tracks from the previously seen last frame to the new last frame.
#[derive(Debug)]
pub struct FlowTracker {
    flow: OpticalFlow,
    stride: usize,
    state: Option<FlowState>,
}

impl FlowTracker {
    pub fn new(params: LkParams, stride: usize) -> Self {
        Self {
            flow: OpticalFlow::new(params),
            stride,
            state: None,
        }
    }

    fn seed(&mut self, frames: &[Frame], seed: &QuerySeed) -> Result<ModelOutput, ModelError> {
        let size = frames[0].size();
        check_sizes(frames, size)?;
        let params = *self.flow.params();

        let mut tracks: Vec<Vec<TrackedPoint>> = Vec::with_capacity(frames.len());
        let mut previous: Option<PyramidFrame> = None;
        for (index, frame) in frames.iter().enumerate() {
            let current = build_pyramid(&params, frame)?;
            let points = match (&previous, tracks.last()) {
                (Some(previous), Some(last)) => {
                    let mut advanced = advance(&mut self.flow, previous, &current, last);
                    // points introduced at this frame take their registered position
                    for (p, q) in advanced.iter_mut().zip(seed.points()) {
                        if q.frame_offset == index {
                            *p = TrackedPoint {
                                x: q.x,
                                y: q.y,
                                visible: true,
                            };
                        }
                    }
                    advanced
                }
                _ => seed_points(seed, index),
            };
            tracks.push(points);
            previous = Some(current);
        }

        let last_frame = previous.ok_or(ModelError::EmptyBatch)?;
        debug!("seeded flow tracker with {} points over {} frames", seed.len(), frames.len());
        self.state = Some(FlowState {
            size,
            history: tracks.iter().cloned().collect(),
            last_frame,
        });
        Ok(ModelOutput { tracks })
    }

    fn continue_tracking(&mut self, frames: &[Frame]) -> Result<ModelOutput, ModelError> {
        let params = *self.flow.params();
        let FlowTracker { flow, state, .. } = self;
        let state = state.as_mut().ok_or(ModelError::NotSeeded)?;
        check_sizes(frames, state.size)?;
        let newest = frames.last().ok_or(ModelError::EmptyBatch)?;
        let current = build_pyramid(&params, newest)?;

        let last = state.history.back().cloned().unwrap_or_default();
        let points = advance(flow, &state.last_frame, &current, &last);
        let lost = points.iter().filter(|p| !p.visible).count();
        if lost > 0 {
            debug!("{lost} of {} points not visible in newest frame", points.len());
        }

        state.history.push_back(points);
        while state.history.len() > frames.len() {
            state.history.pop_front();
        }
        state.last_frame = current;

        let mut tracks: Vec<_> = state.history.iter().cloned().collect();
        if tracks.len() < frames.len() {
            warn!(
                "batch of {} frames is longer than the tracked history of {}",
                frames.len(),
                tracks.len()
            );
            // frames we never saw repeat the oldest known positions
            let oldest = tracks[0].clone();
            while tracks.len() < frames.len() {
                tracks.insert(0, oldest.clone());
            }
        }
        Ok(ModelOutput { tracks })
    }
}

impl TrackingModel for FlowTracker {
    fn stride(&self) -> usize {
        self.stride
    }

    fn invoke(
        &mut self,
        frames: &[Frame],
        seed: Option<&QuerySeed>,
    ) -> Result<ModelOutput, ModelError> {
        if frames.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        match seed {
            Some(seed) => self.seed(frames, seed),
            None => self.continue_tracking(frames),
        }
    }
}

fn build_pyramid(params: &LkParams, frame: &Frame) -> Result<PyramidFrame, ModelError> {
    PyramidFrame::new(frame, params.levels, params.min_level_size())
        .map_err(|e| ModelError::Malformed(e.to_string()))
}

/// Follow every point from `frame0` into `frame1`. Points that cannot be
/// followed stay where they were and are marked invisible.
fn advance(
    flow: &mut OpticalFlow,
    frame0: &PyramidFrame,
    frame1: &PyramidFrame,
    points: &[TrackedPoint],
) -> Vec<TrackedPoint> {
    points
        .iter()
        .map(|p| {
            let point0 = Vector2d::new(p.x, p.y);
            match flow.track_point(frame0, frame1, point0, None) {
                Some(point1) if in_bounds(point1, frame1) => TrackedPoint {
                    x: point1.x,
                    y: point1.y,
                    visible: true,
                },
                _ => TrackedPoint { visible: false, ..*p },
            }
        })
        .collect()
}

fn seed_points(seed: &QuerySeed, frame_index: usize) -> Vec<TrackedPoint> {
    seed.points()
        .iter()
        .map(|q| TrackedPoint {
            x: q.x,
            y: q.y,
            visible: q.frame_offset == frame_index,
        })
        .collect()
}

fn check_sizes(frames: &[Frame], expected: (usize, usize)) -> Result<(), ModelError> {
    for (index, frame) in frames.iter().enumerate() {
        if frame.size() != expected {
            return Err(ModelError::FrameShapeMismatch {
                index,
                expected,
                actual: frame.size(),
            });
        }
    }
    Ok(())
}

fn in_bounds(point: Vector2d, frame: &PyramidFrame) -> bool {
    point.x >= 0.
        && point.y >= 0.
        && point.x <= (frame.image.width - 1) as f64
        && point.y <= (frame.image.height - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flat_frame, Texture};

    const W: usize = 128;
    const H: usize = 96;

    fn moving_frames(texture: &Texture, count: usize, step: (f64, f64)) -> Vec<Frame> {
        (0..count)
            .map(|t| texture.frame(W, H, step.0 * t as f64, step.1 * t as f64))
            .collect()
    }

    #[test]
    fn test_seeded_batch_follows_translation() {
        let texture = Texture::new(7, W, H).with_blob(62., 46.);
        let frames = moving_frames(&texture, 4, (1.5, 1.0));
        let seed = QuerySeed::from_coordinates(&[[60., 48.]]);

        let mut tracker = FlowTracker::new(LkParams::default(), 8);
        let output = tracker.invoke(&frames, Some(&seed)).unwrap();
        assert_eq!(output.tracks.len(), 4);
        assert_eq!(output.tracks[0][0], TrackedPoint { x: 60., y: 48., visible: true });

        let last = output.tracks[3][0];
        assert!(last.visible);
        assert!((last.x - 64.5).abs() < 1. && (last.y - 51.).abs() < 1., "{last:?}");
    }

    #[test]
    fn test_unseeded_call_tracks_newest_frame() {
        let texture = Texture::new(11, W, H).with_blob(62., 46.);
        let frames = moving_frames(&texture, 5, (1.0, -1.0));
        let seed = QuerySeed::from_coordinates(&[[60., 48.]]);

        let mut tracker = FlowTracker::new(LkParams::default(), 8);
        tracker.invoke(&frames[..4], Some(&seed)).unwrap();
        let output = tracker.invoke(&frames[1..], None).unwrap();
        assert_eq!(output.tracks.len(), 4);

        let last = output.tracks[3][0];
        assert!(last.visible);
        assert!((last.x - 64.).abs() < 1. && (last.y - 44.).abs() < 1., "{last:?}");
    }

    #[test]
    fn test_flat_region_is_not_visible() {
        let frames: Vec<_> = (0..3).map(|_| flat_frame(W, H, 40)).collect();
        let seed = QuerySeed::from_coordinates(&[[10., 10.], [100., 50.]]);

        let mut tracker = FlowTracker::new(LkParams::default(), 8);
        let output = tracker.invoke(&frames, Some(&seed)).unwrap();
        let last = &output.tracks[2];
        assert_eq!(last[0], TrackedPoint { x: 10., y: 10., visible: false });
        assert_eq!(last[1], TrackedPoint { x: 100., y: 50., visible: false });
    }

    #[test]
    fn test_requires_seed() {
        let mut tracker = FlowTracker::new(LkParams::default(), 8);
        let frames = vec![flat_frame(W, H, 0)];
        assert_eq!(tracker.invoke(&frames, None), Err(ModelError::NotSeeded));
        assert_eq!(tracker.invoke(&[], None), Err(ModelError::EmptyBatch));
    }

    #[test]
    fn test_rejects_mismatched_frames() {
        let seed = QuerySeed::from_coordinates(&[[5., 5.]]);
        let mut tracker = FlowTracker::new(LkParams::default(), 8);
        let frames = vec![flat_frame(W, H, 0), flat_frame(W / 2, H, 0)];
        assert_eq!(
            tracker.invoke(&frames, Some(&seed)),
            Err(ModelError::FrameShapeMismatch {
                index: 1,
                expected: (W, H),
                actual: (W / 2, H),
            })
        );

        let frames = vec![flat_frame(W, H, 0), flat_frame(W, H, 0)];
        tracker.invoke(&frames, Some(&seed)).unwrap();
        let frames = vec![flat_frame(W, H, 0), flat_frame(W, H / 2, 0)];
        assert!(matches!(
            tracker.invoke(&frames, None),
            Err(ModelError::FrameShapeMismatch { index: 1, .. })
        ));
    }
}
