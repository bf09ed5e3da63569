//! Synthetic frames shared by the unit tests.

use ndarray as nd;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::frame::Frame;

/// A smooth random texture made of gaussian blobs, sampled with an offset so
/// consecutive frames can show the same scene translated.
pub struct Texture {
    blobs: Vec<(f64, f64, f64)>,
    sigma: f64,
}

impl Texture {
    pub fn new(seed: u64, width: usize, height: usize) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let blobs = (0..(width * height / 300))
            .map(|_| {
                (
                    rng.gen_range(0.0..width as f64),
                    rng.gen_range(0.0..height as f64),
                    rng.gen_range(40.0..90.0),
                )
            })
            .collect();
        Self { blobs, sigma: 5. }
    }

    /// Add a blob so that a given location is guaranteed to have texture
    pub fn with_blob(mut self, x: f64, y: f64) -> Self {
        self.blobs.push((x, y, 110.));
        self
    }

    pub fn value(&self, x: f64, y: f64) -> u8 {
        let s2 = 2. * self.sigma * self.sigma;
        let v: f64 = self
            .blobs
            .iter()
            .map(|&(cx, cy, a)| a * (-((x - cx).powi(2) + (y - cy).powi(2)) / s2).exp())
            .sum();
        (30. + v).clamp(0., 255.) as u8
    }

    /// Render the texture moved by (dx, dy)
    pub fn frame(&self, width: usize, height: usize, dx: f64, dy: f64) -> Frame {
        let pixels = nd::Array3::from_shape_fn((height, width, 3), |(y, x, _)| {
            self.value(x as f64 - dx, y as f64 - dy)
        });
        Frame::from_array(pixels).unwrap()
    }
}

pub fn flat_frame(width: usize, height: usize, value: u8) -> Frame {
    Frame::from_array(nd::Array3::from_elem((height, width, 3), value)).unwrap()
}
