use std::sync::Arc;

use anyhow::Result;
use base64::{prelude::BASE64_STANDARD, Engine};
use ndarray as nd;
use thiserror::Error;

use crate::image::Image;
use crate::pyramid::Pyramid;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame must be H x W x 3, got shape {0:?}")]
    BadShape(Vec<usize>),
    #[error("frame is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("frame could not be decoded as an image: {0}")]
    Decode(#[from] image::ImageError),
}

/// An immutable RGB video frame, stored as `height x width x 3`.
///
/// Cloning shares the pixel buffer, so handing the window to the model as a
/// batch does not copy pixels.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Arc<nd::Array3<u8>>,
}

impl Frame {
    pub fn from_array(pixels: nd::Array3<u8>) -> Result<Frame, FrameError> {
        let shape = pixels.shape();
        if shape[0] == 0 || shape[1] == 0 || shape[2] != 3 {
            return Err(FrameError::BadShape(shape.to_vec()));
        }
        Ok(Frame {
            pixels: Arc::new(pixels),
        })
    }

    /// Decode a compressed image (png, jpeg) into an RGB frame
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let rgb = image::load_from_memory(bytes)?.into_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = nd::Array3::from_shape_vec((height as usize, width as usize, 3), rgb.into_raw())
            .map_err(|_| FrameError::BadShape(vec![height as usize, width as usize, 3]))?;
        Frame::from_array(pixels)
    }

    /// Decode a base64 encoded compressed image, as sent over the wire
    pub fn decode_base64(encoded: &str) -> Result<Frame, FrameError> {
        let bytes = BASE64_STANDARD.decode(encoded.trim())?;
        Frame::decode(&bytes)
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    /// (width, height)
    pub fn size(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn pixels(&self) -> &nd::Array3<u8> {
        &self.pixels
    }

    /// True when both frames share the same pixel buffer
    pub fn same_as(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// BT.601 luma, written into `out` to reuse its allocation
    pub fn grayscale_into(&self, out: &mut Image) {
        out.clear();
        out.width = self.width();
        out.height = self.height();
        out.data.reserve(out.width * out.height);
        for rgb in self.pixels.rows() {
            let luma = (299 * rgb[0] as u32 + 587 * rgb[1] as u32 + 114 * rgb[2] as u32) / 1000;
            out.data.push(luma as u8);
        }
    }

    pub fn to_grayscale(&self) -> Image {
        let mut image = Image::empty();
        self.grayscale_into(&mut image);
        image
    }
}

#[derive(Debug)]
pub struct PyramidFrame {
    /// original image
    pub image: Image,
    /// downsized images
    pub pyramid: Pyramid,
}

impl PyramidFrame {
    pub fn new(frame: &Frame, lk_levels: usize, min_level_size: usize) -> Result<PyramidFrame> {
        let image = frame.to_grayscale();
        let mut pyramid = Pyramid::empty();
        pyramid.compute(&image, lk_levels, min_level_size)?;
        Ok(PyramidFrame { image, pyramid })
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.pyramid.levels[level - 1]
        }
    }

    /// Number of usable levels above the original image
    pub fn level_count(&self) -> usize {
        self.pyramid.levels.len()
    }
}
