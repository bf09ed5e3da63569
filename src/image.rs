use crate::my_types::Vector2d;

/// Row-major grayscale image storage, the working format of the flow tracker
#[derive(Clone, Debug)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    /// Pixel value with coordinates clamped to the image borders
    #[inline(always)]
    pub fn value_clamped(&self, x: i32, y: i32) -> u8 {
        let x = x.clamp(0, self.width as i32 - 1);
        let y = y.clamp(0, self.height as i32 - 1);
        self.data[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    #[cfg(test)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }
}

/// Bilinear interpolation at a sub-pixel position. (0, 0) is the center of
/// the top-left pixel.
pub fn bilinear(image: &Image, point: Vector2d) -> f64 {
    let x0 = point.x.floor();
    let y0 = point.y.floor();
    let ax = point.x - x0;
    let ay = point.y - y0;
    let (x0, y0) = (x0 as i32, y0 as i32);

    let v00 = image.value_clamped(x0, y0) as f64;
    let v10 = image.value_clamped(x0 + 1, y0) as f64;
    let v01 = image.value_clamped(x0, y0 + 1) as f64;
    let v11 = image.value_clamped(x0 + 1, y0 + 1) as f64;

    (1. - ay) * ((1. - ax) * v00 + ax * v10) + ay * ((1. - ax) * v01 + ax * v11)
}
