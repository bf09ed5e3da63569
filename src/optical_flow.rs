use nalgebra as na;

use crate::frame::PyramidFrame;
use crate::image::*;
use crate::my_types::*;

type Range = [[i16; 2]; 2];

/// Pyramidal Lucas-Kanade parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LkParams {
    pub levels: usize,
    pub iters: usize,
    pub win_size: usize,
    pub term: f64,
    pub min_eig: f64,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            levels: 3,
            iters: 8,
            win_size: 7,
            term: 0.1,
            min_eig: 1e-4,
        }
    }
}

impl LkParams {
    /// Smallest pyramid level worth building for this window size
    pub fn min_level_size(&self) -> usize {
        2 * self.win_size + 2
    }
}

#[derive(Debug)]
pub struct OpticalFlow {
    params: LkParams,
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl OpticalFlow {
    pub fn new(params: LkParams) -> OpticalFlow {
        let n = params.win_size;
        OpticalFlow {
            params,
            ix: na::DMatrix::zeros(n, n),
            iy: na::DMatrix::zeros(n, n),
            it: na::DMatrix::zeros(n, n),
            grid: na::DMatrix::zeros(n, n),
        }
    }

    pub fn params(&self) -> &LkParams {
        &self.params
    }

    /// Find `point0` of `frame0` in `frame1`. Returns None when the point
    /// lies on a textureless patch, leaves the image or does not converge.
    ///
    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    pub fn track_point(
        &mut self,
        frame0: &PyramidFrame,
        frame1: &PyramidFrame,
        point0: Vector2d,
        guess: Option<Vector2d>,
    ) -> Option<Vector2d> {
        let lk_term2 = self.params.term.powi(2);
        let r = (self.params.win_size - 1) / 2;
        let levels = usize::min(
            self.params.levels,
            usize::min(frame0.level_count(), frame1.level_count()),
        );

        // initial guess
        let mut g_init = guess.map(|p| p - point0).unwrap_or(Vector2d::zeros())
            / u32::pow(2, levels as u32) as f64;
        let mut d = Vector2d::zeros();
        for level in (0..levels + 1).rev() {
            let level0 = frame0.get_image_at_level(level);
            let level1 = frame1.get_image_at_level(level);
            let u = point0 / u32::pow(2, level as u32) as f64;
            let range = integration_range(level0, u, r, 1)?;
            // compute the derivative
            scharr(level0, u, range, &mut self.ix, &mut self.iy, &mut self.grid);
            let gradient = spatial_gradient(&self.ix, &self.iy);
            if gradient.symmetric_eigenvalues().min() < self.params.min_eig {
                return None;
            }
            let mut converged = false;
            let mut nu = Vector2d::zeros();
            for _ in 0..self.params.iters {
                image_difference(range, r, &self.grid, &mut self.it, level1, u + g_init + nu)?;
                let eta = flow_vector(&gradient, &self.ix, &self.iy, &self.it)?;
                nu += eta;
                if eta.norm_squared() < lk_term2 {
                    converged = true;
                    break;
                }
            }

            d = nu;
            if !converged {
                return None;
            }
            if level > 0 {
                g_init = 2. * (g_init + d)
            }
        }

        Some(point0 + g_init + d)
    }
}

fn flow_vector(gradient: &Matrix2d, ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Option<Vector2d> {
    let mut b = Vector2d::zeros();

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }

    gradient.try_inverse().map(|inv_g| inv_g * b)
}

fn image_difference(
    prev_range: Range,
    r: usize,
    i0: &Matrixd,
    it: &mut Matrixd,
    level: &Image,
    center: Vector2d,
) -> Option<()> {
    let range = integration_range(level, center, r, 0)?;
    if range != prev_range {
        return None;
    }
    fill_grid(level, range, center, it);
    *it *= -1.;
    *it += i0.view((1, 1), (it.nrows(), it.ncols()));
    Some(())
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    debug_assert_eq!(ix.shape(), iy.shape());

    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(
    level: &Image,
    center: Vector2d,
    range: Range,
    out_x: &mut Matrixd,
    out_y: &mut Matrixd,
    grid: &mut Matrixd,
) {
    let grange = [
        [range[0][0] - 1, range[0][1] + 1],
        [range[1][0] - 1, range[1][1] + 1],
    ];
    fill_grid(level, grange, center, grid);

    *out_x = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    *out_y = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    *grid = na::DMatrix::zeros(
        (range[1][1] - range[1][0] + 1) as usize,
        (range[0][1] - range[0][0] + 1) as usize,
    );

    for (y_ind, y) in (range[1][0]..=range[1][1]).enumerate() {
        for (x_ind, x) in (range[0][0]..=range[0][1]).enumerate() {
            grid[(y_ind, x_ind)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders. Returns None if the center point is outside the level
/// boundaries.
fn integration_range(level: &Image, center: Vector2d, r: usize, padding: i16) -> Option<Range> {
    let r = r as i16;
    let mut range = [[0, 0], [0, 0]];
    for i in 0..2 {
        let s = if i == 0 { level.width } else { level.height };
        if !center[i].is_finite() || center[i] < 0. || center[i] > (s - 1) as f64 {
            return None;
        }
        let n = center[i] as i16;
        let fract = if center[i].fract() > 0. { 1 } else { 0 };
        range[i] = [
            i16::max(-r, -n + padding),
            i16::min(r, s as i16 - n - padding - 1 - fract),
        ];
        if range[i][0] > range[i][1] {
            return None;
        }
    }
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::Pyramid;

    fn make_pyramid_frame(image: Image, params: &LkParams) -> PyramidFrame {
        let mut pyramid = Pyramid::empty();
        pyramid
            .compute(&image, params.levels, params.min_level_size())
            .unwrap();
        PyramidFrame { image, pyramid }
    }

    fn blob(size: usize, cx: f64, cy: f64, sigma: f64) -> Image {
        let mut data = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                data.push((20. + 200. * (-d2 / (2. * sigma * sigma)).exp()).round() as u8);
            }
        }
        Image {
            data,
            width: size,
            height: size,
        }
    }

    #[test]
    fn test_flow() {
        let params = LkParams::default();
        let (dx, dy) = (3.0, -2.0);
        let frame0 = make_pyramid_frame(blob(64, 32., 32., 6.), &params);
        let frame1 = make_pyramid_frame(blob(64, 32. + dx, 32. + dy, 6.), &params);

        let mut flow = OpticalFlow::new(params);
        let point0 = Vector2d::new(30., 33.);
        let point1 = flow.track_point(&frame0, &frame1, point0, None).unwrap();
        let err = (point1 - point0) - Vector2d::new(dx, dy);
        assert!(err.norm() < 0.5, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_flat_region_is_lost() {
        let params = LkParams::default();
        let flat = Image {
            data: vec![90; 64 * 64],
            width: 64,
            height: 64,
        };
        let frame0 = make_pyramid_frame(flat.clone(), &params);
        let frame1 = make_pyramid_frame(flat, &params);
        let mut flow = OpticalFlow::new(params);
        assert_eq!(flow.track_point(&frame0, &frame1, Vector2d::new(20., 20.), None), None);
    }

    #[test]
    fn test_scharr() {
        let mut image = Image {
            data: vec![0; 25],
            width: 5,
            height: 5,
        };

        let mut out_x = Matrixd::zeros(0, 0);
        let mut out_y = Matrixd::zeros(0, 0);
        let mut grid = Matrixd::zeros(0, 0);

        let center = Vector2d::new(2.0, 2.0);
        let range = integration_range(&image, center, 1, 1).unwrap();
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::zeros(3, 3));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 1, 2, 3, 4, 5, 2, 3, 4, 5, 6, 3, 4, 5, 6, 7, 4, 5, 6, 7, 8,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::repeat(3, 3, 1.));
    }

    #[test]
    fn test_integration_range() {
        // Coordinate (0, 0) means center of top-left pixel, so (9, 9) is the
        // center of the bottom-right pixel for a 10x10 image.
        let image = Image {
            data: vec![],
            width: 10,
            height: 10,
        };
        assert_eq!(integration_range(&image, Vector2d::new(4.5, 4.5), 3, 0).unwrap(), [[-3, 3], [-3, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(1.5, 2.5), 3, 0).unwrap(), [[-1, 3], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(1.0, 2.0), 3, 0).unwrap(), [[-1, 3], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(0.9, 1.9), 3, 1).unwrap(), [[1, 3], [0, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(8.5, 2.0), 3, 0).unwrap(), [[-3, 0], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(9.5, 2.0), 3, 0), None);
        assert_eq!(integration_range(&image, Vector2d::new(f64::NAN, 2.0), 3, 0), None);
    }
}
