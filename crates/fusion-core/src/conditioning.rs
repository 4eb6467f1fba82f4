//! Per-frame conditioning of the depth grid.
//!
//! The temporal filter, median pass and clip produce the grid shown to
//! visualization consumers. Zone decisions never read it: the fusion input is
//! the plain mean over [`DepthRegion`] cells of the decoded frame.

use sensor_ingest::{GRID_CELLS, GRID_SIDE};

use crate::config::DepthRegion;

/// Row-major 8×8 grid of meters.
pub type Grid = [f32; GRID_CELLS];

/// First row/column of the 4×4 center block.
const CENTER_START: usize = 3;
const CENTER_SIDE: usize = 4;

const FIXED_RANGE_WEIGHT: f32 = 0.9;
const STRETCH_WEIGHT: f32 = 0.1;

/// Output of one [`DepthConditioner::condition`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionedGrid {
    /// Filtered, median-denoised and clipped grid (meters).
    pub grid: Grid,
    /// Contrast-stretched copy of `grid`, normalized to `[0, 1]`.
    pub presentation: Grid,
}

/// Owns the exponentially decayed grid carried between frames.
#[derive(Clone, Debug)]
pub struct DepthConditioner {
    decay: f32,
    max_range_m: f32,
    filtered: Grid,
}

impl DepthConditioner {
    /// The filtered grid starts at zero and converges over the first frames.
    pub fn new(decay: f32, max_range_m: f32) -> Self {
        Self {
            decay,
            max_range_m,
            filtered: [0.0; GRID_CELLS],
        }
    }

    /// Fold `frame` into the temporal filter and derive the display grids.
    pub fn condition(&mut self, frame: &Grid) -> ConditionedGrid {
        for (state, &new) in self.filtered.iter_mut().zip(frame) {
            *state = self.decay * *state + (1.0 - self.decay) * new;
        }
        let mut grid = median3x3(&self.filtered);
        for cell in &mut grid {
            *cell = cell.clamp(0.0, self.max_range_m);
        }
        let presentation = presentation_grid(&grid, self.max_range_m);
        ConditionedGrid { grid, presentation }
    }

    pub fn filtered(&self) -> &Grid {
        &self.filtered
    }
}

/// 3×3 neighbourhood median; borders replicate the nearest edge cell.
pub fn median3x3(grid: &Grid) -> Grid {
    let side = GRID_SIDE as isize;
    let clamp = |v: isize| v.clamp(0, side - 1) as usize;
    let mut out = [0.0; GRID_CELLS];
    for row in 0..side {
        for col in 0..side {
            let mut neighbourhood = [0.0f32; 9];
            let mut k = 0;
            for dr in -1..=1 {
                for dc in -1..=1 {
                    neighbourhood[k] = grid[clamp(row + dr) * GRID_SIDE + clamp(col + dc)];
                    k += 1;
                }
            }
            neighbourhood.sort_unstable_by(f32::total_cmp);
            out[row as usize * GRID_SIDE + col as usize] = neighbourhood[4];
        }
    }
    out
}

/// Blend a fixed-range normalization with a min/max stretch.
pub fn presentation_grid(grid: &Grid, max_range_m: f32) -> Grid {
    let (min, max) = grid
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = if max > min { max - min } else { 1.0 };
    let mut out = [0.0; GRID_CELLS];
    for (dst, &v) in out.iter_mut().zip(grid) {
        let scaled = FIXED_RANGE_WEIGHT * (v / max_range_m) + STRETCH_WEIGHT * ((v - min) / span);
        *dst = scaled.clamp(0.0, 1.0);
    }
    out
}

/// Indices of the cells averaged for `region`.
pub fn region_indices(region: DepthRegion) -> Vec<usize> {
    match region {
        DepthRegion::Full => (0..GRID_CELLS).collect(),
        DepthRegion::Center => (CENTER_START..CENTER_START + CENTER_SIDE)
            .flat_map(|row| {
                (CENTER_START..CENTER_START + CENTER_SIDE).map(move |col| row * GRID_SIDE + col)
            })
            .collect(),
    }
}

/// Mean of the positive readings inside `region`; `None` if there are none.
pub fn region_mean(values: &[f32], region: DepthRegion) -> Option<f32> {
    let (sum, count) = region_indices(region)
        .into_iter()
        .filter_map(|i| values.get(i).copied())
        .filter(|v| *v > 0.0)
        .fold((0.0f32, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f32)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn center_region_matches_sensor_indices() {
        assert_eq!(
            region_indices(DepthRegion::Center),
            vec![27, 28, 29, 30, 35, 36, 37, 38, 43, 44, 45, 46, 51, 52, 53, 54]
        );
        assert_eq!(region_indices(DepthRegion::Full).len(), GRID_CELLS);
    }

    #[test]
    fn region_mean_skips_invalid_cells() {
        let mut values = [3.0f32; GRID_CELLS];
        for i in region_indices(DepthRegion::Center) {
            values[i] = 1.0;
        }
        values[27] = 0.0;
        values[28] = -1.0;
        assert_relative_eq!(region_mean(&values, DepthRegion::Center).unwrap(), 1.0, epsilon = 1e-6);

        let full = region_mean(&values, DepthRegion::Full).unwrap();
        assert_relative_eq!(full, (48.0 * 3.0 + 14.0) / 62.0, epsilon = 1e-5);

        assert_eq!(region_mean(&[0.0; GRID_CELLS], DepthRegion::Center), None);
    }

    #[test]
    fn median_removes_single_cell_spike() {
        let mut grid = [1.0f32; GRID_CELLS];
        grid[36] = 9.0;
        grid[0] = 0.0;
        let out = median3x3(&grid);
        assert!(out.iter().all(|v| (*v - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn temporal_filter_converges_and_clips() {
        let mut conditioner = DepthConditioner::new(0.7, 4.0);
        let frame = [2.0f32; GRID_CELLS];
        let first = conditioner.condition(&frame);
        assert_relative_eq!(first.grid[0], 0.6, epsilon = 1e-6);

        for _ in 0..60 {
            conditioner.condition(&frame);
        }
        assert_relative_eq!(conditioner.filtered()[10], 2.0, epsilon = 1e-4);

        let mut far = DepthConditioner::new(0.0, 4.0);
        let clipped = far.condition(&[6.5; GRID_CELLS]);
        assert!(clipped.grid.iter().all(|v| *v == 4.0));
    }

    #[test]
    fn presentation_blends_fixed_and_stretched_scales() {
        let mut grid = [1.0f32; GRID_CELLS];
        grid[0] = 3.0;
        let out = presentation_grid(&grid, 4.0);
        assert_relative_eq!(out[0], 0.9 * 0.75 + 0.1, epsilon = 1e-6);
        assert_relative_eq!(out[1], 0.9 * 0.25, epsilon = 1e-6);

        let flat = presentation_grid(&[2.0; GRID_CELLS], 4.0);
        assert_relative_eq!(flat[5], 0.45, epsilon = 1e-6);
    }
}
