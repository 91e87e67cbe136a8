//! Pure tile geometry: gap expansion, diagonal baselines and rotation-aware
//! bounding boxes. Everything here is stateless and operates on logical
//! pixels; callers decide what the inputs mean.

/// Grows a base tile size by per-axis gap percentages. A gap of 50 on one
/// axis yields 1.5x the base extent on that axis, so spacing stays
/// proportional when the tile itself is rescaled.
pub fn expand(width: f32, height: f32, h_gap_percent: u32, v_gap_percent: u32) -> (u32, u32) {
    let w = width * (1.0 + h_gap_percent as f32 / 100.0);
    let h = height * (1.0 + v_gap_percent as f32 / 100.0);
    (floor_at_least_one(w), floor_at_least_one(h))
}

/// Length of the diagonal of a `w` x `h` box. Used as the baseline tile size
/// for icon marks: the diagonal bounds the icon under any rotation.
pub fn diagonal(width: f32, height: f32) -> f32 {
    (width * width + height * height).sqrt()
}

/// Axis-aligned bounding box of a `w` x `h` box rotated by `degree`.
///
/// The angle is normalized into `[0, 90]` by reflection before the
/// trigonometry: `(90, 270]` maps to `|180 - d|` and anything above maps to
/// `360 - d`. The three-way bucket is intentional; a single trigonometric
/// identity does not reproduce the same behavior at the 90/270 boundaries.
pub fn rotated_bounds(width: f32, height: f32, degree: f32) -> (f32, f32) {
    let d = degree.rem_euclid(360.0);
    let reflected = if d <= 90.0 {
        d
    } else if d <= 270.0 {
        (180.0 - d).abs()
    } else {
        360.0 - d
    };
    let theta = reflected.to_radians();
    let (sin, cos) = theta.sin_cos();
    (width * cos + height * sin, width * sin + height * cos)
}

/// Floors to whole pixels, refusing to produce a degenerate zero-area extent.
pub fn floor_at_least_one(value: f32) -> u32 {
    if value.is_finite() && value >= 1.0 {
        value.floor() as u32
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn assert_close(a: (f32, f32), b: (f32, f32)) {
        assert!(
            (a.0 - b.0).abs() < EPS && (a.1 - b.1).abs() < EPS,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn expand_is_identity_at_zero_gap() {
        assert_eq!(expand(100.0, 40.0, 0, 0), (100, 40));
    }

    #[test]
    fn expand_is_monotonic_in_gap() {
        let mut last = expand(100.0, 100.0, 0, 0);
        for g in [10, 25, 50, 100, 250] {
            let next = expand(100.0, 100.0, g, g);
            assert!(next.0 >= last.0 && next.1 >= last.1, "not monotonic at {g}");
            last = next;
        }
    }

    #[test]
    fn expand_applies_gaps_per_axis() {
        assert_eq!(expand(100.0, 100.0, 50, 0), (150, 100));
        assert_eq!(expand(100.0, 100.0, 0, 25), (100, 125));
    }

    #[test]
    fn expand_never_degenerates() {
        assert_eq!(expand(0.0, 0.0, 0, 0), (1, 1));
        assert_eq!(expand(0.4, 0.9, 0, 0), (1, 1));
    }

    #[test]
    fn diagonal_of_square() {
        assert!((diagonal(100.0, 100.0) - 141.421_36).abs() < EPS);
        assert!((diagonal(3.0, 4.0) - 5.0).abs() < EPS);
    }

    #[test]
    fn rotated_bounds_identity_at_zero() {
        assert_close(rotated_bounds(120.0, 40.0, 0.0), (120.0, 40.0));
        assert_close(rotated_bounds(120.0, 40.0, 360.0), (120.0, 40.0));
    }

    #[test]
    fn rotated_bounds_swaps_axes_at_right_angles() {
        assert_close(rotated_bounds(120.0, 40.0, 90.0), (40.0, 120.0));
        assert_close(rotated_bounds(120.0, 40.0, 270.0), (40.0, 120.0));
        assert_close(rotated_bounds(120.0, 40.0, 180.0), (120.0, 40.0));
    }

    #[test]
    fn rotated_bounds_reflection_symmetry() {
        for d in [1.0_f32, 15.0, 44.9, 90.0, 133.7, 180.0, 222.2, 269.0, 300.0] {
            assert_close(
                rotated_bounds(97.0, 31.0, d),
                rotated_bounds(97.0, 31.0, 360.0 - d),
            );
        }
    }

    #[test]
    fn rotated_bounds_continuous_at_bucket_boundaries() {
        for boundary in [90.0_f32, 270.0] {
            let below = rotated_bounds(80.0, 20.0, boundary - 0.01);
            let at = rotated_bounds(80.0, 20.0, boundary);
            let above = rotated_bounds(80.0, 20.0, boundary + 0.01);
            assert!((below.0 - at.0).abs() < 0.1 && (above.0 - at.0).abs() < 0.1);
            assert!((below.1 - at.1).abs() < 0.1 && (above.1 - at.1).abs() < 0.1);
        }
    }

    #[test]
    fn rotated_bounds_grows_within_first_quadrant() {
        let (w0, h0) = rotated_bounds(100.0, 50.0, 0.0);
        let (w1, h1) = rotated_bounds(100.0, 50.0, 30.0);
        assert!(w1 > w0 && h1 > h0);
    }
}
