//! Centre of mass of a two dimensional eye.
//!
//! Every sweep point contributes the start and the end of its window at one voltage level. The
//! starts in sweep order followed by the ends in reverse order form a closed polygon. Its centroid
//! is the sampling point with the most margin in both time and voltage.
//!
//! The sums are integral and the optimum is truncated towards the lower tap and level, so the
//! result does not depend on floating point rounding.

/// Doubled polygon area an eye has to exceed.
pub const MIN_EYE_AREA: u32 = 400;

/// Pass window at one level of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPoint {
    pub start: u8,
    pub end: u8,
    pub level: u8,
}

/// Centre of mass of an eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    /// Exact time coordinate in ADLL taps, for diagnostics.
    pub t: f32,
    /// Exact voltage coordinate in sweep levels, for diagnostics.
    pub v: f32,
    /// Doubled polygon area, always positive.
    pub area: u32,
    /// Squared distance from the truncated optimum to the nearest polygon vertex.
    pub d_min: u32,
    tap: u8,
    level: u8,
}

impl Centroid {
    /// Optimal tap, truncated.
    #[inline]
    pub fn tap(&self) -> u8 {
        self.tap
    }

    /// Optimal level, truncated.
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.area > MIN_EYE_AREA
    }

    /// Half of `d_min`, as stored in the eye margin register.
    #[inline]
    pub fn margin(&self) -> u8 {
        (self.d_min / 2).min(u8::MAX as u32) as u8
    }
}

/// Vertex `idx` of the polygon of `points`, shifted by `(t0, v0)`.
fn vertex(points: &[SweepPoint], idx: usize, t0: i64, v0: i64) -> (i64, i64) {
    let n = points.len();
    let idx = idx % (2 * n);
    let (t, v) = if idx < n {
        (points[idx].start, points[idx].level)
    } else {
        let p = &points[2 * n - 1 - idx];
        (p.end, p.level)
    };
    (t as i64 - t0, v as i64 - v0)
}

/// Centroid of the eye outlined by `points`, [None] for a degenerate polygon.
pub fn center_of_mass(points: &[SweepPoint]) -> Option<Centroid> {
    let t0 = points.iter().map(|p| p.start).min()? as i64;
    let v0 = points.iter().map(|p| p.level).min()? as i64;
    let n = 2 * points.len();
    let mut area: i64 = 0;
    let mut t_sum: i64 = 0;
    let mut v_sum: i64 = 0;
    for idx in 0..n {
        let (t_a, v_a) = vertex(points, idx, t0, v0);
        let (t_b, v_b) = vertex(points, idx + 1, t0, v0);
        let cross = t_a * v_b - t_b * v_a;
        area += cross;
        t_sum += (t_a + t_b) * cross;
        v_sum += (v_a + v_b) * cross;
    }
    if area == 0 {
        return None;
    }
    // Both sums carry the sign of the area, the quotients are never negative.
    let t_opt = t_sum / (3 * area);
    let v_opt = v_sum / (3 * area);
    let d_min = (0..n)
        .map(|idx| {
            let (t_p, v_p) = vertex(points, idx, t0, v0);
            let (dt, dv) = (t_opt - t_p, v_opt - v_p);
            dt * dt + dv * dv
        })
        .min()?;
    let exact = |sum: i64, origin: i64| sum as f32 / (3 * area) as f32 + origin as f32;
    Some(Centroid {
        t: exact(t_sum, t0),
        v: exact(v_sum, v0),
        area: area.unsigned_abs().min(u32::MAX as u64) as u32,
        d_min: d_min.min(u32::MAX as i64) as u32,
        tap: (t_opt + t0).clamp(0, u8::MAX as i64) as u8,
        level: (v_opt + v0).clamp(0, u8::MAX as i64) as u8,
    })
}
