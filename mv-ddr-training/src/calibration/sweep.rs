//! Eye outline of one lane collected over a sweep.
use super::centroid::{Centroid, SweepPoint, center_of_mass};
use crate::odpg::{byte_status, wraparound_correct};

/// Lane windows of at most this many taps are treated as noise.
pub const NOISE_FILTER: u8 = 8;
/// Most points a sweep can record per lane.
pub const MAX_SWEEP_POINTS: usize = 32;

/// Position of the sweep relative to the eye of a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepState {
    /// No valid window seen yet.
    #[default]
    Above,
    Inside,
    /// The eye has been left, later windows are ignored.
    Under,
}

/// Windows of one lane over the sweep.
#[derive(Debug, Clone, Default)]
pub struct EyeTrace {
    state: SweepState,
    points: heapless::Vec<SweepPoint, MAX_SWEEP_POINTS>,
}

impl EyeTrace {
    pub const fn new() -> Self {
        Self {
            state: SweepState::Above,
            points: heapless::Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> SweepState {
        self.state
    }

    #[inline]
    pub fn points(&self) -> &[SweepPoint] {
        &self.points
    }

    /// Record the lane window found at `level` as `(centre, size)` in ADLL taps.
    ///
    /// [None] is a lane that did not lock at this level.
    pub fn add(&mut self, level: u8, window: Option<(u8, u8)>) {
        let valid = window.filter(|(_, size)| *size > NOISE_FILTER);
        self.state = match (self.state, valid) {
            (SweepState::Under, _) => SweepState::Under,
            (SweepState::Above, None) => SweepState::Above,
            (SweepState::Inside, None) => SweepState::Under,
            (_, Some((centre, size))) => {
                let point = SweepPoint {
                    start: (centre + 1).saturating_sub(size.div_ceil(2)),
                    end: centre.saturating_add(size / 2),
                    level,
                };
                if self.points.push(point).is_err() {
                    log::warn!("eye trace full, dropping level {}", level);
                }
                SweepState::Inside
            }
        };
    }

    /// Eye outline with the low windows of a wrapping lane moved up by one ADLL period.
    pub fn outline(&self) -> heapless::Vec<SweepPoint, MAX_SWEEP_POINTS> {
        let windows: heapless::Vec<(u8, u8), MAX_SWEEP_POINTS> =
            self.points.iter().map(|p| (p.start, p.end)).collect();
        let status = byte_status(&windows);
        self.points
            .iter()
            .map(|p| {
                let (start, end) = wraparound_correct(p.start, p.end, status);
                SweepPoint { start, end, level: p.level }
            })
            .collect()
    }

    /// Centre of mass of the eye, [None] without a usable outline.
    pub fn centroid(&self) -> Option<Centroid> {
        center_of_mass(&self.outline())
    }
}
