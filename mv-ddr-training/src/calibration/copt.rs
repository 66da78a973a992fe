//! Optimal lane centre with per-bit skew compensation.
//!
//! Every bit of a lane has its own pass window. The lane has a single centralization ADLL, but
//! each bit can be delayed further with its PBS register. A bit can therefore be sampled anywhere
//! inside its *centre zone*: its window centre, shifted by up to `pbs_max` PBS taps in the
//! direction the PBS delay moves the data relative to the strobe. The lane centre is a point that
//! lies inside the centre zone of every bit.
//!
//! `lambda` is the ratio of the PBS tap to the ADLL tap, scaled by [PBS_VAL_FACTOR].
use crate::ids::BUS_WIDTH_BITS;
use crate::odpg::Direction;

/// Scale of the lambda ratios.
pub const PBS_VAL_FACTOR: u32 = 1000;
/// Largest PBS value the solver hands out.
pub const PBS_MAX: u8 = 31;
/// PBS reserved on the read strobe when the read window sits at the low edge.
pub const RX_DESKEW_BIAS: u8 = 0xa;

/// Lane centre and the PBS of each bit that moves the bit centre onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Copt {
    pub centre: u8,
    pub pbs: [u8; BUS_WIDTH_BITS],
}

/// Lambda of a PBS tap of `pbs_tap_ps` against an ADLL tap of `adll_tap_ps`.
#[inline]
pub fn tap_factor(pbs_tap_ps: u32, adll_tap_ps: u32) -> u16 {
    (PBS_VAL_FACTOR * pbs_tap_ps / adll_tap_ps.max(1)) as u16
}

/// ADLL taps covered by `pbs` PBS taps.
#[inline]
fn pbs_to_adll(pbs: u8, lambda: u16) -> u16 {
    (pbs as u32 * lambda as u32 / PBS_VAL_FACTOR) as u16
}

/// PBS taps covering `taps` ADLL taps.
#[inline]
fn adll_to_pbs(taps: u16, lambda: u16) -> u16 {
    (taps as u32 * PBS_VAL_FACTOR / (lambda as u32).max(1)) as u16
}

/// Intersection of per-bit zones as `(max low, min high)`.
fn zone_bounds(zones: &[(u16, u16); BUS_WIDTH_BITS]) -> (u16, u16) {
    let low = zones.iter().map(|z| z.0).max().unwrap_or(0);
    let high = zones.iter().map(|z| z.1).min().unwrap_or(0);
    (low, high)
}

/// Solve the lane centre for the bit windows `windows`.
///
/// Returns [None] when no single centre can be reached by all bits, even after granting the bits
/// with wider windows some of their extra margin.
pub fn copt_get(
    direction: Direction,
    lambda: &[u16; BUS_WIDTH_BITS],
    windows: &[(u8, u8); BUS_WIDTH_BITS],
    pbs_max: u8,
) -> Option<Copt> {
    let centres = windows.map(|(l, h)| (l as u16 + h as u16) / 2);
    let sizes = windows.map(|(l, h)| 1 + h.saturating_sub(l) as u16);
    let min_size = sizes.iter().copied().min().unwrap_or(0);

    // A read bit can only be delayed, which moves its centre later. A write bit the other way.
    let mut centre_zone = [(0u16, 0u16); BUS_WIDTH_BITS];
    for bit in 0..BUS_WIDTH_BITS {
        let reach = pbs_to_adll(pbs_max, lambda[bit]);
        centre_zone[bit] = match direction {
            Direction::Read => (centres[bit], centres[bit] + reach),
            Direction::Write => (centres[bit].saturating_sub(reach), centres[bit]),
        };
    }
    let (low, high) = zone_bounds(&centre_zone);
    if high >= low {
        return Some(solution(direction, lambda, &centres, low, high, pbs_max));
    }

    let mut window_zone = [(0u16, 0u16); BUS_WIDTH_BITS];
    for bit in 0..BUS_WIDTH_BITS {
        let half_up = sizes[bit] / 2 + sizes[bit] % 2;
        window_zone[bit] = (
            (centre_zone[bit].0 + 1).saturating_sub(half_up),
            centre_zone[bit].1 + sizes[bit] / 2,
        );
    }
    let (low, high) = zone_bounds(&window_zone);
    if high < low {
        log::trace!("no common window zone for {:?}", windows);
        return None;
    }

    let mut extended = [(0u16, 0u16); BUS_WIDTH_BITS];
    for bit in 0..BUS_WIDTH_BITS {
        let margin = sizes[bit] - min_size;
        extended[bit] = (
            centre_zone[bit].0.saturating_sub(margin),
            centre_zone[bit].1 + margin,
        );
    }
    let (low, high) = zone_bounds(&extended);
    if high < low {
        log::trace!("no common extended centre zone for {:?}", windows);
        return None;
    }
    Some(solution(direction, lambda, &centres, low, high, pbs_max))
}

fn solution(
    direction: Direction,
    lambda: &[u16; BUS_WIDTH_BITS],
    centres: &[u16; BUS_WIDTH_BITS],
    low: u16,
    high: u16,
    pbs_max: u8,
) -> Copt {
    let centre = match direction {
        Direction::Read => low,
        Direction::Write => high,
    };
    let mut pbs = [0; BUS_WIDTH_BITS];
    for bit in 0..BUS_WIDTH_BITS {
        let distance = match direction {
            Direction::Read => centre.saturating_sub(centres[bit]),
            Direction::Write => centres[bit].saturating_sub(centre),
        };
        pbs[bit] = adll_to_pbs(distance, lambda[bit]).min(pbs_max as u16) as u8;
    }
    Copt {
        centre: centre.min(u8::MAX as u16) as u8,
        pbs,
    }
}

/// Move the strobe PBS to half of the largest DQ PBS and shift the lane centre to match.
///
/// `delta` is PBS already present on the strobe. Returns the new centre and the strobe PBS.
pub fn dqs_reposition(
    direction: Direction,
    lambda: &[u16; BUS_WIDTH_BITS],
    pbs: &[u8; BUS_WIDTH_BITS],
    delta: i8,
    centre: u8,
) -> (u8, u8) {
    let pbs_max = pbs.iter().copied().max().unwrap_or(0) as i32;
    let lambda_avg = lambda.iter().map(|l| *l as i32).sum::<i32>() / BUS_WIDTH_BITS as i32;
    let dqs_pbs = if delta >= 0 { (pbs_max + delta as i32) / 2 } else { pbs_max / 2 };
    let factor = PBS_VAL_FACTOR as i32;
    let centre = centre as i32;
    let centre = match direction {
        Direction::Write => centre + dqs_pbs * lambda_avg / factor,
        Direction::Read if delta < 0 => centre - (dqs_pbs + delta as i32) * lambda_avg / factor,
        Direction::Read => centre - dqs_pbs * lambda_avg / factor,
    };
    (centre.clamp(0, u8::MAX as i32) as u8, dqs_pbs.clamp(0, PBS_MAX as i32) as u8)
}
