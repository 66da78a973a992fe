//! # Centralization and receiver vref
//!
//! Centralization places the read and write centralization ADLLs in the middle of the data eye.
//! The eye of every bit is searched once per killer pattern. Each killer pattern toggles the
//! neighbours of one victim DQ, so the intersection of all searches is the window the bit keeps
//! under worst case crosstalk. The lane window is the intersection of its bits.
//!
//! The DDR3 receiver vref calibration sweeps the receiver reference voltage of the PHY and keeps
//! the value with the widest read window per lane.
use mv_ddr::phy::{CRX_PHY_REG, CTX_PHY_REG, PhyBank, cs_reg, csn_iob_vref_reg};

use super::Pipeline;
use super::pbs::corrected_windows;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::ids::{BUS_WIDTH_BITS, InterfaceId, LaneId, MAX_INTERFACES, MAX_LANES};
use crate::odpg::{ADLL_LOW_HALF_MAX, ADLL_TAPS_PER_PERIOD, Direction};
use crate::pattern::PatternId;
use crate::results::TestResult;

/// Narrowest lane window accepted by centralization, in ADLL taps.
pub const MIN_WINDOW_SIZE: u8 = 6;

/// Receiver vref values tried by the DDR3 vref calibration, best first on ties.
const RX_VREF_SWEEP: [u8; 8] = [63, 55, 47, 39, 31, 23, 15, 7];

/// Per-bit pass windows of every lane, [None] where some bit never locked.
pub(crate) type BitWindows = [[Option<[(u8, u8); BUS_WIDTH_BITS]>; MAX_LANES]; MAX_INTERFACES];

/// Common part of a set of windows, [None] if they do not overlap.
pub fn intersect(windows: &[(u8, u8)]) -> Option<(u8, u8)> {
    let start = windows.iter().map(|(start, _)| *start).max()?;
    let end = windows.iter().map(|(_, end)| *end).min()?;
    (start <= end).then_some((start, end))
}

/// Largest distance between the window starts, or between the window ends, of a set of bits.
pub fn edge_spread(windows: &[(u8, u8)]) -> u8 {
    let spread = |edge: fn(&(u8, u8)) -> u8| {
        let min = windows.iter().map(edge).min().unwrap_or(0);
        let max = windows.iter().map(edge).max().unwrap_or(0);
        max - min
    };
    spread(|w| w.0).max(spread(|w| w.1))
}

/// Number of taps of a window, both edges included.
#[inline]
pub const fn window_size(window: (u8, u8)) -> u8 {
    window.1 - window.0 + 1
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    pub(crate) fn centralization_rx(&mut self) -> Result<(), Error> {
        self.centralization(Direction::Read)
    }

    pub(crate) fn centralization_tx(&mut self) -> Result<(), Error> {
        self.centralization(Direction::Write)
    }

    /// Last tap of the centralization search in `direction`.
    pub(crate) const fn centralization_end(direction: Direction) -> u16 {
        match direction {
            Direction::Read => ADLL_LOW_HALF_MAX as u16,
            Direction::Write => ADLL_TAPS_PER_PERIOD as u16 - 1,
        }
    }

    /// Search every killer pattern and intersect the windows of each bit.
    pub(crate) fn killer_windows(&mut self, direction: Direction) -> Result<BitWindows, Error> {
        let mut windows: BitWindows = [[Some([(0, u8::MAX); BUS_WIDTH_BITS]); MAX_LANES]; MAX_INTERFACES];
        let end = Self::centralization_end(direction);
        for pattern in PatternId::KILLERS {
            let results = self.search_windows(direction, pattern, end)?;
            for if_id in self.active().iter() {
                for lane in self.tm.lane_act_mask.iter() {
                    let slot = &mut windows[if_id.index()][lane.index()];
                    let Some(bits) = slot.as_mut() else {
                        continue;
                    };
                    let Some(found) = results.lane_windows(if_id, lane) else {
                        log::debug!("if {} lane {}: no lock with {:?}", if_id, lane, pattern);
                        *slot = None;
                        continue;
                    };
                    for (bit, (start, end)) in bits.iter_mut().zip(corrected_windows(&found)) {
                        bit.0 = bit.0.max(start);
                        bit.1 = bit.1.min(end);
                    }
                }
            }
        }
        Ok(windows)
    }

    /// Lane window of a set of bit windows.
    ///
    /// Fails lanes that did not lock, whose common window is too narrow or whose bits are skewed
    /// by more than `tolerance` taps.
    fn lane_window(
        if_id: InterfaceId,
        lane: LaneId,
        bits: Option<[(u8, u8); BUS_WIDTH_BITS]>,
        tolerance: u8,
    ) -> Result<(u8, u8), Error> {
        let bits = bits.ok_or(Error::LockFailure { if_id, lane })?;
        let spread = edge_spread(&bits);
        if spread > tolerance {
            return Err(Error::LaneSkew { if_id, lane, spread });
        }
        let window = intersect(&bits).ok_or(Error::WindowTooNarrow { if_id, lane, size: 0 })?;
        let size = window_size(window);
        if size < MIN_WINDOW_SIZE {
            return Err(Error::WindowTooNarrow { if_id, lane, size });
        }
        Ok(window)
    }

    fn centralization(&mut self, direction: Direction) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        let reg = match direction {
            Direction::Read => cs_reg(CRX_PHY_REG, cs),
            Direction::Write => cs_reg(CTX_PHY_REG, cs),
        };
        let windows = self.killer_windows(direction)?;
        let tolerance = self.ctx.params.lane_skew_tolerance;
        for if_id in self.active().iter() {
            let mut passed = true;
            for lane in self.tm.lane_act_mask.iter() {
                let bits = windows[if_id.index()][lane.index()];
                let (start, end) = match Self::lane_window(if_id, lane, bits, tolerance) {
                    Ok(window) => window,
                    Err(err) => {
                        log::warn!("{:?} centralization: {}", direction, err);
                        passed = false;
                        continue;
                    }
                };
                let centre = ((start as u16 + end as u16) / 2) as u8 % ADLL_TAPS_PER_PERIOD;
                log::debug!(
                    "if {} lane {}: {:?} window {}..={} centre {}",
                    if_id,
                    lane,
                    direction,
                    start,
                    end,
                    centre
                );
                self.acc.bus_write(
                    Access::Unicast(if_id),
                    LaneAccess::Unicast(lane),
                    PhyBank::Data,
                    reg,
                    centre as u16,
                )?;
            }
            let result = if passed { TestResult::Success } else { TestResult::Failed };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }

    /// DDR3 receiver vref calibration of the effective chip-select.
    pub(crate) fn vref_calibration(&mut self) -> Result<(), Error> {
        let reg = csn_iob_vref_reg(self.ctx.effective_cs.raw());
        let mut best = [[None::<(u8, u8)>; MAX_LANES]; MAX_INTERFACES];
        for vref in RX_VREF_SWEEP {
            self.acc.bus_write(
                Access::Multicast,
                LaneAccess::Multicast,
                PhyBank::Data,
                reg,
                vref as u16,
            )?;
            let results = self.search_windows(Direction::Read, PatternId::Vref, ADLL_LOW_HALF_MAX as u16)?;
            for if_id in self.active().iter() {
                for lane in self.tm.lane_act_mask.iter() {
                    let Some(size) = results
                        .lane_windows(if_id, lane)
                        .and_then(|bits| intersect(&corrected_windows(&bits)))
                        .map(window_size)
                    else {
                        continue;
                    };
                    let slot = &mut best[if_id.index()][lane.index()];
                    if slot.is_none_or(|(_, best_size)| size > best_size) {
                        *slot = Some((vref, size));
                    }
                }
            }
        }
        for if_id in self.active().iter() {
            let mut passed = true;
            for lane in self.tm.lane_act_mask.iter() {
                let Some((vref, size)) = best[if_id.index()][lane.index()] else {
                    log::warn!("if {} lane {}: no read window at any receiver vref", if_id, lane);
                    passed = false;
                    continue;
                };
                log::debug!("if {} lane {}: receiver vref {} window {}", if_id, lane, vref, size);
                self.acc.bus_write(
                    Access::Unicast(if_id),
                    LaneAccess::Unicast(lane),
                    PhyBank::Data,
                    reg,
                    vref as u16,
                )?;
            }
            let result = if passed { TestResult::Success } else { TestResult::Failed };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TuneParams;
    use crate::ids::ChipSelect;
    use crate::pipeline::tests::{ddr3_topology, pipeline, pipeline_with};
    use crate::results::Stage;
    use crate::sim::Eye;

    const IF0: InterfaceId = InterfaceId::IF0;

    #[test]
    fn test_intersect() {
        assert_eq!(intersect(&[(10, 40), (14, 44), (8, 38)]), Some((14, 38)));
        assert_eq!(intersect(&[(10, 20), (21, 30)]), None);
        assert_eq!(intersect(&[]), None);
        assert_eq!(window_size((14, 19)), 6);
    }

    #[test]
    fn test_edge_spread() {
        assert_eq!(edge_spread(&[(10, 40), (14, 44), (12, 38)]), 6);
        assert_eq!(edge_spread(&[(10, 40)]), 0);
    }

    #[test]
    fn test_skew_beyond_tolerance_fails_lane() {
        let lane2 = LaneId::new(2).unwrap();
        let params = TuneParams::new().with_lane_skew_tolerance(3);
        let mut p = pipeline_with(ddr3_topology(), params, |sim| {
            sim.lane_mut(IF0, lane2).bit_skew[6] = 4;
            sim.lane_mut(IF0, LaneId::LANE0).bit_skew[1] = 3;
        });
        p.ctx.stage = Some(Stage::CentralizationRx);
        p.centralization_rx().unwrap();
        assert_eq!(p.results().get(Stage::CentralizationRx, IF0), TestResult::Failed);
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane2, CRX_PHY_REG), 0);
        // A spread equal to the tolerance is accepted.
        assert_eq!(sim.phy(IF0, PhyBank::Data, LaneId::LANE0, CRX_PHY_REG), 26);
    }

    #[test]
    fn test_centralization_rx_centres_window() {
        let mut p = pipeline(TuneParams::new());
        p.ctx.stage = Some(Stage::CentralizationRx);
        p.centralization_rx().unwrap();
        assert_eq!(p.results().get(Stage::CentralizationRx, IF0), TestResult::Success);
        let sim = p.access().backend();
        for lane in 0..4 {
            let lane = LaneId::new(lane).unwrap();
            assert_eq!(sim.phy(IF0, PhyBank::Data, lane, CRX_PHY_REG), 25);
        }
        // One window search per direction and killer pattern.
        assert_eq!(sim.searches, 16);
    }

    #[test]
    fn test_skewed_bit_narrows_lane_window() {
        let lane3 = LaneId::new(3).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane3).bit_skew[3] = 4
        });
        p.ctx.stage = Some(Stage::CentralizationTx);
        p.ctx.effective_cs = ChipSelect::new(1).unwrap();
        p.centralization_tx().unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane3, cs_reg(CTX_PHY_REG, 1)), 27);
        assert_eq!(sim.phy(IF0, PhyBank::Data, LaneId::LANE0, cs_reg(CTX_PHY_REG, 1)), 25);
    }

    #[test]
    fn test_narrow_window_fails_lane() {
        let lane1 = LaneId::new(1).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane1).window = (10, 14)
        });
        p.ctx.stage = Some(Stage::CentralizationRx);
        p.centralization_rx().unwrap();
        assert_eq!(p.results().get(Stage::CentralizationRx, IF0), TestResult::Failed);
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Data, LaneId::LANE0, CRX_PHY_REG), 25);
    }

    #[test]
    fn test_minimum_window_passes() {
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.all_lanes(|lane| lane.window = (10, 15))
        });
        p.ctx.stage = Some(Stage::CentralizationRx);
        p.centralization_rx().unwrap();
        assert_eq!(p.results().get(Stage::CentralizationRx, IF0), TestResult::Success);
        assert_eq!(
            p.access().backend().phy(IF0, PhyBank::Data, LaneId::LANE0, CRX_PHY_REG),
            12
        );
    }

    #[test]
    fn test_centralization_is_repeatable() {
        let mut p = pipeline(TuneParams::new());
        p.ctx.stage = Some(Stage::CentralizationTx);
        p.centralization_tx().unwrap();
        let first = p.access().backend().phy(IF0, PhyBank::Data, LaneId::LANE0, CTX_PHY_REG);
        p.centralization_tx().unwrap();
        let second = p.access().backend().phy(IF0, PhyBank::Data, LaneId::LANE0, CTX_PHY_REG);
        assert!(first.abs_diff(second) <= 1);
    }

    #[test]
    fn test_write_search_failure() {
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, LaneId::new(2).unwrap()).fail_reg = Some(CTX_PHY_REG)
        });
        p.ctx.stage = Some(Stage::CentralizationRx);
        p.centralization_rx().unwrap();
        assert_eq!(p.results().get(Stage::CentralizationRx, IF0), TestResult::Success);
        p.ctx.stage = Some(Stage::CentralizationTx);
        p.centralization_tx().unwrap();
        assert_eq!(p.results().get(Stage::CentralizationTx, IF0), TestResult::Failed);
    }

    #[test]
    fn test_vref_calibration_picks_widest_window() {
        let lane0 = LaneId::LANE0;
        let lane2 = LaneId::new(2).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.all_lanes(|lane| lane.rx_eye = Some(Eye { centre: 40, height: 40 }));
            sim.lane_mut(IF0, lane2).rx_eye = Some(Eye { centre: 20, height: 40 });
        });
        p.ctx.stage = Some(Stage::VrefCalibration);
        p.vref_calibration().unwrap();
        assert_eq!(p.results().get(Stage::VrefCalibration, IF0), TestResult::Success);
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, csn_iob_vref_reg(0)), 39);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane2, csn_iob_vref_reg(0)), 23);
    }

    #[test]
    fn test_vref_calibration_without_eye_fails() {
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, LaneId::new(1).unwrap()).rx_eye = Some(Eye { centre: 100, height: 10 })
        });
        p.ctx.stage = Some(Stage::VrefCalibration);
        p.vref_calibration().unwrap();
        assert_eq!(p.results().get(Stage::VrefCalibration, IF0), TestResult::Failed);
    }
}
