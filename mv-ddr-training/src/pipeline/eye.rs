//! # DDR4 lane eyes
//!
//! Centralization as run at every point of the DDR4 sweeps. The per-bit windows of all killer
//! patterns are intersected as for DDR3, but instead of the plain lane midpoint the lane centre
//! is solved together with the PBS of every bit, so bits with a skewed window keep their margin.
use mv_ddr::phy::{PhyBank, dmin_reg, pbs_rx_reg, pbs_tx_reg, result_reg};

use super::Pipeline;
use super::centralization::window_size;
use super::pbs::NOMINAL_PBS_DLY_PS;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::calibration::centroid::Centroid;
use crate::calibration::copt::{Copt, PBS_MAX, copt_get, tap_factor};
use crate::calibration::sweep::{EyeTrace, SweepState};
use crate::error::Error;
use crate::ids::{BUS_WIDTH_BITS, InterfaceId, LaneId, MAX_INTERFACES, MAX_LANES};
use crate::odpg::Direction;

/// Centralization outcome of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LaneEye {
    pub copt: Copt,
    /// Narrowest bit window in ADLL taps.
    pub size: u8,
}

pub(crate) type LaneEyes = [[Option<LaneEye>; MAX_LANES]; MAX_INTERFACES];
pub(crate) type EyeTraces = [[EyeTrace; MAX_LANES]; MAX_INTERFACES];

pub(crate) fn new_traces() -> EyeTraces {
    core::array::from_fn(|_| core::array::from_fn(|_| EyeTrace::new()))
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    /// PBS to ADLL tap ratio of every bit at the current frequency.
    pub(crate) fn lambda(&self) -> [u16; BUS_WIDTH_BITS] {
        [tap_factor(NOMINAL_PBS_DLY_PS, self.adll_tap_ps()); BUS_WIDTH_BITS]
    }

    /// Centralize every lane of the effective chip-select without writing the result.
    pub(crate) fn lane_eyes(&mut self, direction: Direction) -> Result<LaneEyes, Error> {
        let windows = self.killer_windows(direction)?;
        let lambda = self.lambda();
        let mut eyes: LaneEyes = [[None; MAX_LANES]; MAX_INTERFACES];
        for if_id in self.active().iter() {
            for lane in self.tm.lane_act_mask.iter() {
                let Some(bits) = windows[if_id.index()][lane.index()] else {
                    continue;
                };
                if bits.iter().any(|(start, end)| start > end) {
                    log::trace!("if {} lane {}: some bit lost its window", if_id, lane);
                    continue;
                }
                let size = bits.iter().map(|w| window_size(*w)).min().unwrap_or(0);
                let Some(copt) = copt_get(direction, &lambda, &bits, PBS_MAX) else {
                    log::trace!("if {} lane {}: no common centre", if_id, lane);
                    continue;
                };
                eyes[if_id.index()][lane.index()] = Some(LaneEye { copt, size });
            }
        }
        Ok(eyes)
    }

    /// Add the eyes found at `level` to the traces.
    pub(crate) fn trace_eyes(&self, traces: &mut EyeTraces, level: u8, eyes: &LaneEyes) {
        for if_id in self.active().iter() {
            for lane in self.tm.lane_act_mask.iter() {
                let eye = eyes[if_id.index()][lane.index()];
                traces[if_id.index()][lane.index()].add(level, eye.map(|e| (e.copt.centre, e.size)));
            }
        }
    }

    /// Every lane has left its eye.
    pub(crate) fn sweep_done(&self, traces: &EyeTraces) -> bool {
        self.active().iter().all(|if_id| {
            self.tm
                .lane_act_mask
                .iter()
                .all(|lane| traces[if_id.index()][lane.index()].state() == SweepState::Under)
        })
    }

    /// Centroid of a lane trace, failing eyes too small to be trusted.
    pub(crate) fn lane_centroid(
        &mut self,
        if_id: InterfaceId,
        lane: LaneId,
        direction: Direction,
        trace: &EyeTrace,
    ) -> Result<Centroid, Error> {
        let centroid = trace.centroid().ok_or(Error::LockFailure { if_id, lane })?;
        let area = centroid.area;
        let cs = self.ctx.effective_cs.raw();
        let (offset, margin_shift) = match direction {
            Direction::Read => (4, 8),
            Direction::Write => (0, 0),
        };
        self.acc.bus_write(
            Access::Unicast(if_id),
            LaneAccess::Unicast(lane),
            PhyBank::Data,
            result_reg(cs, offset),
            area.min(u16::MAX as u32) as u16,
        )?;
        // RX and TX margins share one control register.
        let (subphy, reg) = dmin_reg(cs, lane.raw());
        let subphy = LaneId::new(subphy).ok_or(Error::LockFailure { if_id, lane })?;
        self.acc.bus_read_modify_write(
            Access::Unicast(if_id),
            subphy,
            PhyBank::Control,
            reg,
            (centroid.margin() as u16) << margin_shift,
            0xff << margin_shift,
        )?;
        if !centroid.is_valid() {
            return Err(Error::EyeTooSmall { if_id, lane, area });
        }
        log::debug!(
            "if {} lane {}: {:?} eye centroid tap {:.1} level {:.1} area {}",
            if_id,
            lane,
            direction,
            centroid.t,
            centroid.v,
            area
        );
        Ok(centroid)
    }

    /// Write the PBS of every data bit to the pad carrying it.
    pub(crate) fn write_dq_pbs(
        &mut self,
        if_id: InterfaceId,
        lane: LaneId,
        direction: Direction,
        pbs: &[u8; BUS_WIDTH_BITS],
        bias: u8,
    ) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        for pin in 0..BUS_WIDTH_BITS as u8 {
            let bit = self.ctx.logical_dq(if_id, lane, pin) as usize;
            let reg = match direction {
                Direction::Read => pbs_rx_reg(cs, pin),
                Direction::Write => pbs_tx_reg(cs, pin),
            };
            self.acc.bus_write(
                Access::Unicast(if_id),
                LaneAccess::Unicast(lane),
                PhyBank::Data,
                reg,
                (bias + pbs[bit]) as u16,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TuneParams;
    use crate::pipeline::tests::{ddr3_topology, pipeline, pipeline_with};
    use crate::results::Stage;

    const IF0: InterfaceId = InterfaceId::IF0;

    #[test]
    fn test_lane_eyes_solve_skew() {
        let lane1 = LaneId::new(1).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane1).bit_skew[3] = 4
        });
        p.ctx.stage = Some(Stage::DqVrefCalibration);
        let eyes = p.lane_eyes(Direction::Write).unwrap();
        let eye = eyes[0][0].unwrap();
        assert_eq!(eye.copt, Copt { centre: 25, pbs: [0; 8] });
        assert_eq!(eye.size, 31);
        // 800 MHz: one PBS tap is 0.473 ADLL taps.
        let eye = eyes[0][1].unwrap();
        assert_eq!(eye.copt.centre, 25);
        assert_eq!(eye.copt.pbs[3], 8);
        assert!(eyes[0][4].is_none());
    }

    #[test]
    fn test_lane_eyes_unlocked_lane() {
        let lane2 = LaneId::new(2).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane2).locks = false
        });
        let eyes = p.lane_eyes(Direction::Read).unwrap();
        assert!(eyes[0][2].is_none());
        assert!(eyes[0][3].is_some());
    }

    #[test]
    fn test_pbs_follows_dq_map() {
        let mut p = pipeline(TuneParams::new());
        let lane = LaneId::LANE0;
        p.ctx.dq_map[0][0] = [1, 0, 2, 3, 4, 5, 6, 7];
        p.write_dq_pbs(IF0, lane, Direction::Write, &[9, 0, 0, 0, 0, 0, 0, 0], 0).unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane, pbs_tx_reg(0, 1)), 9);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane, pbs_tx_reg(0, 0)), 0);
    }

    #[test]
    fn test_centroid_margins_share_register() {
        let lane3 = LaneId::new(3).unwrap();
        let (subphy, reg) = dmin_reg(0, 3);
        let subphy = LaneId::new(subphy).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.set_phy(IF0, PhyBank::Control, subphy, reg, 0x1234)
        });
        let mut trace = EyeTrace::new();
        for level in (0..=60).step_by(3) {
            trace.add(level, Some((25, 31)));
        }
        let c = p.lane_centroid(IF0, lane3, Direction::Read, &trace).unwrap();
        let margin = c.margin() as u16;
        assert!(margin > 0);
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Control, subphy, reg), margin << 8 | 0x34);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane3, result_reg(0, 4)), c.area as u16);

        p.lane_centroid(IF0, lane3, Direction::Write, &trace).unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.phy(IF0, PhyBank::Control, subphy, reg), margin << 8 | margin);
    }
}
