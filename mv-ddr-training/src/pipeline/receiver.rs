//! # DDR4 receiver calibration
//!
//! Sweeps the duty cycle of the read receivers of the PHY and centralizes the read windows at
//! every step. The duty cycle and the read centre are then set to the centroid of the eye
//! outlined by the sweep.
use mv_ddr::phy::{
    CRX_PHY_REG, CS_PBS_OFFSET, DQSN_PAD, DQSP_PAD, PBS_RX_BCAST_PHY_REG, PhyBank, cs_reg,
    csn_iob_vref_reg, pbs_rx_reg, vref_reg,
};

use super::Pipeline;
use super::eye::new_traces;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::calibration::copt::{RX_DESKEW_BIAS, dqs_reposition};
use crate::error::Error;
use crate::ids::{MAX_INTERFACES, MAX_LANES};
use crate::odpg::{ADLL_TAPS_PER_PERIOD, Direction};
use crate::results::TestResult;

const DUTY_CYCLE_MAX: u8 = 63;
const DUTY_CYCLE_STEP: usize = 3;

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    pub(crate) fn receiver_calibration(&mut self) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        for reg in [
            PBS_RX_BCAST_PHY_REG + cs * CS_PBS_OFFSET,
            pbs_rx_reg(cs, DQSP_PAD),
            pbs_rx_reg(cs, DQSN_PAD),
        ] {
            self.acc
                .bus_write(Access::Multicast, LaneAccess::Multicast, PhyBank::Data, reg, 0)?;
        }

        let mut traces = new_traces();
        for dc in (0..=DUTY_CYCLE_MAX).step_by(DUTY_CYCLE_STEP) {
            self.write_duty_cycle(Access::Multicast, LaneAccess::Multicast, dc)?;
            let eyes = self.lane_eyes(Direction::Read)?;
            self.trace_eyes(&mut traces, dc, &eyes);
            if self.sweep_done(&traces) {
                log::debug!("receiver sweep left every eye at duty cycle {}", dc);
                break;
            }
        }

        let mut calibrated = [[false; MAX_LANES]; MAX_INTERFACES];
        for if_id in self.active().iter() {
            for lane in self.tm.lane_act_mask.iter() {
                let trace = &traces[if_id.index()][lane.index()];
                match self.lane_centroid(if_id, lane, Direction::Read, trace) {
                    Ok(centroid) => {
                        self.write_duty_cycle(
                            Access::Unicast(if_id),
                            LaneAccess::Unicast(lane),
                            centroid.level(),
                        )?;
                        calibrated[if_id.index()][lane.index()] = true;
                    }
                    Err(err) => log::warn!("receiver calibration: {}", err),
                }
            }
        }

        // Centralize once more at the chosen duty cycle.
        let eyes = self.lane_eyes(Direction::Read)?;
        let lambda = self.lambda();
        for if_id in self.active().iter() {
            let mut passed = true;
            for lane in self.tm.lane_act_mask.iter() {
                if !calibrated[if_id.index()][lane.index()] {
                    passed = false;
                    continue;
                }
                let Some(eye) = eyes[if_id.index()][lane.index()] else {
                    log::warn!("if {} lane {}: no read window at the calibrated duty cycle", if_id, lane);
                    passed = false;
                    continue;
                };
                let (centre, dqs_pbs) =
                    dqs_reposition(Direction::Read, &lambda, &eye.copt.pbs, 0, eye.copt.centre);
                self.write_dq_pbs(if_id, lane, Direction::Read, &eye.copt.pbs, RX_DESKEW_BIAS)?;
                for pad in [DQSP_PAD, DQSN_PAD] {
                    self.acc.bus_write(
                        Access::Unicast(if_id),
                        LaneAccess::Unicast(lane),
                        PhyBank::Data,
                        pbs_rx_reg(cs, pad),
                        dqs_pbs as u16,
                    )?;
                }
                self.acc.bus_write(
                    Access::Unicast(if_id),
                    LaneAccess::Unicast(lane),
                    PhyBank::Data,
                    cs_reg(CRX_PHY_REG, cs),
                    (centre % ADLL_TAPS_PER_PERIOD) as u16,
                )?;
                log::debug!("if {} lane {}: read centre {} DQS PBS {}", if_id, lane, centre, dqs_pbs);
            }
            let result = if passed { TestResult::Success } else { TestResult::Failed };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }

    /// Receiver duty cycle of the data and both strobe pads.
    fn write_duty_cycle(&mut self, access: Access, lanes: LaneAccess, dc: u8) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        for reg in [csn_iob_vref_reg(cs), vref_reg(cs, DQSP_PAD), vref_reg(cs, DQSN_PAD)] {
            self.acc.bus_write(access, lanes, PhyBank::Data, reg, dc as u16)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mv_ddr::phy::result_reg;

    use super::*;
    use crate::context::TuneParams;
    use crate::ids::{InterfaceId, LaneId};
    use crate::pipeline::tests::{ddr3_topology, pipeline_with};
    use crate::results::Stage;
    use crate::sim::Eye;

    const IF0: InterfaceId = InterfaceId::IF0;

    #[test]
    fn test_duty_cycle_at_eye_centre() {
        let lane2 = LaneId::new(2).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.all_lanes(|lane| lane.rx_eye = Some(Eye { centre: 30, height: 30 }));
            sim.lane_mut(IF0, lane2).rx_eye = Some(Eye { centre: 18, height: 15 });
        });
        p.ctx.stage = Some(Stage::ReceiverCalibration);
        p.receiver_calibration().unwrap();
        assert_eq!(p.results().get(Stage::ReceiverCalibration, IF0), TestResult::Success);
        let sim = p.access().backend();
        let lane0 = LaneId::LANE0;
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, csn_iob_vref_reg(0)), 30);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, vref_reg(0, DQSN_PAD)), 30);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane2, csn_iob_vref_reg(0)), 18);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, cs_reg(CRX_PHY_REG, 0)), 25);
        // Aligned bits keep only the deskew bias.
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, pbs_rx_reg(0, 6)), RX_DESKEW_BIAS as u16);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, pbs_rx_reg(0, DQSP_PAD)), 0);
        assert!(sim.phy(IF0, PhyBank::Data, lane0, result_reg(0, 4)) > 400);
    }

    #[test]
    fn test_sweep_stops_below_eyes() {
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.all_lanes(|lane| lane.rx_eye = Some(Eye { centre: 12, height: 10 }))
        });
        p.ctx.stage = Some(Stage::ReceiverCalibration);
        p.receiver_calibration().unwrap();
        // 8 duty cycles up to 21, then the final centralization. Two searches per pattern.
        assert_eq!(p.access().backend().searches, 9 * 16);
    }

    #[test]
    fn test_small_eye_fails_lane() {
        let lane1 = LaneId::new(1).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane1).rx_eye = Some(Eye { centre: 30, height: 4 })
        });
        p.ctx.stage = Some(Stage::ReceiverCalibration);
        p.receiver_calibration().unwrap();
        assert_eq!(p.results().get(Stage::ReceiverCalibration, IF0), TestResult::Failed);
    }
}
