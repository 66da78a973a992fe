//! # DQ pin mapping
//!
//! Reads the multi purpose registers of the DRAM in parallel mode and decodes the data bit of
//! every pin. The result replaces the identity map of the context and is used by every later
//! per-bit register write.
use mv_ddr::dunit::regs::SdramCommand;
use mv_ddr::dunit::{MR3_MPR_ENABLE, MR3_MPR_MASK, MR3_MPR_PARALLEL};

use super::Pipeline;
use crate::backend::{FrequencyController, RegisterBackend};
use crate::calibration::dq_map::{MPR_LOCATION_STRIDE, MPR_PATTERNS, decode_lane};
use crate::error::Error;
use crate::ids::InterfaceId;
use crate::results::TestResult;

/// Byte lanes covered by one 32-bit readout.
const LANES_PER_WORD: u8 = 4;

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    pub(crate) fn dq_mapping(&mut self) -> Result<(), Error> {
        let masks = self.cs_masks();
        self.write_mrs_cmd(
            &masks,
            SdramCommand::Mrs3,
            MR3_MPR_ENABLE | MR3_MPR_PARALLEL,
            MR3_MPR_MASK,
        );
        let outcome = self.read_dq_map();
        self.write_mrs_cmd(&masks, SdramCommand::Mrs3, 0, MR3_MPR_MASK);
        outcome
    }

    fn read_dq_map(&mut self) -> Result<(), Error> {
        for if_id in self.active().iter() {
            let words = self.read_mpr(if_id)?;
            let mut passed = true;
            for lane in self.tm.lane_act_mask.iter() {
                if lane.raw() >= LANES_PER_WORD {
                    log::debug!("if {} lane {}: keeping identity DQ map", if_id, lane);
                    continue;
                }
                let shift = 8 * lane.raw() as u32;
                let readouts = words.map(|word| (word >> shift) as u8);
                match decode_lane(&readouts) {
                    Some(perm) => {
                        log::debug!("if {} lane {}: DQ map {:?}", if_id, lane, perm);
                        self.ctx.dq_map[if_id.index()][lane.index()] = perm;
                    }
                    None => {
                        log::warn!(
                            "if {} lane {}: ambiguous MPR readout {:02x?}",
                            if_id,
                            lane,
                            readouts
                        );
                        passed = false;
                    }
                }
            }
            let result = if passed { TestResult::Success } else { TestResult::Failed };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }

    /// One readout word per multi purpose register location.
    fn read_mpr(&mut self, if_id: InterfaceId) -> Result<[u32; MPR_PATTERNS.len()], Error> {
        let mut words = [0; MPR_PATTERNS.len()];
        for (location, word) in words.iter_mut().enumerate() {
            let mut read = [0];
            self.acc
                .dram_read(if_id, location as u32 * MPR_LOCATION_STRIDE, &mut read)?;
            *word = read[0];
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use mv_ddr::dunit::MR3;

    use super::*;
    use crate::context::TuneParams;
    use crate::ids::LaneId;
    use crate::pipeline::tests::{ddr3_topology, pipeline, pipeline_with};
    use crate::results::Stage;

    const IF0: InterfaceId = InterfaceId::IF0;

    #[test]
    fn test_swapped_pins_mapped() {
        let lane1 = LaneId::new(1).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane1).dq_perm = [0, 1, 2, 5, 4, 3, 6, 7]
        });
        p.ctx.stage = Some(Stage::DqMapping);
        p.dq_mapping().unwrap();
        assert_eq!(p.results().get(Stage::DqMapping, IF0), TestResult::Success);
        assert_eq!(p.context().logical_dq(IF0, lane1, 3), 5);
        assert_eq!(p.context().logical_dq(IF0, lane1, 5), 3);
        assert_eq!(p.context().logical_dq(IF0, LaneId::LANE0, 3), 3);
        // MPR mode is left again.
        assert_eq!(p.access().backend().reg(IF0, MR3) & MR3_MPR_ENABLE, 0);
    }

    #[test]
    fn test_ambiguous_readout_fails() {
        let lane2 = LaneId::new(2).unwrap();
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new(), |sim| {
            sim.lane_mut(IF0, lane2).dq_perm = [0, 0, 2, 3, 4, 5, 6, 7]
        });
        p.ctx.stage = Some(Stage::DqMapping);
        p.dq_mapping().unwrap();
        assert_eq!(p.results().get(Stage::DqMapping, IF0), TestResult::Failed);
    }

    #[test]
    fn test_identity_board() {
        let mut p = pipeline(TuneParams::new());
        p.ctx.stage = Some(Stage::DqMapping);
        p.dq_mapping().unwrap();
        for pin in 0..8 {
            assert_eq!(p.context().logical_dq(IF0, LaneId::new(3).unwrap(), pin), pin);
        }
    }
}
