//! # DDR4 DQ vref calibration
//!
//! Sweeps the VrefDQ of the DRAM from the top of range 1 downwards, centralizing the write
//! windows at every step. The DRAM has a single VrefDQ per device, so the eye centroids of the
//! lanes are averaged into one value. The write centre and per-bit PBS of every lane are then
//! solved at that value.
//!
//! VrefDQ is kept as a tap on one linear scale: taps below [RANGE_1_OFFSET] are range 2, the
//! others range 1 shifted by [RANGE_1_OFFSET].
use mv_ddr::dunit::regs::SdramCommand;
use mv_ddr::dunit::{MR6_VREF_MASK, MR6_VREF_RANGE_2, MR6_VREF_TRAINING};
use mv_ddr::phy::{CTX_PHY_REG, PhyBank, cs_reg};

use super::Pipeline;
use super::eye::new_traces;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::ids::{MAX_INTERFACES, MAX_LANES};
use crate::odpg::{ADLL_TAPS_PER_PERIOD, Direction};
use crate::results::TestResult;

/// Range 2 covers the lowest taps of the common scale.
pub const RANGE_1_OFFSET: u8 = 23;
/// First tap of the sweep, the top of range 1.
pub const VREF_TAP_MAX: u8 = 73;
/// Sweep stops before going below this tap.
pub const VREF_TAP_MIN: u8 = 3;
const VREF_TAP_STEP: u8 = 3;

/// MR6 value selecting VrefDQ `tap`.
#[inline]
pub const fn mr6_vref(tap: u8, training: bool) -> u32 {
    let value = if tap < RANGE_1_OFFSET {
        tap as u32 | MR6_VREF_RANGE_2
    } else {
        (tap - RANGE_1_OFFSET) as u32
    };
    if training { value | MR6_VREF_TRAINING } else { value }
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    pub(crate) fn dq_vref_calibration(&mut self) -> Result<(), Error> {
        let mut traces = new_traces();
        let mut tap = VREF_TAP_MAX;
        while tap >= VREF_TAP_MIN {
            self.set_vref_dq(tap, true);
            let eyes = self.lane_eyes(Direction::Write)?;
            self.trace_eyes(&mut traces, tap, &eyes);
            if self.sweep_done(&traces) {
                log::debug!("VrefDQ sweep left every eye at tap {}", tap);
                break;
            }
            tap -= VREF_TAP_STEP;
        }

        let mut calibrated = [[false; MAX_LANES]; MAX_INTERFACES];
        let mut level_sum = 0u32;
        let mut levels = 0u32;
        for if_id in self.active().iter() {
            for lane in self.tm.lane_act_mask.iter() {
                let trace = &traces[if_id.index()][lane.index()];
                match self.lane_centroid(if_id, lane, Direction::Write, trace) {
                    Ok(centroid) => {
                        level_sum += centroid.level() as u32;
                        levels += 1;
                        calibrated[if_id.index()][lane.index()] = true;
                    }
                    Err(err) => log::warn!("DQ vref calibration: {}", err),
                }
            }
        }
        let vref = if levels == 0 {
            log::warn!("no write eye on any lane, restoring VrefDQ {}", VREF_TAP_MAX);
            VREF_TAP_MAX
        } else {
            (level_sum / levels) as u8
        };
        log::info!("VrefDQ tap {} ({:#x})", vref, mr6_vref(vref, false));

        self.set_vref_dq(vref, true);
        let eyes = self.lane_eyes(Direction::Write);
        self.set_vref_dq(vref, false);
        let eyes = eyes?;

        let cs = self.ctx.effective_cs.raw();
        for if_id in self.active().iter() {
            let mut passed = true;
            for lane in self.tm.lane_act_mask.iter() {
                if !calibrated[if_id.index()][lane.index()] {
                    passed = false;
                    continue;
                }
                let Some(eye) = eyes[if_id.index()][lane.index()] else {
                    log::warn!("if {} lane {}: no write window at VrefDQ {}", if_id, lane, vref);
                    passed = false;
                    continue;
                };
                self.write_dq_pbs(if_id, lane, Direction::Write, &eye.copt.pbs, 0)?;
                let centre = eye.copt.centre % ADLL_TAPS_PER_PERIOD;
                self.acc.bus_write(
                    Access::Unicast(if_id),
                    LaneAccess::Unicast(lane),
                    PhyBank::Data,
                    cs_reg(CTX_PHY_REG, cs),
                    centre as u16,
                )?;
                log::debug!("if {} lane {}: write centre {} PBS {:?}", if_id, lane, centre, eye.copt.pbs);
            }
            let result = if passed { TestResult::Success } else { TestResult::Failed };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }

    /// Program VrefDQ through MR6, optionally staying in VrefDQ training mode.
    fn set_vref_dq(&mut self, tap: u8, training: bool) {
        let masks = self.cs_masks();
        self.write_mrs_cmd(&masks, SdramCommand::Mrs6, mr6_vref(tap, training), MR6_VREF_MASK);
    }
}
