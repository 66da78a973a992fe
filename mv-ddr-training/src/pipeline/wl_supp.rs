//! # Write leveling supplement
//!
//! Write leveling aligns DQS with the clock, but it cannot tell one clock edge from the next. The
//! supplement writes the test pattern through the normal data path, reads it back and checks by
//! how many words the data of every lane moved. A lane off by one clock has its write leveling
//! phase moved forward, a lane early by one clock moved back.
use mv_ddr::phy::{CTX_PHY_REG, PhyBank, WL_PHY_REG, cs_reg};

use super::Pipeline;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::ids::{InterfaceId, LaneId};
use crate::pattern::PatternId;
use crate::results::TestResult;

/// Words compared per lane.
const XSB_WORDS: usize = 8;
/// Word offset of data written one clock too late.
const ONE_CLOCK_ERROR_SHIFT: i32 = 2;
/// Word offset of data written one clock too early.
const ALIGN_ERROR_SHIFT: i32 = -2;
/// Write centralization offsets tried when the lane does not compare at its trained value.
const CTX_RETRY_OFFSETS: [i16; 2] = [5, -5];
/// Address distance between the chip-selects.
pub const CS_ADDR_STRIDE: u32 = 0x1000_0000;

const WL_PHASE_SHIFT: u16 = 6;
const WL_PHASE_MASK: u16 = 0x7 << WL_PHASE_SHIFT;
const WL_ADLL_MASK: u16 = 0x1f;

/// Outcome of the read back compare of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alignment {
    Aligned,
    /// Data arrived one clock late.
    OneClockLate,
    /// Data arrived one clock early.
    OneClockEarly,
    Unknown,
}

/// Count the words of the lane which match the pattern displaced by `offset` words.
///
/// The compare passes if every word which has a counterpart matched.
fn xsb_compare(read: &[u32; XSB_WORDS], expected: &[u32; XSB_WORDS], lane: LaneId, offset: i32) -> bool {
    let mask = 0xffu32 << (8 * lane.raw());
    let matches = (0..XSB_WORDS as i32)
        .filter(|word| {
            let shifted = word + offset;
            (0..XSB_WORDS as i32).contains(&shifted)
                && read[*word as usize] & mask == expected[shifted as usize] & mask
        })
        .count();
    matches == XSB_WORDS - offset.unsigned_abs() as usize
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    pub(crate) fn write_leveling_supp(&mut self) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        for if_id in self.active().iter() {
            let mut failed = false;
            for lane in self.tm.lane_act_mask.iter() {
                if lane == LaneId::ECC {
                    continue;
                }
                if !self.wl_supp_lane(if_id, lane, cs)? {
                    log::error!("WL supplement: if {} lane {} failed", if_id, lane);
                    failed = true;
                }
            }
            let result = if failed { TestResult::Failed } else { TestResult::Success };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }

    /// Align one lane, retrying with a moved write centralization delay.
    fn wl_supp_lane(&mut self, if_id: InterfaceId, lane: LaneId, cs: u8) -> Result<bool, Error> {
        let ctx_reg = cs_reg(CTX_PHY_REG, cs);
        let ctx = self.acc.bus_read(if_id, lane, PhyBank::Data, ctx_reg)? as i16;
        if self.wl_supp_phase_shift(if_id, lane, cs)? {
            return Ok(true);
        }
        for offset in CTX_RETRY_OFFSETS {
            let moved = (ctx + offset).max(0) as u16;
            log::trace!("WL supplement: if {} lane {} ctx {} -> {}", if_id, lane, ctx, moved);
            self.acc.bus_write(
                Access::Unicast(if_id),
                LaneAccess::Unicast(lane),
                PhyBank::Data,
                ctx_reg,
                moved,
            )?;
            if self.wl_supp_phase_shift(if_id, lane, cs)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Compare the lane at its current delays and fix a whole clock error.
    fn wl_supp_phase_shift(&mut self, if_id: InterfaceId, lane: LaneId, cs: u8) -> Result<bool, Error> {
        match self.xsb_alignment(if_id, lane, cs)? {
            Alignment::Aligned => Ok(true),
            Alignment::OneClockLate => self.one_clock_error_shift(if_id, lane, cs),
            Alignment::OneClockEarly => self.align_error_shift(if_id, lane, cs),
            Alignment::Unknown => Ok(false),
        }
    }

    fn xsb_alignment(&mut self, if_id: InterfaceId, lane: LaneId, cs: u8) -> Result<Alignment, Error> {
        let mut expected = [0; XSB_WORDS];
        for (i, word) in expected.iter_mut().enumerate() {
            *word = PatternId::Test.word(i);
        }
        let addr = PatternId::Test.info(self.tm.is_bus_16bit()).dram_addr() + CS_ADDR_STRIDE * cs as u32;
        self.acc.dram_write(if_id, addr, &expected)?;
        self.reset_fifo_ptr();
        let mut read = [0; XSB_WORDS];
        self.acc.dram_read(if_id, addr, &mut read)?;
        log::trace!("WL supplement: if {} lane {} read {:x?}", if_id, lane, read);

        let alignment = if xsb_compare(&read, &expected, lane, 0) {
            Alignment::Aligned
        } else if xsb_compare(&read, &expected, lane, ONE_CLOCK_ERROR_SHIFT) {
            Alignment::OneClockLate
        } else if xsb_compare(&read, &expected, lane, ALIGN_ERROR_SHIFT) {
            Alignment::OneClockEarly
        } else {
            Alignment::Unknown
        };
        Ok(alignment)
    }

    fn wl_value(&mut self, if_id: InterfaceId, lane: LaneId, cs: u8) -> Result<(u16, u16), Error> {
        let data = self.acc.bus_read(if_id, lane, PhyBank::Data, cs_reg(WL_PHY_REG, cs))?;
        Ok(((data & WL_PHASE_MASK) >> WL_PHASE_SHIFT, data & WL_ADLL_MASK))
    }

    fn wl_modify(
        &mut self,
        if_id: InterfaceId,
        lane: LaneId,
        reg: u8,
        value: u16,
        mask: u16,
    ) -> Result<(), Error> {
        self.acc
            .bus_read_modify_write(Access::Unicast(if_id), lane, PhyBank::Data, reg, value, mask)
    }

    /// Move the write leveling result one clock later.
    fn one_clock_error_shift(&mut self, if_id: InterfaceId, lane: LaneId, cs: u8) -> Result<bool, Error> {
        let (phase, adll) = self.wl_value(if_id, lane, cs)?;
        log::debug!("WL supplement: if {} lane {} one clock late, phase {} adll {}", if_id, lane, phase, adll);
        let wl = cs_reg(WL_PHY_REG, cs);
        match phase {
            0 | 1 => self.wl_modify(if_id, lane, wl, (phase + 2) << WL_PHASE_SHIFT, WL_PHASE_MASK)?,
            2 if adll < 6 => {
                self.wl_modify(if_id, lane, wl, (3 << WL_PHASE_SHIFT) | 0x1f, WL_PHASE_MASK | WL_ADLL_MASK)?;
                self.wl_modify(if_id, lane, cs_reg(CTX_PHY_REG, cs), 0x2f, 0x3f)?;
            }
            2 => {}
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Move the write leveling result one clock earlier.
    fn align_error_shift(&mut self, if_id: InterfaceId, lane: LaneId, cs: u8) -> Result<bool, Error> {
        let (phase, adll) = self.wl_value(if_id, lane, cs)?;
        log::debug!("WL supplement: if {} lane {} one clock early, phase {} adll {}", if_id, lane, phase, adll);
        let wl = cs_reg(WL_PHY_REG, cs);
        match phase {
            1 if adll > 0x1a => {
                self.wl_modify(if_id, lane, wl, 0, WL_PHASE_MASK | WL_ADLL_MASK)?;
                self.wl_modify(if_id, lane, cs_reg(CTX_PHY_REG, cs), 0xf, 0x1f)?;
                Ok(true)
            }
            2 | 3 => {
                let value = ((phase - 2) << WL_PHASE_SHIFT) | adll;
                self.wl_modify(if_id, lane, wl, value, WL_PHASE_MASK | WL_ADLL_MASK)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
