//! # Per-bit skew trim
//!
//! The pins of a lane do not see the strobe at the same time. A window search over the
//! centralization ADLL finds the pass window of every bit. The bit whose window opens first
//! needs no delay, every other bit is delayed by its distance to that earliest edge, converted
//! from ADLL taps to PBS taps.
use mv_ddr::phy::{
    CS_PBS_OFFSET, PBS_RX_BCAST_PHY_REG, PBS_TX_BCAST_PHY_REG, PhyBank, pbs_rx_reg, pbs_tx_reg,
};

use super::Pipeline;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::ids::{BUS_WIDTH_BITS, InterfaceId, LaneId};
use crate::odpg::{
    ADLL_TAPS_PER_PERIOD, ControlElement, CsType, Direction, SearchParams, WindowResults,
    byte_status, ip_training_wrapper, wraparound_correct,
};
use crate::pattern::PatternId;
use crate::results::TestResult;

/// Nominal delay of one PBS tap in ps.
pub const NOMINAL_PBS_DLY_PS: u32 = 9;
/// Largest value of a PBS register.
pub const MAX_PBS: u8 = 31;

/// Pass windows of the bits of a lane, corrected for the ADLL wraparound.
pub(crate) fn corrected_windows(windows: &[(u8, u8); BUS_WIDTH_BITS]) -> [(u8, u8); BUS_WIDTH_BITS] {
    let status = byte_status(windows);
    windows.map(|(start, end)| wraparound_correct(start, end, status))
}

/// PBS taps covering `skew` ADLL taps at an ADLL tap size of `tap_ps`.
#[inline]
pub fn skew_to_pbs(skew: u8, tap_ps: u32) -> u8 {
    let pbs = skew as u32 * tap_ps / NOMINAL_PBS_DLY_PS;
    pbs.min(MAX_PBS as u32) as u8
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    /// Trim the read skew of every DQ pin of the effective chip-select.
    pub(crate) fn pbs_rx(&mut self) -> Result<(), Error> {
        self.pbs(Direction::Read)
    }

    /// Trim the write skew of every DQ pin of the effective chip-select.
    pub(crate) fn pbs_tx(&mut self) -> Result<(), Error> {
        self.pbs(Direction::Write)
    }

    /// Size of one ADLL tap in ps at the current frequency.
    pub(crate) fn adll_tap_ps(&self) -> u32 {
        self.current_freq.tck_ps() / ADLL_TAPS_PER_PERIOD as u32
    }

    /// Window search over the centralization ADLL of the effective chip-select.
    pub(crate) fn search_windows(
        &mut self,
        direction: Direction,
        pattern: PatternId,
        end: u16,
    ) -> Result<WindowResults, Error> {
        let params = SearchParams::new(direction, ControlElement::Adll, pattern)
            .with_range(0, end)
            .with_cs(self.ctx.effective_cs, CsType::Single);
        let polling = self.polling();
        ip_training_wrapper(&mut self.acc, &self.tm, Access::Multicast, &params, polling)
    }

    fn pbs(&mut self, direction: Direction) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        let (bcast, pattern, end) = match direction {
            Direction::Read => (PBS_RX_BCAST_PHY_REG, PatternId::Pbs1, 31),
            Direction::Write => (PBS_TX_BCAST_PHY_REG, PatternId::Pbs2, ADLL_TAPS_PER_PERIOD as u16 - 1),
        };
        self.acc.bus_write(
            Access::Multicast,
            LaneAccess::Multicast,
            PhyBank::Data,
            bcast + cs * CS_PBS_OFFSET,
            0,
        )?;
        let results = self.search_windows(direction, pattern, end)?;
        let tap_ps = self.adll_tap_ps();
        for if_id in self.active().iter() {
            let mut passed = true;
            for lane in self.tm.lane_act_mask.iter() {
                let Some(windows) = results.lane_windows(if_id, lane) else {
                    log::warn!("if {} lane {}: {:?} PBS search did not lock", if_id, lane, direction);
                    passed = false;
                    continue;
                };
                self.write_lane_pbs(if_id, lane, direction, &corrected_windows(&windows), tap_ps)?;
            }
            let result = if passed { TestResult::Success } else { TestResult::Failed };
            self.ctx.record(if_id, result);
        }
        Ok(())
    }

    fn write_lane_pbs(
        &mut self,
        if_id: InterfaceId,
        lane: LaneId,
        direction: Direction,
        windows: &[(u8, u8); BUS_WIDTH_BITS],
        tap_ps: u32,
    ) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        let earliest = windows.iter().map(|(start, _)| *start).min().unwrap_or(0);
        for (pin, (start, _)) in windows.iter().enumerate() {
            let pbs = skew_to_pbs(start - earliest, tap_ps);
            let reg = match direction {
                Direction::Read => pbs_rx_reg(cs, pin as u8),
                Direction::Write => pbs_tx_reg(cs, pin as u8),
            };
            self.acc.bus_write(
                Access::Unicast(if_id),
                LaneAccess::Unicast(lane),
                PhyBank::Data,
                reg,
                pbs as u16,
            )?;
        }
        log::debug!("if {} lane {}: {:?} PBS earliest edge {}", if_id, lane, direction, earliest);
        Ok(())
    }
}
