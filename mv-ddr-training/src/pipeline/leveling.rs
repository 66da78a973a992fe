//! # Write and read leveling
//!
//! Write leveling aligns the DQS strobe of every lane with the clock at the DRAM. The DRAM is put
//! into write leveling mode and the PHY sweeps the write leveling ADLL until the DRAM samples the
//! clock high.
//!
//! Read leveling finds the delay between the read command and the first valid read strobe of
//! every lane while the ODPG plays the read leveling pattern.
//!
//! Both stages use the ODPG driven leveling engine by default. The single shot leveling machine
//! of older controllers is used with [LevelingStrategy::LegacyMachine], and for read leveling
//! at the medium frequency when the mid frequency workaround is enabled.
use mv_ddr::MASK_ALL_BITS;
use mv_ddr::dunit::regs::{SDRAM_OP_BUSY_MASK, SDRAM_OP_MASK, SdramCommand, SdramOperation};
use mv_ddr::dunit::*;
use mv_ddr::odpg::*;
use mv_ddr::phy::{CRX_PHY_REG, PhyBank, RL_PHY_REG, WL_PHY_REG, cs_reg};

use super::Pipeline;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::context::LevelingStrategy;
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::{BUS_WIDTH_BITS, ChipSelect, InterfaceId, InterfaceMask, LaneId, MAX_INTERFACES, MAX_LANES};
use crate::odpg::{burst_control, configure_odpg, is_locked, load_pattern_to_odpg, Direction};
use crate::pattern::PatternId;
use crate::results::TestResult;

/// Largest spread in ADLL taps between the DQ pins of a lane accepted by per-bit read leveling.
pub const MAX_DQ_READ_LEVELING_DELAY: u8 = 15;

/// Centralization offsets tried in turn by per-bit read leveling, relative to the previous try.
const PER_BIT_RL_CRX_STEPS: [i16; 3] = [0, -0xa, 0x14];

/// Medium frequency at which the dynamic read leveling always works.
const RL_SAFE_MEDIUM_FREQ: DdrFreq = DdrFreq::Mhz533;

/// Refresh commands issued before write leveling.
const WL_REFRESH_COUNT: usize = 10;

/// Leveling delays of every lane of every interface, in ADLL taps.
type LaneDelays = [[u8; MAX_LANES]; MAX_INTERFACES];

/// Read leveling register value of a delay in ADLL taps.
///
/// The low 5 bits select the ADLL tap, the phase count goes to bits 6 to 8.
#[inline]
pub const fn rl_reg_value(delay: u8) -> u16 {
    (delay & 0x1f) as u16 | ((((delay & 0xe0) >> 5) as u16) << 6)
}

/// Write leveling register value of a delay in ADLL taps.
///
/// Like [rl_reg_value], with the write centralization phase in bits 10 to 15.
#[inline]
pub const fn wl_reg_value(delay: u8, phy_reg1: u8) -> u16 {
    rl_reg_value(delay) | ((((delay & 0x1f) + phy_reg1) as u16) << 10)
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    /// Write the fixed leveling delays of the tunables to every chip-select.
    pub(crate) fn static_leveling(&mut self) -> Result<(), Error> {
        let Some(values) = self.ctx.params.static_leveling else {
            log::warn!("static leveling requested without values");
            return Ok(());
        };
        let phy_reg1 = self.ctx.params.phy_reg1_val;
        for cs in ChipSelect::all().take(self.tm.max_cs() as usize) {
            for (reg, value) in [
                (WL_PHY_REG, wl_reg_value(values.wl, phy_reg1)),
                (RL_PHY_REG, rl_reg_value(values.rl)),
            ] {
                self.acc.bus_write(
                    Access::Multicast,
                    LaneAccess::Multicast,
                    PhyBank::Data,
                    cs_reg(reg, cs.raw()),
                    value,
                )?;
            }
        }
        log::debug!("static leveling wl {:#x} rl {:#x}", values.wl, values.rl);
        Ok(())
    }

    pub(crate) fn write_leveling(&mut self, freq: DdrFreq) -> Result<(), Error> {
        log::debug!("write leveling at {}", freq);
        match self.ctx.params.leveling {
            LevelingStrategy::LegacyMachine => self.legacy_write_leveling(),
            LevelingStrategy::PerBitEngine => self.dynamic_write_leveling(),
        }
    }

    pub(crate) fn read_leveling(&mut self, freq: DdrFreq) -> Result<(), Error> {
        let legacy = self.ctx.params.leveling == LevelingStrategy::LegacyMachine
            || (self.ctx.params.rl_mid_freq_wa
                && freq == self.medium_freq
                && freq != RL_SAFE_MEDIUM_FREQ);
        log::debug!("read leveling at {}, legacy machine {}", freq, legacy);
        if legacy {
            self.legacy_read_leveling()
        } else if self.ctx.params.per_bit_read_leveling {
            self.per_bit_read_leveling(freq)
        } else {
            self.dynamic_read_leveling(freq)
        }
    }

    /// Mark the interfaces in `failed` as failed for the running stage.
    fn record_failures(&mut self, failed: InterfaceMask) {
        for if_id in failed.iter() {
            self.ctx.record(if_id, TestResult::Failed);
        }
    }

    /// Mask every result register except the byte (or bit) registers of the active lanes.
    fn leveling_result_masks(&mut self, per_bit: bool) {
        let all = Access::Multicast;
        for lane in LaneId::all() {
            let active = self.tm.lane_act_mask.contains(lane);
            for bit in 0..BUS_WIDTH_BITS as u8 {
                let mask = if per_bit && active { 0 } else { RESULT_MASK_BIT };
                self.acc.if_write(all, result_bit_reg(lane.raw(), bit), mask, RESULT_MASK_BIT);
            }
            let mask = if !per_bit && active { 0 } else { RESULT_MASK_BIT };
            self.acc.if_write(all, result_byte_reg(lane.raw()), mask, RESULT_MASK_BIT);
        }
    }

    /// Start the prepared leveling search and wait for every interface.
    ///
    /// Returns the interfaces which never reported done.
    fn run_leveling_search(&mut self) -> Result<InterfaceMask, Error> {
        let polling = self.polling();
        self.acc.write_field(Access::Multicast, ODPG_TRIGGER_START, 1)?;
        self.acc.delay_ms(1);
        let mut timed_out = InterfaceMask::default();
        for if_id in self.active().iter() {
            let access = Access::Unicast(if_id);
            if let Err(err) = self.acc.poll(access, 1 << 1, 1 << 1, ODPG_TRAINING_STATUS, polling) {
                log::error!("leveling search: {}", err);
                timed_out = timed_out.with(if_id);
                continue;
            }
            self.acc.write_field(access, ODPG_BIST_DONE_BIT, 0)?;
        }
        Ok(timed_out)
    }

    /// Byte lane delay of every active lane. Lanes which did not lock fail their interface, as
    /// does every interface in `timed_out`.
    fn read_byte_results(&mut self, stage: &str, timed_out: InterfaceMask) -> (LaneDelays, InterfaceMask) {
        let mut delays = [[0; MAX_LANES]; MAX_INTERFACES];
        let mut failed = timed_out;
        for if_id in self.active().iter() {
            if timed_out.contains(if_id) {
                continue;
            }
            for lane in self.tm.lane_act_mask.iter() {
                let raw = self.acc.if_read(if_id, result_byte_reg(lane.raw()), MASK_ALL_BITS);
                if !is_locked(raw) {
                    log::error!("{}: if {} lane {} did not lock", stage, if_id, lane);
                    failed = failed.with(if_id);
                    continue;
                }
                delays[if_id.index()][lane.index()] = (raw & 0xff) as u8;
            }
        }
        (delays, failed)
    }

    /// Write one leveling register of every lane which leveled.
    fn write_lane_delays(
        &mut self,
        reg: u8,
        delays: &LaneDelays,
        failed: InterfaceMask,
        encode: impl Fn(u8) -> u16,
    ) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        for if_id in self.active().iter() {
            if failed.contains(if_id) {
                continue;
            }
            for lane in self.tm.lane_act_mask.iter() {
                let value = encode(delays[if_id.index()][lane.index()]);
                self.acc.bus_write(
                    Access::Unicast(if_id),
                    LaneAccess::Unicast(lane),
                    PhyBank::Data,
                    cs_reg(reg, cs),
                    value,
                )?;
            }
        }
        Ok(())
    }

    /// Write leveling of every chip-select.
    ///
    /// The sample and ready delays, the dual Dunit configuration, the ODT and the DRAM write
    /// leveling mode are restored on every exit, also when the sweep is aborted.
    fn dynamic_write_leveling(&mut self) -> Result<(), Error> {
        let saved = [READ_DATA_SAMPLE_DELAY, READ_DATA_READY_DELAY, DUAL_DUNIT_CFG]
            .map(|reg| (reg, self.acc.if_read_all(reg, MASK_ALL_BITS)));

        let outcome = self.write_leveling_sweep();
        self.ctx.effective_cs = ChipSelect::CS0;
        if outcome.is_err() {
            self.write_leveling_mode_exit();
        }

        for (reg, values) in saved {
            for if_id in self.active().iter() {
                self.acc
                    .if_write(Access::Unicast(if_id), reg, values[if_id.index()], MASK_ALL_BITS);
            }
        }
        self.acc.if_write(Access::Multicast, SDRAM_ODT_CTRL_HIGH, 0, 0xf);
        let failed = outcome?;
        self.record_failures(failed);
        Ok(())
    }

    /// Take the DRAM out of write leveling mode with its outputs enabled.
    fn write_leveling_mode_exit(&mut self) {
        let all = Access::Multicast;
        self.acc.if_write(all, WR_LEVELING_DQS_PATTERN, 0x0, 0x1);
        self.write_mrs_cmd(&[0; MAX_INTERFACES], SdramCommand::Mrs1, MR1_QOFF, MR1_QOFF | MR1_WL_ENABLE);
        self.write_mrs_cmd(&[0; MAX_INTERFACES], SdramCommand::Mrs1, 0, MR1_QOFF | MR1_WL_ENABLE);
        self.acc.if_write(all, TRAINING_SW_2, 0x5, 0x7);
        self.acc.if_write(all, TRAINING_SW_2, 0x4, 0x7);
    }

    /// Level every chip-select and return the interfaces which failed.
    fn write_leveling_sweep(&mut self) -> Result<InterfaceMask, Error> {
        let all = Access::Multicast;
        let refresh = SdramOperation::DEFAULT.with_cmd(SdramCommand::Refresh).raw_value();
        for _ in 0..WL_REFRESH_COUNT {
            self.acc.if_write(all, SDRAM_OP, refresh, SDRAM_OP_MASK);
        }
        self.acc.poll_default(all, 0, SDRAM_OP_BUSY_MASK, SDRAM_OP)?;

        let phy_reg1 = self.ctx.params.phy_reg1_val;
        let mut failed = InterfaceMask::default();
        for cs in ChipSelect::all().take(self.tm.max_cs() as usize) {
            self.ctx.effective_cs = cs;
            // Output buffers of all ranks off, then write leveling mode on the trained rank.
            self.write_mrs_cmd(&[0; MAX_INTERFACES], SdramCommand::Mrs1, MR1_QOFF, MR1_QOFF | MR1_WL_ENABLE);
            let cs_masks = self.cs_masks();
            self.write_mrs_cmd(&cs_masks, SdramCommand::Mrs1, MR1_WL_ENABLE, MR1_QOFF | MR1_WL_ENABLE);
            self.acc.if_write(all, SDRAM_ODT_CTRL_HIGH, 0x3 << (cs.raw() * 2), 0xf);

            self.acc.if_write(all, TRAINING_SW_2, 0x1, 0x5);
            self.acc.if_write(all, TRAINING_WL, 0x50, 0xff);
            self.acc.if_write(all, TRAINING_WL, 0x5c, 0xff);
            self.acc.if_write(all, ODPG_TRAINING_CTRL, 0x38_1b82, 0x3c_3faf);
            self.acc.if_write(all, ODPG_OBJ1_OPCODE, 0x3 << 25, 0x3_ffff << 9);
            self.acc.if_write(all, ODPG_OBJ1_ITER_CNT, 0x80, 0xffff);
            self.acc.if_write(all, WL_DONE_CNTR, 0x14, 0xff);
            self.acc.if_write(all, TRAINING_WL, 0xff5c, 0xffff);
            self.leveling_result_masks(false);
            self.acc.if_write(all, WR_LEVELING_DQS_PATTERN, 0x1, 0x1);

            let timed_out = self.run_leveling_search()?;
            let (delays, cs_failed) = self.read_byte_results("write leveling", timed_out);
            failed = failed.union(cs_failed);
            self.write_leveling_mode_exit();

            self.write_lane_delays(WL_PHY_REG, &delays, cs_failed, |d| wl_reg_value(d, phy_reg1))?;
        }
        Ok(failed)
    }

    /// Load a read leveling pattern into the ODPG and set up the read leveling engine.
    fn read_leveling_setup(&mut self, freq: DdrFreq, pattern: PatternId, per_bit: bool) -> Result<(), Error> {
        let all = Access::Multicast;
        let cs = self.ctx.effective_cs;
        let bus_16bit = self.tm.is_bus_16bit();
        self.acc.write_field(all, DUAL_DUNIT_CFG_CS_SINGLE, 1)?;
        self.reset_fifo_ptr();
        self.acc.if_write(all, ODPG_DATA_CTRL, 0x3, 0x3);
        configure_odpg(&mut self.acc, all, burst_control(pattern.info(bus_16bit), Direction::Read, cs));
        load_pattern_to_odpg(&mut self.acc, all, pattern, bus_16bit);
        self.acc.if_write(all, ODPG_WRITE_READ_MODE_ENABLE, 0, MASK_ALL_BITS);

        self.acc
            .if_write(all, ODPG_TRAINING_CTRL, 0x30_1b01 | ((cs.raw() as u32) << 2), 0x3c_3fef);
        for if_id in self.active().iter() {
            let (cl, _) = self.latencies(if_id, freq)?;
            self.acc.if_write(
                Access::Unicast(if_id),
                ODPG_OBJ1_OPCODE,
                ((cl as u32) << 17) | (0x3 << 25),
                (0xff << 9) | (0x1f << 17) | (0x3 << 25),
            );
        }
        self.acc.if_write(all, TRAINING_SW_1, 0xd00, 0xd00);
        self.leveling_result_masks(per_bit);

        self.acc.if_write(all, TRAINING_DBG_1, 0, 1 << 31);
        self.acc.if_write(all, TRAINING_DBG_3, 0x7f << 24, 0xff << 24);
        self.acc.if_write(all, SDRAM_CFG, 0, 1 << 30);
        self.acc.if_write(all, SDRAM_CFG, 1 << 30, 1 << 30);
        self.acc.if_write(all, TRAINING_SW_2, 0x1, 0x9);
        self.acc.if_write(all, TRAINING, (1 << 24) | (1 << 20), MASK_ALL_BITS);
        self.acc.if_write(all, TRAINING, 1 << 31, 1 << 31);
        self.acc.if_write(all, ODPG_TRAINING_STATUS, 0x1, 0x1);
        Ok(())
    }

    /// Leave read leveling mode and give the trained chip-select its rank back.
    fn read_leveling_exit(&mut self) -> Result<(), Error> {
        let all = Access::Multicast;
        self.acc.if_write(all, ODPG_DATA_CTRL, 0, MASK_ALL_BITS);
        self.acc.if_write(all, TRAINING_SW_2, 0x8, 0x9);
        self.acc.if_write(all, TRAINING_SW_1, 1 << 16, 1 << 16);
        self.acc.write_field(all, DUAL_DUNIT_CFG_CS_SINGLE, 0)
    }

    fn dynamic_read_leveling(&mut self, freq: DdrFreq) -> Result<(), Error> {
        let mut failed = InterfaceMask::default();
        for cs in ChipSelect::all().take(self.tm.max_cs() as usize) {
            self.ctx.effective_cs = cs;
            self.read_leveling_setup(freq, PatternId::Rl, false)?;
            let timed_out = self.run_leveling_search()?;
            let (delays, cs_failed) = self.read_byte_results("read leveling", timed_out);
            self.read_leveling_exit()?;
            failed = failed.union(cs_failed);
            self.write_lane_delays(RL_PHY_REG, &delays, cs_failed, rl_reg_value)?;
        }
        self.ctx.effective_cs = ChipSelect::CS0;
        self.record_failures(failed);
        Ok(())
    }

    /// Read leveling with one lock per DQ pin.
    ///
    /// A lane passes once the spread of its pins is at most [MAX_DQ_READ_LEVELING_DELAY] taps.
    /// Lanes which do not pass are searched again with a different centralization delay. The
    /// lane takes the delay of its latest pin.
    pub(crate) fn per_bit_read_leveling(&mut self, freq: DdrFreq) -> Result<(), Error> {
        let mut failed = InterfaceMask::default();
        let base = self.ctx.params.phy_reg3_val as i16;
        for cs in ChipSelect::all().take(self.tm.max_cs() as usize) {
            self.ctx.effective_cs = cs;
            let mut done = [[false; MAX_LANES]; MAX_INTERFACES];
            let mut crx = base;
            for step in PER_BIT_RL_CRX_STEPS {
                crx += step;
                self.acc.bus_write(
                    Access::Multicast,
                    LaneAccess::Multicast,
                    PhyBank::Data,
                    cs_reg(CRX_PHY_REG, cs.raw()),
                    crx.clamp(0, 0x1f) as u16,
                )?;
                self.read_leveling_setup(freq, PatternId::Test, true)?;
                let timed_out = self.run_leveling_search()?;
                for if_id in self.active().iter() {
                    if timed_out.contains(if_id) {
                        continue;
                    }
                    for lane in self.tm.lane_act_mask.iter() {
                        if done[if_id.index()][lane.index()] {
                            continue;
                        }
                        let Some((min, max)) = self.bit_delay_spread(if_id, lane) else {
                            continue;
                        };
                        if max > min + MAX_DQ_READ_LEVELING_DELAY {
                            log::debug!("if {} lane {}: pin spread {}..{} too wide", if_id, lane, min, max);
                            continue;
                        }
                        done[if_id.index()][lane.index()] = true;
                        self.acc.bus_write(
                            Access::Unicast(if_id),
                            LaneAccess::Unicast(lane),
                            PhyBank::Data,
                            cs_reg(RL_PHY_REG, cs.raw()),
                            rl_reg_value(max),
                        )?;
                    }
                }
                self.read_leveling_exit()?;
                let all_done = self.active().iter().all(|if_id| {
                    self.tm.lane_act_mask.iter().all(|lane| done[if_id.index()][lane.index()])
                });
                if all_done {
                    break;
                }
            }
            for if_id in self.active().iter() {
                for lane in self.tm.lane_act_mask.iter() {
                    if !done[if_id.index()][lane.index()] {
                        log::error!("per-bit read leveling: if {} lane {} failed", if_id, lane);
                        failed = failed.with(if_id);
                    }
                }
            }
            self.write_cs_result(RL_PHY_REG)?;
        }
        self.ctx.effective_cs = ChipSelect::CS0;
        self.record_failures(failed);
        Ok(())
    }

    /// Smallest and largest delay of the pins of a lane, [None] unless all of them locked.
    fn bit_delay_spread(&mut self, if_id: InterfaceId, lane: LaneId) -> Option<(u8, u8)> {
        let mut spread: Option<(u8, u8)> = None;
        for bit in 0..BUS_WIDTH_BITS as u8 {
            let raw = self.acc.if_read(if_id, result_bit_reg(lane.raw(), bit), MASK_ALL_BITS);
            if !is_locked(raw) {
                return None;
            }
            let delay = (raw & 0xff) as u8;
            spread = Some(match spread {
                None => (delay, delay),
                Some((min, max)) => (min.min(delay), max.max(delay)),
            });
        }
        spread
    }

    fn legacy_write_leveling(&mut self) -> Result<(), Error> {
        self.legacy_leveling(0x8000_0008, 20)
    }

    fn legacy_read_leveling(&mut self) -> Result<(), Error> {
        self.legacy_leveling(0x8000_0040, 100)
    }

    /// Run the single shot leveling machine on every populated chip-select.
    fn legacy_leveling(&mut self, command: u32, delay_ms: u32) -> Result<(), Error> {
        let all = Access::Multicast;
        let mut cs_bits = 0;
        for if_id in self.active().iter() {
            cs_bits |= (self.tm.cs_bitmask(if_id) as u32 & 0xf) << 20;
        }
        self.acc.if_write(all, TRAINING, command | cs_bits, MASK_ALL_BITS);
        self.acc.delay_ms(delay_ms);
        if let Err(err) = self.acc.poll_default(all, 0, 1 << 31, TRAINING) {
            log::error!("leveling machine did not finish");
            return Err(err);
        }
        Ok(())
    }
}
