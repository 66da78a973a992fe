//! # Controller initialization
//!
//! Programs the Dunit for the target frequency: refresh interval, bus width, chip-select
//! geometry, mode registers, ODT and timing registers. Also contains the helpers the other
//! stages share to issue mode register commands, reset the read FIFO and copy per chip-select
//! results.
use arbitrary_int::{u4, u5, u6};
use mv_ddr::MASK_ALL_BITS;
use mv_ddr::dunit::regs::{
    DDR_TIMING_MASK, DdrTiming, ODT_TIMING_LOW_MASK, RankControl, SDRAM_OP_BUSY_MASK,
    SDRAM_OP_MASK, SDRAM_TIMING_LOW_MASK, SdramCommand, SdramOperation,
};
use mv_ddr::dunit::*;
use mv_ddr::odpg::{ODPG_DEFAULTS, ODPG_WRITE_READ_MODE_ENABLE};
use mv_ddr::phy::{
    CRX_PHY_REG, CTX_PHY_REG, PHY_CONTROL_PHY_REG, PhyBank, RL_PHY_REG, WL_PHY_REG, cs_reg,
    csn_iob_vref_reg,
};

use super::Pipeline;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::{ChipSelect, InterfaceId, LaneId, MAX_CS, MAX_INTERFACES};
use crate::speed_bin;
use crate::timing::{self, TimingParams};
use crate::topology::{BusWidth, Temperature, TimingMode, TopologyMap, calc_cs_num};

/// All chip-select enable bits of the SDRAM operation register. The bits are active low.
pub const CS_BIT_MASK: u8 = 0xf;

/// Initial value of the receiver calibration register of every chip-select.
const CSN_IOB_VREF_RESET: u16 = 63;

/// Chip-select mask of the SDRAM operation register which addresses `cs`.
///
/// When all lanes share the same chip-selects only `cs` is addressed. Mixed lane configurations
/// address every populated chip-select.
pub fn calc_cs_mask(tm: &TopologyMap, if_id: InterfaceId, cs: ChipSelect) -> u8 {
    let mut mask = CS_BIT_MASK;
    let mut all = 0u8;
    let mut same = CS_BIT_MASK;
    for lane in tm.lane_act_mask.iter() {
        let bitmask = tm.bus(if_id, lane).cs_bitmask;
        all |= bitmask;
        same &= bitmask;
        mask &= !bitmask;
    }
    if all == same {
        mask = (mask | !cs.mask()) & CS_BIT_MASK;
    }
    mask
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    /// Chip-select mirroring requested by any active lane of an interface.
    pub(crate) fn mirror_mask(&self, if_id: InterfaceId) -> u8 {
        self.tm
            .lane_act_mask
            .iter()
            .fold(0, |acc, lane| acc | self.tm.bus(if_id, lane).mirror_enable_bitmask)
    }

    fn union_cs_mask(&self, if_id: InterfaceId) -> u8 {
        self.tm
            .lane_act_mask
            .iter()
            .fold(0, |acc, lane| acc | self.tm.bus(if_id, lane).cs_bitmask)
    }

    fn two_t(&self, if_id: InterfaceId) -> bool {
        if let Some(two_t) = self.ctx.params.mode_2t {
            return two_t;
        }
        match self.tm.interface(if_id).timing {
            TimingMode::TwoT => true,
            TimingMode::OneT => false,
            TimingMode::Default => calc_cs_num(self.tm.cs_bitmask(if_id)) != 1,
        }
    }

    pub(crate) fn init_controller(&mut self) -> Result<(), Error> {
        for if_id in self.active().iter() {
            self.init_interface(if_id)?;
        }
        let update = self.ctx.params.calibration_update_control as u32;
        for if_id in self.active().iter() {
            self.rank_control(if_id);
            self.pad_inv(if_id)?;
            let access = Access::Unicast(if_id);
            self.acc.write_field(access, CALIB_MACHINE_CTRL_PAD_CAL, 0)?;
            self.acc.write_field(access, CALIB_MACHINE_CTRL_UPDATE, update)?;
        }
        self.enable_init_sequence()?;
        if let Some(ck_delay) = self.ctx.params.ck_delay {
            self.cmd_addr_init_delay(self.target_freq, ck_delay)?;
        }
        Ok(())
    }

    fn init_interface(&mut self, if_id: InterfaceId) -> Result<(), Error> {
        let params = *self.tm.interface(if_id);
        let freq = params.memory_freq;
        let access = Access::Unicast(if_id);
        log::debug!("if {}: init controller at {}", if_id, freq);

        if self.mirror_mask(if_id) != 0 {
            self.acc.write_field(access, DUAL_DUNIT_CFG_CS_SINGLE, 0)?;
        }

        let refresh = timing::refresh_interval_count(params.temperature, freq);
        let bus_32 = if self.tm.is_bus_16bit() { 0 } else { 1 << 15 };
        let cfg = (refresh | (1 << 14) | bus_32 | (1 << 24)) & !(1 << 26);
        self.acc.if_write(access, SDRAM_CFG, cfg, 0x100_ffff);
        self.acc.if_write(access, SDRAM_OPEN_PAGES_CTRL, 1 << 10, 1 << 10);
        self.acc.if_write(access, DRAM_PHY_CFG, 0x28, 0x3e);

        let update = self.ctx.params.calibration_update_control as u32;
        self.acc.if_write(access, CALIB_MACHINE_CTRL, 0x1200c, 0x7dff_e01c);
        self.acc.write_field(access, CALIB_MACHINE_CTRL_UPDATE, update)?;
        self.acc.write_field(access, CALIB_MACHINE_CTRL_PAD_CAL, 1)?;

        let spd = self.tm.spd_timings();
        let timings = TimingParams::derive(&params, freq, spd.as_ref());
        self.acc
            .if_write(access, SDRAM_ACCESS_CTRL, timings.t_faw << 24, 0x7f00_0000);
        let cs_mask = self.union_cs_mask(if_id);
        for cs in 0..MAX_CS as u8 {
            self.configure_cs(if_id, cs, cs_mask & (1 << cs) != 0)?;
        }

        let cl = params.cas_l;
        let cwl = params.cas_wl;
        log::debug!("if {}: CL {} CWL {}", if_id, cl, cwl);
        let cl_mr = speed_bin::cl_mask(cl).ok_or(Error::Unsupported("CAS latency"))?;
        let wr_mr = speed_bin::twr_mask(timings.t_wr_clocks)
            .ok_or(Error::Unsupported("write recovery"))?;
        let cwl_mr = speed_bin::cwl_mask(cwl).ok_or(Error::Unsupported("CAS write latency"))?;
        self.acc.if_write(access, MR0, cl_mr, MR0_CL);
        self.acc.if_write(access, MR0, wr_mr, MR0_WR);
        let drive = self.ctx.params.dic | self.ctx.params.rtt_nom;
        self.acc.if_write(access, MR1, drive, MR1_DIC_RTT_NOM);
        let srt = if params.temperature == Temperature::High { 1 << 7 } else { 0 };
        self.acc.if_write(access, MR2, cwl_mr | srt, MR2_CWL_SRT);

        self.write_odt(access, cl, cwl);
        self.set_timing(if_id, freq);

        self.acc.if_write(access, DUNIT_CTRL_HIGH, 0x177, 0x100_0177);
        self.acc.if_write(access, DUNIT_CTRL_HIGH, 0, 1 << 7);
        let t2t = self.two_t(if_id) as u32;
        self.acc.write_field(access, DUNIT_CTRL_LOW_2T, t2t)?;

        let ddr_timing = DdrTiming::DEFAULT
            .with_t_xpdll(u5::new((timing::txpdll(freq) & 0x1f) as u8))
            .with_t_xpdll_extra(u6::new(0x28))
            .with_t_zqcs(0xa);
        self.acc
            .if_write(access, DDR_TIMING, ddr_timing.raw_value(), DDR_TIMING_MASK);
        self.acc.if_write(access, ZQC_CFG, ZQC_CFG_AUTO, ZQC_CFG_MASK);
        let clock_ratio = self.acc.if_read(if_id, DRAM_PHY_CFG, 0x30);
        self.acc.write_field(access, DUNIT_CTRL_HIGH_CLOCK_SHIFT, (clock_ratio == 0) as u32)?;
        self.acc
            .if_write(access, SDRAM_ODT_CTRL_LOW, self.ctx.params.odt_config, MASK_ALL_BITS);
        Ok(())
    }

    /// Enable or disable one chip-select and program its device geometry.
    pub(crate) fn configure_cs(&mut self, if_id: InterfaceId, cs: u8, enable: bool) -> Result<(), Error> {
        let access = Access::Unicast(if_id);
        if enable {
            let params = self.tm.interface(if_id);
            let width = (params.bus_width != BusWidth::X8) as u32;
            let size = params.memory_size.access_ctrl_code();
            self.acc.write_field(access, access_ctrl_device_width(cs), width)?;
            self.acc.write_field(access, access_ctrl_size_low(cs), size & 0x3)?;
            self.acc.write_field(access, access_ctrl_size_high(cs), (size >> 2) & 1)?;
            self.acc.write_field(access, access_ctrl_addr_select(cs), 1)?;
        }
        self.acc.write_field(access, ctrl_low_cs_enable(cs), enable as u32)
    }

    /// Program the chip-select and mirror masks of lane 0 into the rank control register.
    pub(crate) fn rank_control(&mut self, if_id: InterfaceId) {
        let Some(first) = self.tm.lane_act_mask.first() else {
            return;
        };
        let reference = *self.tm.bus(if_id, first);
        for lane in self.tm.lane_act_mask.iter().skip(1) {
            let bus = self.tm.bus(if_id, lane);
            if bus.cs_bitmask != reference.cs_bitmask
                || bus.mirror_enable_bitmask != reference.mirror_enable_bitmask
            {
                log::warn!(
                    "if {} lane {}: chip-select and mirror masks differ from lane {}",
                    if_id,
                    lane,
                    first
                );
            }
        }
        let rank = RankControl::DEFAULT
            .with_cs_enable(u4::new(reference.cs_bitmask & 0xf))
            .with_mirror_enable(u4::new(reference.mirror_enable_bitmask & 0xf));
        self.acc
            .if_write(Access::Unicast(if_id), RANK_CTRL, rank.raw_value(), 0xff);
    }

    /// Invert the DQS and clock pads of swapped lanes.
    pub(crate) fn pad_inv(&mut self, if_id: InterfaceId) -> Result<(), Error> {
        let access = Access::Unicast(if_id);
        for lane in self.tm.lane_act_mask.iter() {
            let bus = *self.tm.bus(if_id, lane);
            if bus.is_dqs_swap {
                self.acc
                    .bus_read_modify_write(access, lane, PhyBank::Data, PHY_CONTROL_PHY_REG, 0xc0, 0xc0)?;
            }
            if bus.is_ck_swap {
                // The clock pads are controlled by control lane 0 only.
                let data = if lane.raw() <= 1 { 0x5 << 2 } else { 0xa << 2 };
                self.acc.bus_read_modify_write(
                    access,
                    LaneId::LANE0,
                    PhyBank::Control,
                    PHY_CONTROL_PHY_REG,
                    data,
                    data,
                )?;
            }
        }
        Ok(())
    }

    /// Start the JEDEC init sequence on every interface and wait for it to complete.
    pub(crate) fn enable_init_sequence(&mut self) -> Result<(), Error> {
        self.acc.write_field(Access::Multicast, SDRAM_INIT_CTRL_START, 1)?;
        let mut result = Ok(());
        for if_id in self.active().iter() {
            let access = Access::Unicast(if_id);
            if let Err(err) = self.acc.poll_default(access, 0, 1, SDRAM_INIT_CTRL) {
                log::error!("if {}: init sequence did not complete", if_id);
                if result.is_ok() {
                    result = Err(err);
                }
                continue;
            }
            if self.mirror_mask(if_id) != 0 {
                self.acc.write_field(access, DUAL_DUNIT_CFG_CS_SINGLE, 1)?;
            }
        }
        result
    }

    /// Delay the command/address pads against the clock.
    ///
    /// `ck_delay` is given in ps and converted into ADLL taps of the clock period at `freq`.
    /// Command/address lines get half the clock delay.
    pub(crate) fn cmd_addr_init_delay(&mut self, freq: DdrFreq, ck_delay: u32) -> Result<(), Error> {
        let tap_ps = (freq.tck_ps() / 64).max(1);
        let ck_taps = ck_delay / tap_ps;
        let ca_taps = ck_taps / 2;
        let data = ((ck_taps & 0x3f) | ((ca_taps & 0x3f) << 10)) as u16;
        log::debug!("ck delay {} taps, ca delay {} taps", ck_taps, ca_taps);
        for lane in self.tm.lane_act_mask.iter() {
            self.acc.bus_write(
                Access::Multicast,
                LaneAccess::Unicast(lane),
                PhyBank::Control,
                0,
                data,
            )?;
        }
        Ok(())
    }

    /// ODT timing for a CAS latency pair and ODT enable.
    pub(crate) fn write_odt(&mut self, access: Access, cl: u8, cwl: u8) {
        let low = timing::odt_timing_low(cl, cwl).raw_value();
        self.acc.if_write(access, ODT_TIMING_LOW, low, ODT_TIMING_LOW_MASK);
        let high = timing::odt_timing_high(cwl).raw_value();
        self.acc.if_write(access, ODT_TIMING_HIGH, high, 0xffff);
        if self.ctx.params.odt_additional {
            self.acc.if_write(access, SDRAM_ODT_CTRL_HIGH, 0xf, 0xf);
        }
        self.acc.if_write(access, DUNIT_ODT_CTRL, 0xf, 0xf);
    }

    /// SDRAM timing registers for a frequency.
    pub(crate) fn set_timing(&mut self, if_id: InterfaceId, freq: DdrFreq) {
        let params = *self.tm.interface(if_id);
        let spd = self.tm.spd_timings();
        let timings = TimingParams::derive(&params, freq, spd.as_ref());
        let access = Access::Unicast(if_id);
        self.acc.if_write(
            access,
            SDRAM_TIMING_LOW,
            timings.timing_low().raw_value(),
            SDRAM_TIMING_LOW_MASK,
        );
        for (value, mask) in timings.timing_high_writes() {
            self.acc.if_write(access, SDRAM_TIMING_HIGH, value, mask);
        }
    }

    /// Issue a mode register write to the chip-selects of `cs_masks`.
    pub(crate) fn write_mrs_cmd(
        &mut self,
        cs_masks: &[u8; MAX_INTERFACES],
        cmd: SdramCommand,
        data: u32,
        mask: u32,
    ) {
        let reg = match cmd {
            SdramCommand::Mrs0 => MR0,
            SdramCommand::Mrs1 => MR1,
            SdramCommand::Mrs3 => MR3,
            SdramCommand::Mrs6 => DDR4_MR6,
            _ => MR2,
        };
        self.acc.if_write(Access::Multicast, reg, data, mask);
        for if_id in self.active().iter() {
            let op = SdramOperation::DEFAULT
                .with_cs_mask_n(u4::new(cs_masks[if_id.index()] & 0xf))
                .with_cmd(cmd);
            self.acc
                .if_write(Access::Unicast(if_id), SDRAM_OP, op.raw_value(), SDRAM_OP_MASK);
        }
        for if_id in self.active().iter() {
            if self
                .acc
                .poll_default(Access::Unicast(if_id), 0, SDRAM_OP_BUSY_MASK, SDRAM_OP)
                .is_err()
            {
                log::error!("if {}: mode register command did not complete", if_id);
            }
        }
    }

    /// Operation register masks addressing the effective chip-select on every interface.
    pub(crate) fn cs_masks(&self) -> [u8; MAX_INTERFACES] {
        let mut masks = [CS_BIT_MASK; MAX_INTERFACES];
        for if_id in self.active().iter() {
            masks[if_id.index()] = calc_cs_mask(&self.tm, if_id, self.ctx.effective_cs);
        }
        masks
    }

    /// Copy the result of the effective chip-select to the chip-select a lane actually uses.
    pub(crate) fn write_cs_result(&mut self, reg: u8) -> Result<(), Error> {
        let cs = self.ctx.effective_cs;
        for if_id in self.active().iter() {
            for lane in self.tm.lane_act_mask.iter() {
                let bitmask = self.tm.bus(if_id, lane).cs_bitmask;
                if bitmask & cs.mask() != 0 {
                    continue;
                }
                let target = calc_cs_num(bitmask).saturating_sub(1);
                let data = self.acc.bus_read(if_id, lane, PhyBank::Data, cs_reg(reg, cs.raw()))?;
                self.acc.bus_write(
                    Access::Unicast(if_id),
                    LaneAccess::Unicast(lane),
                    PhyBank::Data,
                    cs_reg(reg, target),
                    data,
                )?;
            }
        }
        Ok(())
    }

    /// Reset the read FIFO of the PHY.
    pub(crate) fn reset_fifo_ptr(&mut self) {
        let all = Access::Multicast;
        self.acc.if_write(all, TRAINING_DBG_3, 0, 0xff00_0000);
        // The PHY overrides the FIFO only in read leveling mode.
        self.acc.if_write(all, TRAINING_SW_2, 0x1, 0x9);
        self.acc.if_write(all, TRAINING, 1 << 31, 1 << 31);
        self.acc.if_write(all, SDRAM_CFG, 0, 1 << 30);
        self.acc.if_write(all, SDRAM_CFG, 1 << 30, 1 << 30);
        self.acc.if_write(all, TRAINING_SW_2, 0x8, 0x9);
        self.acc.if_write(all, TRAINING_SW_1, 1 << 16, 1 << 16);
    }

    /// Reset the leveling and centralization registers of the effective chip-select.
    pub(crate) fn reset_phy_regs(&mut self) -> Result<(), Error> {
        let cs = self.ctx.effective_cs.raw();
        let reg3 = self.ctx.params.phy_reg3_val as u16;
        for if_id in self.active().iter() {
            for lane in self.tm.lane_act_mask.iter() {
                for (reg, value) in [
                    (WL_PHY_REG, 0),
                    (RL_PHY_REG, 0),
                    (CRX_PHY_REG, reg3),
                    (CTX_PHY_REG, reg3),
                ] {
                    self.acc.bus_write(
                        Access::Unicast(if_id),
                        LaneAccess::Unicast(lane),
                        PhyBank::Data,
                        cs_reg(reg, cs),
                        value,
                    )?;
                }
            }
        }
        for cs in 0..MAX_CS as u8 {
            self.acc.bus_write(
                Access::Multicast,
                LaneAccess::Multicast,
                PhyBank::Data,
                csn_iob_vref_reg(cs),
                CSN_IOB_VREF_RESET,
            )?;
        }
        Ok(())
    }

    /// Return the calibration machine and the ODPG to their functional values.
    pub(crate) fn restore_dunit_regs(&mut self) -> Result<(), Error> {
        let all = Access::Multicast;
        let update = self.ctx.params.calibration_update_control as u32;
        self.acc.write_field(all, CALIB_MACHINE_CTRL_PAD_CAL, 1)?;
        self.acc.write_field(all, CALIB_MACHINE_CTRL_UPDATE, update)?;
        self.acc.if_write(all, ODPG_WRITE_READ_MODE_ENABLE, 0xffff, MASK_ALL_BITS);
        for (offset, value, mask) in ODPG_DEFAULTS {
            self.acc.if_write(all, *offset, *value, *mask);
        }
        log::debug!("dunit registers restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TuneParams;
    use crate::ids::{InterfaceMask, LaneMask};
    use crate::pipeline::tests::{ddr3_topology, pipeline, pipeline_with};
    use crate::topology::BusParams;

    const IF0: InterfaceId = InterfaceId::IF0;

    #[test]
    fn test_init_controller_refresh_and_mode_registers() {
        let mut p = pipeline(TuneParams::new());
        let cwl = p.topology().interface(IF0).cas_wl;
        p.init_controller().unwrap();
        let sim = p.access().backend();
        let cfg = sim.reg(IF0, SDRAM_CFG);
        assert_eq!(cfg & 0x3fff, 3120);
        assert_ne!(cfg & (1 << 15), 0);
        assert_eq!(cfg & (1 << 26), 0);
        assert_eq!(sim.reg(IF0, MR0) & MR0_CL, speed_bin::cl_mask(11).unwrap());
        assert_eq!(sim.reg(IF0, MR2) & 0x38, speed_bin::cwl_mask(cwl).unwrap());
        assert_eq!(sim.reg(IF0, MR1) & MR1_DIC_RTT_NOM, 0x46);
        assert_eq!(sim.reg(IF0, SDRAM_INIT_CTRL) & 1, 0);
        assert_eq!(sim.reg(IF0, SDRAM_ODT_CTRL_LOW), 0x0012_0012);
        assert_eq!(sim.reg(IF0, RANK_CTRL) & 0xff, 0x1);
        assert_eq!(sim.reg(IF0, CALIB_MACHINE_CTRL) & 1, 0);
        // Single chip-select runs in 1T.
        assert_eq!(sim.reg(IF0, DUNIT_CTRL_LOW) & (0x3 << 3), 0);
        assert_ne!(sim.reg(IF0, DUNIT_CTRL_LOW) & (1 << 11), 0);
        assert_eq!(sim.reg(IF0, DUNIT_CTRL_LOW) & (1 << 12), 0);
    }

    #[test]
    fn test_init_controller_high_temperature() {
        let mut p = pipeline(TuneParams::new().with_temperature(Temperature::High));
        p.init_controller().unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, SDRAM_CFG) & 0x3fff, 1560);
        assert_ne!(sim.reg(IF0, MR2) & (1 << 7), 0);
    }

    #[test]
    fn test_dual_rank_mirroring() {
        let mut tm = ddr3_topology();
        for bus in tm.interfaces[0].bus.iter_mut() {
            *bus = BusParams {
                cs_bitmask: 0x3,
                mirror_enable_bitmask: 0x2,
                ..BusParams::SINGLE_CS
            };
        }
        let mut p = pipeline_with(tm, TuneParams::new(), |_| {});
        p.init_controller().unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, RANK_CTRL) & 0xff, 0x23);
        assert_eq!(sim.reg(IF0, DUNIT_CTRL_LOW) & (0x3 << 3), 1 << 3);
        assert_ne!(sim.reg(IF0, DUNIT_CTRL_LOW) & (1 << 12), 0);
        assert_ne!(sim.reg(IF0, DUAL_DUNIT_CFG) & (1 << 3), 0);
        assert!(sim.count_writes(DUAL_DUNIT_CFG, 0) >= 1);
    }

    #[test]
    fn test_calc_cs_mask() {
        let mut tm = ddr3_topology();
        let cs1 = ChipSelect::new(1).unwrap();
        assert_eq!(calc_cs_mask(&tm, IF0, ChipSelect::CS0), 0xe);
        for bus in tm.interfaces[0].bus.iter_mut() {
            bus.cs_bitmask = 0x3;
        }
        assert_eq!(calc_cs_mask(&tm, IF0, cs1), 0xd);
        tm.interfaces[0].bus[1].cs_bitmask = 0x1;
        assert_eq!(calc_cs_mask(&tm, IF0, cs1), 0xc);
    }

    #[test]
    fn test_write_mrs_cmd() {
        let mut p = pipeline(TuneParams::new());
        let masks = [0xe, 0xf, 0xf, 0xf];
        p.write_mrs_cmd(&masks, SdramCommand::Mrs2, 0x18, 0x38);
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, MR2) & 0x38, 0x18);
        assert_eq!(sim.count_writes(SDRAM_OP, 0xe08), 1);
        assert_eq!(sim.reg(IF0, SDRAM_OP) & SDRAM_OP_BUSY_MASK, 0);
    }

    #[test]
    fn test_reset_phy_regs() {
        let mut p = pipeline(TuneParams::new().with_phy_reg3_val(0xc));
        p.access().backend().set_phy(IF0, PhyBank::Data, LaneId::ECC, WL_PHY_REG, 0x55);
        p.reset_phy_regs().unwrap();
        let sim = p.access().backend();
        let lane2 = LaneId::new(2).unwrap();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane2, CRX_PHY_REG), 0xc);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane2, CTX_PHY_REG), 0xc);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane2, csn_iob_vref_reg(3)), 63);
        // Inactive lanes are never touched.
        assert_eq!(sim.phy(IF0, PhyBank::Data, LaneId::ECC, WL_PHY_REG), 0x55);
    }

    #[test]
    fn test_write_cs_result_copies_to_lane_chip_select() {
        let mut tm = ddr3_topology();
        for bus in tm.interfaces[0].bus.iter_mut() {
            bus.cs_bitmask = 0x7;
        }
        tm.interfaces[0].bus[3].cs_bitmask = 0x3;
        let mut p = pipeline_with(tm, TuneParams::new(), |_| {});
        let lane0 = LaneId::LANE0;
        let lane3 = LaneId::new(3).unwrap();
        p.access().backend().set_phy(IF0, PhyBank::Data, lane0, cs_reg(RL_PHY_REG, 2), 0x99);
        p.access().backend().set_phy(IF0, PhyBank::Data, lane3, cs_reg(RL_PHY_REG, 2), 0x1234);
        p.ctx.effective_cs = ChipSelect::new(2).unwrap();
        p.write_cs_result(RL_PHY_REG).unwrap();
        let sim = p.access().backend();
        // Lane 3 has no chip-select 2, its result lands on its last chip-select.
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane3, cs_reg(RL_PHY_REG, 1)), 0x1234);
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane0, cs_reg(RL_PHY_REG, 1)), 0);
    }

    #[test]
    fn test_restore_dunit_regs() {
        let mut p = pipeline(TuneParams::new());
        p.restore_dunit_regs().unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, CALIB_MACHINE_CTRL) & 0x19, 0x9);
        assert_eq!(sim.reg(IF0, ODPG_WRITE_READ_MODE_ENABLE), 0xffff);
        assert_eq!(sim.reg(IF0, 0x1034), 0x38000);
    }

    #[test]
    fn test_cmd_addr_delay() {
        let mut p = pipeline(TuneParams::new());
        // 1250 ps clock, 19 ps per tap.
        p.cmd_addr_init_delay(DdrFreq::Mhz800, 190).unwrap();
        let sim = p.access().backend();
        let lane1 = LaneId::new(1).unwrap();
        assert_eq!(sim.phy(IF0, PhyBank::Control, lane1, 0), 10 | (5 << 10));
    }

    #[test]
    fn test_inactive_interface_mask() {
        let tm = TopologyMap::new(
            crate::topology::DdrType::Ddr3,
            InterfaceMask::new(0x3),
            LaneMask::new(0xf),
            *ddr3_topology().interface(IF0),
        );
        let mut p = pipeline_with(tm, TuneParams::new(), |_| {});
        p.init_controller().unwrap();
        let if2 = InterfaceId::new(2).unwrap();
        let if1 = InterfaceId::new(1).unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(if2, SDRAM_CFG), 0);
        assert_eq!(sim.reg(if1, SDRAM_CFG) & 0x3fff, 3120);
    }
}
