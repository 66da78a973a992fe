//! # Frequency change
//!
//! The DRAM is put into self-refresh, the divider is reprogrammed through the
//! [FrequencyController], the PHY ADLLs are relocked and the DRAM comes back with the latencies
//! of the new clock. The low training frequency runs with the DRAM DLL switched off.
use mv_ddr::dunit::regs::{SDRAM_OP_BUSY_MASK, SDRAM_OP_MASK, SdramCommand};
use mv_ddr::dunit::*;
use mv_ddr::phy::{BW_PHY_MASK, BW_PHY_REG, PhyBank, RATE_PHY_MASK, RATE_PHY_REG};

use super::Pipeline;
use crate::access::{Access, LaneAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::InterfaceId;
use crate::speed_bin;
use crate::timing;

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    /// CAS latency and CAS write latency of an interface at `freq`.
    pub(crate) fn latencies(&self, if_id: InterfaceId, freq: DdrFreq) -> Result<(u8, u8), Error> {
        let params = self.tm.interface(if_id);
        if freq == params.memory_freq {
            return Ok((params.cas_l, params.cas_wl));
        }
        let cl = speed_bin::cas_latency(params.speed_bin, freq)
            .ok_or(Error::Unsupported("no CAS latency for frequency"))?;
        let cwl = speed_bin::cas_write_latency(params.speed_bin, freq)
            .ok_or(Error::Unsupported("no CAS write latency for frequency"))?;
        Ok((cl, cwl))
    }

    /// Program the PHY bandwidth and rate for `freq` and relock the ADLLs.
    fn relock_adll(&mut self, access: Access, freq: DdrFreq) -> Result<(), Error> {
        let config = self.freq_ctrl.freq_config(freq);
        self.acc.write_field(access, SDRAM_CFG_DRIVER_RESET, 0)?;
        self.acc.delay_ms(10);
        self.acc.write_field(access, SDRAM_CFG_DRIVER_RESET, 1)?;
        for lane in self.tm.lane_act_mask.iter() {
            for (reg, value, mask) in [
                (BW_PHY_REG, (config.bw as u16) << 8, BW_PHY_MASK),
                (RATE_PHY_REG, config.rate as u16, RATE_PHY_MASK),
            ] {
                let targets = self.acc.targets(access);
                for if_id in targets.iter() {
                    self.acc.bus_read_modify_write(
                        Access::Unicast(if_id),
                        lane,
                        PhyBank::Data,
                        reg,
                        value,
                        mask,
                    )?;
                }
            }
        }
        self.acc.write_field(access, DRAM_PHY_CFG_ADLL_RESET, 0)?;
        self.acc.delay_ms((100 / (freq.mhz() / 100).max(1)).max(1));
        self.acc.write_field(access, DRAM_PHY_CFG_ADLL_RESET, 0x3)?;
        if self
            .acc
            .poll_default(access, PHY_LOCK_ALL, PHY_LOCK_ALL, PHY_LOCK_STATUS)
            .is_err()
        {
            log::error!("ADLLs did not lock at {}", freq);
        }
        self.acc.write_field(access, SDRAM_CFG_PUP_RESET, 0)?;
        self.acc.delay_ms(10);
        self.acc.write_field(access, SDRAM_CFG_PUP_RESET, 0x3)
    }

    /// Lock the PHY ADLLs of every interface at `freq` without touching the DRAM.
    pub(crate) fn adll_calibration(&mut self, freq: DdrFreq) -> Result<(), Error> {
        log::debug!("ADLL calibration at {}", freq);
        self.relock_adll(Access::Multicast, freq)
    }

    /// Move every active interface to `freq`.
    pub(crate) fn freq_set(&mut self, freq: DdrFreq) -> Result<(), Error> {
        log::info!("switching to {}", freq);
        for if_id in self.active().iter() {
            self.freq_set_interface(if_id, freq)?;
        }
        self.current_freq = freq;
        Ok(())
    }

    fn freq_set_interface(&mut self, if_id: InterfaceId, freq: DdrFreq) -> Result<(), Error> {
        let access = Access::Unicast(if_id);
        let dll_off = freq == DdrFreq::Low;
        let (cl, cwl) = self.latencies(if_id, freq)?;
        let params = *self.tm.interface(if_id);
        let spd = self.tm.spd_timings();
        let t_wr = timing::TimingParams::derive(&params, freq, spd.as_ref()).t_wr_clocks;
        let cl_code = speed_bin::cl_code(cl).ok_or(Error::Unsupported("CAS latency"))?;
        let cwl_code = speed_bin::cwl_code(cwl).ok_or(Error::Unsupported("CAS write latency"))?;
        let wr_code = speed_bin::twr_code(t_wr).ok_or(Error::Unsupported("write recovery"))?;
        let cl_mr = speed_bin::cl_mask(cl).ok_or(Error::Unsupported("CAS latency"))?;
        let cwl_mr = speed_bin::cwl_mask(cwl).ok_or(Error::Unsupported("CAS write latency"))?;
        log::debug!("if {}: {} CL {} CWL {} dll off {}", if_id, freq, cl, cwl, dll_off);

        let mirrored = self.mirror_mask(if_id) != 0;
        if mirrored {
            self.acc.write_field(access, DUAL_DUNIT_CFG_CS_SINGLE, 0)?;
        }

        // Enter self-refresh.
        self.acc.write_field(access, DFS_DLL_OFF, dll_off as u32)?;
        self.acc.write_field(access, DUNIT_MMASK_ENABLE, 0)?;
        self.acc.write_field(access, DFS_BLOCK, 1)?;
        if dll_off {
            for reg in ODT_OVERRIDE_REGS {
                self.acc.if_write(access, reg, 0, ODT_OVERRIDE_RTT_MASK);
            }
        }
        self.acc.write_field(access, DFS_SELF_REFRESH_REQ, 1)?;
        if self.acc.poll_default(access, 1 << 3, 1 << 3, DFS).is_err() {
            log::error!("if {}: self-refresh entry not acknowledged", if_id);
        }

        self.freq_ctrl.set_divider(self.acc.backend(), if_id, freq)?;

        let refresh = timing::refresh_interval_count(params.temperature, freq);
        self.acc.if_write(access, SDRAM_CFG, (1 << 14) | refresh, 0x7fff);
        self.acc.write_field(access, DFS_CL, cl_code)?;
        self.acc.write_field(access, DFS_CWL, cwl_code)?;
        self.acc.write_field(access, DFS_WR, wr_code)?;
        if dll_off {
            let drive = self.ctx.params.dic | self.ctx.params.rtt_nom;
            for reg in ODT_OVERRIDE_REGS {
                self.acc.if_write(access, reg, drive, MR1_DIC_RTT_NOM);
            }
        }

        self.relock_adll(access, freq)?;
        self.set_timing(if_id, freq);
        if let Some(ck_delay) = self.ctx.params.ck_delay {
            self.cmd_addr_init_delay(freq, ck_delay)?;
        }

        // Exit self-refresh and refresh once.
        self.acc.write_field(access, DFS_SELF_REFRESH_REQ, 0)?;
        if self.acc.poll_default(access, 0, 1 << 3, DFS).is_err() {
            log::error!("if {}: self-refresh exit not acknowledged", if_id);
        }
        let refresh_cmd = SdramCommand::Refresh as u32;
        self.acc.if_write(access, SDRAM_OP, refresh_cmd, SDRAM_OP_MASK);
        self.acc.poll_default(access, 0, SDRAM_OP_BUSY_MASK, SDRAM_OP)?;
        self.acc.write_field(access, DFS_BLOCK, 0)?;
        self.acc.write_field(access, DUNIT_MMASK_ENABLE, 1)?;

        self.acc.if_write(access, MR0, cl_mr, MR0_CL);
        self.acc.if_write(access, MR2, cwl_mr, 0x38);
        self.write_odt(access, cl, cwl);
        let cs_masks = self.cs_masks();
        self.write_mrs_cmd(&cs_masks, SdramCommand::Mrs2, cwl_mr, 0x38);

        if mirrored {
            self.acc.write_field(access, DUAL_DUNIT_CFG_CS_SINGLE, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TuneParams;
    use crate::ids::LaneId;
    use crate::pipeline::tests::pipeline;

    const IF0: InterfaceId = InterfaceId::IF0;

    #[test]
    fn test_low_freq_runs_dll_off() {
        let mut p = pipeline(TuneParams::new());
        p.freq_set(DdrFreq::Low).unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, DFS) & 0x1, 1);
        // Self-refresh and the block were released again.
        assert_eq!(sim.reg(IF0, DFS) & 0xe, 0);
        assert_eq!(sim.reg(IF0, DUNIT_MMASK) & 1, 1);
        // CL 6 and CWL 5 at the low frequency.
        assert_eq!((sim.reg(IF0, DFS) >> 8) & 0xf, speed_bin::cl_code(6).unwrap());
        assert_eq!((sim.reg(IF0, DFS) >> 12) & 0x7, 0);
        assert_eq!(sim.reg(IF0, MR0) & MR0_CL, speed_bin::cl_mask(6).unwrap());
        assert_eq!(sim.reg(IF0, ODT_OVERRIDE_REGS[0]) & MR1_DIC_RTT_NOM, 0x46);
        assert_eq!(sim.reg(IF0, SDRAM_CFG) & 0x3fff, 390);
        let lane = LaneId::new(2).unwrap();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane, BW_PHY_REG) & BW_PHY_MASK, 3 << 8);
        assert_eq!(p.current_freq(), DdrFreq::Low);
        let (_, freq) = p.release();
        assert_eq!(freq.changes, [(IF0, DdrFreq::Low)]);
    }

    #[test]
    fn test_target_freq_uses_topology_latencies() {
        let mut p = pipeline(TuneParams::new());
        let (cl, cwl) = {
            let params = p.topology().interface(IF0);
            (params.cas_l, params.cas_wl)
        };
        p.freq_set(DdrFreq::Mhz800).unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, DFS) & 0x1, 0);
        assert_eq!((sim.reg(IF0, DFS) >> 8) & 0xf, speed_bin::cl_code(cl).unwrap());
        assert_eq!(sim.reg(IF0, MR2) & 0x38, speed_bin::cwl_mask(cwl).unwrap());
        assert_eq!(sim.reg(IF0, SDRAM_CFG) & 0x3fff, 3120);
        let lane = LaneId::new(0).unwrap();
        assert_eq!(sim.phy(IF0, PhyBank::Data, lane, RATE_PHY_REG) & RATE_PHY_MASK, 2);
        // One MRS2 to chip-select 0.
        assert_eq!(sim.count_writes(SDRAM_OP, 0xe08), 1);
    }

    #[test]
    fn test_unsupported_frequency() {
        let mut p = pipeline(TuneParams::new());
        // DDR3-1600 does not run at 1066 MHz.
        let err = p.freq_set(DdrFreq::Mhz1066).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_adll_calibration_locks() {
        let mut p = pipeline(TuneParams::new());
        p.adll_calibration(DdrFreq::Low).unwrap();
        let sim = p.access().backend();
        assert_eq!(sim.reg(IF0, DRAM_PHY_CFG) >> 30, 0x3);
        assert_eq!((sim.reg(IF0, SDRAM_CFG) >> 28) & 0x7, 0x7);
        assert!(sim.delay_ms_total >= 120);
    }
}
