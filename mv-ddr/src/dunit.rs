//! # Dunit memory controller registers
//!
//! Offsets are relative to [crate::INTERNAL_REGS_BASE_ADDR].
use crate::field::Field;

pub const SDRAM_CFG: u32 = 0x1400;
pub const DUNIT_CTRL_LOW: u32 = 0x1404;
pub const SDRAM_TIMING_LOW: u32 = 0x1408;
pub const SDRAM_TIMING_HIGH: u32 = 0x140c;
pub const SDRAM_ACCESS_CTRL: u32 = 0x1410;
pub const SDRAM_OPEN_PAGES_CTRL: u32 = 0x1414;
pub const SDRAM_OP: u32 = 0x1418;
pub const DUNIT_CTRL_HIGH: u32 = 0x1424;
pub const ODT_TIMING_LOW: u32 = 0x1428;
pub const DDR_TIMING: u32 = 0x142c;
pub const ODT_TIMING_HIGH: u32 = 0x147c;
pub const SDRAM_INIT_CTRL: u32 = 0x1480;
pub const SDRAM_ODT_CTRL_LOW: u32 = 0x1494;
pub const SDRAM_ODT_CTRL_HIGH: u32 = 0x1498;
pub const DUNIT_ODT_CTRL: u32 = 0x149c;
pub const DUNIT_MMASK: u32 = 0x14b0;
pub const CALIB_MACHINE_CTRL: u32 = 0x14cc;
pub const DDR_IO: u32 = 0x1524;
pub const DFS: u32 = 0x1528;
pub const READ_DATA_SAMPLE_DELAY: u32 = 0x1538;
pub const READ_DATA_READY_DELAY: u32 = 0x153c;
pub const TRAINING: u32 = 0x15b0;
pub const TRAINING_SW_1: u32 = 0x15b4;
pub const TRAINING_SW_2: u32 = 0x15b8;
pub const TRAINING_PATTERN_BASE_ADDR: u32 = 0x15bc;
pub const TRAINING_DBG_1: u32 = 0x15c0;
pub const TRAINING_DBG_2: u32 = 0x15c4;
pub const TRAINING_DBG_3: u32 = 0x15c8;
pub const MR0: u32 = 0x15d0;
pub const MR1: u32 = 0x15d4;
pub const MR2: u32 = 0x15d8;
pub const MR3: u32 = 0x15dc;
/// DDR4 mode register 6, VrefDQ training.
pub const DDR4_MR6: u32 = 0x1918;
pub const RANK_CTRL: u32 = 0x15e0;
pub const ZQC_CFG: u32 = 0x15e4;
pub const DRAM_PHY_CFG: u32 = 0x15ec;
pub const PHY_LOCK_STATUS: u32 = 0x1674;
/// PHY indirect access handshake register.
pub const PHY_REG_FILE_ACCESS: u32 = 0x16a0;
/// Write leveling done counter.
pub const WL_DONE_CNTR: u32 = 0x16a8;
pub const TRAINING_WL: u32 = 0x16ac;
pub const DUAL_DUNIT_CFG: u32 = 0x16d8;
/// Drives the DQS toggle pattern while the DRAM is in write leveling mode.
pub const WR_LEVELING_DQS_PATTERN: u32 = 0x16dc;

/// Per-interface ODT drive override registers, cleared while running in DLL-off mode.
pub const ODT_OVERRIDE_REGS: [u32; 4] = [0x1874, 0x1884, 0x1894, 0x18a4];
pub const ODT_OVERRIDE_RTT_MASK: u32 = 0x244;

// Frequently used fields.
pub const SDRAM_CFG_REFRESH_INTERVAL: Field = Field::new(SDRAM_CFG, 0, 14);
pub const SDRAM_CFG_REGISTERED_DIMM: Field = Field::bit(SDRAM_CFG, 14);
pub const SDRAM_CFG_BUS_32BIT: Field = Field::bit(SDRAM_CFG, 15);
pub const SDRAM_CFG_PHY_RFRST: Field = Field::bit(SDRAM_CFG, 24);
pub const SDRAM_CFG_ECC: Field = Field::bit(SDRAM_CFG, 26);
pub const SDRAM_CFG_DRIVER_RESET: Field = Field::bit(SDRAM_CFG, 28);
pub const SDRAM_CFG_PUP_RESET: Field = Field::new(SDRAM_CFG, 29, 2);
pub const SDRAM_CFG_READ_FIFO_RESET: Field = Field::bit(SDRAM_CFG, 30);

pub const DUNIT_CTRL_LOW_2T: Field = Field::new(DUNIT_CTRL_LOW, 3, 2);
pub const DUNIT_CTRL_HIGH_CLOCK_SHIFT: Field = Field::bit(DUNIT_CTRL_HIGH, 11);
pub const DUNIT_MMASK_ENABLE: Field = Field::bit(DUNIT_MMASK, 0);

pub const DFS_DLL_OFF: Field = Field::bit(DFS, 0);
pub const DFS_BLOCK: Field = Field::bit(DFS, 1);
pub const DFS_SELF_REFRESH_REQ: Field = Field::bit(DFS, 2);
pub const DFS_SELF_REFRESH_ACK: Field = Field::bit(DFS, 3);
pub const DFS_CL: Field = Field::new(DFS, 8, 4);
pub const DFS_CWL: Field = Field::new(DFS, 12, 3);
pub const DFS_WR: Field = Field::new(DFS, 16, 3);

pub const CALIB_MACHINE_CTRL_PAD_CAL: Field = Field::bit(CALIB_MACHINE_CTRL, 0);
pub const CALIB_MACHINE_CTRL_UPDATE: Field = Field::new(CALIB_MACHINE_CTRL, 3, 2);

pub const DRAM_PHY_CFG_ADLL_RESET: Field = Field::new(DRAM_PHY_CFG, 30, 2);
pub const DRAM_PHY_CFG_CLOCK_RATIO: Field = Field::new(DRAM_PHY_CFG, 4, 2);

pub const DUAL_DUNIT_CFG_CS_SINGLE: Field = Field::bit(DUAL_DUNIT_CFG, 3);
pub const SDRAM_INIT_CTRL_START: Field = Field::bit(SDRAM_INIT_CTRL, 0);

pub const MR0_CL: u32 = 0x74;
pub const MR0_WR: u32 = 0xe00;
pub const MR1_DIC_RTT_NOM: u32 = 0x266;
pub const MR2_CWL_SRT: u32 = 0x678;
/// MR1 write leveling enable.
pub const MR1_WL_ENABLE: u32 = 1 << 7;
/// MR1 output buffer disable.
pub const MR1_QOFF: u32 = 1 << 12;
/// MR3 multi purpose register enable.
pub const MR3_MPR_ENABLE: u32 = 1 << 2;
/// MR3 MPR read format, parallel readout on all DQ pins.
pub const MR3_MPR_PARALLEL: u32 = 1 << 11;
pub const MR3_MPR_MASK: u32 = MR3_MPR_ENABLE | (0x3 << 11) | 0x3;
/// MR6 VrefDQ value.
pub const MR6_VREF_VALUE: u32 = 0x3f;
/// MR6 VrefDQ range select, set for range 2.
pub const MR6_VREF_RANGE_2: u32 = 1 << 6;
/// MR6 VrefDQ training enable.
pub const MR6_VREF_TRAINING: u32 = 1 << 7;
pub const MR6_VREF_MASK: u32 = MR6_VREF_VALUE | MR6_VREF_RANGE_2 | MR6_VREF_TRAINING;

/// Periodic ZQ calibration interval and short calibration length.
pub const ZQC_CFG_AUTO: u32 = 15384 | (2 << 20);
pub const ZQC_CFG_MASK: u32 = 0x3f_ffff;

/// All eight ADLL lock bits of both PHY sub-blocks.
pub const PHY_LOCK_ALL: u32 = 0x3ff_03ff;

/// Device width field of chip-select `cs` in [SDRAM_ACCESS_CTRL].
pub const fn access_ctrl_device_width(cs: u8) -> Field {
    Field::new(SDRAM_ACCESS_CTRL, cs * 4, 2)
}

/// Low two bits of the device size of chip-select `cs` in [SDRAM_ACCESS_CTRL].
pub const fn access_ctrl_size_low(cs: u8) -> Field {
    Field::new(SDRAM_ACCESS_CTRL, 2 + cs * 4, 2)
}

/// High bit of the device size of chip-select `cs` in [SDRAM_ACCESS_CTRL].
pub const fn access_ctrl_size_high(cs: u8) -> Field {
    Field::bit(SDRAM_ACCESS_CTRL, 20 + cs)
}

pub const fn access_ctrl_addr_select(cs: u8) -> Field {
    Field::bit(SDRAM_ACCESS_CTRL, 16 + cs)
}

/// Chip-select enable bit in [DUNIT_CTRL_LOW]. Chip-select 3 lives at bit 15.
pub const fn ctrl_low_cs_enable(cs: u8) -> Field {
    match cs {
        3 => Field::bit(DUNIT_CTRL_LOW, 15),
        _ => Field::bit(DUNIT_CTRL_LOW, 11 + cs),
    }
}

pub mod regs {
    use arbitrary_int::{u2, u4, u5};

    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct SdramTimingLow {
        #[bits(28..=31, rw)]
        t_rtp: u4,
        #[bits(24..=27, rw)]
        t_rrd: u4,
        /// Bits [5:4] of tRAS.
        #[bits(20..=21, rw)]
        t_ras_high: u2,
        #[bits(16..=19, rw)]
        t_wtr: u4,
        #[bits(12..=15, rw)]
        t_wr: u4,
        #[bits(8..=11, rw)]
        t_rp: u4,
        #[bits(4..=7, rw)]
        t_rcd: u4,
        /// Bits [3:0] of tRAS.
        #[bits(0..=3, rw)]
        t_ras_low: u4,
    }

    /// Only the bits written by the controller init flow.
    pub const SDRAM_TIMING_LOW_MASK: u32 = 0xff3f_ffff;

    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct OdtTimingLow {
        #[bit(23, rw)]
        read_off_delay_high: bool,
        #[bit(22, rw)]
        read_on_delay_high: bool,
        #[bit(21, rw)]
        read_odt_gap_high: bool,
        #[bits(16..=19, rw)]
        read_off_delay: u4,
        #[bits(12..=15, rw)]
        read_on_delay: u4,
        #[bits(8..=11, rw)]
        read_odt_gap: u4,
        #[bits(4..=7, rw)]
        write_read_gap: u4,
    }

    pub const ODT_TIMING_LOW_MASK: u32 = 0x00ff_fff0;

    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct OdtTimingHigh {
        #[bits(12..=15, rw)]
        write_off_delay: u4,
        #[bits(8..=11, rw)]
        write_on_delay: u4,
        #[bits(4..=7, rw)]
        odt_hold: u4,
        #[bits(0..=3, rw)]
        odt_setup: u4,
    }

    #[bitbybit::bitenum(u5, exhaustive = false)]
    #[derive(Debug, PartialEq, Eq)]
    pub enum SdramCommand {
        Normal = 0x0,
        Precharge = 0x1,
        Refresh = 0x2,
        Mrs0 = 0x3,
        Mrs1 = 0x4,
        Nop = 0x5,
        SelfRefresh = 0x7,
        Mrs2 = 0x8,
        Mrs3 = 0x9,
        Mrs4 = 0x10,
        Mrs5 = 0x11,
        Mrs6 = 0x12,
    }

    /// SDRAM operation register. A command is issued to the chip-selects whose bit is *cleared*
    /// in [SdramOperation::cs_mask_n].
    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct SdramOperation {
        #[bits(8..=11, rw)]
        cs_mask_n: u4,
        #[bits(0..=4, rw)]
        cmd: Option<SdramCommand>,
    }

    pub const SDRAM_OP_MASK: u32 = 0xf1f;
    pub const SDRAM_OP_BUSY_MASK: u32 = 0x1f;

    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct RankControl {
        #[bits(4..=7, rw)]
        mirror_enable: u4,
        #[bits(0..=3, rw)]
        cs_enable: u4,
    }

    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct DdrTiming {
        #[bits(21..=28, rw)]
        t_zqcs: u8,
        #[bits(9..=14, rw)]
        t_xpdll_extra: arbitrary_int::u6,
        #[bits(4..=8, rw)]
        t_xpdll: u5,
    }

    pub const DDR_TIMING_MASK: u32 = (0xff << 21) | (0x3f << 9) | 0x1f0;
}

/// Number of 32 bit words covered by [DunitWindow].
pub const DUNIT_WINDOW_WORDS: usize = 0xF0000 / 4;

/// Internal register window covering the Dunit, the ODPG, and the clock and PLL registers the
/// frequency change flow needs.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct DunitWindow {
    regs: [u32; DUNIT_WINDOW_WORDS],
}

static_assertions::const_assert_eq!(core::mem::size_of::<DunitWindow>(), 0xF0000);

impl DunitWindow {
    /// Create a new register window MMIO instance at [crate::INTERNAL_REGS_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed() -> MmioDunitWindow<'static> {
        unsafe { Self::new_mmio_at(crate::INTERNAL_REGS_BASE_ADDR) }
    }

    /// Word index of a byte offset, or [None] if it is outside the window or misaligned.
    #[inline]
    pub const fn word_index(offset: u32) -> Option<usize> {
        let offset = offset as usize;
        if offset % 4 != 0 || offset / 4 >= DUNIT_WINDOW_WORDS {
            return None;
        }
        Some(offset / 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitrary_int::{u2, u4};
    use regs::*;

    #[test]
    fn test_timing_low_layout() {
        let reg = SdramTimingLow::builder()
            .with_t_rtp(u4::new(5))
            .with_t_rrd(u4::new(4))
            .with_t_ras_high(u2::new(1))
            .with_t_wtr(u4::new(5))
            .with_t_wr(u4::new(0xb))
            .with_t_rp(u4::new(0xa))
            .with_t_rcd(u4::new(0xa))
            .with_t_ras_low(u4::new(0xb))
            .build();
        assert_eq!(reg.raw_value(), 0x5415_baab);
        assert_eq!(reg.raw_value() & !SDRAM_TIMING_LOW_MASK, 0);
    }

    #[test]
    fn test_cs_enable_fields() {
        assert_eq!(ctrl_low_cs_enable(0).mask(), 1 << 11);
        assert_eq!(ctrl_low_cs_enable(2).mask(), 1 << 13);
        assert_eq!(ctrl_low_cs_enable(3).mask(), 1 << 15);
        assert_eq!(access_ctrl_size_low(1).mask(), 0x3 << 6);
        assert_eq!(access_ctrl_size_high(2).mask(), 1 << 22);
    }

    #[test]
    fn test_sdram_operation() {
        let op = SdramOperation::builder()
            .with_cs_mask_n(u4::new(0xe))
            .with_cmd(SdramCommand::Mrs2)
            .build();
        assert_eq!(op.raw_value(), 0xe08);
        assert_eq!(op.raw_value() & !SDRAM_OP_MASK, 0);
    }

    #[test]
    fn test_window_index() {
        assert_eq!(DunitWindow::word_index(SDRAM_CFG), Some(0x500));
        assert_eq!(DunitWindow::word_index(0x1401), None);
        assert_eq!(DunitWindow::word_index(0xF0000), None);
    }
}
