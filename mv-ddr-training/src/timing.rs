//! # Timing derivation
//!
//! Conversion of the JEDEC minimum times into Dunit register values for a given clock
//! frequency.
use arbitrary_int::{u2, u4};
use mv_ddr::dunit::regs::{OdtTimingHigh, OdtTimingLow, SdramTimingLow};

use crate::freq::DdrFreq;
use crate::spd::SpdTimings;
use crate::speed_bin::{self, SpeedBinTiming, speed_bin_timing_get};
use crate::topology::{InterfaceParams, Temperature};

/// Refresh interval at normal temperature.
pub const T_REFI_NORMAL_NS: u32 = 7800;
/// Refresh interval when the DRAM runs in the extended temperature range.
pub const T_REFI_HIGH_TEMP_NS: u32 = 3900;

/// Register encoding of a minimum time: one less than the clocks when the time is an exact
/// multiple of the clock period, the truncated clock count otherwise.
#[inline]
pub const fn time_to_clocks(ps: u32, tck_ps: u32) -> u32 {
    if ps == 0 {
        return 0;
    }
    (ps - 1) / tck_ps
}

#[inline]
pub const fn ceil_divide(val: u32, div: u32) -> u32 {
    val.div_ceil(div)
}

pub const fn t_refi_ns(temperature: Temperature) -> u32 {
    match temperature {
        Temperature::High => T_REFI_HIGH_TEMP_NS,
        _ => T_REFI_NORMAL_NS,
    }
}

/// Refresh interval in controller clocks. The controller runs at half the DRAM clock.
pub const fn refresh_interval_count(temperature: Temperature, freq: DdrFreq) -> u32 {
    t_refi_ns(temperature) * 1000 / (2 * freq.tck_ps())
}

/// Power-down exit to command with DLL locking, in the DDR timing register encoding.
pub const fn txpdll(freq: DdrFreq) -> u32 {
    let tck = freq.tck_ps();
    let t = if tck * 10 > 24000 { tck * 10 } else { 24000 };
    ceil_divide(t - 1, tck)
}

/// Timing register values of one interface at one frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingParams {
    pub t_ras: u32,
    pub t_rcd: u32,
    pub t_rp: u32,
    pub t_wr: u32,
    pub t_wtr: u32,
    pub t_rrd: u32,
    pub t_rtp: u32,
    pub t_rfc: u32,
    pub t_mod: u32,
    pub t_faw: u32,
    pub t_pd: u32,
    /// Write recovery in whole clocks, as programmed into MR0.
    pub t_wr_clocks: u32,
}

impl TimingParams {
    pub fn derive(params: &InterfaceParams, freq: DdrFreq, spd: Option<&SpdTimings>) -> Self {
        let tck = freq.tck_ps();
        let bin = params.speed_bin;
        let get = |param| speed_bin_timing_get(bin, param, spd);
        let two_k_page = params.memory_size.page_size_kb(params.bus_width) == 2;
        let (rrd, faw) = if two_k_page {
            (SpeedBinTiming::Rrd2k, SpeedBinTiming::Faw2k)
        } else {
            (SpeedBinTiming::Rrd1k, SpeedBinTiming::Faw1k)
        };
        let t_rrd = get(rrd).max(4 * tck);
        let t_rtp = get(SpeedBinTiming::Rtp).max(4 * tck);
        let t_wtr = get(SpeedBinTiming::Wtr).max(4 * tck);
        let t_mod = (24 * tck).max(get(SpeedBinTiming::Mod));
        let t_pd = (3 * tck).max(get(SpeedBinTiming::Pd));
        let t_rfc_ps = match spd {
            Some(spd) if spd.t_rfc1 != 0 => spd.t_rfc1,
            _ => speed_bin::rfc_ns(params.memory_size) * 1000,
        };
        Self {
            t_ras: time_to_clocks(get(SpeedBinTiming::Ras), tck),
            t_rcd: time_to_clocks(get(SpeedBinTiming::Rcd), tck),
            t_rp: time_to_clocks(get(SpeedBinTiming::Rp), tck),
            t_wr: time_to_clocks(get(SpeedBinTiming::Wr), tck),
            t_wtr: time_to_clocks(t_wtr, tck),
            t_rrd: time_to_clocks(t_rrd, tck),
            t_rtp: time_to_clocks(t_rtp, tck),
            t_rfc: time_to_clocks(t_rfc_ps, tck),
            t_mod: time_to_clocks(t_mod, tck),
            t_faw: time_to_clocks(get(faw), tck),
            t_pd: time_to_clocks(t_pd, tck),
            t_wr_clocks: ceil_divide(get(SpeedBinTiming::Wr), tck),
        }
    }

    /// SDRAM timing low register, written under
    /// [mv_ddr::dunit::regs::SDRAM_TIMING_LOW_MASK].
    pub fn timing_low(&self) -> SdramTimingLow {
        SdramTimingLow::DEFAULT
            .with_t_ras_low(u4::new((self.t_ras & 0xf) as u8))
            .with_t_rcd(u4::new((self.t_rcd & 0xf) as u8))
            .with_t_rp(u4::new((self.t_rp & 0xf) as u8))
            .with_t_wr(u4::new((self.t_wr & 0xf) as u8))
            .with_t_wtr(u4::new((self.t_wtr & 0xf) as u8))
            .with_t_ras_high(u2::new(((self.t_ras >> 4) & 0x3) as u8))
            .with_t_rrd(u4::new((self.t_rrd & 0xf) as u8))
            .with_t_rtp(u4::new((self.t_rtp & 0xf) as u8))
    }

    /// Ordered `(value, mask)` writes to the SDRAM timing high register.
    ///
    /// The tMOD bits are written from the derived value and then overwritten with the fixed
    /// values the controller needs during training. The order is kept as the hardware expects it.
    pub fn timing_high_writes(&self) -> [(u32, u32); 10] {
        [
            (self.t_rfc & 0x7f, 0x7f),
            (0x180, 0x180),
            (0x600, 0x600),
            (0x1800, 0xf800),
            (((self.t_rfc & 0x380) >> 7) << 16, 0x70000),
            (0, 0x380000),
            ((self.t_mod & 0xf) << 25, 0x1e0_0000),
            ((self.t_mod >> 4) << 30, 0xc000_0000),
            (0x1600_0000, 0x1e00_0000),
            (0x4000_0000, 0xc000_0000),
        ]
    }
}

/// ODT timing low register for a CAS latency / CAS write latency pair.
pub fn odt_timing_low(cl: u8, cwl: u8) -> OdtTimingLow {
    let cl = cl as u32;
    let cwl = cwl as u32;
    let gap = cl + 6 - cwl;
    let on = cl - 1;
    let off = cl + 6;
    OdtTimingLow::DEFAULT
        .with_write_read_gap(u4::new(((cl + 1 - cwl) & 0xf) as u8))
        .with_read_odt_gap(u4::new((gap & 0xf) as u8))
        .with_read_on_delay(u4::new((on & 0xf) as u8))
        .with_read_off_delay(u4::new((off & 0xf) as u8))
        .with_read_odt_gap_high(gap & 0x10 != 0)
        .with_read_on_delay_high(on >> 4 != 0)
        .with_read_off_delay_high(off >> 4 != 0)
}

/// ODT timing high register for a CAS write latency.
pub fn odt_timing_high(cwl: u8) -> OdtTimingHigh {
    let cwl = cwl as u32;
    OdtTimingHigh::DEFAULT
        .with_odt_setup(u4::new(1))
        .with_odt_hold(u4::new(7))
        .with_write_on_delay(u4::new(((cwl - 1) & 0xf) as u8))
        .with_write_off_delay(u4::new(((cwl + 5) & 0xf) as u8))
}
