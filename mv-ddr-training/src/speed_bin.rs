//! # JEDEC speed bins
//!
//! Static timing tables for the DDR3 speed bins and the CAS latency / CAS write latency tables
//! per (speed bin, clock frequency). All timings are in ps.
use crate::freq::DdrFreq;
use crate::spd::SpdTimings;
use crate::topology::MemSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum SpeedBin {
    Ddr3_800D = 0,
    Ddr3_800E,
    Ddr3_1066E,
    Ddr3_1066F,
    Ddr3_1066G,
    Ddr3_1333F,
    Ddr3_1333G,
    Ddr3_1333H,
    Ddr3_1333J,
    Ddr3_1600G,
    Ddr3_1600H,
    Ddr3_1600J,
    Ddr3_1600K,
    Ddr3_1866J,
    Ddr3_1866K,
    Ddr3_1866L,
    Ddr3_1866M,
    Ddr3_2133K,
    Ddr3_2133L,
    Ddr3_2133M,
    Ddr3_2133N,
}

/// Named timing parameter of a speed bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedBinTiming {
    Rcd,
    Rp,
    Ras,
    Rc,
    Rrd1k,
    Rrd2k,
    RrdS,
    RrdL,
    Pd,
    Faw1k,
    Faw2k,
    Wtr,
    WtrS,
    WtrL,
    Rtp,
    Wr,
    Mod,
    Aa,
    CcdL,
}

/// Write recovery used when the SPD image leaves tWR at zero.
pub const SPD_FALLBACK_TWR: u32 = 15000;
pub const SPD_FALLBACK_TWTR_S: u32 = 2500;
pub const SPD_FALLBACK_TWTR_L: u32 = 7500;

// Per data rate generation: 800, 1066, 1333, 1600, 1866, 2133.
const T_RAS: [u32; 6] = [37500, 37500, 36000, 35000, 34000, 33000];
const T_RRD_1K: [u32; 6] = [10000, 7500, 6000, 6000, 5000, 5000];
const T_RRD_2K: [u32; 6] = [10000, 10000, 7500, 7500, 6000, 6000];
const T_FAW_1K: [u32; 6] = [40000, 37500, 30000, 30000, 27000, 25000];
const T_FAW_2K: [u32; 6] = [50000, 50000, 45000, 40000, 35000, 35000];
const MAX_FREQ_MHZ: [u32; 6] = [400, 533, 667, 800, 933, 1066];

const T_WTR: u32 = 7500;
const T_RTP: u32 = 7500;
const T_WR: u32 = 15000;
const T_MOD: u32 = 15000;
const T_PD: u32 = 7500;
const T_CCD_L: u32 = 5000;

impl SpeedBin {
    pub const COUNT: usize = 21;

    pub const ALL: [SpeedBin; Self::COUNT] = [
        SpeedBin::Ddr3_800D,
        SpeedBin::Ddr3_800E,
        SpeedBin::Ddr3_1066E,
        SpeedBin::Ddr3_1066F,
        SpeedBin::Ddr3_1066G,
        SpeedBin::Ddr3_1333F,
        SpeedBin::Ddr3_1333G,
        SpeedBin::Ddr3_1333H,
        SpeedBin::Ddr3_1333J,
        SpeedBin::Ddr3_1600G,
        SpeedBin::Ddr3_1600H,
        SpeedBin::Ddr3_1600J,
        SpeedBin::Ddr3_1600K,
        SpeedBin::Ddr3_1866J,
        SpeedBin::Ddr3_1866K,
        SpeedBin::Ddr3_1866L,
        SpeedBin::Ddr3_1866M,
        SpeedBin::Ddr3_2133K,
        SpeedBin::Ddr3_2133L,
        SpeedBin::Ddr3_2133M,
        SpeedBin::Ddr3_2133N,
    ];

    /// Data rate generation, 0 for DDR3-800 up to 5 for DDR3-2133.
    const fn generation(self) -> usize {
        match self as u8 {
            0..=1 => 0,
            2..=4 => 1,
            5..=8 => 2,
            9..=12 => 3,
            13..=16 => 4,
            _ => 5,
        }
    }

    /// Minimum CAS latency time tAA.
    pub const fn t_aa(self) -> u32 {
        match self {
            SpeedBin::Ddr3_800D => 12500,
            SpeedBin::Ddr3_800E => 15000,
            SpeedBin::Ddr3_1066E => 11250,
            SpeedBin::Ddr3_1066F => 13125,
            SpeedBin::Ddr3_1066G => 15000,
            SpeedBin::Ddr3_1333F => 10500,
            SpeedBin::Ddr3_1333G => 12000,
            SpeedBin::Ddr3_1333H => 13500,
            SpeedBin::Ddr3_1333J => 15000,
            SpeedBin::Ddr3_1600G => 10000,
            SpeedBin::Ddr3_1600H => 11250,
            SpeedBin::Ddr3_1600J => 12500,
            SpeedBin::Ddr3_1600K => 13750,
            SpeedBin::Ddr3_1866J => 10700,
            SpeedBin::Ddr3_1866K => 11770,
            SpeedBin::Ddr3_1866L => 12840,
            SpeedBin::Ddr3_1866M => 13910,
            SpeedBin::Ddr3_2133K => 10285,
            SpeedBin::Ddr3_2133L => 11220,
            SpeedBin::Ddr3_2133M => 12155,
            SpeedBin::Ddr3_2133N => 13090,
        }
    }

    /// Highest clock frequency the bin is specified for.
    pub const fn max_freq_mhz(self) -> u32 {
        MAX_FREQ_MHZ[self.generation()]
    }

    /// Static table value of a timing parameter.
    pub const fn timing(self, param: SpeedBinTiming) -> u32 {
        let g = self.generation();
        match param {
            SpeedBinTiming::Aa | SpeedBinTiming::Rcd | SpeedBinTiming::Rp => self.t_aa(),
            SpeedBinTiming::Ras => T_RAS[g],
            SpeedBinTiming::Rc => T_RAS[g] + self.t_aa(),
            SpeedBinTiming::Rrd1k | SpeedBinTiming::RrdS | SpeedBinTiming::RrdL => T_RRD_1K[g],
            SpeedBinTiming::Rrd2k => T_RRD_2K[g],
            SpeedBinTiming::Faw1k => T_FAW_1K[g],
            SpeedBinTiming::Faw2k => T_FAW_2K[g],
            SpeedBinTiming::Wtr | SpeedBinTiming::WtrL => T_WTR,
            SpeedBinTiming::WtrS => SPD_FALLBACK_TWTR_S,
            SpeedBinTiming::Rtp => T_RTP,
            SpeedBinTiming::Wr => T_WR,
            SpeedBinTiming::Mod => T_MOD,
            SpeedBinTiming::Pd => T_PD,
            SpeedBinTiming::CcdL => T_CCD_L,
        }
    }
}

/// JEDEC minimum of a timing parameter in ps.
///
/// SPD values take precedence when an SPD image is available. Parameters the SPD image does not
/// carry come from the static table. A zero SPD value for tWR, tWTR_S or tWTR_L is replaced by
/// the JEDEC floor.
pub fn speed_bin_timing_get(
    bin: SpeedBin,
    param: SpeedBinTiming,
    spd: Option<&SpdTimings>,
) -> u32 {
    let Some(spd) = spd else {
        return bin.timing(param);
    };
    let or_fallback = |val: u32, fallback: u32| if val == 0 { fallback } else { val };
    match param {
        SpeedBinTiming::Aa => spd.t_aa,
        SpeedBinTiming::Rcd => spd.t_rcd,
        SpeedBinTiming::Rp => spd.t_rp,
        SpeedBinTiming::Ras => spd.t_ras,
        SpeedBinTiming::Rc => spd.t_rc,
        SpeedBinTiming::Rrd1k | SpeedBinTiming::Rrd2k | SpeedBinTiming::RrdS => spd.t_rrd_s,
        SpeedBinTiming::RrdL => spd.t_rrd_l,
        SpeedBinTiming::Faw1k | SpeedBinTiming::Faw2k => spd.t_faw,
        SpeedBinTiming::CcdL => spd.t_ccd_l,
        SpeedBinTiming::Wr => or_fallback(spd.t_wr, SPD_FALLBACK_TWR),
        SpeedBinTiming::WtrS => or_fallback(spd.t_wtr_s, SPD_FALLBACK_TWTR_S),
        SpeedBinTiming::Wtr | SpeedBinTiming::WtrL => or_fallback(spd.t_wtr_l, SPD_FALLBACK_TWTR_L),
        SpeedBinTiming::Rtp | SpeedBinTiming::Mod | SpeedBinTiming::Pd => bin.timing(param),
    }
}

/// Round a minimum time up to whole clocks, with the JEDEC 0.025 clock guard band.
pub const fn ps_to_nck(ps: u32, tck_ps: u32) -> u32 {
    (ps * 1000 / tck_ps + 974) / 1000
}

const fn cas_latency_calc(bin: SpeedBin, freq: DdrFreq) -> u8 {
    if freq.mhz() > bin.max_freq_mhz() {
        return 0;
    }
    if matches!(freq, DdrFreq::Low) {
        return 6;
    }
    let cl = ps_to_nck(bin.t_aa(), freq.tck_ps());
    if cl < 5 {
        5
    } else if cl > 16 {
        0
    } else {
        cl as u8
    }
}

const fn cas_write_latency_calc(bin: SpeedBin, freq: DdrFreq) -> u8 {
    if freq.mhz() > bin.max_freq_mhz() {
        return 0;
    }
    match freq.mhz() {
        0..=400 => 5,
        401..=533 => 6,
        534..=667 => 7,
        668..=800 => 8,
        801..=933 => 9,
        _ => 10,
    }
}

macro_rules! latency_table {
    ($calc:ident) => {{
        let mut table = [[0; DdrFreq::COUNT]; SpeedBin::COUNT];
        let mut b = 0;
        while b < SpeedBin::COUNT {
            let mut f = 0;
            while f < DdrFreq::COUNT {
                table[b][f] = $calc(SpeedBin::ALL[b], DdrFreq::ALL[f]);
                f += 1;
            }
            b += 1;
        }
        table
    }};
}

/// CAS latency per (speed bin, frequency). 0 marks an unsupported pair.
pub static CAS_LATENCY_TABLE: [[u8; DdrFreq::COUNT]; SpeedBin::COUNT] =
    latency_table!(cas_latency_calc);
/// CAS write latency per (speed bin, frequency). 0 marks an unsupported pair.
pub static CAS_WRITE_LATENCY_TABLE: [[u8; DdrFreq::COUNT]; SpeedBin::COUNT] =
    latency_table!(cas_write_latency_calc);

/// CAS latency table lookup. Returns [None] for unsupported pairs.
pub fn cas_latency(bin: SpeedBin, freq: DdrFreq) -> Option<u8> {
    let cl = CAS_LATENCY_TABLE[bin as usize][freq.index()];
    (cl != 0).then_some(cl)
}

pub fn cas_write_latency(bin: SpeedBin, freq: DdrFreq) -> Option<u8> {
    let cwl = CAS_WRITE_LATENCY_TABLE[bin as usize][freq.index()];
    (cwl != 0).then_some(cwl)
}

/// 4 bit CAS latency code as used by MR0 and the DFS register.
pub const fn cl_code(cl: u8) -> Option<u32> {
    match cl {
        5..=11 => Some((cl as u32 - 4) * 2),
        12..=16 => Some((cl as u32 - 12) * 2 + 1),
        _ => None,
    }
}

/// MR0 encoding of the CAS latency, A[6:4] plus A[2].
pub const fn cl_mask(cl: u8) -> Option<u32> {
    let code = match cl_code(cl) {
        Some(code) => code,
        None => return None,
    };
    // Bit 0 of the code is A2, the rest lands in A[6:4].
    Some(((code >> 1) << 4) | ((code & 1) << 2))
}

/// 3 bit CAS write latency code.
pub const fn cwl_code(cwl: u8) -> Option<u32> {
    match cwl {
        5..=12 => Some((cwl as u32) - 5),
        _ => None,
    }
}

/// MR2 encoding of the CAS write latency, A[5:3].
pub const fn cwl_mask(cwl: u8) -> Option<u32> {
    match cwl_code(cwl) {
        Some(code) => Some(code << 3),
        None => None,
    }
}

/// 3 bit write recovery code for a write recovery time in clocks.
pub const fn twr_code(twr_clocks: u32) -> Option<u32> {
    match twr_clocks {
        0..=5 => Some(1),
        6 => Some(2),
        7 => Some(3),
        8 => Some(4),
        9..=10 => Some(5),
        11..=12 => Some(6),
        13..=14 => Some(7),
        15..=16 => Some(0),
        _ => None,
    }
}

/// MR0 encoding of the write recovery in clocks, A[11:9].
pub const fn twr_mask(twr_clocks: u32) -> Option<u32> {
    match twr_code(twr_clocks) {
        Some(code) => Some(code << 9),
        None => None,
    }
}

/// Refresh cycle time in ns per die capacity.
pub const fn rfc_ns(size: MemSize) -> u32 {
    match size {
        MemSize::Mem512M => 90,
        MemSize::Mem1G => 110,
        MemSize::Mem2G => 160,
        MemSize::Mem4G => 260,
        MemSize::Mem8G => 350,
    }
}
