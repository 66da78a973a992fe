//! Minimal DDR4 SPD decoder.
//!
//! Only the fields the topology update and the timing derivation need are decoded. Timings are
//! stored as a medium timebase count (125 ps) plus a signed fine timebase correction (1 ps).
use crate::error::Error;
use crate::topology::{BusWidth, MemSize};

/// Size of the SPD block which carries the base configuration.
pub const SPD_BLOCK_SIZE: usize = 256;

const MTB_PS: i32 = 125;

const BYTE_DEVICE_TYPE: usize = 2;
const BYTE_DENSITY: usize = 4;
const BYTE_ORGANIZATION: usize = 12;
const BYTE_BUS_WIDTH: usize = 13;
const BYTE_TCK_MIN: usize = 18;
const BYTE_CAS_SUPPORTED: usize = 20;
const BYTE_TAA_MIN: usize = 24;
const BYTE_TRCD_MIN: usize = 25;
const BYTE_TRP_MIN: usize = 26;
const BYTE_TRAS_TRC_UPPER: usize = 27;
const BYTE_TRAS_MIN_LSB: usize = 28;
const BYTE_TRC_MIN_LSB: usize = 29;
const BYTE_TRFC1_MIN: usize = 30;
const BYTE_TRFC2_MIN: usize = 32;
const BYTE_TRFC4_MIN: usize = 34;
const BYTE_TFAW_UPPER: usize = 36;
const BYTE_TFAW_LSB: usize = 37;
const BYTE_TRRD_S_MIN: usize = 38;
const BYTE_TRRD_L_MIN: usize = 39;
const BYTE_TCCD_L_MIN: usize = 40;
const BYTE_TWR_UPPER: usize = 41;
const BYTE_TWR_LSB: usize = 42;
const BYTE_TWTR_UPPER: usize = 43;
const BYTE_TWTR_S_LSB: usize = 44;
const BYTE_TWTR_L_LSB: usize = 45;
const BYTE_FINE_TCCD_L: usize = 117;
const BYTE_FINE_TRRD_L: usize = 118;
const BYTE_FINE_TRRD_S: usize = 119;
const BYTE_FINE_TRC: usize = 120;
const BYTE_FINE_TRP: usize = 121;
const BYTE_FINE_TRCD: usize = 122;
const BYTE_FINE_TAA: usize = 123;
const BYTE_FINE_TCK_MIN: usize = 125;
const BYTE_ADDR_MAPPING: usize = 131;

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceType {
    Ddr3 = 0x0b,
    Ddr4 = 0x0c,
}

/// Timing minimums decoded from the SPD image, in ps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpdTimings {
    pub t_ck_min: u32,
    /// CAS latencies supported, bit `n` set for CL `7 + n`.
    pub cas_supported: u32,
    pub t_aa: u32,
    pub t_rcd: u32,
    pub t_rp: u32,
    pub t_ras: u32,
    pub t_rc: u32,
    pub t_rfc1: u32,
    pub t_rfc2: u32,
    pub t_rfc4: u32,
    pub t_faw: u32,
    pub t_rrd_s: u32,
    pub t_rrd_l: u32,
    pub t_ccd_l: u32,
    pub t_wr: u32,
    pub t_wtr_s: u32,
    pub t_wtr_l: u32,
}

/// Raw SPD image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spd {
    bytes: [u8; SPD_BLOCK_SIZE],
}

impl Spd {
    pub const fn new(bytes: [u8; SPD_BLOCK_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy the base configuration block out of a larger EEPROM image.
    pub fn from_slice(image: &[u8]) -> Result<Self, Error> {
        let block = image
            .get(..SPD_BLOCK_SIZE)
            .ok_or(Error::BadParameter("SPD image shorter than 256 bytes"))?;
        let mut bytes = [0; SPD_BLOCK_SIZE];
        bytes.copy_from_slice(block);
        Ok(Self { bytes })
    }

    #[inline]
    pub fn raw(&self) -> &[u8; SPD_BLOCK_SIZE] {
        &self.bytes
    }

    pub fn device_type(&self) -> Result<DeviceType, Error> {
        DeviceType::try_from(self.bytes[BYTE_DEVICE_TYPE])
            .map_err(|_| Error::Unsupported("SPD device type"))
    }

    /// SDRAM die capacity.
    pub fn die_capacity(&self) -> Result<MemSize, Error> {
        match self.bytes[BYTE_DENSITY] & 0xf {
            1 => Ok(MemSize::Mem512M),
            2 => Ok(MemSize::Mem1G),
            3 => Ok(MemSize::Mem2G),
            4 => Ok(MemSize::Mem4G),
            5 => Ok(MemSize::Mem8G),
            _ => Err(Error::Unsupported("SPD die capacity")),
        }
    }

    pub fn device_width(&self) -> Result<BusWidth, Error> {
        match self.bytes[BYTE_ORGANIZATION] & 0x7 {
            0 => Ok(BusWidth::X4),
            1 => Ok(BusWidth::X8),
            2 => Ok(BusWidth::X16),
            _ => Err(Error::Unsupported("SPD device width")),
        }
    }

    pub fn package_ranks(&self) -> u8 {
        ((self.bytes[BYTE_ORGANIZATION] >> 3) & 0x7) + 1
    }

    /// Primary bus width in bits.
    pub fn primary_bus_width(&self) -> Result<u8, Error> {
        match self.bytes[BYTE_BUS_WIDTH] & 0x7 {
            0 => Ok(8),
            1 => Ok(16),
            2 => Ok(32),
            3 => Ok(64),
            _ => Err(Error::Unsupported("SPD bus width")),
        }
    }

    /// Bus width extension for ECC present.
    pub fn has_ecc(&self) -> bool {
        (self.bytes[BYTE_BUS_WIDTH] >> 3) & 0x3 == 1
    }

    /// Odd ranks use mirrored address lines.
    pub fn address_mirroring(&self) -> bool {
        self.bytes[BYTE_ADDR_MAPPING] & 0x1 == 1
    }

    pub fn cas_supported(&self) -> u32 {
        u32::from_le_bytes([
            self.bytes[BYTE_CAS_SUPPORTED],
            self.bytes[BYTE_CAS_SUPPORTED + 1],
            self.bytes[BYTE_CAS_SUPPORTED + 2],
            self.bytes[BYTE_CAS_SUPPORTED + 3],
        ])
    }

    fn mtb_ftb(&self, mtb: u32, ftb_byte: Option<usize>) -> u32 {
        let fine = ftb_byte.map_or(0, |b| self.bytes[b] as i8 as i32);
        (mtb as i32 * MTB_PS + fine).max(0) as u32
    }

    fn word(&self, lsb: usize) -> u32 {
        u16::from_le_bytes([self.bytes[lsb], self.bytes[lsb + 1]]) as u32
    }

    fn upper_nibble_word(&self, upper: u8, lsb: usize) -> u32 {
        ((upper as u32 & 0xf) << 8) | self.bytes[lsb] as u32
    }

    pub fn timings(&self) -> SpdTimings {
        let b = &self.bytes;
        SpdTimings {
            t_ck_min: self.mtb_ftb(b[BYTE_TCK_MIN] as u32, Some(BYTE_FINE_TCK_MIN)),
            cas_supported: self.cas_supported(),
            t_aa: self.mtb_ftb(b[BYTE_TAA_MIN] as u32, Some(BYTE_FINE_TAA)),
            t_rcd: self.mtb_ftb(b[BYTE_TRCD_MIN] as u32, Some(BYTE_FINE_TRCD)),
            t_rp: self.mtb_ftb(b[BYTE_TRP_MIN] as u32, Some(BYTE_FINE_TRP)),
            t_ras: self.mtb_ftb(
                self.upper_nibble_word(b[BYTE_TRAS_TRC_UPPER], BYTE_TRAS_MIN_LSB),
                None,
            ),
            t_rc: self.mtb_ftb(
                self.upper_nibble_word(b[BYTE_TRAS_TRC_UPPER] >> 4, BYTE_TRC_MIN_LSB),
                Some(BYTE_FINE_TRC),
            ),
            t_rfc1: self.mtb_ftb(self.word(BYTE_TRFC1_MIN), None),
            t_rfc2: self.mtb_ftb(self.word(BYTE_TRFC2_MIN), None),
            t_rfc4: self.mtb_ftb(self.word(BYTE_TRFC4_MIN), None),
            t_faw: self.mtb_ftb(
                self.upper_nibble_word(b[BYTE_TFAW_UPPER], BYTE_TFAW_LSB),
                None,
            ),
            t_rrd_s: self.mtb_ftb(b[BYTE_TRRD_S_MIN] as u32, Some(BYTE_FINE_TRRD_S)),
            t_rrd_l: self.mtb_ftb(b[BYTE_TRRD_L_MIN] as u32, Some(BYTE_FINE_TRRD_L)),
            t_ccd_l: self.mtb_ftb(b[BYTE_TCCD_L_MIN] as u32, Some(BYTE_FINE_TCCD_L)),
            t_wr: self.mtb_ftb(self.upper_nibble_word(b[BYTE_TWR_UPPER], BYTE_TWR_LSB), None),
            t_wtr_s: self.mtb_ftb(
                self.upper_nibble_word(b[BYTE_TWTR_UPPER], BYTE_TWTR_S_LSB),
                None,
            ),
            t_wtr_l: self.mtb_ftb(
                self.upper_nibble_word(b[BYTE_TWTR_UPPER] >> 4, BYTE_TWTR_L_LSB),
                None,
            ),
        }
    }
}
