//! # DDR PHY registers
//!
//! The PHY register file is organised per byte lane ("subphy"). Each lane has a data bank and a
//! control bank. Registers are 16 bits wide and are reached through
//! [crate::dunit::PHY_REG_FILE_ACCESS] with a [PhyAccessCommand].
use arbitrary_int::{u2, u4, u6};

/// Offset between the per chip-select copies of the leveling registers.
pub const CS_REG_OFFSET: u8 = 0x4;
/// Offset between the per chip-select copies of the per-bit skew registers.
pub const CS_PBS_OFFSET: u8 = 0x10;

/// Write leveling result: ADLL tap in [4:0], phase in [8:6].
pub const WL_PHY_REG: u8 = 0x0;
/// Write centralization ADLL tap.
pub const CTX_PHY_REG: u8 = 0x1;
/// Read leveling result: ADLL tap in [4:0], phase in [8:6].
pub const RL_PHY_REG: u8 = 0x2;
/// Read centralization ADLL tap.
pub const CRX_PHY_REG: u8 = 0x3;
pub const PBS_TX_PHY_REG: u8 = 0x10;
pub const PBS_TX_BCAST_PHY_REG: u8 = 0x1f;
pub const PBS_RX_PHY_REG: u8 = 0x50;
pub const PBS_RX_BCAST_PHY_REG: u8 = 0x5f;
/// Pad index of the DQS strobe in the per-bit skew and vref register groups.
pub const DQSP_PAD: u8 = 4;
/// Pad index of the complementary DQS strobe.
pub const DQSN_PAD: u8 = 5;
pub const PHY_CONTROL_PHY_REG: u8 = 0x90;
pub const BW_PHY_REG: u8 = 0x92;
pub const RATE_PHY_REG: u8 = 0x94;
pub const CMOS_CONFIG_PHY_REG: u8 = 0xa2;
pub const RESULT_PHY_REG: u8 = 0xc0;
/// Eye margin slots in the control bank, one per (chip-select, lane). RX margin in [15:8], TX in
/// [7:0].
pub const DMIN_PHY_REG: u8 = 0xc0;
const DMIN_SLOTS_PER_SUBPHY: u8 = 10;
const DMIN_LANES_PER_CS: u8 = 5;
/// Receiver vref broadcast per chip-select, [5:0]. DDR4 uses it for the receiver duty cycle.
pub const CSN_IOB_VREF_PHY_REG: u8 = 0xdb;
/// Per pad receiver vref, per chip-select.
pub const VREF_PHY_REG: u8 = 0xd0;
/// Offset between the per chip-select copies of the vref registers.
pub const CS_VREF_OFFSET: u8 = 12;

pub const BW_PHY_MASK: u16 = 0x700;
pub const RATE_PHY_MASK: u16 = 0x7;

/// Per chip-select register address.
#[inline]
pub const fn cs_reg(base: u8, cs: u8) -> u8 {
    base + cs * CS_REG_OFFSET
}

/// Per-bit TX skew register of `pad` for chip-select `cs`.
#[inline]
pub const fn pbs_tx_reg(cs: u8, pad: u8) -> u8 {
    PBS_TX_PHY_REG + cs * CS_PBS_OFFSET + pad
}

/// Per-bit RX skew register of `pad` for chip-select `cs`.
#[inline]
pub const fn pbs_rx_reg(cs: u8, pad: u8) -> u8 {
    PBS_RX_PHY_REG + cs * CS_PBS_OFFSET + pad
}

#[inline]
pub const fn csn_iob_vref_reg(cs: u8) -> u8 {
    CSN_IOB_VREF_PHY_REG + cs * CS_VREF_OFFSET
}

/// Receiver vref register of `pad` for chip-select `cs`.
#[inline]
pub const fn vref_reg(cs: u8, pad: u8) -> u8 {
    VREF_PHY_REG + cs * CS_VREF_OFFSET + pad
}

/// Calibration result register of chip-select `cs`.
#[inline]
pub const fn result_reg(cs: u8, offset: u8) -> u8 {
    RESULT_PHY_REG + cs + offset
}

/// Control subphy and register of the eye margin slot of `lane` for chip-select `cs`.
#[inline]
pub const fn dmin_reg(cs: u8, lane: u8) -> (u8, u8) {
    let slot = cs * DMIN_LANES_PER_CS + lane;
    (
        slot / DMIN_SLOTS_PER_SUBPHY,
        DMIN_PHY_REG + slot % DMIN_SLOTS_PER_SUBPHY,
    )
}

#[bitbybit::bitenum(u1, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum PhyOperation {
    Read = 0,
    Write = 1,
}

#[bitbybit::bitenum(u1, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum PhyBank {
    Data = 0,
    Control = 1,
}

#[bitbybit::bitenum(u1, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum LaneCast {
    Unicast = 0,
    Multicast = 1,
}

/// Command word written to the PHY access register.
///
/// The command is written once without and once with [PhyAccessCommand::go] set. Hardware clears
/// the go bit once the access completed and returns read data in the low 16 bits.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PhyAccessCommand {
    #[bit(31, rw)]
    go: bool,
    #[bit(30, rw)]
    operation: PhyOperation,
    /// Register address bits [7:6].
    #[bits(28..=29, rw)]
    addr_high: u2,
    #[bit(27, rw)]
    lane_cast: LaneCast,
    #[bit(26, rw)]
    bank: PhyBank,
    #[bits(22..=25, rw)]
    lane: u4,
    /// Register address bits [5:0].
    #[bits(16..=21, rw)]
    addr_low: u6,
    #[bits(0..=15, rw)]
    data: u16,
}

impl PhyAccessCommand {
    /// Build the first phase of a PHY access.
    pub fn command(
        operation: PhyOperation,
        bank: PhyBank,
        lane_cast: LaneCast,
        lane: u8,
        reg: u8,
        data: u16,
    ) -> Self {
        Self::DEFAULT
            .with_operation(operation)
            .with_addr_high(u2::new((reg >> 6) & 0x3))
            .with_lane_cast(lane_cast)
            .with_bank(bank)
            .with_lane(u4::new(lane & 0xf))
            .with_addr_low(u6::new(reg & 0x3f))
            .with_data(data)
    }

    /// Register address reassembled from both address fields.
    pub fn reg(&self) -> u8 {
        (self.addr_high().value() << 6) | self.addr_low().value()
    }
}
