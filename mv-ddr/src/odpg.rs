//! # On-die pattern generator (ODPG) and training result registers
use crate::field::Field;

pub const ODPG_TRAINING_TRIGGER: u32 = 0x1030;
pub const ODPG_TRAINING_CTRL: u32 = 0x1034;
pub const ODPG_OBJ1_OPCODE: u32 = 0x103c;
pub const ODPG_OBJ1_ITER_CNT: u32 = 0x10b4;
pub const CALIB_OBJ_PRFA: u32 = 0x10c4;
pub const ODPG_WRITE_READ_MODE_ENABLE: u32 = 0x10fc;
pub const ODPG_DATA_CTRL: u32 = 0x1630;
pub const ODPG_DATA_BUFFER_OFFSET: u32 = 0x1638;
pub const ODPG_DATA_BUFFER_SIZE: u32 = 0x163c;
pub const ODPG_PATTERN_ADDR: u32 = 0x16b0;
pub const ODPG_PATTERN_ADDR_OFFSET: u32 = 0x16b4;
pub const ODPG_PATTERN_DATA_LOW: u32 = 0x16b8;
pub const ODPG_PATTERN_DATA_HIGH: u32 = 0x16bc;
pub const ODPG_WRITE_DATA_ERROR: u32 = 0x16cc;
pub const ODPG_STATUS_DONE: u32 = 0x16fc;
pub const ODPG_TRAINING_STATUS: u32 = 0x18488;
pub const ODPG_ENABLE: u32 = 0x186d4;
/// The BIST done flag shares the enable register.
pub const ODPG_BIST_DONE: u32 = ODPG_ENABLE;

pub const ODPG_ENABLE_BIT: Field = Field::bit(ODPG_ENABLE, 0);
pub const ODPG_BIST_DONE_BIT: Field = Field::bit(ODPG_BIST_DONE, 0);
pub const ODPG_TRAINING_STATUS_DONE: Field = Field::bit(ODPG_TRAINING_STATUS, 1);
pub const ODPG_TRIGGER_START: Field = Field::bit(ODPG_TRAINING_TRIGGER, 0);
pub const ODPG_TRIGGER_DONE: Field = Field::bit(ODPG_TRAINING_TRIGGER, 1);
pub const ODPG_TRIGGER_FAIL: Field = Field::bit(ODPG_TRAINING_TRIGGER, 2);

/// Mode bits [1:0] together with the chip-select bits [27:26].
pub const ODPG_DATA_CTRL_MODE_CS_MASK: u32 = 0x0c00_0003;
/// Bits written by [regs::OdpgDataControl] burst configuration.
pub const ODPG_DATA_CTRL_BURST_MASK: u32 = 0xafff_fffc;

/// Per-lane (byte granularity) result and mask register.
pub const RESULT_CONTROL_BYTE_BASE: u32 = 0x1830;
/// Per-bit result and mask registers, eight consecutive words per lane.
pub const RESULT_CONTROL_BIT_BASE: u32 = 0x1938;
/// Number of lanes with result registers.
pub const RESULT_LANES: u8 = 5;

/// Result registers use bit 24 to exclude an element from the search.
pub const RESULT_MASK_BIT: u32 = 1 << 24;
/// Search locked on an edge.
pub const RESULT_LOCK_BIT: u32 = 1 << 25;

pub const fn result_byte_reg(lane: u8) -> u32 {
    RESULT_CONTROL_BYTE_BASE + 4 * lane as u32
}

pub const fn result_bit_reg(lane: u8, bit: u8) -> u32 {
    RESULT_CONTROL_BIT_BASE + 4 * (lane as u32 * 8 + bit as u32)
}

/// Register default values restored once training has finished.
///
/// Entries are `(offset, value, mask)`.
pub const ODPG_DEFAULTS: &[(u32, u32, u32)] = &[
    (0x1034, 0x38000, crate::MASK_ALL_BITS),
    (0x1038, 0x0, crate::MASK_ALL_BITS),
    (0x10b0, 0x0, crate::MASK_ALL_BITS),
    (0x10b8, 0x0, crate::MASK_ALL_BITS),
    (0x10c0, 0x0, crate::MASK_ALL_BITS),
    (0x10f0, 0x0, crate::MASK_ALL_BITS),
    (0x10f4, 0x0, crate::MASK_ALL_BITS),
    (0x10f8, 0xff, crate::MASK_ALL_BITS),
    (0x10fc, 0xffff, crate::MASK_ALL_BITS),
    (0x1130, 0x0, crate::MASK_ALL_BITS),
    (0x1830, 0x2000000, crate::MASK_ALL_BITS),
    (0x14d0, 0x0, crate::MASK_ALL_BITS),
    (0x14d4, 0x0, crate::MASK_ALL_BITS),
    (0x14d8, 0x0, crate::MASK_ALL_BITS),
    (0x14dc, 0x0, crate::MASK_ALL_BITS),
    (0x1454, 0x0, crate::MASK_ALL_BITS),
    (0x1594, 0x0, crate::MASK_ALL_BITS),
    (0x1598, 0x0, crate::MASK_ALL_BITS),
    (0x159c, 0x0, crate::MASK_ALL_BITS),
    (0x15a0, 0x0, crate::MASK_ALL_BITS),
    (0x15a4, 0x0, crate::MASK_ALL_BITS),
    (0x15a8, 0x0, crate::MASK_ALL_BITS),
    (0x15ac, 0x0, crate::MASK_ALL_BITS),
    (0x1604, 0x0, crate::MASK_ALL_BITS),
    (0x1608, 0x0, crate::MASK_ALL_BITS),
    (0x160c, 0x0, crate::MASK_ALL_BITS),
    (0x1610, 0x0, crate::MASK_ALL_BITS),
    (0x1614, 0x0, crate::MASK_ALL_BITS),
    (0x1618, 0x0, crate::MASK_ALL_BITS),
    (0x1624, 0x0, crate::MASK_ALL_BITS),
    (0x1690, 0x0, crate::MASK_ALL_BITS),
    (0x1694, 0x0, crate::MASK_ALL_BITS),
    (0x1698, 0x0, crate::MASK_ALL_BITS),
    (0x169c, 0x0, crate::MASK_ALL_BITS),
    (0x14b8, 0x6f67, crate::MASK_ALL_BITS),
    (0x1630, 0x0, crate::MASK_ALL_BITS),
    (0x1634, 0x0, crate::MASK_ALL_BITS),
    (0x1638, 0x0, crate::MASK_ALL_BITS),
    (0x163c, 0x0, crate::MASK_ALL_BITS),
    (0x16b0, 0x0, crate::MASK_ALL_BITS),
    (0x16b4, 0x0, crate::MASK_ALL_BITS),
    (0x16b8, 0x0, crate::MASK_ALL_BITS),
    (0x16bc, 0x0, crate::MASK_ALL_BITS),
    (0x16c0, 0x0, crate::MASK_ALL_BITS),
    (0x16c4, 0x0, crate::MASK_ALL_BITS),
    (0x16c8, 0x0, crate::MASK_ALL_BITS),
    (0x16cc, 0x1, crate::MASK_ALL_BITS),
    (0x16f0, 0x1, crate::MASK_ALL_BITS),
    (0x16f4, 0x0, crate::MASK_ALL_BITS),
    (0x16f8, 0x0, crate::MASK_ALL_BITS),
    (0x16fc, 0x0, crate::MASK_ALL_BITS),
];

pub mod regs {
    use arbitrary_int::{u2, u3, u4, u6};

    #[bitbybit::bitenum(u2, exhaustive = true)]
    #[derive(Debug, PartialEq, Eq)]
    pub enum OdpgMode {
        Idle = 0b00,
        Write = 0b01,
        Read = 0b10,
        Training = 0b11,
    }

    /// ODPG data control register.
    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct OdpgDataControl {
        /// Write 1 to stop a continuous run.
        #[bit(30, rw)]
        stop: bool,
        #[bit(29, rw)]
        address_stress_jump: bool,
        #[bits(26..=27, rw)]
        cs: u2,
        #[bit(25, rw)]
        read_mode: bool,
        #[bits(21..=24, rw)]
        rx_phases: u4,
        #[bits(15..=20, rw)]
        delay_between_bursts: u6,
        #[bits(11..=14, rw)]
        tx_burst_size: u4,
        #[bits(5..=10, rw)]
        tx_phases: u6,
        #[bits(2..=4, rw)]
        single_pattern: u3,
        #[bits(0..=1, rw)]
        mode: OdpgMode,
    }

    #[bitbybit::bitenum(u1, exhaustive = true)]
    #[derive(Debug, PartialEq, Eq)]
    pub enum SearchDirection {
        LowToHigh = 0,
        HighToLow = 1,
    }

    /// Object 1 opcode register. Describes the swept control element.
    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct Obj1Opcode {
        #[bit(26, rw)]
        enable_lock: bool,
        #[bit(25, rw)]
        enable_result: bool,
        #[bits(9..=24, rw)]
        init_value: u16,
        #[bit(8, rw)]
        direction: SearchDirection,
        #[bits(0..=7, rw)]
        opcode: u8,
    }

    pub const OBJ1_OPCODE_MASK: u32 = 0xff | (1 << 8) | (0xffff << 9) | (1 << 25) | (1 << 26);

    /// Calibrated object address register. Holds the PHY register which the search sweeps.
    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct CalibObjectAddr {
        #[bits(28..=31, rw)]
        object_type: u4,
        #[bits(8..=23, rw)]
        init_value: u16,
        #[bits(0..=7, rw)]
        phy_reg: u8,
    }

    pub const CALIB_OBJ_PRFA_MASK: u32 = 0xff | (0xffff << 8) | (0xf << 24) | (0xf << 28);

    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct TrainingControl {
        /// 3 enables edge detection on the swept value, 0 only checks the state.
        #[bits(20..=21, rw)]
        edge_detect: u2,
        /// Lane whose comparator result locks the search, 0xe for all lanes.
        #[bits(14..=17, rw)]
        lock_lane: u4,
        #[bits(11..=13, rw)]
        fail_cnt: u3,
        #[bits(8..=10, rw)]
        pass_cnt: u3,
        /// Lock on a pass to fail transition.
        #[bit(7, rw)]
        lock_on_fail: bool,
        /// Search for the full pass window instead of a single transition.
        #[bit(6, rw)]
        search_window: bool,
    }

    pub const TRAINING_CTRL_MASK: u32 = 0x3
        | (0x3 << 2)
        | (0x3 << 6)
        | (1 << 5)
        | (0x7 << 8)
        | (0x7 << 11)
        | (0xf << 14)
        | (0x3 << 18)
        | (3 << 20);

    /// Search result as latched by the training result registers.
    #[bitbybit::bitfield(u32, default = 0x0, debug)]
    pub struct SearchResult {
        #[bit(25, r)]
        locked: bool,
        #[bit(24, rw)]
        masked: bool,
        #[bits(8..=15, r)]
        edge_2: u8,
        #[bits(0..=7, r)]
        edge_1: u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitrary_int::{u2, u3, u4, u6};
    use regs::*;

    #[test]
    fn test_data_control_layout() {
        let ctrl = OdpgDataControl::DEFAULT
            .with_single_pattern(u3::new(0))
            .with_tx_phases(u6::new(0x1f))
            .with_tx_burst_size(u4::new(0xf))
            .with_delay_between_bursts(u6::new(2))
            .with_rx_phases(u4::new(0xf))
            .with_read_mode(true)
            .with_cs(u2::new(1));
        assert_eq!(
            ctrl.raw_value(),
            (0x1f << 5) | (0xf << 11) | (2 << 15) | (0xf << 21) | (1 << 25) | (1 << 26)
        );
        assert_eq!(ctrl.raw_value() & !ODPG_DATA_CTRL_BURST_MASK, 0);
    }

    #[test]
    fn test_result_registers() {
        assert_eq!(result_byte_reg(0), 0x1830);
        assert_eq!(result_byte_reg(4), 0x1840);
        assert_eq!(result_bit_reg(1, 0), 0x1938 + 32);
        let res = SearchResult::new_with_raw_value(RESULT_LOCK_BIT | 0x1234);
        assert!(res.locked());
        assert_eq!(res.edge_1(), 0x34);
        assert_eq!(res.edge_2(), 0x12);
    }

    #[test]
    fn test_defaults_within_window() {
        for (offset, _, _) in ODPG_DEFAULTS {
            assert!(crate::dunit::DunitWindow::word_index(*offset).is_some());
        }
    }
}
