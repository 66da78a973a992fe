//! Simulated Dunit used by the unit tests.
//!
//! The model keeps a plain register file per interface and implements the few registers with
//! side effects the engine relies on: the PHY access handshake, the self clearing command and
//! status bits, the ODPG search, the leveling machines and a byte addressed DRAM.
use std::collections::BTreeMap;
use std::vec;
use std::vec::Vec;

use mv_ddr::dunit::*;
use mv_ddr::dunit::regs::SDRAM_OP_BUSY_MASK;
use mv_ddr::odpg::*;
use mv_ddr::phy::{
    CRX_PHY_REG, CS_REG_OFFSET, CTX_PHY_REG, LaneCast, PBS_TX_PHY_REG, PhyAccessCommand, PhyBank,
    PhyOperation, RL_PHY_REG, WL_PHY_REG, csn_iob_vref_reg,
};

use crate::backend::{FrequencyController, RegisterBackend};
use crate::calibration::dq_map::{MPR_LOCATION_STRIDE, MPR_PATTERNS};
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::{BUS_WIDTH_BITS, InterfaceId, LaneId, MAX_INTERFACES, MAX_LANES};

const PHY_REGS: usize = 256;

/// Vertical extent of a pass window. The window is full height at `centre` and closes
/// linearly until it vanishes `height` vref taps away from it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Eye {
    pub centre: u8,
    pub height: u8,
}

impl Eye {
    fn window(self, window: (u8, u8), vref: u8) -> Option<(u8, u8)> {
        let dist = (vref as i32 - self.centre as i32).abs();
        let height = self.height as i32;
        if dist >= height {
            return None;
        }
        let mid = (window.0 as i32 + window.1 as i32) / 2;
        let half = (window.1 as i32 - window.0 as i32) / 2 * (height - dist) / height;
        Some(((mid - half) as u8, (mid + half) as u8))
    }
}

/// Behaviour of one byte lane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LaneModel {
    /// ODPG searches lock.
    pub locks: bool,
    /// The read leveling machine locks.
    pub rl_locks: bool,
    /// The write leveling machine locks.
    pub wl_locks: bool,
    /// Pass window of the lane, reported by low to high and high to low searches.
    pub window: (u8, u8),
    pub bit_skew: [u8; BUS_WIDTH_BITS],
    /// Logical DQ bit routed to each physical pin.
    pub dq_perm: [u8; BUS_WIDTH_BITS],
    pub rl_tap: u8,
    pub wl_tap: u8,
    /// Read back word offset, models a write leveling result off by whole clocks.
    pub read_shift: i8,
    /// Searches sweeping this PHY register never lock.
    pub fail_reg: Option<u8>,
    /// Read window against the receiver vref of the PHY.
    pub rx_eye: Option<Eye>,
    /// Write window against the VrefDQ tap of the DRAM.
    pub tx_eye: Option<Eye>,
}

impl Default for LaneModel {
    fn default() -> Self {
        Self {
            locks: true,
            rl_locks: true,
            wl_locks: true,
            window: (10, 40),
            bit_skew: [0; BUS_WIDTH_BITS],
            dq_perm: [0, 1, 2, 3, 4, 5, 6, 7],
            rl_tap: 0x45,
            wl_tap: 0x2c,
            read_shift: 0,
            fail_reg: None,
            rx_eye: None,
            tx_eye: None,
        }
    }
}

pub(crate) struct SimBackend {
    regs: [BTreeMap<u32, u32>; MAX_INTERFACES],
    phy: Vec<u16>,
    dram: [BTreeMap<u32, u32>; MAX_INTERFACES],
    pub lanes: [[LaneModel; MAX_LANES]; MAX_INTERFACES],
    phy_stuck: bool,
    /// Interfaces whose ODPG never finishes a search.
    pub search_hangs: [bool; MAX_INTERFACES],
    /// Every register write as `(interface, offset, value)`.
    pub writes: Vec<(u8, u32, u32)>,
    pub delay_ms_total: u64,
    pub searches: u32,
}

impl SimBackend {
    pub fn new() -> Self {
        let mut sim = Self {
            regs: core::array::from_fn(|_| BTreeMap::new()),
            phy: vec![0; MAX_INTERFACES * 2 * MAX_LANES * PHY_REGS],
            dram: core::array::from_fn(|_| BTreeMap::new()),
            lanes: [[LaneModel::default(); MAX_LANES]; MAX_INTERFACES],
            phy_stuck: false,
            search_hangs: [false; MAX_INTERFACES],
            writes: Vec::new(),
            delay_ms_total: 0,
            searches: 0,
        };
        for regs in sim.regs.iter_mut() {
            regs.insert(PHY_LOCK_STATUS, PHY_LOCK_ALL);
        }
        sim
    }

    pub fn reg(&self, if_id: InterfaceId, offset: u32) -> u32 {
        self.regs[if_id.index()].get(&offset).copied().unwrap_or(0)
    }

    pub fn set_reg(&mut self, if_id: InterfaceId, offset: u32, value: u32) {
        self.regs[if_id.index()].insert(offset, value);
    }

    /// The PHY never clears the go bit.
    pub fn set_phy_stuck(&mut self, stuck: bool) {
        self.phy_stuck = stuck;
    }

    pub fn lane_mut(&mut self, if_id: InterfaceId, lane: LaneId) -> &mut LaneModel {
        &mut self.lanes[if_id.index()][lane.index()]
    }

    /// Apply a change to every lane of every interface.
    pub fn all_lanes(&mut self, f: impl Fn(&mut LaneModel)) {
        self.lanes.iter_mut().flatten().for_each(f);
    }

    fn phy_index(if_id: InterfaceId, bank: PhyBank, lane: usize, reg: u8) -> usize {
        let bank = match bank {
            PhyBank::Data => 0,
            PhyBank::Control => 1,
        };
        ((if_id.index() * 2 + bank) * MAX_LANES + lane) * PHY_REGS + reg as usize
    }

    pub fn phy(&self, if_id: InterfaceId, bank: PhyBank, lane: LaneId, reg: u8) -> u16 {
        self.phy[Self::phy_index(if_id, bank, lane.index(), reg)]
    }

    pub fn set_phy(&mut self, if_id: InterfaceId, bank: PhyBank, lane: LaneId, reg: u8, v: u16) {
        self.phy[Self::phy_index(if_id, bank, lane.index(), reg)] = v;
    }

    /// Number of writes of `value` to `offset` on any interface.
    pub fn count_writes(&self, offset: u32, value: u32) -> usize {
        self.writes
            .iter()
            .filter(|(_, off, v)| *off == offset && *v == value)
            .count()
    }

    fn phy_command(&mut self, if_id: InterfaceId, value: u32) -> u32 {
        let cmd = PhyAccessCommand::new_with_raw_value(value);
        if !cmd.go() || self.phy_stuck {
            return value;
        }
        let reg = cmd.reg();
        let lane = cmd.lane().value() as usize % MAX_LANES;
        let done = value & !(1 << 31);
        match cmd.operation() {
            PhyOperation::Write => {
                let lanes = match cmd.lane_cast() {
                    LaneCast::Multicast => 0..MAX_LANES,
                    LaneCast::Unicast => lane..lane + 1,
                };
                for lane in lanes {
                    self.phy[Self::phy_index(if_id, cmd.bank(), lane, reg)] = cmd.data();
                }
                done
            }
            PhyOperation::Read => {
                let data = self.phy[Self::phy_index(if_id, cmd.bank(), lane, reg)];
                (done & !0xffff) | data as u32
            }
        }
    }

    fn run_search(&mut self, if_id: InterfaceId) {
        self.searches += 1;
        let i = if_id.index();
        if self.reg(if_id, TRAINING_SW_2) & 1 != 0 {
            let write_leveling = self.reg(if_id, WR_LEVELING_DQS_PATTERN) & 1 != 0;
            for lane in 0..MAX_LANES {
                let model = self.lanes[i][lane];
                let byte_reg = result_byte_reg(lane as u8);
                let masked = self.reg(if_id, byte_reg) & RESULT_MASK_BIT;
                let (locks, tap) = if write_leveling {
                    (model.wl_locks, model.wl_tap)
                } else {
                    (model.rl_locks, model.rl_tap)
                };
                let value = if locks { RESULT_LOCK_BIT | tap as u32 } else { 0 };
                self.set_reg(if_id, byte_reg, masked | value);
                if write_leveling {
                    continue;
                }
                for bit in 0..BUS_WIDTH_BITS {
                    let reg = result_bit_reg(lane as u8, bit as u8);
                    let masked = self.reg(if_id, reg) & RESULT_MASK_BIT;
                    let tap = tap.saturating_add(model.bit_skew[bit]);
                    let value = if locks { RESULT_LOCK_BIT | tap as u32 } else { 0 };
                    self.set_reg(if_id, reg, masked | value);
                }
            }
        } else {
            let high_to_low = (self.reg(if_id, ODPG_OBJ1_OPCODE) >> 8) & 1 == 1;
            let phy_reg = (self.reg(if_id, CALIB_OBJ_PRFA) & 0xff) as u8;
            for lane in 0..MAX_LANES {
                let model = self.lanes[i][lane];
                let window = self.lane_window(if_id, lane, phy_reg);
                let locks = model.locks && model.fail_reg != Some(phy_reg) && window.is_some();
                let window = window.unwrap_or(model.window);
                let mut lane_edge: Option<u8> = None;
                for bit in 0..BUS_WIDTH_BITS {
                    let base = if high_to_low { window.1 } else { window.0 };
                    let edge = base.saturating_add(model.bit_skew[bit]);
                    let reg = result_bit_reg(lane as u8, bit as u8);
                    let masked = self.reg(if_id, reg) & RESULT_MASK_BIT;
                    let value = if locks {
                        RESULT_LOCK_BIT | ((edge as u32) << 8) | edge as u32
                    } else {
                        0
                    };
                    self.set_reg(if_id, reg, masked | value);
                    lane_edge = Some(match (lane_edge, high_to_low) {
                        (None, _) => edge,
                        (Some(e), false) => e.max(edge),
                        (Some(e), true) => e.min(edge),
                    });
                }
                let byte_reg = result_byte_reg(lane as u8);
                let masked = self.reg(if_id, byte_reg) & RESULT_MASK_BIT;
                let value = match lane_edge {
                    Some(edge) if locks => RESULT_LOCK_BIT | ((edge as u32) << 8) | edge as u32,
                    _ => 0,
                };
                self.set_reg(if_id, byte_reg, masked | value);
            }
        }
        let status = self.reg(if_id, ODPG_TRAINING_STATUS);
        self.set_reg(if_id, ODPG_TRAINING_STATUS, status | 0x2);
        let enable = self.reg(if_id, ODPG_ENABLE);
        self.set_reg(if_id, ODPG_ENABLE, enable | 0x1);
    }

    /// Pass window of a lane for a search sweeping `phy_reg`, [None] outside of its eye.
    fn lane_window(&self, if_id: InterfaceId, lane: usize, phy_reg: u8) -> Option<(u8, u8)> {
        let model = self.lanes[if_id.index()][lane];
        if phy_reg >= PBS_TX_PHY_REG {
            return Some(model.window);
        }
        let cs = phy_reg / CS_REG_OFFSET;
        let eye = match phy_reg % CS_REG_OFFSET {
            CRX_PHY_REG => model.rx_eye.map(|eye| {
                let reg = csn_iob_vref_reg(cs);
                (eye, self.phy[Self::phy_index(if_id, PhyBank::Data, lane, reg)] as u8)
            }),
            CTX_PHY_REG => model.tx_eye.map(|eye| {
                let mr6 = self.reg(if_id, DDR4_MR6);
                let value = (mr6 & MR6_VREF_VALUE) as u8;
                let tap = if mr6 & MR6_VREF_RANGE_2 != 0 { value } else { value + 23 };
                (eye, tap)
            }),
            _ => None,
        };
        match eye {
            Some((eye, vref)) => eye.window(model.window, vref),
            None => Some(model.window),
        }
    }

    /// Single shot leveling machine writes its results straight into the PHY.
    fn run_legacy_leveling(&mut self, if_id: InterfaceId, value: u32) {
        for lane in 0..MAX_LANES {
            let model = self.lanes[if_id.index()][lane];
            if value & 0x40 != 0 && model.rl_locks {
                let v = model.rl_tap as u16;
                self.phy[Self::phy_index(if_id, PhyBank::Data, lane, RL_PHY_REG)] = v;
            }
            if value & 0x8 != 0 && model.wl_locks {
                let v = model.wl_tap as u16;
                self.phy[Self::phy_index(if_id, PhyBank::Data, lane, WL_PHY_REG)] = v;
            }
        }
    }

    fn mpr_word(&self, if_id: InterfaceId, addr: u32) -> u32 {
        let pattern = MPR_PATTERNS
            .get(((addr / MPR_LOCATION_STRIDE) % 4) as usize)
            .copied()
            .unwrap_or(0);
        let mut word = 0;
        for lane in 0..4 {
            let perm = self.lanes[if_id.index()][lane].dq_perm;
            let mut byte = 0u32;
            for (pin, logical) in perm.iter().enumerate() {
                byte |= (((pattern >> logical) & 1) as u32) << pin;
            }
            word |= byte << (8 * lane);
        }
        word
    }
}

impl RegisterBackend for SimBackend {
    fn read(&mut self, if_id: InterfaceId, offset: u32) -> u32 {
        self.reg(if_id, offset)
    }

    fn write(&mut self, if_id: InterfaceId, offset: u32, value: u32) {
        self.writes.push((if_id.raw(), offset, value));
        let value = match offset {
            PHY_REG_FILE_ACCESS => self.phy_command(if_id, value),
            SDRAM_OP => value & !SDRAM_OP_BUSY_MASK,
            SDRAM_INIT_CTRL => value & !1,
            DFS => {
                if value & (1 << 2) != 0 {
                    value | (1 << 3)
                } else {
                    value & !(1 << 3)
                }
            }
            TRAINING => {
                if value & (1 << 31) != 0 {
                    self.run_legacy_leveling(if_id, value);
                }
                value & !(1 << 31)
            }
            ODPG_TRAINING_TRIGGER if value & 1 != 0 && self.search_hangs[if_id.index()] => {
                let status = self.reg(if_id, ODPG_TRAINING_STATUS);
                self.set_reg(if_id, ODPG_TRAINING_STATUS, status & !0x2);
                value & !0x3
            }
            ODPG_TRAINING_TRIGGER if value & 1 != 0 => {
                self.run_search(if_id);
                (value & !1) | 0x2
            }
            _ => value,
        };
        self.set_reg(if_id, offset, value);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay_ms_total += ms as u64;
    }

    fn dram_write(&mut self, if_id: InterfaceId, addr: u32, data: &[u32]) -> Result<(), Error> {
        for (i, word) in data.iter().enumerate() {
            self.dram[if_id.index()].insert(addr + 4 * i as u32, *word);
        }
        Ok(())
    }

    fn dram_read(&mut self, if_id: InterfaceId, addr: u32, data: &mut [u32]) -> Result<(), Error> {
        let mpr = self.reg(if_id, MR3) & MR3_MPR_ENABLE != 0;
        let len = data.len() as i64;
        for (i, word) in data.iter_mut().enumerate() {
            let a = addr + 4 * i as u32;
            if mpr {
                *word = self.mpr_word(if_id, a);
                continue;
            }
            let mut value = 0;
            for lane in 0..4 {
                let src = i as i64 + self.lanes[if_id.index()][lane].read_shift as i64;
                if !(0..len).contains(&src) {
                    continue;
                }
                let stored = self.dram[if_id.index()]
                    .get(&(addr + 4 * src as u32))
                    .copied()
                    .unwrap_or(0);
                value |= stored & (0xff << (8 * lane));
            }
            *word = value;
        }
        Ok(())
    }
}

/// Records every divider change.
#[derive(Default)]
pub(crate) struct SimFreq {
    pub changes: Vec<(InterfaceId, DdrFreq)>,
}

impl FrequencyController for SimFreq {
    fn set_divider(
        &mut self,
        _backend: &mut dyn RegisterBackend,
        if_id: InterfaceId,
        freq: DdrFreq,
    ) -> Result<(), Error> {
        self.changes.push((if_id, freq));
        Ok(())
    }
}
