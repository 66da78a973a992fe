//! # ODPG search engine
//!
//! The on-die pattern generator plays a training pattern to or from the DRAM while the Dunit
//! sweeps one PHY delay element. For every bit (or byte lane) the comparator latches the tap at
//! which the pass/fail state changed into the training result registers.
//!
//! [ip_training] runs one search in one direction. [ip_training_wrapper] runs the low to high and
//! the high to low search which together bound the pass window of every bit, and retries bits
//! whose window does not look plausible.
use arbitrary_int::{u2, u3, u4, u6};
use mv_ddr::MASK_ALL_BITS;
use mv_ddr::dunit::{DUAL_DUNIT_CFG_CS_SINGLE, SDRAM_ODT_CTRL_HIGH};
use mv_ddr::odpg::regs::{
    CALIB_OBJ_PRFA_MASK, CalibObjectAddr, OBJ1_OPCODE_MASK, Obj1Opcode, OdpgDataControl,
    OdpgMode, SearchResult, TRAINING_CTRL_MASK, TrainingControl,
};
use mv_ddr::odpg::*;
use mv_ddr::phy::{
    CRX_PHY_REG, CS_PBS_OFFSET, CTX_PHY_REG, PBS_RX_BCAST_PHY_REG, PBS_TX_BCAST_PHY_REG, cs_reg,
};

pub use mv_ddr::odpg::regs::SearchDirection;

use crate::access::{Access, LaneAccess, RegisterAccess};
use crate::backend::RegisterBackend;
use crate::error::Error;
use crate::ids::{
    BUS_WIDTH_BITS, ChipSelect, InterfaceId, InterfaceMask, LaneId, MAX_INTERFACES, MAX_LANES,
};
use crate::pattern::{PatternId, PatternInfo};
use crate::topology::TopologyMap;

/// Number of ADLL taps of one clock phase.
pub const ADLL_TAPS_PER_PERIOD: u8 = 64;
/// Highest tap of the low half of the ADLL range.
pub const ADLL_LOW_HALF_MAX: u8 = 31;

/// Search windows wider than this are treated as two merged windows.
const MAX_PLAUSIBLE_WINDOW: u8 = 33;
const MAX_PLAUSIBLE_START: u8 = 67;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Delay element swept by a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlElement {
    /// Centralization ADLL of the lane.
    Adll,
    /// Per-bit skew (PBS) broadcast register of the lane.
    DqSkew,
}

/// Transition the comparator locks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCompare {
    PassFail,
    FailPass,
    PassFailPass,
    FailPassFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    PerBit,
    PerByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsType {
    /// Only the chip-select of the search is enabled.
    Single,
    Multi,
}

/// Parameters of one ODPG search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub lanes: LaneAccess,
    pub result_type: ResultType,
    pub element: ControlElement,
    pub search: SearchDirection,
    pub direction: Direction,
    /// Start tap of the low to high search.
    pub init_value: u16,
    /// Start tap of the high to low search.
    pub end_value: u16,
    pub num_iter: u16,
    pub pattern: PatternId,
    pub edge: EdgeCompare,
    pub cs_type: CsType,
    pub cs: ChipSelect,
}

impl SearchParams {
    /// Per-bit full window search over the 32 taps of the low ADLL half.
    pub const fn new(direction: Direction, element: ControlElement, pattern: PatternId) -> Self {
        Self {
            lanes: LaneAccess::Multicast,
            result_type: ResultType::PerBit,
            element,
            search: SearchDirection::LowToHigh,
            direction,
            init_value: 0,
            end_value: ADLL_LOW_HALF_MAX as u16,
            num_iter: ADLL_LOW_HALF_MAX as u16,
            pattern,
            edge: EdgeCompare::FailPassFail,
            cs_type: CsType::Single,
            cs: ChipSelect::CS0,
        }
    }

    pub const fn with_lanes(mut self, lanes: LaneAccess) -> Self {
        self.lanes = lanes;
        self
    }

    pub const fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    pub const fn with_search(mut self, search: SearchDirection) -> Self {
        self.search = search;
        self
    }

    /// Sweep from `start` to `end`, one iteration per tap.
    pub const fn with_range(mut self, start: u16, end: u16) -> Self {
        self.init_value = start;
        self.end_value = end;
        self.num_iter = end.saturating_sub(start);
        self
    }

    pub const fn with_num_iter(mut self, num_iter: u16) -> Self {
        self.num_iter = num_iter;
        self
    }

    pub const fn with_edge(mut self, edge: EdgeCompare) -> Self {
        self.edge = edge;
        self
    }

    pub const fn with_cs(mut self, cs: ChipSelect, cs_type: CsType) -> Self {
        self.cs = cs;
        self.cs_type = cs_type;
        self
    }

    /// PHY register of lane 0 the search sweeps.
    pub const fn object_reg(&self) -> u8 {
        let cs = self.cs.raw();
        match (self.element, self.direction) {
            (ControlElement::DqSkew, Direction::Read) => PBS_RX_BCAST_PHY_REG + cs * CS_PBS_OFFSET,
            (ControlElement::DqSkew, Direction::Write) => {
                PBS_TX_BCAST_PHY_REG + cs * CS_PBS_OFFSET
            }
            (ControlElement::Adll, Direction::Write) => cs_reg(CTX_PHY_REG, cs),
            (ControlElement::Adll, Direction::Read) => cs_reg(CRX_PHY_REG, cs),
        }
    }

    fn start_value(&self) -> u16 {
        match self.search {
            SearchDirection::LowToHigh => self.init_value,
            SearchDirection::HighToLow => self.end_value,
        }
    }
}

/// Training control register for an edge compare mode.
pub fn training_control(edge: EdgeCompare, lanes: LaneAccess) -> TrainingControl {
    let lock_lane = match lanes {
        LaneAccess::Multicast => 0xe,
        LaneAccess::Unicast(lane) => lane.raw(),
    };
    let edge_detect = match edge {
        EdgeCompare::FailPass | EdgeCompare::FailPassFail => 0,
        _ => 3,
    };
    TrainingControl::DEFAULT
        .with_search_window(!matches!(edge, EdgeCompare::PassFail | EdgeCompare::FailPass))
        .with_lock_on_fail(matches!(
            edge,
            EdgeCompare::PassFail | EdgeCompare::PassFailPass
        ))
        .with_pass_cnt(u3::new(7))
        .with_fail_cnt(u3::new(7))
        .with_lock_lane(u4::new(lock_lane & 0xf))
        .with_edge_detect(u2::new(edge_detect))
}

/// Burst shape of a pattern for a direction.
pub fn burst_control(info: &PatternInfo, direction: Direction, cs: ChipSelect) -> OdpgDataControl {
    let (burst, delay, read_mode) = match direction {
        Direction::Write => (info.tx_burst, info.delay_between_bursts, true),
        Direction::Read => (0, 0, false),
    };
    OdpgDataControl::DEFAULT
        .with_single_pattern(u3::new(0))
        .with_tx_phases(u6::new(info.tx_phases & 0x3f))
        .with_tx_burst_size(u4::new(burst & 0xf))
        .with_delay_between_bursts(u6::new(delay & 0x3f))
        .with_rx_phases(u4::new(info.rx_phases & 0xf))
        .with_read_mode(read_mode)
        .with_cs(u2::new(cs.raw() & 0x3))
        .with_address_stress_jump(false)
}

/// Program the burst shape, leaving the mode and chip-select bits untouched.
pub fn configure_odpg<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    access: Access,
    ctrl: OdpgDataControl,
) {
    acc.if_write(access, ODPG_DATA_CTRL, ctrl.raw_value(), ODPG_DATA_CTRL_BURST_MASK);
}

fn mode_and_cs(mode: OdpgMode, cs: ChipSelect) -> u32 {
    OdpgDataControl::DEFAULT
        .with_mode(mode)
        .with_cs(u2::new(cs.raw() & 0x3))
        .raw_value()
}

/// Stream a pattern into the ODPG pattern buffer and set its playback address.
pub fn load_pattern_to_odpg<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    access: Access,
    pattern: PatternId,
    bus_16bit: bool,
) {
    let info = pattern.info(bus_16bit);
    for entry in 0..info.len as usize {
        acc.if_write(access, ODPG_PATTERN_DATA_LOW, pattern.word(2 * entry), MASK_ALL_BITS);
        acc.if_write(access, ODPG_PATTERN_DATA_HIGH, pattern.word(2 * entry + 1), MASK_ALL_BITS);
        acc.if_write(access, ODPG_PATTERN_ADDR, entry as u32, MASK_ALL_BITS);
    }
    acc.if_write(access, ODPG_PATTERN_ADDR_OFFSET, info.start_addr, MASK_ALL_BITS);
}

/// Mask the result registers which do not take part in the search.
fn set_result_masks<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
    access: Access,
    params: &SearchParams,
) {
    let per_bit = params.result_type == ResultType::PerBit;
    for lane in LaneId::all() {
        let active = tm.lane_act_mask.contains(lane)
            && match params.lanes {
                LaneAccess::Multicast => true,
                LaneAccess::Unicast(searched) => searched == lane,
            };
        let bit_mask = if per_bit && active { 0 } else { RESULT_MASK_BIT };
        for bit in 0..BUS_WIDTH_BITS as u8 {
            acc.if_write(access, result_bit_reg(lane.raw(), bit), bit_mask, RESULT_MASK_BIT);
        }
        let byte_mask = if !per_bit && active { 0 } else { RESULT_MASK_BIT };
        acc.if_write(access, result_byte_reg(lane.raw()), byte_mask, RESULT_MASK_BIT);
    }
}

/// Run one search and wait for the ODPG to finish.
///
/// Returns the interfaces whose search timed out or reported a failure. Their result registers
/// are not valid, the other interfaces completed normally.
pub fn ip_training<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
    access: Access,
    params: &SearchParams,
    odpg_polling: u32,
) -> Result<InterfaceMask, Error> {
    let bus_16bit = tm.is_bus_16bit();
    let info = params.pattern.info(bus_16bit);
    log::trace!(
        "search {:?} {:?} {:?} pattern {:?} reg {:#x}",
        params.direction,
        params.element,
        params.search,
        params.pattern,
        params.object_reg()
    );

    acc.write_field(
        access,
        DUAL_DUNIT_CFG_CS_SINGLE,
        (params.cs_type == CsType::Single) as u32,
    )?;
    acc.if_write(
        access,
        ODPG_DATA_CTRL,
        mode_and_cs(OdpgMode::Training, params.cs),
        ODPG_DATA_CTRL_MODE_CS_MASK,
    );
    load_pattern_to_odpg(acc, access, params.pattern, bus_16bit);
    configure_odpg(acc, access, burst_control(info, params.direction, params.cs));
    let mode = match params.direction {
        Direction::Read => 0x60,
        Direction::Write => (3 << 30) | 0xfa,
    };
    acc.if_write(access, ODPG_WRITE_READ_MODE_ENABLE, mode, MASK_ALL_BITS);
    acc.if_write(
        access,
        ODPG_TRAINING_CTRL,
        training_control(params.edge, params.lanes).raw_value(),
        TRAINING_CTRL_MASK,
    );
    let start = params.start_value();
    let opcode = Obj1Opcode::DEFAULT
        .with_opcode(1)
        .with_direction(params.search)
        .with_init_value(start)
        .with_enable_result(true)
        .with_enable_lock(true);
    acc.if_write(access, ODPG_OBJ1_OPCODE, opcode.raw_value(), OBJ1_OPCODE_MASK);
    acc.if_write(access, ODPG_OBJ1_ITER_CNT, params.num_iter as u32, 0xffff);
    let object = CalibObjectAddr::DEFAULT
        .with_phy_reg(params.object_reg())
        .with_init_value(start)
        .with_object_type(u4::new(6));
    acc.if_write(access, CALIB_OBJ_PRFA, object.raw_value(), CALIB_OBJ_PRFA_MASK);
    set_result_masks(acc, tm, access, params);

    acc.write_field(access, ODPG_TRIGGER_START, 1)?;
    acc.delay_ms(1);
    let mut failed = InterfaceMask::default();
    for if_id in acc.targets(access).iter() {
        if let Err(err) = finish_search(acc, if_id, odpg_polling) {
            log::error!("if {}: {}", if_id, err);
            failed = failed.with(if_id);
        }
    }
    acc.if_write(access, ODPG_DATA_CTRL, 0, MASK_ALL_BITS);
    Ok(failed)
}

/// Wait for the search of one interface and acknowledge it.
fn finish_search<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    if_id: InterfaceId,
    odpg_polling: u32,
) -> Result<(), Error> {
    let access = Access::Unicast(if_id);
    acc.poll(access, 1 << 1, 1 << 1, ODPG_TRAINING_STATUS, odpg_polling)?;
    acc.poll(access, 1, 1, ODPG_BIST_DONE, odpg_polling)?;
    acc.write_field(access, ODPG_BIST_DONE_BIT, 0)?;
    acc.if_write(access, ODPG_STATUS_DONE, 0, 1);
    acc.poll(access, 1 << 1, 1 << 1, ODPG_TRAINING_TRIGGER, odpg_polling)?;
    if acc.read_field(if_id, ODPG_TRIGGER_FAIL) != 0 {
        return Err(Error::SearchFailed { if_id });
    }
    Ok(())
}

/// Raw result registers of one lane. Per-byte results are stored in slot 0.
pub type LaneResults = [u32; BUS_WIDTH_BITS];

#[inline]
pub fn is_locked(raw: u32) -> bool {
    SearchResult::new_with_raw_value(raw).locked()
}

#[inline]
pub fn edge_1(raw: u32) -> u8 {
    SearchResult::new_with_raw_value(raw).edge_1()
}

#[inline]
pub fn edge_2(raw: u32) -> u8 {
    SearchResult::new_with_raw_value(raw).edge_2()
}

/// Read the result registers of one lane after a search.
///
/// With `validity` set, unlocked results are replaced by a locked result at 64 taps plus the
/// given offset.
pub fn read_training_result<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    if_id: InterfaceId,
    lane: LaneId,
    result_type: ResultType,
    validity: Option<u8>,
) -> LaneResults {
    let mut results = [0; BUS_WIDTH_BITS];
    match result_type {
        ResultType::PerBit => {
            for (bit, slot) in results.iter_mut().enumerate() {
                *slot = acc.if_read(if_id, result_bit_reg(lane.raw(), bit as u8), MASK_ALL_BITS);
            }
        }
        ResultType::PerByte => {
            results[0] = acc.if_read(if_id, result_byte_reg(lane.raw()), MASK_ALL_BITS);
        }
    }
    if let Some(cons_tap) = validity {
        let slots = match result_type {
            ResultType::PerBit => &mut results[..],
            ResultType::PerByte => &mut results[..1],
        };
        for raw in slots.iter_mut().filter(|raw| !is_locked(**raw)) {
            *raw = RESULT_LOCK_BIT + ADLL_TAPS_PER_PERIOD as u32 + cons_tap as u32;
        }
    }
    results
}

/// Edge selection of [process_result].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSelect {
    Min,
    Max,
}

/// Smallest or largest edge of a set of results, [None] if any of them did not lock.
pub fn process_result(results: &[u32], select: EdgeSelect) -> Option<u8> {
    if results.iter().any(|raw| !is_locked(*raw)) {
        return None;
    }
    let edges = results.iter().map(|raw| edge_1(*raw));
    match select {
        EdgeSelect::Min => edges.min(),
        EdgeSelect::Max => edges.max(),
    }
}

/// Raw results of one search on every interface and lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    raw: [[LaneResults; MAX_LANES]; MAX_INTERFACES],
}

impl Default for SearchResults {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchResults {
    pub const fn new() -> Self {
        Self {
            raw: [[[0; BUS_WIDTH_BITS]; MAX_LANES]; MAX_INTERFACES],
        }
    }

    #[inline]
    pub fn lane(&self, if_id: InterfaceId, lane: LaneId) -> &LaneResults {
        &self.raw[if_id.index()][lane.index()]
    }

    #[inline]
    pub fn lane_mut(&mut self, if_id: InterfaceId, lane: LaneId) -> &mut LaneResults {
        &mut self.raw[if_id.index()][lane.index()]
    }

    fn read<B: RegisterBackend>(
        acc: &mut RegisterAccess<B>,
        tm: &TopologyMap,
        access: Access,
        result_type: ResultType,
        validity: Option<u8>,
    ) -> Self {
        let mut results = Self::new();
        for if_id in acc.targets(access).iter() {
            for lane in tm.lane_act_mask.iter() {
                *results.lane_mut(if_id, lane) =
                    read_training_result(acc, if_id, lane, result_type, validity);
            }
        }
        results
    }
}

/// Low to high and high to low results of a window search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowResults {
    pub l2h: SearchResults,
    pub h2l: SearchResults,
    /// Interfaces on which one of the searches did not complete.
    pub failed: InterfaceMask,
}

impl WindowResults {
    /// Window `(start, end)` of one bit, [None] unless both searches locked.
    pub fn bit_window(&self, if_id: InterfaceId, lane: LaneId, bit: usize) -> Option<(u8, u8)> {
        if self.failed.contains(if_id) {
            return None;
        }
        let start = self.l2h.lane(if_id, lane)[bit];
        let end = self.h2l.lane(if_id, lane)[bit];
        (is_locked(start) && is_locked(end)).then(|| (edge_1(start), edge_1(end)))
    }

    /// Windows of all bits of a lane, [None] if any bit did not lock.
    pub fn lane_windows(
        &self,
        if_id: InterfaceId,
        lane: LaneId,
    ) -> Option<[(u8, u8); BUS_WIDTH_BITS]> {
        let mut windows = [(0, 0); BUS_WIDTH_BITS];
        for (bit, window) in windows.iter_mut().enumerate() {
            *window = self.bit_window(if_id, lane, bit)?;
        }
        Some(windows)
    }
}

fn implausible(raw: u32) -> bool {
    let e1 = edge_1(raw);
    let e2 = edge_2(raw);
    is_locked(raw) && e2.wrapping_sub(e1).wrapping_add(1) > MAX_PLAUSIBLE_WINDOW && e1 < MAX_PLAUSIBLE_START
}

/// Run the low to high and high to low searches of a window.
///
/// Bits whose first search reported a window too wide to be real are searched again with the
/// fail to pass comparator over half the range.
pub fn ip_training_wrapper<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
    access: Access,
    params: &SearchParams,
    odpg_polling: u32,
) -> Result<WindowResults, Error> {
    let edge = match params.edge {
        EdgeCompare::FailPassFail => EdgeCompare::FailPass,
        edge => edge,
    };
    let base = params.with_edge(edge);
    let l2h = base.with_search(SearchDirection::LowToHigh);
    let failed = ip_training(acc, tm, access, &l2h, odpg_polling)?;
    let mut results = WindowResults {
        l2h: SearchResults::read(acc, tm, access, params.result_type, None),
        h2l: SearchResults::new(),
        failed,
    };
    let h2l = base.with_search(SearchDirection::HighToLow);
    results.failed = results
        .failed
        .union(ip_training(acc, tm, access, &h2l, odpg_polling)?);
    results.h2l = SearchResults::read(acc, tm, access, params.result_type, None);

    let retry = acc
        .targets(access)
        .iter()
        .filter(|if_id| !results.failed.contains(*if_id))
        .any(|if_id| {
            tm.lane_act_mask
                .iter()
                .any(|lane| results.l2h.lane(if_id, lane).iter().any(|raw| implausible(*raw)))
        });
    if !retry {
        return Ok(results);
    }

    log::debug!("retrying implausible windows with fail to pass compare");
    let cons_tap = match params.direction {
        Direction::Write => ADLL_TAPS_PER_PERIOD,
        Direction::Read => 0,
    };
    let half = base
        .with_edge(EdgeCompare::FailPass)
        .with_num_iter(params.num_iter / 2);
    let mut retry_failed =
        ip_training(acc, tm, access, &half.with_search(SearchDirection::LowToHigh), odpg_polling)?;
    let retry_l2h = SearchResults::read(acc, tm, access, params.result_type, Some(0));
    retry_failed = retry_failed.union(ip_training(
        acc,
        tm,
        access,
        &half.with_search(SearchDirection::HighToLow),
        odpg_polling,
    )?);
    let retry_h2l = SearchResults::read(acc, tm, access, params.result_type, Some(cons_tap));
    results.failed = results.failed.union(retry_failed);
    for if_id in acc.targets(access).iter() {
        for lane in tm.lane_act_mask.iter() {
            for bit in 0..BUS_WIDTH_BITS {
                if implausible(results.l2h.lane(if_id, lane)[bit]) {
                    results.l2h.lane_mut(if_id, lane)[bit] = retry_l2h.lane(if_id, lane)[bit];
                    results.h2l.lane_mut(if_id, lane)[bit] = retry_h2l.lane(if_id, lane)[bit];
                }
            }
        }
    }
    Ok(results)
}

/// Classification of the windows of the bits of one lane relative to the ADLL half period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteStatus(u8);

impl ByteStatus {
    /// Some bit did not lock.
    pub const NOT_DEFINED: Self = Self(0);
    /// Some window is centred in the low half.
    pub const LOW: Self = Self(1 << 0);
    /// Some window is centred in the high half.
    pub const HIGH: Self = Self(1 << 1);
    /// Windows in both halves, the low ones wrapped around the period.
    pub const MIX: Self = Self(1 << 4);

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn is_defined(self) -> bool {
        self.0 != 0
    }

    /// Low windows of this lane need the wraparound correction.
    #[inline]
    pub const fn wraps(self) -> bool {
        self.contains(Self::LOW.union(Self::MIX))
    }
}

/// Classify the windows of the bits of a lane.
pub fn byte_status(windows: &[(u8, u8)]) -> ByteStatus {
    let mut status = ByteStatus::NOT_DEFINED;
    for (start, end) in windows {
        let centre = (*start as u16 + *end as u16) / 2;
        status = status.union(if centre <= ADLL_LOW_HALF_MAX as u16 {
            ByteStatus::LOW
        } else {
            ByteStatus::HIGH
        });
    }
    if status.contains(ByteStatus::LOW.union(ByteStatus::HIGH)) {
        status = status.union(ByteStatus::MIX);
    }
    status
}

/// Move a low window of a wrapping lane by one ADLL period.
pub fn wraparound_correct(start: u8, end: u8, status: ByteStatus) -> (u8, u8) {
    let centre = (start as u16 + end as u16) / 2;
    if status.wraps() && centre <= ADLL_LOW_HALF_MAX as u16 {
        return (start + ADLL_TAPS_PER_PERIOD, end + ADLL_TAPS_PER_PERIOD);
    }
    (start, end)
}

/// Play the configured pattern once and wait for the ODPG to finish.
pub fn run_once<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    access: Access,
    odpg_polling: u32,
) -> Result<(), Error> {
    acc.write_field(access, ODPG_ENABLE_BIT, 1)?;
    acc.delay_ms(1);
    acc.poll(access, 1, 1, ODPG_BIST_DONE, odpg_polling)?;
    acc.write_field(access, ODPG_BIST_DONE_BIT, 0)
}

/// Start playback without waiting. The ODPG repeats the pattern until [stop] is called.
pub fn run_continuous<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    access: Access,
) -> Result<(), Error> {
    acc.write_field(access, ODPG_ENABLE_BIT, 1)
}

/// Stop playback and return the ODPG to idle.
pub fn stop<B: RegisterBackend>(acc: &mut RegisterAccess<B>, access: Access) {
    acc.if_write(
        access,
        ODPG_DATA_CTRL,
        OdpgDataControl::DEFAULT.with_stop(true).raw_value(),
        0x3 << 30,
    );
    acc.if_write(access, ODPG_DATA_CTRL, 0, MASK_ALL_BITS);
}

/// Write a pattern into DRAM through the ODPG write mode.
pub fn load_pattern_to_mem<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
    access: Access,
    pattern: PatternId,
    cs: ChipSelect,
    odpg_polling: u32,
) -> Result<(), Error> {
    let bus_16bit = tm.is_bus_16bit();
    let info = pattern.info(bus_16bit);
    let ctrl = burst_control(info, Direction::Write, cs).with_mode(OdpgMode::Write);
    acc.if_write(access, ODPG_DATA_CTRL, ctrl.raw_value(), MASK_ALL_BITS);
    acc.if_write(
        access,
        ODPG_DATA_CTRL,
        mode_and_cs(OdpgMode::Write, cs),
        ODPG_DATA_CTRL_MODE_CS_MASK,
    );
    acc.if_write(access, ODPG_WRITE_DATA_ERROR, 0, 1);
    load_pattern_to_odpg(acc, access, pattern, bus_16bit);
    acc.if_write(access, SDRAM_ODT_CTRL_HIGH, 0x3, 0xf);
    run_once(acc, access, odpg_polling)?;
    stop(acc, access);
    acc.if_write(access, SDRAM_ODT_CTRL_HIGH, 0, 0xf);
    acc.delay_ms(1);
    Ok(())
}

/// Write every training pattern into the DRAM of one chip-select.
pub fn load_all_patterns<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
    access: Access,
    cs: ChipSelect,
    odpg_polling: u32,
) -> Result<(), Error> {
    for pattern in PatternId::ALL {
        load_pattern_to_mem(acc, tm, access, pattern, cs, odpg_polling)?;
    }
    log::debug!("all patterns loaded for cs {}", cs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq::DdrFreq;
    use crate::ids::{InterfaceMask, LaneMask};
    use crate::sim::SimBackend;
    use crate::speed_bin::SpeedBin;
    use crate::topology::{BusWidth, DdrType, InterfaceParams, MemSize};

    fn setup() -> (RegisterAccess<SimBackend>, TopologyMap) {
        let tm = TopologyMap::new(
            DdrType::Ddr3,
            InterfaceMask::new(0x1),
            LaneMask::new(0xf),
            InterfaceParams::new(SpeedBin::Ddr3_1600K, DdrFreq::Mhz800, BusWidth::X8, MemSize::Mem4G),
        );
        (RegisterAccess::new(SimBackend::new(), tm.if_act_mask, 1000), tm)
    }

    #[test]
    fn test_training_control_encoding() {
        let fpf = training_control(EdgeCompare::FailPassFail, LaneAccess::Multicast).raw_value();
        assert_eq!(fpf, (1 << 6) | (7 << 8) | (7 << 11) | (0xe << 14));
        let pf = training_control(EdgeCompare::PassFail, LaneAccess::Unicast(LaneId::ECC))
            .raw_value();
        assert_eq!(pf, (1 << 7) | (7 << 8) | (7 << 11) | (4 << 14) | (3 << 20));
    }

    #[test]
    fn test_object_register() {
        let cs1 = ChipSelect::new(1).unwrap();
        let p = SearchParams::new(Direction::Read, ControlElement::Adll, PatternId::Vref)
            .with_cs(cs1, CsType::Single);
        assert_eq!(p.object_reg(), 3 + 4);
        let p = SearchParams::new(Direction::Write, ControlElement::DqSkew, PatternId::Vref)
            .with_cs(cs1, CsType::Single);
        assert_eq!(p.object_reg(), 0x2f);
    }

    #[test]
    fn test_process_result() {
        let locked = |edge: u32| RESULT_LOCK_BIT | edge;
        let results = [locked(12), locked(9), locked(15)];
        assert_eq!(process_result(&results, EdgeSelect::Min), Some(9));
        assert_eq!(process_result(&results, EdgeSelect::Max), Some(15));
        assert_eq!(process_result(&[locked(3), 0x3], EdgeSelect::Min), None);
    }

    #[test]
    fn test_search_masks_and_results() {
        let (mut acc, tm) = setup();
        acc.backend().lane_mut(InterfaceId::IF0, LaneId::new(1).unwrap()).bit_skew[3] = 4;
        let params = SearchParams::new(Direction::Read, ControlElement::Adll, PatternId::KillerDq0);
        let results = ip_training_wrapper(&mut acc, &tm, Access::Multicast, &params, 100).unwrap();
        let lane1 = LaneId::new(1).unwrap();
        assert_eq!(results.bit_window(InterfaceId::IF0, lane1, 3), Some((14, 44)));
        assert_eq!(results.bit_window(InterfaceId::IF0, lane1, 2), Some((10, 40)));
        let sim = acc.backend();
        assert_eq!(sim.reg(InterfaceId::IF0, result_byte_reg(0)) & RESULT_MASK_BIT, RESULT_MASK_BIT);
        assert_eq!(sim.reg(InterfaceId::IF0, result_bit_reg(4, 0)) & RESULT_MASK_BIT, RESULT_MASK_BIT);
        assert_eq!(sim.reg(InterfaceId::IF0, result_bit_reg(0, 0)) & RESULT_MASK_BIT, 0);
        assert_eq!(sim.reg(InterfaceId::IF0, ODPG_DATA_CTRL), 0);
        assert_eq!(sim.searches, 2);
    }

    #[test]
    fn test_hung_interface_does_not_hide_others() {
        let (_, mut tm) = setup();
        tm.if_act_mask = InterfaceMask::new(0x3);
        let mut acc = RegisterAccess::new(SimBackend::new(), tm.if_act_mask, 1000);
        let if1 = InterfaceId::new(1).unwrap();
        acc.backend().search_hangs[if1.index()] = true;
        let params = SearchParams::new(Direction::Read, ControlElement::Adll, PatternId::KillerDq0);
        let results = ip_training_wrapper(&mut acc, &tm, Access::Multicast, &params, 100).unwrap();
        assert_eq!(results.failed, InterfaceMask::new(0x2));
        assert_eq!(results.bit_window(InterfaceId::IF0, LaneId::LANE0, 0), Some((10, 40)));
        assert!(results.lane_windows(if1, LaneId::LANE0).is_none());
        // Both interfaces were released from training mode.
        assert_eq!(acc.backend().reg(if1, ODPG_DATA_CTRL), 0);
    }

    #[test]
    fn test_unlocked_lane() {
        let (mut acc, tm) = setup();
        acc.backend().lane_mut(InterfaceId::IF0, LaneId::new(2).unwrap()).locks = false;
        let params = SearchParams::new(Direction::Write, ControlElement::Adll, PatternId::KillerDq0);
        let results = ip_training_wrapper(&mut acc, &tm, Access::Multicast, &params, 100).unwrap();
        assert!(results.lane_windows(InterfaceId::IF0, LaneId::new(2).unwrap()).is_none());
        assert!(results.lane_windows(InterfaceId::IF0, LaneId::new(3).unwrap()).is_some());
        let raw = read_training_result(
            &mut acc,
            InterfaceId::IF0,
            LaneId::new(2).unwrap(),
            ResultType::PerBit,
            Some(ADLL_TAPS_PER_PERIOD),
        );
        assert_eq!(edge_1(raw[0]), 128);
        assert!(is_locked(raw[0]));
    }

    #[test]
    fn test_wraparound_correction() {
        let status = byte_status(&[(28, 33), (60, 70)]);
        assert!(status.wraps());
        assert_eq!(wraparound_correct(28, 33, status), (92, 97));
        assert_eq!(wraparound_correct(60, 70, status), (60, 70));
        let low_only = byte_status(&[(28, 33), (10, 20)]);
        assert_eq!(low_only, ByteStatus::LOW);
        assert_eq!(wraparound_correct(28, 33, low_only), (28, 33));
    }

    #[test]
    fn test_load_pattern_to_mem() {
        let (mut acc, tm) = setup();
        load_pattern_to_mem(&mut acc, &tm, Access::Multicast, PatternId::Rl, ChipSelect::CS0, 100).unwrap();
        let sim = acc.backend();
        assert_eq!(sim.reg(InterfaceId::IF0, ODPG_PATTERN_ADDR_OFFSET), 0x100);
        assert_eq!(sim.reg(InterfaceId::IF0, ODPG_PATTERN_ADDR), 3);
        assert_eq!(sim.reg(InterfaceId::IF0, SDRAM_ODT_CTRL_HIGH) & 0xf, 0);
        assert_eq!(sim.reg(InterfaceId::IF0, ODPG_ENABLE) & 1, 0);
        assert_eq!(sim.count_writes(ODPG_PATTERN_DATA_HIGH, PatternId::Rl.word(1)), 4);
    }

    #[test]
    fn test_continuous_playback_stopped() {
        let (mut acc, _) = setup();
        acc.if_write(Access::Multicast, ODPG_DATA_CTRL, 0x1234, MASK_ALL_BITS);
        run_continuous(&mut acc, Access::Multicast).unwrap();
        assert_eq!(acc.backend().reg(InterfaceId::IF0, ODPG_ENABLE) & 1, 1);
        stop(&mut acc, Access::Multicast);
        let sim = acc.backend();
        assert_eq!(sim.reg(InterfaceId::IF0, ODPG_DATA_CTRL), 0);
        let stop_bit = OdpgDataControl::DEFAULT.with_stop(true).raw_value() & (0x3 << 30);
        assert_eq!(sim.count_writes(ODPG_DATA_CTRL, 0x1234 | stop_bit), 1);
    }
}
