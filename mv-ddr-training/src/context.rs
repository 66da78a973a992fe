//! # Training context and tunables
//!
//! [TuneParams] collects the run-time knobs of a training run. They are assembled with `with_*`
//! builder methods, starting from the defaults used on Armada 38x boards.
//!
//! [TrainingContext] is the mutable state shared by all stages: the chip-select currently
//! trained, the stage currently running and the result matrix.
use crate::ids::{BUS_WIDTH_BITS, ChipSelect, InterfaceId, LaneId, MAX_INTERFACES, MAX_LANES};
use crate::results::{ResultMatrix, Stage, StageMask, TestResult};
use crate::topology::{DdrType, Temperature};

/// Default polling budget of register handshakes.
pub const DEFAULT_MAX_POLLING: u32 = 1000;
/// Default polling budget of ODPG runs, which take much longer than a register handshake.
pub const DEFAULT_ODPG_POLLING: u32 = 1_000_000;
/// Default spread in ADLL taps allowed between the window edges of the bits of one lane.
pub const DEFAULT_LANE_SKEW_TOLERANCE: u8 = 16;

/// Leveling implementation used by the write and read leveling stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelingStrategy {
    /// ODPG driven searches with per-lane result registers.
    #[default]
    PerBitEngine,
    /// Single shot hardware leveling machine.
    LegacyMachine,
}

/// Delays written by the static leveling stage instead of searching.
///
/// Both values count ADLL taps, 32 taps per clock phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticLeveling {
    pub wl: u8,
    pub rl: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneParams {
    /// Keep running after a stage failed.
    pub debug_mode: bool,
    /// Stages to run. [None] selects the default flow of the DRAM type.
    pub stage_mask: Option<StageMask>,
    pub leveling: LevelingStrategy,
    pub max_polling: u32,
    pub odpg_polling: u32,
    /// Clock to command/address delay in ps. [None] leaves the PHY default.
    pub ck_delay: Option<u32>,
    /// Reset value of the centralization registers.
    pub phy_reg3_val: u8,
    /// Offset between the write leveling and the write centralization phase.
    pub phy_reg1_val: u8,
    /// Value of the SDRAM ODT control low register.
    pub odt_config: u32,
    /// Enable the additional ODT drive during reads.
    pub odt_additional: bool,
    /// MR1 output driver impedance bits.
    pub dic: u32,
    /// MR1 nominal termination bits.
    pub rtt_nom: u32,
    /// Force 1T (false) or 2T (true) command timing.
    pub mode_2t: Option<bool>,
    /// Pad calibration update mode of the calibration machine.
    pub calibration_update_control: u8,
    /// Use the legacy leveling machine when the medium frequency is not 533 MHz.
    pub rl_mid_freq_wa: bool,
    /// Read leveling locks every DQ pin instead of the whole lane.
    pub per_bit_read_leveling: bool,
    /// Largest spread in ADLL taps of the window starts, or of the window ends, of the bits of
    /// one lane accepted by centralization.
    pub lane_skew_tolerance: u8,
    pub adll_calibration_before_init: bool,
    pub static_leveling: Option<StaticLeveling>,
    /// Overrides the temperature of every interface of the topology.
    pub temperature: Option<Temperature>,
}

impl Default for TuneParams {
    fn default() -> Self {
        Self::new()
    }
}

impl TuneParams {
    pub const fn new() -> Self {
        Self {
            debug_mode: false,
            stage_mask: None,
            leveling: LevelingStrategy::PerBitEngine,
            max_polling: DEFAULT_MAX_POLLING,
            odpg_polling: DEFAULT_ODPG_POLLING,
            ck_delay: None,
            phy_reg3_val: 0xa,
            phy_reg1_val: 8,
            odt_config: 0x0012_0012,
            odt_additional: true,
            dic: 0x2,
            rtt_nom: 0x44,
            mode_2t: None,
            calibration_update_control: 1,
            rl_mid_freq_wa: false,
            per_bit_read_leveling: false,
            lane_skew_tolerance: DEFAULT_LANE_SKEW_TOLERANCE,
            adll_calibration_before_init: false,
            static_leveling: None,
            temperature: None,
        }
    }

    pub const fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub const fn with_stage_mask(mut self, mask: StageMask) -> Self {
        self.stage_mask = Some(mask);
        self
    }

    pub const fn with_leveling(mut self, leveling: LevelingStrategy) -> Self {
        self.leveling = leveling;
        self
    }

    pub const fn with_polling(mut self, max_polling: u32, odpg_polling: u32) -> Self {
        self.max_polling = max_polling;
        self.odpg_polling = odpg_polling;
        self
    }

    pub const fn with_ck_delay(mut self, ck_delay_ps: u32) -> Self {
        self.ck_delay = Some(ck_delay_ps);
        self
    }

    pub const fn with_phy_reg3_val(mut self, value: u8) -> Self {
        self.phy_reg3_val = value;
        self
    }

    pub const fn with_odt_config(mut self, odt_config: u32, odt_additional: bool) -> Self {
        self.odt_config = odt_config;
        self.odt_additional = odt_additional;
        self
    }

    pub const fn with_drive(mut self, dic: u32, rtt_nom: u32) -> Self {
        self.dic = dic;
        self.rtt_nom = rtt_nom;
        self
    }

    pub const fn with_mode_2t(mut self, two_t: bool) -> Self {
        self.mode_2t = Some(two_t);
        self
    }

    pub const fn with_rl_mid_freq_wa(mut self, enable: bool) -> Self {
        self.rl_mid_freq_wa = enable;
        self
    }

    pub const fn with_per_bit_read_leveling(mut self, enable: bool) -> Self {
        self.per_bit_read_leveling = enable;
        self
    }

    pub const fn with_lane_skew_tolerance(mut self, taps: u8) -> Self {
        self.lane_skew_tolerance = taps;
        self
    }

    pub const fn with_adll_calibration_before_init(mut self, enable: bool) -> Self {
        self.adll_calibration_before_init = enable;
        self
    }

    /// Replace the dynamic leveling stages by fixed register values.
    pub const fn with_static_leveling(mut self, leveling: StaticLeveling) -> Self {
        self.static_leveling = Some(leveling);
        self
    }

    pub const fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Stages to run for a DRAM type.
    pub fn resolve_stage_mask(&self, ddr_type: DdrType) -> StageMask {
        if let Some(mask) = self.stage_mask {
            return mask;
        }
        let mask = match ddr_type {
            DdrType::Ddr3 => StageMask::DDR3_FLOW,
            DdrType::Ddr4 => StageMask::DDR4_FLOW,
        };
        if self.static_leveling.is_some() {
            return mask
                .with(Stage::StaticLeveling)
                .without(Stage::WriteLeveling)
                .without(Stage::ReadLeveling)
                .without(Stage::WriteLevelingTargetFreq)
                .without(Stage::ReadLevelingTargetFreq);
        }
        mask
    }
}

/// Physical DQ pin to logical DQ bit mapping of every lane.
pub type DqMap = [[[u8; BUS_WIDTH_BITS]; MAX_LANES]; MAX_INTERFACES];

const IDENTITY_DQ_MAP: DqMap = [[[0, 1, 2, 3, 4, 5, 6, 7]; MAX_LANES]; MAX_INTERFACES];

/// State shared by the stages of one training run.
#[derive(Debug, Clone)]
pub struct TrainingContext {
    pub params: TuneParams,
    pub stage_mask: StageMask,
    /// Chip-select the per rank stages currently train.
    pub effective_cs: ChipSelect,
    pub stage: Option<Stage>,
    pub results: ResultMatrix,
    /// Filled by the DQ mapping stage, identity until then.
    pub dq_map: DqMap,
}

impl TrainingContext {
    pub fn new(params: TuneParams, ddr_type: DdrType) -> Self {
        Self {
            stage_mask: params.resolve_stage_mask(ddr_type),
            params,
            effective_cs: ChipSelect::CS0,
            stage: None,
            results: ResultMatrix::new(),
            dq_map: IDENTITY_DQ_MAP,
        }
    }

    /// Stage currently running, [Stage::InitController] outside of a run.
    #[inline]
    pub fn current_stage(&self) -> Stage {
        self.stage.unwrap_or(Stage::InitController)
    }

    /// Record a result of the current stage.
    pub fn record(&mut self, if_id: InterfaceId, result: TestResult) {
        let stage = self.current_stage();
        // A failure on one chip-select is not overwritten by a pass on the next one.
        if result == TestResult::Success && self.results.get(stage, if_id) == TestResult::Failed {
            return;
        }
        self.results.set(stage, if_id, result);
    }

    /// Logical DQ bit which drives a physical pin.
    #[inline]
    pub fn logical_dq(&self, if_id: InterfaceId, lane: LaneId, pin: u8) -> u8 {
        self.dq_map[if_id.index()][lane.index()][pin as usize & 0x7]
    }

    /// Reset the per run state, keeping the tunables.
    pub fn reset(&mut self) {
        self.effective_cs = ChipSelect::CS0;
        self.stage = None;
        self.results.reset();
    }
}
