//! # Training stages and their outcome
//!
//! Every stage of the pipeline records one [TestResult] per interface in the [ResultMatrix]. The
//! matrix is reset at the start of each full training run and is read by the orchestrator and by
//! the diagnostics in [crate::diag].
use crate::ids::{InterfaceId, InterfaceMask, MAX_INTERFACES};

/// Training stages in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    InitController,
    StaticLeveling,
    SetLowFreq,
    LoadPattern,
    SetMediumFreq,
    WriteLeveling,
    LoadPattern2,
    ReadLeveling,
    WriteLevelingSupplement,
    PbsRx,
    PbsTx,
    SetTargetFreq,
    WriteLevelingTargetFreq,
    LoadPatternHigh,
    ReadLevelingTargetFreq,
    /// DDR4 only.
    DqMapping,
    /// DDR4 receiver duty-cycle sweep.
    ReceiverCalibration,
    VrefCalibration,
    CentralizationRx,
    WriteLevelingSupplementTargetFreq,
    /// DDR4 transmit vref sweep.
    DqVrefCalibration,
    CentralizationTx,
}

impl Stage {
    pub const COUNT: usize = 22;

    pub const ALL: [Stage; Self::COUNT] = [
        Stage::InitController,
        Stage::StaticLeveling,
        Stage::SetLowFreq,
        Stage::LoadPattern,
        Stage::SetMediumFreq,
        Stage::WriteLeveling,
        Stage::LoadPattern2,
        Stage::ReadLeveling,
        Stage::WriteLevelingSupplement,
        Stage::PbsRx,
        Stage::PbsTx,
        Stage::SetTargetFreq,
        Stage::WriteLevelingTargetFreq,
        Stage::LoadPatternHigh,
        Stage::ReadLevelingTargetFreq,
        Stage::DqMapping,
        Stage::ReceiverCalibration,
        Stage::VrefCalibration,
        Stage::CentralizationRx,
        Stage::WriteLevelingSupplementTargetFreq,
        Stage::DqVrefCalibration,
        Stage::CentralizationTx,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit of the stage in a [StageMask].
    #[inline]
    pub const fn mask_bit(self) -> u32 {
        1 << self.index()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Stage::InitController => "INIT_CONTROLLER",
            Stage::StaticLeveling => "STATIC_LEVELING",
            Stage::SetLowFreq => "SET_LOW_FREQ",
            Stage::LoadPattern => "LOAD_PATTERN",
            Stage::SetMediumFreq => "SET_MEDIUM_FREQ",
            Stage::WriteLeveling => "WRITE_LEVELING",
            Stage::LoadPattern2 => "LOAD_PATTERN_2",
            Stage::ReadLeveling => "READ_LEVELING",
            Stage::WriteLevelingSupplement => "WRITE_LEVELING_SUPP",
            Stage::PbsRx => "PBS_RX",
            Stage::PbsTx => "PBS_TX",
            Stage::SetTargetFreq => "SET_TARGET_FREQ",
            Stage::WriteLevelingTargetFreq => "WRITE_LEVELING_TF",
            Stage::LoadPatternHigh => "LOAD_PATTERN_HIGH",
            Stage::ReadLevelingTargetFreq => "READ_LEVELING_TF",
            Stage::DqMapping => "DQ_MAPPING",
            Stage::ReceiverCalibration => "RECEIVER_CALIBRATION",
            Stage::VrefCalibration => "VREF_CALIBRATION",
            Stage::CentralizationRx => "CENTRALIZATION_RX",
            Stage::WriteLevelingSupplementTargetFreq => "WRITE_LEVELING_SUPP_TF",
            Stage::DqVrefCalibration => "DQ_VREF_CALIBRATION",
            Stage::CentralizationTx => "CENTRALIZATION_TX",
        }
    }
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of enabled stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMask(u32);

impl StageMask {
    pub const NONE: Self = Self(0);

    /// Every stage of the DDR3 flow. Static leveling is an alternative to the dynamic leveling
    /// stages and is not part of it.
    pub const DDR3_FLOW: Self = Self::NONE
        .with(Stage::InitController)
        .with(Stage::SetLowFreq)
        .with(Stage::LoadPattern)
        .with(Stage::SetMediumFreq)
        .with(Stage::WriteLeveling)
        .with(Stage::LoadPattern2)
        .with(Stage::ReadLeveling)
        .with(Stage::WriteLevelingSupplement)
        .with(Stage::PbsRx)
        .with(Stage::PbsTx)
        .with(Stage::SetTargetFreq)
        .with(Stage::WriteLevelingTargetFreq)
        .with(Stage::LoadPatternHigh)
        .with(Stage::ReadLevelingTargetFreq)
        .with(Stage::VrefCalibration)
        .with(Stage::CentralizationRx)
        .with(Stage::WriteLevelingSupplementTargetFreq)
        .with(Stage::CentralizationTx);

    /// DDR4 replaces the vref stage and both centralization stages by the geometric
    /// calibration, which centralizes at every sweep point.
    pub const DDR4_FLOW: Self = Self::DDR3_FLOW
        .without(Stage::PbsRx)
        .without(Stage::PbsTx)
        .without(Stage::VrefCalibration)
        .without(Stage::CentralizationRx)
        .without(Stage::CentralizationTx)
        .with(Stage::DqMapping)
        .with(Stage::ReceiverCalibration)
        .with(Stage::DqVrefCalibration);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, stage: Stage) -> bool {
        self.0 & stage.mask_bit() != 0
    }

    #[inline]
    pub const fn with(self, stage: Stage) -> Self {
        Self(self.0 | stage.mask_bit())
    }

    #[inline]
    pub const fn without(self, stage: Stage) -> Self {
        Self(self.0 & !stage.mask_bit())
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestResult {
    #[default]
    NotRun,
    Success,
    Failed,
}

impl TestResult {
    pub const fn as_str(self) -> &'static str {
        match self {
            TestResult::NotRun => "NOT COMPLETED",
            TestResult::Success => "PASS",
            TestResult::Failed => "FAILED",
        }
    }
}

impl core::fmt::Display for TestResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of every stage on every interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMatrix {
    results: [[TestResult; MAX_INTERFACES]; Stage::COUNT],
}

impl Default for ResultMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultMatrix {
    pub const fn new() -> Self {
        Self {
            results: [[TestResult::NotRun; MAX_INTERFACES]; Stage::COUNT],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn get(&self, stage: Stage, if_id: InterfaceId) -> TestResult {
        self.results[stage.index()][if_id.index()]
    }

    #[inline]
    pub fn set(&mut self, stage: Stage, if_id: InterfaceId, result: TestResult) {
        self.results[stage.index()][if_id.index()] = result;
    }

    /// Record the same result for all interfaces in `mask`.
    pub fn set_all(&mut self, stage: Stage, mask: InterfaceMask, result: TestResult) {
        for if_id in mask.iter() {
            self.set(stage, if_id, result);
        }
    }

    /// A stage failed on any interface of `mask`.
    pub fn any_failed(&self, stage: Stage, mask: InterfaceMask) -> bool {
        mask.iter().any(|if_id| self.get(stage, if_id) == TestResult::Failed)
    }

    /// First (stage, interface) pair of `mask` which failed.
    pub fn first_failure(&self, mask: InterfaceMask) -> Option<(Stage, InterfaceId)> {
        Stage::ALL.into_iter().find_map(|stage| {
            mask.iter()
                .find(|if_id| self.get(stage, *if_id) == TestResult::Failed)
                .map(|if_id| (stage, if_id))
        })
    }
}
