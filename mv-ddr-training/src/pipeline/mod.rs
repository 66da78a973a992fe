//! # Training pipeline
//!
//! [Pipeline] owns the register access layer, the frequency controller, the topology and the
//! [TrainingContext] of a run. [Pipeline::auto_tune] runs the stages in their fixed order:
//!
//! 1. Reset the leveling and centralization PHY registers of every chip-select.
//! 2. Initialize the controller at the boot frequency, or write static leveling values.
//! 3. Drop to the low frequency and load all training patterns into DRAM.
//! 4. Switch to the medium frequency, run write leveling, reload the patterns, run read leveling
//!    and the write leveling supplement. Then trim the per-bit skew.
//! 5. Switch to the target frequency and repeat write and read leveling.
//! 6. DDR3: calibrate the receiver vref and centralize the read and write windows.
//!    DDR4: map the DQ pins, then sweep the receiver duty cycle and the transmit vref.
//! 7. Restore the ODPG and calibration registers to their functional values.
//!
//! Every stage is gated by the stage mask of the context. A stage records one result per
//! interface. Without debug mode the first failed stage stops the run.
use crate::access::{Access, RegisterAccess};
use crate::backend::{FrequencyController, RegisterBackend};
use crate::context::{TrainingContext, TuneParams};
use crate::diag;
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::{ChipSelect, InterfaceMask};
use crate::results::{ResultMatrix, Stage, TestResult};
use crate::topology::TopologyMap;

pub mod centralization;
pub mod controller;
pub mod dq_map;
pub mod dq_vref;
pub mod eye;
pub mod freq;
pub mod leveling;
pub mod pbs;
pub mod receiver;
pub mod wl_supp;

/// Training engine of one memory controller.
pub struct Pipeline<B, F> {
    acc: RegisterAccess<B>,
    freq_ctrl: F,
    tm: TopologyMap,
    ctx: TrainingContext,
    target_freq: DdrFreq,
    medium_freq: DdrFreq,
    /// Frequency the DRAM currently runs at.
    current_freq: DdrFreq,
}

impl<B: RegisterBackend, F: FrequencyController> Pipeline<B, F> {
    /// Validate and complete the topology and set up a training run.
    pub fn new(backend: B, freq_ctrl: F, mut tm: TopologyMap, params: TuneParams) -> Result<Self, Error> {
        tm.validate()?;
        tm.topology_map_update()?;
        if let Some(temperature) = params.temperature {
            for interface in tm.interfaces.iter_mut() {
                interface.temperature = temperature;
            }
        }
        if params.debug_mode {
            diag::print_topology(&tm);
        }
        let first = tm.first_active_interface()?;
        let target_freq = tm.interface(first).memory_freq;
        let medium_freq = freq_ctrl.medium_freq(target_freq);
        log::debug!(
            "{:?} topology, interfaces {:#x}, lanes {:#x}, target {}, medium {}",
            tm.ddr_type,
            tm.if_act_mask.raw(),
            tm.lane_act_mask.raw(),
            target_freq,
            medium_freq
        );
        Ok(Self {
            acc: RegisterAccess::new(backend, tm.if_act_mask, params.max_polling),
            freq_ctrl,
            ctx: TrainingContext::new(params, tm.ddr_type),
            tm,
            target_freq,
            medium_freq,
            current_freq: target_freq,
        })
    }

    #[inline]
    pub fn topology(&self) -> &TopologyMap {
        &self.tm
    }

    #[inline]
    pub fn context(&self) -> &TrainingContext {
        &self.ctx
    }

    #[inline]
    pub fn results(&self) -> &ResultMatrix {
        &self.ctx.results
    }

    #[inline]
    pub fn access(&mut self) -> &mut RegisterAccess<B> {
        &mut self.acc
    }

    #[inline]
    pub fn frequency_controller(&mut self) -> &mut F {
        &mut self.freq_ctrl
    }

    #[inline]
    pub fn target_freq(&self) -> DdrFreq {
        self.target_freq
    }

    #[inline]
    pub fn medium_freq(&self) -> DdrFreq {
        self.medium_freq
    }

    #[inline]
    pub fn current_freq(&self) -> DdrFreq {
        self.current_freq
    }

    /// Give back the register backend and the frequency controller.
    pub fn release(self) -> (B, F) {
        (self.acc.into_backend(), self.freq_ctrl)
    }

    #[inline]
    pub(crate) fn active(&self) -> InterfaceMask {
        self.tm.if_act_mask
    }

    #[inline]
    pub(crate) fn polling(&self) -> u32 {
        self.ctx.params.odpg_polling
    }

    /// Run the whole training flow and check the result matrix.
    pub fn auto_tune(&mut self) -> Result<(), Error> {
        self.ctx.reset();
        let flow = self.main_flow();
        diag::print_log(&self.tm, &self.ctx);
        let failure = self.ctx.results.first_failure(self.active());
        if flow.is_err() || failure.is_some() {
            if let Err(err) = diag::print_stability_log(&mut self.acc, &self.tm) {
                log::warn!("stability log incomplete: {}", err);
            }
            match diag::leveling_csv(&mut self.acc, &self.tm) {
                Ok(table) => log::info!("leveling taps:\n{}", table),
                Err(err) => log::warn!("leveling taps unavailable: {}", err),
            }
        }
        flow?;
        if let Some((stage, if_id)) = failure {
            log::error!("{} failed on interface {}", stage, if_id);
            return Err(Error::StageFailed(stage));
        }
        Ok(())
    }

    fn main_flow(&mut self) -> Result<(), Error> {
        let max_cs = self.tm.max_cs() as usize;
        for cs in ChipSelect::all().take(max_cs) {
            self.ctx.effective_cs = cs;
            self.reset_phy_regs()?;
        }
        self.ctx.effective_cs = ChipSelect::CS0;

        if self.ctx.params.adll_calibration_before_init {
            self.adll_calibration(DdrFreq::Low)?;
        }

        let medium = self.medium_freq;
        let target = self.target_freq;

        self.run_stage(Stage::InitController, Self::init_controller)?;
        self.run_stage(Stage::StaticLeveling, Self::static_leveling)?;
        self.run_stage(Stage::SetLowFreq, |p| p.freq_set(DdrFreq::Low))?;
        self.run_stage_per_cs(Stage::LoadPattern, Self::load_patterns)?;
        self.run_stage(Stage::SetMediumFreq, |p| p.freq_set(medium))?;
        self.run_stage(Stage::WriteLeveling, |p| p.write_leveling(medium))?;
        self.run_stage_per_cs(Stage::LoadPattern2, Self::load_patterns)?;
        self.run_stage(Stage::ReadLeveling, |p| p.read_leveling(medium))?;
        self.run_stage(Stage::WriteLevelingSupplement, Self::write_leveling_supp)?;
        self.run_stage_per_cs(Stage::PbsRx, Self::pbs_rx)?;
        self.run_stage_per_cs(Stage::PbsTx, Self::pbs_tx)?;
        self.run_stage(Stage::SetTargetFreq, |p| p.freq_set(target))?;
        self.run_stage(Stage::WriteLevelingTargetFreq, |p| p.write_leveling(target))?;
        self.run_stage(Stage::LoadPatternHigh, Self::load_patterns)?;
        self.run_stage(Stage::ReadLevelingTargetFreq, |p| p.read_leveling(target))?;

        self.run_stage(Stage::DqMapping, Self::dq_mapping)?;
        self.run_stage_per_cs(Stage::ReceiverCalibration, Self::receiver_calibration)?;
        self.run_stage_per_cs(Stage::VrefCalibration, Self::vref_calibration)?;
        self.run_stage_per_cs(Stage::CentralizationRx, Self::centralization_rx)?;
        self.run_stage_per_cs(Stage::WriteLevelingSupplementTargetFreq, Self::write_leveling_supp)?;
        self.run_stage_per_cs(Stage::DqVrefCalibration, Self::dq_vref_calibration)?;
        self.run_stage_per_cs(Stage::CentralizationTx, Self::centralization_tx)?;

        self.ctx.stage = None;
        self.restore_dunit_regs()
    }

    /// Run one stage if it is enabled and record its outcome.
    pub(crate) fn run_stage(
        &mut self,
        stage: Stage,
        f: impl FnOnce(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if !self.ctx.stage_mask.contains(stage) {
            return Ok(());
        }
        self.ctx.stage = Some(stage);
        log::info!("{} start", stage);
        let completed = match f(self) {
            Ok(()) => true,
            Err(err) => {
                self.record_error(stage, err);
                false
            }
        };
        self.finish_stage(stage, completed)
    }

    /// Run a stage once for every chip-select.
    pub(crate) fn run_stage_per_cs(
        &mut self,
        stage: Stage,
        mut f: impl FnMut(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if !self.ctx.stage_mask.contains(stage) {
            return Ok(());
        }
        self.ctx.stage = Some(stage);
        let max_cs = self.tm.max_cs() as usize;
        let mut completed = true;
        for cs in ChipSelect::all().take(max_cs) {
            self.ctx.effective_cs = cs;
            log::info!("{} start, cs {}", stage, cs);
            if let Err(err) = f(self) {
                self.record_error(stage, err);
                completed = false;
                if !self.ctx.params.debug_mode {
                    break;
                }
            }
        }
        self.ctx.effective_cs = ChipSelect::CS0;
        self.finish_stage(stage, completed)
    }

    fn record_error(&mut self, stage: Stage, err: Error) {
        log::error!("{} failed: {}", stage, err);
        match err.interface() {
            Some(if_id) => self.ctx.results.set(stage, if_id, TestResult::Failed),
            None => self.ctx.results.set_all(stage, self.active(), TestResult::Failed),
        }
    }

    /// Settle the results of a stage.
    ///
    /// Interfaces without a result of their own pass only if the stage ran to its end. An
    /// aborted stage did not train them, so they fail.
    fn finish_stage(&mut self, stage: Stage, completed: bool) -> Result<(), Error> {
        let active = self.active();
        for if_id in active.iter() {
            if self.ctx.results.get(stage, if_id) != TestResult::NotRun {
                continue;
            }
            if !completed {
                log::error!("{} aborted before interface {} was trained", stage, if_id);
            }
            let result = if completed { TestResult::Success } else { TestResult::Failed };
            self.ctx.results.set(stage, if_id, result);
        }
        if self.ctx.results.any_failed(stage, active) {
            if !self.ctx.params.debug_mode {
                return Err(Error::StageFailed(stage));
            }
            log::warn!("{} failed, continuing in debug mode", stage);
        } else {
            log::info!("{} done", stage);
        }
        Ok(())
    }

    /// Write every training pattern into the DRAM of the effective chip-select.
    ///
    /// Each interface is loaded on its own so a hung ODPG only fails its interface.
    fn load_patterns(&mut self) -> Result<(), Error> {
        let polling = self.polling();
        let cs = self.ctx.effective_cs;
        for if_id in self.active().iter() {
            let access = Access::Unicast(if_id);
            match crate::odpg::load_all_patterns(&mut self.acc, &self.tm, access, cs, polling) {
                Ok(()) => {}
                Err(err) if err.interface() == Some(if_id) => {
                    log::error!("if {}: pattern load failed: {}", if_id, err);
                    self.ctx.record(if_id, TestResult::Failed);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mv_ddr::phy::{CRX_PHY_REG, CTX_PHY_REG, PhyBank, RL_PHY_REG, WL_PHY_REG};
    use crate::context::LevelingStrategy;
    use crate::ids::{InterfaceId, LaneId, LaneMask};
    use crate::results::StageMask;
    use crate::sim::{SimBackend, SimFreq};
    use crate::speed_bin::SpeedBin;
    use crate::topology::{BusWidth, DdrType, InterfaceParams, MemSize};

    pub(crate) fn ddr3_topology() -> TopologyMap {
        TopologyMap::new(
            DdrType::Ddr3,
            InterfaceMask::new(0x1),
            LaneMask::new(0xf),
            InterfaceParams::new(SpeedBin::Ddr3_1600K, DdrFreq::Mhz800, BusWidth::X8, MemSize::Mem4G),
        )
    }

    pub(crate) fn pipeline(params: TuneParams) -> Pipeline<SimBackend, SimFreq> {
        Pipeline::new(SimBackend::new(), SimFreq::default(), ddr3_topology(), params).unwrap()
    }

    pub(crate) fn pipeline_with(
        tm: TopologyMap,
        params: TuneParams,
        setup: impl FnOnce(&mut SimBackend),
    ) -> Pipeline<SimBackend, SimFreq> {
        let mut sim = SimBackend::new();
        setup(&mut sim);
        Pipeline::new(sim, SimFreq::default(), tm, params).unwrap()
    }

    #[test]
    fn test_frequencies() {
        let p = pipeline(TuneParams::new());
        assert_eq!(p.target_freq(), DdrFreq::Mhz800);
        assert_eq!(p.medium_freq(), DdrFreq::Mhz400);
        assert_eq!(p.topology().interface(InterfaceId::IF0).cas_l, 11);
    }

    #[test]
    fn test_ddr3_full_flow_passes() {
        let mut p = pipeline(TuneParams::new());
        p.auto_tune().unwrap();
        for stage in StageMask::DDR3_FLOW.iter() {
            assert_eq!(p.results().get(stage, InterfaceId::IF0), TestResult::Success, "{}", stage);
        }
        assert_eq!(p.results().get(Stage::DqMapping, InterfaceId::IF0), TestResult::NotRun);
        let (_, freq) = p.release();
        let freqs: std::vec::Vec<DdrFreq> = freq.changes.iter().map(|(_, f)| *f).collect();
        assert_eq!(freqs, [DdrFreq::Low, DdrFreq::Mhz400, DdrFreq::Mhz800]);
    }

    #[test]
    fn test_ddr4_flow_passes() {
        let if0 = InterfaceId::IF0;
        let lane1 = LaneId::new(1).unwrap();
        let mut tm = ddr3_topology();
        tm.ddr_type = DdrType::Ddr4;
        let mut p = pipeline_with(tm, TuneParams::new(), |sim| {
            sim.lane_mut(if0, lane1).dq_perm = [1, 0, 2, 3, 4, 5, 6, 7]
        });
        p.auto_tune().unwrap();
        for stage in StageMask::DDR4_FLOW.iter() {
            assert_eq!(p.results().get(stage, if0), TestResult::Success, "{}", stage);
        }
        assert_eq!(p.results().get(Stage::CentralizationRx, if0), TestResult::NotRun);
        assert_eq!(p.context().logical_dq(if0, lane1, 0), 1);
    }

    #[test]
    fn test_read_leveling_failure_halts() {
        let mut p = pipeline_with(ddr3_topology(), TuneParams::new().with_polling(20, 100), |sim| {
            sim.all_lanes(|lane| lane.rl_locks = false)
        });
        let err = p.auto_tune().unwrap_err();
        assert_eq!(err, Error::StageFailed(Stage::ReadLeveling));
        let if0 = InterfaceId::IF0;
        assert_eq!(p.results().get(Stage::WriteLeveling, if0), TestResult::Success);
        assert_eq!(p.results().get(Stage::ReadLeveling, if0), TestResult::Failed);
        assert_eq!(p.results().get(Stage::WriteLevelingSupplement, if0), TestResult::NotRun);
    }

    #[test]
    fn test_debug_mode_runs_everything() {
        let params = TuneParams::new().with_polling(20, 100).with_debug_mode(true);
        let mut p = pipeline_with(ddr3_topology(), params, |sim| {
            sim.lane_mut(InterfaceId::IF0, LaneId::new(1).unwrap()).rl_locks = false
        });
        let err = p.auto_tune().unwrap_err();
        assert_eq!(err, Error::StageFailed(Stage::ReadLeveling));
        assert_eq!(
            p.results().get(Stage::CentralizationTx, InterfaceId::IF0),
            TestResult::Success
        );
    }

    #[test]
    fn test_stage_mask_gates_stages() {
        let mask = StageMask::NONE.with(Stage::InitController).with(Stage::SetLowFreq);
        let mut p = pipeline(TuneParams::new().with_stage_mask(mask));
        p.auto_tune().unwrap();
        let if0 = InterfaceId::IF0;
        assert_eq!(p.results().get(Stage::SetLowFreq, if0), TestResult::Success);
        assert_eq!(p.results().get(Stage::WriteLeveling, if0), TestResult::NotRun);
        assert_eq!(p.context().effective_cs, ChipSelect::CS0);
    }

    #[test]
    fn test_legacy_machine_flow() {
        let mut p = pipeline(TuneParams::new().with_leveling(LevelingStrategy::LegacyMachine));
        p.auto_tune().unwrap();
        assert_eq!(
            p.results().get(Stage::ReadLeveling, InterfaceId::IF0),
            TestResult::Success
        );
    }

    fn lane_delays(p: &mut Pipeline<SimBackend, SimFreq>, if_id: InterfaceId) -> [[u16; 4]; 4] {
        let mut delays = [[0; 4]; 4];
        for (raw, slot) in delays.iter_mut().enumerate() {
            let lane = LaneId::new(raw as u8).unwrap();
            for (reg, value) in [WL_PHY_REG, RL_PHY_REG, CRX_PHY_REG, CTX_PHY_REG].iter().zip(slot.iter_mut()) {
                *value = p.access().bus_read(if_id, lane, PhyBank::Data, *reg).unwrap();
            }
        }
        delays
    }

    #[test]
    fn test_failures_stay_per_interface() {
        let (if0, if1) = (InterfaceId::IF0, InterfaceId::new(1).unwrap());
        let mut reference = pipeline(TuneParams::new());
        reference.auto_tune().unwrap();
        let expected = lane_delays(&mut reference, if0);

        let mut tm = ddr3_topology();
        tm.if_act_mask = InterfaceMask::new(0x3);
        let params = TuneParams::new().with_polling(20, 100).with_debug_mode(true);
        let mut p = pipeline_with(tm, params, |sim| sim.search_hangs[1] = true);
        assert_eq!(p.auto_tune(), Err(Error::StageFailed(Stage::WriteLeveling)));
        for stage in [
            Stage::WriteLeveling,
            Stage::ReadLeveling,
            Stage::PbsRx,
            Stage::CentralizationRx,
            Stage::CentralizationTx,
        ] {
            assert_eq!(p.results().get(stage, if0), TestResult::Success, "{}", stage);
            assert_eq!(p.results().get(stage, if1), TestResult::Failed, "{}", stage);
        }
        // The hung interface did not disturb the delays of the healthy one.
        assert_eq!(lane_delays(&mut p, if0), expected);
    }

    #[test]
    fn test_hung_interface_halts_without_failing_others() {
        let if1 = InterfaceId::new(1).unwrap();
        let mut tm = ddr3_topology();
        tm.if_act_mask = InterfaceMask::new(0x3);
        let params = TuneParams::new().with_polling(20, 100);
        let mut p = pipeline_with(tm, params, |sim| sim.search_hangs[1] = true);
        assert_eq!(p.auto_tune(), Err(Error::StageFailed(Stage::WriteLeveling)));
        let results = p.results();
        assert_eq!(results.get(Stage::WriteLeveling, InterfaceId::IF0), TestResult::Success);
        assert_eq!(results.get(Stage::WriteLeveling, if1), TestResult::Failed);
        assert_eq!(results.get(Stage::ReadLeveling, InterfaceId::IF0), TestResult::NotRun);
    }

    #[test]
    fn test_training_twice_is_stable() {
        let if0 = InterfaceId::IF0;
        let mut p = pipeline(TuneParams::new());
        p.auto_tune().unwrap();
        let first = lane_delays(&mut p, if0);
        p.auto_tune().unwrap();
        let second = lane_delays(&mut p, if0);
        for (lane, (a, b)) in first.iter().zip(second.iter()).enumerate() {
            for (reg, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                assert!(x.abs_diff(*y) <= 1, "lane {} reg {}: {:#x} vs {:#x}", lane, reg, x, y);
            }
        }
        for stage in StageMask::DDR3_FLOW.iter() {
            assert_eq!(p.results().get(stage, if0), TestResult::Success, "{}", stage);
        }
    }
}

