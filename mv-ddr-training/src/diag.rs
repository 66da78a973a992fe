//! # Diagnostics
//!
//! Everything here goes to the [log] facade. The result matrix dump is printed after every
//! training run, the stability log and the leveling table only when a stage failed.
use core::fmt;

use mv_ddr::MASK_ALL_BITS;
use mv_ddr::dunit::READ_DATA_SAMPLE_DELAY;
use mv_ddr::phy::{
    CRX_PHY_REG, CTX_PHY_REG, PhyBank, RL_PHY_REG, WL_PHY_REG, cs_reg, csn_iob_vref_reg,
    result_reg,
};

use crate::access::RegisterAccess;
use crate::backend::RegisterBackend;
use crate::context::TrainingContext;
use crate::error::Error;
use crate::ids::{
    ChipSelect, InterfaceId, InterfaceMask, LaneId, LaneMask, MAX_CS, MAX_INTERFACES, MAX_LANES,
};
use crate::topology::TopologyMap;

/// Pads covered by the per pad rows of the stability log.
const STABILITY_PADS: u8 = 11;
const PBS_TX_BASE: u8 = 0x10;
const PBS_RX_BASE: u8 = 0x50;
const PBS_CS_STRIDE: u8 = 0x10;
const VREF_BASE: u8 = 0xd0;
const VREF_CS_STRIDE: u8 = 12;

/// Dump the result of every enabled stage per active interface.
pub fn print_log(tm: &TopologyMap, ctx: &TrainingContext) {
    for if_id in tm.if_act_mask.iter() {
        log::info!("IF {} status:", if_id);
        for stage in ctx.stage_mask.iter() {
            log::info!("\t{}: {}", stage, ctx.results.get(stage, if_id));
        }
    }
}

/// Log the board memory geometry.
pub fn print_topology(tm: &TopologyMap) {
    log::info!("\tinterface mask: {:#x}", tm.if_act_mask.raw());
    log::info!("\tlane mask: {:#x}", tm.lane_act_mask.raw());
    for if_id in tm.if_act_mask.iter() {
        let params = tm.interface(if_id);
        log::info!("\tinterface {}: {:?}", if_id, tm.ddr_type);
        log::info!("\t\tfrequency: {}", params.memory_freq);
        log::info!("\t\tspeed bin: {:?}", params.speed_bin);
        log::info!("\t\tbus width: {:?}", params.bus_width);
        log::info!("\t\tmemory size: {:?}", params.memory_size);
        log::info!("\t\tCAS-WL: {} CAS-L: {}", params.cas_wl, params.cas_l);
        log::info!("\t\ttemperature: {:?}", params.temperature);
        for lane in tm.lane_act_mask.iter() {
            let bus = tm.bus(if_id, lane);
            log::info!(
                "\t\tlane {}: cs mask {:#x} mirror {:#x} DQS swap {} CK swap {}",
                lane,
                bus.cs_bitmask,
                bus.mirror_enable_bitmask,
                bus.is_dqs_swap,
                bus.is_ck_swap
            );
        }
    }
}

/// Leveling and centralization state of one lane and chip-select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneTaps {
    /// Raw write leveling register.
    pub wl: u16,
    /// Raw read leveling register.
    pub rl: u16,
    /// Read sample delay of the chip-select in clocks.
    pub sample: u8,
    pub ctx: u8,
    pub crx: u8,
    pub vref: u8,
}

impl LaneTaps {
    pub fn read<B: RegisterBackend>(
        acc: &mut RegisterAccess<B>,
        if_id: InterfaceId,
        cs: ChipSelect,
        lane: LaneId,
    ) -> Result<Self, Error> {
        let c = cs.raw();
        let sample = acc.if_read(if_id, READ_DATA_SAMPLE_DELAY, MASK_ALL_BITS) >> (4 * c as u32);
        Ok(Self {
            wl: acc.bus_read(if_id, lane, PhyBank::Data, cs_reg(WL_PHY_REG, c))?,
            rl: acc.bus_read(if_id, lane, PhyBank::Data, cs_reg(RL_PHY_REG, c))?,
            sample: (sample & 0xf) as u8,
            ctx: (acc.bus_read(if_id, lane, PhyBank::Data, cs_reg(CTX_PHY_REG, c))? & 0x3f) as u8,
            crx: (acc.bus_read(if_id, lane, PhyBank::Data, cs_reg(CRX_PHY_REG, c))? & 0x1f) as u8,
            vref: (acc.bus_read(if_id, lane, PhyBank::Data, csn_iob_vref_reg(c))? & 0x3f) as u8,
        })
    }

    #[inline]
    pub const fn wl_adll(&self) -> u16 {
        self.wl & 0x1f
    }

    #[inline]
    pub const fn wl_phase(&self) -> u16 {
        (self.wl & 0x1c0) >> 6
    }

    /// Write leveling delay in ADLL taps.
    #[inline]
    pub const fn wl_total(&self) -> u16 {
        self.wl_adll() + self.wl_phase() * 32
    }

    #[inline]
    pub const fn rl_adll(&self) -> u16 {
        self.rl & 0x1f
    }

    #[inline]
    pub const fn rl_phase(&self) -> u16 {
        (self.rl & 0x1c0) >> 6
    }

    /// Read leveling delay in ADLL taps, sample delay included.
    #[inline]
    pub const fn rl_total(&self) -> u16 {
        self.rl_adll() + self.rl_phase() * 32 + self.sample as u16 * 64
    }
}

/// Comma terminated list of values.
struct Csv<'a>(&'a [u16]);

impl fmt::Display for Csv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in self.0 {
            write!(f, "{},", value)?;
        }
        Ok(())
    }
}

fn read_pads<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    if_id: InterfaceId,
    lane: LaneId,
    base: u8,
) -> Result<[u16; STABILITY_PADS as usize], Error> {
    let mut values = [0; STABILITY_PADS as usize];
    for (pad, value) in values.iter_mut().enumerate() {
        *value = acc.bus_read(if_id, lane, PhyBank::Data, base + pad as u8)? & 0x3f;
    }
    Ok(values)
}

/// Log one CSV-like row per interface, chip-select and lane with the trained delays.
pub fn print_stability_log<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
) -> Result<(), Error> {
    log::info!(
        "Title: I/F#,CS,Lane,VW,WL_tot,WL_ADLL,WL_PH,RL_Tot,RL_ADLL,RL_PH,RL_Smp,Cen_tx,Cen_rx,Vref,\
         Vref-Pad0..10,PBSTx-Pad0..10,PBSRx-Pad0..10"
    );
    let max_cs = tm.max_cs() as usize;
    for if_id in tm.if_act_mask.iter() {
        for cs in ChipSelect::all().take(max_cs) {
            let c = cs.raw();
            for lane in tm.lane_act_mask.iter() {
                let taps = LaneTaps::read(acc, if_id, cs, lane)?;
                let eye = acc.bus_read(if_id, lane, PhyBank::Data, result_reg(c, 0))?;
                let vref = read_pads(acc, if_id, lane, VREF_BASE + VREF_CS_STRIDE * c)?;
                let pbs_tx = read_pads(acc, if_id, lane, PBS_TX_BASE + PBS_CS_STRIDE * c)?;
                let pbs_rx = read_pads(acc, if_id, lane, PBS_RX_BASE + PBS_CS_STRIDE * c)?;
                log::info!(
                    "Data: {},{},{},{},{},{},{},{},{},{},{},{},{},{},{}{}{}",
                    if_id,
                    cs,
                    lane,
                    eye,
                    taps.wl_total(),
                    taps.wl_adll(),
                    taps.wl_phase(),
                    taps.rl_total(),
                    taps.rl_adll(),
                    taps.rl_phase(),
                    taps.sample,
                    taps.ctx,
                    taps.crx,
                    taps.vref,
                    Csv(&vref),
                    Csv(&pbs_tx),
                    Csv(&pbs_rx)
                );
            }
        }
    }
    Ok(())
}

/// Write and read leveling delays of every active lane, in ADLL taps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelingTable {
    lanes: LaneMask,
    interfaces: InterfaceMask,
    max_cs: usize,
    taps: [[[LaneTaps; MAX_LANES]; MAX_CS]; MAX_INTERFACES],
}

impl LevelingTable {
    #[inline]
    pub fn get(&self, if_id: InterfaceId, cs: ChipSelect, lane: LaneId) -> &LaneTaps {
        &self.taps[if_id.index()][cs.index()][lane.index()]
    }
}

impl fmt::Display for LevelingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "if,cs,lane,wl,rl")?;
        for if_id in self.interfaces.iter() {
            for cs in ChipSelect::all().take(self.max_cs) {
                for lane in self.lanes.iter() {
                    let taps = self.get(if_id, cs, lane);
                    writeln!(f, "{},{},{},{},{}", if_id, cs, lane, taps.wl_total(), taps.rl_total())?;
                }
            }
        }
        Ok(())
    }
}

/// Read the leveling delays of every active lane and chip-select.
pub fn leveling_csv<B: RegisterBackend>(
    acc: &mut RegisterAccess<B>,
    tm: &TopologyMap,
) -> Result<LevelingTable, Error> {
    let max_cs = tm.max_cs() as usize;
    let mut table = LevelingTable {
        lanes: tm.lane_act_mask,
        interfaces: tm.if_act_mask,
        max_cs,
        taps: [[[LaneTaps::default(); MAX_LANES]; MAX_CS]; MAX_INTERFACES],
    };
    for if_id in tm.if_act_mask.iter() {
        for cs in ChipSelect::all().take(max_cs) {
            for lane in tm.lane_act_mask.iter() {
                table.taps[if_id.index()][cs.index()][lane.index()] = LaneTaps::read(acc, if_id, cs, lane)?;
            }
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::format;

    use super::*;
    use crate::pipeline::tests::ddr3_topology;
    use crate::sim::SimBackend;

    const IF0: InterfaceId = InterfaceId::IF0;

    fn access() -> RegisterAccess<SimBackend> {
        RegisterAccess::new(SimBackend::new(), InterfaceMask::new(0x1), 100)
    }

    #[test]
    fn test_lane_taps_decoding() {
        let taps = LaneTaps {
            wl: 0x2c | (2 << 6),
            rl: 0x05 | (1 << 6),
            sample: 3,
            ..Default::default()
        };
        assert_eq!((taps.wl_adll(), taps.wl_phase(), taps.wl_total()), (0xc, 2, 76));
        assert_eq!(taps.rl_total(), 5 + 32 + 192);
    }

    #[test]
    fn test_leveling_table() {
        let mut acc = access();
        let lane1 = LaneId::new(1).unwrap();
        acc.backend().set_phy(IF0, PhyBank::Data, lane1, WL_PHY_REG, 0x45);
        acc.backend().set_phy(IF0, PhyBank::Data, lane1, RL_PHY_REG, 0x0a);
        acc.backend().set_reg(IF0, READ_DATA_SAMPLE_DELAY, 0x2);
        let mut tm = ddr3_topology();
        tm.lane_act_mask = LaneMask::new(0x3);
        let table = leveling_csv(&mut acc, &tm).unwrap();
        assert_eq!(table.get(IF0, ChipSelect::CS0, lane1).wl_total(), 37);
        let csv = format!("{}", table);
        assert_eq!(csv, "if,cs,lane,wl,rl\n0,0,0,0,128\n0,0,1,37,138\n");
    }

    #[test]
    fn test_stability_log_reads_every_lane() {
        let mut acc = access();
        print_stability_log(&mut acc, &ddr3_topology()).unwrap();
        acc.backend().set_phy_stuck(true);
        assert!(print_stability_log(&mut acc, &ddr3_topology()).is_err());
    }
}
