//! # Board memory topology
//!
//! The [TopologyMap] describes which Dunit interfaces and byte lanes are populated and how the
//! DRAM devices behind them are organised. It is either filled from a static board table or
//! derived from a DDR4 SPD image by [TopologyMap::topology_map_update].
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::{InterfaceId, InterfaceMask, LaneId, LaneMask, MAX_INTERFACES, MAX_LANES};
use crate::spd::{DeviceType, Spd, SpdTimings};
use crate::speed_bin::{self, SpeedBin};

/// DRAM device data width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    X4,
    X8,
    X16,
}

/// DRAM die capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum MemSize {
    Mem512M = 0,
    Mem1G = 1,
    Mem2G = 2,
    Mem4G = 3,
    Mem8G = 4,
}

impl MemSize {
    /// Page size in KB.
    pub const fn page_size_kb(self, width: BusWidth) -> u8 {
        match (self, width) {
            (MemSize::Mem8G, _) | (_, BusWidth::X16) => 2,
            _ => 1,
        }
    }

    /// Encoding of the device size in the SDRAM access control register.
    pub const fn access_ctrl_code(self) -> u32 {
        match self {
            MemSize::Mem512M => 2,
            MemSize::Mem1G => 3,
            MemSize::Mem2G => 0,
            MemSize::Mem4G => 4,
            MemSize::Mem8G => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Temperature {
    Low,
    #[default]
    Normal,
    High,
}

/// Command/address timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    /// 2T when more than one chip-select is populated.
    #[default]
    Default,
    OneT,
    TwoT,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdrType {
    Ddr3,
    Ddr4,
}

/// Per byte lane bus parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusParams {
    pub cs_bitmask: u8,
    pub mirror_enable_bitmask: u8,
    pub is_dqs_swap: bool,
    pub is_ck_swap: bool,
}

impl BusParams {
    pub const SINGLE_CS: Self = Self {
        cs_bitmask: 0x1,
        mirror_enable_bitmask: 0,
        is_dqs_swap: false,
        is_ck_swap: false,
    };
}

impl Default for BusParams {
    fn default() -> Self {
        Self::SINGLE_CS
    }
}

/// Per interface memory parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceParams {
    pub bus: [BusParams; MAX_LANES],
    pub speed_bin: SpeedBin,
    pub bus_width: BusWidth,
    pub memory_size: MemSize,
    pub memory_freq: DdrFreq,
    /// CAS write latency, 0 to derive it from the speed bin.
    pub cas_wl: u8,
    /// CAS latency, 0 to derive it from the speed bin.
    pub cas_l: u8,
    pub temperature: Temperature,
    pub timing: TimingMode,
}

impl InterfaceParams {
    pub const fn new(
        speed_bin: SpeedBin,
        memory_freq: DdrFreq,
        bus_width: BusWidth,
        memory_size: MemSize,
    ) -> Self {
        Self {
            bus: [BusParams::SINGLE_CS; MAX_LANES],
            speed_bin,
            bus_width,
            memory_size,
            memory_freq,
            cas_wl: 0,
            cas_l: 0,
            temperature: Temperature::Normal,
            timing: TimingMode::Default,
        }
    }

    pub const fn with_bus(mut self, bus: BusParams) -> Self {
        self.bus = [bus; MAX_LANES];
        self
    }

    pub const fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = temperature;
        self
    }

    pub const fn with_timing(mut self, timing: TimingMode) -> Self {
        self.timing = timing;
        self
    }

    pub const fn with_latencies(mut self, cas_l: u8, cas_wl: u8) -> Self {
        self.cas_l = cas_l;
        self.cas_wl = cas_wl;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyMap {
    pub if_act_mask: InterfaceMask,
    pub lane_act_mask: LaneMask,
    pub interfaces: [InterfaceParams; MAX_INTERFACES],
    pub ddr_type: DdrType,
    /// SPD image, when the topology is derived from a DIMM.
    pub spd: Option<Spd>,
}

impl TopologyMap {
    /// Static topology with identical parameters on every active interface.
    pub fn new(
        ddr_type: DdrType,
        if_act_mask: InterfaceMask,
        lane_act_mask: LaneMask,
        params: InterfaceParams,
    ) -> Self {
        Self {
            if_act_mask,
            lane_act_mask,
            interfaces: [params; MAX_INTERFACES],
            ddr_type,
            spd: None,
        }
    }

    /// Topology whose geometry and latencies come from an SPD image.
    ///
    /// The static parameters provide the target frequency and the speed bin used for parameters
    /// the SPD image does not carry.
    pub fn from_spd(if_act_mask: InterfaceMask, params: InterfaceParams, spd: Spd) -> Self {
        Self {
            if_act_mask,
            lane_act_mask: LaneMask::new(0xf),
            interfaces: [params; MAX_INTERFACES],
            ddr_type: DdrType::Ddr4,
            spd: Some(spd),
        }
    }

    #[inline]
    pub fn interface(&self, if_id: InterfaceId) -> &InterfaceParams {
        &self.interfaces[if_id.index()]
    }

    #[inline]
    pub fn bus(&self, if_id: InterfaceId, lane: LaneId) -> &BusParams {
        &self.interfaces[if_id.index()].bus[lane.index()]
    }

    pub fn first_active_interface(&self) -> Result<InterfaceId, Error> {
        self.if_act_mask
            .first()
            .ok_or(Error::BadParameter("no active interface"))
    }

    /// Decoded SPD timings, if the topology carries an SPD image.
    pub fn spd_timings(&self) -> Option<SpdTimings> {
        self.spd.as_ref().map(Spd::timings)
    }

    /// Data bus of the interfaces is 16 bits wide.
    pub fn is_bus_16bit(&self) -> bool {
        self.lane_act_mask.is_16bit()
    }

    /// Chip-select bitmask of the first active lane of an interface.
    pub fn cs_bitmask(&self, if_id: InterfaceId) -> u8 {
        self.lane_act_mask
            .first()
            .map_or(0, |lane| self.bus(if_id, lane).cs_bitmask)
    }

    /// Number of chip-selects the pipeline iterates over.
    pub fn max_cs(&self) -> u8 {
        self.if_act_mask
            .iter()
            .flat_map(|if_id| {
                self.lane_act_mask
                    .iter()
                    .map(move |lane| self.bus(if_id, lane).cs_bitmask)
            })
            .map(calc_cs_num)
            .max()
            .unwrap_or(0)
    }

    /// Sanity checks the masks and the per lane parameters before any register is touched.
    pub fn validate(&self) -> Result<(), Error> {
        if self.if_act_mask.is_empty() {
            return Err(Error::BadParameter("no active interface"));
        }
        if self.lane_act_mask.raw() & 0xf == 0 {
            return Err(Error::BadParameter("no active data lane"));
        }
        for if_id in self.if_act_mask.iter() {
            for lane in self.lane_act_mask.iter() {
                let bus = self.bus(if_id, lane);
                if bus.cs_bitmask == 0 || bus.cs_bitmask & 0xf0 != 0 {
                    return Err(Error::BadParameter("chip-select bitmask"));
                }
                if bus.mirror_enable_bitmask & !bus.cs_bitmask != 0 {
                    return Err(Error::BadParameter("mirror bitmask outside chip-select mask"));
                }
            }
        }
        Ok(())
    }

    /// Complete the topology before training.
    ///
    /// With an SPD image the device geometry, the chip-select and mirror masks, the CAS latency
    /// and the CAS write latency are derived from the SPD data. Otherwise CAS latency and CAS
    /// write latency fields left at 0 are filled from the speed bin tables.
    pub fn topology_map_update(&mut self) -> Result<(), Error> {
        match self.spd.clone() {
            Some(spd) => self.update_from_spd(&spd),
            None => self.update_from_tables(),
        }
    }

    fn update_from_spd(&mut self, spd: &Spd) -> Result<(), Error> {
        if spd.device_type()? != DeviceType::Ddr4 {
            log::error!("SPD device type is not DDR4");
            return Err(Error::Unsupported("SPD device type is not DDR4"));
        }
        let memory_size = spd.die_capacity()?;
        let bus_width = spd.device_width()?;
        let (cs_bitmask, mirror_enable_bitmask) = match spd.package_ranks() {
            1 => (0x1, 0x0),
            2 => (0x3, if spd.address_mirroring() { 0x2 } else { 0x0 }),
            _ => return Err(Error::Unsupported("more than two package ranks")),
        };
        let mut lanes = match spd.primary_bus_width()? {
            8 => 0x1,
            16 => 0x3,
            _ => 0xf,
        };
        if spd.has_ecc() {
            lanes |= 1 << LaneId::ECC.raw();
        }
        self.lane_act_mask = LaneMask::new(lanes);
        self.ddr_type = DdrType::Ddr4;

        let timings = spd.timings();
        for if_id in self.if_act_mask.iter() {
            let params = &mut self.interfaces[if_id.index()];
            let tck = params.memory_freq.tck_ps();
            if tck < timings.t_ck_min {
                log::error!(
                    "interface {}: {} is above the SPD maximum clock",
                    if_id,
                    params.memory_freq
                );
                return Err(Error::Unsupported("frequency above SPD tCKmin"));
            }
            params.memory_size = memory_size;
            params.bus_width = bus_width;
            for bus in params.bus.iter_mut() {
                bus.cs_bitmask = cs_bitmask;
                bus.mirror_enable_bitmask = mirror_enable_bitmask;
            }
            params.cas_wl = ddr4_cas_write_latency(params.memory_freq)?;
            params.cas_l = ddr4_cas_latency(timings.t_aa, tck, timings.cas_supported)?;
            log::debug!(
                "interface {}: SPD derived CL {} CWL {}",
                if_id,
                params.cas_l,
                params.cas_wl
            );
        }
        Ok(())
    }

    fn update_from_tables(&mut self) -> Result<(), Error> {
        let first = self.first_active_interface()?;
        let freq = self.interface(first).memory_freq;
        for if_id in self.if_act_mask.iter() {
            let params = &mut self.interfaces[if_id.index()];
            if params.cas_l == 0 {
                params.cas_l = speed_bin::cas_latency(params.speed_bin, freq)
                    .ok_or(Error::Unsupported("no CAS latency for speed bin and frequency"))?;
            }
            if params.cas_wl == 0 {
                params.cas_wl = speed_bin::cas_write_latency(params.speed_bin, freq).ok_or(
                    Error::Unsupported("no CAS write latency for speed bin and frequency"),
                )?;
            }
        }
        Ok(())
    }
}

/// Number of chip-selects set in a chip-select bitmask.
pub const fn calc_cs_num(cs_bitmask: u8) -> u8 {
    (cs_bitmask & 0xf).count_ones() as u8
}

/// DDR4 CAS write latency for the first write preamble setting.
pub fn ddr4_cas_write_latency(freq: DdrFreq) -> Result<u8, Error> {
    match freq.mhz() {
        0..=800 => Ok(9),
        801..=933 => Ok(10),
        934..=1066 => Ok(11),
        1067..=1200 => Ok(12),
        _ => Err(Error::Unsupported("DDR4 CAS write latency")),
    }
}

/// Smallest CAS latency supported by the device which covers `t_aa`.
pub fn ddr4_cas_latency(t_aa: u32, tck: u32, cas_supported: u32) -> Result<u8, Error> {
    let min_cl = speed_bin::ps_to_nck(t_aa, tck);
    (0..32u32)
        .filter(|bit| (cas_supported >> bit) & 1 == 1)
        .map(|bit| bit + 7)
        .find(|cl| *cl >= min_cl)
        .map(|cl| cl as u8)
        .ok_or(Error::Unsupported("no supported CAS latency covers tAA"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spd::tests::ddr4_2400_image;

    fn ddr3_board() -> TopologyMap {
        TopologyMap::new(
            DdrType::Ddr3,
            InterfaceMask::new(0x1),
            LaneMask::new(0xf),
            InterfaceParams::new(SpeedBin::Ddr3_1600K, DdrFreq::Mhz800, BusWidth::X8, MemSize::Mem4G),
        )
    }

    #[test]
    fn test_static_backfill() {
        let mut tm = ddr3_board();
        tm.topology_map_update().unwrap();
        assert_eq!(tm.interfaces[0].cas_l, 11);
        assert_eq!(tm.interfaces[0].cas_wl, 8);
        assert_eq!(tm.max_cs(), 1);
        assert!(!tm.is_bus_16bit());
    }

    #[test]
    fn test_static_keeps_explicit_latencies() {
        let mut tm = ddr3_board();
        tm.interfaces[0] = tm.interfaces[0].with_latencies(12, 0);
        tm.topology_map_update().unwrap();
        assert_eq!(tm.interfaces[0].cas_l, 12);
        assert_eq!(tm.interfaces[0].cas_wl, 8);
    }

    #[test]
    fn test_static_unsupported_pair() {
        let mut tm = ddr3_board();
        tm.interfaces[0].speed_bin = SpeedBin::Ddr3_1066G;
        assert_eq!(
            tm.topology_map_update(),
            Err(Error::Unsupported("no CAS latency for speed bin and frequency"))
        );
    }

    #[test]
    fn test_spd_update() {
        let params =
            InterfaceParams::new(SpeedBin::Ddr3_1600K, DdrFreq::Mhz800, BusWidth::X16, MemSize::Mem1G);
        let mut tm = TopologyMap::from_spd(InterfaceMask::new(0x1), params, ddr4_2400_image());
        tm.topology_map_update().unwrap();
        let params = tm.interface(InterfaceId::IF0);
        assert_eq!(params.memory_size, MemSize::Mem4G);
        assert_eq!(params.bus_width, BusWidth::X8);
        assert_eq!(params.cas_wl, 9);
        // 13750 ps at 1250 ps is 11 clocks, the device supports 10 and up.
        assert_eq!(params.cas_l, 11);
        assert_eq!(tm.lane_act_mask.raw(), 0x1f);
        assert_eq!(params.bus[0].cs_bitmask, 0x1);
        // Single rank modules never mirror.
        assert_eq!(params.bus[0].mirror_enable_bitmask, 0x0);
    }

    #[test]
    fn test_spd_dual_rank_mirror() {
        let mut raw = *ddr4_2400_image().raw();
        raw[12] |= 1 << 3;
        let params =
            InterfaceParams::new(SpeedBin::Ddr3_1600K, DdrFreq::Mhz800, BusWidth::X8, MemSize::Mem4G);
        let mut tm = TopologyMap::from_spd(InterfaceMask::new(0x1), params, Spd::new(raw));
        tm.topology_map_update().unwrap();
        assert_eq!(tm.interfaces[0].bus[2].cs_bitmask, 0x3);
        assert_eq!(tm.interfaces[0].bus[2].mirror_enable_bitmask, 0x2);
        assert_eq!(tm.max_cs(), 2);
    }

    #[test]
    fn test_spd_rejects_ddr3() {
        let mut raw = *ddr4_2400_image().raw();
        raw[2] = 0x0b;
        let params =
            InterfaceParams::new(SpeedBin::Ddr3_1600K, DdrFreq::Mhz800, BusWidth::X8, MemSize::Mem4G);
        let mut tm = TopologyMap::from_spd(InterfaceMask::new(0x1), params, Spd::new(raw));
        assert!(matches!(tm.topology_map_update(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_cas_latency_rounding() {
        // Only CL 12 and 14 supported.
        let supported = (1 << 5) | (1 << 7);
        assert_eq!(ddr4_cas_latency(13750, 1250, supported), Ok(12));
        assert_eq!(ddr4_cas_latency(16000, 1250, supported), Ok(14));
        assert!(ddr4_cas_latency(20000, 1250, supported).is_err());
    }

    #[test]
    fn test_validate() {
        let mut tm = ddr3_board();
        assert!(tm.validate().is_ok());
        tm.interfaces[0].bus[1].cs_bitmask = 0;
        assert!(tm.validate().is_err());
        let tm = TopologyMap::new(
            DdrType::Ddr3,
            InterfaceMask::new(0x1),
            LaneMask::new(0x10),
            ddr3_board().interfaces[0],
        );
        assert!(tm.validate().is_err());
    }
}
