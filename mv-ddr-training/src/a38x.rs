//! # Armada 38x backend
//!
//! [Armada38x] reaches the Dunit through the [DunitWindow] MMIO block and the DRAM through the
//! CPU address window. [Armada38xClocks] programs the CPU PLL divider which produces the DDR
//! clock.
//!
//! The SoC has a single Dunit, so the interface ID is only checked by the divider code.
use arbitrary_int::u5;
use mv_ddr::dunit::{DDR_IO, DunitWindow, MmioDunitWindow};

use crate::backend::{FrequencyController, RegisterBackend};
use crate::error::Error;
use crate::freq::DdrFreq;
use crate::ids::InterfaceId;

/// Sample at reset register holding the CPU/DDR clock selection.
pub const DEVICE_SAR1: u32 = 0xe4204;
/// Sample at reset register holding the reference clock selection.
pub const DEVICE_SAR2: u32 = 0x18604;

const CPU_PLL_CLKDIV_CTRL0: u32 = 0xe4260;
const CPU_PLL_CLKDIV_CTRL1: u32 = 0xe4264;
const CPU_PLL_CLKDIV_RATIO: u32 = 0xe4268;
const DDR_ASYNC_MODE: u32 = 0x20220;
const DDR_ASYNC_PLL_CTRL: u32 = 0xe42f4;
const DDR_ASYNC_PLL_CFG: u32 = 0xe42f0;
const TRAINING_CLOCK_CTRL: u32 = 0x18488;

const ASYNC_MODE_ENABLE: u32 = 1 << 12;
const ASYNC_PLL_ENABLE: u32 = 1 << 9;
const CLKDIV_RESET_MASK: u32 = 0xff;
const CLKDIV_RELOAD_SMOOTH: u32 = 0xff << 8;
const CLKDIV_RELAX_EN: u32 = 0xff << 24;
const CLKDIV_RELOAD_RATIO: u32 = 1 << 8;
const CLKDIV_RATIO_MASK: u32 = 0x3f << 8;
const TRAINING_CLOCK_1_1: u32 = 1 << 16;
const DDR_IO_CLOCK_2_1: u32 = 1 << 15;

/// Settling time of the asynchronous DDR PLL after it was enabled.
const ASYNC_PLL_SETTLE_MS: u32 = 5;

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SampleAtReset1 {
    #[bits(17..=21, r)]
    cpu_ddr_clock: u5,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SampleAtReset2 {
    /// 0 for 25 MHz, 1 for 40 MHz.
    #[bit(0, r)]
    ref_clk_40mhz: bool,
}

/// CPU PLL output in MHz for every CPU/DDR clock selection, 25 MHz reference clock.
const VCO_FREQ_REF_25MHZ: [u16; 31] = [
    666, 1332, 800, 1600, 1066, 2132, 1200, 2400, 1332, 1332, 1500, 1500, 1600, 1600, 1700, 1700,
    1866, 1866, 1800, 2000, 2000, 4000, 2132, 2132, 2300, 2300, 2400, 2400, 2500, 2500, 800,
];

/// CPU PLL output in MHz for every CPU/DDR clock selection, 40 MHz reference clock.
const VCO_FREQ_REF_40MHZ: [u16; 31] = [
    666, 1332, 800, 800, 1066, 1066, 1200, 2400, 1332, 1332, 1500, 1600, 1600, 1600, 1700, 1560,
    1866, 1866, 1800, 2000, 2000, 4000, 2132, 2132, 2300, 2300, 2400, 2400, 2500, 2500, 1800,
];

/// Dunit and DRAM access of an Armada 38x SoC.
pub struct Armada38x {
    regs: MmioDunitWindow<'static>,
    dram_base: usize,
    spins_per_ms: u32,
}

impl Armada38x {
    /// Create the backend for the internal register window at its fixed address.
    ///
    /// `dram_base` is the CPU address of the start of DRAM. `spins_per_ms` calibrates the busy
    /// wait of [RegisterBackend::delay_ms].
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the Dunit registers and to the DRAM window while
    /// the backend is alive. The DRAM window must be mapped without caching.
    pub unsafe fn new(dram_base: usize, spins_per_ms: u32) -> Self {
        Self {
            regs: unsafe { DunitWindow::new_mmio_fixed() },
            dram_base,
            spins_per_ms,
        }
    }

    #[inline]
    pub fn regs(&mut self) -> &mut MmioDunitWindow<'static> {
        &mut self.regs
    }

    fn dram_ptr(&self, addr: u32, words: usize) -> Result<*mut u32, Error> {
        if addr % 4 != 0 {
            return Err(Error::BadParameter("unaligned DRAM address"));
        }
        (addr as usize)
            .checked_add(words * 4)
            .and_then(|end| self.dram_base.checked_add(end))
            .ok_or(Error::BadParameter("DRAM access outside the address space"))?;
        Ok((self.dram_base + addr as usize) as *mut u32)
    }
}

impl RegisterBackend for Armada38x {
    fn read(&mut self, _if_id: InterfaceId, offset: u32) -> u32 {
        match DunitWindow::word_index(offset) {
            // Safety: The index was checked against the window size.
            Some(index) => unsafe { self.regs.read_regs_unchecked(index) },
            None => {
                log::error!("read of register {:#x} outside the Dunit window", offset);
                0
            }
        }
    }

    fn write(&mut self, _if_id: InterfaceId, offset: u32, value: u32) {
        match DunitWindow::word_index(offset) {
            // Safety: The index was checked against the window size.
            Some(index) => unsafe { self.regs.write_regs_unchecked(index, value) },
            None => log::error!("write of register {:#x} outside the Dunit window", offset),
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms as u64 * self.spins_per_ms as u64 {
            core::hint::spin_loop();
        }
    }

    fn dram_write(&mut self, _if_id: InterfaceId, addr: u32, data: &[u32]) -> Result<(), Error> {
        let ptr = self.dram_ptr(addr, data.len())?;
        for (i, word) in data.iter().enumerate() {
            // Safety: Aligned and inside the DRAM window handed to the constructor.
            unsafe { core::ptr::write_volatile(ptr.add(i), *word) };
        }
        Ok(())
    }

    fn dram_read(&mut self, _if_id: InterfaceId, addr: u32, data: &mut [u32]) -> Result<(), Error> {
        let ptr = self.dram_ptr(addr, data.len())?;
        for (i, word) in data.iter_mut().enumerate() {
            // Safety: Aligned and inside the DRAM window handed to the constructor.
            *word = unsafe { core::ptr::read_volatile(ptr.add(i)) };
        }
        Ok(())
    }
}

/// 1:1 below 400 MHz, 2:1 above.
#[inline]
pub const fn clock_ratio(freq: DdrFreq) -> u32 {
    if freq.mhz() <= 400 { 1 } else { 2 }
}

/// Register values of the asynchronous DDR PLL for a frequency. 667 MHz is used for frequencies
/// without a dedicated setting.
pub const fn async_pll_config(freq: DdrFreq) -> u32 {
    match freq {
        DdrFreq::Mhz467 => 0x0806_f012,
        DdrFreq::Mhz533 => 0x0807_f012,
        DdrFreq::Mhz600 => 0x0805_f00a,
        DdrFreq::Mhz800 => 0x0807_f00a,
        DdrFreq::Mhz850 => 0x080c_b012,
        DdrFreq::Mhz900 => 0x080d_7012,
        DdrFreq::Mhz933 => 0x080d_f012,
        DdrFreq::Mhz1000 => 0x080e_f012,
        DdrFreq::Mhz1066 => 0x080f_f012,
        _ => 0x0809_f012,
    }
}

/// How the DDR clock is derived from the CPU PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Integer division of the CPU PLL.
    Sync { divider: u32 },
    /// Dedicated DDR PLL.
    Async,
}

/// Pick the clock source for `freq` given the CPU PLL output. Only dividers of 2 and 3 are
/// usable above 400 MHz, everything else needs the asynchronous PLL.
pub const fn clock_source(vco_mhz: u32, freq: DdrFreq) -> ClockSource {
    let ddr_mhz = freq.mhz();
    let divider = vco_mhz / ddr_mhz;
    if ddr_mhz > 400 && (vco_mhz % ddr_mhz != 0 || (divider != 2 && divider != 3)) {
        ClockSource::Async
    } else {
        ClockSource::Sync { divider }
    }
}

/// DDR clock control of the Armada 38x.
#[derive(Debug, Default, Clone, Copy)]
pub struct Armada38xClocks;

impl Armada38xClocks {
    /// CPU PLL output in MHz selected by the sample at reset straps.
    pub fn vco_mhz(backend: &mut dyn RegisterBackend) -> Result<u32, Error> {
        let sar1 = SampleAtReset1::new_with_raw_value(backend.read(InterfaceId::IF0, DEVICE_SAR1));
        let sar2 = SampleAtReset2::new_with_raw_value(backend.read(InterfaceId::IF0, DEVICE_SAR2));
        let table = if sar2.ref_clk_40mhz() {
            &VCO_FREQ_REF_40MHZ
        } else {
            &VCO_FREQ_REF_25MHZ
        };
        table
            .get(sar1.cpu_ddr_clock().value() as usize)
            .map(|mhz| *mhz as u32)
            .ok_or(Error::Unsupported("CPU/DDR clock selection"))
    }
}

fn masked_write(backend: &mut dyn RegisterBackend, offset: u32, value: u32, mask: u32) {
    let old = backend.read(InterfaceId::IF0, offset);
    backend.write(InterfaceId::IF0, offset, (old & !mask) | (value & mask));
}

impl FrequencyController for Armada38xClocks {
    fn set_divider(
        &mut self,
        backend: &mut dyn RegisterBackend,
        if_id: InterfaceId,
        freq: DdrFreq,
    ) -> Result<(), Error> {
        if if_id != InterfaceId::IF0 {
            return Err(Error::BadParameter("the Armada 38x has a single DDR interface"));
        }
        let vco = Self::vco_mhz(backend)?;
        let source = clock_source(vco, freq);
        log::debug!("DDR clock {} from CPU PLL {} MHz: {:?}", freq, vco, source);
        match source {
            ClockSource::Async => {
                masked_write(backend, DDR_ASYNC_MODE, ASYNC_MODE_ENABLE, ASYNC_MODE_ENABLE);
                masked_write(backend, DDR_ASYNC_PLL_CTRL, ASYNC_PLL_ENABLE, ASYNC_PLL_ENABLE);
                backend.delay_ms(ASYNC_PLL_SETTLE_MS);
                backend.write(InterfaceId::IF0, DDR_ASYNC_PLL_CFG, async_pll_config(freq));
            }
            ClockSource::Sync { divider } => {
                masked_write(backend, DDR_ASYNC_MODE, 0, ASYNC_MODE_ENABLE);
                masked_write(backend, DDR_ASYNC_PLL_CTRL, 0, ASYNC_PLL_ENABLE);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL1, 0x1f, CLKDIV_RESET_MASK);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL0, 0x2 << 8, CLKDIV_RELOAD_SMOOTH);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL0, 0x2 << 24, CLKDIV_RELAX_EN);
                masked_write(backend, CPU_PLL_CLKDIV_RATIO, divider << 8, CLKDIV_RATIO_MASK);
                // Pulse the reload.
                masked_write(backend, CPU_PLL_CLKDIV_CTRL1, CLKDIV_RELOAD_RATIO, CLKDIV_RELOAD_RATIO);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL1, 0, CLKDIV_RELOAD_RATIO);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL0, 0, CLKDIV_RELOAD_SMOOTH);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL0, 0, CLKDIV_RELAX_EN);
                masked_write(backend, CPU_PLL_CLKDIV_CTRL1, 0, CLKDIV_RESET_MASK);
            }
        }

        let ratio = clock_ratio(freq);
        masked_write(
            backend,
            TRAINING_CLOCK_CTRL,
            if ratio == 1 { TRAINING_CLOCK_1_1 } else { 0 },
            TRAINING_CLOCK_1_1,
        );
        masked_write(
            backend,
            DDR_IO,
            if ratio == 2 { DDR_IO_CLOCK_2_1 } else { 0 },
            DDR_IO_CLOCK_2_1,
        );
        Ok(())
    }
}
