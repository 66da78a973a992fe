//! SoC capabilities the training engine depends on.
use crate::error::Error;
use crate::freq::{DdrFreq, FreqConfig};
use crate::ids::InterfaceId;

/// Raw access to the Dunit register space and to DRAM of one SoC.
///
/// Register offsets are relative to the internal register base. The engine never touches the
/// PHY directly, PHY registers are reached through the handshake in [crate::access].
pub trait RegisterBackend {
    fn read(&mut self, if_id: InterfaceId, offset: u32) -> u32;

    fn write(&mut self, if_id: InterfaceId, offset: u32, value: u32);

    /// Busy wait.
    fn delay_ms(&mut self, ms: u32);

    /// Write words to DRAM at a byte address of the CPU window of the interface.
    fn dram_write(&mut self, if_id: InterfaceId, addr: u32, data: &[u32]) -> Result<(), Error>;

    /// Read words from DRAM at a byte address of the CPU window of the interface.
    fn dram_read(&mut self, if_id: InterfaceId, addr: u32, data: &mut [u32]) -> Result<(), Error>;
}

impl<T: RegisterBackend + ?Sized> RegisterBackend for &mut T {
    fn read(&mut self, if_id: InterfaceId, offset: u32) -> u32 {
        (**self).read(if_id, offset)
    }

    fn write(&mut self, if_id: InterfaceId, offset: u32, value: u32) {
        (**self).write(if_id, offset, value)
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }

    fn dram_write(&mut self, if_id: InterfaceId, addr: u32, data: &[u32]) -> Result<(), Error> {
        (**self).dram_write(if_id, addr, data)
    }

    fn dram_read(&mut self, if_id: InterfaceId, addr: u32, data: &mut [u32]) -> Result<(), Error> {
        (**self).dram_read(if_id, addr, data)
    }
}

/// DDR clock control of one SoC.
pub trait FrequencyController {
    /// Reprogram the DDR clock divider of an interface. Called while the DRAM is in self-refresh.
    fn set_divider(
        &mut self,
        backend: &mut dyn RegisterBackend,
        if_id: InterfaceId,
        freq: DdrFreq,
    ) -> Result<(), Error>;

    /// PHY bandwidth and rate settings for a frequency.
    fn freq_config(&self, freq: DdrFreq) -> FreqConfig {
        FreqConfig::for_freq(freq)
    }

    /// Intermediate frequency used for the first leveling pass.
    ///
    /// Targets up to 533 MHz are leveled directly. Faster targets use the highest supported
    /// frequency not above half the target.
    fn medium_freq(&self, target: DdrFreq) -> DdrFreq {
        if target.mhz() <= 533 {
            return target;
        }
        let half = target.mhz().div_ceil(2);
        DdrFreq::ALL
            .iter()
            .rev()
            .copied()
            .find(|f| f.mhz() <= half)
            .unwrap_or(DdrFreq::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoDivider;

    impl FrequencyController for NoDivider {
        fn set_divider(
            &mut self,
            _backend: &mut dyn RegisterBackend,
            _if_id: InterfaceId,
            _freq: DdrFreq,
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_medium_freq() {
        let ctrl = NoDivider;
        assert_eq!(ctrl.medium_freq(DdrFreq::Mhz800), DdrFreq::Mhz400);
        assert_eq!(ctrl.medium_freq(DdrFreq::Mhz667), DdrFreq::Mhz333);
        assert_eq!(ctrl.medium_freq(DdrFreq::Mhz1066), DdrFreq::Mhz533);
        assert_eq!(ctrl.medium_freq(DdrFreq::Mhz933), DdrFreq::Mhz467);
        assert_eq!(ctrl.medium_freq(DdrFreq::Mhz533), DdrFreq::Mhz533);
        assert_eq!(ctrl.medium_freq(DdrFreq::Mhz400), DdrFreq::Mhz400);
    }
}
