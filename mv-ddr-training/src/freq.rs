//! DDR clock frequencies supported by the training engine.

/// DDR clock frequency. The discriminant is the clock in MHz.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, num_enum::TryFromPrimitive, num_enum::IntoPrimitive,
)]
#[repr(u16)]
pub enum DdrFreq {
    /// Frequency used for the initial leveling steps.
    Low = 100,
    Mhz300 = 300,
    Mhz333 = 333,
    Mhz360 = 360,
    Mhz400 = 400,
    Mhz467 = 467,
    Mhz533 = 533,
    Mhz600 = 600,
    Mhz667 = 667,
    Mhz800 = 800,
    Mhz850 = 850,
    Mhz900 = 900,
    Mhz933 = 933,
    Mhz1000 = 1000,
    Mhz1066 = 1066,
}

impl DdrFreq {
    pub const COUNT: usize = 15;

    pub const ALL: [DdrFreq; Self::COUNT] = [
        DdrFreq::Low,
        DdrFreq::Mhz300,
        DdrFreq::Mhz333,
        DdrFreq::Mhz360,
        DdrFreq::Mhz400,
        DdrFreq::Mhz467,
        DdrFreq::Mhz533,
        DdrFreq::Mhz600,
        DdrFreq::Mhz667,
        DdrFreq::Mhz800,
        DdrFreq::Mhz850,
        DdrFreq::Mhz900,
        DdrFreq::Mhz933,
        DdrFreq::Mhz1000,
        DdrFreq::Mhz1066,
    ];

    /// Position inside [Self::ALL], used as the column of the latency tables.
    pub const fn index(self) -> usize {
        let mut i = 0;
        while i < Self::COUNT {
            if Self::ALL[i] as u16 == self as u16 {
                return i;
            }
            i += 1;
        }
        0
    }

    #[inline]
    pub const fn mhz(self) -> u32 {
        self as u16 as u32
    }

    /// Clock period in ps.
    #[inline]
    pub const fn tck_ps(self) -> u32 {
        1_000_000 / self.mhz()
    }
}

impl core::fmt::Display for DdrFreq {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} MHz", self.mhz())
    }
}

/// PHY bandwidth and rate settings for a clock frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqConfig {
    /// Value for [mv_ddr::phy::BW_PHY_REG] bits [10:8].
    pub bw: u8,
    /// Value for [mv_ddr::phy::RATE_PHY_REG] bits [2:0].
    pub rate: u8,
}

impl FreqConfig {
    pub const fn for_freq(freq: DdrFreq) -> Self {
        match freq.mhz() {
            0..=333 => Self { bw: 3, rate: 1 },
            334..=533 => Self { bw: 4, rate: 2 },
            _ => Self { bw: 5, rate: 2 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(DdrFreq::Mhz800.tck_ps(), 1250);
        assert_eq!(DdrFreq::Mhz533.tck_ps(), 1876);
        assert_eq!(DdrFreq::Low.tck_ps(), 10000);
        assert_eq!(DdrFreq::try_from(667u16), Ok(DdrFreq::Mhz667));
        assert!(DdrFreq::try_from(668u16).is_err());
        let raw: u16 = DdrFreq::Mhz933.into();
        assert_eq!(raw, 933);
    }

    #[test]
    fn test_phy_config() {
        assert_eq!(FreqConfig::for_freq(DdrFreq::Low), FreqConfig { bw: 3, rate: 1 });
        assert_eq!(FreqConfig::for_freq(DdrFreq::Mhz533), FreqConfig { bw: 4, rate: 2 });
        assert_eq!(FreqConfig::for_freq(DdrFreq::Mhz800), FreqConfig { bw: 5, rate: 2 });
    }
}
