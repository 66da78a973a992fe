//! # Training patterns
//!
//! Fixed bursts played back by the ODPG. Every pattern has a burst shape (tx/rx phases, burst
//! size, inter-burst delay) and a location in DRAM into which it is written once by the load
//! pattern stages. The shape depends on the data bus width of the interface.

/// Alternating bit pattern used by the PBS and vref patterns.
pub const PATTERN_1: u32 = 0x5555_5555;
pub const PATTERN_2: u32 = 0xaaaa_aaaa;

/// Named training patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternId {
    Pbs1,
    Pbs2,
    Rl,
    StaticPbs,
    KillerDq0,
    KillerDq1,
    KillerDq2,
    KillerDq3,
    KillerDq4,
    KillerDq5,
    KillerDq6,
    KillerDq7,
    Pbs3,
    Rl2,
    Test,
    FullSso1T,
    FullSso2T,
    FullSso3T,
    FullSso4T,
    Vref,
}

impl PatternId {
    pub const COUNT: usize = 20;

    pub const ALL: [PatternId; Self::COUNT] = [
        PatternId::Pbs1,
        PatternId::Pbs2,
        PatternId::Rl,
        PatternId::StaticPbs,
        PatternId::KillerDq0,
        PatternId::KillerDq1,
        PatternId::KillerDq2,
        PatternId::KillerDq3,
        PatternId::KillerDq4,
        PatternId::KillerDq5,
        PatternId::KillerDq6,
        PatternId::KillerDq7,
        PatternId::Pbs3,
        PatternId::Rl2,
        PatternId::Test,
        PatternId::FullSso1T,
        PatternId::FullSso2T,
        PatternId::FullSso3T,
        PatternId::FullSso4T,
        PatternId::Vref,
    ];

    /// The eight victim-bit patterns used by centralization.
    pub const KILLERS: [PatternId; 8] = [
        PatternId::KillerDq0,
        PatternId::KillerDq1,
        PatternId::KillerDq2,
        PatternId::KillerDq3,
        PatternId::KillerDq4,
        PatternId::KillerDq5,
        PatternId::KillerDq6,
        PatternId::KillerDq7,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Victim bit of a killer pattern.
    pub const fn victim_bit(self) -> Option<u8> {
        match self {
            PatternId::KillerDq0 => Some(0),
            PatternId::KillerDq1 => Some(1),
            PatternId::KillerDq2 => Some(2),
            PatternId::KillerDq3 => Some(3),
            PatternId::KillerDq4 => Some(4),
            PatternId::KillerDq5 => Some(5),
            PatternId::KillerDq6 => Some(6),
            PatternId::KillerDq7 => Some(7),
            _ => None,
        }
    }

    /// Burst shape and location for a bus width.
    #[inline]
    pub fn info(self, bus_16bit: bool) -> &'static PatternInfo {
        if bus_16bit {
            &PATTERN_TABLE_16[self.index()]
        } else {
            &PATTERN_TABLE_32[self.index()]
        }
    }

    /// Data word `index` of the pattern.
    pub const fn word(self, index: usize) -> u32 {
        const fn repeat(byte: u8) -> u32 {
            u32::from_ne_bytes([byte; 4])
        }
        const fn toggle(on: bool) -> u32 {
            if on { 0xffff_ffff } else { 0 }
        }
        match self {
            PatternId::Pbs1 => {
                if index % 2 == 0 {
                    PATTERN_1
                } else {
                    PATTERN_2
                }
            }
            PatternId::Pbs2 => {
                if index % 2 == 0 {
                    PATTERN_2
                } else {
                    PATTERN_1
                }
            }
            PatternId::Pbs3 | PatternId::Rl => toggle(index % 2 == 1),
            PatternId::Rl2 => toggle(index % 2 == 0),
            PatternId::StaticPbs => toggle(index % 4 >= 2),
            PatternId::KillerDq0
            | PatternId::KillerDq1
            | PatternId::KillerDq2
            | PatternId::KillerDq3
            | PatternId::KillerDq4
            | PatternId::KillerDq5
            | PatternId::KillerDq6
            | PatternId::KillerDq7 => {
                let victim = match self.victim_bit() {
                    Some(bit) => 1u8 << bit,
                    None => 0,
                };
                // Aggressors toggle every word, the victim moves against them.
                if index % 2 == 0 {
                    repeat(!victim)
                } else {
                    repeat(victim)
                }
            }
            // Every word differs, so a shifted read back never matches by accident.
            PatternId::Test => repeat(0x10 + (index as u8 & 0x3f)),
            PatternId::FullSso1T => toggle(index % 2 == 1),
            PatternId::FullSso2T => toggle((index / 2) % 2 == 1),
            PatternId::FullSso3T => toggle((index / 3) % 2 == 1),
            PatternId::FullSso4T => toggle((index / 4) % 2 == 1),
            PatternId::Vref => {
                if (index / 4) % 2 == 0 {
                    PATTERN_2
                } else {
                    PATTERN_1
                }
            }
        }
    }
}

/// Burst shape and location of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternInfo {
    pub tx_phases: u8,
    pub tx_burst: u8,
    pub delay_between_bursts: u8,
    pub rx_phases: u8,
    /// Location in units of 8 bytes.
    pub start_addr: u32,
    /// Number of 64 bit pattern buffer entries.
    pub len: u8,
}

impl PatternInfo {
    const fn short(start_addr: u32, bus_16bit: bool) -> Self {
        if bus_16bit {
            Self {
                tx_phases: 0x1,
                tx_burst: 0x1,
                delay_between_bursts: 2,
                rx_phases: 0x1,
                start_addr,
                len: 2,
            }
        } else {
            Self {
                tx_phases: 0x3,
                tx_burst: 0x3,
                delay_between_bursts: 2,
                rx_phases: 0x3,
                start_addr,
                len: 4,
            }
        }
    }

    const fn long(start_addr: u32, bus_16bit: bool) -> Self {
        if bus_16bit {
            Self {
                tx_phases: 0xf,
                tx_burst: 0x7,
                delay_between_bursts: 2,
                rx_phases: 0x7,
                start_addr,
                len: 16,
            }
        } else {
            Self {
                tx_phases: 0x1f,
                tx_burst: 0xf,
                delay_between_bursts: 2,
                rx_phases: 0xf,
                start_addr,
                len: 32,
            }
        }
    }

    /// Byte address of the pattern in DRAM.
    #[inline]
    pub const fn dram_addr(&self) -> u32 {
        self.start_addr << 3
    }
}

const fn pattern_table(bus_16bit: bool) -> [PatternInfo; PatternId::COUNT] {
    let s = bus_16bit;
    [
        PatternInfo::short(0x80, s),
        PatternInfo::short(0xc0, s),
        PatternInfo::short(0x100, s),
        PatternInfo::long(0x140, s),
        PatternInfo::long(0x190, s),
        PatternInfo::long(0x1d0, s),
        PatternInfo::long(0x210, s),
        PatternInfo::long(0x250, s),
        PatternInfo::long(0x290, s),
        PatternInfo::long(0x2d0, s),
        PatternInfo::long(0x310, s),
        PatternInfo::long(0x350, s),
        PatternInfo::short(0x380, s),
        PatternInfo::short(0x0, s),
        PatternInfo::short(0x40, s),
        PatternInfo::long(0x3c0, s),
        PatternInfo::long(0x400, s),
        PatternInfo::long(0x440, s),
        PatternInfo::long(0x480, s),
        PatternInfo::long(0x4c0, s),
    ]
}

pub static PATTERN_TABLE_16: [PatternInfo; PatternId::COUNT] = pattern_table(true);
pub static PATTERN_TABLE_32: [PatternInfo; PatternId::COUNT] = pattern_table(false);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order() {
        for (idx, id) in PatternId::ALL.iter().enumerate() {
            assert_eq!(id.index(), idx);
        }
        assert_eq!(PatternId::KillerDq3.info(true).start_addr, 0x250);
        assert_eq!(PatternId::Vref.info(false).dram_addr(), 0x4c0 << 3);
        assert_eq!(PatternId::Rl.info(true).len, 2);
        assert_eq!(PatternId::Rl.info(false).len, 4);
        assert_eq!(PatternId::StaticPbs.info(false).tx_phases, 0x1f);
    }

    #[test]
    fn test_patterns_do_not_overlap() {
        for table in [&PATTERN_TABLE_16, &PATTERN_TABLE_32] {
            let mut spans: heapless::Vec<(u32, u32), { PatternId::COUNT }> = table
                .iter()
                .map(|p| (p.start_addr, p.start_addr + p.len as u32))
                .collect();
            spans.sort_unstable();
            for pair in spans.windows(2) {
                assert!(pair[0].1 <= pair[1].0, "{:?}", pair);
            }
        }
    }

    #[test]
    fn test_killer_victim_opposes_aggressors() {
        let even = PatternId::KillerDq5.word(0);
        let odd = PatternId::KillerDq5.word(1);
        assert_eq!(even & 0xff, 0xdf);
        assert_eq!(odd & 0xff, 0x20);
        assert_eq!(even, !odd);
    }

    #[test]
    fn test_test_pattern_words_distinct() {
        for a in 0..8 {
            for b in (a + 1)..8 {
                assert_ne!(PatternId::Test.word(a), PatternId::Test.word(b));
            }
        }
    }
}
