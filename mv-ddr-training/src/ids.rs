//! Index newtypes for interfaces, byte lanes, data bits and chip-selects.
//!
//! The training engine addresses the hardware by (interface, lane, bit) triples. The newtypes are
//! validated once on construction so the loops of the pipeline never handle raw indices.

/// Maximum number of Dunit interfaces.
pub const MAX_INTERFACES: usize = 4;
/// Maximum number of byte lanes (subphys) per interface, including the ECC lane.
pub const MAX_LANES: usize = 5;
/// Data bits per byte lane.
pub const BUS_WIDTH_BITS: usize = 8;
/// Maximum number of chip-selects.
pub const MAX_CS: usize = 4;

macro_rules! index_newtype {
    ($(#[$meta:meta])* $name:ident, $max:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u8);

        impl $name {
            pub const MAX: usize = $max;

            /// Returns [None] if the index is out of range.
            #[inline]
            pub const fn new(raw: u8) -> Option<Self> {
                if raw as usize >= $max {
                    return None;
                }
                Some(Self(raw))
            }

            #[inline]
            pub const fn raw(self) -> u8 {
                self.0
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Iterate all possible indices.
            pub fn all() -> impl Iterator<Item = Self> {
                (0..$max as u8).map(Self)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

index_newtype!(
    /// Dunit interface index.
    InterfaceId,
    MAX_INTERFACES
);
index_newtype!(
    /// Byte lane (subphy) index.
    LaneId,
    MAX_LANES
);
index_newtype!(
    /// Data bit index inside a byte lane.
    BitId,
    BUS_WIDTH_BITS
);
index_newtype!(
    /// Chip-select (rank) index.
    ChipSelect,
    MAX_CS
);

impl InterfaceId {
    pub const IF0: Self = Self(0);
}

impl LaneId {
    pub const LANE0: Self = Self(0);
    /// The ECC lane sits behind the four data lanes.
    pub const ECC: Self = Self(4);
}

impl ChipSelect {
    pub const CS0: Self = Self(0);

    /// Chip-select bitmask with only this chip-select set.
    #[inline]
    pub const fn mask(self) -> u8 {
        1 << self.0
    }
}

macro_rules! active_mask {
    ($(#[$meta:meta])* $name:ident, $id:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u8);

        impl $name {
            pub const fn new(raw: u8) -> Self {
                Self(raw & ((1 << $id::MAX) - 1))
            }

            #[inline]
            pub const fn raw(self) -> u8 {
                self.0
            }

            #[inline]
            pub const fn contains(self, id: $id) -> bool {
                (self.0 >> id.raw()) & 1 == 1
            }

            #[inline]
            pub const fn count(self) -> u32 {
                self.0.count_ones()
            }

            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Lowest active index.
            pub fn first(self) -> Option<$id> {
                self.iter().next()
            }

            /// Iterate only the active indices.
            pub fn iter(self) -> impl Iterator<Item = $id> {
                $id::all().filter(move |id| self.contains(*id))
            }

            pub const fn with(self, id: $id) -> Self {
                Self(self.0 | (1 << id.raw()))
            }

            pub const fn without(self, id: $id) -> Self {
                Self(self.0 & !(1 << id.raw()))
            }

            #[inline]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }
    };
}

active_mask!(
    /// Set of active interfaces.
    InterfaceMask,
    InterfaceId
);
active_mask!(
    /// Set of active byte lanes.
    LaneMask,
    LaneId
);

impl LaneMask {
    /// Only two data lanes are active, the DRAM bus is 16 bits wide.
    pub const fn is_16bit(self) -> bool {
        self.0 & 0xf == 0x3
    }

    /// ECC lane used together with a 32 bit data bus.
    pub const fn has_ecc(self) -> bool {
        (self.0 >> LaneId::ECC.raw()) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_validation() {
        assert!(InterfaceId::new(3).is_some());
        assert!(InterfaceId::new(4).is_none());
        assert!(LaneId::new(4).is_some());
        assert!(BitId::new(8).is_none());
        assert_eq!(ChipSelect::new(2).map(ChipSelect::mask), Some(0b100));
    }

    #[test]
    fn test_active_iteration() {
        let lanes = LaneMask::new(0b1_0101);
        let collected: heapless::Vec<u8, MAX_LANES> = lanes.iter().map(LaneId::raw).collect();
        assert_eq!(collected.as_slice(), &[0, 2, 4]);
        assert_eq!(lanes.count(), 3);
        assert_eq!(lanes.first(), LaneId::new(0));
        assert!(lanes.has_ecc());
        assert!(!lanes.is_16bit());
        assert!(LaneMask::new(0x3).is_16bit());
        assert_eq!(InterfaceMask::new(0xff).raw(), 0xf);
        assert!(InterfaceMask::default().first().is_none());
    }
}
