//! Generic masked register field descriptor.
//!
//! Most Dunit accesses are read-modify-write operations on a sub-range of a 32 bit register.
//! [Field] bundles the register offset and the bit range so the access layer does not need
//! to carry literal masks around.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value {value:#x} does not fit into a {width} bit field")]
pub struct ValueTooWide {
    pub value: u32,
    pub width: u8,
}

/// A bit range inside a Dunit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Register offset relative to the internal register base.
    pub offset: u32,
    /// Position of the least significant bit.
    pub lsb: u8,
    /// Width in bits, 1 to 32.
    pub width: u8,
}

impl Field {
    pub const fn new(offset: u32, lsb: u8, width: u8) -> Self {
        assert!(width >= 1 && lsb as u32 + width as u32 <= 32);
        Self { offset, lsb, width }
    }

    /// Single bit field.
    pub const fn bit(offset: u32, bit: u8) -> Self {
        Self::new(offset, bit, 1)
    }

    /// Register mask covering this field.
    #[inline]
    pub const fn mask(&self) -> u32 {
        if self.width == 32 {
            return u32::MAX;
        }
        ((1u32 << self.width) - 1) << self.lsb
    }

    /// Largest value which can be stored in the field.
    #[inline]
    pub const fn max_value(&self) -> u32 {
        self.mask() >> self.lsb
    }

    /// Shift a raw field value into register position.
    pub const fn encode(&self, value: u32) -> Result<u32, ValueTooWide> {
        if value > self.max_value() {
            return Err(ValueTooWide {
                value,
                width: self.width,
            });
        }
        Ok(value << self.lsb)
    }

    /// Extract the field value from a raw register value.
    #[inline]
    pub const fn extract(&self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.lsb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_and_extract() {
        let field = Field::new(0x1400, 24, 1);
        assert_eq!(field.mask(), 1 << 24);
        let wide = Field::new(0x1408, 0, 32);
        assert_eq!(wide.mask(), 0xffff_ffff);
        assert_eq!(wide.extract(0xdead_beef), 0xdead_beef);
        let mid = Field::new(0x1528, 8, 4);
        assert_eq!(mid.mask(), 0xf00);
        assert_eq!(mid.extract(0x0000_0a55), 0xa);
    }

    #[test]
    fn test_encode_rejects_wide_values() {
        let field = Field::new(0x15d0, 9, 3);
        assert_eq!(field.encode(5), Ok(5 << 9));
        assert_eq!(
            field.encode(8),
            Err(ValueTooWide { value: 8, width: 3 })
        );
    }
}
