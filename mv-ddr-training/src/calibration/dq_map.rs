//! DQ pin to data bit mapping.
//!
//! Boards are free to swap the DQ pins within a byte. The per-bit registers of the PHY are
//! addressed by pad, so the stages writing per-bit values need to know which data bit is routed
//! to which pad. The DRAM multi purpose registers hold fixed patterns. Read in parallel mode,
//! every pin returns the bit of each pattern selected by the data bit it carries.

/// Default content of the multi purpose registers 0 to 2.
///
/// Bit `k` of the data bit index clears bit `k` of the pin readout of pattern `k`.
pub const MPR_PATTERNS: [u8; 3] = [0x55, 0x33, 0x0f];
/// Address distance between multi purpose register locations.
pub const MPR_LOCATION_STRIDE: u32 = 0x20;

/// Signature of `pin` in the readouts of the three patterns. Equal to the data bit of the pin.
#[inline]
pub fn pin_signature(readouts: &[u8; 3], pin: u8) -> u8 {
    readouts
        .iter()
        .enumerate()
        .fold(0, |sig, (k, byte)| sig | ((!byte >> pin) & 1) << k)
}

/// Data bit carried by every pin of a lane, [None] unless every bit shows up exactly once.
pub fn decode_lane(readouts: &[u8; 3]) -> Option<[u8; 8]> {
    let mut perm = [0; 8];
    let mut seen = 0u8;
    for (pin, slot) in perm.iter_mut().enumerate() {
        let sig = pin_signature(readouts, pin as u8);
        if seen & (1 << sig) != 0 {
            return None;
        }
        seen |= 1 << sig;
        *slot = sig;
    }
    Some(perm)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Readouts of a lane routing `perm[pin]` to each pin.
    fn readouts(perm: [u8; 8]) -> [u8; 3] {
        MPR_PATTERNS.map(|pattern| {
            perm.iter()
                .enumerate()
                .fold(0, |byte, (pin, bit)| byte | ((pattern >> bit) & 1) << pin)
        })
    }

    #[test]
    fn test_signature_is_data_bit() {
        for bit in 0..8 {
            let sig = MPR_PATTERNS
                .iter()
                .enumerate()
                .fold(0, |sig, (k, p)| sig | ((!p >> bit) & 1) << k);
            assert_eq!(sig, bit);
        }
    }

    #[test]
    fn test_swapped_pins() {
        let perm = [0, 1, 2, 5, 4, 3, 6, 7];
        let reads = readouts(perm);
        assert_eq!(pin_signature(&reads, 3), 5);
        assert_eq!(decode_lane(&reads), Some(perm));
    }

    #[test]
    fn test_identity() {
        let perm = [0, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(readouts(perm), MPR_PATTERNS);
        assert_eq!(decode_lane(&MPR_PATTERNS), Some(perm));
    }

    #[test]
    fn test_stuck_pin_rejected() {
        let mut reads = MPR_PATTERNS;
        // Pin 1 reads the same as pin 0.
        for byte in reads.iter_mut() {
            *byte = (*byte & !0x2) | ((*byte & 1) << 1);
        }
        assert_eq!(decode_lane(&reads), None);
    }
}
