//! Digital output command encoder.
//!
//! The controller exposes one combined 64-bit digital output register but
//! accepts writes per 8-bit bank as a `(value, mask)` pair: only bits set in
//! `mask` are applied.  [`encode`] turns a single-channel request into such a
//! pair so that every other bit of the register, in the addressed bank and
//! outside it, is left alone.
//!
//! ```rust
//! use urbridge_hal::output::encode;
//! use urbridge_types::OutputBank;
//!
//! let write = encode(0b0000_0001, 5, 1, OutputBank::Standard).unwrap();
//! assert_eq!(write.mask, 0b0010_0000);
//! assert_eq!(write.value, 0b0010_0001);
//! assert_eq!(write.apply(0b0000_0001), 0b0010_0001);
//! ```

use urbridge_types::{BridgeError, OutputBank};

/// Highest addressable channel within a bank.
pub const MAX_CHANNEL: i64 = 7;

/// A masked partial write to one bank of the digital output register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskedWrite {
    pub bank: OutputBank,
    /// The bank's 8 bits with the addressed channel set or cleared.
    pub value: u8,
    /// Exactly one bit: the addressed channel.
    pub mask: u8,
}

impl MaskedWrite {
    /// The full register the controller ends up with after applying this
    /// write to `register`.
    pub fn apply(&self, register: u64) -> u64 {
        let shift = self.bank.offset();
        let mask = u64::from(self.mask) << shift;
        let value = u64::from(self.value) << shift;
        (register & !mask) | (value & mask)
    }
}

/// Compute the masked write that drives `channel` of `bank` to `value`.
///
/// `current` is the combined digital output register as last reported by the
/// controller.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidCommand`] when `channel` is outside `0..=7`
/// or `value` is not `0` or `1`.
pub fn encode(current: u64, channel: i64, value: i64, bank: OutputBank) -> Result<MaskedWrite, BridgeError> {
    if !(0..=MAX_CHANNEL).contains(&channel) {
        return Err(BridgeError::InvalidCommand(format!(
            "digital output must be in the range 0-{MAX_CHANNEL}, got {channel}"
        )));
    }
    if value != 0 && value != 1 {
        return Err(BridgeError::InvalidCommand(format!(
            "value must be 0 or 1, got {value}"
        )));
    }

    let offset = bank.offset();
    let bit = 1u64 << (channel as u32 + offset);
    let mut register = current & !bit;
    if value == 1 {
        register |= bit;
    }

    Ok(MaskedWrite {
        bank,
        value: ((register >> offset) & 0xFF) as u8,
        mask: ((bit >> offset) & 0xFF) as u8,
    })
}
