use crate::types::BitWidth;

use super::op::{AddressOperand, InstructionOperand, Register};

/// Register that holds the runtime base of an [`Address::Indirect`] while
/// it is read or written.
pub const INDIRECT_BASE: Register = Register::D;

/// A storage location as the generator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// Globals and everything else in the main frame.
    Absolute(u32),
    /// Locals and parameters, relative to the frame's base pointer.
    Frame(i32),
    /// Relative to a pointer the code has already pushed on the stack.
    /// Array and pointer indexing end here once the scaled index is added.
    Indirect(i32),
}

impl Address {
    /// Folds nested offsets so `(x + a) + b` stays one address.
    pub fn offset(self, by: i32) -> Self {
        match self {
            Address::Absolute(address) => Address::Absolute(address.wrapping_add_signed(by)),
            Address::Frame(offset) => Address::Frame(offset + by),
            Address::Indirect(offset) => Address::Indirect(offset + by),
        }
    }

    pub fn is_indirect(self) -> bool {
        matches!(self, Address::Indirect(_))
    }

    /// Operand for the bytes at `extra` past this address. Indirect
    /// addresses expect their base in [`INDIRECT_BASE`].
    pub fn operand(self, extra: u32, width: BitWidth) -> InstructionOperand {
        let address = match self.offset(extra as i32) {
            Address::Absolute(address) => AddressOperand::Absolute(address),
            Address::Frame(offset) => AddressOperand::relative(Register::BP, offset),
            Address::Indirect(offset) => AddressOperand::relative(INDIRECT_BASE, offset),
        };
        InstructionOperand::memory(address, width)
    }
}

/// Splits a copy of `size` bytes into the widest chunks that fit, in
/// ascending address order.
pub fn chunks(size: u32) -> Vec<(u32, BitWidth)> {
    let mut result = Vec::new();
    let mut offset = 0;
    while offset < size {
        let remaining = size - offset;
        let width = [BitWidth::W64, BitWidth::W32, BitWidth::W16, BitWidth::W8]
            .into_iter()
            .find(|w| w.bytes() <= remaining)
            .unwrap_or(BitWidth::W8);
        result.push((offset, width));
        offset += width.bytes();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_fold() {
        assert_eq!(Address::Frame(-12).offset(4).offset(2), Address::Frame(-6));
        assert_eq!(Address::Absolute(100).offset(-4), Address::Absolute(96));
        assert_eq!(Address::Indirect(0).offset(8), Address::Indirect(8));
    }

    #[test]
    fn test_operand_modes() {
        assert_eq!(
            Address::Frame(-8).operand(4, BitWidth::W32),
            InstructionOperand::memory(AddressOperand::relative(Register::BP, -4), BitWidth::W32)
        );
        assert_eq!(
            Address::Indirect(2).operand(0, BitWidth::W8),
            InstructionOperand::memory(AddressOperand::relative(Register::D, 2), BitWidth::W8)
        );
        assert_eq!(
            Address::Absolute(64).operand(1, BitWidth::W16),
            InstructionOperand::memory(AddressOperand::Absolute(65), BitWidth::W16)
        );
    }

    #[test]
    fn test_chunks() {
        assert_eq!(chunks(9), vec![(0, BitWidth::W64), (8, BitWidth::W8)]);
        assert_eq!(
            chunks(7),
            vec![(0, BitWidth::W32), (4, BitWidth::W16), (6, BitWidth::W8)]
        );
        assert!(chunks(0).is_empty());
    }
}
