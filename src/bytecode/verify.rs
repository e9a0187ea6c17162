use thiserror::Error;

use super::op::{Instruction, Opcode, UNRESOLVED_OFFSET};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("unresolved offset at ip={ip} ({opcode})")]
    UnresolvedOffset { ip: usize, opcode: Opcode },
    #[error("{opcode} at ip={ip} targets {target}, outside 0..{len}")]
    JumpOutOfRange {
        ip: usize,
        opcode: Opcode,
        target: i64,
        len: usize,
    },
    #[error("{opcode} at ip={ip} is missing operand {operand}")]
    MissingOperand {
        ip: usize,
        opcode: Opcode,
        operand: usize,
    },
    #[error("{opcode} at ip={ip} writes to an immediate")]
    ImmediateDestination { ip: usize, opcode: Opcode },
    #[error("{opcode} at ip={ip} mixes widths {first} and {second}")]
    WidthMismatch {
        ip: usize,
        opcode: Opcode,
        first: u32,
        second: u32,
    },
}

/// Checks the final instruction array before it reaches the processor.
///
/// A linear scan: every instruction has its operands, nothing writes to an
/// immediate, binary operands agree on width, and every relative jump or
/// call has been patched to land inside the program.
pub fn verify(instructions: &[Instruction]) -> Result<(), VerifyError> {
    for (ip, instruction) in instructions.iter().enumerate() {
        check_instruction(ip, instruction, instructions.len())?;
    }
    Ok(())
}

fn check_instruction(ip: usize, instruction: &Instruction, len: usize) -> Result<(), VerifyError> {
    let opcode = instruction.opcode;
    let operands = [instruction.operand1, instruction.operand2];
    for (index, operand) in operands.iter().take(opcode.arity()).enumerate() {
        if operand.is_none() {
            return Err(VerifyError::MissingOperand {
                ip,
                opcode,
                operand: index + 1,
            });
        }
    }

    if opcode.writes_first() && instruction.operand1.is_some_and(|o| o.is_immediate()) {
        return Err(VerifyError::ImmediateDestination { ip, opcode });
    }

    if opcode.requires_equal_widths() {
        if let (Some(first), Some(second)) = (instruction.operand1, instruction.operand2) {
            if first.width() != second.width() {
                return Err(VerifyError::WidthMismatch {
                    ip,
                    opcode,
                    first: first.width().bits(),
                    second: second.width().bits(),
                });
            }
        }
    }

    if let Some(offset) = instruction.relative_offset() {
        if offset == UNRESOLVED_OFFSET {
            return Err(VerifyError::UnresolvedOffset { ip, opcode });
        }
        let target = ip as i64 + offset as i64;
        if target < 0 || target >= len as i64 {
            return Err(VerifyError::JumpOutOfRange {
                ip,
                opcode,
                target,
                len,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{InstructionOperand, Register};
    use crate::types::BitWidth;

    fn push(value: u64) -> Instruction {
        Instruction::unary(Opcode::Push, InstructionOperand::immediate(value, BitWidth::W32))
    }

    fn exit() -> Instruction {
        Instruction::unary(Opcode::Exit, InstructionOperand::immediate(0, BitWidth::W32))
    }

    #[test]
    fn test_simple_program() {
        let ops = vec![push(1), Instruction::jump(1), exit()];
        assert!(verify(&ops).is_ok());
    }

    #[test]
    fn test_unresolved_offset() {
        let ops = vec![Instruction::jump(UNRESOLVED_OFFSET), exit()];
        assert_eq!(
            verify(&ops),
            Err(VerifyError::UnresolvedOffset {
                ip: 0,
                opcode: Opcode::Jump
            })
        );
    }

    #[test]
    fn test_jump_out_of_range() {
        let ops = vec![push(1), Instruction::call(5)];
        let err = verify(&ops).unwrap_err();
        assert!(matches!(err, VerifyError::JumpOutOfRange { target: 6, .. }));
        assert!(err.to_string().contains("outside 0..2"));
    }

    #[test]
    fn test_backward_jump_in_range() {
        let ops = vec![push(1), Instruction::jump(-1)];
        assert!(verify(&ops).is_ok());
    }

    #[test]
    fn test_immediate_destination() {
        let ops = vec![Instruction::unary(
            Opcode::PopTo,
            InstructionOperand::immediate(0, BitWidth::W32),
        )];
        assert!(matches!(
            verify(&ops),
            Err(VerifyError::ImmediateDestination { .. })
        ));
    }

    #[test]
    fn test_width_mismatch() {
        let ops = vec![Instruction::binary(
            Opcode::MathAdd,
            InstructionOperand::register(Register::A, BitWidth::W32),
            InstructionOperand::register(Register::B, BitWidth::W16),
        )];
        assert_eq!(
            verify(&ops).unwrap_err().to_string(),
            "ADD at ip=0 mixes widths 32 and 16"
        );
    }

    #[test]
    fn test_extension_may_mix_widths() {
        let ops = vec![Instruction::binary(
            Opcode::MoveSignExtend,
            InstructionOperand::register(Register::A, BitWidth::W64),
            InstructionOperand::register(Register::A, BitWidth::W8),
        )];
        assert!(verify(&ops).is_ok());
    }

    #[test]
    fn test_missing_operand() {
        let ops = vec![Instruction::nullary(Opcode::Push)];
        assert!(matches!(
            verify(&ops),
            Err(VerifyError::MissingOperand { operand: 1, .. })
        ));
    }
}
