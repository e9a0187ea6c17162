use std::collections::HashMap;

use crate::bytecode::{BytecodeProgram, DebugInformation, Instruction, Opcode};

/// Print disassembly of a bytecode program
pub fn print_program(program: &BytecodeProgram) {
    print!("{}", disassemble_program(program));
}

/// Disassembly of a whole program, one section per function.
pub fn disassemble_program(program: &BytecodeProgram) -> String {
    let mut output = String::new();
    output.push_str("=== BYTECODE PROGRAM ===\n\n");
    output.push_str(&format!(
        "memory: heap {} bytes, stack {} bytes, pointer {} bytes\n\n",
        program.layout.heap_size, program.layout.stack_size, program.layout.pointer_size
    ));

    let mut sections: Vec<(String, usize, usize)> = Vec::new();
    let entry_end = program
        .debug
        .functions
        .iter()
        .map(|f| f.start as usize)
        .min()
        .unwrap_or(program.instructions.len());
    sections.push(("<main>".to_string(), 0, entry_end));
    let mut functions: Vec<_> = program.debug.functions.iter().collect();
    functions.sort_by_key(|f| f.start);
    for function in functions {
        sections.push((function.name.clone(), function.start as usize, function.end as usize));
    }

    let jump_targets = collect_jump_targets(&program.instructions);
    for (name, start, end) in sections {
        let end = end.min(program.instructions.len());
        let start = start.min(end);
        output.push_str("════════════════════════════════════════\n");
        output.push_str(&format!(" {}\n", name));
        output.push_str(&format!(" {} instructions\n", end - start));
        output.push_str("════════════════════════════════════════\n");
        for ip in start..end {
            write_line(
                &mut output,
                &program.instructions[ip],
                ip,
                &jump_targets,
                Some(&program.debug),
            );
        }
        output.push('\n');
    }
    output
}

fn collect_jump_targets(instructions: &[Instruction]) -> Vec<usize> {
    let mut targets = Vec::new();

    for (ip, instruction) in instructions.iter().enumerate() {
        if instruction.opcode == Opcode::Call {
            continue;
        }
        if let Some(offset) = instruction.relative_offset() {
            let target = (ip as i64 + offset as i64) as usize;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    targets
}

fn write_line(
    output: &mut String,
    instruction: &Instruction,
    ip: usize,
    jump_targets: &[usize],
    debug: Option<&DebugInformation>,
) {
    if jump_targets.contains(&ip) {
        output.push_str("      ┌──────────────────────────────────\n");
    }

    output.push_str(&format!("{:04} ", ip));

    if jump_targets.contains(&ip) {
        output.push_str("► ");
    } else {
        output.push_str("  ");
    }

    output.push_str(&format_instruction(instruction, ip, debug));
    output.push('\n');
}

fn format_instruction(instruction: &Instruction, ip: usize, debug: Option<&DebugInformation>) -> String {
    let mnemonic = format!("{:<11}", instruction.opcode.name());
    match (instruction.opcode, instruction.relative_offset()) {
        (Opcode::Call, Some(offset)) => {
            let target = ip as i64 + offset as i64;
            let name = debug
                .and_then(|d| d.function_at(target as u32))
                .map(|f| format!(" {}", f.name))
                .unwrap_or_default();
            format!("{} {:+} (→ {:04}){}", mnemonic, offset, target, name)
        }
        (_, Some(offset)) => {
            let target = ip as i64 + offset as i64;
            let direction = if offset < 0 { "↑" } else { "↓" };
            match instruction.opcode {
                Opcode::Jump => format!("{} {:+} {} (→ {:04})", mnemonic, offset, direction, target),
                _ => {
                    let condition = instruction
                        .operand1
                        .map(|o| o.to_string())
                        .unwrap_or_default();
                    format!(
                        "{} {}, {:+} {} (→ {:04})",
                        mnemonic, condition, offset, direction, target
                    )
                }
            }
        }
        _ => {
            let mut text = instruction.opcode.name().to_string();
            if let Some(first) = &instruction.operand1 {
                text = format!("{} {}", mnemonic, first);
            }
            if let Some(second) = &instruction.operand2 {
                text.push_str(&format!(", {}", second));
            }
            text
        }
    }
}

// =============================================================================
// String output (for testing/logging)
// =============================================================================

/// Return disassembly as a String
pub fn disassemble_to_string(instructions: &[Instruction]) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(instructions);

    for (ip, instruction) in instructions.iter().enumerate() {
        write_line(&mut output, instruction, ip, &jump_targets, None);
    }

    output
}

// =============================================================================
// Statistics
// =============================================================================

/// Print bytecode statistics
pub fn print_stats(program: &BytecodeProgram) {
    println!("=== BYTECODE STATISTICS ===\n");

    let total = program.instructions.len();
    println!("Functions:        {}", program.debug.functions.len());
    println!("Globals:          {}", program.debug.globals.len());
    println!("Externals:        {}", program.externals.len());
    println!("Instructions:     {}", total);
    println!();

    let counts = count_opcodes(&program.instructions);
    println!("Op frequency:");
    let mut counts: Vec<_> = counts.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    for (op, count) in counts.iter().take(10) {
        let pct = (**count as f64 / total.max(1) as f64) * 100.0;
        println!("  {:<14} {:>4} ({:>5.1}%)", op, count, pct);
    }
}

fn count_opcodes(instructions: &[Instruction]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for instruction in instructions {
        *counts.entry(instruction.opcode.name()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{FunctionMapping, InstructionOperand, MemoryLayout, Register};
    use crate::types::BitWidth;

    fn push(value: u64) -> Instruction {
        Instruction::unary(Opcode::Push, InstructionOperand::immediate(value, BitWidth::W32))
    }

    #[test]
    fn test_jump_direction_arrows() {
        let ops = vec![
            Instruction::jump(1),
            Instruction::jump(-1),
        ];

        let output = disassemble_to_string(&ops);
        assert!(output.contains("+1 ↓ (→ 0001)"));
        assert!(output.contains("-1 ↑ (→ 0000)"));
    }

    #[test]
    fn test_jump_target_marker() {
        let ops = vec![
            Instruction::binary(
                Opcode::JumpIfZero,
                InstructionOperand::register(Register::A, BitWidth::W8),
                InstructionOperand::offset(2),
            ),
            push(1),
            push(2),
        ];

        let output = disassemble_to_string(&ops);
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].contains("JUMP_ZERO   a:8, +2"));
        assert!(lines[3].starts_with("0002 ► PUSH"));
    }

    #[test]
    fn test_call_shows_function_name() {
        let program = BytecodeProgram {
            instructions: vec![
                Instruction::call(2),
                Instruction::unary(Opcode::Exit, InstructionOperand::immediate(0, BitWidth::W32)),
                Instruction::unary(Opcode::Return, InstructionOperand::immediate(0, BitWidth::W32)),
            ],
            layout: MemoryLayout::default(),
            externals: Vec::new(),
            debug: DebugInformation {
                functions: vec![FunctionMapping {
                    name: "void tick()".to_string(),
                    start: 2,
                    end: 3,
                }],
                ..DebugInformation::default()
            },
        };

        let output = disassemble_program(&program);
        assert!(output.contains("(→ 0002) void tick()"));
        assert!(output.contains(" <main>\n 2 instructions"));
        assert!(output.contains(" void tick()\n 1 instructions"));
    }

    #[test]
    fn test_op_counts() {
        let ops = vec![
            push(1),
            push(2),
            Instruction::binary(
                Opcode::MathAdd,
                InstructionOperand::register(Register::A, BitWidth::W32),
                InstructionOperand::register(Register::B, BitWidth::W32),
            ),
            Instruction::nullary(Opcode::Nop),
        ];

        let counts = count_opcodes(&ops);
        assert_eq!(counts.get("PUSH"), Some(&2));
        assert_eq!(counts.get("ADD"), Some(&1));
        assert_eq!(counts.get("NOP"), Some(&1));
    }
}
