use crate::cpu::{AddressingMode, CPU};
use crate::mem::Mem;
use crate::opcodes;
use std::collections::HashMap;

/// Format one log line for the instruction at PC, in the conventional CPU-log
/// shape: address, raw bytes, disassembly with the resolved operand, then the
/// register file and cycle counter. Undocumented opcodes keep their `*`
/// prefix. The CPU is left untouched; only the operand reads hit memory.
pub fn trace<M: Mem>(cpu: &CPU, mem: &mut M) -> String {
    let opcodes: &HashMap<u8, &'static opcodes::OpCode> = &opcodes::OPCODES_MAP;

    let begin = cpu.program_counter;
    let code = mem.mem_read(begin);
    let ops = opcodes
        .get(&code)
        .unwrap_or_else(|| panic!("OpCode 0x{:02X} not recognized", code));

    let mut hex_dump = vec![code];

    let (mem_addr, stored_value) = match ops.mode {
        AddressingMode::Immediate
        | AddressingMode::Relative
        | AddressingMode::Indirect
        | AddressingMode::Accumulator
        | AddressingMode::Implied => (0, 0),
        _ => {
            let (addr, _) = cpu.get_absolute_address(mem, &ops.mode, begin.wrapping_add(1));
            (addr, mem.mem_read(addr))
        }
    };

    let operand = match ops.len {
        1 => match ops.mode {
            AddressingMode::Accumulator => "A ".to_string(),
            _ => String::new(),
        },
        2 => {
            let address = mem.mem_read(begin.wrapping_add(1));
            hex_dump.push(address);

            match ops.mode {
                AddressingMode::Immediate => format!("#${:02X}", address),
                AddressingMode::ZeroPage => format!("${:02X} = {:02X}", mem_addr, stored_value),
                AddressingMode::ZeroPageX => format!(
                    "${:02X},X @ {:02X} = {:02X}",
                    address, mem_addr, stored_value
                ),
                AddressingMode::ZeroPageY => format!(
                    "${:02X},Y @ {:02X} = {:02X}",
                    address, mem_addr, stored_value
                ),
                AddressingMode::IndirectX => format!(
                    "(${:02X},X) @ {:02X} = {:04X} = {:02X}",
                    address,
                    address.wrapping_add(cpu.register_x),
                    mem_addr,
                    stored_value
                ),
                AddressingMode::IndirectY => format!(
                    "(${:02X}),Y = {:04X} @ {:04X} = {:02X}",
                    address,
                    mem_addr.wrapping_sub(cpu.register_y as u16),
                    mem_addr,
                    stored_value
                ),
                AddressingMode::Relative => {
                    let dest = begin.wrapping_add(2).wrapping_add((address as i8) as u16);
                    format!("${:04X}", dest)
                }
                _ => panic!(
                    "unexpected addressing mode {:?} for 2-byte opcode 0x{:02X}",
                    ops.mode, code
                ),
            }
        }
        3 => {
            let address_lo = mem.mem_read(begin.wrapping_add(1));
            let address_hi = mem.mem_read(begin.wrapping_add(2));
            hex_dump.push(address_lo);
            hex_dump.push(address_hi);
            let address = (address_hi as u16) << 8 | (address_lo as u16);

            match ops.mode {
                AddressingMode::Indirect => {
                    let (jmp_addr, _) =
                        cpu.get_absolute_address(mem, &ops.mode, begin.wrapping_add(1));
                    format!("(${:04X}) = {:04X}", address, jmp_addr)
                }
                AddressingMode::Absolute => match code {
                    // jump targets are code, not data
                    0x4C | 0x20 => format!("${:04X}", address),
                    _ => format!("${:04X} = {:02X}", mem_addr, stored_value),
                },
                AddressingMode::AbsoluteX => format!(
                    "${:04X},X @ {:04X} = {:02X}",
                    address, mem_addr, stored_value
                ),
                AddressingMode::AbsoluteY => format!(
                    "${:04X},Y @ {:04X} = {:02X}",
                    address, mem_addr, stored_value
                ),
                _ => panic!(
                    "unexpected addressing mode {:?} for 3-byte opcode 0x{:02X}",
                    ops.mode, code
                ),
            }
        }
        _ => String::new(),
    };

    let hex_str = hex_dump
        .iter()
        .map(|z| format!("{:02X}", z))
        .collect::<Vec<String>>()
        .join(" ");
    let asm_str = format!(
        "{:04X}  {:8} {:>4} {}",
        begin, hex_str, ops.mnemonic, operand
    )
    .trim_end()
    .to_string();

    format!(
        "{:47} A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
        asm_str,
        cpu.register_a,
        cpu.register_x,
        cpu.register_y,
        cpu.status.bits(),
        cpu.stack_pointer,
        cpu.cycles
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::FlatRam;

    fn cpu_with_program(pc: u16, program: &[u8]) -> (CPU, FlatRam) {
        let mut ram = FlatRam::new();
        for (i, byte) in program.iter().enumerate() {
            ram.mem_write(pc.wrapping_add(i as u16), *byte);
        }
        let mut cpu = CPU::new();
        cpu.program_counter = pc;
        (cpu, ram)
    }

    #[test]
    fn test_trace_immediate() {
        let (mut cpu, mut ram) = cpu_with_program(0xC000, &[0xA9, 0x05]);
        cpu.register_a = 0x10;
        cpu.register_x = 0x20;
        cpu.register_y = 0x30;

        let line = trace(&cpu, &mut ram);

        assert!(
            line.starts_with("C000  A9 05     LDA #$05"),
            "got {:?}",
            line
        );
        assert!(line.ends_with("A:10 X:20 Y:30 P:24 SP:FD CYC:7"), "got {:?}", line);
    }

    #[test]
    fn test_trace_indirect_y() {
        let (mut cpu, mut ram) = cpu_with_program(0xC000, &[0xB1, 0x33]);
        ram.mem_write(0x33, 0x00);
        ram.mem_write(0x34, 0x04);
        ram.mem_write(0x0410, 0xAA);
        cpu.register_y = 0x10;

        let line = trace(&cpu, &mut ram);

        assert!(
            line.starts_with("C000  B1 33     LDA ($33),Y = 0400 @ 0410 = AA"),
            "got {:?}",
            line
        );
    }

    #[test]
    fn test_trace_jmp_indirect_shows_bugged_target() {
        let (cpu, mut ram) = cpu_with_program(0xC000, &[0x6C, 0xFF, 0x02]);
        ram.mem_write(0x02FF, 0x34);
        ram.mem_write(0x0200, 0x12);

        let line = trace(&cpu, &mut ram);

        assert!(
            line.starts_with("C000  6C FF 02  JMP ($02FF) = 1234"),
            "got {:?}",
            line
        );
    }

    #[test]
    fn test_trace_branch_destination() {
        let (mut cpu, mut ram) = cpu_with_program(0xC000, &[0xD0, 0xFE]);
        cpu.status = crate::cpu::CpuFlags::from_bits_truncate(0x24);

        let line = trace(&cpu, &mut ram);

        assert!(line.starts_with("C000  D0 FE     BNE $C000"), "got {:?}", line);
    }

    #[test]
    fn test_trace_illegal_opcode_prefix() {
        let (cpu, mut ram) = cpu_with_program(0xC000, &[0xA7, 0x10]);
        ram.mem_write(0x10, 0x8F);

        let line = trace(&cpu, &mut ram);

        assert!(
            line.starts_with("C000  A7 10    *LAX $10 = 8F"),
            "got {:?}",
            line
        );
    }

    #[test]
    fn test_trace_does_not_mutate_cpu() {
        let (cpu, mut ram) = cpu_with_program(0xC000, &[0xE6, 0x10]);
        ram.mem_write(0x10, 0x41);

        let _ = trace(&cpu, &mut ram);

        assert_eq!(cpu.program_counter, 0xC000);
        assert_eq!(ram.mem_read(0x10), 0x41);
    }
}
