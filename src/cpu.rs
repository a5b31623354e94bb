use crate::mem::Mem;
use crate::opcodes;
use std::collections::HashMap;

bitflags! {
    /// Processor status byte. Bit 5 is hard-wired to 1 on the real chip and
    /// is forced on whenever the byte becomes observable (pushes, interrupt
    /// entry). The decimal flag is storage only; arithmetic ignores it.
    #[derive(Clone, Copy)]
    pub struct CpuFlags: u8 {
        const CARRY             = 0b0000_0001;
        const ZERO              = 0b0000_0010;
        const INTERRUPT_DISABLE = 0b0000_0100;
        const DECIMAL_MODE      = 0b0000_1000;
        const BREAK             = 0b0001_0000;
        const UNUSED            = 0b0010_0000;
        const OVERFLOW          = 0b0100_0000;
        const NEGATIVE          = 0b1000_0000;
    }
}

const STACK_BASE: u16 = 0x0100;
const STACK_RESET: u8 = 0xFD;
const STATUS_RESET: u8 = 0b0010_0100;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Cycles spent on the internal startup sequence before the first fetch.
const RESET_CYCLES: u64 = 7;

/// The constant the unstable XAA/LXA opcodes OR into the accumulator.
const XAA_MAGIC: u8 = 0xEE;

/// The 6502 core of the NES. Owns only the register file and the pending
/// interrupt latches; memory is borrowed for the duration of each call.
pub struct CPU {
    pub register_a: u8,
    pub register_x: u8,
    pub register_y: u8,
    pub status: CpuFlags,
    pub program_counter: u16,
    pub stack_pointer: u8,

    pub nmi_pending: bool,
    pub irq_pending: bool,

    pub cycles: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum AddressingMode {
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectX,
    IndirectY,
    Relative,
    Indirect,
    Accumulator,
    Implied,
}

fn page_cross(addr1: u16, addr2: u16) -> bool {
    addr1 & 0xFF00 != addr2 & 0xFF00
}

mod interrupt {
    use super::{IRQ_VECTOR, NMI_VECTOR};

    pub(super) struct Interrupt {
        pub(super) vector_addr: u16,
        pub(super) b_flag_mask: u8,
        pub(super) cpu_cycles: u8,
    }

    pub(super) const NMI: Interrupt = Interrupt {
        vector_addr: NMI_VECTOR,
        b_flag_mask: 0b0010_0000, // Break clear for hardware interrupts
        cpu_cycles: 7,
    };

    pub(super) const IRQ: Interrupt = Interrupt {
        vector_addr: IRQ_VECTOR,
        b_flag_mask: 0b0010_0000,
        cpu_cycles: 7,
    };
}

impl CPU {
    /// Power-on register file. PC stays at 0 until [`CPU::reset`] loads the
    /// reset vector, or until the host writes the fields directly.
    pub fn new() -> Self {
        CPU {
            register_a: 0,
            register_x: 0,
            register_y: 0,
            stack_pointer: STACK_RESET,
            program_counter: 0,
            status: CpuFlags::from_bits_truncate(STATUS_RESET),
            nmi_pending: false,
            irq_pending: false,
            cycles: RESET_CYCLES,
        }
    }

    /// Re-initialize in place and reload PC from the reset vector.
    pub fn reset<M: Mem>(&mut self, mem: &mut M) {
        self.register_a = 0;
        self.register_x = 0;
        self.register_y = 0;
        self.stack_pointer = STACK_RESET;
        self.status = CpuFlags::from_bits_truncate(STATUS_RESET);
        self.program_counter = mem.mem_read_u16(RESET_VECTOR);
        self.nmi_pending = false;
        self.irq_pending = false;
        self.cycles = RESET_CYCLES;
    }

    /// Latch a non-maskable interrupt. Edge-triggered: stays pending until
    /// serviced at the top of a `step`.
    pub fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Latch a maskable interrupt request. Held while InterruptDisable is
    /// set and serviced once it clears.
    pub fn irq(&mut self) {
        self.irq_pending = true;
    }

    fn tick(&mut self, cycles: u8) {
        self.cycles += cycles as u64;
    }

    /// Resolve an addressing mode against operand bytes stored at `addr`,
    /// returning the effective address and whether indexing carried into a
    /// new page. Performs the operand reads but never touches PC.
    ///
    /// Indirect pointers fetched from the zero page wrap within it, and
    /// `JMP (ind)` reproduces the hardware bug: a pointer ending in 0xFF
    /// takes its high byte from the start of the same page.
    pub fn get_absolute_address<M: Mem>(
        &self,
        mem: &mut M,
        mode: &AddressingMode,
        addr: u16,
    ) -> (u16, bool) {
        match mode {
            AddressingMode::Immediate => (addr, false),

            AddressingMode::ZeroPage => (mem.mem_read(addr) as u16, false),

            AddressingMode::ZeroPageX => {
                let addr = mem.mem_read(addr).wrapping_add(self.register_x) as u16;
                (addr, false)
            }

            AddressingMode::ZeroPageY => {
                let addr = mem.mem_read(addr).wrapping_add(self.register_y) as u16;
                (addr, false)
            }

            AddressingMode::Absolute => (mem.mem_read_u16(addr), false),

            AddressingMode::AbsoluteX => {
                let base = mem.mem_read_u16(addr);
                let addr = base.wrapping_add(self.register_x as u16);
                (addr, page_cross(base, addr))
            }

            AddressingMode::AbsoluteY => {
                let base = mem.mem_read_u16(addr);
                let addr = base.wrapping_add(self.register_y as u16);
                (addr, page_cross(base, addr))
            }

            AddressingMode::IndirectX => {
                let base = mem.mem_read(addr);
                let ptr = base.wrapping_add(self.register_x);
                let lo = mem.mem_read(ptr as u16);
                let hi = mem.mem_read(ptr.wrapping_add(1) as u16);
                ((hi as u16) << 8 | (lo as u16), false)
            }

            AddressingMode::IndirectY => {
                let base = mem.mem_read(addr);
                let lo = mem.mem_read(base as u16);
                let hi = mem.mem_read(base.wrapping_add(1) as u16);
                let deref_base = (hi as u16) << 8 | (lo as u16);
                let deref = deref_base.wrapping_add(self.register_y as u16);
                (deref, page_cross(deref_base, deref))
            }

            AddressingMode::Relative => {
                let offset = mem.mem_read(addr) as i8;
                let after = addr.wrapping_add(1);
                let dest = after.wrapping_add(offset as u16);
                (dest, page_cross(after, dest))
            }

            AddressingMode::Indirect => {
                let ptr = mem.mem_read_u16(addr);
                let addr = if ptr & 0x00FF == 0x00FF {
                    let lo = mem.mem_read(ptr);
                    let hi = mem.mem_read(ptr & 0xFF00);
                    (hi as u16) << 8 | (lo as u16)
                } else {
                    mem.mem_read_u16(ptr)
                };
                (addr, false)
            }

            _ => panic!("Addressing mode {:?} has no memory operand", mode),
        }
    }

    fn update_zero_and_negative_flags(&mut self, result: u8) {
        self.status.set(CpuFlags::ZERO, result == 0);
        self.status.set(CpuFlags::NEGATIVE, result & 0x80 != 0);
    }

    fn stack_push<M: Mem>(&mut self, mem: &mut M, data: u8) {
        mem.mem_write(STACK_BASE + self.stack_pointer as u16, data);
        self.stack_pointer = self.stack_pointer.wrapping_sub(1);
    }

    fn stack_pop<M: Mem>(&mut self, mem: &mut M) -> u8 {
        self.stack_pointer = self.stack_pointer.wrapping_add(1);
        mem.mem_read(STACK_BASE + self.stack_pointer as u16)
    }

    fn stack_push_u16<M: Mem>(&mut self, mem: &mut M, data: u16) {
        let hi = (data >> 8) as u8;
        let lo = (data & 0xff) as u8;
        self.stack_push(mem, hi);
        self.stack_push(mem, lo);
    }

    fn stack_pop_u16<M: Mem>(&mut self, mem: &mut M) -> u16 {
        let lo = self.stack_pop(mem) as u16;
        let hi = self.stack_pop(mem) as u16;
        hi << 8 | lo
    }

    /// A + data + C, setting C from bit 8 and V from the sign rule. SBC goes
    /// through here with the operand inverted.
    fn add_to_register_a(&mut self, data: u8) {
        let carry_in = if self.status.contains(CpuFlags::CARRY) {
            1
        } else {
            0
        };
        let sum = self.register_a as u16 + data as u16 + carry_in;

        self.status.set(CpuFlags::CARRY, sum > 0xFF);

        let result = sum as u8;

        // V = (A^result) & (data^result) & 0x80
        let overflow = (self.register_a ^ result) & (data ^ result) & 0x80 != 0;
        self.status.set(CpuFlags::OVERFLOW, overflow);

        self.register_a = result;
        self.update_zero_and_negative_flags(result);
    }

    fn sub_from_register_a(&mut self, data: u8) {
        self.add_to_register_a(!data);
    }

    fn compare<M: Mem>(
        &mut self,
        mem: &mut M,
        mode: &AddressingMode,
        ptr: u16,
        compare_with: u8,
    ) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let data = mem.mem_read(addr);

        self.status.set(CpuFlags::CARRY, compare_with >= data);
        self.update_zero_and_negative_flags(compare_with.wrapping_sub(data));

        page_crossed
    }

    /// PC already sits one past the operand when this runs, so the offset is
    /// relative to the instruction-after-branch address, and the page-cross
    /// penalty compares against that same address.
    fn branch<M: Mem>(&mut self, mem: &mut M, ptr: u16, condition: bool) {
        let offset = mem.mem_read(ptr) as i8;
        if condition {
            self.tick(1);

            let dest = self.program_counter.wrapping_add(offset as u16);
            if page_cross(self.program_counter, dest) {
                self.tick(1);
            }
            self.program_counter = dest;
        }
    }

    /// Hardware interrupt entry: push PC and P (Break clear, Unused set),
    /// set InterruptDisable, load the vector.
    fn interrupt<M: Mem>(&mut self, mem: &mut M, interrupt: interrupt::Interrupt) {
        self.stack_push_u16(mem, self.program_counter);

        let mut status = self.status;
        status.set(CpuFlags::BREAK, interrupt.b_flag_mask & 0b0001_0000 != 0);
        status.insert(CpuFlags::UNUSED);
        self.stack_push(mem, status.bits());

        self.status.insert(CpuFlags::INTERRUPT_DISABLE);
        self.program_counter = mem.mem_read_u16(interrupt.vector_addr);

        self.tick(interrupt.cpu_cycles);
    }

    // Official instructions

    fn lda<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.register_a = value;
        self.update_zero_and_negative_flags(value);
        page_crossed
    }

    fn ldx<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.register_x = value;
        self.update_zero_and_negative_flags(value);
        page_crossed
    }

    fn ldy<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.register_y = value;
        self.update_zero_and_negative_flags(value);
        page_crossed
    }

    fn sta<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        mem.mem_write(addr, self.register_a);
    }

    fn stx<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        mem.mem_write(addr, self.register_x);
    }

    fn sty<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        mem.mem_write(addr, self.register_y);
    }

    fn adc<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.add_to_register_a(value);
        page_crossed
    }

    fn sbc<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.sub_from_register_a(value);
        page_crossed
    }

    fn and<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.register_a &= value;
        self.update_zero_and_negative_flags(self.register_a);
        page_crossed
    }

    fn eor<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.register_a ^= value;
        self.update_zero_and_negative_flags(self.register_a);
        page_crossed
    }

    fn ora<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);
        self.register_a |= value;
        self.update_zero_and_negative_flags(self.register_a);
        page_crossed
    }

    fn asl<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> u8 {
        match mode {
            AddressingMode::Accumulator => {
                self.status
                    .set(CpuFlags::CARRY, self.register_a & 0x80 != 0);
                self.register_a <<= 1;
                self.update_zero_and_negative_flags(self.register_a);
                self.register_a
            }
            _ => {
                let (addr, _) = self.get_absolute_address(mem, mode, ptr);
                let mut value = mem.mem_read(addr);
                self.status.set(CpuFlags::CARRY, value & 0x80 != 0);
                value <<= 1;
                mem.mem_write(addr, value);
                self.update_zero_and_negative_flags(value);
                value
            }
        }
    }

    fn lsr<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> u8 {
        match mode {
            AddressingMode::Accumulator => {
                self.status
                    .set(CpuFlags::CARRY, self.register_a & 0x01 != 0);
                self.register_a >>= 1;
                self.update_zero_and_negative_flags(self.register_a);
                self.register_a
            }
            _ => {
                let (addr, _) = self.get_absolute_address(mem, mode, ptr);
                let mut value = mem.mem_read(addr);
                self.status.set(CpuFlags::CARRY, value & 0x01 != 0);
                value >>= 1;
                mem.mem_write(addr, value);
                self.update_zero_and_negative_flags(value);
                value
            }
        }
    }

    fn rol<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> u8 {
        let old_carry = self.status.contains(CpuFlags::CARRY);

        match mode {
            AddressingMode::Accumulator => {
                self.status
                    .set(CpuFlags::CARRY, self.register_a & 0x80 != 0);
                self.register_a = (self.register_a << 1) | (old_carry as u8);
                self.update_zero_and_negative_flags(self.register_a);
                self.register_a
            }
            _ => {
                let (addr, _) = self.get_absolute_address(mem, mode, ptr);
                let mut value = mem.mem_read(addr);
                self.status.set(CpuFlags::CARRY, value & 0x80 != 0);
                value = (value << 1) | (old_carry as u8);
                mem.mem_write(addr, value);
                self.update_zero_and_negative_flags(value);
                value
            }
        }
    }

    fn ror<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> u8 {
        let old_carry = self.status.contains(CpuFlags::CARRY);

        match mode {
            AddressingMode::Accumulator => {
                self.status
                    .set(CpuFlags::CARRY, self.register_a & 0x01 != 0);
                self.register_a = (self.register_a >> 1) | ((old_carry as u8) << 7);
                self.update_zero_and_negative_flags(self.register_a);
                self.register_a
            }
            _ => {
                let (addr, _) = self.get_absolute_address(mem, mode, ptr);
                let mut value = mem.mem_read(addr);
                self.status.set(CpuFlags::CARRY, value & 0x01 != 0);
                value = (value >> 1) | ((old_carry as u8) << 7);
                mem.mem_write(addr, value);
                self.update_zero_and_negative_flags(value);
                value
            }
        }
    }

    fn inc<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> u8 {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr).wrapping_add(1);
        mem.mem_write(addr, value);
        self.update_zero_and_negative_flags(value);
        value
    }

    fn dec<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> u8 {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr).wrapping_sub(1);
        mem.mem_write(addr, value);
        self.update_zero_and_negative_flags(value);
        value
    }

    fn inx(&mut self) {
        self.register_x = self.register_x.wrapping_add(1);
        self.update_zero_and_negative_flags(self.register_x);
    }

    fn iny(&mut self) {
        self.register_y = self.register_y.wrapping_add(1);
        self.update_zero_and_negative_flags(self.register_y);
    }

    fn dex(&mut self) {
        self.register_x = self.register_x.wrapping_sub(1);
        self.update_zero_and_negative_flags(self.register_x);
    }

    fn dey(&mut self) {
        self.register_y = self.register_y.wrapping_sub(1);
        self.update_zero_and_negative_flags(self.register_y);
    }

    fn tax(&mut self) {
        self.register_x = self.register_a;
        self.update_zero_and_negative_flags(self.register_x);
    }

    fn tay(&mut self) {
        self.register_y = self.register_a;
        self.update_zero_and_negative_flags(self.register_y);
    }

    fn txa(&mut self) {
        self.register_a = self.register_x;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn tya(&mut self) {
        self.register_a = self.register_y;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn tsx(&mut self) {
        self.register_x = self.stack_pointer;
        self.update_zero_and_negative_flags(self.register_x);
    }

    // TXS is the one transfer with no flag effect.
    fn txs(&mut self) {
        self.stack_pointer = self.register_x;
    }

    fn pha<M: Mem>(&mut self, mem: &mut M) {
        self.stack_push(mem, self.register_a);
    }

    fn pla<M: Mem>(&mut self, mem: &mut M) {
        self.register_a = self.stack_pop(mem);
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn php<M: Mem>(&mut self, mem: &mut M) {
        let mut status = self.status;
        status.insert(CpuFlags::BREAK);
        status.insert(CpuFlags::UNUSED);
        self.stack_push(mem, status.bits());
    }

    fn plp<M: Mem>(&mut self, mem: &mut M) {
        let status_bits = self.stack_pop(mem);
        self.status = CpuFlags::from_bits_truncate(status_bits);
        self.status.remove(CpuFlags::BREAK);
        self.status.insert(CpuFlags::UNUSED);
    }

    fn bit<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr);

        self.status.set(CpuFlags::ZERO, self.register_a & value == 0);
        self.status.set(CpuFlags::NEGATIVE, value & 0x80 != 0);
        self.status.set(CpuFlags::OVERFLOW, value & 0x40 != 0);
    }

    fn jmp<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        self.program_counter = addr;
    }

    // Pushes the address of the last operand byte, i.e. return minus one.
    fn jsr<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        self.stack_push_u16(mem, ptr.wrapping_add(1));
        self.program_counter = mem.mem_read_u16(ptr);
    }

    fn rts<M: Mem>(&mut self, mem: &mut M) {
        self.program_counter = self.stack_pop_u16(mem).wrapping_add(1);
    }

    fn rti<M: Mem>(&mut self, mem: &mut M) {
        let status_bits = self.stack_pop(mem);
        self.status = CpuFlags::from_bits_truncate(status_bits);
        self.status.remove(CpuFlags::BREAK);
        self.status.insert(CpuFlags::UNUSED);
        self.program_counter = self.stack_pop_u16(mem);
    }

    /// Software interrupt: the byte after the opcode is padding, so the
    /// pushed return address skips it.
    fn brk<M: Mem>(&mut self, mem: &mut M) {
        self.stack_push_u16(mem, self.program_counter.wrapping_add(1));

        let mut status = self.status;
        status.insert(CpuFlags::BREAK);
        status.insert(CpuFlags::UNUSED);
        self.stack_push(mem, status.bits());

        self.status.insert(CpuFlags::INTERRUPT_DISABLE);
        self.program_counter = mem.mem_read_u16(IRQ_VECTOR);
    }

    // Undocumented instructions

    fn lax<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let page_crossed = self.lda(mem, mode, ptr);
        self.register_x = self.register_a;
        page_crossed
    }

    fn sax<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let (addr, _) = self.get_absolute_address(mem, mode, ptr);
        mem.mem_write(addr, self.register_a & self.register_x);
    }

    fn dcp<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let value = self.dec(mem, mode, ptr);
        self.status.set(CpuFlags::CARRY, self.register_a >= value);
        self.update_zero_and_negative_flags(self.register_a.wrapping_sub(value));
    }

    fn isc<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let value = self.inc(mem, mode, ptr);
        self.sub_from_register_a(value);
    }

    fn slo<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let value = self.asl(mem, mode, ptr);
        self.register_a |= value;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn rla<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let value = self.rol(mem, mode, ptr);
        self.register_a &= value;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn sre<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let value = self.lsr(mem, mode, ptr);
        self.register_a ^= value;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn rra<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        let value = self.ror(mem, mode, ptr);
        self.add_to_register_a(value);
    }

    fn anc<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        let value = mem.mem_read(ptr);
        self.register_a &= value;
        self.update_zero_and_negative_flags(self.register_a);
        self.status
            .set(CpuFlags::CARRY, self.status.contains(CpuFlags::NEGATIVE));
    }

    fn alr<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        let value = mem.mem_read(ptr);
        self.register_a &= value;
        self.status
            .set(CpuFlags::CARRY, self.register_a & 0x01 != 0);
        self.register_a >>= 1;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn arr<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        let value = mem.mem_read(ptr);
        self.register_a &= value;

        let old_carry = self.status.contains(CpuFlags::CARRY);
        self.register_a = (self.register_a >> 1) | ((old_carry as u8) << 7);

        let bit_5 = (self.register_a >> 5) & 1;
        let bit_6 = (self.register_a >> 6) & 1;

        self.status.set(CpuFlags::CARRY, bit_6 != 0);
        self.status.set(CpuFlags::OVERFLOW, bit_5 ^ bit_6 != 0);
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn axs<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        let value = mem.mem_read(ptr);
        let x_and_a = self.register_x & self.register_a;

        self.status.set(CpuFlags::CARRY, x_and_a >= value);
        self.register_x = x_and_a.wrapping_sub(value);
        self.update_zero_and_negative_flags(self.register_x);
    }

    fn lxa<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        let value = mem.mem_read(ptr);
        self.register_a = (self.register_a | XAA_MAGIC) & value;
        self.register_x = self.register_a;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn xaa<M: Mem>(&mut self, mem: &mut M, ptr: u16) {
        let value = mem.mem_read(ptr);
        self.register_a = (self.register_a | XAA_MAGIC) & self.register_x & value;
        self.update_zero_and_negative_flags(self.register_a);
    }

    fn las<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
        let value = mem.mem_read(addr) & self.stack_pointer;
        self.register_a = value;
        self.register_x = value;
        self.stack_pointer = value;
        self.update_zero_and_negative_flags(value);
        page_crossed
    }

    /// Unstable high-byte stores (AHX, SHX, SHY, TAS): the stored value is
    /// masked with the pre-index base's high byte plus one, and when the
    /// index carries into a new page that value also replaces the high byte
    /// of the store address.
    fn masked_store<M: Mem>(
        &mut self,
        mem: &mut M,
        mode: &AddressingMode,
        ptr: u16,
        reg_mask: u8,
    ) {
        let (base, index) = match mode {
            AddressingMode::AbsoluteX => (mem.mem_read_u16(ptr), self.register_x),
            AddressingMode::AbsoluteY => (mem.mem_read_u16(ptr), self.register_y),
            AddressingMode::IndirectY => {
                let zp = mem.mem_read(ptr);
                let lo = mem.mem_read(zp as u16);
                let hi = mem.mem_read(zp.wrapping_add(1) as u16);
                ((hi as u16) << 8 | (lo as u16), self.register_y)
            }
            _ => panic!("Addressing mode {:?} not valid for a masked store", mode),
        };

        let effective = base.wrapping_add(index as u16);
        let data = reg_mask & ((base >> 8) as u8).wrapping_add(1);

        let addr = if page_cross(base, effective) {
            ((data as u16) << 8) | (effective & 0x00FF)
        } else {
            effective
        };
        mem.mem_write(addr, data);
    }

    fn ahx<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        self.masked_store(mem, mode, ptr, self.register_a & self.register_x);
    }

    fn shx<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        self.masked_store(mem, mode, ptr, self.register_x);
    }

    fn shy<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        self.masked_store(mem, mode, ptr, self.register_y);
    }

    fn tas<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) {
        self.stack_pointer = self.register_a & self.register_x;
        self.masked_store(mem, mode, ptr, self.register_a & self.register_x);
    }

    /// Multi-byte NOPs still perform the operand read, which matters when
    /// the address lands on a mapped register.
    fn nop<M: Mem>(&mut self, mem: &mut M, mode: &AddressingMode, ptr: u16) -> bool {
        match mode {
            AddressingMode::Implied => false,
            _ => {
                let (addr, page_crossed) = self.get_absolute_address(mem, mode, ptr);
                mem.mem_read(addr);
                page_crossed
            }
        }
    }

    // The processor wedges: PC stays on the jam opcode.
    fn jam(&mut self) {
        self.program_counter = self.program_counter.wrapping_sub(1);
    }

    /// Execute one instruction. Pending interrupts are serviced first (NMI
    /// ahead of IRQ, IRQ only when InterruptDisable is clear), consuming 7
    /// cycles before the fetch.
    pub fn step<M: Mem>(&mut self, mem: &mut M) {
        if self.nmi_pending {
            self.nmi_pending = false;
            self.interrupt(mem, interrupt::NMI);
        } else if self.irq_pending && !self.status.contains(CpuFlags::INTERRUPT_DISABLE) {
            self.irq_pending = false;
            self.interrupt(mem, interrupt::IRQ);
        }

        let code = mem.mem_read(self.program_counter);

        let opcodes: &HashMap<u8, &'static opcodes::OpCode> = &opcodes::OPCODES_MAP;
        let opcode = opcodes
            .get(&code)
            .unwrap_or_else(|| panic!("OpCode 0x{:02X} not recognized", code));

        // Operand bytes sit right after the opcode. PC moves past the whole
        // instruction before dispatch so control flow just overwrites it.
        let ptr = self.program_counter.wrapping_add(1);
        self.program_counter = self.program_counter.wrapping_add(opcode.len as u16);

        let mut page_crossed = false;

        match code {
            // LDA
            0xA9 | 0xA5 | 0xB5 | 0xAD | 0xBD | 0xB9 | 0xA1 | 0xB1 => {
                page_crossed = self.lda(mem, &opcode.mode, ptr);
            }

            // LDX
            0xA2 | 0xA6 | 0xB6 | 0xAE | 0xBE => {
                page_crossed = self.ldx(mem, &opcode.mode, ptr);
            }

            // LDY
            0xA0 | 0xA4 | 0xB4 | 0xAC | 0xBC => {
                page_crossed = self.ldy(mem, &opcode.mode, ptr);
            }

            // STA
            0x85 | 0x95 | 0x8D | 0x9D | 0x99 | 0x81 | 0x91 => {
                self.sta(mem, &opcode.mode, ptr);
            }

            // STX
            0x86 | 0x96 | 0x8E => {
                self.stx(mem, &opcode.mode, ptr);
            }

            // STY
            0x84 | 0x94 | 0x8C => {
                self.sty(mem, &opcode.mode, ptr);
            }

            // ADC
            0x69 | 0x65 | 0x75 | 0x6D | 0x7D | 0x79 | 0x61 | 0x71 => {
                page_crossed = self.adc(mem, &opcode.mode, ptr);
            }

            // SBC (0xEB is the undocumented duplicate)
            0xE9 | 0xE5 | 0xF5 | 0xED | 0xFD | 0xF9 | 0xE1 | 0xF1 | 0xEB => {
                page_crossed = self.sbc(mem, &opcode.mode, ptr);
            }

            // AND
            0x29 | 0x25 | 0x35 | 0x2D | 0x3D | 0x39 | 0x21 | 0x31 => {
                page_crossed = self.and(mem, &opcode.mode, ptr);
            }

            // EOR
            0x49 | 0x45 | 0x55 | 0x4D | 0x5D | 0x59 | 0x41 | 0x51 => {
                page_crossed = self.eor(mem, &opcode.mode, ptr);
            }

            // ORA
            0x09 | 0x05 | 0x15 | 0x0D | 0x1D | 0x19 | 0x01 | 0x11 => {
                page_crossed = self.ora(mem, &opcode.mode, ptr);
            }

            // ASL
            0x0A | 0x06 | 0x16 | 0x0E | 0x1E => {
                self.asl(mem, &opcode.mode, ptr);
            }

            // LSR
            0x4A | 0x46 | 0x56 | 0x4E | 0x5E => {
                self.lsr(mem, &opcode.mode, ptr);
            }

            // ROL
            0x2A | 0x26 | 0x36 | 0x2E | 0x3E => {
                self.rol(mem, &opcode.mode, ptr);
            }

            // ROR
            0x6A | 0x66 | 0x76 | 0x6E | 0x7E => {
                self.ror(mem, &opcode.mode, ptr);
            }

            // INC
            0xE6 | 0xF6 | 0xEE | 0xFE => {
                self.inc(mem, &opcode.mode, ptr);
            }

            // DEC
            0xC6 | 0xD6 | 0xCE | 0xDE => {
                self.dec(mem, &opcode.mode, ptr);
            }

            0xE8 => self.inx(),
            0xC8 => self.iny(),
            0xCA => self.dex(),
            0x88 => self.dey(),

            0xAA => self.tax(),
            0xA8 => self.tay(),
            0x8A => self.txa(),
            0x98 => self.tya(),
            0xBA => self.tsx(),
            0x9A => self.txs(),

            0x48 => self.pha(mem),
            0x68 => self.pla(mem),
            0x08 => self.php(mem),
            0x28 => self.plp(mem),

            // BIT
            0x24 | 0x2C => {
                self.bit(mem, &opcode.mode, ptr);
            }

            // JMP
            0x4C | 0x6C => {
                self.jmp(mem, &opcode.mode, ptr);
            }

            0x20 => self.jsr(mem, ptr),
            0x60 => self.rts(mem),
            0x40 => self.rti(mem),
            0x00 => self.brk(mem),

            // CMP
            0xC9 | 0xC5 | 0xD5 | 0xCD | 0xDD | 0xD9 | 0xC1 | 0xD1 => {
                page_crossed = self.compare(mem, &opcode.mode, ptr, self.register_a);
            }

            // CPX
            0xE0 | 0xE4 | 0xEC => {
                page_crossed = self.compare(mem, &opcode.mode, ptr, self.register_x);
            }

            // CPY
            0xC0 | 0xC4 | 0xCC => {
                page_crossed = self.compare(mem, &opcode.mode, ptr, self.register_y);
            }

            // Branches
            0x10 => self.branch(mem, ptr, !self.status.contains(CpuFlags::NEGATIVE)), // BPL
            0x30 => self.branch(mem, ptr, self.status.contains(CpuFlags::NEGATIVE)),  // BMI
            0x50 => self.branch(mem, ptr, !self.status.contains(CpuFlags::OVERFLOW)), // BVC
            0x70 => self.branch(mem, ptr, self.status.contains(CpuFlags::OVERFLOW)),  // BVS
            0x90 => self.branch(mem, ptr, !self.status.contains(CpuFlags::CARRY)),    // BCC
            0xB0 => self.branch(mem, ptr, self.status.contains(CpuFlags::CARRY)),     // BCS
            0xD0 => self.branch(mem, ptr, !self.status.contains(CpuFlags::ZERO)),     // BNE
            0xF0 => self.branch(mem, ptr, self.status.contains(CpuFlags::ZERO)),      // BEQ

            // Flag control
            0x18 => self.status.remove(CpuFlags::CARRY), // CLC
            0x38 => self.status.insert(CpuFlags::CARRY), // SEC
            0x58 => self.status.remove(CpuFlags::INTERRUPT_DISABLE), // CLI
            0x78 => self.status.insert(CpuFlags::INTERRUPT_DISABLE), // SEI
            0xB8 => self.status.remove(CpuFlags::OVERFLOW), // CLV
            0xD8 => self.status.remove(CpuFlags::DECIMAL_MODE), // CLD
            0xF8 => self.status.insert(CpuFlags::DECIMAL_MODE), // SED

            // NOP
            0xEA => {}

            // LAX
            0xA7 | 0xB7 | 0xAF | 0xBF | 0xA3 | 0xB3 => {
                page_crossed = self.lax(mem, &opcode.mode, ptr);
            }

            // SAX
            0x87 | 0x97 | 0x8F | 0x83 => {
                self.sax(mem, &opcode.mode, ptr);
            }

            // DCP
            0xC7 | 0xD7 | 0xCF | 0xDF | 0xDB | 0xC3 | 0xD3 => {
                self.dcp(mem, &opcode.mode, ptr);
            }

            // ISC
            0xE7 | 0xF7 | 0xEF | 0xFF | 0xFB | 0xE3 | 0xF3 => {
                self.isc(mem, &opcode.mode, ptr);
            }

            // SLO
            0x07 | 0x17 | 0x0F | 0x1F | 0x1B | 0x03 | 0x13 => {
                self.slo(mem, &opcode.mode, ptr);
            }

            // RLA
            0x27 | 0x37 | 0x2F | 0x3F | 0x3B | 0x23 | 0x33 => {
                self.rla(mem, &opcode.mode, ptr);
            }

            // SRE
            0x47 | 0x57 | 0x4F | 0x5F | 0x5B | 0x43 | 0x53 => {
                self.sre(mem, &opcode.mode, ptr);
            }

            // RRA
            0x67 | 0x77 | 0x6F | 0x7F | 0x7B | 0x63 | 0x73 => {
                self.rra(mem, &opcode.mode, ptr);
            }

            // ANC
            0x0B | 0x2B => self.anc(mem, ptr),

            0x4B => self.alr(mem, ptr),
            0x6B => self.arr(mem, ptr),
            0xCB => self.axs(mem, ptr),
            0xAB => self.lxa(mem, ptr),
            0x8B => self.xaa(mem, ptr),

            // LAS
            0xBB => {
                page_crossed = self.las(mem, &opcode.mode, ptr);
            }

            0x9B => self.tas(mem, &opcode.mode, ptr),

            // AHX
            0x9F | 0x93 => self.ahx(mem, &opcode.mode, ptr),

            0x9E => self.shx(mem, &opcode.mode, ptr),
            0x9C => self.shy(mem, &opcode.mode, ptr),

            // NOP variants
            0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => {}
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 | 0x04 | 0x44 | 0x64 | 0x14 | 0x34 | 0x54 | 0x74
            | 0xD4 | 0xF4 | 0x0C | 0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => {
                page_crossed = self.nop(mem, &opcode.mode, ptr);
            }

            // JAM
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2 => {
                self.jam();
            }
        }

        let mut cycles = opcode.cycles;
        if page_crossed {
            cycles += 1;
        }
        self.tick(cycles);
    }
}

impl Default for CPU {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::FlatRam;

    /// CPU at `pc` with `program` written there, ready to step.
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
    fn test_power_on_state() {
        let cpu = CPU::new();
        assert_eq!(cpu.register_a, 0);
        assert_eq!(cpu.register_x, 0);
        assert_eq!(cpu.register_y, 0);
        assert_eq!(cpu.stack_pointer, 0xFD);
        assert_eq!(cpu.status.bits(), 0x24);
        assert_eq!(cpu.cycles, 7);
    }

    #[test]
    fn test_reset_loads_reset_vector() {
        let mut ram = FlatRam::new();
        ram.mem_write_u16(0xFFFC, 0x8000);
        let mut cpu = CPU::new();
        cpu.register_a = 0x55;
        cpu.cycles = 1234;
        cpu.irq_pending = true;

        cpu.reset(&mut ram);

        assert_eq!(cpu.program_counter, 0x8000);
        assert_eq!(cpu.register_a, 0);
        assert_eq!(cpu.stack_pointer, 0xFD);
        assert_eq!(cpu.status.bits(), 0x24);
        assert_eq!(cpu.cycles, 7);
        assert!(!cpu.irq_pending);
    }

    #[test]
    fn test_lda_immediate_sets_flags() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xA9, 0x05]);
        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x05);
        assert!(!cpu.status.contains(CpuFlags::ZERO));
        assert!(!cpu.status.contains(CpuFlags::NEGATIVE));
        assert_eq!(cpu.program_counter, 0x0602);
        assert_eq!(cpu.cycles, 7 + 2);
    }

    #[test]
    fn test_lda_zero_sets_zero_flag() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xA9, 0x00]);
        cpu.step(&mut ram);

        assert!(cpu.status.contains(CpuFlags::ZERO));
    }

    #[test]
    fn test_adc_signed_overflow() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x69, 0x50]);
        cpu.register_a = 0x50;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0xA0);
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
        assert!(cpu.status.contains(CpuFlags::OVERFLOW));
        assert!(!cpu.status.contains(CpuFlags::CARRY));
        assert!(!cpu.status.contains(CpuFlags::ZERO));
    }

    #[test]
    fn test_adc_with_carry_in() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x69, 0x40]);
        cpu.register_a = 0x3F;
        cpu.status.insert(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x80);
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
        assert!(cpu.status.contains(CpuFlags::OVERFLOW));
        assert!(!cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_adc_ignores_decimal_flag() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x69, 0x09]);
        cpu.register_a = 0x09;
        cpu.status.insert(CpuFlags::DECIMAL_MODE);

        cpu.step(&mut ram);

        // binary result, not BCD 0x18
        assert_eq!(cpu.register_a, 0x12);
    }

    #[test]
    fn test_sbc_with_borrow() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xE9, 0x70]);
        cpu.register_a = 0x50;
        cpu.status.insert(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0xE0);
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
        assert!(!cpu.status.contains(CpuFlags::OVERFLOW));
        assert!(!cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_cmp_equal_sets_carry_and_zero() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xC9, 0x05]);
        cpu.register_a = 0x05;

        cpu.step(&mut ram);

        assert!(cpu.status.contains(CpuFlags::CARRY));
        assert!(cpu.status.contains(CpuFlags::ZERO));
        assert_eq!(cpu.register_a, 0x05);
    }

    #[test]
    fn test_cmp_less_than_clears_carry() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xC9, 0x10]);
        cpu.register_a = 0x05;

        cpu.step(&mut ram);

        assert!(!cpu.status.contains(CpuFlags::CARRY));
        assert!(!cpu.status.contains(CpuFlags::ZERO));
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
    }

    #[test]
    fn test_bit_copies_operand_high_bits() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x24, 0x10]);
        ram.mem_write(0x10, 0xC0);
        cpu.register_a = 0x0F;

        cpu.step(&mut ram);

        assert!(cpu.status.contains(CpuFlags::ZERO));
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
        assert!(cpu.status.contains(CpuFlags::OVERFLOW));
        assert_eq!(cpu.register_a, 0x0F);
    }

    #[test]
    fn test_asl_memory_sets_carry() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x06, 0x10]);
        ram.mem_write(0x10, 0x81);

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x10), 0x02);
        assert!(cpu.status.contains(CpuFlags::CARRY));
        assert!(!cpu.status.contains(CpuFlags::NEGATIVE));
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_lsr_clears_negative() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x4A]);
        cpu.register_a = 0x01;
        cpu.status.insert(CpuFlags::NEGATIVE);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x00);
        assert!(cpu.status.contains(CpuFlags::CARRY));
        assert!(cpu.status.contains(CpuFlags::ZERO));
        assert!(!cpu.status.contains(CpuFlags::NEGATIVE));
    }

    #[test]
    fn test_rol_shifts_carry_in() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x2A]);
        cpu.register_a = 0x80;
        cpu.status.insert(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x01);
        assert!(cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_ror_shifts_carry_into_bit7() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x6A]);
        cpu.register_a = 0x01;
        cpu.status.insert(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x80);
        assert!(cpu.status.contains(CpuFlags::CARRY));
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
    }

    #[test]
    fn test_inx_wraps() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xE8]);
        cpu.register_x = 0xFF;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_x, 0x00);
        assert!(cpu.status.contains(CpuFlags::ZERO));
    }

    #[test]
    fn test_txs_does_not_touch_flags() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x9A]);
        cpu.register_x = 0x00;
        let before = cpu.status.bits();

        cpu.step(&mut ram);

        assert_eq!(cpu.stack_pointer, 0x00);
        assert_eq!(cpu.status.bits(), before);
    }

    #[test]
    fn test_jmp_indirect_page_wrap_bug() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x6C, 0xFF, 0x02]);
        ram.mem_write(0x02FF, 0x34);
        ram.mem_write(0x0200, 0x12);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x1234);
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_jmp_absolute_to_next_byte() {
        // a jump targeting the byte right after its own opcode must land
        // there exactly
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x4C, 0x01, 0x06]);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0601);
    }

    #[test]
    fn test_branch_taken_page_cross_costs_four() {
        let (mut cpu, mut ram) = cpu_with_program(0x00F0, &[0xD0, 0x20]);
        cpu.status.remove(CpuFlags::ZERO);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0112);
        assert_eq!(cpu.cycles, 7 + 4);
    }

    #[test]
    fn test_branch_not_taken_costs_two() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xD0, 0x20]);
        cpu.status.insert(CpuFlags::ZERO);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0602);
        assert_eq!(cpu.cycles, 7 + 2);
    }

    #[test]
    fn test_branch_taken_same_page_costs_three() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xD0, 0x10]);
        cpu.status.remove(CpuFlags::ZERO);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0612);
        assert_eq!(cpu.cycles, 7 + 3);
    }

    #[test]
    fn test_branch_backwards_to_own_operand() {
        // offset -1 lands on the branch's own operand byte
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xD0, 0xFF]);
        cpu.status.remove(CpuFlags::ZERO);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0601);
    }

    #[test]
    fn test_indirect_y_page_cross_costs_six() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xB1, 0x80]);
        ram.mem_write(0x80, 0xFF);
        ram.mem_write(0x81, 0x00);
        ram.mem_write(0x0100, 0x42);
        cpu.register_y = 0x01;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x42);
        assert_eq!(cpu.cycles, 7 + 6);
    }

    #[test]
    fn test_indirect_y_same_page_costs_five() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xB1, 0x80]);
        ram.mem_write(0x80, 0x10);
        ram.mem_write(0x81, 0x02);
        ram.mem_write(0x0211, 0x42);
        cpu.register_y = 0x01;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x42);
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_indirect_x_pointer_wraps_in_zero_page() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xA1, 0xFF]);
        ram.mem_write(0xFF, 0x34);
        ram.mem_write(0x00, 0x12);
        ram.mem_write(0x1234, 0x42);
        cpu.register_x = 0x00;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x42);
    }

    #[test]
    fn test_indirect_y_pointer_wraps_in_zero_page() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xB1, 0xFF]);
        ram.mem_write(0xFF, 0x00);
        ram.mem_write(0x00, 0x04);
        ram.mem_write(0x0400, 0x42);
        cpu.register_y = 0x00;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x42);
    }

    #[test]
    fn test_zero_page_x_wraps() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xB5, 0xFF]);
        ram.mem_write(0x7F, 0x42);
        cpu.register_x = 0x80;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x42);
    }

    #[test]
    fn test_sta_absolute_x_never_pays_cross_penalty() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x9D, 0xFF, 0x02]);
        cpu.register_a = 0x42;
        cpu.register_x = 0x01;

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x0300), 0x42);
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_inc_absolute_x_fixed_cost_without_cross() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xFE, 0x00, 0x02]);
        ram.mem_write(0x0200, 0xFF);
        cpu.register_x = 0x00;

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x0200), 0x00);
        assert!(cpu.status.contains(CpuFlags::ZERO));
        assert_eq!(cpu.cycles, 7 + 7);
    }

    #[test]
    fn test_pha_pla_round_trip() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x48, 0xA9, 0x00, 0x68]);
        cpu.register_a = 0x80;
        let sp_before = cpu.stack_pointer;

        cpu.step(&mut ram); // PHA
        assert_eq!(cpu.stack_pointer, sp_before.wrapping_sub(1));
        cpu.step(&mut ram); // LDA #$00
        cpu.step(&mut ram); // PLA

        assert_eq!(cpu.register_a, 0x80);
        assert_eq!(cpu.stack_pointer, sp_before);
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
        assert!(!cpu.status.contains(CpuFlags::ZERO));
    }

    #[test]
    fn test_php_pushes_break_and_unused() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x08]);
        cpu.status = CpuFlags::from_bits_truncate(0x00);

        cpu.step(&mut ram);

        let pushed = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(1) as u16);
        assert_eq!(pushed & 0x30, 0x30);
        // live status untouched
        assert_eq!(cpu.status.bits() & 0x30, 0x00);
    }

    #[test]
    fn test_php_plp_round_trip_masks_break() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x08, 0x28]);
        cpu.status = CpuFlags::from_bits_truncate(0xC3);

        cpu.step(&mut ram); // PHP
        cpu.step(&mut ram); // PLP

        assert_eq!(cpu.status.bits(), 0xC3 | 0x20);
        assert!(!cpu.status.contains(CpuFlags::BREAK));
        assert!(cpu.status.contains(CpuFlags::UNUSED));
    }

    #[test]
    fn test_jsr_rts_round_trip() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x20, 0x00, 0x07]);
        ram.mem_write(0x0700, 0x60); // RTS
        let sp_before = cpu.stack_pointer;

        cpu.step(&mut ram); // JSR $0700
        assert_eq!(cpu.program_counter, 0x0700);
        assert_eq!(cpu.cycles, 7 + 6);

        cpu.step(&mut ram); // RTS
        assert_eq!(cpu.program_counter, 0x0603);
        assert_eq!(cpu.stack_pointer, sp_before);
        assert_eq!(cpu.cycles, 7 + 6 + 6);
    }

    #[test]
    fn test_jsr_pushes_return_minus_one() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x20, 0x00, 0x07]);

        cpu.step(&mut ram);

        let lo = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(1) as u16);
        let hi = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(2) as u16);
        assert_eq!((hi as u16) << 8 | lo as u16, 0x0602);
    }

    #[test]
    fn test_clc_sec_only_touch_carry() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x38, 0x18]);
        let original = cpu.status.bits();

        cpu.step(&mut ram); // SEC
        assert_eq!(cpu.status.bits(), original | 0x01);

        cpu.step(&mut ram); // CLC
        assert_eq!(cpu.status.bits(), original & !0x01);
    }

    #[test]
    fn test_brk_vectors_through_fffe() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x00]);
        ram.mem_write_u16(0xFFFE, 0x9000);
        cpu.status = CpuFlags::from_bits_truncate(0x20);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x9000);
        assert!(cpu.status.contains(CpuFlags::INTERRUPT_DISABLE));
        assert_eq!(cpu.cycles, 7 + 7);

        // pushed return address skips the padding byte
        let pushed_flags = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(1) as u16);
        let lo = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(2) as u16);
        let hi = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(3) as u16);
        assert_eq!((hi as u16) << 8 | lo as u16, 0x0602);
        assert_eq!(pushed_flags & 0x30, 0x30);
    }

    #[test]
    fn test_rti_restores_state() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x40]);
        // hand-build the frame an interrupt would have pushed
        cpu.stack_pointer = 0xFA;
        ram.mem_write(0x01FB, 0xC3); // flags
        ram.mem_write(0x01FC, 0x34); // PC lo
        ram.mem_write(0x01FD, 0x12); // PC hi

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x1234);
        assert_eq!(cpu.status.bits(), (0xC3 | 0x20) & !0x10);
        assert_eq!(cpu.stack_pointer, 0xFD);
    }

    #[test]
    fn test_nmi_serviced_before_fetch() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xEA]);
        ram.mem_write_u16(0xFFFA, 0x0600);
        cpu.status = CpuFlags::from_bits_truncate(0x20);
        cpu.nmi();

        cpu.step(&mut ram);

        // 7 for entry plus the NOP executed at the handler
        assert_eq!(cpu.cycles, 7 + 7 + 2);
        assert_eq!(cpu.program_counter, 0x0601);
        assert!(cpu.status.contains(CpuFlags::INTERRUPT_DISABLE));
        assert!(!cpu.nmi_pending);

        // pushed copy has Break clear, Unused set
        let pushed_flags = ram.mem_read(0x0100 + cpu.stack_pointer.wrapping_add(1) as u16);
        assert_eq!(pushed_flags & 0x30, 0x20);
    }

    #[test]
    fn test_irq_masked_by_interrupt_disable() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xEA, 0xEA]);
        ram.mem_write_u16(0xFFFE, 0x9000);
        cpu.status.insert(CpuFlags::INTERRUPT_DISABLE);
        cpu.irq();

        cpu.step(&mut ram);

        // held, not serviced
        assert_eq!(cpu.program_counter, 0x0601);
        assert!(cpu.irq_pending);

        cpu.status.remove(CpuFlags::INTERRUPT_DISABLE);
        cpu.step(&mut ram);

        assert!(!cpu.irq_pending);
        assert_eq!(ram.mem_read_u16(0xFFFE), 0x9000);
        assert!(cpu.status.contains(CpuFlags::INTERRUPT_DISABLE));
    }

    #[test]
    fn test_lax_loads_both_registers() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xA7, 0x10]);
        ram.mem_write(0x10, 0x8F);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x8F);
        assert_eq!(cpu.register_x, 0x8F);
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
    }

    #[test]
    fn test_sax_stores_a_and_x() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x87, 0x10]);
        cpu.register_a = 0xF0;
        cpu.register_x = 0x0F;
        let flags_before = cpu.status.bits();

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x10), 0x00);
        assert_eq!(cpu.status.bits(), flags_before);
    }

    #[test]
    fn test_slo_carry_from_shift_nz_from_a() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x07, 0x10]);
        ram.mem_write(0x10, 0x80);
        cpu.register_a = 0x01;

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x10), 0x00);
        assert_eq!(cpu.register_a, 0x01);
        assert!(cpu.status.contains(CpuFlags::CARRY));
        assert!(!cpu.status.contains(CpuFlags::ZERO));
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_dcp_compares_after_decrement() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xC7, 0x10]);
        ram.mem_write(0x10, 0x43);
        cpu.register_a = 0x42;

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x10), 0x42);
        assert!(cpu.status.contains(CpuFlags::ZERO));
        assert!(cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_isc_increments_then_subtracts() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xE7, 0x10]);
        ram.mem_write(0x10, 0x0F);
        cpu.register_a = 0x20;
        cpu.status.insert(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(ram.mem_read(0x10), 0x10);
        assert_eq!(cpu.register_a, 0x10);
        assert!(cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_anc_copies_negative_into_carry() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x0B, 0x80]);
        cpu.register_a = 0xFF;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x80);
        assert!(cpu.status.contains(CpuFlags::NEGATIVE));
        assert!(cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_arr_flags_from_bits_five_and_six() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x6B, 0xFF]);
        cpu.register_a = 0xC0;
        cpu.status.remove(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x60);
        assert!(cpu.status.contains(CpuFlags::CARRY)); // bit 6
        assert!(!cpu.status.contains(CpuFlags::OVERFLOW)); // bit6 ^ bit5 == 0
    }

    #[test]
    fn test_axs_subtracts_from_a_and_x() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xCB, 0x02]);
        cpu.register_a = 0x0F;
        cpu.register_x = 0x07;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_x, 0x05);
        assert!(cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_xaa_uses_magic_constant() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x8B, 0xFF]);
        cpu.register_a = 0x00;
        cpu.register_x = 0xFF;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0xEE);
    }

    #[test]
    fn test_lxa_uses_magic_constant() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xAB, 0xFF]);
        cpu.register_a = 0x00;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0xEE);
        assert_eq!(cpu.register_x, 0xEE);
    }

    #[test]
    fn test_las_masks_with_stack_pointer() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xBB, 0x00, 0x02]);
        ram.mem_write(0x0200, 0x33);
        cpu.stack_pointer = 0x0F;
        cpu.register_y = 0x00;

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x03);
        assert_eq!(cpu.register_x, 0x03);
        assert_eq!(cpu.stack_pointer, 0x03);
    }

    #[test]
    fn test_shx_masks_with_base_high_plus_one() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x9E, 0x10, 0x02]);
        cpu.register_x = 0xFF;
        cpu.register_y = 0x05;

        cpu.step(&mut ram);

        // no page cross: plain store of X & (0x02 + 1)
        assert_eq!(ram.mem_read(0x0215), 0x03);
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_shx_page_cross_redirects_store() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x9E, 0xFF, 0x12]);
        cpu.register_x = 0x03;
        cpu.register_y = 0x01;

        cpu.step(&mut ram);

        // value = X & (0x12 + 1) = 0x03 replaces the high byte of the
        // crossed address 0x1300, landing the store at 0x0300
        assert_eq!(ram.mem_read(0x0300), 0x03);
        assert_eq!(ram.mem_read(0x1300), 0x00);
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_tas_sets_stack_pointer() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x9B, 0x10, 0x02]);
        cpu.register_a = 0xFF;
        cpu.register_x = 0x0F;
        cpu.register_y = 0x00;

        cpu.step(&mut ram);

        assert_eq!(cpu.stack_pointer, 0x0F);
        assert_eq!(ram.mem_read(0x0210), 0x03);
    }

    #[test]
    fn test_nop_absolute_x_pays_cross_penalty() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x1C, 0xFF, 0x02]);
        cpu.register_x = 0x01;

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0603);
        assert_eq!(cpu.cycles, 7 + 5);
    }

    #[test]
    fn test_jam_holds_pc() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0x02]);

        cpu.step(&mut ram);

        assert_eq!(cpu.program_counter, 0x0600);
        assert_eq!(cpu.cycles, 7 + 3);

        cpu.step(&mut ram);
        assert_eq!(cpu.program_counter, 0x0600);
        assert_eq!(cpu.cycles, 7 + 6);
    }

    #[test]
    fn test_undocumented_sbc_duplicate() {
        let (mut cpu, mut ram) = cpu_with_program(0x0600, &[0xEB, 0x01]);
        cpu.register_a = 0x03;
        cpu.status.insert(CpuFlags::CARRY);

        cpu.step(&mut ram);

        assert_eq!(cpu.register_a, 0x02);
        assert!(cpu.status.contains(CpuFlags::CARRY));
    }

    #[test]
    fn test_every_opcode_steps_without_trap() {
        for code in 0..=0xFFu8 {
            let (mut cpu, mut ram) = cpu_with_program(0x0600, &[code, 0x10, 0x02]);
            cpu.register_x = 0x04;
            cpu.register_y = 0x04;
            let before = cpu.cycles;

            cpu.step(&mut ram);

            assert!(cpu.cycles > before, "opcode 0x{:02X} added no cycles", code);
        }
    }
}
