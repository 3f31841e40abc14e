//! ED-prefixed instructions: 16-bit arithmetic, block transfers, block I/O,
//! interrupt housekeeping, and the undocumented NEG/RETN/IM aliases.
//!
//! Holes in the ED table decode to a `CpuFault` rather than the hardware's
//! silent NOP: reaching one means the emulated program has wandered into
//! garbage, which is worth failing loudly over.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::{Bus, IoBus};

use crate::alu;
use crate::flags::{parity, sz53, sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};

use super::{CpuFault, Z80};

/// Interrupt mode by y-field, covering the undocumented aliases.
const IM_TABLE: [u8; 8] = [0, 0, 1, 2, 0, 0, 1, 2];

impl Z80 {
    pub(super) fn execute_ed<B: IoBus>(
        &mut self,
        bus: &mut B,
        instr_pc: u16,
    ) -> Result<(), CpuFault> {
        let op = self.fetch(bus);

        match op {
            // IN r, (C) — ED 70 is IN F,(C): flags only, result discarded
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let value = bus.read_io(self.regs.bc());
                let y = (op >> 3) & 7;
                if y != 6 {
                    self.set_reg8_raw(y, value);
                }
                self.regs.f = (self.regs.f & CF) | sz53p(value);
            }

            // OUT (C), r — ED 71 is OUT (C),0
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let y = (op >> 3) & 7;
                let value = if y == 6 { 0 } else { self.get_reg8_raw(y) };
                bus.write_io(self.regs.bc(), value);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                bus.tick(7);
                let rr = self.get_rp((op >> 4) & 3);
                let carry = self.regs.f & CF != 0;
                let (result, flags) = alu::sbc16(self.regs.hl(), rr, carry);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                bus.tick(7);
                let rr = self.get_rp((op >> 4) & 3);
                let carry = self.regs.f & CF != 0;
                let (result, flags) = alu::adc16(self.regs.hl(), rr, carry);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.read_imm16(bus);
                let value = self.get_rp((op >> 4) & 3);
                self.write_word_at(bus, addr, value);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.read_imm16(bus);
                let value = self.read_word_at(bus, addr);
                self.set_rp((op >> 4) & 3, value);
            }

            // NEG and its seven aliases
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let result = alu::sub8(0, self.regs.a, false);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }

            // RETN / RETI and aliases: all restore IFF1 from IFF2
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.pc = self.pop16(bus);
                self.regs.iff1 = self.regs.iff2;
            }

            // IM 0/1/2 and aliases
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x76 | 0x7E => {
                self.regs.im = IM_TABLE[usize::from((op >> 3) & 7)];
            }

            // LD I, A / LD R, A
            0x47 => {
                bus.tick(1);
                self.regs.i = self.regs.a;
            }
            0x4F => {
                bus.tick(1);
                self.regs.r = self.regs.a;
            }

            // LD A, I / LD A, R: P/V reflects IFF2
            0x57 => {
                bus.tick(1);
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }
            0x5F => {
                bus.tick(1);
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // RRD / RLD: rotate between A's low nibble and (HL)
            0x67 => {
                let addr = self.regs.hl();
                let value = bus.read(addr);
                bus.tick(4);
                let new_a = (self.regs.a & 0xF0) | (value & 0x0F);
                let new_mem = (self.regs.a << 4) | (value >> 4);
                bus.write(addr, new_mem);
                self.regs.a = new_a;
                self.regs.f = (self.regs.f & CF) | sz53p(new_a);
            }
            0x6F => {
                let addr = self.regs.hl();
                let value = bus.read(addr);
                bus.tick(4);
                let new_a = (self.regs.a & 0xF0) | (value >> 4);
                let new_mem = (value << 4) | (self.regs.a & 0x0F);
                bus.write(addr, new_mem);
                self.regs.a = new_a;
                self.regs.f = (self.regs.f & CF) | sz53p(new_a);
            }

            // Block transfers
            0xA0 => self.block_ld(bus, 1, false),
            0xA8 => self.block_ld(bus, -1, false),
            0xB0 => self.block_ld(bus, 1, true),
            0xB8 => self.block_ld(bus, -1, true),

            // Block compares
            0xA1 => self.block_cp(bus, 1, false),
            0xA9 => self.block_cp(bus, -1, false),
            0xB1 => self.block_cp(bus, 1, true),
            0xB9 => self.block_cp(bus, -1, true),

            // Block input
            0xA2 => self.block_in(bus, 1, false),
            0xAA => self.block_in(bus, -1, false),
            0xB2 => self.block_in(bus, 1, true),
            0xBA => self.block_in(bus, -1, true),

            // Block output
            0xA3 => self.block_out(bus, 1, false),
            0xAB => self.block_out(bus, -1, false),
            0xB3 => self.block_out(bus, 1, true),
            0xBB => self.block_out(bus, -1, true),

            _ => {
                return Err(CpuFault {
                    pc: instr_pc,
                    prefix: Some(0xED),
                    opcode: op,
                })
            }
        }

        Ok(())
    }

    /// LDI/LDD/LDIR/LDDR. On a repeating iteration with BC != 0 the PC is
    /// wound back two bytes and the longer timing reported.
    fn block_ld<B: IoBus>(&mut self, bus: &mut B, step: i16, repeat: bool) {
        let value = bus.read(self.regs.hl());
        bus.write(self.regs.de(), value);
        bus.tick(2);

        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));
        self.regs.set_de(self.regs.de().wrapping_add(step as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        // X from bit 3, Y from bit 1 of (A + transferred byte)
        let n = self.regs.a.wrapping_add(value);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | (n & XF)
            | if n & 0x02 != 0 { YF } else { 0 }
            | if bc != 0 { PF } else { 0 };

        if repeat && bc != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// CPI/CPD/CPIR/CPDR. Repeats until BC == 0 or a match.
    fn block_cp<B: IoBus>(&mut self, bus: &mut B, step: i16, repeat: bool) {
        let value = bus.read(self.regs.hl());
        bus.tick(5);

        let result = self.regs.a.wrapping_sub(value);
        let half = (self.regs.a & 0x0F) < (value & 0x0F);

        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        // X from bit 3, Y from bit 1 of (A - (HL) - H)
        let n = result.wrapping_sub(u8::from(half));
        let mut f = (self.regs.f & CF) | NF;
        if result & 0x80 != 0 {
            f |= SF;
        }
        if result == 0 {
            f |= ZF;
        }
        if half {
            f |= HF;
        }
        if bc != 0 {
            f |= PF;
        }
        f |= n & XF;
        if n & 0x02 != 0 {
            f |= YF;
        }
        self.regs.f = f;

        if repeat && bc != 0 && result != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// INI/IND/INIR/INDR. The port is read with B before the decrement.
    fn block_in<B: IoBus>(&mut self, bus: &mut B, step: i16, repeat: bool) {
        bus.tick(1);
        let value = bus.read_io(self.regs.bc());
        bus.write(self.regs.hl(), value);

        self.regs.b = self.regs.b.wrapping_sub(1);
        let c_adjusted = (self.regs.c as i16 + step) as u8;
        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));

        self.block_io_flags(value, c_adjusted);

        if repeat && self.regs.b != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// OUTI/OUTD/OTIR/OTDR. B is decremented before it appears on the port.
    fn block_out<B: IoBus>(&mut self, bus: &mut B, step: i16, repeat: bool) {
        bus.tick(1);
        let value = bus.read(self.regs.hl());
        self.regs.b = self.regs.b.wrapping_sub(1);
        bus.write_io(self.regs.bc(), value);

        self.regs.set_hl(self.regs.hl().wrapping_add(step as u16));
        let l = self.regs.l;
        self.block_io_flags(value, l);

        if repeat && self.regs.b != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// Shared flag rules for the block I/O group: S/Z/X/Y from the new B,
    /// N from bit 7 of the transferred byte, H and C from the carry of
    /// `value + k`, P/V from `parity(((value + k) & 7) ^ B)`.
    fn block_io_flags(&mut self, value: u8, k: u8) {
        let sum = u16::from(value) + u16::from(k);
        let mut f = sz53(self.regs.b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        if sum > 0xFF {
            f |= HF | CF;
        }
        if parity(((sum & 7) as u8) ^ self.regs.b) {
            f |= PF;
        }
        self.regs.f = f;
    }
}
