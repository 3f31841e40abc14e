//! Unprefixed (and DD/FD-rewritten) instruction execution.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::{Bus, IoBus};

use crate::alu;
use crate::flags::{sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};

use super::{CpuFault, Prefix, Z80};

impl Z80 {
    /// Execute an instruction from the main table. An active DD/FD prefix
    /// rewrites H/L to the index halves and (HL) to (IX+d)/(IY+d).
    pub(super) fn execute_main<B: IoBus>(
        &mut self,
        bus: &mut B,
        opcode: u8,
        instr_pc: u16,
    ) -> Result<(), CpuFault> {
        match opcode {
            // NOP
            0x00 => {}

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.read_imm16(bus);
                self.set_rp((opcode >> 4) & 3, value);
            }

            // LD (BC), A / LD (DE), A
            0x02 => bus.write(self.regs.bc(), self.regs.a),
            0x12 => bus.write(self.regs.de(), self.regs.a),

            // LD A, (BC) / LD A, (DE)
            0x0A => self.regs.a = bus.read(self.regs.bc()),
            0x1A => self.regs.a = bus.read(self.regs.de()),

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                bus.tick(2);
                let rp = (opcode >> 4) & 3;
                let value = self.get_rp(rp).wrapping_add(1);
                self.set_rp(rp, value);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                bus.tick(2);
                let rp = (opcode >> 4) & 3;
                let value = self.get_rp(rp).wrapping_sub(1);
                self.set_rp(rp, value);
            }

            // INC r / DEC r (register forms; (HL) handled at 0x34/0x35)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (opcode >> 3) & 7;
                let result = alu::inc8(self.get_reg8(r));
                self.set_reg8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (opcode >> 3) & 7;
                let result = alu::dec8(self.get_reg8(r));
                self.set_reg8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // INC (HL) / DEC (HL)
            0x34 => {
                let addr = self.mem_operand_addr(bus);
                let result = alu::inc8(bus.read(addr));
                bus.tick(1);
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x35 => {
                let addr = self.mem_operand_addr(bus);
                let result = alu::dec8(bus.read(addr));
                bus.tick(1);
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD r, n (register forms; (HL) handled at 0x36)
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.read_imm8(bus);
                self.set_reg8((opcode >> 3) & 7, value);
            }

            // LD (HL), n — for the indexed form the displacement comes
            // before the immediate, and the address add overlaps the
            // operand fetch (2 internal T-states, not 5).
            0x36 => {
                if self.prefix == Prefix::None {
                    let value = self.read_imm8(bus);
                    bus.write(self.regs.hl(), value);
                } else {
                    let d = self.read_imm8(bus) as i8;
                    let value = self.read_imm8(bus);
                    bus.tick(2);
                    bus.write(self.hl_indexed().wrapping_add(d as u16), value);
                }
            }

            // Accumulator rotates: S/Z/P preserved, X/Y from the new A
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x17 => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if new_carry != 0 { CF } else { 0 };
            }
            0x1F => {
                let old_carry = (self.regs.f & CF) << 7;
                let new_carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if new_carry != 0 { CF } else { 0 };
            }

            // EX AF, AF'
            0x08 => {
                std::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                std::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
            }

            // ADD HL, rr (S/Z/P preserved)
            0x09 | 0x19 | 0x29 | 0x39 => {
                bus.tick(7);
                let hl = self.hl_indexed();
                let rr = self.get_rp((opcode >> 4) & 3);
                let (result, flags) = alu::add16(hl, rr);
                self.set_hl_indexed(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // DJNZ e
            0x10 => {
                bus.tick(1);
                let offset = self.read_imm8(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    bus.tick(5);
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                }
            }

            // JR e
            0x18 => {
                let offset = self.read_imm8(bus) as i8;
                bus.tick(5);
                self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            }

            // JR cc, e (NZ, Z, NC, C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.read_imm8(bus) as i8;
                if self.condition((opcode >> 3) & 3) {
                    bus.tick(5);
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.read_imm16(bus);
                let value = self.hl_indexed();
                self.write_word_at(bus, addr, value);
            }
            0x2A => {
                let addr = self.read_imm16(bus);
                let value = self.read_word_at(bus, addr);
                self.set_hl_indexed(value);
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.read_imm16(bus);
                bus.write(addr, self.regs.a);
            }
            0x3A => {
                let addr = self.read_imm16(bus);
                self.regs.a = bus.read(addr);
            }

            // DAA
            0x27 => {
                let a = self.regs.a;
                let nf = self.regs.f & NF != 0;
                let cf = self.regs.f & CF != 0;
                let hf = self.regs.f & HF != 0;

                let mut correction: u8 = 0;
                let mut new_cf = cf;
                if hf || (a & 0x0F) > 9 {
                    correction |= 0x06;
                }
                if cf || a > 0x99 {
                    correction |= 0x60;
                    new_cf = true;
                }

                let result = if nf {
                    a.wrapping_sub(correction)
                } else {
                    a.wrapping_add(correction)
                };
                let new_hf = if nf {
                    hf && (a & 0x0F) < 6
                } else {
                    (a & 0x0F) > 9
                };

                self.regs.a = result;
                self.regs.f = sz53p(result)
                    | if nf { NF } else { 0 }
                    | if new_cf { CF } else { 0 }
                    | if new_hf { HF } else { 0 };
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & (YF | XF));
            }

            // SCF / CCF: X/Y from A
            0x37 => {
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | CF | (self.regs.a & (YF | XF));
            }
            0x3F => {
                let old_cf = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if old_cf != 0 { HF } else { CF };
            }

            // HALT: PC stays on the HALT opcode until an interrupt wakes us
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // LD r, r' and the memory forms
            0x40..=0x7F => {
                let dst = (opcode >> 3) & 7;
                let src = opcode & 7;
                if src == 6 {
                    // LD r, (HL)/(IX+d) — destination is the raw register
                    let addr = self.mem_operand_addr(bus);
                    let value = bus.read(addr);
                    self.set_reg8_raw(dst, value);
                } else if dst == 6 {
                    // LD (HL)/(IX+d), r — source is the raw register
                    let addr = self.mem_operand_addr(bus);
                    bus.write(addr, self.get_reg8_raw(src));
                } else {
                    let value = self.get_reg8(src);
                    self.set_reg8(dst, value);
                }
            }

            // ALU A, r
            0x80..=0xBF => {
                let op = (opcode >> 3) & 7;
                let src = opcode & 7;
                let value = if src == 6 {
                    let addr = self.mem_operand_addr(bus);
                    bus.read(addr)
                } else {
                    self.get_reg8(src)
                };
                self.alu_a(op, value);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.read_imm8(bus);
                self.alu_a((opcode >> 3) & 7, value);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                bus.tick(1);
                if self.condition((opcode >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                }
            }

            // POP rr (AF in slot 3)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop16(bus);
                match (opcode >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.set_hl_indexed(value),
                    _ => self.regs.set_af(value),
                }
            }

            // PUSH rr (AF in slot 3)
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = match (opcode >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.hl_indexed(),
                    _ => self.regs.af(),
                };
                self.push16(bus, value);
            }

            // JP cc, nn / JP nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let target = self.read_imm16(bus);
                if self.condition((opcode >> 3) & 7) {
                    self.regs.pc = target;
                }
            }
            0xC3 => self.regs.pc = self.read_imm16(bus),

            // CALL cc, nn / CALL nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let target = self.read_imm16(bus);
                if self.condition((opcode >> 3) & 7) {
                    let pc = self.regs.pc;
                    self.push16(bus, pc);
                    self.regs.pc = target;
                }
            }
            0xCD => {
                let target = self.read_imm16(bus);
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = target;
            }

            // RET
            0xC9 => self.regs.pc = self.pop16(bus),

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = u16::from(opcode & 0x38);
            }

            // EXX
            0xD9 => {
                std::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                std::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                std::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                std::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                std::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                std::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
            }

            // EX DE, HL — always the real HL, even under DD/FD
            0xEB => {
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let from_stack = self.read_word_at(bus, sp);
                bus.tick(1);
                let value = self.hl_indexed();
                self.write_word_at(bus, sp, value);
                bus.tick(2);
                self.set_hl_indexed(from_stack);
            }

            // JP (HL)
            0xE9 => self.regs.pc = self.hl_indexed(),

            // LD SP, HL
            0xF9 => {
                bus.tick(2);
                self.regs.sp = self.hl_indexed();
            }

            // OUT (n), A — A supplies the upper address byte
            0xD3 => {
                let low = self.read_imm8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(low);
                bus.write_io(port, self.regs.a);
            }

            // IN A, (n)
            0xDB => {
                let low = self.read_imm8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(low);
                self.regs.a = bus.read_io(port);
            }

            // DI masks immediately and cancels a pending EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                self.regs.ei_delay = false;
            }

            // EI takes effect after the following instruction
            0xFB => self.regs.ei_delay = true,

            // CB/ED/DD/FD are consumed before dispatch
            _ => {
                return Err(CpuFault {
                    pc: instr_pc,
                    prefix: self.prefix_byte(),
                    opcode,
                })
            }
        }

        Ok(())
    }

    /// 8-bit accumulator ALU dispatch, op-field order:
    /// ADD, ADC, SUB, SBC, AND, XOR, OR, CP.
    pub(super) fn alu_a(&mut self, op: u8, value: u8) {
        let carry = self.regs.f & CF != 0;
        let result = match op {
            0 => alu::add8(self.regs.a, value, false),
            1 => alu::add8(self.regs.a, value, carry),
            2 => alu::sub8(self.regs.a, value, false),
            3 => alu::sub8(self.regs.a, value, carry),
            4 => alu::and8(self.regs.a, value),
            5 => alu::xor8(self.regs.a, value),
            6 => alu::or8(self.regs.a, value),
            _ => alu::cp8(self.regs.a, value),
        };
        if op != 7 {
            self.regs.a = result.value;
        }
        self.regs.f = result.flags;
    }
}
