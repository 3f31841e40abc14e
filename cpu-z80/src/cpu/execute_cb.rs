//! CB-prefixed instructions: rotates, shifts, and bit operations, plus the
//! DDCB/FDCB indexed forms with their undocumented register-copy variants.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use emu_core::Bus;

use crate::alu;
use crate::flags::{CF, HF, PF, SF, XF, YF, ZF};

use super::Z80;

impl Z80 {
    /// Execute a CB-prefixed instruction (no index prefix).
    pub(super) fn execute_cb<B: Bus>(&mut self, bus: &mut B) {
        let op = self.fetch(bus);
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        if z == 6 {
            let addr = self.regs.hl();
            let operand = bus.read(addr);
            bus.tick(1);
            match x {
                0 => {
                    let result = self.rot_op(y, operand);
                    bus.write(addr, result);
                }
                1 => self.bit_flags(y, operand, operand),
                2 => bus.write(addr, operand & !(1 << y)),
                _ => bus.write(addr, operand | (1 << y)),
            }
        } else {
            let operand = self.get_reg8_raw(z);
            match x {
                0 => {
                    let result = self.rot_op(y, operand);
                    self.set_reg8_raw(z, result);
                }
                1 => self.bit_flags(y, operand, operand),
                2 => self.set_reg8_raw(z, operand & !(1 << y)),
                _ => self.set_reg8_raw(z, operand | (1 << y)),
            }
        }
    }

    /// Execute a DDCB/FDCB instruction: `DD CB d op`.
    ///
    /// The displacement and sub-opcode are not M1 fetches, so R is not
    /// refreshed for them. All forms operate on (IX+d)/(IY+d); the
    /// undocumented z != 6 variants additionally copy the result into the
    /// named register. BIT takes its X/Y bits from the high byte of the
    /// effective address.
    pub(super) fn execute_ddcb<B: Bus>(&mut self, bus: &mut B) {
        let d = self.read_imm8(bus) as i8;
        let op = self.read_imm8(bus);
        bus.tick(2);
        let addr = self.hl_indexed().wrapping_add(d as u16);

        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        let operand = bus.read(addr);
        bus.tick(1);

        if x == 1 {
            self.bit_flags(y, operand, (addr >> 8) as u8);
            return;
        }

        let result = match x {
            0 => self.rot_op(y, operand),
            2 => operand & !(1 << y),
            _ => operand | (1 << y),
        };
        bus.write(addr, result);
        if z != 6 {
            self.set_reg8_raw(z, result);
        }
    }

    /// Rotate/shift dispatch in y-field order:
    /// RLC, RRC, RL, RR, SLA, SRA, SLL, SRL.
    fn rot_op(&mut self, y: u8, value: u8) -> u8 {
        let carry = self.regs.f & CF != 0;
        let result = match y {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, carry),
            3 => alu::rr8(value, carry),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        };
        self.regs.f = result.flags;
        result.value
    }

    /// BIT b flags: Z and P/V set iff the tested bit is zero, H set, N
    /// clear, S set only for bit 7 when it is 1, C preserved. X/Y come
    /// from `xy_source` (the operand, or the high byte of the effective
    /// address for indexed forms).
    fn bit_flags(&mut self, bit: u8, value: u8, xy_source: u8) {
        let mut f = (self.regs.f & CF) | HF;
        if value & (1 << bit) == 0 {
            f |= ZF | PF;
        }
        if bit == 7 && value & 0x80 != 0 {
            f |= SF;
        }
        f |= xy_source & (XF | YF);
        self.regs.f = f;
    }
}
