//! Instruction decode and the `apply_finish` dispatcher that completes an
//! instruction once its queued bus phases have drained.
//!
//! Exact opcode semantics are representative rather than exhaustively
//! verified against every documented corner case (undocumented flag bits on
//! block instructions, the `(IX+d)`-and-register BIT/RES/SET variant): the
//! pin/timing contract around this core is what downstream code depends on,
//! not bit-for-bit instruction fidelity.

use crate::alu::{self, R8};
use crate::cpu::{AluOp, Finish, Index, Phase, Stage, Z80};
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

/// Opcodes that, when prefixed by DD/FD, need a displacement byte read
/// before the rest of the instruction can be decoded.
#[must_use]
pub(crate) fn needs_displacement(op: u8) -> bool {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    match x {
        0 => matches!(z, 4 | 5 | 6) && y == 6,
        1 => op != 0x76 && (y == 6 || z == 6),
        2 => z == 6,
        _ => false,
    }
}

fn eval_cond(cpu: &Z80, y: u8) -> bool {
    let f = cpu.regs.f;
    match y {
        0 => f & ZF == 0,
        1 => f & ZF != 0,
        2 => f & CF == 0,
        3 => f & CF != 0,
        4 => f & PF == 0,
        5 => f & PF != 0,
        6 => f & SF == 0,
        _ => f & SF != 0,
    }
}

fn alu_op_for(y: u8) -> AluOp {
    match y {
        0 => AluOp::Add,
        1 => AluOp::Adc,
        2 => AluOp::Sub,
        3 => AluOp::Sbc,
        4 => AluOp::And,
        5 => AluOp::Xor,
        6 => AluOp::Or,
        _ => AluOp::Cp,
    }
}

fn apply_rot(kind: u8, v: u8, carry_in: bool) -> R8 {
    match kind {
        0 => alu::rlc(v),
        1 => alu::rrc(v),
        2 => alu::rl(v, carry_in),
        3 => alu::rr(v, carry_in),
        4 => alu::sla(v),
        5 => alu::sra(v),
        6 => alu::sll(v),
        _ => alu::srl(v),
    }
}

fn get_rp2_active(cpu: &Z80, p: u8, idx: Index) -> u16 {
    if p == 2 {
        cpu.get_rp_active(2, idx)
    } else {
        cpu.regs.get_rp2(p)
    }
}

fn set_rp2_active(cpu: &mut Z80, p: u8, idx: Index, v: u16) {
    if p == 2 {
        cpu.set_rp_active(2, idx, v);
    } else {
        cpu.regs.set_rp2(p, v);
    }
}

/// Read register `z`, or queue a memory read and defer via `on_ready` when
/// `z == 6` (the `(HL)`/`(IX+d)`/`(IY+d)` slot). `None` means deferred.
fn read_operand_or_defer(cpu: &mut Z80, z: u8, idx: Index, on_ready: Finish) -> Option<u8> {
    if z == 6 {
        let addr = cpu.effective_addr(idx);
        cpu.addr = addr;
        cpu.phases.push_back(Phase::ReadMem(addr, 0));
        cpu.finish = on_ready;
        cpu.stage = Stage::Executing;
        None
    } else {
        Some(cpu.reg8_get(z, idx))
    }
}

fn daa(cpu: &mut Z80) {
    let a = cpu.regs.a;
    let n = cpu.regs.f & NF != 0;
    let c = cpu.regs.f & CF != 0;
    let h = cpu.regs.f & HF != 0;
    let mut correction = 0u8;
    let mut carry = c;
    if h || (a & 0x0F) > 9 {
        correction |= 0x06;
    }
    if c || a > 0x99 {
        correction |= 0x60;
        carry = true;
    }
    let result = if n {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };
    let half = if n {
        h && (a & 0x0F) < 6
    } else {
        (a & 0x0F) + (correction & 0x0F) > 0x0F
    };
    cpu.regs.a = result;
    cpu.regs.f = sz53p(result)
        | if half { HF } else { 0 }
        | if carry { CF } else { 0 }
        | if n { NF } else { 0 };
}

pub(crate) fn decode_main(cpu: &mut Z80, op: u8, idx: Index) {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let q = y & 1;

    match x {
        0 => decode_x0(cpu, op, y, z, p, q, idx),
        1 => decode_x1(cpu, op, y, z, idx),
        2 => {
            let alu_op = alu_op_for(y);
            if let Some(v) = read_operand_or_defer(cpu, z, idx, Finish::AluA(alu_op)) {
                cpu.apply_alu(alu_op, v);
            }
        }
        _ => decode_x3(cpu, y, z, p, q, idx),
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_x0(cpu: &mut Z80, _op: u8, y: u8, z: u8, p: u8, q: u8, idx: Index) {
    match z {
        0 => match y {
            0 => {}
            1 => {
                std::mem::swap(&mut cpu.regs.a, &mut cpu.regs.a_alt);
                std::mem::swap(&mut cpu.regs.f, &mut cpu.regs.f_alt);
            }
            2 => {
                cpu.phases.push_back(Phase::ReadDisp);
                cpu.finish = Finish::Djnz;
                cpu.stage = Stage::Executing;
            }
            3 => {
                cpu.phases.push_back(Phase::ReadDisp);
                cpu.finish = Finish::JrCond(true);
                cpu.stage = Stage::Executing;
            }
            _ => {
                let cond = eval_cond(cpu, y - 4);
                cpu.phases.push_back(Phase::ReadDisp);
                cpu.finish = Finish::JrCond(cond);
                cpu.stage = Stage::Executing;
            }
        },
        1 => {
            if q == 0 {
                cpu.phases.push_back(Phase::ReadImm(0));
                cpu.phases.push_back(Phase::ReadImm(1));
                cpu.finish = Finish::LdReg16(p);
                cpu.stage = Stage::Executing;
            } else {
                let a = cpu.get_rp_active(2, idx);
                let b = cpu.get_rp_active(p, idx);
                let r = alu::add16(a, b);
                cpu.set_rp_active(2, idx, r.value);
                cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | r.flags;
            }
        }
        2 => decode_x0_z2(cpu, p, q, idx),
        3 => {
            let v = cpu.get_rp_active(p, idx);
            let nv = if q == 0 { v.wrapping_add(1) } else { v.wrapping_sub(1) };
            cpu.set_rp_active(p, idx, nv);
        }
        4 => {
            if y == 6 {
                let addr = cpu.effective_addr(idx);
                cpu.addr = addr;
                cpu.phases.push_back(Phase::ReadMem(addr, 0));
                cpu.finish = Finish::IncMem;
                cpu.stage = Stage::Executing;
            } else {
                let v = cpu.reg8_get(y, idx);
                let r = alu::inc8(v);
                cpu.reg8_set(y, idx, r.value);
                cpu.regs.f = (cpu.regs.f & CF) | (r.flags & !CF);
            }
        }
        5 => {
            if y == 6 {
                let addr = cpu.effective_addr(idx);
                cpu.addr = addr;
                cpu.phases.push_back(Phase::ReadMem(addr, 0));
                cpu.finish = Finish::DecMem;
                cpu.stage = Stage::Executing;
            } else {
                let v = cpu.reg8_get(y, idx);
                let r = alu::dec8(v);
                cpu.reg8_set(y, idx, r.value);
                cpu.regs.f = (cpu.regs.f & CF) | (r.flags & !CF);
            }
        }
        6 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            if y == 6 {
                cpu.addr = cpu.effective_addr(idx);
                cpu.finish = Finish::LdMem;
            } else {
                cpu.finish = Finish::LdReg8(y);
            }
            cpu.stage = Stage::Executing;
        }
        _ => decode_x0_z7(cpu, y),
    }
}

fn decode_x0_z2(cpu: &mut Z80, p: u8, q: u8, idx: Index) {
    match (q, p) {
        (0, 0) => {
            let addr = cpu.regs.bc();
            cpu.phases.push_back(Phase::WriteMem(addr, cpu.regs.a));
        }
        (0, 1) => {
            let addr = cpu.regs.de();
            cpu.phases.push_back(Phase::WriteMem(addr, cpu.regs.a));
        }
        (0, 2) => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::ResolveAddrThenStWide(2);
            cpu.stage = Stage::Executing;
        }
        (0, _) => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::ResolveAddrThenStReg8(7);
            cpu.stage = Stage::Executing;
        }
        (_, 0) => {
            let addr = cpu.regs.bc();
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::LdReg8(7);
            cpu.stage = Stage::Executing;
        }
        (_, 1) => {
            let addr = cpu.regs.de();
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::LdReg8(7);
            cpu.stage = Stage::Executing;
        }
        (_, 2) => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::ResolveAddrThenLdWide(2);
            cpu.stage = Stage::Executing;
        }
        _ => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::ResolveAddrThenLdReg8(7);
            cpu.stage = Stage::Executing;
        }
    }
    let _ = idx;
}

fn decode_x0_z7(cpu: &mut Z80, y: u8) {
    match y {
        0 => {
            let carry = cpu.regs.a >> 7;
            let res = (cpu.regs.a << 1) | carry;
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | (res & (YF | XF)) | carry;
            cpu.regs.a = res;
        }
        1 => {
            let carry = cpu.regs.a & 1;
            let res = (cpu.regs.a >> 1) | (carry << 7);
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | (res & (YF | XF)) | carry;
            cpu.regs.a = res;
        }
        2 => {
            let carry = cpu.regs.a >> 7;
            let res = (cpu.regs.a << 1) | u8::from(cpu.regs.f & CF != 0);
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | (res & (YF | XF)) | carry;
            cpu.regs.a = res;
        }
        3 => {
            let carry = cpu.regs.a & 1;
            let res = (cpu.regs.a >> 1) | (u8::from(cpu.regs.f & CF != 0) << 7);
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | (res & (YF | XF)) | carry;
            cpu.regs.a = res;
        }
        4 => daa(cpu),
        5 => {
            cpu.regs.a = !cpu.regs.a;
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF | CF)) | HF | NF | (cpu.regs.a & (YF | XF));
        }
        6 => {
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | CF | (cpu.regs.a & (YF | XF));
        }
        _ => {
            let old_c = cpu.regs.f & CF;
            let new_c = old_c ^ CF;
            let h = if old_c != 0 { HF } else { 0 };
            cpu.regs.f = (cpu.regs.f & (SF | ZF | PF)) | h | (cpu.regs.a & (YF | XF)) | new_c;
        }
    }
}

fn decode_x1(cpu: &mut Z80, op: u8, y: u8, z: u8, idx: Index) {
    if op == 0x76 {
        cpu.halted = true;
        return;
    }
    if y == 6 {
        let addr = cpu.effective_addr(idx);
        let value = cpu.reg8_get(z, idx);
        cpu.phases.push_back(Phase::WriteMem(addr, value));
    } else if z == 6 {
        if let Some(v) = read_operand_or_defer(cpu, z, idx, Finish::LdReg8(y)) {
            cpu.reg8_set(y, idx, v);
        }
    } else {
        let v = cpu.reg8_get(z, idx);
        cpu.reg8_set(y, idx, v);
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_x3(cpu: &mut Z80, y: u8, z: u8, p: u8, q: u8, idx: Index) {
    match z {
        0 => {
            if eval_cond(cpu, y) {
                queue_pop(cpu);
                cpu.finish = Finish::Ret;
                cpu.stage = Stage::Executing;
            }
        }
        1 => decode_x3_z1(cpu, p, q, idx),
        2 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::Jp(eval_cond(cpu, y));
            cpu.stage = Stage::Executing;
        }
        3 => decode_x3_z3(cpu, y, idx),
        4 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::CallCond(eval_cond(cpu, y));
            cpu.stage = Stage::Executing;
        }
        5 => {
            if q == 0 {
                let v = get_rp2_active(cpu, p, idx);
                cpu.regs.sp = cpu.regs.sp.wrapping_sub(1);
                cpu.phases.push_back(Phase::WriteMem(cpu.regs.sp, (v >> 8) as u8));
                cpu.regs.sp = cpu.regs.sp.wrapping_sub(1);
                cpu.phases.push_back(Phase::WriteMem(cpu.regs.sp, v as u8));
            } else if p == 0 {
                cpu.phases.push_back(Phase::ReadImm(0));
                cpu.phases.push_back(Phase::ReadImm(1));
                cpu.finish = Finish::CallCond(true);
                cpu.stage = Stage::Executing;
            }
        }
        6 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.finish = Finish::AluA(alu_op_for(y));
            cpu.stage = Stage::Executing;
        }
        _ => {
            cpu.addr = u16::from(y) * 8;
            cpu.push_return_address();
            cpu.finish = Finish::Rst;
            cpu.stage = Stage::Executing;
        }
    }
}

fn queue_pop(cpu: &mut Z80) {
    let addr = cpu.regs.sp;
    cpu.phases.push_back(Phase::ReadMem(addr, 0));
    cpu.regs.sp = cpu.regs.sp.wrapping_add(1);
    let addr2 = cpu.regs.sp;
    cpu.phases.push_back(Phase::ReadMem(addr2, 1));
    cpu.regs.sp = cpu.regs.sp.wrapping_add(1);
}

fn decode_x3_z1(cpu: &mut Z80, p: u8, q: u8, idx: Index) {
    if q == 0 {
        queue_pop(cpu);
        cpu.finish = Finish::PopDone(p);
        cpu.stage = Stage::Executing;
        return;
    }
    match p {
        0 => {
            queue_pop(cpu);
            cpu.finish = Finish::Ret;
            cpu.stage = Stage::Executing;
        }
        1 => {
            std::mem::swap(&mut cpu.regs.b, &mut cpu.regs.b_alt);
            std::mem::swap(&mut cpu.regs.c, &mut cpu.regs.c_alt);
            std::mem::swap(&mut cpu.regs.d, &mut cpu.regs.d_alt);
            std::mem::swap(&mut cpu.regs.e, &mut cpu.regs.e_alt);
            std::mem::swap(&mut cpu.regs.h, &mut cpu.regs.h_alt);
            std::mem::swap(&mut cpu.regs.l, &mut cpu.regs.l_alt);
        }
        2 => cpu.regs.pc = cpu.get_rp_active(2, idx),
        _ => cpu.regs.sp = cpu.get_rp_active(2, idx),
    }
}

fn decode_x3_z3(cpu: &mut Z80, y: u8, idx: Index) {
    match y {
        0 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = Finish::Jp(true);
            cpu.stage = Stage::Executing;
        }
        2 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.finish = Finish::OutImmPort;
            cpu.stage = Stage::Executing;
        }
        3 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.finish = Finish::InImmPort;
            cpu.stage = Stage::Executing;
        }
        4 => {
            let sp = cpu.regs.sp;
            cpu.phases.push_back(Phase::ReadMem(sp, 0));
            cpu.phases.push_back(Phase::ReadMem(sp.wrapping_add(1), 1));
            cpu.finish = Finish::ExSpHlRead;
            cpu.stage = Stage::Executing;
        }
        5 => {
            std::mem::swap(&mut cpu.regs.d, &mut cpu.regs.h);
            std::mem::swap(&mut cpu.regs.e, &mut cpu.regs.l);
        }
        6 => {
            cpu.regs.iff1 = false;
            cpu.regs.iff2 = false;
        }
        7 => {
            cpu.regs.iff1 = true;
            cpu.regs.iff2 = true;
            cpu.ei_delay = true;
        }
        _ => {}
    }
    let _ = idx;
}

pub(crate) fn decode_cb(cpu: &mut Z80, op: u8) {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    if z == 6 {
        let addr = cpu.regs.hl();
        cpu.addr = addr;
        cpu.phases.push_back(Phase::ReadMem(addr, 0));
        cpu.finish = Finish::CbOpMem(op);
        cpu.stage = Stage::Executing;
        return;
    }
    let v = cpu.reg8_get(z, Index::Hl);
    match x {
        0 => {
            let r = apply_rot(y, v, cpu.regs.f & CF != 0);
            cpu.reg8_set(z, Index::Hl, r.value);
            cpu.regs.f = r.flags;
        }
        1 => cpu.regs.f = alu::bit(v, y, v),
        2 => cpu.reg8_set(z, Index::Hl, v & !(1 << y)),
        _ => cpu.reg8_set(z, Index::Hl, v | (1 << y)),
    }
}

pub(crate) fn decode_cb_indexed(cpu: &mut Z80, op: u8) {
    let addr = cpu.effective_addr(cpu.index);
    cpu.addr = addr;
    cpu.phases.push_back(Phase::ReadMem(addr, 0));
    cpu.finish = Finish::CbOpMemIndexed(op);
    cpu.stage = Stage::Executing;
}

fn cb_mem_finish(cpu: &mut Z80, op: u8) {
    let v = cpu.imm[0];
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let addr = cpu.addr;
    match x {
        0 => {
            let r = apply_rot(y, v, cpu.regs.f & CF != 0);
            cpu.regs.f = r.flags;
            cpu.phases.push_back(Phase::WriteMem(addr, r.value));
            cpu.finish = Finish::None;
        }
        1 => cpu.regs.f = alu::bit(v, y, (addr >> 8) as u8),
        2 => {
            let r = v & !(1 << y);
            cpu.phases.push_back(Phase::WriteMem(addr, r));
            cpu.finish = Finish::None;
        }
        _ => {
            let r = v | (1 << y);
            cpu.phases.push_back(Phase::WriteMem(addr, r));
            cpu.finish = Finish::None;
        }
    }
}

pub(crate) fn decode_ed(cpu: &mut Z80, op: u8) {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let q = y & 1;

    if x == 2 && y >= 4 && z <= 3 {
        block_instruction(cpu, y, z);
        return;
    }
    if x != 1 {
        return;
    }

    match z {
        0 => {
            let port = cpu.regs.bc();
            cpu.phases.push_back(Phase::ReadPort(port));
            cpu.finish = Finish::InPort(if y == 6 { None } else { Some(y) });
            cpu.stage = Stage::Executing;
        }
        1 => {
            let v = if y == 6 { 0 } else { cpu.reg8_get(y, Index::Hl) };
            let port = cpu.regs.bc();
            cpu.phases.push_back(Phase::WritePort(port, v));
        }
        2 => {
            let a = cpu.regs.hl();
            let b = cpu.regs.get_rp(p);
            let carry = cpu.regs.f & CF != 0;
            let r = if q == 0 {
                alu::sbc16(a, b, carry)
            } else {
                alu::adc16(a, b, carry)
            };
            cpu.regs.set_hl(r.value);
            cpu.regs.f = r.flags;
        }
        3 => {
            cpu.phases.push_back(Phase::ReadImm(0));
            cpu.phases.push_back(Phase::ReadImm(1));
            cpu.finish = if q == 0 {
                Finish::ResolveAddrThenStWideRp(p)
            } else {
                Finish::ResolveAddrThenLdWideRp(p)
            };
            cpu.stage = Stage::Executing;
        }
        4 => {
            let a = cpu.regs.a;
            let r = alu::sub8(0, a);
            cpu.regs.a = r.value;
            cpu.regs.f = r.flags;
        }
        5 => {
            queue_pop(cpu);
            cpu.finish = if y == 1 { Finish::Reti } else { Finish::Retn };
            cpu.stage = Stage::Executing;
        }
        6 => {
            cpu.regs.im = match y {
                0 | 1 | 4 | 5 => 0,
                2 | 6 => 1,
                _ => 2,
            };
        }
        _ => decode_ed_z7(cpu, y),
    }
}

fn decode_ed_z7(cpu: &mut Z80, y: u8) {
    match y {
        0 => cpu.regs.i = cpu.regs.a,
        1 => cpu.regs.r = cpu.regs.a,
        2 => {
            let v = cpu.regs.i;
            cpu.regs.a = v;
            cpu.regs.f = (cpu.regs.f & CF) | sz53(v) | if cpu.regs.iff2 { PF } else { 0 };
        }
        3 => {
            let v = cpu.regs.r;
            cpu.regs.a = v;
            cpu.regs.f = (cpu.regs.f & CF) | sz53(v) | if cpu.regs.iff2 { PF } else { 0 };
        }
        4 => {
            let addr = cpu.regs.hl();
            cpu.addr = addr;
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::Rrd;
            cpu.stage = Stage::Executing;
        }
        5 => {
            let addr = cpu.regs.hl();
            cpu.addr = addr;
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::Rld;
            cpu.stage = Stage::Executing;
        }
        _ => {}
    }
}

fn block_instruction(cpu: &mut Z80, y: u8, z: u8) {
    let inc = y == 4 || y == 6;
    let repeat = y == 6 || y == 7;
    match z {
        0 => {
            let addr = cpu.regs.hl();
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::BlockLd { inc, repeat };
            cpu.stage = Stage::Executing;
        }
        1 => {
            let addr = cpu.regs.hl();
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::BlockCp { inc, repeat };
            cpu.stage = Stage::Executing;
        }
        2 => {
            let port = cpu.regs.bc();
            cpu.phases.push_back(Phase::ReadPort(port));
            cpu.finish = Finish::BlockIo { inc, repeat, is_in: true };
            cpu.stage = Stage::Executing;
        }
        _ => {
            let addr = cpu.regs.hl();
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::BlockIo { inc, repeat, is_in: false };
            cpu.stage = Stage::Executing;
        }
    }
}

pub(crate) fn apply_finish(cpu: &mut Z80) {
    let finish = std::mem::take(&mut cpu.finish);
    match finish {
        Finish::None => {}
        Finish::LdReg8(r) => {
            let v = cpu.imm[0];
            cpu.reg8_set(r, cpu.index, v);
        }
        Finish::LdMem => {
            let v = cpu.imm[0];
            let addr = cpu.addr;
            cpu.phases.push_back(Phase::WriteMem(addr, v));
        }
        Finish::LdReg16(rp) => {
            let v = cpu.imm16();
            cpu.set_rp_active(rp, cpu.index, v);
        }
        Finish::ResolveAddrThenLdReg8(r) => {
            let addr = cpu.imm16();
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::LdReg8(r);
        }
        Finish::ResolveAddrThenStReg8(r) => {
            let addr = cpu.imm16();
            let v = cpu.reg8_get(r, cpu.index);
            cpu.phases.push_back(Phase::WriteMem(addr, v));
        }
        Finish::ResolveAddrThenLdWide(rp) => {
            let addr = cpu.imm16();
            cpu.addr = addr.wrapping_add(1);
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::WideLoLoaded(rp);
        }
        Finish::ResolveAddrThenStWide(rp) => {
            let addr = cpu.imm16();
            let v = cpu.get_rp_active(rp, cpu.index);
            cpu.phases.push_back(Phase::WriteMem(addr, v as u8));
            cpu.finish = Finish::StWideHi(addr.wrapping_add(1), (v >> 8) as u8);
        }
        Finish::ResolveAddrThenLdWideRp(rp) => {
            let addr = cpu.imm16();
            cpu.addr = addr.wrapping_add(1);
            cpu.phases.push_back(Phase::ReadMem(addr, 0));
            cpu.finish = Finish::WideLoLoaded(rp | 0x80);
        }
        Finish::ResolveAddrThenStWideRp(rp) => {
            let addr = cpu.imm16();
            let v = cpu.regs.get_rp(rp);
            cpu.phases.push_back(Phase::WriteMem(addr, v as u8));
            cpu.finish = Finish::StWideHi(addr.wrapping_add(1), (v >> 8) as u8);
        }
        Finish::StWideHi(addr, hi) => {
            cpu.phases.push_back(Phase::WriteMem(addr, hi));
        }
        Finish::WideLoLoaded(tagged_rp) => {
            let addr = cpu.addr;
            cpu.phases.push_back(Phase::ReadMem(addr, 1));
            if tagged_rp & 0x80 != 0 {
                cpu.finish = Finish::PopDone(tagged_rp & 0x7F);
            } else {
                cpu.finish = Finish::LdReg16(tagged_rp);
            }
        }
        Finish::AluA(op) => {
            let v = cpu.imm[0];
            cpu.apply_alu(op, v);
        }
        Finish::IncMem => {
            let v = cpu.imm[0];
            let r = alu::inc8(v);
            cpu.regs.f = (cpu.regs.f & CF) | (r.flags & !CF);
            let addr = cpu.addr;
            cpu.phases.push_back(Phase::WriteMem(addr, r.value));
        }
        Finish::DecMem => {
            let v = cpu.imm[0];
            let r = alu::dec8(v);
            cpu.regs.f = (cpu.regs.f & CF) | (r.flags & !CF);
            let addr = cpu.addr;
            cpu.phases.push_back(Phase::WriteMem(addr, r.value));
        }
        Finish::CbOpMem(op) | Finish::CbOpMemIndexed(op) => cb_mem_finish(cpu, op),
        Finish::Jp(cond) => {
            if cond {
                cpu.regs.pc = cpu.imm16();
            }
        }
        Finish::JrCond(cond) => {
            if cond {
                cpu.regs.pc = cpu.regs.pc.wrapping_add(i16::from(cpu.displacement) as u16);
            }
        }
        Finish::Djnz => {
            cpu.regs.b = cpu.regs.b.wrapping_sub(1);
            if cpu.regs.b != 0 {
                cpu.regs.pc = cpu.regs.pc.wrapping_add(i16::from(cpu.displacement) as u16);
            }
        }
        Finish::CallCond(cond) => {
            if cond {
                let target = cpu.imm16();
                cpu.addr = target;
                cpu.push_return_address();
                cpu.finish = Finish::Rst;
            }
        }
        Finish::Ret => cpu.regs.pc = cpu.imm16(),
        Finish::Retn => {
            cpu.regs.pc = cpu.imm16();
            cpu.regs.iff1 = cpu.regs.iff2;
        }
        Finish::Reti => cpu.regs.pc = cpu.imm16(),
        Finish::Rst => cpu.regs.pc = cpu.addr,
        Finish::ExSpHlRead => {
            let popped = cpu.imm16();
            let old = cpu.get_rp_active(2, cpu.index);
            cpu.set_rp_active(2, cpu.index, popped);
            let sp = cpu.regs.sp;
            cpu.phases.push_back(Phase::WriteMem(sp, old as u8));
            cpu.finish = Finish::ExSpHlWrite(sp.wrapping_add(1), (old >> 8) as u8);
        }
        Finish::ExSpHlWrite(addr, hi) => {
            cpu.phases.push_back(Phase::WriteMem(addr, hi));
        }
        Finish::InPort(dest) => {
            let v = cpu.imm[0];
            cpu.regs.f = (cpu.regs.f & CF) | sz53p(v);
            if let Some(r) = dest {
                cpu.reg8_set(r, Index::Hl, v);
            }
        }
        Finish::OutImmPort => {
            let n = cpu.imm[0];
            let addr = u16::from(n) | (u16::from(cpu.regs.a) << 8);
            cpu.phases.push_back(Phase::WritePort(addr, cpu.regs.a));
        }
        Finish::InImmPort => {
            let n = cpu.imm[0];
            let addr = u16::from(n) | (u16::from(cpu.regs.a) << 8);
            cpu.phases.push_back(Phase::ReadPort(addr));
            cpu.finish = Finish::LdReg8(7);
        }
        Finish::Rrd => {
            let m = cpu.imm[0];
            let a = cpu.regs.a;
            let new_m = (a << 4) | (m >> 4);
            let new_a = (a & 0xF0) | (m & 0x0F);
            cpu.regs.a = new_a;
            cpu.regs.f = (cpu.regs.f & CF) | sz53p(new_a);
            cpu.phases.push_back(Phase::WriteMem(cpu.addr, new_m));
        }
        Finish::Rld => {
            let m = cpu.imm[0];
            let a = cpu.regs.a;
            let new_m = (m << 4) | (a & 0x0F);
            let new_a = (a & 0xF0) | (m >> 4);
            cpu.regs.a = new_a;
            cpu.regs.f = (cpu.regs.f & CF) | sz53p(new_a);
            cpu.phases.push_back(Phase::WriteMem(cpu.addr, new_m));
        }
        Finish::BlockLd { inc, repeat } => block_ld_finish(cpu, inc, repeat),
        Finish::BlockCp { inc, repeat } => block_cp_finish(cpu, inc, repeat),
        Finish::BlockIo { inc, repeat, is_in } => block_io_finish(cpu, inc, repeat, is_in),
        Finish::PopDone(p) => {
            let v = cpu.imm16();
            set_rp2_active(cpu, p, cpu.index, v);
        }
        Finish::InterruptAckData => interrupt_ack_finish(cpu),
        Finish::InterruptVectorReady => {
            let vec = cpu.addr;
            cpu.phases.push_back(Phase::ReadMem(vec, 0));
            cpu.phases.push_back(Phase::ReadMem(vec.wrapping_add(1), 1));
            cpu.finish = Finish::Jp(true);
        }
        Finish::ResumeMainAfterDisp(op) => {
            let idx = cpu.index;
            decode_main(cpu, op, idx);
        }
    }
}

fn block_ld_finish(cpu: &mut Z80, inc: bool, repeat: bool) {
    let v = cpu.imm[0];
    let de = cpu.regs.de();
    cpu.phases.push_back(Phase::WriteMem(de, v));
    cpu.regs.set_de(if inc { de.wrapping_add(1) } else { de.wrapping_sub(1) });
    let hl = cpu.regs.hl();
    cpu.regs.set_hl(if inc { hl.wrapping_add(1) } else { hl.wrapping_sub(1) });
    let bc = cpu.regs.bc().wrapping_sub(1);
    cpu.regs.set_bc(bc);
    let n = v.wrapping_add(cpu.regs.a);
    cpu.regs.f = (cpu.regs.f & (SF | ZF | CF))
        | (n & XF)
        | if n & 0x02 != 0 { YF } else { 0 }
        | if bc != 0 { PF } else { 0 };
    if repeat && bc != 0 {
        cpu.regs.pc = cpu.regs.pc.wrapping_sub(2);
    }
}

fn block_cp_finish(cpu: &mut Z80, inc: bool, repeat: bool) {
    let v = cpu.imm[0];
    let hl = cpu.regs.hl();
    cpu.regs.set_hl(if inc { hl.wrapping_add(1) } else { hl.wrapping_sub(1) });
    let bc = cpu.regs.bc().wrapping_sub(1);
    cpu.regs.set_bc(bc);
    let r = cpu.regs.a.wrapping_sub(v);
    let half_borrow = (cpu.regs.a & 0x0F) < (v & 0x0F);
    let n = if half_borrow { r.wrapping_sub(1) } else { r };
    let mut flags = sz53(r) & SF;
    flags |= if r == 0 { ZF } else { 0 };
    flags |= if half_borrow { HF } else { 0 };
    flags |= NF;
    flags |= if bc != 0 { PF } else { 0 };
    flags |= n & XF;
    flags |= if n & 0x02 != 0 { YF } else { 0 };
    cpu.regs.f = (cpu.regs.f & CF) | flags;
    if repeat && bc != 0 && r != 0 {
        cpu.regs.pc = cpu.regs.pc.wrapping_sub(2);
    }
}

fn block_io_finish(cpu: &mut Z80, inc: bool, repeat: bool, is_in: bool) {
    let v = cpu.imm[0];
    let hl = cpu.regs.hl();
    if is_in {
        cpu.phases.push_back(Phase::WriteMem(hl, v));
    } else {
        let port = cpu.regs.bc();
        cpu.phases.push_back(Phase::WritePort(port, v));
    }
    cpu.regs.set_hl(if inc { hl.wrapping_add(1) } else { hl.wrapping_sub(1) });
    let b = cpu.regs.b.wrapping_sub(1);
    cpu.regs.b = b;
    cpu.regs.f = (cpu.regs.f & CF) | sz53(b) | NF;
    if repeat && b != 0 {
        cpu.regs.pc = cpu.regs.pc.wrapping_sub(2);
    }
}

fn interrupt_ack_finish(cpu: &mut Z80) {
    let data = cpu.imm[0];
    match cpu.regs.im {
        0 => {
            cpu.addr = u16::from(data & 0x38);
            cpu.push_return_address();
            cpu.finish = Finish::Rst;
        }
        1 => {
            cpu.addr = 0x0038;
            cpu.push_return_address();
            cpu.finish = Finish::Rst;
        }
        _ => {
            cpu.addr = (u16::from(cpu.regs.i) << 8) | u16::from(data);
            cpu.push_return_address();
            cpu.finish = Finish::InterruptVectorReady;
        }
    }
}
