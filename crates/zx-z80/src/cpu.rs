//! The Z80 CPU: a pure state machine driven entirely through `Pins`.
//!
//! `tick()` never touches memory or IO. It only ever inspects the data byte a
//! prior `transact()` deposited on the bus and decides what the *next*
//! T-state's pins should look like. `transact()` is the only place that
//! reads `Pins` and performs the actual memory/IO access.

use std::collections::VecDeque;

use crate::alu;
use crate::decode;
use crate::flags::CF;
use crate::pins::Pins;
use crate::registers::Registers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Hl,
    Ix,
    Iy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    FetchOpcode,
    ReadDisp,
    ReadImm(u8),
    ReadMem(u16, u8),
    WriteMem(u16, u8),
    ReadPort(u16),
    WritePort(u16, u8),
    Internal,
    InterruptAckM1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    FetchingOpcode,
    FetchingIndexedCbOperand,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Finish {
    #[default]
    None,
    LdReg8(u8),
    LdMem,
    LdReg16(u8),
    ResolveAddrThenLdReg8(u8),
    ResolveAddrThenStReg8(u8),
    ResolveAddrThenLdWide(u8),
    ResolveAddrThenStWide(u8),
    WideLoLoaded(u8),
    ResumeMainAfterDisp(u8),
    ResolveAddrThenStWideRp(u8),
    ResolveAddrThenLdWideRp(u8),
    StWideHi(u16, u8),
    AluA(AluOp),
    IncMem,
    DecMem,
    CbOpMem(u8),
    CbOpMemIndexed(u8),
    Jp(bool),
    JrCond(bool),
    Djnz,
    CallCond(bool),
    Ret,
    Retn,
    Reti,
    Rst,
    ExSpHlRead,
    ExSpHlWrite(u16, u8),
    InPort(Option<u8>),
    OutImmPort,
    InImmPort,
    Rrd,
    Rld,
    BlockLd { inc: bool, repeat: bool },
    BlockCp { inc: bool, repeat: bool },
    BlockIo { inc: bool, repeat: bool, is_in: bool },
    PopDone(u8),
    InterruptAckData,
    InterruptVectorReady,
}

pub struct Z80 {
    pub regs: Registers,
    pub(crate) halted: bool,
    pub(crate) pending_int: bool,
    pub(crate) pending_nmi: bool,
    pub(crate) ei_delay: bool,
    pub(crate) phases: VecDeque<Phase>,
    pub(crate) waiting: Option<Phase>,
    pub(crate) stage: Stage,
    pub(crate) opcode: u8,
    pub(crate) index: Index,
    pub(crate) ext_ed: bool,
    pub(crate) ext_cb: bool,
    pub(crate) displacement: i8,
    pub(crate) imm: [u8; 2],
    pub(crate) addr: u16,
    pub(crate) finish: Finish,
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::power_on(),
            halted: false,
            pending_int: false,
            pending_nmi: false,
            ei_delay: false,
            phases: VecDeque::new(),
            waiting: None,
            stage: Stage::FetchingOpcode,
            opcode: 0,
            index: Index::Hl,
            ext_ed: false,
            ext_cb: false,
            displacement: 0,
            imm: [0; 2],
            addr: 0,
            finish: Finish::None,
        }
    }

    /// Reset to power-on state. Clears the decode pipeline so the next
    /// `tick()` begins a fresh opcode fetch.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Bias the fetch pipeline so the next instruction is fetched from `pc`,
    /// without touching any other register. Used by snapshot restore.
    pub fn prefetch(&mut self, pc: u16) {
        self.halted = false;
        self.phases.clear();
        self.waiting = None;
        self.stage = Stage::FetchingOpcode;
        self.index = Index::Hl;
        self.ext_ed = false;
        self.ext_cb = false;
        self.finish = Finish::None;
        self.regs.pc = pc;
    }

    /// Level-triggered maskable interrupt request. Returns whether the
    /// request will actually be serviced (IFF1 enabled).
    pub fn interrupt(&mut self) -> bool {
        self.pending_int = true;
        self.regs.iff1
    }

    pub fn clear_interrupt(&mut self) {
        self.pending_int = false;
    }

    /// Edge-triggered non-maskable interrupt request.
    pub fn nmi(&mut self) {
        self.pending_nmi = true;
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Advance by one T-state. Pure function of `pins_in` (the data the
    /// previous `transact()` deposited) and internal state.
    #[must_use]
    pub fn tick(&mut self, pins_in: Pins) -> Pins {
        if let Some(phase) = self.waiting.take() {
            self.complete_phase(phase, pins_in.data);
        }

        if self.phases.is_empty() {
            self.begin_next();
        }

        let phase = self.phases.pop_front().unwrap_or(Phase::Internal);
        let pins_out = self.phase_pins(phase);
        self.waiting = Some(phase);
        pins_out
    }

    /// Perform the bus access the last `tick()` call requested, using
    /// `memory`/`io`. Deposits any read result onto the returned pins' data
    /// line so the next `tick()` call can consume it.
    #[must_use]
    pub fn transact<M, I>(&self, pins: Pins, memory: &mut M, io: &mut I) -> Pins
    where
        M: FnMut(bool, u16, u8) -> u8,
        I: FnMut(bool, u16, u8) -> u8,
    {
        let mut out = pins;
        if pins.mreq && pins.rd {
            out.data = memory(false, pins.address, 0);
        } else if pins.mreq && pins.wr {
            memory(true, pins.address, pins.data);
        } else if pins.iorq && pins.m1 {
            out.data = io(false, 0xFFFF, 0);
        } else if pins.iorq && pins.rd {
            out.data = io(false, pins.address, 0);
        } else if pins.iorq && pins.wr {
            io(true, pins.address, pins.data);
        }
        out
    }

    fn begin_next(&mut self) {
        if self.halted {
            self.phases.push_back(Phase::Internal);
            self.stage = Stage::Executing;
            self.finish = Finish::None;
            return;
        }

        if self.pending_nmi {
            self.pending_nmi = false;
            self.regs.iff2 = self.regs.iff1;
            self.regs.iff1 = false;
            self.halted = false;
            self.push_return_address();
            self.addr = 0x0066;
            self.finish = Finish::Rst;
            self.stage = Stage::Executing;
            return;
        }

        if self.pending_int && self.regs.iff1 && !self.ei_delay {
            self.pending_int = false;
            self.regs.iff1 = false;
            self.regs.iff2 = false;
            self.halted = false;
            self.phases.push_back(Phase::InterruptAckM1);
            self.finish = Finish::InterruptAckData;
            self.stage = Stage::Executing;
            return;
        }
        self.ei_delay = false;

        self.index = Index::Hl;
        self.ext_ed = false;
        self.ext_cb = false;
        self.finish = Finish::None;
        self.stage = Stage::FetchingOpcode;
        self.phases.push_back(Phase::FetchOpcode);
    }

    pub(crate) fn push_return_address(&mut self) {
        let pc = self.regs.pc;
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.phases
            .push_back(Phase::WriteMem(self.regs.sp, (pc >> 8) as u8));
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.phases.push_back(Phase::WriteMem(self.regs.sp, pc as u8));
    }

    fn phase_pins(&mut self, phase: Phase) -> Pins {
        match phase {
            Phase::FetchOpcode => {
                let addr = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.regs.bump_r();
                Pins::opcode_fetch(addr)
            }
            Phase::ReadDisp | Phase::ReadImm(_) => {
                let addr = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                Pins::memory_read(addr)
            }
            Phase::ReadMem(addr, _) => Pins::memory_read(addr),
            Phase::WriteMem(addr, value) => Pins::memory_write(addr, value),
            Phase::ReadPort(addr) => Pins::io_read(addr),
            Phase::WritePort(addr, value) => Pins::io_write(addr, value),
            Phase::Internal => Pins::idle(),
            Phase::InterruptAckM1 => Pins::interrupt_ack(),
        }
    }

    fn complete_phase(&mut self, phase: Phase, data: u8) {
        match phase {
            Phase::ReadDisp => self.displacement = data as i8,
            Phase::ReadImm(slot) => self.imm[slot as usize] = data,
            Phase::ReadMem(_, slot) => self.imm[slot as usize] = data,
            Phase::ReadPort(_) | Phase::InterruptAckM1 => self.imm[0] = data,
            Phase::FetchOpcode
            | Phase::WriteMem(_, _)
            | Phase::WritePort(_, _)
            | Phase::Internal => {}
        }

        if !self.phases.is_empty() {
            return;
        }

        match self.stage {
            Stage::FetchingOpcode => self.on_opcode_fetched(data),
            Stage::FetchingIndexedCbOperand => {
                let op = self.imm[0];
                decode::decode_cb_indexed(self, op);
            }
            Stage::Executing => decode::apply_finish(self),
        }
    }

    fn on_opcode_fetched(&mut self, byte: u8) {
        if self.ext_cb {
            self.ext_cb = false;
            decode::decode_cb(self, byte);
            return;
        }

        self.opcode = byte;
        match byte {
            0xDD => {
                self.index = Index::Ix;
                self.phases.push_back(Phase::FetchOpcode);
            }
            0xFD => {
                self.index = Index::Iy;
                self.phases.push_back(Phase::FetchOpcode);
            }
            0xED => {
                self.ext_ed = true;
                self.phases.push_back(Phase::FetchOpcode);
            }
            0xCB if self.index != Index::Hl => {
                self.phases.push_back(Phase::ReadDisp);
                self.phases.push_back(Phase::ReadImm(0));
                self.stage = Stage::FetchingIndexedCbOperand;
            }
            0xCB => {
                self.ext_cb = true;
                self.phases.push_back(Phase::FetchOpcode);
            }
            _ if self.ext_ed => {
                self.ext_ed = false;
                decode::decode_ed(self, byte);
            }
            _ if self.index != Index::Hl && decode::needs_displacement(byte) => {
                self.phases.push_back(Phase::ReadDisp);
                self.finish = Finish::ResumeMainAfterDisp(byte);
                self.stage = Stage::Executing;
            }
            _ => decode::decode_main(self, byte, self.index),
        }
    }

    // -- register helpers aware of the active index register --------------

    pub(crate) fn reg8_get(&self, index_sel: u8, idx: Index) -> u8 {
        match (index_sel, idx) {
            (4, Index::Ix) => (self.regs.ix >> 8) as u8,
            (5, Index::Ix) => self.regs.ix as u8,
            (4, Index::Iy) => (self.regs.iy >> 8) as u8,
            (5, Index::Iy) => self.regs.iy as u8,
            _ => self.regs.get_r8(index_sel),
        }
    }

    pub(crate) fn reg8_set(&mut self, index_sel: u8, idx: Index, value: u8) {
        match (index_sel, idx) {
            (4, Index::Ix) => self.regs.ix = (self.regs.ix & 0x00FF) | (u16::from(value) << 8),
            (5, Index::Ix) => self.regs.ix = (self.regs.ix & 0xFF00) | u16::from(value),
            (4, Index::Iy) => self.regs.iy = (self.regs.iy & 0x00FF) | (u16::from(value) << 8),
            (5, Index::Iy) => self.regs.iy = (self.regs.iy & 0xFF00) | u16::from(value),
            _ => self.regs.set_r8(index_sel, value),
        }
    }

    pub(crate) fn get_rp_active(&self, rp: u8, idx: Index) -> u16 {
        match (rp, idx) {
            (2, Index::Ix) => self.regs.ix,
            (2, Index::Iy) => self.regs.iy,
            _ => self.regs.get_rp(rp),
        }
    }

    pub(crate) fn set_rp_active(&mut self, rp: u8, idx: Index, value: u16) {
        match (rp, idx) {
            (2, Index::Ix) => self.regs.ix = value,
            (2, Index::Iy) => self.regs.iy = value,
            _ => self.regs.set_rp(rp, value),
        }
    }

    pub(crate) fn effective_addr(&self, idx: Index) -> u16 {
        match idx {
            Index::Hl => self.regs.hl(),
            Index::Ix => self.regs.ix.wrapping_add(i16::from(self.displacement) as u16),
            Index::Iy => self.regs.iy.wrapping_add(i16::from(self.displacement) as u16),
        }
    }

    pub(crate) fn imm16(&self) -> u16 {
        u16::from(self.imm[0]) | (u16::from(self.imm[1]) << 8)
    }

    pub(crate) fn apply_alu(&mut self, op: AluOp, operand: u8) {
        let carry = self.regs.f & CF != 0;
        let r = match op {
            AluOp::Add => alu::add8(self.regs.a, operand),
            AluOp::Adc => alu::adc8(self.regs.a, operand, carry),
            AluOp::Sub => alu::sub8(self.regs.a, operand),
            AluOp::Sbc => alu::sbc8(self.regs.a, operand, carry),
            AluOp::And => alu::and8(self.regs.a, operand),
            AluOp::Xor => alu::xor8(self.regs.a, operand),
            AluOp::Or => alu::or8(self.regs.a, operand),
            AluOp::Cp => {
                self.regs.f = alu::cp8(self.regs.a, operand);
                return;
            }
        };
        self.regs.a = r.value;
        self.regs.f = r.flags;
    }
}
