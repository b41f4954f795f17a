//! Top-level orchestrator: owns the CPU, memory, IO bus, ULA, and keyboard,
//! and drives them in T-state chunks between presenter callbacks.
//!
//! `System` is the only cyclic-ownership boundary in the crate: the ULA
//! drives the CPU's INT pin and the CPU's bus transactions call back into
//! memory and the IO bus, both of which the ULA also needs to reach. Rather
//! than store back-references, `tick`/`step_chunk` borrow everything it
//! needs for the duration of one call and return.

use std::path::Path;

use zx_z80::Z80;

use crate::config::SpectrumConfig;
use crate::error::SpectrumError;
use crate::io_bus::IoBus;
use crate::keyboard::Keyboard;
use crate::memory::Memory;
use crate::observable::{Observable, Value};
use crate::sna;
use crate::ula::Ula;

/// Default chunk size: `13 * 8 * 224` T-states, roughly a third of a frame.
pub const DEFAULT_CHUNK_T_STATES: u32 = 13 * 8 * 224;

/// Size of a raw `.scr` screen dump: 6144 pixel bytes + 768 attribute bytes.
pub const SCR_FILE_SIZE: usize = 6912;

/// Owns every component of a 48K machine and drives it T-state by T-state.
pub struct System {
    cpu: Z80,
    memory: Memory,
    io_bus: IoBus,
    ula: Ula,
    keyboard: Keyboard,
}

impl System {
    /// Build a fresh machine from `config`. The CPU, ULA, and keyboard all
    /// start in their power-on state; `config.rom` is loaded at `0x0000`.
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        Self {
            cpu: Z80::new(),
            memory: Memory::new(&config.rom, config.rom_protected),
            io_bus: IoBus::new(),
            ula: Ula::new(),
            keyboard: Keyboard::new(),
        }
    }

    /// Advance emulation by exactly `t_states` T-states.
    ///
    /// This is the only place the presenter may call into the core mid-run;
    /// no operation within it blocks, and the framebuffer is coherent again
    /// as soon as it returns.
    pub fn step_chunk(&mut self, t_states: u32) {
        for _ in 0..t_states {
            self.ula
                .tick(&mut self.cpu, &mut self.memory, &self.io_bus, &self.keyboard);
        }
    }

    /// Read-only access to the CRT framebuffer. Valid only between chunks.
    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        self.ula.framebuffer()
    }

    /// Mark a key pressed. `row` in `[0,7]`, `mask` one of
    /// `{0x01,0x02,0x04,0x08,0x10}`.
    pub fn key_press(&mut self, row: usize, mask: u8) {
        self.keyboard.press(row, mask);
    }

    /// Mark a key released.
    pub fn key_release(&mut self, row: usize, mask: u8) {
        self.keyboard.release(row, mask);
    }

    /// Debug hook: set the border color directly, bypassing port `0xFE`.
    pub fn set_border(&mut self, color: u8) {
        self.ula.set_border(color);
    }

    /// Load a 16 KiB raw ROM image at `0x0000`.
    ///
    /// # Errors
    ///
    /// Returns [`SpectrumError::FileNotFound`] if `path` cannot be read, or
    /// [`SpectrumError::FileTooSmall`] if the file is shorter than 16,384
    /// bytes.
    pub fn load_rom_file(&mut self, path: &Path) -> Result<(), SpectrumError> {
        self.memory.load_region(path, 0x0000, 0x4000)
    }

    /// Load a raw `.scr` screen dump (6912 bytes: 6144 pixel + 768
    /// attribute) at `0x4000`, overwriting whatever is currently displayed.
    ///
    /// # Errors
    ///
    /// Returns [`SpectrumError::FileNotFound`] if `path` cannot be read, or
    /// [`SpectrumError::FileTooSmall`] if the file is shorter than
    /// `SCR_FILE_SIZE`.
    pub fn load_scr_file(&mut self, path: &Path) -> Result<(), SpectrumError> {
        self.memory.load_region(path, 0x4000, SCR_FILE_SIZE)
    }

    /// Load a `.SNA` snapshot, restoring CPU registers, RAM, and border
    /// color. See [`sna::load_sna`] for the exact field layout.
    ///
    /// # Errors
    ///
    /// Returns [`SpectrumError::InvalidSnapshot`] if `data` is not exactly
    /// 49,179 bytes.
    pub fn load_sna(&mut self, data: &[u8]) -> Result<(), SpectrumError> {
        sna::load_sna(&mut self.cpu, &mut self.memory, &mut self.ula, data)
    }

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }
}

impl Observable for System {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return match rest {
                "pc" => Some(Value::U16(self.cpu.regs.pc)),
                "sp" => Some(Value::U16(self.cpu.regs.sp)),
                "af" => Some(Value::U16(self.cpu.regs.af())),
                "bc" => Some(Value::U16(self.cpu.regs.bc())),
                "de" => Some(Value::U16(self.cpu.regs.de())),
                "hl" => Some(Value::U16(self.cpu.regs.hl())),
                "ix" => Some(Value::U16(self.cpu.regs.ix)),
                "iy" => Some(Value::U16(self.cpu.regs.iy)),
                "i" => Some(Value::U8(self.cpu.regs.i)),
                "r" => Some(Value::U8(self.cpu.regs.r)),
                "im" => Some(Value::U8(self.cpu.regs.im)),
                "iff1" => Some(Value::Bool(self.cpu.regs.iff1)),
                "iff2" => Some(Value::Bool(self.cpu.regs.iff2)),
                "halted" => Some(Value::Bool(self.cpu.is_halted())),
                _ => None,
            };
        }
        if let Some(rest) = path.strip_prefix("ula.") {
            return match rest {
                "line" => Some(Value::U16(self.ula.line())),
                "line_cycle" => Some(Value::U16(self.ula.line_cycle())),
                "border_color" => Some(Value::U8(self.ula.border_color())),
                "odd_field" => Some(Value::Bool(self.ula.odd_field())),
                "flash_inverted" => Some(Value::Bool(self.ula.flash_inverted())),
                _ => None,
            };
        }
        if let Some(rest) = path.strip_prefix("memory.") {
            let addr = u16::from_str_radix(rest.trim_start_matches("0x"), 16).ok()?;
            return Some(Value::U8(self.memory.read(addr)));
        }
        None
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "cpu.pc",
            "cpu.sp",
            "cpu.af",
            "cpu.bc",
            "cpu.de",
            "cpu.hl",
            "cpu.ix",
            "cpu.iy",
            "cpu.i",
            "cpu.r",
            "cpu.im",
            "cpu.iff1",
            "cpu.iff2",
            "cpu.halted",
            "ula.line",
            "ula.line_cycle",
            "ula.border_color",
            "ula.odd_field",
            "ula.flash_inverted",
            "memory.<hex addr>",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectrumModel;
    use crate::ula::T_STATES_PER_FRAME;

    fn make_system() -> System {
        System::new(&SpectrumConfig {
            model: SpectrumModel::Spectrum48K,
            rom: vec![0u8; 0x4000],
            rom_protected: true,
        })
    }

    #[test]
    fn step_chunk_advances_the_beam() {
        let mut sys = make_system();
        sys.step_chunk(100);
        assert_eq!(sys.ula.line_cycle(), 100);
    }

    #[test]
    fn run_frame_returns_beam_to_origin() {
        let mut sys = make_system();
        sys.step_chunk(T_STATES_PER_FRAME);
        assert_eq!(sys.ula.line(), 0);
        assert_eq!(sys.ula.line_cycle(), 0);
    }

    #[test]
    fn framebuffer_has_the_expected_size() {
        let sys = make_system();
        assert_eq!(
            sys.framebuffer().len(),
            crate::crt::TOTAL_WIDTH * crate::crt::CRT_LINES
        );
    }

    #[test]
    fn observable_reports_cpu_registers() {
        let sys = make_system();
        assert_eq!(sys.query("cpu.pc"), Some(Value::U16(0)));
        assert_eq!(sys.query("cpu.sp"), Some(Value::U16(0xFFFF)));
    }

    #[test]
    fn observable_reports_memory_by_hex_address() {
        let sys = make_system();
        assert_eq!(sys.query("memory.0x0000"), Some(Value::U8(0)));
        assert_eq!(sys.query("not.a.path"), None);
    }

    #[test]
    fn key_press_is_visible_through_the_io_bus() {
        let mut sys = make_system();
        sys.key_press(0, 0x02);
        assert_eq!(sys.io_bus.read(0xFEFE, &sys.ula, &sys.keyboard), 0xFD);
    }

    #[test]
    fn load_sna_wrong_size_is_rejected() {
        let mut sys = make_system();
        assert!(sys.load_sna(&[0u8; 10]).is_err());
    }
}
