//! `.SNA` snapshot loader.
//!
//! The 48K SNA format is 49,179 bytes: a 27-byte register header followed by
//! 49,152 bytes of RAM loaded verbatim at `0x4000`. Unlike most loaders of
//! this format, PC is not popped from the snapshot's own stack — it is
//! forced to a fixed trampoline address instead, so this core never has to
//! reason about what the snapshot's stack contents mean.

use crate::error::SpectrumError;
use crate::memory::Memory;
use crate::ula::Ula;
use zx_z80::Z80;

/// Expected size of a 48K SNA snapshot.
const SNA_48K_SIZE: usize = 49_179;

/// Header size in bytes, before the RAM image begins.
const HEADER_SIZE: usize = 27;

/// Fixed PC value snapshots resume at. The loader stages all register state
/// and RAM exactly as read, but the CPU does not start mid-instruction: it
/// begins a fresh fetch here rather than at whatever the snapshot's own
/// stack happens to hold.
pub const RESUME_PC: u16 = 0x0072;

/// Load a 48K `.SNA` snapshot's register state and RAM into `cpu`/`memory`,
/// and its border colour into `ula`.
///
/// # Errors
///
/// Returns [`SpectrumError::InvalidSnapshot`] if `data` is not exactly
/// 49,179 bytes.
pub fn load_sna(cpu: &mut Z80, memory: &mut Memory, ula: &mut Ula, data: &[u8]) -> Result<(), SpectrumError> {
    if data.len() != SNA_48K_SIZE {
        return Err(SpectrumError::InvalidSnapshot(format!(
            "expected exactly {SNA_48K_SIZE} bytes, got {}",
            data.len()
        )));
    }

    cpu.reset();
    let regs = &mut cpu.regs;

    regs.i = data[0];

    regs.l_alt = data[1];
    regs.h_alt = data[2];
    regs.e_alt = data[3];
    regs.d_alt = data[4];
    regs.c_alt = data[5];
    regs.b_alt = data[6];
    regs.f_alt = data[7];
    regs.a_alt = data[8];

    regs.l = data[9];
    regs.h = data[10];
    regs.e = data[11];
    regs.d = data[12];
    regs.c = data[13];
    regs.b = data[14];

    regs.iy = u16::from(data[15]) | (u16::from(data[16]) << 8);
    regs.ix = u16::from(data[17]) | (u16::from(data[18]) << 8);

    let iff2 = data[19] & 0x04 != 0;
    regs.iff1 = iff2;
    regs.iff2 = iff2;

    regs.r = data[20];

    regs.f = data[21];
    regs.a = data[22];

    regs.sp = u16::from(data[23]) | (u16::from(data[24]) << 8);

    regs.im = data[25];

    let border_colour = data[26];

    let ram_data = &data[HEADER_SIZE..];
    for (i, &byte) in ram_data.iter().enumerate() {
        memory.write(0x4000u16.wrapping_add(i as u16), byte);
    }

    ula.set_border(border_colour);

    cpu.prefetch(RESUME_PC);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sna() -> Vec<u8> {
        let mut data = vec![0u8; SNA_48K_SIZE];
        data[0] = 0x3F; // I
        data[20] = 0x42; // R
        data[21] = 0xFF; // F
        data[22] = 0xAA; // A
        data[23] = 0x00; // SP low
        data[24] = 0x80; // SP high -> 0x8000
        data[25] = 1; // IM 1
        data[26] = 2; // border = red
        data[HEADER_SIZE] = 0x77; // first RAM byte at 0x4000
        data
    }

    fn make_memory() -> Memory {
        Memory::new(&vec![0u8; 0x4000], true)
    }

    #[test]
    fn load_sna_sets_registers() {
        let mut cpu = Z80::new();
        let mut memory = make_memory();
        let mut ula = Ula::new();
        let sna = make_sna();

        load_sna(&mut cpu, &mut memory, &mut ula, &sna).expect("load_sna should succeed");

        assert_eq!(cpu.regs.i, 0x3F);
        assert_eq!(cpu.regs.r, 0x42);
        assert_eq!(cpu.regs.f, 0xFF);
        assert_eq!(cpu.regs.a, 0xAA);
        assert_eq!(cpu.regs.im, 1);
        assert_eq!(cpu.regs.sp, 0x8000);
        assert_eq!(cpu.regs.pc, RESUME_PC);
    }

    #[test]
    fn load_sna_loads_ram() {
        let mut cpu = Z80::new();
        let mut memory = make_memory();
        let mut ula = Ula::new();
        let sna = make_sna();

        load_sna(&mut cpu, &mut memory, &mut ula, &sna).unwrap();

        assert_eq!(memory.read(0x4000), 0x77);
    }

    #[test]
    fn load_sna_sets_border() {
        let mut cpu = Z80::new();
        let mut memory = make_memory();
        let mut ula = Ula::new();
        let sna = make_sna();

        load_sna(&mut cpu, &mut memory, &mut ula, &sna).unwrap();

        assert_eq!(ula.border_color(), 2);
    }

    #[test]
    fn load_sna_wrong_size_is_rejected() {
        let mut cpu = Z80::new();
        let mut memory = make_memory();
        let mut ula = Ula::new();

        let result = load_sna(&mut cpu, &mut memory, &mut ula, &[0u8; 100]);
        assert!(matches!(result, Err(SpectrumError::InvalidSnapshot(_))));
    }
}
