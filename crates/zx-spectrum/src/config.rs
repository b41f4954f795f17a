//! System model configuration.

/// The single machine this core models. Kept as an enum (rather than a
/// bare struct) to mirror the shape of a multi-model configuration without
/// actually supporting one — see the crate's non-goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumModel {
    Spectrum48K,
}

/// Configuration for creating a [`crate::system::System`].
pub struct SpectrumConfig {
    pub model: SpectrumModel,
    /// ROM data. Must be exactly 16,384 bytes.
    pub rom: Vec<u8>,
    /// Whether writes to `[0x0000, 0x4000)` are silently ignored.
    pub rom_protected: bool,
}

impl SpectrumConfig {
    #[must_use]
    pub fn new(rom: Vec<u8>) -> Self {
        Self {
            model: SpectrumModel::Spectrum48K,
            rom,
            rom_protected: true,
        }
    }
}
