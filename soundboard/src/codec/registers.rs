//! VS1053 SCI register addresses, bitfields and protocol constants.
//!
//! Register numbers are 4-bit; every register holds a 16-bit value sent
//! most-significant byte first after a one-byte opcode and one-byte address.

// ── SCI opcodes ────────────────────────────────────────────────────────────

/// SCI write instruction.
pub const OP_WRITE: u8 = 0x02;

/// SCI read instruction.
pub const OP_READ: u8 = 0x03;

// ── SCI registers ──────────────────────────────────────────────────────────

/// Mode control.
/// - Bit 14: SM_LINE1 (line input instead of mic)
/// - Bit 11: SM_SDINEW (native SPI modes, always set)
/// - Bit  3: SM_CANCEL (cancel decoding current file)
/// - Bit  2: SM_RESET (soft reset, self-clearing)
pub const MODE: u8 = 0x0;

/// Status of the chip.
pub const STATUS: u8 = 0x1;

/// Built-in bass/treble control.
/// - Bits 15:12: ST_AMPLITUDE (treble, 1.5 dB steps, signed)
/// - Bits 11:8 : ST_FREQLIMIT (treble lower limit, 1 kHz steps)
/// - Bits  7:4 : SB_AMPLITUDE (bass enhancement, 1 dB steps)
/// - Bits  3:0 : SB_FREQLIMIT (bass lower limit, 10 Hz steps)
pub const BASS: u8 = 0x2;

/// Clock frequency and multiplier.
/// - Bits 15:13: SC_MULT
/// - Bits 12:11: SC_ADD
/// - Bits 10:0 : SC_FREQ
pub const CLOCKF: u8 = 0x3;

/// Decode time in seconds.
pub const DECODE_TIME: u8 = 0x4;

/// Sample rate; bit 0 selects stereo.
pub const AUDATA: u8 = 0x5;

/// Extended memory data window.
pub const WRAM: u8 = 0x6;

/// Extended memory address window.
pub const WRAMADDR: u8 = 0x7;

/// Stream header data 0.
pub const HDAT0: u8 = 0x8;

/// Stream header data 1.
pub const HDAT1: u8 = 0x9;

/// Start address of application.
pub const AIADDR: u8 = 0xA;

/// Volume control.
/// - Bits 15:8: left attenuation (0.5 dB steps, 0xFE = silent)
/// - Bits  7:0: right attenuation
pub const VOL: u8 = 0xB;

/// Application control registers.
pub const AICTRL0: u8 = 0xC;
pub const AICTRL1: u8 = 0xD;
pub const AICTRL2: u8 = 0xE;
pub const AICTRL3: u8 = 0xF;

/// Number of SCI registers.
pub const REGISTER_COUNT: usize = 16;

/// Short register names, indexed by address, for log output.
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "MODE", "STATUS", "BASS", "CLOCKF", "DECODE_TIME", "AUDATA", "WRAM", "WRAMADDR", "HDAT0",
    "HDAT1", "AIADDR", "VOL", "AICTRL0", "AICTRL1", "AICTRL2", "AICTRL3",
];

// ── MODE bits ──────────────────────────────────────────────────────────────

pub const SM_RESET: u16 = 1 << 2;
pub const SM_CANCEL: u16 = 1 << 3;
pub const SM_SDINEW: u16 = 1 << 11;
pub const SM_LINE1: u16 = 1 << 14;

// ── Values programmed during bring-up ──────────────────────────────────────

/// 44.1 kHz, stereo (bit 0 set).
pub const AUDATA_44K1_STEREO: u16 = 44_100 + 1;

/// SC_MULT = 3.0x (12.288 MHz XTALI → 36.9 MHz CLKI); allows SPI up to ~5 MHz.
pub const CLOCKF_MULT_3X: u16 = 6 << 12;

// ── Extended memory (WRAM) addresses ───────────────────────────────────────

/// GPIO direction register. Boards that boot into MIDI mode need GPIO0/1
/// driven low before a soft reset to come up in MP3 decode mode.
pub const WRAM_GPIO_DDR: u16 = 0xC017;

/// GPIO output data register.
pub const WRAM_GPIO_ODATA: u16 = 0xC019;

/// Parametric block: end-fill byte (low byte).
pub const WRAM_END_FILL_BYTE: u16 = 0x1E06;

// ── Volume mapping ─────────────────────────────────────────────────────────

/// Attenuation code for volume 0 (0xFE would power down the analog stage).
pub const VOL_MIN_ATTENUATION_CODE: u8 = 0xF8;

// ── SDI filler bursts ──────────────────────────────────────────────────────

/// Filler bytes sent before the first data chunk of a song.
pub const START_FILL_BYTES: usize = 10;

/// Filler bytes sent around the cancel sequence (datasheet: 2052 for FLAC,
/// enough for every other format).
pub const END_FILL_BYTES: usize = 2052;

/// Maximum number of cancel polls before giving up.
pub const CANCEL_POLL_LIMIT: u32 = 200;

/// Delay between cancel polls.
pub const CANCEL_POLL_INTERVAL_MS: u32 = 10;

// ── Self-test ──────────────────────────────────────────────────────────────

/// VOL sweep stride at the slow bus speed.
pub const SELF_TEST_STRIDE_SLOW: usize = 300;

/// VOL sweep stride at the fast bus speed.
pub const SELF_TEST_STRIDE_FAST: usize = 3;

/// The sweep gives up after this many mismatches.
pub const SELF_TEST_MAX_ERRORS: u16 = 20;
