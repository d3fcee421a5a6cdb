//! Software model of a VS1053 on its SPI bus.
//!
//! [`SimChip`] owns a register file, extended memory and transfer logs.
//! [`SimChip::driver`] hands out a [`Vs1053`] wired to peripherals that all
//! talk to the same chip, so a test keeps the `SimChip` to inspect what the
//! driver did and to inject faults (DREQ stalls, corrupt reads, a cancel
//! flag that is slow or never cleared).
//!
//! SCI frames are decoded byte by byte while XCS is low: opcode, address,
//! then two data bytes. Bytes clocked while only XDCS is low are SDI audio.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::spi::{self, SpiBus};
use parking_lot::Mutex;

use crate::codec::registers as reg;
use crate::codec::{BusClock, ReadyLine, Spin, Vs1053, WaitStrategy};

/// Driver type produced by [`SimChip::driver`].
pub type SimVs1053 = Vs1053<SimSpi, SimPin, SimPin, SimDreq, SimDelay>;

const RESET_REGISTERS: [u16; reg::REGISTER_COUNT] = {
    let mut regs = [0u16; reg::REGISTER_COUNT];
    regs[reg::MODE as usize] = reg::SM_SDINEW;
    regs[reg::STATUS as usize] = 0x0040;
    regs
};

// ── Chip state ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ChipState {
    present: bool,
    regs: [u16; reg::REGISTER_COUNT],
    wram: HashMap<u16, u16>,
    wram_ptr: u16,

    xcs_low: bool,
    xdcs_low: bool,
    /// Bytes of the current SCI frame.
    frame: [u8; 4],
    frame_pos: usize,
    /// Value latched by a read opcode, shifted out MSB first.
    read_latch: u16,

    dreq_low_polls: usize,
    dreq_polls: usize,
    pulled_idle: bool,

    corrupt_reads: usize,
    /// SDI bytes until SM_CANCEL clears; `None` means never.
    cancel_latency: Option<usize>,
    cancel_countdown: Option<usize>,

    sci_writes: Vec<(u8, u16)>,
    sci_reads: Vec<u8>,
    sdi: Vec<u8>,
    sdi_bursts: Vec<usize>,
    frequencies: Vec<u32>,
    transactions: usize,
    resets: usize,
    slept_ns: u64,
}

impl ChipState {
    fn new(present: bool) -> Self {
        ChipState {
            present,
            regs: RESET_REGISTERS,
            wram: HashMap::new(),
            wram_ptr: 0,
            xcs_low: false,
            xdcs_low: false,
            frame: [0; 4],
            frame_pos: 0,
            read_latch: 0,
            dreq_low_polls: 0,
            dreq_polls: 0,
            pulled_idle: false,
            corrupt_reads: 0,
            cancel_latency: Some(0),
            cancel_countdown: None,
            sci_writes: Vec::new(),
            sci_reads: Vec::new(),
            sdi: Vec::new(),
            sdi_bursts: Vec::new(),
            frequencies: Vec::new(),
            transactions: 0,
            resets: 0,
            slept_ns: 0,
        }
    }

    fn read(&mut self, address: u8) -> u16 {
        self.sci_reads.push(address);
        let mut value = match address {
            reg::WRAM => {
                let value = self.wram.get(&self.wram_ptr).copied().unwrap_or(0);
                self.wram_ptr = self.wram_ptr.wrapping_add(1);
                value
            }
            _ => self.regs[usize::from(address & 0x0F)],
        };
        if self.corrupt_reads > 0 {
            self.corrupt_reads -= 1;
            value ^= 0x5A5A;
        }
        value
    }

    fn write(&mut self, address: u8, value: u16) {
        self.sci_writes.push((address, value));
        match address {
            reg::WRAMADDR => {
                self.wram_ptr = value;
                self.regs[usize::from(address)] = value;
            }
            reg::WRAM => {
                self.wram.insert(self.wram_ptr, value);
                self.wram_ptr = self.wram_ptr.wrapping_add(1);
            }
            reg::MODE if value & reg::SM_RESET != 0 => {
                self.resets += 1;
                self.regs = RESET_REGISTERS;
                self.regs[usize::from(reg::MODE)] = value & !reg::SM_RESET;
                self.cancel_countdown = None;
            }
            reg::MODE if value & reg::SM_CANCEL != 0 => match self.cancel_latency {
                Some(0) => self.regs[usize::from(reg::MODE)] = value & !reg::SM_CANCEL,
                latency => {
                    self.regs[usize::from(reg::MODE)] = value;
                    self.cancel_countdown = latency;
                }
            },
            _ => self.regs[usize::from(address & 0x0F)] = value,
        }
    }

    /// Clock one byte; returns what the chip drives on MISO.
    fn exchange(&mut self, byte: u8) -> u8 {
        if !self.present {
            return 0;
        }
        if self.xcs_low {
            return self.exchange_sci(byte);
        }
        if self.xdcs_low {
            self.sdi.push(byte);
            if let Some(left) = self.cancel_countdown {
                let left = left.saturating_sub(1);
                if left == 0 {
                    self.regs[usize::from(reg::MODE)] &= !reg::SM_CANCEL;
                    self.cancel_countdown = None;
                } else {
                    self.cancel_countdown = Some(left);
                }
            }
        }
        0
    }

    fn exchange_sci(&mut self, byte: u8) -> u8 {
        let pos = self.frame_pos;
        if pos >= self.frame.len() {
            return 0;
        }
        self.frame[pos] = byte;
        self.frame_pos += 1;

        match (self.frame[0], pos) {
            (reg::OP_READ, 1) => {
                self.read_latch = self.read(byte);
                0
            }
            (reg::OP_READ, 2) => (self.read_latch >> 8) as u8,
            (reg::OP_READ, 3) => self.read_latch as u8,
            (reg::OP_WRITE, 3) => {
                let value = u16::from_be_bytes([self.frame[2], self.frame[3]]);
                self.write(self.frame[1], value);
                0
            }
            _ => 0,
        }
    }

    fn dreq_high(&mut self) -> bool {
        self.dreq_polls += 1;
        if !self.present {
            return self.pulled_idle;
        }
        if self.dreq_low_polls > 0 {
            self.dreq_low_polls -= 1;
            return false;
        }
        true
    }
}

// ── Chip handle ────────────────────────────────────────────────────────────

/// Shared handle to one simulated chip.
#[derive(Debug, Clone)]
pub struct SimChip {
    state: Arc<Mutex<ChipState>>,
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChip {
    /// A responsive chip with reset register values.
    pub fn new() -> Self {
        SimChip {
            state: Arc::new(Mutex::new(ChipState::new(true))),
        }
    }

    /// Nothing on the bus: DREQ reads low until pulled idle, reads return 0.
    pub fn absent() -> Self {
        SimChip {
            state: Arc::new(Mutex::new(ChipState::new(false))),
        }
    }

    /// A driver whose peripherals all talk to this chip.
    pub fn driver(&self) -> SimVs1053 {
        self.driver_with_wait(Spin)
    }

    /// Like [`SimChip::driver`], passing time between DREQ polls with `wait`.
    pub fn driver_with_wait<W: WaitStrategy>(
        &self,
        wait: W,
    ) -> Vs1053<SimSpi, SimPin, SimPin, SimDreq, SimDelay, W> {
        Vs1053::with_wait(
            SimSpi {
                state: Arc::clone(&self.state),
            },
            SimPin {
                state: Arc::clone(&self.state),
                role: Select::Control,
            },
            SimPin {
                state: Arc::clone(&self.state),
                role: Select::Data,
            },
            SimDreq {
                state: Arc::clone(&self.state),
            },
            SimDelay {
                state: Arc::clone(&self.state),
            },
            wait,
        )
    }

    // ── Register file ──────────────────────────────────────────────────

    pub fn register(&self, address: u8) -> u16 {
        self.state.lock().regs[usize::from(address & 0x0F)]
    }

    pub fn set_register(&self, address: u8, value: u16) {
        self.state.lock().regs[usize::from(address & 0x0F)] = value;
    }

    pub fn wram(&self, address: u16) -> u16 {
        self.state.lock().wram.get(&address).copied().unwrap_or(0)
    }

    pub fn set_wram(&self, address: u16, value: u16) {
        self.state.lock().wram.insert(address, value);
    }

    // ── SCI log ────────────────────────────────────────────────────────

    /// Every committed register write, oldest first.
    pub fn sci_writes(&self) -> Vec<(u8, u16)> {
        self.state.lock().sci_writes.clone()
    }

    /// Values written to one register, oldest first.
    pub fn writes_to(&self, address: u8) -> Vec<u16> {
        self.state
            .lock()
            .sci_writes
            .iter()
            .filter(|&&(a, _)| a == address)
            .map(|&(_, v)| v)
            .collect()
    }

    pub fn sci_reads(&self) -> usize {
        self.state.lock().sci_reads.len()
    }

    pub fn reads_of(&self, address: u8) -> usize {
        self.state
            .lock()
            .sci_reads
            .iter()
            .filter(|&&a| a == address)
            .count()
    }

    // ── SDI log ────────────────────────────────────────────────────────

    /// Every audio byte received, in order.
    pub fn sdi_bytes(&self) -> Vec<u8> {
        self.state.lock().sdi.clone()
    }

    /// Length of each SPI write made in data mode.
    pub fn sdi_bursts(&self) -> Vec<usize> {
        self.state.lock().sdi_bursts.clone()
    }

    pub fn clear_sdi(&self) {
        let mut state = self.state.lock();
        state.sdi.clear();
        state.sdi_bursts.clear();
    }

    // ── Bus ────────────────────────────────────────────────────────────

    /// Number of chip-select assertions (XCS or XDCS).
    pub fn transactions(&self) -> usize {
        self.state.lock().transactions
    }

    /// Every clock the driver programmed, in order.
    pub fn frequencies(&self) -> Vec<u32> {
        self.state.lock().frequencies.clone()
    }

    pub fn control_selected(&self) -> bool {
        self.state.lock().xcs_low
    }

    pub fn data_selected(&self) -> bool {
        self.state.lock().xdcs_low
    }

    // ── DREQ ───────────────────────────────────────────────────────────

    /// Make the next `polls` DREQ reads return low.
    pub fn hold_dreq_low(&self, polls: usize) {
        self.state.lock().dreq_low_polls = polls;
    }

    pub fn dreq_polls(&self) -> usize {
        self.state.lock().dreq_polls
    }

    pub fn dreq_pulled_idle(&self) -> bool {
        self.state.lock().pulled_idle
    }

    // ── Fault injection ────────────────────────────────────────────────

    /// Flip bits in the next `count` SCI reads.
    pub fn corrupt_reads(&self, count: usize) {
        self.state.lock().corrupt_reads = count;
    }

    /// How many SDI bytes the chip takes to clear SM_CANCEL after it is set.
    /// `None` never clears it. Defaults to clearing immediately.
    pub fn set_cancel_latency(&self, bytes: Option<usize>) {
        self.state.lock().cancel_latency = bytes;
    }

    /// Soft resets requested through SCI_MODE.
    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    /// Total time passed to the delay provider, in milliseconds.
    pub fn slept_ms(&self) -> u64 {
        self.state.lock().slept_ns / 1_000_000
    }
}

// ── Peripherals ────────────────────────────────────────────────────────────

/// SPI bus attached to a [`SimChip`].
#[derive(Debug)]
pub struct SimSpi {
    state: Arc<Mutex<ChipState>>,
}

impl spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiBus<u8> for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        for word in words.iter_mut() {
            *word = state.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        for &word in words {
            state.exchange(word);
        }
        if state.present && state.xdcs_low && !state.xcs_low {
            state.sdi_bursts.push(words.len());
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        for i in 0..read.len().max(write.len()) {
            let out = state.exchange(write.get(i).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(i) {
                *slot = out;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        for word in words.iter_mut() {
            *word = state.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl BusClock for SimSpi {
    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error> {
        self.state.lock().frequencies.push(hz);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Select {
    Control,
    Data,
}

/// XCS or XDCS chip-select of a [`SimChip`].
#[derive(Debug)]
pub struct SimPin {
    state: Arc<Mutex<ChipState>>,
    role: Select,
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        let selected = match self.role {
            Select::Control => &mut state.xcs_low,
            Select::Data => &mut state.xdcs_low,
        };
        if !*selected {
            *selected = true;
            state.transactions += 1;
            state.frame_pos = 0;
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        match self.role {
            Select::Control => state.xcs_low = false,
            Select::Data => state.xdcs_low = false,
        }
        state.frame_pos = 0;
        Ok(())
    }
}

/// DREQ line of a [`SimChip`].
#[derive(Debug)]
pub struct SimDreq {
    state: Arc<Mutex<ChipState>>,
}

impl digital::ErrorType for SimDreq {
    type Error = Infallible;
}

impl InputPin for SimDreq {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.state.lock().dreq_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

impl ReadyLine for SimDreq {
    fn pull_idle(&mut self) -> Result<(), Self::Error> {
        self.state.lock().pulled_idle = true;
        Ok(())
    }
}

/// Delay provider that records how long it was asked to wait and returns
/// immediately.
#[derive(Debug)]
pub struct SimDelay {
    state: Arc<Mutex<ChipState>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.state.lock().slept_ns += u64::from(ns);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.state.lock().slept_ns += u64::from(ms) * 1_000_000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_defaults_and_keeps_wram() {
        let chip = SimChip::new();
        let codec = chip.driver();
        chip.set_wram(0x1E06, 0x00CD);
        codec.write_register(reg::VOL, 0x1111).unwrap();
        codec.soft_reset().unwrap();

        assert_eq!(chip.register(reg::VOL), 0);
        assert_eq!(chip.register(reg::MODE), reg::SM_SDINEW);
        assert_eq!(chip.wram(0x1E06), 0x00CD);
        assert_eq!(chip.resets(), 1);
    }

    #[test]
    fn wram_pointer_auto_increments() {
        let chip = SimChip::new();
        let codec = chip.driver();
        codec.write_register(reg::WRAMADDR, 0x2000).unwrap();
        codec.write_register(reg::WRAM, 1).unwrap();
        codec.write_register(reg::WRAM, 2).unwrap();
        assert_eq!(chip.wram(0x2000), 1);
        assert_eq!(chip.wram(0x2001), 2);
    }

    #[test]
    fn absent_chip_reads_zero() {
        let chip = SimChip::absent();
        let codec = chip.driver();
        chip.set_register(reg::STATUS, 0x1234);
        let mut dreq = SimDreq {
            state: Arc::clone(&chip.state),
        };
        assert!(!dreq.is_high().unwrap());
        dreq.pull_idle().unwrap();
        assert_eq!(codec.read_register(reg::STATUS).unwrap(), 0);
    }
}
