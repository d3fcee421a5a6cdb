//! VS1053 MP3 decoder driver.
//!
//! Speaks the chip's two SPI personalities: SCI (control mode, XCS low) for
//! 16-bit register access and SDI (data mode, XDCS low) for the compressed
//! audio stream. DREQ gates both: the chip holds it low while a register
//! operation is in progress or while its 2 KiB input FIFO cannot take another
//! 32 bytes.
//!
//! The driver is generic over `embedded-hal` 1.0 SPI, pins and delay, plus the
//! [`BusClock`] and [`ReadyLine`] extensions.
//!
//! # Sharing
//!
//! All methods take `&self`. The bus and its two chip-selects sit behind one
//! mutex that is held for exactly one SCI or SDI transaction, so a volume
//! change from the command context can slot in between two audio chunks sent
//! by the consumer thread but never inside one.
//!
//! # Example
//!
//! ```ignore
//! let codec = Vs1053::new(spi, xcs, xdcs, dreq, delay);
//! let report = codec.bring_up()?;
//! codec.set_volume(80)?;
//! codec.start_song()?;
//! codec.send_chunk(&mp3_bytes[..32])?;
//! ```

use core::ops::Range;
use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::hal::{BusClock, ReadyLine, Spin, WaitStrategy};
use super::registers as reg;
use crate::constants::{CHUNK_SIZE, FAST_BUS_HZ, SLOW_BUS_HZ};
use crate::control::{Decoder, StopOutcome};
use crate::error::CodecError;

// ── Public types ───────────────────────────────────────────────────────────

/// Outcome of a register read/write self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTest {
    /// Every write read back correctly, twice.
    Passed,
    /// DREQ was low before any transfer: no chip on the bus.
    Absent,
    /// Number of values that did not read back correctly (capped at 20).
    Mismatches(u16),
}

impl SelfTest {
    pub fn is_ok(&self) -> bool {
        *self == SelfTest::Passed
    }
}

/// What [`Vs1053::bring_up`] found out about the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringUpReport {
    /// Self-test at the slow bring-up clock.
    pub slow: SelfTest,
    /// Self-test after switching to the fast clock.
    pub fast: SelfTest,
    /// End-fill byte read from extended memory, used for all padding.
    pub fill_byte: u8,
}

impl BringUpReport {
    /// Both self-tests passed.
    pub fn is_healthy(&self) -> bool {
        self.slow.is_ok() && self.fast.is_ok()
    }
}

/// Map a 0–100 volume to the VS1053 attenuation code (0xF8 … 0x00).
///
/// Values above 100 are treated as 100.
pub fn volume_code(volume: u8) -> u8 {
    let max = u32::from(reg::VOL_MIN_ATTENUATION_CODE);
    let volume = u32::from(volume.min(100));
    (max - volume * max / 100) as u8
}

// ── Driver struct ──────────────────────────────────────────────────────────

/// SPI bus plus both chip-selects. Owning this is owning the bus.
struct Bus<SPI, XCS, XDCS> {
    spi: SPI,
    xcs: XCS,
    xdcs: XDCS,
    /// Clock for the next transaction.
    hz: u32,
    /// Clock last programmed into the SPI peripheral.
    applied_hz: Option<u32>,
}

impl<SPI, XCS, XDCS> Bus<SPI, XCS, XDCS>
where
    SPI: BusClock,
    XCS: OutputPin,
    XDCS: OutputPin,
{
    fn apply_clock(&mut self) -> Result<(), CodecError> {
        if self.applied_hz != Some(self.hz) {
            self.spi.set_frequency(self.hz).map_err(CodecError::spi)?;
            self.applied_hz = Some(self.hz);
        }
        Ok(())
    }

    fn control_mode_on(&mut self) -> Result<(), CodecError> {
        self.apply_clock()?;
        self.xdcs.set_high().map_err(CodecError::pin)?;
        self.xcs.set_low().map_err(CodecError::pin)
    }

    fn control_mode_off(&mut self) -> Result<(), CodecError> {
        self.xcs.set_high().map_err(CodecError::pin)
    }

    fn data_mode_on(&mut self) -> Result<(), CodecError> {
        self.apply_clock()?;
        self.xcs.set_high().map_err(CodecError::pin)?;
        self.xdcs.set_low().map_err(CodecError::pin)
    }

    fn data_mode_off(&mut self) -> Result<(), CodecError> {
        self.xdcs.set_high().map_err(CodecError::pin)
    }
}

/// DREQ input and the strategy used while it is low.
struct Ready<DREQ, W> {
    line: DREQ,
    wait: W,
    /// Set once the chip is known to be absent; DREQ is then treated as high.
    forced: bool,
}

impl<DREQ, W> Ready<DREQ, W>
where
    DREQ: ReadyLine,
    W: WaitStrategy,
{
    fn is_set(&mut self) -> Result<bool, CodecError> {
        if self.forced {
            return Ok(true);
        }
        self.line.is_high().map_err(CodecError::pin)
    }

    /// Block until DREQ is high. No timeout: an absent chip is caught by
    /// [`Vs1053::self_test`] before this can spin forever.
    fn wait(&mut self) -> Result<(), CodecError> {
        while !self.is_set()? {
            self.wait.pause();
        }
        Ok(())
    }
}

/// VS1053 decoder driver.
///
/// Generic over the SPI bus, the XCS (control) and XDCS (data) chip-selects,
/// the DREQ input, a delay provider and the DREQ [`WaitStrategy`].
pub struct Vs1053<SPI, XCS, XDCS, DREQ, D, W = Spin> {
    bus: Mutex<Bus<SPI, XCS, XDCS>>,
    ready: Mutex<Ready<DREQ, W>>,
    delay: Mutex<D>,
    /// Last volume written to SCI_VOL, `None` when unknown.
    volume: Mutex<Option<u8>>,
    fill_byte: AtomicU8,
    slow_hz: u32,
    fast_hz: u32,
}

impl<SPI, XCS, XDCS, DREQ, D> Vs1053<SPI, XCS, XDCS, DREQ, D, Spin> {
    /// Create a driver that spins while waiting for DREQ.
    pub fn new(spi: SPI, xcs: XCS, xdcs: XDCS, dreq: DREQ, delay: D) -> Self {
        Self::with_wait(spi, xcs, xdcs, dreq, delay, Spin)
    }
}

impl<SPI, XCS, XDCS, DREQ, D, W> Vs1053<SPI, XCS, XDCS, DREQ, D, W> {
    /// Create a driver with a custom DREQ wait strategy.
    pub fn with_wait(spi: SPI, xcs: XCS, xdcs: XDCS, dreq: DREQ, delay: D, wait: W) -> Self {
        Self {
            bus: Mutex::new(Bus {
                spi,
                xcs,
                xdcs,
                hz: SLOW_BUS_HZ,
                applied_hz: None,
            }),
            ready: Mutex::new(Ready {
                line: dreq,
                wait,
                forced: false,
            }),
            delay: Mutex::new(delay),
            volume: Mutex::new(None),
            fill_byte: AtomicU8::new(0),
            slow_hz: SLOW_BUS_HZ,
            fast_hz: FAST_BUS_HZ,
        }
    }

    /// Override the bring-up and steady-state bus clocks.
    pub fn with_bus_speeds(mut self, slow_hz: u32, fast_hz: u32) -> Self {
        self.slow_hz = slow_hz;
        self.fast_hz = fast_hz;
        self.bus.get_mut().hz = slow_hz;
        self
    }

    /// End-fill byte captured during bring-up (0 before).
    pub fn fill_byte(&self) -> u8 {
        self.fill_byte.load(Ordering::Relaxed)
    }

    /// Last volume written, if any.
    pub fn volume(&self) -> Option<u8> {
        *self.volume.lock()
    }

    /// `false` once a self-test has found no chip on the bus.
    pub fn is_present(&self) -> bool {
        !self.ready.lock().forced
    }

    /// Consume the driver and return the peripherals.
    pub fn release(self) -> (SPI, XCS, XDCS, DREQ, D) {
        let Vs1053 {
            bus, ready, delay, ..
        } = self;
        let bus = bus.into_inner();
        let ready = ready.into_inner();
        (bus.spi, bus.xcs, bus.xdcs, ready.line, delay.into_inner())
    }
}

impl<SPI, XCS, XDCS, DREQ, D, W> Vs1053<SPI, XCS, XDCS, DREQ, D, W>
where
    SPI: BusClock,
    XCS: OutputPin,
    XDCS: OutputPin,
    DREQ: ReadyLine,
    D: DelayNs,
    W: WaitStrategy,
{
    // ── Bring-up ───────────────────────────────────────────────────────

    /// Full power-on sequence.
    ///
    /// Self-test failures and a missing chip are reported in the returned
    /// [`BringUpReport`] and do not stop the sequence; only bus or pin errors
    /// abort it.
    pub fn bring_up(&self) -> Result<BringUpReport, CodecError> {
        {
            let mut bus = self.bus.lock();
            bus.xdcs.set_high().map_err(CodecError::pin)?;
            bus.xcs.set_high().map_err(CodecError::pin)?;
        }
        self.delay_ms(100);

        self.set_bus_speed(self.slow_hz);
        self.delay_ms(20);
        let slow = self.self_test("slow bus")?;

        // Most modules power up in MIDI mode; driving GPIO0/1 low across a
        // soft reset brings them up as an MP3 decoder instead.
        self.wram_write(reg::WRAM_GPIO_DDR, 3)?;
        self.wram_write(reg::WRAM_GPIO_ODATA, 0)?;
        self.delay_ms(100);
        self.soft_reset()?;

        self.write_register(reg::AUDATA, reg::AUDATA_44K1_STEREO)?;
        self.write_register(reg::CLOCKF, reg::CLOCKF_MULT_3X)?;
        self.set_bus_speed(self.fast_hz);

        self.write_register(reg::MODE, reg::SM_SDINEW | reg::SM_LINE1)?;
        let fast = self.self_test("fast bus")?;

        self.delay_ms(10);
        self.wait_ready()?;
        let fill_byte = (self.wram_read(reg::WRAM_END_FILL_BYTE)? & 0xFF) as u8;
        self.fill_byte.store(fill_byte, Ordering::Relaxed);
        self.delay_ms(100);

        info!(?slow, ?fast, fill_byte, "VS1053 bring-up complete");
        Ok(BringUpReport {
            slow,
            fast,
            fill_byte,
        })
    }

    /// Exercise SCI register write/read-back.
    ///
    /// If DREQ is low before any traffic the chip is declared absent: the
    /// line is pulled idle and every later DREQ wait returns immediately.
    /// Otherwise SCI_VOL is swept through `0..0xFFFF`, each value written and
    /// read back twice. The stride is 3 at the fast clock and 300 at the slow
    /// one. Gives up after 20 mismatches.
    pub fn self_test(&self, label: &str) -> Result<SelfTest, CodecError> {
        {
            let mut ready = self.ready.lock();
            if ready.forced {
                return Ok(SelfTest::Absent);
            }
            if !ready.line.is_high().map_err(CodecError::pin)? {
                error!(
                    label,
                    "DREQ low before any transfer, VS1053 not installed; continuing without audio"
                );
                ready.line.pull_idle().map_err(CodecError::pin)?;
                ready.forced = true;
                return Ok(SelfTest::Absent);
            }
        }

        let stride = if self.bus.lock().hz >= self.fast_hz {
            reg::SELF_TEST_STRIDE_FAST
        } else {
            reg::SELF_TEST_STRIDE_SLOW
        };
        debug!(label, stride, "testing VS1053 register read/write");

        let mut errors = 0u16;
        for value in (0..u16::MAX).step_by(stride) {
            if errors >= reg::SELF_TEST_MAX_ERRORS {
                break;
            }
            self.write_register(reg::VOL, value)?;
            let first = self.read_register(reg::VOL)?;
            let second = self.read_register(reg::VOL)?;
            if first != value || second != value {
                warn!(label, written = value, first, second, "VS1053 register read-back mismatch");
                errors += 1;
                self.delay_ms(10);
            }
        }

        // The sweep leaves garbage in SCI_VOL.
        *self.volume.lock() = None;

        if errors == 0 {
            Ok(SelfTest::Passed)
        } else {
            warn!(label, errors, "VS1053 self-test failed");
            Ok(SelfTest::Mismatches(errors))
        }
    }

    /// Software reset; waits for the chip to come back.
    pub fn soft_reset(&self) -> Result<(), CodecError> {
        self.write_register(reg::MODE, reg::SM_SDINEW | reg::SM_RESET)?;
        self.delay_ms(10);
        self.wait_ready()
    }

    // ── SCI register access ────────────────────────────────────────────

    /// Write a 16-bit SCI register.
    pub fn write_register(&self, register: u8, value: u16) -> Result<(), CodecError> {
        let [hi, lo] = value.to_be_bytes();
        self.control_transaction(|spi| spi.write(&[reg::OP_WRITE, register, hi, lo]))
    }

    /// Read a 16-bit SCI register.
    pub fn read_register(&self, register: u8) -> Result<u16, CodecError> {
        self.control_transaction(|spi| {
            spi.write(&[reg::OP_READ, register])?;
            let mut word = [0xFF; 2];
            spi.transfer_in_place(&mut word)?;
            Ok(u16::from_be_bytes(word))
        })
    }

    /// Write one word of extended memory through SCI_WRAMADDR/SCI_WRAM.
    pub fn wram_write(&self, address: u16, value: u16) -> Result<(), CodecError> {
        self.write_register(reg::WRAMADDR, address)?;
        self.write_register(reg::WRAM, value)
    }

    /// Read one word of extended memory.
    pub fn wram_read(&self, address: u16) -> Result<u16, CodecError> {
        self.write_register(reg::WRAMADDR, address)?;
        self.read_register(reg::WRAM)
    }

    /// Read every SCI register and log the contents under `header`.
    pub fn dump_registers(&self, header: &str) -> Result<[u16; reg::REGISTER_COUNT], CodecError> {
        let mut regs = [0u16; reg::REGISTER_COUNT];
        for (address, slot) in regs.iter_mut().enumerate() {
            *slot = self.read_register(address as u8)?;
        }
        info!("{header}");
        for (address, (name, value)) in reg::REGISTER_NAMES.iter().zip(regs).enumerate() {
            info!("  {address:X} {name:<11} {value:#06X}");
        }
        Ok(regs)
    }

    // ── SDI data transfer ──────────────────────────────────────────────

    /// Send compressed audio, at most 32 bytes per DREQ.
    pub fn send_chunk(&self, data: &[u8]) -> Result<(), CodecError> {
        self.data_transaction(data.len(), |spi, range| spi.write(&data[range]))
    }

    /// Send `len` copies of the end-fill byte.
    pub fn send_filler(&self, len: usize) -> Result<(), CodecError> {
        let fill = [self.fill_byte(); CHUNK_SIZE];
        self.data_transaction(len, |spi, range| spi.write(&fill[..range.len()]))
    }

    /// DREQ level; always `true` once the chip has been declared absent.
    pub fn data_request(&self) -> Result<bool, CodecError> {
        self.ready.lock().is_set()
    }

    // ── Playback control ───────────────────────────────────────────────

    /// Prime the decoder's input buffer for a new song.
    pub fn start_song(&self) -> Result<(), CodecError> {
        self.send_filler(reg::START_FILL_BYTES)
    }

    /// Flush the decoder and cancel the current song.
    ///
    /// Sets SM_CANCEL and keeps feeding filler until the chip clears it,
    /// polling up to 200 times 10 ms apart. A chip that never acknowledges
    /// is logged with a register dump and reported as
    /// [`StopOutcome::TimedOut`].
    pub fn stop_song(&self) -> Result<StopOutcome, CodecError> {
        self.send_filler(reg::END_FILL_BYTES)?;
        self.delay_ms(reg::CANCEL_POLL_INTERVAL_MS);
        self.write_register(reg::MODE, reg::SM_SDINEW | reg::SM_CANCEL)?;

        for attempt in 0..reg::CANCEL_POLL_LIMIT {
            self.send_filler(CHUNK_SIZE)?;
            let mode = self.read_register(reg::MODE)?;
            if mode & reg::SM_CANCEL == 0 {
                self.send_filler(reg::END_FILL_BYTES)?;
                let waited_ms = attempt * reg::CANCEL_POLL_INTERVAL_MS;
                debug!(waited_ms, "song stopped");
                return Ok(StopOutcome::Stopped { waited_ms });
            }
            self.delay_ms(reg::CANCEL_POLL_INTERVAL_MS);
        }

        warn!(
            attempts = reg::CANCEL_POLL_LIMIT,
            "VS1053 did not acknowledge cancel"
        );
        self.dump_registers("song stopped incorrectly")?;
        Ok(StopOutcome::TimedOut)
    }

    /// Set both channels' volume (0 = silent, 100 = loudest).
    ///
    /// Writing the volume already in effect costs no bus traffic.
    pub fn set_volume(&self, volume: u8) -> Result<(), CodecError> {
        let volume = volume.min(100);
        let mut current = self.volume.lock();
        if *current == Some(volume) {
            return Ok(());
        }
        let code = u16::from(volume_code(volume));
        self.write_register(reg::VOL, (code << 8) | code)?;
        *current = Some(volume);
        debug!(volume, code, "volume set");
        Ok(())
    }

    /// Set bass/treble from four nibbles, most significant first:
    /// treble amplitude, treble frequency limit, bass amplitude, bass
    /// frequency limit. Bits above the low nibble are ignored.
    pub fn set_tone(&self, nibbles: [u8; 4]) -> Result<(), CodecError> {
        let value = nibbles
            .iter()
            .fold(0u16, |acc, &nibble| (acc << 4) | u16::from(nibble & 0x0F));
        self.write_register(reg::BASS, value)
    }

    // ── Private helpers ────────────────────────────────────────────────

    fn wait_ready(&self) -> Result<(), CodecError> {
        self.ready.lock().wait()
    }

    fn delay_ms(&self, ms: u32) {
        self.delay.lock().delay_ms(ms);
    }

    fn set_bus_speed(&self, hz: u32) {
        self.bus.lock().hz = hz;
        debug!(hz, "bus speed selected");
    }

    /// One SCI transaction: take the bus, XCS low, run `op`, wait for DREQ,
    /// XCS high, give the bus back.
    fn control_transaction<T>(
        &self,
        op: impl FnOnce(&mut SPI) -> Result<T, SPI::Error>,
    ) -> Result<T, CodecError> {
        let mut bus = self.bus.lock();
        bus.control_mode_on()?;
        let result = op(&mut bus.spi)
            .and_then(|value| bus.spi.flush().map(|()| value))
            .map_err(CodecError::spi)
            .and_then(|value| self.wait_ready().map(|()| value));
        let released = bus.control_mode_off();
        let value = result?;
        released?;
        Ok(value)
    }

    /// One SDI transaction covering `len` bytes: take the bus, XDCS low, then
    /// for every block of up to 32 bytes wait for DREQ and hand `write` the
    /// byte range to send.
    fn data_transaction(
        &self,
        len: usize,
        mut write: impl FnMut(&mut SPI, Range<usize>) -> Result<(), SPI::Error>,
    ) -> Result<(), CodecError> {
        let mut bus = self.bus.lock();
        bus.data_mode_on()?;
        let mut result = Ok(());
        let mut sent = 0;
        while sent < len {
            let block = (len - sent).min(CHUNK_SIZE);
            result = self.wait_ready().and_then(|()| {
                write(&mut bus.spi, sent..sent + block)
                    .and_then(|()| bus.spi.flush())
                    .map_err(CodecError::spi)
            });
            if result.is_err() {
                break;
            }
            sent += block;
        }
        let released = bus.data_mode_off();
        result?;
        released
    }
}

// ── Decoder trait implementation ───────────────────────────────────────────

impl<SPI, XCS, XDCS, DREQ, D, W> Decoder for Vs1053<SPI, XCS, XDCS, DREQ, D, W>
where
    SPI: BusClock,
    XCS: OutputPin,
    XDCS: OutputPin,
    DREQ: ReadyLine,
    D: DelayNs,
    W: WaitStrategy,
{
    type Error = CodecError;

    fn data_request(&self) -> Result<bool, Self::Error> {
        Vs1053::data_request(self)
    }

    fn play_chunk(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_chunk(data)
    }

    fn start_song(&self) -> Result<(), Self::Error> {
        Vs1053::start_song(self)
    }

    fn stop_song(&self) -> Result<StopOutcome, Self::Error> {
        Vs1053::stop_song(self)
    }

    fn set_volume(&self, volume: u8) -> Result<(), Self::Error> {
        Vs1053::set_volume(self, volume)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
