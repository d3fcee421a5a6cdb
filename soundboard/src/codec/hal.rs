//! Hardware seams the driver needs beyond plain `embedded-hal`.

use std::time::Duration;

use embedded_hal::digital::InputPin;
use embedded_hal::spi::SpiBus;

/// An SPI bus whose clock can be changed between transactions.
///
/// `embedded-hal` leaves bus configuration to the HAL; the VS1053 must be
/// brought up slowly and then switched to a faster clock once its internal
/// multiplier is running, so the board layer exposes that knob here.
pub trait BusClock: SpiBus<u8> {
    /// Set the SCK frequency used by subsequent transfers.
    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error>;
}

/// The decoder's DREQ output, as seen by the host.
pub trait ReadyLine: InputPin {
    /// Put the line into a state where it reads high while nothing drives it
    /// (typically: enable the internal pull-up).
    ///
    /// Called once when the decoder turns out to be absent so that later
    /// ready checks cannot block forever.
    fn pull_idle(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// How a blocked context passes time while waiting for DREQ.
pub trait WaitStrategy {
    /// Called once per failed poll.
    fn pause(&mut self);
}

/// Busy-wait with a spin hint. Suitable inside a bus transaction, where
/// DREQ normally returns within microseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl WaitStrategy for Spin {
    fn pause(&mut self) {
        core::hint::spin_loop();
    }
}

/// Yield the thread for a fixed interval between polls.
#[derive(Debug, Clone, Copy)]
pub struct Sleep(pub Duration);

impl Default for Sleep {
    fn default() -> Self {
        Sleep(Duration::from_millis(1))
    }
}

impl WaitStrategy for Sleep {
    fn pause(&mut self) {
        std::thread::sleep(self.0);
    }
}

impl<W: WaitStrategy + ?Sized> WaitStrategy for &mut W {
    fn pause(&mut self) {
        (**self).pause();
    }
}
