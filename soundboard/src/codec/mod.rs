//! VS1053 audio decoder driver module.
//!
//! [`Vs1053`] implements the chip's SPI protocol on top of `embedded-hal`
//! 1.0. The [`hal`] submodule holds the small extension traits the chip needs
//! that `embedded-hal` does not cover: a retunable bus clock, a DREQ line that
//! can be pulled idle, and the strategy used while DREQ is low.

pub mod hal;
pub mod registers;
mod vs1053;

pub use hal::{BusClock, ReadyLine, Sleep, Spin, WaitStrategy};
pub use vs1053::{volume_code, BringUpReport, SelfTest, Vs1053};
