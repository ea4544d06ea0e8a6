//! Capability traits over the SPI bus and GPIO lines, plus the `rppal`
//! implementations used on real hardware.
//!
//! The chip logic in [`crate::daq`] only ever sees these traits, so failures
//! are observable and the whole acquisition path can run against fakes.

use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("spi transfer failed: {0}")]
    Spi(String),
    #[error("gpio access failed: {0}")]
    Gpio(String),
}

impl From<rppal::spi::Error> for HalError {
    fn from(e: rppal::spi::Error) -> Self {
        HalError::Spi(e.to_string())
    }
}

impl From<rppal::gpio::Error> for HalError {
    fn from(e: rppal::gpio::Error) -> Self {
        HalError::Gpio(e.to_string())
    }
}

/// Full-duplex SPI transfer capability. `buf` is clocked out and overwritten
/// with the bytes clocked in.
pub trait SpiBus: Send {
    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError>;
}

/// A chip control line (START, RESET, CLKSEL).
pub trait OutputPin: Send {
    fn set_high(&mut self) -> Result<(), HalError>;
    fn set_low(&mut self) -> Result<(), HalError>;
}

/// Source of falling-edge data-ready events. The handler stays installed for
/// the lifetime of the source once armed.
pub trait EdgeSource: Send {
    fn arm(&mut self, handler: Box<dyn FnMut() + Send + 'static>) -> Result<(), HalError>;
}

/// SPI0 in mode 1, the wiring the ADS1298 expects.
pub struct PiSpi {
    spi: Spi,
}

impl PiSpi {
    pub fn open(clock_hz: u32) -> Result<Self, HalError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, clock_hz, Mode::Mode1)?;
        Ok(Self { spi })
    }
}

impl SpiBus for PiSpi {
    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError> {
        let tx = buf.to_vec();
        self.spi.transfer(buf, &tx)?;
        Ok(())
    }
}

pub struct PiPin {
    pin: rppal::gpio::OutputPin,
}

impl PiPin {
    pub fn open(gpio: &Gpio, bcm: u8) -> Result<Self, HalError> {
        Ok(Self {
            pin: gpio.get(bcm)?.into_output(),
        })
    }
}

impl OutputPin for PiPin {
    fn set_high(&mut self) -> Result<(), HalError> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), HalError> {
        self.pin.set_low();
        Ok(())
    }
}

/// The DRDY input; `arm` installs an async falling-edge handler serviced on
/// rppal's interrupt thread.
pub struct PiDrdy {
    pin: InputPin,
}

impl PiDrdy {
    pub fn open(gpio: &Gpio, bcm: u8) -> Result<Self, HalError> {
        Ok(Self {
            pin: gpio.get(bcm)?.into_input(),
        })
    }
}

impl EdgeSource for PiDrdy {
    fn arm(&mut self, mut handler: Box<dyn FnMut() + Send + 'static>) -> Result<(), HalError> {
        self.pin
            .set_async_interrupt(Trigger::FallingEdge, move |_: Level| handler())?;
        Ok(())
    }
}
