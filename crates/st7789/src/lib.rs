#![cfg_attr(not(test), no_std)]

//! ST7789 (240x240 IPS TFT, 4-wire SPI) driver primitives.

mod framebuffer;
pub mod protocol;

#[cfg(feature = "embedded-graphics")]
mod graphics;

pub use framebuffer::FrameBuffer;

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiDevice};

/// Driver configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Expected SPI clock in Hz (documented for board glue).
    pub spi_hz: u32,
    /// Most IPS modules ship with inverted color sense.
    pub invert_colors: bool,
    /// Memory access control byte (rotation and RGB/BGR order).
    pub madctl: u8,
    /// Wait after software reset.
    pub reset_delay_ms: u32,
    /// Wait after leaving sleep.
    pub wake_delay_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spi_hz: 40_000_000,
            invert_colors: true,
            madctl: 0x00,
            reset_delay_ms: 150,
            wake_delay_ms: 10,
        }
    }
}

impl Config {
    pub const fn with_spi_hz(mut self, spi_hz: u32) -> Self {
        self.spi_hz = spi_hz;
        self
    }

    pub const fn with_invert_colors(mut self, invert_colors: bool) -> Self {
        self.invert_colors = invert_colors;
        self
    }

    pub const fn with_madctl(mut self, madctl: u8) -> Self {
        self.madctl = madctl;
        self
    }
}

/// Driver errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error<SpiErr, DcErr> {
    /// SPI transaction failed.
    Spi(SpiErr),
    /// Data/command pin operation failed.
    Dc(DcErr),
    /// Input parameters are outside supported bounds.
    InvalidInput,
}

pub type DriverResult<SpiErr, DcErr> = Result<(), Error<SpiErr, DcErr>>;

/// ST7789 driver over an exclusive SPI device and a D/C pin.
#[derive(Debug)]
pub struct St7789<SPI, DC> {
    spi: SPI,
    dc: DC,
    config: Config,
}

impl<SPI, DC> St7789<SPI, DC>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
{
    pub fn new(spi: SPI, dc: DC, config: Config) -> Self {
        Self { spi, dc, config }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Releases owned bus and pin.
    pub fn release(self) -> (SPI, DC) {
        (self.spi, self.dc)
    }

    /// Reset, wake, 16-bit color, then display on.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> DriverResult<SPI::Error, DC::Error> {
        self.command(protocol::SWRESET, &[])?;
        delay.delay_ms(self.config.reset_delay_ms);
        self.command(protocol::SLPOUT, &[])?;
        delay.delay_ms(self.config.wake_delay_ms);

        self.command(protocol::COLMOD, &[protocol::COLMOD_RGB565])?;
        self.command(protocol::MADCTL, &[self.config.madctl])?;
        let inversion = if self.config.invert_colors {
            protocol::INVON
        } else {
            protocol::INVOFF
        };
        self.command(inversion, &[])?;
        self.command(protocol::NORON, &[])?;
        self.display_on()
    }

    pub fn display_on(&mut self) -> DriverResult<SPI::Error, DC::Error> {
        self.command(protocol::DISPON, &[])
    }

    pub fn display_off(&mut self) -> DriverResult<SPI::Error, DC::Error> {
        self.command(protocol::DISPOFF, &[])
    }

    /// Sets the inclusive drawing window and opens RAM write.
    pub fn set_window(
        &mut self,
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
    ) -> DriverResult<SPI::Error, DC::Error> {
        let columns =
            protocol::window_params(x0, x1, protocol::WIDTH).ok_or(Error::InvalidInput)?;
        let rows = protocol::window_params(y0, y1, protocol::HEIGHT).ok_or(Error::InvalidInput)?;

        self.command(protocol::CASET, &columns)?;
        self.command(protocol::RASET, &rows)?;
        self.command(protocol::RAMWR, &[])
    }

    /// Streams raw RGB565 bytes into the open window.
    pub fn write_pixels(&mut self, data: &[u8]) -> DriverResult<SPI::Error, DC::Error> {
        self.dc.set_high().map_err(Error::Dc)?;
        self.spi.write(data).map_err(Error::Spi)
    }

    /// Fills the whole panel with one color.
    pub fn fill(&mut self, color: u16) -> DriverResult<SPI::Error, DC::Error> {
        self.full_window()?;
        let mut row = [0u8; protocol::LINE_PIXEL_BYTES];
        for pixel in row.chunks_exact_mut(2) {
            pixel.copy_from_slice(&color.to_be_bytes());
        }
        for _ in 0..protocol::HEIGHT {
            self.write_pixels(&row)?;
        }
        Ok(())
    }

    /// Pushes a full monochrome frame, set pixels in `on`, the rest in `off`.
    pub fn flush_full(
        &mut self,
        frame: &FrameBuffer,
        on: u16,
        off: u16,
    ) -> DriverResult<SPI::Error, DC::Error> {
        self.full_window()?;
        let mut row = [0u8; protocol::LINE_PIXEL_BYTES];
        for line in frame.rows() {
            protocol::expand_line(line, on, off, &mut row);
            self.write_pixels(&row)?;
        }
        Ok(())
    }

    fn full_window(&mut self) -> DriverResult<SPI::Error, DC::Error> {
        self.set_window(
            0,
            0,
            (protocol::WIDTH - 1) as u16,
            (protocol::HEIGHT - 1) as u16,
        )
    }

    fn command(&mut self, command: u8, params: &[u8]) -> DriverResult<SPI::Error, DC::Error> {
        self.dc.set_low().map_err(Error::Dc)?;
        self.spi.write(&[command]).map_err(Error::Spi)?;
        if params.is_empty() {
            return Ok(());
        }
        self.dc.set_high().map_err(Error::Dc)?;
        self.spi.write(params).map_err(Error::Spi)
    }
}
