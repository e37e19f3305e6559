use core::fmt::Write as _;
use core::net::Ipv4Addr;

use embedded_graphics::{
    mono_font::{MonoTextStyle, ascii::FONT_10X20},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiDevice};
use heapless::String;
use log::warn;
use smartclock_core::display::{ClockFace, DisplayState, Screen, StatusDisplay};
use smartclock_core::files::IMAGE_DIR;
use st7789::{DriverResult, FrameBuffer, St7789, protocol};

const FOREGROUND: u16 = protocol::WHITE;
const BACKGROUND: u16 = protocol::BLACK;
const MARGIN_X: i32 = 8;
const TOP_Y: i32 = 24;
const LINE_PITCH: i32 = 28;

/// Status screens on the ST7789 panel. Brightness dims the foreground color;
/// blanking switches the panel and backlight off.
pub struct TftStatusDisplay<SPI, DC, BL> {
    panel: St7789<SPI, DC>,
    backlight: BL,
    frame: FrameBuffer,
    state: DisplayState,
}

impl<SPI, DC, BL> TftStatusDisplay<SPI, DC, BL>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    BL: OutputPin,
{
    pub fn new(panel: St7789<SPI, DC>, backlight: BL) -> Self {
        Self {
            panel,
            backlight,
            frame: FrameBuffer::new(),
            state: DisplayState::new(),
        }
    }

    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> DriverResult<SPI::Error, DC::Error> {
        self.panel.init(delay)?;
        self.panel.fill(BACKGROUND)?;
        self.set_backlight(true);
        Ok(())
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    fn set_backlight(&mut self, on: bool) {
        let result = if on {
            self.backlight.set_high()
        } else {
            self.backlight.set_low()
        };
        if let Err(err) = result {
            warn!("display: backlight pin failed: {:?}", err);
        }
    }

    fn compose(&mut self) {
        self.frame.clear(false);
        let frame = &mut self.frame;

        match &self.state.screen {
            Screen::Message(lines) => {
                for (row, line) in lines.iter().enumerate() {
                    draw_line(frame, row as i32, line);
                }
            }
            Screen::AccessPoint {
                ssid,
                password,
                address,
            } => {
                draw_line(frame, 0, "WiFi setup");
                draw_line(frame, 1, "Join network:");
                draw_line(frame, 2, ssid);
                draw_line(frame, 3, "Password:");
                draw_line(frame, 4, password);
                draw_line(frame, 6, &portal_url(*address));
            }
            Screen::Image(path) => {
                draw_line(frame, 0, "Image");
                draw_line(frame, 1, path.strip_prefix(IMAGE_DIR).unwrap_or(path.as_str()));
            }
            Screen::Clock(face) => {
                draw_line(frame, 0, &face.address);
                draw_line(frame, 2, &face.time);
                draw_line(frame, 3, &face.date);
                draw_line(frame, 5, &face.message);
            }
        }
    }

    fn flush(&mut self) -> DriverResult<SPI::Error, DC::Error> {
        if self.state.blanked || self.state.brightness == 0 {
            self.set_backlight(false);
            return self.panel.display_off();
        }

        self.compose();
        let on = protocol::scale_rgb565(FOREGROUND, self.state.brightness);
        self.panel.flush_full(&self.frame, on, BACKGROUND)?;
        self.panel.display_on()?;
        self.set_backlight(true);
        Ok(())
    }
}

impl<SPI, DC, BL> StatusDisplay for TftStatusDisplay<SPI, DC, BL>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    BL: OutputPin,
{
    fn show_message(&mut self, lines: &[&str]) {
        self.state.show_message(lines);
    }

    fn show_ap_credentials(&mut self, ssid: &str, password: &str, address: Ipv4Addr) {
        self.state.show_ap_credentials(ssid, password, address);
    }

    fn show_image(&mut self, path: &str) {
        self.state.show_image(path);
    }

    fn show_clock(&mut self, face: &ClockFace) {
        self.state.show_clock(face);
    }

    fn set_brightness(&mut self, percent: u8) {
        self.state.set_brightness(percent);
    }

    fn blank(&mut self) {
        self.state.blank();
    }

    fn render_now(&mut self) {
        self.state.render_now();
        if let Err(err) = self.flush() {
            warn!("display: flush failed: {:?}", err);
        }
    }
}

fn draw_line(frame: &mut FrameBuffer, row: i32, text: &str) {
    let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    let origin = Point::new(MARGIN_X, TOP_Y + row * LINE_PITCH);
    let _ = Text::with_baseline(text, origin, style, Baseline::Top).draw(frame);
}

fn portal_url(address: Ipv4Addr) -> String<32> {
    let mut url = String::new();
    let _ = write!(url, "http://{address}");
    url
}
