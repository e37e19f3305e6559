//! Status display abstraction.
//!
//! The core only pushes screens; it never reads anything back from the panel.

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use heapless::{String, Vec};

use crate::clock::ClockText;
use crate::settings::{DEFAULT_BRIGHTNESS, ImagePath, MAX_BRIGHTNESS};

pub const MAX_STATUS_LINES: usize = 4;
pub const STATUS_LINE_BYTES: usize = 40;
/// Custom message shown under the time.
pub const MESSAGE_BYTES: usize = 63;

pub type StatusLine = String<STATUS_LINE_BYTES>;
pub type MessageLine = String<MESSAGE_BYTES>;

/// Everything the clock screen shows. Empty `time` means the clock is not
/// set yet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClockFace {
    pub address: StatusLine,
    pub time: ClockText,
    pub date: ClockText,
    pub message: MessageLine,
}

/// Output side of the device: TFT panel on hardware, a recorder in tests.
pub trait StatusDisplay {
    fn show_message(&mut self, lines: &[&str]);
    fn show_ap_credentials(&mut self, ssid: &str, password: &str, address: Ipv4Addr);
    fn show_image(&mut self, path: &str);
    fn show_clock(&mut self, face: &ClockFace);
    fn set_brightness(&mut self, percent: u8);
    fn blank(&mut self);
    /// Pushes pending changes to the panel immediately.
    fn render_now(&mut self);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Screen {
    Message(Vec<StatusLine, MAX_STATUS_LINES>),
    AccessPoint {
        ssid: StatusLine,
        password: StatusLine,
        address: Ipv4Addr,
    },
    Image(ImagePath),
    Clock(ClockFace),
}

/// Last requested screen and backlight state.
///
/// Panel adapters keep one of these and draw it on `render_now`; tests use it
/// directly as a recording display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DisplayState {
    pub screen: Screen,
    pub brightness: u8,
    pub blanked: bool,
    pub renders: u32,
}

impl DisplayState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Message(Vec::new()),
            brightness: DEFAULT_BRIGHTNESS,
            blanked: false,
            renders: 0,
        }
    }

    /// Lines of the current message screen, empty for other screens.
    pub fn lines(&self) -> &[StatusLine] {
        match &self.screen {
            Screen::Message(lines) => lines,
            _ => &[],
        }
    }

    pub fn shows_access_point(&self) -> bool {
        matches!(self.screen, Screen::AccessPoint { .. })
    }

    pub fn clock_face(&self) -> Option<&ClockFace> {
        match &self.screen {
            Screen::Clock(face) => Some(face),
            _ => None,
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusDisplay for DisplayState {
    fn show_message(&mut self, lines: &[&str]) {
        let mut out = Vec::new();
        for line in lines.iter().take(MAX_STATUS_LINES) {
            let _ = out.push(truncated(line));
        }
        self.screen = Screen::Message(out);
        self.blanked = false;
    }

    fn show_ap_credentials(&mut self, ssid: &str, password: &str, address: Ipv4Addr) {
        self.screen = Screen::AccessPoint {
            ssid: truncated(ssid),
            password: truncated(password),
            address,
        };
        self.blanked = false;
    }

    fn show_image(&mut self, path: &str) {
        let mut image = ImagePath::new();
        let _ = image.push_str(path);
        self.screen = Screen::Image(image);
        self.blanked = false;
    }

    fn show_clock(&mut self, face: &ClockFace) {
        self.screen = Screen::Clock(face.clone());
        self.blanked = false;
    }

    fn set_brightness(&mut self, percent: u8) {
        self.brightness = percent.min(MAX_BRIGHTNESS);
    }

    fn blank(&mut self) {
        self.blanked = true;
    }

    fn render_now(&mut self) {
        self.renders = self.renders.wrapping_add(1);
    }
}

/// Formats an address into a status line.
pub fn address_line(label: &str, address: Ipv4Addr) -> StatusLine {
    let mut line = StatusLine::new();
    let _ = write!(line, "{label}{address}");
    line
}

/// Longest prefix of `text` that fits, cut on a character boundary.
pub fn truncated<const N: usize>(text: &str) -> String<N> {
    let mut line = String::new();
    for ch in text.chars() {
        if line.push(ch).is_err() {
            break;
        }
    }
    line
}
