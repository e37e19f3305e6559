//! Wall-clock time for the clock face.
//!
//! The firmware fetches UTC over SNTP; this module owns the packet format,
//! keeps the time anchored to uptime between syncs and turns it into local
//! date and time with the stored GMT offset.

use core::fmt::Write as _;

use heapless::String;

pub const NTP_SERVER: &str = "pool.ntp.org";
pub const NTP_PORT: u16 = 123;
pub const SNTP_PACKET_LEN: usize = 48;

/// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;
/// Length of one NTP era (32-bit seconds).
const NTP_ERA_SECS: u64 = 1 << 32;
const TRANSMIT_SECS_AT: usize = 40;
const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;

const SECS_PER_DAY: i64 = 86_400;

/// Re-sync interval once the clock is set.
pub const SYNC_INTERVAL_SECS: u64 = 3_600;
/// Retry interval after a failed sync once early retries are exhausted.
pub const SYNC_RETRY_SECS: u64 = 300;
const EARLY_RETRY_SECS: [u64; 3] = [10, 30, 60];

pub type ClockText = String<12>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SntpError {
    ShortReply(usize),
    NotServerReply,
    /// Stratum 0: the server asks clients to back off.
    KissOfDeath,
    ZeroTimestamp,
}

/// Client request: leap indicator 0, version 4, mode 3.
pub const fn sntp_request() -> [u8; SNTP_PACKET_LEN] {
    let mut packet = [0u8; SNTP_PACKET_LEN];
    packet[0] = 0x23;
    packet
}

/// Unix seconds from the transmit timestamp of a server reply.
pub fn parse_sntp_reply(reply: &[u8]) -> Result<u64, SntpError> {
    if reply.len() < SNTP_PACKET_LEN {
        return Err(SntpError::ShortReply(reply.len()));
    }
    let mode = reply[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(SntpError::NotServerReply);
    }
    if reply[1] == 0 {
        return Err(SntpError::KissOfDeath);
    }

    let at = TRANSMIT_SECS_AT;
    let secs = u64::from(u32::from_be_bytes([
        reply[at],
        reply[at + 1],
        reply[at + 2],
        reply[at + 3],
    ]));
    if secs == 0 {
        return Err(SntpError::ZeroTimestamp);
    }

    // Values below the Unix epoch belong to era 1 (from 2036-02-07).
    Ok(if secs >= NTP_UNIX_OFFSET_SECS {
        secs - NTP_UNIX_OFFSET_SECS
    } else {
        secs + NTP_ERA_SECS - NTP_UNIX_OFFSET_SECS
    })
}

/// Seconds to wait before the next sync attempt.
pub fn next_sync_delay_secs(consecutive_failures: u32, synced: bool) -> u64 {
    match consecutive_failures {
        0 => SYNC_INTERVAL_SECS,
        _ if synced => SYNC_RETRY_SECS,
        n => EARLY_RETRY_SECS
            .get(n as usize - 1)
            .copied()
            .unwrap_or(SYNC_RETRY_SECS),
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Anchor {
    unix_secs: u64,
    at_ms: u64,
}

/// UTC anchored to uptime at the last successful sync.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct WallClock {
    anchor: Option<Anchor>,
}

impl WallClock {
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    pub fn set(&mut self, unix_secs: u64, now_ms: u64) {
        self.anchor = Some(Anchor {
            unix_secs,
            at_ms: now_ms,
        });
    }

    pub fn is_set(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn unix_secs(&self, now_ms: u64) -> Option<u64> {
        self.anchor.map(|anchor| {
            anchor
                .unix_secs
                .saturating_add(now_ms.saturating_sub(anchor.at_ms) / 1_000)
        })
    }

    pub fn local(&self, now_ms: u64, offset_secs: i32) -> Option<LocalTime> {
        self.unix_secs(now_ms)
            .map(|unix| LocalTime::from_unix(unix, offset_secs))
    }
}

/// Broken-down civil time, proleptic Gregorian calendar.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LocalTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl LocalTime {
    pub fn from_unix(unix_secs: u64, offset_secs: i32) -> Self {
        let local = (unix_secs as i64).saturating_add(i64::from(offset_secs));
        let days = local.div_euclid(SECS_PER_DAY);
        let secs_of_day = local.rem_euclid(SECS_PER_DAY);
        let (year, month, day) = civil_from_days(days);

        Self {
            year,
            month,
            day,
            hour: (secs_of_day / 3_600) as u8,
            minute: (secs_of_day % 3_600 / 60) as u8,
            second: (secs_of_day % 60) as u8,
        }
    }

    /// `HH:MM:SS`
    pub fn time_text(&self) -> ClockText {
        let mut text = ClockText::new();
        let _ = write!(
            text,
            "{:02}:{:02}:{:02}",
            self.hour, self.minute, self.second
        );
        text
    }

    /// `DD-MM-YYYY`
    pub fn date_text(&self) -> ClockText {
        let mut text = ClockText::new();
        let _ = write!(text, "{:02}-{:02}-{:04}", self.day, self.month, self.year);
        text
    }
}

/// Days since 1970-01-01 to (year, month, day).
fn civil_from_days(days: i64) -> (i32, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year as i32, month as u8, day as u8)
}
