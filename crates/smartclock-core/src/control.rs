//! HTTP control plane: request-target parsing and response bodies.
//!
//! Transport framing lives in the firmware; this module only sees the method,
//! the request target (`/path?query`) and the request body, and writes
//! response bodies into any [`core::fmt::Write`] sink.

use core::fmt::{self, Write};
use core::net::Ipv4Addr;

use heapless::{String, Vec};

use crate::connectivity::{
    ConnectivityStatus, CredentialsError, MAX_PASSWORD_BYTES, MAX_SSID_BYTES, ScanEntry,
    WifiCredentials,
};
use crate::display::{MESSAGE_BYTES, MessageLine};
use crate::files::StorageUsage;
use crate::settings::{IMAGE_PATH_CAPACITY, ImagePath, SettingsRecord};

/// Decoded query values longer than this are rejected.
const MAX_VALUE_BYTES: usize = 96;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlRequest {
    Index,
    AppStatus,
    Brightness,
    StorageUsage,
    Set(SetCommand),
    ReconfigureWifi,
    FactoryReset,
    Scan,
    Connect(WifiCredentials),
    Log,
    /// `GET /delete?file=`
    Delete(ImagePath),
    /// `POST /api/update`; `None` clears the custom message.
    ShowMessage(Option<MessageLine>),
}

/// Every recognised `/set` key, applied together.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetCommand {
    pub brightness: Option<i32>,
    pub theme: Option<i32>,
    pub image: Option<ImagePath>,
    pub gmt_offset_secs: Option<i32>,
    pub clear_images: bool,
}

impl SetCommand {
    pub fn is_empty(&self) -> bool {
        self.brightness.is_none()
            && self.theme.is_none()
            && self.image.is_none()
            && self.gmt_offset_secs.is_none()
            && !self.clear_images
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlError {
    NotFound,
    MethodNotAllowed,
    BadEncoding,
    ValueTooLong,
    BadNumber(&'static str),
    MissingSsid,
    BadCredentials(CredentialsError),
    MissingFile,
    MissingBody,
    BadJson,
}

impl ControlError {
    pub const fn status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            _ => 400,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::MethodNotAllowed => "Method not allowed",
            Self::BadEncoding => "Malformed query",
            Self::ValueTooLong => "Value too long",
            Self::BadNumber(_) => "Invalid number",
            Self::MissingSsid => "Missing SSID parameter",
            Self::MissingFile => "Missing file parameter",
            Self::MissingBody => "No JSON body",
            Self::BadJson => "Invalid JSON",
            Self::BadCredentials(CredentialsError::EmptySsid) => "Missing SSID parameter",
            Self::BadCredentials(CredentialsError::SsidTooLong) => "SSID too long",
            Self::BadCredentials(CredentialsError::PasswordTooShort) => "Password too short",
            Self::BadCredentials(CredentialsError::PasswordTooLong) => "Password too long",
        }
    }
}

impl ControlRequest {
    pub fn parse(method: &str, target: &str, payload: &[u8]) -> Result<Self, ControlError> {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path == "/api/update" {
            if method != "POST" {
                return Err(ControlError::MethodNotAllowed);
            }
            return parse_update(payload).map(Self::ShowMessage);
        }

        let request = match path {
            "/" | "/index.html" => Self::Index,
            "/app.json" => Self::AppStatus,
            "/brt.json" => Self::Brightness,
            "/space.json" => Self::StorageUsage,
            "/set" => Self::Set(parse_set(query)?),
            "/reconfigurewifi" => Self::ReconfigureWifi,
            "/factoryreset" => Self::FactoryReset,
            "/scan" => Self::Scan,
            "/connect" => Self::Connect(parse_connect(query)?),
            "/log" => Self::Log,
            "/delete" => Self::Delete(parse_delete(query)?),
            _ => return Err(ControlError::NotFound),
        };

        if method != "GET" {
            return Err(ControlError::MethodNotAllowed);
        }
        Ok(request)
    }

    /// Routes served while the config portal holds the device.
    pub fn is_portal_route(&self) -> bool {
        matches!(
            self,
            Self::Index | Self::Scan | Self::Connect(_) | Self::Log
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ContentType {
    Text,
    Json,
    Html,
}

impl ContentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Json => "application/json",
            Self::Html => "text/html",
        }
    }
}

/// What the firmware does once the response is on the wire.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AfterReply {
    Nothing,
    /// Run the factory reset, then restart.
    FactoryReset,
    /// Body is the log ring; the firmware fills it.
    SendLog,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: ContentType,
    pub after: AfterReply,
}

impl Reply {
    pub const fn ok(content_type: ContentType) -> Self {
        Self {
            status: 200,
            content_type,
            after: AfterReply::Nothing,
        }
    }

    pub const fn error(status: u16) -> Self {
        Self {
            status,
            content_type: ContentType::Text,
            after: AfterReply::Nothing,
        }
    }

    pub const fn then(mut self, after: AfterReply) -> Self {
        self.after = after;
        self
    }
}

pub fn write_app_json<W: Write>(
    out: &mut W,
    settings: &SettingsRecord,
    status: &ConnectivityStatus,
) -> fmt::Result {
    write!(
        out,
        "{{\"theme\":{},\"brt\":{},\"img\":",
        settings.theme, settings.brightness
    )?;
    write_json_str(out, &settings.last_image_path)?;
    write!(
        out,
        ",\"gmtOffset\":{},\"mode\":\"{}\",\"ip\":",
        settings.gmt_offset_secs,
        status.mode.as_str()
    )?;
    match status.station_ip.or(status.ap_ip) {
        Some(ip) => write_json_ip(out, ip)?,
        None => out.write_str("null")?,
    }
    out.write_char('}')
}

pub fn write_brightness_json<W: Write>(out: &mut W, brightness: u8) -> fmt::Result {
    write!(out, "{{\"brt\":{brightness}}}")
}

pub fn write_usage_json<W: Write>(out: &mut W, usage: StorageUsage) -> fmt::Result {
    write!(
        out,
        "{{\"total\":{},\"used\":{},\"free\":{}}}",
        usage.total_bytes,
        usage.used_bytes,
        usage.free_bytes()
    )
}

pub fn write_scan_json<W: Write>(out: &mut W, entries: &[ScanEntry]) -> fmt::Result {
    out.write_char('[')?;
    for (index, entry) in entries.iter().enumerate() {
        if index > 0 {
            out.write_char(',')?;
        }
        out.write_str("{\"ssid\":")?;
        write_json_str(out, &entry.ssid)?;
        write!(
            out,
            ",\"rssi\":{},\"open\":{}}}",
            entry.signal_dbm, entry.is_open
        )?;
    }
    out.write_char(']')
}

/// Minimal join form served by the portal.
pub const PORTAL_FORM: &str = "<!DOCTYPE html><html><head><title>SmartClock Setup</title>\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"></head><body>\
<h1>SmartClock Setup</h1><p><a href=\"/scan\">Scan networks</a></p>\
<form action=\"/connect\" method=\"get\"><label>SSID <input name=\"ssid\"></label><br>\
<label>Password <input name=\"password\" type=\"password\"></label><br>\
<input type=\"submit\" value=\"Connect\"></form></body></html>";

fn write_json_ip<W: Write>(out: &mut W, ip: Ipv4Addr) -> fmt::Result {
    write!(out, "\"{ip}\"")
}

fn write_json_str<W: Write>(out: &mut W, value: &str) -> fmt::Result {
    out.write_char('"')?;
    for ch in value.chars() {
        match ch {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn parse_set(query: &str) -> Result<SetCommand, ControlError> {
    let mut command = SetCommand::default();
    for (key, raw) in query_pairs(query) {
        match key {
            "brt" => command.brightness = Some(parse_number("brt", raw)?),
            "theme" => command.theme = Some(parse_number("theme", raw)?),
            "gmt" => command.gmt_offset_secs = Some(parse_number("gmt", raw)?),
            "img" => command.image = Some(decode::<IMAGE_PATH_CAPACITY>(raw)?),
            "clear" => {
                if decode::<MAX_VALUE_BYTES>(raw)?.as_str() == "image" {
                    command.clear_images = true;
                }
            }
            _ => {}
        }
    }
    Ok(command)
}

fn parse_connect(query: &str) -> Result<WifiCredentials, ControlError> {
    let mut ssid: Option<String<MAX_SSID_BYTES>> = None;
    let mut password = String::<MAX_PASSWORD_BYTES>::new();
    for (key, raw) in query_pairs(query) {
        match key {
            "ssid" => {
                ssid = Some(decode(raw).map_err(|err| match err {
                    ControlError::ValueTooLong => {
                        ControlError::BadCredentials(CredentialsError::SsidTooLong)
                    }
                    other => other,
                })?)
            }
            "password" => {
                password = decode(raw).map_err(|err| match err {
                    ControlError::ValueTooLong => {
                        ControlError::BadCredentials(CredentialsError::PasswordTooLong)
                    }
                    other => other,
                })?
            }
            _ => {}
        }
    }

    let ssid = ssid.ok_or(ControlError::MissingSsid)?;
    WifiCredentials::new(&ssid, &password).map_err(ControlError::BadCredentials)
}

fn parse_delete(query: &str) -> Result<ImagePath, ControlError> {
    let raw = query_pairs(query)
        .find(|(key, _)| *key == "file")
        .map(|(_, raw)| raw)
        .ok_or(ControlError::MissingFile)?;
    let path = decode::<IMAGE_PATH_CAPACITY>(raw)?;
    if path.is_empty() {
        return Err(ControlError::MissingFile);
    }
    Ok(path)
}

/// Reads `line1` from a JSON object body. Other members are ignored; a long
/// message is cut at the last whole character that fits.
fn parse_update(payload: &[u8]) -> Result<Option<MessageLine>, ControlError> {
    let body = core::str::from_utf8(payload)
        .map_err(|_| ControlError::BadJson)?
        .trim();
    if body.is_empty() {
        return Err(ControlError::MissingBody);
    }
    if !body.starts_with('{') || !body.ends_with('}') {
        return Err(ControlError::BadJson);
    }

    let Some(at) = body.find("\"line1\"") else {
        return Ok(None);
    };
    let value = body[at + "\"line1\"".len()..]
        .trim_start()
        .strip_prefix(':')
        .ok_or(ControlError::BadJson)?
        .trim_start();
    if value.starts_with("null") {
        return Ok(None);
    }
    let value = value.strip_prefix('"').ok_or(ControlError::BadJson)?;
    json_string::<MESSAGE_BYTES>(value).map(Some)
}

/// Unescapes a JSON string up to its closing quote.
fn json_string<const N: usize>(raw: &str) -> Result<String<N>, ControlError> {
    let mut out = String::new();
    let mut full = false;
    let mut chars = raw.chars();
    loop {
        let ch = match chars.next().ok_or(ControlError::BadJson)? {
            '"' => return Ok(out),
            '\\' => match chars.next().ok_or(ControlError::BadJson)? {
                '"' => '"',
                '\\' => '\\',
                '/' => '/',
                'b' => '\u{8}',
                'f' => '\u{c}',
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                'u' => {
                    let mut code = 0u32;
                    for _ in 0..4 {
                        let digit = chars
                            .next()
                            .and_then(|c| c.to_digit(16))
                            .ok_or(ControlError::BadJson)?;
                        code = (code << 4) | digit;
                    }
                    // Surrogate pairs are not decoded.
                    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                }
                _ => return Err(ControlError::BadJson),
            },
            c if (c as u32) < 0x20 => return Err(ControlError::BadJson),
            c => c,
        };
        if !full && out.push(ch).is_err() {
            full = true;
        }
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<i32, ControlError> {
    let value = decode::<MAX_VALUE_BYTES>(raw)?;
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| ControlError::BadNumber(key))
}

fn query_pairs(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
}

/// Percent-decodes a query value; `+` stands for a space.
fn decode<const N: usize>(raw: &str) -> Result<String<N>, ControlError> {
    let mut bytes: Vec<u8, N> = Vec::new();
    let mut input = raw.bytes();
    while let Some(byte) = input.next() {
        let decoded = match byte {
            b'+' => b' ',
            b'%' => {
                let hi = input.next().and_then(hex_value);
                let lo = input.next().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => (hi << 4) | lo,
                    _ => return Err(ControlError::BadEncoding),
                }
            }
            other => other,
        };
        bytes
            .push(decoded)
            .map_err(|_| ControlError::ValueTooLong)?;
    }

    String::from_utf8(bytes).map_err(|_| ControlError::BadEncoding)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Mode;

    fn get(target: &str) -> Result<ControlRequest, ControlError> {
        ControlRequest::parse("GET", target, b"")
    }

    fn post(target: &str, payload: &str) -> Result<ControlRequest, ControlError> {
        ControlRequest::parse("POST", target, payload.as_bytes())
    }

    #[test]
    fn routes_map_to_requests() {
        assert_eq!(get("/"), Ok(ControlRequest::Index));
        assert_eq!(get("/app.json"), Ok(ControlRequest::AppStatus));
        assert_eq!(get("/brt.json"), Ok(ControlRequest::Brightness));
        assert_eq!(get("/space.json"), Ok(ControlRequest::StorageUsage));
        assert_eq!(get("/reconfigurewifi"), Ok(ControlRequest::ReconfigureWifi));
        assert_eq!(get("/factoryreset"), Ok(ControlRequest::FactoryReset));
        assert_eq!(get("/scan"), Ok(ControlRequest::Scan));
        assert_eq!(get("/log"), Ok(ControlRequest::Log));
        assert_eq!(get("/update"), Err(ControlError::NotFound));
        assert_eq!(
            post("/set?brt=5", ""),
            Err(ControlError::MethodNotAllowed)
        );
        assert_eq!(get("/api/update"), Err(ControlError::MethodNotAllowed));
    }

    #[test]
    fn delete_names_one_file() {
        let mut expected = ImagePath::new();
        expected.push_str("/image/my cat.jpg").unwrap();
        assert_eq!(
            get("/delete?file=%2Fimage%2Fmy+cat.jpg"),
            Ok(ControlRequest::Delete(expected))
        );
        assert_eq!(get("/delete"), Err(ControlError::MissingFile));
        assert_eq!(get("/delete?file="), Err(ControlError::MissingFile));
        assert_eq!(ControlError::MissingFile.message(), "Missing file parameter");
        assert!(!get("/delete?file=a").unwrap().is_portal_route());
    }

    #[test]
    fn update_reads_the_first_message_line() {
        let Ok(ControlRequest::ShowMessage(Some(line))) =
            post("/api/update", r#"{"line1": "Tea at \"five\"\n", "line2": "x"}"#)
        else {
            panic!("expected message");
        };
        assert_eq!(line.as_str(), "Tea at \"five\"\n");

        let Ok(ControlRequest::ShowMessage(Some(line))) =
            post("/api/update", r#"{"line1":"caf\u00e9"}"#)
        else {
            panic!("expected message");
        };
        assert_eq!(line.as_str(), "café");
    }

    #[test]
    fn update_without_line_clears_the_message() {
        assert_eq!(
            post("/api/update", "{}"),
            Ok(ControlRequest::ShowMessage(None))
        );
        assert_eq!(
            post("/api/update", r#"{"line1":null}"#),
            Ok(ControlRequest::ShowMessage(None))
        );
    }

    #[test]
    fn update_rejects_missing_or_broken_bodies() {
        assert_eq!(post("/api/update", ""), Err(ControlError::MissingBody));
        assert_eq!(post("/api/update", "  \r\n"), Err(ControlError::MissingBody));
        assert_eq!(post("/api/update", "line1=hi"), Err(ControlError::BadJson));
        assert_eq!(
            post("/api/update", r#"{"line1":"unterminated}"#),
            Err(ControlError::BadJson)
        );
        assert_eq!(
            post("/api/update", r#"{"line1":42}"#),
            Err(ControlError::BadJson)
        );
        assert_eq!(ControlError::MissingBody.status(), 400);
    }

    #[test]
    fn long_messages_are_cut_to_the_display_line() {
        let payload = format!("{{\"line1\":\"{}\"}}", "é".repeat(40));
        let Ok(ControlRequest::ShowMessage(Some(line))) = post("/api/update", &payload) else {
            panic!("expected message");
        };
        assert_eq!(line.chars().count(), MESSAGE_BYTES / 2);
    }

    #[test]
    fn set_collects_every_recognised_key() {
        let Ok(ControlRequest::Set(command)) =
            get("/set?brt=55&theme=2&img=%2Fimage%2Fmy+cat.jpg&gmt=-3600&clear=image&x=1")
        else {
            panic!("expected set");
        };

        assert_eq!(command.brightness, Some(55));
        assert_eq!(command.theme, Some(2));
        assert_eq!(command.image.as_deref(), Some("/image/my cat.jpg"));
        assert_eq!(command.gmt_offset_secs, Some(-3_600));
        assert!(command.clear_images);
    }

    #[test]
    fn set_without_keys_is_empty() {
        let Ok(ControlRequest::Set(command)) = get("/set?clear=all") else {
            panic!("expected set");
        };
        assert!(command.is_empty());
    }

    #[test]
    fn set_rejects_garbage() {
        assert_eq!(get("/set?brt=bright"), Err(ControlError::BadNumber("brt")));
        assert_eq!(get("/set?img=%zz"), Err(ControlError::BadEncoding));
        let long = format!("/set?img={}", "a".repeat(IMAGE_PATH_CAPACITY + 1));
        assert_eq!(get(&long), Err(ControlError::ValueTooLong));
    }

    #[test]
    fn connect_decodes_and_validates_credentials() {
        assert_eq!(
            get("/connect?ssid=Home%20Net&password=p%40ssw0rd!"),
            Ok(ControlRequest::Connect(
                WifiCredentials::new("Home Net", "p@ssw0rd!").unwrap()
            ))
        );
        assert_eq!(
            get("/connect?ssid=Cafe"),
            Ok(ControlRequest::Connect(WifiCredentials::new("Cafe", "").unwrap()))
        );
        assert_eq!(get("/connect?password=12345678"), Err(ControlError::MissingSsid));
        assert_eq!(
            get("/connect?ssid=Cafe&password=123"),
            Err(ControlError::BadCredentials(CredentialsError::PasswordTooShort))
        );
    }

    #[test]
    fn portal_serves_only_join_routes() {
        assert!(get("/scan").unwrap().is_portal_route());
        assert!(get("/").unwrap().is_portal_route());
        assert!(!get("/factoryreset").unwrap().is_portal_route());
        assert!(!get("/set?brt=1").unwrap().is_portal_route());
    }

    #[test]
    fn app_json_escapes_and_reports_mode() {
        let mut settings = SettingsRecord::reset();
        settings.set_last_image_path("/image/\"quoted\".jpg").unwrap();
        let status = ConnectivityStatus {
            mode: Mode::Connected,
            station_ip: Some(Ipv4Addr::new(10, 0, 0, 9)),
            ap_ip: None,
            last_monitor_check_ms: None,
            last_reconnect_attempt_ms: None,
            revision: 3,
        };

        let mut body = std::string::String::new();
        write_app_json(&mut body, &settings, &status).unwrap();
        assert_eq!(
            body,
            "{\"theme\":0,\"brt\":70,\"img\":\"/image/\\\"quoted\\\".jpg\",\
             \"gmtOffset\":3600,\"mode\":\"connected\",\"ip\":\"10.0.0.9\"}"
        );
    }

    #[test]
    fn scan_json_lists_networks() {
        let mut ssid = String::new();
        ssid.push_str("home").unwrap();
        let entries = [ScanEntry {
            ssid,
            signal_dbm: -61,
            is_open: false,
        }];

        let mut body = std::string::String::new();
        write_scan_json(&mut body, &entries).unwrap();
        assert_eq!(body, "[{\"ssid\":\"home\",\"rssi\":-61,\"open\":false}]");

        body.clear();
        write_scan_json(&mut body, &[]).unwrap();
        assert_eq!(body, "[]");
    }

    #[test]
    fn usage_json_reports_free_space() {
        let mut body = std::string::String::new();
        write_usage_json(
            &mut body,
            StorageUsage {
                total_bytes: 1_000,
                used_bytes: 250,
            },
        )
        .unwrap();
        assert_eq!(body, "{\"total\":1000,\"used\":250,\"free\":750}");
    }
}
