//! The assembled device: persisted settings, connectivity and the control
//! surface in one owner.
//!
//! Every collaborator is passed in through [`DeviceParts`], so several devices
//! can live side by side in one test process.

use core::fmt::{self, Write as _};

use heapless::String;
use log::{info, warn};

use crate::button::InputEvent;
use crate::clock::WallClock;
use crate::connectivity::{
    ConnectivityError, ConnectivityManager, ConnectivityPolicy, ConnectivityStatus,
    CredentialStore, Mode, NetContext, PollOutcome, RandomSource, ScanResults, WifiCredentials,
    WifiRadio,
};
use crate::control::{
    AfterReply, ContentType, ControlRequest, PORTAL_FORM, Reply, SetCommand, write_app_json,
    write_brightness_json, write_scan_json, write_usage_json,
};
use crate::counters::{BootCounters, PowerCycleGrace};
use crate::display::{ClockFace, MessageLine, StatusDisplay, address_line, truncated};
use crate::files::FileStore;
use crate::reset::{
    ResetReport, ResetStepError, ResetTarget, erase_credentials, format_files,
    perform_factory_reset,
};
use crate::settings::{SettingsError, SettingsRecord, SettingsStore};
use crate::storage::Eeprom;

/// Clock screen redraw period.
pub const CLOCK_REDRAW_MS: u64 = 1_000;
const TIME_UNSET: &str = "--:--:--";

/// Collaborators a [`Device`] takes ownership of.
pub struct DeviceParts<E, R, C, D, F> {
    pub eeprom: E,
    pub radio: R,
    pub credentials: C,
    pub display: D,
    pub files: F,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Action {
    None,
    Restart,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UpdateError<S> {
    Invalid(SettingsError),
    Storage(S),
}

pub struct Device<E, R, C, D, F> {
    eeprom: E,
    radio: R,
    credentials: C,
    display: D,
    files: F,
    settings: SettingsRecord,
    network: ConnectivityManager,
    grace: PowerCycleGrace,
    blanked: bool,
    scan: ScanResults,
    clock: WallClock,
    /// Custom line under the time; not persisted.
    message: MessageLine,
    /// Last image selected over `/set`; cleared by a message update.
    show_image: bool,
    next_clock_redraw_ms: u64,
    now_ms: u64,
}

impl<E, R, C, D, F> Device<E, R, C, D, F>
where
    E: Eeprom,
    R: WifiRadio,
    C: CredentialStore,
    D: StatusDisplay,
    F: FileStore,
{
    /// Loads (or repairs) the settings and applies the stored brightness.
    pub fn new<G: RandomSource>(
        parts: DeviceParts<E, R, C, D, F>,
        policy: ConnectivityPolicy,
        rng: &mut G,
        boot_ms: u64,
    ) -> Self {
        let DeviceParts {
            mut eeprom,
            radio,
            credentials,
            mut display,
            files,
        } = parts;

        let settings = SettingsStore::new(&mut eeprom).load();
        display.set_brightness(settings.brightness);
        let show_image = !settings.last_image_path.is_empty();

        Self {
            eeprom,
            radio,
            credentials,
            display,
            files,
            settings,
            network: ConnectivityManager::new(policy, rng),
            grace: PowerCycleGrace::new(boot_ms),
            blanked: false,
            scan: ScanResults::new(),
            clock: WallClock::new(),
            message: MessageLine::new(),
            show_image,
            next_clock_redraw_ms: boot_ms,
            now_ms: boot_ms,
        }
    }

    pub fn settings(&self) -> &SettingsRecord {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.network.mode()
    }

    pub fn connectivity(&self) -> ConnectivityStatus {
        self.network.status()
    }

    pub fn ap_password(&self) -> &str {
        self.network.ap_password()
    }

    /// A bounded connection stage owns the device; only portal routes and
    /// [`Device::tick`] should run.
    pub fn network_busy(&self) -> bool {
        self.network.is_blocking()
    }

    pub fn start_network(&mut self, now_ms: u64) -> Mode {
        self.observe(now_ms);
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        let mode = self.network.start(now_ms, &mut ctx);
        if mode == Mode::Connected {
            self.refresh_display();
        }
        mode
    }

    pub fn tick(&mut self, now_ms: u64) -> Action {
        self.observe(now_ms);
        self.grace.poll(now_ms, &mut self.eeprom);

        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        match self.network.poll(now_ms, &mut ctx) {
            PollOutcome::RestartRequired => return Action::Restart,
            PollOutcome::Changed(Mode::Connected) => self.refresh_display(),
            PollOutcome::Changed(_) | PollOutcome::Idle => {
                if now_ms >= self.next_clock_redraw_ms {
                    self.redraw_clock();
                }
            }
        }
        Action::None
    }

    /// Anchors the wall clock to a fresh SNTP reading.
    pub fn set_time(&mut self, unix_secs: u64, now_ms: u64) {
        self.observe(now_ms);
        let first = !self.clock.is_set();
        self.clock.set(unix_secs, now_ms);
        if first {
            info!("clock: set to {} (unix)", unix_secs);
        }
        self.redraw_clock();
    }

    pub fn clock(&self) -> &WallClock {
        &self.clock
    }

    /// Replaces the custom message and switches back from the image to the
    /// clock. `None` clears the message.
    pub fn set_message(&mut self, line: Option<MessageLine>) {
        self.message = line.unwrap_or_default();
        self.show_image = false;
        info!("display: message set to {:?}", self.message.as_str());
        self.refresh_display();
    }

    /// Marks this boot as good: the failure counter restarts from zero.
    pub fn confirm_boot(&mut self, timestamp: u32) {
        match BootCounters::new(&mut self.eeprom).reset_boot_failure(timestamp) {
            Ok(()) => info!("boot: startup confirmed; boot failure counter cleared"),
            Err(err) => warn!("boot: clearing boot failure counter failed: {:?}", err),
        }
    }

    /// Clamps to 0..=100 and returns the applied value.
    pub fn set_brightness(&mut self, percent: i32) -> Result<u8, UpdateError<E::Error>> {
        let mut applied = 0;
        self.update(|record| {
            applied = record.set_brightness(percent);
            Ok(())
        })?;
        self.display.set_brightness(applied);
        self.display.render_now();
        Ok(applied)
    }

    pub fn set_theme(&mut self, theme: i32) -> Result<(), UpdateError<E::Error>> {
        self.update(|record| record.set_theme(theme))?;
        self.refresh_display();
        Ok(())
    }

    pub fn set_image_path(&mut self, path: &str) -> Result<(), UpdateError<E::Error>> {
        self.update(|record| record.set_last_image_path(path))?;
        self.show_image = !path.is_empty();
        self.refresh_display();
        Ok(())
    }

    pub fn set_gmt_offset(&mut self, offset_secs: i32) -> Result<(), UpdateError<E::Error>> {
        self.update(|record| record.set_gmt_offset(offset_secs))?;
        self.refresh_display();
        Ok(())
    }

    /// Applies every key of a `/set` request; returns whether any took effect.
    pub fn apply(&mut self, command: &SetCommand) -> bool {
        let mut applied = false;

        if let Some(percent) = command.brightness {
            applied |= logged("brightness", self.set_brightness(percent).map(|_| ()));
        }
        if let Some(theme) = command.theme {
            applied |= logged("theme", self.set_theme(theme));
        }
        if let Some(offset) = command.gmt_offset_secs {
            applied |= logged("gmt offset", self.set_gmt_offset(offset));
        }
        if command.clear_images {
            applied |= self.clear_images().is_ok();
        }
        if let Some(image) = &command.image {
            applied |= logged("image", self.set_image_path(image));
        }
        applied
    }

    /// Removes every stored image and forgets the last shown one.
    pub fn clear_images(&mut self) -> Result<u32, F::Error> {
        let removed = self.files.clear_images().map_err(|err| {
            warn!("files: clearing images failed: {:?}", err);
            err
        })?;
        info!("files: removed {} images", removed);

        if !self.settings.last_image_path.is_empty() {
            logged("image", self.set_image_path(""));
        }
        Ok(removed)
    }

    /// Removes one stored file; forgets it as the last image if it was.
    pub fn delete_file(&mut self, path: &str) -> Result<bool, F::Error> {
        let removed = self.files.delete(path).map_err(|err| {
            warn!("files: deleting {} failed: {:?}", path, err);
            err
        })?;
        if !removed {
            info!("files: {} not found", path);
            return Ok(false);
        }

        info!("files: deleted {}", path);
        if self.settings.last_image_path.as_str() == path {
            logged("image", self.set_image_path(""));
        }
        Ok(true)
    }

    pub fn trigger_reconfigure_wifi(&mut self, now_ms: u64) -> Result<(), ConnectivityError> {
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        self.network.request_reconfigure(now_ms, &mut ctx)
    }

    /// Wipes credentials, settings, counters and files. The caller restarts.
    pub fn trigger_factory_reset(&mut self) -> ResetReport {
        let report = perform_factory_reset(self);
        self.settings = SettingsRecord::reset();
        self.display.set_brightness(self.settings.brightness);
        self.display.show_message(&["Factory reset", "Restarting..."]);
        self.display.render_now();
        report
    }

    pub fn scan_networks(&mut self) -> Result<&ScanResults, R::Error> {
        self.radio.scan(&mut self.scan)?;
        info!("wifi: scan found {} networks", self.scan.len());
        Ok(&self.scan)
    }

    pub fn connect_to_network(
        &mut self,
        credentials: WifiCredentials,
        now_ms: u64,
    ) -> Result<(), ConnectivityError> {
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        self.network.submit_credentials(credentials, now_ms, &mut ctx)
    }

    pub fn handle_input(&mut self, event: InputEvent, now_ms: u64) {
        self.observe(now_ms);
        match event {
            InputEvent::ShortPress => {
                if self.mode() != Mode::Connected {
                    info!("input: blanking ignored in mode {}", self.mode().as_str());
                    return;
                }
                if self.blanked {
                    self.refresh_display();
                } else {
                    self.blanked = true;
                    self.display.blank();
                    self.display.render_now();
                }
            }
            InputEvent::LongPress => {
                if let Err(err) = self.trigger_reconfigure_wifi(now_ms) {
                    info!("input: reconfigure ignored: {:?}", err);
                }
            }
        }
    }

    /// Redraws the clock screen, or the selected image. Access-point modes
    /// keep their credentials screen.
    pub fn refresh_display(&mut self) {
        if self.mode() != Mode::Connected {
            return;
        }

        self.blanked = false;
        if self.showing_image() {
            self.display.show_image(&self.settings.last_image_path);
        } else {
            let face = self.clock_face();
            self.display.show_clock(&face);
            self.next_clock_redraw_ms = self.now_ms + CLOCK_REDRAW_MS;
        }
        self.display.set_brightness(self.settings.brightness);
        self.display.render_now();
    }

    /// Periodic clock update; leaves a blanked panel and an image alone.
    fn redraw_clock(&mut self) {
        if self.mode() != Mode::Connected || self.blanked || self.showing_image() {
            return;
        }
        let face = self.clock_face();
        self.display.show_clock(&face);
        self.display.render_now();
        self.next_clock_redraw_ms = self.now_ms + CLOCK_REDRAW_MS;
    }

    fn showing_image(&self) -> bool {
        self.show_image && !self.settings.last_image_path.is_empty()
    }

    fn clock_face(&self) -> ClockFace {
        let mut face = ClockFace {
            message: self.message.clone(),
            ..ClockFace::default()
        };
        if let Some(ip) = self.network.status().station_ip {
            face.address = address_line("IP: ", ip);
        }
        match self.clock.local(self.now_ms, self.settings.gmt_offset_secs) {
            Some(local) => {
                face.time = local.time_text();
                face.date = local.date_text();
            }
            None => face.time = truncated(TIME_UNSET),
        }
        face
    }

    fn observe(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    /// Parses and serves one control request. While the network is busy only
    /// portal routes are answered.
    pub fn handle_target<const N: usize>(
        &mut self,
        method: &str,
        target: &str,
        payload: &[u8],
        now_ms: u64,
        body: &mut String<N>,
    ) -> Reply {
        body.clear();
        match ControlRequest::parse(method, target, payload) {
            Ok(request) => self.handle(request, now_ms, body),
            Err(err) => {
                info!("http: {} {} rejected: {:?}", method, target, err);
                let _ = body.push_str(err.message());
                Reply::error(err.status())
            }
        }
    }

    pub fn handle<const N: usize>(
        &mut self,
        request: ControlRequest,
        now_ms: u64,
        body: &mut String<N>,
    ) -> Reply {
        body.clear();
        self.observe(now_ms);
        if self.network_busy() && !request.is_portal_route() {
            let _ = body.push_str("Busy");
            return Reply::error(503);
        }

        match self.respond(request, now_ms, body) {
            Ok(reply) => reply,
            Err(fmt::Error) => {
                warn!("http: response body exceeds {} bytes", N);
                body.clear();
                let _ = body.push_str("Response too large");
                Reply::error(500)
            }
        }
    }

    fn respond<const N: usize>(
        &mut self,
        request: ControlRequest,
        now_ms: u64,
        body: &mut String<N>,
    ) -> Result<Reply, fmt::Error> {
        let reply = match request {
            ControlRequest::Index => {
                body.write_str(PORTAL_FORM)?;
                Reply::ok(ContentType::Html)
            }
            ControlRequest::AppStatus => {
                write_app_json(body, &self.settings, &self.network.status())?;
                Reply::ok(ContentType::Json)
            }
            ControlRequest::Brightness => {
                write_brightness_json(body, self.settings.brightness)?;
                Reply::ok(ContentType::Json)
            }
            ControlRequest::StorageUsage => match self.files.usage() {
                Ok(usage) => {
                    write_usage_json(body, usage)?;
                    Reply::ok(ContentType::Json)
                }
                Err(err) => {
                    warn!("files: usage query failed: {:?}", err);
                    body.write_str("Storage unavailable")?;
                    Reply::error(500)
                }
            },
            ControlRequest::Set(command) => {
                let text = if self.apply(&command) { "OK" } else { "No action" };
                body.write_str(text)?;
                Reply::ok(ContentType::Text)
            }
            ControlRequest::ReconfigureWifi => match self.trigger_reconfigure_wifi(now_ms) {
                Ok(()) => {
                    body.write_str("Config portal open")?;
                    Reply::ok(ContentType::Text)
                }
                Err(ConnectivityError::Busy) => {
                    body.write_str("Busy")?;
                    Reply::error(503)
                }
            },
            ControlRequest::FactoryReset => {
                body.write_str("Factory reset; restarting")?;
                Reply::ok(ContentType::Text).then(AfterReply::FactoryReset)
            }
            ControlRequest::Scan => match self.scan_networks() {
                Ok(entries) => {
                    write_scan_json(body, entries)?;
                    Reply::ok(ContentType::Json)
                }
                Err(err) => {
                    warn!("wifi: scan failed: {:?}", err);
                    body.write_str("Scan failed")?;
                    Reply::error(500)
                }
            },
            ControlRequest::Connect(credentials) => {
                let ssid = credentials.ssid.clone();
                match self.connect_to_network(credentials, now_ms) {
                    Ok(()) => {
                        write!(body, "Connecting to {ssid}")?;
                        Reply::ok(ContentType::Text)
                    }
                    Err(ConnectivityError::Busy) => {
                        body.write_str("Busy")?;
                        Reply::error(503)
                    }
                }
            }
            ControlRequest::Log => Reply::ok(ContentType::Text).then(AfterReply::SendLog),
            ControlRequest::Delete(path) => match self.delete_file(&path) {
                Ok(true) => {
                    body.write_str("Deleted")?;
                    Reply::ok(ContentType::Text)
                }
                Ok(false) => {
                    body.write_str("Not found")?;
                    Reply::error(404)
                }
                Err(_) => {
                    body.write_str("Delete failed")?;
                    Reply::error(500)
                }
            },
            ControlRequest::ShowMessage(line) => {
                self.set_message(line);
                body.write_str("OK")?;
                Reply::ok(ContentType::Text)
            }
        };
        Ok(reply)
    }

    /// Stages a settings change on a copy and only adopts it once persisted.
    fn update(
        &mut self,
        change: impl FnOnce(&mut SettingsRecord) -> Result<(), SettingsError>,
    ) -> Result<(), UpdateError<E::Error>> {
        let mut candidate = self.settings.clone();
        change(&mut candidate).map_err(UpdateError::Invalid)?;
        SettingsStore::new(&mut self.eeprom)
            .save(&mut candidate)
            .map_err(UpdateError::Storage)?;
        self.settings = candidate;
        Ok(())
    }
}

impl<E, R, C, D, F> ResetTarget for Device<E, R, C, D, F>
where
    E: Eeprom,
    R: WifiRadio,
    C: CredentialStore,
    D: StatusDisplay,
    F: FileStore,
{
    type Eeprom = E;

    fn eeprom(&mut self) -> &mut E {
        &mut self.eeprom
    }

    fn disconnect_network(&mut self) {
        self.radio.disconnect();
        self.radio.stop_access_point();
    }

    fn erase_network_credentials(&mut self) -> Result<(), ResetStepError> {
        erase_credentials(&mut self.credentials)
    }

    fn format_file_storage(&mut self) -> Result<(), ResetStepError> {
        format_files(&mut self.files)
    }
}

fn logged<S: fmt::Debug>(what: &str, result: Result<(), UpdateError<S>>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!("settings: {} not applied: {:?}", what, err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::{BootDecision, begin_boot};
    use crate::counters::{
        BOOT_COUNTER_ADDR, BOOT_COUNTER_MAGIC, POWER_CYCLE_ADDR, POWER_CYCLE_MAGIC,
    };
    use crate::display::{DisplayState, Screen};
    use crate::settings::{DEFAULT_BRIGHTNESS, SETTINGS_ADDR, SETTINGS_MAGIC};
    use crate::storage::MemoryEeprom;
    use crate::testing::{
        FakeCredentials, FakeFiles, FixedRng, FlakyEeprom, STATION_IP, ScriptedRadio, StorageFault,
    };

    type TestDevice<E = MemoryEeprom> =
        Device<E, ScriptedRadio, FakeCredentials, DisplayState, FakeFiles>;

    /// 2023-11-14 22:13:20 UTC
    const SYNCED_UNIX: u64 = 1_700_000_000;

    fn device(eeprom: MemoryEeprom, saved: Option<WifiCredentials>) -> TestDevice {
        device_on(eeprom, saved)
    }

    fn device_on<E: Eeprom>(eeprom: E, saved: Option<WifiCredentials>) -> TestDevice<E> {
        let parts = DeviceParts {
            eeprom,
            radio: ScriptedRadio {
                succeed_from: Some(1),
                visible: vec![("home", -48, false), ("cafe", -77, true)],
                ..ScriptedRadio::default()
            },
            credentials: FakeCredentials {
                stored: saved,
                saves: 0,
            },
            display: DisplayState::new(),
            files: FakeFiles::default(),
        };
        Device::new(parts, ConnectivityPolicy::default(), &mut FixedRng(1234), 0)
    }

    fn home() -> WifiCredentials {
        WifiCredentials::new("home", "hunter22").unwrap()
    }

    fn connected() -> TestDevice {
        connected_on(MemoryEeprom::new())
    }

    fn connected_on<E: Eeprom>(eeprom: E) -> TestDevice<E> {
        let mut device = device_on(eeprom, Some(home()));
        device.start_network(0);
        device.tick(100);
        assert_eq!(device.mode(), Mode::Connected);
        device
    }

    fn get(device: &mut TestDevice, target: &str) -> (Reply, std::string::String) {
        let mut body = String::<2048>::new();
        let reply = device.handle_target("GET", target, b"", 1_000, &mut body);
        (reply, body.as_str().into())
    }

    fn post(device: &mut TestDevice, target: &str, payload: &str) -> (Reply, std::string::String) {
        let mut body = String::<2048>::new();
        let reply = device.handle_target("POST", target, payload.as_bytes(), 1_000, &mut body);
        (reply, body.as_str().into())
    }

    fn magic_at(image: &[u8], addr: usize) -> u16 {
        u16::from_le_bytes([image[addr], image[addr + 1]])
    }

    #[test]
    fn blank_medium_boots_with_persisted_defaults() {
        let mut device = device(MemoryEeprom::new(), None);

        assert_eq!(device.settings(), &SettingsRecord::reset());
        assert_eq!(device.display.brightness, DEFAULT_BRIGHTNESS);
        assert_eq!(
            SettingsStore::new(&mut device.eeprom).read(),
            Ok(SettingsRecord::reset())
        );
    }

    #[test]
    fn fresh_device_persists_every_region() {
        let mut eeprom = MemoryEeprom::new();
        assert!(matches!(begin_boot(&mut eeprom), BootDecision::Continue { .. }));

        let device = device(eeprom, None);
        let image = device.eeprom.committed();
        assert_eq!(magic_at(image, SETTINGS_ADDR), SETTINGS_MAGIC);
        assert_eq!(magic_at(image, BOOT_COUNTER_ADDR), BOOT_COUNTER_MAGIC);
        assert_eq!(magic_at(image, POWER_CYCLE_ADDR), POWER_CYCLE_MAGIC);

        let mut durable = MemoryEeprom::with_image(*image);
        assert_eq!(
            SettingsStore::new(&mut durable).read(),
            Ok(SettingsRecord::reset())
        );
        assert_eq!(BootCounters::new(&mut durable).power_cycles(), Ok(1));
    }

    #[test]
    fn rejected_commit_is_not_persisted_by_the_next_writer() {
        let mut device = connected_on(FlakyEeprom::default());
        device.eeprom.failing_commits = 1;

        assert_eq!(
            device.set_brightness(5),
            Err(UpdateError::Storage(StorageFault::CommitRejected))
        );
        assert_eq!(device.settings().brightness, DEFAULT_BRIGHTNESS);

        BootCounters::new(&mut device.eeprom)
            .increment_power_cycle()
            .unwrap();
        let mut durable = MemoryEeprom::with_image(*device.eeprom.inner.committed());
        assert_eq!(
            SettingsStore::new(&mut durable).read().map(|record| record.brightness),
            Ok(DEFAULT_BRIGHTNESS)
        );
    }

    #[test]
    fn stored_brightness_reaches_the_panel() {
        let mut eeprom = MemoryEeprom::new();
        let mut record = SettingsRecord::reset();
        record.set_brightness(25);
        SettingsStore::new(&mut eeprom).save(&mut record).unwrap();

        let device = device(eeprom, None);
        assert_eq!(device.settings().brightness, 25);
        assert_eq!(device.display.brightness, 25);
    }

    #[test]
    fn brightness_is_clamped_and_persisted() {
        let mut device = connected();

        assert_eq!(device.set_brightness(150), Ok(100));
        assert_eq!(device.display.brightness, 100);
        assert_eq!(
            SettingsStore::new(&mut device.eeprom)
                .read()
                .map(|record| record.brightness),
            Ok(100)
        );
    }

    #[test]
    fn rejected_value_leaves_storage_untouched() {
        let mut device = connected();
        let commits = device.eeprom.commit_count();

        assert_eq!(
            device.set_theme(42),
            Err(UpdateError::Invalid(SettingsError::ThemeOutOfRange))
        );
        assert_eq!(device.eeprom.commit_count(), commits);
        assert_eq!(device.settings().theme, 0);
    }

    #[test]
    fn set_request_applies_every_key() {
        let mut device = connected();
        let (reply, body) = get(&mut device, "/set?brt=20&theme=3&gmt=-7200&img=%2Fimage%2Fcat.jpg");

        assert_eq!(reply.status, 200);
        assert_eq!(body, "OK");
        let stored = SettingsStore::new(&mut device.eeprom).read().unwrap();
        assert_eq!(stored.brightness, 20);
        assert_eq!(stored.theme, 3);
        assert_eq!(stored.gmt_offset_secs, -7_200);
        assert_eq!(stored.last_image_path.as_str(), "/image/cat.jpg");
        assert!(matches!(&device.display.screen, Screen::Image(path) if path.as_str() == "/image/cat.jpg"));
    }

    #[test]
    fn set_request_without_effect_says_so() {
        let mut device = connected();
        assert_eq!(get(&mut device, "/set").1, "No action");
        assert_eq!(get(&mut device, "/set?theme=99").1, "No action");
    }

    #[test]
    fn clearing_images_forgets_the_last_one() {
        let mut device = connected();
        device.set_image_path("/image/dog.jpg").unwrap();

        assert_eq!(device.clear_images(), Ok(3));
        assert!(device.settings().last_image_path.is_empty());
        assert!(device.files.images.is_empty());
        assert!(device.display.clock_face().is_some());
    }

    #[test]
    fn clock_face_waits_for_the_first_sync() {
        let mut device = connected();
        let face = device.display.clock_face().unwrap();
        assert_eq!(face.address.as_str(), "IP: 192.168.1.40");
        assert_eq!(face.time.as_str(), "--:--:--");
        assert!(face.date.is_empty());

        device.set_time(SYNCED_UNIX, 2_000);
        assert!(device.clock().is_set());
        let face = device.display.clock_face().unwrap();
        // Default offset is one hour east.
        assert_eq!(face.time.as_str(), "23:13:20");
        assert_eq!(face.date.as_str(), "14-11-2023");
    }

    #[test]
    fn clock_redraws_every_second_and_follows_the_offset() {
        let mut device = connected();
        device.set_time(SYNCED_UNIX, 2_000);
        let renders = device.display.renders;

        device.tick(2_500);
        assert_eq!(device.display.renders, renders);
        device.tick(3_000);
        assert_eq!(device.display.renders, renders + 1);
        assert_eq!(device.display.clock_face().unwrap().time.as_str(), "23:13:21");

        device.set_gmt_offset(-5 * 3_600).unwrap();
        let face = device.display.clock_face().unwrap();
        assert_eq!(face.time.as_str(), "17:13:21");
        assert_eq!(face.date.as_str(), "14-11-2023");
    }

    #[test]
    fn blanked_panel_is_not_redrawn_by_the_clock() {
        let mut device = connected();
        device.set_time(SYNCED_UNIX, 2_000);
        device.handle_input(InputEvent::ShortPress, 2_100);
        let renders = device.display.renders;

        device.tick(5_000);
        device.set_time(SYNCED_UNIX + 60, 5_100);
        assert!(device.display.blanked);
        assert_eq!(device.display.renders, renders);
    }

    #[test]
    fn message_update_replaces_the_image() {
        let mut device = connected();
        device.set_image_path("/image/cat.jpg").unwrap();
        assert!(matches!(device.display.screen, Screen::Image(_)));

        let (reply, body) = post(&mut device, "/api/update", r#"{"line1":"Dinner at 7"}"#);
        assert_eq!((reply.status, body.as_str()), (200, "OK"));
        let face = device.display.clock_face().unwrap();
        assert_eq!(face.message.as_str(), "Dinner at 7");
        assert_eq!(device.settings().last_image_path.as_str(), "/image/cat.jpg");

        post(&mut device, "/api/update", "{}");
        assert!(device.display.clock_face().unwrap().message.is_empty());
    }

    #[test]
    fn message_update_needs_a_body() {
        let mut device = connected();
        let (reply, body) = post(&mut device, "/api/update", "");
        assert_eq!((reply.status, body.as_str()), (400, "No JSON body"));
        let (reply, body) = post(&mut device, "/api/update", "{\"line1\":");
        assert_eq!((reply.status, body.as_str()), (400, "Invalid JSON"));
    }

    #[test]
    fn delete_removes_one_file() {
        let mut device = connected();
        device.set_image_path("/image/dog.jpg").unwrap();

        let (reply, body) = get(&mut device, "/delete?file=%2Fimage%2Fcat.jpg");
        assert_eq!((reply.status, body.as_str()), (200, "Deleted"));
        assert_eq!(device.files.images, ["/image/dog.jpg", "/image/sea.jpg"]);
        assert_eq!(device.settings().last_image_path.as_str(), "/image/dog.jpg");

        let (reply, body) = get(&mut device, "/delete?file=/image/cat.jpg");
        assert_eq!((reply.status, body.as_str()), (404, "Not found"));
        let (reply, body) = get(&mut device, "/delete");
        assert_eq!((reply.status, body.as_str()), (400, "Missing file parameter"));
    }

    #[test]
    fn deleting_the_shown_image_returns_to_the_clock() {
        let mut device = connected();
        device.set_image_path("/image/dog.jpg").unwrap();

        assert_eq!(device.delete_file("/image/dog.jpg"), Ok(true));
        assert!(device.settings().last_image_path.is_empty());
        assert!(device.display.clock_face().is_some());

        device.files.broken = true;
        let (reply, body) = get(&mut device, "/delete?file=/image/sea.jpg");
        assert_eq!((reply.status, body.as_str()), (500, "Delete failed"));
    }

    #[test]
    fn app_status_reports_settings_and_address() {
        let mut device = connected();
        let (reply, body) = get(&mut device, "/app.json");

        assert_eq!(reply.content_type, ContentType::Json);
        assert_eq!(
            body,
            "{\"theme\":0,\"brt\":70,\"img\":\"\",\"gmtOffset\":3600,\
             \"mode\":\"connected\",\"ip\":\"192.168.1.40\"}"
        );
        assert_eq!(get(&mut device, "/brt.json").1, "{\"brt\":70}");
        assert_eq!(
            get(&mut device, "/space.json").1,
            "{\"total\":1048576,\"used\":12288,\"free\":1036288}"
        );
    }

    #[test]
    fn portal_only_serves_join_routes() {
        let mut device = device(MemoryEeprom::new(), None);
        assert_eq!(device.start_network(0), Mode::ConfigPortal);
        assert!(device.network_busy());

        let (reply, body) = get(&mut device, "/app.json");
        assert_eq!((reply.status, body.as_str()), (503, "Busy"));

        let (reply, body) = get(&mut device, "/scan");
        assert_eq!(reply.status, 200);
        assert_eq!(
            body,
            "[{\"ssid\":\"home\",\"rssi\":-48,\"open\":false},\
             {\"ssid\":\"cafe\",\"rssi\":-77,\"open\":true}]"
        );
    }

    #[test]
    fn portal_join_saves_credentials_and_connects() {
        let mut device = device(MemoryEeprom::new(), None);
        device.start_network(0);

        let (reply, body) = get(&mut device, "/connect?ssid=home&password=hunter22");
        assert_eq!(reply.status, 200);
        assert_eq!(body, "Connecting to home");

        assert_eq!(device.tick(1_100), Action::None);
        assert_eq!(device.mode(), Mode::Connected);
        assert_eq!(device.credentials.stored, Some(home()));
        assert!(!device.radio.ap_running);
        assert_eq!(device.connectivity().station_ip, Some(STATION_IP));
    }

    #[test]
    fn factory_reset_is_deferred_until_after_the_reply() {
        let mut device = connected();
        device.set_brightness(10).unwrap();

        let (reply, _) = get(&mut device, "/factoryreset");
        assert_eq!(reply.after, AfterReply::FactoryReset);
        assert!(device.credentials.stored.is_some());

        let report = device.trigger_factory_reset();
        assert!(report.is_complete());
        assert_eq!(device.credentials.stored, None);
        assert!(device.files.formatted);
        assert_eq!(device.settings(), &SettingsRecord::reset());
        assert_eq!(
            SettingsStore::new(&mut device.eeprom).read(),
            Ok(SettingsRecord::reset())
        );
    }

    #[test]
    fn short_press_toggles_blanking_only_when_connected() {
        let mut device = connected();
        device.handle_input(InputEvent::ShortPress, 200);
        assert!(device.display.blanked);
        device.handle_input(InputEvent::ShortPress, 300);
        assert!(!device.display.blanked);

        let mut portal = self::device(MemoryEeprom::new(), None);
        portal.start_network(0);
        portal.handle_input(InputEvent::ShortPress, 200);
        assert!(!portal.display.blanked);
        assert!(portal.display.shows_access_point());
    }

    #[test]
    fn long_press_opens_the_portal() {
        let mut device = connected();
        device.handle_input(InputEvent::LongPress, 500);

        assert_eq!(device.mode(), Mode::ConfigPortal);
        assert!(device.display.shows_access_point());
        assert_eq!(device.radio.disconnects, 1);
    }

    #[test]
    fn stable_uptime_clears_power_cycles() {
        let mut device = connected();
        BootCounters::new(&mut device.eeprom)
            .increment_power_cycle()
            .unwrap();

        device.tick(9_999);
        assert_eq!(BootCounters::new(&mut device.eeprom).power_cycles(), Ok(1));
        device.tick(10_000);
        assert_eq!(BootCounters::new(&mut device.eeprom).power_cycles(), Ok(0));
    }

    #[test]
    fn confirmed_boot_clears_failures() {
        let mut device = connected();
        BootCounters::new(&mut device.eeprom)
            .increment_boot_failure()
            .unwrap();

        device.confirm_boot(77);
        let record = BootCounters::new(&mut device.eeprom).boot_failure().unwrap();
        assert_eq!(record.fail_count, 0);
        assert_eq!(record.last_boot_timestamp, 77);
        let mut magic = [0u8; 2];
        device
            .eeprom
            .read(BOOT_COUNTER_ADDR, &mut magic)
            .unwrap();
        assert_eq!(u16::from_le_bytes(magic), BOOT_COUNTER_MAGIC);
    }

    #[test]
    fn unknown_routes_are_rejected() {
        let mut device = connected();
        let (reply, body) = get(&mut device, "/update");
        assert_eq!((reply.status, body.as_str()), (404, "Not found"));

        let mut tiny = String::<4>::new();
        let reply = device.handle_target("GET", "/app.json", b"", 0, &mut tiny);
        assert_eq!(reply.status, 500);
        assert!(tiny.is_empty());
    }
}
