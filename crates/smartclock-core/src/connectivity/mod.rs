//! WiFi connectivity manager.
//!
//! Owns the staged fallback from saved-network retries into a timed config
//! portal and finally a failsafe access point, plus link monitoring once
//! connected. Driven by [`ConnectivityManager::poll`] with an injected clock;
//! nothing in here sleeps.

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use heapless::{String, Vec};
use log::{error, info, warn};

use crate::display::{StatusDisplay, address_line};

mod retry;
#[cfg(test)]
mod tests;

pub use retry::{Backoff, RetryPlan, RetryPoll, RetryRun};

/// SSID of both the config portal and the failsafe access point.
pub const AP_SSID: &str = "SmartClock-Setup";
/// Station hostname announced over DHCP.
pub const DHCP_HOSTNAME: &str = "smartclock";
pub const AP_PASSWORD_LEN: usize = 8;

pub const MAX_SSID_BYTES: usize = 32;
pub const MIN_PASSWORD_BYTES: usize = 8;
pub const MAX_PASSWORD_BYTES: usize = 64;
pub const MAX_SCAN_RESULTS: usize = 16;

pub type Ssid = String<MAX_SSID_BYTES>;
pub type Passphrase = String<MAX_PASSWORD_BYTES>;
pub type ApPassword = String<AP_PASSWORD_LEN>;
pub type ScanResults = Vec<ScanEntry, MAX_SCAN_RESULTS>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WifiCredentials {
    pub ssid: Ssid,
    pub password: Passphrase,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CredentialsError {
    EmptySsid,
    SsidTooLong,
    PasswordTooShort,
    PasswordTooLong,
}

impl WifiCredentials {
    /// An empty password selects an open network.
    pub fn new(ssid: &str, password: &str) -> Result<Self, CredentialsError> {
        if ssid.is_empty() {
            return Err(CredentialsError::EmptySsid);
        }
        if !password.is_empty() && password.len() < MIN_PASSWORD_BYTES {
            return Err(CredentialsError::PasswordTooShort);
        }

        let mut checked_ssid = Ssid::new();
        checked_ssid
            .push_str(ssid)
            .map_err(|_| CredentialsError::SsidTooLong)?;
        let mut checked_password = Passphrase::new();
        checked_password
            .push_str(password)
            .map_err(|_| CredentialsError::PasswordTooLong)?;

        Ok(Self {
            ssid: checked_ssid,
            password: checked_password,
        })
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

/// Station link as reported by the radio.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkStatus {
    Down,
    Connecting,
    Up(Ipv4Addr),
    /// The radio gave up on the current attempt (e.g. wrong password).
    Failed,
}

/// Station association as the radio driver reports it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Association {
    Associated,
    Pending,
    /// The last driver event was a disconnect. It may predate the current
    /// join attempt.
    Dropped,
}

/// Disconnect reports younger than this may belong to the previous attempt.
pub const STALE_DISCONNECT_MS: u64 = 3_000;

impl LinkStatus {
    /// Folds the driver's association state and the DHCP lease into a link
    /// status. `attempt_age_ms` is the time since the current join started,
    /// `None` outside a join.
    pub fn classify(
        association: Association,
        lease: Option<Ipv4Addr>,
        attempt_age_ms: Option<u64>,
    ) -> Self {
        match (association, attempt_age_ms) {
            (Association::Associated, _) => lease.map_or(Self::Connecting, Self::Up),
            (Association::Dropped, Some(age)) if age >= STALE_DISCONNECT_MS => Self::Failed,
            (_, Some(_)) => Self::Connecting,
            (_, None) => Self::Down,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanEntry {
    pub ssid: Ssid,
    pub signal_dbm: i8,
    pub is_open: bool,
}

/// Station and access-point control of the WiFi radio.
pub trait WifiRadio {
    type Error: core::fmt::Debug;

    /// Starts joining; completion is observed through [`WifiRadio::link_status`].
    fn begin_connect(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error>;

    fn link_status(&mut self) -> LinkStatus;

    /// Drops the station link. The access point, if any, stays up.
    fn disconnect(&mut self);

    /// Starts (or reconfigures) the access point and returns its address.
    fn start_access_point(&mut self, ssid: &str, password: &str)
    -> Result<Ipv4Addr, Self::Error>;

    fn stop_access_point(&mut self);

    /// Full radio stop/start.
    fn power_cycle(&mut self) -> Result<(), Self::Error>;

    fn scan(&mut self, out: &mut ScanResults) -> Result<(), Self::Error>;
}

/// Persistent home of the saved network identity.
pub trait CredentialStore {
    type Error: core::fmt::Debug;

    fn load(&mut self) -> Option<WifiCredentials>;
    fn save(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error>;
    fn erase(&mut self) -> Result<(), Self::Error>;
}

pub trait RandomSource {
    fn next_u32(&mut self) -> u32;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Connecting,
    Connected,
    ConfigPortal,
    FailsafeAp,
}

impl Mode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConfigPortal => "config_portal",
            Self::FailsafeAp => "failsafe_ap",
        }
    }
}

/// Timing of every connectivity stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivityPolicy {
    pub initial: RetryPlan,
    pub portal_timeout_ms: u64,
    pub monitor_interval_ms: u64,
    pub monitor_retry: RetryPlan,
    pub recheck_interval_ms: u64,
    pub recheck: RetryPlan,
    /// Single join attempt for credentials submitted by a user.
    pub join: RetryPlan,
}

impl Default for ConnectivityPolicy {
    fn default() -> Self {
        Self {
            initial: RetryPlan::new(
                5,
                30_000,
                Backoff::Exponential {
                    base_ms: 2_000,
                    cap_ms: 30_000,
                },
            ),
            portal_timeout_ms: 180_000,
            monitor_interval_ms: 60_000,
            monitor_retry: RetryPlan::new(3, 10_000, Backoff::Fixed { delay_ms: 1_000 }),
            recheck_interval_ms: 5 * 60_000,
            recheck: RetryPlan::new(2, 10_000, Backoff::Fixed { delay_ms: 1_000 }),
            join: RetryPlan::new(1, 20_000, Backoff::Fixed { delay_ms: 0 }),
        }
    }
}

impl ConnectivityPolicy {
    pub const fn with_initial(mut self, plan: RetryPlan) -> Self {
        self.initial = plan;
        self
    }

    pub const fn with_portal_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.portal_timeout_ms = timeout_ms;
        self
    }

    pub const fn with_monitor_interval_ms(mut self, interval_ms: u64) -> Self {
        self.monitor_interval_ms = interval_ms;
        self
    }

    pub const fn with_monitor_retry(mut self, plan: RetryPlan) -> Self {
        self.monitor_retry = plan;
        self
    }

    pub const fn with_recheck_interval_ms(mut self, interval_ms: u64) -> Self {
        self.recheck_interval_ms = interval_ms;
        self
    }

    pub const fn with_recheck(mut self, plan: RetryPlan) -> Self {
        self.recheck = plan;
        self
    }

    pub const fn with_join(mut self, plan: RetryPlan) -> Self {
        self.join = plan;
        self
    }
}

/// Collaborators borrowed for one call into the manager.
pub struct NetContext<'a, R, C, D> {
    pub radio: &'a mut R,
    pub credentials: &'a mut C,
    pub display: &'a mut D,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    Idle,
    Changed(Mode),
    /// Reconnected from a degraded mode; the caller restarts the device.
    RestartRequired,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectivityError {
    /// A bounded connection stage is already running.
    Busy,
}

/// Read-only view for status endpoints and the UI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivityStatus {
    pub mode: Mode,
    pub station_ip: Option<Ipv4Addr>,
    pub ap_ip: Option<Ipv4Addr>,
    pub last_monitor_check_ms: Option<u64>,
    pub last_reconnect_attempt_ms: Option<u64>,
    pub revision: u32,
}

/// Where a failed user-initiated join returns to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Resume {
    Failsafe,
    SavedNetwork,
}

#[derive(Clone, Debug)]
enum Phase {
    Idle,
    Acquiring(RetryRun),
    Portal {
        deadline_ms: u64,
        join: Option<RetryRun>,
    },
    Connected {
        next_check_ms: u64,
    },
    Recovering(RetryRun),
    Failsafe {
        next_recheck_ms: u64,
        recheck: Option<RetryRun>,
    },
    Joining {
        run: RetryRun,
        resume: Resume,
    },
}

pub struct ConnectivityManager {
    policy: ConnectivityPolicy,
    ap_password: ApPassword,
    phase: Phase,
    station_ip: Option<Ipv4Addr>,
    ap_ip: Option<Ipv4Addr>,
    last_monitor_check_ms: Option<u64>,
    last_reconnect_attempt_ms: Option<u64>,
    revision: u32,
}

impl ConnectivityManager {
    /// Generates the session AP password; it stays fixed until restart.
    pub fn new<G: RandomSource>(policy: ConnectivityPolicy, rng: &mut G) -> Self {
        Self {
            policy,
            ap_password: generate_ap_password(rng),
            phase: Phase::Idle,
            station_ip: None,
            ap_ip: None,
            last_monitor_check_ms: None,
            last_reconnect_attempt_ms: None,
            revision: 0,
        }
    }

    pub fn policy(&self) -> &ConnectivityPolicy {
        &self.policy
    }

    pub fn ap_password(&self) -> &str {
        &self.ap_password
    }

    pub fn mode(&self) -> Mode {
        match &self.phase {
            Phase::Idle | Phase::Acquiring(_) | Phase::Recovering(_) | Phase::Joining { .. } => {
                Mode::Connecting
            }
            Phase::Portal { .. } => Mode::ConfigPortal,
            Phase::Connected { .. } => Mode::Connected,
            Phase::Failsafe { .. } => Mode::FailsafeAp,
        }
    }

    pub fn status(&self) -> ConnectivityStatus {
        ConnectivityStatus {
            mode: self.mode(),
            station_ip: self.station_ip,
            ap_ip: self.ap_ip,
            last_monitor_check_ms: self.last_monitor_check_ms,
            last_reconnect_attempt_ms: self.last_reconnect_attempt_ms,
            revision: self.revision,
        }
    }

    /// True while a bounded stage owns the device: the caller must run its
    /// dedicated connectivity loop until this clears.
    pub fn is_blocking(&self) -> bool {
        match &self.phase {
            Phase::Acquiring(_)
            | Phase::Portal { .. }
            | Phase::Recovering(_)
            | Phase::Joining { .. } => true,
            Phase::Failsafe { recheck, .. } => recheck.is_some(),
            Phase::Idle | Phase::Connected { .. } => false,
        }
    }

    /// Initial acquisition from saved credentials, or the portal when there
    /// are none.
    pub fn start<R, C, D>(&mut self, now_ms: u64, ctx: &mut NetContext<'_, R, C, D>) -> Mode
    where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        match ctx.credentials.load() {
            Some(credentials) => {
                info!("wifi: saved network {} found; connecting", credentials.ssid);
                ctx.display
                    .show_message(&["Connecting to", credentials.ssid.as_str()]);
                ctx.display.render_now();
                let (run, first) =
                    RetryRun::start(self.policy.initial, credentials, ctx.radio, now_ms);
                self.last_reconnect_attempt_ms = Some(now_ms);
                self.set_phase(Phase::Acquiring(run));
                if first == RetryPoll::Exhausted {
                    self.enter_portal(now_ms, ctx);
                }
            }
            None => {
                info!("wifi: no saved network; opening config portal");
                self.enter_portal(now_ms, ctx);
            }
        }
        self.mode()
    }

    pub fn poll<R, C, D>(&mut self, now_ms: u64, ctx: &mut NetContext<'_, R, C, D>) -> PollOutcome
    where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        let before = self.mode();
        let phase = core::mem::replace(&mut self.phase, Phase::Idle);

        let restart = match phase {
            Phase::Idle => false,
            Phase::Acquiring(mut run) => {
                match run.poll(ctx.radio, now_ms) {
                    RetryPoll::Pending => self.phase = Phase::Acquiring(run),
                    RetryPoll::Connected(ip) => self.enter_connected(ip, now_ms, ctx),
                    RetryPoll::Exhausted => {
                        warn!("wifi: saved network unreachable; opening config portal");
                        self.enter_portal(now_ms, ctx);
                    }
                }
                false
            }
            Phase::Portal { deadline_ms, join } => {
                self.poll_portal(deadline_ms, join, now_ms, ctx);
                false
            }
            Phase::Connected { next_check_ms } => {
                self.poll_connected(next_check_ms, now_ms, ctx);
                false
            }
            Phase::Recovering(mut run) => {
                match run.poll(ctx.radio, now_ms) {
                    RetryPoll::Pending => self.phase = Phase::Recovering(run),
                    RetryPoll::Connected(ip) => self.enter_connected(ip, now_ms, ctx),
                    RetryPoll::Exhausted => {
                        warn!("wifi: quick reconnects failed; switching to failsafe access point");
                        self.enter_failsafe(now_ms, ctx);
                    }
                }
                false
            }
            Phase::Failsafe {
                next_recheck_ms,
                recheck,
            } => self.poll_failsafe(next_recheck_ms, recheck, now_ms, ctx),
            Phase::Joining { mut run, resume } => match run.poll(ctx.radio, now_ms) {
                RetryPoll::Pending => {
                    self.phase = Phase::Joining { run, resume };
                    false
                }
                RetryPoll::Connected(ip) => {
                    self.save_credentials(run.credentials(), ctx);
                    info!("wifi: joined {}; restart required", run.credentials().ssid);
                    self.station_ip = Some(ip);
                    self.set_phase(Phase::Connected {
                        next_check_ms: now_ms.saturating_add(self.policy.monitor_interval_ms),
                    });
                    true
                }
                RetryPoll::Exhausted => {
                    warn!("wifi: join of {} failed", run.credentials().ssid);
                    match resume {
                        Resume::Failsafe => self.enter_failsafe(now_ms, ctx),
                        Resume::SavedNetwork => self.begin_recovery(now_ms, ctx),
                    }
                    false
                }
            },
        };

        if restart {
            return PollOutcome::RestartRequired;
        }

        let after = self.mode();
        if after != before {
            info!("wifi: mode {} -> {}", before.as_str(), after.as_str());
            PollOutcome::Changed(after)
        } else {
            PollOutcome::Idle
        }
    }

    /// Opens the config portal on demand. Refused while a bounded stage runs.
    pub fn request_reconfigure<R, C, D>(
        &mut self,
        now_ms: u64,
        ctx: &mut NetContext<'_, R, C, D>,
    ) -> Result<(), ConnectivityError>
    where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        if self.is_blocking() {
            return Err(ConnectivityError::Busy);
        }
        info!("wifi: reconfiguration requested; opening config portal");
        if self.station_ip.take().is_some() {
            ctx.radio.disconnect();
        }
        self.enter_portal(now_ms, ctx);
        Ok(())
    }

    /// Joins a user-chosen network.
    ///
    /// Inside the portal a success keeps the device running as Connected.
    /// Elsewhere a success asks for a restart and a failure falls back to the
    /// previous reachable state.
    pub fn submit_credentials<R, C, D>(
        &mut self,
        credentials: WifiCredentials,
        now_ms: u64,
        ctx: &mut NetContext<'_, R, C, D>,
    ) -> Result<(), ConnectivityError>
    where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        let resume = match &self.phase {
            Phase::Portal { join: None, .. } => None,
            Phase::Connected { .. } => Some(Resume::SavedNetwork),
            Phase::Failsafe { recheck: None, .. } | Phase::Idle => Some(Resume::Failsafe),
            _ => return Err(ConnectivityError::Busy),
        };
        self.last_reconnect_attempt_ms = Some(now_ms);

        let Some(resume) = resume else {
            info!("wifi: portal received credentials for {}", credentials.ssid);
            let (run, _) = RetryRun::start(self.policy.join, credentials, ctx.radio, now_ms);
            if let Phase::Portal { join, .. } = &mut self.phase {
                *join = Some(run);
            }
            return Ok(());
        };

        info!("wifi: joining {} on request", credentials.ssid);
        if self.station_ip.take().is_some() {
            ctx.radio.disconnect();
        }
        if self.ap_ip.take().is_some() {
            ctx.radio.stop_access_point();
        }
        ctx.display
            .show_message(&["Joining", credentials.ssid.as_str()]);
        ctx.display.render_now();

        let (run, _) = RetryRun::start(self.policy.join, credentials, ctx.radio, now_ms);
        self.set_phase(Phase::Joining { run, resume });
        Ok(())
    }

    fn poll_portal<R, C, D>(
        &mut self,
        deadline_ms: u64,
        join: Option<RetryRun>,
        now_ms: u64,
        ctx: &mut NetContext<'_, R, C, D>,
    ) where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        if let Some(mut run) = join {
            match run.poll(ctx.radio, now_ms) {
                RetryPoll::Pending => {
                    self.phase = Phase::Portal {
                        deadline_ms,
                        join: Some(run),
                    };
                    return;
                }
                RetryPoll::Connected(ip) => {
                    self.save_credentials(run.credentials(), ctx);
                    if self.ap_ip.take().is_some() {
                        ctx.radio.stop_access_point();
                    }
                    self.enter_connected(ip, now_ms, ctx);
                    return;
                }
                RetryPoll::Exhausted => {
                    warn!("wifi: portal join of {} failed", run.credentials().ssid);
                    self.announce_access_point(ctx);
                }
            }
        }

        if now_ms >= deadline_ms {
            warn!(
                "wifi: config portal timed out after {} ms",
                self.policy.portal_timeout_ms
            );
            self.enter_failsafe(now_ms, ctx);
        } else {
            self.phase = Phase::Portal {
                deadline_ms,
                join: None,
            };
        }
    }

    fn poll_connected<R, C, D>(
        &mut self,
        next_check_ms: u64,
        now_ms: u64,
        ctx: &mut NetContext<'_, R, C, D>,
    ) where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        if now_ms < next_check_ms {
            self.phase = Phase::Connected { next_check_ms };
            return;
        }

        self.last_monitor_check_ms = Some(now_ms);
        match ctx.radio.link_status() {
            LinkStatus::Up(ip) => {
                if self.station_ip != Some(ip) {
                    info!("wifi: station address changed to {}", ip);
                    self.station_ip = Some(ip);
                    self.revision = self.revision.wrapping_add(1);
                }
                self.phase = Phase::Connected {
                    next_check_ms: now_ms.saturating_add(self.policy.monitor_interval_ms),
                };
            }
            status => {
                warn!("wifi: link lost ({:?}); attempting quick reconnect", status);
                self.station_ip = None;
                self.begin_recovery(now_ms, ctx);
            }
        }
    }

    fn poll_failsafe<R, C, D>(
        &mut self,
        next_recheck_ms: u64,
        recheck: Option<RetryRun>,
        now_ms: u64,
        ctx: &mut NetContext<'_, R, C, D>,
    ) -> bool
    where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        let next_after = now_ms.saturating_add(self.policy.recheck_interval_ms);

        if let Some(mut run) = recheck {
            return match run.poll(ctx.radio, now_ms) {
                RetryPoll::Pending => {
                    self.phase = Phase::Failsafe {
                        next_recheck_ms,
                        recheck: Some(run),
                    };
                    false
                }
                RetryPoll::Connected(ip) => {
                    info!("wifi: saved network {} is back; restart required", run.credentials().ssid);
                    self.station_ip = Some(ip);
                    self.set_phase(Phase::Connected {
                        next_check_ms: now_ms.saturating_add(self.policy.monitor_interval_ms),
                    });
                    true
                }
                RetryPoll::Exhausted => {
                    info!("wifi: failsafe recheck failed; next in {} ms", self.policy.recheck_interval_ms);
                    self.phase = Phase::Failsafe {
                        next_recheck_ms: next_after,
                        recheck: None,
                    };
                    false
                }
            };
        }

        if now_ms < next_recheck_ms {
            self.phase = Phase::Failsafe {
                next_recheck_ms,
                recheck: None,
            };
            return false;
        }

        let Some(credentials) = ctx.credentials.load() else {
            self.phase = Phase::Failsafe {
                next_recheck_ms: next_after,
                recheck: None,
            };
            return false;
        };

        info!("wifi: failsafe recheck of {}", credentials.ssid);
        self.last_reconnect_attempt_ms = Some(now_ms);
        let (run, first) = RetryRun::start(self.policy.recheck, credentials, ctx.radio, now_ms);
        self.phase = Phase::Failsafe {
            next_recheck_ms: if first == RetryPoll::Exhausted {
                next_after
            } else {
                next_recheck_ms
            },
            recheck: (first != RetryPoll::Exhausted).then_some(run),
        };
        false
    }

    fn begin_recovery<R, C, D>(&mut self, now_ms: u64, ctx: &mut NetContext<'_, R, C, D>)
    where
        R: WifiRadio,
        C: CredentialStore,
        D: StatusDisplay,
    {
        let Some(credentials) = ctx.credentials.load() else {
            warn!("wifi: no saved network to reconnect to");
            self.enter_failsafe(now_ms, ctx);
            return;
        };

        ctx.display.show_message(&["WiFi lost", "Reconnecting..."]);
        ctx.display.render_now();
        self.last_reconnect_attempt_ms = Some(now_ms);
        let (run, first) =
            RetryRun::start(self.policy.monitor_retry, credentials, ctx.radio, now_ms);
        if first == RetryPoll::Exhausted {
            self.enter_failsafe(now_ms, ctx);
        } else {
            self.set_phase(Phase::Recovering(run));
        }
    }

    fn enter_connected<R, C, D>(
        &mut self,
        ip: Ipv4Addr,
        now_ms: u64,
        ctx: &mut NetContext<'_, R, C, D>,
    ) where
        D: StatusDisplay,
    {
        info!("wifi: connected ip={}", ip);
        self.station_ip = Some(ip);
        self.last_monitor_check_ms = Some(now_ms);
        let line = address_line("IP: ", ip);
        ctx.display.show_message(&["WiFi connected", line.as_str()]);
        ctx.display.render_now();
        self.set_phase(Phase::Connected {
            next_check_ms: now_ms.saturating_add(self.policy.monitor_interval_ms),
        });
    }

    fn enter_portal<R, C, D>(&mut self, now_ms: u64, ctx: &mut NetContext<'_, R, C, D>)
    where
        R: WifiRadio,
        D: StatusDisplay,
    {
        if self.ensure_access_point(ctx).is_none() {
            self.settle_failsafe(now_ms, ctx);
            return;
        }
        info!(
            "wifi: config portal open for {} ms",
            self.policy.portal_timeout_ms
        );
        self.announce_access_point(ctx);
        self.set_phase(Phase::Portal {
            deadline_ms: now_ms.saturating_add(self.policy.portal_timeout_ms),
            join: None,
        });
    }

    fn enter_failsafe<R, C, D>(&mut self, now_ms: u64, ctx: &mut NetContext<'_, R, C, D>)
    where
        R: WifiRadio,
        D: StatusDisplay,
    {
        self.ensure_access_point(ctx);
        self.settle_failsafe(now_ms, ctx);
    }

    /// Failsafe with whatever access point is running; no further start attempts.
    fn settle_failsafe<R, C, D>(&mut self, now_ms: u64, ctx: &mut NetContext<'_, R, C, D>)
    where
        D: StatusDisplay,
    {
        match self.ap_ip {
            Some(ip) => info!("wifi: failsafe access point {} active at {}", AP_SSID, ip),
            None => error!("wifi: failsafe access point unavailable; continuing without it"),
        }
        self.announce_access_point(ctx);
        self.set_phase(Phase::Failsafe {
            next_recheck_ms: now_ms.saturating_add(self.policy.recheck_interval_ms),
            recheck: None,
        });
    }

    /// Starts the AP unless it already runs. A failed start is retried once
    /// after power-cycling the radio.
    fn ensure_access_point<R, C, D>(
        &mut self,
        ctx: &mut NetContext<'_, R, C, D>,
    ) -> Option<Ipv4Addr>
    where
        R: WifiRadio,
    {
        if self.ap_ip.is_some() {
            return self.ap_ip;
        }

        let ip = match ctx.radio.start_access_point(AP_SSID, &self.ap_password) {
            Ok(ip) => Some(ip),
            Err(err) => {
                warn!("wifi: access point start failed: {:?}; power cycling radio", err);
                if let Err(err) = ctx.radio.power_cycle() {
                    warn!("wifi: radio power cycle failed: {:?}", err);
                }
                match ctx.radio.start_access_point(AP_SSID, &self.ap_password) {
                    Ok(ip) => Some(ip),
                    Err(err) => {
                        error!("wifi: access point start failed again: {:?}", err);
                        None
                    }
                }
            }
        };

        if let Some(ip) = ip {
            info!("wifi: access point {} up at {}", AP_SSID, ip);
        }
        self.ap_ip = ip;
        ip
    }

    fn announce_access_point<R, C, D>(&self, ctx: &mut NetContext<'_, R, C, D>)
    where
        D: StatusDisplay,
    {
        ctx.display.show_ap_credentials(
            AP_SSID,
            &self.ap_password,
            self.ap_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
        );
        ctx.display.render_now();
    }

    fn save_credentials<R, C, D>(
        &self,
        credentials: &WifiCredentials,
        ctx: &mut NetContext<'_, R, C, D>,
    ) where
        C: CredentialStore,
    {
        match ctx.credentials.save(credentials) {
            Ok(()) => info!("wifi: saved network {}", credentials.ssid),
            Err(err) => warn!("wifi: saving network {} failed: {:?}", credentials.ssid, err),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Eight decimal digits.
fn generate_ap_password<G: RandomSource>(rng: &mut G) -> ApPassword {
    let mut password = ApPassword::new();
    let _ = write!(password, "{:08}", rng.next_u32() % 100_000_000);
    password
}
