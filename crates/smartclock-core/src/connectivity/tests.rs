use std::vec::Vec as StdVec;

use super::*;
use crate::display::DisplayState;
use crate::testing::{AP_IP, FakeCredentials, FixedRng, STATION_IP, ScriptedRadio};

const STEP_MS: u64 = 100;

struct Harness {
    manager: ConnectivityManager,
    radio: ScriptedRadio,
    credentials: FakeCredentials,
    display: DisplayState,
    now_ms: u64,
    /// Times at which the radio saw a new connect attempt.
    connect_times: StdVec<u64>,
    restarts: u32,
}

impl Harness {
    fn new(saved: Option<WifiCredentials>) -> Self {
        Self {
            manager: ConnectivityManager::new(ConnectivityPolicy::default(), &mut FixedRng(4_711)),
            radio: ScriptedRadio::default(),
            credentials: FakeCredentials {
                stored: saved,
                saves: 0,
            },
            display: DisplayState::new(),
            now_ms: 0,
            connect_times: StdVec::new(),
            restarts: 0,
        }
    }

    fn with_saved_network() -> Self {
        Self::new(Some(home()))
    }

    fn start(&mut self) -> Mode {
        let connects = self.radio.connects;
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        let mode = self.manager.start(self.now_ms, &mut ctx);
        self.note_connects(connects);
        mode
    }

    fn step(&mut self) -> PollOutcome {
        self.now_ms += STEP_MS;
        let connects = self.radio.connects;
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        let outcome = self.manager.poll(self.now_ms, &mut ctx);
        self.note_connects(connects);
        if outcome == PollOutcome::RestartRequired {
            self.restarts += 1;
        }
        outcome
    }

    /// Steps until `mode` is reached or `limit_ms` of simulated time passes.
    fn run_until_mode(&mut self, mode: Mode, limit_ms: u64) -> bool {
        let end = self.now_ms + limit_ms;
        while self.now_ms < end {
            self.step();
            if self.manager.mode() == mode {
                return true;
            }
        }
        false
    }

    fn run_for(&mut self, duration_ms: u64) {
        let end = self.now_ms + duration_ms;
        while self.now_ms < end {
            self.step();
        }
    }

    fn submit(&mut self, credentials: WifiCredentials) -> Result<(), ConnectivityError> {
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        self.manager
            .submit_credentials(credentials, self.now_ms, &mut ctx)
    }

    fn reconfigure(&mut self) -> Result<(), ConnectivityError> {
        let mut ctx = NetContext {
            radio: &mut self.radio,
            credentials: &mut self.credentials,
            display: &mut self.display,
        };
        self.manager.request_reconfigure(self.now_ms, &mut ctx)
    }

    fn note_connects(&mut self, before: u32) {
        for _ in before..self.radio.connects {
            self.connect_times.push(self.now_ms);
        }
    }
}

fn home() -> WifiCredentials {
    WifiCredentials::new("home", "correct horse").unwrap()
}

fn office() -> WifiCredentials {
    WifiCredentials::new("office", "battery staple").unwrap()
}

#[test]
fn no_saved_network_opens_portal_then_failsafe_without_attempts() {
    let mut h = Harness::new(None);

    assert_eq!(h.start(), Mode::ConfigPortal);
    assert!(h.radio.ap_running);
    assert!(h.display.shows_access_point());

    assert!(h.run_until_mode(Mode::FailsafeAp, 200_000));
    assert_eq!(h.now_ms, 180_000);
    assert_eq!(h.radio.connects, 0);
    assert_eq!(h.radio.ap_starts, 1);
    assert!(h.display.shows_access_point());
}

#[test]
fn failing_saved_network_makes_five_attempts_with_growing_backoff() {
    let mut h = Harness::with_saved_network();

    assert_eq!(h.start(), Mode::Connecting);
    assert!(h.manager.is_blocking());
    assert!(h.run_until_mode(Mode::ConfigPortal, 400_000));

    assert_eq!(h.radio.connects, 5);
    assert_eq!(h.connect_times, [0, 32_000, 66_000, 104_000, 150_000]);
    assert_eq!(h.now_ms, 180_000);

    let gaps: StdVec<u64> = h
        .connect_times
        .windows(2)
        .map(|pair| pair[1] - pair[0] - 30_000)
        .collect();
    assert_eq!(gaps, [2_000, 4_000, 8_000, 16_000]);
}

#[test]
fn saved_network_connects_on_third_attempt() {
    let mut h = Harness::with_saved_network();
    h.radio.succeed_from = Some(3);

    h.start();
    assert!(h.run_until_mode(Mode::Connected, 200_000));

    assert_eq!(h.radio.connects, 3);
    assert_eq!(h.manager.status().station_ip, Some(STATION_IP));
    assert_eq!(h.credentials.saves, 0);
    assert!(!h.manager.is_blocking());
    assert_eq!(h.display.lines()[1].as_str(), "IP: 192.168.1.40");
}

#[test]
fn radio_rejection_fails_attempt_before_timeout() {
    let mut h = Harness::with_saved_network();
    h.radio.reject_immediately = true;

    h.start();
    h.step();
    assert_eq!(h.connect_times, [0]);

    h.run_for(2_000);
    assert_eq!(h.connect_times, [0, 2_100]);
}

#[test]
fn lost_link_survives_quick_retry() {
    let mut h = Harness::with_saved_network();
    h.radio.succeed_from = Some(1);
    h.start();
    h.step();
    assert_eq!(h.manager.mode(), Mode::Connected);

    h.radio.drop_link();
    h.run_for(59_000);
    assert_eq!(h.manager.mode(), Mode::Connected);

    assert!(h.run_until_mode(Mode::Connecting, 2_000));
    assert!(h.run_until_mode(Mode::Connected, 60_000));
    assert_eq!(h.radio.ap_starts, 0);
    assert_eq!(h.restarts, 0);
}

#[test]
fn lost_link_falls_back_to_failsafe_without_restart() {
    let mut h = Harness::with_saved_network();
    h.radio.succeed_from = Some(1);
    h.start();
    h.step();

    h.radio.succeed_from = None;
    h.radio.drop_link();
    let lost_at = h.connect_times.len();
    assert!(h.run_until_mode(Mode::Connecting, 61_000));
    assert!(h.run_until_mode(Mode::FailsafeAp, 60_000));

    assert_eq!(h.connect_times.len() - lost_at, 3);
    let retries = &h.connect_times[lost_at..];
    assert_eq!(retries[1] - retries[0], 11_000);
    assert_eq!(retries[2] - retries[1], 11_000);
    assert!(h.radio.ap_running);
    assert_eq!(h.restarts, 0);
    assert!(h.display.shows_access_point());
}

#[test]
fn failsafe_recheck_reconnects_and_requests_restart() {
    let mut h = Harness::with_saved_network();
    h.start();
    assert!(h.run_until_mode(Mode::FailsafeAp, 400_000));
    let entered = h.now_ms;
    let attempts = h.radio.connects;

    h.radio.succeed_from = Some(attempts + 1);
    h.run_for(5 * 60_000 - STEP_MS);
    assert_eq!(h.radio.connects, attempts);

    h.step();
    assert_eq!(h.radio.connects, attempts + 1);
    assert!(h.manager.is_blocking());
    assert_eq!(h.step(), PollOutcome::RestartRequired);
    assert_eq!(h.now_ms - entered, 5 * 60_000 + STEP_MS);
}

#[test]
fn failsafe_recheck_gives_up_after_two_tries() {
    let mut h = Harness::with_saved_network();
    h.start();
    assert!(h.run_until_mode(Mode::FailsafeAp, 400_000));
    let attempts = h.radio.connects;

    h.run_for(5 * 60_000 + 30_000);
    assert_eq!(h.radio.connects, attempts + 2);
    assert_eq!(h.manager.mode(), Mode::FailsafeAp);
    assert!(!h.manager.is_blocking());
    assert_eq!(h.restarts, 0);
}

#[test]
fn failsafe_without_saved_network_never_rechecks() {
    let mut h = Harness::new(None);
    h.start();
    assert!(h.run_until_mode(Mode::FailsafeAp, 200_000));

    h.run_for(16 * 60_000);
    assert_eq!(h.radio.connects, 0);
    assert!(h.manager.status().last_reconnect_attempt_ms.is_none());
}

#[test]
fn portal_join_saves_credentials_and_connects() {
    let mut h = Harness::new(None);
    h.start();
    h.run_for(10_000);

    h.radio.succeed_from = Some(1);
    assert_eq!(h.submit(office()), Ok(()));
    assert_eq!(h.submit(home()), Err(ConnectivityError::Busy));

    assert!(h.run_until_mode(Mode::Connected, 1_000));
    assert_eq!(h.credentials.stored, Some(office()));
    assert_eq!(h.credentials.saves, 1);
    assert!(!h.radio.ap_running);
    assert_eq!(h.restarts, 0);
}

#[test]
fn failed_portal_join_keeps_portal_until_timeout() {
    let mut h = Harness::new(None);
    h.start();
    h.run_for(10_000);

    assert_eq!(h.submit(office()), Ok(()));
    h.run_for(20_000 + STEP_MS);
    assert_eq!(h.manager.mode(), Mode::ConfigPortal);
    assert!(h.display.shows_access_point());
    assert_eq!(h.credentials.saves, 0);

    assert!(h.run_until_mode(Mode::FailsafeAp, 200_000));
    assert_eq!(h.now_ms, 180_000);
}

#[test]
fn access_point_start_is_retried_after_power_cycle() {
    let mut h = Harness::new(None);
    h.radio.ap_failures_left = 1;

    assert_eq!(h.start(), Mode::ConfigPortal);
    assert_eq!(h.radio.power_cycles, 1);
    assert_eq!(h.radio.ap_starts, 2);
    assert_eq!(h.manager.status().ap_ip, Some(AP_IP));
}

#[test]
fn second_access_point_failure_continues_without_ap() {
    let mut h = Harness::new(None);
    h.radio.ap_failures_left = 2;

    assert_eq!(h.start(), Mode::FailsafeAp);
    assert_eq!(h.radio.power_cycles, 1);
    assert_eq!(h.manager.status().ap_ip, None);
    assert!(h.display.shows_access_point());
    assert!(!h.manager.is_blocking());
}

#[test]
fn session_password_is_eight_digits_and_stable() {
    let mut h = Harness::new(None);
    let password = h.manager.ap_password().to_owned();
    assert_eq!(password, "00004711");
    assert!(password.bytes().all(|b| b.is_ascii_digit()));

    h.start();
    h.run_for(200_000);
    assert_eq!(h.manager.ap_password(), password);
}

#[test]
fn manual_join_from_failsafe_requests_restart() {
    let mut h = Harness::new(None);
    h.start();
    assert!(h.run_until_mode(Mode::FailsafeAp, 200_000));

    h.radio.succeed_from = Some(1);
    assert_eq!(h.submit(home()), Ok(()));
    assert!(!h.radio.ap_running);
    assert_eq!(h.step(), PollOutcome::RestartRequired);
    assert_eq!(h.credentials.stored, Some(home()));
}

#[test]
fn failed_manual_join_restores_failsafe_access_point() {
    let mut h = Harness::new(None);
    h.start();
    assert!(h.run_until_mode(Mode::FailsafeAp, 200_000));

    assert_eq!(h.submit(office()), Ok(()));
    assert_eq!(h.manager.mode(), Mode::Connecting);
    assert!(h.run_until_mode(Mode::FailsafeAp, 21_000));
    assert!(h.radio.ap_running);
    assert_eq!(h.credentials.saves, 0);
}

#[test]
fn failed_manual_join_while_connected_reconnects_saved_network() {
    let mut h = Harness::with_saved_network();
    h.radio.succeed_from = Some(1);
    h.start();
    h.step();

    // Only the saved network is reachable from here on.
    h.radio.succeed_from = Some(3);
    assert_eq!(h.submit(office()), Ok(()));
    assert!(h.run_until_mode(Mode::Connected, 40_000));
    assert_eq!(h.radio.connects, 3);
    assert_eq!(h.credentials.stored, Some(home()));
    assert_eq!(h.restarts, 0);
}

#[test]
fn reconfigure_opens_portal_from_connected() {
    let mut h = Harness::with_saved_network();
    h.radio.succeed_from = Some(1);
    h.start();
    h.step();

    assert_eq!(h.reconfigure(), Ok(()));
    assert_eq!(h.manager.mode(), Mode::ConfigPortal);
    assert!(h.radio.ap_running);
    assert_eq!(h.manager.status().station_ip, None);
}

#[test]
fn reconfigure_is_refused_while_acquiring() {
    let mut h = Harness::with_saved_network();
    h.start();
    assert_eq!(h.reconfigure(), Err(ConnectivityError::Busy));
}

#[test]
fn revision_advances_on_transitions() {
    let mut h = Harness::with_saved_network();
    h.radio.succeed_from = Some(1);
    let initial = h.manager.status().revision;
    h.start();
    h.step();
    assert!(h.manager.status().revision > initial);
}

#[test]
fn credentials_are_validated() {
    assert_eq!(WifiCredentials::new("", "whatever1"), Err(CredentialsError::EmptySsid));
    assert_eq!(
        WifiCredentials::new(&"s".repeat(33), ""),
        Err(CredentialsError::SsidTooLong)
    );
    assert_eq!(
        WifiCredentials::new("cafe", "short"),
        Err(CredentialsError::PasswordTooShort)
    );
    assert_eq!(
        WifiCredentials::new("cafe", &"p".repeat(65)),
        Err(CredentialsError::PasswordTooLong)
    );
    assert!(WifiCredentials::new("cafe", "").unwrap().is_open());
    assert!(!home().is_open());
}

#[test]
fn driver_disconnect_during_join_fails_the_attempt() {
    assert_eq!(
        LinkStatus::classify(Association::Dropped, None, Some(STALE_DISCONNECT_MS)),
        LinkStatus::Failed
    );
    // Too early to tell it apart from the previous attempt's disconnect.
    assert_eq!(
        LinkStatus::classify(Association::Dropped, None, Some(STALE_DISCONNECT_MS - 1)),
        LinkStatus::Connecting
    );
    assert_eq!(
        LinkStatus::classify(Association::Dropped, None, None),
        LinkStatus::Down
    );
}

#[test]
fn association_waits_for_a_lease() {
    assert_eq!(
        LinkStatus::classify(Association::Associated, None, Some(500)),
        LinkStatus::Connecting
    );
    assert_eq!(
        LinkStatus::classify(Association::Associated, Some(STATION_IP), None),
        LinkStatus::Up(STATION_IP)
    );
    assert_eq!(
        LinkStatus::classify(Association::Pending, None, Some(40_000)),
        LinkStatus::Connecting
    );
    assert_eq!(
        LinkStatus::classify(Association::Pending, None, None),
        LinkStatus::Down
    );
}
