use core::net::Ipv4Addr;

use log::{info, warn};

use super::{LinkStatus, WifiCredentials, WifiRadio};

/// Delay inserted after a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// `base_ms * 2^(attempt - 1)`, capped at `cap_ms`.
    Exponential { base_ms: u64, cap_ms: u64 },
    Fixed { delay_ms: u64 },
}

impl Backoff {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(self, attempt: u8) -> u64 {
        match self {
            Self::Exponential { base_ms, cap_ms } => {
                // 2, 4, 8, 16, 30, 30, ... with the default plan
                let shift = u32::from(attempt.saturating_sub(1)).min(20);
                base_ms.saturating_mul(1u64 << shift).min(cap_ms)
            }
            Self::Fixed { delay_ms } => delay_ms,
        }
    }
}

/// Bounded series of station connection attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPlan {
    pub max_attempts: u8,
    pub attempt_timeout_ms: u64,
    pub backoff: Backoff,
}

impl RetryPlan {
    pub const fn new(max_attempts: u8, attempt_timeout_ms: u64, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            attempt_timeout_ms,
            backoff,
        }
    }

    pub const fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn with_attempt_timeout_ms(mut self, attempt_timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = attempt_timeout_ms;
        self
    }

    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Upper bound of a full run, backoffs included.
    pub fn worst_case_ms(&self) -> u64 {
        let mut total = 0u64;
        for attempt in 1..=self.max_attempts {
            total = total.saturating_add(self.attempt_timeout_ms);
            if attempt < self.max_attempts {
                total = total.saturating_add(self.backoff.delay_after(attempt));
            }
        }
        total
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryPoll {
    Pending,
    Connected(Ipv4Addr),
    Exhausted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Waiting { attempt: u8, deadline_ms: u64 },
    Backoff { failed: u8, until_ms: u64 },
    Done,
}

/// One in-flight retry series. Never sleeps: every call checks the link once
/// and compares deadlines against the supplied clock.
#[derive(Clone, Debug)]
pub struct RetryRun {
    plan: RetryPlan,
    credentials: WifiCredentials,
    stage: Stage,
}

impl RetryRun {
    /// Launches the first attempt immediately.
    pub fn start<R: WifiRadio>(
        plan: RetryPlan,
        credentials: WifiCredentials,
        radio: &mut R,
        now_ms: u64,
    ) -> (Self, RetryPoll) {
        let mut run = Self {
            plan,
            credentials,
            stage: Stage::Done,
        };
        let first = run.launch(1, radio, now_ms);
        (run, first)
    }

    pub fn credentials(&self) -> &WifiCredentials {
        &self.credentials
    }

    /// Attempt currently running or last failed.
    pub fn attempt(&self) -> u8 {
        match self.stage {
            Stage::Waiting { attempt, .. } => attempt,
            Stage::Backoff { failed, .. } => failed,
            Stage::Done => self.plan.max_attempts,
        }
    }

    pub fn poll<R: WifiRadio>(&mut self, radio: &mut R, now_ms: u64) -> RetryPoll {
        match self.stage {
            Stage::Waiting {
                attempt,
                deadline_ms,
            } => match radio.link_status() {
                LinkStatus::Up(ip) => {
                    info!(
                        "wifi: joined {} on attempt {}/{} ip={}",
                        self.credentials.ssid, attempt, self.plan.max_attempts, ip
                    );
                    self.stage = Stage::Done;
                    RetryPoll::Connected(ip)
                }
                LinkStatus::Failed => self.fail(attempt, radio, now_ms),
                LinkStatus::Connecting | LinkStatus::Down if now_ms >= deadline_ms => {
                    self.fail(attempt, radio, now_ms)
                }
                LinkStatus::Connecting | LinkStatus::Down => RetryPoll::Pending,
            },
            Stage::Backoff { failed, until_ms } => {
                if now_ms < until_ms {
                    return RetryPoll::Pending;
                }
                self.launch(failed.saturating_add(1), radio, now_ms)
            }
            Stage::Done => RetryPoll::Exhausted,
        }
    }

    fn launch<R: WifiRadio>(&mut self, attempt: u8, radio: &mut R, now_ms: u64) -> RetryPoll {
        info!(
            "wifi: attempt {}/{} to join {}",
            attempt, self.plan.max_attempts, self.credentials.ssid
        );
        if let Err(err) = radio.begin_connect(&self.credentials) {
            warn!("wifi: could not start attempt {}: {:?}", attempt, err);
            return self.fail(attempt, radio, now_ms);
        }
        self.stage = Stage::Waiting {
            attempt,
            deadline_ms: now_ms.saturating_add(self.plan.attempt_timeout_ms),
        };
        RetryPoll::Pending
    }

    fn fail<R: WifiRadio>(&mut self, attempt: u8, radio: &mut R, now_ms: u64) -> RetryPoll {
        radio.disconnect();
        if attempt >= self.plan.max_attempts {
            warn!(
                "wifi: attempt {}/{} failed; giving up on {}",
                attempt, self.plan.max_attempts, self.credentials.ssid
            );
            self.stage = Stage::Done;
            return RetryPoll::Exhausted;
        }

        let delay_ms = self.plan.backoff.delay_after(attempt);
        warn!(
            "wifi: attempt {}/{} failed; retrying in {} ms",
            attempt, self.plan.max_attempts, delay_ms
        );
        self.stage = Stage::Backoff {
            failed: attempt,
            until_ms: now_ms.saturating_add(delay_ms),
        };
        RetryPoll::Pending
    }
}
