// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Access guard: a named binary semaphore that excludes other register
// accessors while one request is answered, plus a health counter that turns
// sustained contention into a fatal error.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::semaphore::IpcSemaphore;

/// Longest wait for the semaphore per request.
pub const GUARD_TIMEOUT: Duration = Duration::from_millis(100);

/// Added to the health counter when the semaphore could not be acquired.
pub const FAIL_INCREMENT: u32 = 10;

/// Subtracted from the health counter when the semaphore was acquired.
pub const SUCCESS_DECREMENT: u32 = 1;

/// Health counter value at which the guard gives up.
pub const HEALTH_MAX: u32 = 1000;

/// Tuning of the guard. The defaults are the constants above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardPolicy {
    pub timeout: Duration,
    pub fail_increment: u32,
    pub success_decrement: u32,
    pub max: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            timeout: GUARD_TIMEOUT,
            fail_increment: FAIL_INCREMENT,
            success_decrement: SUCCESS_DECREMENT,
            max: HEALTH_MAX,
        }
    }
}

impl GuardPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 || self.fail_increment == 0 {
            return Err(Error::InvalidArgument(
                "guard policy needs a non-zero maximum and failure increment".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Counter is zero.
    Healthy,
    /// Some recent contention, still below the maximum.
    Degraded,
    /// Maximum reached. Terminal.
    Fatal,
}

/// Contention score in `[0, max]`: rises by `fail_increment` per timeout,
/// falls by `success_decrement` per success, floored at 0 and capped at
/// `max`. Once `max` is reached the counter no longer moves.
#[derive(Debug, Clone, Copy)]
pub struct HealthCounter {
    value: u32,
    fail_increment: u32,
    success_decrement: u32,
    max: u32,
}

impl HealthCounter {
    pub fn new(policy: &GuardPolicy) -> Self {
        Self {
            value: 0,
            fail_increment: policy.fail_increment,
            success_decrement: policy.success_decrement,
            max: policy.max,
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn state(&self) -> HealthState {
        match self.value {
            0 => HealthState::Healthy,
            v if v >= self.max => HealthState::Fatal,
            _ => HealthState::Degraded,
        }
    }

    pub fn record_success(&mut self) -> HealthState {
        if self.state() != HealthState::Fatal {
            self.value = self.value.saturating_sub(self.success_decrement);
        }
        self.state()
    }

    pub fn record_failure(&mut self) -> HealthState {
        self.value = self.value.saturating_add(self.fail_increment).min(self.max);
        self.state()
    }
}

/// Result of one bounded acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    TimedOut,
}

/// Cross-process exclusion around reply generation.
pub struct AccessGuard {
    sem: IpcSemaphore,
    policy: GuardPolicy,
    health: HealthCounter,
    held: bool,
}

impl AccessGuard {
    /// Create the semaphore `name` with a count of one.
    ///
    /// Fails with `AlreadyExists` if the name is taken, unless `force`.
    pub fn enable(name: &str, force: bool) -> Result<Self> {
        Self::with_policy(name, force, GuardPolicy::default())
    }

    pub fn with_policy(name: &str, force: bool, policy: GuardPolicy) -> Result<Self> {
        policy.validate()?;
        let sem = IpcSemaphore::create(name, 1, force)?;
        log::info!("semaphore '{name}' created");
        Ok(Self::from_semaphore(sem, policy))
    }

    /// Share a semaphore another process created.
    pub fn join(name: &str, policy: GuardPolicy) -> Result<Self> {
        policy.validate()?;
        let sem = IpcSemaphore::open(name)?;
        Ok(Self::from_semaphore(sem, policy))
    }

    fn from_semaphore(sem: IpcSemaphore, policy: GuardPolicy) -> Self {
        Self {
            sem,
            health: HealthCounter::new(&policy),
            policy,
            held: false,
        }
    }

    pub fn name(&self) -> &str {
        self.sem.name()
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    pub fn health(&self) -> u32 {
        self.health.value()
    }

    pub fn state(&self) -> HealthState {
        self.health.state()
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Take the semaphore, waiting at most the policy timeout.
    ///
    /// A timeout is reported as `Ok(TimedOut)` until the health counter
    /// reaches its maximum; from then on every call fails with
    /// `GuardEscalated` without touching the semaphore.
    pub fn try_acquire(&mut self) -> Result<Acquisition> {
        if self.health.state() == HealthState::Fatal {
            return Err(Error::GuardEscalated(self.name().to_string()));
        }
        if self.held {
            return Ok(Acquisition::Acquired);
        }

        if self.sem.wait(self.policy.timeout)? {
            self.held = true;
            self.health.record_success();
            return Ok(Acquisition::Acquired);
        }

        log::warn!(
            "failed to acquire semaphore '{}' within {}ms",
            self.name(),
            self.policy.timeout.as_millis()
        );
        match self.health.record_failure() {
            HealthState::Fatal => Err(Error::GuardEscalated(self.name().to_string())),
            _ => Ok(Acquisition::TimedOut),
        }
    }

    /// Post the semaphore if this guard holds it; otherwise do nothing.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        self.sem.post()
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("{e}");
        }
    }
}
