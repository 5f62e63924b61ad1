use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

const UNITS: &[(&str, u64)] = &[("day", 86_400), ("hour", 3_600), ("minute", 60), ("second", 1)];

/// Longest accepted window (366 days). Keeps millisecond and TTL arithmetic
/// far away from overflow.
pub const MAX_WINDOW_SECS: u64 = 366 * 86_400;

/// One `(count, window)` pair: at most `limit` hits per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quota {
    limit: u64,
    window_secs: u64,
}

impl Quota {
    pub fn new(limit: u64, window: Duration) -> Result<Self, PolicyError> {
        if limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        let window_secs = window.as_secs();
        if window_secs == 0 || window_secs > MAX_WINDOW_SECS || window.subsec_nanos() != 0 {
            return Err(PolicyError::InvalidWindow(window));
        }
        Ok(Self { limit, window_secs })
    }

    pub const fn per_second(limit: u64) -> Self {
        Self {
            limit,
            window_secs: 1,
        }
    }

    pub const fn per_minute(limit: u64) -> Self {
        Self {
            limit,
            window_secs: 60,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    fn window_millis(&self) -> i64 {
        self.window_secs as i64 * 1_000
    }

    /// Index of the fixed window containing `now_millis`. Windows are aligned
    /// to the Unix epoch so every process agrees on boundaries.
    pub fn window_index(&self, now_millis: i64) -> i64 {
        now_millis.div_euclid(self.window_millis())
    }

    /// Time left until the window containing `now_millis` closes.
    pub fn remaining_in_window(&self, now_millis: i64) -> Duration {
        let end = (self.window_index(now_millis) + 1) * self.window_millis();
        Duration::from_millis((end - now_millis).max(0) as u64)
    }

    fn parse(raw: &str) -> Result<Self, PolicyError> {
        let invalid = || PolicyError::InvalidQuota(raw.to_string());
        let normalized = raw.trim().to_ascii_lowercase();

        let (count, period) = match normalized.split_once('/') {
            Some((count, period)) => (count.trim(), period.trim()),
            None => {
                let (count, rest) = normalized.split_once(" per ").ok_or_else(invalid)?;
                (count.trim(), rest.trim())
            }
        };
        let limit: u64 = count.parse().map_err(|_| invalid())?;

        let mut words = period.split_whitespace();
        let first = words.next().ok_or_else(invalid)?;
        let (multiplier, unit) = match first.parse::<u64>() {
            Ok(multiplier) => (multiplier, words.next().ok_or_else(invalid)?),
            Err(_) => (1, first),
        };
        if words.next().is_some() {
            return Err(invalid());
        }

        let singular = unit.strip_suffix('s').unwrap_or(unit);
        let unit_secs = UNITS
            .iter()
            .find(|(name, _)| *name == singular)
            .map(|(_, secs)| *secs)
            .ok_or_else(|| PolicyError::UnknownUnit(unit.to_string()))?;

        let window_secs = multiplier.checked_mul(unit_secs).ok_or_else(invalid)?;
        Self::new(limit, Duration::from_secs(window_secs))
    }
}

impl fmt::Display for Quota {
    /// Renders as `10 per 1 second`, `100 per 1 minute`, `5 per 30 seconds`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, secs) = UNITS
            .iter()
            .find(|(_, secs)| self.window_secs % secs == 0)
            .copied()
            .unwrap_or(("second", 1));
        let amount = self.window_secs / secs;
        let plural = if amount == 1 { "" } else { "s" };
        write!(f, "{} per {} {}{}", self.limit, amount, name, plural)
    }
}

/// Ordered set of quotas that must all hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    quotas: Vec<Quota>,
}

impl RateLimitPolicy {
    pub fn new(quotas: Vec<Quota>) -> Result<Self, PolicyError> {
        if quotas.is_empty() {
            return Err(PolicyError::Empty);
        }
        Ok(Self { quotas })
    }

    pub fn quotas(&self) -> &[Quota] {
        &self.quotas
    }

    /// Longest window in the policy, used to size bucket expiry.
    pub fn longest_window(&self) -> Duration {
        self.quotas
            .iter()
            .map(Quota::window)
            .max()
            .unwrap_or(Duration::from_secs(1))
    }
}

impl Default for RateLimitPolicy {
    /// `100 per minute;10 per second`.
    fn default() -> Self {
        Self {
            quotas: vec![Quota::per_minute(100), Quota::per_second(10)],
        }
    }
}

impl FromStr for RateLimitPolicy {
    type Err = PolicyError;

    /// Parses `"100 per minute;10 per second"`, `"100/minute, 10/second"` or
    /// `"5 per 30 seconds"`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let quotas = raw
            .split([';', ','])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(Quota::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(quotas)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rate limit policy needs at least one quota")]
    Empty,
    #[error("cannot parse rate limit `{0}`")]
    InvalidQuota(String),
    #[error("unknown rate limit unit `{0}`")]
    UnknownUnit(String),
    #[error("rate limit count must be greater than zero")]
    ZeroLimit,
    #[error("rate limit window must be a whole number of seconds up to 366 days, got {0:?}")]
    InvalidWindow(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_limiter_strings() {
        let policy: RateLimitPolicy = "100 per minute;10 per second".parse().unwrap();
        assert_eq!(policy.quotas(), &[Quota::per_minute(100), Quota::per_second(10)]);

        let policy: RateLimitPolicy = "100/minute, 10/Second".parse().unwrap();
        assert_eq!(policy.quotas(), &[Quota::per_minute(100), Quota::per_second(10)]);

        let policy: RateLimitPolicy = "5 per 30 seconds; 1000 per 1 day".parse().unwrap();
        assert_eq!(policy.quotas()[0].window(), Duration::from_secs(30));
        assert_eq!(policy.quotas()[1].window(), Duration::from_secs(86_400));
        assert_eq!(policy.longest_window(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!("".parse::<RateLimitPolicy>(), Err(PolicyError::Empty));
        assert!(matches!(
            "ten per second".parse::<RateLimitPolicy>(),
            Err(PolicyError::InvalidQuota(_))
        ));
        assert!(matches!(
            "10 per fortnight".parse::<RateLimitPolicy>(),
            Err(PolicyError::UnknownUnit(_))
        ));
        assert_eq!("0 per second".parse::<RateLimitPolicy>(), Err(PolicyError::ZeroLimit));
        assert!(matches!(
            "10 per 2 3 seconds".parse::<RateLimitPolicy>(),
            Err(PolicyError::InvalidQuota(_))
        ));
    }

    #[test]
    fn rejects_windows_that_would_overflow() {
        assert!(matches!(
            "1 per 300000000000000 days".parse::<RateLimitPolicy>(),
            Err(PolicyError::InvalidQuota(_))
        ));
        assert!(matches!(
            "1 per 400 days".parse::<RateLimitPolicy>(),
            Err(PolicyError::InvalidWindow(_))
        ));
        assert!(matches!(
            Quota::new(1, Duration::from_secs(u64::MAX)),
            Err(PolicyError::InvalidWindow(_))
        ));

        let longest: RateLimitPolicy = "1 per 366 days".parse().unwrap();
        assert_eq!(longest.longest_window(), Duration::from_secs(MAX_WINDOW_SECS));
    }

    #[test]
    fn displays_like_the_limit_strings() {
        assert_eq!(Quota::per_second(10).to_string(), "10 per 1 second");
        assert_eq!(Quota::per_minute(100).to_string(), "100 per 1 minute");
        let quota = Quota::new(5, Duration::from_secs(30)).unwrap();
        assert_eq!(quota.to_string(), "5 per 30 seconds");
    }

    #[test]
    fn windows_align_to_epoch() {
        let quota = Quota::per_minute(100);
        assert_eq!(quota.window_index(0), 0);
        assert_eq!(quota.window_index(59_999), 0);
        assert_eq!(quota.window_index(60_000), 1);
        assert_eq!(
            quota.remaining_in_window(10_000),
            Duration::from_secs(50)
        );
        assert_eq!(
            Quota::per_second(1).remaining_in_window(1_250),
            Duration::from_millis(750)
        );
    }
}
