use serde::Deserialize;
use std::num::NonZeroU64;
use std::time::Duration;

/// Whole, non-zero number of seconds, as written in the config file
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(from = "NonZeroU64")]
pub struct NonZeroDuration(Duration);

impl NonZeroDuration {
    pub fn from_secs(secs: u64) -> Option<Self> {
        NonZeroU64::new(secs).map(Self::from)
    }

    pub fn get(self) -> Duration {
        self.0
    }
}

impl From<NonZeroU64> for NonZeroDuration {
    fn from(secs: NonZeroU64) -> Self {
        Self(Duration::from_secs(secs.get()))
    }
}

impl From<NonZeroDuration> for Duration {
    fn from(duration: NonZeroDuration) -> Self {
        duration.0
    }
}
