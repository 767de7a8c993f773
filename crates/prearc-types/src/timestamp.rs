use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Folder format: `yyyyMMdd_HHmmssSSS`.
const FORMAT: &str = "%Y%m%d_%H%M%S%3f";

/// Millisecond-resolution timestamp that forms the middle component of a
/// staging session's storage path (`<root>/<project>/<timestamp>/<folder>`).
///
/// Ordered chronologically; the textual form sorts the same way.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionTimestamp(NaiveDateTime);

impl SessionTimestamp {
    /// The current wall-clock time, truncated to milliseconds.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from a UTC datetime, truncating to milliseconds.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let naive = at.naive_utc();
        let millis = naive.and_utc().timestamp_millis();
        let truncated = DateTime::from_timestamp_millis(millis)
            .map(|d| d.naive_utc())
            .unwrap_or(naive);
        Self(truncated)
    }

    /// The timestamp one millisecond later. Used to step past a storage
    /// location that is already taken.
    pub fn next(&self) -> Self {
        Self(self.0 + Duration::milliseconds(1))
    }

    /// The folder name for this timestamp.
    pub fn folder_name(&self) -> String {
        self.0.format(FORMAT).to_string()
    }

    /// The underlying naive UTC datetime.
    pub fn as_naive(&self) -> &NaiveDateTime {
        &self.0
    }
}

impl FromStr for SessionTimestamp {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, FORMAT)
            .map(Self)
            .map_err(|_| TypeError::InvalidTimestamp(s.to_string()))
    }
}

impl TryFrom<String> for SessionTimestamp {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionTimestamp> for String {
    fn from(value: SessionTimestamp) -> Self {
        value.folder_name()
    }
}

impl fmt::Debug for SessionTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionTimestamp({})", self.folder_name())
    }
}

impl fmt::Display for SessionTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.folder_name())
    }
}
