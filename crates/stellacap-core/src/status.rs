use std::collections::BTreeMap;
use std::fmt::Display;

/// Severity of an operation outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusLevel {
    Success,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Tagged result returned by the public orchestration entry points.
///
/// A `Warning` still counts as completed: the operation ran but some part
/// of it was skipped or degraded. `details` carries structured context for
/// status reports.
#[derive(Clone, Debug)]
pub struct Status<T = ()> {
    pub level: StatusLevel,
    pub message: String,
    pub data: Option<T>,
    pub details: BTreeMap<String, String>,
}

impl<T> Status<T> {
    fn with_level(level: StatusLevel, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            level,
            message: message.into(),
            data,
            details: BTreeMap::new(),
        }
    }

    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self::with_level(StatusLevel::Success, message, Some(data))
    }

    pub fn warning(message: impl Into<String>, data: Option<T>) -> Self {
        Self::with_level(StatusLevel::Warning, message, data)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(StatusLevel::Error, message, None)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::with_level(StatusLevel::Critical, message, None)
    }

    pub fn with_detail(mut self, key: &str, value: impl Display) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.level == StatusLevel::Success
    }

    /// True for `Success` and `Warning`.
    pub fn is_ok(&self) -> bool {
        self.level <= StatusLevel::Warning
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Status<U> {
        Status {
            level: self.level,
            message: self.message,
            data: self.data.map(f),
            details: self.details,
        }
    }
}

impl Status<()> {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::success(message, ())
    }
}
