//! 统一的状态模型。
//! The uniform status model reported to transport and stream listeners.

use crate::error::Error;
use std::{fmt, sync::Arc};

/// Canonical status codes.
/// 标准状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// The wire name of the code, e.g. `UNAVAILABLE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl Code {
    /// Parses the numeric form carried in `grpc-status`. Unrecognized values
    /// are `Unknown`.
    ///
    /// 解析 `grpc-status` 中携带的数值形式；无法识别的值视为 `Unknown`。
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of an operation: a code, an optional human readable
/// description and an optional underlying cause.
///
/// Statuses compare equal when their code and description match; the cause is
/// diagnostic only.
///
/// 操作的结果：状态码、可选的描述以及可选的底层原因。
/// 状态码与描述相同即视为相等；原因仅用于诊断。
#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    description: Option<String>,
    cause: Option<Arc<Error>>,
}

impl Status {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            description: None,
            cause: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok)
    }

    pub fn cancelled(description: impl Into<String>) -> Self {
        Self::new(Code::Cancelled).with_description(description)
    }

    pub fn unknown(description: impl Into<String>) -> Self {
        Self::new(Code::Unknown).with_description(description)
    }

    pub fn unavailable(description: impl Into<String>) -> Self {
        Self::new(Code::Unavailable).with_description(description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(Code::Internal).with_description(description)
    }

    pub fn failed_precondition(description: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition).with_description(description)
    }

    pub fn resource_exhausted(description: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted).with_description(description)
    }

    /// Replaces the description.
    /// 替换描述。
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches the underlying cause.
    /// 附加底层原因。
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Appends a detail line to the description, or uses it as the
    /// description when there is none yet.
    ///
    /// 向描述追加一行细节；若尚无描述，则直接作为描述。
    pub fn augment_description(mut self, detail: &str) -> Self {
        self.description = Some(match self.description.take() {
            Some(existing) => format!("{existing}\n{detail}"),
            None => detail.to_string(),
        });
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Maps an arbitrary failure cause to a status.
    ///
    /// Errors that already carry a status are unwrapped, I/O and closed
    /// channels become `UNAVAILABLE`, framing violations become `INTERNAL`.
    /// Anything else is `UNKNOWN`. The error is kept as the cause.
    ///
    /// 将任意失败原因映射为状态。
    pub fn from_error(error: Error) -> Self {
        match error {
            Error::Status(status) => status,
            Error::Io(_) | Error::Bind(..) => {
                Status::unavailable("io exception").with_cause(error)
            }
            Error::ChannelClosed | Error::ConnectTimeout | Error::EventLoopShutdown => {
                Status::new(Code::Unavailable).with_cause(error)
            }
            Error::Protocol(_) => Status::new(Code::Internal).with_cause(error),
            Error::NotStarted => Status::failed_precondition(error.to_string()).with_cause(error),
            other => Status::new(Code::Unknown).with_cause(other),
        }
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.description == other.description
    }
}

impl Eq for Status {}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn augment_appends_a_line() {
        let status = Status::unavailable("connection lost").augment_description("connect");
        assert_eq!(status.description(), Some("connection lost\nconnect"));

        let bare = Status::new(Code::Unknown).augment_description("register");
        assert_eq!(bare.description(), Some("register"));
    }

    #[test]
    fn io_errors_map_to_unavailable_with_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let status = Status::from_error(Error::Io(io));
        assert_eq!(status.code(), Code::Unavailable);
        assert!(matches!(status.cause(), Some(Error::Io(_))));
    }

    #[test]
    fn carried_status_is_unwrapped() {
        let inner = Status::cancelled("caller gave up");
        let status = Status::from_error(Error::Status(inner.clone()));
        assert_eq!(status, inner);
        assert!(status.cause().is_none());
    }

    #[test]
    fn protocol_errors_are_internal() {
        let status = Status::from_error(Error::Protocol("bad frame".into()));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(Status::from_error(Error::AlreadyStarted).code(), Code::Unknown);
    }

    #[test]
    fn not_started_is_a_failed_precondition() {
        let status = Status::from_error(Error::NotStarted);
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(status.description(), Some("Transport has not been started"));
        assert!(matches!(status.cause(), Some(Error::NotStarted)));
    }

    #[test]
    fn equality_ignores_cause() {
        let a = Status::unavailable("gone").with_cause(Error::ChannelClosed);
        let b = Status::unavailable("gone");
        assert_eq!(a, b);
        assert_ne!(a, Status::unavailable("other"));
    }
}
