//! 将写入失败转换为调用方应看到的状态。通道被拆除时，仍在排队的操作会以单纯的
//! “通道已关闭”错误失败；该错误无法说明通道为何消失，因此改为报告关闭时记录的状态。
//!
//! Turns write failures into the status callers should see.
//!
//! When the channel is torn down, anything still queued fails with a bare
//! "channel closed" error. That error says nothing about why the channel went
//! away, so the status recorded at shutdown is reported instead.

use super::lifecycle::LifecycleManager;
use crate::{error::Error, status::Status};

/// 将排队命令的失败映射为状态。
/// Maps the failure of a queued command to a status.
pub fn status_from_failure(cause: Error, lifecycle: &LifecycleManager) -> Status {
    match cause {
        Error::ChannelClosed | Error::StreamsBufferedAtClose => match lifecycle.shutdown_status() {
            Some(status) => status.clone(),
            None => Status::unknown("Channel closed but for unknown reason").with_cause(cause),
        },
        other => Status::from_error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        status::Code,
        transport::{identity::LogId, lifecycle::TransportListener},
    };
    use std::{io, sync::Arc};

    struct Quiet;

    impl TransportListener for Quiet {
        fn on_ready(&self) {}
        fn on_terminated(&self, _status: Status) {}
    }

    fn lifecycle() -> LifecycleManager {
        LifecycleManager::new(LogId::allocate("test"), Arc::new(Quiet))
    }

    #[test]
    fn closed_channel_reports_recorded_shutdown_status() {
        let lifecycle = lifecycle();
        lifecycle.notify_shutdown(Status::cancelled("user cancelled"));

        for cause in [Error::ChannelClosed, Error::StreamsBufferedAtClose] {
            let status = status_from_failure(cause, &lifecycle);
            assert_eq!(status, Status::cancelled("user cancelled"));
        }
    }

    #[test]
    fn closed_channel_without_shutdown_is_unknown() {
        let status = status_from_failure(Error::ChannelClosed, &lifecycle());
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.description(), Some("Channel closed but for unknown reason"));
        assert!(matches!(status.cause(), Some(Error::ChannelClosed)));
    }

    #[test]
    fn other_failures_use_generic_mapping() {
        let lifecycle = lifecycle();
        lifecycle.notify_shutdown(Status::cancelled("ignored"));

        let cause = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let status = status_from_failure(cause, &lifecycle);
        assert_eq!(status.code(), Code::Unavailable);
        assert!(matches!(status.cause(), Some(Error::Io(_))));
    }
}
