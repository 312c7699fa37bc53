//! Identity of a transport in logs and the attributes it exposes.
//! 传输在日志中的标识以及它对外暴露的属性。

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// A process-unique identifier for log correlation, rendered as `Tag<n>`.
/// 用于日志关联的进程内唯一标识，显示为 `Tag<n>`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogId {
    tag: &'static str,
    id: u64,
}

impl LogId {
    pub fn allocate(tag: &'static str) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            tag,
            id: NEXT.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.tag, self.id)
    }
}

/// Read-only facts about a started transport.
/// 已启动传输的只读信息。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: BTreeMap<&'static str, String>,
}

impl Attributes {
    pub const SCHEME: &'static str = "scheme";
    pub const REMOTE_ADDRESS: &'static str = "remote-address";

    pub(crate) fn insert(&mut self, key: &'static str, value: impl Into<String>) {
        self.entries.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ids_are_unique_and_tagged() {
        let a = LogId::allocate("ClientTransport");
        let b = LogId::allocate("ClientTransport");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("ClientTransport<{}>", a.id()));
    }
}
