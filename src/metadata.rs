//! Plain value types describing a call: method, headers and options.
//! 描述一次调用的值类型：方法、头部与选项。

use std::time::Duration;

/// Request or response headers, kept in insertion order.
///
/// Names are stored lowercase. A name may appear more than once.
///
/// 请求或响应头部，保持插入顺序。名称以小写存储，同一名称可出现多次。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Returns the first value stored under `name`.
    /// 返回 `name` 下的第一个值。
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// Identifies the remote method a stream invokes.
/// 标识流所调用的远程方法。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    full_name: String,
}

impl MethodDescriptor {
    /// `full_name` is `package.Service/Method`.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The request path, `/package.Service/Method`.
    /// 请求路径。
    pub fn path(&self) -> String {
        format!("/{}", self.full_name)
    }
}

/// Per-call options.
/// 单次调用的选项。
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the transport's authority for this call.
    pub authority: Option<String>,
    /// Remaining time budget, sent to the server as `grpc-timeout`.
    pub timeout: Option<Duration>,
}
