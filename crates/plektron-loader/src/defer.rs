#![forbid(unsafe_code)]

use std::fmt;

/// When a loader pauses its transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeferStrategy {
    /// Never pause. Downgraded to [`CapacityDefer`](Self::CapacityDefer) when
    /// the response cannot be reused from an HTTP cache.
    NeverDefer,
    /// Pause whenever no read is waiting for data.
    ReadThenDefer,
    /// Pause once the forward window is full.
    #[default]
    CapacityDefer,
}

impl fmt::Display for DeferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NeverDefer => "never",
            Self::ReadThenDefer => "read-then-defer",
            Self::CapacityDefer => "capacity",
        };
        f.write_str(name)
    }
}
