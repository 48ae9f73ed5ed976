#![forbid(unsafe_code)]

use std::fmt;

/// Transfer state reported by a range loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadingState {
    Loading,
    Deferred,
    Finished,
    Failed,
}

impl LoadingState {
    /// Whether the network is busy in this state.
    pub fn is_downloading(self) -> bool {
        matches!(self, Self::Loading)
    }
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Deferred => "deferred",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Notification published by a source to its host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// Total resource length became known.
    TotalBytes(u64),
    /// `[start, end)` is buffered.
    BufferedRange { start: u64, end: u64 },
    /// Network activity started (`true`) or paused/ended (`false`).
    Downloading(bool),
    /// Raw loader state transition.
    LoadingState(LoadingState),
    /// A read was reissued after a miss or failure.
    Retrying { position: u64, attempt: u32 },
    /// A read completed with a terminal error.
    ReadFailed { position: u64, error: String },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LoadingState::Loading, true, "loading")]
    #[case(LoadingState::Deferred, false, "deferred")]
    #[case(LoadingState::Finished, false, "finished")]
    #[case(LoadingState::Failed, false, "failed")]
    fn loading_state_shape(
        #[case] state: LoadingState,
        #[case] downloading: bool,
        #[case] name: &str,
    ) {
        assert_eq!(state.is_downloading(), downloading);
        assert_eq!(state.to_string(), name);
    }
}
