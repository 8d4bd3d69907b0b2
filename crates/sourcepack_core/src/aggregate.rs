//! Status aggregation - folds member statuses into one pack state.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::source::{Source, SourceStatus};

/// Status of a pack as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    /// At least one member has not produced data yet
    #[default]
    Waiting,
    /// At least one foreground member is loading
    Loading,
    /// Every member has data (background members may still be refreshing)
    Ready,
    /// At least one member failed and no foreground load is running
    Error,
}

/// Point-in-time view of one member, the aggregator's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub key: String,
    pub status: SourceStatus,
    pub background_loadable: bool,
    pub error: Option<LoadError>,
}

impl MemberSnapshot {
    /// Capture the current state of `source`.
    ///
    /// The error payload is only read for members in `Error`.
    pub fn of(source: &dyn Source) -> Self {
        let status = source.status();
        Self {
            key: source.key().to_string(),
            status,
            background_loadable: source.is_background_loadable(),
            error: match status {
                SourceStatus::Error => source.error(),
                _ => None,
            },
        }
    }
}

/// Derived, externally observable state of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackState {
    pub status: AggregateStatus,
    /// A background-loadable member is loading
    pub background_loading: bool,
    /// Error of the last failed member in scan order
    pub error: Option<LoadError>,
}

impl PackState {
    /// Ready with nothing loading, not even in the background.
    pub fn loading_complete(&self) -> bool {
        self.status == AggregateStatus::Ready && !self.background_loading
    }
}

/// Compute the pack state for a set of member snapshots.
///
/// Priority: foreground `Loading` > `Error` > `Waiting` > `Ready`, with
/// background loading tracked separately. `NotLoaded` members count as
/// waiting. When several members are in `Error`, the one scanned last wins.
/// While a foreground load is running the aggregate is `Loading`, but the
/// recorded error is still exposed.
pub fn aggregate<I>(members: I) -> PackState
where
    I: IntoIterator<Item = MemberSnapshot>,
{
    let mut error = None;
    let mut waiting = false;
    let mut loading = false;
    let mut background = false;

    for member in members {
        match member.status {
            SourceStatus::Loading if member.background_loadable => background = true,
            SourceStatus::Loading => loading = true,
            SourceStatus::Error => {
                error = Some(member.error.unwrap_or_else(|| {
                    LoadError::new(format!("Source {} failed", member.key))
                }));
            }
            SourceStatus::Waiting | SourceStatus::NotLoaded => waiting = true,
            SourceStatus::Ready => {}
        }
    }

    if loading {
        return PackState {
            status: AggregateStatus::Loading,
            background_loading: false,
            error,
        };
    }

    let status = if error.is_some() {
        AggregateStatus::Error
    } else if waiting {
        AggregateStatus::Waiting
    } else {
        AggregateStatus::Ready
    };

    PackState {
        status,
        background_loading: background,
        error,
    }
}
