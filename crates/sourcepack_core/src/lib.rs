//! Sourcepack Core - Load aggregation for groups of data sources
//!
//! This crate groups independently loading data sources into packs that
//! expose one derived load status, fire a readiness notification when the
//! whole group is usable, and drive loading across the group with bounded
//! concurrency and cooperative cancellation.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod fan_out;
pub mod pack;
pub mod registry;
pub mod source;

#[cfg(test)]
pub mod test_helpers;

pub use aggregate::{AggregateStatus, MemberSnapshot, PackState, aggregate};
pub use config::{PackConfig, load_config, save_config};
pub use error::{ConfigError, CoreError, LoadError, Result};
pub use fan_out::{DEFAULT_CONCURRENCY, concurrency_limit, set_concurrency_limit, when_all_bounded};
pub use pack::{ReadyEvent, SourcePack, SourcePackBuilder};
pub use registry::{
    DEFAULT_FORCED_KEYS, EmptyRegistry, FAVORITES_KEY, InMemoryRegistry, RECENT_KEY,
    SourceRegistry,
};
pub use source::{
    Source, SourceChange, SourceListener, SourceState, SourceStatus, SubscriptionId,
};

pub mod prelude {
    pub use crate::{
        AggregateStatus, CoreError, LoadError, PackConfig, PackState, ReadyEvent, Result, Source,
        SourcePack, SourceRegistry, SourceState, SourceStatus,
    };
}
