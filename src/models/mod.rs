// Domain models: wire snapshot, merged view, view query

mod query;
mod snapshot;
mod view;

pub use query::{SortDirection, SortKey, ViewQuery};
pub use snapshot::{
    AggregateStats, ChannelMessage, DecodeError, FleetSnapshot, JobRow, QUOTA_FLOOR_BYTES,
    SessionRow, SessionStatus,
};
pub use view::FleetView;
