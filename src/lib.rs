pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use application::services::{
    ConnectivityMonitor, ConnectivityState, PendingMutationQueue, ReadOptions, ReadResult,
    RequestGateway, SyncReport, WriteOutcome,
};
pub use shared::config::AppConfig;
pub use shared::error::{AppError, Result};
pub use state::SyncState;
