pub mod connectivity_monitor;
pub mod drain_lease;
pub mod eviction;
pub mod operation_registry;
pub mod pending_queue;
pub mod request_gateway;

pub use connectivity_monitor::{ConnectivityMonitor, ConnectivityState, ListenerId};
pub use drain_lease::DrainLease;
pub use eviction::EvictionPolicy;
pub use operation_registry::OperationRegistry;
pub use pending_queue::PendingMutationQueue;
pub use request_gateway::{
    IndexQuery, ReadOptions, ReadResult, RequestGateway, SyncReport, SyncTrigger, WriteOutcome,
};
