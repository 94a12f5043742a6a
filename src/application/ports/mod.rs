pub mod connectivity;
pub mod key_value_store;
pub mod local_store;
pub mod remote_transport;

pub use connectivity::ConnectivitySignal;
pub use key_value_store::KeyValueStore;
pub use local_store::LocalStructuredStore;
pub use remote_transport::{RawResponse, RemoteTransport, TransportError};
