pub mod manual_signal;

pub use manual_signal::ManualConnectivitySignal;
