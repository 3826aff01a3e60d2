//! Process lifecycle: OS signals and cancellation wiring

mod shutdown;

pub use shutdown::ShutdownSignal;
