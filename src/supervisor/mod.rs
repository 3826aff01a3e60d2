//! Button supervisor
//!
//! Watches GPIO button lines on a listener thread and keeps at most one
//! mode program running, switching on each debounced press.

mod bindings;
mod child;
mod guard;
mod lines;
mod listener;
mod switcher;

pub use bindings::BindingTable;
pub use child::OsLauncher;
pub use guard::PlaybackGuard;
pub use lines::{InputLine, SysfsGpioLine};
pub use listener::ButtonListener;
pub use switcher::{supervise, Supervisor, SupervisorTimings};
