#![doc = "Deferred-timer attribute module: elapsed-time and command attributes with deferred change notification."]

pub mod attributes;
pub mod clock;
pub mod module;
pub mod notifier;
pub mod platform;
pub mod sysfs;
pub mod timer_state;
pub mod workqueue;

pub use attributes::*;
pub use clock::*;
pub use module::*;
pub use notifier::*;
pub use platform::*;
pub use sysfs::*;
pub use timer_state::*;
pub use workqueue::*;
