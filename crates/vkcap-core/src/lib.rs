pub mod config;
pub mod error;
pub mod handle;

pub use config::{DesyncPolicy, UnknownExtensionPolicy, VkcapConfig};
pub use error::CoreError;
pub use handle::{HandleKey, HandleType, TrackedTypes};
