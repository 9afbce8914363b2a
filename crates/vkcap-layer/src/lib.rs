//! Vulkan call interception layer.
//!
//! Calls enter a [`Chain`] of [`Transform`]s in front of a driver. The
//! capture side puts a [`Tracker`] in the chain, which mirrors every live
//! driver object as a [`Shadow`] in a [`HandleTable`] together with a deep
//! copy of its create info. The replay side puts a [`HandleRemapper`] in the
//! chain, which translates handles recorded at capture time into the handles
//! the live driver hands out.
//!
//! Two drivers terminate a chain: [`VulkanDriver`] over the system loader
//! and [`DryRunDriver`], which fabricates handles without touching a GPU.

mod call_trace;
mod chain;
pub mod clone;
mod driver;
mod dry_run;
pub mod error;
mod handle_table;
mod keys;
mod remap;
mod session;
mod shadow;
mod snapshot;
mod surface;
mod tracker;

pub use call_trace::{CallOutcome, CallTrace, CALL_TARGET};
pub use chain::{Chain, ChainBuilder, Link};
pub use driver::VulkanDriver;
pub use dry_run::DryRunDriver;
pub use error::{CloneError, DriverError, TrackingError};
pub use handle_table::{HandleTable, ShadowMut, ShadowRef};
pub use keys::{is_null, key_of, TrackedHandle};
pub use remap::{HandleRemapper, RemapTable};
pub use session::{CaptureSession, ReplaySession};
pub use shadow::{CreateInfo, ObjectState, Recordable, Shadow, ShadowId};
pub use snapshot::{count_by_type, CreateInfoSummary, ObjectRecord};
pub use surface::{Dispatch, PipelineResult, Transform, ENTRY_POINTS};
pub use tracker::{Tracker, TrackerPolicy};
