//! Ready-made capture and replay chains built from configuration.

use std::sync::Arc;

use tracing::info;
use vkcap_core::config::{CaptureConfig, ReplayConfig};
use vkcap_core::{CoreError, HandleKey};

use crate::call_trace::CallTrace;
use crate::chain::{Chain, ChainBuilder};
use crate::handle_table::HandleTable;
use crate::keys::TrackedHandle;
use crate::remap::{HandleRemapper, RemapTable};
use crate::snapshot::ObjectRecord;
use crate::surface::Dispatch;
use crate::tracker::{Tracker, TrackerPolicy};

/// Capture side: `[call trace] -> tracker -> driver`.
pub struct CaptureSession {
    chain: Chain,
    table: Arc<HandleTable>,
}

impl CaptureSession {
    pub fn new(config: &CaptureConfig, driver: Arc<dyn Dispatch>) -> Result<Self, CoreError> {
        let tracked = config.tracked_types()?;
        let table = Arc::new(HandleTable::new());
        let policy = TrackerPolicy {
            unknown_extensions: config.unknown_extensions,
            on_desync: config.on_desync,
        };

        let mut builder = ChainBuilder::new();
        if config.trace_calls {
            builder = builder.with(CallTrace::new());
        }
        let chain = builder
            .with(Tracker::new(table.clone(), tracked, policy))
            .build(driver);

        info!(
            "capture session ready: {} tracked handle types, {} transforms",
            tracked.types().count(),
            chain.depth()
        );
        Ok(Self { chain, table })
    }

    /// Entry point the application's calls go through.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    pub fn live_objects(&self) -> Vec<ObjectRecord> {
        self.table.live_objects()
    }
}

/// Replay side: `remapper -> driver`.
pub struct ReplaySession {
    chain: Chain,
    remapper: Arc<HandleRemapper>,
}

impl ReplaySession {
    pub fn new(config: &ReplayConfig, driver: Arc<dyn Dispatch>) -> Result<Self, CoreError> {
        let tracked = config.tracked_types()?;
        let remap = Arc::new(RemapTable::new());
        let remapper = Arc::new(HandleRemapper::new(remap, tracked, config.on_desync));
        let chain = ChainBuilder::new().with(remapper.clone()).build(driver);

        info!(
            "replay session ready: {} remapped handle types",
            tracked.types().count()
        );
        Ok(Self { chain, remapper })
    }

    /// Entry point the trace's calls go through.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Queue the handle the next producing call returned at capture time.
    pub fn expect<H: TrackedHandle>(&self, trace: H) {
        self.remapper.expect(trace);
    }

    pub fn expect_key(&self, trace: HandleKey) {
        self.remapper.expect_key(trace);
    }

    pub fn remap(&self) -> &Arc<RemapTable> {
        self.remapper.remap()
    }

    pub fn remapper(&self) -> &Arc<HandleRemapper> {
        &self.remapper
    }
}
