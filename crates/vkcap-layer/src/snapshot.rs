use std::collections::BTreeMap;

use serde::Serialize;
use vkcap_core::{HandleKey, HandleType};

use crate::shadow::ShadowId;

/// Serializable view of one live object, as enumerated by
/// [`HandleTable::live_objects`](crate::HandleTable::live_objects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub id: ShadowId,
    pub handle_type: HandleType,
    pub handle: u64,
    pub parent: Option<HandleKey>,
    pub create_info: Option<CreateInfoSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_handle: Option<u64>,
}

/// Shape of a recorded create info: root struct plus its extension chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateInfoSummary {
    pub kind: &'static str,
    pub s_type: i32,
    pub extensions: Vec<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_extensions: Vec<i32>,
}

/// Number of live objects per handle type.
pub fn count_by_type(records: &[ObjectRecord]) -> BTreeMap<HandleType, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.handle_type).or_insert(0) += 1;
    }
    counts
}
