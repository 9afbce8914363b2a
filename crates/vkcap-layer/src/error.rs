use ash::vk;
use vkcap_core::{HandleKey, HandleType};

/// The handle table disagrees with the call stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("{op}: {key} is already tracked")]
    AlreadyTracked { key: HandleKey, op: &'static str },

    #[error("{op}: {key} is not tracked")]
    NotTracked { key: HandleKey, op: &'static str },

    #[error("{op}: expected a {expected} handle, replay queue holds {found}")]
    UnexpectedType {
        expected: HandleType,
        found: HandleKey,
        op: &'static str,
    },
}

impl TrackingError {
    /// Re-attribute the error to the intercepted call that triggered it.
    pub fn with_op(self, call: &'static str) -> Self {
        match self {
            TrackingError::AlreadyTracked { key, .. } => {
                TrackingError::AlreadyTracked { key, op: call }
            }
            TrackingError::NotTracked { key, .. } => TrackingError::NotTracked { key, op: call },
            TrackingError::UnexpectedType {
                expected, found, ..
            } => TrackingError::UnexpectedType {
                expected,
                found,
                op: call,
            },
        }
    }

    pub fn key(&self) -> HandleKey {
        match self {
            TrackingError::AlreadyTracked { key, .. } | TrackingError::NotTracked { key, .. } => {
                *key
            }
            TrackingError::UnexpectedType { found, .. } => *found,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloneError {
    #[error("unrecognized extension structure {0:?} in p_next chain")]
    UnknownExtension(vk::StructureType),

    #[error("shader code size {0} is not a multiple of 4")]
    CodeSizeNotAligned(usize),
}

impl From<CloneError> for vk::Result {
    fn from(err: CloneError) -> Self {
        match err {
            CloneError::UnknownExtension(_) => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            CloneError::CodeSizeNotAligned(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),
}
