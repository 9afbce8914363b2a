//! Composition of transforms in front of a driver.

use std::sync::Arc;

use crate::surface::{Dispatch, Transform};

/// One transform bound to its successor.
pub struct Link {
    pub(crate) transform: Box<dyn Transform>,
    pub(crate) next: Arc<dyn Dispatch>,
}

impl Link {
    pub fn new(transform: Box<dyn Transform>, next: Arc<dyn Dispatch>) -> Self {
        Self { transform, next }
    }
}

/// A fixed, ordered chain of transforms ending at a driver.
///
/// Calls enter at the application-side transform. Code a transform runs
/// before delegating sees the call on its way to the driver, code after
/// delegating sees the result on its way back.
pub struct Chain {
    pub(crate) head: Arc<dyn Dispatch>,
    depth: usize,
}

impl Chain {
    /// Number of transforms in front of the driver.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Builds a [`Chain`] in application-to-driver order.
#[derive(Default)]
pub struct ChainBuilder {
    transforms: Vec<Box<dyn Transform>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform on the driver side of those already added.
    pub fn with<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn with_boxed(mut self, transform: Box<dyn Transform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn build(self, driver: Arc<dyn Dispatch>) -> Chain {
        let depth = self.transforms.len();
        let head = self
            .transforms
            .into_iter()
            .rev()
            .fold(driver, |next, transform| {
                Arc::new(Link::new(transform, next)) as Arc<dyn Dispatch>
            });
        Chain { head, depth }
    }
}
