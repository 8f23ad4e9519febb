use std::sync::Arc;

use ember_core::{Closure, Instructions};

/// One activation record.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub closure: Arc<Closure>,
    /// Offset of the next instruction to fetch.
    pub ip: usize,
    /// Stack index of the first argument; locals follow it.
    pub base: usize,
}

impl Frame {
    pub fn new(closure: Arc<Closure>, base: usize) -> Self {
        Frame {
            closure,
            ip: 0,
            base,
        }
    }

    pub fn instructions(&self) -> &Instructions {
        &self.closure.func.instructions
    }

    pub fn name(&self) -> &str {
        self.closure.func.display_name()
    }
}
