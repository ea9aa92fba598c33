//! Free and exit notifications.
//!
//! Frees arrive out of band from the event stream; an object can be collected without
//! ever appearing in another event. Both notifications are idempotent.

use std::sync::Arc;

use shadowpack::NetReference;
use tracing::debug;
use tracing::trace;

use crate::analysis::AnalysisRegistry;
use crate::heap::ShadowHeap;

#[derive(Debug)]
pub struct LifecycleNotifier {
    heap: Arc<ShadowHeap>,
    exited: bool,
    frees: u64,
}

impl LifecycleNotifier {
    pub fn new(heap: Arc<ShadowHeap>) -> Self {
        Self { heap, exited: false, frees: 0 }
    }

    /// Removes the object from the heap and delivers `on_free` to every analysis.
    ///
    /// Returns false, and does nothing else, if no live object exists for the token.
    pub fn notify_free(&mut self, registry: &mut AnalysisRegistry, token: NetReference) -> bool {
        let Some(object) = self.heap.remove(token) else {
            debug!(token = %token, "free for an object with no live shadow");
            return false;
        };
        trace!(object = %object, "object freed");
        registry.for_each(|analysis| analysis.on_free(&object));
        self.frees += 1;
        true
    }

    /// Delivers `on_exit` to every analysis in installation order, once per session.
    ///
    /// Returns false if exit was already delivered.
    pub fn notify_exit(&mut self, registry: &mut AnalysisRegistry) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;
        registry.for_each(|analysis| analysis.on_exit());
        true
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Number of `on_free` rounds delivered.
    pub fn frees(&self) -> u64 {
        self.frees
    }
}
