//! Loaded instances and in-flight leases.
//!
//! A registry caches one [`Instance`] per loaded id. Every call goes through
//! a [`Lease`], which counts in-flight work. When recycling evicts an
//! instance it is *retired*; `destroy` then runs exactly once, either right
//! away or when the last lease drops.
//!
//! ```text
//! live ──retire()──► retired ──in_flight == 0──► destroyed
//!  ▲                    │
//!  └── lease() ─────────┘ (leases taken before eviction finish normally)
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use steward_store::Store;
use tracing::{debug, error, info};

use super::{BoxedExtension, Invocation};
use crate::error::{ExtensionError, ExtensionResult};

/// A cached extension plus its lifecycle counters.
pub struct Instance {
    extension: BoxedExtension,
    store: Store,
    in_flight: AtomicUsize,
    retired: AtomicBool,
    destroyed: AtomicBool,
}

impl Instance {
    pub(crate) fn new(extension: BoxedExtension, store: Store) -> Arc<Self> {
        Arc::new(Self {
            extension,
            store,
            in_flight: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn extension(&self) -> &BoxedExtension {
        &self.extension
    }

    /// Number of calls currently running against this instance.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Takes a lease for one call.
    pub fn lease(self: &Arc<Self>) -> Lease {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Lease {
            instance: Arc::clone(self),
        }
    }

    /// Marks the instance as evicted. Destroys it now if nothing is running.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.destroy_once();
        } else {
            debug!(
                extension = %self.extension.id(),
                in_flight = self.in_flight(),
                "Destroy deferred until in-flight calls finish"
            );
        }
    }

    fn destroy_once(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self.extension.id();
        match self.extension.destroy(&self.store) {
            Ok(()) => info!(extension = %id, "Extension destroyed"),
            Err(e) => error!(extension = %id, error = %e, "Extension destroy failed"),
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.extension.id())
            .field("in_flight", &self.in_flight())
            .field("retired", &self.retired.load(Ordering::SeqCst))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// =============================================================================
// Lease
// =============================================================================

/// Keeps an instance alive and counted for the duration of one call.
#[derive(Debug)]
pub struct Lease {
    instance: Arc<Instance>,
}

impl Lease {
    pub fn extension(&self) -> &BoxedExtension {
        &self.instance.extension
    }

    pub fn id(&self) -> &str {
        self.instance.extension.id()
    }

    /// Runs `handle` behind a panic boundary.
    ///
    /// A panic inside the extension becomes [`ExtensionError::RuntimeFault`].
    pub async fn invoke(&self, invocation: Arc<Invocation>) -> ExtensionResult<bool> {
        let call = self.instance.extension.handle(invocation);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(extension = %self.id(), panic = %message, "Extension panicked");
                Err(ExtensionError::fault(self.id(), message))
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let previous = self.instance.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.instance.retired.load(Ordering::SeqCst) {
            self.instance.destroy_once();
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
