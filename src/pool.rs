use std::future::Future;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::backend::DbInterface;
use crate::error::{DbError, DbErrorCode, DbResult};

/// Bounded set of pre-connected storage instances.
///
/// Instances are filled once, handed out with [`acquire`](Self::acquire) and
/// given back with [`release`](Self::release). An empty pool fails fast with
/// `ConnectionPoolExhausted` instead of waiting.
#[derive(Default)]
pub struct DbInterfacePool {
    idle: Mutex<Vec<Box<dyn DbInterface>>>,
}

impl DbInterfacePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `size` instances with `factory` and add them to the pool.
    ///
    /// Either all instances are added or none: when one creation fails the
    /// ones already built are disconnected and the error is returned.
    pub async fn fill<F, Fut>(&self, size: usize, mut factory: F) -> DbResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<Box<dyn DbInterface>>>,
    {
        let mut created = Vec::with_capacity(size);
        for _ in 0..size {
            match factory().await {
                Ok(instance) => created.push(instance),
                Err(e) => {
                    warn!(created = created.len(), requested = size, error = %e, "Pool fill failed");
                    for mut instance in created {
                        if let Err(close_error) = instance.drop_connect().await {
                            warn!(error = %close_error, "Failed to close pooled instance");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let total = {
            let mut idle = self.idle.lock()?;
            idle.extend(created);
            idle.len()
        };
        info!(added = size, total, "Pool filled");
        Ok(())
    }

    /// Take an idle instance.
    pub fn acquire(&self) -> DbResult<Box<dyn DbInterface>> {
        self.idle.lock()?.pop().ok_or_else(|| {
            DbError::connection(
                DbErrorCode::ConnectionPoolExhausted,
                "No idle connection in the pool",
            )
        })
    }

    /// Give an instance back. Disconnected instances are discarded.
    pub fn release(&self, instance: Box<dyn DbInterface>) -> DbResult<()> {
        if !instance.is_connected() {
            warn!("Discarding released instance with a closed connection");
            return Ok(());
        }
        if instance.is_transaction_in_progress() {
            warn!("Released instance still has an open transaction");
        }
        self.idle.lock()?.push(instance);
        Ok(())
    }

    /// Disconnect and drop every idle instance.
    pub async fn clear(&self) -> DbResult<()> {
        let drained: Vec<Box<dyn DbInterface>> = std::mem::take(&mut *self.idle.lock()?);
        let count = drained.len();
        let mut first_error = None;
        for mut instance in drained {
            if let Err(e) = instance.drop_connect().await {
                warn!(error = %e, "Failed to close pooled instance");
                first_error.get_or_insert(e);
            }
        }
        info!(closed = count, "Pool cleared");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of idle instances.
    pub fn len(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
