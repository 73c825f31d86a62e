use std::fmt::Debug;
use std::sync::Arc;

/// A handle to the thread pool that runs goal computations.
///
/// The handle is passed explicitly into every goal constructor and into the
/// workspace builder; there is no ambient dispatcher. By default work lands
/// on the global rayon pool, but any dedicated [`rayon::ThreadPool`] can be
/// supplied instead.
#[derive(Clone, Default)]
pub struct Executor {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Executor {
    /// The global rayon thread pool.
    pub fn global() -> Self {
        Executor { pool: None }
    }

    /// A dedicated thread pool.
    pub fn with_pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Executor { pool: Some(pool) }
    }

    pub(crate) fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }
}

impl Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pool {
            Some(pool) => write!(f, "Executor(pool, {} threads)", pool.current_num_threads()),
            None => write!(f, "Executor(global)"),
        }
    }
}
