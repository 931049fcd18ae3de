use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;

/// A lazily computed value that is shared by all clones.
///
/// Concurrent callers of [`Cached::get_cached`] wait for the one loader that got
/// there first instead of computing the value twice. A failed load caches nothing.
pub struct Cached<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<Mutex<CachedInner<T>>>,
}

struct CachedInner<T> {
    last_fetched: Option<(Instant, T)>,
    last_accessed: Option<Instant>,
}

impl<T> Clone for Cached<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Cached<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CachedInner {
                last_fetched: None,
                last_accessed: None,
            })),
        }
    }
}

impl<T> Cached<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn get_cached<E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut inner = self.inner.lock();
        inner.last_accessed = Some(Instant::now());

        if let Some((_, value)) = inner.last_fetched.as_ref() {
            return Ok(value.clone());
        }

        // The lock is held while loading, so other callers block on the same load.
        let value = f()?;
        inner.last_fetched = Some((Instant::now(), value.clone()));
        Ok(value)
    }

    /// The cached value, if one was loaded.
    pub fn peek(&self) -> Option<T> {
        self.inner.lock().last_fetched.as_ref().map(|(_, v)| v.clone())
    }

    pub fn is_cached(&self) -> bool {
        self.inner.lock().last_fetched.is_some()
    }

    pub fn last_accessed(&self) -> Option<Instant> {
        self.inner.lock().last_accessed
    }

    /// Drops the value, returning whether there was one.
    pub fn invalidate(&self) -> bool {
        self.inner.lock().last_fetched.take().is_some()
    }
}

impl<T> std::fmt::Debug for Cached<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Cached")
            .field("cached", &inner.last_fetched.is_some())
            .field("last_accessed", &inner.last_accessed)
            .finish()
    }
}
