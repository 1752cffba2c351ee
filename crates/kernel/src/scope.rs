use std::any::Any;
use std::fmt;

type ReleaseFn = Box<dyn FnOnce() + Send>;

enum Entry {
    Release { label: String, release: ReleaseFn },
    Hold { label: String, value: Box<dyn Any + Send + Sync> },
    Nested(ResourceScope),
}

/// Ownership record with deterministic LIFO teardown.
///
/// Every acquisition is pushed onto a stack together with its release. `close`
/// pops the stack, so releases run in reverse order of acquisition, each
/// exactly once. Dropping an open scope closes it, which makes an early `?`
/// return during construction unwind whatever was acquired so far.
///
/// Held values (buffers that engine objects point into) are dropped at their
/// position in the stack, after everything acquired on top of them.
pub struct ResourceScope {
    name: String,
    entries: Vec<Entry>,
    closed: bool,
}

impl ResourceScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record `handle` with the function that releases it. Returns the handle.
    pub fn acquire<H>(&mut self, handle: H, release: impl FnOnce(H) + Send + 'static) -> H
    where
        H: Copy + Send + fmt::Debug + 'static,
    {
        self.push(Entry::Release {
            label: format!("{handle:?}"),
            release: Box::new(move || release(handle)),
        });
        handle
    }

    /// Record an arbitrary teardown action.
    pub fn defer(&mut self, label: impl Into<String>, release: impl FnOnce() + Send + 'static) {
        self.push(Entry::Release {
            label: label.into(),
            release: Box::new(release),
        });
    }

    /// Keep `value` alive until this point of the stack is unwound.
    pub fn hold<T: Send + Sync + 'static>(&mut self, label: impl Into<String>, value: T) {
        self.push(Entry::Hold {
            label: label.into(),
            value: Box::new(value),
        });
    }

    /// Chain a child scope's teardown into this one.
    pub fn nest(&mut self, child: ResourceScope) {
        self.push(Entry::Nested(child));
    }

    /// Number of entries still waiting for release (nested scopes count as one).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release everything in LIFO order. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let count = self.entries.len();
        while let Some(entry) = self.entries.pop() {
            match entry {
                Entry::Release { label, release } => {
                    tracing::trace!(scope = %self.name, %label, "release");
                    release();
                }
                Entry::Hold { label, value } => {
                    tracing::trace!(scope = %self.name, %label, "drop held value");
                    drop(value);
                }
                Entry::Nested(mut child) => child.close(),
            }
        }
        tracing::debug!(scope = %self.name, entries = count, "scope closed");
    }

    fn push(&mut self, entry: Entry) {
        if self.closed {
            // A closed scope must not swallow a new acquisition: release it right away.
            tracing::warn!(scope = %self.name, "acquisition on closed scope released immediately");
            let mut orphan = ResourceScope::new(format!("{}:orphan", self.name));
            orphan.entries.push(entry);
            orphan.close();
            return;
        }
        self.entries.push(entry);
    }
}

impl fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceScope")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |h| sink.lock().unwrap().push(h))
    }

    #[test]
    fn releases_in_reverse_order() {
        let (log, rec) = recorder();
        let mut scope = ResourceScope::new("test");
        for h in 1..=5u32 {
            let rec = rec.clone();
            scope.acquire(h, move |h| rec(h));
        }
        scope.close();
        assert_eq!(*log.lock().unwrap(), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn close_is_idempotent() {
        let (log, rec) = recorder();
        let mut scope = ResourceScope::new("test");
        scope.acquire(7u32, move |h| rec(h));
        scope.close();
        scope.close();
        drop(scope);
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }

    fn build_partially(rec: impl Fn(u32) + Clone + Send + 'static, fail_at: u32) -> Result<ResourceScope, String> {
        let mut scope = ResourceScope::new("partial");
        for h in 1..=5u32 {
            if h == fail_at {
                return Err(format!("failed acquiring {h}"));
            }
            let rec = rec.clone();
            scope.acquire(h, move |h| rec(h));
        }
        Ok(scope)
    }

    #[test]
    fn partial_construction_unwinds_what_was_acquired() {
        let (log, rec) = recorder();
        let result = build_partially(rec, 4);
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn nested_scope_closes_at_its_position() {
        let (log, rec) = recorder();
        let mut parent = ResourceScope::new("parent");
        let r = rec.clone();
        parent.acquire(1u32, move |h| r(h));

        let mut child = ResourceScope::new("child");
        let r = rec.clone();
        child.acquire(10u32, move |h| r(h));
        let r = rec.clone();
        child.acquire(11u32, move |h| r(h));
        parent.nest(child);

        parent.acquire(2u32, move |h| rec(h));
        parent.close();
        assert_eq!(*log.lock().unwrap(), vec![2, 11, 10, 1]);
    }

    #[test]
    fn held_value_outlives_later_acquisitions() {
        struct Probe(Arc<Mutex<Vec<u32>>>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.lock().unwrap().push(0);
            }
        }

        let (log, rec) = recorder();
        let mut scope = ResourceScope::new("hold");
        scope.hold("buffer", Probe(log.clone()));
        scope.acquire(1u32, move |h| rec(h));
        drop(scope);
        assert_eq!(*log.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn acquisition_after_close_is_released_immediately() {
        let (log, rec) = recorder();
        let mut scope = ResourceScope::new("late");
        scope.close();
        scope.acquire(9u32, move |h| rec(h));
        assert_eq!(*log.lock().unwrap(), vec![9]);
        assert!(scope.is_empty());
    }
}
