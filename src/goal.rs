use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::GoalError;
use crate::executor::Executor;

/// The terminal result of a goal, shared between all awaiters.
pub type Outcome<T> = Result<Arc<T>, GoalError>;

type Compute<T> = Box<dyn FnOnce() -> Outcome<T> + Send>;
type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum State<T> {
    Pending,
    Running,
    Done(Outcome<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    compute: Mutex<Option<Compute<T>>>,
    deps: Vec<DynGoal>,
    /// When false, `deps` are reported through `dependencies()` but the
    /// driver does not execute them; the computation decides what runs.
    drive_deps: bool,
    listeners: Mutex<Vec<Listener<T>>>,
    executor: Executor,
}

impl<T: Send + Sync + 'static> Inner<T> {
    /// Drive this goal to completion on the calling thread.
    ///
    /// The `Pending -> Running` transition is claimed under the state lock,
    /// so exactly one thread executes the computation; every other caller
    /// blocks on the condvar and receives a clone of the same outcome.
    fn drive(&self) -> Outcome<T> {
        {
            let mut state = self.state.lock().unwrap();
            loop {
                let waiting = match &*state {
                    State::Done(outcome) => return outcome.clone(),
                    State::Running => true,
                    State::Pending => {
                        *state = State::Running;
                        false
                    }
                };

                if !waiting {
                    break;
                }
                state = self.done.wait(state).unwrap();
            }
        }

        let mut failure = None;
        if self.drive_deps {
            // Start every dependency first so independent ones can occupy
            // other workers, then join them in order.
            for dep in &self.deps {
                dep.run();
            }
            for dep in &self.deps {
                if let Err(err) = dep.wait() {
                    tracing::debug!("goal dependency failed: {err}");
                    failure = Some(err);
                    break;
                }
            }
        }

        let outcome = match failure {
            Some(err) => Err(err),
            None => {
                let compute = self
                    .compute
                    .lock()
                    .unwrap()
                    .take()
                    .expect("claimed goal has a computation");
                compute()
            }
        };

        self.finish(outcome)
    }

    fn finish(&self, outcome: Outcome<T>) -> Outcome<T> {
        {
            let mut state = self.state.lock().unwrap();
            *state = State::Done(outcome.clone());
        }
        self.done.notify_all();

        let drained = std::mem::take(&mut *self.listeners.lock().unwrap());
        for listener in drained {
            listener(&outcome);
        }

        outcome
    }

    fn cancel(&self) -> bool {
        let claimed = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                State::Pending => {
                    *state = State::Running;
                    true
                }
                _ => false,
            }
        };

        if claimed {
            self.finish(Err(GoalError::Cancelled));
        }
        claimed
    }

    fn peek(&self) -> Option<Outcome<T>> {
        match &*self.state.lock().unwrap() {
            State::Done(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    fn on_complete(&self, listener: Listener<T>) {
        let mut slot = Some(listener);
        let immediate = {
            let mut listeners = self.listeners.lock().unwrap();
            let state = self.state.lock().unwrap();
            match &*state {
                State::Done(outcome) => Some(outcome.clone()),
                _ => {
                    listeners.push(slot.take().expect("listener registered once"));
                    None
                }
            }
        };

        // Registered after completion: fire right away, exactly once.
        if let Some(outcome) = immediate
            && let Some(listener) = slot
        {
            listener(&outcome);
        }
    }
}

/// A memoized, cancellable, dependency-aware unit of computation.
///
/// A goal executes its computation at most once no matter how many times it
/// is run or awaited, caches the outcome, and broadcasts it to listeners.
/// Handles are cheap clones sharing the same underlying state.
pub struct Goal<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Goal<T> {
    fn clone(&self) -> Self {
        Goal {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Goal<T> {
    pub(crate) fn from_parts(
        executor: &Executor,
        deps: Vec<DynGoal>,
        drive_deps: bool,
        compute: Compute<T>,
    ) -> Self {
        Goal {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending),
                done: Condvar::new(),
                compute: Mutex::new(Some(compute)),
                deps,
                drive_deps,
                listeners: Mutex::new(Vec::new()),
                executor: executor.clone(),
            }),
        }
    }

    /// A goal that is already complete. Used for static values.
    pub fn ready(value: T) -> Self {
        Goal {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Done(Ok(Arc::new(value)))),
                done: Condvar::new(),
                compute: Mutex::new(None),
                deps: Vec::new(),
                drive_deps: false,
                listeners: Mutex::new(Vec::new()),
                executor: Executor::global(),
            }),
        }
    }

    /// A goal with no dependencies wrapping a computation.
    pub fn new<F>(executor: &Executor, compute: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Goal::from_parts(
            executor,
            Vec::new(),
            true,
            Box::new(move || compute().map(Arc::new).map_err(GoalError::failed)),
        )
    }

    /// Derive a one-to-one downstream goal.
    ///
    /// The transform runs only after this goal completed successfully; an
    /// upstream failure propagates without re-attempting the upstream
    /// computation.
    pub fn pipe<U, F>(&self, executor: &Executor, transform: F) -> Goal<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> anyhow::Result<U> + Send + 'static,
    {
        let upstream = self.clone();
        Goal::from_parts(
            executor,
            vec![self.erased()],
            true,
            Box::new(move || {
                // The driver already joined the dependency; this returns the
                // cached outcome immediately.
                let input = upstream.wait()?;
                transform(input).map(Arc::new).map_err(GoalError::failed)
            }),
        )
    }

    /// Derive a many-to-one goal from a map of named upstream goals.
    pub fn join<U, F>(executor: &Executor, upstream: BTreeMap<String, Goal<T>>, combine: F) -> Goal<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(BTreeMap<String, Arc<T>>) -> anyhow::Result<U> + Send + 'static,
    {
        let deps = upstream.values().map(Goal::erased).collect();
        Goal::from_parts(
            executor,
            deps,
            true,
            Box::new(move || {
                let mut inputs = BTreeMap::new();
                for (key, goal) in upstream {
                    inputs.insert(key, goal.wait()?);
                }
                combine(inputs).map(Arc::new).map_err(GoalError::failed)
            }),
        )
    }

    /// Trigger execution on the executor and return immediately. Running or
    /// completed goals are unaffected.
    pub fn run(&self) {
        if self.is_done() {
            return;
        }
        let inner = self.inner.clone();
        self.inner.executor.spawn(move || {
            let _ = inner.drive();
        });
    }

    /// Drive the goal to completion on the calling thread and return the
    /// shared outcome.
    pub fn wait(&self) -> Outcome<T> {
        self.inner.drive()
    }

    /// The outcome, if the goal already finished. Never triggers execution.
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.inner.peek()
    }

    pub fn is_done(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// Cancel the goal if its computation has not started yet.
    ///
    /// Returns true when the goal was cancelled; a running or completed goal
    /// is unaffected and false is returned.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// The immediate upstream goals, without forcing execution.
    pub fn dependencies(&self) -> Vec<DynGoal> {
        self.inner.deps.clone()
    }

    /// Register a listener for the terminal outcome. Fires exactly once;
    /// registration after completion fires immediately.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.inner.on_complete(Box::new(listener));
    }

    /// A type-erased handle for dependency declarations.
    pub fn erased(&self) -> DynGoal {
        DynGoal(Arc::new(self.clone()))
    }
}

impl Goal<()> {
    /// A completion group: finishes when every dependency has finished,
    /// failing with the first dependency failure.
    pub fn all(executor: &Executor, deps: impl IntoIterator<Item = DynGoal>) -> Goal<()> {
        Goal::from_parts(
            executor,
            deps.into_iter().collect(),
            true,
            Box::new(|| Ok(Arc::new(()))),
        )
    }
}

trait ErasedGoal: Send + Sync {
    fn start(&self);
    fn join(&self) -> Result<(), GoalError>;
    fn cancel(&self) -> bool;
    fn is_done(&self) -> bool;
    fn dependencies(&self) -> Vec<DynGoal>;
}

impl<T: Send + Sync + 'static> ErasedGoal for Goal<T> {
    fn start(&self) {
        Goal::run(self)
    }

    fn join(&self) -> Result<(), GoalError> {
        self.inner.drive().map(|_| ())
    }

    fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    fn is_done(&self) -> bool {
        self.inner.peek().is_some()
    }

    fn dependencies(&self) -> Vec<DynGoal> {
        self.inner.deps.clone()
    }
}

/// A type-erased, clonable goal handle.
///
/// Used wherever the value type does not matter: dependency lists, cache
/// bookkeeping, completion groups.
#[derive(Clone)]
pub struct DynGoal(Arc<dyn ErasedGoal>);

impl DynGoal {
    /// Trigger execution without waiting.
    pub fn run(&self) {
        self.0.start()
    }

    /// Drive to completion, discarding the value.
    pub fn wait(&self) -> Result<(), GoalError> {
        self.0.join()
    }

    pub fn cancel(&self) -> bool {
        self.0.cancel()
    }

    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    pub fn dependencies(&self) -> Vec<DynGoal> {
        self.0.dependencies()
    }
}

impl std::fmt::Debug for DynGoal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DynGoal(done: {})", self.is_done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ready_goal_is_done() {
        let goal = Goal::ready(42);
        assert!(goal.is_done());
        assert_eq!(*goal.wait().unwrap(), 42);
    }

    #[test]
    fn runs_at_most_once_sequentially() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let goal = Goal::new(&Executor::global(), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });

        assert_eq!(*goal.wait().unwrap(), 7);
        assert_eq!(*goal.wait().unwrap(), 7);
        goal.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_at_most_once_concurrently() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let goal = Goal::new(&Executor::global(), move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            c.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let goal = goal.clone();
                std::thread::spawn(move || *goal.wait().unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pipe_transforms_value() {
        let base = Goal::ready(3);
        let doubled = base.pipe(&Executor::global(), |v| Ok(*v * 2));
        assert_eq!(*doubled.wait().unwrap(), 6);
        assert_eq!(doubled.dependencies().len(), 1);
    }

    #[test]
    fn upstream_failure_propagates_without_retry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let failing = Goal::new(&Executor::global(), move || -> anyhow::Result<i32> {
            c.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("broken input")
        });

        let first = failing.pipe(&Executor::global(), |v| Ok(*v + 1));
        let second = failing.pipe(&Executor::global(), |v| Ok(*v + 2));

        assert!(first.wait().is_err());
        assert!(second.wait().is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn join_combines_named_inputs() {
        let mut upstream = BTreeMap::new();
        upstream.insert("a".to_string(), Goal::ready(1));
        upstream.insert("b".to_string(), Goal::ready(2));

        let sum = Goal::join(&Executor::global(), upstream, |inputs| {
            Ok(inputs.values().map(|v| **v).sum::<i32>())
        });

        assert_eq!(*sum.wait().unwrap(), 3);
        assert_eq!(sum.dependencies().len(), 2);
    }

    #[test]
    fn cancel_pending_prevents_execution() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let goal = Goal::new(&Executor::global(), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        assert!(goal.cancel());
        assert!(matches!(goal.wait(), Err(GoalError::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_completed_is_noop() {
        let goal = Goal::ready(5);
        assert!(!goal.cancel());
        assert_eq!(*goal.wait().unwrap(), 5);
    }

    #[test]
    fn cancelled_dependency_cancels_downstream() {
        let upstream: Goal<i32> = Goal::new(&Executor::global(), || Ok(1));
        let downstream = upstream.pipe(&Executor::global(), |v| Ok(*v + 1));

        upstream.cancel();
        assert!(matches!(downstream.wait(), Err(GoalError::Cancelled)));
    }

    #[test]
    fn listeners_fire_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));

        let goal = Goal::new(&Executor::global(), || Ok(1));
        let h = hits.clone();
        goal.on_complete(move |outcome| {
            assert!(outcome.is_ok());
            h.fetch_add(1, Ordering::SeqCst);
        });

        goal.wait().unwrap();
        goal.wait().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // late registration fires immediately
        let h = hits.clone();
        goal.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn all_waits_for_every_dependency() {
        let a = Goal::ready(1);
        let b = Goal::ready(2);
        let group = Goal::<()>::all(&Executor::global(), [a.erased(), b.erased()]);
        assert!(group.wait().is_ok());
    }
}
