/*!
 * Thread Registry
 *
 * Each rarely-unique mutex owns a [`ThreadRegistry`]: the list of sharing
 * flags of every thread that has ever taken a shared lock on it. Writers
 * scan the list to decide whether all readers have drained.
 *
 * The other side of the relation is a thread-local node map keyed by
 * [`LockId`]. A node owns its thread's flag and a `Weak` reference back to
 * the registry:
 *
 * - **Thread exits first**: the node upgrades the reference and removes its
 *   flag from the registry. If the flag was still set, the registry's
 *   abandon hook hands the lock on to a writer waiting for the drain
 * - **Mutex dropped first**: the upgrade fails and the node touches nothing;
 *   the registry's own destructor released the remaining entries
 *
 * Registry mutation takes the registry's write lock. That happens once per
 * thread per mutex on registration and once at thread exit, never on a
 * lock/unlock call.
 */

use super::flags::SharingFlag;
use crate::core::sync::instrument::Location;
use ahash::RandomState;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Process-unique identity of a rarely-unique mutex
///
/// Identities are never reused, so a stale node can never be mistaken for
/// the node of a newer mutex at the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(u64);

impl LockId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ru-{}", self.0)
    }
}

/// Run against the registry after a thread left with its flag set
type AbandonHook = Box<dyn Fn(&ThreadRegistry) + Send + Sync>;

/// Sharing flags of every thread registered with one mutex
pub(crate) struct ThreadRegistry {
    lock_id: LockId,
    entries: RwLock<Vec<SharingFlag>>,
    on_abandoned: AbandonHook,
}

impl ThreadRegistry {
    pub(crate) fn new(
        lock_id: LockId,
        on_abandoned: impl Fn(&ThreadRegistry) + Send + Sync + 'static,
    ) -> Self {
        Self {
            lock_id,
            entries: RwLock::new(Vec::new()),
            on_abandoned: Box::new(on_abandoned),
        }
    }

    /// Add a flag; without `blocking`, gives up if the write lock is busy
    pub(crate) fn register(&self, flag: &SharingFlag, blocking: bool) -> bool {
        let mut entries = if blocking {
            self.entries.write()
        } else {
            match self.entries.try_write() {
                Some(entries) => entries,
                None => return false,
            }
        };
        entries.push(flag.clone());
        true
    }

    pub(crate) fn deregister(&self, flag: &SharingFlag) {
        let mut entries = self.entries.write();
        if let Some(index) = entries.iter().position(|entry| entry.same_as(flag)) {
            entries.swap_remove(index);
        }
    }

    /// True if no registered flag is set
    ///
    /// Without `blocking`, a busy registry counts as "not clear".
    pub(crate) fn all_clear(&self, blocking: bool) -> bool {
        let entries = if blocking {
            self.entries.read()
        } else {
            match self.entries.try_read() {
                Some(entries) => entries,
                None => return false,
            }
        };
        entries.iter().all(|flag| !flag.is_set())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// A thread exited holding a shared lock; its flag is already cleared
    fn abandoned(&self) {
        (self.on_abandoned)(self);
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        let entries = self.entries.get_mut();
        let stale = entries.iter().filter(|flag| flag.is_set()).count();
        if stale > 0 {
            warn!(
                lock_id = %self.lock_id,
                stale,
                "rarely-unique mutex dropped while shared flags are set"
            );
        }
        for flag in entries.drain(..) {
            flag.set(false);
        }
    }
}

impl fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("lock_id", &self.lock_id)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

/// One thread's membership in one mutex's registry
struct ThreadNode {
    lock_id: LockId,
    flag: SharingFlag,
    owner: Weak<ThreadRegistry>,
    report: fn(Location),
}

impl Drop for ThreadNode {
    fn drop(&mut self) {
        let Some(registry) = self.owner.upgrade() else {
            return;
        };
        let abandoned = self.flag.is_set();
        if abandoned {
            warn!(lock_id = %self.lock_id, "thread exiting while holding a shared lock");
            self.flag.set(false);
        }
        registry.deregister(&self.flag);
        trace!(lock_id = %self.lock_id, "thread node deregistered");
        (self.report)(Location::NodeDeregistered);

        if abandoned {
            // A writer may be waiting for exactly this flag
            (self.report)(Location::NodeAbandoned);
            registry.abandoned();
        }
    }
}

thread_local! {
    static THREAD_NODES: RefCell<HashMap<LockId, ThreadNode, RandomState>> =
        RefCell::new(HashMap::with_hasher(RandomState::new()));
}

/// How to proceed when the calling thread has no node for a mutex yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// Create and register a node, waiting for the registry if necessary
    Blocking,
    /// Create and register a node only if the registry is free right now
    NonBlocking,
    /// Never create a node
    Existing,
}

/// Run `f` with the calling thread's flag for `registry`'s mutex
///
/// Returns `None` if the thread has no node and none could be created:
/// registration was not allowed or was refused, or the thread's node map
/// is already torn down.
pub(crate) fn with_flag<R>(
    registry: &Arc<ThreadRegistry>,
    allocate: fn() -> SharingFlag,
    report: fn(Location),
    registration: Registration,
    f: impl FnOnce(&SharingFlag) -> R,
) -> Option<R> {
    let lock_id = registry.lock_id;
    THREAD_NODES
        .try_with(|nodes| {
            {
                let nodes = nodes.borrow();
                if let Some(node) = nodes.get(&lock_id) {
                    return Some(f(&node.flag));
                }
            }

            if registration == Registration::Existing {
                return None;
            }

            let flag = allocate();
            if !registry.register(&flag, registration == Registration::Blocking) {
                return None;
            }
            trace!(lock_id = %lock_id, "thread node registered");
            report(Location::NodeRegistered);

            {
                let mut nodes = nodes.borrow_mut();
                // Nodes of dropped mutexes are dead weight
                nodes.retain(|_, node| node.owner.strong_count() > 0);
                nodes.insert(
                    lock_id,
                    ThreadNode {
                        lock_id,
                        flag: flag.clone(),
                        owner: Arc::downgrade(registry),
                        report,
                    },
                );
            }
            Some(f(&flag))
        })
        .ok()
        .flatten()
}

#[cfg(test)]
fn node_count() -> usize {
    THREAD_NODES.with(|nodes| nodes.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::locks::rarely_unique::flags::{FlagSupplier, IsolatedFlags};
    use std::thread;

    fn ignore(_: Location) {}

    fn registry() -> Arc<ThreadRegistry> {
        Arc::new(ThreadRegistry::new(LockId::next(), |_| {}))
    }

    #[test]
    fn test_lock_ids_are_unique() {
        let a = LockId::next();
        let b = LockId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", a), format!("ru-{}", a.0));
    }

    #[test]
    fn test_register_and_scan() {
        let registry = registry();
        let a = IsolatedFlags::allocate();
        let b = IsolatedFlags::allocate();
        assert!(registry.register(&a, true));
        assert!(registry.register(&b, false));
        assert_eq!(registry.len(), 2);
        assert!(registry.all_clear(true));

        b.set(true);
        assert!(!registry.all_clear(true));
        assert!(!registry.all_clear(false));

        registry.deregister(&b);
        assert_eq!(registry.len(), 1);
        assert!(registry.all_clear(false));
    }

    #[test]
    fn test_non_blocking_gives_up_on_busy_registry() {
        let registry = registry();
        let flag = IsolatedFlags::allocate();
        let entries = registry.entries.write();
        assert!(!registry.register(&flag, false));
        assert!(!registry.all_clear(false));
        drop(entries);
        assert!(registry.all_clear(false));
    }

    #[test]
    fn test_with_flag_registers_once() {
        let registry = registry();
        let registry_for_thread = registry.clone();
        thread::spawn(move || {
            let registry = registry_for_thread;
            let first = with_flag(&registry, IsolatedFlags::allocate, ignore, Registration::Blocking, |flag| {
                flag.clone()
            });
            let second = with_flag(&registry, IsolatedFlags::allocate, ignore, Registration::Blocking, |flag| {
                flag.clone()
            });
            let (first, second) = (first.unwrap(), second.unwrap());
            assert!(first.same_as(&second));
            assert_eq!(registry.len(), 1);
        })
        .join()
        .unwrap();
        // Node was dropped with its thread
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_existing_never_registers() {
        let registry = registry();
        let outcome = with_flag(&registry, IsolatedFlags::allocate, ignore, Registration::Existing, |_| ());
        assert!(outcome.is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_thread_exit_after_registry_drop() {
        let registry = registry();
        let (registered_tx, registered_rx) = std::sync::mpsc::channel();
        let (dropped_tx, dropped_rx) = std::sync::mpsc::channel::<()>();

        let weak = Arc::downgrade(&registry);
        let registry_for_thread = registry.clone();
        let handle = thread::spawn(move || {
            with_flag(&registry_for_thread, IsolatedFlags::allocate, ignore, Registration::Blocking, |_| ());
            drop(registry_for_thread);
            registered_tx.send(()).unwrap();
            dropped_rx.recv().unwrap();
        });

        registered_rx.recv().unwrap();
        drop(registry);
        assert!(weak.upgrade().is_none());
        dropped_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_dead_nodes_pruned_on_insert() {
        thread::spawn(|| {
            let gone = registry();
            with_flag(&gone, IsolatedFlags::allocate, ignore, Registration::Blocking, |_| ());
            assert_eq!(node_count(), 1);
            drop(gone);

            let live = registry();
            with_flag(&live, IsolatedFlags::allocate, ignore, Registration::Blocking, |_| ());
            assert_eq!(node_count(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_abandoned_flag_runs_hook_once() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook_calls = calls.clone();
        let registry = Arc::new(ThreadRegistry::new(LockId::next(), move |registry| {
            // Flag already cleared and removed when the hook runs
            assert!(registry.all_clear(true));
            hook_calls.fetch_add(1, Ordering::SeqCst);
        }));

        let registry_for_thread = registry.clone();
        thread::spawn(move || {
            with_flag(&registry_for_thread, IsolatedFlags::allocate, ignore, Registration::Blocking, |flag| {
                flag.set(true)
            });
        })
        .join()
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);

        // A clean exit does not run it
        let registry_for_thread = registry.clone();
        thread::spawn(move || {
            with_flag(&registry_for_thread, IsolatedFlags::allocate, ignore, Registration::Blocking, |_| ());
        })
        .join()
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
