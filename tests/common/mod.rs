/*!
 * Shared Test Support
 *
 * - `Scripted`: instrumentation hooks that log every transition of named
 *   threads and can hold a thread at a location until released
 * - `ScriptedCondvar`: condition variable that reports its waits, panics on
 *   overlapping notifies and can be switched to return spuriously
 * - `init_tracing`: fmt subscriber honouring `RUST_LOG`
 *
 * The script is process-global; tests using it must be `#[serial]`.
 */

#![allow(dead_code)]

use parking_lot::{const_mutex, Condvar, Mutex, MutexGuard};
use shared_locks::{BlockingCondvar, Instrument, Location};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with(tracing_subscriber::fmt::layer().with_test_writer().with_thread_names(true))
            .try_init();
    });
}

struct Script {
    breakpoints: Vec<(String, Location)>,
    parked: Vec<(String, Location)>,
    hits: Vec<(String, Location)>,
}

static SCRIPT: Mutex<Script> = const_mutex(Script {
    breakpoints: Vec::new(),
    parked: Vec::new(),
    hits: Vec::new(),
});
static CHANGED: Condvar = Condvar::new();
static SPURIOUS: AtomicBool = AtomicBool::new(false);

fn wait_changed<F>(script: &mut MutexGuard<'_, Script>, what: &str, mut done: F)
where
    F: FnMut(&Script) -> bool,
{
    let deadline = Instant::now() + SCRIPT_TIMEOUT;
    while !done(&**script) {
        if CHANGED.wait_until(script, deadline).timed_out() && !done(&**script) {
            panic!("script timed out waiting for {what}");
        }
    }
}

/// Clear breakpoints, hit log and spurious mode
pub fn reset() {
    let mut script = SCRIPT.lock();
    script.breakpoints.clear();
    script.parked.clear();
    script.hits.clear();
    SPURIOUS.store(false, Ordering::SeqCst);
    CHANGED.notify_all();
}

/// Hold thread `name` the next time it reaches `location`
pub fn block_at(name: &str, location: Location) {
    SCRIPT.lock().breakpoints.push((name.to_owned(), location));
}

/// Wait until thread `name` is held at `location`
pub fn wait_parked(name: &str, location: Location) {
    let mut script = SCRIPT.lock();
    wait_changed(&mut script, &format!("{name} to park at {location:?}"), |script| {
        script
            .parked
            .iter()
            .any(|(parked, at)| parked == name && *at == location)
    });
}

/// Let thread `name` continue
pub fn release(name: &str) {
    let mut script = SCRIPT.lock();
    script.parked.retain(|(parked, _)| parked != name);
    CHANGED.notify_all();
}

/// Number of times thread `name` passed `location`
pub fn hits(name: &str, location: Location) -> usize {
    SCRIPT
        .lock()
        .hits
        .iter()
        .filter(|(hit, at)| hit == name && *at == location)
        .count()
}

/// Wait until thread `name` passed `location` at least `count` times
pub fn wait_hits(name: &str, location: Location, count: usize) {
    let mut script = SCRIPT.lock();
    wait_changed(&mut script, &format!("{count} hits of {name} at {location:?}"), |script| {
        script
            .hits
            .iter()
            .filter(|(hit, at)| hit == name && *at == location)
            .count()
            >= count
    });
}

/// Index of the first hit of `location` by `name` in the global log
pub fn first_hit(name: &str, location: Location) -> Option<usize> {
    SCRIPT
        .lock()
        .hits
        .iter()
        .position(|(hit, at)| hit == name && *at == location)
}

/// Index of the last hit of `location` by `name` in the global log
pub fn last_hit(name: &str, location: Location) -> Option<usize> {
    SCRIPT
        .lock()
        .hits
        .iter()
        .rposition(|(hit, at)| hit == name && *at == location)
}

/// Make every condvar wait return after a short timeout
pub fn set_spurious(enabled: bool) {
    SPURIOUS.store(enabled, Ordering::SeqCst);
}

/// Spawn a named thread
pub fn spawn<T, F>(name: &str, f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .expect("failed to spawn test thread")
}

/// Instrumentation hooks driven by the global script
pub struct Scripted;

impl Instrument for Scripted {
    type Condvar = ScriptedCondvar;

    fn at(location: Location) {
        // Node events can fire from thread-local destructors
        if matches!(
            location,
            Location::NodeRegistered | Location::NodeDeregistered | Location::NodeAbandoned
        ) {
            return;
        }
        let current = thread::current();
        let Some(name) = current.name() else {
            return;
        };

        let mut script = SCRIPT.lock();
        script.hits.push((name.to_owned(), location));

        let breakpoint = script
            .breakpoints
            .iter()
            .position(|(target, at)| target == name && *at == location);
        if let Some(index) = breakpoint {
            script.breakpoints.remove(index);
            script.parked.push((name.to_owned(), location));
            CHANGED.notify_all();
            while script.parked.iter().any(|(parked, _)| parked == name) {
                CHANGED.wait(&mut script);
            }
        } else {
            CHANGED.notify_all();
        }
    }
}

/// Condition variable for scripted tests
pub struct ScriptedCondvar {
    inner: Condvar,
    notifying: AtomicBool,
}

impl ScriptedCondvar {
    fn enter_notify(&self) {
        assert!(
            !self.notifying.swap(true, Ordering::SeqCst),
            "overlapping notify on one condition variable"
        );
    }

    fn leave_notify(&self) {
        self.notifying.store(false, Ordering::SeqCst);
    }
}

impl BlockingCondvar for ScriptedCondvar {
    const INIT: Self = Self {
        inner: Condvar::new(),
        notifying: AtomicBool::new(false),
    };

    fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        Scripted::at(Location::CondvarWait);
        if SPURIOUS.load(Ordering::SeqCst) {
            let _ = self.inner.wait_for(guard, Duration::from_micros(200));
        } else {
            self.inner.wait(guard);
        }
        Scripted::at(Location::CondvarWoken);
    }

    fn notify_one(&self) {
        self.enter_notify();
        self.inner.notify_one();
        self.leave_notify();
    }

    fn notify_all(&self) {
        self.enter_notify();
        self.inner.notify_all();
        self.leave_notify();
    }
}
