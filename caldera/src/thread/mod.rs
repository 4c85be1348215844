//! Thread abstraction, an abstraction of an execution context.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Threads can be named, and provide some
//! built-in support for low-level synchronization.
//!
//! Scheduling itself is a collaborator: this module only asks it for three
//! things — the identity of the current context, "stop running this
//! context" ([`std::thread::park`]) and "make that context runnable again"
//! ([`std::thread::Thread::unpark`]). Everything layered above
//! ([`WaitChannel`], [`Mutex`], the process reap protocol) goes through
//! [`Current::park_with`], which is the single vetted implementation of the
//! record-intent-then-park sequence.
//!
//! ## Critical level
//!
//! Each thread carries a *critical level*: the number of spinlocks it
//! currently holds. The level is raised by [`PreemptGuard`] (taken inside
//! every spinlock acquisition) and must read zero before any operation that
//! can suspend the thread. [`Current::park_with`] and [`Mutex::lock`]
//! assert this; a violation is fatal.
//!
//! [`WaitChannel`]: crate::sync::WaitChannel
//! [`Mutex`]: crate::sync::Mutex
//! [`Mutex::lock`]: crate::sync::Mutex::lock

use crate::{
    KernelError,
    process::Process,
    sync::{
        SpinLock, SpinLockKind,
        atomic::{AtomicBool, AtomicU64},
    },
};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    marker::PhantomData,
    sync::Arc,
};

static THREAD_STATE_TABLE: SpinLock<BTreeMap<u64, Arc<SpinLock<ThreadState>>>> =
    SpinLock::named(BTreeMap::new(), "thread state table");

static TID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CRITICAL: Cell<usize> = const { Cell::new(0) };
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

/// The number of spinlocks held by the calling thread.
#[inline]
pub fn critical_level() -> usize {
    CRITICAL.with(|c| c.get())
}

/// A RAII implementation of thread pinning. While any [`PreemptGuard`] is
/// alive the calling thread is inside a non-blocking critical section.
pub struct PreemptGuard {
    _not_send: PhantomData<*const ()>,
}

impl PreemptGuard {
    /// Enters a critical section, raising the calling thread's critical
    /// level.
    pub fn new() -> Self {
        CRITICAL.with(|c| c.set(c.get() + 1));
        PreemptGuard {
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread is currently inside a critical section.
    pub fn is_guarded() -> bool {
        critical_level() > 0
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        CRITICAL.with(|c| c.set(c.get() - 1));
    }
}

pub(crate) struct Parker {
    token: AtomicBool,
    host: SpinLock<Option<std::thread::Thread>>,
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id.
    pub tid: u64,
    /// Thread name.
    pub name: String,
    /// State of the thread.
    pub state: Arc<SpinLock<ThreadState>>,
    pub(crate) parker: Parker,
    owner: AtomicU64,
    process: SpinLock<Option<Arc<Process>>>,
}

impl Thread {
    pub(crate) fn new<I>(name: I) -> Arc<Self>
    where
        String: From<I>,
    {
        let tid = TID.fetch_add(1);

        let state = Arc::new(SpinLock::named(ThreadState::Runnable, "thread state"));
        let mut tst = THREAD_STATE_TABLE.lock();
        tst.insert(tid, state.clone());
        tst.unlock();

        Arc::new(Self {
            tid,
            name: String::from(name),
            state,
            parker: Parker {
                token: AtomicBool::new(false),
                // Wakeups may originate from interrupt context.
                host: SpinLock::with_kind(None, "parker", SpinLockKind::InterruptSafe),
            },
            owner: AtomicU64::new(0),
            process: SpinLock::named(None, "thread process"),
        })
    }

    /// The pid of the process this thread belongs to, or 0 for a plain
    /// kernel thread.
    pub fn owner_pid(&self) -> u64 {
        self.owner.load()
    }

    pub(crate) fn set_process(&self, proc: Arc<Process>) {
        self.owner.store(proc.pid);
        let mut p = self.process.lock();
        *p = Some(proc);
        p.unlock();
    }

    pub(crate) fn take_process(&self) -> Option<Arc<Process>> {
        let mut p = self.process.lock();
        let proc = p.take();
        p.unlock();
        proc
    }

    fn set_state(&self, new: ThreadState) {
        let mut state = self.state.lock();
        *state = new;
        state.unlock();
    }
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
pub fn get_state_by_tid(tid: u64) -> Result<ThreadState, KernelError> {
    let tst = THREAD_STATE_TABLE.lock();

    let Some(state) = tst.get(&tid) else {
        tst.unlock();
        return Err(KernelError::InvalidArgument);
    };

    let ts_lock = state.lock();
    let result = *ts_lock;

    ts_lock.unlock();
    tst.unlock();

    Ok(result)
}

/// Run a function `f` with the current thread as an argument.
///
/// A host thread that was not spawned through [`ThreadBuilder`] is adopted
/// on first use and behaves as an ordinary kernel thread from then on.
#[inline]
pub fn with_current<R>(f: impl FnOnce(&Arc<Thread>) -> R) -> R {
    let th = CURRENT.with(|current| {
        if let Some(th) = current.borrow().as_ref() {
            return th.clone();
        }
        let th = Thread::new(
            std::thread::current()
                .name()
                .unwrap_or("kernel")
                .to_string(),
        );
        {
            let mut host = th.parker.host.lock();
            *host = Some(std::thread::current());
            host.unlock();
        }
        th.set_state(ThreadState::Running);
        *current.borrow_mut() = Some(th.clone());
        th
    });
    f(&th)
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

/// Unwind payload carrying the exit code of [`Current::exit`].
pub(crate) struct ThreadExit(pub(crate) i32);

impl Current {
    /// Run a function `f` with a [`ParkHandle`] for the current thread, and
    /// then park the current thread.
    ///
    /// The handle must be published to a waker from inside `f`, while any
    /// lock that guards the blocking condition is still held; `f` then
    /// releases that lock. A wakeup delivered between the release and the
    /// park is retained, so the ordering cannot lose it.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let th = with_current(|th| th.clone());
        th.parker.token.store(false);
        {
            let mut host = th.parker.host.lock();
            *host = Some(std::thread::current());
            host.unlock();
        }
        th.set_state(ThreadState::Parked);

        f(ParkHandle { th: th.clone() });

        assert_eq!(
            critical_level(),
            0,
            "Try to park a thread while holding a spinlock."
        );
        while !th.parker.token.load() {
            std::thread::park();
        }
        th.set_state(ThreadState::Running);
    }

    /// Exit the current thread with `exit_code`.
    pub fn exit(exit_code: i32) -> ! {
        assert_eq!(
            critical_level(),
            0,
            "Try to exit a thread while holding a spinlock."
        );
        std::panic::panic_any(ThreadExit(exit_code));
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }
}

/// A handle that represents a parked thread.
pub struct ParkHandle {
    th: Arc<Thread>,
}

impl ParkHandle {
    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        self.th.set_state(ThreadState::Runnable);
        self.th.parker.token.store(true);
        let host = self.th.parker.host.lock();
        let thread = host.clone();
        host.unlock();
        if let Some(thread) = thread {
            thread.unpark();
        }
    }
}

/// A handle to join a thread.
pub struct JoinHandle
where
    Self: 'static,
{
    /// Thread id of this handle.
    pub tid: u64,
    inner: std::thread::JoinHandle<i32>,
}

impl JoinHandle {
    /// Join this handle and returns the exit code.
    ///
    /// A thread that died unwinding reports exit code `-1`.
    pub fn join(self) -> i32 {
        self.inner.join().unwrap_or(-1)
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    th: Arc<Thread>,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            th: Thread::new(name),
        }
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> u64 {
        self.th.tid
    }

    /// Attach the thread to a process before it starts running.
    pub(crate) fn attach_process(self, proc: &Arc<Process>) -> Self {
        proc.adopt_thread(&self.th);
        self.th.set_process(proc.clone());
        self
    }

    /// Spawn the thread.
    ///
    /// The closure's return value is the thread's exit code. A thread that
    /// unwinds out of its closure exits with code `-1` instead; a
    /// [`Current::exit`] call anywhere in the thread exits with the given
    /// code.
    pub fn spawn<F>(self, thread_fn: F) -> JoinHandle
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let Self { th } = self;
        let tid = th.tid;
        let inner = std::thread::Builder::new()
            .name(th.name.clone())
            .spawn(move || thread_entry(th, thread_fn))
            .expect("host scheduler refused to create a thread");
        JoinHandle { tid, inner }
    }
}

fn thread_entry<F>(th: Arc<Thread>, thread_fn: F) -> i32
where
    F: FnOnce() -> i32 + Send + 'static,
{
    {
        let mut host = th.parker.host.lock();
        *host = Some(std::thread::current());
        host.unlock();
    }
    CURRENT.with(|current| *current.borrow_mut() = Some(th.clone()));
    th.set_state(ThreadState::Running);

    let exit_code = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(thread_fn)) {
        Ok(code) => code,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(_) => -1,
        },
    };

    let mut tst = THREAD_STATE_TABLE.lock();
    tst.remove(&th.tid);
    tst.unlock();
    th.set_state(ThreadState::Exited(exit_code));

    if let Some(proc) = th.take_process() {
        Process::on_thread_exit(&proc, &th, exit_code);
    }
    CURRENT.with(|current| *current.borrow_mut() = None);

    exit_code
}
