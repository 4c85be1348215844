//! Synchronization primitive tests, driven through the crate's own thread
//! layer so lock diagnostics (critical level, park states) behave exactly
//! as they do for kernel threads.

mod spinlock {
    use caldera::{sync::SpinLock, thread::ThreadBuilder, thread::critical_level};
    use std::sync::Arc;

    #[test]
    fn smoke() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 1_000;

        let data = Arc::new(SpinLock::new(0usize));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let data = Arc::clone(&data);
                ThreadBuilder::new("spin-smoker").spawn(move || {
                    for _ in 0..ROUNDS {
                        let mut guard = data.lock();
                        *guard += 1;
                        guard.unlock();
                    }
                    0
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join(), 0);
        }

        let guard = data.lock();
        assert_eq!(*guard, THREADS * ROUNDS);
        guard.unlock();
    }

    #[test]
    fn try_lock_reports_contention() {
        let lock = SpinLock::new(());
        let held = lock.lock();
        assert!(lock.try_lock().is_err());
        held.unlock();

        let reacquired = lock.try_lock();
        assert!(reacquired.is_ok());
        if let Ok(guard) = reacquired {
            guard.unlock();
        }
    }

    #[test]
    fn critical_level_tracks_held_locks() {
        let a = SpinLock::named((), "outer");
        let b = SpinLock::named((), "inner");

        assert_eq!(critical_level(), 0);
        let ga = a.lock();
        assert_eq!(critical_level(), 1);
        let gb = b.lock();
        assert_eq!(critical_level(), 2);
        gb.unlock();
        assert_eq!(critical_level(), 1);
        ga.unlock();
        assert_eq!(critical_level(), 0);
    }

    #[test]
    fn dropping_a_held_guard_is_fatal() {
        let leaker = ThreadBuilder::new("leaker").spawn(|| {
            let lock = SpinLock::new(());
            let _guard = lock.lock();
            0
        });
        assert_eq!(leaker.join(), -1);
    }
}

mod wait_channel {
    use caldera::{
        sync::{SpinLock, WaitChannel},
        thread::ThreadBuilder,
    };
    use std::sync::Arc;

    #[test]
    fn sleep_then_wake() {
        let chan = Arc::new(WaitChannel::new("test chan"));
        let ready = Arc::new(SpinLock::named(false, "ready flag"));

        let sleeper = {
            let (chan, ready) = (Arc::clone(&chan), Arc::clone(&ready));
            ThreadBuilder::new("sleeper").spawn(move || {
                let mut guard = ready.lock();
                while !*guard {
                    chan.sleep(guard);
                    guard = ready.lock();
                }
                guard.unlock();
                0
            })
        };

        // The waker flips the condition and wakes while still holding the
        // data lock.
        let mut guard = ready.lock();
        *guard = true;
        chan.wake_one();
        guard.unlock();

        assert_eq!(sleeper.join(), 0);
    }

    #[test]
    fn wake_all_releases_every_sleeper() {
        const SLEEPERS: usize = 6;

        let chan = Arc::new(WaitChannel::new("herd"));
        let ready = Arc::new(SpinLock::named(false, "herd flag"));

        let workers: Vec<_> = (0..SLEEPERS)
            .map(|_| {
                let (chan, ready) = (Arc::clone(&chan), Arc::clone(&ready));
                ThreadBuilder::new("herd-sleeper").spawn(move || {
                    let mut guard = ready.lock();
                    while !*guard {
                        chan.sleep(guard);
                        guard = ready.lock();
                    }
                    guard.unlock();
                    0
                })
            })
            .collect();

        let mut guard = ready.lock();
        *guard = true;
        chan.wake_all();
        guard.unlock();

        for worker in workers {
            assert_eq!(worker.join(), 0);
        }
    }
}

mod mutex {
    use caldera::{
        sync::{Mutex, SpinLock},
        thread::{ThreadBuilder, ThreadState, get_state_by_tid},
    };
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    #[test]
    fn smoke() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;

        let data = Arc::new(Mutex::new(0usize));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let data = Arc::clone(&data);
                ThreadBuilder::new("smoker").spawn(move || {
                    for _ in 0..ROUNDS {
                        let mut guard = data.lock();
                        *guard += 1;
                        guard.unlock();
                    }
                    0
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join(), 0);
        }

        let guard = data.lock();
        assert_eq!(*guard, THREADS * ROUNDS);
        guard.unlock();
    }

    #[test]
    fn parking() {
        let mutex = Arc::new(Mutex::named((), "parking mutex"));
        let held = mutex.lock();

        let blocked = {
            let mutex = Arc::clone(&mutex);
            ThreadBuilder::new("blockee").spawn(move || {
                let guard = mutex.lock();
                guard.unlock();
                0
            })
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while get_state_by_tid(blocked.tid) != Ok(ThreadState::Parked) {
            assert!(
                Instant::now() < deadline,
                "thread blocked on a mutex should reach the Parked state"
            );
            std::thread::yield_now();
        }

        held.unlock();
        assert_eq!(blocked.join(), 0);
    }

    #[test]
    fn try_lock_never_blocks() {
        let mutex = Arc::new(Mutex::named((), "busy mutex"));
        let held = mutex.lock();

        let poker = {
            let mutex = Arc::clone(&mutex);
            ThreadBuilder::new("poker").spawn(move || {
                for _ in 0..1_000 {
                    if mutex.try_lock().is_ok() {
                        return 1;
                    }
                }
                0
            })
        };
        assert_eq!(poker.join(), 0);

        held.unlock();
        let guard = mutex.try_lock();
        assert!(guard.is_ok());
        if let Ok(guard) = guard {
            guard.unlock();
        }
    }

    #[test]
    fn unlock_by_non_owner_is_fatal() {
        let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::named((), "stolen mutex")));
        let held = mutex.lock();

        let intruder = ThreadBuilder::new("intruder").spawn(move || {
            held.unlock();
            0
        });
        assert_eq!(
            intruder.join(),
            -1,
            "an unlock by a non-owning thread must hit the fatal path"
        );
    }

    #[test]
    fn lock_inside_critical_section_is_fatal() {
        let sleeper = ThreadBuilder::new("bad-sleeper").spawn(|| {
            let spin = SpinLock::named((), "held spin");
            let mutex = Mutex::named((), "forbidden mutex");
            let spin_guard = spin.lock();
            let mutex_guard = mutex.lock();
            mutex_guard.unlock();
            spin_guard.unlock();
            0
        });
        assert_eq!(sleeper.join(), -1);
    }

    #[test]
    fn randomized_interleavings_make_progress() {
        use rand::Rng;

        const THREADS: usize = 8;
        const ROUNDS: usize = 200;

        let data = Arc::new(Mutex::named(0usize, "storm mutex"));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let data = Arc::clone(&data);
                ThreadBuilder::new("stormer").spawn(move || {
                    let mut rng = rand::rng();
                    for _ in 0..ROUNDS {
                        let mut guard = if rng.random_range(0..4) == 0 {
                            match data.try_lock() {
                                Ok(guard) => guard,
                                Err(_) => data.lock(),
                            }
                        } else {
                            data.lock()
                        };
                        *guard += 1;
                        for _ in 0..rng.random_range(0..64) {
                            core::hint::spin_loop();
                        }
                        guard.unlock();
                        if rng.random_range(0..8) == 0 {
                            std::thread::yield_now();
                        }
                    }
                    0
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join(), 0);
        }

        let guard = data.lock();
        assert_eq!(*guard, THREADS * ROUNDS);
        guard.unlock();
    }
}

mod condition_variable {
    use caldera::{
        sync::{ConditionVariable, Mutex, SpinLock},
        thread::ThreadBuilder,
    };
    use std::{collections::VecDeque, sync::Arc};

    const CAPACITY: usize = 2;

    struct BufferInner {
        items: VecDeque<usize>,
    }

    struct Buffer {
        inner: Mutex<BufferInner>,
        full: ConditionVariable,
        empty: ConditionVariable,
    }

    impl Buffer {
        fn new() -> Self {
            Buffer {
                inner: Mutex::named(
                    BufferInner {
                        items: VecDeque::new(),
                    },
                    "bounded buffer",
                ),
                full: ConditionVariable::new(),
                empty: ConditionVariable::new(),
            }
        }

        fn put(&self, val: usize) {
            let mut guard = self.full.wait_while(&self.inner, |b| b.items.len() == CAPACITY);
            guard.items.push_back(val);
            self.empty.signal(guard);
        }

        fn get(&self) -> usize {
            let mut guard = self.empty.wait_while(&self.inner, |b| b.items.is_empty());
            let val = match guard.items.pop_front() {
                Some(val) => val,
                None => unreachable!(),
            };
            self.full.signal(guard);
            val
        }
    }

    #[test]
    fn bounded_buffer() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_WORKER: usize = 64;

        let buffer = Arc::new(Buffer::new());
        let output = Arc::new(SpinLock::named(Vec::new(), "buffer output"));

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let (buffer, output) = (Arc::clone(&buffer), Arc::clone(&output));
                ThreadBuilder::new("consumer").spawn(move || {
                    for _ in 0..PER_WORKER {
                        let val = buffer.get();
                        let mut guard = output.lock();
                        guard.push(val);
                        guard.unlock();
                    }
                    0
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                ThreadBuilder::new("producer").spawn(move || {
                    for i in 0..PER_WORKER {
                        buffer.put(p * PER_WORKER + i);
                    }
                    0
                })
            })
            .collect();

        for worker in producers.into_iter().chain(consumers) {
            assert_eq!(worker.join(), 0);
        }

        let mut guard = output.lock();
        guard.sort();
        assert_eq!(&*guard, &(0..PRODUCERS * PER_WORKER).collect::<Vec<_>>());
        guard.unlock();
    }
}
