//! Mutual exclusion between tasks, cores and interrupt handlers.
//!
//! Two backends implement the [`CriticalSection`] trait:
//!
//! - [`PortMux`], a nestable spinlock for multitasking kernels running on
//!   more than one core. The lock remembers its owner, so the owner may
//!   enter it again. Interrupts stay masked on the owning core until the
//!   outermost section exits.
//! - [`InterruptMask`], which masks interrupts on every entry and restores
//!   the previous interrupt state on every exit. Nesting works because each
//!   exit restores exactly what its own entry saved, hence sections must be
//!   exited in the reverse order in which they were entered.
//!
//! The [`Lock`] alias names the backend of the selected platform, and
//! [`Shared`] wraps a value so that it can only be read or written inside a
//! critical section.
//!
//! Code running inside a critical section must be short. It must not block,
//! allocate, log or perform any I/O.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use critical_section::RestoreState;

// Owner of a free port mux.
const FREE: usize = usize::MAX;

/// A critical section, either a lock object or the global interrupt mask.
pub trait CriticalSection {
    /// State saved by [`CriticalSection::enter`] and consumed by the matching
    /// [`CriticalSection::exit`].
    type Token;

    /// Enters the critical section.
    ///
    /// # Safety
    ///
    /// Every call must be paired with exactly one [`CriticalSection::exit`]
    /// call, performed by the same execution context with the returned
    /// token. Nested sections must be exited in the reverse order in which
    /// they were entered.
    unsafe fn enter(&self) -> Self::Token;

    /// Exits the critical section.
    ///
    /// # Safety
    ///
    /// `token` must come from the most recent [`CriticalSection::enter`]
    /// call of the current execution context which has not been exited yet.
    unsafe fn exit(&self, token: Self::Token);

    /// Enters the critical section and returns a guard which exits it when
    /// dropped.
    ///
    /// Guards must be dropped in the reverse order in which they were
    /// created, which is what happens when they go out of scope.
    #[must_use = "the critical section exits as soon as the guard is dropped"]
    fn lock(&self) -> CriticalGuard<'_, Self> {
        // SAFETY: the guard exits the section exactly once, on drop.
        let token = unsafe { self.enter() };
        CriticalGuard {
            section: self,
            token: Some(token),
            _not_send: PhantomData,
        }
    }

    /// Runs `f` inside the critical section.
    #[inline]
    fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock();
        f()
    }
}

/// A scoped critical section, exited when dropped.
///
/// A guard can not be moved to another thread: a section must be exited by
/// the execution context which entered it.
pub struct CriticalGuard<'a, C: CriticalSection + ?Sized> {
    section: &'a C,
    token: Option<C::Token>,
    _not_send: PhantomData<*const ()>,
}

impl<C: CriticalSection + ?Sized> Drop for CriticalGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // SAFETY: the token comes from the `enter` call of `lock`.
            unsafe { self.section.exit(token) };
        }
    }
}

/// The token of a [`PortMux`] section.
pub struct PortMuxToken(());

/// A nestable spinlock which also masks interrupts on the owning core.
///
/// The owner of the lock is identified by the function passed to
/// [`PortMux::with_context`], which on a board must return the current core.
/// Entering the lock again from its owner only increases the nesting depth,
/// so two cores reporting the same identity would both enter the section.
pub struct PortMux {
    owner: AtomicUsize,
    depth: AtomicU32,
    saved: UnsafeCell<Option<RestoreState>>,
    context: fn() -> usize,
}

// SAFETY: `saved` is only accessed by the owner of the lock.
unsafe impl Sync for PortMux {}

impl PortMux {
    /// Creates a free [`PortMux`] whose owners are threads.
    ///
    /// Only hosted builds know the current thread. On a board, use
    /// [`PortMux::with_context`] with a function returning the current core.
    #[cfg(any(test, feature = "std"))]
    #[must_use]
    pub const fn new() -> Self {
        Self::with_context(current_context)
    }

    /// Creates a free [`PortMux`] whose owners are identified by `context`.
    ///
    /// `context` must return a distinct value for every execution context
    /// which may contend for the lock, and never `usize::MAX`.
    #[must_use]
    pub const fn with_context(context: fn() -> usize) -> Self {
        Self {
            owner: AtomicUsize::new(FREE),
            depth: AtomicU32::new(0),
            saved: UnsafeCell::new(None),
            context,
        }
    }

    /// Checks whether the lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != FREE
    }

    /// Checks whether the lock is held by the current execution context.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == (self.context)()
    }

    /// Returns the nesting depth of the current execution context.
    #[must_use]
    pub fn depth(&self) -> u32 {
        if self.is_owned() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}

#[cfg(any(test, feature = "std"))]
impl Default for PortMux {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalSection for PortMux {
    type Token = PortMuxToken;

    unsafe fn enter(&self) -> Self::Token {
        let context = (self.context)();

        // Only the owner can observe itself as the owner, and it runs with
        // interrupts masked.
        if self.owner.load(Ordering::Acquire) == context {
            let depth = self.depth.load(Ordering::Relaxed);
            self.depth.store(depth + 1, Ordering::Relaxed);
            return PortMuxToken(());
        }

        // SAFETY: released by the outermost `exit` of this owner.
        let restore = unsafe { critical_section::acquire() };
        while self
            .owner
            .compare_exchange_weak(FREE, context, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        // SAFETY: the current context owns the lock.
        unsafe { *self.saved.get() = Some(restore) };
        self.depth.store(1, Ordering::Relaxed);

        PortMuxToken(())
    }

    unsafe fn exit(&self, _token: Self::Token) {
        debug_assert!(self.is_owned(), "port mux exited by a non-owner");

        let depth = self.depth.load(Ordering::Relaxed);
        if depth > 1 {
            self.depth.store(depth - 1, Ordering::Relaxed);
            return;
        }

        self.depth.store(0, Ordering::Relaxed);
        // SAFETY: the current context owns the lock.
        let restore = unsafe { (*self.saved.get()).take() };
        self.owner.store(FREE, Ordering::Release);

        if let Some(restore) = restore {
            // SAFETY: saved by the outermost `enter` of this owner.
            unsafe { critical_section::release(restore) };
        }
    }
}

/// The token of an [`InterruptMask`] section.
pub struct MaskToken {
    restore: RestoreState,
    depth: u32,
}

/// Global interrupt masking.
///
/// Entering masks interrupts and saves the previous interrupt state, exiting
/// restores it. Exits must happen in the reverse order of the entries, an
/// out of order exit would unmask interrupts while an inner section is still
/// running. Debug builds check the order.
#[derive(Debug, Default)]
pub struct InterruptMask {
    depth: AtomicU32,
}

impl InterruptMask {
    /// Creates an [`InterruptMask`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: AtomicU32::new(0),
        }
    }

    /// Returns the number of sections entered through this mask and not
    /// exited yet.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Checks whether a section entered through this mask is running.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.depth() > 0
    }
}

impl CriticalSection for InterruptMask {
    type Token = MaskToken;

    unsafe fn enter(&self) -> Self::Token {
        // SAFETY: released by the matching `exit`.
        let restore = unsafe { critical_section::acquire() };

        // Interrupts are masked, no other context can touch the counter.
        let depth = self.depth.load(Ordering::Relaxed) + 1;
        self.depth.store(depth, Ordering::Relaxed);

        MaskToken { restore, depth }
    }

    unsafe fn exit(&self, token: Self::Token) {
        let depth = self.depth.load(Ordering::Relaxed);
        debug_assert_eq!(
            depth, token.depth,
            "interrupt mask sections exited out of order"
        );
        self.depth.store(depth.saturating_sub(1), Ordering::Relaxed);

        // SAFETY: saved by the matching `enter`.
        unsafe { critical_section::release(token.restore) };
    }
}

/// The critical-section backend of the selected platform.
#[cfg(feature = "esp32")]
pub type Lock = PortMux;

/// The critical-section backend of the selected platform.
#[cfg(all(feature = "rp2040", not(feature = "esp32")))]
pub type Lock = InterruptMask;

/// A value shared with interrupt handlers and other tasks.
///
/// The value is only ever accessed inside the critical section `C`, and it
/// is copied in and out of the cell so that no reference to it escapes.
pub struct Shared<C, T> {
    section: C,
    value: UnsafeCell<T>,
}

// SAFETY: every access to `value` happens inside `section`.
unsafe impl<C: CriticalSection + Sync, T: Send> Sync for Shared<C, T> {}

impl<C, T> Shared<C, T> {
    /// Creates a [`Shared`] value protected by `section`.
    #[must_use]
    pub const fn new(section: C, value: T) -> Self {
        Self {
            section,
            value: UnsafeCell::new(value),
        }
    }

    /// Returns a mutable reference to the value.
    ///
    /// No critical section is needed since the borrow is exclusive.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the cell and returns the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<C: CriticalSection, T> Shared<C, T> {
    /// Replaces the value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        self.section.with(|| {
            // SAFETY: inside the critical section, and the reference does
            // not outlive the swap.
            core::mem::replace(unsafe { &mut *self.value.get() }, value)
        })
    }

    /// Sets the value.
    ///
    /// The previous value is dropped outside of the critical section.
    pub fn set(&self, value: T) {
        drop(self.replace(value));
    }
}

impl<C: CriticalSection, T: Copy> Shared<C, T> {
    /// Returns a copy of the value.
    pub fn get(&self) -> T {
        // SAFETY: inside the critical section.
        self.section.with(|| unsafe { *self.value.get() })
    }

    /// Replaces the value with the result of `f`, returning the new value.
    ///
    /// `f` runs inside the critical section.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        self.section.with(|| {
            // SAFETY: inside the critical section. No reference to the value
            // is alive while `f` runs.
            let current = unsafe { *self.value.get() };
            let next = f(current);
            // SAFETY: as above.
            unsafe { *self.value.get() = next };
            next
        })
    }
}

impl<C: Default, T: Default> Default for Shared<C, T> {
    fn default() -> Self {
        Self::new(C::default(), T::default())
    }
}

impl<C, T> core::fmt::Debug for Shared<C, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

#[cfg(any(test, feature = "std"))]
fn current_context() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    std::thread_local! {
        static CONTEXT: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }

    CONTEXT.with(|context| *context)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use std::vec;

    use serial_test::serial;

    use super::{CriticalSection, InterruptMask, PortMux, Shared, current_context};

    // Checks that masking lasts until the outermost exit of `section`, and
    // that the state saved by the outermost entry is restored afterwards.
    fn assert_outermost_restores<C: CriticalSection + Sync>(section: &C) {
        let (sender, receiver) = mpsc::channel();
        let outer = section.lock();

        thread::scope(|scope| {
            let _ = scope.spawn(move || {
                critical_section::with(|_| ());
                sender.send(()).unwrap();
            });

            {
                let _inner = section.lock();
            }
            assert!(
                receiver.recv_timeout(Duration::from_millis(50)).is_err(),
                "masking ended before the outermost exit"
            );

            drop(outer);
            assert!(
                receiver.recv_timeout(Duration::from_secs(5)).is_ok(),
                "masking outlived the outermost exit"
            );
        });
    }

    #[test]
    fn test_port_mux_nesting() {
        let mux = PortMux::new();
        assert!(!mux.is_locked());

        let outer = mux.lock();
        assert!(mux.is_owned());
        assert_eq!(mux.depth(), 1);

        {
            let _inner = mux.lock();
            assert_eq!(mux.depth(), 2);
        }

        assert_eq!(mux.depth(), 1);
        assert!(mux.is_locked());

        drop(outer);
        assert!(!mux.is_locked());
        assert_eq!(mux.depth(), 0);
    }

    #[test]
    fn test_interrupt_mask_nesting() {
        let mask = InterruptMask::new();

        mask.with(|| {
            assert!(mask.is_masked());
            mask.with(|| assert_eq!(mask.depth(), 2));
            assert_eq!(mask.depth(), 1);
        });

        assert!(!mask.is_masked());
    }

    #[test]
    fn test_nesting_is_net_zero() {
        let mux = PortMux::new();
        let mask = InterruptMask::new();

        for _ in 0..3 {
            let _a = mux.lock();
            let _b = mask.lock();
            let _c = mux.lock();
            let _d = mask.lock();
        }

        assert!(!mux.is_locked());
        assert!(!mask.is_masked());
    }

    #[test]
    #[serial]
    fn test_port_mux_restores_masking() {
        assert_outermost_restores(&PortMux::new());
        assert!(!critical_section_held());
    }

    #[test]
    #[serial]
    fn test_interrupt_mask_restores_masking() {
        assert_outermost_restores(&InterruptMask::new());
        assert!(!critical_section_held());
    }

    // Checks whether another thread is kept out of the critical section.
    fn critical_section_held() -> bool {
        thread::scope(|scope| {
            let (sender, receiver) = mpsc::channel();
            let _ = scope.spawn(move || {
                critical_section::with(|_| ());
                sender.send(()).unwrap();
            });
            receiver.recv_timeout(Duration::from_secs(5)).is_err()
        })
    }

    #[test]
    fn test_contexts_are_distinct_per_thread() {
        let here = current_context();
        let there = thread::spawn(current_context).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, current_context());
    }

    #[test]
    #[serial]
    fn test_port_mux_excludes_other_threads() {
        let mux = PortMux::new();
        let inside = AtomicBool::new(false);

        thread::scope(|scope| {
            for _ in 0..4 {
                let _ = scope.spawn(|| {
                    for _ in 0..100 {
                        mux.with(|| {
                            assert!(!inside.swap(true, Ordering::SeqCst));
                            thread::yield_now();
                            inside.store(false, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert!(!mux.is_locked());
    }

    #[test]
    fn test_raw_enter_exit() {
        let mux = PortMux::new();
        // SAFETY: exits are paired and in reverse order.
        unsafe {
            let outer = mux.enter();
            let inner = mux.enter();
            assert_eq!(mux.depth(), 2);
            mux.exit(inner);
            mux.exit(outer);
        }
        assert!(!mux.is_locked());
    }

    #[test]
    fn test_port_mux_other_thread_is_not_owner() {
        let mux = PortMux::new();
        let _guard = mux.lock();

        thread::scope(|scope| {
            let _ = scope.spawn(|| {
                assert!(mux.is_locked());
                assert!(!mux.is_owned());
                assert_eq!(mux.depth(), 0);
            });
        });
    }

    #[test]
    #[serial]
    fn test_shared_concurrent_updates() {
        const THREADS: u32 = 4;
        const UPDATES: u32 = 1000;

        let counter = Shared::new(PortMux::new(), 0u32);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                let _ = scope.spawn(|| {
                    for _ in 0..UPDATES {
                        let _ = counter.update(|value| value + 1);
                    }
                });
            }
        });

        assert_eq!(counter.get(), THREADS * UPDATES);
    }

    #[test]
    #[serial]
    fn test_shared_concurrent_snapshots_are_consistent() {
        let pair = Shared::new(InterruptMask::new(), (0u64, 0u64));

        thread::scope(|scope| {
            let _ = scope.spawn(|| {
                for i in 1..=500 {
                    pair.set((i, i * 2));
                }
            });
            let _ = scope.spawn(|| {
                for _ in 0..500 {
                    let (a, b) = pair.get();
                    assert_eq!(b, a * 2);
                }
            });
        });

        assert_eq!(pair.get(), (500, 1000));
    }

    #[test]
    fn test_shared_reentrant_update() {
        let shared = Shared::new(PortMux::new(), 1u8);
        let value = shared.update(|value| {
            shared.set(10);
            value + shared.get()
        });
        assert_eq!(value, 11);
        assert_eq!(shared.get(), 11);
    }

    #[test]
    fn test_shared_replace() {
        let mut shared = Shared::new(InterruptMask::new(), [0u8; 4]);
        assert_eq!(shared.replace([1; 4]), [0; 4]);
        shared.get_mut()[0] = 7;
        assert_eq!(shared.into_inner(), [7, 1, 1, 1]);
    }
}
