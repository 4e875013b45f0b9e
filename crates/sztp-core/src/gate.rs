//! FIFO-fair shared/exclusive gate
//!
//! Every HTTP exchange takes exactly one [`GateGuard`] before touching the
//! datastore. Reads share the gate, writes own it, and requests are granted
//! strictly in arrival order: a read arriving behind a queued write waits for
//! that write, so heavy read traffic cannot starve writers.
//!
//! Release is tied to the guard's `Drop`, which covers early returns, panics
//! and task cancellation alike.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::trace;

/// Access mode requested from the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Read,
    Write,
}

/// Snapshot of the gate's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateStats {
    pub readers: usize,
    pub writers: usize,
    pub queued: usize,
}

struct Waiter {
    mode: GateMode,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct GateState {
    readers: usize,
    writer: bool,
    queue: VecDeque<Waiter>,
}

impl GateState {
    fn admits(&self, mode: GateMode) -> bool {
        match mode {
            GateMode::Read => !self.writer,
            GateMode::Write => !self.writer && self.readers == 0,
        }
    }

    fn hold(&mut self, mode: GateMode) {
        match mode {
            GateMode::Read => self.readers += 1,
            GateMode::Write => self.writer = true,
        }
    }

    fn unhold(&mut self, mode: GateMode) {
        match mode {
            GateMode::Read => self.readers = self.readers.saturating_sub(1),
            GateMode::Write => self.writer = false,
        }
    }

    /// Grant the head of the queue for as long as it is compatible.
    fn wake(&mut self) {
        while let Some(front) = self.queue.front() {
            if !self.admits(front.mode) {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.hold(waiter.mode);
            if waiter.grant.send(()).is_err() {
                // waiter gave up before being granted
                self.unhold(waiter.mode);
            }
        }
    }
}

struct GateInner {
    state: Mutex<GateState>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        // No user code runs under this mutex, so a poisoned lock still holds consistent counts
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, mode: GateMode) {
        let mut state = self.lock();
        state.unhold(mode);
        state.wake();
    }
}

/// FIFO-fair read/write gate, cheap to clone
#[derive(Clone)]
pub struct FifoGate {
    inner: Arc<GateInner>,
}

impl Default for FifoGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
            }),
        }
    }

    /// Acquire the gate in the given mode, waiting behind every earlier request.
    pub async fn acquire(&self, mode: GateMode) -> GateGuard {
        let rx = {
            let mut state = self.inner.lock();
            if state.queue.is_empty() && state.admits(mode) {
                state.hold(mode);
                trace!(?mode, "gate granted immediately");
                return GateGuard {
                    inner: self.inner.clone(),
                    mode,
                };
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter { mode, grant: tx });
            trace!(?mode, queued = state.queue.len(), "gate contended");
            rx
        };

        let mut pending = PendingGrant {
            inner: self.inner.clone(),
            mode,
            rx: Some(rx),
        };
        if let Some(rx) = pending.rx.as_mut() {
            // The sender is only dropped after a successful send or when the
            // gate itself is gone, so either way the grant is ours.
            let _ = rx.await;
        }
        pending.rx = None;

        GateGuard {
            inner: self.inner.clone(),
            mode,
        }
    }

    /// Convenience for `acquire(GateMode::Read)`
    pub async fn read(&self) -> GateGuard {
        self.acquire(GateMode::Read).await
    }

    /// Convenience for `acquire(GateMode::Write)`
    pub async fn write(&self) -> GateGuard {
        self.acquire(GateMode::Write).await
    }

    pub fn stats(&self) -> GateStats {
        let state = self.inner.lock();
        GateStats {
            readers: state.readers,
            writers: usize::from(state.writer),
            queued: state.queue.len(),
        }
    }
}

/// A queued request; if dropped before completing, hands back any grant it received.
struct PendingGrant {
    inner: Arc<GateInner>,
    mode: GateMode,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingGrant {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.inner.release(self.mode);
            }
        }
    }
}

/// Held access to the gate; released on drop
pub struct GateGuard {
    inner: Arc<GateInner>,
    mode: GateMode,
}

impl GateGuard {
    pub fn mode(&self) -> GateMode {
        self.mode
    }
}

impl std::fmt::Debug for GateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateGuard").field("mode", &self.mode).finish()
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.inner.release(self.mode);
        trace!(mode = ?self.mode, "gate released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_reads_share_the_gate() {
        let gate = FifoGate::new();
        let a = gate.read().await;
        let b = gate.read().await;
        assert_eq!(gate.stats().readers, 2);
        drop(a);
        drop(b);
        assert_eq!(gate.stats(), GateStats::default());
    }

    #[tokio::test]
    async fn test_write_waits_for_reads() {
        let gate = FifoGate::new();
        let read = gate.read().await;

        let g = gate.clone();
        let writer = tokio::spawn(async move {
            let guard = g.write().await;
            assert_eq!(guard.mode(), GateMode::Write);
        });

        settle().await;
        assert_eq!(gate.stats().queued, 1);
        assert!(!writer.is_finished());

        drop(read);
        timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        assert_eq!(gate.stats(), GateStats::default());
    }

    #[tokio::test]
    async fn test_later_read_does_not_jump_queued_write() {
        let gate = FifoGate::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let first = gate.read().await;

        let (g, o) = (gate.clone(), order.clone());
        let writer = tokio::spawn(async move {
            let _guard = g.write().await;
            o.lock().unwrap().push("write");
            sleep(Duration::from_millis(20)).await;
        });
        settle().await;

        let (g, o) = (gate.clone(), order.clone());
        let reader = tokio::spawn(async move {
            let _guard = g.read().await;
            o.lock().unwrap().push("read");
        });
        settle().await;

        // reader queued behind the writer even though a read is currently held
        assert!(order.lock().unwrap().is_empty());
        assert_eq!(gate.stats().queued, 2);

        drop(first);
        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["write", "read"]);
    }

    #[tokio::test]
    async fn test_consecutive_reads_granted_together() {
        let gate = FifoGate::new();
        let writer = gate.write().await;

        let mut readers = Vec::new();
        for _ in 0..3 {
            let g = gate.clone();
            readers.push(tokio::spawn(async move {
                let _guard = g.read().await;
                sleep(Duration::from_millis(30)).await;
            }));
        }
        settle().await;
        assert_eq!(gate.stats().queued, 3);

        drop(writer);
        settle().await;
        assert_eq!(gate.stats().readers, 3);

        for r in readers {
            r.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak() {
        let gate = FifoGate::new();
        let read = gate.read().await;

        let g = gate.clone();
        let waiter = tokio::spawn(async move {
            let _guard = g.write().await;
        });
        settle().await;
        waiter.abort();
        let _ = waiter.await;

        drop(read);
        let guard = timeout(Duration::from_secs(1), gate.write())
            .await
            .expect("gate leaked by cancelled waiter");
        drop(guard);
        assert_eq!(gate.stats(), GateStats::default());
    }

    #[tokio::test]
    async fn test_no_reader_alongside_writer() {
        let gate = FifoGate::new();
        let violations = Arc::new(StdMutex::new(0usize));
        let mut tasks = Vec::new();

        for i in 0..20 {
            let g = gate.clone();
            let v = violations.clone();
            tasks.push(tokio::spawn(async move {
                let mode = if i % 3 == 0 { GateMode::Write } else { GateMode::Read };
                let _guard = g.acquire(mode).await;
                let stats = g.stats();
                let bad = match mode {
                    GateMode::Write => stats.readers != 0 || stats.writers != 1,
                    GateMode::Read => stats.writers != 0,
                };
                if bad {
                    *v.lock().unwrap() += 1;
                }
                tokio::task::yield_now().await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(*violations.lock().unwrap(), 0);
        assert_eq!(gate.stats(), GateStats::default());
    }
}
