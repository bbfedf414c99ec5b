//! Scheduling primitives for periodic loops.
//!
//! Every background loop (signature polling, reconciliation sweeps, cache
//! warming, metrics refresh) is driven by a [`Ticker`] and observes a
//! [`ShutdownSignal`]. Production code uses [`IntervalTicker`]; tests drive
//! loops one tick at a time with [`ManualTicker`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// A source of ticks for a periodic loop.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. Returns `false` once no more ticks will arrive.
    async fn tick(&mut self) -> bool;
}

#[async_trait]
impl Ticker for Box<dyn Ticker> {
    async fn tick(&mut self) -> bool {
        (**self).tick().await
    }
}

// ─── IntervalTicker ───────────────────────────────────────────────────────────

/// Fixed-period wall-clock ticker. The first tick fires one period from now;
/// missed ticks are skipped rather than bunched.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms.max(1)))
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

// ─── ManualTicker ─────────────────────────────────────────────────────────────

/// A ticker fired by hand through its [`TickHandle`].
pub struct ManualTicker {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
    in_flight: Option<oneshot::Sender<()>>,
}

/// Fires ticks into a [`ManualTicker`].
#[derive(Clone)]
pub struct TickHandle {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl ManualTicker {
    pub fn new() -> (Self, TickHandle) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                rx,
                in_flight: None,
            },
            TickHandle { tx },
        )
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        // Asking for the next tick means the previous one was fully handled.
        if let Some(done) = self.in_flight.take() {
            let _ = done.send(());
        }
        match self.rx.recv().await {
            Some(done) => {
                self.in_flight = Some(done);
                true
            }
            None => false,
        }
    }
}

impl TickHandle {
    /// Fire one tick and wait until the loop has finished the work for it
    /// (or exited). Returns `false` if the ticker is gone.
    pub async fn tick(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(done_tx).await.is_err() {
            return false;
        }
        let _ = done_rx.await;
        true
    }
}

// ─── Shutdown ─────────────────────────────────────────────────────────────────

/// Owner side of a cooperative shutdown signal.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side of a [`Shutdown`].
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Loops finish their current unit of work and exit.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested (or the owner is gone).
    pub async fn recv(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Run `work` once per tick until the ticker ends or shutdown is requested.
///
/// Shutdown is only observed between units of work: an in-flight call to
/// `work` always runs to completion.
pub async fn run_every<T, F, Fut>(mut ticker: T, mut shutdown: ShutdownSignal, mut work: F)
where
    T: Ticker,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            more = ticker.tick() => {
                if !more {
                    break;
                }
            }
        }
        work().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn manual_ticks_drive_work_to_completion() {
        let (ticker, handle) = ManualTicker::new();
        let shutdown = Shutdown::new();
        let count = Arc::new(AtomicU32::new(0));

        let c = count.clone();
        let task = tokio::spawn(run_every(ticker, shutdown.signal(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert!(handle.tick().await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.tick().await);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loop_exits_when_ticker_dropped() {
        let (ticker, handle) = ManualTicker::new();
        let shutdown = Shutdown::new();
        let task = tokio::spawn(run_every(ticker, shutdown.signal(), || async {}));
        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticker_waits_one_period() {
        let mut ticker = IntervalTicker::new(Duration::from_secs(5));
        let start = Instant::now();
        assert!(ticker.tick().await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn shutdown_signal_observed() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        assert!(!signal.is_shutdown());
        shutdown.trigger();
        signal.recv().await;
        assert!(signal.is_shutdown());
        assert!(shutdown.is_triggered());
    }
}
