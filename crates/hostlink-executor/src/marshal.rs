//! Main-thread work marshaling.
//!
//! The host only accepts API calls from its own thread. Work is wrapped in
//! a [`WorkItem`] and queued; the host thread drains the queue in FIFO
//! order and publishes each result into the item's oneshot slot. Panics on
//! the host thread are caught and re-raised to the submitter as
//! [`MarshalError::Panicked`].

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    thread::JoinHandle,
};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Marshaling error.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("Host thread is gone")]
    HostGone,
    #[error("Work item panicked on the host thread: {0}")]
    Panicked(String),
    #[error("Failed to start host thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Host state initialisation failed: {0}")]
    Init(String),
}

/// One unit of host work. Runs exactly once, on the host thread.
pub struct WorkItem<S> {
    job: Box<dyn FnOnce(&mut S) + Send>,
}

impl<S> WorkItem<S> {
    fn run(self, state: &mut S) {
        (self.job)(state);
    }
}

/// Submitting side. Cheap to clone, usable from any thread.
pub struct Marshaler<S> {
    tx: mpsc::UnboundedSender<WorkItem<S>>,
}

impl<S> Clone for Marshaler<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Draining side, owned by the host thread.
pub struct HostLoop<S> {
    rx: mpsc::UnboundedReceiver<WorkItem<S>>,
}

/// Create a connected marshaler and host loop.
#[must_use]
pub fn channel<S>() -> (Marshaler<S>, HostLoop<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Marshaler { tx }, HostLoop { rx })
}

impl<S: 'static> Marshaler<S> {
    fn enqueue<F, R>(&self, f: F) -> Result<oneshot::Receiver<Result<R, String>>, MarshalError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Box::new(move |state: &mut S| {
            let result = catch_unwind(AssertUnwindSafe(|| f(state))).map_err(|p| panic_message(p.as_ref()));
            // The submitter may have given up; the result is dropped then.
            let _ = tx.send(result);
        });
        self.tx
            .send(WorkItem { job })
            .map_err(|_| MarshalError::HostGone)?;
        Ok(rx)
    }

    /// Run `f` on the host thread and wait for its result.
    ///
    /// # Errors
    /// Returns error if the host thread is gone or `f` panicked.
    pub async fn submit<F, R>(&self, f: F) -> Result<R, MarshalError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.enqueue(f)?;
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(MarshalError::Panicked(message)),
            Err(_) => Err(MarshalError::HostGone),
        }
    }

    /// Blocking variant of [`Marshaler::submit`] for plain threads.
    /// Calling it from the host thread itself deadlocks.
    ///
    /// # Errors
    /// Returns error if the host thread is gone or `f` panicked.
    pub fn submit_blocking<F, R>(&self, f: F) -> Result<R, MarshalError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.enqueue(f)?;
        match rx.blocking_recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(MarshalError::Panicked(message)),
            Err(_) => Err(MarshalError::HostGone),
        }
    }

    /// Whether the host loop still accepts work.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl<S> HostLoop<S> {
    /// Execute everything queued right now, in submission order, and
    /// return how many items ran. For hosts that pump the queue from their
    /// own event loop.
    pub fn drain(&mut self, state: &mut S) -> usize {
        let mut ran = 0;
        while let Ok(item) = self.rx.try_recv() {
            item.run(state);
            ran += 1;
        }
        ran
    }

    /// Block the current thread executing items until every marshaler is
    /// dropped.
    pub fn run(mut self, state: &mut S) {
        while let Some(item) = self.rx.blocking_recv() {
            item.run(state);
        }
    }
}

/// A dedicated OS thread acting as the host thread.
pub struct HostThread<S> {
    marshaler: Marshaler<S>,
    handle: JoinHandle<()>,
}

impl<S: 'static> HostThread<S> {
    /// Spawn the thread and build its state on it; `init` runs on the new
    /// thread so `S` does not need to be `Send`.
    ///
    /// # Errors
    /// Returns error if the thread cannot start or `init` fails.
    pub fn spawn<F, E>(name: &str, init: F) -> Result<Self, MarshalError>
    where
        F: FnOnce() -> Result<S, E> + Send + 'static,
        E: std::fmt::Display,
    {
        let (marshaler, host_loop) = channel::<S>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                tracing::debug!("Host thread running");
                host_loop.run(&mut state);
                tracing::debug!("Host thread exiting");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { marshaler, handle }),
            Ok(Err(message)) => Err(MarshalError::Init(message)),
            Err(_) => Err(MarshalError::Init("host thread exited during startup".into())),
        }
    }

    #[must_use]
    pub fn marshaler(&self) -> Marshaler<S> {
        self.marshaler.clone()
    }

    /// Drop this handle's marshaler and wait for the thread. The thread
    /// exits once every other marshaler clone is gone as well.
    pub fn join(self) {
        drop(self.marshaler);
        if self.handle.join().is_err() {
            tracing::warn!("Host thread panicked");
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[tokio::test]
    async fn test_submit_runs_on_host_thread() {
        let host = HostThread::spawn("test-host", || Ok::<_, String>(Vec::<String>::new())).unwrap();
        let marshaler = host.marshaler();

        let name = marshaler
            .submit(|log: &mut Vec<String>| {
                let name = thread::current().name().unwrap_or_default().to_string();
                log.push(name.clone());
                name
            })
            .await
            .unwrap();
        assert_eq!(name, "test-host");

        let len = marshaler.submit(|log: &mut Vec<String>| log.len()).await.unwrap();
        assert_eq!(len, 1);

        drop(marshaler);
        host.join();
    }

    #[tokio::test]
    async fn test_panic_is_reraised_and_host_survives() {
        let host = HostThread::spawn("panicky", || Ok::<_, String>(0u32)).unwrap();
        let marshaler = host.marshaler();

        let err = marshaler
            .submit(|_: &mut u32| -> u32 { panic!("host blew up") })
            .await
            .unwrap_err();
        assert!(matches!(err, MarshalError::Panicked(ref m) if m == "host blew up"));

        let value = marshaler
            .submit(|n: &mut u32| {
                *n += 1;
                *n
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
        drop(marshaler);
        host.join();
    }

    #[test]
    fn test_init_failure_is_reported() {
        let result = HostThread::<u32>::spawn("broken", || Err::<u32, _>("no host"));
        assert!(matches!(result, Err(MarshalError::Init(ref m)) if m == "no host"));
    }

    #[test]
    fn test_drain_is_fifo_and_exactly_once() {
        let (marshaler, mut host_loop) = channel::<Vec<(usize, usize)>>();
        let mut submitted = Vec::new();

        // Items are enqueued synchronously; the receivers are awaited only
        // after the drain.
        for round in 0..3 {
            for worker in 0..4 {
                submitted.push(
                    marshaler
                        .enqueue(move |log: &mut Vec<(usize, usize)>| log.push((worker, round)))
                        .unwrap(),
                );
            }
        }

        let mut log = Vec::new();
        assert_eq!(host_loop.drain(&mut log), 12);
        assert_eq!(host_loop.drain(&mut log), 0);

        let expected: Vec<_> = (0..3)
            .flat_map(|round| (0..4).map(move |worker| (worker, round)))
            .collect();
        assert_eq!(log, expected);
        for mut rx in submitted {
            assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        }
    }

    #[test]
    fn test_concurrent_submitters_keep_per_thread_order() {
        let host = HostThread::spawn("fifo", || Ok::<_, String>(Vec::<(usize, usize)>::new())).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let marshaler = host.marshaler();
                thread::spawn(move || {
                    for seq in 0..25 {
                        marshaler
                            .submit_blocking(move |log: &mut Vec<(usize, usize)>| log.push((worker, seq)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let log = host
            .marshaler()
            .submit_blocking(|log: &mut Vec<(usize, usize)>| log.clone())
            .unwrap();
        assert_eq!(log.len(), 100);
        for worker in 0..4 {
            let seqs: Vec<_> = log.iter().filter(|(w, _)| *w == worker).map(|(_, s)| *s).collect();
            assert_eq!(seqs, (0..25).collect::<Vec<_>>());
        }
        host.join();
    }

    #[tokio::test]
    async fn test_submit_after_host_exit() {
        let (marshaler, host_loop) = channel::<()>();
        drop(host_loop);
        assert!(!marshaler.is_open());
        assert!(matches!(
            marshaler.submit(|_: &mut ()| ()).await,
            Err(MarshalError::HostGone)
        ));
    }
}
