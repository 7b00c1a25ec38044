//! Bounded multi-worker job queues
//!
//! Every pool on the server (access, send, action, motion, update) is one of
//! these: a fixed set of OS threads draining a bounded FIFO channel. A job
//! handler that fails is logged and the worker moves on to the next job.

use crate::config::PoolConfig;
use crate::error::ServerError;
use crossbeam::channel::{self, Sender, TrySendError};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

#[derive(Debug, Default)]
struct PoolCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

pub struct ThreadPool<J: Send + 'static> {
    name: &'static str,
    sender: Mutex<Option<Sender<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl<J: Send + 'static> ThreadPool<J> {
    pub fn new<F>(name: &'static str, config: PoolConfig, handler: F) -> Result<Self, ServerError>
    where
        F: Fn(J) -> Result<(), ServerError> + Send + Sync + 'static,
    {
        let (sender, receiver) = channel::bounded::<J>(config.capacity.max(1));
        let handler = Arc::new(handler);
        let counters = Arc::new(PoolCounters::default());

        let pool = Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            counters: Arc::clone(&counters),
        };

        for index in 0..config.workers.max(1) {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    for job in receiver.iter() {
                        match handler(job) {
                            Ok(()) => {
                                counters.completed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                warn!("{} job failed: {}", name, e);
                            }
                        }
                    }
                    debug!("{} worker {} exiting", name, index);
                })
                .map_err(|source| ServerError::Spawn {
                    name: format!("{} worker", name),
                    source,
                })?;
            pool.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }

        Ok(pool)
    }

    /// Queues a job without blocking; a full queue rejects it
    pub fn push(&self, job: J) -> Result<(), ServerError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = sender.as_ref().ok_or(ServerError::PoolClosed(self.name))?;
        sender.try_send(job).map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => ServerError::PoolFull(self.name),
                TrySendError::Disconnected(_) => ServerError::PoolClosed(self.name),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    /// Closes the queue, lets workers drain it and joins them
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in workers {
            // The last owner may be dropped from inside one of our own jobs
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("{} worker panicked", self.name);
            }
        }
    }
}

impl<J: Send + 'static> Drop for ThreadPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order_on_single_worker() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = ThreadPool::new("test", PoolConfig::new(1, 16), move |job: u32| {
            tx.lock().unwrap().send(job).unwrap();
            Ok(())
        })
        .unwrap();

        for job in 0..10 {
            pool.push(job).unwrap();
        }
        let seen: Vec<u32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        pool.shutdown();
        assert_eq!(pool.completed(), 10);
    }

    #[test]
    fn test_failed_job_does_not_stop_worker() {
        let pool = ThreadPool::new("test", PoolConfig::new(1, 8), |job: u32| {
            if job % 2 == 0 {
                Err(ServerError::Zone(format!("job {}", job)))
            } else {
                Ok(())
            }
        })
        .unwrap();

        for job in 0..6 {
            pool.push(job).unwrap();
        }
        pool.shutdown();
        assert_eq!(pool.failed(), 3);
        assert_eq!(pool.completed(), 3);
    }

    #[test]
    fn test_full_queue_rejects() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate = Mutex::new(gate_rx);
        let pool = ThreadPool::new("test", PoolConfig::new(1, 1), move |_job: u32| {
            let _ = gate.lock().unwrap().recv();
            Ok(())
        })
        .unwrap();

        // One job occupies the worker, one fills the queue
        pool.push(1).unwrap();
        let mut rejected = false;
        for job in 2..10 {
            if let Err(ServerError::PoolFull(name)) = pool.push(job) {
                assert_eq!(name, "test");
                rejected = true;
                break;
            }
        }
        assert!(rejected);
        assert!(pool.rejected() >= 1);

        drop(gate_tx);
        pool.shutdown();
    }

    #[test]
    fn test_push_after_shutdown() {
        let pool = ThreadPool::new("test", PoolConfig::new(2, 4), |_job: u32| Ok(())).unwrap();
        pool.shutdown();
        match pool.push(1) {
            Err(ServerError::PoolClosed("test")) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
