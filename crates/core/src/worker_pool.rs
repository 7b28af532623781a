use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    user: String,
    database: String,
    task: Task,
}

/// A small pool of long-lived threads serving connection commands.
///
/// Each worker serves one queued job at a time; a worker observing itself
/// already busy panics, which catches double-submit bugs in the dispatch
/// layer. Shutdown is cooperative: the queue is closed and every worker
/// drains and exits.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> WorkerPool {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..worker_count.max(1))
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("granite-worker-{i}"))
                    .spawn(move || worker_loop(i, receiver))
                    .expect("could not spawn worker thread")
            })
            .collect();
        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue `task` to run on some worker on behalf of `user` against
    /// `database`.
    pub fn execute(&self, user: &str, database: &str, task: impl FnOnce() + Send + 'static) {
        let job = Job {
            user: user.to_owned(),
            database: database.to_owned(),
            task: Box::new(task),
        };
        self.sender
            .as_ref()
            .expect("worker pool is shut down")
            .send(job)
            .expect("worker pool queue closed");
    }

    /// Close the queue and wait for every worker to drain and exit.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                error!("worker thread panicked: {e:?}");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    let busy = Arc::new(AtomicBool::new(false));
    while let Ok(job) = receiver.recv() {
        assert!(
            !busy.swap(true, Ordering::SeqCst),
            "worker {index} received a job while already executing"
        );
        debug!("worker {index} serving {}@{}", job.user, job.database);
        (job.task)();
        busy.store(false, Ordering::SeqCst);
    }
    debug!("worker {index} exits");
}
