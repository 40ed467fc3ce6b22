//! A strict FIFO async serializer (§4.7): every submitted job runs to
//! completion before the next one starts, in submission order, regardless
//! of which caller submitted it or how long an earlier job takes.

use std::{future::Future, pin::Pin};
use tokio::sync::{mpsc, oneshot};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> BoxFuture + Send>;

/// A cloneable handle onto a single background worker task. Cloning a
/// `WorkQueue` never spawns a second worker -- every clone feeds the same
/// FIFO channel.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job().await;
            }
        });
        Self { tx }
    }

    /// Queue `job` behind whatever is already queued and wait for its turn
    /// to run and complete. Jobs ahead of it always run first, in the order
    /// they were submitted (§4.7).
    pub async fn submit<F, T>(&self, job: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let boxed: Job = Box::new(move || {
            Box::pin(async move {
                let result = job.await;
                let _ = done_tx.send(result);
            })
        });
        // The worker task only stops when every sender (including this
        // clone) is dropped, so the send cannot fail while `self` is alive.
        let _ = self.tx.send(boxed);
        done_rx
            .await
            .expect("worker task outlives every WorkQueue handle that can still submit to it")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .submit(async move {
                        order.lock().unwrap().push(i);
                    })
                    .await
            }));
        }
        // Submissions race across tasks, so only assert ordering among jobs
        // queued from a single submitter below.
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(order.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn single_submitter_sees_strict_fifo() {
        let queue = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = order.clone();
            queue
                .submit(async move {
                    order.lock().unwrap().push(i);
                })
                .await;
        }
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn returns_the_jobs_result() {
        let queue = WorkQueue::new();
        let value = queue.submit(async { 1 + 1 }).await;
        assert_eq!(value, 2);
    }
}
