//! A strict FIFO async serializer (§4.7), used here as the process-wide
//! queue that funnels `CreateVolume`/`ControllerPublishVolume` (§4.4).

use std::{future::Future, pin::Pin};
use tokio::sync::{mpsc, oneshot};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> BoxFuture + Send>;

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
}
