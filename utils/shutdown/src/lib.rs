//! A process-wide shutdown signal, broadcast once to every listener (spec
//! §5: WorkQueues and the Event Stream drain cooperatively rather than being
//! killed outright).

use lazy_static::lazy_static;
use std::{
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::sync::oneshot;

/// Returns a future that completes once a shutdown signal (SIGINT|SIGTERM)
/// has been received.
pub async fn wait() {
    Shutdown::wait().await;
}

type ShutdownSync = Arc<Mutex<Shutdown>>;

struct Shutdown {
    listeners: Vec<oneshot::Sender<()>>,
    shutdown: bool,
}

impl Shutdown {
    fn new_sync(event: impl ShutdownEvent + 'static) -> ShutdownSync {
        let this = Arc::new(Mutex::new(Self {
            listeners: Vec::new(),
            shutdown: false,
        }));
        let this_clone = this.clone();
        tokio::spawn(async move { Self::run(this_clone, event).await });
        this
    }

    fn shutdown_chan(&mut self) -> Result<oneshot::Receiver<()>, ()> {
        if self.shutdown {
            Err(())
        } else {
            let (send, receive) = oneshot::channel();
            self.listeners.push(send);
            Ok(receive)
        }
    }

    async fn run(this: ShutdownSync, event: impl ShutdownEvent) {
        event.wait().await;
        let mut this = this.lock().expect("not poisoned");
        this.shutdown = true;
        for sender in std::mem::take(&mut this.listeners) {
            sender.send(()).ok();
        }
    }

    fn wait() -> impl Future<Output = ()> {
        lazy_static! {
            static ref SIGNAL: ShutdownSync = Shutdown::new_sync(IntTermEvent {});
        }
        let chan = SIGNAL.lock().expect("not poisoned").shutdown_chan();
        async move {
            match chan {
                Ok(wait) => {
                    wait.await.ok();
                }
                Err(()) => {}
            }
        }
    }

    /// True if a shutdown has already been observed, without registering a
    /// new listener.
    fn is_shutdown() -> bool {
        lazy_static! {
            static ref SIGNAL: ShutdownSync = Shutdown::new_sync(IntTermEvent {});
        }
        SIGNAL.lock().expect("not poisoned").shutdown
    }
}

/// True once a shutdown signal has been observed. Cheap, non-blocking poll
/// used by WorkQueue drain loops and the Event Stream's tail task to decide
/// whether to keep accepting new work.
pub fn is_shutdown() -> bool {
    Shutdown::is_shutdown()
}

#[async_trait::async_trait]
trait ShutdownEvent: Send + Sync {
    async fn wait(&self);
}

struct IntTermEvent {}

#[async_trait::async_trait]
impl ShutdownEvent for IntTermEvent {
    async fn wait(&self) {
        let mut sig_int = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("to register SIGINT");
        let mut sig_term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("to register SIGTERM");

        tokio::select! {
            _ = sig_int.recv() => tracing::warn!("received SIGINT"),
            _ = sig_term.recv() => tracing::warn!("received SIGTERM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn multiple_listeners_are_all_woken() {
        struct Once(Mutex<Option<oneshot::Receiver<()>>>);
        #[async_trait::async_trait]
        impl ShutdownEvent for Once {
            async fn wait(&self) {
                let rx = self.0.lock().unwrap().take().unwrap();
                rx.await.ok();
            }
        }
        let (tx, rx) = oneshot::channel();
        let shared = Shutdown::new_sync(Once(Mutex::new(Some(rx))));

        let mut chans = Vec::new();
        for _ in 0..3 {
            chans.push(shared.lock().unwrap().shutdown_chan().unwrap());
        }

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            for chan in chans {
                chan.await.unwrap();
            }
        })
        .await
        .expect("all listeners should be woken promptly");
    }
}
