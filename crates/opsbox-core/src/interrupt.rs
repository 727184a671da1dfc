//! Ctrl+C routing.
//!
//! Tokio's `ctrl_c()` replaces the default SIGINT behaviour for the rest of
//! the process once it has been awaited, so loops never wait on it
//! directly. The binary owns the only signal listener and hands each
//! Ctrl+C to [`Interrupt::deliver`]: an armed loop (monitor, log follow,
//! rota watcher) gets stopped, otherwise the process is expected to exit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    armed: AtomicUsize,
    generation: watch::Sender<u64>,
}

#[derive(Debug, Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                armed: AtomicUsize::new(0),
                generation,
            }),
        }
    }

    /// The process-wide instance used by the library's interruptible loops.
    pub fn global() -> &'static Interrupt {
        static GLOBAL: OnceLock<Interrupt> = OnceLock::new();
        GLOBAL.get_or_init(Interrupt::new)
    }

    /// Arms a listener that resolves on the next delivered Ctrl+C. The
    /// listener stays armed until dropped.
    pub fn listen(&self) -> Listener {
        self.inner.armed.fetch_add(1, Ordering::SeqCst);
        Listener {
            inner: Arc::clone(&self.inner),
            receiver: self.inner.generation.subscribe(),
        }
    }

    /// Wakes every armed listener. Returns `false` when nothing was
    /// listening, in which case the caller should end the process.
    pub fn deliver(&self) -> bool {
        if self.inner.armed.load(Ordering::SeqCst) == 0 {
            return false;
        }
        self.inner.generation.send_modify(|generation| *generation += 1);
        true
    }

    pub fn armed(&self) -> usize {
        self.inner.armed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Listener {
    inner: Arc<Inner>,
    receiver: watch::Receiver<u64>,
}

impl Listener {
    /// Resolves once a Ctrl+C is delivered after the listener was armed.
    /// Cancel safe.
    pub async fn triggered(&mut self) {
        if self.receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.inner.armed.fetch_sub(1, Ordering::SeqCst);
    }
}
