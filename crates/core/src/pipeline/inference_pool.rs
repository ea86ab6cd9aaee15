use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

/// Caps how many detect/embed passes run at once across all cameras.
///
/// A bounded channel pre-filled with `size` tokens acts as a counting
/// semaphore: taking a token grants a [`InferencePermit`], dropping the
/// permit puts it back.
#[derive(Clone)]
pub struct InferencePool {
    tokens_tx: Sender<()>,
    tokens_rx: Receiver<()>,
    size: usize,
}

impl InferencePool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tokens_tx, tokens_rx) = crossbeam_channel::bounded(size);
        for _ in 0..size {
            let _ = tokens_tx.try_send(());
        }
        Self {
            tokens_tx,
            tokens_rx,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.tokens_rx.len()
    }

    /// Waits up to `timeout` for a permit.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<InferencePermit> {
        self.tokens_rx
            .recv_timeout(timeout)
            .ok()
            .map(|()| InferencePermit {
                tokens_tx: self.tokens_tx.clone(),
            })
    }
}

/// Held for the duration of one inference pass.
pub struct InferencePermit {
    tokens_tx: Sender<()>,
}

impl Drop for InferencePermit {
    fn drop(&mut self) {
        let _ = self.tokens_tx.try_send(());
    }
}
