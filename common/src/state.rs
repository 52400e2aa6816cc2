use std::fmt;
use tokio::sync::watch;

/// Lifecycle of one stream run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing has been started yet.
    Idle,
    /// Both loops keep going while the state stays here.
    Fetching,
    /// Terminal for the current run; a new `start` begins a fresh run.
    Stopped,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Idle => "idle",
            StreamState::Fetching => "fetching",
            StreamState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Thread-safe holder of a [`StreamState`].
///
/// Writes are last-writer-wins. The only transitions that race are towards
/// `Stopped`, so a lost update still ends with both loops stopping.
pub struct StateCell {
    tx: watch::Sender<StreamState>,
}

impl StateCell {
    pub fn new(initial: StreamState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> StreamState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: StreamState) -> StreamState {
        self.tx.send_replace(state)
    }

    pub fn is_fetching(&self) -> bool {
        self.get() == StreamState::Fetching
    }

    /// Move to `Stopped`, returning the state it replaced.
    pub fn stop(&self) -> StreamState {
        self.set(StreamState::Stopped)
    }

    /// Resolves once the state is anything other than `Fetching`.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state != StreamState::Fetching).await;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(StreamState::Idle)
    }
}

/// One-shot signal used by the fetch task to break the render task out of
/// its blocking wait on the frame queue.
pub struct RenderInterrupt {
    tx: watch::Sender<bool>,
}

impl RenderInterrupt {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`interrupt`](Self::interrupt) has been called, including
    /// calls made before this future was created.
    pub async fn interrupted(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|flag| *flag).await;
    }
}

impl Default for RenderInterrupt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn state_cell_transitions() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), StreamState::Idle);
        assert!(!cell.is_fetching());

        cell.set(StreamState::Fetching);
        assert!(cell.is_fetching());

        assert_eq!(cell.stop(), StreamState::Fetching);
        assert_eq!(cell.stop(), StreamState::Stopped);
        assert_eq!(cell.get().to_string(), "stopped");
    }

    #[tokio::test]
    async fn stopped_resolves_on_stop() {
        let cell = Arc::new(StateCell::new(StreamState::Fetching));
        let waiter = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        cell.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn interrupt_before_wait_is_observed() {
        let interrupt = RenderInterrupt::new();
        assert!(!interrupt.is_interrupted());
        interrupt.interrupt();
        assert!(interrupt.is_interrupted());
        tokio::time::timeout(Duration::from_secs(1), interrupt.interrupted())
            .await
            .expect("already interrupted");
    }
}
