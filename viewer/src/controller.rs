use liveview_common::{
    ErrorReporter, FrameQueue, RenderInterrupt, StateCell, StreamErrorListener, StreamErrorReason,
    StreamState,
};
use liveview_consumer::{DecodeOptions, RenderLoop, RenderStats, Surface};
use liveview_producer::{Connector, FetchLoop, FetchSummary};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of the tasks of one run, as returned by [`StreamController::wait`].
#[derive(Debug, Default)]
pub struct RunReport {
    pub fetch: Option<FetchSummary>,
    pub render: Option<RenderStats>,
}

struct RunTasks {
    fetch: JoinHandle<FetchSummary>,
    render: JoinHandle<RenderStats>,
}

impl RunTasks {
    fn is_finished(&self) -> bool {
        self.fetch.is_finished() && self.render.is_finished()
    }
}

/// Starts and stops the fetch/render task pair for a liveview stream.
///
/// Each `start` creates a fresh state cell, queue and interrupt, so tasks of
/// an earlier run that are still winding down never observe a later run's
/// `Fetching` state.
pub struct StreamController<C: Connector, S: Surface + ?Sized + 'static> {
    connector: Arc<C>,
    surface: Arc<S>,
    options: DecodeOptions,
    queue_capacity: usize,
    state: Arc<StateCell>,
    queue: Arc<FrameQueue>,
    interrupt: Arc<RenderInterrupt>,
    tasks: Option<RunTasks>,
    /// Tasks of earlier runs that were still winding down at the next `start`.
    retired: Vec<RunTasks>,
}

impl<C: Connector, S: Surface + ?Sized + 'static> StreamController<C, S> {
    pub fn new(connector: Arc<C>, surface: Arc<S>) -> Self {
        let queue = FrameQueue::default();
        Self {
            connector,
            surface,
            options: DecodeOptions::default(),
            queue_capacity: queue.capacity(),
            state: Arc::new(StateCell::default()),
            queue: Arc::new(queue),
            interrupt: Arc::new(RenderInterrupt::new()),
            tasks: None,
            retired: Vec::new(),
        }
    }

    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Start fetching and drawing `url`. Must be called inside a tokio runtime.
    ///
    /// Returns `false` when `url` is missing or blank (after reporting
    /// [`StreamErrorReason::OpenError`] to `listener`) or when a run is
    /// already fetching (no callback).
    pub fn start(&mut self, url: Option<&str>, listener: Arc<dyn StreamErrorListener>) -> bool {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            error!("start() stream url is missing");
            self.state.stop();
            listener.on_error(StreamErrorReason::OpenError);
            return false;
        };

        if self.is_started() {
            warn!(url, "start() called while already fetching");
            return false;
        }

        let state = Arc::new(StateCell::new(StreamState::Fetching));
        let queue = Arc::new(FrameQueue::new(self.queue_capacity));
        let interrupt = Arc::new(RenderInterrupt::new());
        let reporter = Arc::new(ErrorReporter::new(listener));

        let fetch = FetchLoop::new(
            Arc::clone(&self.connector),
            url.to_string(),
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&interrupt),
            reporter,
        );
        let render = RenderLoop::new(
            Arc::clone(&self.surface),
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&interrupt),
            self.options,
        );

        if let Some(previous) = self.tasks.take() {
            self.retired.retain(|run| !run.is_finished());
            if !previous.is_finished() {
                debug!("previous run still winding down");
                self.retired.push(previous);
            }
        }
        self.tasks = Some(RunTasks {
            fetch: tokio::spawn(fetch.run()),
            render: tokio::spawn(render.run()),
        });
        self.state = state;
        self.queue = queue;
        self.interrupt = interrupt;

        info!(url, capacity = self.queue_capacity, "liveview started");
        true
    }

    /// Ask the current run to stop. Both tasks exit at their next loop boundary.
    ///
    /// The renderer is interrupted right away so it posts nothing more to the
    /// surface once this returns.
    pub fn stop(&self) {
        if self.state.stop() == StreamState::Fetching {
            info!("liveview stop requested");
        }
        self.interrupt.interrupt();
    }

    pub fn is_started(&self) -> bool {
        self.state.is_fetching()
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    /// The drawing surface went away; the run stops regardless of the caller.
    pub fn on_surface_destroyed(&self) {
        if self.state.stop() == StreamState::Fetching {
            info!("surface destroyed, stopping liveview");
        }
        self.interrupt.interrupt();
    }

    /// Queue of the current run.
    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    pub fn surface(&self) -> &Arc<S> {
        &self.surface
    }

    /// Wait for both tasks of the current run, and any earlier run still
    /// winding down, to finish.
    ///
    /// Returns an empty report when nothing was started.
    pub async fn wait(&mut self) -> RunReport {
        for run in self.retired.drain(..) {
            if let Err(e) = run.fetch.await {
                error!(error = %e, "fetch task of previous run failed");
            }
            if let Err(e) = run.render.await {
                error!(error = %e, "render task of previous run failed");
            }
        }

        let Some(tasks) = self.tasks.take() else {
            return RunReport::default();
        };

        let fetch = tasks
            .fetch
            .await
            .map_err(|e| error!(error = %e, "fetch task failed"))
            .ok();
        let render = tasks
            .render
            .await
            .map_err(|e| error!(error = %e, "render task failed"))
            .ok();
        RunReport { fetch, render }
    }
}
