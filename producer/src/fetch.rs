use liveview_common::{ErrorReporter, FrameQueue, RenderInterrupt, StateCell, StreamErrorReason};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::slicer::{Connector, PayloadSlicer};

/// What a finished fetch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub payloads: u64,
    pub null_payloads: u64,
    pub error: Option<StreamErrorReason>,
}

/// Producer task: pulls payloads from a slicer into the frame queue until
/// the run stops or the connection fails.
pub struct FetchLoop<C: Connector> {
    connector: Arc<C>,
    url: String,
    queue: Arc<FrameQueue>,
    state: Arc<StateCell>,
    interrupt: Arc<RenderInterrupt>,
    reporter: Arc<ErrorReporter>,
}

impl<C: Connector> FetchLoop<C> {
    pub fn new(
        connector: Arc<C>,
        url: String,
        queue: Arc<FrameQueue>,
        state: Arc<StateCell>,
        interrupt: Arc<RenderInterrupt>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            connector,
            url,
            queue,
            state,
            interrupt,
            reporter,
        }
    }

    pub async fn run(self) -> FetchSummary {
        let mut summary = FetchSummary::default();
        info!(url = self.url, "starting to fetch liveview payloads");

        let opened = tokio::select! {
            biased;
            opened = self.connector.open(&self.url) => Some(opened),
            _ = self.state.stopped() => None,
        };
        match opened {
            Some(Ok(mut slicer)) => {
                self.pump(&mut slicer, &mut summary).await;
                slicer.close();
            }
            Some(Err(e)) => {
                warn!(error = %e, url = self.url, "failed to open liveview stream");
                self.fail(StreamErrorReason::OpenError, &mut summary);
            }
            None => debug!(url = self.url, "stopped while opening liveview stream"),
        }

        // Termination sequence: wake the renderer, drop stale frames, end the run.
        self.interrupt.interrupt();
        self.queue.clear();
        self.state.stop();

        info!(
            payloads = summary.payloads,
            dropped = self.queue.dropped(),
            error = ?summary.error,
            reported = self.reporter.has_reported(),
            "fetch loop finished"
        );
        summary
    }

    async fn pump(&self, slicer: &mut C::Slicer, summary: &mut FetchSummary) {
        while self.state.is_fetching() {
            match slicer.next_payload().await {
                Ok(Some(payload)) => {
                    summary.payloads += 1;
                    if summary.payloads % 100 == 0 {
                        debug!(total = summary.payloads, "payloads fetched");
                    }
                    self.queue.push(payload);
                }
                Ok(None) => {
                    // Multipart parts always carry an image; an empty one is a camera glitch.
                    error!("liveview payload is empty, skipping");
                    summary.null_payloads += 1;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        payloads = summary.payloads,
                        "I/O error while fetching liveview"
                    );
                    self.fail(StreamErrorReason::IoError, summary);
                    return;
                }
            }
        }
        debug!("fetch loop observed stop");
    }

    fn fail(&self, reason: StreamErrorReason, summary: &mut FetchSummary) {
        // A failure after stop() is the teardown itself, not something to report.
        if !self.state.is_fetching() {
            debug!(%reason, "ignoring failure after stop");
            return;
        }
        summary.error = Some(reason);
        self.reporter.report(reason);
    }
}
