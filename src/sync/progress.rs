use std::sync::Mutex;

/// Receives sync progress. Calls happen on the pipeline's own task and must
/// return quickly; the pipeline ignores what the observer does with them.
///
/// Any `FnMut(u64, u64)` closure is a download-only observer.
pub trait SyncProgress: Send {
    /// Archive bytes received so far out of the announced total.
    fn download(&mut self, downloaded: u64, total: u64);

    /// Assets processed so far out of the assets found in the archive.
    fn processing(&mut self, _processed: usize, _total: usize) {}
}

impl<F> SyncProgress for F
where
    F: FnMut(u64, u64) + Send,
{
    fn download(&mut self, downloaded: u64, total: u64) {
        self(downloaded, total)
    }
}

/// Wraps the caller's observer for the duration of one sync.
///
/// A retried download restarts from byte zero; the gate drops reports below
/// the high-water mark so observers only ever see non-decreasing values.
pub(crate) struct ProgressGate<'a> {
    state: Mutex<GateState<'a>>,
}

struct GateState<'a> {
    sink: &'a mut dyn SyncProgress,
    high_water: u64,
}

impl<'a> ProgressGate<'a> {
    pub(crate) fn new(sink: &'a mut dyn SyncProgress) -> Self {
        Self {
            state: Mutex::new(GateState {
                sink,
                high_water: 0,
            }),
        }
    }

    pub(crate) fn download(&self, downloaded: u64, total: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if downloaded < state.high_water {
            return;
        }
        state.high_water = downloaded;
        state.sink.download(downloaded, total);
    }

    pub(crate) fn processing(&self, processed: usize, total: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sink.processing(processed, total);
    }
}
