#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    /// Human readable name used to identify this worker stats when it is reported.
    tag: &'static str,
    /// Number of `load` calls received by the worker.
    pub load_requests: u32,
    /// Requests answered from the resolved-value cache without suspending.
    pub cache_hits: u32,
    /// Requests that joined a key already pending in the same round.
    pub deduplicated: u32,
    /// Number of times the worker invoked its batch function.
    pub dispatches: u32,
    /// Dispatches whose batch was failed as a whole (batch error or result shape mismatch).
    pub failed_dispatches: u32,
    /// The average number of keys sent to the batch function per dispatch.
    pub average_batch_size: f32,
    /// The max number of keys sent in a single dispatch.
    pub max_batch_size: u32,
    /// The min number of keys sent in a single dispatch.
    pub min_batch_size: u32,
    /// Pending keys failed because their execution ended before a flush.
    pub abandoned: u32,
}

impl WorkerStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, min_batch_size: u32::MAX, ..Default::default() }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub(crate) fn record_load_request(&mut self) {
        self.load_requests += 1;
    }

    pub(crate) fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub(crate) fn record_deduplicated(&mut self) {
        self.deduplicated += 1;
    }

    pub(crate) fn record_dispatch(&mut self, batch_size: u32) {
        let new_total = self.dispatches + 1;
        self.average_batch_size = (((self.average_batch_size as f64 * self.dispatches as f64)
            + batch_size as f64)
            / new_total as f64) as f32;
        self.dispatches = new_total;
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size = self.min_batch_size.min(batch_size);
    }

    pub(crate) fn record_failed_dispatch(&mut self) {
        self.failed_dispatches += 1;
    }

    pub(crate) fn record_abandoned(&mut self, keys: u32) {
        self.abandoned += keys;
    }
}
