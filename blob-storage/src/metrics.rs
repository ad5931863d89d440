use std::sync::Arc;

/// Shared metrics collector interface
///
/// This is a trait object that allows applications to plug in their own
/// metrics implementations (Prometheus, StatsD, etc.)
pub trait MetricsCollector: Send + Sync {
    fn blob_committed(&self);
    fn blob_already_present(&self);
    fn blob_deleted(&self);
    fn blob_corrupted(&self);
    fn integrity_rejected(&self);
    fn hook_failed(&self);
    fn bytes_received(&self, amount: u64);
    fn bytes_sent(&self, amount: u64);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn blob_committed(&self) {}
    fn blob_already_present(&self) {}
    fn blob_deleted(&self) {}
    fn blob_corrupted(&self) {}
    fn integrity_rejected(&self) {}
    fn hook_failed(&self) {}
    fn bytes_received(&self, _amount: u64) {}
    fn bytes_sent(&self, _amount: u64) {}
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn blob_committed(&self) {
        self.0.blob_committed();
    }

    pub fn blob_already_present(&self) {
        self.0.blob_already_present();
    }

    pub fn blob_deleted(&self) {
        self.0.blob_deleted();
    }

    pub fn blob_corrupted(&self) {
        self.0.blob_corrupted();
    }

    pub fn integrity_rejected(&self) {
        self.0.integrity_rejected();
    }

    pub fn hook_failed(&self) {
        self.0.hook_failed();
    }

    pub fn bytes_received(&self, amount: u64) {
        self.0.bytes_received(amount);
    }

    pub fn bytes_sent(&self, amount: u64) {
        self.0.bytes_sent(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

impl std::fmt::Debug for SharedMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedMetrics")
    }
}
