//! Runtime context: time, id generation, and injected capabilities.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capability::CapabilityRegistry;

/// Ambient services for one engine instance. Time and id generation sit
/// behind traits so tests can pin them.
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub capabilities: Arc<CapabilityRegistry>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider),
            id_generator: Arc::new(RealIdGenerator),
            capabilities: Arc::new(CapabilityRegistry::new()),
        }
    }
}

impl RuntimeContext {
    pub fn with_capabilities(mut self, capabilities: Arc<CapabilityRegistry>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }
}

pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;

    fn elapsed_secs(&self, since_millis: i64) -> u64 {
        let now = self.now_millis();
        if now >= since_millis {
            ((now - since_millis) / 1000) as u64
        } else {
            0
        }
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    pub fixed_millis: i64,
}

impl FakeTimeProvider {
    pub fn new(fixed_millis: i64) -> Self {
        Self { fixed_millis }
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now_millis(&self) -> i64 {
        self.fixed_millis
    }
}

pub struct FakeIdGenerator {
    pub prefix: String,
    counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_providers() {
        let time = FakeTimeProvider::new(5000);
        assert_eq!(time.now_millis(), 5000);
        assert_eq!(time.elapsed_secs(2000), 3);

        let ids = FakeIdGenerator::new("t");
        assert_eq!(ids.next_id(), "t-0");
        assert_eq!(ids.next_id(), "t-1");
    }

    #[test]
    fn test_real_id_generator_unique() {
        let ids = RealIdGenerator;
        assert_ne!(ids.next_id(), ids.next_id());
    }
}
