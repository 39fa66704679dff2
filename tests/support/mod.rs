#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use refresh_hash::{
    Generator, GeneratorError, RefreshError, Refresher, StoreError, Value, ValueService,
    ValueStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn value(id: &str) -> Value {
    Value::new(id, fixed_time())
}

/// Refresher driven by a closure that receives the 1-based call number.
pub struct FnRefresher<F> {
    calls: AtomicU64,
    delay: Option<Duration>,
    f: F,
}

impl<F> FnRefresher<F>
where
    F: Fn(u64) -> Result<(), RefreshError> + Send + Sync,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            delay: None,
            f,
        })
    }

    /// Every call sleeps `delay` (on the tokio clock) before returning.
    pub fn slow(delay: Duration, f: F) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            delay: Some(delay),
            f,
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Refresher for FnRefresher<F>
where
    F: Fn(u64) -> Result<(), RefreshError> + Send + Sync,
{
    async fn refresh(&self) -> Result<(), RefreshError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.f)(call)
    }
}

pub fn always_ok(_: u64) -> Result<(), RefreshError> {
    Ok(())
}

/// Produces `value-0`, `value-1`, ... at a fixed instant.
#[derive(Default)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    pub fn generated(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Generator for SequenceGenerator {
    fn new_value(&self) -> Result<Value, GeneratorError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(value(&format!("value-{n}")))
    }
}

pub struct ExhaustedGenerator;

impl Generator for ExhaustedGenerator {
    fn new_value(&self) -> Result<Value, GeneratorError> {
        Err(GeneratorError::EntropyExhausted {
            reason: "no entropy left".to_string(),
        })
    }
}

/// Store that is always empty and rejects every write.
pub struct RejectingStore;

impl ValueStore for RejectingStore {
    fn set(&self, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::write("disk full"))
    }

    fn get(&self) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }
}

/// Service double for front-end tests: returns canned results and counts
/// refreshes.
pub struct StubService {
    current: Mutex<Result<Value, RefreshError>>,
    refresh_result: Mutex<Result<Value, RefreshError>>,
    refresh_delay: Mutex<Option<Duration>>,
    refreshes: AtomicU64,
}

impl StubService {
    pub fn serving(value: Value) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Ok(value.clone())),
            refresh_result: Mutex::new(Ok(value)),
            refresh_delay: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        })
    }

    pub fn failing(err: RefreshError) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Err(err.clone())),
            refresh_result: Mutex::new(Err(err)),
            refresh_delay: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        })
    }

    /// Next refresh installs `next` as the current value.
    pub fn refreshes_to(self: &Arc<Self>, next: Value) -> Arc<Self> {
        *self.refresh_result.lock() = Ok(next);
        self.clone()
    }

    /// Refreshes sleep `delay` (on the tokio clock) before installing.
    pub fn refreshing_after(self: &Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.refresh_delay.lock() = Some(delay);
        self.clone()
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Refresher for StubService {
    async fn refresh(&self) -> Result<(), RefreshError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.refresh_result.lock().clone();
        let next = next?;
        *self.current.lock() = Ok(next);
        Ok(())
    }
}

#[async_trait]
impl ValueService for StubService {
    async fn get(&self) -> Result<Value, RefreshError> {
        self.current.lock().clone()
    }
}
