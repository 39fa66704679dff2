//! Production of new [`Value`]s.

use crate::error::GeneratorError;
use crate::model::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use uuid::Builder;

/// Provides the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces a fresh value on every call.
pub trait Generator: Send + Sync {
    fn new_value(&self) -> Result<Value, GeneratorError>;
}

/// Generates random (v4) UUIDs stamped with the clock's current time.
///
/// Identifier bytes come from the operating system's entropy source. If that
/// source fails the call returns [`GeneratorError::EntropyExhausted`] rather
/// than falling back to a weaker generator.
pub struct UuidGenerator {
    clock: Arc<dyn Clock>,
    entropy: Mutex<Box<dyn RngCore + Send>>,
}

impl UuidGenerator {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock), Box::new(OsRng))
    }

    pub fn with_parts(clock: Arc<dyn Clock>, entropy: Box<dyn RngCore + Send>) -> Self {
        Self {
            clock,
            entropy: Mutex::new(entropy),
        }
    }
}

impl Default for UuidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for UuidGenerator {
    fn new_value(&self) -> Result<Value, GeneratorError> {
        let mut bytes = [0u8; 16];
        self.entropy
            .lock()
            .try_fill_bytes(&mut bytes)
            .map_err(|err| GeneratorError::EntropyExhausted {
                reason: err.to_string(),
            })?;

        let id = Builder::from_random_bytes(bytes).into_uuid();
        Ok(Value::new(id.to_string(), self.clock.now()))
    }
}
