//! Periodic TRNG producer.
//!
//! One tick draws a 32-byte random block, hashes it with SHA-256 and appends
//! the hash to the TRNG queue tagged with its provenance. The mode is chosen
//! once at startup and never retried per call; a mid-life hardware failure
//! flips the producer into software mode for the rest of the process and the
//! failing tick completes in software.

use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::secure_element::SecureElement;
use crate::store::{Source, Store};

/// A device that hands back 32-byte hashes of fresh randomness.
pub trait EntropyDevice: Send {
    /// Produce one 32-byte hash.
    fn hash(&mut self) -> Result<[u8; 32]>;

    /// Revalidate the device with a fresh draw.
    fn probe(&mut self) -> Result<()>;
}

impl EntropyDevice for SecureElement {
    fn hash(&mut self) -> Result<[u8; 32]> {
        let block = self.random()?;
        self.sha256(&block)
    }

    fn probe(&mut self) -> Result<()> {
        self.wake()?;
        self.random()?;
        Ok(())
    }
}

/// Producer mode state machine. `Hardware` can only move to
/// `HardwareFailed`; both fallback states are terminal for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// Secure element active; records tagged `hardware`.
    Hardware,
    /// Secure element failed mid-life; OS entropy for the rest of the process.
    HardwareFailed,
    /// OS entropy from startup (bus unavailable or mock mode forced).
    Software,
}

impl ProducerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProducerMode::Hardware => "hardware",
            ProducerMode::HardwareFailed => "hardware_failed",
            ProducerMode::Software => "software",
        }
    }
}

struct ProducerState {
    mode: ProducerMode,
    device: Option<Box<dyn EntropyDevice>>,
    last_error: Option<String>,
}

/// Periodic hash producer with a startup-chosen entropy mode.
pub struct TrngProducer {
    state: Mutex<ProducerState>,
}

impl TrngProducer {
    /// Choose the entropy mode once: try the secure element unless mock mode
    /// is forced, fall back to the OS entropy source otherwise. Fails only
    /// when neither the bus nor the OS source works.
    pub fn init(config: &ServiceConfig) -> Result<Self> {
        if config.force_mock_mode {
            tracing::info!("mock mode forced, producing software-tagged records");
            let producer = Self::software(None);
            software_hash()?;
            return Ok(producer);
        }
        match SecureElement::open(config.i2c_bus_number) {
            Ok(element) => {
                tracing::info!(bus = config.i2c_bus_number, "secure element active");
                Ok(Self::with_device(Box::new(element)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "secure element unavailable, using software mode");
                let producer = Self::software(Some(e.to_string()));
                software_hash()?;
                Ok(producer)
            }
        }
    }

    /// Hardware-mode producer around an already-open device.
    pub fn with_device(device: Box<dyn EntropyDevice>) -> Self {
        Self {
            state: Mutex::new(ProducerState {
                mode: ProducerMode::Hardware,
                device: Some(device),
                last_error: None,
            }),
        }
    }

    /// Software-mode producer.
    pub fn software(last_error: Option<String>) -> Self {
        Self {
            state: Mutex::new(ProducerState {
                mode: ProducerMode::Software,
                device: None,
                last_error,
            }),
        }
    }

    /// One production step: hash plus provenance, appended to the queue.
    pub fn tick(&self, store: &Store) -> Result<i64> {
        let (hash, source) = self.next_hash()?;
        let id = store.append_trng(&hash, source)?;
        tracing::debug!(id, source = %source, "appended TRNG hash");
        Ok(id)
    }

    /// Produce one hash, tagged with the mode at the moment of production.
    pub fn next_hash(&self) -> Result<([u8; 32], Source)> {
        let mut state = self.state.lock().unwrap();
        if state.mode == ProducerMode::Hardware {
            if let Some(device) = state.device.as_mut() {
                match device.hash() {
                    Ok(hash) => return Ok((hash, Source::Hardware)),
                    Err(e) => {
                        tracing::warn!(error = %e, "secure element failed, switching to software mode");
                        state.last_error = Some(e.to_string());
                        state.mode = ProducerMode::HardwareFailed;
                        state.device = None;
                    }
                }
            }
        }
        let hash = software_hash()?;
        Ok((hash, Source::Software))
    }

    /// Liveness probe. Hardware mode revalidates with a fresh draw; software
    /// modes are healthy whenever the OS source is.
    pub fn health_check(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.mode {
            ProducerMode::Hardware => {
                let Some(device) = state.device.as_mut() else {
                    return false;
                };
                match device.probe() {
                    Ok(()) => true,
                    Err(e) => {
                        state.last_error = Some(e.to_string());
                        false
                    }
                }
            }
            ProducerMode::HardwareFailed | ProducerMode::Software => software_hash().is_ok(),
        }
    }

    pub fn mode(&self) -> ProducerMode {
        self.state.lock().unwrap().mode
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().last_error.clone()
    }
}

/// SHA-256 over one 32-byte block from the OS entropy source.
fn software_hash() -> Result<[u8; 32]> {
    let mut block = [0u8; 32];
    getrandom::getrandom(&mut block)
        .map_err(|e| Error::HardwareUnavailable(format!("os entropy source failed: {e}")))?;
    Ok(Sha256::digest(block).into())
}
