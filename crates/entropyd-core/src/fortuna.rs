//! Fortuna accumulator, reseeder and generator.
//!
//! Incoming TRNG hashes are spread over N accumulating SHA-256 pools by a
//! rotating index. When pool 0 has seen enough bytes since the last reseed
//! (and the minimum interval has passed), the generator key is rederived from
//! the pools on the doubling schedule: pool `i` participates in reseed `r`
//! iff `r mod 2^i == 0`. Output comes from AES-256 in counter mode; the
//! 128-bit block counter is never reset, and every generate call ends by
//! rotating the key with 32 freshly generated bytes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::store::Store;

const KEY_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

const META_RESEED_COUNT: &str = "fortuna.reseed_count";
const META_GENERATOR_KEY: &str = "fortuna.generator_key";
const META_GENERATOR_COUNTER: &str = "fortuna.generator_counter";
const META_LAST_RESEED_US: &str = "fortuna.last_reseed_us";

/// Point-in-time generator state, for health and stats reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FortunaSnapshot {
    pub reseed_count: u64,
    pub pool0_size: u64,
    pub next_pool: usize,
    pub generator_counter: u128,
    /// Wall-clock microseconds of the last reseed, 0 while cold.
    pub last_reseed_us: i64,
}

/// Pool accumulator plus AES-256-CTR generator.
pub struct Fortuna {
    pools: Vec<Sha256>,
    next_pool: usize,
    pool0_size: u64,
    reseed_count: u64,
    key: [u8; KEY_LEN],
    counter: u128,
    last_reseed: Option<Instant>,
    last_reseed_us: i64,
    reseed_threshold: u64,
    min_reseed_interval: Duration,
}

impl Fortuna {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            pools: (0..config.pool_count).map(|_| Sha256::new()).collect(),
            next_pool: 0,
            pool0_size: 0,
            reseed_count: 0,
            key: [0u8; KEY_LEN],
            counter: 0,
            last_reseed: None,
            last_reseed_us: 0,
            reseed_threshold: config.reseed_threshold,
            min_reseed_interval: config.min_reseed_interval,
        }
    }

    /// Absorb one entropy sample into the pool at the rotating index.
    pub fn add_entropy(&mut self, sample: &[u8]) {
        if self.next_pool == 0 {
            self.pool0_size += sample.len() as u64;
        }
        self.pools[self.next_pool].update(sample);
        self.next_pool = (self.next_pool + 1) % self.pools.len();
    }

    /// Reseed when pool 0 has accumulated enough and the minimum interval
    /// has passed. Returns whether a reseed happened.
    pub fn maybe_reseed(&mut self) -> bool {
        if self.pool0_size < self.reseed_threshold {
            return false;
        }
        if let Some(last) = self.last_reseed {
            if last.elapsed() < self.min_reseed_interval {
                return false;
            }
        }
        self.reseed();
        true
    }

    fn reseed(&mut self) {
        self.reseed_count += 1;
        let mut material = Sha256::new();
        material.update(self.key);
        let mut drained = Vec::new();
        for i in 0..self.pools.len() {
            if !pool_drains(self.reseed_count, i) {
                continue;
            }
            let pool = std::mem::replace(&mut self.pools[i], Sha256::new());
            material.update(Sha256::digest(pool.finalize()));
            drained.push(i);
        }
        self.key = material.finalize().into();
        self.pool0_size = 0;
        self.last_reseed = Some(Instant::now());
        self.last_reseed_us = now_micros();
        // The block counter deliberately survives the reseed.
        tracing::info!(
            reseed_count = self.reseed_count,
            pools = ?drained,
            "generator reseeded"
        );
    }

    /// Produce `n` pseudo-random bytes, then rotate the key. Fails with
    /// [`Error::NotSeeded`] (without touching the counter) before the first
    /// reseed.
    pub fn generate(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.reseed_count == 0 {
            return Err(Error::NotSeeded);
        }
        let mut out = vec![0u8; n];
        self.fill(&mut out);
        let mut next_key = [0u8; KEY_LEN];
        self.fill(&mut next_key);
        self.key = next_key;
        Ok(out)
    }

    /// AES-256-CTR keystream under the current key. The counter increments
    /// once per emitted block and is shared across output and key rotation.
    fn fill(&mut self, dst: &mut [u8]) {
        let cipher = Aes256::new(&self.key.into());
        let mut block = [0u8; BLOCK_LEN];
        let mut chunks = dst.chunks_exact_mut(BLOCK_LEN);
        for chunk in chunks.by_ref() {
            block.copy_from_slice(&self.counter.to_le_bytes());
            cipher.encrypt_block_b2b(block.as_ref().into(), chunk.into());
            self.counter = self.counter.wrapping_add(1);
        }
        let rem = chunks.into_remainder();
        if !rem.is_empty() {
            block.copy_from_slice(&self.counter.to_le_bytes());
            cipher.encrypt_block(block.as_mut().into());
            self.counter = self.counter.wrapping_add(1);
            rem.copy_from_slice(&block[..rem.len()]);
        }
    }

    pub fn reseed_count(&self) -> u64 {
        self.reseed_count
    }

    pub fn snapshot(&self) -> FortunaSnapshot {
        FortunaSnapshot {
            reseed_count: self.reseed_count,
            pool0_size: self.pool0_size,
            next_pool: self.next_pool,
            generator_counter: self.counter,
            last_reseed_us: self.last_reseed_us,
        }
    }

    /// Capture the persistable generator state. The accumulating pools
    /// themselves are process-local and restart empty.
    pub fn export_state(&self) -> PersistedState {
        PersistedState {
            reseed_count: self.reseed_count,
            key_hex: hex::encode(self.key),
            counter: self.counter,
            last_reseed_us: self.last_reseed_us,
        }
    }

    /// Recover persisted generator state, if any. Unreadable state is logged
    /// and ignored; the generator then starts cold.
    pub fn restore(&mut self, store: &Store) -> Result<()> {
        let Some(count) = store.metadata_get(META_RESEED_COUNT)? else {
            return Ok(());
        };
        let key_hex = store.metadata_get(META_GENERATOR_KEY)?.unwrap_or_default();
        let counter = store
            .metadata_get(META_GENERATOR_COUNTER)?
            .unwrap_or_default();
        let last_us = store
            .metadata_get(META_LAST_RESEED_US)?
            .unwrap_or_default();

        let parsed = (|| {
            let count: u64 = count.parse().ok()?;
            let key = hex::decode(&key_hex).ok()?;
            let key: [u8; KEY_LEN] = key.try_into().ok()?;
            let counter: u128 = counter.parse().ok()?;
            let last_us: i64 = last_us.parse().ok()?;
            Some((count, key, counter, last_us))
        })();
        match parsed {
            Some((count, key, counter, last_us)) => {
                self.reseed_count = count;
                self.key = key;
                self.counter = counter;
                self.last_reseed_us = last_us;
                // Instant-based interval gating restarts fresh; the next
                // reseed is allowed immediately.
                self.last_reseed = None;
                tracing::info!(reseed_count = count, "restored generator state");
            }
            None => {
                tracing::warn!("persisted generator state unreadable, starting cold");
            }
        }
        Ok(())
    }
}

/// Generator state captured under the pool lock and written to the metadata
/// table after it is released.
#[derive(Debug, Clone)]
pub struct PersistedState {
    reseed_count: u64,
    key_hex: String,
    counter: u128,
    last_reseed_us: i64,
}

impl PersistedState {
    pub fn write(&self, store: &Store) -> Result<()> {
        store.metadata_put(META_RESEED_COUNT, &self.reseed_count.to_string())?;
        store.metadata_put(META_GENERATOR_KEY, &self.key_hex)?;
        store.metadata_put(META_GENERATOR_COUNTER, &self.counter.to_string())?;
        store.metadata_put(META_LAST_RESEED_US, &self.last_reseed_us.to_string())?;
        Ok(())
    }
}

/// Pool `i` participates in reseed `r` iff `r mod 2^i == 0`.
pub fn pool_drains(reseed_count: u64, pool_index: usize) -> bool {
    match u32::try_from(pool_index) {
        Ok(shift) if shift < 64 => reseed_count % (1u64 << shift) == 0,
        _ => false,
    }
}

/// Summary of one processing tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub absorbed: usize,
    pub reseeded: bool,
    pub emitted: usize,
}

/// Periodic bridge from the TRNG queue into Fortuna records.
pub struct FortunaProcessor {
    store: Arc<Store>,
    fortuna: Arc<Mutex<Fortuna>>,
    batch_size: usize,
    seed_count: u32,
    chunk_size: usize,
    amplification_factor: u32,
}

impl FortunaProcessor {
    pub fn new(store: Arc<Store>, fortuna: Arc<Mutex<Fortuna>>, config: &ServiceConfig) -> Self {
        Self {
            store,
            fortuna,
            batch_size: config.batch_size,
            seed_count: config.seed_count,
            chunk_size: config.chunk_size,
            amplification_factor: config.amplification_factor,
        }
    }

    /// One processing step: drain a batch of unconsumed TRNG hashes, absorb
    /// them, evaluate the reseed trigger once, then emit amplified chunks.
    /// The pool lock is taken after the queue fetch and released before the
    /// queue appends.
    pub fn tick(&self) -> Result<TickSummary> {
        let records = self.store.fetch_trng(self.batch_size, 0, true)?;
        let emit_len = self.chunk_size * self.amplification_factor as usize;

        let (chunks, reseeded, state) = {
            let mut fortuna = self.fortuna.lock().unwrap();
            for record in &records {
                fortuna.add_entropy(&record.hash);
            }
            let reseeded = fortuna.maybe_reseed();
            let mut chunks = Vec::with_capacity(self.seed_count as usize);
            for _ in 0..self.seed_count {
                match fortuna.generate(emit_len) {
                    Ok(chunk) => chunks.push(chunk),
                    Err(Error::NotSeeded) => {
                        tracing::debug!("generator cold, emission skipped this tick");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            let state = (reseeded || !chunks.is_empty()).then(|| fortuna.export_state());
            (chunks, reseeded, state)
        };

        let emitted = chunks.len();
        for chunk in &chunks {
            self.store
                .append_fortuna(chunk, self.chunk_size as u32, self.amplification_factor)?;
        }
        if let Some(state) = state {
            state.write(&self.store)?;
        }
        Ok(TickSummary {
            absorbed: records.len(),
            reseeded,
            emitted,
        })
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::store::Source;

    fn test_config() -> ServiceConfig {
        let mut cfg = ServiceConfig::default();
        cfg.min_reseed_interval = Duration::ZERO;
        cfg
    }

    fn fed_fortuna(samples: usize) -> Fortuna {
        let mut fortuna = Fortuna::new(&test_config());
        for i in 0..samples {
            fortuna.add_entropy(&[i as u8; 32]);
        }
        fortuna
    }

    #[test]
    fn cold_generator_refuses_and_keeps_counter() {
        let mut fortuna = Fortuna::new(&test_config());
        assert!(matches!(fortuna.generate(32), Err(Error::NotSeeded)));
        assert_eq!(fortuna.snapshot().generator_counter, 0);
    }

    #[test]
    fn pool_index_rotates_and_pool0_counts_bytes() {
        let mut fortuna = Fortuna::new(&test_config());
        assert_eq!(fortuna.snapshot().next_pool, 0);
        fortuna.add_entropy(&[1u8; 32]);
        assert_eq!(fortuna.snapshot().next_pool, 1);
        assert_eq!(fortuna.snapshot().pool0_size, 32);
        fortuna.add_entropy(&[2u8; 32]);
        fortuna.add_entropy(&[3u8; 32]);
        // Wrapped around; the next sample lands in pool 0 again.
        assert_eq!(fortuna.snapshot().next_pool, 0);
        assert_eq!(fortuna.snapshot().pool0_size, 32);
        fortuna.add_entropy(&[4u8; 32]);
        assert_eq!(fortuna.snapshot().pool0_size, 64);
    }

    #[test]
    fn reseed_triggers_at_threshold_and_resets_pool0() {
        let mut fortuna = fed_fortuna(3);
        // 32 bytes in pool 0 so far: below the 64-byte threshold.
        assert!(!fortuna.maybe_reseed());
        fortuna.add_entropy(&[9u8; 32]);
        assert!(fortuna.maybe_reseed());
        assert_eq!(fortuna.reseed_count(), 1);
        assert_eq!(fortuna.snapshot().pool0_size, 0);

        let chunk = fortuna.generate(128).unwrap();
        assert_eq!(chunk.len(), 128);
    }

    #[test]
    fn min_interval_blocks_back_to_back_reseeds() {
        let mut cfg = test_config();
        cfg.min_reseed_interval = Duration::from_secs(3600);
        let mut fortuna = Fortuna::new(&cfg);
        for i in 0..4 {
            fortuna.add_entropy(&[i as u8; 32]);
        }
        assert!(fortuna.maybe_reseed());
        for i in 0..4 {
            fortuna.add_entropy(&[i as u8; 32]);
        }
        // Threshold is met again but the interval gate holds.
        assert!(!fortuna.maybe_reseed());
        assert_eq!(fortuna.reseed_count(), 1);
    }

    #[test]
    fn doubling_schedule_over_eight_reseeds() {
        let mut drains: Vec<Vec<usize>> = Vec::new();
        for r in 1u64..=8 {
            drains.push((0..3).filter(|&i| pool_drains(r, i)).collect());
        }
        let pool0: usize = drains.iter().filter(|d| d.contains(&0)).count();
        let pool1: Vec<u64> = (1..=8)
            .filter(|&r| pool_drains(r, 1))
            .collect();
        let pool2: Vec<u64> = (1..=8)
            .filter(|&r| pool_drains(r, 2))
            .collect();
        assert_eq!(pool0, 8);
        assert_eq!(pool1, vec![2, 4, 6, 8]);
        assert_eq!(pool2, vec![4, 8]);
    }

    #[test]
    fn huge_pool_index_never_drains() {
        assert!(!pool_drains(u64::MAX, 64));
        assert!(!pool_drains(8, 63));
    }

    #[test]
    fn identical_entropy_yields_identical_output() {
        let make = || {
            let mut f = fed_fortuna(4);
            assert!(f.maybe_reseed());
            f
        };
        let a = make().generate(256).unwrap();
        let b = make().generate(256).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn key_rotation_changes_successive_output() {
        let mut fortuna = fed_fortuna(4);
        fortuna.maybe_reseed();
        let a = fortuna.generate(64).unwrap();
        let b = fortuna.generate(64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn counter_advances_per_block_and_survives_reseed() {
        let mut fortuna = fed_fortuna(4);
        fortuna.maybe_reseed();
        // 20 bytes = 2 output blocks, plus 2 blocks of key rotation.
        fortuna.generate(20).unwrap();
        assert_eq!(fortuna.snapshot().generator_counter, 4);

        for i in 0..4 {
            fortuna.add_entropy(&[i as u8; 32]);
        }
        assert!(fortuna.maybe_reseed());
        assert_eq!(fortuna.snapshot().generator_counter, 4);
    }

    #[test]
    fn different_pool_content_diverges_after_reseed() {
        let mut a = Fortuna::new(&test_config());
        let mut b = Fortuna::new(&test_config());
        for i in 0..4u8 {
            a.add_entropy(&[i; 32]);
            b.add_entropy(&[i ^ 0xFF; 32]);
        }
        assert!(a.maybe_reseed());
        assert!(b.maybe_reseed());
        assert_ne!(a.generate(64).unwrap(), b.generate(64).unwrap());
    }

    fn processor_fixture(seed_count: u32) -> (Arc<Store>, Arc<Mutex<Fortuna>>, FortunaProcessor) {
        let mut cfg = test_config();
        cfg.seed_count = seed_count;
        let store = Arc::new(
            Store::open_at(Path::new(":memory:"), 100, 100, 16 * 1024 * 1024, None).unwrap(),
        );
        let fortuna = Arc::new(Mutex::new(Fortuna::new(&cfg)));
        let processor = FortunaProcessor::new(Arc::clone(&store), Arc::clone(&fortuna), &cfg);
        (store, fortuna, processor)
    }

    #[test]
    fn cold_tick_consumes_but_emits_nothing() {
        let (store, fortuna, processor) = processor_fixture(1);
        store.append_trng(&[1u8; 32], Source::Software).unwrap();
        let summary = processor.tick().unwrap();
        assert_eq!(summary.absorbed, 1);
        assert!(!summary.reseeded);
        assert_eq!(summary.emitted, 0);
        assert!(store.fetch_fortuna(10, 0, false).unwrap().is_empty());
        assert_eq!(fortuna.lock().unwrap().snapshot().generator_counter, 0);
    }

    #[test]
    fn warm_tick_emits_amplified_chunks() {
        let (store, _fortuna, processor) = processor_fixture(2);
        for i in 0..4u8 {
            store.append_trng(&[i; 32], Source::Software).unwrap();
        }
        let summary = processor.tick().unwrap();
        assert_eq!(summary.absorbed, 4);
        assert!(summary.reseeded);
        assert_eq!(summary.emitted, 2);

        let records = store.fetch_fortuna(10, 0, false).unwrap();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.data.len(), 128);
            assert_eq!(record.amplification_factor, 4);
        }
        // The drained TRNG records are gone from the unconsumed view.
        assert!(store.fetch_trng(10, 0, false).unwrap().is_empty());
    }

    #[test]
    fn state_persists_and_restores() {
        let (store, fortuna, processor) = processor_fixture(1);
        for i in 0..4u8 {
            store.append_trng(&[i; 32], Source::Software).unwrap();
        }
        processor.tick().unwrap();
        let before = fortuna.lock().unwrap().snapshot();
        assert_eq!(before.reseed_count, 1);

        let mut recovered = Fortuna::new(&test_config());
        recovered.restore(&store).unwrap();
        let after = recovered.snapshot();
        assert_eq!(after.reseed_count, before.reseed_count);
        assert_eq!(after.generator_counter, before.generator_counter);
        // A restored generator is already seeded.
        assert!(recovered.generate(32).is_ok());
    }
}
