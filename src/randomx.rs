use super::*;

use {
    crossbeam_channel::{Receiver, bounded},
    randomx_rs::{RandomXCache, RandomXDataset, RandomXFlag, RandomXVM},
    std::sync::Mutex,
};

pub const HASH_SIZE: usize = 32;

/// LIGHT verifies with the 256 MiB cache only; FULL preloads the ~2 GiB
/// dataset for fast mining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Light,
    Full,
}

struct EngineState {
    key: Vec<u8>,
    mode: Mode,
    safe_mode: bool,
    flags: RandomXFlag,
    cache: RandomXCache,
    dataset: Option<RandomXDataset>,
}

impl EngineState {
    fn vm_flags(&self) -> RandomXFlag {
        let mut flags = self.flags;
        if self.dataset.is_some() {
            flags.insert(RandomXFlag::FLAG_FULL_MEM);
        }
        flags
    }
}

/// The memory-hard hash engine. One per process: the cache and dataset are
/// shared by every VM, mining VMs are owned by their worker threads, and a
/// dedicated validation VM sits behind its own lock so share verification
/// never races the miners.
pub struct RandomxEngine {
    state: Mutex<Option<EngineState>>,
    validation_vm: Mutex<Option<RandomXVM>>,
    initializations: AtomicU64,
    mining: AtomicBool,
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    session_hashes: Arc<AtomicU64>,
    session_start: Mutex<Option<Instant>>,
    last_hashrate: AtomicF64,
}

impl Default for RandomxEngine {
    fn default() -> Self {
        Self::new()
    }
}

// randomx-rs's cache/dataset/VM handles wrap raw pointers and don't derive
// `Send`/`Sync`, even though the underlying RandomX C API guarantees the
// cache and dataset are read-only (and thus shareable) once built, and every
// VM here is either confined to the single worker thread that owns it or
// guarded by `validation_vm`'s mutex.
unsafe impl Send for RandomxEngine {}
unsafe impl Sync for RandomxEngine {}

impl RandomxEngine {
    pub fn new() -> Self {
        let flags = RandomXFlag::get_recommended_flags();
        info!(
            "RandomX flags {flags:?} (AES={}, JIT={})",
            flags.contains(RandomXFlag::FLAG_HARD_AES),
            flags.contains(RandomXFlag::FLAG_JIT),
        );

        Self {
            state: Mutex::new(None),
            validation_vm: Mutex::new(None),
            initializations: AtomicU64::new(0),
            mining: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            session_hashes: Arc::new(AtomicU64::new(0)),
            session_start: Mutex::new(None),
            last_hashrate: AtomicF64::default(),
        }
    }

    /// Derives the shared cache (and in FULL mode the dataset) from `key`.
    /// Idempotent: an equal key with equal options is a no-op. Safe mode
    /// drops the JIT and wide-vector Argon2 paths.
    pub fn init(&self, key: &[u8], mode: Mode, safe_mode: bool) -> Result {
        ensure!(
            !self.mining.load(Ordering::SeqCst),
            "cannot rekey the hash engine while mining"
        );

        // Lock order everywhere is validation VM first, then state.
        let mut validation_vm = self.validation_vm.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        if let Some(current) = state.as_ref() {
            if current.key == key && current.mode == mode && current.safe_mode == safe_mode {
                return Ok(());
            }
        }

        let mut flags = RandomXFlag::get_recommended_flags();
        if safe_mode {
            info!("RandomX safe mode: disabling JIT and AVX2");
            flags.remove(RandomXFlag::FLAG_JIT);
            flags.remove(RandomXFlag::FLAG_ARGON2_AVX2);
        }

        info!("Allocating RandomX cache ({} byte key)", key.len());
        let cache = match RandomXCache::new(flags, key) {
            Ok(cache) => cache,
            Err(err) => {
                warn!("RandomX cache allocation failed ({err}), retrying without JIT");
                flags.remove(RandomXFlag::FLAG_JIT);
                RandomXCache::new(flags, key).context("RandomX cache allocation failed")?
            }
        };

        let mut mode = mode;
        let dataset = if mode == Mode::Full {
            info!("Allocating RandomX dataset (~2 GiB, this may take a while)");
            match RandomXDataset::new(RandomXFlag::FLAG_DEFAULT, cache.clone(), 0) {
                Ok(dataset) => Some(dataset),
                Err(err) => {
                    warn!("RandomX dataset allocation failed ({err}), falling back to light mode");
                    mode = Mode::Light;
                    None
                }
            }
        } else {
            None
        };

        *state = Some(EngineState {
            key: key.to_vec(),
            mode,
            safe_mode,
            flags,
            cache,
            dataset,
        });

        // A validation VM built against the previous cache is stale now.
        *validation_vm = None;

        self.initializations.fetch_add(1, Ordering::SeqCst);
        info!(
            "RandomX initialized (mode={})",
            if mode == Mode::Full { "FULL" } else { "LIGHT" }
        );

        Ok(())
    }

    /// Rekeys only when the epoch key actually changed. First use lazily
    /// initializes in LIGHT mode, which is what the share validator wants.
    pub fn rekey_if_needed(&self, key: &[u8]) -> Result {
        let (mode, safe_mode) = {
            let state = self.state.lock().unwrap();
            match state.as_ref() {
                Some(current) if current.key == key => return Ok(()),
                Some(current) => (current.mode, current.safe_mode),
                None => (Mode::Light, false),
            }
        };

        info!("RandomX key changed, reinitializing");
        self.init(key, mode, safe_mode)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    /// How many times the cache has been (re)built. Rekeying with an
    /// unchanged key must not move this.
    pub fn initializations(&self) -> u64 {
        self.initializations.load(Ordering::SeqCst)
    }

    /// Hashes through the dedicated validation VM, constructing it on first
    /// use. Never touches the mining VMs.
    pub fn hash(&self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
        let mut vm = self.validation_vm.lock().unwrap();

        if vm.is_none() {
            let state = self.state.lock().unwrap();
            let state = state.as_ref().context("hash engine not initialized")?;
            *vm = Some(
                RandomXVM::new(
                    state.vm_flags(),
                    Some(state.cache.clone()),
                    state.dataset.clone(),
                )
                .context("failed to create validation VM")?,
            );
        }

        let output = vm
            .as_ref()
            .expect("just constructed")
            .calculate_hash(input)
            .context("RandomX hash failed")?;

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&output);
        Ok(hash)
    }

    /// Spins up `num_threads` mining VMs (0 = cores − 1), splits the 32-bit
    /// nonce space evenly, and grinds until a header hashes at or below
    /// `target` or [`Self::stop_mining`] is called. The winning header
    /// arrives on the returned channel exactly once.
    pub fn start_mining(
        &self,
        header: BlockHeader,
        target: [u8; 32],
        num_threads: usize,
    ) -> Result<Receiver<BlockHeader>> {
        self.stop_mining();

        let (vm_flags, cache, dataset) = {
            let state = self.state.lock().unwrap();
            let state = state.as_ref().context("cannot mine, engine not initialized")?;
            (state.vm_flags(), state.cache.clone(), state.dataset.clone())
        };

        let num_threads = if num_threads == 0 {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1)
        } else {
            num_threads
        };

        let mut vms = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            match RandomXVM::new(vm_flags, Some(cache.clone()), dataset.clone()) {
                Ok(vm) => vms.push(vm),
                Err(err) => warn!("failed to create mining VM for thread {i}: {err}"),
            }
        }
        ensure!(!vms.is_empty(), "no mining VMs available");

        let num_threads = vms.len();
        info!("RandomX mining with {num_threads} threads");

        self.stop.store(false, Ordering::SeqCst);
        self.mining.store(true, Ordering::SeqCst);

        {
            let mut session_start = self.session_start.lock().unwrap();
            if session_start.is_none() {
                *session_start = Some(Instant::now());
                self.session_hashes.store(0, Ordering::SeqCst);
            }
        }

        let (solution_tx, solution_rx) = bounded(1);
        let nonce_range = u32::MAX / num_threads as u32;

        let mut workers = self.workers.lock().unwrap();
        for (thread_id, vm) in vms.into_iter().enumerate() {
            let header = header.clone();
            let stop = self.stop.clone();
            let session_hashes = self.session_hashes.clone();
            let solution_tx = solution_tx.clone();
            let start_nonce = thread_id as u32 * nonce_range;
            let vm = SendVm(vm);

            workers.push(thread::spawn(move || {
                let vm = vm.into_inner();
                mine_thread(
                    thread_id,
                    vm,
                    header,
                    target,
                    start_nonce,
                    nonce_range,
                    stop,
                    session_hashes,
                    solution_tx,
                );
            }));
        }

        Ok(solution_rx)
    }

    /// Cooperative stop: sets the flag, joins every worker, saves the final
    /// session hashrate, and resets the session counters.
    pub fn stop_mining(&self) {
        if !self.mining.load(Ordering::SeqCst) {
            return;
        }

        self.stop.store(true, Ordering::SeqCst);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }

        let mut session_start = self.session_start.lock().unwrap();
        if let Some(started) = session_start.take() {
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                self.last_hashrate
                    .store(self.session_hashes.load(Ordering::SeqCst) as f64 / elapsed);
            }
        }
        self.session_hashes.store(0, Ordering::SeqCst);

        self.mining.store(false, Ordering::SeqCst);
        info!("RandomX mining stopped");
    }

    /// Hashes per second over the current session, or the last saved value
    /// when idle.
    pub fn hashrate(&self) -> f64 {
        if !self.mining.load(Ordering::SeqCst) {
            return self.last_hashrate.load();
        }

        let session_start = self.session_start.lock().unwrap();
        let Some(started) = *session_start else {
            return self.last_hashrate.load();
        };

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return self.last_hashrate.load();
        }

        let rate = self.session_hashes.load(Ordering::SeqCst) as f64 / elapsed;
        self.last_hashrate.store(rate);
        rate
    }
}

impl Drop for RandomxEngine {
    fn drop(&mut self) {
        self.stop_mining();
    }
}

/// Carries an owned `RandomXVM` into its worker thread. See the
/// `RandomxEngine` `Send`/`Sync` note above: each VM here is only ever
/// touched by the single thread it's moved into.
struct SendVm(RandomXVM);
unsafe impl Send for SendVm {}

impl SendVm {
    fn into_inner(self) -> RandomXVM {
        self.0
    }
}

#[allow(clippy::too_many_arguments)]
fn mine_thread(
    thread_id: usize,
    vm: RandomXVM,
    mut header: BlockHeader,
    target: [u8; 32],
    start_nonce: u32,
    nonce_range: u32,
    stop: Arc<AtomicBool>,
    session_hashes: Arc<AtomicU64>,
    solution_tx: crossbeam_channel::Sender<BlockHeader>,
) {
    debug!(
        "mining thread {thread_id} started (nonce {start_nonce}..{})",
        start_nonce.saturating_add(nonce_range)
    );

    let end_nonce = start_nonce.saturating_add(nonce_range);
    let mut nonce = start_nonce;
    let mut local_hashes: u64 = 0;

    while !stop.load(Ordering::Relaxed) && nonce < end_nonce {
        header.nonce = nonce;
        let bytes = header.serialize();

        let output = match vm.calculate_hash(&bytes) {
            Ok(output) => output,
            Err(err) => {
                error!("mining thread {thread_id}: hash failed: {err}");
                break;
            }
        };

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&output);

        local_hashes += 1;
        if local_hashes & 0x3f == 0 {
            session_hashes.fetch_add(64, Ordering::Relaxed);
        }

        if local_hashes == 1 && thread_id == 0 {
            debug!(
                "first hash {} target {}",
                hex::encode(hash),
                hex::encode(target)
            );
        }

        if meets_target(&hash, &target) {
            // The swap makes exactly one winner deliver the solution even
            // when several threads cross the target in the same instant.
            if !stop.swap(true, Ordering::SeqCst) {
                info!(
                    "mining thread {thread_id} found block, nonce={nonce} hash={}",
                    hex::encode(hash)
                );
                let _ = solution_tx.send(header.clone());
            }
            break;
        }

        if nonce & 0xff == 0 {
            thread::sleep(Duration::from_micros(100));
        }

        nonce += 1;
    }

    session_hashes.fetch_add(local_hashes & 0x3f, Ordering::Relaxed);
    debug!("mining thread {thread_id} stopped after {local_hashes} hashes");
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &[u8] = b"test key 000";

    #[test]
    fn rekey_with_unchanged_key_is_free() {
        let engine = RandomxEngine::new();
        engine.rekey_if_needed(TEST_KEY).unwrap();
        assert_eq!(engine.initializations(), 1);

        engine.rekey_if_needed(TEST_KEY).unwrap();
        engine.rekey_if_needed(TEST_KEY).unwrap();
        assert_eq!(engine.initializations(), 1);

        engine.rekey_if_needed(b"another key").unwrap();
        assert_eq!(engine.initializations(), 2);
    }

    #[test]
    fn light_hash_matches_reference_vector() {
        let engine = RandomxEngine::new();
        engine.init(TEST_KEY, Mode::Light, false).unwrap();

        let hash = engine.hash(b"This is a test").unwrap();
        assert_eq!(
            hex::encode(hash),
            "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f"
        );

        // deterministic across calls
        assert_eq!(engine.hash(b"This is a test").unwrap(), hash);
    }

    #[test]
    fn init_with_same_key_is_idempotent() {
        let engine = RandomxEngine::new();
        engine.init(TEST_KEY, Mode::Light, false).unwrap();
        let first = engine.hash(b"input").unwrap();

        engine.init(TEST_KEY, Mode::Light, false).unwrap();
        assert_eq!(engine.initializations(), 1);
        assert_eq!(engine.hash(b"input").unwrap(), first);
    }

    #[test]
    fn mining_finds_solution_against_easy_target() {
        let engine = RandomxEngine::new();
        engine.init(TEST_KEY, Mode::Light, false).unwrap();

        let header = BlockHeader {
            bits: 0x207f_ffff,
            ..Default::default()
        };

        // Any hash meets an all-ones target, so the very first nonce wins.
        let solutions = engine
            .start_mining(header.clone(), [0xff; 32], 1)
            .unwrap();

        let solved = solutions
            .recv_timeout(Duration::from_secs(120))
            .expect("solution should arrive");
        engine.stop_mining();

        assert_eq!(solved.prev_hash, header.prev_hash);
        let hash = engine.hash(&solved.serialize()).unwrap();
        assert!(meets_target(&hash, &[0xff; 32]));

        // exactly once: the channel holds no second solution
        assert!(solutions.try_recv().is_err());
        assert!(!engine.is_mining());
    }

    #[test]
    #[ignore = "allocates the full 2 GiB dataset"]
    fn full_mode_hash_equals_light_mode_hash() {
        let light = RandomxEngine::new();
        light.init(TEST_KEY, Mode::Light, false).unwrap();

        let full = RandomxEngine::new();
        full.init(TEST_KEY, Mode::Full, false).unwrap();

        for input in [b"".as_slice(), b"abc", b"This is a test"] {
            assert_eq!(light.hash(input).unwrap(), full.hash(input).unwrap());
        }
    }

    #[test]
    fn rekey_while_mining_is_rejected() {
        let engine = RandomxEngine::new();
        engine.init(TEST_KEY, Mode::Light, false).unwrap();

        let _solutions = engine
            .start_mining(BlockHeader::default(), [0u8; 32], 1)
            .unwrap();

        assert!(engine.init(b"other key", Mode::Light, false).is_err());

        engine.stop_mining();
        assert!(engine.init(b"other key", Mode::Light, false).is_ok());
    }
}
