use super::*;

use {
    bitcoin::hashes::{Hash as _, sha256},
    crossbeam_channel::{Receiver, Sender, unbounded},
    num_bigint::BigUint,
    std::sync::Mutex,
};

mod backend;
mod primes;
mod segment;
mod verify;
mod wheel;

pub use {
    backend::{BackendScan, GpuBackendKind, SieveBackend, available_devices},
    primes::{sieving_primes, small_primes},
    segment::SieveSegment,
    verify::{
        FERMAT_ROUNDS, FERMAT_WITNESSES, compact_to_merit, fermat_probable_prime,
        gap_interior_composite, ln_big, merit, merit_to_compact, verify_gap,
    },
    wheel::{WHEEL_MODULUS, Wheel},
};

pub const DEFAULT_SIEVE_SIZE: usize = 32 * 1024 * 1024;
pub const DEFAULT_SIEVE_PRIMES: usize = 900_000;

pub const SHIFT_MIN: u32 = 14;
pub const SHIFT_MAX: u32 = 65_536;
pub const DEFAULT_SHIFT: u32 = 25;

/// Fallback merit target when a template carries no gap difficulty.
pub const INITIAL_TARGET_MERIT: f64 = 20.0;

/// Gaps shorter than this are never worth a verification pass.
const MIN_INTERESTING_GAP: u32 = 10;

#[derive(Debug, Clone)]
pub struct GapMinerConfig {
    pub threads: usize,
    pub shift: u32,
    pub sieve_size: usize,
    pub sieve_primes: usize,
}

impl Default for GapMinerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            shift: DEFAULT_SHIFT,
            sieve_size: DEFAULT_SIEVE_SIZE,
            sieve_primes: DEFAULT_SIEVE_PRIMES,
        }
    }
}

#[derive(Debug, Default)]
pub struct GapStats {
    primes_checked: AtomicU64,
    gaps_found: AtomicU64,
    best_merit: AtomicF64,
    sieve_cycles: AtomicU64,
}

impl GapStats {
    pub fn snapshot(&self) -> GapStatsSnapshot {
        GapStatsSnapshot {
            primes_checked: self.primes_checked.load(Ordering::Relaxed),
            gaps_found: self.gaps_found.load(Ordering::Relaxed),
            best_merit: self.best_merit.load(),
            sieve_cycles: self.sieve_cycles.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.primes_checked.store(0, Ordering::Relaxed);
        self.gaps_found.store(0, Ordering::Relaxed);
        self.best_merit.store(0.0);
        self.sieve_cycles.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GapStatsSnapshot {
    pub primes_checked: u64,
    pub gaps_found: u64,
    pub best_merit: f64,
    pub sieve_cycles: u64,
}

/// A verified gap meeting the merit target, ready to be written into a
/// header's proof fields.
#[derive(Debug, Clone, PartialEq)]
pub struct GapSolution {
    pub shift: u32,
    pub adder: [u8; 32],
    pub gap_size: u32,
    pub merit: f64,
}

/// The prime-gap search engine. Builds its prime table and wheel once, then
/// runs sieve cycles across worker threads until stopped.
pub struct GapMiner {
    config: GapMinerConfig,
    primes: Arc<Vec<u32>>,
    wheel: Arc<Wheel>,
    stats: Arc<GapStats>,
    stop: Arc<AtomicBool>,
    mining: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    backends: Mutex<Vec<Box<dyn SieveBackend>>>,
}

impl GapMiner {
    pub fn new(mut config: GapMinerConfig) -> Self {
        config.shift = config.shift.clamp(SHIFT_MIN, SHIFT_MAX);
        if config.threads == 0 {
            config.threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        }

        let sieve_bits = config.sieve_size * 8;
        let primes = Arc::new(sieving_primes(sieve_bits, config.sieve_primes));
        let wheel = Arc::new(Wheel::default());

        info!(
            "gap miner: {} threads, {} byte sieve, {} sieving primes, wheel {}",
            config.threads,
            config.sieve_size,
            primes.len(),
            wheel.modulus(),
        );

        Self {
            config,
            primes,
            wheel,
            stats: Arc::new(GapStats::default()),
            stop: Arc::new(AtomicBool::new(false)),
            mining: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            backends: Mutex::new(Vec::new()),
        }
    }

    pub fn shift(&self) -> u32 {
        self.config.shift
    }

    pub fn threads(&self) -> usize {
        self.config.threads
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> GapStatsSnapshot {
        self.stats.snapshot()
    }

    /// Hands a GPU backend to the miner. Takes effect on the next
    /// `start_mining`.
    pub fn add_backend(&self, backend: Box<dyn SieveBackend>) {
        info!("gap miner: enabling backend {}", backend.name());
        self.backends.lock().unwrap().push(backend);
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends
            .lock()
            .unwrap()
            .iter()
            .map(|backend| backend.name())
            .collect()
    }

    /// Derives the search base from the header and fans worker threads out
    /// over disjoint adder ranges. Verified solutions at or above
    /// `target_merit` arrive on the returned channel; several may arrive,
    /// possibly concurrently from different threads.
    pub fn start_mining(
        &self,
        header: &BlockHeader,
        target_merit: f64,
    ) -> Result<Receiver<GapSolution>> {
        self.stop_mining();

        let hash =
            sha256::Hash::hash(&header.without_gap_fields().serialize()).to_byte_array();
        let hash_int = BigUint::from_bytes_le(&hash);
        let shift = self.config.shift;

        let search = Arc::new(Search {
            base: &hash_int << shift,
            approx_ln: shift as f64 * std::f64::consts::LN_2 + ln_big(&(&hash_int + 1u32)),
            shift,
            target_merit,
            adder_limit: if shift < 64 { 1u64 << shift } else { u64::MAX },
            primes: self.primes.clone(),
            wheel: self.wheel.clone(),
            stats: self.stats.clone(),
            stop: self.stop.clone(),
        });

        info!(
            "gap mining: target merit {target_merit:.2}, shift {shift}, base {} bits",
            search.base.bits()
        );

        self.stop.store(false, Ordering::SeqCst);
        self.mining.store(true, Ordering::SeqCst);
        self.stats.reset();

        let (solution_tx, solution_rx) = unbounded();
        let sieve_bits = (self.config.sieve_size * 8) as u64;
        let cpu_threads = self.config.threads as u64;

        let mut workers = self.workers.lock().unwrap();

        let backends = std::mem::take(&mut *self.backends.lock().unwrap());
        let gpu_workers = backends.len() as u64;
        let stride = (cpu_threads + gpu_workers) * sieve_bits;

        for (index, backend) in backends.into_iter().enumerate() {
            let search = search.clone();
            let solution_tx = solution_tx.clone();
            let start_base = index as u64 * sieve_bits;

            workers.push(thread::spawn(move || {
                backend_thread(backend, search, start_base, stride, sieve_bits as usize, solution_tx);
            }));
        }

        for thread_index in 0..cpu_threads {
            let search = search.clone();
            let solution_tx = solution_tx.clone();
            let start_base = (thread_index + gpu_workers) * sieve_bits;

            workers.push(thread::spawn(move || {
                search_thread(search, start_base, stride, sieve_bits as usize, solution_tx);
            }));
        }

        Ok(solution_rx)
    }

    pub fn stop_mining(&self) {
        if !self.mining.load(Ordering::SeqCst) {
            return;
        }

        self.stop.store(true, Ordering::SeqCst);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }

        self.mining.store(false, Ordering::SeqCst);

        let stats = self.stats.snapshot();
        info!(
            "gap mining stopped: primes={} gaps={} best_merit={:.4}",
            stats.primes_checked, stats.gaps_found, stats.best_merit,
        );
    }
}

impl Drop for GapMiner {
    fn drop(&mut self) {
        self.stop_mining();
    }
}

/// Everything a worker needs to search, shared across threads.
struct Search {
    base: BigUint,
    approx_ln: f64,
    shift: u32,
    target_merit: f64,
    adder_limit: u64,
    primes: Arc<Vec<u32>>,
    wheel: Arc<Wheel>,
    stats: Arc<GapStats>,
    stop: Arc<AtomicBool>,
}

impl Search {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Walks a sieved segment: quick-tests every surviving, wheel-admitted
    /// candidate, pairs consecutive candidate primes into gaps, and puts
    /// promising gaps through full verification.
    fn scan(&self, segment: &SieveSegment, adder_base: u64, solution_tx: &Sender<GapSolution>) {
        let base_mod = residue(&self.base, self.wheel.modulus());
        let mut previous: Option<u64> = None;
        let mut primes_checked = 0u64;

        for offset in 0..segment.len() {
            if offset % 4096 == 0 && self.stopped() {
                break;
            }

            if segment.is_composite(offset) {
                continue;
            }

            let adder = adder_base + offset as u64;
            if adder >= self.adder_limit {
                break;
            }

            if !self.wheel.admits(base_mod + adder % self.wheel.modulus() as u64) {
                continue;
            }

            let candidate = &self.base + adder;
            if !fermat_probable_prime(&candidate, 1) {
                continue;
            }
            primes_checked += 1;

            if let Some(gap_start) = previous {
                let gap_size = (adder - gap_start) as u32;
                if gap_size >= MIN_INTERESTING_GAP
                    && gap_size as f64 / self.approx_ln >= self.target_merit
                {
                    self.verify_candidate(gap_start, gap_size, solution_tx);
                }
            }

            previous = Some(adder);
        }

        self.stats
            .primes_checked
            .fetch_add(primes_checked, Ordering::Relaxed);
    }

    /// Full verification of one candidate gap; sends a solution when the
    /// merit clears the target.
    fn verify_candidate(&self, gap_start: u64, gap_size: u32, solution_tx: &Sender<GapSolution>) {
        let start = &self.base + gap_start;
        let Some(merit) = verify_gap(&start, gap_size) else {
            return;
        };

        self.stats.gaps_found.fetch_add(1, Ordering::Relaxed);
        self.stats.best_merit.fetch_max(merit);

        if merit >= self.target_merit {
            let mut adder = [0u8; 32];
            adder[..8].copy_from_slice(&gap_start.to_le_bytes());

            info!("gap found: size={gap_size} merit={merit:.4} adder={gap_start}");

            let _ = solution_tx.send(GapSolution {
                shift: self.shift,
                adder,
                gap_size,
                merit,
            });
        }
    }
}

fn residue(n: &BigUint, modulus: u32) -> u64 {
    u64::try_from(&(n % modulus)).expect("residue fits")
}

fn search_thread(
    search: Arc<Search>,
    start_base: u64,
    stride: u64,
    sieve_bits: usize,
    solution_tx: Sender<GapSolution>,
) {
    let mut segment = SieveSegment::new(sieve_bits);
    let wrap_base = start_base % search.adder_limit.max(1);
    let mut adder_base = wrap_base;

    while !search.stopped() {
        segment.clear();
        segment.sieve(&search.primes, adder_base);
        search.stats.sieve_cycles.fetch_add(1, Ordering::Relaxed);

        search.scan(&segment, adder_base, &solution_tx);

        adder_base = adder_base.saturating_add(stride);
        if adder_base >= search.adder_limit {
            adder_base = wrap_base;
        }
    }
}

/// GPU workers sieve and scan on the device; candidate gaps come back for
/// CPU verification. Backend errors end this worker without touching the
/// CPU threads.
fn backend_thread(
    mut backend: Box<dyn SieveBackend>,
    search: Arc<Search>,
    start_base: u64,
    stride: u64,
    sieve_bits: usize,
    solution_tx: Sender<GapSolution>,
) {
    let name = backend.name();
    let mut segment = SieveSegment::new(sieve_bits);
    let wrap_base = start_base % search.adder_limit.max(1);
    let mut adder_base = wrap_base;

    while !search.stopped() && !backend.is_stop_requested() {
        segment.clear();

        if let Err(err) = backend.sieve_segment(adder_base, &mut segment) {
            error!("backend {name}: sieve failed: {err}");
            break;
        }
        search.stats.sieve_cycles.fetch_add(1, Ordering::Relaxed);

        let best_merit = search.stats.best_merit.load();
        match backend.find_gaps(&segment, adder_base, search.target_merit, best_merit) {
            Ok(Some(scan)) => {
                search
                    .stats
                    .primes_checked
                    .fetch_add(scan.primes_checked, Ordering::Relaxed);
                search.verify_candidate(scan.gap_start, scan.gap_size, &solution_tx);
            }
            Ok(None) => {}
            Err(err) => {
                error!("backend {name}: gap scan failed: {err}");
                break;
            }
        }

        adder_base = adder_base.saturating_add(stride);
        if adder_base >= search.adder_limit {
            adder_base = wrap_base;
        }
    }

    backend.request_stop();
    debug!("backend {name} worker exiting");
}
