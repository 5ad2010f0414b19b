use super::*;

use {
    crossbeam_channel::{Receiver, RecvTimeoutError},
    sieve::{GpuBackendKind, INITIAL_TARGET_MERIT, SHIFT_MAX, SHIFT_MIN, compact_to_merit},
    std::sync::Mutex,
};

/// How long one template is mined before asking the node for a fresh one.
pub const TEMPLATE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowAlgo {
    Gap,
    Randomx,
}

impl FromStr for PowAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gap" => Ok(Self::Gap),
            "randomx" | "rx" => Ok(Self::Randomx),
            other => bail!("invalid algorithm '{other}', use 'gap' or 'randomx'"),
        }
    }
}

impl fmt::Display for PowAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gap => write!(f, "gap"),
            Self::Randomx => write!(f, "randomx"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub threads: usize,
    pub shift: u32,
    pub algo: PowAlgo,
    pub sieve_size: usize,
    pub sieve_primes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            shift: sieve::DEFAULT_SHIFT,
            algo: PowAlgo::Gap,
            sieve_size: sieve::DEFAULT_SIEVE_SIZE,
            sieve_primes: sieve::DEFAULT_SIEVE_PRIMES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerInfo {
    pub mining: bool,
    pub algo: String,
    pub threads: usize,
    pub shift: u32,
    pub primes_checked: u64,
    pub gaps_found: u64,
    pub best_merit: f64,
    pub sieve_cycles: u64,
    pub blocks_found: u64,
    pub hashrate: f64,
    pub gpu_enabled: bool,
    pub gpu_backend: String,
}

/// Glue between the node and the engines: a loop thread keeps pulling fresh
/// templates, points the configured engine at them, and submits whatever
/// comes back.
pub struct MinerDriver {
    provider: Arc<dyn BlockTemplateProvider>,
    engine: Arc<RandomxEngine>,
    active: Arc<AtomicBool>,
    blocks_found: Arc<AtomicU64>,
    miner: Mutex<Option<Arc<GapMiner>>>,
    config: Mutex<Option<DriverConfig>>,
    gpu_backend: Mutex<Option<GpuBackendKind>>,
    gpu_enabled: AtomicBool,
    loop_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MinerDriver {
    pub fn new(provider: Arc<dyn BlockTemplateProvider>) -> Self {
        Self {
            provider,
            engine: Arc::new(RandomxEngine::new()),
            active: Arc::new(AtomicBool::new(false)),
            blocks_found: Arc::new(AtomicU64::new(0)),
            miner: Mutex::new(None),
            config: Mutex::new(None),
            gpu_backend: Mutex::new(None),
            gpu_enabled: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn start(&self, config: DriverConfig) -> Result {
        ensure!(!self.is_mining(), "mining is already active, stop it first");
        ensure!(
            (SHIFT_MIN..=SHIFT_MAX).contains(&config.shift),
            "shift must be between {SHIFT_MIN} and {SHIFT_MAX}"
        );

        let miner = Arc::new(GapMiner::new(GapMinerConfig {
            threads: config.threads,
            shift: config.shift,
            sieve_size: config.sieve_size,
            sieve_primes: config.sieve_primes,
        }));

        *self.miner.lock().unwrap() = Some(miner.clone());
        *self.config.lock().unwrap() = Some(config.clone());

        info!(
            "starting {} mining: {} threads, shift {}",
            config.algo,
            miner.threads(),
            config.shift,
        );

        self.active.store(true, Ordering::SeqCst);

        let provider = self.provider.clone();
        let engine = self.engine.clone();
        let active = self.active.clone();
        let blocks_found = self.blocks_found.clone();

        *self.loop_handle.lock().unwrap() = Some(thread::spawn(move || {
            mining_loop(provider, engine, miner, active, blocks_found, config);
        }));

        Ok(())
    }

    pub fn stop(&self) {
        if !self.is_mining() {
            return;
        }

        info!("stopping mining");
        self.active.store(false, Ordering::SeqCst);

        if let Some(miner) = self.miner.lock().unwrap().as_ref() {
            miner.stop_mining();
        }
        self.engine.stop_mining();

        if let Some(handle) = self.loop_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        info!("mining stopped");
    }

    /// Registers a GPU backend for the next start. Succeeds only when the
    /// backend actually has devices, which requires its runtime kernels.
    /// The requested kind is remembered either way; `gpu_enabled` tracks
    /// whether a device was confirmed.
    pub fn enable_gpu(&self, kind: GpuBackendKind, device: usize) -> Result<bool> {
        *self.gpu_backend.lock().unwrap() = Some(kind);

        let devices = sieve::available_devices(kind);
        let Some(name) = devices.get(device) else {
            self.gpu_enabled.store(false, Ordering::SeqCst);
            warn!("{kind} device {device} not available");
            return Ok(false);
        };

        self.gpu_enabled.store(true, Ordering::SeqCst);
        info!("enabled {kind} device {device}: {name}");
        Ok(true)
    }

    pub fn info(&self) -> MinerInfo {
        let miner = self.miner.lock().unwrap();
        let config = self.config.lock().unwrap();
        let stats = miner
            .as_ref()
            .map(|miner| miner.stats())
            .unwrap_or_default();

        MinerInfo {
            mining: self.is_mining(),
            algo: config
                .as_ref()
                .map(|config| config.algo.to_string())
                .unwrap_or_else(|| PowAlgo::Gap.to_string()),
            threads: miner.as_ref().map(|miner| miner.threads()).unwrap_or(0),
            shift: miner
                .as_ref()
                .map(|miner| miner.shift())
                .unwrap_or(sieve::DEFAULT_SHIFT),
            primes_checked: stats.primes_checked,
            gaps_found: stats.gaps_found,
            best_merit: stats.best_merit,
            sieve_cycles: stats.sieve_cycles,
            blocks_found: self.blocks_found.load(Ordering::Relaxed),
            hashrate: self.engine.hashrate(),
            gpu_enabled: self.gpu_enabled.load(Ordering::SeqCst),
            gpu_backend: self
                .gpu_backend
                .lock()
                .unwrap()
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "none".into()),
        }
    }
}

impl Drop for MinerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn mining_loop(
    provider: Arc<dyn BlockTemplateProvider>,
    engine: Arc<RandomxEngine>,
    miner: Arc<GapMiner>,
    active: Arc<AtomicBool>,
    blocks_found: Arc<AtomicU64>,
    config: DriverConfig,
) {
    info!("mining loop started");

    while active.load(Ordering::SeqCst) {
        let template = match provider.create_template() {
            Ok(template) => template,
            Err(err) => {
                warn!("failed to create block template: {err}");
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        let result = match config.algo {
            PowAlgo::Gap => mine_gap_template(&provider, &miner, &template, &active),
            PowAlgo::Randomx => {
                mine_hash_template(&provider, &engine, &template, &active, config.threads)
            }
        };

        match result {
            Ok(true) => {
                blocks_found.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                debug!("template expired, fetching a new one");
            }
            Err(err) => {
                error!("mining cycle failed: {err}");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    info!("mining loop stopped");
}

/// Mines one template with the gap engine for up to [`TEMPLATE_TIMEOUT`].
/// Returns whether a block was accepted.
fn mine_gap_template(
    provider: &Arc<dyn BlockTemplateProvider>,
    miner: &Arc<GapMiner>,
    template: &BlockTemplate,
    active: &AtomicBool,
) -> Result<bool> {
    let mut header = template.header.clone();
    header.shift = miner.shift();
    header.adder = [0u8; 32];
    header.gap_size = 0;

    let target_merit = match compact_to_merit(header.bits) {
        merit if merit > 0.0 => merit,
        _ => INITIAL_TARGET_MERIT,
    };

    let solutions = miner.start_mining(&header, target_merit)?;
    let accepted = wait_for_solution(&solutions, active, |solution| {
        let mut solved = header.clone();
        solved.shift = solution.shift;
        solved.adder = solution.adder;
        solved.gap_size = solution.gap_size;

        info!(
            "submitting gap solution: size={} merit={:.4}",
            solution.gap_size, solution.merit
        );

        provider.submit_solution(template, &solved)
    });
    miner.stop_mining();

    accepted
}

/// Mines one template with the hash engine. The engine rekeys from the
/// node's epoch key when the epoch moved.
fn mine_hash_template(
    provider: &Arc<dyn BlockTemplateProvider>,
    engine: &Arc<RandomxEngine>,
    template: &BlockTemplate,
    active: &AtomicBool,
    threads: usize,
) -> Result<bool> {
    let header = template.header.clone();

    engine.rekey_if_needed(&provider.epoch_key()?)?;

    let target = header.consensus_target();
    let solutions = engine.start_mining(header, target, threads)?;
    let accepted = wait_for_solution(&solutions, active, |solved| {
        info!("submitting hash solution: nonce={}", solved.nonce);
        provider.submit_solution(template, &solved)
    });
    engine.stop_mining();

    accepted
}

fn wait_for_solution<T>(
    solutions: &Receiver<T>,
    active: &AtomicBool,
    mut submit: impl FnMut(T) -> Result<bool>,
) -> Result<bool> {
    let deadline = Instant::now() + TEMPLATE_TIMEOUT;

    loop {
        if !active.load(Ordering::SeqCst) || Instant::now() >= deadline {
            return Ok(false);
        }

        match solutions.recv_timeout(Duration::from_millis(100)) {
            Ok(solution) => match submit(solution) {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    // Node said no; keep mining this template, another
                    // solution may still land.
                    warn!("node rejected the solution");
                }
                Err(err) => return Err(err),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingProvider {
        template: BlockTemplate,
        submissions: AtomicU64,
    }

    impl BlockTemplateProvider for CountingProvider {
        fn create_template(&self) -> Result<BlockTemplate> {
            Ok(self.template.clone())
        }

        fn submit_solution(&self, _: &BlockTemplate, header: &BlockHeader) -> Result<bool> {
            assert!(header.gap_size > 0, "gap proof fields must be filled in");
            assert!(header.shift >= SHIFT_MIN);
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn tip_height(&self) -> Result<u64> {
            Ok(self.template.height.saturating_sub(1))
        }

        fn epoch_key(&self) -> Result<[u8; 32]> {
            Ok(self.template.header.prev_hash)
        }
    }

    fn gap_friendly_provider() -> Arc<CountingProvider> {
        // bits low enough that compact_to_merit gives a tiny, reachable
        // target merit
        Arc::new(CountingProvider {
            template: BlockTemplate {
                header: BlockHeader {
                    bits: 10_000, // merit target 0.01
                    ..Default::default()
                },
                height: 1,
                coinbase: Vec::new(),
            },
            submissions: AtomicU64::new(0),
        })
    }

    #[test]
    fn rejects_out_of_range_shift() {
        let driver = MinerDriver::new(gap_friendly_provider());
        let config = DriverConfig {
            shift: 7,
            ..Default::default()
        };
        assert!(driver.start(config).is_err());
        assert!(!driver.is_mining());
    }

    #[test]
    fn rejects_double_start() {
        let provider = gap_friendly_provider();
        let driver = MinerDriver::new(provider);

        let config = DriverConfig {
            threads: 1,
            sieve_size: 2048,
            sieve_primes: 0,
            ..Default::default()
        };

        driver.start(config.clone()).unwrap();
        assert!(driver.start(config).is_err());
        driver.stop();
        assert!(!driver.is_mining());
    }

    #[test]
    fn gap_mining_submits_accepted_blocks() {
        let provider = gap_friendly_provider();
        let driver = MinerDriver::new(provider.clone());

        driver
            .start(DriverConfig {
                threads: 1,
                shift: 25,
                algo: PowAlgo::Gap,
                sieve_size: 2048,
                sieve_primes: 0,
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(120);
        while provider.submissions.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }

        driver.stop();

        assert!(provider.submissions.load(Ordering::SeqCst) >= 1);
        let info = driver.info();
        assert!(info.blocks_found >= 1);
        assert!(!info.mining);
        assert_eq!(info.algo, "gap");
    }

    #[test]
    fn info_before_start_is_idle() {
        let driver = MinerDriver::new(gap_friendly_provider());
        let info = driver.info();

        assert!(!info.mining);
        assert_eq!(info.blocks_found, 0);
        assert!(!info.gpu_enabled);
        assert_eq!(info.gpu_backend, "none");
        assert_eq!(info.shift, sieve::DEFAULT_SHIFT);
    }

    #[test]
    fn gpu_enable_without_runtime_reports_false() {
        let driver = MinerDriver::new(gap_friendly_provider());
        assert!(!driver.enable_gpu(GpuBackendKind::OpenCl, 0).unwrap());

        // info reflects the enable_gpu outcome: the requested backend is
        // remembered, but nothing was actually enabled
        let info = driver.info();
        assert!(!info.gpu_enabled);
        assert_eq!(info.gpu_backend, "opencl");
    }
}
