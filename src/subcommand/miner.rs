use {
    super::*,
    driver::{DriverConfig, MinerDriver, PowAlgo},
};

#[derive(Parser, Debug)]
pub(crate) struct Miner {
    #[arg(long, help = "Connect to the node at <NODE_URL>.")]
    node_url: Option<String>,
    #[arg(long, help = "Mine with <THREADS> threads (0 = all cores).")]
    threads: Option<usize>,
    #[arg(long, help = "Search primes of magnitude 2^<SHIFT>.")]
    shift: Option<u32>,
    #[arg(long, help = "Proof-of-work <ALGO>: gap or randomx.")]
    algo: Option<String>,
    #[arg(long, help = "Sieve segments of <SIEVE_SIZE> bytes.")]
    sieve_size: Option<usize>,
    #[arg(long, help = "Sieve with at most <SIEVE_PRIMES> small primes.")]
    sieve_primes: Option<usize>,
    #[arg(long, help = "Enable sieve acceleration on <GPU_BACKEND>.")]
    gpu_backend: Option<String>,
    #[arg(long, help = "Use GPU device <GPU_DEVICE>.")]
    gpu_device: Option<usize>,
}

impl Miner {
    pub(crate) async fn run(&self, cancel_token: CancellationToken) -> Result {
        let provider = Arc::new(provider::RpcProvider::new(
            self.node_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:9332".into()),
        ));

        let driver = Arc::new(MinerDriver::new(provider));

        if let Some(backend) = &self.gpu_backend {
            let enabled = driver.enable_gpu(backend.parse()?, self.gpu_device.unwrap_or(0))?;
            if !enabled {
                warn!("GPU acceleration unavailable, continuing on CPU");
            }
        }

        driver.start(DriverConfig {
            threads: self.threads.unwrap_or(0),
            shift: self.shift.unwrap_or(sieve::DEFAULT_SHIFT),
            algo: self
                .algo
                .as_deref()
                .map(PowAlgo::from_str)
                .transpose()?
                .unwrap_or(PowAlgo::Gap),
            sieve_size: self.sieve_size.unwrap_or(sieve::DEFAULT_SIEVE_SIZE),
            sieve_primes: self.sieve_primes.unwrap_or(sieve::DEFAULT_SIEVE_PRIMES),
        })?;

        let mut status = interval(Duration::from_secs(30));
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);
        status.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Shutting down miner");
                    break;
                }
                _ = status.tick() => {
                    let info = driver.info();
                    info!(
                        "algo={} primes={} gaps={} best_merit={:.4} blocks={} hashrate={:.1} H/s",
                        info.algo,
                        info.primes_checked,
                        info.gaps_found,
                        info.best_merit,
                        info.blocks_found,
                        info.hashrate,
                    );
                }
            }
        }

        let driver = driver.clone();
        task::spawn_blocking(move || driver.stop())
            .await
            .context("miner shutdown task failed")?;

        Ok(())
    }
}
