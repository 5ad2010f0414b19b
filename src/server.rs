use super::*;

/// Aggregate counters shared by every connection task, read by the info
/// surface.
#[derive(Debug, Default)]
pub struct ServerStats {
    clients: AtomicU64,
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
    blocks_found: AtomicU64,
}

impl ServerStats {
    pub fn add_client(&self) {
        self.clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sub_client(&self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_share_accepted(&self) {
        self.shares_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_share_rejected(&self) {
        self.shares_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_block(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clients(&self) -> u64 {
        self.clients.load(Ordering::Relaxed)
    }

    pub fn shares_accepted(&self) -> u64 {
        self.shares_accepted.load(Ordering::Relaxed)
    }

    pub fn shares_rejected(&self) -> u64 {
        self.shares_rejected.load(Ordering::Relaxed)
    }

    pub fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumInfo {
    pub running: bool,
    pub port: u16,
    pub clients: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub blocks_found: u64,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub address: String,
    pub port: u16,
    pub share_difficulty: u32,
    pub job_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 3335,
            share_difficulty: 10_000,
            job_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// The pool-facing TCP server: accepts miners, spawns one connection task
/// each, and keeps the job loop fed.
pub struct StratumServer {
    provider: Arc<dyn BlockTemplateProvider>,
    options: ServerOptions,
}

impl StratumServer {
    pub fn new(provider: Arc<dyn BlockTemplateProvider>, options: ServerOptions) -> Self {
        Self { provider, options }
    }

    /// Binds, starts the broker and accept loops, and returns the handle the
    /// RPC surface (and the CLI) operate on. Cancelling the token stops
    /// everything: the listener, the job loop, and every client task.
    pub async fn spawn(self, cancel: CancellationToken) -> Result<StratumHandle> {
        let listener = TcpListener::bind((self.options.address.as_str(), self.options.port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind {}:{}",
                    self.options.address, self.options.port
                )
            })?;
        let port = listener.local_addr()?.port();

        let broker = JobBroker::new(
            self.provider.clone(),
            self.options.share_difficulty,
            self.options.job_interval,
        );
        let engine = Arc::new(RandomxEngine::new());
        let stats = Arc::new(ServerStats::default());

        tokio::spawn(broker.clone().run(cancel.clone()));

        tokio::spawn(accept_loop(
            listener,
            broker.clone(),
            engine,
            self.provider.clone(),
            stats.clone(),
            cancel.clone(),
            self.options.idle_timeout,
        ));

        info!(
            "stratum server listening on {}:{port}",
            self.options.address
        );

        Ok(StratumHandle {
            port,
            stats,
            broker,
            cancel,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    broker: Arc<JobBroker>,
    engine: Arc<RandomxEngine>,
    provider: Arc<dyn BlockTemplateProvider>,
    stats: Arc<ServerStats>,
    cancel: CancellationToken,
    idle_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            accepted = listener.accept() => {
                let (stream, socket_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("accept failed: {err}");
                        continue;
                    }
                };

                if let Err(err) = stream.set_nodelay(true) {
                    warn!("set_nodelay failed for {socket_addr}: {err}");
                }

                info!("accepted connection from {socket_addr}");

                let (reader, writer) = stream.into_split();
                let mut connection = Connection::new(
                    socket_addr,
                    reader,
                    writer,
                    broker.clone(),
                    engine.clone(),
                    provider.clone(),
                    stats.clone(),
                    cancel.clone(),
                    idle_timeout,
                );

                tokio::task::spawn(async move {
                    if let Err(err) = connection.serve().await {
                        error!("client {socket_addr} error: {err}");
                    }
                });
            }
        }
    }

    info!("stratum server stopped");
}

/// Owned handle to a running server. The RPC dispatcher holds one of these
/// and calls through it; there are no process-wide singletons.
#[derive(Clone)]
pub struct StratumHandle {
    port: u16,
    stats: Arc<ServerStats>,
    broker: Arc<JobBroker>,
    cancel: CancellationToken,
}

impl StratumHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn broker(&self) -> &Arc<JobBroker> {
        &self.broker
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn info(&self) -> StratumInfo {
        StratumInfo {
            running: !self.cancel.is_cancelled(),
            port: self.port,
            clients: self.stats.clients(),
            shares_accepted: self.stats.shares_accepted(),
            shares_rejected: self.stats.shares_rejected(),
            blocks_found: self.stats.blocks_found(),
        }
    }
}
