use {
    super::*,
    crate::{
        server::ServerStats,
        share::{ShareVerdict, validate_and_submit},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Subscribed,
    Authorized,
}

/// Which flavor of the protocol this client speaks; decides the method name
/// used for job pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Standard,
    Monero,
}

pub struct Connection<R, W> {
    socket_addr: SocketAddr,
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
    broker: Arc<JobBroker>,
    engine: Arc<RandomxEngine>,
    provider: Arc<dyn BlockTemplateProvider>,
    stats: Arc<ServerStats>,
    jobs: watch::Receiver<Option<Arc<Job>>>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    session_id: String,
    state: State,
    dialect: Dialect,
    wallet: Option<String>,
    worker: Option<String>,
    shares_accepted: u64,
    shares_rejected: u64,
    last_activity: Instant,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket_addr: SocketAddr,
        reader: R,
        writer: W,
        broker: Arc<JobBroker>,
        engine: Arc<RandomxEngine>,
        provider: Arc<dyn BlockTemplateProvider>,
        stats: Arc<ServerStats>,
        cancel: CancellationToken,
        idle_timeout: Duration,
    ) -> Self {
        let session_id = hex::encode(rand::random::<[u8; 16]>());

        stats.add_client();

        Self {
            socket_addr,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_SIZE)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            jobs: broker.subscribe(),
            broker,
            engine,
            provider,
            stats,
            cancel,
            idle_timeout,
            session_id,
            state: State::New,
            dialect: Dialect::Standard,
            wallet: None,
            worker: None,
            shares_accepted: 0,
            shares_rejected: 0,
            last_activity: Instant::now(),
        }
    }

    pub async fn serve(&mut self) -> Result {
        let mut jobs = self.jobs.clone();
        let cancel = self.cancel.clone();

        loop {
            let idle = self.idle_timeout.saturating_sub(self.last_activity.elapsed());

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("disconnecting {}", self.socket_addr);
                    break;
                }

                _ = sleep(idle) => {
                    info!(
                        "client {} idle for {:?}, disconnecting",
                        self.socket_addr, self.idle_timeout
                    );
                    break;
                }

                line = self.read_line() => {
                    let Some(line) = line? else {
                        break;
                    };

                    self.last_activity = Instant::now();

                    let message = match serde_json::from_str::<Message>(&line) {
                        Ok(message) => message,
                        Err(err) => {
                            warn!("invalid frame from {}: {err}", self.socket_addr);
                            continue;
                        }
                    };

                    let Message::Request { id, method, params } = message else {
                        warn!(?message, "ignoring non-request from {}", self.socket_addr);
                        continue;
                    };

                    match method.as_str() {
                        "mining.subscribe" => {
                            debug!("SUBSCRIBE from {} with {params}", self.socket_addr);
                            self.subscribe(id, params).await?
                        }
                        "mining.authorize" => {
                            debug!("AUTHORIZE from {} with {params}", self.socket_addr);
                            self.authorize(id, params).await?
                        }
                        "login" | "getjob" => {
                            debug!("LOGIN from {} with {params}", self.socket_addr);
                            self.login(id, params).await?
                        }
                        "mining.submit" | "submit" => {
                            debug!("SUBMIT from {} with {params}", self.socket_addr);
                            self.submit(id, params).await?
                        }
                        method => {
                            warn!("unknown method {method} from {}", self.socket_addr);
                            self.send_error(id, StratumError::UnknownMethod).await?;
                        }
                    }
                }

                changed = jobs.changed() => {
                    if changed.is_err() {
                        warn!("job channel closed, dropping {}", self.socket_addr);
                        break;
                    }

                    let job = jobs.borrow_and_update().clone();

                    if self.state != State::Authorized {
                        continue;
                    }

                    if let Some(job) = job {
                        self.push_job(&job).await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&mut self, id: Id, params: Value) -> Result {
        let subscribe = serde_json::from_value::<Subscribe>(params).unwrap_or_default();
        if let Some(agent) = subscribe.user_agent {
            debug!("client {} is {agent}", self.socket_addr);
        }

        if self.state == State::New {
            self.state = State::Subscribed;
        }
        self.dialect = Dialect::Standard;

        self.send(Message::response(
            id,
            json!(SubscribeResult::for_session(&self.session_id)),
        ))
        .await?;

        info!("client {} subscribed", self.socket_addr);
        Ok(())
    }

    async fn authorize(&mut self, id: Id, params: Value) -> Result {
        let authorize = serde_json::from_value::<Authorize>(params).unwrap_or(Authorize {
            username: Username::new(""),
            password: None,
        });

        let username = authorize.username;
        self.wallet = Some(username.wallet().to_string());
        self.worker = Some(username.worker().to_string());
        // authorized implies subscribed
        self.state = State::Authorized;
        self.dialect = Dialect::Standard;

        self.send(Message::response(id, json!(true))).await?;

        info!(
            "client {} authorized as {} ({})",
            self.socket_addr,
            username.wallet(),
            username.worker(),
        );

        if let Some(job) = self.broker.current() {
            self.push_job(&job).await?;
        }

        Ok(())
    }

    /// Combined subscribe + authorize + getjob.
    async fn login(&mut self, id: Id, params: Value) -> Result {
        let login = serde_json::from_value::<Login>(params).unwrap_or_default();

        self.state = State::Authorized;
        self.dialect = Dialect::Monero;
        self.wallet = Some(login.login.unwrap_or_default());
        self.worker = Some("xmrig".into());

        let Some(job) = self.broker.current() else {
            warn!("login from {} before the first job exists", self.socket_addr);
            return self.send_error(id, StratumError::UnknownJob).await;
        };

        self.send(Message::response_v2(
            id,
            json!(LoginResult::new(&self.session_id, job.params())),
        ))
        .await?;

        info!(
            "client {} logged in as {}",
            self.socket_addr,
            self.wallet.as_deref().unwrap_or("(default)"),
        );

        Ok(())
    }

    async fn submit(&mut self, id: Id, params: Value) -> Result {
        let submit = match serde_json::from_value::<Submit>(params) {
            Ok(submit) => submit,
            Err(err) => {
                debug!("malformed submit from {}: {err}", self.socket_addr);
                return self.reject(id, StratumError::MalformedSubmit).await;
            }
        };

        let Some(job) = self.broker.get(&submit.job_id) else {
            debug!(
                "submit for unknown job {} from {}",
                submit.job_id, self.socket_addr
            );
            return self.reject(id, StratumError::UnknownJob).await;
        };

        let verdict = {
            let engine = self.engine.clone();
            let provider = self.provider.clone();
            let job = job.clone();
            let nonce = u32::from(submit.nonce);

            task::spawn_blocking(move || {
                validate_and_submit(&engine, provider.as_ref(), &job, nonce)
            })
            .await
            .context("share validation task failed")?
        };

        match verdict {
            Ok(ShareVerdict::Accepted) => {
                self.shares_accepted += 1;
                self.stats.add_share_accepted();
                self.stats.add_block();
                self.broker.notify_new_block();

                self.send(Message::response(id, json!({"status": "OK"}))).await?;

                info!(
                    "share accepted from {} ({}/{} for this client)",
                    self.socket_addr, self.shares_accepted, self.shares_rejected,
                );
                Ok(())
            }
            Ok(ShareVerdict::AboveTarget | ShareVerdict::NodeRejected) => {
                self.reject(id, StratumError::LowDifficulty).await
            }
            Err(err) => {
                error!("share validation failed for {}: {err}", self.socket_addr);
                self.reject(id, StratumError::LowDifficulty).await
            }
        }
    }

    async fn push_job(&mut self, job: &Job) -> Result {
        let method = match self.dialect {
            Dialect::Standard => "mining.notify",
            Dialect::Monero => "job",
        };

        debug!("pushing job {} to {}", job.job_id, self.socket_addr);
        self.send(Message::notification(method, json!(job.params()))).await
    }

    async fn reject(&mut self, id: Id, error: StratumError) -> Result {
        self.shares_rejected += 1;
        self.stats.add_share_rejected();
        self.send_error(id, error).await
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        match self.reader.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(anyhow!("read error from {}: {e}", self.socket_addr)),
            None => {
                info!("client {} disconnected", self.socket_addr);
                Ok(None)
            }
        }
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        let frame = serde_json::to_string(&message)?;
        self.writer.send(frame).await?;
        Ok(())
    }

    async fn send_error(&mut self, id: Id, error: StratumError) -> Result {
        self.send(Message::error(id, error)).await
    }
}

impl<R, W> Drop for Connection<R, W> {
    fn drop(&mut self) {
        self.stats.sub_client();
        info!(
            "client {} closed (accepted {} / rejected {} shares)",
            self.socket_addr, self.shares_accepted, self.shares_rejected,
        );
    }
}
