use super::*;

use std::sync::Mutex;

/// Jobs stay submittable for this many generations; older ones are stale.
pub const MAX_JOB_HISTORY: usize = 10;

/// Size of the mining payload handed to external miners.
pub const BLOB_SIZE: usize = 76;

/// One published unit of work. Cheap to clone by `Arc`; the block template
/// and the epoch key ride along for submit-time reconstruction.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub height: u64,
    pub blob: [u8; BLOB_SIZE],
    pub share_target: ShareTarget,
    pub epoch_key: [u8; 32],
    pub seed_hash: String,
    pub template: Arc<BlockTemplate>,
    pub created: u64,
}

impl Job {
    pub fn new(
        template: Arc<BlockTemplate>,
        height: u64,
        epoch_key: [u8; 32],
        job_id: String,
        share_target: ShareTarget,
    ) -> Self {
        Self {
            blob: mining_blob(&template.header),
            seed_hash: hex::encode(epoch_key),
            height,
            job_id,
            share_target,
            epoch_key,
            created: unix_now(),
            template,
        }
    }

    /// The wire object pushed to miners.
    pub fn params(&self) -> JobParams {
        JobParams {
            blob: hex::encode(self.blob),
            job_id: self.job_id.clone(),
            target: self.share_target,
            algo: ALGO.into(),
            height: self.height,
            seed_hash: self.seed_hash.clone(),
        }
    }

    pub fn bits(&self) -> u32 {
        self.template.header.bits
    }
}

/// The 76-byte mining payload. Miners only ever touch bytes 39..43 (the
/// nonce); everything else is template state laid out little-endian:
///
/// ```text
/// 0..32   prev_hash
/// 32..35  version, low three bytes
/// 35..39  time
/// 39..43  nonce placeholder, zero
/// 43..75  merkle_root
/// 75      low byte of bits
/// ```
pub fn mining_blob(header: &BlockHeader) -> [u8; BLOB_SIZE] {
    let mut blob = [0u8; BLOB_SIZE];
    blob[0..32].copy_from_slice(&header.prev_hash);
    blob[32..35].copy_from_slice(&header.version.to_le_bytes()[0..3]);
    blob[35..39].copy_from_slice(&header.time.to_le_bytes());
    // 39..43 stays zero
    blob[43..75].copy_from_slice(&header.merkle_root);
    blob[75] = header.bits.to_le_bytes()[0];
    blob
}

pub(crate) fn format_job_id(unix_seconds: u64, counter: u64) -> String {
    format!("{unix_seconds:x}{:08x}", counter & 0xffff_ffff)
}

#[derive(Default)]
struct History {
    order: VecDeque<String>,
    by_id: HashMap<String, Arc<Job>>,
    current: Option<Arc<Job>>,
}

/// Owns the current job and a bounded, insertion-ordered history. New jobs
/// appear on a timer, on an explicit new-block nudge (a submit went
/// through), and at startup; consumers watch the channel.
pub struct JobBroker {
    provider: Arc<dyn BlockTemplateProvider>,
    history: Mutex<History>,
    sender: watch::Sender<Option<Arc<Job>>>,
    new_block: Notify,
    counter: AtomicU64,
    share_target: ShareTarget,
    update_interval: Duration,
}

impl JobBroker {
    pub fn new(
        provider: Arc<dyn BlockTemplateProvider>,
        share_difficulty: u32,
        update_interval: Duration,
    ) -> Arc<Self> {
        let (sender, _) = watch::channel(None);
        Arc::new(Self {
            provider,
            history: Mutex::new(History::default()),
            sender,
            new_block: Notify::new(),
            counter: AtomicU64::new(0),
            share_target: ShareTarget::from_difficulty(share_difficulty),
            update_interval,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Job>>> {
        self.sender.subscribe()
    }

    /// Wakes the job loop early; called after an accepted solution.
    pub fn notify_new_block(&self) {
        self.new_block.notify_one();
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<Job>> {
        self.history.lock().unwrap().by_id.get(job_id).cloned()
    }

    pub fn current(&self) -> Option<Arc<Job>> {
        self.history.lock().unwrap().current.clone()
    }

    /// Fetches a template from the provider and publishes it as the new
    /// current job, mining at tip + 1 under the node's current epoch key.
    pub async fn create_job(&self) -> Result<Arc<Job>> {
        let provider = self.provider.clone();
        let (template, height, epoch_key) =
            task::spawn_blocking(move || -> Result<(BlockTemplate, u64, [u8; 32])> {
                let template = provider.create_template()?;
                let height = provider.tip_height()? + 1;
                let epoch_key = provider.epoch_key()?;
                Ok((template, height, epoch_key))
            })
            .await
            .context("template fetch task failed")??;

        let job_id = format_job_id(unix_now(), self.counter.fetch_add(1, Ordering::SeqCst));
        let job = Arc::new(Job::new(
            Arc::new(template),
            height,
            epoch_key,
            job_id,
            self.share_target,
        ));

        self.insert(job.clone());
        self.sender.send_replace(Some(job.clone()));

        info!("new job {} at height {}", job.job_id, job.height);
        Ok(job)
    }

    fn insert(&self, job: Arc<Job>) {
        let mut history = self.history.lock().unwrap();
        history.order.push_back(job.job_id.clone());
        history.by_id.insert(job.job_id.clone(), job.clone());
        history.current = Some(job);

        while history.order.len() > MAX_JOB_HISTORY {
            if let Some(oldest) = history.order.pop_front() {
                history.by_id.remove(&oldest);
            }
        }
    }

    /// The job loop: produce, then sleep until the refresh interval elapses,
    /// a new block lands, or shutdown.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        info!("job loop started, refresh every {:?}", self.update_interval);

        loop {
            if let Err(err) = self.create_job().await {
                warn!("failed to create job: {err}");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.new_block.notified() => {
                    debug!("new block, refreshing job");
                }
                _ = ticker.tick() => {}
            }
        }

        info!("job loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider(BlockTemplate);

    impl BlockTemplateProvider for StaticProvider {
        fn create_template(&self) -> Result<BlockTemplate> {
            Ok(self.0.clone())
        }

        fn submit_solution(&self, _: &BlockTemplate, _: &BlockHeader) -> Result<bool> {
            Ok(true)
        }

        fn tip_height(&self) -> Result<u64> {
            Ok(self.0.height - 1)
        }

        fn epoch_key(&self) -> Result<[u8; 32]> {
            Ok(self.0.header.prev_hash)
        }
    }

    fn sample_template() -> BlockTemplate {
        BlockTemplate {
            header: BlockHeader {
                version: 0x0000_0004,
                prev_hash: [0xab; 32],
                merkle_root: [0xcd; 32],
                time: 0x1122_3344,
                bits: 0x1d00_ffff,
                ..Default::default()
            },
            height: 7,
            coinbase: vec![0xee; 10],
        }
    }

    fn broker() -> Arc<JobBroker> {
        JobBroker::new(
            Arc::new(StaticProvider(sample_template())),
            10_000,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn blob_layout_is_byte_exact() {
        let template = sample_template();
        let blob = mining_blob(&template.header);

        assert_eq!(blob.len(), 76);
        assert_eq!(&blob[0..32], &[0xab; 32]);
        assert_eq!(&blob[32..35], &[0x04, 0x00, 0x00]);
        assert_eq!(&blob[35..39], &0x1122_3344u32.to_le_bytes());
        assert_eq!(&blob[39..43], &[0, 0, 0, 0]);
        assert_eq!(&blob[43..75], &[0xcd; 32]);
        assert_eq!(blob[75], 0xff);
    }

    #[test]
    fn job_id_format() {
        assert_eq!(format_job_id(0x66aa0123, 0), "66aa012300000000");
        assert_eq!(format_job_id(0x66aa0123, 42), "66aa01230000002a");
        // the counter keeps its low 8 hex digits
        assert_eq!(format_job_id(0x1, 0x1_2345_6789), "123456789");
    }

    #[test]
    fn job_params_carry_the_wire_fields() {
        let job = Job::new(
            Arc::new(sample_template()),
            7,
            [0xab; 32],
            "66aa012300000000".into(),
            ShareTarget::from_difficulty(10_000),
        );

        let params = job.params();
        assert_eq!(params.blob.len(), 152);
        assert_eq!(params.job_id, "66aa012300000000");
        assert_eq!(params.algo, "rx/0");
        assert_eq!(params.height, 7);
        assert_eq!(params.seed_hash, "ab".repeat(32));
        assert_eq!(params.target.to_string(), "b88d0600");
    }

    #[tokio::test]
    async fn history_is_bounded_and_evicts_oldest_first() {
        let broker = broker();

        let mut ids = Vec::new();
        for _ in 0..MAX_JOB_HISTORY + 1 {
            ids.push(broker.create_job().await.unwrap().job_id.clone());
        }

        // the very first job fell out, everything else resolves
        assert!(broker.get(&ids[0]).is_none());
        for id in &ids[1..] {
            assert!(broker.get(id).is_some(), "{id} should resolve");
        }

        assert_eq!(broker.current().unwrap().job_id, *ids.last().unwrap());
    }

    #[tokio::test]
    async fn jobs_mine_at_tip_plus_one_under_the_epoch_key() {
        let broker = broker();
        let job = broker.create_job().await.unwrap();

        // StaticProvider reports tip 6, so work is for height 7
        assert_eq!(job.height, 7);
        assert_eq!(job.epoch_key, [0xab; 32]);
        assert_eq!(job.seed_hash, hex::encode([0xab; 32]));
    }

    #[tokio::test]
    async fn job_ids_are_unique_across_rotations() {
        let broker = broker();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(broker.create_job().await.unwrap().job_id.clone());
        }

        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn watch_subscribers_see_the_latest_job() {
        let broker = broker();
        let mut receiver = broker.subscribe();

        assert!(receiver.borrow().is_none());

        let job = broker.create_job().await.unwrap();
        receiver.changed().await.unwrap();
        assert_eq!(
            receiver.borrow_and_update().as_ref().unwrap().job_id,
            job.job_id
        );
    }
}
