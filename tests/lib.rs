use {
    joule::{
        header::BlockHeader,
        provider::{BlockTemplate, BlockTemplateProvider},
        server::{ServerOptions, StratumHandle, StratumServer},
    },
    serde_json::{Value, json},
    std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{
            TcpStream,
            tcp::{OwnedReadHalf, OwnedWriteHalf},
        },
        time::{sleep, timeout},
    },
    tokio_util::sync::CancellationToken,
};


/// Easy consensus target: 0x207fffff expands to a near-maximal threshold,
/// so every hash is a valid block.
const EASY_BITS: u32 = 0x207f_ffff;

/// Impossible consensus target: expands to 1.
const HARD_BITS: u32 = 0x0300_0001;

pub struct StubProvider {
    template: BlockTemplate,
    accept: bool,
    pub submissions: AtomicU64,
}

impl StubProvider {
    pub fn new(bits: u32) -> Arc<Self> {
        Arc::new(Self {
            template: BlockTemplate {
                header: BlockHeader {
                    version: 4,
                    prev_hash: [0x42; 32],
                    merkle_root: [0x24; 32],
                    time: 1_700_000_000,
                    bits,
                    ..Default::default()
                },
                height: 100,
                coinbase: vec![0xcb; 64],
            },
            accept: true,
            submissions: AtomicU64::new(0),
        })
    }
}

impl BlockTemplateProvider for StubProvider {
    fn create_template(&self) -> anyhow::Result<BlockTemplate> {
        Ok(self.template.clone())
    }

    fn submit_solution(&self, _: &BlockTemplate, _: &BlockHeader) -> anyhow::Result<bool> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(self.accept)
    }

    fn tip_height(&self) -> anyhow::Result<u64> {
        Ok(self.template.height - 1)
    }

    fn epoch_key(&self) -> anyhow::Result<[u8; 32]> {
        Ok(self.template.header.prev_hash)
    }
}

pub async fn spawn_server(provider: Arc<StubProvider>) -> (StratumHandle, CancellationToken) {
    let cancel = CancellationToken::new();

    let handle = StratumServer::new(
        provider,
        ServerOptions {
            address: "127.0.0.1".into(),
            port: 0,
            share_difficulty: 10_000,
            // long enough that tests control every rotation themselves
            job_interval: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(600),
        },
    )
    .spawn(cancel.clone())
    .await
    .unwrap();

    // wait for the startup job
    while handle.broker().current().is_none() {
        sleep(Duration::from_millis(10)).await;
    }

    (handle, cancel)
}

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, value: Value) {
        let mut frame = value.to_string();
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(60), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed");
        assert!(!line.is_empty(), "connection closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Reads frames until the response with the given id turns up, skipping
    /// interleaved job notifications.
    pub async fn recv_response(&mut self, id: u64) -> Value {
        loop {
            let frame = self.recv().await;
            if frame.get("id") == Some(&json!(id)) {
                return frame;
            }
            assert!(
                frame.get("method").is_some(),
                "unexpected frame while waiting for response {id}: {frame}"
            );
        }
    }

    /// Reads frames until a job notification turns up.
    pub async fn recv_notification(&mut self) -> Value {
        loop {
            let frame = self.recv().await;
            if frame.get("method").is_some() {
                return frame;
            }
        }
    }

    pub async fn login(&mut self, id: u64) -> Value {
        self.send(json!({
            "id": id,
            "method": "login",
            "params": {"login": "JWALLET123", "pass": "x"},
        }))
        .await;
        self.recv_response(id).await
    }
}
