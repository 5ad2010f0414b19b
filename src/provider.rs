use super::*;

/// The node-side collaborator: hands out block templates and takes finished
/// solutions back. Implementations must be callable from worker threads, so
/// everything here is blocking; async callers go through `spawn_blocking`.
pub trait BlockTemplateProvider: Send + Sync + 'static {
    fn create_template(&self) -> Result<BlockTemplate>;

    /// Submits a solved header for the given template. `Ok(true)` means the
    /// node accepted the block; `Ok(false)` means it processed and rejected
    /// it (stale tip, bad proof); `Err` is a transport failure.
    fn submit_solution(&self, template: &BlockTemplate, header: &BlockHeader) -> Result<bool>;

    /// Height of the current chain tip; jobs mine at tip + 1.
    fn tip_height(&self) -> Result<u64>;

    /// The bytes the memory-hard cache is keyed with. Changes at chain
    /// epoch boundaries and forces every VM to reinitialize.
    fn epoch_key(&self) -> Result<[u8; 32]>;
}

/// A block template as assembled by the node. The header already carries the
/// merkle root for the included transactions; mining only touches time,
/// nonce, and the gap-proof fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub header: BlockHeader,
    pub height: u64,
    #[serde(with = "hex::serde")]
    pub coinbase: Vec<u8>,
}

/// JSON-RPC client for a Joule node.
pub struct RpcProvider {
    url: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<Value>,
}

impl RpcProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": USER_AGENT,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .with_context(|| format!("{method} request to {} failed", self.url))?
            .json::<RpcResponse<T>>()
            .with_context(|| format!("{method} response was not valid JSON-RPC"))?;

        if let Some(error) = response.error {
            bail!("{method} failed: {error}");
        }

        response
            .result
            .ok_or_else(|| anyhow!("{method} returned neither result nor error"))
    }
}

impl BlockTemplateProvider for RpcProvider {
    fn create_template(&self) -> Result<BlockTemplate> {
        let template = self.call::<BlockTemplate>("getminingtemplate", json!([]))?;
        info!("New block template for height {}", template.height);
        Ok(template)
    }

    fn submit_solution(&self, template: &BlockTemplate, header: &BlockHeader) -> Result<bool> {
        self.call::<bool>(
            "submitminingsolution",
            json!([{
                "version": header.version,
                "time": header.time,
                "nonce": header.nonce,
                "shift": header.shift,
                "adder": hex::encode(header.adder),
                "gap_size": header.gap_size,
                "coinbase": hex::encode(&template.coinbase),
            }]),
        )
    }

    fn tip_height(&self) -> Result<u64> {
        self.call::<u64>("getblockcount", json!([]))
    }

    /// The epoch is keyed by the best block hash.
    fn epoch_key(&self) -> Result<[u8; 32]> {
        let tip = self.call::<String>("getbestblockhash", json!([]))?;
        let bytes = hex::decode(&tip).context("getbestblockhash returned invalid hex")?;
        ensure!(
            bytes.len() == 32,
            "getbestblockhash returned {} bytes, expected 32",
            bytes.len()
        );

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}
