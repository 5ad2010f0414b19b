use super::*;

/// The job object pushed to miners, both inside login responses and as the
/// params of job notifications. `blob` is the 76-byte mining payload in hex,
/// `target` the pool share threshold, `seed_hash` the RandomX epoch key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub blob: String,
    pub job_id: String,
    pub target: ShareTarget,
    pub algo: String,
    pub height: u64,
    pub seed_hash: String,
}
