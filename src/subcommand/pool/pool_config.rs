use super::*;

/// CLI arguments for the pool subcommand
#[derive(Clone, Debug, Parser)]
pub(crate) struct PoolConfig {
    #[arg(long, help = "Listen at <ADDRESS>.")]
    pub address: Option<String>,
    #[arg(long, help = "Listen on <PORT>.")]
    pub port: Option<u16>,
    #[arg(long, help = "Fetch templates from the node at <NODE_URL>.")]
    pub node_url: Option<String>,
    #[arg(long, help = "Hand out shares at <SHARE_DIFFICULTY>.")]
    pub share_difficulty: Option<u32>,
    #[arg(long, help = "Refresh the job every <JOB_INTERVAL> seconds.")]
    pub job_interval: Option<u64>,
    #[arg(long, help = "Drop clients idle for <IDLE_TIMEOUT> seconds.")]
    pub idle_timeout: Option<u64>,
}

impl PoolConfig {
    pub fn address(&self) -> String {
        self.address.clone().unwrap_or_else(|| "0.0.0.0".into())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(3335)
    }

    pub fn node_url(&self) -> String {
        self.node_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:9332".into())
    }

    pub fn share_difficulty(&self) -> u32 {
        self.share_difficulty.unwrap_or(10_000)
    }

    pub fn job_interval(&self) -> Duration {
        Duration::from_secs(self.job_interval.unwrap_or(30))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout.unwrap_or(600))
    }
}
