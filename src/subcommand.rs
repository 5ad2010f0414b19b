use super::*;

pub(crate) mod devices;
pub(crate) mod miner;
pub(crate) mod pool;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    #[command(about = "List GPU devices for sieve acceleration")]
    Devices(devices::Devices),
    #[command(about = "Run the solo miner against a node")]
    Miner(miner::Miner),
    #[command(about = "Run the stratum server")]
    Pool(pool::Pool),
}

impl Subcommand {
    pub(crate) async fn run(self, cancel_token: CancellationToken) -> Result {
        match self {
            Self::Devices(devices) => devices.run().await,
            Self::Miner(miner) => miner.run(cancel_token).await,
            Self::Pool(pool) => pool.run(cancel_token).await,
        }
    }
}
