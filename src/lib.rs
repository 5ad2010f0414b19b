use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    bitcoin::{VarInt, consensus::encode},
    clap::Parser,
    connection::Connection,
    futures::{sink::SinkExt, stream::StreamExt},
    header::{BlockHeader, meets_target},
    jobs::{Job, JobBroker},
    provider::{BlockTemplate, BlockTemplateProvider},
    randomx::RandomxEngine,
    serde::{
        Deserialize, Serialize, Serializer,
        de::{self, Deserializer},
    },
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    sieve::{GapMiner, GapMinerConfig},
    std::{
        collections::{HashMap, VecDeque},
        env,
        fmt,
        io,
        net::SocketAddr,
        process,
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        thread,
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    stratum::{
        Authorize, Id, JobParams, Login, LoginResult, Message, ShareTarget, StratumError, Submit,
        Subscribe, SubscribeResult, Username,
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::TcpListener,
        runtime::Runtime,
        sync::{Notify, watch},
        task,
        time::{MissedTickBehavior, interval, sleep},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::EnvFilter,
};

pub mod arguments;
pub mod connection;
pub mod driver;
pub mod header;
pub mod jobs;
pub mod provider;
pub mod randomx;
pub mod server;
pub mod share;
pub mod sieve;
pub mod stratum;
pub mod subcommand;

pub const USER_AGENT: &str = "joule/0.4.1";

/// One JSON object per line; anything longer is protocol-fatal.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Algorithm tag advertised to miners.
pub const ALGO: &str = "rx/0";

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// f64 in an AtomicU64, for stats fields that need lock-free monotone
/// updates from many worker threads.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn fetch_max(&self, value: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        while value > f64::from_bits(current) {
            match self.0.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

mod signal {
    use {super::*, tokio::signal::ctrl_c};

    pub(crate) fn setup_signal_handler() -> CancellationToken {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            if ctrl_c().await.is_ok() {
                info!("Received shutdown signal (ctrl-c)");
                token_clone.cancel();
            }
        });

        token
    }
}

pub fn main() {
    let (writer, _guard) = non_blocking(io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(writer)
        .init();

    let args = Arguments::parse();

    Runtime::new()
        .expect("Failed to create tokio runtime")
        .block_on(async {
            let cancel_token = signal::setup_signal_handler();

            match args.run(cancel_token).await {
                Err(err) => {
                    error!("error: {err}");

                    if env::var_os("RUST_BACKTRACE")
                        .map(|val| val == "1")
                        .unwrap_or_default()
                    {
                        error!("{}", err.backtrace());
                    }
                    process::exit(1);
                }
                Ok(_) => {
                    process::exit(0);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_f64_fetch_max_is_monotone() {
        let best = AtomicF64::default();
        best.fetch_max(3.5);
        assert_eq!(best.load(), 3.5);

        best.fetch_max(2.0);
        assert_eq!(best.load(), 3.5);

        best.fetch_max(11.25);
        assert_eq!(best.load(), 11.25);
    }

    #[test]
    fn atomic_f64_store_overwrites() {
        let rate = AtomicF64::default();
        rate.store(1234.5);
        assert_eq!(rate.load(), 1234.5);
        rate.store(0.5);
        assert_eq!(rate.load(), 0.5);
    }
}
