use {super::*, pool_config::PoolConfig};

pub(crate) mod pool_config;

#[derive(Parser, Debug)]
pub(crate) struct Pool {
    #[command(flatten)]
    pub(crate) config: PoolConfig,
}

impl Pool {
    pub(crate) async fn run(&self, cancel_token: CancellationToken) -> Result {
        let provider = Arc::new(provider::RpcProvider::new(self.config.node_url()));

        let handle = server::StratumServer::new(
            provider,
            server::ServerOptions {
                address: self.config.address(),
                port: self.config.port(),
                share_difficulty: self.config.share_difficulty(),
                job_interval: self.config.job_interval(),
                idle_timeout: self.config.idle_timeout(),
            },
        )
        .spawn(cancel_token.clone())
        .await?;

        eprintln!("Listening on {}:{}", self.config.address(), handle.port());

        let mut status = interval(Duration::from_secs(60));
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);
        status.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Shutting down stratum server");
                    break;
                }
                _ = status.tick() => {
                    let info = handle.info();
                    info!(
                        "clients={} accepted={} rejected={} blocks={}",
                        info.clients,
                        info.shares_accepted,
                        info.shares_rejected,
                        info.blocks_found,
                    );
                }
            }
        }

        handle.stop();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pool_config(args: &str) -> PoolConfig {
        match Arguments::try_parse_from(args.split_whitespace()) {
            Ok(arguments) => match arguments.subcommand {
                Subcommand::Pool(pool) => pool.config,
                subcommand => panic!("unexpected subcommand: {subcommand:?}"),
            },
            Err(err) => panic!("error parsing arguments: {err}"),
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = parse_pool_config("joule pool");

        assert_eq!(config.address(), "0.0.0.0");
        assert_eq!(config.port(), 3335);
        assert_eq!(config.node_url(), "http://127.0.0.1:9332");
        assert_eq!(config.share_difficulty(), 10_000);
        assert_eq!(config.job_interval(), Duration::from_secs(30));
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn override_address_and_port() {
        let config = parse_pool_config("joule pool --address 127.0.0.1 --port 9999");

        assert_eq!(config.address(), "127.0.0.1");
        assert_eq!(config.port(), 9999);
    }

    #[test]
    fn override_share_difficulty_and_intervals() {
        let config = parse_pool_config(
            "joule pool --share-difficulty 500 --job-interval 5 --idle-timeout 120",
        );

        assert_eq!(config.share_difficulty(), 500);
        assert_eq!(config.job_interval(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn override_node_url() {
        let config = parse_pool_config("joule pool --node-url http://10.0.0.2:9332");
        assert_eq!(config.node_url(), "http://10.0.0.2:9332");
    }
}
