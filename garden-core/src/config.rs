//! daemon configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default store/backend url
    pub static DEFAULT_BACKEND_URL: &str = "https://cani-backend.onrender.com";
    /// Default external api
    pub static DEFAULT_EXTERNAL_API: &str = "[::]:3333";
    /// Default roster, comma separated
    pub static DEFAULT_ROSTER: &str = "ermes-ben,raya,Visualizzatore";
    /// Default read-only observer
    pub static DEFAULT_OBSERVER: &str = "Visualizzatore";
    /// poll cadence (ms)
    pub const DEFAULT_POLL_MS: u64 = 2_000;
    /// how long a claim may stay unconfirmed (ms)
    pub const DEFAULT_CLAIM_TIMEOUT_MS: u64 = 10_000;
    /// delay between failed health probes (ms)
    pub const DEFAULT_HEALTH_RETRY_MS: u64 = 3_000;
    /// keep-alive cadence (secs)
    pub const DEFAULT_KEEPALIVE_SECS: u64 = 300;
    /// how long the store may stay empty before seeding is offered (secs)
    pub const DEFAULT_SEED_GRACE_SECS: u64 = 20;
    /// per request timeout against the store (secs)
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "garden-worker";
    /// default log level. Can use this argument or GARDEN_LOG env var
    pub const DEFAULT_GARDEN_LOG: &str = "info";
    /// log as "json", "pretty" or "standard" (unstructured)
    pub const DEFAULT_LOG_FORMAT: &str = "standard";

    use std::{net::SocketAddr, path::PathBuf, time::Duration};

    use anyhow::{Context, Result};
    pub use clap::Parser;
    use garden_coordination::Roster;

    use crate::context::SessionConfig;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "garden", bin_name = "garden", about, long_about = None)]
    /// parses from cli & environment var. garden will load `.env` in the same dir as the binary as well
    pub struct Config {
        /// base url of the state store and push backend
        #[clap(short, long, env, value_parser, default_value = DEFAULT_BACKEND_URL)]
        pub backend_url: String,
        /// party to act as. Overrides the persisted selection
        #[clap(short, long, env, value_parser)]
        pub party: Option<String>,
        /// parties allowed to use the garden, comma separated
        #[clap(long, env, value_delimiter = ',', default_value = DEFAULT_ROSTER)]
        pub roster: Vec<String>,
        /// roster member that may only observe
        #[clap(long, env, value_parser, default_value = DEFAULT_OBSERVER)]
        pub observer: String,
        /// where to keep the selected party and notification flag. In memory if unset
        #[clap(short, long, env, value_parser)]
        pub state_path: Option<PathBuf>,
        /// the address the local control api listens on
        #[clap(long, env, value_parser, default_value = DEFAULT_EXTERNAL_API)]
        pub external_api: SocketAddr,
        /// poll interval in milliseconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_POLL_MS)]
        pub poll_ms: u64,
        /// claim confirmation timeout in milliseconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_CLAIM_TIMEOUT_MS)]
        pub claim_timeout_ms: u64,
        /// health probe retry interval in milliseconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_HEALTH_RETRY_MS)]
        pub health_retry_ms: u64,
        /// keep-alive interval in seconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_KEEPALIVE_SECS)]
        pub keepalive_secs: u64,
        /// seconds the store may stay empty before seeding is offered
        #[clap(long, env, value_parser, default_value_t = DEFAULT_SEED_GRACE_SECS)]
        pub seed_grace_secs: u64,
        /// per request timeout in seconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
        pub request_timeout_secs: u64,
        /// push service endpoint this client receives notifications on.
        /// Notifications cannot be enabled without one
        #[clap(long, env, value_parser)]
        pub push_endpoint: Option<String>,
        /// p256dh key of the push subscription
        #[clap(long, env, value_parser, default_value = "")]
        pub push_p256dh: String,
        /// auth secret of the push subscription
        #[clap(long, env, value_parser, default_value = "")]
        pub push_auth: String,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of worker threads, defaults to number of cpus
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_GARDEN_LOG)]
        pub garden_log: String,
        /// log output format: standard, json or pretty
        #[clap(long, env = "LOG_FORMAT", value_parser, default_value = DEFAULT_LOG_FORMAT)]
        pub log_format: String,
    }

    impl Config {
        /// validated roster
        pub fn roster(&self) -> Result<Roster> {
            Roster::new(self.roster.iter().map(|p| p.trim()), self.observer.trim())
                .context("invalid roster")
        }

        /// per request timeout as `Duration`
        pub fn request_timeout(&self) -> Duration {
            Duration::from_secs(self.request_timeout_secs)
        }

        /// session timings
        pub fn session(&self) -> SessionConfig {
            SessionConfig {
                poll_interval: Duration::from_millis(self.poll_ms),
                claim_timeout: Duration::from_millis(self.claim_timeout_ms),
                seed_grace: Duration::from_secs(self.seed_grace_secs),
                health_retry: Duration::from_millis(self.health_retry_ms),
                keepalive: Duration::from_secs(self.keepalive_secs),
            }
        }
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// Configuration for log output
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber
        pub fn parse(garden_log: &str, log_frmt: &str) -> Result<Self> {
            // Log level comes from GARDEN_LOG
            let filter = EnvFilter::try_new(garden_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?)
                .add_directive("rustls=off".parse()?);

            match log_frmt {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self {
                log_frmt: log_frmt.to_owned(),
            })
        }
    }
}
