use std::{
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Container metadata server")]
pub struct Config {
    /// Root directory under which per-drive container DBs live.
    #[clap(long, env = "DEVICES", default_value = "/srv/node/")]
    pub devices: PathBuf,

    /// Verify each drive is a distinct mount point before touching it.
    #[clap(long, env = "MOUNT_CHECK", default_value = "true")]
    pub mount_check: bool,

    /// Seconds to wait for the account service to respond.
    #[clap(long, env = "NODE_TIMEOUT", default_value = "3")]
    pub node_timeout: f64,

    /// Seconds to wait for the account service TCP connect.
    #[clap(long, env = "CONN_TIMEOUT", default_value = "0.5")]
    pub conn_timeout: f64,

    /// Address to bind the HTTP listener to.
    #[clap(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:6001")]
    pub bind_address: SocketAddr,

    /// `tracing-subscriber` env-filter directive.
    #[clap(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Maximum rows returned from a single listing request.
    #[clap(long, env = "CONTAINER_LISTING_LIMIT", default_value = "10000")]
    pub listing_limit: usize,
}

impl Config {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.node_timeout)
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.conn_timeout)
    }
}
