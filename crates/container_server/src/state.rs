use std::sync::Arc;

use container_broker::BrokerRegistry;
use container_path::MountGuard;

use crate::config::Config;

pub struct AppStateInner {
    pub config: Config,
    pub mount_guard: MountGuard,
    pub brokers: BrokerRegistry,
    pub account_http: reqwest::Client,
}

pub type AppState = Arc<AppStateInner>;

pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let mount_guard = MountGuard::new(config.devices.clone(), config.mount_check);
    let account_http = account_client::build_client(config.conn_timeout())?;
    Ok(Arc::new(AppStateInner {
        config,
        mount_guard,
        brokers: BrokerRegistry::new(),
        account_http,
    }))
}
