use crate::retry::RetryPolicy;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use time_tz::Tz;

pub const DEFAULT_ZONE: &str = "America/Chicago";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8600";
pub const DEFAULT_DELIVERY_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_ALERT_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_PARALLELISM: usize = 4;

/// Validated runtime configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub data_file: PathBuf,
    pub listen: SocketAddr,
    pub zone: &'static Tz,
    pub gateway_url: String,
    pub gateway_token: Option<String>,
    pub delivery_interval: Duration,
    pub alert_interval: Duration,
    pub retry: RetryPolicy,
    pub parallelism: usize,
}
