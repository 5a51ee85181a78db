use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use wxnotify::config::{self, AppConfig};
use wxnotify::recurrence;
use wxnotify::retry::RetryPolicy;
use wxnotify::store::SubscriptionStore;
use wxnotify::types::subscription::{Cadence, CadenceKind, LocalTime, Weekday};

#[allow(clippy::large_enum_variant)]
pub(crate) enum RunOutcome {
    Serve(AppConfig),
    Exit(i32),
}

pub(crate) fn run() -> RunOutcome {
    let cli = Cli::parse();
    let file = match cli.settings.config.as_deref() {
        Some(path) => match load_file_config(path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("error: {err}");
                return RunOutcome::Exit(2);
            }
        },
        None => FileConfig::default(),
    };
    let settings = cli.settings.merged(file);

    match cli.command {
        Some(Command::NextFire(args)) => RunOutcome::Exit(run_next_fire(&settings, args)),
        Some(Command::CheckStore) => RunOutcome::Exit(run_check_store(&settings)),
        Some(Command::Serve) | None => match resolve_config(&settings) {
            Ok(config) => RunOutcome::Serve(config),
            Err(err) => {
                eprintln!("error: {err}");
                RunOutcome::Exit(2)
            }
        },
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "wxnotify",
    version,
    about = "Weather delivery scheduler and severe-weather alert monitor"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    settings: Settings,
}

/// Flags override environment variables, which override the config file.
#[derive(Args, Debug, Default, Clone)]
struct Settings {
    #[arg(long, env = "WXNOTIFY_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[arg(long, env = "WXNOTIFY_DATA_FILE", global = true)]
    data_file: Option<PathBuf>,
    #[arg(long, env = "WXNOTIFY_LISTEN")]
    listen: Option<String>,
    #[arg(long, env = "WXNOTIFY_ZONE", global = true)]
    zone: Option<String>,
    #[arg(long, env = "WXNOTIFY_GATEWAY_URL")]
    gateway_url: Option<String>,
    #[arg(long, env = "WXNOTIFY_GATEWAY_TOKEN", hide_env_values = true)]
    gateway_token: Option<String>,
    #[arg(long, env = "WXNOTIFY_DELIVERY_INTERVAL")]
    delivery_interval: Option<String>,
    #[arg(long, env = "WXNOTIFY_ALERT_INTERVAL")]
    alert_interval: Option<String>,
    #[arg(long, env = "WXNOTIFY_GATEWAY_TIMEOUT")]
    gateway_timeout: Option<String>,
    #[arg(long, env = "WXNOTIFY_GATEWAY_RETRIES")]
    gateway_retries: Option<u32>,
    #[arg(long, env = "WXNOTIFY_RETRY_DELAY")]
    retry_delay: Option<String>,
    #[arg(long, env = "WXNOTIFY_PARALLELISM")]
    parallelism: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_file: Option<PathBuf>,
    listen: Option<String>,
    zone: Option<String>,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
    delivery_interval: Option<String>,
    alert_interval: Option<String>,
    gateway_timeout: Option<String>,
    gateway_retries: Option<u32>,
    retry_delay: Option<String>,
    parallelism: Option<usize>,
}

impl Settings {
    fn merged(self, file: FileConfig) -> Self {
        Self {
            config: self.config,
            data_file: self.data_file.or(file.data_file),
            listen: self.listen.or(file.listen),
            zone: self.zone.or(file.zone),
            gateway_url: self.gateway_url.or(file.gateway_url),
            gateway_token: self.gateway_token.or(file.gateway_token),
            delivery_interval: self.delivery_interval.or(file.delivery_interval),
            alert_interval: self.alert_interval.or(file.alert_interval),
            gateway_timeout: self.gateway_timeout.or(file.gateway_timeout),
            gateway_retries: self.gateway_retries.or(file.gateway_retries),
            retry_delay: self.retry_delay.or(file.retry_delay),
            parallelism: self.parallelism.or(file.parallelism),
        }
    }

    fn zone(&self) -> Result<&'static time_tz::Tz, String> {
        let name = self.zone.as_deref().unwrap_or(config::DEFAULT_ZONE);
        recurrence::resolve_zone(name).map_err(|err| err.to_string())
    }

    fn data_file(&self) -> Result<&Path, String> {
        self.data_file
            .as_deref()
            .ok_or_else(|| "--data-file is required".to_string())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler, the alert monitor and the command API (default).
    Serve,
    /// Preview when a subscription would fire next.
    NextFire(NextFireArgs),
    /// List store rows that fail to decode.
    CheckStore,
}

#[derive(Args, Debug)]
struct NextFireArgs {
    #[arg(long, default_value = "daily")]
    cadence: String,
    #[arg(long)]
    time: String,
    #[arg(long)]
    weekday: Option<String>,
    /// RFC 3339 reference instant; defaults to now.
    #[arg(long)]
    after: Option<String>,
}

fn load_file_config(path: &Path) -> Result<FileConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read config file {}: {err}", path.display()))?;
    toml::from_str(&contents)
        .map_err(|err| format!("invalid config file {}: {err}", path.display()))
}

fn resolve_config(settings: &Settings) -> Result<AppConfig, String> {
    let data_file = settings.data_file()?.to_path_buf();
    let gateway_url = settings
        .gateway_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or("--gateway-url is required")?
        .to_string();
    if !(gateway_url.starts_with("http://") || gateway_url.starts_with("https://")) {
        return Err(format!("gateway url '{gateway_url}' must start with http:// or https://"));
    }

    let listen_raw = settings.listen.as_deref().unwrap_or(config::DEFAULT_LISTEN);
    let listen: SocketAddr = listen_raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid listen address '{listen_raw}'"))?;

    let parallelism = settings.parallelism.unwrap_or(config::DEFAULT_PARALLELISM);
    if parallelism == 0 {
        return Err("parallelism must be greater than 0".to_string());
    }

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        retries: settings.gateway_retries.unwrap_or(defaults.retries),
        delay: optional_interval(settings.retry_delay.as_deref(), defaults.delay)?,
        timeout: optional_interval(settings.gateway_timeout.as_deref(), defaults.timeout)?,
    };

    let gateway_token = settings
        .gateway_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    Ok(AppConfig {
        data_file,
        listen,
        zone: settings.zone()?,
        gateway_url,
        gateway_token,
        delivery_interval: optional_interval(
            settings.delivery_interval.as_deref(),
            config::DEFAULT_DELIVERY_INTERVAL,
        )?,
        alert_interval: optional_interval(
            settings.alert_interval.as_deref(),
            config::DEFAULT_ALERT_INTERVAL,
        )?,
        retry,
        parallelism,
    })
}

fn optional_interval(raw: Option<&str>, default: Duration) -> Result<Duration, String> {
    raw.map_or(Ok(default), parse_interval)
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("interval cannot be empty".to_string());
    }

    let (amount, unit) = match value.chars().last() {
        Some(ch) if ch.is_ascii_alphabetic() => {
            (&value[..value.len() - 1], ch.to_ascii_lowercase())
        }
        _ => (value, 's'),
    };

    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid interval '{value}'; expected <number>[s|m|h|d]"))?;

    if amount == 0 {
        return Err("interval must be greater than 0".to_string());
    }

    let seconds = match unit {
        's' => Some(amount),
        'm' => amount.checked_mul(60),
        'h' => amount.checked_mul(60 * 60),
        'd' => amount.checked_mul(24 * 60 * 60),
        _ => {
            return Err(format!(
                "invalid interval '{value}'; expected <number>[s|m|h|d]"
            ));
        }
    };
    seconds
        .map(Duration::from_secs)
        .ok_or_else(|| format!("interval '{value}' is too large"))
}

fn run_next_fire(settings: &Settings, args: NextFireArgs) -> i32 {
    match next_fire(settings, args) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            2
        }
    }
}

fn next_fire(settings: &Settings, args: NextFireArgs) -> Result<Vec<String>, String> {
    let zone = settings.zone()?;
    let kind = CadenceKind::parse(&args.cadence).map_err(|err| err.to_string())?;
    let weekday = args
        .weekday
        .as_deref()
        .map(Weekday::parse)
        .transpose()
        .map_err(|err| err.to_string())?;
    let cadence = Cadence::from_parts(kind, weekday).map_err(|err| err.to_string())?;
    let local_time = LocalTime::parse(&args.time).map_err(|err| err.to_string())?;
    let reference = match args.after.as_deref() {
        Some(raw) => OffsetDateTime::parse(raw.trim(), &Rfc3339)
            .map_err(|err| format!("invalid --after '{raw}': {err}"))?,
        None => OffsetDateTime::now_utc(),
    };

    let next = recurrence::compute_next_fire(cadence, local_time, reference, zone);
    let rendered = next
        .format(&Rfc3339)
        .map_err(|err| format!("failed to format {next}: {err}"))?;
    Ok(vec![rendered, recurrence::format_local(next, zone)])
}

fn run_check_store(settings: &Settings) -> i32 {
    let path = match settings.data_file() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("error: {err}");
            return 2;
        }
    };
    let store = match SubscriptionStore::open(path) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("failed to open store {}: {err}", path.display());
            return 2;
        }
    };
    let quarantined = match store.quarantined() {
        Ok(quarantined) => quarantined,
        Err(err) => {
            eprintln!("failed to read store: {err}");
            return 2;
        }
    };

    if quarantined.is_empty() {
        println!("store is healthy: {}", path.display());
        return 0;
    }
    for corruption in &quarantined {
        println!("{corruption}");
    }
    1
}
