use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by the HTTP access log middleware.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
///
/// With `COMPANION_ACCESS_LOG_ROLL=1` access log lines are also written to a
/// rolling file under `COMPANION_ACCESS_LOG_DIR` (default `logs`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));

    match access_file_settings() {
        Some(settings) => {
            if std::fs::create_dir_all(&settings.dir).is_err() {
                tracing::warn!(directory = %settings.dir, "failed to create access log directory");
            }
            let writer = match settings.rotation.as_str() {
                "hourly" => tracing_appender::rolling::hourly(&settings.dir, &settings.prefix),
                "minutely" => tracing_appender::rolling::minutely(&settings.dir, &settings.prefix),
                "never" => tracing_appender::rolling::never(&settings.dir, &settings.prefix),
                _ => tracing_appender::rolling::daily(&settings.dir, &settings.prefix),
            };
            let (nb, guard) = tracing_appender::non_blocking(writer);
            let _ = ACCESS_GUARD.set(guard);
            let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
            let access_layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb)
                .with_filter(targets);
            let _ = registry.with(access_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AccessFileSettings {
    dir: String,
    prefix: String,
    rotation: String,
}

fn access_file_settings() -> Option<AccessFileSettings> {
    access_file_settings_from(|key| std::env::var(key).ok())
}

fn access_file_settings_from<F>(get: F) -> Option<AccessFileSettings>
where
    F: Fn(&str) -> Option<String>,
{
    if get("COMPANION_ACCESS_LOG_ROLL").as_deref() != Some("1") {
        return None;
    }
    Some(AccessFileSettings {
        dir: get("COMPANION_ACCESS_LOG_DIR").unwrap_or_else(|| "logs".to_string()),
        prefix: get("COMPANION_ACCESS_LOG_PREFIX").unwrap_or_else(|| "http-access".into()),
        rotation: get("COMPANION_ACCESS_LOG_ROTATION")
            .unwrap_or_else(|| "daily".into())
            .to_lowercase(),
    })
}
