use std::io::Write;
use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use heimdall::cache::MemoryEntityCache;
use heimdall::config;
use heimdall::error::HubResult;
use heimdall::events::EventStream;
use heimdall::registry::RegistryManager;
use heimdall::rooms::RoomDirectory;
use heimdall::service::UnifiedEntityService;

/*
 * Formatter function to output in syslog format. This makes sense when running
 * as a service (where output might go to a log file, or the system journal)
 */
#[allow(clippy::match_same_arms)]
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "<{}>{}: {}",
        match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug => 7,
            log::Level::Trace => 7,
        },
        record.target(),
        record.args()
    )
}

fn init_logging() -> HubResult<()> {
    /* Try to provide reasonable default filters, when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &["debug", "hyper=info", "reqwest=info"];

    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTERS.join(","));

    /* Detect if we need syslog or human-readable formatting */
    if std::env::var("SYSTEMD_EXEC_PID").is_ok_and(|pid| pid == std::process::id().to_string()) {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

async fn run() -> HubResult<()> {
    init_logging()?;

    let config = config::parse("config.yaml".into())?;
    log::debug!("Configuration loaded successfully");

    let registries = Arc::new(RegistryManager::new(&config.registry));
    let stream = Arc::new(EventStream::default());
    let rooms = Arc::new(RoomDirectory::new());
    let cache = Arc::new(MemoryEntityCache::new(config.hub.cache_ttl()));

    let service = UnifiedEntityService::new(
        config.hub.clone(),
        registries,
        stream.clone(),
        rooms,
        Some(cache),
    );

    /* Adapters are compiled in and registered by the embedding build; a
     * bare hub has nothing to bridge yet */
    if config.adapters.is_empty() {
        log::warn!("No adapters configured; the hub will idle until one registers");
    }

    // mirror the event stream into the log for operators tailing the journal
    let mut events = BroadcastStream::new(stream.subscribe());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok((id, block)) => log::debug!("Event {id}: {:?}", block.event),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    log::debug!("Event log fell behind by {n} events");
                }
            }
        }
    });

    service.start_periodic_sync().await;

    tokio::signal::ctrl_c().await?;
    log::warn!("Ctrl-C pressed, exiting..");
    service.stop_periodic_sync().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Heimdall error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
