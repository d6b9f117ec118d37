use anyhow::Context;
use faultline_core::config::Config;
use faultline_core::store::EventStore;

/// Run the `status` subcommand: load config, open the event store read-only,
/// print a coarse count snapshot.
pub async fn run(json_output: bool) -> anyhow::Result<()> {
    let cfg = Config::load().context("failed to load config")?;

    faultline_telemetry::logging::init_logging("faultline-cli", "warn");

    let store_path = expand_tilde(&cfg.storage.path);
    if let Some(parent) = std::path::Path::new(&store_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let store = EventStore::new(&store_path)
        .await
        .with_context(|| format!("failed to open event store at {store_path}"))?;

    let snapshot = store
        .status_snapshot()
        .await
        .context("failed to compute status snapshot")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("faultline status  ({store_path})");
    println!("{}", "-".repeat(40));
    println!("Projects:               {}", snapshot.projects);
    println!("Issues (open/total):    {}/{}", snapshot.issues_open, snapshot.issues_total);
    println!("Issue events stored:    {}", snapshot.events_total);
    println!("Transaction events:     {}", snapshot.transactions_total);
    println!("Undispatched alerts:    {}", snapshot.undispatched_notifications);

    Ok(())
}

/// Expand a leading `~` or `~/` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
