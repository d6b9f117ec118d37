use std::path::PathBuf;

use faultline_core::config::{Config, ConfigError};
use serde_json::json;

/// Run the `doctor` subcommand: verify the config file parses, the storage
/// directory is writable, and the configured server port is free.
pub async fn run(strict: bool, json_output: bool, out_path: Option<&str>) -> anyhow::Result<()> {
    let mut failures = 0usize;

    let (config, config_check) = match Config::load() {
        Ok(cfg) => (cfg, json!({ "ok": true })),
        Err(e) => {
            failures += 1;
            (Config::default(), json!({ "ok": false, "error": config_error_message(&e) }))
        }
    };

    let storage_path = expand_tilde(&config.storage.path);
    let storage_ok = std::path::Path::new(&storage_path)
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .is_ok();
    if !storage_ok {
        failures += 1;
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let port_free = tokio::net::TcpListener::bind(&bind_addr).await.is_ok();
    if !port_free {
        failures += 1;
    }

    let result = json!({
        "config": config_check,
        "storage_path": storage_path,
        "storage_writable": storage_ok,
        "bind_addr": bind_addr,
        "port_free": port_free,
        "batch_worker_count": config.batch.worker_count,
        "alert_eval_interval_secs": config.alerts.eval_interval_secs,
        "failures": failures,
    });

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("faultline doctor report");
        println!("{}", "-".repeat(40));
        println!("Config:          {}", if failures == 0 || result["config"]["ok"].as_bool().unwrap_or(false) { "ok" } else { "failed" });
        println!("Storage path:    {storage_path} ({})", if storage_ok { "writable" } else { "not writable" });
        println!("Bind address:    {bind_addr} ({})", if port_free { "free" } else { "in use" });
        println!("Batch workers:   {}", config.batch.worker_count);
        println!("Alert interval:  {}s", config.alerts.eval_interval_secs);
        println!("Failures:        {failures}");
    }

    if let Some(path) = out_path {
        write_json_artifact(path, &result)?;
    }

    if strict && failures > 0 {
        anyhow::bail!("doctor checks failed ({failures} issues)");
    }

    Ok(())
}

fn config_error_message(e: &ConfigError) -> String {
    e.to_string()
}

fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

fn write_json_artifact(path: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let out_path = PathBuf::from(path);
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(out_path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn doctor_writes_artifact_file() {
        let out = std::env::temp_dir().join(format!(
            "faultline-cli-doctor-out-{}.json",
            std::process::id()
        ));

        run(false, true, Some(&out.display().to_string()))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert!(payload["storage_path"].as_str().is_some());

        let _ = std::fs::remove_file(out);
    }
}
