//! CLI command implementations

use crate::config;
use crate::output::{format_bytes, format_duration, format_speed};
use crate::progress::TransferProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{Context, Result};
use console::style;
use pget_core::{Credentials, DownloadReport, DownloadRequest, Pget, Settings};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

// ============================================================================
// Download Commands
// ============================================================================

pub async fn get(
    settings: Settings,
    url: &str,
    output: Option<PathBuf>,
    segments: Option<u32>,
    user: Option<String>,
    password: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let segment_count = segments.unwrap_or(settings.default_segments);
    let mut request = parse_request(&settings, url, segment_count, user, password)?;
    request.local_path = output.unwrap_or_else(|| PathBuf::from(request.remote_file_name()));

    debug!(
        "Fetching {}:{}{} into {} with {} segments",
        request.host,
        request.port,
        request.remote_path,
        request.local_path.display(),
        request.segment_count
    );

    let name = request.remote_file_name().to_string();
    let pget = Pget::new(settings);
    let mut events = pget.subscribe();
    let handle = pget.start(request);

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut progress =
        (format == OutputFormat::Human).then(|| TransferProgress::new(handle.id(), &name));
    if let Some(progress) = progress.as_mut() {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if progress.handle_event(&event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    let report = match handle.wait().await {
        Ok(report) => report,
        Err(e) => {
            if let Some(progress) = progress {
                progress.clear();
            }
            return Err(e).context(format!("Download of {} failed", url));
        }
    };

    print_report(&report, format)
}

fn print_report(report: &DownloadReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct SegmentRow {
                index: u32,
                offset: u64,
                length: u64,
                size: String,
            }

            let rows: Vec<SegmentRow> = report
                .segments
                .iter()
                .map(|s| SegmentRow {
                    index: s.index,
                    offset: s.offset,
                    length: s.length,
                    size: format_bytes(s.length),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            println!(
                "{} Downloaded: {}",
                style("✓").green().bold(),
                style(report.local_path.display()).cyan()
            );
            println!("  Size: {}", format_bytes(report.total_size));
            println!("  Segments: {}", report.segments.len());
            println!("  Time: {}", format_duration(report.elapsed()));
            println!("  Average speed: {}", format_speed(report.average_speed()));
        }
    }

    Ok(())
}

pub async fn probe(
    settings: Settings,
    url: &str,
    user: Option<String>,
    password: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = parse_request(&settings, url, 1, user, password)?;
    let size = Pget::new(settings)
        .probe(
            &request.host,
            request.port,
            &request.credentials,
            &request.remote_path,
        )
        .await
        .with_context(|| format!("Failed to probe {}", url))?;

    match format {
        OutputFormat::Json => {
            let info = serde_json::json!({
                "host": request.host,
                "port": request.port,
                "remote_path": request.remote_path,
                "size": size,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!(
                "{} {}",
                style("✓").green().bold(),
                style(&request.remote_path).cyan()
            );
            println!("  Host: {}:{}", request.host, request.port);
            println!("  Size: {} ({} bytes)", format_bytes(size), size);
        }
    }

    Ok(())
}

/// Build a request from the URL, applying flag overrides and the default port
fn parse_request(
    settings: &Settings,
    url: &str,
    segment_count: u32,
    user: Option<String>,
    password: Option<String>,
) -> Result<DownloadRequest> {
    let mut request = DownloadRequest::from_url(url, PathBuf::new(), segment_count)
        .with_context(|| format!("Invalid URL: {}", url))?;

    if url::Url::parse(url)?.port().is_none() {
        request.port = settings.default_port;
    }

    match (user, password) {
        (Some(user), password) => {
            request.credentials = Credentials::new(user, password.unwrap_or_default());
        }
        (None, Some(password)) => request.credentials.password = password,
        (None, None) => {}
    }

    Ok(request)
}

// ============================================================================
// Config Commands
// ============================================================================

pub fn config_action(
    path: &Path,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = config::load(path)?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                _ => {
                    println!("pget Configuration ({}):", path.display());
                    println!();
                    for key in config::KEYS {
                        println!("  {}: {}", key, config::get_value(&settings, key)?);
                    }
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = config::load(path)?;
            println!("{}", config::get_value(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = config::load(path)?;
            config::set_value(&mut settings, &key, &value)?;
            config::save(path, &settings)?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            use dialoguer::Confirm;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                config::save(path, &Settings::default())?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}
