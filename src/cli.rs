use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rflink::config::LinkConfig;
use rflink::metrics;
use rflink::results::{BenchmarkRecord, JsonResultStore, ResultStore};
use rflink::transport;
use rflink::utils::digest::sha256_hex;
use rflink::{EventSender, Metadata, ReceivedTransfer, Receiver, TransferEvent, TransferResult, Transmitter};

#[derive(Parser)]
#[command(name = "rflink")]
#[command(about = "Reliable payload transfer over a half-duplex radio link")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Config file path")]
    pub config: Option<String>,

    #[arg(long, global = true, help = "Transport endpoint (overrides config)")]
    pub endpoint: Option<String>,

    #[arg(long, short, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transmit one payload
    Send {
        #[arg(long, help = "File to send", conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        #[arg(long, help = "Text to send")]
        text: Option<String>,
        #[arg(long, help = "Frame size in bytes")]
        mtu: Option<usize>,
        #[arg(long, help = "Pause after each frame in milliseconds")]
        gap_ms: Option<u64>,
        #[arg(long, help = "Frames per burst")]
        window: Option<usize>,
        #[arg(long, help = "Burst rounds before giving up")]
        max_rounds: Option<u32>,
        #[arg(long = "meta", value_parser = parse_meta, help = "Metadata entry key=value (repeatable)")]
        meta: Vec<(String, String)>,
        #[arg(long, help = "Append a benchmark row to this JSON file")]
        results: Option<PathBuf>,
    },
    /// Wait for and receive payloads
    Receive {
        #[arg(long, help = "Write the received payload here")]
        output: Option<PathBuf>,
        #[arg(long, help = "Seconds to wait for a transmitter (overrides config)")]
        timeout_secs: Option<u64>,
        #[arg(long, help = "Keep accepting sessions after the first")]
        keep_listening: bool,
    },
    /// Write a default configuration file
    GenerateConfig {
        #[arg(long, default_value = rflink::config::DEFAULT_CONFIG_FILE, help = "Config file path")]
        output: String,
    },
}

fn parse_meta(entry: &str) -> Result<(String, String), String> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", entry)),
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::GenerateConfig { output } = &cli.command {
        LinkConfig::default().save(output)?;
        if cli.json {
            println!("{}", serde_json::json!({"success": true, "config_file": output}));
        } else {
            println!("✅ Wrote default configuration to {}", output);
        }
        return Ok(());
    }

    let mut config = LinkConfig::load_or_create(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.transport.endpoint = endpoint;
    }

    match cli.command {
        Commands::Send { file, text, mtu, gap_ms, window, max_rounds, meta, results } => {
            if let Some(mtu) = mtu {
                config.transmitter.mtu = mtu;
            }
            if let Some(gap_ms) = gap_ms {
                config.transmitter.gap_ms = gap_ms;
            }
            if let Some(window) = window {
                config.transmitter.window_size = window;
            }
            if let Some(max_rounds) = max_rounds {
                config.transmitter.max_rounds = max_rounds;
            }

            let mut metadata: Metadata = meta.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            let payload = match (file, text) {
                (Some(path), _) => {
                    if let Some(name) = path.file_name() {
                        metadata
                            .entry("name")
                            .or_insert_with(|| Value::String(name.to_string_lossy().into_owned()));
                    }
                    tokio::fs::read(&path).await?
                }
                (None, Some(text)) => text.into_bytes(),
                (None, None) => bail!("nothing to send: pass --file or --text"),
            };

            send(&config, payload, metadata, results, cli.json).await
        }
        Commands::Receive { output, timeout_secs, keep_listening } => {
            let wait = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.receiver.sync_timeout());
            receive(&config, wait, output, keep_listening, cli.json).await
        }
        Commands::GenerateConfig { .. } => Ok(()),
    }
}

async fn send(
    config: &LinkConfig,
    payload: Vec<u8>,
    metadata: Metadata,
    results: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let link = transport::open(&config.transport).await?;
    let mut transmitter = Transmitter::new(link, config.transmitter.clone());
    let mut printer = None;
    if !json {
        let (events, handle) = progress_printer("TX");
        transmitter = transmitter.with_events(events);
        printer = Some(handle);
    }
    let result = transmitter.send(&payload, metadata).await?;
    drop(transmitter);
    if let Some(handle) = printer {
        handle.await?;
    }

    let tx = &config.transmitter;
    if let Some(path) = results {
        let row = BenchmarkRecord::from_result(&result, tx.mtu, tx.gap_ms, config.transport.baud_rate);
        JsonResultStore::new(path).append(tx.mtu, &row).await?;
    }

    let expected = metrics::expected_throughput(tx.mtu, tx.gap_ms, config.transport.baud_rate);
    if json {
        let mut out = serde_json::to_value(&result)?;
        out["expected_throughput"] = expected.into();
        out["goodput"] = result.goodput().into();
        out["sha256"] = sha256_hex(&payload).into();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_send_summary(&result, expected, &sha256_hex(&payload));
    }

    if !result.success {
        bail!("transfer {} did not complete", result.run_id);
    }
    Ok(())
}

async fn receive(
    config: &LinkConfig,
    wait: Duration,
    output: Option<PathBuf>,
    keep_listening: bool,
    json: bool,
) -> Result<()> {
    let link = transport::open(&config.transport).await?;
    let mut receiver = Receiver::new(link, config.receiver.clone());
    if !json {
        let (events, _printer) = progress_printer("RX");
        receiver = receiver.with_events(events);
    }

    loop {
        match receiver.receive_once(wait).await? {
            Some(transfer) => {
                if let Some(path) = &output {
                    tokio::fs::write(path, &transfer.data).await?;
                }

                if json {
                    let mut out = serde_json::to_value(&transfer)?;
                    out["sha256"] = sha256_hex(&transfer.data).into();
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    print_receive_summary(&transfer, output.as_ref());
                }

                if !keep_listening {
                    if !transfer.success {
                        bail!("transfer {} arrived incomplete", transfer.run_id);
                    }
                    return Ok(());
                }
            }
            None if !keep_listening => {
                if json {
                    println!("{}", serde_json::json!({"success": false, "reason": "no_transfer"}));
                } else {
                    println!("⏳ No transfer within {:?}", wait);
                }
                return Ok(());
            }
            None => {}
        }
    }
}

/// Print session progress as it happens
fn progress_printer(side: &'static str) -> (EventSender, JoinHandle<()>) {
    let (events, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::SyncSent { run_id, mtu, chunks, total_size }
                | TransferEvent::SyncReceived { run_id, mtu, chunks, total_size } => {
                    println!("[{}] sync: run {} ({} bytes, {} chunks, mtu {})", side, run_id, total_size, chunks, mtu)
                }
                TransferEvent::Report { round, pending, missing, crc_fail, timeouts, .. } => println!(
                    "[{}] round {}: {} missing, {} pending (crc_fail={}, timeouts={})",
                    side, round, missing, pending, crc_fail, timeouts
                ),
                TransferEvent::Finished { .. } => {}
            }
        }
    });
    (events, handle)
}

fn print_send_summary(result: &TransferResult, expected: f64, digest: &str) {
    println!("📡 Transfer Result");
    println!("==================");
    match (result.success, result.reason) {
        (true, _) => println!("✅ Delivered (run {})", result.run_id),
        (false, Some(reason)) => println!("❌ Failed: {:?} (run {})", reason, result.run_id),
        (false, None) => println!("❌ Failed (run {})", result.run_id),
    }
    println!("   Bytes: {}", result.bytes_total);
    println!("   Chunks: {}/{}", result.chunks_received, result.chunks_total);
    println!("   Rounds: {}", result.rounds);
    println!("   Loss: {:.1}%", result.loss_percent);
    println!("   CRC failures: {}  Timeouts: {}", result.crc_fail_count, result.timeouts);
    println!("   Duration: {:.2}s", result.duration_s);
    println!(
        "   Throughput: {:.1} B/s (expected {:.1} B/s, goodput {:.1} B/s)",
        result.effective_throughput,
        expected,
        result.goodput()
    );
    println!("   SHA-256: {}", digest);
}

fn print_receive_summary(transfer: &ReceivedTransfer, output: Option<&PathBuf>) {
    println!("📥 Received Transfer");
    println!("====================");
    if transfer.success {
        println!("✅ Complete (run {})", transfer.run_id);
    } else {
        println!("⚠️  Incomplete (run {})", transfer.run_id);
    }
    println!("   Bytes: {}", transfer.bytes);
    println!("   Chunks: {}/{}", transfer.chunks_received, transfer.chunks_expected);
    println!("   Loss: {:.1}%", transfer.loss_percent);
    println!("   CRC failures: {}  Timeouts: {}", transfer.crc_fail_count, transfer.timeouts);
    if !transfer.metadata.is_empty() {
        println!("   Metadata: {}", Value::Object(transfer.metadata.clone()));
    }
    println!("   SHA-256: {}", sha256_hex(&transfer.data));
    if let Some(path) = output {
        println!("   Written to: {}", path.display());
    }
}
