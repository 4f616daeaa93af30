use anyhow::Context;
use clap::Parser;
use plotlink::bridge::{self, StreamSummary};
use plotlink::{init_logging, CommandChannel, Config, SerialBackend, BUILD_DATE, VERSION};
use plotlink_communication::list_ports;
use std::path::PathBuf;
use std::sync::Arc;

/// Stream G-code lines from stdin to a serial plotter or CNC controller
#[derive(Parser, Debug)]
#[command(name = "plotlink", version, about)]
struct Args {
    /// Config file (.toml or .json)
    #[arg(short, long, env = "PLOTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// USB vendor id, hexadecimal (overrides config and VENDOR_ID)
    #[arg(long)]
    vendor_id: Option<String>,

    /// USB product id, hexadecimal (overrides config and PRODUCT_ID)
    #[arg(long)]
    product_id: Option<String>,

    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = Args::parse();

    if args.list_ports {
        for port in list_ports()? {
            match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => {
                    println!("{}\t{:04x}:{:04x}\t{}", port.port_name, vid, pid, port.description)
                }
                _ => println!("{}\t-\t{}", port.port_name, port.description),
            }
        }
        return Ok(());
    }

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load settings")?;
    config.apply_env_overrides();
    if let Some(vendor_id) = args.vendor_id {
        config.device.vendor_id = vendor_id;
    }
    if let Some(product_id) = args.product_id {
        config.device.product_id = product_id;
    }
    config.validate()?;
    let identity = config
        .identity()
        .context("Set the device ids with --vendor-id/--product-id or VENDOR_ID/PRODUCT_ID")?;

    tracing::info!("plotlink {} (built {})", VERSION, BUILD_DATE);

    let backend = Arc::new(SerialBackend::new());
    let channel = CommandChannel::spawn(backend, config.to_channel_config());
    channel.initialize(identity).await?;

    match bridge::send_startup(&channel, &config.startup.commands).await {
        Ok(count) => tracing::info!("Startup complete ({} command(s) acknowledged)", count),
        Err(e) => tracing::warn!("Startup commands failed: {}", e),
    }

    let summary = run_bridge(&channel).await?;
    tracing::info!(
        "Done: {} acknowledged, {} failed, {} skipped",
        summary.acknowledged,
        summary.failed,
        summary.skipped
    );

    channel.shutdown().await;
    Ok(())
}

async fn run_bridge(channel: &CommandChannel) -> anyhow::Result<StreamSummary> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    tokio::select! {
        summary = bridge::stream_lines(channel, stdin, &mut stdout) => {
            let summary = summary?;
            channel.wait_until_idle().await;
            Ok(summary)
        }
        _ = tokio::signal::ctrl_c() => {
            let cleared = channel.clear().await?;
            tracing::warn!("Interrupted, discarded {} pending command(s)", cleared);
            Ok(StreamSummary::default())
        }
    }
}
