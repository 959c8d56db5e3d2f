//! dtk - serial ingestion and query CLI for DTK soil sensors.
//!
//! Run with: `cargo run -p dtk-service -- run`

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use time::UtcOffset;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dtk_service::{
    CloseReason, Config, IngestHandle, IngestLoop, Poller, QueryService, SerialConnector,
    Session, SharedStore, shared_store,
};
use dtk_store::Store;
use dtk_types::SensorRecord;

/// Ingest DTK sensor lines from a serial port and query the stored records.
#[derive(Parser, Debug)]
#[command(name = "dtk")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Serial device path (overrides config).
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Serial baud rate (overrides config).
    #[arg(short, long, global = true)]
    baud: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest lines from the serial port until interrupted (default).
    Run,

    /// Print the rolling window for a device, oldest first.
    Recent {
        /// Device id.
        device: i64,

        /// Number of records (defaults to the configured window).
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// List devices that have stored records.
    Devices,

    /// Dump every stored record, newest first.
    Dump {
        /// Write CSV instead of JSON.
        #[arg(long)]
        csv: bool,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete every stored record.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Refresh a device's rolling window until interrupted.
    Watch {
        /// Device id.
        device: i64,

        /// Number of records (defaults to the configured window).
        #[arg(short, long)]
        limit: Option<u32>,

        /// Also ingest from the serial port in this process.
        #[arg(long)]
        ingest: bool,
    },

    /// List serial ports present on this machine.
    Ports,
}

fn main() -> anyhow::Result<()> {
    // Read the local offset while the process is still single-threaded
    let utc_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("dtk=info,dtk_service=info,dtk_store=info")
            }),
        )
        .with_writer(io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(args, utc_offset))
}

async fn run(args: Args, utc_offset: UtcOffset) -> anyhow::Result<()> {
    if let Some(Command::Ports) = args.command {
        return list_ports();
    }

    let config = load_config(&args)?;

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("Failed to open {}", config.storage.path.display()))?
        .with_utc_offset(utc_offset);
    let store = shared_store(store);
    let queries = QueryService::new(store.clone());

    match args.command {
        Some(Command::Run) | None => run_ingest(&config, store).await,
        Some(Command::Recent { device, limit }) => {
            let records = queries
                .recent(device, limit.unwrap_or(config.query.window))
                .await?;
            print_records(&records);
            Ok(())
        }
        Some(Command::Devices) => {
            let summaries = queries.device_summaries().await?;
            if summaries.is_empty() {
                println!("No records stored");
            }
            for summary in summaries {
                println!(
                    "{:>6}  {:>8} record(s)  last {}",
                    summary.device_id,
                    summary.record_count,
                    dtk_types::format_captured_at(summary.last_captured_at)
                );
            }
            Ok(())
        }
        Some(Command::Dump { csv, output }) => dump(&queries, csv, output).await,
        Some(Command::Clear { yes }) => {
            if !yes {
                bail!("Refusing to delete all records without --yes");
            }
            let removed = queries.clear().await?;
            println!("Deleted {} record(s)", removed);
            Ok(())
        }
        Some(Command::Watch {
            device,
            limit,
            ingest,
        }) => {
            let session = Session::new(limit.unwrap_or(config.query.window)).with_device(device);
            watch_window(&config, store, queries, session, ingest).await
        }
        Some(Command::Ports) => list_ports(),
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };

    if let Some(database) = &args.database {
        config.storage.path = database.clone();
    }
    if let Some(port) = &args.port {
        config.serial.path = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }

    config.validate()?;
    Ok(config)
}

fn start_ingest(
    config: &Config,
    store: SharedStore,
    cancel: CancellationToken,
) -> anyhow::Result<IngestHandle> {
    let connector = SerialConnector::from_config(&config.serial);
    let handle = IngestLoop::new(connector, store)
        .with_reconnect(config.reconnect.to_options())
        .spawn(cancel)
        .context("Failed to start ingestion thread")?;
    Ok(handle)
}

async fn run_ingest(config: &Config, store: SharedStore) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let handle = start_ingest(config, store, cancel.clone())?;
    let stats = handle.stats();
    let mut join = tokio::task::spawn_blocking(move || handle.join());

    let result = tokio::select! {
        joined = &mut join => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping ingestion");
            cancel.cancel();
            join.await?
        }
    };

    let snapshot = stats.snapshot();
    info!(
        "{} line(s) read, {} stored, {} rejected, {} storage failure(s)",
        snapshot.lines_read, snapshot.stored, snapshot.rejected, snapshot.storage_failures
    );

    match result? {
        CloseReason::Cancelled => Ok(()),
        CloseReason::EndOfStream => {
            warn!("Serial device closed the stream");
            Ok(())
        }
    }
}

async fn watch_window(
    config: &Config,
    store: SharedStore,
    queries: QueryService,
    session: Session,
    ingest: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let handle = if ingest {
        Some(start_ingest(config, store, cancel.child_token())?)
    } else {
        None
    };

    let (_session_tx, session_rx) = watch::channel(session);
    let poller = Poller::new(queries, config.query.poll_interval());

    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let mut last_seen = None;
    poller
        .run(session_rx, cancel.clone(), |session, result| match result {
            Ok(records) => {
                let newest = records.last().map(|r| r.id);
                if newest != last_seen {
                    last_seen = newest;
                    if let Some(device) = session.selected_device {
                        println!("--- device {} ---", device);
                    }
                    print_records(&records);
                }
            }
            Err(e) => eprintln!("Query failed: {}", e),
        })
        .await;

    if let Some(handle) = handle {
        handle.cancel();
        tokio::task::spawn_blocking(move || handle.join()).await??;
    }
    Ok(())
}

async fn dump(queries: &QueryService, csv: bool, output: Option<PathBuf>) -> anyhow::Result<()> {
    let writer: Box<dyn Write + Send> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };

    if csv {
        let written = queries.export_csv(writer).await?;
        info!("Exported {} record(s)", written);
    } else {
        let records = queries.all().await?;
        let mut writer = writer;
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writeln!(writer)?;
        writer.flush()?;
    }
    Ok(())
}

fn print_records(records: &[SensorRecord]) {
    if records.is_empty() {
        println!("No records");
        return;
    }
    println!(
        "{:>8}  {:<19}  {:>6}  {:>9}  {:>11}  {:>9}",
        "id", "captured_at", "device", "humidity", "temperature", "ec"
    );
    for r in records {
        println!(
            "{:>8}  {:<19}  {:>6}  {:>9.2}  {:>11.2}  {:>9.2}",
            r.id,
            r.captured_at_text(),
            r.device_id,
            r.humidity,
            r.temperature,
            r.ec
        );
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = dtk_service::source::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}
