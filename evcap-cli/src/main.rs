//! Event camera acquisition CLI.
//!
//! With no argument, streams events from the first available camera. With a
//! recording path, replays the file. Events can be exported to CSV or binary
//! while they are acquired.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use evcap_core::output::{BinaryWriter, CsvWriter, TriggerCsvWriter};
use evcap_core::{
    DeviceSelector, Event, EventFilter, FieldOrder, OverflowPolicy, Polarity, SensorMetadata,
    Session, SessionConfig, SourceTarget,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Event camera acquisition for EVT 3.0 devices and recordings.
///
/// Opens the first available camera, or replays a .raw recording when a
/// path is given, and streams the decoded events until the source ends or
/// acquisition is stopped.
#[derive(Parser, Debug)]
#[command(name = "evcap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// EVT 3.0 .raw recording to replay (default: first available camera)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Open the camera with this identifier instead of the first one
    #[arg(long, value_name = "ID", conflicts_with = "input")]
    device: Option<String>,

    /// Session configuration file (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Event queue capacity
    #[arg(long, value_name = "N")]
    queue_capacity: Option<usize>,

    /// Queue overflow policy: block or drop-oldest
    #[arg(long, value_name = "POLICY")]
    overflow: Option<OverflowPolicy>,

    /// Bytes read from the source per chunk
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Stop acquisition after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<f64>,

    /// Stop acquisition after this many exported events
    #[arg(long, value_name = "N")]
    max_events: Option<u64>,

    /// Export only CD events with x >= XMIN
    #[arg(long, value_name = "XMIN", help_heading = "Filtering")]
    xmin: Option<u16>,

    /// Export only CD events with x <= XMAX
    #[arg(long, value_name = "XMAX", help_heading = "Filtering")]
    xmax: Option<u16>,

    /// Export only CD events with y >= YMIN
    #[arg(long, value_name = "YMIN", help_heading = "Filtering")]
    ymin: Option<u16>,

    /// Export only CD events with y <= YMAX
    #[arg(long, value_name = "YMAX", help_heading = "Filtering")]
    ymax: Option<u16>,

    /// Export only events at or after this timestamp (us)
    #[arg(long, value_name = "US", help_heading = "Filtering")]
    tmin: Option<u64>,

    /// Export only events up to this timestamp (us); acquisition stops past it
    #[arg(long, value_name = "US", help_heading = "Filtering")]
    tmax: Option<u64>,

    /// Export only CD events of this polarity: 0 (off) or 1 (on)
    #[arg(
        long,
        value_name = "P",
        value_parser = clap::value_parser!(u8).range(0..=1),
        help_heading = "Filtering"
    )]
    polarity: Option<u8>,

    /// Output file path (.csv, .bin)
    ///
    /// The output format is determined by the file extension:
    /// - .csv: Comma-separated values (human-readable)
    /// - .bin: Binary format (efficient, for programmatic access)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Field order for CSV output.
    ///
    /// Format: comma-separated field names (x, y, p, t)
    ///
    /// Examples:
    /// - "x,y,p,t" (default)
    /// - "t,x,y,p" (timestamp first)
    #[arg(short, long, default_value = "x,y,p,t")]
    format: String,

    /// Output file for trigger events (optional)
    #[arg(short, long, value_name = "PATH")]
    triggers: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Destination for CD events.
enum CdSink {
    Csv {
        writer: CsvWriter<File>,
        header_written: bool,
    },
    Binary(BinaryWriter<File>),
}

impl CdSink {
    fn create(path: &Path, field_order: FieldOrder) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("csv")
            .to_lowercase();
        let file = || {
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))
        };

        match ext.as_str() {
            "csv" => Ok(Self::Csv {
                writer: CsvWriter::new(file()?, field_order),
                header_written: false,
            }),
            "bin" => Ok(Self::Binary(
                BinaryWriter::new(file()?).context("Failed to write binary header")?,
            )),
            _ => anyhow::bail!("Unsupported output format: .{}. Use .csv or .bin", ext),
        }
    }

    fn write(&mut self, event: &Event, metadata: Option<SensorMetadata>) -> Result<()> {
        match self {
            Self::Csv {
                writer,
                header_written,
            } => {
                if !*header_written {
                    writer.write_header(metadata.as_ref())?;
                    *header_written = true;
                }
                writer.write_event(event)?;
            }
            Self::Binary(writer) => writer.write_event(event)?,
        }
        Ok(())
    }

    fn finish(self, metadata: Option<SensorMetadata>) -> Result<u64> {
        match self {
            Self::Csv {
                mut writer,
                header_written,
            } => {
                if !header_written {
                    writer.write_header(metadata.as_ref())?;
                }
                writer.flush()?;
                Ok(writer.written())
            }
            Self::Binary(writer) => {
                let written = writer.written();
                writer.finish(&metadata.unwrap_or_default())?;
                Ok(written)
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(capacity) = args.queue_capacity {
        config.queue.capacity = capacity;
    }
    if let Some(policy) = args.overflow {
        config.queue.overflow = policy;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.acquisition.chunk_size = chunk_size;
    }
    config.validate().context("Invalid command line options")?;

    debug!("Session config: {:?}", config);
    Ok(config)
}

fn target(args: &Args) -> SourceTarget {
    match (&args.input, &args.device) {
        (Some(path), _) => SourceTarget::File(path.clone()),
        (None, Some(id)) => SourceTarget::Device(DeviceSelector::Id(id.clone())),
        (None, None) => SourceTarget::Device(DeviceSelector::FirstAvailable),
    }
}

fn event_filter(args: &Args) -> Result<EventFilter> {
    let filter = EventFilter::new()
        .with_region((args.xmin, args.xmax), (args.ymin, args.ymax))
        .with_time_window(args.tmin, args.tmax)
        .with_polarity(args.polarity.map(Polarity::from_bit));
    filter.validate().context("Invalid filter options")?;
    Ok(filter)
}

/// Where accepted events go and when to stop taking them.
struct Export {
    cd_sink: Option<CdSink>,
    trigger_sink: Option<TriggerCsvWriter<File>>,
    filter: EventFilter,
    max_events: Option<u64>,
}

/// Event counts of one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    cd: u64,
    triggers: u64,
    filtered_out: u64,
    /// CD events written to the output file, if any
    written: Option<u64>,
}

impl Tally {
    fn exported(&self) -> u64 {
        self.cd + self.triggers
    }
}

/// Returns the handler installed for Ctrl-C and SIGTERM. Stopping the
/// session ends the consumer loop in [`run`], which then finalizes the
/// output like any other stop.
fn stop_on_signal(session: &Arc<Session>) -> impl FnMut() + Send + 'static {
    let session = Arc::clone(session);
    move || {
        info!("Interrupted, stopping acquisition");
        if let Err(e) = session.stop() {
            debug!("Signal stop: {}", e);
        }
    }
}

/// Consumes the session's events into `export` until the stream ends, the
/// session is stopped, or a limit is reached. Then stops the session and
/// finalizes the output files, whatever ended the run.
fn run(session: &Session, mut export: Export, progress: &ProgressBar) -> Result<Tally> {
    let mut tally = Tally::default();

    for event in session.events() {
        if export.filter.is_past_window(&event) {
            info!("Past --tmax, stopping");
            break;
        }
        if !export.filter.matches(&event) {
            tally.filtered_out += 1;
            continue;
        }

        if event.is_cd() {
            tally.cd += 1;
        } else {
            tally.triggers += 1;
        }

        if let Some(sink) = export.cd_sink.as_mut() {
            sink.write(&event, session.metadata())
                .context("Failed to write event output")?;
        }
        if let Some(sink) = export.trigger_sink.as_mut() {
            sink.write_event(&event)
                .context("Failed to write trigger output")?;
        }

        let total = tally.exported();
        if total % 65_536 == 0 {
            progress.set_message(format!("{} events, t={}us", total, event.timestamp));
        }
        if export.max_events.is_some_and(|max| total >= max) {
            info!("Event limit reached, stopping");
            break;
        }
    }

    session.stop().context("Failed to stop acquisition")?;

    tally.written = export
        .cd_sink
        .map(|sink| sink.finish(session.metadata()))
        .transpose()
        .context("Failed to finish event output")?;
    if let Some(sink) = export.trigger_sink.as_mut() {
        sink.flush().context("Failed to flush trigger output")?;
    }

    Ok(tally)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Parse field order
    let field_order = FieldOrder::from_str(&args.format)
        .context("Invalid field format. Use comma-separated: x,y,p,t")?;

    let config = load_config(&args)?;
    let filter = event_filter(&args)?;
    let target = target(&args);

    let cd_sink = args
        .output
        .as_deref()
        .map(|path| CdSink::create(path, field_order))
        .transpose()?;
    let trigger_sink = args
        .triggers
        .as_deref()
        .map(|path| {
            File::create(path)
                .map(TriggerCsvWriter::new)
                .with_context(|| format!("Failed to create {}", path.display()))
        })
        .transpose()?;

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let session = Arc::new(Session::new(target.clone(), config));
    ctrlc::set_handler(stop_on_signal(&session)).context("Failed to install signal handler")?;

    progress.set_message(format!("Opening {}...", target));
    session
        .start()
        .with_context(|| format!("Failed to start acquisition from {}", target))?;
    let start_time = Instant::now();

    if let Some(secs) = args.duration {
        let session = Arc::clone(&session);
        let limit = Duration::try_from_secs_f64(secs).context("Invalid --duration")?;
        thread::Builder::new()
            .name("evcap-timer".to_string())
            .spawn(move || {
                thread::sleep(limit);
                info!("Duration limit reached, stopping");
                if let Err(e) = session.stop() {
                    debug!("Timer stop: {}", e);
                }
            })
            .context("Failed to spawn timer thread")?;
    }

    let export = Export {
        cd_sink,
        trigger_sink,
        filter,
        max_events: args.max_events,
    };
    let tally = run(&session, export, &progress)?;
    let total_duration = start_time.elapsed();

    if let Some(failure) = session.failure() {
        progress.abandon_with_message(format!("Failed after {} events", tally.exported()));
        anyhow::bail!("Acquisition from {} failed: {}", target, failure);
    }

    let stats = session.stats();
    progress.finish_with_message(format!(
        "Done! {} events in {:.2}s",
        tally.exported(),
        total_duration.as_secs_f64()
    ));

    if !args.quiet {
        // Print summary
        let events_per_sec = tally.exported() as f64 / total_duration.as_secs_f64();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Source:       {}", target);
        if let Some(path) = &args.output {
            eprintln!(
                "  Output:       {:?} ({} events)",
                path,
                tally.written.unwrap_or(0)
            );
        }
        eprintln!("  CD Events:    {}", tally.cd);
        eprintln!("  Triggers:     {}", tally.triggers);
        if !filter.is_pass_all() {
            eprintln!("  Filtered out: {}", tally.filtered_out);
        }
        eprintln!("  Dropped:      {}", stats.events_dropped);
        if let Some(meta) = session.metadata() {
            eprintln!("  Sensor:       {}x{}", meta.width, meta.height);
        }
        eprintln!(
            "  End:          {}",
            if session.reached_end_of_stream() {
                "end of stream"
            } else {
                "stopped"
            }
        );
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:   {:.0} events/s", events_per_sec);
    }

    Ok(())
}
