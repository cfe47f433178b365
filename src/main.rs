//! # Filament Monitor Application Entry Point
//!
//! Command-line front end for the filament monitor. Without reader hardware the
//! tag lives in a 540-byte image file, so the same commands can program a spool,
//! inspect it, and drive the polling loop against a simulated spinning spool.
//!
//! Logs go to stderr through `tracing`; set `RUST_LOG` to change the level.


use anyhow::Context;
use clap::{Parser, Subcommand};
use filament_monitor_lib::config::{Config, CONFIG_FILE};
use filament_monitor_lib::display::ConsoleDisplay;
use filament_monitor_lib::monitor::Monitor;
use filament_monitor_lib::spool::{self, DEFAULT_FILAMENT_DIAMETER_MM, DOCUMENT_VERSION};
use filament_monitor_lib::tag_image::TagImage;
use filament_monitor_lib::tag_store::{PageIo, PageIoError, TagReader};
use filament_monitor_lib::{read_document, write_document, TagPayload, TrackerEvent, Uid};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// UID given to image files created by `program`.
const NEW_TAG_UID: [u8; 7] = [0x04, 0xA2, 0x3B, 0x11, 0x5C, 0x6D, 0x80];

#[derive(Parser)]
#[command(name = "filament-monitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Track filament left on a spool using an NTAG215 tag")]
struct Cli {
    /// Configuration file
    #[arg(long, value_name = "PATH", default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a spool document to a tag image, creating the image if needed
    Program {
        /// Tag image file
        image: PathBuf,
        #[arg(long, default_value = "Sunlu")]
        brand: String,
        #[arg(long, default_value = "PLA")]
        material: String,
        /// Hub diameter in mm
        #[arg(long, default_value_t = 52.0)]
        min_d: f64,
        /// Flange diameter in mm
        #[arg(long, default_value_t = 200.0)]
        max_d: f64,
        /// Inner spool width in mm
        #[arg(long, default_value_t = 67.0)]
        width: f64,
        /// Net filament weight of a full spool
        #[arg(long, default_value_t = 950.0)]
        grams_full: f64,
    },

    /// Print the spool document stored in a tag image
    Read {
        /// Tag image file
        image: PathBuf,
    },

    /// Hex dump of every page in a tag image
    Dump {
        /// Tag image file
        image: PathBuf,
    },

    /// Run the polling loop against a tag image on a spinning spool
    Simulate {
        /// Tag image file, updated in place
        image: PathBuf,
        /// Revolutions to charge before stopping
        #[arg(long, default_value_t = 3)]
        rotations: u32,
        /// Time for one revolution of the spool
        #[arg(long, default_value_t = 8000)]
        period_ms: u64,
        /// How long the tag stays in the reader field per revolution
        #[arg(long, default_value_t = 400)]
        visible_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filament_monitor=info,filament_monitor_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config);

    match cli.command {
        Commands::Program {
            image,
            brand,
            material,
            min_d,
            max_d,
            width,
            grams_full,
        } => {
            let payload = spool_document(brand, material, min_d, max_d, width, grams_full);
            program(&image, &payload, &config)
        }
        Commands::Read { image } => {
            let mut tag = load_image(&image)?;
            let payload = read_document(&mut tag, config.tag.start_page, config.tag.max_read_pages)
                .with_context(|| format!("reading {}", image.display()))?;
            match payload {
                Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
                None => println!("Tag {} holds no filament data", tag.uid()),
            }
            Ok(())
        }
        Commands::Dump { image } => {
            let tag = load_image(&image)?;
            print!("{}", tag.dump());
            Ok(())
        }
        Commands::Simulate {
            image,
            rotations,
            period_ms,
            visible_ms,
        } => simulate(&image, &config, rotations, period_ms, visible_ms),
    }
}

fn load_image(path: &Path) -> anyhow::Result<TagImage> {
    TagImage::load(path).with_context(|| format!("loading tag image {}", path.display()))
}

/// A fresh document for a full spool, with the length worked out from its geometry.
fn spool_document(
    brand: String,
    material: String,
    min_d: f64,
    max_d: f64,
    width: f64,
    grams_full: f64,
) -> TagPayload {
    let meters_full = spool::round3(spool::length_from_radius(
        max_d / 2.0,
        min_d / 2.0,
        width,
        spool::filament_area(DEFAULT_FILAMENT_DIAMETER_MM),
    ));
    TagPayload {
        version: Some(DOCUMENT_VERSION),
        brand: Some(brand),
        material_type: Some(material),
        filament_diameter: Some(DEFAULT_FILAMENT_DIAMETER_MM),
        min_diameter: Some(min_d),
        max_diameter: Some(max_d),
        width: Some(width),
        grams_full: Some(grams_full),
        grams_remaining: Some(grams_full),
        meters_full: Some(meters_full),
        meters_remaining: Some(meters_full),
        ..TagPayload::default()
    }
}

fn program(image: &Path, payload: &TagPayload, config: &Config) -> anyhow::Result<()> {
    spool::normalise(payload).context("refusing to write an unusable spool document")?;

    let mut tag = if image.exists() {
        load_image(image)?
    } else {
        info!(path = %image.display(), "creating blank tag image");
        TagImage::blank(NEW_TAG_UID)
    };

    let pages = write_document(&mut tag, payload, config.tag.start_page)
        .with_context(|| format!("programming tag {}", tag.uid()))?;
    tag.save(image)
        .with_context(|| format!("saving tag image {}", image.display()))?;

    info!(uid = %tag.uid(), pages, "tag programmed");
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

/// A tag on a spool turning at a constant rate: it is in the reader field for
/// the first `visible_ms` of every revolution.
struct SpinningTag {
    tag: TagImage,
    period_ms: u64,
    visible_ms: u64,
    now_ms: u64,
}

impl SpinningTag {
    fn in_field(&self) -> bool {
        self.now_ms % self.period_ms < self.visible_ms
    }
}

impl PageIo for SpinningTag {
    fn read_page(&mut self, page: u16) -> Result<[u8; 4], PageIoError> {
        self.tag.read_page(page)
    }

    fn write_page(&mut self, page: u16, data: &[u8; 4]) -> Result<(), PageIoError> {
        self.tag.write_page(page, data)
    }
}

impl TagReader for SpinningTag {
    fn scan_for_tag(&mut self, timeout: Duration) -> Option<Uid> {
        let present = self.in_field();
        self.tag.set_present(present);
        self.tag.scan_for_tag(timeout)
    }
}

fn simulate(
    image: &Path,
    config: &Config,
    rotations: u32,
    period_ms: u64,
    visible_ms: u64,
) -> anyhow::Result<()> {
    anyhow::ensure!(period_ms > 0, "--period-ms must be positive");
    if period_ms.saturating_sub(visible_ms) < config.tracker.absence_threshold_ms {
        warn!(
            period_ms,
            visible_ms,
            threshold_ms = config.tracker.absence_threshold_ms,
            "tag is never absent long enough to count a revolution"
        );
    }

    let mut reader = SpinningTag {
        tag: load_image(image)?,
        period_ms,
        visible_ms,
        now_ms: 0,
    };
    let mut display = ConsoleDisplay::new();
    let mut monitor = Monitor::new(config, 0);
    monitor.init_display(&mut display);

    // One iteration costs the scan timeout plus the loop delay
    let tick_ms = (config.tracker.scan_timeout_ms + config.tracker.loop_delay_ms).max(1);
    let deadline_ms = period_ms.saturating_mul(rotations as u64 + 2);
    let mut charged = 0;

    while charged < rotations && reader.now_ms <= deadline_ms {
        let now_ms = reader.now_ms;
        match monitor.poll(&mut reader, &mut display, now_ms) {
            TrackerEvent::Consumed { .. } => charged += 1,
            TrackerEvent::Rejected { reason, .. } => {
                anyhow::bail!("tag cannot be tracked: {}", reason)
            }
            _ => {}
        }
        reader.now_ms += tick_ms;
    }

    if charged < rotations {
        warn!(charged, rotations, "simulation ended early");
    }
    if let Some(active) = monitor.tracker().active() {
        let doc = &active.spool.document;
        info!(
            charged,
            grams_remaining = doc.grams_remaining,
            meters_remaining = doc.meters_remaining,
            "simulation finished"
        );
    }

    reader
        .tag
        .save(image)
        .with_context(|| format!("saving tag image {}", image.display()))?;
    Ok(())
}
