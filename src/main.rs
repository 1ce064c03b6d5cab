//! Reverse Map Tool
//!
//! Operator CLI for an array's whole-array reverse map file.
//!
//! ```text
//! revmap --config array.yaml geometry --json
//! revmap --config array.yaml format
//! revmap --config array.yaml export --out revmap.bin
//! revmap --config array.yaml import --from revmap.bin
//! revmap --config array.yaml show --vsid 12
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use revmap::error::{Error, Result, EIO};
use revmap::mapper::{
    InMemoryStripeMap, InMemoryVolumeManager, InMemoryVsaMap, MapperAddressInfo, VolumeManager,
};
use revmap::{ArrayConfig, MetaFsIoOpcode, RevMapGeometry, ReverseMapManager, StoreBackend};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Reverse map tool - inspect and move an array's reverse map
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Array configuration file (YAML)
    #[arg(long, env = "REVMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Array name
    #[arg(long, env = "REVMAP_ARRAY_NAME")]
    array_name: Option<String>,

    /// Root directory for metadata files
    #[arg(long, env = "REVMAP_META_DIR")]
    meta_dir: Option<PathBuf>,

    /// Bytes per metadata page
    #[arg(long)]
    mpage_size: Option<u32>,

    /// Blocks per stripe
    #[arg(long)]
    blks_per_stripe: Option<u32>,

    /// Number of virtual stripes
    #[arg(long)]
    max_vsid: Option<u32>,

    /// Number of write-buffer stripes
    #[arg(long)]
    num_wb_stripes: Option<u32>,

    /// Use the in-memory store
    #[arg(long)]
    mock: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the derived page geometry
    Geometry {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create the whole-array reverse map file if absent
    Format,

    /// Copy the whole-array reverse map into a file
    Export {
        #[arg(long)]
        out: PathBuf,
    },

    /// Overwrite the whole-array reverse map from a file
    Import {
        #[arg(long)]
        from: PathBuf,
    },

    /// Print one stripe's header and mapped entries
    Show {
        #[arg(long)]
        vsid: u32,
    },
}

impl Args {
    fn array_config(&self) -> Result<ArrayConfig> {
        let mut config = match &self.config {
            Some(path) => ArrayConfig::from_yaml_file(path)?,
            None => ArrayConfig::default(),
        };

        if let Some(name) = &self.array_name {
            config.array_name = name.clone();
        }
        if let Some(dir) = &self.meta_dir {
            config.meta_dir = dir.clone();
        }
        if let Some(v) = self.mpage_size {
            config.mpage_size = v;
        }
        if let Some(v) = self.blks_per_stripe {
            config.blks_per_stripe = v;
        }
        if let Some(v) = self.max_vsid {
            config.max_vsid = v;
        }
        if let Some(v) = self.num_wb_stripes {
            config.num_wb_stripes = v;
        }
        if self.mock {
            config.store = StoreBackend::Mock;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.array_config()?;
    info!(
        array = %config.array_name,
        store = %config.store,
        mpage_size = config.mpage_size,
        blks_per_stripe = config.blks_per_stripe,
        max_vsid = config.max_vsid,
        "Loaded array configuration"
    );

    match args.command {
        Command::Geometry { json } => print_geometry(&config, json),
        Command::Format => {
            let mut manager = open_manager(config)?;
            info!(
                size = manager.get_whole_reverse_map_file_size(),
                "Reverse map file ready"
            );
            manager.dispose();
            Ok(())
        }
        Command::Export { out } => {
            let manager = open_manager(config)?;
            let mut buffer = vec![0u8; manager.get_whole_reverse_map_file_size() as usize];
            manager.load_whole_reverse_map(&mut buffer)?;
            std::fs::write(&out, &buffer)?;
            info!(path = %out.display(), bytes = buffer.len(), "Exported reverse map");
            Ok(())
        }
        Command::Import { from } => {
            let manager = open_manager(config)?;
            let buffer = std::fs::read(&from)?;
            let expected = manager.get_whole_reverse_map_file_size();
            if buffer.len() as u64 != expected {
                return Err(Error::Config(format!(
                    "{} holds {} bytes, reverse map file is {} bytes",
                    from.display(),
                    buffer.len(),
                    expected
                )));
            }
            manager.store_whole_reverse_map(&buffer)?;
            info!(path = %from.display(), bytes = buffer.len(), "Imported reverse map");
            Ok(())
        }
        Command::Show { vsid } => {
            let manager = open_manager(config)?;
            show_stripe(&manager, vsid).await
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Commands
// =============================================================================

fn open_manager(config: ArrayConfig) -> Result<ReverseMapManager> {
    let volumes: Arc<dyn VolumeManager> = Arc::new(InMemoryVolumeManager::new());
    let mut manager = ReverseMapManager::new(
        MapperAddressInfo::new(config),
        Arc::new(InMemoryVsaMap::new()),
        Arc::new(InMemoryStripeMap::new()),
        Some(volumes),
    );
    manager.init()?;
    Ok(manager)
}

fn print_geometry(config: &ArrayConfig, json: bool) -> Result<()> {
    let geometry = RevMapGeometry::new(config.mpage_size, config.blks_per_stripe)?;
    let whole = geometry.whole_file_size(config.max_vsid);

    if json {
        let doc = serde_json::json!({
            "geometry": geometry,
            "max_vsid": config.max_vsid,
            "file_size_whole_revmap": whole,
        });
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::Internal(format!("Failed to encode geometry: {}", e)))?;
        println!("{}", text);
    } else {
        println!("mpage_size:              {}", geometry.mpage_size());
        println!("blks_per_stripe:         {}", geometry.blks_per_stripe());
        println!("entries_per_normal_page: {}", geometry.entries_per_normal_page());
        println!("entries_per_first_page:  {}", geometry.entries_per_first_page());
        println!("num_mpages_per_stripe:   {}", geometry.num_mpages_per_stripe());
        println!("file_size_per_stripe:    {}", geometry.file_size_per_stripe());
        println!("file_size_whole_revmap:  {}", whole);
    }
    Ok(())
}

async fn show_stripe(manager: &ReverseMapManager, vsid: u32) -> Result<()> {
    let pack = manager.alloc_reverse_map_pack(false)?;
    let (tx, rx) = oneshot::channel();
    pack.load(vsid, move |ctx| {
        let _ = tx.send(ctx.error().unwrap_or(EIO));
    })?;

    let code = rx
        .await
        .map_err(|_| Error::Internal("load completion dropped".into()))?;
    if code != 0 {
        return Err(Error::MetaFileIo {
            file: revmap::REVMAP_WHOLE_FILE_NAME.to_string(),
            opcode: MetaFsIoOpcode::Read,
            offset: manager.get_reverse_map_per_stripe_file_size() * vsid as u64,
            code,
        });
    }

    match pack.header() {
        Some(header) => println!(
            "vsid {} wb_lsid {} num_blks {}",
            header.vsid, header.wb_lsid, header.num_blks
        ),
        None => println!("vsid {} (no header)", vsid),
    }
    for (offset, entry) in pack.mapped_entries()? {
        println!("{:>6}  volume {:>4}  rba {}", offset, entry.volume_id, entry.rba);
    }
    Ok(())
}
