use clap::{Parser, Subcommand};
use imgplug::{FormatId, LoadFlags, PluginRegistry, SaveFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "imgplug", about = "Image format registry, detection and conversion")]
struct Cli {
    /// Also load `.fip` plugins from the executable's directory
    #[arg(long, global = true)]
    external: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered formats and their capabilities
    Formats {
        #[arg(long)]
        json: bool,
        /// List in detection (MRU) order with weights
        #[arg(long)]
        mru: bool,
    },
    /// Detect the format of one or more files from their content
    Detect {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Load an image and save it in another format
    Convert {
        input:  PathBuf,
        output: PathBuf,
        /// Output format name (default: from the output file name)
        #[arg(short, long)]
        format: Option<String>,
    },
}

#[derive(Serialize)]
struct FormatInfo {
    id:          FormatId,
    format:      String,
    description: Option<String>,
    extensions:  Option<String>,
    mime:        Option<String>,
    enabled:     bool,
    external:    bool,
    validate:    bool,
    read:        bool,
    write:       bool,
    weight:      Option<u32>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let registry = imgplug::initialise(cli.external);
    let result = run(&registry, cli.command);
    imgplug::deinitialise();
    result
}

fn run(registry: &PluginRegistry, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats { json, mru } => {
            let infos = format_infos(registry, mru);
            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
                return Ok(());
            }
            println!("{:>3}  {:<8} {:<4} {:<8} {:<26} Extensions",
                     "Id", "Format", "Caps", "Weight", "MIME");
            for info in &infos {
                let caps = format!(
                    "{}{}{}",
                    if info.validate { 'V' } else { '-' },
                    if info.read     { 'R' } else { '-' },
                    if info.write    { 'W' } else { '-' },
                );
                let weight = info.weight.map(|w| w.to_string()).unwrap_or_default();
                let name = if info.enabled { info.format.clone() } else { format!("{}*", info.format) };
                println!("{:>3}  {:<8} {:<4} {:<8} {:<26} {}",
                    info.id, name, caps, weight,
                    info.mime.as_deref().unwrap_or("—"),
                    info.extensions.as_deref().unwrap_or(""));
            }
        }

        // ── Detect ───────────────────────────────────────────────────────────
        Commands::Detect { files } => {
            for (path, id) in detect_all(registry, &files) {
                let name = id
                    .and_then(|id| registry.format_name(id))
                    .unwrap_or_else(|| "unknown".into());
                println!("{:<10} {}", name, path.display());
            }
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, format } => {
            let src = registry
                .detect_from_path(&input)
                .ok_or_else(|| format!("{}: unrecognised format", input.display()))?;
            let dst = match &format {
                Some(name) => registry.find_by_format(name).map(|e| e.id()),
                None       => registry.format_from_filename(&output.to_string_lossy()),
            }
            .ok_or_else(|| format!("{}: no output format", output.display()))?;

            let bitmap = registry.load_from_path(src, &input, LoadFlags::DEFAULT)?;
            registry.save_to_path(dst, &bitmap, &output, SaveFlags::DEFAULT)?;
            println!("Converted {} ({}) → {} ({})",
                input.display(), registry.format_name(src).unwrap_or_default(),
                output.display(), registry.format_name(dst).unwrap_or_default());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn format_infos(registry: &PluginRegistry, mru: bool) -> Vec<FormatInfo> {
    let entries = registry.entries();
    let info = |id: FormatId, weight: Option<u32>| {
        let (entry, enabled) = entries.iter().find(|(e, _)| e.id() == id)?;
        let caps = entry.capabilities();
        Some(FormatInfo {
            id,
            format:      entry.format().to_owned(),
            description: entry.description().map(str::to_owned),
            extensions:  entry.extension_list().map(str::to_owned),
            mime:        entry.mime_type().map(str::to_owned),
            enabled:     *enabled,
            external:    entry.is_external(),
            validate:    caps.contains(imgplug::Capabilities::VALIDATE),
            read:        entry.supports_reading(),
            write:       entry.supports_writing(),
            weight,
        })
    };

    if mru {
        registry
            .mru_order()
            .into_iter()
            .filter_map(|item| info(item.format, Some(item.weight)))
            .collect()
    } else {
        entries.iter().filter_map(|(e, _)| info(e.id(), None)).collect()
    }
}

#[cfg(feature = "parallel")]
fn detect_all<'a>(registry: &PluginRegistry, files: &'a [PathBuf]) -> Vec<(&'a Path, Option<FormatId>)> {
    use rayon::prelude::*;
    files
        .par_iter()
        .map(|p| (p.as_path(), registry.detect_from_path(p)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn detect_all<'a>(registry: &PluginRegistry, files: &'a [PathBuf]) -> Vec<(&'a Path, Option<FormatId>)> {
    files
        .iter()
        .map(|p| (p.as_path(), registry.detect_from_path(p)))
        .collect()
}
