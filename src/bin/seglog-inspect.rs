/// seglog-inspect: inspection CLI for segment directories
///
/// Commands:
/// - list <dir>
/// - describe <dir> <base_offset>
/// - dump <dir> <base_offset>   (records in the default `Record` encoding)
///
/// Option (any position): --config <file.json> for the limits `describe`
/// reports against.
///
/// All output is JSON for script-friendly parsing. Logging goes to stderr
/// and is controlled by RUST_LOG.
///
/// Every command is read-only: segments are read through `SegmentView`,
/// which never maps, resizes or repairs a file, so a directory can be
/// inspected while a writer has it open.
use seglog::storage::segment::{STORE_EXTENSION, INDEX_EXTENSION, segment_path};
use seglog::{Config, Record, SegmentView};
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let config = match take_option(&mut args, "--config")? {
        Some(path) => Config::from_json_file(&path)?,
        None => Config::default(),
    };

    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    match args[0].as_str() {
        "list" => {
            if args.len() < 2 {
                eprintln!("Usage: seglog-inspect list <dir>");
                std::process::exit(1);
            }
            list_segments(Path::new(&args[1]))?;
        }
        "describe" => {
            if args.len() < 3 {
                eprintln!("Usage: seglog-inspect describe <dir> <base_offset>");
                std::process::exit(1);
            }
            let base_offset = parse_offset(&args[2])?;
            describe_segment(Path::new(&args[1]), base_offset, &config)?;
        }
        "dump" => {
            if args.len() < 3 {
                eprintln!("Usage: seglog-inspect dump <dir> <base_offset>");
                std::process::exit(1);
            }
            let base_offset = parse_offset(&args[2])?;
            dump_segment(Path::new(&args[1]), base_offset)?;
        }
        _ => {
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("seglog-inspect: inspect segment directories");
    println!();
    println!("Usage:");
    println!("  seglog-inspect list <dir>");
    println!("  seglog-inspect describe <dir> <base_offset> [--config <file.json>]");
    println!("  seglog-inspect dump <dir> <base_offset>");
    println!();
    println!("Examples:");
    println!("  seglog-inspect list ./data");
    println!("  seglog-inspect describe ./data 0");
    println!("  seglog-inspect describe ./data 1024 --config seglog.json");
    println!("  seglog-inspect dump ./data 1024");
}

/// Remove `name <value>` from `args`, returning the value if present.
fn take_option(args: &mut Vec<String>, name: &str) -> anyhow::Result<Option<String>> {
    let Some(at) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if at + 1 >= args.len() {
        anyhow::bail!("{} requires a value", name);
    }
    let value = args.remove(at + 1);
    args.remove(at);
    Ok(Some(value))
}

fn parse_offset(arg: &str) -> anyhow::Result<u64> {
    arg.parse()
        .map_err(|_| anyhow::anyhow!("Invalid base offset: {}", arg))
}

fn list_segments(dir: &Path) -> anyhow::Result<()> {
    let mut base_offsets = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
            continue;
        }
        if let Some(base) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            base_offsets.push(base);
        }
    }
    base_offsets.sort_unstable();

    let segments: Vec<_> = base_offsets
        .iter()
        .map(|base| {
            let store_bytes = file_len(&segment_path(dir, *base, STORE_EXTENSION));
            let index_bytes = file_len(&segment_path(dir, *base, INDEX_EXTENSION));
            json!({
                "base_offset": base,
                "store_bytes": store_bytes,
                "index_bytes": index_bytes,
            })
        })
        .collect();

    let output = json!({
        "dir": dir.display().to_string(),
        "segments": segments,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

fn describe_segment(dir: &Path, base_offset: u64, config: &Config) -> anyhow::Result<()> {
    let view = open_existing(dir, base_offset)?;

    let output = json!({
        "base_offset": view.base_offset(),
        "next_offset": view.next_offset(),
        "record_count": view.record_count(),
        "store_bytes": view.store_size(),
        "index_bytes": view.index_size(),
        "unindexed_bytes": view.unindexed_bytes()?,
        "max_store_bytes": config.segment.max_store_bytes,
        "max_index_bytes": config.segment.max_index_bytes,
        "maxed": view.is_maxed(&config.segment),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn dump_segment(dir: &Path, base_offset: u64) -> anyhow::Result<()> {
    let view = open_existing(dir, base_offset)?;

    let mut records = Vec::new();
    let mut complete = true;
    for offset in view.base_offset()..view.next_offset() {
        let record: Record = match view.read(offset) {
            Ok(record) => record,
            // Indexed, but the writer has not flushed the record yet
            Err(e) if e.is_end_of_data() => {
                complete = false;
                break;
            }
            Err(e) => return Err(e.into()),
        };
        records.push(json!({
            "offset": offset,
            "stored_offset": record.offset,
            "payload_bytes": record.payload.len(),
            "payload": String::from_utf8_lossy(&record.payload),
        }));
    }

    let output = json!({
        "base_offset": view.base_offset(),
        "complete": complete,
        "records": records,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Refuse to inspect a segment that does not exist.
fn open_existing(dir: &Path, base_offset: u64) -> anyhow::Result<SegmentView> {
    let store = segment_path(dir, base_offset, STORE_EXTENSION);
    if !store.exists() {
        anyhow::bail!("no segment with base offset {} in {}", base_offset, dir.display());
    }
    Ok(SegmentView::open(dir, base_offset)?)
}
