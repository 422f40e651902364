use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use cairn_db::{
    CairnDb, CountView, DbConfig, FileLog, FileLogConfig, LatestView, StreamItem, StreamOptions,
    SyncMode,
};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let upper = match &cli.command {
        Command::Get(args) => args.upper,
        Command::Dump(args) => args.upper,
        _ => false,
    };
    let db = open(&cli, upper)?;
    let format = cli.format;
    info!(command = cli.command.name(), "running command");

    let result = match cli.command {
        Command::Append(args) => cmd_append(&db, args, format).await,
        Command::Get(args) => cmd_get(&db, args, format).await,
        Command::Dump(args) => cmd_dump(&db, args, format).await,
        Command::Count => cmd_count(&db, format).await,
        Command::Latest(args) => cmd_latest(&db, args, format).await,
        Command::Rebuild => cmd_rebuild(&db).await,
        Command::Meta => cmd_meta(&db, format),
    };
    db.close().await?;
    debug!(ok = result.is_ok(), "instance closed");
    result
}

fn open(cli: &Cli, upper: bool) -> anyhow::Result<CairnDb> {
    let config = match &cli.config {
        Some(path) => DbConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DbConfig::default(),
    };
    let log_config = FileLogConfig {
        sync_mode: if cli.sync {
            SyncMode::EveryWrite
        } else {
            SyncMode::OsDefault
        },
        ..FileLogConfig::default()
    };
    let log = FileLog::open(&cli.log, log_config)
        .with_context(|| format!("failed to open log {}", cli.log.display()))?;

    info!(log = %cli.log.display(), sync = cli.sync, upper, "opening log");
    let db = CairnDb::open(Arc::new(log), config)?;
    Ok(if upper { db.with_mapper(uppercase) } else { db })
}

fn uppercase(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_uppercase()),
        other => other,
    }
}

/// Parse a command-line argument as JSON, falling back to a plain string.
pub(crate) fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_value(value: &Value, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

async fn cmd_append(db: &CairnDb, args: AppendArgs, format: OutputFormat) -> anyhow::Result<()> {
    for raw in &args.values {
        let seq = db.append(parse_value(raw)).await?;
        debug!(seq, "appended");
        match format {
            OutputFormat::Json => println!("{}", serde_json::json!({ "seq": seq })),
            OutputFormat::Text => println!("{} appended at {}", "✓".green(), seq.to_string().yellow()),
        }
    }
    Ok(())
}

async fn cmd_get(db: &CairnDb, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let value = db
        .get(args.seq)
        .await
        .with_context(|| format!("no entry at seq {}", args.seq))?;
    print_value(&value, format)
}

async fn cmd_dump(db: &CairnDb, args: DumpArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut opts = StreamOptions::default()
        .live(args.live)
        .seqs(!args.values_only);
    if let Some(gt) = args.gt {
        opts = opts.with_gt(gt);
    }

    let mut items = db.stream(opts);
    let mut printed = 0usize;
    while let Some(item) = items.next().await {
        match (item?, format) {
            (item, OutputFormat::Json) => println!("{}", serde_json::to_string(&item)?),
            (StreamItem::Entry(entry), OutputFormat::Text) => {
                println!("{} {}", format!("#{}", entry.seq).yellow(), entry.value)
            }
            (StreamItem::Value(value), OutputFormat::Text) => println!("{value}"),
            (StreamItem::Seq(seq), OutputFormat::Text) => println!("{}", seq.to_string().yellow()),
        }
        printed += 1;
    }
    if format == OutputFormat::Text {
        println!("{}", format!("{printed} entries").dimmed());
    }
    Ok(())
}

async fn cmd_count(db: &CairnDb, format: OutputFormat) -> anyhow::Result<()> {
    db.use_view("count", |_, _| Arc::new(CountView::new()))?;
    let view = db.view("count").context("count view missing")?;
    let count = view.call_async("count", Value::Null).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "count": count })),
        OutputFormat::Text => println!("{} entries", count.to_string().bold()),
    }
    Ok(())
}

async fn cmd_latest(db: &CairnDb, args: LatestArgs, format: OutputFormat) -> anyhow::Result<()> {
    let field = args.field.clone();
    db.use_view("latest", move |_, _| Arc::new(LatestView::new(field)))?;
    let view = db.view("latest").context("latest view missing")?;
    view.ready().await?;

    match args.key {
        Some(key) => {
            let value = view
                .call_async("get", Value::String(key.clone()))
                .await
                .with_context(|| format!("no entry with {} = {}", args.field, key))?;
            print_value(&value, format)
        }
        None => {
            let keys = view.call_sync("keys", Value::Null)?;
            match format {
                OutputFormat::Json => println!("{keys}"),
                OutputFormat::Text => {
                    for key in keys.as_array().into_iter().flatten() {
                        println!("  {}", key.as_str().unwrap_or_default().cyan());
                    }
                }
            }
            Ok(())
        }
    }
}

async fn cmd_rebuild(db: &CairnDb) -> anyhow::Result<()> {
    db.use_view("count", |_, _| Arc::new(CountView::new()))?;
    db.rebuild().await?;
    let since = db.since().value().unwrap_or(cairn_db::NO_SEQ);
    info!(views = db.view_names().len(), since, "rebuild finished");
    println!("{} Rebuilt {} views up to {}", "✓".green().bold(), db.view_names().len(), since.to_string().yellow());
    Ok(())
}

fn cmd_meta(db: &CairnDb, format: OutputFormat) -> anyhow::Result<()> {
    let meta = db.meta();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&meta)?),
        OutputFormat::Text => {
            let since = meta
                .since
                .map(|s| s.to_string())
                .unwrap_or_else(|| "loading".into());
            println!("Log: {}", db.dir().map(|d| d.display().to_string()).unwrap_or_default().bold());
            println!("Since: {}", since.yellow());
            for (name, calls) in &meta.log {
                println!("  log.{name}: {calls}");
            }
            for (name, view) in &meta.views {
                println!("View {} at {}", name.cyan(), view.since);
            }
        }
    }
    Ok(())
}
