use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, SecondsFormat};
use colored::Colorize;
use knot_pack::{Container, ContainerConfig, Flags, Pack, RootPack};
use knot_registry::{Native, Registry};
use knot_store::{ContentStore, FileBackend, KvBackend};
use knot_types::{Hash, Timestamp};
use serde::Serialize;

use crate::cli::*;
use crate::note::Note;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let container = open(&cli)?;
    let format = cli.format;
    let result = match cli.command {
        Command::Init(args) => cmd_init(&container, args, format),
        Command::Append(args) => cmd_append(&container, args, format),
        Command::Pop(args) => cmd_pop(&container, args, format),
        Command::Refs(args) => cmd_refs(&container, args, format),
        Command::Roots(args) => cmd_roots(&container, args, format),
        Command::Schemas => cmd_schemas(&container, format),
    };
    container.close();
    result
}

/// Open the database, loading its schema catalogue and registering
/// [`Note`] on first use.
fn open(cli: &Cli) -> anyhow::Result<Container> {
    let config = match &cli.config {
        Some(path) => ContainerConfig::load(path)?,
        None => ContainerConfig::default(),
    };
    let backend: Arc<dyn KvBackend> = Arc::new(
        FileBackend::open(&cli.db)
            .with_context(|| format!("opening database {}", cli.db.display()))?,
    );
    open_with(backend, config)
}

fn open_with(backend: Arc<dyn KvBackend>, config: ContainerConfig) -> anyhow::Result<Container> {
    let store = ContentStore::new(backend.clone());
    let registry = Registry::load(&store)?;
    if registry.schema(Note::NAME).is_none() {
        registry.register_native::<Note>()?;
        registry.save(&store)?;
        tracing::info!(name = Note::NAME, "registered note type");
    }
    Ok(Container::new(backend, Arc::new(registry), config))
}

/// Feed ids are derived from their human-readable names.
fn feed_id(name: &str) -> Hash {
    Hash::from_bytes(name.as_bytes())
}

fn flags(container: &Container) -> Flags {
    container.default_flags() | Flags::NATIVE
}

fn open_feed(container: &Container, name: &str, extra: Flags) -> anyhow::Result<Pack> {
    match container.open_last(&feed_id(name), flags(container) | extra)? {
        Some(pack) => Ok(pack),
        None => bail!("feed '{name}' has no roots; run `knot init {name}` first"),
    }
}

fn format_time(t: Timestamp) -> String {
    DateTime::from_timestamp_nanos(t.as_nanos()).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RootRow {
    seq: u64,
    hash: String,
    prev: Option<String>,
    time: String,
    entries: usize,
}

impl RootRow {
    fn from_pack(rp: &RootPack) -> anyhow::Result<Self> {
        Ok(Self {
            seq: rp.seq,
            hash: rp.hash.to_hex(),
            prev: (!rp.prev.is_null()).then(|| rp.prev.to_hex()),
            time: format_time(rp.time),
            entries: rp.refs()?.len(),
        })
    }
}

#[derive(Debug, Serialize)]
struct EntryRow {
    index: usize,
    hash: String,
    schema: String,
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct SchemaRow {
    id: String,
    name: String,
    layout: String,
}

fn print_saved(rp: &RootPack, format: OutputFormat) -> anyhow::Result<()> {
    let row = RootRow::from_pack(rp)?;
    match format {
        OutputFormat::Json => print_json(&row),
        OutputFormat::Text => {
            println!(
                "{} Saved root {} (seq {}, {} entries)",
                "✓".green().bold(),
                rp.hash.short_hex().yellow(),
                row.seq,
                row.entries
            );
            Ok(())
        }
    }
}

// ---- Operations ----

fn init_feed(container: &Container, name: &str) -> anyhow::Result<RootPack> {
    let feed = feed_id(name);
    if container.last_root(&feed)?.is_some() {
        bail!("feed '{name}' already exists");
    }
    let mut pack = container.new_root(feed, flags(container))?;
    Ok(pack.save()?)
}

fn append_notes(container: &Container, name: &str, texts: &[String]) -> anyhow::Result<RootPack> {
    let mut pack = open_feed(container, name, Flags::empty())?;
    pack.append(texts.iter().map(|text| Note { text: text.clone() }.to_record()))?;
    Ok(pack.save()?)
}

fn pop_note(container: &Container, name: &str) -> anyhow::Result<(Option<Note>, RootPack)> {
    let mut pack = open_feed(container, name, Flags::empty())?;
    let popped = match pack.pop()? {
        Some(d) => match d.cached() {
            Some(record) => Some(Note::from_record(record)?),
            None => None,
        },
        None => bail!("feed '{name}' is empty"),
    };
    Ok((popped, pack.save()?))
}

fn list_entries(container: &Container, name: &str, eager: bool) -> anyhow::Result<Vec<EntryRow>> {
    let extra = if eager { Flags::ENTIRE_TREE } else { Flags::empty() };
    let mut pack = open_feed(container, name, extra | Flags::VIEW_ONLY)?;
    let refs = pack.refs()?;
    Ok(refs
        .iter()
        .enumerate()
        .map(|(index, d)| EntryRow {
            index,
            hash: d.hash().to_hex(),
            schema: d.schema().to_hex(),
            text: d
                .cached()
                .and_then(|r| Note::from_record(r).ok())
                .map(|n| n.text),
        })
        .collect())
}

fn list_roots(container: &Container, name: &str) -> anyhow::Result<Vec<RootRow>> {
    container
        .roots(&feed_id(name))?
        .iter()
        .map(|entry| RootRow::from_pack(&container.root_pack(&entry.hash)?))
        .collect()
}

fn list_schemas(container: &Container) -> anyhow::Result<Vec<SchemaRow>> {
    let registry = Registry::load(container.store())?;
    Ok(registry
        .schemas()
        .into_iter()
        .map(|(id, schema)| SchemaRow {
            id: id.to_hex(),
            name: schema.name.clone(),
            layout: schema.to_string(),
        })
        .collect())
}

// ---- Commands ----

fn cmd_init(container: &Container, args: FeedArgs, format: OutputFormat) -> anyhow::Result<()> {
    let rp = init_feed(container, &args.feed)?;
    if format == OutputFormat::Text {
        println!("{} Initialized feed {}", "✓".green().bold(), args.feed.bold());
    }
    print_saved(&rp, format)
}

fn cmd_append(container: &Container, args: AppendArgs, format: OutputFormat) -> anyhow::Result<()> {
    let rp = append_notes(container, &args.feed, &args.texts)?;
    print_saved(&rp, format)
}

fn cmd_pop(container: &Container, args: FeedArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (note, rp) = pop_note(container, &args.feed)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "popped": note.map(|n| n.text),
            "root": RootRow::from_pack(&rp)?,
        })),
        OutputFormat::Text => {
            if let Some(note) = note {
                println!("  {} {}", "popped:".red(), note.text);
            }
            print_saved(&rp, format)
        }
    }
}

fn cmd_refs(container: &Container, args: RefsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let rows = list_entries(container, &args.feed, args.eager)?;
    if format == OutputFormat::Json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("Feed {} is empty.", args.feed.bold());
    }
    for row in rows {
        let text = match row.text {
            Some(text) => text.normal(),
            None => "(unresolved)".dimmed(),
        };
        println!("{:>4}  {}  {}", row.index, row.hash[..12].yellow(), text);
    }
    Ok(())
}

fn cmd_roots(container: &Container, args: FeedArgs, format: OutputFormat) -> anyhow::Result<()> {
    let rows = list_roots(container, &args.feed)?;
    if format == OutputFormat::Json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No roots for feed {}.", args.feed.bold());
    }
    for row in rows {
        println!(
            "{}  {}  {}  {} entries",
            format!("#{}", row.seq).yellow().bold(),
            row.hash[..12].dimmed(),
            row.time,
            row.entries
        );
    }
    Ok(())
}

fn cmd_schemas(container: &Container, format: OutputFormat) -> anyhow::Result<()> {
    let rows = list_schemas(container)?;
    if format == OutputFormat::Json {
        return print_json(&rows);
    }
    for row in rows {
        println!("{}  {}", row.id[..12].cyan(), row.layout);
    }
    Ok(())
}
