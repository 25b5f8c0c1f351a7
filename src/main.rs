use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use gallery_sync::catalog::{Catalog, EventPatch, NewEvent};
use gallery_sync::clock::{Clock, SystemClock};
use gallery_sync::config::{self, Config};
use gallery_sync::db::{self, Pool};
use gallery_sync::ingest::IngestPipeline;
use gallery_sync::model::{Event, EventStatus};
use gallery_sync::notify::{LogNotifier, Notifier, WebhookNotifier};
use gallery_sync::remote::{HttpRemote, RemoteStore};
use gallery_sync::sync::{SyncEngine, SyncReport};
use gallery_sync::watcher;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an event
    Create {
        name: String,
        /// Event date (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        photographer: String,
        /// Album name, defaults to the event name
        #[arg(long)]
        album: Option<String>,
        #[arg(long)]
        access_code: Option<String>,
        #[arg(long)]
        watermark: bool,
        #[arg(long)]
        no_backup: bool,
        /// Make it the active event
        #[arg(long)]
        activate: bool,
    },
    /// List events
    List,
    /// Make an event the upload target
    Activate { id: String },
    /// Show the active event
    Current,
    /// Change fields of an event
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        photographer: Option<String>,
        #[arg(long)]
        album: Option<String>,
        #[arg(long)]
        access_code: Option<String>,
        #[arg(long)]
        watermark: Option<bool>,
        #[arg(long)]
        backup: Option<bool>,
        /// active, completed or archived
        #[arg(long, value_parser = parse_status)]
        status: Option<EventStatus>,
    },
    /// Delete an event locally and on the remote
    Delete { id: String },
    /// Create an event for today and activate it
    Quick { name: Option<String> },
    /// Print all events as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Push pending changes and pull remote ones
    Sync {
        /// Push every event regardless of its status
        #[arg(long)]
        force: bool,
    },
    /// Watch the capture directory and keep syncing until interrupted
    Watch,
}

fn parse_status(s: &str) -> Result<EventStatus, String> {
    EventStatus::parse(s).ok_or_else(|| format!("unknown status {s}"))
}

struct App {
    cfg: Config,
    pool: Pool,
    clock: Arc<dyn Clock>,
    remote: Arc<dyn RemoteStore>,
}

impl App {
    fn catalog(&self) -> Catalog {
        Catalog::new(self.pool.clone(), self.clock.clone(), self.cfg.catalog_settings())
    }

    fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.pool.clone(),
            self.remote.clone(),
            self.clock.clone(),
            self.cfg.sync_settings(),
        )
    }

    /// Try to push what a command just queued. Offline is not an error.
    async fn drain_opportunistically(&self) {
        match self.engine().drain().await {
            Ok(report) if report.offline => {
                info!(pending = report.remaining, "remote offline; changes stay queued")
            }
            Ok(report) => info!(
                pushed = report.succeeded,
                failed = report.failed,
                pending = report.remaining,
                "sync queue drained"
            ),
            Err(err) => warn!(?err, "sync queue drain failed"),
        }
    }
}

fn print_event(event: &Event) {
    println!("{} [{}] {}", event.id, event.sync_status.as_str(), event.name);
    println!("  date:    {}", event.date);
    println!("  status:  {}", event.status.as_str());
    println!("  album:   {}", event.album);
    println!("  code:    {}", event.access_code);
    println!("  link:    {}", event.shareable_link);
    println!("  qr:      {}", event.qr_payload);
}

fn print_report(report: &SyncReport) {
    if !report.online() {
        println!("remote offline; {} change(s) queued", report.drain.remaining);
        return;
    }
    println!(
        "pushed {}, drained {} ({} failed, {} abandoned, {} pending), pulled {} new / {} updated",
        report.pushed,
        report.drain.succeeded,
        report.drain.failed,
        report.drain.abandoned,
        report.drain.remaining,
        report.pull.inserted,
        report.pull.updated,
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let remote: Arc<dyn RemoteStore> =
        Arc::new(HttpRemote::from_config(&cfg).context("building remote client")?);
    let app = App {
        cfg,
        pool,
        clock: Arc::new(SystemClock),
        remote,
    };

    match args.command {
        Command::Create {
            name,
            date,
            description,
            photographer,
            album,
            access_code,
            watermark,
            no_backup,
            activate,
        } => {
            let catalog = app.catalog();
            let date = date.unwrap_or_else(|| app.clock.now().date_naive());
            let mut new = NewEvent::new(name, date);
            new.description = description;
            new.photographer = photographer;
            new.album = album;
            new.access_code = access_code;
            new.watermark_enabled = watermark;
            new.backup_enabled = !no_backup;
            let event = catalog.create(new).await?;
            if activate {
                catalog.activate(&event.id).await?;
            }
            print_event(&event);
            app.drain_opportunistically().await;
        }
        Command::List => {
            let events = app.catalog().list().await?;
            if events.is_empty() {
                println!("no events");
            }
            let active = app.catalog().current().await?.map(|e| e.id);
            for event in events {
                let marker = if active.as_deref() == Some(event.id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {:<40} {} {:<9} {:<7} {}",
                    event.id,
                    event.date,
                    event.status.as_str(),
                    event.sync_status.as_str(),
                    event.name
                );
            }
        }
        Command::Activate { id } => {
            let event = app.catalog().activate(&id).await?;
            println!("active event: {} ({})", event.id, event.name);
        }
        Command::Current => match app.catalog().current().await? {
            Some(event) => print_event(&event),
            None => println!("no active event"),
        },
        Command::Update {
            id,
            name,
            date,
            description,
            photographer,
            album,
            access_code,
            watermark,
            backup,
            status,
        } => {
            let patch = EventPatch {
                name,
                description,
                date,
                photographer,
                album,
                access_code,
                watermark_enabled: watermark,
                backup_enabled: backup,
                status,
            };
            if patch.is_empty() {
                bail!("nothing to update");
            }
            let event = app.catalog().update(&id, patch).await?;
            print_event(&event);
            app.drain_opportunistically().await;
        }
        Command::Delete { id } => {
            let event = app.catalog().delete(&id).await?;
            match app.engine().delete_remote(&event).await {
                Ok(true) => println!("deleted {} (remote too)", event.id),
                Ok(false) => println!("deleted {} (remote delete queued)", event.id),
                Err(err) => {
                    warn!(?err, "remote delete failed");
                    println!("deleted {} (remote delete queued)", event.id);
                }
            }
            app.drain_opportunistically().await;
        }
        Command::Quick { name } => {
            let event = app.catalog().quick(name).await?;
            print_event(&event);
            app.drain_opportunistically().await;
        }
        Command::Export { output } => {
            let json = app.catalog().export().await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Sync { force } => {
            let engine = app.engine();
            let report = if force {
                engine.force_sync().await?
            } else {
                engine.sync_once().await?
            };
            print_report(&report);
        }
        Command::Watch => {
            let notifier: Arc<dyn Notifier> = match app.cfg.webhook_url() {
                Some(url) => Arc::new(WebhookNotifier::new(url).context("building webhook client")?),
                None => Arc::new(LogNotifier),
            };
            let pipeline = Arc::new(IngestPipeline::new(
                app.pool.clone(),
                app.remote.clone(),
                notifier,
                app.cfg.ingest_settings(),
            ));
            let engine = Arc::new(app.engine());
            let events = watcher::observe(&app.cfg.watcher.watch_dir, app.cfg.watch_settings());

            info!(dir = %app.cfg.watcher.watch_dir, "watching for new photos");
            tokio::join!(pipeline.run(events), engine.run());
        }
    }

    Ok(())
}
