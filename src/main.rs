use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use larder_lib::config::Config;
use larder_lib::model::{NewInventoryItem, NewShoppingEntry, StockLevel};
use larder_lib::store::sqlite::SqliteStore;
use larder_lib::{logging, Actor, AppState};

const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "larder", about = "Household inventory and shopping list", version)]
struct Cli {
    /// SQLite database file; created if missing. Live updates are
    /// in-process only: writes from another process sharing the file show
    /// up on that process's next run, not live.
    #[arg(long, default_value = "larder.sqlite3")]
    db: PathBuf,
    /// Actor id to act as.
    #[arg(long)]
    user: String,
    #[arg(long)]
    email: Option<String>,
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand)]
    Household(HouseholdCommand),
    #[command(subcommand)]
    Inventory(InventoryCommand),
    #[command(subcommand)]
    Shopping(ShoppingCommand),
    #[command(subcommand)]
    Categories(CategoriesCommand),
    /// Frequently bought items.
    History,
}

#[derive(Debug, Subcommand)]
enum HouseholdCommand {
    Show,
    /// Switch to another household by its code.
    Join { code: String },
}

#[derive(Debug, Subcommand)]
enum InventoryCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        quantity: Option<u32>,
        #[arg(long)]
        value: Option<f64>,
        #[arg(long)]
        barcode: Option<String>,
    },
    /// Set an item's stock level (low, normal, full).
    Stock { id: String, level: String },
    Remove { id: String },
    /// Add the essentials set.
    Seed,
}

#[derive(Debug, Subcommand)]
enum ShoppingCommand {
    List,
    Add {
        text: String,
        #[arg(long)]
        quantity: Option<u32>,
        #[arg(long)]
        category: Option<String>,
    },
    Toggle { id: String },
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
enum CategoriesCommand {
    List,
    Add { name: String },
    Remove { id: String },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref()).context("load configuration")?;
    let _log_guard = logging::init(&config.log).context("initialize logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async move {
        let store = SqliteStore::open(&cli.db)
            .await
            .with_context(|| format!("open database {}", cli.db.display()))?;
        let app = AppState::new(Arc::new(store), config);

        let mut actor = Actor::new(cli.user.clone());
        if let Some(email) = &cli.email {
            actor = actor.with_email(email.clone());
        }
        app.sign_in(actor.clone()).await.context("sign in")?;
        app.wait_until_loaded(LOAD_TIMEOUT)
            .await
            .context("load household data")?;

        let out = Output { json: cli.json };
        let result = dispatch(&app, &actor, cli.command, &out).await;
        app.history.flush().await;
        app.sign_out();
        result.map(|()| 0)
    })
}

struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("serialize output")?
            );
        } else {
            let text = text();
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Ok(())
    }
}

async fn dispatch(app: &AppState, actor: &Actor, command: Commands, out: &Output) -> Result<()> {
    match command {
        Commands::Household(command) => household(app, command, out).await,
        Commands::Inventory(command) => inventory(app, actor, command, out).await,
        Commands::Shopping(command) => shopping(app, actor, command, out).await,
        Commands::Categories(command) => categories(app, command, out).await,
        Commands::History => {
            let household_id = app.household_id()?;
            let entries = app.history.frequent(&household_id).await?;
            out.emit(&entries, || {
                entries
                    .iter()
                    .map(|entry| format!("{}\t{}\t{}", entry.count, entry.text, entry.category))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

async fn household(app: &AppState, command: HouseholdCommand, out: &Output) -> Result<()> {
    match command {
        HouseholdCommand::Show => {
            let profile = app.profile().await?;
            out.emit(&profile, || format!("household {}", profile.household_id))
        }
        HouseholdCommand::Join { code } => {
            let household_id = app.join_household(&code).await?;
            out.emit(&json!({ "householdId": household_id }), || {
                format!("joined household {household_id}")
            })
        }
    }
}

async fn inventory(
    app: &AppState,
    actor: &Actor,
    command: InventoryCommand,
    out: &Output,
) -> Result<()> {
    match command {
        InventoryCommand::List => {
            let items = app.inventory.items();
            out.emit(&items, || {
                items
                    .iter()
                    .map(|item| {
                        format!(
                            "{}\t{}\t{}\t{}\t{}\t{}",
                            item.id,
                            item.name,
                            item.category,
                            item.location,
                            item.quantity,
                            item.stock_level.as_str()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        InventoryCommand::Add {
            name,
            category,
            location,
            quantity,
            value,
            barcode,
        } => {
            let draft = NewInventoryItem {
                name,
                category,
                location,
                quantity,
                value,
                barcode,
                ..NewInventoryItem::default()
            };
            let id = app.inventory.add(draft, &actor.id).await?;
            out.emit(&json!({ "id": id }), || id.clone())
        }
        InventoryCommand::Stock { id, level } => {
            let level = StockLevel::parse(&level)
                .with_context(|| format!("unknown stock level {level:?}"))?;
            app.inventory.set_stock_level(&id, level).await?;
            out.emit(&json!({ "id": id, "stockLevel": level }), String::new)
        }
        InventoryCommand::Remove { id } => {
            let removed = app.inventory.delete(&id).await?;
            out.emit(&removed, || format!("removed {}", removed.name))
        }
        InventoryCommand::Seed => {
            let created = app.inventory.seed_essentials(&actor.id).await?;
            out.emit(&json!({ "created": created }), || {
                format!("added {created} items")
            })
        }
    }
}

async fn shopping(
    app: &AppState,
    actor: &Actor,
    command: ShoppingCommand,
    out: &Output,
) -> Result<()> {
    match command {
        ShoppingCommand::List => {
            let groups = app.shopping.grouped_by_category();
            out.emit(&app.shopping.entries(), || {
                let mut lines = Vec::new();
                for (category, entries) in &groups {
                    lines.push(format!("{category}:"));
                    for entry in entries {
                        let mark = if entry.completed { "x" } else { " " };
                        lines.push(format!(
                            "  [{mark}] {}\t{} x{}",
                            entry.id, entry.text, entry.quantity
                        ));
                    }
                }
                lines.join("\n")
            })
        }
        ShoppingCommand::Add {
            text,
            quantity,
            category,
        } => {
            let draft = NewShoppingEntry {
                text,
                quantity,
                category,
            };
            let id = app.shopping.add(draft, &actor.id).await?;
            out.emit(&json!({ "id": id }), || id.clone())
        }
        ShoppingCommand::Toggle { id } => {
            app.shopping.toggle_completed(&id).await?;
            out.emit(&json!({ "id": id }), String::new)
        }
        ShoppingCommand::Remove { id } => {
            let removed = app.shopping.delete(&id).await?;
            out.emit(&removed, || format!("removed {}", removed.text))
        }
    }
}

async fn categories(app: &AppState, command: CategoriesCommand, out: &Output) -> Result<()> {
    match command {
        CategoriesCommand::List => {
            let all = app.categories.all();
            out.emit(&all, || all.join("\n"))
        }
        CategoriesCommand::Add { name } => {
            let id = app.categories.add(&name).await?;
            out.emit(&json!({ "id": id, "name": name.trim() }), || id.clone())
        }
        CategoriesCommand::Remove { id } => {
            let removed = app.categories.remove(&id).await?;
            out.emit(&removed, || format!("removed {}", removed.name))
        }
    }
}
