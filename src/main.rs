// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use strata::db::{SqliteDatabase, System};
use strata::installer::{Installer, InstallerOptions};
use strata::pkg::PackageRef;
use strata::repository::{
    self, HttpClient, HttpRepository, LocalRepository, Repository, RepositoryConfig,
};
use strata::solver::{SolverOptions, StrategyKind};
use tracing::info;

const DEFAULT_DB_PATH: &str = "/var/lib/strata/strata.db";

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Package manager for container-image layers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Database path
    #[arg(short, long, default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Target root directory
    #[arg(short, long, default_value = "/")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Strata database
    Init {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Install packages (category/name[@selector])
    Install {
        /// Packages to install
        #[arg(required = true)]
        packages: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
        /// Skip dependency resolution, install the literal set
        #[arg(long)]
        no_deps: bool,
        /// Install only the dependency closure, not the named packages
        #[arg(long)]
        only_deps: bool,
        /// Continue past unmatched or failed artifacts
        #[arg(long)]
        force: bool,
        /// Stop after downloading and verifying artifacts
        #[arg(long)]
        download_only: bool,
        /// Fetch worker count (default: host CPUs)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Resolution strategy: explain | qlearn
        #[arg(long, default_value = "explain")]
        solver: String,
    },
    /// Remove installed packages
    Uninstall {
        /// Packages to remove
        #[arg(required = true)]
        packages: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
        /// Skip the reverse-dependency conflict check
        #[arg(long)]
        no_check_conflicts: bool,
        /// Cascade removal to packages requiring the targets
        #[arg(long)]
        full: bool,
        /// Also remove dependencies nothing else requires
        #[arg(long)]
        full_clean: bool,
    },
    /// Upgrade all installed packages to the newest available versions
    Upgrade {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Replace one set of packages with another
    Swap {
        /// Packages to remove
        #[arg(long, required = true, num_args = 1..)]
        remove: Vec<String>,
        /// Packages to install instead
        #[arg(long, required = true, num_args = 1..)]
        add: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Adopt on-disk files into the database from repository indices
    Reclaim {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List installed packages with missing files
    Oscheck {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Search packages across configured repositories
    Search {
        /// Substring matched against category/name and labels
        pattern: String,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Manage configured repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Add a repository (local path or http(s) URL)
    Add {
        name: String,
        url: String,
        /// Matching priority; higher wins
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Remove a repository
    Remove {
        name: String,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// List configured repositories
    List {
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Enable a repository
    Enable {
        name: String,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Disable a repository
    Disable {
        name: String,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
}

/// Build live repository handles from the stored configuration
fn load_repositories(database: &SqliteDatabase) -> Result<Vec<Box<dyn Repository>>> {
    let mut repositories: Vec<Box<dyn Repository>> = Vec::new();
    let http = HttpClient::new()?;

    for config in database.list_repositories()? {
        if !config.enabled {
            continue;
        }
        if repository::is_remote_location(&config.url) {
            repositories.push(Box::new(HttpRepository::from_config(&config, &http)?));
        } else {
            repositories.push(Box::new(LocalRepository::open(
                &config.name,
                config.priority,
                Path::new(&config.url),
            )?));
        }
    }

    Ok(repositories)
}

fn parse_refs(raw: &[String]) -> Result<Vec<PackageRef>> {
    raw.iter()
        .map(|s| PackageRef::parse(s).map_err(Into::into))
        .collect()
}

fn parse_strategy(name: &str) -> Result<StrategyKind> {
    match name {
        "explain" => Ok(StrategyKind::Explain),
        "qlearn" => Ok(StrategyKind::QLearn),
        other => Err(anyhow::anyhow!(
            "unknown solver strategy '{}' (expected explain or qlearn)",
            other
        )),
    }
}

fn open_system(common: &CommonArgs) -> Result<System> {
    let database = SqliteDatabase::open(&common.db_path)?;
    Ok(System::new(Box::new(database), &common.root))
}

fn installer_for(common: &CommonArgs, options: InstallerOptions) -> Result<Installer> {
    let database = SqliteDatabase::open(&common.db_path)?;
    let repositories = load_repositories(&database)?;
    Ok(Installer::new(repositories, options)?)
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing Strata database at: {}", db_path);
            strata::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Install {
            packages,
            common,
            no_deps,
            only_deps,
            force,
            download_only,
            concurrency,
            solver,
        }) => {
            let references = parse_refs(&packages)?;

            let mut options = InstallerOptions {
                no_deps,
                only_deps,
                force,
                download_only,
                solver: SolverOptions {
                    strategy: parse_strategy(&solver)?,
                    ..SolverOptions::default()
                },
                ..InstallerOptions::default()
            };
            if let Some(workers) = concurrency {
                options.concurrency = workers;
            }

            let installer = installer_for(&common, options)?;
            let mut system = open_system(&common)?;
            installer.install(&references, &mut system)?;

            println!("Installed: {}", packages.join(", "));
            Ok(())
        }
        Some(Commands::Uninstall {
            packages,
            common,
            no_check_conflicts,
            full,
            full_clean,
        }) => {
            let references = parse_refs(&packages)?;

            let options = InstallerOptions {
                check_conflicts: !no_check_conflicts,
                full_uninstall: full,
                full_clean_uninstall: full_clean,
                ..InstallerOptions::default()
            };

            let installer = installer_for(&common, options)?;
            let mut system = open_system(&common)?;
            installer.uninstall(&mut system, &references)?;

            println!("Removed: {}", packages.join(", "));
            Ok(())
        }
        Some(Commands::Upgrade { common }) => {
            let installer = installer_for(&common, InstallerOptions::default())?;
            let mut system = open_system(&common)?;
            installer.upgrade(&mut system)?;
            println!("Upgrade complete");
            Ok(())
        }
        Some(Commands::Swap {
            remove,
            add,
            common,
        }) => {
            let remove_refs = parse_refs(&remove)?;
            let add_refs = parse_refs(&add)?;

            let installer = installer_for(&common, InstallerOptions::default())?;
            let mut system = open_system(&common)?;
            installer.swap(&remove_refs, &add_refs, &mut system)?;

            println!("Swapped {} -> {}", remove.join(", "), add.join(", "));
            Ok(())
        }
        Some(Commands::Reclaim { common }) => {
            let installer = installer_for(&common, InstallerOptions::default())?;
            let mut system = open_system(&common)?;
            let adopted = installer.reclaim(&mut system)?;
            println!("Reclaimed {} package(s)", adopted);
            Ok(())
        }
        Some(Commands::Oscheck { common }) => {
            let installer = installer_for(&common, InstallerOptions::default())?;
            let system = open_system(&common)?;
            let damaged = installer.oscheck(&system)?;

            if damaged.is_empty() {
                println!("All installed packages are intact.");
            } else {
                println!("Packages with missing files:");
                for reference in &damaged {
                    println!("  {}", reference);
                }
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Search { pattern, db_path }) => {
            let database = SqliteDatabase::open(&db_path)?;
            let repositories = load_repositories(&database)?;
            let hits = repository::search(&repositories, &pattern)?;

            if hits.is_empty() {
                println!("No packages found.");
            } else {
                for package in &hits {
                    print!("  {}", package);
                    if let Some(description) = package.labels.get("description") {
                        print!(" - {}", description);
                    }
                    println!();
                }
                println!("\nTotal: {} package(s)", hits.len());
            }
            Ok(())
        }
        Some(Commands::Repo { command }) => match command {
            RepoCommands::Add {
                name,
                url,
                priority,
                db_path,
            } => {
                let mut database = SqliteDatabase::open(&db_path)?;
                let mut config = RepositoryConfig::new(&name, &url);
                config.priority = priority;
                database.add_repository(&config)?;
                println!("Added repository: {} ({})", name, url);
                Ok(())
            }
            RepoCommands::Remove { name, db_path } => {
                let mut database = SqliteDatabase::open(&db_path)?;
                database.remove_repository(&name)?;
                println!("Removed repository: {}", name);
                Ok(())
            }
            RepoCommands::List { db_path } => {
                let database = SqliteDatabase::open(&db_path)?;
                let repos = database.list_repositories()?;

                if repos.is_empty() {
                    println!("No repositories configured.");
                } else {
                    for repo in &repos {
                        println!(
                            "  {} {} (priority {}{})",
                            repo.name,
                            repo.url,
                            repo.priority,
                            if repo.enabled { "" } else { ", disabled" }
                        );
                    }
                }
                Ok(())
            }
            RepoCommands::Enable { name, db_path } => {
                let mut database = SqliteDatabase::open(&db_path)?;
                database.set_repository_enabled(&name, true)?;
                println!("Repository '{}' enabled", name);
                Ok(())
            }
            RepoCommands::Disable { name, db_path } => {
                let mut database = SqliteDatabase::open(&db_path)?;
                database.set_repository_enabled(&name, false)?;
                println!("Repository '{}' disabled", name);
                Ok(())
            }
        },
        Some(Commands::Completions { shell }) => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "strata", &mut std::io::stdout());
            Ok(())
        }
        None => {
            println!("Strata Package Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'strata --help' for usage information");
            Ok(())
        }
    }
}
