// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn db_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value("/var/lib/strata/strata.db")
        .help("Database path")
}

fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .default_value("/")
        .help("Target root directory")
}

fn build_cli() -> Command {
    Command::new("strata")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Strata Contributors")
        .about("Package manager for container-image layers")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the Strata database")
                .arg(db_arg()),
        )
        .subcommand(
            Command::new("install")
                .about("Install packages (category/name[@selector])")
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Packages to install"),
                )
                .arg(db_arg())
                .arg(root_arg())
                .arg(
                    Arg::new("no_deps")
                        .long("no-deps")
                        .num_args(0)
                        .help("Skip dependency resolution"),
                )
                .arg(
                    Arg::new("only_deps")
                        .long("only-deps")
                        .num_args(0)
                        .help("Install only the dependency closure"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .num_args(0)
                        .help("Continue past unmatched or failed artifacts"),
                )
                .arg(
                    Arg::new("download_only")
                        .long("download-only")
                        .num_args(0)
                        .help("Stop after downloading artifacts"),
                )
                .arg(
                    Arg::new("solver")
                        .long("solver")
                        .default_value("explain")
                        .help("Resolution strategy: explain | qlearn"),
                ),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove installed packages")
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Packages to remove"),
                )
                .arg(db_arg())
                .arg(root_arg()),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade all installed packages")
                .arg(db_arg())
                .arg(root_arg()),
        )
        .subcommand(
            Command::new("reclaim")
                .about("Adopt on-disk files into the database")
                .arg(db_arg())
                .arg(root_arg()),
        )
        .subcommand(
            Command::new("oscheck")
                .about("List installed packages with missing files")
                .arg(db_arg())
                .arg(root_arg()),
        )
        .subcommand(
            Command::new("search")
                .about("Search packages across configured repositories")
                .arg(Arg::new("pattern").required(true).help("Search pattern"))
                .arg(db_arg()),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cmd = build_cli();
    let man = Man::new(cmd.clone());
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)?;
    fs::write(man_dir.join("strata.1"), &buffer)?;

    // Subcommand man pages
    for subcommand in cmd.get_subcommands() {
        let name = format!("strata-{}", subcommand.get_name());
        let man = Man::new(subcommand.clone().name(name.clone()));
        let mut buffer: Vec<u8> = Vec::new();
        man.render(&mut buffer)?;
        fs::write(man_dir.join(format!("{}.1", name)), &buffer)?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
