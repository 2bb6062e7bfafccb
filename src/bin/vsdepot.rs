use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vsdepot_core::archive::SevenZip;
use vsdepot_core::catalog::CATALOG_FILE_NAME;
use vsdepot_core::refresh::{refresh_catalog, DEFAULT_CATALOG_URL};
use vsdepot_core::report::{self, Notice, ReportSink, StatusRow, Tally};
use vsdepot_core::{InstallContext, Session, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Operation {
    Install,
    Update,
    Upgrade,
    Uninstall,
    Installed,
    Available,
}

/// A simple VapourSynth package manager
#[derive(Debug, Parser)]
#[command(name = "vsdepot", version)]
struct Cli {
    operation: Operation,

    /// Identifier, namespace or module to install, upgrade or uninstall
    package: Vec<String>,

    /// Force upgrade for packages where the current version is unknown
    #[arg(short = 'f')]
    force: bool,

    /// Binaries to install, defaults to this build's architecture
    #[arg(short = 't', value_parser = ["win32", "win64"])]
    target: Option<String>,

    /// Portable mode
    #[arg(short = 'p')]
    portable: bool,

    /// Cached package definitions
    #[arg(long, env = "VSDEPOT_CATALOG", default_value = CATALOG_FILE_NAME)]
    catalog: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct Stdout;

impl ReportSink for Stdout {
    fn notice(&mut self, notice: Notice) {
        println!("{notice}");
    }
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Apply `op` to every requested package. A failing package is reported and
/// the rest still run; returns the summed counts and whether anything failed.
fn for_each_package(
    session: &mut Session,
    packages: &[String],
    mut op: impl FnMut(&mut Session, &str, &mut dyn ReportSink) -> vsdepot_core::Result<Tally>,
) -> (Tally, bool) {
    let mut total = Tally::NONE;
    let mut failed = false;
    for name in packages {
        match op(session, name, &mut Stdout) {
            Ok(tally) => total += tally,
            Err(e) => {
                eprintln!("Error: {e}");
                if e.is_catalog_error() {
                    eprintln!("Package definitions may be outdated, try the update command");
                }
                failed = true;
            }
        }
    }
    (total, failed)
}

fn open_session(cli: &Cli) -> Result<Session> {
    let target = match cli.target.as_deref() {
        Some(t) => t.parse::<Target>()?,
        None => Target::native(),
    };
    let ctx = InstallContext::discover(target, cli.portable)?;
    Session::open(&cli.catalog, ctx)
}

fn print_rows(rows: Vec<StatusRow>) {
    println!("{}", StatusRow::header());
    for row in rows {
        println!("{row}");
    }
}

fn run(cli: Cli) -> Result<bool> {
    let needs_packages = matches!(
        cli.operation,
        Operation::Install | Operation::Upgrade | Operation::Uninstall
    );
    if needs_packages == cli.package.is_empty() {
        bail!("Package argument required for install, upgrade and uninstall operations");
    }

    let ok = match cli.operation {
        // Refreshing works without a readable catalog
        Operation::Update => {
            let outcome = refresh_catalog(DEFAULT_CATALOG_URL, &cli.catalog, &SevenZip::locate())?;
            println!("{outcome}");
            true
        }
        Operation::Install => {
            let mut session = open_session(&cli)?;
            let (total, failed) = for_each_package(&mut session, &cli.package, |s, name, sink| {
                s.install(name, sink)
            });
            println!("{}", report::install_summary(total));
            !failed
        }
        Operation::Upgrade => {
            let mut session = open_session(&cli)?;
            let force = cli.force;
            let (total, failed) = for_each_package(&mut session, &cli.package, |s, name, sink| {
                s.upgrade(name, force, sink)
            });
            println!("{}", report::upgrade_summary(total));
            !failed
        }
        Operation::Uninstall => {
            let mut session = open_session(&cli)?;
            let (total, failed) = for_each_package(&mut session, &cli.package, |s, name, sink| {
                s.uninstall(name, sink)
            });
            println!("{}", report::uninstall_summary(total));
            !failed
        }
        Operation::Installed => {
            let session = open_session(&cli)?;
            let target = session.context().target;
            print_rows(report::installed_rows(session.catalog(), session.state(), target));
            true
        }
        Operation::Available => {
            let session = open_session(&cli)?;
            let target = session.context().target;
            print_rows(report::available_rows(session.catalog(), session.state(), target));
            true
        }
    };
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
