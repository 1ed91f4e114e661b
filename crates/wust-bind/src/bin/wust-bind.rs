use std::io::Read;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wust_bind::{BridgeConfig, Console, ExportKind, GuestInterface, Linker, Timers};

#[derive(Parser)]
#[command(name = "wust-bind", about = "Host bridge toolkit for linear-memory modules")]
struct Cli {
    /// Module name the host functions are imported under.
    #[arg(long, global = true, default_value = "wbg")]
    import_module: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a module's imports and exports and check them against the host.
    Inspect {
        /// Path to a .wat or .wasm file. Reads from stdin if omitted.
        file: Option<String>,
    },
    /// List the host functions the bridge provides.
    Imports,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let linker = host_linker(BridgeConfig::default().with_import_module(cli.import_module));
    match cli.command {
        Command::Inspect { file } => inspect(&linker, file),
        Command::Imports => {
            for (module, name, sig) in linker.registered() {
                println!("{module}.{name} {sig}");
            }
            Ok(())
        }
    }
}

fn host_linker(config: BridgeConfig) -> Linker {
    let mut linker = Linker::with_intrinsics(config);
    Console::new().register(&mut linker);
    Timers::new().register(&mut linker);
    linker
}

fn inspect(linker: &Linker, file: Option<String>) -> anyhow::Result<()> {
    let bytes = read_input(file)?;
    let interface = GuestInterface::parse_any(&bytes).context("reading module")?;

    println!("imports:");
    for import in interface.func_imports() {
        println!("  func {}.{} {}", import.module, import.name, import.sig);
    }
    for (module, name, kind) in interface.other_imports() {
        println!("  {kind} {module}.{name}");
    }
    println!("exports:");
    for export in interface.exports() {
        match &export.kind {
            ExportKind::Func(sig) => println!("  func {} {sig}", export.name),
            kind => println!("  {} {}", kind.describe(), export.name),
        }
    }

    let report = linker.report(&interface);
    println!("link: {} resolved, {} problems", report.resolved.len(), report.problems.len());
    for problem in &report.problems {
        println!("  {problem}");
    }
    if !report.is_ok() {
        bail!("module does not link against the host");
    }
    Ok(())
}

fn read_input(file: Option<String>) -> anyhow::Result<Vec<u8>> {
    match file {
        Some(path) => Ok(std::fs::read(&path).with_context(|| format!("reading {path}"))?),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}
