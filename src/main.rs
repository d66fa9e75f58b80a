use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use hulud_scan::display::{display_report, progress_spinner};
use hulud_scan::install::{InstallPlan, InstallWrapper};
use hulud_scan::sink::report_stem;
use hulud_scan::{
    load_indicators, Config, CsvFileSupplier, CsvReportSink, HttpFeedSupplier, IocSupplier,
    JsonReportSink, ReportFormat, ReportSink, ScanOptions, ScanOrchestrator, ScanReport,
    SystemProbe,
};

/// Exit code for runs that could not produce a report at all.
const FATAL_EXIT_CODE: i32 = 10;

const LONG_VERSION: &str = concat!(
    env!("HULUD_VERSION"),
    "\ncommit: ",
    env!("HULUD_COMMIT"),
    "\nbuilt: ",
    env!("HULUD_BUILD_DATE")
);

#[derive(Parser)]
#[command(
    author,
    version = env!("HULUD_VERSION"),
    long_version = LONG_VERSION,
    about = "hulud-scan: find Shai-Hulud 2.0 worm artifacts, infected manifests and compromised npm packages"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a project tree (and optionally global packages)
    #[command(about = "Scan a directory tree for Shai-Hulud 2.0 indicators")]
    Scan {
        /// Project directory to scan
        #[arg(default_value = ".")]
        path: PathBuf,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Install dependencies with lifecycle scripts disabled, scanning around it
    #[command(
        about = "Install packages with scripts disabled, scanning before and after",
        alias = "i"
    )]
    Install {
        /// Packages to add; empty installs the project's dependencies
        packages: Vec<String>,
        #[arg(long = "pm", default_value = "npm", help = "Package manager to run (npm, pnpm, yarn, bun)")]
        package_manager: String,
        #[arg(long, help = "Skip the scan before installing")]
        no_scan_before: bool,
        #[arg(long, help = "Scan again after installing")]
        scan_after: bool,
        #[arg(short = 'y', long = "yes", help = "Do not ask for confirmation on warnings")]
        yes: bool,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Write a default configuration to .hulud/config.json
    #[command(about = "Create .hulud/config.json with default settings")]
    Init {
        #[arg(long, help = "Overwrite an existing configuration")]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
    Both,
    None,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => ReportFormat::Json,
            FormatArg::Csv => ReportFormat::Csv,
            FormatArg::Both => ReportFormat::Both,
            FormatArg::None => ReportFormat::None,
        }
    }
}

/// Flags shared by `scan` and `install`; anything left unset falls back to
/// the saved configuration.
#[derive(Args, Clone)]
struct ScanArgs {
    #[arg(short = 'g', long = "global", help = "Also scan global and nvm-managed packages")]
    include_global_packages: bool,
    #[arg(long, help = "Read the IOC list from a local CSV file")]
    ioc_file: Option<PathBuf>,
    #[arg(long, help = "Download the IOC list from this URL")]
    ioc_url: Option<String>,
    #[arg(short = 'j', long, help = "Number of scanning workers (1 = sequential)")]
    workers: Option<usize>,
    #[arg(long, help = "Follow symbolic links while walking")]
    follow_symlinks: bool,
    #[arg(long, value_enum, help = "Report files to write")]
    format: Option<FormatArg>,
    #[arg(short = 'o', long, help = "Directory for report files")]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "Hide the progress spinner")]
    no_progress: bool,
}

impl ScanArgs {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(file) = &self.ioc_file {
            config.ioc_file = Some(file.clone());
        }
        if let Some(url) = &self.ioc_url {
            config.ioc_url = url.clone();
            // An explicit URL wins over a file remembered in the config
            if self.ioc_file.is_none() {
                config.ioc_file = None;
            }
        }
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(format) = self.format {
            config.report_format = format.into();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        config.include_global_packages |= self.include_global_packages;
        config.follow_symlinks |= self.follow_symlinks;
        config
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// First Ctrl+C asks the scan to stop and still report; a second one exits.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Interrupted, finishing with a partial report (Ctrl+C again to abort)",
            "⚠️".yellow()
        );
    }) {
        tracing::warn!("could not install Ctrl+C handler: {e}");
    }
    cancel
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let code = match execute(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            FATAL_EXIT_CODE
        }
    };
    std::process::exit(code);
}

fn execute(command: Commands) -> Result<i32> {
    match command {
        Commands::Scan { path, scan } => execute_scan(&path, &scan),
        Commands::Install {
            packages,
            package_manager,
            no_scan_before,
            scan_after,
            yes,
            scan,
        } => {
            let plan = InstallPlan {
                package_manager,
                packages,
                scan_before: !no_scan_before,
                scan_after,
                assume_yes: yes,
            };
            execute_install(&plan, &scan)
        }
        Commands::Init { force } => execute_init(force),
    }
}

fn ioc_supplier(config: &Config) -> Box<dyn IocSupplier> {
    match &config.ioc_file {
        Some(file) => Box::new(CsvFileSupplier::new(file)),
        None => Box::new(HttpFeedSupplier::new(config.ioc_url.clone())),
    }
}

fn scan_options(config: &Config, show_progress: bool) -> (ScanOptions, Option<indicatif::ProgressBar>) {
    let mut options = ScanOptions {
        include_global_packages: config.include_global_packages,
        workers: config.workers,
        follow_symlinks: config.follow_symlinks,
        progress: None,
        cancel: Some(install_interrupt_handler()),
    };

    let bar = if show_progress {
        let (bar, observer) = progress_spinner();
        options.progress = Some(observer);
        Some(bar)
    } else {
        None
    };
    (options, bar)
}

fn persist_report(report: &ScanReport, config: &Config) {
    let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();
    if config.writes_json() {
        let path = config
            .output_dir
            .join(format!("{}.json", report_stem(report)));
        sinks.push(Box::new(JsonReportSink::new(path)));
    }
    if config.writes_csv() {
        sinks.push(Box::new(CsvReportSink::new(&config.output_dir)));
    }

    for sink in sinks {
        match sink.persist(report) {
            Ok(paths) => {
                for path in paths {
                    println!("{} {}", "Report saved:".green(), path.display());
                }
            }
            Err(e) => eprintln!("{} {}", "Warning:".yellow(), e),
        }
    }
}

fn execute_scan(path: &Path, args: &ScanArgs) -> Result<i32> {
    let config = args.apply(Config::load_or_default()?);
    let supplier = ioc_supplier(&config);

    println!(
        "{} {}",
        "📥 Loading IOC list from".cyan(),
        supplier.describe().bright_white()
    );
    let indicators = load_indicators(supplier.as_ref())?;
    println!(
        "   {} compromised packages known",
        indicators.package_count().to_string().bright_white()
    );

    let (options, bar) = scan_options(&config, !args.no_progress);
    let orchestrator =
        ScanOrchestrator::new(&indicators, &SystemProbe).with_ioc_source(supplier.describe());
    let result = orchestrator.run(path, &options);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let report = result?;

    display_report(&report);
    persist_report(&report, &config);
    Ok(report.exit_code())
}

fn execute_install(plan: &InstallPlan, args: &ScanArgs) -> Result<i32> {
    let config = args.apply(Config::load_or_default()?);
    let project_root = std::env::current_dir()?;

    let indicators = if plan.scan_before || plan.scan_after {
        let supplier = ioc_supplier(&config);
        Some((load_indicators(supplier.as_ref())?, supplier.describe()))
    } else {
        None
    };

    let Some((indicators, source)) = indicators else {
        return Err(anyhow!(
            "Refusing to install without any scan; drop --no-scan-before or add --scan-after"
        ));
    };

    let (options, _) = scan_options(&config, false);
    let orchestrator = ScanOrchestrator::new(&indicators, &SystemProbe).with_ioc_source(source);
    let outcome = InstallWrapper::new(&orchestrator, options).run(&project_root, plan)?;
    Ok(outcome.exit_code())
}

fn execute_init(force: bool) -> Result<i32> {
    let path = Config::get_config_path();
    if path.exists() && !force {
        println!(
            "{} {} (use --force to overwrite)",
            "Configuration already exists:".yellow(),
            path.display()
        );
        return Ok(0);
    }

    Config::default().save()?;
    println!("{} {}", "Configuration written to".green(), path.display());
    Ok(0)
}
