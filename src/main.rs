//! tap-on-save CLI
//!
//! Entry point for the `tap-on-save` command-line tool.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use tap_on_save::config::{self, CliOverrides, LoadedConfig};
use tap_on_save::signal::{self, ShutdownSignal};
use tap_on_save::trigger::Report;
use tap_on_save::watch::{self, FileWatcher};
use tap_on_save::{SaveHandler, TerminalSink, TriggerOutcome};

/// All tests passed
const EXIT_SUCCESS: i32 = 0;
/// Tests ran and something failed
const EXIT_TESTS_FAILED: i32 = 1;
/// The run timed out or could not be started
const EXIT_RUN_FAILED: i32 = 2;
/// No test folder above the saved file
const EXIT_NO_TESTS: i32 = 3;
/// Bad configuration or arguments
const EXIT_USAGE: i32 = 64;

#[derive(Parser)]
#[command(name = "tap-on-save")]
#[command(about = "Run a TAP test command when source files are saved", version)]
struct Cli {
    /// Path to project config file (default: .tap-on-save.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Test command to run (overrides config)
    #[arg(long, global = true)]
    command: Option<String>,

    /// Timeout in seconds (overrides config)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Name of the directory that marks the test root (overrides config)
    #[arg(long, global = true)]
    test_dir: Option<String>,

    #[command(subcommand)]
    action: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a single save of FILE and wait for the result
    Run {
        /// The file that was saved
        file: PathBuf,
    },

    /// Watch a directory tree and run tests on every save
    Watch {
        /// Directory to watch (default: current directory)
        root: Option<PathBuf>,

        /// Glob for files that trigger a run (repeatable, overrides config)
        #[arg(long = "pattern", short = 'p')]
        patterns: Vec<String>,
    },

    /// Summarize TAP output from a file or stdin
    Parse {
        /// TAP file to read (default: stdin)
        input: Option<PathBuf>,

        /// File holding the command's stderr
        #[arg(long)]
        stderr: Option<PathBuf>,

        /// Output the parsed result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let overrides = CliOverrides {
        command: cli.command,
        test_dir_name: cli.test_dir,
        timeout_seconds: cli.timeout,
    };
    let user_path = config::user_config_path();
    let loaded = match config::load(user_path.as_deref(), cli.config.as_deref(), &overrides) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(EXIT_USAGE);
        }
    };

    let code = match cli.action {
        Commands::Run { file } => run_once(loaded, &file),
        Commands::Watch { root, patterns } => run_watch(loaded, root, patterns),
        Commands::Parse {
            input,
            stderr,
            json,
        } => run_parse(input.as_deref(), stderr.as_deref(), json),
        Commands::Config => run_config(&loaded),
    };
    process::exit(code);
}

fn run_once(loaded: LoadedConfig, file: &Path) -> i32 {
    let mut handler = SaveHandler::new(loaded.settings, TerminalSink::stdout());

    match handler.on_file_saved(file) {
        TriggerOutcome::Started(_) => {}
        TriggerOutcome::NoTestFolder => {
            eprintln!(
                "No '{}' folder found above {}. Not running tests.",
                handler.settings().test_dir_name,
                file.display()
            );
            return EXIT_NO_TESTS;
        }
        TriggerOutcome::AlreadyRunning => {
            eprintln!("A test run is already in progress.");
            return EXIT_RUN_FAILED;
        }
    }

    match handler.run_to_completion() {
        Some(Report::Finished(result)) if result.success() => EXIT_SUCCESS,
        Some(Report::Finished(_)) => EXIT_TESTS_FAILED,
        Some(Report::TimedOut { .. }) | Some(Report::Aborted { .. }) | None => EXIT_RUN_FAILED,
    }
}

fn run_watch(loaded: LoadedConfig, root: Option<PathBuf>, patterns: Vec<String>) -> i32 {
    let root = root.unwrap_or_else(|| PathBuf::from("."));
    let patterns = if patterns.is_empty() {
        loaded.settings.watch.patterns.clone()
    } else {
        patterns
    };

    let mut watcher = match FileWatcher::new(&root, &patterns) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };

    let shutdown = Arc::new(ShutdownSignal::new());
    if let Err(e) = signal::install(Arc::clone(&shutdown)) {
        eprintln!("Warning: could not install interrupt handler: {}", e);
    }

    eprintln!(
        "Watching {} ({}). Press Ctrl-C to stop.",
        root.display(),
        patterns.join(", ")
    );

    let mut handler = SaveHandler::new(loaded.settings, TerminalSink::stdout());
    watch::watch_loop(&mut handler, &mut watcher, &shutdown);
    EXIT_SUCCESS
}

fn run_parse(input: Option<&Path>, stderr_path: Option<&Path>, json: bool) -> i32 {
    let stdout = match input {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map(|_| buf)
        }
    };
    let stdout = match stdout {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading TAP input: {}", e);
            return EXIT_USAGE;
        }
    };

    let stderr = match stderr_path.map(std::fs::read_to_string).transpose() {
        Ok(s) => s.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error reading stderr file: {}", e);
            return EXIT_USAGE;
        }
    };

    let result = tap_report::parse(&stdout, &stderr);

    if json {
        match result.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return EXIT_USAGE;
            }
        }
    } else {
        print!("{}", tap_report::format_status(&result, Local::now().time()));
        print!("{}", tap_report::format_details(&result));
    }

    if result.success() {
        EXIT_SUCCESS
    } else {
        EXIT_TESTS_FAILED
    }
}

fn run_config(loaded: &LoadedConfig) -> i32 {
    println!("# Sources (lowest precedence first):");
    for source in &loaded.sources {
        match source.path {
            Some(ref path) => println!("#   {:?}: {}", source.origin, path.display()),
            None => println!("#   {:?}", source.origin),
        }
    }
    println!();

    match loaded.settings.to_toml() {
        Ok(toml) => {
            print!("{}", toml);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            EXIT_USAGE
        }
    }
}
