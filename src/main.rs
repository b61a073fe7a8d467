use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use diffpick::apply::{DiffFile, DiffSource, DirectoryTarget, GitBackend, PatchSink, Printer};
use diffpick::config::Config;
use diffpick::session::{Flow, Session};
use diffpick::{DiffpickError, load_changes, tui};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "diffpick")]
#[command(version, about = "Interactively select pending changes, down to single lines")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run as if started in <REPO>
    #[arg(short = 'C', value_name = "REPO", default_value = ".")]
    repo: PathBuf,

    /// Read the diff from a file instead of git ("-" for stdin)
    #[arg(long, value_name = "FILE")]
    diff: Option<PathBuf>,

    /// Apply the selection to a directory instead of the git index
    #[arg(long, value_name = "DIR", conflicts_with = "print")]
    target: Option<PathBuf>,

    /// Print the selection instead of applying it
    #[arg(long)]
    print: bool,

    /// Configuration file (default: <config dir>/diffpick/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write logs to a file; filter with DIFFPICK_LOG (default "warn")
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Limit the git diff to these paths
    #[arg(last = true, value_name = "PATHSPEC")]
    pathspecs: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
    /// Print the man page
    Man,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "diffpick", &mut io::stdout());
            return ExitCode::SUCCESS;
        }
        Some(Commands::Man) => {
            return match clap_mangen::Man::new(Cli::command()).render(&mut io::stdout()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => report(&e),
            };
        }
        None => {}
    }

    let result = init_logging(cli.log_file.as_deref()).and_then(|()| run(&cli));
    match result {
        Ok(Flow::Abort) => ExitCode::from(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn report(error: &dyn std::fmt::Display) -> ExitCode {
    eprintln!("diffpick: {error}");
    ExitCode::from(2)
}

fn init_logging(log_file: Option<&Path>) -> Result<(), DiffpickError> {
    let writer = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| DiffpickError::LoggingFailed {
                    message: format!("{}: {e}", path.display()),
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let filter = EnvFilter::try_from_env("DIFFPICK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .with(filter)
        .try_init()
        .map_err(|e| DiffpickError::LoggingFailed {
            message: e.to_string(),
        })
}

fn run(cli: &Cli) -> Result<Flow, DiffpickError> {
    let config = Config::load(cli.config.as_deref())?;
    let deprioritizer = config.deprioritizer()?;

    let git = GitBackend::new(&cli.repo).with_pathspecs(cli.pathspecs.clone());
    let source: Box<dyn DiffSource> = match &cli.diff {
        Some(path) => Box::new(DiffFile::new(path)),
        None => Box::new(git.clone()),
    };
    let changes = load_changes(source.as_ref(), &deprioritizer)?;
    if changes.is_empty() {
        eprintln!("diffpick: no changes");
        return Ok(Flow::Confirm);
    }

    let mut sink: Box<dyn PatchSink> = match &cli.target {
        _ if cli.print => Box::new(Printer::new(io::stdout().lock())),
        Some(dir) => Box::new(DirectoryTarget::new(dir)),
        None => Box::new(git),
    };

    // A rejected patch returns to the session with the selection intact
    let mut session = Session::new(changes);
    let mut failure: Option<DiffpickError> = None;
    loop {
        let notice = failure.as_ref().map(ToString::to_string);
        if tui::run(&mut session, config.format.tab_width, notice)? == Flow::Abort {
            return match failure {
                Some(e) => Err(e),
                None => Ok(Flow::Abort),
            };
        }

        let patch = session.build();
        if patch.is_empty() {
            tracing::debug!("nothing selected");
            return Ok(Flow::Confirm);
        }
        match sink.apply(&patch) {
            Ok(()) => return Ok(Flow::Confirm),
            Err(e) => {
                tracing::warn!(error = %e, "apply failed");
                failure = Some(e.into());
            }
        }
    }
}
