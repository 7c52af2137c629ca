//! Command-line front end for `expandms` (`spec.md` §6 CLI surface).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use expandms::{extract, ArchiveHandle, ExpandError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "expandms", version, about = "Read legacy Microsoft compressed containers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List an archive's entries.
    List {
        archive: PathBuf,
        #[arg(long)]
        format: Option<String>,
    },
    /// Extract some or all entries to a directory.
    Extract {
        archive: PathBuf,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        #[arg(long)]
        overwrite: bool,
        #[arg(long, default_value_t = true)]
        preserve_paths: bool,
        #[arg(long)]
        format: Option<String>,
        /// Reserved for parallel-folder extraction across archives; the
        /// single-archive CLI path here is inherently sequential
        /// (`spec.md` §5: a decoder instance is not safe to share).
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Print summary info: format, file count, sizes, ratio.
    Info {
        archive: PathBuf,
        #[arg(long)]
        format: Option<String>,
    },
    /// Verify every entry decodes without error, without writing output.
    Test {
        archive: PathBuf,
        #[arg(long)]
        format: Option<String>,
    },
    /// Not implemented: this crate is a reader, not an archive builder.
    Create {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {}", msg);
            ExitCode::from(1)
        }
        Err(CliError::Io(err)) => {
            eprintln!("I/O error: {}", err);
            ExitCode::from(2)
        }
        Err(CliError::Format(err)) => {
            eprintln!("format error: {}", err);
            ExitCode::from(3)
        }
    }
}

enum CliError {
    Usage(String),
    Io(std::io::Error),
    Format(ExpandError),
}

impl From<ExpandError> for CliError {
    fn from(value: ExpandError) -> Self {
        match value {
            ExpandError::Io(e) => CliError::Io(e),
            other => CliError::Format(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        CliError::Io(value)
    }
}

fn run(command: Command) -> Result<ExitCode, CliError> {
    match command {
        Command::List { archive, .. } => {
            let handle = ArchiveHandle::open(&archive)?;
            for entry in handle.entries() {
                println!("{}\t{}", String::from_utf8_lossy(&entry.name), entry.uncompressed_length);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Info { archive, .. } => {
            let handle = ArchiveHandle::open(&archive)?;
            let info = handle.info();
            println!("format:            {}", info.format);
            println!("file_count:        {}", info.file_count);
            println!("total_uncompressed: {}", info.total_uncompressed);
            println!("compressed_size:   {}", info.compressed_size);
            println!("ratio:             {:.4}", info.ratio);
            Ok(ExitCode::SUCCESS)
        }
        Command::Test { archive, .. } => {
            let mut handle = ArchiveHandle::open(&archive)?;
            let entries = handle.entries();
            let mut failures = 0usize;
            for entry in &entries {
                let mut sink = std::io::sink();
                if let Err(err) = handle.extract(entry, &mut sink) {
                    failures += 1;
                    eprintln!("FAIL {}: {}", String::from_utf8_lossy(&entry.name), err);
                }
            }
            if failures > 0 {
                eprintln!("{}/{} entries failed", failures, entries.len());
                return Err(CliError::Format(ExpandError::Policy(format!("{} entries failed verification", failures))));
            }
            println!("{} entries OK", entries.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Extract { archive, output, overwrite, preserve_paths, workers, .. } => {
            if workers > 1 {
                eprintln!("note: --workers > 1 has no effect; a single archive's folders decode sequentially (spec.md §5)");
            }
            let mut handle = ArchiveHandle::open(&archive)?;
            let entries = handle.entries();
            std::fs::create_dir_all(&output)?;

            let policy = extract::ExtractionPolicy { overwrite, preserve_paths };
            let outcome = extract::extract_all(&entries, &output, &policy, |entry, writer| {
                handle.extract(entry, writer)
            });

            for path in &outcome.succeeded {
                println!("{}", path.display());
            }
            for failure in &outcome.failed {
                eprintln!("FAIL {}", failure);
            }

            if outcome.failed.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Err(CliError::Format(ExpandError::Policy(format!("{} entries failed extraction", outcome.failed.len()))))
            }
        }
        Command::Create { .. } => Err(CliError::Format(ExpandError::Unsupported(
            "archive creation: this crate reads legacy containers, it does not write them",
        ))),
    }
}
