// Garnet CLI - Command Line Interface
// Usage: garnet [OPTIONS] FILE [-- ARGS...]  or  garnet -e CODE [-- ARGS...]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::PathBuf;

use garnet_core::compiler::compile_source;
use garnet_core::{Config, Context, Error};

/// Garnet - an embeddable Ruby-flavoured interpreter
#[derive(Parser)]
#[command(name = "garnet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Garnet scripts", long_about = None)]
struct Cli {
    /// Script file to run
    #[arg(required_unless_present = "exec")]
    file: Option<PathBuf>,

    /// Execute inline code instead of a file
    #[arg(short = 'e', long = "exec", conflicts_with = "file")]
    exec: Option<String>,

    /// Arguments bound to ARGV (after `--`)
    #[arg(last = true)]
    args: Vec<String>,

    /// Print the compiled bytecode instead of running
    #[arg(long = "disassemble")]
    disassemble: bool,

    /// Check for syntax errors without running
    #[arg(long = "check")]
    check: bool,

    /// Print collector statistics after each collection
    #[arg(long = "gc-stats")]
    gc_stats: bool,

    /// Trace compile, run and teardown
    #[arg(long = "trace")]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let (source, file_name) = match (&cli.exec, &cli.file) {
        (Some(code), _) => (code.clone(), "-e".to_string()),
        (None, Some(path)) => {
            let source = fs::read_to_string(path)
                .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
            (source, path.to_string_lossy().to_string())
        }
        (None, None) => return Err("no script given (pass a FILE or -e CODE)".to_string()),
    };

    if cli.check || cli.disassemble {
        let function = compile_source(&source, &file_name)
            .map_err(|e| e.with_source(&source).format())?;
        if cli.disassemble {
            print!("{}", function.chunk.disassemble(&function.name));
        } else {
            println!("{} No errors found in {}", "✓".green(), file_name);
        }
        return Ok(());
    }

    let config = Config::new()
        .filename(file_name.clone())
        .trace(cli.trace)
        .gc_stats(cli.gc_stats);
    let ctx = Context::with_config(config).map_err(|e| e.to_string())?;

    let outcome = ctx.load_string(&source, cli.args);
    match outcome {
        Ok(_) => Ok(()),
        Err(Error::Compile { .. }) => {
            // Recompile for the diagnostic with source context
            match compile_source(&source, &file_name) {
                Err(e) => Err(e.with_source(&source).format()),
                Ok(_) => Err("compilation failed".to_string()),
            }
        }
        Err(Error::Runtime {
            class,
            message,
            backtrace,
        }) => Err(format_exception(&class, &message, &backtrace)),
        Err(other) => Err(other.to_string()),
    }
}

/// `origin: message (Class)` followed by the remaining frames
fn format_exception(class: &str, message: &str, backtrace: &[String]) -> String {
    let mut output = match backtrace.first() {
        Some(origin) => format!(
            "{}: {} ({})",
            origin,
            message.white().bold(),
            class.red().bold()
        ),
        None => format!("{} ({})", message.white().bold(), class.red().bold()),
    };
    for frame in backtrace.iter().skip(1) {
        output.push_str(&format!("\n\t{} {}", "from".dimmed(), frame));
    }
    output
}
