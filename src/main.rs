use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use stackjs::ast::Script;
use stackjs::compiler::CompilerConfig;
use stackjs::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use stackjs::value::Value;
use stackjs::vm::VmConfig;
use stackjs::{Config, Engine, Error};

/// Compile and run syntax trees of a small JavaScript-like language
#[derive(Parser)]
#[command(name = "stackjs", version)]
struct Cli {
    /// More logging on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a program and run it
    Run(RunArgs),
    /// Print the bytecode of every function in a program
    Dump {
        /// JSON syntax tree of the program
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON syntax tree of the program
    path: PathBuf,

    /// Object heap size in words
    #[arg(long, default_value_t = VmConfig::default().heap_words)]
    heap_words: usize,

    /// Operand stack limit in words
    #[arg(long, default_value_t = VmConfig::default().max_stack_words)]
    max_stack: usize,

    /// Reject a second `var` of the same name in one function
    #[arg(long)]
    strict: bool,

    /// How errors are reported on stderr
    #[arg(long, value_enum, default_value_t = Format::Ansi)]
    format: Format,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Ansi,
    Json,
}

impl RunArgs {
    fn config(&self) -> Config {
        Config {
            compiler: CompilerConfig { strict_declarations: self.strict },
            vm: VmConfig { heap_words: self.heap_words, max_stack_words: self.max_stack, ..VmConfig::default() },
        }
    }
}

fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_script(path: &Path) -> Result<Script, Error> {
    let source = std::fs::read_to_string(path)
        .map_err(|source| Error::Io { path: path.display().to_string(), source })?;
    Ok(Script::from_json(&source)?)
}

fn run(args: &RunArgs) -> Result<Value, Error> {
    let script = read_script(&args.path)?;
    let mut engine = Engine::new(args.config(), std::io::stdout());
    engine.eval(&script)
}

fn dump(path: &Path) -> Result<String, Error> {
    let script = read_script(path)?;
    let mut engine = Engine::new(Config::default(), std::io::stdout());
    Ok(engine.dump(&script)?)
}

fn report(err: &Error, path: &Path, format: Format) {
    let d = Diagnostic::from(err).with_source(path.display().to_string());
    let rendered = match format {
        Format::Ansi => AnsiRenderer { use_color: std::io::stderr().is_terminal() }.render(&d),
        Format::Json => format!("{}\n", json::render(&d)),
    };
    eprint!("{}", rendered);
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(match cli.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    });

    match &cli.command {
        Command::Run(args) => match run(args) {
            Ok(Value::Undefined) => ExitCode::SUCCESS,
            Ok(value) => {
                println!("{}", value);
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&e, &args.path, args.format);
                ExitCode::FAILURE
            }
        },
        Command::Dump { path } => match dump(path) {
            Ok(listing) => {
                print!("{}", listing);
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&e, path, Format::Ansi);
                ExitCode::FAILURE
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::parse_from(["stackjs", "run", "prog.json"]);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.config(), Config::default());
        assert!(args.format == Format::Ansi);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn run_flags_reach_the_config() {
        let cli = Cli::parse_from([
            "stackjs", "-vv", "run", "prog.json", "--heap-words", "64", "--max-stack", "512", "--strict", "--format", "json",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let config = args.config();
        assert_eq!(config.vm.heap_words, 64);
        assert_eq!(config.vm.max_stack_words, 512);
        assert!(config.compiler.strict_declarations);
        assert!(args.format == Format::Json);
    }

    #[test]
    fn dump_takes_a_path() {
        let cli = Cli::parse_from(["stackjs", "dump", "prog.json"]);
        assert!(matches!(cli.command, Command::Dump { ref path } if path == Path::new("prog.json")));
    }
}
