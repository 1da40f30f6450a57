mod debug_report;

use parley::Engine;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_USER: &str = "localuser";

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("PARLEY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let engine = Engine::new();
    for path in &config.corpus {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("error: failed to read {}: {err}", path.display());
                std::process::exit(1);
            }
        };
        if let Err(err) = engine.load_corpus(&text) {
            eprintln!("error: {}: {err}", path.display());
            std::process::exit(1);
        }
    }

    match engine.reply_verbose(&config.user, &config.input) {
        Ok(details) => debug_report::print_reply(&config.input, &details, config.color),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

struct CliConfig {
    input: String,
    corpus: Vec<PathBuf>,
    user: String,
    color: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut input: Option<String> = None;
    let mut corpus: Vec<PathBuf> = Vec::new();
    let mut user = DEFAULT_USER.to_string();
    let mut color = io::stdout().is_terminal();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("parley {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "--corpus" | "-c" => {
                let value = args.next().ok_or_else(|| "error: --corpus expects a path".to_string())?;
                corpus.push(PathBuf::from(value));
            }
            "--user" | "-u" => {
                user = args.next().ok_or_else(|| "error: --user expects a value".to_string())?;
            }
            "--" => {
                let rest = args.collect::<Vec<_>>().join(" ");
                if !rest.trim().is_empty() {
                    if input.is_some() {
                        return Err("error: input provided multiple times".to_string());
                    }
                    input = Some(rest);
                }
                break;
            }
            _ if arg.starts_with("--corpus=") => {
                corpus.push(PathBuf::from(arg.trim_start_matches("--corpus=")));
            }
            _ if arg.starts_with("--user=") => {
                user = arg.trim_start_matches("--user=").to_string();
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                let rest = std::iter::once(arg).chain(args).collect::<Vec<_>>().join(" ");
                input = Some(rest);
                break;
            }
        }
    }

    if corpus.is_empty() {
        return Err(format!("error: no corpus provided\n\n{}", help_text()));
    }

    let input = match input {
        Some(value) => value,
        None => read_stdin_input()?,
    };

    if input.trim().is_empty() {
        return Err(format!("error: no input provided\n\n{}", help_text()));
    }

    Ok(CliConfig { input: input.trim().to_string(), corpus, user, color })
}

fn read_stdin_input() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|err| format!("error: failed to read stdin: {err}"))?;
    Ok(buffer)
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "parley {version}

Rule-based reply engine debugging CLI.

Usage:
  parley --corpus <file> [OPTIONS] [--] <input...>

Options:
  -c, --corpus <file>        Corpus file to load. Repeat to load several, in order.
  -u, --user <id>            User id for the turn. Default: {default_user}
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

The input is read from the remaining arguments, or from stdin when none are
given. Set PARLEY_LOG (e.g. PARLEY_LOG=parley=debug) to see matching traces.

Only object macros with a registered backend can run; the CLI registers none,
so a reply that needs a <call> reports an error.

Exit codes:
  0  Success.
  1  Corpus or reply error.
  2  Invalid arguments or missing input.
",
        version = env!("CARGO_PKG_VERSION"),
        default_user = DEFAULT_USER
    )
}
