mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "burrow", version, about = "Reverse TCP tunnel")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_subcommand() {
        let cli = Cli::try_parse_from(["burrow", "client", "--config", "/tmp/client.json"])
            .expect("client args should parse");

        match cli.command {
            Command::Client(args) => {
                assert_eq!(args.config.to_str(), Some("/tmp/client.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_server_subcommand() {
        let cli = Cli::try_parse_from([
            "burrow",
            "server",
            "--listen",
            "127.0.0.1:9000",
            "--public-host",
            "127.0.0.1",
        ])
        .expect("server args should parse");

        match cli.command {
            Command::Server(args) => {
                assert_eq!(args.listen, "127.0.0.1:9000");
                assert_eq!(args.public_host, "127.0.0.1");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = Cli::try_parse_from(["burrow", "--log-level", "loud", "version"])
            .expect_err("unknown level should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn parses_services_with_format() {
        let cli = Cli::try_parse_from([
            "burrow",
            "services",
            "--config",
            "client.json",
            "--format",
            "json",
        ])
        .expect("services args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.command, Command::Services(_)));
    }
}
