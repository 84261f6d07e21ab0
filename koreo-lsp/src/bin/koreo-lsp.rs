use koreo_lsp::check::{run_check, CheckOptions};
use koreo_lsp::KoreoLanguageServer;
use std::env;
use std::process::ExitCode;
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().collect();

    // If called with "check" subcommand, handle it and exit
    if args.len() >= 2 && args[1] == "check" {
        return handle_check(&args[2..]);
    }
    if args.len() >= 2 && args[1] == "--version" {
        println!("koreo-lsp {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Default: run as LSP server
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting koreo-lsp");
    let stdin = stdin();
    let stdout = stdout();
    let (service, socket) = LspService::new(KoreoLanguageServer::new);
    Server::new(stdin, stdout, socket).serve(service).await;
    ExitCode::SUCCESS
}

// stdout carries the LSP stream, so logs always go to stderr.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("KOREO_LOG")
                .unwrap_or_else(|_| "koreo_lsp=info,koreo_analysis=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .init();
}

fn handle_check(args: &[String]) -> ExitCode {
    let options = match CheckOptions::parse(args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Usage: koreo-lsp check [--fail-on-warning] [PATH...]");
            return ExitCode::from(2);
        }
    };

    let report = match run_check(&options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    for line in &report.lines {
        println!("{line}");
    }
    eprintln!("{}", report.summary());

    if report.failed(options.fail_on_warning) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
