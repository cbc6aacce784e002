//! CLI Echo - streams words to stdout through the CLI transport.
//!
//! This demo shows:
//! - Defining a command with `FnCommand`
//! - Running it on the executor and copying its output into a CLI emitter
//! - Exiting with the code reported on close
//!
//! # Running
//!
//! ```text
//! cargo run --example cli_echo -- hello world
//! cargo run --example cli_echo -- --enc json hello world
//! cargo run --example cli_echo -- hello fail      # exits 1, "Error: ..." on stderr
//! RUST_LOG=cmdwire=debug cargo run --example cli_echo -- hello
//! ```

use cmdwire::cli::{self, Output};
use cmdwire::encoding::EncodingType;
use cmdwire::{copy, CommandError, Emitter, Executor, FnCommand, Request};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut req = Request::new(["echo"]);
    if args.first().map(String::as_str) == Some("--enc") && args.len() >= 2 {
        let encoding: EncodingType = args[1].parse()?;
        req = req.with_encoding(encoding);
        args.drain(..2);
    }

    let echo = FnCommand::new(move |_req: Request, emitter: Emitter<String>| {
        let words = args.clone();
        async move {
            for word in words {
                if word == "fail" {
                    return Err(CommandError::new("asked to fail"));
                }
                emitter
                    .emit(word)
                    .await
                    .map_err(|e| CommandError::new(e.to_string()))?;
            }
            Ok(())
        }
    });

    let (_cli, emitter, exit) =
        cli::response_emitter::<String>(Output::stdout(), Output::stderr(), None, &req);

    let executor = Executor::new();
    let response = executor.spawn(&echo, req).await;
    if let Err(err) = copy(&emitter, response).await {
        tracing::warn!("output interrupted: {}", err);
    }

    std::process::exit(exit.await.unwrap_or(cli::ERROR_EXIT_CODE));
}
