//! HTTP Count - streams numbers over HTTP with the axum transport.
//!
//! This demo shows:
//! - Building an HTTP emitter per request
//! - Returning the response as soon as its head is decided
//! - Late errors arriving as an `X-Stream-Error` trailer
//!
//! # Running
//!
//! ```text
//! cargo run --example http_count
//! curl -i http://127.0.0.1:3000/count/5
//! curl -i http://127.0.0.1:3000/count/15      # fails after 10 values
//! curl -i http://127.0.0.1:3000/count/0       # 400 before any output
//! ```

use std::time::Duration;

use axum::extract::Path;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use cmdwire::http::{self, HttpOptions};
use cmdwire::{execute, CommandError, Emitter, FnCommand, Request};
use tracing_subscriber::EnvFilter;

const LIMIT: u64 = 10;

async fn count(Path(n): Path<u64>) -> Response {
    let req = Request::new(["count".to_string(), n.to_string()]);
    let (emitter, pending) = http::response_emitter::<u64>(&req, HttpOptions::default());

    let cmd = FnCommand::new(move |_req: Request, emitter: Emitter<u64>| async move {
        if n == 0 {
            return Err(CommandError::client("count must be positive"));
        }
        emitter.set_length(n).await;
        for i in 1..=n {
            if i > LIMIT {
                return Err(CommandError::new(format!("refusing to count past {}", LIMIT)));
            }
            emitter
                .emit(i)
                .await
                .map_err(|e| CommandError::new(e.to_string()))?;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    });

    tokio::spawn(async move {
        let _ = execute(&cmd, req, emitter).await;
    });

    pending.await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cmdwire=debug")),
        )
        .init();

    let app = Router::new().route("/count/{n}", get(count));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
