// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk worker
//
// Entry point. Initialises logging and the worker services, then runs the
// image pipeline for every trigger event read from stdin (one JSON object
// per line) until end of input.

mod services;

use services::worker::Worker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Bildwerk starting");

    let worker = match Worker::init() {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(error = %e, "worker initialisation failed");
            std::process::exit(1);
        }
    };
    tracing::info!(data_dir = %worker.data_dir().display(), "reading triggers from stdin");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    match worker.process_stream(stdin).await {
        Ok(summary) => tracing::info!(
            finished = summary.finished,
            skipped = summary.skipped,
            malformed = summary.malformed,
            failed = summary.failed,
            "Bildwerk stopping"
        ),
        Err(e) => tracing::error!(error = %e, "trigger input closed with an error"),
    }
}
