//! Appforge server binary.
//!
//! Wires the Docker sandbox, the model gateway, and the template store
//! into the session engine and serves the SSE endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use appforge_core::{
    Collaborators, DirTemplateProvider, DockerSandbox, HttpLLMGateway, RetryPolicy, SandboxPool,
    SystemClock,
};
use appforge_server::{shutdown_signal, AppServer, ServerConfig};
use clap::Parser;
use log::LevelFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Appforge server - stream AI app generation sessions")]
struct Cli {
    #[clap(long, default_value = "127.0.0.1:3000")]
    bind_addr: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Base URL of the model proposal endpoint")]
    llm_endpoint: String,

    #[clap(long, default_value = "120", help = "Model request timeout in seconds")]
    llm_timeout_secs: u64,

    #[clap(long, default_value = "templates", help = "Directory of scaffold templates")]
    template_dir: String,

    #[clap(long, default_value = "trpc", help = "Template used when none is requested")]
    default_template: String,

    #[clap(long, default_value = "oven/bun:1.2.5-alpine", help = "Sandbox container image")]
    sandbox_image: String,

    #[clap(long, default_value = "4", help = "Concurrent sandbox validation slots")]
    sandbox_slots: usize,

    #[clap(long, help = "Disable CORS")]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let sandbox = DockerSandbox::new(cli.sandbox_image.clone())?;
    let collaborators = Collaborators {
        gateway: Arc::new(HttpLLMGateway::new(
            cli.llm_endpoint.clone(),
            Duration::from_secs(cli.llm_timeout_secs),
        )),
        sandbox: Arc::new(sandbox),
        templates: Arc::new(DirTemplateProvider::new(
            cli.template_dir.clone(),
            cli.default_template.clone(),
        )),
        pool: SandboxPool::new(cli.sandbox_slots),
        clock: Arc::new(SystemClock),
        retry_policy: RetryPolicy::default(),
    };

    let config = ServerConfig::new()
        .with_bind_addr_str(&cli.bind_addr)?
        .with_cors(!cli.no_cors);

    log::info!(
        "Starting appforge server: model endpoint {}, {} sandbox slots",
        cli.llm_endpoint,
        cli.sandbox_slots
    );

    let server = AppServer::with_config(collaborators, config);
    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(())
}
