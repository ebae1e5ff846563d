mod agent;
mod app;
mod backup;
mod cli;
mod commands;
mod config;
mod logging;
mod model_manager;
mod orchestrator;
mod runtime;
mod safety;
mod session;
mod tools;

#[cfg(test)]
mod tests;

use crate::agent::SystemContext;
use crate::cli::Args;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::setup(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("natshell: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config_path = config::config_path(args.config.as_deref());
    let mut config = config::load(&config_path)?;

    // CLI flags override the config document.
    if let Some(model) = &args.model {
        config.model.path = model.display().to_string();
        config.engine.preferred = config::EnginePreference::Local;
    }
    if let Some(remote) = &args.remote {
        config.remote.url = Some(normalize_url(remote));
        config.engine.preferred = config::EnginePreference::Remote;
    }
    if let Some(remote_model) = &args.remote_model {
        config.remote.model = remote_model.clone();
    }
    if args.local {
        config.engine.preferred = config::EnginePreference::Local;
        config.remote.url = None;
    }

    if args.download {
        let path = model_manager::download_model(&config.model).await?;
        println!("Model ready at: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if args.mcp {
        eprintln!(
            "The JSON-RPC tool server is provided by the natshell-mcp front-end; \
             install it and run natshell-mcp instead."
        );
        return Ok(ExitCode::from(1));
    }

    let context = SystemContext::minimal();
    let orchestrator = Orchestrator::build(
        config,
        config_path,
        runtime::discover(),
        None,
        context,
    )
    .await?;

    if let Some(prompt) = &args.headless {
        let code = app::headless::run(orchestrator, prompt, args.danger_fast).await;
        return Ok(ExitCode::from(code));
    }

    app::terminal::run(orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}
