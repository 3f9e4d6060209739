use std::sync::Arc;

use clap::Parser;

use code_judge::config::{CliArgs, Config};
use code_judge::judge::Judge;
use code_judge::sandbox::{ArtifactStore, create_launcher};
use code_judge::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        judge: judge_config,
        languages,
    } = cli.to_config().expect("Failed to load configuration");

    let store = ArtifactStore::open(judge_config.artifact_root())
        .expect("Failed to prepare artifact directories");
    let launcher = create_launcher(judge_config.launcher);
    let judge = Judge::new(&judge_config, languages, Arc::new(store), launcher);
    let language_names: Vec<&str> = judge.languages().iter().map(|l| l.name.as_str()).collect();
    log::info!("Supported languages: {}", language_names.join(", "));

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(server_config, judge.clone()).expect("Failed to build server");
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // 1. Shutdown actix-web server gracefully, letting in-flight jobs answer
    server_handle.stop(true).await;

    // 2. Remove artifacts whose cleanup delay has not elapsed yet
    let flushed = judge.cleanup().flush();
    log::info!("Flushed {flushed} pending artifact cleanups");

    log::info!("Shutdown complete");
    Ok(())
}
