use std::sync::Arc;

use burrow_session::{ClientConfig, ClientEngine};
use tracing::info;

use crate::cmd::ClientArgs;
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ClientArgs) -> CliResult<i32> {
    let mut config = ClientConfig::from_file(&args.config)
        .map_err(|err| session_error("config load failed", err))?;
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    if args.require_all_services {
        config.require_all_services = true;
    }

    info!(
        config = %args.config.display(),
        server = %config.server_addr,
        services = config.service_list.len(),
        "starting client"
    );

    let engine =
        Arc::new(ClientEngine::new(config).map_err(|err| session_error("invalid config", err))?);
    install_ctrlc_handler(Arc::clone(&engine))?;

    engine
        .run()
        .map_err(|err| session_error("client failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(engine: Arc<ClientEngine>) -> CliResult<()> {
    ctrlc::set_handler(move || engine.shutdown())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
