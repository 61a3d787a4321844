use std::sync::Arc;

use burrow_session::{ServerConfig, ServerEngine};

use crate::cmd::ServerArgs;
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServerArgs) -> CliResult<i32> {
    let config = ServerConfig {
        listen_addr: args.listen,
        public_host: args.public_host,
        ..ServerConfig::default()
    };

    let engine = Arc::new(ServerEngine::bind(config).map_err(|err| session_error("bind failed", err))?);
    install_ctrlc_handler(Arc::clone(&engine))?;

    engine
        .run()
        .map_err(|err| session_error("server failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(engine: Arc<ServerEngine>) -> CliResult<()> {
    ctrlc::set_handler(move || engine.shutdown())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
