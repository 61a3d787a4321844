use burrow_session::ClientConfig;

use crate::cmd::ServicesArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_services, OutputFormat};

pub fn run(args: ServicesArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ClientConfig::from_file(&args.config)
        .map_err(|err| session_error("config load failed", err))?;
    print_services(&config.server_addr, &config.service_list, format);
    Ok(SUCCESS)
}
