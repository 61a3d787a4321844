use std::io::IsTerminal;

use burrow_session::ServiceConfig;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ServiceOutput<'a> {
    name: &'a str,
    remote_port: u16,
    local_addr: &'a str,
}

#[derive(Serialize)]
struct ServicesOutput<'a> {
    server_addr: &'a str,
    services: Vec<ServiceOutput<'a>>,
}

pub fn print_services(server_addr: &str, services: &[ServiceConfig], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ServicesOutput {
                server_addr,
                services: services
                    .iter()
                    .map(|service| ServiceOutput {
                        name: &service.name,
                        remote_port: service.remote_port,
                        local_addr: &service.local_addr,
                    })
                    .collect(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVICE", "PUBLIC", "LOCAL"]);
            for service in services {
                table.add_row(vec![
                    service.name.clone(),
                    public_endpoint(server_addr, service.remote_port),
                    service.local_addr.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for service in services {
                println!(
                    "{} {} -> {}",
                    service.name,
                    public_endpoint(server_addr, service.remote_port),
                    service.local_addr
                );
            }
        }
    }
}

/// `host:port` of the public listener, using the host part of the server address.
fn public_endpoint(server_addr: &str, port: u16) -> String {
    let host = match server_addr.rsplit_once(':') {
        Some((host, _)) if !host.is_empty() => host,
        _ => server_addr,
    };
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_endpoint_swaps_port() {
        assert_eq!(public_endpoint("relay.example:8092", 8080), "relay.example:8080");
        assert_eq!(public_endpoint("[::1]:8092", 22), "[::1]:22");
        assert_eq!(public_endpoint("relay", 22), "relay:22");
    }
}
