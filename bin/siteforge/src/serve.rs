//! The `serve` subcommand: loads configuration, provisions TLS material if
//! needed, wires the router, and runs the server until `Ctrl-C`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};

use siteforge_server::{load_or_provision, EventSource, Router, Server, ServerConfig, ShutdownHook};

use crate::tls_provisioner::OpenSslProvisioner;
use crate::{events, static_files};

/// Attaches the `serve` subcommand to `command`.
pub fn register(command: Command) -> Command {
    command.subcommand(
        Command::new("serve")
            .about("Serve a static site over HTTP/2")
            .arg(Arg::new("config").long("config").short('c').value_name("PATH").help("Path to a TOML config file"))
            .arg(
                Arg::new("dns-name")
                    .long("dns-name")
                    .value_name("NAME")
                    .action(clap::ArgAction::Append)
                    .help("DNS name or IP to provision a self-signed certificate for, if one is missing"),
            ),
    )
}

/// Runs the `serve` subcommand from parsed arguments.
pub async fn run(arguments: &ArgMatches) -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config_path: PathBuf =
        arguments.get_one::<String>("config").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("siteforge.toml"));
    let config = ServerConfig::from_path(&config_path)?;

    let dns_names: Vec<String> = arguments
        .get_many::<String>("dns-name")
        .map(|values| values.cloned().collect())
        .filter(|names: &Vec<String>| !names.is_empty())
        .unwrap_or_else(|| vec![config.bind_ip.to_string()]);

    let cert_base = config.tls_cert_path.with_extension("");
    load_or_provision(&cert_base, &dns_names, 397, &OpenSslProvisioner)?;

    let mut router = Router::new();
    let source = events::register(&mut router, &config);
    router.route("*", static_files::handler(config.static_root.clone()));

    let server = Server::new(config, router);
    server.on_shutdown(event_source_shutdown_hook(source));

    let listening = server.clone();
    let listen_task = tokio::spawn(async move { listening.listen().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");
    server.close().await.wait().await;

    listen_task.await??;
    Ok(())
}

fn event_source_shutdown_hook(source: Arc<EventSource>) -> ShutdownHook {
    Arc::new(move || {
        let source = source.clone();
        Box::pin(async move { source.close().await })
    })
}
