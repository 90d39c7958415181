mod events;
mod serve;
mod static_files;
mod tls_provisioner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commander = serve::register(
        clap::Command::new("siteforge")
            .about("HTTP/2 static-site server")
            .arg_required_else_help(true),
    );

    let matches = commander.get_matches();
    match matches.subcommand() {
        Some(("serve", arguments)) => serve::run(arguments).await?,
        _ => {}
    }

    Ok(())
}
