//! A [`CertificateProvisioner`] that shells out to the system `openssl`
//! binary to mint a self-signed certificate. The core server crate never
//! invokes `openssl` itself — this is exactly the narrow external
//! collaborator the core expects to be handed.

use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

use siteforge_server::CertificateProvisioner;

/// Generates a self-signed certificate/key pair via `openssl req -x509`,
/// dropping a matching OpenSSL config (for the subject-alternative-name
/// extension) alongside it.
pub struct OpenSslProvisioner;

impl CertificateProvisioner for OpenSslProvisioner {
    fn provision(&self, path: &Path, dns_names: &[String], days: u32) -> Result<(), anyhow::Error> {
        let cert_path = path.with_extension("crt");
        let key_path = path.with_extension("key");
        let config_path = path.with_extension("cnf");

        std::fs::write(&config_path, render_config(dns_names))?;

        let output = Command::new("openssl")
            .args([
                "req",
                "-x509",
                "-nodes",
                "-newkey",
                "rsa:2048",
                "-keyout",
            ])
            .arg(&key_path)
            .arg("-out")
            .arg(&cert_path)
            .arg("-days")
            .arg(days.to_string())
            .arg("-config")
            .arg(&config_path)
            .output()?;

        if !output.status.success() {
            anyhow::bail!("openssl exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr));
        }

        tracing::info!(cert = %cert_path.display(), key = %key_path.display(), "provisioned self-signed certificate");
        Ok(())
    }
}

fn render_config(dns_names: &[String]) -> String {
    let mut alt_names = String::new();
    for (index, name) in dns_names.iter().enumerate() {
        let field = if name.parse::<std::net::IpAddr>().is_ok() { "IP" } else { "DNS" };
        let _ = writeln!(alt_names, "{field}.{} = {name}", index + 1);
    }

    format!(
        "[req]\n\
         distinguished_name = req_distinguished_name\n\
         x509_extensions = v3_req\n\
         prompt = no\n\
         \n\
         [req_distinguished_name]\n\
         CN = {common_name}\n\
         \n\
         [v3_req]\n\
         subjectAltName = @alt_names\n\
         \n\
         [alt_names]\n\
         {alt_names}",
        common_name = dns_names.first().map(String::as_str).unwrap_or("localhost"),
    )
}
