//! Client-certificate TLS for the binary gateway and the feedback service.
//!
//! The certificate file is a PEM holding the push certificate, its private
//! key (optionally encrypted) and any intermediates. It is loaded once; a
//! bad file is a configuration error raised before any connection attempt.

use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslConnector, SslMethod, SslStream};
use openssl::x509::X509;

use crate::config::ApnsCertificateSettings;
use crate::error::{DispatchError, Result};

/// Authenticated TLS connector for Apple's certificate-based services.
#[derive(Clone)]
pub struct GatewayTls {
    connector: SslConnector,
}

impl std::fmt::Debug for GatewayTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTls").finish_non_exhaustive()
    }
}

impl GatewayTls {
    /// Load the certificate bundle described by `settings`.
    pub fn from_settings(settings: &ApnsCertificateSettings) -> Result<Self> {
        let path = &settings.certificate_path;
        let invalid = |reason: String| DispatchError::InvalidCertificate {
            path: path.clone(),
            reason,
        };

        let pem = fs::read(path).map_err(|e| invalid(e.to_string()))?;
        if pem.iter().all(u8::is_ascii_whitespace) {
            return Err(invalid("file is empty".into()));
        }

        let mut certificates = X509::stack_from_pem(&pem)
            .map_err(|e| invalid(format!("no certificate: {e}")))?
            .into_iter();
        let leaf = certificates
            .next()
            .ok_or_else(|| invalid("no certificate in file".into()))?;
        let key = load_private_key(&pem, settings.passphrase.as_deref())
            .map_err(|e| invalid(format!("private key: {e}")))?;

        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| invalid(e.to_string()))?;
        builder
            .set_certificate(&leaf)
            .map_err(|e| invalid(e.to_string()))?;
        builder
            .set_private_key(&key)
            .map_err(|e| invalid(e.to_string()))?;
        builder
            .check_private_key()
            .map_err(|e| invalid(format!("key does not match certificate: {e}")))?;
        for intermediate in certificates {
            builder
                .add_extra_chain_cert(intermediate)
                .map_err(|e| invalid(e.to_string()))?;
        }

        log::debug!("[Apns] Loaded client certificate {}", path.display());

        Ok(Self {
            connector: builder.build(),
        })
    }

    /// Open an authenticated connection to `host:port`.
    ///
    /// `timeout` bounds the TCP connect and every later read and write.
    pub fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<SslStream<TcpStream>> {
        let gateway = format!("{host}:{port}");

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| DispatchError::gateway(&gateway, e))?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = e,
            }
        }
        let tcp = tcp.ok_or_else(|| DispatchError::gateway(&gateway, last_err))?;

        tcp.set_read_timeout(Some(timeout))
            .and_then(|()| tcp.set_write_timeout(Some(timeout)))
            .and_then(|()| tcp.set_nodelay(true))
            .map_err(|e| DispatchError::gateway(&gateway, e))?;

        let stream = self
            .connector
            .connect(host, tcp)
            .map_err(|e| DispatchError::gateway(&gateway, io::Error::other(e.to_string())))?;

        log::debug!("[Apns] Connected to {}", gateway);
        Ok(stream)
    }
}

fn load_private_key(pem: &[u8], passphrase: Option<&str>) -> std::result::Result<PKey<Private>, openssl::error::ErrorStack> {
    match passphrase {
        Some(passphrase) if !passphrase.is_empty() => {
            PKey::private_key_from_pem_passphrase(pem, passphrase.as_bytes())
        }
        _ => PKey::private_key_from_pem(pem),
    }
}
