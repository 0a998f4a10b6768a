use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use pgwire::tokio::TlsAcceptor;

pub const CERT_VAR: &str = "RENTWISE_TLS_CERT";
pub const KEY_VAR: &str = "RENTWISE_TLS_KEY";

/// PEM locations for the server certificate chain and its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// `Ok(None)` when TLS is off. Setting only one of the two is an error.
    pub fn resolve(cert: Option<&str>, key: Option<&str>) -> io::Result<Option<Self>> {
        match (cert, key) {
            (None, None) => Ok(None),
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert: cert.into(),
                key: key.into(),
            })),
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("both {CERT_VAR} and {KEY_VAR} must be set, or neither"),
            )),
        }
    }

    pub fn from_env() -> io::Result<Option<Self>> {
        let cert = std::env::var(CERT_VAR).ok();
        let key = std::env::var(KEY_VAR).ok();
        Self::resolve(cert.as_deref(), key.as_deref())
    }

    pub fn acceptor(&self) -> io::Result<TlsAcceptor> {
        let certs = read_certs(&self.cert)?;
        let key = read_key(&self.key)?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn read_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {}", path.display()),
        ));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("no private key found in {}", path.display()),
        )
    })
}

/// Acceptor for the configured files, if any.
pub fn load_tls_acceptor(files: Option<&TlsFiles>) -> io::Result<Option<TlsAcceptor>> {
    files.map(TlsFiles::acceptor).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neither_path_disables_tls() {
        assert_eq!(TlsFiles::resolve(None, None).unwrap(), None);
        assert!(matches!(load_tls_acceptor(None), Ok(None)));
    }

    #[test]
    fn half_configured_is_rejected() {
        let err = TlsFiles::resolve(Some("cert.pem"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = TlsFiles::resolve(None, Some("key.pem")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_cert_file_fails_to_load() {
        let files = TlsFiles::resolve(
            Some("/nonexistent/rentwise/cert.pem"),
            Some("/nonexistent/rentwise/key.pem"),
        )
        .unwrap()
        .unwrap();
        match load_tls_acceptor(Some(&files)) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
            Ok(_) => panic!("missing files must not load"),
        }
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let dir = std::env::temp_dir().join(format!("rentwise_tls_{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.pem");
        std::fs::write(&path, "").unwrap();

        let err = read_certs(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(read_key(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
