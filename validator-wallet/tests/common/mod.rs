//! Shared fixtures: a throwaway PKI and an in-process remote signer.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use tempfile::TempDir;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_rustls::TlsAcceptor;
use validator_wallet::{
    remote::protocol::{self, Request, Response},
    KdfParams, PublicKey, RemoteIdentity, WalletOptions,
};

/// Options with a cheap KDF so tests do not spend seconds in Argon2.
pub fn fast_options() -> WalletOptions {
    WalletOptions::default().with_kdf(KdfParams::new(8, 1, 1))
}

/// Deterministic signer key for tests.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

// ============================================================================
// PKI
// ============================================================================

/// CA, server and client certificates written to a temporary directory.
pub struct TestPki {
    pub dir: TempDir,
    ca_cert: Certificate,
    ca_key: KeyPair,
    server_cert: Certificate,
    server_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "validator-wallet test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        std::fs::write(dir.path().join("ca.pem"), ca_cert.pem()).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                .unwrap();
        server_params
            .distinguished_name
            .push(DnType::CommonName, "remote signer");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        let pki = Self {
            dir,
            ca_cert,
            ca_key,
            server_cert,
            server_key,
        };
        pki.issue_client("client", false);
        pki.issue_client("expired", true);
        pki
    }

    /// Write `<name>.pem` and `<name>.key`, signed by the CA.
    pub fn issue_client(&self, name: &str, expired: bool) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, format!("validator client {}", name));
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        if expired {
            params.not_before = rcgen::date_time_ymd(2000, 1, 1);
            params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        }
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();

        std::fs::write(self.path(&format!("{}.pem", name)), cert.pem()).unwrap();
        std::fs::write(self.path(&format!("{}.key", name)), key.serialize_pem()).unwrap();
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }

    /// Identity for the valid client certificate.
    pub fn identity(&self, address: SocketAddr) -> RemoteIdentity {
        self.identity_for("client", address)
    }

    pub fn identity_for(&self, client: &str, address: SocketAddr) -> RemoteIdentity {
        RemoteIdentity::new(
            address.to_string(),
            self.path(&format!("{}.pem", client)),
            self.path(&format!("{}.key", client)),
            self.path("ca.pem"),
        )
        .with_server_name("localhost")
    }

    fn server_config(&self) -> ServerConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert.der().clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .unwrap();

        let chain: Vec<CertificateDer<'static>> = vec![self.server_cert.der().clone()];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.serialize_der()));

        ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .unwrap()
    }
}

// ============================================================================
// Remote signer
// ============================================================================

/// How the test signer answers sign requests.
#[derive(Debug, Clone, Default)]
pub struct SignerBehavior {
    /// Sleep before answering each sign request
    pub delay: Duration,
    /// Answer every sign request with `Rejected`
    pub reject: Option<String>,
    /// Sign with a key other than the one requested
    pub wrong_key: bool,
    /// Close the connection instead of answering the first N sign requests
    pub drop_first: usize,
}

/// Timing of one answered sign request.
#[derive(Debug, Clone, Copy)]
pub struct SignRecord {
    pub public_key: PublicKey,
    pub started: Instant,
    pub finished: Instant,
}

struct SignerState {
    keys: HashMap<PublicKey, SigningKey>,
    order: Vec<PublicKey>,
    behavior: SignerBehavior,
    drops_left: AtomicUsize,
    request_ids: Mutex<Vec<u64>>,
    records: Mutex<Vec<SignRecord>>,
    connections: AtomicUsize,
}

/// A mutual-TLS signer on 127.0.0.1 holding a fixed set of keys.
pub struct TestSigner {
    pub address: SocketAddr,
    state: Arc<SignerState>,
    task: JoinHandle<()>,
}

impl TestSigner {
    pub async fn start(pki: &TestPki, keys: Vec<SigningKey>, behavior: SignerBehavior) -> Self {
        let order: Vec<PublicKey> = keys.iter().map(PublicKey::from).collect();
        let state = Arc::new(SignerState {
            keys: order.iter().copied().zip(keys).collect(),
            order,
            drops_left: AtomicUsize::new(behavior.drop_first),
            behavior,
            request_ids: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });

        let acceptor = TlsAcceptor::from(Arc::new(pki.server_config()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let Ok(mut stream) = acceptor.accept(tcp).await else {
                        return;
                    };
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    while let Ok(request) = protocol::read_frame::<_, Request>(&mut stream).await {
                        let Some(response) = state.answer(request).await else {
                            return;
                        };
                        if protocol::write_frame(&mut stream, &response).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            address,
            state,
            task,
        }
    }

    /// Public keys in the order they were given.
    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.state.order.clone()
    }

    /// Request ids of every sign request received, including dropped ones.
    pub fn request_ids(&self) -> Vec<u64> {
        self.state.request_ids.lock().clone()
    }

    pub fn records(&self) -> Vec<SignRecord> {
        self.state.records.lock().clone()
    }

    /// TLS sessions accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for TestSigner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SignerState {
    /// `None` closes the connection without answering.
    async fn answer(&self, request: Request) -> Option<Response> {
        let (public_key, signing_root, request_id) = match request {
            Request::Ping => return Some(Response::Pong),
            Request::ListPublicKeys => return Some(Response::PublicKeys(self.order.clone())),
            Request::Sign {
                public_key,
                signing_root,
                request_id,
            } => (public_key, signing_root, request_id),
        };

        self.request_ids.lock().push(request_id);
        let dropped = self
            .drops_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if dropped {
            return None;
        }

        let started = Instant::now();
        tokio::time::sleep(self.behavior.delay).await;

        let response = if let Some(reason) = &self.behavior.reject {
            Response::Rejected {
                reason: reason.clone(),
                request_id,
            }
        } else {
            match self.keys.get(&public_key) {
                Some(key) => {
                    let key = if self.behavior.wrong_key {
                        signing_key(0xee)
                    } else {
                        key.clone()
                    };
                    Response::Signature {
                        signature: key.sign(signing_root.as_bytes()).to_bytes().to_vec(),
                        request_id,
                    }
                }
                None => Response::Rejected {
                    reason: "unknown key".to_string(),
                    request_id,
                },
            }
        };

        self.records.lock().push(SignRecord {
            public_key,
            started,
            finished: Instant::now(),
        });
        Some(response)
    }
}

/// An address with nothing listening on it.
pub async fn unused_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
