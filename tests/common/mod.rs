#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use oidc_jwt_verify::encode_base64url;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha2::Sha256;
use signature::{SignatureEncoding, Signer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A loopback HTTP server that answers every request with the same
/// response and counts the requests it saw.
pub struct TestServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.base_url)
    }
}

/// Serve `body` as a 200 JSON response for every request.
pub async fn serve_json(body: String) -> TestServer {
    serve_response(
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ),
        Duration::ZERO,
    )
    .await
}

/// Serve `body` after a fixed delay, to hold a fetch in flight.
pub async fn serve_json_delayed(body: String, delay: Duration) -> TestServer {
    serve_response(
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ),
        delay,
    )
    .await
}

/// Serve a fixed non-200 status for every request.
pub async fn serve_status(status: &str, body: &str) -> TestServer {
    serve_response(
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
        Duration::ZERO,
    )
    .await
}

/// Accept connections but never answer them (for timeout behavior).
pub async fn serve_silence() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let task_hits = hits.clone();

    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            task_hits.fetch_add(1, Ordering::SeqCst);
            open.push(stream);
        }
    });

    TestServer {
        base_url: format!("http://{addr}"),
        hits,
    }
}

async fn serve_response(response: String, delay: Duration) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let task_hits = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            task_hits.fetch_add(1, Ordering::SeqCst);
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) => return,
                        Ok(read) if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") => break,
                        Ok(_) => {}
                        Err(_) => return,
                    }
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    TestServer {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// One process-wide RSA key; 2048-bit generation is slow enough to share.
pub fn rsa_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("rsa private key")
    })
}

pub fn rsa_jwk(kid: &str) -> Value {
    let public_key = RsaPublicKey::from(rsa_private_key());
    json!({
        "kty": "RSA",
        "kid": kid,
        "use": "sig",
        "alg": "RS256",
        "n": encode_base64url(public_key.n().to_bytes_be()),
        "e": encode_base64url(public_key.e().to_bytes_be()),
    })
}

pub fn rsa_jwks_body(kids: &[&str]) -> String {
    let keys: Vec<Value> = kids.iter().map(|kid| rsa_jwk(kid)).collect();
    json!({ "keys": keys }).to_string()
}

/// Sign `payload` as an RS256 token under the shared RSA key.
pub fn sign_rs256(kid: Option<&str>, payload: &Value) -> String {
    let mut header = json!({ "alg": "RS256", "typ": "JWT" });
    if let Some(kid) = kid {
        header["kid"] = json!(kid);
    }
    let signing_input = format!(
        "{}.{}",
        encode_base64url(serde_json::to_vec(&header).expect("header json")),
        encode_base64url(serde_json::to_vec(payload).expect("payload json")),
    );
    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(rsa_private_key().clone());
    let signature = signer.sign(signing_input.as_bytes());
    format!("{signing_input}.{}", encode_base64url(signature.to_bytes()))
}

pub fn now_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs()
}
