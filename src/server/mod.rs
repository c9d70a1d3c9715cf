//! Key server client: registration of the envelope-wrapped key at init
//! and OTP-authenticated key release at open.
//!
//! Both operations speak JSON over TLS; plaintext `http://` URLs are
//! rejected before any request leaves the process.  Transport-level
//! failures get exactly one transparent retry; authentication failures
//! get none, and nothing is cached.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{Result, RvaultError};

#[derive(Serialize)]
struct RegisterRequest<'a> {
    uid: String,
    auth_params: AuthParams<'a>,
    wrapped_key: String,
}

#[derive(Serialize)]
struct AuthParams<'a> {
    method: &'a str,
}

#[derive(Serialize)]
struct FetchRequest<'a> {
    uid: String,
    totp: &'a str,
}

#[derive(Deserialize)]
struct FetchResponse {
    wrapped_key: String,
}

/// Register a vault with the server: POST the UID, the authentication
/// parameters and the envelope-wrapped key.  The server stores them;
/// any rejection fails vault initialization.
pub fn register(server_url: &str, uid: &Uuid, wrapped_key: &[u8]) -> Result<()> {
    let url = endpoint(server_url, "register")?;
    let body = RegisterRequest {
        uid: uid.to_string(),
        auth_params: AuthParams { method: "totp" },
        wrapped_key: BASE64.encode(wrapped_key),
    };
    debug!(uid = %uid, "registering vault with key server");
    post_json(&url, &body)?;
    Ok(())
}

/// Present the UID and a TOTP token; on success the server releases
/// the envelope-wrapped key.
pub fn fetch(server_url: &str, uid: &Uuid, totp: &str) -> Result<Vec<u8>> {
    let url = endpoint(server_url, "fetch")?;
    let body = FetchRequest {
        uid: uid.to_string(),
        totp,
    };
    debug!(uid = %uid, "fetching wrapped key from key server");
    let resp: FetchResponse = post_json(&url, &body)?
        .into_json()
        .map_err(|e| RvaultError::Network(format!("malformed server response: {e}")))?;
    BASE64
        .decode(&resp.wrapped_key)
        .map_err(|e| RvaultError::Network(format!("malformed wrapped key: {e}")))
}

/// Build the endpoint URL, enforcing the TLS-only policy.
fn endpoint(server_url: &str, op: &str) -> Result<String> {
    if !server_url.to_ascii_lowercase().starts_with("https://") {
        return Err(RvaultError::BadArgument(
            "key server URL must use https".into(),
        ));
    }
    Ok(format!("{}/{op}", server_url.trim_end_matches('/')))
}

/// POST a JSON body with at most one retry on transport errors.
fn post_json<T: Serialize>(url: &str, body: &T) -> Result<ureq::Response> {
    match do_post(url, body) {
        Err(ureq::Error::Transport(t)) => {
            warn!("transport error talking to key server, retrying once: {t}");
            do_post(url, body).map_err(map_ureq_err)
        }
        other => other.map_err(map_ureq_err),
    }
}

fn do_post<T: Serialize>(url: &str, body: &T) -> std::result::Result<ureq::Response, ureq::Error> {
    ureq::post(url)
        .set(
            "User-Agent",
            concat!("rvault/", env!("CARGO_PKG_VERSION")),
        )
        .send_json(body)
}

fn map_ureq_err(err: ureq::Error) -> RvaultError {
    match err {
        ureq::Error::Status(code, _) if (400..500).contains(&code) => {
            RvaultError::AuthFailed(format!("server returned status {code}"))
        }
        ureq::Error::Status(code, _) => {
            RvaultError::Network(format!("server returned status {code}"))
        }
        ureq::Error::Transport(t) => RvaultError::Network(t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_http_is_rejected() {
        let uid = Uuid::nil();
        assert!(matches!(
            register("http://api.example.org", &uid, b"ks"),
            Err(RvaultError::BadArgument(_))
        ));
        assert!(matches!(
            fetch("http://api.example.org", &uid, "000000"),
            Err(RvaultError::BadArgument(_))
        ));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("https://api.example.org/", "fetch").unwrap(),
            "https://api.example.org/fetch"
        );
        assert_eq!(
            endpoint("https://api.example.org", "register").unwrap(),
            "https://api.example.org/register"
        );
    }

    #[test]
    fn register_request_matches_wire_contract() {
        let body = RegisterRequest {
            uid: Uuid::nil().to_string(),
            auth_params: AuthParams { method: "totp" },
            wrapped_key: BASE64.encode(b"ks"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["uid"].as_str().unwrap(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(json["auth_params"]["method"], "totp");
        assert_eq!(json["wrapped_key"], BASE64.encode(b"ks"));
    }

    #[test]
    fn fetch_response_parses_wire_contract() {
        let resp: FetchResponse =
            serde_json::from_str(r#"{"wrapped_key": "a3M="}"#).unwrap();
        assert_eq!(BASE64.decode(resp.wrapped_key).unwrap(), b"ks");
    }
}
