//! Webhook signature schemes, reproduced wire-exactly per provider.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Constant-time byte comparison. Signature checks must not leak the match
/// prefix length through timing.
#[must_use]
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// WhatsApp Cloud: `hex(HMAC-SHA256(app_secret, raw_body))`, delivered in the
/// `X-Hub-Signature-256` header with a `sha256=` prefix.
#[must_use]
pub fn whatsapp_signature(app_secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a WhatsApp `X-Hub-Signature-256` header value.
#[must_use]
pub fn verify_whatsapp_signature(app_secret: &str, raw_body: &[u8], header: &str) -> bool {
    let expected = whatsapp_signature(app_secret, raw_body);
    constant_time_eq(expected.as_bytes(), header.trim().as_bytes())
}

/// Twilio: `base64(HMAC-SHA1(auth_token, request_url + sorted form key||value
/// pairs))`, delivered in the `X-Twilio-Signature` header.
#[must_use]
pub fn twilio_signature(auth_token: &str, request_url: &str, form_pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = form_pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = String::from(request_url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a Twilio `X-Twilio-Signature` header value.
#[must_use]
pub fn verify_twilio_signature(
    auth_token: &str,
    request_url: &str,
    form_pairs: &[(String, String)],
    header: &str,
) -> bool {
    let expected = twilio_signature(auth_token, request_url, form_pairs);
    constant_time_eq(expected.as_bytes(), header.trim().as_bytes())
}

/// Email provider: `hex(HMAC-SHA256(signing_key, timestamp + "." + raw_body))`,
/// delivered in `X-Mailer-Signature` alongside `X-Mailer-Timestamp`.
#[must_use]
pub fn email_signature(signing_key: &str, timestamp: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify an email `X-Mailer-Signature` header value.
#[must_use]
pub fn verify_email_signature(
    signing_key: &str,
    timestamp: &str,
    raw_body: &[u8],
    header: &str,
) -> bool {
    let expected = email_signature(signing_key, timestamp, raw_body);
    constant_time_eq(expected.as_bytes(), header.trim().as_bytes())
}
