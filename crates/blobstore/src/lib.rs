//! Time-limited presigned URLs for direct-to-bucket document transfer.
//!
//! Signing follows the S3 SigV4 query-string scheme with an unsigned payload,
//! so no request body ever passes through this service. Everything here is
//! pure computation over an injected `now`; the caller validates nothing
//! beyond what [`validate_key`] enforces before any signing happens.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Required prefix for every document key.
pub const KEY_PREFIX: &str = "user/documents/";
/// Lifetime of generated URLs.
pub const PRESIGN_EXPIRES_SECS: u64 = 3600;
/// Advisory upload cap surfaced in the upload descriptor.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Credentials and bucket location for presigning.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Generator for presigned upload and download URLs.
#[derive(Clone)]
pub struct BlobStore {
    config: BlobStoreConfig,
}

/// Everything a client needs to upload a document directly to the bucket.
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUpload {
    pub url: String,
    pub method: &'static str,
    /// Headers the client must send verbatim; they are part of the signature.
    pub headers: Vec<(String, String)>,
    /// The service rejects larger documents at registration time; the bucket
    /// itself does not enforce this for PUT uploads.
    pub max_size: u64,
    pub expires_at: DateTime<Utc>,
}

impl BlobStore {
    pub fn new(config: BlobStoreConfig) -> Self {
        Self { config }
    }

    /// Presigns a PUT for the given key, optionally pinning the content type.
    pub fn presign_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PresignedUpload, PresignError> {
        validate_key(key)?;

        let mut headers = Vec::new();
        if let Some(content_type) = content_type {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }

        let url = self.sign("PUT", key, &headers, now)?;
        Ok(PresignedUpload {
            url: url.to_string(),
            method: "PUT",
            headers,
            max_size: MAX_UPLOAD_BYTES,
            expires_at: now + Duration::seconds(PRESIGN_EXPIRES_SECS as i64),
        })
    }

    /// Presigns a GET for the given key.
    pub fn presign_download(&self, key: &str, now: DateTime<Utc>) -> Result<Url, PresignError> {
        validate_key(key)?;
        self.sign("GET", key, &[], now)
    }

    fn host(&self) -> String {
        format!(
            "{}.s3.{}.amazonaws.com",
            self.config.bucket, self.config.region
        )
    }

    fn sign(
        &self,
        method: &str,
        key: &str,
        extra_headers: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<Url, PresignError> {
        let host = self.host();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/s3/aws4_request", self.config.region);
        let credential = format!("{}/{scope}", self.config.access_key_id);

        // Canonical headers: host plus any extra signed headers, sorted by name.
        let mut header_pairs: Vec<(String, String)> = extra_headers.to_vec();
        header_pairs.push(("host".to_string(), host.clone()));
        header_pairs.sort();
        let canonical_headers: String = header_pairs
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = header_pairs
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        // Canonical query, sorted by parameter name.
        let mut query: Vec<(&str, String)> = vec![
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            ("X-Amz-Credential", credential),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", PRESIGN_EXPIRES_SECS.to_string()),
            ("X-Amz-SignedHeaders", signed_headers.clone()),
        ];
        query.sort_by(|a, b| a.0.cmp(b.0));
        let canonical_query = query
            .iter()
            .map(|(name, value)| format!("{}={}", uri_encode(name, true), uri_encode(value, true)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_path = format!("/{}", uri_encode(key, false));
        let canonical_request = format!(
            "{method}\n{canonical_path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{UNSIGNED_PAYLOAD}"
        );

        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = hex::encode(self.signing_key(&date)?.sign(string_to_sign.as_bytes()));

        let mut url = Url::parse(&format!("https://{host}{canonical_path}"))
            .map_err(PresignError::Url)?;
        url.set_query(Some(&format!(
            "{canonical_query}&X-Amz-Signature={signature}"
        )));
        Ok(url)
    }

    fn signing_key(&self, date: &str) -> Result<SigningKey, PresignError> {
        let secret = format!("AWS4{}", self.config.secret_access_key);
        let date_key = hmac_digest(secret.as_bytes(), date.as_bytes())?;
        let region_key = hmac_digest(&date_key, self.config.region.as_bytes())?;
        let service_key = hmac_digest(&region_key, b"s3")?;
        let signing_key = hmac_digest(&service_key, b"aws4_request")?;
        Ok(SigningKey(signing_key))
    }
}

struct SigningKey(Vec<u8>);

impl SigningKey {
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        // The key is a fixed-length HMAC output, so construction cannot fail.
        hmac_digest(&self.0, data).unwrap_or_default()
    }
}

fn hmac_digest(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PresignError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| PresignError::Key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encodes per the SigV4 rules; `encode_slash` distinguishes query
/// values from object-key paths.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Rejects malformed document keys before any signing work.
pub fn validate_key(key: &str) -> Result<(), PresignError> {
    if !key.starts_with(KEY_PREFIX) || key.len() == KEY_PREFIX.len() {
        return Err(PresignError::InvalidKey(
            "key must name an object under user/documents/",
        ));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(PresignError::InvalidKey("key must not contain .. segments"));
    }
    Ok(())
}

/// Errors produced while presigning.
#[derive(Debug, Error)]
pub enum PresignError {
    #[error("invalid storage key: {0}")]
    InvalidKey(&'static str),
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid signing key material")]
    Key,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> BlobStore {
        BlobStore::new(BlobStoreConfig {
            bucket: "jobtrail-docs".to_string(),
            region: "ap-northeast-1".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
        })
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn download_url_carries_the_sigv4_query() {
        let url = store()
            .presign_download("user/documents/1/resume.pdf", fixed_now())
            .expect("presign");
        assert_eq!(
            url.host_str(),
            Some("jobtrail-docs.s3.ap-northeast-1.amazonaws.com")
        );
        assert_eq!(url.path(), "/user/documents/1/resume.pdf");

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        assert_eq!(get("X-Amz-Algorithm"), "AWS4-HMAC-SHA256");
        assert_eq!(get("X-Amz-Date"), "20240601T000000Z");
        assert_eq!(get("X-Amz-Expires"), "3600");
        assert_eq!(get("X-Amz-SignedHeaders"), "host");
        assert!(get("X-Amz-Credential").ends_with("/ap-northeast-1/s3/aws4_request"));
        let signature = get("X-Amz-Signature");
        assert_eq!(signature.len(), 64);
        assert!(signature.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_deterministic_and_key_sensitive() {
        let now = fixed_now();
        let a = store()
            .presign_download("user/documents/a.pdf", now)
            .expect("a");
        let same = store()
            .presign_download("user/documents/a.pdf", now)
            .expect("same");
        let b = store()
            .presign_download("user/documents/b.pdf", now)
            .expect("b");
        assert_eq!(a, same);
        assert_ne!(a.query(), b.query());
    }

    #[test]
    fn upload_descriptor_pins_the_content_type() {
        let upload = store()
            .presign_upload(
                "user/documents/1/resume.pdf",
                Some("application/pdf"),
                fixed_now(),
            )
            .expect("presign");
        assert_eq!(upload.method, "PUT");
        assert_eq!(upload.max_size, MAX_UPLOAD_BYTES);
        assert_eq!(
            upload.headers,
            vec![(
                "content-type".to_string(),
                "application/pdf".to_string()
            )]
        );
        assert!(upload.url.contains("X-Amz-SignedHeaders=content-type%3Bhost"));
        assert_eq!(
            upload.expires_at,
            fixed_now() + Duration::seconds(PRESIGN_EXPIRES_SECS as i64)
        );
    }

    #[test]
    fn malformed_keys_are_rejected_before_signing() {
        let store = store();
        let now = fixed_now();
        for key in ["", "user/documents/", "other/place/file.pdf", "user/documents/../../etc"] {
            let err = store.presign_download(key, now).expect_err("bad key");
            assert!(matches!(err, PresignError::InvalidKey(_)), "key: {key}");
        }
    }
}
