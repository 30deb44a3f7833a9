//! Azure Blob Storage record store (REST, Shared Key authorization).
//!
//! Each record is a block blob named after its date key inside one container.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::core::types::PromotionRecord;
use crate::io::record_codec::{decode_record, encode_record};
use crate::io::secrets::SecretProvider;
use crate::io::store::RecordStore;

pub const BLOB_API_VERSION: &str = "2021-08-06";
const BLOB_ENDPOINT: &str = "https://{account}.blob.core.windows.net";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Request fields covered by the Shared Key signature.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub verb: &'static str,
    pub content_length: usize,
    pub content_type: Option<&'static str>,
    /// `x-ms-*` headers, lowercase names.
    pub ms_headers: BTreeMap<&'static str, String>,
    /// `/<account>/<container>/<blob>`
    pub resource: String,
}

impl CanonicalRequest {
    /// Shared Key string-to-sign for service version 2015-02-21 and later.
    pub fn string_to_sign(&self) -> String {
        let content_length = if self.content_length == 0 {
            String::new()
        } else {
            self.content_length.to_string()
        };
        let mut buf = String::new();
        buf.push_str(self.verb);
        buf.push('\n');
        // Content-Encoding, Content-Language
        buf.push_str("\n\n");
        buf.push_str(&content_length);
        buf.push('\n');
        // Content-MD5
        buf.push('\n');
        buf.push_str(self.content_type.unwrap_or(""));
        buf.push('\n');
        // Date, If-Modified-Since, If-Match, If-None-Match, If-Unmodified-Since, Range
        buf.push_str("\n\n\n\n\n\n");
        for (name, value) in &self.ms_headers {
            buf.push_str(name);
            buf.push(':');
            buf.push_str(value.trim());
            buf.push('\n');
        }
        buf.push_str(&self.resource);
        buf
    }
}

/// Base64 HMAC-SHA256 of `string_to_sign` under the base64 account key.
pub fn sign(account_key: &str, string_to_sign: &str) -> Result<String> {
    let key = STANDARD
        .decode(account_key.trim())
        .context("decode storage account key")?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key).map_err(|err| anyhow!("invalid hmac key: {err}"))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct BlobRecordStore<P> {
    http: Client,
    account: String,
    container: String,
    endpoint: String,
    account_key: P,
}

impl<P: SecretProvider> BlobRecordStore<P> {
    pub fn new(account: &str, container: &str, account_key: P, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build blob http client")?;
        Ok(Self {
            http,
            account: account.to_string(),
            container: container.to_string(),
            endpoint: BLOB_ENDPOINT.replace("{account}", account),
            account_key,
        })
    }

    /// Point the store at a different service endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn blob_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, key)
    }

    fn signed(
        &self,
        builder: RequestBuilder,
        mut canonical: CanonicalRequest,
    ) -> Result<RequestBuilder> {
        canonical.ms_headers.insert(
            "x-ms-date",
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        canonical
            .ms_headers
            .insert("x-ms-version", BLOB_API_VERSION.to_string());
        let signature = sign(&self.account_key.secret()?, &canonical.string_to_sign())?;

        let mut builder =
            builder.header(AUTHORIZATION, format!("SharedKey {}:{}", self.account, signature));
        for (name, value) in canonical.ms_headers {
            builder = builder.header(name, value);
        }
        if let Some(content_type) = canonical.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        Ok(builder)
    }

    fn resource(&self, key: &str) -> String {
        format!("/{}/{}/{}", self.account, self.container, key)
    }
}

impl<P: SecretProvider> RecordStore for BlobRecordStore<P> {
    #[instrument(skip_all, fields(container = %self.container, blob = key))]
    fn load(&self, key: &str) -> Result<Option<PromotionRecord>> {
        let request = self.signed(
            self.http.get(self.blob_url(key)),
            CanonicalRequest {
                verb: "GET",
                content_length: 0,
                content_type: None,
                ms_headers: BTreeMap::new(),
                resource: self.resource(key),
            },
        )?;
        let response = request.send().with_context(|| format!("get blob {key}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("blob not found");
            return Ok(None);
        }
        let body = response
            .text()
            .with_context(|| format!("read blob {key}"))?;
        if !status.is_success() {
            bail!("get blob {} returned {}: {}", key, status, body);
        }
        let record = decode_record(&body).with_context(|| format!("decode blob {key}"))?;
        debug!(state = %record.state, "blob loaded");
        Ok(Some(record))
    }

    #[instrument(skip_all, fields(container = %self.container, blob = key))]
    fn save(&self, key: &str, record: &PromotionRecord) -> Result<()> {
        let body = encode_record(record)?;
        let mut ms_headers = BTreeMap::new();
        ms_headers.insert("x-ms-blob-type", "BlockBlob".to_string());
        let request = self.signed(
            self.http.put(self.blob_url(key)),
            CanonicalRequest {
                verb: "PUT",
                content_length: body.len(),
                content_type: Some(JSON_CONTENT_TYPE),
                ms_headers,
                resource: self.resource(key),
            },
        )?;
        let response = request
            .body(body)
            .send()
            .with_context(|| format!("put blob {key}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("put blob {} returned {}: {}", key, status, body);
        }
        debug!(state = %record.state, "blob written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::State;
    use crate::io::secrets::StaticSecret;
    use mockito::Matcher;

    const ACCOUNT_KEY: &str = "bW9uaXRvci10ZXN0LWFjY291bnQta2V5";
    const DATE: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

    fn headers(extra: &[(&'static str, &str)]) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        headers.insert("x-ms-date", DATE.to_string());
        headers.insert("x-ms-version", BLOB_API_VERSION.to_string());
        for (name, value) in extra {
            headers.insert(*name, value.to_string());
        }
        headers
    }

    fn store(endpoint: &str) -> BlobRecordStore<StaticSecret> {
        BlobRecordStore::new(
            "acct",
            "records",
            StaticSecret(ACCOUNT_KEY.to_string()),
            Duration::from_secs(5),
        )
        .expect("store")
        .with_endpoint(endpoint)
    }

    #[test]
    fn get_string_to_sign_and_signature() {
        let request = CanonicalRequest {
            verb: "GET",
            content_length: 0,
            content_type: None,
            ms_headers: headers(&[]),
            resource: "/acct/records/2024-01-01".to_string(),
        };
        let expected = format!(
            "GET\n\n\n\n\n\n\n\n\n\n\n\nx-ms-date:{DATE}\nx-ms-version:2021-08-06\n/acct/records/2024-01-01"
        );
        assert_eq!(request.string_to_sign(), expected);
        assert_eq!(
            sign(ACCOUNT_KEY, &request.string_to_sign()).expect("sign"),
            "a1mzmgxVFMmK8zLZkDzjxtKkk3uMwAc6qCVM12K9D9A="
        );
    }

    #[test]
    fn put_signature_covers_length_type_and_blob_type() {
        let request = CanonicalRequest {
            verb: "PUT",
            content_length: 120,
            content_type: Some(JSON_CONTENT_TYPE),
            ms_headers: headers(&[("x-ms-blob-type", "BlockBlob")]),
            resource: "/acct/records/2024-01-01".to_string(),
        };
        assert!(request
            .string_to_sign()
            .starts_with("PUT\n\n\n120\n\napplication/json\n"));
        assert_eq!(
            sign(ACCOUNT_KEY, &request.string_to_sign()).expect("sign"),
            "yf6+VrKsvz57k+N/30toDqBmn7peYeLcuZWyGE4SG4M="
        );
    }

    #[test]
    fn sign_rejects_non_base64_key() {
        assert!(sign("not base64!", "x").is_err());
    }

    #[test]
    fn missing_blob_loads_as_none() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/records/2024-01-01")
            .match_header("x-ms-version", BLOB_API_VERSION)
            .match_header(
                "authorization",
                Matcher::Regex("^SharedKey acct:.+$".to_string()),
            )
            .with_status(404)
            .create();

        let loaded = store(&server.url()).load("2024-01-01").expect("load");
        assert!(loaded.is_none());
        mock.assert();
    }

    #[test]
    fn save_then_load_through_service() {
        let mut server = mockito::Server::new();
        let mut record = PromotionRecord::new("2024-01-01", 7);
        record.state = State::None;
        let encoded = encode_record(&record).expect("encode");

        let put = server
            .mock("PUT", "/records/2024-01-01")
            .match_header("x-ms-blob-type", "BlockBlob")
            .match_header("content-type", JSON_CONTENT_TYPE)
            .match_body(encoded.as_str())
            .with_status(201)
            .create();
        let get = server
            .mock("GET", "/records/2024-01-01")
            .with_status(200)
            .with_body(encoded.as_str())
            .create();

        let store = store(&server.url());
        store.save("2024-01-01", &record).expect("save");
        let loaded = store.load("2024-01-01").expect("load").expect("present");
        assert_eq!(loaded, record);
        put.assert();
        get.assert();
    }

    #[test]
    fn service_error_is_reported() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/records/2024-01-01")
            .with_status(403)
            .with_body("AuthenticationFailed")
            .create();

        let err = store(&server.url()).load("2024-01-01").unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
