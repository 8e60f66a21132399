//! Outbound email delivery through a managed HTTP relay.
//!
//! The relay speaks a SendGrid-compatible JSON surface: one `POST
//! /v3/mail/send` per message, bearer-key authenticated. Delivery is modelled
//! behind the [`Notifier`] trait so callers can substitute a scripted fake.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Capability to send a single notification message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// HTTP client for the mail relay.
#[derive(Clone)]
pub struct MailClient {
    http: Client,
    base_url: Url,
    api_key: String,
    sender: String,
}

impl MailClient {
    /// Creates a new relay client with the provided configuration.
    pub fn new(
        base_url: Url,
        api_key: impl Into<String>,
        sender: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            sender: sender.into(),
        }
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[async_trait]
impl Notifier for MailClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let url = self.base_url.join("v3/mail/send")?;
        let request = SendRequest {
            personalizations: [Personalization {
                to: [Address { email: to }],
            }],
            from: Address {
                email: &self.sender,
            },
            subject,
            content: [Content {
                content_type: "text/plain",
                value: body,
            }],
        };

        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        ensure_success(response).await
    }
}

/// Errors produced by the mail relay client.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<(), NotifyError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(NotifyError::Status { status, body });
    }
    Ok(())
}
