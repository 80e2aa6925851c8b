//! HTTP adapters for the judge and corrector contracts.
//!
//! Both speak JSON over a single POST endpoint. Judges receive
//! `{"task", "model", "code", "requirements", "context"}` where `task` is
//! one of `coverage`, `review` or `vote`; the corrector receives a
//! `CorrectionRequest` and answers `{"code": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use codegate_core::{
    CorrectionRequest, Corrector, CorrectorError, Requirements, VerificationRequest,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::{Coverage, Judge, Review};

const USER_AGENT: &str = concat!("codegate/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

#[derive(Serialize)]
struct JudgeRequest<'a> {
    task: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    code: &'a str,
    requirements: &'a Requirements,
    context: &'a str,
}

#[derive(Deserialize)]
struct VoteResponse {
    vote: Option<bool>,
    answer: Option<String>,
}

impl VoteResponse {
    fn is_yes(&self) -> anyhow::Result<bool> {
        match (&self.vote, &self.answer) {
            (Some(v), _) => Ok(*v),
            (None, Some(a)) => Ok(a.trim().to_ascii_lowercase().starts_with("yes")),
            (None, None) => anyhow::bail!("vote response has neither `vote` nor `answer`"),
        }
    }
}

/// A judge served over HTTP, optionally pinned to one model.
pub struct HttpJudge {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
}

impl HttpJudge {
    pub fn new(
        endpoint: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.into(),
            model,
        })
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    async fn ask<T: serde::de::DeserializeOwned>(
        &self,
        task: &str,
        request: &VerificationRequest,
    ) -> anyhow::Result<T> {
        let body = JudgeRequest {
            task,
            model: self.model.as_deref(),
            code: &request.code,
            requirements: &request.requirements,
            context: &request.context,
        };
        debug!(endpoint = %self.endpoint, task, model = ?self.model, "asking judge");

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("judge returned {status}: {}", text.trim());
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn coverage(&self, request: &VerificationRequest) -> anyhow::Result<Coverage> {
        self.ask("coverage", request).await
    }

    async fn review(&self, request: &VerificationRequest) -> anyhow::Result<Review> {
        self.ask("review", request).await
    }

    async fn vote(&self, request: &VerificationRequest) -> anyhow::Result<bool> {
        self.ask::<VoteResponse>("vote", request).await?.is_yes()
    }
}

#[derive(Deserialize)]
struct CorrectionResponse {
    code: String,
}

/// Corrector served over HTTP.
pub struct HttpCorrector {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpCorrector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    fn transport(&self, e: reqwest::Error) -> CorrectorError {
        if e.is_timeout() {
            CorrectorError::Timeout(self.timeout)
        } else {
            CorrectorError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Corrector for HttpCorrector {
    async fn correct(&self, request: &CorrectionRequest) -> Result<String, CorrectorError> {
        debug!(
            endpoint = %self.endpoint,
            findings = request.findings.len(),
            prior_cases = request.prior_cases.len(),
            "requesting correction"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(CorrectorError::Rejected(format!("{status}: {}", text.trim())));
        }
        if !status.is_success() {
            return Err(CorrectorError::Transport(format!("corrector returned {status}")));
        }

        let body: CorrectionResponse = response.json().await.map_err(|e| self.transport(e))?;
        if body.code.trim().is_empty() {
            return Err(CorrectorError::Rejected("corrector returned empty code".into()));
        }
        Ok(body.code)
    }
}
