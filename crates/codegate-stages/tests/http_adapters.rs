use std::time::Duration;

use codegate_core::{CorrectionRequest, Corrector, CorrectorError, Requirements, VerificationRequest};
use codegate_stages::{HttpCorrector, HttpJudge, Judge};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> VerificationRequest {
    VerificationRequest::new("<template></template>", Requirements::new("vue"))
        .with_context("login form")
}

fn correction() -> CorrectionRequest {
    CorrectionRequest {
        original_code: "<script></script>".into(),
        requirements: Requirements::new("vue").with_pattern("<template>"),
        findings: vec!["pattern: missing required pattern `<template>`".into()],
        prior_cases: Vec::new(),
    }
}

#[tokio::test]
async fn judge_coverage_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/judge"))
        .and(body_partial_json(json!({
            "task": "coverage",
            "model": "gpt-x",
            "code": "<template></template>",
            "context": "login form",
            "requirements": {"language": "vue"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "covered": ["renders"],
            "missing": ["validation"],
            "score": 0.5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let judge = HttpJudge::new(
        format!("{}/judge", server.uri()),
        Some("gpt-x".into()),
        Duration::from_secs(5),
    )
    .unwrap();
    let coverage = judge.coverage(&request()).await.unwrap();
    assert_eq!(coverage.missing, vec!["validation"]);
    assert_eq!(coverage.score, 0.5);
}

#[tokio::test]
async fn judge_review_accepts_verified_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"task": "review"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verified": false,
            "issues": ["no error handling"],
            "confidence": 0.3
        })))
        .mount(&server)
        .await;

    let judge = HttpJudge::new(server.uri(), None, Duration::from_secs(5)).unwrap();
    let review = judge.review(&request()).await.unwrap();
    assert!(!review.approved);
    assert_eq!(review.issues, vec!["no error handling"]);
}

#[tokio::test]
async fn judge_vote_formats() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"task": "vote", "model": "a"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vote": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"task": "vote", "model": "b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "Yes, it does."})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"task": "vote", "model": "c"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "No"})))
        .mount(&server)
        .await;

    let timeout = Duration::from_secs(5);
    let a = HttpJudge::new(server.uri(), Some("a".into()), timeout).unwrap();
    let b = HttpJudge::new(server.uri(), Some("b".into()), timeout).unwrap();
    let c = HttpJudge::new(server.uri(), Some("c".into()), timeout).unwrap();
    assert!(a.vote(&request()).await.unwrap());
    assert!(b.vote(&request()).await.unwrap());
    assert!(!c.vote(&request()).await.unwrap());
}

#[tokio::test]
async fn judge_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let judge = HttpJudge::new(server.uri(), None, Duration::from_secs(5)).unwrap();
    let err = judge.vote(&request()).await.unwrap_err();
    assert!(err.to_string().contains("503"));
    assert!(err.to_string().contains("overloaded"));
}

#[tokio::test]
async fn corrector_returns_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/correct"))
        .and(body_partial_json(json!({
            "original_code": "<script></script>",
            "findings": ["pattern: missing required pattern `<template>`"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "<template></template><script></script>"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let corrector =
        HttpCorrector::new(format!("{}/correct", server.uri()), Duration::from_secs(5)).unwrap();
    let code = corrector.correct(&correction()).await.unwrap();
    assert_eq!(code, "<template></template><script></script>");
}

#[tokio::test]
async fn corrector_error_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bad-request"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unsupported language"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "  "})))
        .mount(&server)
        .await;

    let timeout = Duration::from_secs(5);
    let rejected = HttpCorrector::new(format!("{}/bad-request", server.uri()), timeout)
        .unwrap()
        .correct(&correction())
        .await
        .unwrap_err();
    assert!(matches!(rejected, CorrectorError::Rejected(ref m) if m.contains("unsupported language")));

    let down = HttpCorrector::new(format!("{}/down", server.uri()), timeout)
        .unwrap()
        .correct(&correction())
        .await
        .unwrap_err();
    assert!(matches!(down, CorrectorError::Transport(_)));

    let empty = HttpCorrector::new(format!("{}/empty", server.uri()), timeout)
        .unwrap()
        .correct(&correction())
        .await
        .unwrap_err();
    assert!(matches!(empty, CorrectorError::Rejected(_)));
}

#[tokio::test]
async fn slow_corrector_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let timeout = Duration::from_millis(200);
    let err = HttpCorrector::new(server.uri(), timeout)
        .unwrap()
        .correct(&correction())
        .await
        .unwrap_err();
    assert_eq!(err, CorrectorError::Timeout(timeout));
}
