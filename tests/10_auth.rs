mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

use common::{data_of, error_of, spawn_app, ADMIN, ADMIN_PASSWORD};

#[tokio::test]
async fn health_endpoint_responds() -> Result<()> {
    let app = spawn_app().await?;
    let res = app.client.get(app.url("/health")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn login_returns_token_and_profile() -> Result<()> {
    let app = spawn_app().await?;

    let res = app.login(ADMIN, ADMIN_PASSWORD).await?;
    assert_eq!(res.status(), StatusCode::OK);
    let data = data_of(res).await?;

    assert!(data["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(data["expires_in"], 24 * 3600);
    assert_eq!(data["user"]["username"], ADMIN);
    assert_eq!(data["user"]["role_id"], 1);
    let codes = data["user"]["permissions"].as_array().unwrap();
    assert!(codes.iter().any(|c| c == "product:status"));
    assert!(data["user"].get("password_hash").is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_the_same() -> Result<()> {
    let app = spawn_app().await?;

    let wrong_password = app.login(ADMIN, "nope").await?;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    let (code_a, message_a) = error_of(wrong_password).await?;

    let unknown = app.login("nobody", "nope").await?;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let (code_b, message_b) = error_of(unknown).await?;

    assert_eq!(code_a, "UNAUTHENTICATED");
    assert_eq!((code_a, message_a), (code_b, message_b));
    Ok(())
}

#[tokio::test]
async fn disabled_user_cannot_log_in() -> Result<()> {
    let app = spawn_app().await?;
    app.user_with_codes("dormant", &["product:list"], false).await?;

    let res = app.login("dormant", "secret-pw").await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_of(res).await?.0, "ACCOUNT_DISABLED");
    Ok(())
}

#[tokio::test]
async fn malformed_login_body_is_bad_request() -> Result<()> {
    let app = spawn_app().await?;
    let res = app
        .client
        .post(app.url("/api/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(res).await?.0, "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn missing_header_is_unauthenticated() -> Result<()> {
    let app = spawn_app().await?;
    let res = app.client.get(app.url("/api/users")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_of(res).await?.0, "UNAUTHENTICATED");
    Ok(())
}

#[tokio::test]
async fn bearer_prefix_is_case_sensitive() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .client
        .get(app.url("/api/user/info"))
        .header("authorization", format!("bearer {}", token))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app.get("/api/user/info", &token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn tampered_or_foreign_tokens_are_rejected() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let mut tampered = token.clone();
    tampered.pop();
    tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
    let res = app.get("/api/user/info", &tampered).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app.get("/api/user/info", "garbage").send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn user_info_reflects_the_token_identity() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app.get("/api/user/info", &token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let data = data_of(res).await?;
    assert_eq!(data["username"], ADMIN);
    assert_eq!(data["role_name"], "Super Administrator");
    Ok(())
}
