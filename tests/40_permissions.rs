mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::{data_of, error_of, spawn_app};
use useradmin_api::database::Store;

#[tokio::test]
async fn code_must_be_module_colon_action() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    for code in ["reportexport", ":export", "report:", "a:b:c"] {
        let res = app
            .post("/api/permissions", &token)
            .json(&json!({ "name": "Export", "code": code }))
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", code);
    }
    assert!(app.store.find_permission_by_code("reportexport").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn new_permission_is_grouped_by_module() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .post("/api/permissions", &token)
        .json(&json!({ "name": "Export reports", "code": "report:export" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = app.get("/api/permissions", &token).send().await?;
    let data = data_of(res).await?;

    let report: Vec<&str> = data["modules"]["report"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["code"].as_str())
        .collect();
    assert_eq!(report, vec!["report:export"]);

    let product = data["modules"]["product"].as_array().unwrap();
    assert!(product.iter().any(|p| p["code"] == "product:status"));

    let flat = data["permissions"].as_array().unwrap();
    assert!(flat.iter().any(|p| p["code"] == "report:export"));
    Ok(())
}

#[tokio::test]
async fn duplicate_code_is_refused() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .post("/api/permissions", &token)
        .json(&json!({ "name": "Again", "code": "user:list" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(res).await?.0, "POLICY_VIOLATION");
    Ok(())
}

#[tokio::test]
async fn granted_permission_cannot_be_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    let granted = app.store.find_permission_by_code("user:list").await?.unwrap();

    let res = app
        .delete(&format!("/api/permissions/{}", granted.id), &token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert!(app.store.find_permission(granted.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn ungranted_permission_can_be_edited_and_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .post("/api/permissions", &token)
        .json(&json!({ "name": "Audit export", "code": "log:export" }))
        .send()
        .await?;
    let id = data_of(res).await?["id"].as_i64().unwrap();

    let res = app
        .put(&format!("/api/permissions/{}", id), &token)
        .json(&json!({ "code": "log:download", "description": "CSV download" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let data = data_of(res).await?;
    assert_eq!(data["code"], "log:download");
    assert_eq!(data["name"], "Audit export");

    let res = app
        .put(&format!("/api/permissions/{}", id), &token)
        .json(&json!({ "code": "broken" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app.delete(&format!("/api/permissions/{}", id), &token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(app.store.find_permission(id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn permission_admin_requires_role_codes() -> Result<()> {
    let app = spawn_app().await?;
    app.user_with_codes("staff", &["user:list"], true).await?;
    let token = app.token_for("staff", "secret-pw").await?;

    let res = app.get("/api/permissions", &token).send().await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}
