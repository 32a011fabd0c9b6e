mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::{data_of, error_of, spawn_app};
use useradmin_api::database::Store;

#[tokio::test]
async fn create_role_with_initial_grants() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    let list = app.store.find_permission_by_code("product:list").await?.unwrap();
    let status = app.store.find_permission_by_code("product:status").await?.unwrap();

    let res = app
        .post("/api/roles", &token)
        .json(&json!({
            "name": "merchandiser",
            "description": "Keeps the catalog tidy",
            "permission_ids": [status.id, list.id]
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let data = data_of(res).await?;
    assert_eq!(data["name"], "merchandiser");
    let codes: Vec<&str> = data["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["product:list", "product:status"]);
    Ok(())
}

#[tokio::test]
async fn duplicate_role_name_is_refused() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .post("/api/roles", &token)
        .json(&json!({ "name": "Super Administrator" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(res).await?.0, "POLICY_VIOLATION");
    Ok(())
}

#[tokio::test]
async fn super_admin_role_cannot_be_renamed() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .put("/api/roles/1", &token)
        .json(&json!({ "name": "x" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(res).await?.0, "POLICY_VIOLATION");

    let role = app.store.find_role(1).await?.unwrap();
    assert_eq!(role.name, "Super Administrator");
    Ok(())
}

#[tokio::test]
async fn super_admin_role_cannot_be_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app.delete("/api/roles/1", &token).send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(res).await?.0, "POLICY_VIOLATION");
    assert!(app.store.find_role(1).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn role_in_use_cannot_be_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    app.user_with_codes("clerk", &["product:list"], true).await?;
    let clerk = app.store.find_user_by_username("clerk").await?.unwrap();

    let res = app
        .delete(&format!("/api/roles/{}", clerk.role_id), &token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(error_of(res).await?.0, "CONFLICT");
    assert!(app.store.find_role(clerk.role_id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn unused_role_can_be_renamed_and_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app
        .post("/api/roles", &token)
        .json(&json!({ "name": "interim" }))
        .send()
        .await?;
    let id = data_of(res).await?["id"].as_i64().unwrap();

    let res = app
        .put(&format!("/api/roles/{}", id), &token)
        .json(&json!({ "name": "permanent", "description": "renamed" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(data_of(res).await?["name"], "permanent");

    let res = app.delete(&format!("/api/roles/{}", id), &token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(app.store.find_role(id).await?.is_none());

    let res = app.delete(&format!("/api/roles/{}", id), &token).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn replacing_with_unknown_permission_changes_nothing() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    app.user_with_codes("packer", &["product:list", "product:update"], true).await?;
    let role_id = app.store.find_user_by_username("packer").await?.unwrap().role_id;
    let list = app.store.find_permission_by_code("product:list").await?.unwrap();

    let res = app
        .put(&format!("/api/roles/{}/permissions", role_id), &token)
        .json(&json!({ "permission_ids": [list.id, 999_999] }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let codes = app.store.role_permission_codes(role_id).await?;
    assert_eq!(codes, vec!["product:list", "product:update"]);
    Ok(())
}

#[tokio::test]
async fn replace_then_read_back_grants() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    app.user_with_codes("reader", &["log:list"], true).await?;
    let role_id = app.store.find_user_by_username("reader").await?.unwrap().role_id;
    let roles = app.store.find_permission_by_code("role:list").await?.unwrap();

    let res = app
        .put(&format!("/api/roles/{}/permissions", role_id), &token)
        .json(&json!({ "permission_ids": [roles.id] }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .get(&format!("/api/roles/{}/permissions", role_id), &token)
        .send()
        .await?;
    let data = data_of(res).await?;
    let codes: Vec<&str> = data.as_array().unwrap().iter().filter_map(|p| p["code"].as_str()).collect();
    assert_eq!(codes, vec!["role:list"]);

    let res = app
        .put(&format!("/api/roles/{}/permissions", role_id), &token)
        .json(&json!({ "permission_ids": [] }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(app.store.role_permission_codes(role_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn role_listing_includes_grants() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let res = app.get("/api/roles", &token).send().await?;
    let data = data_of(res).await?;
    let super_admin = data
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == 1)
        .cloned()
        .unwrap();
    assert!(!super_admin["permissions"].as_array().unwrap().is_empty());
    Ok(())
}
