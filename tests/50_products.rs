mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{data_of, spawn_app, TestApp};
use useradmin_api::database::Store;

async fn create_product(app: &TestApp, token: &str, body: Value) -> Result<Value> {
    let res = app.post("/api/products", token).json(&body).send().await?;
    anyhow::ensure!(res.status() == StatusCode::CREATED, "create failed: {}", res.status());
    data_of(res).await
}

fn urls(product: &Value) -> Vec<String> {
    product["images"]
        .as_array()
        .map(|images| {
            images
                .iter()
                .filter_map(|i| i["url"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn create_product_with_children() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let product = create_product(
        &app,
        &token,
        json!({
            "title": "Desk lamp",
            "description": "Warm white",
            "images": [{ "url": "front.jpg", "sort": 1 }, { "url": "side.jpg", "sort": 2 }],
            "specs": [{ "name": "Power", "value": "9W", "sort": 1 }]
        }),
    )
    .await?;

    assert_eq!(product["status"], 1);
    assert_eq!(urls(&product), vec!["front.jpg", "side.jpg"]);
    assert_eq!(product["specs"][0]["value"], "9W");

    let admin = app.store.find_user_by_username("admin").await?.unwrap();
    assert_eq!(product["created_by"], admin.id);
    Ok(())
}

#[tokio::test]
async fn update_replaces_images_with_fresh_rows() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let product = create_product(
        &app,
        &token,
        json!({
            "title": "Chair",
            "images": [{ "url": "old-1.jpg", "sort": 1 }, { "url": "old-2.jpg", "sort": 2 }, { "url": "old-3.jpg", "sort": 3 }]
        }),
    )
    .await?;
    let id = product["id"].as_i64().unwrap();
    let old_ids: Vec<i64> = product["images"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["id"].as_i64())
        .collect();

    // Caller-supplied child ids point at existing rows; they must be ignored
    let res = app
        .put(&format!("/api/products/{}", id), &token)
        .json(&json!({
            "title": "Chair",
            "images": [
                { "id": old_ids[0], "url": "a.jpg", "sort": 2 },
                { "id": old_ids[1], "url": "b.jpg", "sort": 1 }
            ]
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let updated = data_of(res).await?;
    assert_eq!(urls(&updated), vec!["b.jpg", "a.jpg"]);

    let stored = app.store.find_product(id).await?.unwrap();
    assert_eq!(stored.images.len(), 2);
    assert!(stored.images.iter().all(|i| !old_ids.contains(&i.id)));
    assert!(stored.images.iter().all(|i| i.product_id == id));
    Ok(())
}

#[tokio::test]
async fn update_without_children_clears_them() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    let product = create_product(
        &app,
        &token,
        json!({
            "title": "Table",
            "images": [{ "url": "t.jpg" }],
            "specs": [{ "name": "Legs", "value": "4" }]
        }),
    )
    .await?;
    let id = product["id"].as_i64().unwrap();

    let res = app
        .put(&format!("/api/products/{}", id), &token)
        .json(&json!({ "title": "Table v2" }))
        .send()
        .await?;
    let updated = data_of(res).await?;
    assert_eq!(updated["title"], "Table v2");
    assert!(updated["images"].as_array().unwrap().is_empty());
    assert!(updated["specs"].as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn status_toggle_and_validation() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    let id = create_product(&app, &token, json!({ "title": "Rug" })).await?["id"]
        .as_i64()
        .unwrap();

    let res = app
        .put(&format!("/api/products/{}/status", id), &token)
        .json(&json!({ "status": 0 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(data_of(res).await?["status"], 0);

    let res = app
        .put(&format!("/api/products/{}/status", id), &token)
        .json(&json!({ "status": 7 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.find_product(id).await?.unwrap().status, 0);

    let res = app
        .put("/api/products/424242/status", &token)
        .json(&json!({ "status": 1 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn status_requires_its_own_permission() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    let id = create_product(&app, &admin, json!({ "title": "Vase" })).await?["id"]
        .as_i64()
        .unwrap();

    app.user_with_codes("editor", &["product:list", "product:update"], true).await?;
    let token = app.token_for("editor", "secret-pw").await?;

    let res = app
        .put(&format!("/api/products/{}/status", id), &token)
        .json(&json!({ "status": 0 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.store.find_product(id).await?.unwrap().status, 1);
    Ok(())
}

#[tokio::test]
async fn list_filters_by_title_and_status() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    create_product(&app, &token, json!({ "title": "Red mug" })).await?;
    create_product(&app, &token, json!({ "title": "Blue mug", "status": 0 })).await?;
    create_product(&app, &token, json!({ "title": "Teapot" })).await?;

    let res = app.get("/api/products?title=MUG", &token).send().await?;
    let data = data_of(res).await?;
    assert_eq!(data["total"], 2);

    let res = app.get("/api/products?title=mug&status=1", &token).send().await?;
    let data = data_of(res).await?;
    assert_eq!(data["total"], 1);
    assert_eq!(data["data"][0]["title"], "Red mug");

    // Newest first
    let res = app.get("/api/products?page_size=1", &token).send().await?;
    let data = data_of(res).await?;
    assert_eq!(data["total"], 3);
    assert_eq!(data["data"][0]["title"], "Teapot");
    Ok(())
}

#[tokio::test]
async fn invalid_payloads_are_rejected() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;

    for body in [
        json!({ "title": "  " }),
        json!({ "title": "Bad status", "status": 3 }),
        json!({ "title": "No url", "images": [{ "url": "" }] }),
    ] {
        let res = app.post("/api/products", &token).json(&body).send().await?;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", body);
    }
    Ok(())
}

#[tokio::test]
async fn delete_removes_product_and_children() -> Result<()> {
    let app = spawn_app().await?;
    let token = app.admin_token().await?;
    let id = create_product(
        &app,
        &token,
        json!({ "title": "Shelf", "images": [{ "url": "s.jpg" }] }),
    )
    .await?["id"]
        .as_i64()
        .unwrap();

    let res = app.delete(&format!("/api/products/{}", id), &token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.get(&format!("/api/products/{}", id), &token).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.delete(&format!("/api/products/{}", id), &token).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}
