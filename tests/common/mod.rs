#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use useradmin_api::auth::{PasswordHasher, TokenService};
use useradmin_api::config::AppConfig;
use useradmin_api::database::bootstrap;
use useradmin_api::database::models::{NewRole, NewUser};
use useradmin_api::database::{AssociationReplacer, Children, MemoryStore, Store};
use useradmin_api::{router, AppState};

pub const ADMIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin123";

/// One server per test: fresh in-memory store, bootstrapped, listening on an
/// ephemeral port.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<TokenService>,
    hasher: PasswordHasher,
}

pub async fn spawn_app() -> Result<TestApp> {
    let mut config = AppConfig::development();
    config.security.jwt_secret = "integration-test-secret".to_string();
    config.security.bcrypt_cost = 4;

    let store = Arc::new(MemoryStore::new());
    let hasher = PasswordHasher::new(config.security.bcrypt_cost);
    bootstrap::run(store.as_ref(), &hasher, &config.bootstrap).await?;

    let tokens = Arc::new(TokenService::from_config(&config.security));
    let app = router(AppState::new(store.clone(), tokens.clone(), config));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .ok();
    });

    Ok(TestApp {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
        store,
        tokens,
        hasher,
    })
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(token)
    }

    pub fn post(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(token)
    }

    pub fn put(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(token)
    }

    pub fn delete(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(token)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Response> {
        let res = self
            .client
            .post(self.url("/api/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        Ok(res)
    }

    /// Log in and return the bearer token
    pub async fn token_for(&self, username: &str, password: &str) -> Result<String> {
        let res = self.login(username, password).await?;
        anyhow::ensure!(res.status() == StatusCode::OK, "login failed: {}", res.status());
        let body: Value = res.json().await?;
        body["data"]["token"]
            .as_str()
            .map(str::to_string)
            .context("login response carries no token")
    }

    pub async fn admin_token(&self) -> Result<String> {
        self.token_for(ADMIN, ADMIN_PASSWORD).await
    }

    /// Create a role granted exactly `codes` and a user holding it.
    /// Returns the user id.
    pub async fn user_with_codes(&self, username: &str, codes: &[&str], active: bool) -> Result<i64> {
        let mut permission_ids = Vec::new();
        for code in codes {
            let permission = self
                .store
                .find_permission_by_code(code)
                .await?
                .with_context(|| format!("no permission {}", code))?;
            permission_ids.push(permission.id);
        }

        let mut tx = self.store.begin().await?;
        let role = tx
            .create_role(NewRole {
                name: format!("{}-role", username),
                description: String::new(),
            })
            .await?;
        tx.commit().await?;
        AssociationReplacer::replace(self.store.as_ref(), role.id, &Children::Grants(permission_ids)).await?;

        let user = self
            .store
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: self.hasher.hash("secret-pw").await?,
                role_id: role.id,
                active,
            })
            .await?;
        Ok(user.id)
    }

    /// Token signed with the server's secret, bypassing login
    pub fn mint_token(&self, username: &str) -> Result<String> {
        Ok(self.tokens.issue(username)?)
    }

    pub async fn audit_entries(&self) -> Result<Vec<useradmin_api::database::models::AuditEntry>> {
        let (entries, _) = self
            .store
            .list_logs(
                &Default::default(),
                useradmin_api::types::PageRequest { page: 1, page_size: 1000 },
            )
            .await?;
        Ok(entries)
    }
}

/// Body of an error response: (code, message)
pub async fn error_of(res: Response) -> Result<(String, String)> {
    let body: Value = res.json().await?;
    anyhow::ensure!(body["error"] == true, "not an error body: {}", body);
    Ok((
        body["code"].as_str().unwrap_or_default().to_string(),
        body["message"].as_str().unwrap_or_default().to_string(),
    ))
}

pub async fn data_of(res: Response) -> Result<Value> {
    let body: Value = res.json().await?;
    anyhow::ensure!(body["success"] == true, "not a success body: {}", body);
    Ok(body["data"].clone())
}
