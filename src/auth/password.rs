use std::sync::Arc;

use tokio::sync::OnceCell;

/// Plaintext behind the decoy hash. Never matches a real login.
const DECOY_PLAINTEXT: &str = "decoy-credential";

/// One-way salted credential hashing (bcrypt).
///
/// Hashing is CPU bound, so both operations run on the blocking pool and
/// never stall the request worker that awaits them.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Hash at this hasher's cost, built on first use and shared by clones
    decoy: Arc<OnceCell<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Password worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(4, 31),
            decoy: Arc::new(OnceCell::new()),
        }
    }

    pub async fn hash(&self, plain: &str) -> Result<String, CredentialError> {
        let cost = self.cost;
        let plain = plain.to_string();
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost)).await??;
        Ok(hashed)
    }

    /// Compare a plaintext against a stored hash. A stored value that is not
    /// a bcrypt hash never verifies.
    pub async fn verify(&self, plain: &str, hashed: &str) -> Result<bool, CredentialError> {
        let plain = plain.to_string();
        let hashed = hashed.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hashed).unwrap_or(false)).await?;
        Ok(matches)
    }

    /// Run one verification against the decoy hash and discard the result.
    /// Spends the same bcrypt work as a real comparison when there is no
    /// stored hash to compare with.
    pub async fn verify_decoy(&self, plain: &str) -> Result<(), CredentialError> {
        let decoy = self
            .decoy
            .get_or_try_init(|| self.hash(DECOY_PLAINTEXT))
            .await?;
        self.verify(plain, decoy).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn has_decoy(&self) -> bool {
        self.decoy.initialized()
    }
}
