//! SecretSource port - DB パスワードなどの秘密情報の取得

use std::fmt;

use async_trait::async_trait;

use crate::domain::SecretError;

/// secret version の完全な名前 (`projects/{project}/secrets/{name}/versions/latest`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretName(String);

impl SecretName {
    pub fn latest(project: &str, secret: &str) -> Self {
        Self(format!("projects/{project}/secrets/{secret}/versions/latest"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait SecretSource: Send + Sync {
    /// secret の payload を UTF-8 テキストで返す
    async fn access(&self, name: &SecretName) -> Result<String, SecretError>;
}
