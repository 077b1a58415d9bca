use async_trait::async_trait;
use aws_config::BehaviorVersion;
use serde::de::DeserializeOwned;

#[async_trait]
pub trait SecretRepository {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, SecretError>;
}

pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&config);
        Self(secrets_client)
    }

    async fn get_secret<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, SecretError> {
        let secret = self
            .0
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(aws_sdk_secretsmanager::Error::from)?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(SecretError::MissingSecret(name));
        };
        Ok(serde_json::from_str(secret_value)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Missing secret {0}")]
    MissingSecret(&'static str),
    #[error("Could not retrieve secret: {0}")]
    Lookup(#[from] aws_sdk_secretsmanager::Error),
    #[error("Could not parse secret: {0}")]
    Parse(#[from] serde_json::Error),
}
