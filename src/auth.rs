use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};

/// One shared password. When a user name is configured, only that user may
/// log in; otherwise any user name is accepted.
#[derive(Debug, Clone)]
pub struct SharedPassword {
    user: Option<String>,
    password: String,
}

impl SharedPassword {
    pub fn new(user: Option<String>, password: String) -> Self {
        Self { user, password }
    }
}

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let Some(user) = login.user() else {
            return Err(PgWireError::UserNameRequired);
        };
        if self.user.as_deref().is_some_and(|expected| expected != user) {
            tracing::warn!(user, "login rejected: unknown user");
            return Err(PgWireError::InvalidPassword(user.to_string()));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(user: Option<&str>) -> LoginInfo<'_> {
        LoginInfo::new(user, Some("netdoc"), "127.0.0.1".to_string())
    }

    #[tokio::test]
    async fn any_user_when_none_configured() {
        let auth = SharedPassword::new(None, "secret".into());
        let pass = auth.get_password(&login(Some("alice"))).await.unwrap();
        assert_eq!(pass.password(), b"secret");
    }

    #[tokio::test]
    async fn configured_user_is_enforced() {
        let auth = SharedPassword::new(Some("netdoc".into()), "secret".into());
        assert!(auth.get_password(&login(Some("netdoc"))).await.is_ok());
        assert!(matches!(
            auth.get_password(&login(Some("mallory"))).await,
            Err(PgWireError::InvalidPassword(u)) if u == "mallory"
        ));
        assert!(matches!(auth.get_password(&login(None)).await, Err(PgWireError::UserNameRequired)));
    }
}
