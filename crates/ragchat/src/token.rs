use async_trait::async_trait;
use ragchat_endpoint::{TokenError, TokenProvider};

/// A token provider that hands out the same pre-solved challenge token for
/// every attempt.
///
/// Useful when the endpoint is deployed with a challenge that accepts a
/// long-lived token, or with a test key.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Creates a provider for the given token.
    #[inline]
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self) -> Result<String, TokenError> {
        if self.token.is_empty() {
            return Err(TokenError::new("no challenge token configured"));
        }
        Ok(self.token.clone())
    }

    fn invalidate(&self) {
        trace!("static challenge token is reused");
    }
}
