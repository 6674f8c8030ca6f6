use std::fmt::Debug;

/// Builder for [`HttpEndpointConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HttpEndpointConfigBuilder {
    url: String,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
}

impl HttpEndpointConfigBuilder {
    /// Creates a builder with the given chat URL.
    #[inline]
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: vec![],
            user_agent: None,
        }
    }

    /// Adds an extra header sent with every request, e.g. an API key.
    #[inline]
    pub fn with_header<K: Into<String>, V: Into<String>>(
        mut self,
        name: K,
        value: V,
    ) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a custom user agent.
    #[inline]
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> HttpEndpointConfig {
        HttpEndpointConfig {
            url: self.url,
            headers: self.headers,
            user_agent: self.user_agent.unwrap_or_else(|| {
                concat!("ragchat/", env!("CARGO_PKG_VERSION")).to_owned()
            }),
        }
    }
}

impl Debug for HttpEndpointConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpointConfigBuilder")
            .field("url", &self.url)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Configuration for the HTTP chat endpoint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HttpEndpointConfig {
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) user_agent: String,
}

impl HttpEndpointConfig {
    /// Returns the chat URL.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Debug for HttpEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpointConfig")
            .field("url", &self.url)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

// Header values may carry credentials.
struct RedactedHeaders<'a>(&'a [(String, String)]);

impl Debug for RedactedHeaders<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(name, _)| (name, "<redacted>")))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_headers() {
        let config = HttpEndpointConfigBuilder::with_url("https://chat.test/chat")
            .with_header("x-api-key", "secret-value")
            .build();
        let debug = format!("{config:?}");
        assert!(debug.contains("x-api-key"));
        assert!(!debug.contains("secret-value"));
        assert!(config.user_agent.starts_with("ragchat/"));
    }
}
