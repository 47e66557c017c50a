//! Credential collaborator.
//!
//! The sync core never logs in or refreshes tokens itself; it only asks
//! whether a network call is currently permitted.

/// Source of the bearer credential used for remote store calls.
pub trait CredentialProvider: Send + Sync {
  /// Current bearer token, if a valid one is held.
  fn bearer_token(&self) -> Option<String>;

  fn has_valid_credential(&self) -> bool {
    self.bearer_token().is_some()
  }
}

/// A fixed token loaded once at startup (e.g. from the environment).
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
  token: Option<String>,
}

impl StaticToken {
  pub fn new(token: Option<String>) -> Self {
    let token = token.filter(|t| !t.trim().is_empty());
    Self { token }
  }
}

impl CredentialProvider for StaticToken {
  fn bearer_token(&self) -> Option<String> {
    self.token.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_blank_token_is_not_a_credential() {
    assert!(!StaticToken::new(Some("  ".to_string())).has_valid_credential());
    assert!(!StaticToken::new(None).has_valid_credential());
    assert_eq!(
      StaticToken::new(Some("abc".to_string())).bearer_token(),
      Some("abc".to_string())
    );
  }
}
