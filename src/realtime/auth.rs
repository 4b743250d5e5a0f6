use dashmap::DashMap;
use uuid::Uuid;

/// Resolves a presented credential to the courier it identifies.
pub trait CourierAuthenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Option<Uuid>;
}

/// Opaque bearer tokens held in memory. Stands in for the external identity
/// service: tokens are issued per courier and die with the process.
#[derive(Default)]
pub struct TokenTable {
    tokens: DashMap<String, Uuid>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, courier_id: Uuid) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), courier_id);
        token
    }

    pub fn revoke(&self, token: &str) -> Option<Uuid> {
        self.tokens.remove(token).map(|(_, courier_id)| courier_id)
    }
}

impl CourierAuthenticator for TokenTable {
    fn authenticate(&self, credential: &str) -> Option<Uuid> {
        let credential = credential.trim();
        if credential.is_empty() {
            return None;
        }
        self.tokens.get(credential).map(|entry| *entry.value())
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{bearer_token, CourierAuthenticator, TokenTable};

    #[test]
    fn issued_token_resolves_until_revoked() {
        let table = TokenTable::new();
        let courier = Uuid::new_v4();
        let token = table.issue(courier);

        assert_eq!(table.authenticate(&token), Some(courier));
        assert_eq!(table.revoke(&token), Some(courier));
        assert_eq!(table.authenticate(&token), None);
    }

    #[test]
    fn blank_or_unknown_credentials_are_refused() {
        let table = TokenTable::new();
        assert_eq!(table.authenticate(""), None);
        assert_eq!(table.authenticate("not-a-token"), None);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
