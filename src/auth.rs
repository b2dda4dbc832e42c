use std::collections::HashMap;
use std::str::FromStr;

/// Role of an authenticated user within an academy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Coach,
    Viewer,
}

impl Role {
    /// Roles allowed to create, update, and cancel bookings.
    pub fn can_book(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager | Role::Coach)
    }

    /// Roles allowed to touch bookings they did not create, and to manage fields.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "coach" => Ok(Role::Coach),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Pre-authenticated acting user. The engine trusts this — token checking
/// happens once at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: String,
    pub role: Role,
}

/// Static bearer-token table, parsed from configuration at startup.
///
/// Format: `token:user:role` entries separated by `;`, e.g.
/// `s3cret:alice:admin;t0ken:bob:coach`.
pub struct TokenRegistry {
    tokens: HashMap<String, Principal>,
}

impl TokenRegistry {
    pub fn parse(config: &str) -> Result<Self, String> {
        let mut tokens = HashMap::new();
        for entry in config.split(';').filter(|e| !e.trim().is_empty()) {
            let mut parts = entry.trim().splitn(3, ':');
            let (token, user, role) = match (parts.next(), parts.next(), parts.next()) {
                (Some(t), Some(u), Some(r)) => (t, u, r),
                _ => return Err(format!("malformed token entry: {entry}")),
            };
            if token.is_empty() || user.is_empty() {
                return Err(format!("malformed token entry: {entry}"));
            }
            tokens.insert(
                token.to_string(),
                Principal {
                    user: user.to_string(),
                    role: role.parse()?,
                },
            );
        }
        if tokens.is_empty() {
            return Err("no tokens configured".into());
        }
        Ok(Self { tokens })
    }

    /// Resolve a `Bearer <token>` Authorization header value to a principal.
    pub fn authenticate(&self, authorization: &str) -> Option<Principal> {
        let token = authorization.strip_prefix("Bearer ")?.trim();
        self.tokens.get(token).cloned()
    }
}
