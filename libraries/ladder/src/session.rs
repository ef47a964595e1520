use serde::{Deserialize, Serialize};

/// Identity handed out by the auth provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

/// The current auth state. Created when the app starts and replaced on every sign-in/sign-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<UserId>,
    pub access_token: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: Some(UserId(user_id.into())),
            access_token: Some(access_token.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Which partition of storage is the record of truth.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Device,
    User(UserId),
}

impl Scope {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Scope::Device => None,
            Scope::User(user_id) => Some(user_id),
        }
    }
}
