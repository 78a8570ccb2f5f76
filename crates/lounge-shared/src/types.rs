use serde::{Deserialize, Serialize};

/// Stable, opaque account identifier handed out by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

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
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Moderation rank. Variants are declared lowest first so the derived
/// ordering is the hierarchy: `User < Mod < Admin`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Mod,
    Admin,
}

impl Role {
    /// Derive the rank from the two stored flags. Admin wins over mod.
    pub fn from_flags(is_admin: bool, is_mod: bool) -> Self {
        if is_admin {
            Self::Admin
        } else if is_mod {
            Self::Mod
        } else {
            Self::User
        }
    }

    /// `(is_admin, is_mod)` as persisted on the user document.
    pub fn to_flags(self) -> (bool, bool) {
        match self {
            Self::Admin => (true, false),
            Self::Mod => (false, true),
            Self::User => (false, false),
        }
    }

    pub fn is_staff(self) -> bool {
        self >= Self::Mod
    }

    /// Whether a holder of this rank may moderate someone of rank `target`.
    ///
    /// Admins may act on anyone. Mods may only act on plain users.
    pub fn can_moderate(self, target: Role) -> bool {
        match self {
            Self::Admin => true,
            Self::Mod => target < Self::Mod,
            Self::User => false,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Mod => "mod",
            Self::Admin => "admin",
        };
        f.write_str(s)
    }
}
