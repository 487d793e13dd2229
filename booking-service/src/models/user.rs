use serde::{Deserialize, Serialize};

pub const ROLE_SUPER_USER: &str = "SUPER_USER";
pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_CASUAL: &str = "USER_CASUAL";

/// Caller identity resolved from a bearer token or trusted gateway headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub email: Option<String>,
    #[serde(rename = "rol")]
    pub role: String,
}

impl CurrentUser {
    pub fn is_super_user(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_SUPER_USER)
    }

    pub fn is_admin(&self) -> bool {
        self.is_super_user() || self.role.eq_ignore_ascii_case(ROLE_ADMIN)
    }

    /// Casual users only see their own reservations.
    pub fn is_casual(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_CASUAL)
    }

    pub fn owns(&self, owner_id: Option<&str>) -> bool {
        owner_id == Some(self.id.as_str())
    }
}
