use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::pii::Masked;
use crate::CoreResult;

/// Contact tuple that identifies a guest and addresses any booking.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
pub struct ContactInfo {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 20))]
    pub phone: String,
}

impl ContactInfo {
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }

    /// Trims every field and lowercases the email, then validates.
    pub fn normalized(&self) -> CoreResult<ContactInfo> {
        let contact = ContactInfo {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            phone: self.phone.trim().to_string(),
        };
        contact.validate()?;
        Ok(contact)
    }
}

impl fmt::Debug for ContactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactInfo")
            .field("name", &self.name)
            .field("email", &Masked(&self.email))
            .field("phone", &Masked(&self.phone))
            .finish()
    }
}

/// Caller identity as resolved by the presentation layer. Passed explicitly into every
/// manager call; nothing in this workspace reads an ambient principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Identity {
    Member { member_id: Uuid },
    Guest { contact: ContactInfo },
    Anonymous,
}

impl Identity {
    pub fn member(member_id: Uuid) -> Self {
        Identity::Member { member_id }
    }

    pub fn guest(contact: ContactInfo) -> Self {
        Identity::Guest { contact }
    }

    pub fn member_id(&self) -> Option<Uuid> {
        match self {
            Identity::Member { member_id } => Some(*member_id),
            _ => None,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Identity::Member { .. })
    }
}

/// Resolves a request into an [`Identity`]. Implemented by the presentation layer.
pub trait IdentityResolver<R>: Send + Sync {
    fn resolve(&self, request: &R) -> Identity;
}
