//! Authorization and state-machine decisions.
//!
//! Everything in here is a pure function of already-loaded state. Handlers
//! load rows, ask a rule, and only then touch the database again, so the
//! rules can be exercised without a connection.

use crate::models::User;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub mod event;
pub mod favorite;
pub mod forum;
pub mod survey;

/// The authenticated caller, reduced to what permission checks look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub id: i32,
    pub is_superuser: bool,
    pub is_staff: bool,
}

impl Viewer {
    /// Staff and superusers moderate events, resources and aids.
    pub fn is_moderator(&self) -> bool {
        self.is_superuser || self.is_staff
    }

    /// Organizers may submit resources and aids.
    pub fn is_organizer(&self, responsible_of_any_club: bool) -> bool {
        self.is_moderator() || responsible_of_any_club
    }
}

impl From<&User> for Viewer {
    fn from(user: &User) -> Self {
        Viewer {
            id: user.id,
            is_superuser: user.is_superuser,
            is_staff: user.is_staff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(anyhow::anyhow!("unknown visibility `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_round_trips_through_its_column_value() {
        for v in [Visibility::Public, Visibility::Private] {
            assert_eq!(v.as_str().parse::<Visibility>().unwrap(), v);
        }
        assert!("secret".parse::<Visibility>().is_err());
    }

    #[test]
    fn organizers_are_moderators_or_responsibles() {
        let member = Viewer {
            id: 1,
            is_superuser: false,
            is_staff: false,
        };
        assert!(!member.is_organizer(false));
        assert!(member.is_organizer(true));
        let staff = Viewer {
            is_staff: true,
            ..member
        };
        assert!(staff.is_organizer(false));
    }
}
