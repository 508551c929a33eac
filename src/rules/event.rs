//! Event scheduling and registration.

use super::{Viewer, Visibility};
use crate::{error::AppError, models::Event};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Planned,
    Ongoing,
    Finished,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Planned => "planned",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Finished => "finished",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(EventStatus::Planned),
            "ongoing" => Ok(EventStatus::Ongoing),
            "finished" => Ok(EventStatus::Finished),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown event status `{other}`")),
        }
    }
}

impl Event {
    pub fn duration(&self) -> Duration {
        self.ends_at - self.starts_at
    }

    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.ends_at < now
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.starts_at > now
    }

    pub fn is_ongoing(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }
}

pub fn schedule_is_valid(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> bool {
    ends_at > starts_at
}

/// Staff, superusers and the owning club's responsible run an event.
pub fn can_manage(viewer: &Viewer, club_responsible_id: Option<i32>) -> bool {
    viewer.is_moderator() || club_responsible_id == Some(viewer.id)
}

/// Private events are shown to moderators and to the owning club's
/// members and responsible.
pub fn can_view(visibility: Visibility, viewer: Option<&Viewer>, viewer_in_club: bool) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Private => viewer.map_or(false, |v| v.is_moderator() || viewer_in_club),
    }
}

/// Private events must be scoped to a club, otherwise nobody but staff
/// could ever register.
pub fn scope_is_valid(visibility: Visibility, club_id: Option<i32>) -> bool {
    visibility == Visibility::Public || club_id.is_some()
}

/// Facts loaded for a registration attempt.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub visibility: Visibility,
    pub viewer_is_member: bool,
    pub already_registered: bool,
    pub participant_count: i64,
    pub max_participants: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    NotAllowed,
    AlreadyRegistered,
    EventFull,
}

/// Checked in order: permission, duplicate, capacity.
pub fn check_registration(viewer: &Viewer, reg: &Registration) -> Result<(), RegistrationError> {
    let permitted =
        reg.visibility == Visibility::Public || viewer.is_moderator() || reg.viewer_is_member;
    if !permitted {
        return Err(RegistrationError::NotAllowed);
    }
    if reg.already_registered {
        return Err(RegistrationError::AlreadyRegistered);
    }
    if reg.participant_count >= i64::from(reg.max_participants) {
        return Err(RegistrationError::EventFull);
    }
    Ok(())
}

impl From<RegistrationError> for AppError {
    fn from(e: RegistrationError) -> AppError {
        match e {
            RegistrationError::NotAllowed => {
                AppError::forbidden("you are not allowed to register for this event")
            }
            RegistrationError::AlreadyRegistered => {
                AppError::conflict("you are already registered for this event")
            }
            RegistrationError::EventFull => AppError::conflict("event full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer(id: i32) -> Viewer {
        Viewer {
            id,
            is_superuser: false,
            is_staff: false,
        }
    }

    fn public_event(count: i64, max: i32) -> Registration {
        Registration {
            visibility: Visibility::Public,
            viewer_is_member: false,
            already_registered: false,
            participant_count: count,
            max_participants: max,
        }
    }

    #[test]
    fn second_registration_hits_capacity() {
        let reg = public_event(0, 1);
        assert_eq!(check_registration(&viewer(1), &reg), Ok(()));
        let reg = public_event(1, 1);
        assert_eq!(
            check_registration(&viewer(2), &reg),
            Err(RegistrationError::EventFull)
        );
    }

    #[test]
    fn private_events_need_membership_or_staff() {
        let reg = Registration {
            visibility: Visibility::Private,
            ..public_event(0, 10)
        };
        assert_eq!(
            check_registration(&viewer(1), &reg),
            Err(RegistrationError::NotAllowed)
        );
        let staff = Viewer {
            is_staff: true,
            ..viewer(1)
        };
        assert_eq!(check_registration(&staff, &reg), Ok(()));
        let member = Registration {
            viewer_is_member: true,
            ..reg
        };
        assert_eq!(check_registration(&viewer(1), &member), Ok(()));
    }

    #[test]
    fn preconditions_are_checked_in_order() {
        // not allowed wins over duplicate and full
        let reg = Registration {
            visibility: Visibility::Private,
            viewer_is_member: false,
            already_registered: true,
            participant_count: 5,
            max_participants: 5,
        };
        assert_eq!(
            check_registration(&viewer(1), &reg),
            Err(RegistrationError::NotAllowed)
        );
        // duplicate wins over full
        let reg = Registration {
            visibility: Visibility::Public,
            ..reg
        };
        assert_eq!(
            check_registration(&viewer(1), &reg),
            Err(RegistrationError::AlreadyRegistered)
        );
    }

    #[test]
    fn schedule_and_scope_checks() {
        let now = Utc::now();
        assert!(schedule_is_valid(now, now + Duration::hours(1)));
        assert!(!schedule_is_valid(now, now));
        assert!(scope_is_valid(Visibility::Public, None));
        assert!(!scope_is_valid(Visibility::Private, None));
        assert!(scope_is_valid(Visibility::Private, Some(1)));
    }

    #[test]
    fn event_time_helpers() {
        let now = Utc::now();
        let event = Event {
            id: 1,
            club_id: None,
            title: "Hackathon".to_string(),
            description: "24 hours of code".to_string(),
            location: "Main hall".to_string(),
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(2),
            status: EventStatus::Ongoing.as_str().to_string(),
            visibility: Visibility::Public.as_str().to_string(),
            max_participants: 30,
            featured: false,
            promotion_image: None,
            promotion_description: None,
            created_by: 1,
        };
        assert!(event.is_ongoing(now));
        assert!(!event.is_past(now));
        assert!(!event.is_upcoming(now));
        assert_eq!(event.duration(), Duration::hours(3));
        assert!(event.is_past(now + Duration::hours(3)));
    }

    #[test]
    fn managers_are_staff_or_club_responsible() {
        assert!(can_manage(&viewer(4), Some(4)));
        assert!(!can_manage(&viewer(4), Some(5)));
        assert!(!can_manage(&viewer(4), None));
        let admin = Viewer {
            is_superuser: true,
            ..viewer(4)
        };
        assert!(can_manage(&admin, None));
    }

    #[test]
    fn private_events_are_hidden_from_outsiders() {
        assert!(can_view(Visibility::Public, None, false));
        assert!(!can_view(Visibility::Private, None, false));
        assert!(!can_view(Visibility::Private, Some(&viewer(1)), false));
        assert!(can_view(Visibility::Private, Some(&viewer(1)), true));
        let staff = Viewer {
            is_staff: true,
            ..viewer(1)
        };
        assert!(can_view(Visibility::Private, Some(&staff), false));
    }

    #[test]
    fn status_parses_its_column_value() {
        assert_eq!("cancelled".parse::<EventStatus>().unwrap(), EventStatus::Cancelled);
        assert!("postponed".parse::<EventStatus>().is_err());
    }
}
