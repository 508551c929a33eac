//! Forum capability resolution.
//!
//! A forum is either public (open to every authenticated user, managed by
//! its creator) or private to exactly one club (open to the club's active
//! members and responsible, managed by the responsible). Threads, posts and
//! surveys never carry permissions of their own: they inherit the owning
//! forum's [`Capabilities`] and add an authorship rule on top.

use super::{Viewer, Visibility};
use serde::Serialize;

/// The visibility/club pair a forum row is allowed to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForumKind {
    Public,
    Private { club_id: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForumKindError {
    PrivateWithoutClub,
    PublicWithClub,
}

impl ForumKindError {
    pub fn message(self) -> &'static str {
        match self {
            ForumKindError::PrivateWithoutClub => "a private forum must belong to a club",
            ForumKindError::PublicWithClub => "a public forum cannot belong to a club",
        }
    }
}

impl ForumKind {
    pub fn from_parts(visibility: Visibility, club_id: Option<i32>) -> Result<Self, ForumKindError> {
        match (visibility, club_id) {
            (Visibility::Public, None) => Ok(ForumKind::Public),
            (Visibility::Public, Some(_)) => Err(ForumKindError::PublicWithClub),
            (Visibility::Private, Some(club_id)) => Ok(ForumKind::Private { club_id }),
            (Visibility::Private, None) => Err(ForumKindError::PrivateWithoutClub),
        }
    }

    pub fn visibility(self) -> Visibility {
        match self {
            ForumKind::Public => Visibility::Public,
            ForumKind::Private { .. } => Visibility::Private,
        }
    }

    pub fn club_id(self) -> Option<i32> {
        match self {
            ForumKind::Public => None,
            ForumKind::Private { club_id } => Some(club_id),
        }
    }
}

/// What the viewer's relationship to the owning club looks like right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClubStanding {
    pub responsible_id: Option<i32>,
    pub viewer_is_member: bool,
}

impl ClubStanding {
    fn admits(&self, viewer: &Viewer) -> bool {
        self.responsible_id == Some(viewer.id) || self.viewer_is_member
    }
}

/// Forum state needed to resolve capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForumAccess {
    Public { created_by: i32 },
    Private { standing: ClubStanding },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub can_read: bool,
    pub can_write: bool,
    pub can_manage: bool,
}

impl Capabilities {
    pub fn resolve(access: &ForumAccess, viewer: Option<&Viewer>) -> Capabilities {
        let Some(viewer) = viewer else {
            return Capabilities {
                can_read: matches!(access, ForumAccess::Public { .. }),
                can_write: false,
                can_manage: false,
            };
        };

        if viewer.is_superuser {
            return Capabilities {
                can_read: true,
                can_write: true,
                can_manage: true,
            };
        }

        match access {
            ForumAccess::Public { created_by } => Capabilities {
                can_read: true,
                can_write: true,
                can_manage: *created_by == viewer.id,
            },
            ForumAccess::Private { standing } => {
                let admitted = standing.admits(viewer);
                Capabilities {
                    can_read: admitted,
                    can_write: admitted,
                    can_manage: standing.responsible_id == Some(viewer.id),
                }
            }
        }
    }

    /// Edit/delete rule for threads, posts and surveys: managers always,
    /// authors while they can still write to the forum.
    pub fn can_edit_content(&self, viewer: Option<&Viewer>, author_id: i32) -> bool {
        if self.can_manage {
            return true;
        }
        self.can_write && viewer.map_or(false, |v| v.id == author_id)
    }

    /// Closed threads only accept replies from forum managers.
    pub fn can_reply(&self, thread_closed: bool) -> bool {
        self.can_write && (!thread_closed || self.can_manage)
    }
}

/// Only superusers and the target club's responsible may open a private forum.
pub fn can_create(kind: ForumKind, viewer: &Viewer, club_responsible_id: Option<i32>) -> bool {
    match kind {
        ForumKind::Public => true,
        ForumKind::Private { .. } => {
            viewer.is_superuser || club_responsible_id == Some(viewer.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSIBLE: i32 = 1;
    const MEMBER: i32 = 2;
    const OUTSIDER: i32 = 3;
    const ADMIN: i32 = 4;

    fn user(id: i32) -> Viewer {
        Viewer {
            id,
            is_superuser: id == ADMIN,
            is_staff: false,
        }
    }

    fn private_forum_seen_by(viewer: i32) -> ForumAccess {
        ForumAccess::Private {
            standing: ClubStanding {
                responsible_id: Some(RESPONSIBLE),
                viewer_is_member: viewer == MEMBER,
            },
        }
    }

    fn caps(access: ForumAccess, viewer: i32) -> Capabilities {
        Capabilities::resolve(&access, Some(&user(viewer)))
    }

    #[test]
    fn any_authenticated_user_writes_to_a_public_forum() {
        let forum = ForumAccess::Public { created_by: ADMIN };
        for id in [RESPONSIBLE, MEMBER, OUTSIDER] {
            let c = caps(forum, id);
            assert!(c.can_read);
            assert!(c.can_write);
            assert!(!c.can_manage);
        }
    }

    #[test]
    fn anonymous_viewers_only_read_public_forums() {
        let public = Capabilities::resolve(&ForumAccess::Public { created_by: 1 }, None);
        assert_eq!(
            public,
            Capabilities {
                can_read: true,
                can_write: false,
                can_manage: false
            }
        );
        let private = Capabilities::resolve(&private_forum_seen_by(OUTSIDER), None);
        assert_eq!(private, Capabilities::default());
    }

    #[test]
    fn private_forum_is_closed_to_outsiders() {
        let outsider = caps(private_forum_seen_by(OUTSIDER), OUTSIDER);
        assert!(!outsider.can_read);
        assert!(!outsider.can_write);
        assert!(!outsider.can_manage);

        let member = caps(private_forum_seen_by(MEMBER), MEMBER);
        assert!(member.can_read);
        assert!(member.can_write);
        assert!(!member.can_manage);

        let responsible = caps(private_forum_seen_by(RESPONSIBLE), RESPONSIBLE);
        assert!(responsible.can_read && responsible.can_write && responsible.can_manage);
    }

    #[test]
    fn superuser_overrides_everything() {
        let c = caps(private_forum_seen_by(ADMIN), ADMIN);
        assert!(c.can_read && c.can_write && c.can_manage);
    }

    #[test]
    fn leaving_the_club_revokes_access_on_next_resolution() {
        let before = caps(private_forum_seen_by(MEMBER), MEMBER);
        assert!(before.can_read);
        let after = Capabilities::resolve(
            &ForumAccess::Private {
                standing: ClubStanding {
                    responsible_id: Some(RESPONSIBLE),
                    viewer_is_member: false,
                },
            },
            Some(&user(MEMBER)),
        );
        assert!(!after.can_read);
        assert!(!after.can_write);
    }

    #[test]
    fn private_forum_without_responsible_has_no_manager() {
        let access = ForumAccess::Private {
            standing: ClubStanding {
                responsible_id: None,
                viewer_is_member: true,
            },
        };
        let c = caps(access, MEMBER);
        assert!(c.can_write);
        assert!(!c.can_manage);
    }

    #[test]
    fn public_forum_is_managed_by_its_creator() {
        let c = caps(ForumAccess::Public { created_by: MEMBER }, MEMBER);
        assert!(c.can_manage);
    }

    #[test]
    fn authors_edit_only_while_they_can_write() {
        let member_caps = caps(private_forum_seen_by(MEMBER), MEMBER);
        assert!(member_caps.can_edit_content(Some(&user(MEMBER)), MEMBER));
        assert!(!member_caps.can_edit_content(Some(&user(MEMBER)), OUTSIDER));

        // the author was removed from the club
        let removed = caps(private_forum_seen_by(OUTSIDER), OUTSIDER);
        assert!(!removed.can_edit_content(Some(&user(OUTSIDER)), OUTSIDER));

        let responsible = caps(private_forum_seen_by(RESPONSIBLE), RESPONSIBLE);
        assert!(responsible.can_edit_content(Some(&user(RESPONSIBLE)), MEMBER));
    }

    #[test]
    fn closed_threads_accept_replies_from_managers_only() {
        let member = caps(private_forum_seen_by(MEMBER), MEMBER);
        assert!(member.can_reply(false));
        assert!(!member.can_reply(true));
        let responsible = caps(private_forum_seen_by(RESPONSIBLE), RESPONSIBLE);
        assert!(responsible.can_reply(true));
    }

    #[test]
    fn forum_kind_rejects_mismatched_club() {
        assert_eq!(
            ForumKind::from_parts(Visibility::Private, None),
            Err(ForumKindError::PrivateWithoutClub)
        );
        assert_eq!(
            ForumKind::from_parts(Visibility::Public, Some(3)),
            Err(ForumKindError::PublicWithClub)
        );
        let kind = ForumKind::from_parts(Visibility::Private, Some(3)).unwrap();
        assert_eq!(kind.club_id(), Some(3));
        assert_eq!(kind.visibility(), Visibility::Private);
    }

    #[test]
    fn private_forums_are_created_by_responsible_or_superuser() {
        let kind = ForumKind::Private { club_id: 9 };
        assert!(can_create(kind, &user(RESPONSIBLE), Some(RESPONSIBLE)));
        assert!(can_create(kind, &user(ADMIN), Some(RESPONSIBLE)));
        assert!(!can_create(kind, &user(MEMBER), Some(RESPONSIBLE)));
        assert!(can_create(ForumKind::Public, &user(OUTSIDER), None));
    }
}
