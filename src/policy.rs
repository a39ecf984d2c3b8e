//! Role-based access decisions shared by every handler family.

use rusqlite::Connection;

use crate::identity::{self, IdentityError, Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    User,
    Classroom,
    Subject,
    Session,
    Record,
    AttendanceOverride,
    Grade,
    Assignment,
    Submission,
    Feedback,
    FeedbackResponse,
    Settings,
    /// Per-student read views (attendance profile, grade list).
    StudentData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub fn evaluate(role: Role, resource: Resource, action: Action) -> Decision {
    let allowed = match role {
        Role::Admin => true,
        Role::Teacher => match resource {
            _ if action == Action::Read => true,
            Resource::Session
            | Resource::Record
            | Resource::AttendanceOverride
            | Resource::Grade
            | Resource::Assignment
            | Resource::Submission
            | Resource::Feedback
            | Resource::FeedbackResponse => true,
            Resource::User
            | Resource::Classroom
            | Resource::Subject
            | Resource::Settings
            | Resource::StudentData => false,
        },
        // Ownership of the student or target list is checked separately.
        Role::Student => matches!(
            (resource, action),
            (
                Resource::StudentData | Resource::Assignment | Resource::Feedback,
                Action::Read
            ) | (Resource::Submission | Resource::FeedbackResponse, Action::Create)
        ),
        Role::Parent => matches!(
            (resource, action),
            (Resource::StudentData | Resource::Feedback, Action::Read)
                | (Resource::FeedbackResponse, Action::Create)
        ),
    };
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Deactivated users are denied regardless of role.
pub fn authorize(actor: &User, resource: Resource, action: Action) -> Decision {
    if !actor.active {
        return Decision::Deny;
    }
    evaluate(actor.role, resource, action)
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Permission denied")]
pub struct PermissionDenied;

/// `authorize` for callers that propagate the denial with `?`.
pub fn require(actor: &User, resource: Resource, action: Action) -> Result<(), PermissionDenied> {
    match authorize(actor, resource, action) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::warn!(actor_id = %actor.id, role = %actor.role, ?resource, ?action, "permission denied");
            Err(PermissionDenied)
        }
    }
}

/// Whether `actor` may read data belonging to `student_id`.
pub fn can_view_student(
    conn: &Connection,
    actor: &User,
    student_id: &str,
) -> Result<bool, IdentityError> {
    if authorize(actor, Resource::StudentData, Action::Read) == Decision::Deny {
        return Ok(false);
    }
    match actor.role {
        Role::Admin | Role::Teacher => Ok(true),
        Role::Student => Ok(actor.id == student_id),
        Role::Parent => identity::parent_has_student(conn, &actor.id, student_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::identity::testing::user;

    #[test]
    fn only_staff_may_edit_attendance() {
        for role in [Role::Admin, Role::Teacher] {
            assert_eq!(
                evaluate(role, Resource::AttendanceOverride, Action::Update),
                Decision::Allow
            );
        }
        for role in [Role::Student, Role::Parent] {
            assert_eq!(
                evaluate(role, Resource::AttendanceOverride, Action::Update),
                Decision::Deny
            );
            assert_eq!(evaluate(role, Resource::Session, Action::Read), Decision::Deny);
        }
    }

    #[test]
    fn students_submit_work_but_do_not_author_it() {
        assert_eq!(
            evaluate(Role::Student, Resource::Submission, Action::Create),
            Decision::Allow
        );
        assert_eq!(
            evaluate(Role::Student, Resource::Assignment, Action::Create),
            Decision::Deny
        );
        assert_eq!(
            evaluate(Role::Student, Resource::Submission, Action::Update),
            Decision::Deny
        );
        assert_eq!(
            evaluate(Role::Parent, Resource::Assignment, Action::Read),
            Decision::Deny
        );
        assert_eq!(
            evaluate(Role::Parent, Resource::FeedbackResponse, Action::Create),
            Decision::Allow
        );
        assert_eq!(
            evaluate(Role::Teacher, Resource::Feedback, Action::Create),
            Decision::Allow
        );
    }

    #[test]
    fn teachers_cannot_manage_users_or_settings() {
        assert_eq!(
            evaluate(Role::Teacher, Resource::User, Action::Create),
            Decision::Deny
        );
        assert_eq!(
            evaluate(Role::Teacher, Resource::Settings, Action::Update),
            Decision::Deny
        );
        assert_eq!(
            evaluate(Role::Admin, Resource::Settings, Action::Update),
            Decision::Allow
        );
    }

    #[test]
    fn require_denies_inactive_and_unprivileged_actors() {
        let conn = db::open_in_memory().expect("open");
        let t = user(&conn, "t", Role::Teacher);
        let s = user(&conn, "s", Role::Student);
        assert_eq!(require(&t, Resource::Record, Action::Create), Ok(()));
        assert_eq!(require(&s, Resource::Record, Action::Create), Err(PermissionDenied));

        let inactive = User { active: false, ..t };
        assert_eq!(require(&inactive, Resource::Record, Action::Create), Err(PermissionDenied));
    }

    #[test]
    fn student_data_visibility() {
        let conn = db::open_in_memory().expect("open");
        let s1 = user(&conn, "s1", Role::Student);
        let s2 = user(&conn, "s2", Role::Student);
        let p = user(&conn, "p", Role::Parent);
        let t = user(&conn, "t", Role::Teacher);

        assert!(can_view_student(&conn, &s1, &s1.id).expect("check"));
        assert!(!can_view_student(&conn, &s1, &s2.id).expect("check"));
        assert!(can_view_student(&conn, &t, &s2.id).expect("check"));

        assert!(!can_view_student(&conn, &p, &s1.id).expect("check"));
        identity::link_parent(&conn, &p, &s1).expect("link");
        assert!(can_view_student(&conn, &p, &s1.id).expect("check"));
    }

    #[test]
    fn inactive_actor_is_denied() {
        let conn = db::open_in_memory().expect("open");
        let mut a = user(&conn, "adm", Role::Admin);
        a.active = false;
        assert_eq!(
            authorize(&a, Resource::Grade, Action::Create),
            Decision::Deny
        );
    }
}
