//! Role gate consulted by every handler.

use crate::models::{Profile, Role};
use crate::schema::{Access, RecordSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Create,
    Retrieve,
    Update,
    Destroy,
}

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Record(&'a RecordSchema),
    /// An appointment; `counselor` is the profile that booked it, when known.
    Appointment { counselor: Option<i64> },
    StudentDirectory,
    StudentSearch,
    Analytics,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthenticated,
    Forbidden,
}

pub fn authorize(caller: Option<&Profile>, action: Action, target: Target<'_>) -> Result<(), Denial> {
    match target {
        Target::Analytics | Target::Storage | Target::StudentSearch => Ok(()),
        Target::StudentDirectory => caller.map(|_| ()).ok_or(Denial::Unauthenticated),
        Target::Record(schema) => authorize_record(caller, action, schema),
        Target::Appointment { counselor } => {
            let caller = caller.ok_or(Denial::Unauthenticated)?;
            match action {
                Action::Destroy => {
                    let owns = counselor == Some(caller.id);
                    if caller.role == Role::Admin || owns {
                        Ok(())
                    } else {
                        Err(Denial::Forbidden)
                    }
                }
                _ => Ok(()),
            }
        }
    }
}

fn authorize_record(caller: Option<&Profile>, action: Action, schema: &RecordSchema) -> Result<(), Denial> {
    let needs_caller =
        schema.access == Access::Authenticated || (action == Action::Create && schema.owner.is_some());

    match caller {
        None if needs_caller => Err(Denial::Unauthenticated),
        Some(profile) if action == Action::Create && schema.staff_create && !profile.role.is_staff() => {
            Err(Denial::Forbidden)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{lookup, INDIVIDUAL_RECORD_FORM, RESOURCE, ROUTINE_INTERVIEW};

    fn profile(id: i64, role: Role) -> Profile {
        Profile {
            id,
            user_id: id,
            username: format!("user{id}"),
            role,
        }
    }

    #[test]
    fn open_collections_accept_anonymous_callers() {
        let schema = lookup(ROUTINE_INTERVIEW).unwrap();
        for action in [Action::List, Action::Create, Action::Retrieve, Action::Update, Action::Destroy] {
            assert_eq!(authorize(None, action, Target::Record(schema)), Ok(()));
        }
    }

    #[test]
    fn authenticated_collections_reject_anonymous_callers() {
        let schema = lookup("kinder").unwrap();
        assert_eq!(
            authorize(None, Action::List, Target::Record(schema)),
            Err(Denial::Unauthenticated)
        );
        let student = profile(1, Role::Student);
        assert_eq!(authorize(Some(&student), Action::List, Target::Record(schema)), Ok(()));
    }

    #[test]
    fn owner_bound_creation_needs_a_caller() {
        let schema = lookup(INDIVIDUAL_RECORD_FORM).unwrap();
        assert_eq!(authorize(None, Action::List, Target::Record(schema)), Ok(()));
        assert_eq!(
            authorize(None, Action::Create, Target::Record(schema)),
            Err(Denial::Unauthenticated)
        );
    }

    #[test]
    fn resources_are_created_by_staff_only() {
        let schema = lookup(RESOURCE).unwrap();
        let student = profile(1, Role::Student);
        let counselor = profile(2, Role::Counselor);
        let psychometrician = profile(3, Role::Psychometrician);

        assert_eq!(
            authorize(Some(&student), Action::Create, Target::Record(schema)),
            Err(Denial::Forbidden)
        );
        assert_eq!(authorize(Some(&student), Action::List, Target::Record(schema)), Ok(()));
        assert_eq!(authorize(Some(&counselor), Action::Create, Target::Record(schema)), Ok(()));
        assert_eq!(
            authorize(Some(&psychometrician), Action::Create, Target::Record(schema)),
            Ok(())
        );
    }

    #[test]
    fn appointment_deletion_is_limited_to_owner_or_admin() {
        let owner = profile(7, Role::Counselor);
        let other = profile(8, Role::Counselor);
        let admin = profile(9, Role::Admin);
        let target = Target::Appointment { counselor: Some(7) };

        assert_eq!(authorize(Some(&owner), Action::Destroy, target), Ok(()));
        assert_eq!(authorize(Some(&admin), Action::Destroy, target), Ok(()));
        assert_eq!(authorize(Some(&other), Action::Destroy, target), Err(Denial::Forbidden));
        assert_eq!(authorize(None, Action::Destroy, target), Err(Denial::Unauthenticated));
        assert_eq!(
            authorize(Some(&other), Action::List, Target::Appointment { counselor: None }),
            Ok(())
        );
    }

    #[test]
    fn student_directory_requires_login_but_search_does_not() {
        assert_eq!(
            authorize(None, Action::List, Target::StudentDirectory),
            Err(Denial::Unauthenticated)
        );
        assert_eq!(authorize(None, Action::List, Target::StudentSearch), Ok(()));
    }
}
