use lite_core::errors::{ApplicationError, DomainError};
use lite_db::repositories::RepositoryError;

/// Maps a storage failure onto the application error taxonomy. Conflicts are
/// the caller's fault and surface as validation errors.
pub fn persistence(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::Conflict(message) => DomainError::field("non_field_errors", message).into(),
        other => ApplicationError::Persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use lite_core::errors::ApplicationError;
    use lite_db::repositories::RepositoryError;

    use super::persistence;

    #[test]
    fn conflicts_become_bad_requests_and_the_rest_are_unavailable() {
        let conflict = persistence(RepositoryError::Conflict("duplicate usage".to_owned()));
        assert_eq!(conflict.into_interface("corr-1").status_code(), 400);

        let decode = persistence(RepositoryError::Decode("bad timestamp".to_owned()));
        assert!(matches!(decode, ApplicationError::Persistence(_)));
        assert_eq!(decode.into_interface("corr-2").status_code(), 503);
    }
}
