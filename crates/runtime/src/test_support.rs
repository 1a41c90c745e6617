use std::sync::Arc;

use lite_db::repositories::{ChangeSet, RepositoryError, UnitOfWork};

use crate::stores::Stores;

struct RejectingUnitOfWork;

#[async_trait::async_trait]
impl UnitOfWork for RejectingUnitOfWork {
    async fn commit(&self, _changes: ChangeSet) -> Result<(), RepositoryError> {
        Err(RepositoryError::Decode("disk full".to_owned()))
    }
}

/// In-memory stores whose change-set writes always fail.
pub(crate) fn failing_stores() -> Stores {
    Stores { unit_of_work: Arc::new(RejectingUnitOfWork), ..Stores::in_memory() }
}
