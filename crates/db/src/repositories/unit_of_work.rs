use super::audit::insert_event;
use super::case::upsert_case;
use super::execution_queue::{insert_transition, upsert_task};
use super::licence::{upsert_decision, upsert_licence};
use super::outbox::insert_notification;
use super::{ChangeSet, RepositoryError, UnitOfWork};
use crate::DbPool;

pub struct SqlUnitOfWork {
    pool: DbPool,
}

impl SqlUnitOfWork {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UnitOfWork for SqlUnitOfWork {
    async fn commit(&self, changes: ChangeSet) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for case in &changes.cases {
            upsert_case(&mut tx, case).await?;
        }
        for licence in &changes.licences {
            upsert_licence(&mut tx, licence).await?;
        }
        for decision in &changes.decisions {
            upsert_decision(&mut tx, decision).await?;
        }
        for task in &changes.tasks {
            upsert_task(&mut tx, task).await?;
        }
        for transition in &changes.transitions {
            insert_transition(&mut tx, transition).await?;
        }
        for event in &changes.events {
            insert_event(&mut tx, event).await?;
        }
        for notification in &changes.notifications {
            insert_notification(&mut tx, notification).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
