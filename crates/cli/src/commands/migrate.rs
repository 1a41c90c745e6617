use crate::commands::{with_migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    match with_migrated_pool("migrate", |_, _| async { Ok(()) }) {
        Ok((config, ())) => {
            CommandResult::success("migrate", format!("applied pending migrations to `{}`", config.database.url))
        }
        Err(failure) => failure,
    }
}
