use crate::commands::{with_migrated_pool, CommandResult};

/// Preflight for `lite-server`: config validates, the database opens and
/// migrations are current.
pub fn run() -> CommandResult {
    match with_migrated_pool("start", |_, _| async { Ok(()) }) {
        Ok((config, ())) => CommandResult::success(
            "start",
            format!(
                "preflight passed; lite-server would listen on {} (hmrc integration {})",
                config.listen_address(),
                if config.hmrc.enabled { "enabled" } else { "disabled" }
            ),
        ),
        Err(failure) => failure,
    }
}
