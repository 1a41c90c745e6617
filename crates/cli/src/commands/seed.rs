use lite_db::{DemoDataset, SeedCaseInfo};

use crate::commands::{with_migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    let result = with_migrated_pool("seed", |_, pool| async move {
        let seeded =
            DemoDataset::load(&pool).await.map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        let verification =
            DemoDataset::verify(&pool).await.map_err(|error| ("seed_verification", error.to_string(), 7u8))?;
        if !verification.all_present {
            return Err(("seed_verification", verification_failure(&verification.checks), 7u8));
        }
        Ok(seeded.cases_seeded)
    });

    match result {
        Ok((_, cases)) => CommandResult::success(
            "seed",
            format!("demo dataset loaded with {} cases:\n{}", cases.len(), describe(&cases)),
        ),
        Err(failure) => failure,
    }
}

fn describe(cases: &[SeedCaseInfo]) -> String {
    cases
        .iter()
        .map(|case| format!("  - {}: {} ({})", case.case_id, case.status.as_str(), case.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn verification_failure(checks: &[(&'static str, bool)]) -> String {
    let failed = checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed.is_empty() {
        "some demo rows failed to load".to_string()
    } else {
        format!("demo dataset verification failed for: {}", failed.join(", "))
    }
}
