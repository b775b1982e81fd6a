use serde_json::json;

use chatpyme_db::{
    seed_user_demo_data, SeedResult, SqlInventoryRepository, SqlMovementRepository,
    SqlUserRepository, UserRepository,
};

use crate::commands::{async_runtime, load_config, open_database, CommandResult, EXIT_EXECUTION};

pub fn run(telegram_id: i64) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let users = SqlUserRepository::new(pool.clone());
        let inventory = SqlInventoryRepository::new(pool.clone());
        let movements = SqlMovementRepository::new(pool.clone());

        let outcome = async {
            let user = users.get_or_create(telegram_id).await?;
            let seeded = seed_user_demo_data(&inventory, &movements, user).await?;
            Ok::<_, chatpyme_db::RepositoryError>((user, seeded))
        }
        .await
        .map_err(|error| ("seed_execution", error.to_string(), EXIT_EXECUTION));

        pool.close().await;
        outcome
    });

    match result {
        Ok((user, seeded)) => CommandResult::success_with_data(
            "seed",
            seed_message(telegram_id, &seeded),
            Some(json!({
                "user_id": user.0,
                "products_seeded": seeded.products_seeded,
                "movements_seeded": seeded.movements_seeded,
                "skipped": seeded.skipped,
            })),
        ),
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn seed_message(telegram_id: i64, seeded: &SeedResult) -> String {
    if seeded.skipped {
        format!("telegram user {telegram_id} already has inventory; nothing seeded")
    } else {
        format!(
            "seeded {} products and {} movements for telegram user {telegram_id}",
            seeded.products_seeded, seeded.movements_seeded
        )
    }
}
