use sqlx::PgPool;

/// Connect, migrate, verify the lookup table seed.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    ontask_db::health_check(&pool).await.unwrap();

    let names: Vec<(i16, String)> = sqlx::query_as("SELECT id, name FROM scheduled_run_statuses ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    let names: Vec<&str> = names.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["scheduled", "pending", "running", "completed", "failed", "cancelled"]
    );
}

/// Status ids in the seed match the scheduler's state machine.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_status_ids_match_state_machine(pool: PgPool) {
    use ontask_core::scheduling::state_machine::status_name;

    let rows: Vec<(i16, String)> = sqlx::query_as("SELECT id, name FROM scheduled_run_statuses")
        .fetch_all(&pool)
        .await
        .unwrap();
    for (id, name) in rows {
        assert_eq!(status_name(id).to_lowercase(), name);
    }
}
