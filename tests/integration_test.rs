use std::time::Duration;

use imagegen_relay::{
    db::{self, queries},
    models::job::{Job, JobPatch, JobRequest, JobStatus},
    services::{
        accounts::{AccountService, PgAccountService, IMAGE_GEN_API},
        job_store::{JobStore, RedisJobStore, StoreError, UpdateOutcome},
        queue::{DispatchQueue, RedisJobQueue},
    },
};
use uuid::Uuid;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Integration test: job store round trip against a real Redis
///
/// Verifies the conditional update script: status guard, partial merge and
/// expiry once the job is terminal.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_job_store_lifecycle() {
    let store = RedisJobStore::new(&redis_url(), Duration::from_secs(60))
        .expect("Failed to initialize job store");
    store.health_check().await.expect("Redis is not reachable");

    let job = Job::new(
        Uuid::new_v4(),
        JobRequest::Imagine {
            prompt: "a red bicycle --quality 1 --v 5.1".to_string(),
        },
    );
    store.create(&job).await.expect("Failed to create job");

    let fetched = store.get(job.id).await.unwrap().expect("Job not found");
    assert_eq!(fetched, job);

    // Progress and message id land independently
    store.update(job.id, &JobPatch::progress(40)).await.unwrap();
    store
        .update(
            job.id,
            &JobPatch {
                message_id: Some("msg-1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let fetched = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(fetched.progress, Some(40));
    assert_eq!(fetched.message_id.as_deref(), Some("msg-1"));

    // Guarded transition is rejected from the wrong status
    let outcome = store
        .update_if(
            job.id,
            &[JobStatus::Processing],
            &JobPatch::status(JobStatus::Completed),
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Rejected(JobStatus::Enqueued));

    let outcome = store
        .update_if(job.id, &[JobStatus::Enqueued], &JobPatch::failed("Job timed out"))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied);
    let fetched = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, JobStatus::Failed);
    assert_eq!(fetched.reason.as_deref(), Some("Job timed out"));

    // Unknown jobs are never created by an update
    let missing = Uuid::new_v4();
    assert!(matches!(
        store.update(missing, &JobPatch::progress(10)).await,
        Err(StoreError::NotFound(id)) if id == missing
    ));
    assert!(store.get(missing).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_redis_queue_moves_entries_through_processing() {
    let queue = RedisJobQueue::new(&redis_url()).expect("Failed to initialize queue");
    queue.health_check().await.expect("Redis is not reachable");

    let job_id = Uuid::new_v4();
    queue.enqueue(job_id).await.expect("Failed to enqueue");

    let mut dequeued = None;
    // Other entries may be left over from earlier runs
    while let Some(next) = queue.dequeue().await.expect("Failed to dequeue") {
        queue.complete(next).await.expect("Failed to complete");
        if next == job_id {
            dequeued = Some(next);
            break;
        }
    }
    assert_eq!(dequeued, Some(job_id));
}

/// Integration test: credit accounting against a real PostgreSQL
#[tokio::test]
#[ignore]
async fn test_credit_accounting() {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO profiles (id, plan) VALUES ($1, 'pro')")
        .bind(user_id)
        .execute(&pool)
        .await
        .expect("Failed to insert profile");

    let accounts = PgAccountService::new(pool.clone(), "unused-secret");

    // No balance row at all counts as out of credit
    assert!(accounts.has_run_out_of_credits(user_id).await.unwrap());

    sqlx::query("INSERT INTO user_credits (user_id, api_type, balance) VALUES ($1, $2, 1)")
        .bind(user_id)
        .bind(IMAGE_GEN_API)
        .execute(&pool)
        .await
        .expect("Failed to insert credits");
    assert!(!accounts.has_run_out_of_credits(user_id).await.unwrap());

    accounts.add_usage_entry(user_id).await.unwrap();
    accounts.subtract_credit(user_id).await.unwrap();
    accounts.subtract_credit(user_id).await.unwrap();

    let balance = queries::get_credit_balance(&pool, user_id, IMAGE_GEN_API)
        .await
        .unwrap();
    assert_eq!(balance, Some(0));
    assert!(accounts.has_run_out_of_credits(user_id).await.unwrap());
    assert_eq!(
        queries::get_profile_plan(&pool, user_id).await.unwrap().as_deref(),
        Some("pro")
    );

    sqlx::query("DELETE FROM profiles WHERE id = $1")
        .bind(user_id)
        .execute(&pool)
        .await
        .expect("Failed to clean up");
}
