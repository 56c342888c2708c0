use crate::cache::PermissionDecisionCache;
use crate::errors::PermError;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const CACHE_HOUSEKEEPING: &str = "cache_housekeeping";

/// Initialize and start the job scheduler with the cache housekeeping task
pub async fn init_scheduler(
    cache: Arc<PermissionDecisionCache>,
    cron: &str,
    max_age: Duration,
) -> Result<JobScheduler, PermError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| PermError::Scheduler(format!("Failed to create job scheduler: {}", e)))?;

    // Sweep old decision cache entries - every two minutes by default
    let housekeeping_job = Job::new_async(cron, move |_uuid, _l| {
        let cache = cache.clone();
        Box::pin(async move {
            info!("Running {} job", CACHE_HOUSEKEEPING);
            match run_job(&cache, CACHE_HOUSEKEEPING, max_age) {
                Ok(count) => info!("Swept {} expired cache entries", count),
                Err(e) => error!("Failed to sweep permission cache: {}", e),
            }
        })
    })
    .map_err(|e| {
        PermError::Scheduler(format!("Failed to create cache housekeeping job: {}", e))
    })?;

    sched
        .add(housekeeping_job)
        .await
        .map_err(|e| PermError::Scheduler(format!("Failed to add cache housekeeping job: {}", e)))?;

    // Start the scheduler
    sched
        .start()
        .await
        .map_err(|e| PermError::Scheduler(format!("Failed to start job scheduler: {}", e)))?;

    info!(cron, max_age_secs = max_age.as_secs(), "Job scheduler started with {} jobs", 1);

    Ok(sched)
}

fn run_job(
    cache: &PermissionDecisionCache,
    job_name: &str,
    max_age: Duration,
) -> Result<usize, PermError> {
    match job_name {
        CACHE_HOUSEKEEPING => Ok(cache.sweep(max_age)),
        _ => Err(PermError::Other(format!("Unknown job name: {}", job_name))),
    }
}

/// Manually trigger a job by name (used by the console `sweep` command)
pub fn trigger_job_manually(
    cache: &PermissionDecisionCache,
    job_name: &str,
    max_age: Duration,
) -> Result<usize, PermError> {
    info!("Manually triggering job: {}", job_name);
    let result = run_job(cache, job_name, max_age);
    match &result {
        Ok(count) => info!(
            "Manually triggered job {} completed: {} records",
            job_name, count
        ),
        Err(e) => error!("Manually triggered job {} failed: {}", job_name, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Generations;
    use crate::context::QueryOptions;
    use crate::engine::{DecisionMap, PermissionEngine};
    use crate::subject::SubjectId;

    struct AllowAll;

    impl PermissionEngine for AllowAll {
        fn is_subject_loaded(&self, _subject: SubjectId) -> bool {
            true
        }

        fn compute_decisions(
            &self,
            _subject: SubjectId,
            _query: &QueryOptions,
        ) -> Option<DecisionMap> {
            Some([("*", true)].into_iter().collect())
        }
    }

    fn cache() -> Arc<PermissionDecisionCache> {
        Arc::new(PermissionDecisionCache::new(
            Arc::new(AllowAll),
            Arc::new(Generations::default()),
        ))
    }

    #[test]
    fn test_trigger_housekeeping() {
        let cache = cache();
        cache.get(SubjectId::offline("P1"), &QueryOptions::empty(), "fly");
        assert_eq!(
            trigger_job_manually(&cache, CACHE_HOUSEKEEPING, Duration::from_secs(600)).unwrap(),
            0
        );
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(
            trigger_job_manually(&cache, CACHE_HOUSEKEEPING, Duration::ZERO).unwrap(),
            1
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_trigger_unknown_job() {
        let cache = cache();
        let err = trigger_job_manually(&cache, "nope", Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("Unknown job name"));
    }

    #[tokio::test]
    async fn test_init_scheduler_rejects_bad_cron() {
        let result = init_scheduler(cache(), "not a cron", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PermError::Scheduler(_))));
    }
}
