// Scheduler - turns activity definitions into timed jobs
//
// Holds a mirror of the registry's activities keyed by id. `reconcile` diffs a
// fresh definition list against the mirror, `tick` emits every job that falls
// due before the next tick.

use crate::domain::{Activity, ActivityId, Job};
use crate::port::{OfflineStore, TimeProvider};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

struct ScheduledActivity {
    activity: Activity,
    is_whitelisted: bool,
    /// Epoch ms
    next_exec_timestamp: i64,
}

/// Counts produced by `reconcile`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub total: usize,
    pub plugin_count: usize,
    pub started: usize,
    pub updated: usize,
    pub stopped: usize,
}

impl ReconcileSummary {
    /// Activities that must run right away
    pub fn changed(&self) -> usize {
        self.started + self.updated
    }

    /// One consumer per plugin activity plus one shared by all shell activities, capped
    pub fn consumer_count(&self, max_consumers: usize) -> usize {
        let shell_consumer = usize::from(self.total > self.plugin_count);
        (self.plugin_count + shell_consumer).min(max_consumers)
    }
}

pub struct Scheduler {
    activities: Mutex<HashMap<ActivityId, ScheduledActivity>>,
    whitelist: Vec<Regex>,
    offline_store: Arc<dyn OfflineStore>,
    time_provider: Arc<dyn TimeProvider>,
    lookahead_ms: i64,
    min_interval_secs: u64,
}

impl Scheduler {
    /// Patterns that fail to compile are logged and skipped
    pub fn new(
        whitelist: &[String],
        offline_store: Arc<dyn OfflineStore>,
        time_provider: Arc<dyn TimeProvider>,
        lookahead_ms: i64,
        min_interval_secs: u64,
    ) -> Self {
        let whitelist = whitelist
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    error!(pattern = %pattern, error = %e, "Ignoring invalid whitelist pattern");
                    None
                }
            })
            .collect();

        Self {
            activities: Mutex::new(HashMap::new()),
            whitelist,
            offline_store,
            time_provider,
            lookahead_ms,
            min_interval_secs,
        }
    }

    /// Plugins always pass; commands must match a pattern at their start (empty list allows all)
    pub fn whitelist_check(&self, activity: &Activity) -> bool {
        if activity.is_plugin() || self.whitelist.is_empty() {
            return true;
        }
        self.whitelist.iter().any(|regex| {
            regex
                .find(&activity.command)
                .map_or(false, |m| m.start() == 0)
        })
    }

    /// Replace the mirror with `activities`
    ///
    /// New and changed activities are due immediately. Offline records of
    /// activities that are no longer defined are purged.
    pub async fn reconcile(&self, activities: Vec<Activity>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let keep: Vec<ActivityId> = {
            let mut mirror = self.activities.lock().unwrap_or_else(PoisonError::into_inner);
            let now = self.time_provider.now_millis();
            let mut seen: Vec<ActivityId> = Vec::with_capacity(activities.len());

            for mut activity in activities {
                if seen.contains(&activity.id) {
                    warn!(activity_id = %activity.id, "Duplicate activity definition ignored");
                    continue;
                }
                if activity.interval < self.min_interval_secs {
                    warn!(
                        activity_id = %activity.id,
                        interval = activity.interval,
                        min_interval = self.min_interval_secs,
                        "Activity interval below minimum, clamping"
                    );
                    activity.interval = self.min_interval_secs;
                }

                if activity.is_plugin() {
                    summary.plugin_count += 1;
                }
                seen.push(activity.id.clone());

                match mirror.get_mut(&activity.id) {
                    Some(current) if current.activity.differs_from(&activity) => {
                        info!(activity_id = %activity.id, "Updated activity");
                        current.is_whitelisted = self.whitelist_check(&activity);
                        current.activity = activity;
                        current.next_exec_timestamp = now;
                        summary.updated += 1;
                    }
                    Some(current) => {
                        if current.activity.metrics != activity.metrics {
                            info!(activity_id = %activity.id, "Updated metrics");
                            current.activity.metrics = activity.metrics;
                        }
                        current.activity.name = activity.name;
                    }
                    None => {
                        info!(activity_id = %activity.id, "Started activity");
                        let is_whitelisted = self.whitelist_check(&activity);
                        if !is_whitelisted {
                            info!(activity_id = %activity.id, "Activity is blocked by whitelist");
                        }
                        mirror.insert(
                            activity.id.clone(),
                            ScheduledActivity {
                                activity,
                                is_whitelisted,
                                next_exec_timestamp: now,
                            },
                        );
                        summary.started += 1;
                    }
                }
            }

            let before = mirror.len();
            mirror.retain(|id, _| {
                let keep = seen.contains(id);
                if !keep {
                    info!(activity_id = %id, "Stopped activity");
                }
                keep
            });
            summary.stopped = before - mirror.len();
            summary.total = seen.len();
            seen
        };

        match self.offline_store.truncate(&keep).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Purged offline records of removed activities"),
            Err(e) => error!(error = %e, "Failed to purge offline records"),
        }

        info!(
            started = summary.started,
            updated = summary.updated,
            stopped = summary.stopped,
            "Activities reconciled"
        );
        summary
    }

    /// Jobs due before the next tick, ordered by due time
    ///
    /// Each emitted activity advances by exactly one interval.
    pub fn tick(&self) -> Vec<Job> {
        let mut mirror = self.activities.lock().unwrap_or_else(PoisonError::into_inner);
        let horizon = self.time_provider.now_millis() + self.lookahead_ms;

        let mut jobs: Vec<Job> = mirror
            .values_mut()
            .filter(|scheduled| scheduled.next_exec_timestamp <= horizon)
            .map(|scheduled| {
                let job = Job::new(
                    &scheduled.activity,
                    scheduled.next_exec_timestamp,
                    scheduled.is_whitelisted,
                );
                scheduled.next_exec_timestamp += scheduled.activity.interval_millis();
                job
            })
            .collect();

        jobs.sort_by_key(|job| job.exec_timestamp);
        if !jobs.is_empty() {
            debug!(count = jobs.len(), "Scheduling activities");
        }
        jobs
    }

    pub fn get_activity(&self, activity_id: &str) -> Option<Activity> {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(activity_id)
            .map(|scheduled| scheduled.activity.clone())
    }

    pub fn len(&self) -> usize {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
