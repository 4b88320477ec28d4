//! Constants fixed by the engine contract.
//!
//! Tests and persisted state depend on these values; changing one changes
//! observable behavior.

/// Active goals kept after capacity enforcement (locked goals may overflow it).
pub const MAX_ACTIVE_GOALS: usize = 5;
/// Non-active missions held in the queue.
pub const MISSION_QUEUE_CAP: usize = 5;
/// Highest priority an AI-proposed mission may enter the queue with.
pub const AI_PRIORITY_CEILING: f64 = 0.79;
/// Priority added when a mission is enqueued a second time.
pub const MISSION_DUPLICATE_BOOST: f64 = 0.05;
/// Priority removed from an idle queued mission per decay interval.
pub const MISSION_DECAY_STEP: f64 = 0.01;
pub const MISSION_DECAY_INTERVAL_HOURS: i64 = 24;
/// Queued missions at or below this priority are dropped.
pub const MISSION_DROP_THRESHOLD: f64 = 0.1;

/// Consecutive action failures before a goal's outcome turns `bad`.
pub const FAILURE_THRESHOLD: u32 = 3;
/// Replans allowed per goal; the attempt beyond this abandons the goal.
pub const REPLAN_CAP: u32 = 3;

/// Goals with no progress are abandoned after this age.
pub const STALE_NO_PROGRESS_HOURS: i64 = 48;
/// Goals with partial progress are abandoned after this age.
pub const STALE_PARTIAL_PROGRESS_DAYS: i64 = 7;
/// Goals with this many actions are reviewed for repeated failure.
pub const FAILED_GOAL_MIN_ACTIONS: usize = 10;
pub const FAILED_GOAL_MIN_FAILED_ACTIONS: usize = 5;
pub const FAILED_GOAL_MAX_PROGRESS: f64 = 0.5;

/// Progress ceiling while a search's follow-up parse is still pending.
pub const SEARCH_LAST_PROGRESS_CAP: f64 = 0.99;
/// Minimum result length that counts as useful output.
pub const USEFUL_OUTPUT_MIN: usize = 100;
/// Minimum result length for `web_parse_unified` results.
pub const USEFUL_OUTPUT_MIN_PARSE: usize = 200;

/// Base continuity-lock window for goals with pending work.
pub const CONTINUITY_WINDOW_HOURS: i64 = 2;
/// Floor for the stale timeout of `web_parse_unified` actions.
pub const PARSE_TIMEOUT_FLOOR_SECS: i64 = 5 * 60;

/// Descriptions kept in `recent_failures`.
pub const RECENT_FAILURES_CAP: usize = 10;
/// Completed goals consulted for duplicate detection and success rate.
pub const RECENT_GOAL_WINDOW: usize = 10;

/// Proposed goals admitted per cycle.
pub const MAX_ADMISSIONS_PER_CYCLE: usize = 3;
/// Goals compared against before the embedding-based duplicate check runs.
pub const SEMANTIC_DUPLICATE_MIN_POOL: usize = 3;
/// Priority given to a secondary goal proposed outside 1-10.
pub const SECONDARY_DEFAULT_PRIORITY: u8 = 7;
/// Principle slots self-modification may overwrite.
pub const SELF_MOD_MIN_SLOT: u8 = 4;
pub const SELF_MOD_MAX_SLOT: u8 = 10;
