use std::time::Duration;

/// Default number of locations held open at once before `Open` starts
/// returning `CapacityExceeded`.
pub const DEFAULT_MAX_LOCATIONS: usize = 10_000;

/// Default per-location cap on the number of stored facts/rules.
pub const DEFAULT_MAX_FACTS: usize = 100_000;

/// Default in-memory cron timeline capacity, per location's internal cron.
pub const DEFAULT_CRON_CAPACITY: usize = 10_000;

/// Default location cache TTL when none is configured explicitly.
pub const DEFAULT_LOCATION_TTL: Duration = Duration::from_secs(15 * 60);

/// Default number of crolt partitions jobs are sharded across.
pub const DEFAULT_CROLT_PARTITIONS: usize = 16;

/// Default number of concurrent crolt work loops.
pub const DEFAULT_CROLT_WORKERS: usize = 4;

/// Staleness threshold for a crolt partition owner token.
pub const DEFAULT_PARTITION_OWNER_TTL: Duration = Duration::from_secs(30);

/// Default HTTP request timeout used by crolt's worker loops and by `CroltSimple`.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default JS evaluation timeout for action/condition code.
pub const DEFAULT_JS_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the default action interpreter, used when an action omits `endpoint`.
pub const DEFAULT_ACTION_INTERPRETER: &str = "javascript";

/// Environment variable that relaxes the ephemeral-cronner + finite-TTL `InvalidConfig` check.
pub const RULES_CRON_OVERRIDE_ENV: &str = "RULES_CRON_OVERRIDE";

/// Environment variable overriding the logging output format (`json` or `pretty`).
pub const RULES_LOGS_ENV: &str = "RULES_LOGS";
