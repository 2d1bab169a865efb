use std::time::Duration;

/// Environment variable overriding the scenario's base URL.
pub const BASE_URL_ENV: &str = "BASE_URL";

/// Base URL used when neither `BASE_URL` nor the document provide one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

pub const DEFAULT_PATH: &str = "/health";

/// Default time a virtual user sleeps between requests.
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between two RunController scheduling ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_SCENARIO_NAME: &str = "scenario";

/// Workload name given to flat (single-workload) documents.
pub const DEFAULT_WORKLOAD_NAME: &str = "default";

// Latency histogram range, in microseconds.
pub const HISTOGRAM_LOWEST_US: u64 = 1;
pub const HISTOGRAM_HIGHEST_US: u64 = 3_600_000_000;
pub const HISTOGRAM_SIGFIG: u8 = 3;

pub const EXIT_OK: u8 = 0;
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;
pub const EXIT_CONFIG_ERROR: u8 = 104;
pub const EXIT_ABORTED: u8 = 105;
pub const EXIT_INTERNAL_ERROR: u8 = 110;
