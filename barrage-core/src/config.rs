use crate::{
    ConfigError, Threshold, DEFAULT_PACING, DEFAULT_PATH, DEFAULT_REQUEST_TIMEOUT,
};
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

/// Immutable description of a whole run.
///
/// Built by [`ScenarioDocument::resolve`](crate::ScenarioDocument::resolve) or by hand through the
/// builder methods, then handed to the run controller by value.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioSpec {
    pub name: String,
    pub base_url: Url,
    pub workloads: Vec<Workload>,
    pub thresholds: Vec<Threshold>,
}

impl ScenarioSpec {
    pub fn new(name: &str, base_url: Url) -> Self {
        Self {
            name: name.to_string(),
            base_url,
            workloads: vec![],
            thresholds: vec![],
        }
    }

    pub fn workload(mut self, workload: Workload) -> Self {
        self.workloads.push(workload);
        self
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    /// Time after which every workload's target concurrency is zero.
    pub fn total_duration(&self) -> Duration {
        self.workloads
            .iter()
            .map(|w| w.executor.total_duration())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    pub fn workload_named(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    /// Checks every invariant the engine relies on, reporting the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workloads.is_empty() {
            return Err(ConfigError::invalid(
                "scenarios",
                "at least one scenario is required",
            ));
        }

        let mut names = HashSet::new();
        for workload in &self.workloads {
            if !names.insert(workload.name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("scenarios.{}", workload.name),
                    "duplicate scenario name",
                ));
            }
            workload.validate()?;
        }

        for threshold in &self.thresholds {
            if let Some(scope) = &threshold.scenario {
                if !names.contains(scope.as_str()) {
                    return Err(ConfigError::UnknownScenario {
                        expression: threshold.expression.clone(),
                        scenario: scope.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// One named group of virtual users sharing an executor and a request template.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub name: String,
    pub executor: Executor,
    pub request: RequestTemplate,
    pub pacing: Duration,
    pub timeout: Duration,
    pub rps: Option<NonZeroU32>,
}

impl Workload {
    pub fn new(name: &str, executor: Executor) -> Self {
        Self {
            name: name.to_string(),
            executor,
            request: RequestTemplate::default(),
            pacing: DEFAULT_PACING,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            rps: None,
        }
    }

    pub fn request(mut self, request: RequestTemplate) -> Self {
        self.request = request;
        self
    }

    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rps(mut self, rps: NonZeroU32) -> Self {
        self.rps = Some(rps);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let field = |suffix: &str| format!("scenarios.{}.{suffix}", self.name);

        if self.name.is_empty() {
            return Err(ConfigError::invalid("scenarios", "scenario name is empty"));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(field("timeout"), "must be positive"));
        }

        match &self.executor {
            Executor::Constant { duration, .. } => {
                if duration.is_zero() {
                    return Err(ConfigError::invalid(field("duration"), "must be positive"));
                }
            }
            Executor::Ramping { stages, .. } => {
                if stages.is_empty() {
                    return Err(ConfigError::invalid(
                        field("stages"),
                        "ramping scenarios need at least one stage",
                    ));
                }
                for (idx, stage) in stages.iter().enumerate() {
                    if stage.duration.is_zero() {
                        return Err(ConfigError::invalid(
                            field(&format!("stages[{idx}].duration")),
                            "must be positive",
                        ));
                    }
                }
            }
        }

        self.request.validate(&field("request"))
    }
}

/// Concurrency shape of a workload.
#[derive(Clone, Debug, PartialEq)]
pub enum Executor {
    /// A fixed number of virtual users for the whole duration.
    Constant { vus: u64, duration: Duration },
    /// Starts at `start_vus` and moves through `stages` in order.
    Ramping {
        start_vus: u64,
        stages: Vec<Stage>,
        interpolation: Interpolation,
    },
}

impl Executor {
    pub fn constant(vus: u64, duration: Duration) -> Self {
        Self::Constant { vus, duration }
    }

    pub fn ramping(start_vus: u64, stages: Vec<Stage>) -> Self {
        Self::Ramping {
            start_vus,
            stages,
            interpolation: Interpolation::default(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant-vus",
            Self::Ramping { .. } => "ramping-vus",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// How the target moves between two stage boundaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Linear,
    /// Jump to the stage's target when the stage starts.
    Step,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestTemplate {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub expected_status: ExpectedStatus,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self::get(DEFAULT_PATH)
    }
}

impl RequestTemplate {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            headers: vec![],
            expected_status: ExpectedStatus::default(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn expect(mut self, expected_status: ExpectedStatus) -> Self {
        self.expected_status = expected_status;
        self
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.method.is_empty() || !self.method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ConfigError::invalid(
                format!("{field}.method"),
                format!("`{}` is not an HTTP method", self.method),
            ));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::invalid(
                format!("{field}.path"),
                "must start with `/`",
            ));
        }
        if let ExpectedStatus::Codes(codes) = &self.expected_status {
            if codes.is_empty() {
                return Err(ConfigError::invalid(
                    format!("{field}.expectedStatus"),
                    "list of status codes is empty",
                ));
            }
            if let Some(code) = codes.iter().find(|&&c| !STATUS_CODES.contains(&c)) {
                return Err(ConfigError::invalid(
                    format!("{field}.expectedStatus"),
                    format!("{code} is not an HTTP status code"),
                ));
            }
        }
        Ok(())
    }
}

const STATUS_CODES: std::ops::RangeInclusive<u16> = 100..=599;

/// Predicate a response status must satisfy to count as a success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectedStatus {
    /// Any status in the `N00..=N99` class, e.g. `Class(2)` for `2xx`.
    Class(u16),
    Codes(Vec<u16>),
}

impl Default for ExpectedStatus {
    fn default() -> Self {
        Self::Class(2)
    }
}

impl ExpectedStatus {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            Self::Class(class) => status / 100 == *class,
            Self::Codes(codes) => codes.contains(&status),
        }
    }

    /// Parses `2xx`-style classes or a single numeric code.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(class) = raw.strip_suffix("xx").or_else(|| raw.strip_suffix("XX")) {
            return match class.parse::<u16>() {
                Ok(class) if (1..=5).contains(&class) => Some(Self::Class(class)),
                _ => None,
            };
        }
        match raw.parse::<u16>() {
            Ok(code) if STATUS_CODES.contains(&code) => Some(Self::Codes(vec![code])),
            _ => None,
        }
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "{class}xx"),
            Self::Codes(codes) => {
                let codes: Vec<_> = codes.iter().map(u16::to_string).collect();
                write!(f, "{}", codes.join("|"))
            }
        }
    }
}
