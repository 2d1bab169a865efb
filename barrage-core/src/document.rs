//! Scenario documents (YAML or JSON) and their resolution into a [`ScenarioSpec`].
use crate::{
    ConfigError, Executor, ExpectedStatus, Interpolation, RequestTemplate, ScenarioSpec, Stage,
    Threshold, Workload, BASE_URL_ENV, DEFAULT_BASE_URL, DEFAULT_PACING, DEFAULT_PATH,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCENARIO_NAME, DEFAULT_WORKLOAD_NAME,
};
use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Parses and resolves a scenario document, reading `BASE_URL` once.
pub fn load_scenario(text: &str) -> Result<ScenarioSpec, ConfigError> {
    let env_base_url = std::env::var(BASE_URL_ENV).ok();
    ScenarioDocument::parse(text)?.resolve(env_base_url)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioDocument {
    pub name: Option<String>,
    pub base_url: Option<String>,

    // Defaults shared by every workload.
    pub request: Option<RequestDocument>,
    pub sleep: Option<HumanDuration>,
    pub timeout: Option<HumanDuration>,
    pub rps: Option<u32>,

    // Flat, single-workload form.
    pub executor: Option<String>,
    pub vus: Option<u64>,
    pub duration: Option<HumanDuration>,
    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,
    pub stages: Option<Vec<StageDocument>>,
    pub ramp_shape: Option<RampShape>,

    pub scenarios: Option<BTreeMap<String, WorkloadDocument>>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdValues>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkloadDocument {
    pub executor: Option<String>,
    pub vus: Option<u64>,
    pub duration: Option<HumanDuration>,
    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,
    pub stages: Option<Vec<StageDocument>>,
    pub ramp_shape: Option<RampShape>,
    pub request: Option<RequestDocument>,
    pub sleep: Option<HumanDuration>,
    pub timeout: Option<HumanDuration>,
    pub rps: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDocument {
    pub duration: HumanDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampShape {
    Linear,
    Step,
}

impl From<RampShape> for Interpolation {
    fn from(shape: RampShape) -> Self {
        match shape {
            RampShape::Linear => Interpolation::Linear,
            RampShape::Step => Interpolation::Step,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestDocument {
    pub method: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub expected_status: Option<ExpectedStatusDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpectedStatusDocument {
    Code(u16),
    Codes(Vec<u16>),
    Pattern(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValues {
    One(ThresholdEntry),
    Many(Vec<ThresholdEntry>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ThresholdEntry {
    Expression(String),
    Detailed(DetailedThreshold),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DetailedThreshold {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<HumanDuration>,
}

/// A duration written as a humantime string (`200ms`, `2m`) or as numeric seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct V;

        impl<'de> de::Visitor<'de> for V {
            type Value = HumanDuration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration such as `30s`, or a number of seconds")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(HumanDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(|v| HumanDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if !v.is_finite() || v < 0. {
                    return Err(E::custom("duration must be a finite, non-negative number"));
                }
                Duration::try_from_secs_f64(v)
                    .map(HumanDuration)
                    .map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                humantime::parse_duration(v.trim())
                    .map(HumanDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl ScenarioDocument {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// JSON when the text starts with `{`, YAML otherwise.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        if text.trim_start().starts_with('{') {
            Self::from_json_str(text)
        } else {
            Self::from_yaml_str(text)
        }
    }

    /// Builds and validates the run description.
    ///
    /// Base URL precedence: `env_base_url` (when non-empty), then the document's `baseUrl`, then
    /// [`DEFAULT_BASE_URL`].
    pub fn resolve(self, env_base_url: Option<String>) -> Result<ScenarioSpec, ConfigError> {
        let raw_url = env_base_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = parse_base_url(&raw_url)?;

        let defaults = WorkloadDefaults {
            request: self.request.clone(),
            sleep: self.sleep,
            timeout: self.timeout,
            rps: self.rps,
        };

        let workloads = match self.scenarios.clone() {
            Some(scenarios) => {
                if self.has_flat_executor() {
                    return Err(ConfigError::invalid(
                        "scenarios",
                        "cannot be combined with top-level executor, vus, duration or stages",
                    ));
                }
                scenarios
                    .into_iter()
                    .map(|(name, doc)| {
                        let field = format!("scenarios.{name}");
                        doc.into_workload(&name, &field, &defaults)
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => vec![self
                .flat_workload()
                .into_workload(DEFAULT_WORKLOAD_NAME, "", &defaults)?],
        };

        let mut thresholds = vec![];
        for (key, values) in &self.thresholds {
            let entries = match values {
                ThresholdValues::One(entry) => std::slice::from_ref(entry),
                ThresholdValues::Many(entries) => entries.as_slice(),
            };
            for entry in entries {
                thresholds.push(entry.to_threshold(key)?);
            }
        }

        let spec = ScenarioSpec {
            name: self.name.unwrap_or_else(|| DEFAULT_SCENARIO_NAME.to_string()),
            base_url,
            workloads,
            thresholds,
        };
        spec.validate()?;

        debug!(
            "Resolved scenario {} against {} with {} workload(s) and {} threshold(s)",
            spec.name,
            spec.base_url,
            spec.workloads.len(),
            spec.thresholds.len()
        );

        Ok(spec)
    }

    fn has_flat_executor(&self) -> bool {
        self.executor.is_some()
            || self.vus.is_some()
            || self.duration.is_some()
            || self.start_vus.is_some()
            || self.stages.is_some()
            || self.ramp_shape.is_some()
    }

    fn flat_workload(&self) -> WorkloadDocument {
        WorkloadDocument {
            executor: self.executor.clone(),
            vus: self.vus,
            duration: self.duration,
            start_vus: self.start_vus,
            stages: self.stages.clone(),
            ramp_shape: self.ramp_shape,
            ..Default::default()
        }
    }
}

struct WorkloadDefaults {
    request: Option<RequestDocument>,
    sleep: Option<HumanDuration>,
    timeout: Option<HumanDuration>,
    rps: Option<u32>,
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "baseUrl",
            format!("`{raw}` must use http or https"),
        ));
    }
    Ok(url)
}

/// Joins a field path, tolerating the empty prefix used by flat documents.
fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

impl WorkloadDocument {
    fn into_workload(
        self,
        name: &str,
        prefix: &str,
        defaults: &WorkloadDefaults,
    ) -> Result<Workload, ConfigError> {
        let kind = match self.executor.as_deref() {
            Some(kind) => kind.to_string(),
            None if self.stages.is_some() => "ramping-vus".to_string(),
            None => "constant-vus".to_string(),
        };

        let executor = match kind.as_str() {
            "constant-vus" => {
                let ramp_only = [
                    ("stages", self.stages.is_some()),
                    ("startVUs", self.start_vus.is_some()),
                    ("rampShape", self.ramp_shape.is_some()),
                ];
                if let Some((field, _)) = ramp_only.iter().find(|(_, set)| *set) {
                    return Err(ConfigError::invalid(
                        join(prefix, field),
                        "not valid for constant-vus",
                    ));
                }
                let duration = self
                    .duration
                    .ok_or_else(|| ConfigError::missing(join(prefix, "duration")))?;
                Executor::constant(self.vus.unwrap_or(1), duration.0)
            }
            "ramping-vus" => {
                if self.duration.is_some() {
                    return Err(ConfigError::invalid(
                        join(prefix, "duration"),
                        "not valid for ramping-vus, use stages",
                    ));
                }
                let stages = self
                    .stages
                    .ok_or_else(|| ConfigError::missing(join(prefix, "stages")))?
                    .into_iter()
                    .map(|s| Stage::new(s.duration.0, s.target))
                    .collect();
                Executor::Ramping {
                    start_vus: self.start_vus.or(self.vus).unwrap_or(1),
                    stages,
                    interpolation: self.ramp_shape.map(Into::into).unwrap_or_default(),
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    join(prefix, "executor"),
                    format!("unsupported executor `{other}`, expected constant-vus or ramping-vus"),
                ))
            }
        };

        let request = match self.request.as_ref().or(defaults.request.as_ref()) {
            Some(doc) => doc.to_template(&join(prefix, "request"))?,
            None => RequestTemplate::default(),
        };

        let mut workload = Workload::new(name, executor)
            .request(request)
            .pacing(self.sleep.or(defaults.sleep).map_or(DEFAULT_PACING, |d| d.0))
            .timeout(
                self.timeout
                    .or(defaults.timeout)
                    .map_or(DEFAULT_REQUEST_TIMEOUT, |d| d.0),
            );

        if let Some(rps) = self.rps.or(defaults.rps) {
            let rps = NonZeroU32::new(rps)
                .ok_or_else(|| ConfigError::invalid(join(prefix, "rps"), "must be positive"))?;
            workload = workload.rps(rps);
        }

        Ok(workload)
    }
}

impl RequestDocument {
    fn to_template(&self, field: &str) -> Result<RequestTemplate, ConfigError> {
        let expected_status = match &self.expected_status {
            None => ExpectedStatus::default(),
            Some(ExpectedStatusDocument::Code(code)) => ExpectedStatus::Codes(vec![*code]),
            Some(ExpectedStatusDocument::Codes(codes)) => ExpectedStatus::Codes(codes.clone()),
            Some(ExpectedStatusDocument::Pattern(raw)) => {
                ExpectedStatus::parse(raw).ok_or_else(|| {
                    ConfigError::invalid(
                        format!("{field}.expectedStatus"),
                        format!("`{raw}` is neither a status code nor a class like `2xx`"),
                    )
                })?
            }
        };

        Ok(RequestTemplate {
            method: self
                .method
                .as_deref()
                .unwrap_or("GET")
                .trim()
                .to_ascii_uppercase(),
            path: self.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string()),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            expected_status,
        })
    }
}

impl ThresholdEntry {
    fn to_threshold(&self, key: &str) -> Result<Threshold, ConfigError> {
        match self {
            Self::Expression(expression) => Threshold::parse_entry(key, expression),
            Self::Detailed(detailed) => {
                let threshold = Threshold::parse_entry(key, &detailed.threshold)?;
                if detailed.abort_on_fail {
                    let delay = detailed.delay_abort_eval.unwrap_or_default().0;
                    Ok(threshold.abort_on_fail(delay))
                } else {
                    Ok(threshold)
                }
            }
        }
    }
}
