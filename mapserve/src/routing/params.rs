//! Request parameter parsing.
//!
//! A request carries one delimited string, `profile,key=val,key2,...`. It is
//! parsed once into [`RouteRequestParameters`], which resolves every strategy
//! choice up front so nothing downstream compares strings.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::online::{OnlineProvider, ProviderRegistry};

/// Profile whose default calculation mode is [`CalculationMode::Complex`].
pub const CAR_PROFILE: &str = "car";

/// Parameter parsing errors.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("parameter string has no profile")]
    MissingProfile,

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ParamError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ParamError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where a computation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    InProcess,
    Native,
}

/// Route search algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Hierarchical-highway search over pre-aggregated segments.
    Hierarchical,
    /// Classical search over the detailed graph only.
    OnePhase,
    /// Classical search on the base graph first, then the detailed graph.
    TwoPhase,
}

/// Classical calculation mode requested with `calcmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalculationMode {
    Complex,
    Normal,
    Base,
}

impl CalculationMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "complex" => Some(CalculationMode::Complex),
            "normal" => Some(CalculationMode::Normal),
            "base" => Some(CalculationMode::Base),
            _ => None,
        }
    }

    /// Default mode for a router profile.
    pub fn default_for(profile: &str) -> Self {
        if profile == CAR_PROFILE {
            CalculationMode::Complex
        } else {
            CalculationMode::Normal
        }
    }

    pub fn search_method(self) -> SearchMethod {
        match self {
            CalculationMode::Complex => SearchMethod::TwoPhase,
            CalculationMode::Normal | CalculationMode::Base => SearchMethod::OnePhase,
        }
    }
}

/// Resolved route search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RoutingStrategy {
    pub engine: EngineKind,
    pub method: SearchMethod,
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = match self.engine {
            EngineKind::InProcess => "inprocess",
            EngineKind::Native => "native",
        };
        let method = match self.method {
            SearchMethod::Hierarchical => "hh",
            SearchMethod::OnePhase => "onephase",
            SearchMethod::TwoPhase => "twophase",
        };
        write!(f, "{}-{}", engine, method)
    }
}

/// How point sequences are snapped to the road graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproximationKind {
    /// Match points against nearby road geometry.
    #[default]
    Geometry,
    /// Route between consecutive points.
    Routing,
}

/// Resolved approximation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ApproximationStrategy {
    pub kind: ApproximationKind,
    pub engine: EngineKind,
}

/// Parsed request configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequestParameters {
    /// Profile name as requested (may name an online provider).
    pub profile: String,
    /// Router profile the graph is configured with.
    pub router_profile: String,
    /// Remaining router parameters, sorted by key.
    pub router_params: BTreeMap<String, String>,
    pub routing: RoutingStrategy,
    pub approximation: ApproximationStrategy,
    pub provider: Option<OnlineProvider>,
    /// Explicit `calcmode`, if any.
    pub calc_mode: Option<CalculationMode>,
    pub time_conditional: bool,
    pub calc_time: Option<DateTime<Utc>>,
    pub heading: Option<f64>,
    pub min_point_approximation_m: Option<f64>,
    pub impassable: BTreeSet<u64>,
    /// Opt out of the shared routing file.
    pub no_global_file: bool,
}

impl RouteRequestParameters {
    /// Parses `profile,key=val,...`. Bare keys mean `true`.
    pub fn parse(input: &str, providers: &ProviderRegistry) -> Result<Self, ParamError> {
        let mut parts = input.split(',').map(str::trim);
        let profile = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or(ParamError::MissingProfile)?
            .to_string();

        let mut native_routing = false;
        let mut native_approximation = false;
        let mut hh_off = false;
        let mut calc_mode = None;
        let mut approximation_kind = ApproximationKind::default();
        let mut impassable = BTreeSet::new();
        let mut heading = None;
        let mut calc_time = None;
        let mut time_conditional = false;
        let mut min_point_approximation_m = None;
        let mut no_global_file = false;
        let mut router_params = BTreeMap::new();

        for part in parts.filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, "true"));
            match key {
                "nativerouting" => native_routing = parse_bool(key, value)?,
                "nativeapproximation" => native_approximation = parse_bool(key, value)?,
                "hhoff" => hh_off = parse_bool(key, value)?,
                "noglobalfile" => no_global_file = parse_bool(key, value)?,
                "time_conditional_routing" => time_conditional = parse_bool(key, value)?,
                "calcmode" if value.is_empty() => calc_mode = None,
                "calcmode" => {
                    calc_mode = Some(CalculationMode::parse(value).ok_or_else(|| {
                        ParamError::invalid(key, value, "expected complex, normal or base")
                    })?)
                }
                "approximation" => {
                    approximation_kind = match value.to_ascii_lowercase().as_str() {
                        "geometry" => ApproximationKind::Geometry,
                        "routing" => ApproximationKind::Routing,
                        _ => return Err(ParamError::invalid(key, value, "expected geometry or routing")),
                    }
                }
                "avoid" => {
                    for id in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                        let id = id
                            .parse::<u64>()
                            .map_err(|e| ParamError::invalid(key, id, e.to_string()))?;
                        impassable.insert(id);
                    }
                }
                "heading" => {
                    let deg = parse_f64(key, value)?;
                    heading = Some(deg.rem_euclid(360.0));
                }
                "calctime" => calc_time = Some(parse_time(key, value)?),
                "minPointApproximation" => {
                    let meters = parse_f64(key, value)?;
                    if meters < 0.0 {
                        return Err(ParamError::invalid(key, value, "must not be negative"));
                    }
                    min_point_approximation_m = Some(meters);
                }
                _ => {
                    router_params.insert(key.to_string(), value.to_string());
                }
            }
        }

        let provider = providers.get(&profile).cloned();
        let router_profile = provider
            .as_ref()
            .map(|p| p.profile.clone())
            .unwrap_or_else(|| profile.clone());

        let method = if hh_off || calc_mode.is_some() {
            calc_mode
                .unwrap_or_else(|| CalculationMode::default_for(&router_profile))
                .search_method()
        } else {
            SearchMethod::Hierarchical
        };

        Ok(Self {
            profile,
            router_profile,
            router_params,
            routing: RoutingStrategy {
                engine: engine(native_routing),
                method,
            },
            approximation: ApproximationStrategy {
                kind: approximation_kind,
                engine: engine(native_approximation),
            },
            provider,
            calc_mode,
            time_conditional,
            calc_time,
            heading,
            min_point_approximation_m,
            impassable,
            no_global_file,
        })
    }

    /// Effective classical calculation mode.
    pub fn calculation_mode(&self) -> CalculationMode {
        self.calc_mode
            .unwrap_or_else(|| CalculationMode::default_for(&self.router_profile))
    }

    /// Router parameters as `k=v` pairs joined by commas, sorted by key.
    pub fn canonical_params(&self) -> String {
        self.router_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether the request may use a cached routing context.
    pub fn cache_eligible(&self) -> bool {
        self.routing.engine == EngineKind::InProcess
            && self.approximation.engine == EngineKind::InProcess
            && self.calc_mode.is_none()
            && !self.no_global_file
    }

    /// Whether a profile maps to an online provider.
    pub fn is_online(&self) -> bool {
        self.provider.is_some()
    }
}

fn engine(native: bool) -> EngineKind {
    if native {
        EngineKind::Native
    } else {
        EngineKind::InProcess
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ParamError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ParamError::invalid(key, value, "expected a boolean")),
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ParamError> {
    let parsed: f64 = value
        .parse()
        .map_err(|e: std::num::ParseFloatError| ParamError::invalid(key, value, e.to_string()))?;
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(ParamError::invalid(key, value, "must be finite"))
    }
}

/// Epoch milliseconds or RFC 3339.
fn parse_time(key: &str, value: &str) -> Result<DateTime<Utc>, ParamError> {
    if let Ok(millis) = value.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| ParamError::invalid(key, value, "timestamp out of range"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ParamError::invalid(key, value, e.to_string()))
}
