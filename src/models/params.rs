use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Tolerance used when matching float values against candidate lists.
const FLOAT_TOLERANCE: f64 = 1e-9;

/// A single strategy parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Vector(Vec<f64>),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Vector(_) => "vector",
        }
    }

    /// Scalar numeric view. Vectors have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Vector(_) => None,
        }
    }

    /// Whether `self` may stand in for a value of `expected`'s type.
    /// Integers are accepted where floats are declared.
    fn is_compatible_with(&self, expected: &ParamValue) -> bool {
        matches!(
            (expected, self),
            (ParamValue::Bool(_), ParamValue::Bool(_))
                | (ParamValue::Int(_), ParamValue::Int(_))
                | (ParamValue::Float(_), ParamValue::Float(_))
                | (ParamValue::Float(_), ParamValue::Int(_))
                | (ParamValue::Vector(_), ParamValue::Vector(_))
        )
    }

    /// Convert to the declared type of `expected`. Assumes compatibility.
    fn coerce_to(self, expected: &ParamValue) -> ParamValue {
        match (expected, self) {
            (ParamValue::Float(_), ParamValue::Int(i)) => ParamValue::Float(i as f64),
            (_, v) => v,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Vector(v) => write!(f, "{:?}", v),
        }
    }
}

/// Named parameter values, ordered by name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> Result<&ParamValue, AppError> {
        self.values
            .get(name)
            .ok_or_else(|| AppError::MissingParameter(name.to_string()))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, AppError> {
        match self.require(name)? {
            ParamValue::Bool(b) => Ok(*b),
            other => Err(mismatch(name, "bool", other)),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64, AppError> {
        match self.require(name)? {
            ParamValue::Int(i) => Ok(*i),
            other => Err(mismatch(name, "int", other)),
        }
    }

    pub fn get_usize(&self, name: &str) -> Result<usize, AppError> {
        let v = self.get_int(name)?;
        usize::try_from(v).map_err(|_| AppError::ParameterOutOfDomain {
            name: name.to_string(),
            value: v.to_string(),
        })
    }

    pub fn get_float(&self, name: &str) -> Result<f64, AppError> {
        match self.require(name)? {
            ParamValue::Float(f) => Ok(*f),
            ParamValue::Int(i) => Ok(*i as f64),
            other => Err(mismatch(name, "float", other)),
        }
    }

    pub fn get_vector(&self, name: &str) -> Result<&[f64], AppError> {
        match self.require(name)? {
            ParamValue::Vector(v) => Ok(v.as_slice()),
            other => Err(mismatch(name, "vector", other)),
        }
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &ParamValue) -> AppError {
    AppError::ParameterTypeMismatch {
        name: name.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

/// Discrete candidate list an optimized parameter may take.
/// Scalar candidates are kept sorted ascending so that index 0 is the minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamDomain {
    Bool,
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Vectors(Vec<Vec<f64>>),
}

impl ParamDomain {
    pub fn ints(mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        values.dedup();
        ParamDomain::Ints(values)
    }

    pub fn floats(mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| (*a - *b).abs() < FLOAT_TOLERANCE);
        ParamDomain::Floats(values)
    }

    /// Inclusive integer range `start..=end` by `step`.
    pub fn int_range(start: i64, end: i64, step: i64) -> Self {
        let step = step.max(1);
        Self::ints((start..=end).step_by(step as usize).collect())
    }

    /// Inclusive float range `start..=end` by `step`, values rounded to 8 decimals.
    pub fn float_range(start: f64, end: f64, step: f64) -> Self {
        let mut values = Vec::new();
        if step > 0.0 {
            let count = ((end - start) / step + FLOAT_TOLERANCE).floor() as i64;
            for k in 0..=count.max(0) {
                let v = start + k as f64 * step;
                values.push((v * 1e8).round() / 1e8);
            }
        } else {
            values.push(start);
        }
        Self::floats(values)
    }

    pub fn vectors(values: Vec<Vec<f64>>) -> Self {
        ParamDomain::Vectors(values)
    }

    pub fn len(&self) -> usize {
        match self {
            ParamDomain::Bool => 2,
            ParamDomain::Ints(v) => v.len(),
            ParamDomain::Floats(v) => v.len(),
            ParamDomain::Vectors(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of the candidate at `index` (clamped into range).
    pub fn value_at(&self, index: usize) -> ParamValue {
        let last = self.len().saturating_sub(1);
        let i = index.min(last);
        match self {
            ParamDomain::Bool => ParamValue::Bool(i == 1),
            ParamDomain::Ints(v) => ParamValue::Int(v[i]),
            ParamDomain::Floats(v) => ParamValue::Float(v[i]),
            ParamDomain::Vectors(v) => ParamValue::Vector(v[i].clone()),
        }
    }

    /// Index of `value` in the candidate list, if present.
    pub fn index_of(&self, value: &ParamValue) -> Option<usize> {
        match (self, value) {
            (ParamDomain::Bool, ParamValue::Bool(b)) => Some(usize::from(*b)),
            (ParamDomain::Ints(v), ParamValue::Int(x)) => v.iter().position(|c| c == x),
            (ParamDomain::Floats(v), ParamValue::Float(x)) => {
                v.iter().position(|c| (c - x).abs() < FLOAT_TOLERANCE)
            }
            (ParamDomain::Floats(v), ParamValue::Int(x)) => {
                let x = *x as f64;
                v.iter().position(|c| (c - x).abs() < FLOAT_TOLERANCE)
            }
            (ParamDomain::Vectors(v), ParamValue::Vector(x)) => v.iter().position(|c| {
                c.len() == x.len() && c.iter().zip(x).all(|(a, b)| (a - b).abs() < FLOAT_TOLERANCE)
            }),
            _ => None,
        }
    }

    /// Arithmetic blend of the candidates at `a` and `b`, snapped to the
    /// nearest candidate. `None` for domains with no numeric blend (booleans).
    pub fn blend(&self, a: usize, b: usize, alpha: f64) -> Option<usize> {
        match self {
            ParamDomain::Bool => None,
            ParamDomain::Ints(v) => {
                let target = alpha * v[a] as f64 + (1.0 - alpha) * v[b] as f64;
                Some(nearest_scalar(v.iter().map(|&c| c as f64), target))
            }
            ParamDomain::Floats(v) => {
                let target = alpha * v[a] + (1.0 - alpha) * v[b];
                Some(nearest_scalar(v.iter().copied(), target))
            }
            ParamDomain::Vectors(v) => {
                if v[a].len() != v[b].len() {
                    return None;
                }
                let target: Vec<f64> = v[a]
                    .iter()
                    .zip(&v[b])
                    .map(|(x, y)| alpha * x + (1.0 - alpha) * y)
                    .collect();
                v.iter()
                    .enumerate()
                    .filter(|(_, c)| c.len() == target.len())
                    .map(|(i, c)| {
                        let dist: f64 = c.iter().zip(&target).map(|(x, y)| (x - y).powi(2)).sum();
                        (i, dist)
                    })
                    .min_by(|x, y| x.1.total_cmp(&y.1))
                    .map(|(i, _)| i)
            }
        }
    }
}

/// Index of the candidate closest to `target`; ties go to the lower index.
fn nearest_scalar(candidates: impl Iterator<Item = f64>, target: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, c) in candidates.enumerate() {
        let dist = (c - target).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Declared parameter: name, default and optional optimizer domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub default: ParamValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<ParamDomain>,
}

/// Declared parameter space of a strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    specs: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a fixed parameter (not searched by the optimizer).
    pub fn field(mut self, name: &str, default: ParamValue) -> Self {
        self.upsert(ParamSpec {
            name: name.to_string(),
            default,
            domain: None,
        });
        self
    }

    /// Declare a parameter with an optimizer domain.
    pub fn optimized(mut self, name: &str, default: ParamValue, domain: ParamDomain) -> Self {
        self.upsert(ParamSpec {
            name: name.to_string(),
            default,
            domain: Some(domain),
        });
        self
    }

    fn upsert(&mut self, spec: ParamSpec) {
        match self.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    /// Compose two schemas. Fields of `other` override same-named fields of `self`
    /// in place; new fields are appended in `other`'s order.
    pub fn merge(&self, other: &ParameterSchema) -> ParameterSchema {
        let mut merged = self.clone();
        for spec in &other.specs {
            merged.upsert(spec.clone());
        }
        merged
    }

    /// Fix the given fields to their values, removing them from the search space.
    pub fn pin(&self, fixed: &ParameterSet) -> Result<ParameterSchema, AppError> {
        self.validate(fixed)?;
        let mut pinned = self.clone();
        for (name, value) in fixed.iter() {
            if let Some(spec) = pinned.specs.iter_mut().find(|s| &s.name == name) {
                spec.default = value.clone().coerce_to(&spec.default);
                spec.domain = None;
            }
        }
        Ok(pinned)
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Parameters the optimizer searches, in declaration order.
    pub fn optimized_specs(&self) -> Vec<&ParamSpec> {
        self.specs
            .iter()
            .filter(|s| s.domain.as_ref().is_some_and(|d| !d.is_empty()))
            .collect()
    }

    pub fn defaults(&self) -> ParameterSet {
        let mut set = ParameterSet::new();
        for spec in &self.specs {
            set.insert(&spec.name, spec.default.clone());
        }
        set
    }

    /// Reject unknown keys and type mismatches.
    pub fn validate(&self, params: &ParameterSet) -> Result<(), AppError> {
        for (name, value) in params.iter() {
            let spec = self
                .spec(name)
                .ok_or_else(|| AppError::UnknownParameter(name.clone()))?;
            if !value.is_compatible_with(&spec.default) {
                return Err(mismatch(name, spec.default.type_name(), value));
            }
        }
        Ok(())
    }

    /// `validate`, plus every optimized value must be one of its candidates.
    pub fn validate_domain(&self, params: &ParameterSet) -> Result<(), AppError> {
        self.validate(params)?;
        for spec in self.optimized_specs() {
            if let (Some(value), Some(domain)) = (params.get(&spec.name), &spec.domain) {
                if domain.index_of(value).is_none() {
                    return Err(AppError::ParameterOutOfDomain {
                        name: spec.name.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate `params` and fill any missing fields with defaults.
    pub fn resolve(&self, params: &ParameterSet) -> Result<ParameterSet, AppError> {
        self.validate(params)?;
        let mut resolved = self.defaults();
        for (name, value) in params.iter() {
            let spec = self
                .spec(name)
                .ok_or_else(|| AppError::UnknownParameter(name.clone()))?;
            resolved.insert(name, value.clone().coerce_to(&spec.default));
        }
        Ok(resolved)
    }

    /// Type-checked update of a single parameter.
    pub fn set(
        &self,
        params: &mut ParameterSet,
        name: &str,
        value: ParamValue,
    ) -> Result<(), AppError> {
        let spec = self
            .spec(name)
            .ok_or_else(|| AppError::UnknownParameter(name.to_string()))?;
        if !value.is_compatible_with(&spec.default) {
            return Err(mismatch(name, spec.default.type_name(), &value));
        }
        params.insert(name, value.coerce_to(&spec.default));
        Ok(())
    }

    /// Build a parameter set from candidate indices of the optimized fields.
    pub fn decode(&self, genome: &[usize]) -> ParameterSet {
        let mut set = self.defaults();
        for (spec, &idx) in self.optimized_specs().iter().zip(genome) {
            if let Some(domain) = &spec.domain {
                set.insert(&spec.name, domain.value_at(idx));
            }
        }
        set
    }

    /// Candidate indices of the optimized fields, if every value is in its domain.
    pub fn encode(&self, params: &ParameterSet) -> Option<Vec<usize>> {
        self.optimized_specs()
            .iter()
            .map(|spec| {
                let value = params.get(&spec.name).unwrap_or(&spec.default);
                spec.domain.as_ref().and_then(|d| d.index_of(value))
            })
            .collect()
    }
}
