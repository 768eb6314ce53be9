//! Access evaluators resolve a single `attribute op "literal"` comparison
//! against a principal.
//!
//! Implementations are picked from a fixed table by implementation id; an
//! unknown id is rejected instead of being loaded dynamically.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Timelike;
use indexmap::IndexMap;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Operator, Principal};

/// Non-empty set of operators an evaluator understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSet(Vec<Operator>);

impl OperatorSet {
    pub fn new(operators: &[Operator]) -> Result<Self, AuthzError> {
        let mut ops: Vec<Operator> = Vec::with_capacity(operators.len());
        for op in operators {
            if !ops.contains(op) {
                ops.push(*op);
            }
        }
        if ops.is_empty() {
            return Err(AuthzError::EmptyOperatorSet);
        }
        Ok(Self(ops))
    }

    /// `=` and `!=`.
    pub fn equality() -> Self {
        Self(vec![Operator::Eq, Operator::Ne])
    }

    pub fn all() -> Self {
        Self(Operator::ALL.to_vec())
    }

    pub fn contains(&self, op: Operator) -> bool {
        self.0.contains(&op)
    }

    pub fn iter(&self) -> impl Iterator<Item = Operator> + '_ {
        self.0.iter().copied()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.0.iter().map(|op| op.symbol().to_string()).collect()
    }
}

pub trait AccessEvaluator: Send + Sync + fmt::Debug {
    /// Identifier used to rebuild this evaluator from configuration.
    fn implementation(&self) -> &str;

    fn description(&self) -> &str;

    fn supported_operators(&self) -> &OperatorSet;

    /// Only called with operators from [`supported_operators`](Self::supported_operators).
    /// `None` means the comparison cannot be evaluated for this request.
    fn evaluate(&self, principal: &Principal, operator: Operator, literal: &str) -> Option<bool>;
}

// ─── Built-in evaluators ────────────────────────────────────────────────

/// Matches the principal id. The literal `anybody` matches everyone.
#[derive(Debug)]
pub struct UserEvaluator {
    operators: OperatorSet,
}

impl UserEvaluator {
    pub const ANYBODY: &'static str = "anybody";

    pub fn new() -> Self {
        Self {
            operators: OperatorSet::equality(),
        }
    }
}

impl Default for UserEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessEvaluator for UserEvaluator {
    fn implementation(&self) -> &str {
        "user"
    }

    fn description(&self) -> &str {
        "principal identity"
    }

    fn supported_operators(&self) -> &OperatorSet {
        &self.operators
    }

    fn evaluate(&self, principal: &Principal, operator: Operator, literal: &str) -> Option<bool> {
        let matched = literal == Self::ANYBODY || principal.id == literal;
        match operator {
            Operator::Eq => Some(matched),
            Operator::Ne => Some(!matched),
            _ => None,
        }
    }
}

/// Matches group membership.
#[derive(Debug)]
pub struct GroupEvaluator {
    operators: OperatorSet,
}

impl GroupEvaluator {
    pub fn new() -> Self {
        Self {
            operators: OperatorSet::equality(),
        }
    }
}

impl Default for GroupEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessEvaluator for GroupEvaluator {
    fn implementation(&self) -> &str {
        "group"
    }

    fn description(&self) -> &str {
        "group membership"
    }

    fn supported_operators(&self) -> &OperatorSet {
        &self.operators
    }

    fn evaluate(&self, principal: &Principal, operator: Operator, literal: &str) -> Option<bool> {
        match operator {
            Operator::Eq => Some(principal.in_group(literal)),
            Operator::Ne => Some(!principal.in_group(literal)),
            _ => None,
        }
    }
}

/// Matches the remote address against an address or a CIDR prefix.
///
/// Cannot be evaluated for a principal without a known remote address.
#[derive(Debug)]
pub struct IpAddressEvaluator {
    operators: OperatorSet,
}

impl IpAddressEvaluator {
    pub fn new() -> Self {
        Self {
            operators: OperatorSet::equality(),
        }
    }

    fn matches(addr: IpAddr, literal: &str) -> Option<bool> {
        let (net, len) = match literal.split_once('/') {
            Some((net, len)) => (net.trim().parse::<IpAddr>().ok()?, len.trim().parse::<u8>().ok()?),
            None => {
                let net = literal.trim().parse::<IpAddr>().ok()?;
                let full = if net.is_ipv4() { 32 } else { 128 };
                (net, full)
            }
        };
        match (addr, net) {
            (IpAddr::V4(a), IpAddr::V4(n)) if len <= 32 => {
                let mask = u32::MAX.checked_shl(32 - u32::from(len)).unwrap_or(0);
                Some(u32::from(a) & mask == u32::from(n) & mask)
            }
            (IpAddr::V6(a), IpAddr::V6(n)) if len <= 128 => {
                let mask = u128::MAX.checked_shl(128 - u32::from(len)).unwrap_or(0);
                Some(u128::from(a) & mask == u128::from(n) & mask)
            }
            (IpAddr::V4(_), IpAddr::V6(_)) | (IpAddr::V6(_), IpAddr::V4(_)) => Some(false),
            _ => None,
        }
    }
}

impl Default for IpAddressEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessEvaluator for IpAddressEvaluator {
    fn implementation(&self) -> &str {
        "ipaddress"
    }

    fn description(&self) -> &str {
        "remote address or CIDR prefix"
    }

    fn supported_operators(&self) -> &OperatorSet {
        &self.operators
    }

    fn evaluate(&self, principal: &Principal, operator: Operator, literal: &str) -> Option<bool> {
        let addr = principal.remote_addr?;
        let Some(matched) = Self::matches(addr, literal) else {
            tracing::debug!(literal, "unparsable address literal");
            return None;
        };
        match operator {
            Operator::Eq => Some(matched),
            Operator::Ne => Some(!matched),
            _ => None,
        }
    }
}

/// Compares the UTC time of day of the request with `HH` or `HH:MM`.
#[derive(Debug)]
pub struct TimeEvaluator {
    operators: OperatorSet,
}

impl TimeEvaluator {
    pub fn new() -> Self {
        Self {
            operators: OperatorSet::all(),
        }
    }

    /// Returns (request value, literal value) in a common unit.
    fn operands(principal: &Principal, literal: &str) -> Option<(u32, u32)> {
        let time = principal.request_time.time();
        match literal.trim().split_once(':') {
            Some((h, m)) => {
                let h: u32 = h.parse().ok()?;
                let m: u32 = m.parse().ok()?;
                if h > 23 || m > 59 {
                    return None;
                }
                Some((time.hour() * 60 + time.minute(), h * 60 + m))
            }
            None => {
                let h: u32 = literal.trim().parse().ok()?;
                if h > 23 {
                    return None;
                }
                Some((time.hour(), h))
            }
        }
    }
}

impl Default for TimeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessEvaluator for TimeEvaluator {
    fn implementation(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "UTC time of day of the request"
    }

    fn supported_operators(&self) -> &OperatorSet {
        &self.operators
    }

    fn evaluate(&self, principal: &Principal, operator: Operator, literal: &str) -> Option<bool> {
        let Some((now, lit)) = Self::operands(principal, literal) else {
            tracing::debug!(literal, "unparsable time literal");
            return None;
        };
        Some(match operator {
            Operator::Eq => now == lit,
            Operator::Ne => now != lit,
            Operator::Lt => now < lit,
            Operator::Gt => now > lit,
            Operator::Le => now <= lit,
            Operator::Ge => now >= lit,
        })
    }
}

/// Implementation ids accepted by [`build_evaluator`].
pub const BUILTIN_IMPLEMENTATIONS: [&str; 4] = ["user", "group", "ipaddress", "time"];

pub fn build_evaluator(implementation: &str) -> Result<Arc<dyn AccessEvaluator>, AuthzError> {
    match implementation {
        "user" => Ok(Arc::new(UserEvaluator::new())),
        "group" => Ok(Arc::new(GroupEvaluator::new())),
        "ipaddress" => Ok(Arc::new(IpAddressEvaluator::new())),
        "time" => Ok(Arc::new(TimeEvaluator::new())),
        other => Err(AuthzError::UnknownImplementation(other.to_string())),
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

/// Evaluators keyed by type, in registration order.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorRegistry {
    by_type: IndexMap<String, Arc<dyn AccessEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in implementation registered under its own id.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for implementation in BUILTIN_IMPLEMENTATIONS {
            if let Ok(evaluator) = build_evaluator(implementation) {
                registry.register(implementation, evaluator);
            }
        }
        registry
    }

    /// Inserts or replaces. A replaced type keeps its position.
    pub fn register(
        &mut self,
        evaluator_type: impl Into<String>,
        evaluator: Arc<dyn AccessEvaluator>,
    ) -> Option<Arc<dyn AccessEvaluator>> {
        self.by_type.insert(evaluator_type.into(), evaluator)
    }

    pub fn unregister(&mut self, evaluator_type: &str) -> Option<Arc<dyn AccessEvaluator>> {
        self.by_type.shift_remove(evaluator_type)
    }

    pub fn get(&self, evaluator_type: &str) -> Option<&Arc<dyn AccessEvaluator>> {
        self.by_type.get(evaluator_type)
    }

    /// The evaluator for `evaluator_type` if it also supports `operator`.
    pub fn resolve(
        &self,
        evaluator_type: &str,
        operator: Operator,
    ) -> Option<&Arc<dyn AccessEvaluator>> {
        self.get(evaluator_type)
            .filter(|ev| ev.supported_operators().contains(operator))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn AccessEvaluator>)> {
        self.by_type.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
