//! Reaction-network definitions in a small Kappa subset.
//!
//! Accepted lines (one statement per line, `#` starts a comment):
//!
//! ```text
//! %agent: A()
//! %var: 'kon' 0.5
//! 'bind'   A(), B() -> AB() @ 'kon'
//! 'unbind' AB() <-> A(), B() @ 2.0, 'kon'
//! %init: 100 A()
//! %obs: 'AB' |AB()|
//! ```
//!
//! Agents carry no sites. Rates are stochastic rate constants per second.

use kappabridge_env::{BackendErrorKind, GatewayError};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Why a definition could not be loaded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {message}")]
    Semantic { line: usize, message: String },

    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
}

impl DefinitionError {
    fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    fn semantic(line: usize, message: impl Into<String>) -> Self {
        Self::Semantic {
            line,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> BackendErrorKind {
        match self {
            Self::Syntax { .. } => BackendErrorKind::Syntax,
            Self::Semantic { .. } => BackendErrorKind::Semantic,
            Self::Io { .. } => BackendErrorKind::Io,
        }
    }
}

impl From<DefinitionError> for GatewayError {
    fn from(err: DefinitionError) -> Self {
        GatewayError::backend(err.kind(), err.to_string())
    }
}

/// One unidirectional reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub label: Option<String>,

    /// Agent indices consumed (repeats allowed)
    pub reactants: Vec<usize>,

    /// Agent indices produced
    pub products: Vec<usize>,

    /// Rate constant, s⁻¹
    pub rate: f64,
}

/// A named agent count.
#[derive(Debug, Clone, PartialEq)]
pub struct Observable {
    pub name: String,
    pub agent: usize,
}

/// A parsed, validated network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactionNetwork {
    agents: Vec<String>,
    agent_index: HashMap<String, usize>,
    vars: HashMap<String, f64>,
    rules: Vec<Rule>,
    initial: Vec<u64>,
    observables: Vec<Observable>,
}

impl ReactionNetwork {
    /// Reads and parses a definition file.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let text = std::fs::read_to_string(path).map_err(|e| DefinitionError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Parses definition text.
    pub fn parse(text: &str) -> Result<Self, DefinitionError> {
        let mut network = Self::default();
        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            network.statement(line_no, line)?;
        }
        Ok(network)
    }

    fn statement(&mut self, line: usize, text: &str) -> Result<(), DefinitionError> {
        if let Some(rest) = text.strip_prefix("%agent:") {
            let name = parse_agent(line, rest.trim())?;
            if self.agent_index.contains_key(&name) {
                return Err(DefinitionError::semantic(line, format!("agent {} declared twice", name)));
            }
            self.agent_index.insert(name.clone(), self.agents.len());
            self.agents.push(name);
            self.initial.push(0);
            Ok(())
        } else if let Some(rest) = text.strip_prefix("%var:") {
            let (name, rest) = parse_quoted(line, rest.trim())?;
            let value = self.parse_value(line, rest.trim())?;
            self.vars.insert(name, value);
            Ok(())
        } else if let Some(rest) = text.strip_prefix("%init:") {
            let rest = rest.trim();
            let (amount, pattern) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| DefinitionError::syntax(line, "expected '%init: <amount> <agent>'"))?;
            let amount = self.parse_value(line, amount)?;
            if amount < 0.0 || amount.fract() != 0.0 {
                return Err(DefinitionError::semantic(
                    line,
                    format!("initial amount {} is not a molecule count", amount),
                ));
            }
            let agent = self.agent(line, pattern.trim())?;
            self.initial[agent] += amount as u64;
            Ok(())
        } else if let Some(rest) = text.strip_prefix("%obs:") {
            let (name, rest) = parse_quoted(line, rest.trim())?;
            let pattern = rest
                .trim()
                .strip_prefix('|')
                .and_then(|r| r.strip_suffix('|'))
                .ok_or_else(|| DefinitionError::syntax(line, "observable must be |Agent()|"))?;
            let agent = self.agent(line, pattern.trim())?;
            if self.observables.iter().any(|o| o.name == name) {
                return Err(DefinitionError::semantic(line, format!("observable '{}' declared twice", name)));
            }
            self.observables.push(Observable { name, agent });
            Ok(())
        } else if text.starts_with('%') {
            Err(DefinitionError::syntax(line, format!("unknown directive '{}'", text)))
        } else {
            self.rule(line, text)
        }
    }

    fn rule(&mut self, line: usize, text: &str) -> Result<(), DefinitionError> {
        let (label, body) = if text.starts_with('\'') {
            let (label, rest) = parse_quoted(line, text)?;
            (Some(label), rest.trim())
        } else {
            (None, text)
        };

        let (reaction, rates) = body
            .split_once('@')
            .ok_or_else(|| DefinitionError::syntax(line, "rule has no '@ rate'"))?;

        let (lhs, rhs, reversible) = if let Some((l, r)) = reaction.split_once("<->") {
            (l, r, true)
        } else if let Some((l, r)) = reaction.split_once("->") {
            (l, r, false)
        } else {
            return Err(DefinitionError::syntax(line, "rule has no '->' or '<->'"));
        };

        let reactants = self.side(line, lhs)?;
        let products = self.side(line, rhs)?;
        let rates: Vec<&str> = rates.split(',').map(str::trim).collect();

        match (reversible, rates.as_slice()) {
            (false, [k]) => {
                let rate = self.parse_rate(line, k)?;
                self.rules.push(Rule {
                    label,
                    reactants,
                    products,
                    rate,
                });
            }
            (true, [kf, kr]) => {
                let forward = self.parse_rate(line, kf)?;
                let reverse = self.parse_rate(line, kr)?;
                let reverse_label = label.as_ref().map(|l| format!("{}_op", l));
                self.rules.push(Rule {
                    label,
                    reactants: reactants.clone(),
                    products: products.clone(),
                    rate: forward,
                });
                self.rules.push(Rule {
                    label: reverse_label,
                    reactants: products,
                    products: reactants,
                    rate: reverse,
                });
            }
            (false, _) => return Err(DefinitionError::syntax(line, "'->' takes exactly one rate")),
            (true, _) => return Err(DefinitionError::syntax(line, "'<->' takes two rates 'kf, kr'")),
        }
        Ok(())
    }

    fn side(&self, line: usize, text: &str) -> Result<Vec<usize>, DefinitionError> {
        let text = text.trim();
        if text.is_empty() || text == "." {
            return Ok(Vec::new());
        }
        text.split(',')
            .map(|pattern| self.agent(line, pattern.trim()))
            .collect()
    }

    fn agent(&self, line: usize, pattern: &str) -> Result<usize, DefinitionError> {
        let name = parse_agent(line, pattern)?;
        self.agent_index
            .get(&name)
            .copied()
            .ok_or_else(|| DefinitionError::semantic(line, format!("agent {} is not declared", name)))
    }

    fn parse_rate(&self, line: usize, text: &str) -> Result<f64, DefinitionError> {
        let rate = self.parse_value(line, text)?;
        if rate < 0.0 {
            return Err(DefinitionError::semantic(line, format!("negative rate {}", rate)));
        }
        Ok(rate)
    }

    /// A number literal or a quoted reference to a declared variable.
    fn parse_value(&self, line: usize, text: &str) -> Result<f64, DefinitionError> {
        if text.starts_with('\'') {
            let (name, rest) = parse_quoted(line, text)?;
            if !rest.trim().is_empty() {
                return Err(DefinitionError::syntax(line, format!("unexpected '{}'", rest.trim())));
            }
            return self
                .vars
                .get(&name)
                .copied()
                .ok_or_else(|| DefinitionError::semantic(line, format!("variable '{}' is not declared", name)));
        }
        let value: f64 = text
            .parse()
            .map_err(|_| DefinitionError::syntax(line, format!("'{}' is not a number", text)))?;
        if !value.is_finite() {
            return Err(DefinitionError::semantic(line, format!("'{}' is not finite", text)));
        }
        Ok(value)
    }

    /// Agent names in declaration order.
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Initial count per agent, indexed like `agents()`.
    pub fn initial_counts(&self) -> &[u64] {
        &self.initial
    }

    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    /// Looks up an observable by name.
    pub fn observable(&self, name: &str) -> Option<&Observable> {
        self.observables.iter().find(|o| o.name == name)
    }
}

/// Cuts the line at the first `#` outside a quoted name.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '#' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Splits `'name' rest` into `(name, rest)`.
fn parse_quoted(line: usize, text: &str) -> Result<(String, &str), DefinitionError> {
    let body = text
        .strip_prefix('\'')
        .ok_or_else(|| DefinitionError::syntax(line, format!("expected a quoted name at '{}'", text)))?;
    let end = body
        .find('\'')
        .ok_or_else(|| DefinitionError::syntax(line, "unterminated quote"))?;
    let name = &body[..end];
    if name.is_empty() {
        return Err(DefinitionError::syntax(line, "empty name"));
    }
    Ok((name.to_string(), &body[end + 1..]))
}

/// Parses `Name()` and returns `Name`.
fn parse_agent(line: usize, text: &str) -> Result<String, DefinitionError> {
    let name = text
        .strip_suffix("()")
        .ok_or_else(|| DefinitionError::syntax(line, format!("expected Agent() but found '{}'", text)))?;
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(DefinitionError::syntax(line, format!("invalid agent name '{}'", name)));
    }
    Ok(name.to_string())
}
