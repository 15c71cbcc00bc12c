//! Command Validation Module
//!
//! This module decides whether a (tool, subcommand) pair may run and rewrites
//! raw arguments into a form that cannot carry shell metacharacters.
//! Everything here is pure and synchronous.

use super::ToolId;
use crate::error::ToolError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Maximum length of a sanitized argument, in characters
pub const MAX_ARGUMENT_LENGTH: usize = 1000;

/// Characters removed by the strict sanitization path
///
/// - ; : Command separator
/// - & | : Background execution and pipes
/// - ` $ : Command substitution and variable expansion
/// - { } : Brace expansion
/// - < > : Redirection
/// - ' " : Quoting
const STRICT_STRIP: [char; 11] = [';', '&', '|', '`', '$', '{', '}', '<', '>', '\'', '"'];

/// Positions below this index are never treated as function signatures
/// under [`SanitizePolicy::Positional`] (subcommand, target, signature, ...)
const FIRST_SIGNATURE_POSITION: usize = 2;

lazy_static! {
    static ref SIGNATURE_SHAPE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\([^)]*\)$").expect("signature regex is valid");
}

const FORGE_SUBCOMMANDS: &[&str] = &[
    "bind",
    "build",
    "cache",
    "clean",
    "compile",
    "config",
    "coverage",
    "create",
    "doc",
    "flatten",
    "fmt",
    "init",
    "inspect",
    "install",
    "remappings",
    "remove",
    "script",
    "selectors",
    "snapshot",
    "test",
    "tree",
    "update",
    "verify-contract",
];

const CAST_SUBCOMMANDS: &[&str] = &[
    "4byte",
    "abi-decode",
    "abi-encode",
    "balance",
    "block",
    "block-number",
    "call",
    "calldata",
    "chain-id",
    "code",
    "decode-calldata",
    "estimate",
    "from-wei",
    "gas-price",
    "keccak",
    "logs",
    "nonce",
    "receipt",
    "send",
    "sig",
    "storage",
    "to-dec",
    "to-hex",
    "to-wei",
    "tx",
    "wallet",
];

/// anvil takes no subcommand, so its first flag gates the invocation
const ANVIL_SUBCOMMANDS: &[&str] = &[
    "--accounts",
    "--balance",
    "--block-time",
    "--chain-id",
    "--fork-url",
    "--host",
    "--mnemonic",
    "--port",
    "--silent",
];

/// Immutable table of permitted (tool, subcommand) pairs
///
/// # Security Principles
///
/// 1. **Allowlist Only**: anything not listed is rejected
/// 2. **Exact Match**: no case-folding, no prefix matching
/// 3. **Fixed at Startup**: the table is built once and never mutated
#[derive(Debug, Clone, PartialEq)]
pub struct Allowlist {
    table: HashMap<ToolId, BTreeSet<String>>,
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::with_default_table()
    }
}

impl Allowlist {
    /// Create the built-in allowlist for forge, cast and anvil
    pub fn with_default_table() -> Self {
        let mut table = HashMap::new();
        table.insert(ToolId::Forge, to_set(FORGE_SUBCOMMANDS));
        table.insert(ToolId::Cast, to_set(CAST_SUBCOMMANDS));
        table.insert(ToolId::Anvil, to_set(ANVIL_SUBCOMMANDS));
        Self { table }
    }

    /// Create an allowlist that permits nothing
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Create the default table with some tools' entries replaced
    ///
    /// Tools absent from `overrides` keep their built-in subcommands.
    pub fn with_overrides(overrides: &HashMap<ToolId, Vec<String>>) -> Self {
        let mut allowlist = Self::with_default_table();
        for (tool, subcommands) in overrides {
            allowlist
                .table
                .insert(*tool, subcommands.iter().cloned().collect());
        }
        allowlist
    }

    /// Builder-style helper replacing one tool's subcommands
    pub fn with_tool<I, S>(mut self, tool: ToolId, subcommands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table
            .insert(tool, subcommands.into_iter().map(Into::into).collect());
        self
    }

    /// Check whether `subcommand` is permitted for `tool`
    pub fn validate_command(&self, tool: ToolId, subcommand: &str) -> bool {
        self.table
            .get(&tool)
            .map(|allowed| allowed.contains(subcommand))
            .unwrap_or(false)
    }

    /// Permitted subcommands for `tool`, sorted
    pub fn subcommands(&self, tool: ToolId) -> Vec<&str> {
        self.table
            .get(&tool)
            .map(|allowed| allowed.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

fn to_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Which argument positions may keep function-signature syntax
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SanitizePolicy {
    /// Positions >= 2 are eligible (subcommand, target, signature, ...)
    #[default]
    Positional,

    /// Only the listed positions are eligible
    Explicit(BTreeSet<usize>),
}

impl SanitizePolicy {
    pub fn explicit<I: IntoIterator<Item = usize>>(positions: I) -> Self {
        SanitizePolicy::Explicit(positions.into_iter().collect())
    }

    fn is_structural(&self, index: usize) -> bool {
        match self {
            SanitizePolicy::Positional => index >= FIRST_SIGNATURE_POSITION,
            SanitizePolicy::Explicit(positions) => positions.contains(&index),
        }
    }
}

/// Sanitize raw arguments with the positional signature heuristic
///
/// # Errors
///
/// Returns [`ToolError::InvalidArgument`] if any argument is empty after
/// sanitization or longer than [`MAX_ARGUMENT_LENGTH`] characters.
///
/// # Example
///
/// ```
/// use toolgate::tools::sanitize_args;
///
/// let raw = vec![
///     "call".to_string(),
///     "0xabc;rm".to_string(),
///     "transfer(address,uint256)".to_string(),
/// ];
/// let safe = sanitize_args(&raw).unwrap();
/// assert_eq!(safe, vec!["call", "0xabcrm", "transfer(address,uint256)"]);
/// ```
pub fn sanitize_args(raw_args: &[String]) -> Result<Vec<String>, ToolError> {
    sanitize_args_with(raw_args, &SanitizePolicy::Positional)
}

/// Sanitize raw arguments under an explicit policy
pub fn sanitize_args_with(
    raw_args: &[String],
    policy: &SanitizePolicy,
) -> Result<Vec<String>, ToolError> {
    raw_args
        .iter()
        .enumerate()
        .map(|(index, raw)| sanitize_one(index, raw, policy))
        .collect()
}

fn sanitize_one(index: usize, raw: &str, policy: &SanitizePolicy) -> Result<String, ToolError> {
    let sanitized = if policy.is_structural(index) && is_signature(raw) {
        normalize_whitespace(raw)
    } else {
        let stripped: String = raw.chars().filter(|c| !STRICT_STRIP.contains(c)).collect();
        normalize_whitespace(&stripped)
    };

    if sanitized.is_empty() {
        return Err(ToolError::invalid_argument(
            index,
            "argument is empty after sanitization",
        ));
    }
    let length = sanitized.chars().count();
    if length > MAX_ARGUMENT_LENGTH {
        return Err(ToolError::invalid_argument(
            index,
            format!(
                "argument is {} characters, maximum is {}",
                length, MAX_ARGUMENT_LENGTH
            ),
        ));
    }

    Ok(sanitized)
}

/// Function-signature shape with no strict-set characters in the parameter list
fn is_signature(raw: &str) -> bool {
    let candidate = raw.trim();
    SIGNATURE_SHAPE.is_match(candidate) && !candidate.contains(STRICT_STRIP)
}

/// Strip newlines and carriage returns, collapse whitespace runs, trim
fn normalize_whitespace(input: &str) -> String {
    let without_breaks: String = input.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    without_breaks.split_whitespace().collect::<Vec<_>>().join(" ")
}
