//! Known Program Addresses
//!
//! Well-known Solana system and DEX programs, plus the runtime-updatable
//! denylist of malicious program signatures scanned for in simulation logs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// DEX programs agents are expected to route through
pub const KNOWN_DEX_PROGRAMS: &[&str] = &[
    // Jupiter Aggregator v6
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
    // Jupiter Limit Order v2
    "j1o2qRpjcyUwEvwtcfhS9NCHT98wiXpESLWnqPN62Cu",
    // Raydium AMM v4
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
    // Raydium CLMM
    "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK",
    // Raydium CP
    "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C",
    // Orca Whirlpool
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",
    // Meteora DLMM
    "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo",
    // Phoenix
    "PhoeNiXZ8ByJGLkxNfZRnkUfjvmuYqLR89jjFHGqdXY",
    // OpenBook v2
    "opnb2LAfJYbRMAHHvqjCwQxanZn7ReEHp1k81EohpZb",
    // Pump.fun bonding curve
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
];

/// Runtime and token programs present in almost every transaction
pub const SYSTEM_PROGRAMS: &[&str] = &[
    "11111111111111111111111111111111",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
    "ComputeBudget111111111111111111111111111111",
    "AddressLookupTab1e1111111111111111111111111",
    "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
];

pub fn is_known_dex_program(program_id: &str) -> bool {
    KNOWN_DEX_PROGRAMS.contains(&program_id)
}

pub fn is_system_program(program_id: &str) -> bool {
    SYSTEM_PROGRAMS.contains(&program_id)
}

pub fn is_known_program(program_id: &str) -> bool {
    is_system_program(program_id) || is_known_dex_program(program_id)
}

/// Program ids invoked in a simulation log, in first-seen order.
///
/// Matches the runtime's `Program <id> invoke [<depth>]` lines.
pub fn invoked_programs(logs: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut programs = Vec::new();
    for line in logs {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("Program") {
            continue;
        }
        let (Some(id), Some("invoke")) = (parts.next(), parts.next()) else {
            continue;
        };
        if seen.insert(id.to_string()) {
            programs.push(id.to_string());
        }
    }
    programs
}

/// Set of known-malicious program identifiers.
///
/// Entries are matched as substrings of log lines, so both bare program ids
/// and distinctive log signatures work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramDenylist {
    entries: BTreeSet<String>,
}

impl ProgramDenylist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::new();
        list.extend(entries);
        list
    }

    /// Returns false for blank or already-present entries
    pub fn add(&mut self, entry: impl Into<String>) -> bool {
        let entry = entry.into().trim().to_string();
        if entry.is_empty() {
            return false;
        }
        self.entries.insert(entry)
    }

    pub fn remove(&mut self, entry: &str) -> bool {
        self.entries.remove(entry)
    }

    pub fn extend<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for entry in entries {
            self.add(entry);
        }
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// First denylisted entry found in any log line
    pub fn find_match(&self, logs: &[String]) -> Option<String> {
        logs.iter().find_map(|line| {
            self.entries
                .iter()
                .find(|entry| line.contains(entry.as_str()))
                .cloned()
        })
    }
}
