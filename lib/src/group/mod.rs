//! The membership group: its state, the commitments it holds, and the store
//! that persists it.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ValidationError};

pub mod files;
pub mod root;
pub mod store;

pub use root::{RootFunction, Sha256MerkleRoot};
pub use store::{CacheStatus, LoadSource, MembershipStore};

/// 2^256 - 1 has 78 decimal digits.
pub const MAX_COMMITMENT_DIGITS: usize = 78;

/// A validated commitment in canonical decimal form: digits only, no sign,
/// no leading zeros (`"0"` is the only value starting with `0`).
///
/// Since the form is canonical, comparing two `Commitment`s as strings is the
/// same as comparing the integers they represent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Commitment(String);

impl Commitment {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::NotDecimal);
        }

        let significant = trimmed.trim_start_matches('0');
        if significant.len() > MAX_COMMITMENT_DIGITS {
            return Err(ValidationError::TooLong);
        }

        if significant.is_empty() {
            Ok(Self("0".to_string()))
        } else {
            Ok(Self(significant.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Commitment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Commitment {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Commitment> for String {
    fn from(value: Commitment) -> Self {
        value.0
    }
}

impl AsRef<str> for Commitment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single persisted aggregate.
///
/// `root` always matches `members` at `tree_depth` when handed to a caller:
/// the store recomputes it on every mutation and after every load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    #[serde(alias = "id")]
    pub group_id: u64,
    pub tree_depth: u8,
    pub members: Vec<Commitment>,
    pub root: String,
}

impl GroupState {
    /// The empty group, with the root of the empty set.
    pub fn empty(
        group_id: u64,
        tree_depth: u8,
        roots: &impl RootFunction,
    ) -> Result<Self, Error> {
        Ok(Self {
            group_id,
            tree_depth,
            members: Vec::new(),
            root: roots.compute_root(&[], tree_depth)?,
        })
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.members.contains(commitment)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
