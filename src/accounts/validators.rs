//! Credential strength rules applied at signup.
//!
//! Every rule runs independently so one submission can collect several
//! messages. The similarity rule compares against the candidate account that
//! would be created, which is why it takes the username and email too.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

pub const MIN_LENGTH: usize = 8;
pub const MAX_SIMILARITY: f64 = 0.7;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"\W+").expect("static regex");
    static ref COMMON_PASSWORDS: HashSet<&'static str> = include_str!("common_passwords.txt")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("This password is too similar to the {0}.")]
    TooSimilar(&'static str),
    #[error("This password is too short. It must contain at least {min_length} characters.")]
    TooShort { min_length: usize },
    #[error("This password is too common.")]
    TooCommon,
    #[error("This password is entirely numeric.")]
    EntirelyNumeric,
}

/// The account a password is being chosen for.
#[derive(Debug, Default, Clone, Copy)]
pub struct CandidateAccount<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
}

impl<'a> CandidateAccount<'a> {
    fn attributes(&self) -> [(&'static str, &'a str); 4] {
        [
            ("username", self.username),
            ("first name", self.first_name),
            ("last name", self.last_name),
            ("email address", self.email),
        ]
    }
}

pub fn validate_password(password: &str, candidate: &CandidateAccount<'_>) -> Vec<PasswordError> {
    let mut errors = Vec::new();
    if let Some(attribute) = too_similar_to(password, candidate) {
        errors.push(PasswordError::TooSimilar(attribute));
    }
    if password.chars().count() < MIN_LENGTH {
        errors.push(PasswordError::TooShort {
            min_length: MIN_LENGTH,
        });
    }
    if is_common(password) {
        errors.push(PasswordError::TooCommon);
    }
    if is_entirely_numeric(password) {
        errors.push(PasswordError::EntirelyNumeric);
    }
    errors
}

fn too_similar_to(password: &str, candidate: &CandidateAccount<'_>) -> Option<&'static str> {
    let password = password.to_lowercase();
    for (name, value) in candidate.attributes() {
        if value.is_empty() {
            continue;
        }
        let value = value.to_lowercase();
        let parts = NON_WORD
            .split(&value)
            .chain(std::iter::once(value.as_str()));
        for part in parts {
            if exceeds_length_ratio(&password, part) {
                continue;
            }
            if quick_ratio(&password, part) >= MAX_SIMILARITY {
                return Some(name);
            }
        }
    }
    None
}

/// A part this much shorter than the password cannot reach the similarity bound.
fn exceeds_length_ratio(password: &str, part: &str) -> bool {
    let pwd_len = password.chars().count();
    let part_len = part.chars().count();
    let bound = MAX_SIMILARITY / 2.0 * pwd_len as f64;
    pwd_len >= 10 * part_len && (part_len as f64) < bound
}

/// Upper bound on the matching-blocks ratio: shared characters counted as multisets.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }
    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(n) = available.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                matches += 1;
            }
        }
    }
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    2.0 * matches as f64 / total as f64
}

fn is_common(password: &str) -> bool {
    COMMON_PASSWORDS.contains(password.trim().to_lowercase().as_str())
}

// Any Unicode digit counts, so full-width input from an IME is caught too.
fn is_entirely_numeric(password: &str) -> bool {
    !password.is_empty() && password.chars().all(char::is_numeric)
}
