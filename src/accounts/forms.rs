use std::collections::BTreeMap;
use std::net::IpAddr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::accounts::validators::{validate_password, CandidateAccount};

pub const USERNAME: &str = "username";
pub const EMAIL: &str = "email";
pub const PASSWORD: &str = "password";
pub const PASSWORD1: &str = "password1";
pub const PASSWORD2: &str = "password2";
pub const NON_FIELD_ERRORS: &str = "__all__";

pub const USERNAME_MAX_LENGTH: usize = 150;
pub const EMAIL_MAX_LENGTH: usize = 254;

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_USERNAME: &str = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";
pub const DUPLICATE_USERNAME: &str = "A user with that username already exists.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";
pub const PASSWORD_MISMATCH: &str = "The two password fields didn’t match.";
pub const INVALID_LOGIN: &str = "Please enter a correct username and password. Note that both fields may be case-sensitive.";

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").expect("static regex");
    static ref EMAIL_USER_RE: Regex = Regex::new(
        r#"(?i)^(?:[-!#$%&'*+/=?^_`{}|~0-9a-z]+(?:\.[-!#$%&'*+/=?^_`{}|~0-9a-z]+)*|"(?:[\x01-\x08\x0b\x0c\x0e-\x1f!#-\[\]-\x7f]|\\[\x01-\x09\x0b\x0c\x0e-\x7f])*")$"#
    )
    .expect("static regex");
    static ref EMAIL_DOMAIN_RE: Regex =
        Regex::new(r"(?i)^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9-]{2,63}$")
            .expect("static regex");
    static ref EMAIL_LITERAL_RE: Regex =
        Regex::new(r"^\[([A-Fa-f0-9:.]+)\]$").expect("static regex");
}

/// Field name → ordered messages. Non-field messages live under `__all__`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, field: &str) -> bool {
        !self.field(field).is_empty()
    }

    pub fn contains(&self, field: &str, message: &str) -> bool {
        self.field(field).iter().any(|m| m == message)
    }

    pub fn non_field(&self) -> &[String] {
        self.field(NON_FIELD_ERRORS)
    }

    /// Number of fields carrying at least one message.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn max_length_message(limit: usize, actual: usize) -> String {
    format!("Ensure this value has at most {limit} characters (it has {actual}).")
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 320 {
        return false;
    }
    let Some((user, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if !EMAIL_USER_RE.is_match(user) {
        return false;
    }
    if domain.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if EMAIL_DOMAIN_RE.is_match(domain) {
        return !domain.ends_with('-');
    }
    EMAIL_LITERAL_RE
        .captures(domain)
        .and_then(|c| c.get(1))
        .map(|ip| ip.as_str().parse::<IpAddr>().is_ok())
        .unwrap_or(false)
}

/// Registration submission. Missing keys deserialize as empty strings.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedSignup {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl SignupForm {
    pub fn cleaned(&self) -> CleanedSignup {
        CleanedSignup {
            username: normalize_username(&self.username),
            email: self.email.trim().to_string(),
            password: self.password1.clone(),
        }
    }

    /// Runs every check that needs no storage access. Username uniqueness is
    /// left to the workflow and only makes sense when `username` has no errors.
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        let cleaned = self.cleaned();

        let username_len = cleaned.username.chars().count();
        if cleaned.username.is_empty() {
            errors.add(USERNAME, REQUIRED);
        } else {
            if username_len > USERNAME_MAX_LENGTH {
                errors.add(USERNAME, max_length_message(USERNAME_MAX_LENGTH, username_len));
            }
            if !is_valid_username(&cleaned.username) {
                errors.add(USERNAME, INVALID_USERNAME);
            }
        }

        let email_len = cleaned.email.chars().count();
        if cleaned.email.is_empty() {
            errors.add(EMAIL, REQUIRED);
        } else {
            if email_len > EMAIL_MAX_LENGTH {
                errors.add(EMAIL, max_length_message(EMAIL_MAX_LENGTH, email_len));
            }
            if !is_valid_email(&cleaned.email) {
                errors.add(EMAIL, INVALID_EMAIL);
            }
        }

        // Passwords are taken verbatim: whitespace is part of the secret.
        if self.password1.is_empty() {
            errors.add(PASSWORD1, REQUIRED);
        }
        if self.password2.is_empty() {
            errors.add(PASSWORD2, REQUIRED);
        }
        if !self.password1.is_empty() && !self.password2.is_empty() {
            if self.password1 != self.password2 {
                errors.add(PASSWORD2, PASSWORD_MISMATCH);
            } else {
                let candidate = CandidateAccount {
                    username: &cleaned.username,
                    email: &cleaned.email,
                    ..Default::default()
                };
                for err in validate_password(&self.password2, &candidate) {
                    errors.add(PASSWORD2, err.to_string());
                }
            }
        }

        errors
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

impl LoginForm {
    pub fn username(&self) -> String {
        normalize_username(&self.username)
    }

    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        if self.username().is_empty() {
            errors.add(USERNAME, REQUIRED);
        }
        if self.password.is_empty() {
            errors.add(PASSWORD, REQUIRED);
        }
        errors
    }
}

/// Compatibility form (NFKC) of the trimmed username, so full-width and
/// ASCII spellings name the same account.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().nfkc().collect()
}

/// Accepts only same-site relative paths as post-login destinations.
pub fn safe_next(next: Option<&str>) -> Option<&str> {
    let next = next?.trim();
    if !next.starts_with('/') || next.starts_with("//") || next.starts_with("/\\") {
        return None;
    }
    if next.chars().any(|c| c.is_control() || c == '\\') {
        return None;
    }
    Some(next)
}
