//! Password strength validation and generation.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;

/// Password rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// Longest allowed run of one repeated character.
    pub max_repeated_chars: usize,
    pub reject_common: bool,
    pub reject_personal_info: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            max_repeated_chars: 3,
            reject_common: true,
            reject_personal_info: true,
        }
    }
}

/// Facts about the account, used to reject passwords built from them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PasswordContext {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A rule the password broke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PasswordIssue {
    #[error("must be at least {min} characters")]
    TooShort { min: usize },
    #[error("must be at most {max} characters")]
    TooLong { max: usize },
    #[error("must contain an uppercase letter")]
    MissingUppercase,
    #[error("must contain a lowercase letter")]
    MissingLowercase,
    #[error("must contain a digit")]
    MissingDigit,
    #[error("must contain a special character")]
    MissingSpecial,
    #[error("must not repeat a character more than {max} times in a row")]
    RepeatedCharacters { max: usize },
    #[error("must not contain sequences like 'abcd', '1234' or 'qwer'")]
    SequentialCharacters,
    #[error("is too common")]
    CommonPassword,
    #[error("must not contain your name or email")]
    ContainsPersonalInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordStrength {
    VeryWeak,
    Weak,
    Fair,
    Strong,
    VeryStrong,
}

impl PasswordStrength {
    fn from_score(score: u8) -> Self {
        match score {
            0..=19 => PasswordStrength::VeryWeak,
            20..=39 => PasswordStrength::Weak,
            40..=59 => PasswordStrength::Fair,
            60..=79 => PasswordStrength::Strong,
            _ => PasswordStrength::VeryStrong,
        }
    }
}

/// Result of validating a password.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordReport {
    pub valid: bool,
    /// 0 to 100.
    pub score: u8,
    pub strength: PasswordStrength,
    pub entropy_bits: f64,
    pub issues: Vec<PasswordIssue>,
}

const COMMON_PASSWORDS: &[&str] = &[
    "password", "passw0rd", "p@ssword", "p@ssw0rd", "qwerty", "qwertyuiop", "letmein",
    "welcome", "admin", "administrator", "login", "master", "monkey", "dragon", "iloveyou",
    "sunshine", "princess", "football", "baseball", "shadow", "superman", "trustno1",
    "abc123", "123456", "12345678", "123456789", "1234567890", "111111", "000000",
    "changeme", "secret", "default", "construction", "natacare", "project",
];

const KEYBOARD_ROWS: &[&str] = &["qwertyuiop", "asdfghjkl", "zxcvbnm", "1234567890"];

const SEQUENCE_LEN: usize = 4;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()-_=+[]{};:,.?";

fn is_special(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace()
}

/// Shannon-style estimate: length × log2(size of the character pool used).
pub fn estimate_entropy(password: &str) -> f64 {
    let mut pool = 0u32;
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        pool += 26;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        pool += 26;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        pool += 10;
    }
    if password.chars().any(|c| c.is_ascii() && is_special(c)) {
        pool += 32;
    }
    if password.chars().any(|c| !c.is_ascii()) {
        pool += 100;
    }
    if pool == 0 {
        return 0.0;
    }
    password.chars().count() as f64 * f64::from(pool).log2()
}

fn longest_run(password: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut prev = None;
    for c in password.chars() {
        if Some(c) == prev {
            current += 1;
        } else {
            current = 1;
            prev = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

fn has_sequence(password: &str) -> bool {
    let lower: Vec<char> = password.to_lowercase().chars().collect();

    let arithmetic = lower.windows(SEQUENCE_LEN).any(|w| {
        w.iter().all(|c| c.is_ascii_alphanumeric())
            && (w.windows(2).all(|p| p[1] as i32 - p[0] as i32 == 1)
                || w.windows(2).all(|p| p[0] as i32 - p[1] as i32 == 1))
    });
    if arithmetic {
        return true;
    }

    let text: String = lower.into_iter().collect();
    KEYBOARD_ROWS.iter().any(|row| {
        let row: Vec<char> = row.chars().collect();
        row.windows(SEQUENCE_LEN).any(|w| {
            let forward: String = w.iter().collect();
            let backward: String = w.iter().rev().collect();
            text.contains(&forward) || text.contains(&backward)
        })
    })
}

fn is_common(password: &str) -> bool {
    let lower = password.to_lowercase();
    let core = lower.trim_end_matches(|c: char| c.is_ascii_digit() || is_special(c));
    COMMON_PASSWORDS.contains(&lower.as_str()) || COMMON_PASSWORDS.contains(&core)
}

fn personal_tokens(context: &PasswordContext) -> Vec<String> {
    let mut tokens = Vec::new();
    if let Some(email) = &context.email {
        let local = email.split('@').next().unwrap_or_default();
        tokens.extend(
            local
                .split(['.', '_', '-', '+'])
                .map(str::to_lowercase),
        );
    }
    if let Some(name) = &context.name {
        tokens.extend(name.split_whitespace().map(str::to_lowercase));
    }
    tokens.retain(|t| t.chars().count() >= 3);
    tokens
}

impl PasswordPolicy {
    /// Check a password against the policy and score it.
    pub fn validate(&self, password: &str, context: &PasswordContext) -> PasswordReport {
        let mut issues = Vec::new();
        let length = password.chars().count();

        if length < self.min_length {
            issues.push(PasswordIssue::TooShort { min: self.min_length });
        }
        if length > self.max_length {
            issues.push(PasswordIssue::TooLong { max: self.max_length });
        }

        let has_upper = password.chars().any(char::is_uppercase);
        let has_lower = password.chars().any(char::is_lowercase);
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_special = password.chars().any(is_special);

        if self.require_uppercase && !has_upper {
            issues.push(PasswordIssue::MissingUppercase);
        }
        if self.require_lowercase && !has_lower {
            issues.push(PasswordIssue::MissingLowercase);
        }
        if self.require_digit && !has_digit {
            issues.push(PasswordIssue::MissingDigit);
        }
        if self.require_special && !has_special {
            issues.push(PasswordIssue::MissingSpecial);
        }

        let repeated = self.max_repeated_chars > 0 && longest_run(password) > self.max_repeated_chars;
        if repeated {
            issues.push(PasswordIssue::RepeatedCharacters { max: self.max_repeated_chars });
        }
        let sequential = has_sequence(password);
        if sequential {
            issues.push(PasswordIssue::SequentialCharacters);
        }
        let common = self.reject_common && is_common(password);
        if common {
            issues.push(PasswordIssue::CommonPassword);
        }
        let lower = password.to_lowercase();
        let personal = self.reject_personal_info
            && personal_tokens(context).iter().any(|t| lower.contains(t.as_str()));
        if personal {
            issues.push(PasswordIssue::ContainsPersonalInfo);
        }

        let entropy_bits = estimate_entropy(password);

        let mut score = (length as i32 * 4).min(40);
        score += [has_upper, has_lower, has_digit, has_special]
            .iter()
            .filter(|b| **b)
            .count() as i32
            * 10;
        if entropy_bits >= 60.0 {
            score += 10;
        }
        if entropy_bits >= 80.0 {
            score += 10;
        }
        if sequential {
            score -= 15;
        }
        if repeated {
            score -= 15;
        }
        if personal {
            score -= 20;
        }
        if length < self.min_length {
            score = score.min(30);
        }
        if common {
            score = score.min(10);
        }
        let score = score.clamp(0, 100) as u8;

        let valid = issues.is_empty();
        metrics::record_password_check(valid);

        PasswordReport {
            valid,
            score,
            strength: PasswordStrength::from_score(score),
            entropy_bits,
            issues,
        }
    }

    /// Generate a random password that satisfies this policy.
    ///
    /// `length` is clamped into the policy's bounds.
    pub fn generate(&self, length: usize) -> String {
        let length = length.max(self.min_length).max(4).min(self.max_length.max(4));
        let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
        let mut rng = rand::thread_rng();
        let context = PasswordContext::default();

        let mut candidate = String::new();
        for _ in 0..100 {
            let mut chars: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL]
                .iter()
                .map(|set| set[rng.gen_range(0..set.len())])
                .collect();
            while chars.len() < length {
                chars.push(all[rng.gen_range(0..all.len())]);
            }
            chars.shuffle(&mut rng);
            candidate = chars.into_iter().map(char::from).collect();

            if self.validate(&candidate, &context).valid {
                break;
            }
        }
        candidate
    }
}
