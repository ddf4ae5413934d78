//! Passphrase policy

use serde::{Deserialize, Serialize};

use crate::error::{KeyVaultError, Result};

/// Character classes a passphrase can draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharClass {
    Lowercase,
    Uppercase,
    Digit,
    Symbol,
}

impl CharClass {
    pub const ALL: [CharClass; 4] = [
        CharClass::Lowercase,
        CharClass::Uppercase,
        CharClass::Digit,
        CharClass::Symbol,
    ];

    fn matches(&self, c: char) -> bool {
        match self {
            Self::Lowercase => c.is_lowercase(),
            Self::Uppercase => c.is_uppercase(),
            Self::Digit => c.is_numeric(),
            Self::Symbol => !c.is_alphanumeric() && !c.is_whitespace(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lowercase => "lowercase letter",
            Self::Uppercase => "uppercase letter",
            Self::Digit => "digit",
            Self::Symbol => "symbol",
        }
    }
}

/// Strength requirements for master-key passphrases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassphrasePolicy {
    /// Minimum length in characters
    pub min_length: usize,

    /// How many distinct character classes must appear
    pub min_classes: usize,
}

impl Default for PassphrasePolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            min_classes: 3,
        }
    }
}

impl PassphrasePolicy {
    /// Classes present in `passphrase`
    pub fn classes_present(passphrase: &str) -> Vec<CharClass> {
        CharClass::ALL
            .iter()
            .copied()
            .filter(|class| passphrase.chars().any(|c| class.matches(c)))
            .collect()
    }

    /// Check the passphrase, collecting every unmet requirement
    pub fn validate(&self, passphrase: &str) -> Result<()> {
        let mut errors = Vec::new();

        let length = passphrase.chars().count();
        if length < self.min_length {
            errors.push(format!(
                "Passphrase must be at least {} characters",
                self.min_length
            ));
        }

        let present = Self::classes_present(passphrase);
        if present.len() < self.min_classes {
            let missing: Vec<&str> = CharClass::ALL
                .iter()
                .filter(|c| !present.contains(c))
                .map(|c| c.as_str())
                .collect();
            errors.push(format!(
                "Passphrase must mix at least {} of: lowercase, uppercase, digit, symbol (missing {})",
                self.min_classes,
                missing.join(", ")
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KeyVaultError::WeakPassphrase(errors))
        }
    }
}
