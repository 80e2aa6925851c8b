//! Verification request: the candidate code plus what it must satisfy.

use feedback_state::ContentDigest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A requirement-derived runtime test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Script fed to the test harness on stdin.
    #[serde(alias = "test")]
    pub input: String,
    /// Expected harness output, compared after trimming.
    pub expected: String,
}

/// What the code is checked against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Language tag (`vue`, `typescript`, `python`, `json`, ...).
    pub language: String,

    /// Markers that must appear in the code. Entries prefixed `re:` are
    /// regular expressions, all others are literal substrings.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Named requirement items (name -> description).
    #[serde(default)]
    pub rules: BTreeMap<String, String>,

    /// Reference implementation or design export to compare structure against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_reference: Option<String>,

    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Requirements {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_rule(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.rules.insert(name.into(), description.into());
        self
    }

    pub fn with_design_reference(mut self, reference: impl Into<String>) -> Self {
        self.design_reference = Some(reference.into());
        self
    }

    pub fn with_test_case(mut self, case: TestCase) -> Self {
        self.test_cases.push(case);
        self
    }

    /// SHA-256 of the canonical JSON encoding.
    ///
    /// Field order is fixed by the struct and `rules` is a sorted map, so
    /// equal requirements always produce the same fingerprint.
    pub fn fingerprint(&self) -> ContentDigest {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        ContentDigest::from_bytes(&canonical)
    }

    /// Flattened text used for similarity retrieval.
    pub fn retrieval_text(&self) -> String {
        let mut parts = vec![self.language.clone()];
        parts.extend(self.patterns.iter().cloned());
        for (name, description) in &self.rules {
            parts.push(format!("{name} {description}"));
        }
        parts.extend(self.test_cases.iter().map(|c| c.name.clone()));
        parts.join("\n")
    }
}

/// One candidate submitted for verification. Never mutated; a corrected
/// candidate is a new value built with [`VerificationRequest::with_code`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub code: String,
    pub requirements: Requirements,
    #[serde(default)]
    pub context: String,
}

impl VerificationRequest {
    pub fn new(code: impl Into<String>, requirements: Requirements) -> Self {
        Self {
            code: code.into(),
            requirements,
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Same requirements and context, different candidate code.
    pub fn with_code(&self, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            requirements: self.requirements.clone(),
            context: self.context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = Requirements::new("vue")
            .with_pattern("<template>")
            .with_rule("b", "second")
            .with_rule("a", "first");
        let b = Requirements::new("vue")
            .with_pattern("<template>")
            .with_rule("a", "first")
            .with_rule("b", "second");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = a.clone().with_pattern("<script>");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn with_code_keeps_requirements() {
        let req = VerificationRequest::new("old", Requirements::new("python")).with_context("ctx");
        let next = req.with_code("new");
        assert_eq!(next.code, "new");
        assert_eq!(next.requirements, req.requirements);
        assert_eq!(next.context, "ctx");
        assert_eq!(req.code, "old");
    }

    #[test]
    fn test_case_accepts_test_alias() {
        let case: TestCase =
            serde_json::from_str(r#"{"name":"adds","test":"print(1+1)","expected":"2"}"#)
                .unwrap();
        assert_eq!(case.input, "print(1+1)");
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: VerificationRequest =
            serde_json::from_str(r#"{"code":"x","requirements":{"language":"json"}}"#).unwrap();
        assert!(req.requirements.patterns.is_empty());
        assert!(req.context.is_empty());
        assert!(req.requirements.design_reference.is_none());
    }
}
