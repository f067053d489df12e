use crate::error::EngineError;
use std::fmt;

const TEMPORARY_MARKER: &str = "__";

/// A preset name as stored in a scope document.
///
/// `__<id>__<base>` marks an in-progress edit of `<base>`; every other
/// name (including `__temporary`) is a base name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresetName {
    Base(String),
    Temporary { id: String, base: String },
}

impl PresetName {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        if raw.trim().is_empty() {
            return Err(EngineError::invalid_parameter(
                "presetName",
                "preset name must not be empty",
            ));
        }
        Ok(Self::classify(raw))
    }

    /// Classifies a name already present in a document. Never fails.
    pub fn classify(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(TEMPORARY_MARKER) {
            if let Some((id, base)) = rest.split_once(TEMPORARY_MARKER) {
                if !id.is_empty() && !base.is_empty() {
                    return PresetName::Temporary {
                        id: id.to_string(),
                        base: base.to_string(),
                    };
                }
            }
        }
        PresetName::Base(raw.to_string())
    }

    pub fn base(&self) -> &str {
        match self {
            PresetName::Base(name) => name,
            PresetName::Temporary { base, .. } => base,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, PresetName::Temporary { .. })
    }

    /// Whether deleting `self` also removes `candidate`.
    ///
    /// A base name takes its temporary versions with it. A temporary name
    /// removes every temporary version of the same base, whatever the id,
    /// and never the base preset.
    pub fn deletes(&self, candidate: &PresetName) -> bool {
        match self {
            PresetName::Base(base) => candidate.base() == base,
            PresetName::Temporary { base, .. } => {
                candidate.is_temporary() && candidate.base() == base
            }
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetName::Base(name) => f.write_str(name),
            PresetName::Temporary { id, base } => {
                write!(f, "{TEMPORARY_MARKER}{id}{TEMPORARY_MARKER}{base}")
            }
        }
    }
}
