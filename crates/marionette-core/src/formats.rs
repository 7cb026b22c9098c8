//! Named model and results formats.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A model export format, e.g. `NeuroML`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelFormat(String);

impl ModelFormat {
    /// Wrap a format name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Format name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A simulation results format, e.g. `HDF5`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsFormat(String);

impl ResultsFormat {
    /// Wrap a format name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Format name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Resolves format names. Unknown names resolve to `None`.
pub trait FormatRegistry: Send + Sync {
    /// Model format registered under `name`.
    fn model_format(&self, name: &str) -> Option<ModelFormat>;

    /// Results format registered under `name`.
    fn results_format(&self, name: &str) -> Option<ResultsFormat>;

    /// Every registered model format.
    fn model_formats(&self) -> Vec<ModelFormat>;
}

/// Fixed set of format names, matched case-sensitively.
#[derive(Clone, Debug, Default)]
pub struct FormatCatalog {
    model: BTreeSet<String>,
    results: BTreeSet<String>,
}

impl FormatCatalog {
    /// Catalog holding the given model and results format names.
    pub fn new<M, R>(model: M, results: R) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            model: model.into_iter().map(Into::into).collect(),
            results: results.into_iter().map(Into::into).collect(),
        }
    }
}

impl FormatRegistry for FormatCatalog {
    fn model_format(&self, name: &str) -> Option<ModelFormat> {
        self.model.contains(name).then(|| ModelFormat::new(name))
    }

    fn results_format(&self, name: &str) -> Option<ResultsFormat> {
        self.results.contains(name).then(|| ResultsFormat::new(name))
    }

    fn model_formats(&self) -> Vec<ModelFormat> {
        self.model.iter().map(ModelFormat::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> FormatCatalog {
        FormatCatalog::new(["NeuroML", "LEMS"], ["HDF5"])
    }

    #[test]
    fn known_names_resolve() {
        let c = catalog();
        assert_eq!(c.model_format("LEMS").unwrap().name(), "LEMS");
        assert_eq!(c.results_format("HDF5").unwrap().name(), "HDF5");
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        let c = catalog();
        assert!(c.model_format("neuroml").is_none());
        assert!(c.results_format("CSV").is_none());
        assert!(c.model_format("HDF5").is_none());
    }

    #[test]
    fn model_formats_are_sorted() {
        let names: Vec<_> = catalog()
            .model_formats()
            .iter()
            .map(|f| f.name().to_owned())
            .collect();
        assert_eq!(names, vec!["LEMS", "NeuroML"]);
    }
}
