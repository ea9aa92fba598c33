//! The built-in analysis: counts events per method and freed objects.

use std::collections::BTreeMap;

use shadowrun::AnalysisError;
use shadowrun::AnalysisRegistry;
use shadowrun::Invocation;
use shadowrun::RegistrationError;
use shadowrun::RemoteAnalysis;
use shadowrun::ShadowObject;
use tracing::info;

#[derive(Debug, Default)]
pub struct CountingAnalysis {
    counts: BTreeMap<String, u64>,
    frees: u64,
}

impl CountingAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, method: &str) -> u64 {
        self.counts.get(method).copied().unwrap_or(0)
    }

    pub fn frees(&self) -> u64 {
        self.frees
    }

    /// `"add 3 & remove 2"`, methods in name order.
    pub fn totals(&self) -> String {
        let parts: Vec<_> = self.counts.iter().map(|(m, n)| format!("{} {}", m, n)).collect();
        parts.join(" & ")
    }
}

impl RemoteAnalysis for CountingAnalysis {
    fn name(&self) -> &str {
        "counting"
    }

    fn handle(&mut self, invocation: &Invocation) -> Result<(), AnalysisError> {
        *self.counts.entry(invocation.method.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn on_free(&mut self, _object: &ShadowObject) {
        self.frees += 1;
    }

    fn on_exit(&mut self) {
        info!(totals = %self.totals(), frees = self.frees, "session totals");
    }
}

/// A fresh registry for one session, with the counting analysis under `prefix`.
pub fn registry(prefix: &str) -> Result<AnalysisRegistry, RegistrationError> {
    AnalysisRegistry::new().with(prefix, Box::new(CountingAnalysis::new()))
}
