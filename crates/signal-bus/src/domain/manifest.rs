//! Server manifest: which signals may be forwarded and which functions may
//! be called.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Names published by the server for this client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Signals the server listens to; each is bound remote on the client.
    pub signals: Vec<String>,
    /// Remote functions the client may invoke.
    pub functions: Vec<String>,
}

/// Dotted function names with namespace lookups.
///
/// `demo.math.add` declares the function and implicitly the namespaces
/// `demo` and `demo.math`.
#[derive(Debug, Clone, Default)]
pub struct FunctionDirectory {
    functions: BTreeSet<String>,
}

impl FunctionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function. Returns false if already declared.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.functions.insert(name.into())
    }

    /// Whether `name` is a declared function.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    /// Every namespace prefix of every declared function, sorted.
    pub fn namespaces(&self) -> BTreeSet<String> {
        let mut namespaces = BTreeSet::new();
        for name in &self.functions {
            let mut rest = name.as_str();
            while let Some((parent, _)) = rest.rsplit_once('.') {
                namespaces.insert(parent.to_string());
                rest = parent;
            }
        }
        namespaces
    }

    /// Direct children (functions or namespaces) of a namespace.
    pub fn children(&self, namespace: &str) -> Vec<String> {
        let prefix = format!("{namespace}.");
        let mut children: Vec<String> = self
            .functions
            .iter()
            .filter_map(|name| name.strip_prefix(&prefix))
            .map(|rest| rest.split('.').next().unwrap_or(rest).to_string())
            .collect();
        children.dedup();
        children
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
