//! Work items and the catalog that enumerates them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::HarvestConfig;
use crate::error::CatalogError;

/// One unit of work: a single (entity, query) pair.
///
/// Identity is the ordered pair; two jobs are equal iff both keys match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub entity_key: String,
    pub query_key: String,
}

impl Job {
    pub fn new(entity_key: impl Into<String>, query_key: impl Into<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
            query_key: query_key.into(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entity_key, self.query_key)
    }
}

/// The fixed cross product of entities × queries.
///
/// Enumeration order is configuration order, entity-major: all queries of the
/// first entity, then all queries of the second, and so on. With append-only
/// lists this never reorders jobs that already existed.
#[derive(Debug, Clone)]
pub struct JobCatalog {
    entities: Vec<String>,
    queries: Vec<String>,
}

impl JobCatalog {
    /// Build a catalog, trimming identifiers and rejecting blanks and duplicates
    /// (either would make job keys ambiguous).
    pub fn new(entities: Vec<String>, queries: Vec<String>) -> Result<Self, CatalogError> {
        let entities = normalize(entities, CatalogError::BlankEntity, CatalogError::DuplicateEntity)?;
        let queries = normalize(queries, CatalogError::BlankQuery, CatalogError::DuplicateQuery)?;
        Ok(Self { entities, queries })
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self, CatalogError> {
        Self::new(config.entities.clone(), config.queries.clone())
    }

    /// Every job, in stable catalog order.
    pub fn enumerate(&self) -> Vec<Job> {
        self.entities
            .iter()
            .flat_map(|entity| self.queries.iter().map(move |query| Job::new(entity, query)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len() * self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }
}

fn normalize(
    items: Vec<String>,
    blank: fn(usize) -> CatalogError,
    duplicate: fn(String) -> CatalogError,
) -> Result<Vec<String>, CatalogError> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let item = item.trim().to_string();
        if item.is_empty() {
            return Err(blank(index));
        }
        if !seen.insert(item.clone()) {
            return Err(duplicate(item));
        }
        out.push(item);
    }
    Ok(out)
}
