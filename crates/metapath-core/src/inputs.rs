//! Loading the three identifier collections from CSV inputs.

use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::errors::{GatherError, GatherResult};

/// Read one named column from a CSV file with a header row, preserving order.
///
/// Empty cells come back as `""`.
pub fn load_identifier_column(path: &Path, column: &str) -> GatherResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let position = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| {
            GatherError::InvalidArgument(format!(
                "{} has no '{column}' column",
                path.display()
            ))
        })?;
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        values.push(record.get(position).unwrap_or("").trim().to_string());
    }
    Ok(values)
}

/// Metapaths from `metapaths_csv`, minus any listed in `ignore_csv`.
///
/// With `only`, just those metapaths are kept (still in file order). Naming
/// one that the file does not list is an `InvalidArgument`.
pub fn load_metapaths(
    metapaths_csv: &Path,
    ignore_csv: Option<&Path>,
    only: Option<&[String]>,
) -> GatherResult<Vec<String>> {
    let mut metapaths = load_identifier_column(metapaths_csv, "metapath")?;
    if let Some(only) = only {
        metapaths = select_metapaths(metapaths, only)?;
    }
    let Some(ignore_csv) = ignore_csv else {
        return Ok(metapaths);
    };
    let ignored: HashSet<String> = load_identifier_column(ignore_csv, "metapath")?
        .into_iter()
        .collect();
    Ok(filter_ignored(metapaths, &ignored))
}

pub fn select_metapaths(metapaths: Vec<String>, only: &[String]) -> GatherResult<Vec<String>> {
    if let Some(missing) = only.iter().find(|m| !metapaths.contains(m)) {
        return Err(GatherError::InvalidArgument(format!(
            "metapath '{missing}' is not in the metapath list"
        )));
    }
    let wanted: HashSet<&str> = only.iter().map(String::as_str).collect();
    Ok(metapaths
        .into_iter()
        .filter(|m| wanted.contains(m.as_str()))
        .collect())
}

pub fn filter_ignored(metapaths: Vec<String>, ignored: &HashSet<String>) -> Vec<String> {
    metapaths
        .into_iter()
        .filter(|m| !ignored.contains(m))
        .collect()
}

/// The three ordered collections a run takes the cross product of.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputCollections {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub metapaths: Vec<String>,
}

impl InputCollections {
    pub fn new(sources: Vec<String>, targets: Vec<String>, metapaths: Vec<String>) -> Self {
        Self {
            sources,
            targets,
            metapaths,
        }
    }

    /// Load biological processes and genes (`id` column), and the filtered metapaths.
    pub fn load(
        bioprocess_csv: &Path,
        gene_csv: &Path,
        metapaths_csv: &Path,
        ignore_csv: Option<&Path>,
        only_metapaths: Option<&[String]>,
    ) -> GatherResult<Self> {
        let inputs = Self::new(
            load_identifier_column(bioprocess_csv, "id")?,
            load_identifier_column(gene_csv, "id")?,
            load_metapaths(metapaths_csv, ignore_csv, only_metapaths)?,
        );
        info!(
            sources = inputs.sources.len(),
            targets = inputs.targets.len(),
            metapaths = inputs.metapaths.len(),
            "loaded input collections"
        );
        Ok(inputs)
    }

    /// SHA-256 over the three collections, in order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (tag, items) in [
            ("sources", &self.sources),
            ("targets", &self.targets),
            ("metapaths", &self.metapaths),
        ] {
            hasher.update(tag.as_bytes());
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                hasher.update((item.len() as u64).to_le_bytes());
                hasher.update(item.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}
