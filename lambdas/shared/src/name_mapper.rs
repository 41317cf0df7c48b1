//! Table name mapping between deployment stages
//!
//! Tables are named `<service>-<stage>-<name>`; the stage token is swapped so
//! `gb-orders-prod-table` in the source account lands in `gb-orders-test-table`.

use tracing::{info, warn};

/// Result of mapping one table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMapping {
    pub table_name: String,
    /// False when the source stage token was not found
    pub changed: bool,
}

/// Maps source-stage table names to target-stage names
#[derive(Debug, Clone)]
pub struct NameMapper {
    source_stage: String,
    target_stage: String,
}

impl NameMapper {
    pub fn new(source_stage: impl Into<String>, target_stage: impl Into<String>) -> Self {
        Self {
            source_stage: source_stage.into(),
            target_stage: target_stage.into(),
        }
    }

    pub fn map(&self, table_name: &str) -> NameMapping {
        map_table_name(table_name, &self.source_stage, &self.target_stage)
    }
}

/// Replace every `-{source_stage}-` with `-{target_stage}-`
pub fn map_table_name(table_name: &str, source_stage: &str, target_stage: &str) -> NameMapping {
    let mapped = table_name.replace(
        &format!("-{}-", source_stage),
        &format!("-{}-", target_stage),
    );

    info!(from = %table_name, to = %mapped, "Mapping table name");

    let changed = mapped != table_name;
    if !changed {
        warn!(
            table = %table_name,
            source_stage = %source_stage,
            "Table name mapping did not change, source stage not present in table name"
        );
    }

    NameMapping {
        table_name: mapped,
        changed,
    }
}
