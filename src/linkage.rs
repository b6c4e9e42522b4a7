//! Linkage validator
//!
//! Read-only parent/child checks. Every child row's `parent_id` must name a
//! row of an allowed parent level carrying the same `run_id`. After S13 the
//! check only warns; before promotion it blocks.

use rusqlite::types::Value;
use std::fmt;

use crate::error::{Error, Result};
use crate::warehouse::{Level, Table, Warehouse};

/// Parent levels allowed for each child level. Parents always sit at a
/// strictly higher level than their children.
pub const CONTRACTS: &[(Level, &[Level])] = &[
    (Level::Message, &[Level::Conversation]),
    (Level::Turn, &[Level::Conversation]),
    (Level::Sentence, &[Level::Message]),
    (Level::Token, &[Level::Message, Level::Sentence]),
];

const SAMPLE_SIZE: usize = 5;

/// Which tables hold the levels being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The per-level tables written by S5-S8.
    LevelTables,
    /// The single `stage_14` union that promotion reads.
    Aggregate,
}

impl Scope {
    pub fn table(&self, level: Level) -> Table {
        match (self, level) {
            (Scope::Aggregate, _) => Table::Stage(14),
            (Scope::LevelTables, Level::Token | Level::Sentence) => Table::Stage(5),
            (Scope::LevelTables, Level::Message) => Table::Stage(7),
            (Scope::LevelTables, Level::Turn) => Table::Stage(6),
            (Scope::LevelTables, Level::Conversation) => Table::Stage(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelLinkage {
    pub child: Level,
    pub parents: Vec<Level>,
    pub checked: u64,
    pub orphans: u64,
    /// A few orphaned child ids.
    pub sample: Vec<String>,
}

impl fmt::Display for LevelLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parents: Vec<&str> = self.parents.iter().map(|l| l.name()).collect();
        write!(
            f,
            "{} -> {}: {} checked, {} orphaned",
            self.child.name(),
            parents.join("|"),
            self.checked,
            self.orphans
        )?;
        if !self.sample.is_empty() {
            write!(f, " (e.g. {})", self.sample.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkageReport {
    pub scope: Scope,
    pub pairs: Vec<LevelLinkage>,
}

impl LinkageReport {
    pub fn total_orphans(&self) -> u64 {
        self.pairs.iter().map(|p| p.orphans).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_orphans() == 0
    }

    /// `OrphanParent` when anything is orphaned.
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            return Ok(self);
        }
        let sample = self
            .pairs
            .iter()
            .filter(|p| p.orphans > 0)
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::OrphanParent {
            count: self.total_orphans(),
            sample,
        })
    }
}

/// Check every contract for one run.
pub fn check(warehouse: &Warehouse, run_id: &str, scope: Scope) -> Result<LinkageReport> {
    let mut pairs = Vec::with_capacity(CONTRACTS.len());
    for (child, parents) in CONTRACTS {
        pairs.push(check_pair(warehouse, run_id, scope, *child, parents)?);
    }
    Ok(LinkageReport { scope, pairs })
}

fn check_pair(
    warehouse: &Warehouse,
    run_id: &str,
    scope: Scope,
    child: Level,
    parents: &[Level],
) -> Result<LevelLinkage> {
    let mut linkage = LevelLinkage {
        child,
        parents: parents.to_vec(),
        checked: 0,
        orphans: 0,
        sample: Vec::new(),
    };
    let child_table = scope.table(child);
    if !warehouse.exists(child_table)? {
        return Ok(linkage);
    }
    let child_name = warehouse.name(child_table)?;

    // ?1 = run_id, ?2 = child level, ?3.. = parent levels
    let mut params = vec![Value::from(run_id.to_string()), Value::from(child.as_i64())];
    let mut absent = Vec::new();
    for parent in parents {
        let table = scope.table(*parent);
        if !warehouse.exists(table)? {
            continue;
        }
        params.push(Value::from(parent.as_i64()));
        absent.push(format!(
            "NOT EXISTS (SELECT 1 FROM {} p WHERE p.run_id = ?1 AND p.level = ?{} AND p.entity_id = c.parent_id)",
            warehouse.name(table)?,
            params.len()
        ));
    }
    let orphaned = if absent.is_empty() {
        "1 = 1".to_string()
    } else {
        format!("(c.parent_id IS NULL OR ({}))", absent.join(" AND "))
    };

    linkage.checked = warehouse.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} c WHERE c.run_id = ?1 AND c.level = ?2",
            child_name
        ),
        rusqlite::params_from_iter(params[..2].iter()),
        |row| row.get::<_, i64>(0),
    )? as u64;
    if linkage.checked == 0 {
        return Ok(linkage);
    }
    linkage.orphans = warehouse.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} c WHERE c.run_id = ?1 AND c.level = ?2 AND {}",
            child_name, orphaned
        ),
        rusqlite::params_from_iter(params.iter()),
        |row| row.get::<_, i64>(0),
    )? as u64;
    if linkage.orphans > 0 {
        linkage.sample = warehouse.column_values(
            &format!(
                "SELECT c.entity_id FROM {} c WHERE c.run_id = ?1 AND c.level = ?2 AND {} ORDER BY c.entity_id LIMIT {}",
                child_name, orphaned, SAMPLE_SIZE
            ),
            params,
        )?;
    }
    Ok(linkage)
}
