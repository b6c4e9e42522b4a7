//! Process-local daily job counters.

use chrono::{NaiveDate, Utc};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Load,
    Query,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Load => "load",
            JobKind::Query => "query",
        }
    }
}

#[derive(Debug)]
struct Counters {
    day: NaiveDate,
    load: u64,
    query: u64,
}

/// Counts jobs against a per-day ceiling. Clones share the same counters.
#[derive(Debug, Clone)]
pub struct JobBudget {
    max_load: u64,
    max_query: u64,
    counters: Arc<Mutex<Counters>>,
}

impl JobBudget {
    pub fn new(max_load: u64, max_query: u64) -> Self {
        Self {
            max_load,
            max_query,
            counters: Arc::new(Mutex::new(Counters {
                day: Utc::now().date_naive(),
                load: 0,
                query: 0,
            })),
        }
    }

    /// Reserve one job, or fail without reserving when the ceiling is reached.
    pub fn charge(&self, kind: JobKind) -> Result<()> {
        self.charge_on(kind, Utc::now().date_naive())
    }

    fn charge_on(&self, kind: JobKind, today: NaiveDate) -> Result<()> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if counters.day != today {
            counters.day = today;
            counters.load = 0;
            counters.query = 0;
        }
        let (used, ceiling) = match kind {
            JobKind::Load => (&mut counters.load, self.max_load),
            JobKind::Query => (&mut counters.query, self.max_query),
        };
        if *used >= ceiling {
            return Err(Error::DailyJobBudgetExceeded {
                kind: kind.as_str(),
                ceiling,
            });
        }
        *used += 1;
        Ok(())
    }

    /// `(load, query)` jobs used today.
    pub fn used(&self) -> (u64, u64) {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (counters.load, counters.query)
    }
}
