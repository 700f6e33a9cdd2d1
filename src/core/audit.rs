use serde::Serialize;

use super::types::HoldingSnapshot;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditCategory {
    Income,
    Rmd,
    RothConversion,
    Growth,
    Rebalance,
    Invest,
    Expense,
    DiscretionaryExpense,
    Tax,
    Shortfall,
}

impl AuditCategory {
    pub fn label(self) -> &'static str {
        match self {
            AuditCategory::Income => "income",
            AuditCategory::Rmd => "rmd",
            AuditCategory::RothConversion => "roth-conversion",
            AuditCategory::Growth => "growth",
            AuditCategory::Rebalance => "rebalance",
            AuditCategory::Invest => "invest",
            AuditCategory::Expense => "expense",
            AuditCategory::DiscretionaryExpense => "discretionary-expense",
            AuditCategory::Tax => "tax",
            AuditCategory::Shortfall => "shortfall",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub year: i32,
    pub category: AuditCategory,
    pub description: String,
    pub amount: f64,
}

/// Append-only record of what a trial did. The engine never reads it back.
pub trait AuditSink: Send {
    fn record(&mut self, entry: AuditEntry);
    fn snapshot(&mut self, year: i32, holdings: &[HoldingSnapshot]);

    fn enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&mut self, _entry: AuditEntry) {}

    fn snapshot(&mut self, _year: i32, _holdings: &[HoldingSnapshot]) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Writes entries through the `log` facade at trace level.
#[derive(Debug, Clone)]
pub struct LogAudit {
    label: String,
}

impl LogAudit {
    pub fn new(combination: usize, trial: u32) -> Self {
        Self {
            label: format!("combination {combination} trial {trial}"),
        }
    }
}

impl AuditSink for LogAudit {
    fn record(&mut self, entry: AuditEntry) {
        log::trace!(
            target: "fireplan::audit",
            "{} | {} | {:<21} | {:>14.2} | {}",
            self.label,
            entry.year,
            entry.category.label(),
            entry.amount,
            entry.description
        );
    }

    fn snapshot(&mut self, year: i32, holdings: &[HoldingSnapshot]) {
        for holding in holdings {
            log::trace!(
                target: "fireplan::audit",
                "{} | {} | holding {} ({}, {}) = {:.2}",
                self.label,
                year,
                holding.id,
                holding.investment_type,
                holding.tax_status.label(),
                holding.value
            );
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAudit {
    pub entries: Vec<AuditEntry>,
    pub snapshots: Vec<(i32, Vec<HoldingSnapshot>)>,
}

impl AuditSink for MemoryAudit {
    fn record(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    fn snapshot(&mut self, year: i32, holdings: &[HoldingSnapshot]) {
        self.snapshots.push((year, holdings.to_vec()));
    }
}
