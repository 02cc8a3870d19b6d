//! Rule synchronizer: reconcile the set of active markets with the filter
//! rules registered at the post source.

use crate::adapters::{PostSource, PostgresStore, RuleSpec, SourceRule};
use crate::domain::{FilterRule, Market};
use crate::error::Result;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

/// Planned reconciliation: deletes run before adds so rule-quota slots free up
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// External rule ids to delete
    pub deletes: Vec<String>,
    /// Rules to register, tagged with their market id
    pub adds: Vec<RuleSpec>,
}

/// Outcome of a sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub deleted: u32,
    pub added: u32,
    pub errors: Vec<String>,
}

/// Diff desired rules (one per active market with templates) against the
/// registered set, matching by tag.
pub fn plan_sync(active_markets: &[Market], registered: &[SourceRule]) -> SyncPlan {
    let desired_tags: HashSet<&str> = active_markets
        .iter()
        .filter(|m| !m.filter_templates.is_empty())
        .map(|m| m.id.as_str())
        .collect();

    let registered_tags: HashSet<&str> = registered
        .iter()
        .filter_map(|r| r.tag.as_deref())
        .collect();

    // Untagged rules don't belong to us either
    let deletes = registered
        .iter()
        .filter(|r| match r.tag.as_deref() {
            Some(tag) => !desired_tags.contains(tag),
            None => true,
        })
        .map(|r| r.id.clone())
        .collect();

    let adds = active_markets
        .iter()
        .filter(|m| !m.filter_templates.is_empty() && !registered_tags.contains(m.id.as_str()))
        .map(|m| RuleSpec {
            value: m.filter_templates[0].clone(),
            tag: m.id.clone(),
        })
        .collect();

    SyncPlan { deletes, adds }
}

/// Reconciles desired vs registered filter rules
pub struct RuleSynchronizer<'a> {
    store: &'a PostgresStore,
    source: &'a dyn PostSource,
}

impl<'a> RuleSynchronizer<'a> {
    pub fn new(store: &'a PostgresStore, source: &'a dyn PostSource) -> Self {
        Self { store, source }
    }

    /// One reconciliation pass. Per-market failures are recorded and skipped;
    /// unregistered rules are retried on the next sync.
    pub async fn sync_rules(&self) -> Result<SyncReport> {
        let markets = self.store.list_active_markets().await?;
        let registered = self.source.get_rules().await?;
        let plan = plan_sync(&markets, &registered);

        let mut report = SyncReport::default();

        // Deletes first so slot quotas free up before adds
        if !plan.deletes.is_empty() {
            match self.source.delete_rules(&plan.deletes).await {
                Ok(()) => {
                    report.deleted = plan.deletes.len() as u32;
                    for rule in registered
                        .iter()
                        .filter(|r| plan.deletes.contains(&r.id))
                    {
                        if let Some(tag) = rule.tag.as_deref() {
                            if let Err(e) = self.store.delete_rules_for_market(tag).await {
                                warn!("failed to drop local rule bookkeeping for {}: {}", tag, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("rule delete failed: {}", e);
                    report.errors.push(format!("delete: {}", e));
                }
            }
        }

        for spec in &plan.adds {
            match self.source.add_rules(std::slice::from_ref(spec)).await {
                Ok(issued) => {
                    for rule in issued {
                        let bookkeeping = FilterRule {
                            market_id: spec.tag.clone(),
                            external_rule_id: rule.id,
                            rule_value: rule.value,
                            rule_tag: spec.tag.clone(),
                            created_at: Utc::now(),
                        };
                        if let Err(e) = self.store.insert_rule(&bookkeeping).await {
                            warn!("failed to record rule for market {}: {}", spec.tag, e);
                            report.errors.push(format!("record {}: {}", spec.tag, e));
                            continue;
                        }
                        report.added += 1;
                    }
                }
                Err(e) => {
                    warn!("rule add failed for market {}: {}", spec.tag, e);
                    report.errors.push(format!("add {}: {}", spec.tag, e));
                }
            }
        }

        info!(
            "rule sync: deleted={} added={} errors={}",
            report.deleted,
            report.added,
            report.errors.len()
        );
        Ok(report)
    }
}
