pub mod aggregator;
pub mod anomaly;
pub mod authorization;
pub mod lineage;
pub mod services;
pub mod tree;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::AgentConfig;
use crate::models::{
    AnomalyFinding, AuthorizationFinding, CollectionStats, LineageMatch, ProcessRecord, ServiceAlert,
    ServiceRecord,
};

pub use aggregator::DetectorFindings;
use anomaly::ScoringContext;
use tree::{ProcessIndex, ProcessTree};

/// One immutable point-in-time view shared read-only by every detector.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub processes: Vec<ProcessRecord>,
    pub services: Vec<ServiceRecord>,
    pub collection: CollectionStats,
}

fn detect_lineage(
    snapshot: &Snapshot,
    tree: &ProcessTree,
    config: &AgentConfig,
) -> Vec<LineageMatch> {
    let index = ProcessIndex::new(&snapshot.processes);
    config.lineage.find_suspicious_chains(tree, &index)
}

fn detect_unauthorized(snapshot: &Snapshot, config: &AgentConfig) -> Vec<AuthorizationFinding> {
    config.authorization.evaluate(&snapshot.processes)
}

fn detect_anomalies(
    snapshot: &Snapshot,
    tree: &ProcessTree,
    config: &AgentConfig,
) -> Vec<AnomalyFinding> {
    let index = ProcessIndex::new(&snapshot.processes);
    let context = ScoringContext {
        tree,
        index: &index,
        authorization: &config.authorization,
        lineage: &config.lineage,
    };
    config.scorer.detect(&snapshot.processes, &context)
}

fn detect_service_paths(snapshot: &Snapshot, config: &AgentConfig) -> Vec<ServiceAlert> {
    config.service_auditor.audit(&snapshot.services)
}

/// Runs the detectors as independent blocking tasks over the same snapshot and
/// waits for all of them before returning.
pub async fn detect_concurrently(
    snapshot: Arc<Snapshot>,
    config: Arc<AgentConfig>,
) -> Result<DetectorFindings> {
    let tree = Arc::new(ProcessTree::build(&snapshot.processes));
    debug!(
        component = "tree",
        processes = tree.len(),
        unlinked = tree.unknown_parent().len(),
        "process tree built"
    );

    let lineage = {
        let (snapshot, tree, config) = (snapshot.clone(), tree.clone(), config.clone());
        tokio::task::spawn_blocking(move || detect_lineage(&snapshot, &tree, &config))
    };
    let authorization = {
        let (snapshot, config) = (snapshot.clone(), config.clone());
        tokio::task::spawn_blocking(move || detect_unauthorized(&snapshot, &config))
    };
    let anomalies = {
        let (snapshot, tree, config) = (snapshot.clone(), tree.clone(), config.clone());
        tokio::task::spawn_blocking(move || detect_anomalies(&snapshot, &tree, &config))
    };
    let services = {
        let (snapshot, config) = (snapshot.clone(), config.clone());
        tokio::task::spawn_blocking(move || detect_service_paths(&snapshot, &config))
    };

    let (lineage, authorization, anomalies, services) =
        tokio::join!(lineage, authorization, anomalies, services);

    Ok(DetectorFindings {
        lineage: lineage.context("lineage detector task failed")?,
        authorization: authorization.context("authorization detector task failed")?,
        anomalies: anomalies.context("anomaly detector task failed")?,
        services: services.context("service path detector task failed")?,
    })
}
