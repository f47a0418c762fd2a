//! End-to-end self-test against the simulated device.
//!
//! Drives every repository operation once, in the order a real deployment
//! would, and reports per step whether it passed and how many kernel
//! invocations it issued.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::OffloadConfig;
use crate::handles::{FeatureRecord, QueryTable, RepoRange, SearchOutputs, SearchRequest, SearchResult};
use crate::ops::FvRepository;
use crate::protocol::{
    SearchMode, QUERY_TABLE_ENTRY_LEN, SHORT_FEATURE_LEN, TOP_1N_DEFAULT, TOP_NM_DEFAULT,
};
use crate::runtime::sim::{SimRuntime, SimStats};
use crate::runtime::{ContextHandle, DeviceRuntime, RunMode};
use crate::staging::{StagingKey, StagingRegistry};

/// Repository capacity used by the self-test.
const SELFTEST_CAPACITY: u64 = 1_000_000;
/// `topK` used by the self-test searches.
const SELFTEST_TOP_K: u32 = 10;

/// Knobs for one self-test run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SelfTestOptions {
    /// Features per added record.
    pub features: u32,
    /// Queries per search.
    pub queries: u32,
}

impl Default for SelfTestOptions {
    fn default() -> Self {
        Self {
            features: 1000,
            queries: 12,
        }
    }
}

/// Outcome of one self-test step.
#[derive(Debug, Serialize, Clone)]
pub struct StepResult {
    pub step: String,
    pub status: TestStatus,
    /// Kernel launches issued by the step.
    pub invocations: u64,
    pub details: String,
    pub remediation: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
}

impl TestStatus {
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SelfTestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub run_mode: RunMode,
    pub options: SelfTestOptions,
    pub results: Vec<StepResult>,
    pub device: SimStats,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.status == TestStatus::Pass)
    }
}

/// Run the self-test on a blocking thread.
pub async fn run(config: OffloadConfig, options: SelfTestOptions) -> Result<SelfTestReport> {
    let report = tokio::task::spawn_blocking(move || run_blocking(&config, options)).await?;
    Ok(report)
}

/// Run the self-test on the current thread.
pub fn run_blocking(config: &OffloadConfig, options: SelfTestOptions) -> SelfTestReport {
    let started_at = Utc::now();
    let run_mode = config.simulator.run_mode;
    info!(?run_mode, features = options.features, queries = options.queries, "self-test start");

    let sim = Arc::new(SimRuntime::with_kernels(config.kernels.clone(), run_mode));
    let runtime: Arc<dyn DeviceRuntime> = sim.clone();
    let repo = FvRepository::with_config(Arc::clone(&runtime), config);
    let mut steps = Steps {
        sim: &sim,
        results: Vec::new(),
    };

    steps.run("Init", || {
        let params = repo.init_with(SELFTEST_CAPACITY, TOP_1N_DEFAULT, TOP_NM_DEFAULT)?;
        Ok(format!("capacity {}", params.capacity()))
    });

    for (mode, id) in [(SearchMode::OneToN, 1), (SearchMode::NToM, 2)] {
        steps.run(&format!("RepoAdd {mode}"), || {
            let mut record = random_record(&runtime, id, options.features)?;
            repo.repo_add(mode, &mut record)?;
            Ok(format!(
                "{} features into ({id}, {id}), {} stored",
                options.features,
                sim.repo_count(id, id)
            ))
        });
    }

    for mode in [SearchMode::OneToN, SearchMode::NToM] {
        steps.run(&format!("Search {mode}"), || {
            search_once(&repo, &runtime, mode, options.queries)
        });
    }

    steps.run("Modify", || {
        let mut record = random_record(&runtime, 1, 1)?;
        repo.modify(&mut record)?;
        Ok(format!("{} stored in (1, 1)", sim.repo_count(1, 1)))
    });

    steps.run("Delete", || {
        let mut record = random_record(&runtime, 1, 1)?;
        repo.delete(&mut record)?;
        Ok(format!("{} stored in (1, 1)", sim.repo_count(1, 1)))
    });

    steps.run("RepoDel", || {
        let mut range = RepoRange::create(&runtime, 2, 2, 2, 2)?;
        repo.repo_del(SearchMode::NToM, &mut range)?;
        Ok(format!("{} stored in total", sim.repo_total()))
    });

    steps.run("Staging", || {
        let registry = StagingRegistry::global();
        // Fresh context id so concurrent runs never share an entry.
        let key = StagingKey::resolve(ContextHandle(rand::random()), None);
        let allocator = registry.get_or_create(key, &runtime);
        allocator.workspace(4096)?;
        allocator.workspace(16_384)?;
        let parked = allocator.pending_count();
        allocator.release_pending();
        drop(allocator);
        registry.remove(key);
        Ok(format!("grew to 16384 bytes, {parked} buffer parked"))
    });

    steps.run("Release", || {
        repo.release()?;
        Ok(format!("{} stored after release", sim.repo_total()))
    });

    let device = sim.stats();
    let leak_status = if device.live_allocations == 0 {
        TestStatus::Pass
    } else {
        TestStatus::Fail
    };
    steps.results.push(StepResult {
        step: "Device memory".to_string(),
        status: leak_status,
        invocations: 0,
        details: format!(
            "{} allocations, {} frees, {} live",
            device.mallocs, device.frees, device.live_allocations
        ),
        remediation: (leak_status == TestStatus::Fail)
            .then(|| "A handle or staging buffer was not released.".to_string()),
    });

    let results = steps.results;
    info!(steps = results.len(), "self-test complete");
    SelfTestReport {
        started_at,
        finished_at: Utc::now(),
        run_mode,
        options,
        results,
        device,
    }
}

struct Steps<'a> {
    sim: &'a SimRuntime,
    results: Vec<StepResult>,
}

impl Steps<'_> {
    fn run(&mut self, name: &str, f: impl FnOnce() -> crate::error::Result<String>) {
        let before = self.sim.stats().launches;
        let outcome = f();
        let invocations = self.sim.stats().launches - before;
        let result = match outcome {
            Ok(details) => StepResult {
                step: name.to_string(),
                status: TestStatus::Pass,
                invocations,
                details,
                remediation: None,
            },
            Err(e) => {
                warn!(step = name, error = %e, "self-test step failed");
                StepResult {
                    step: name.to_string(),
                    status: TestStatus::Fail,
                    invocations,
                    details: e.to_string(),
                    remediation: e
                        .is_invalid_param()
                        .then(|| "Check --features / --queries against the protocol limits.".to_string()),
                }
            }
        };
        self.results.push(result);
    }
}

fn random_record(
    runtime: &Arc<dyn DeviceRuntime>,
    id: u32,
    features: u32,
) -> crate::error::Result<FeatureRecord> {
    let mut data = vec![0u8; features as usize * SHORT_FEATURE_LEN as usize];
    rand::thread_rng().fill(&mut data[..]);
    FeatureRecord::create(runtime, id, id, 0, SHORT_FEATURE_LEN, features, data)
}

fn search_once(
    repo: &FvRepository,
    runtime: &Arc<dyn DeviceRuntime>,
    mode: SearchMode,
    queries: u32,
) -> crate::error::Result<String> {
    let mut data = vec![0u8; queries as usize * QUERY_TABLE_ENTRY_LEN as usize];
    rand::thread_rng().fill(&mut data[..]);
    let table = QueryTable::new(queries, QUERY_TABLE_ENTRY_LEN, data)?;
    let range = RepoRange::create(runtime, 0, 1023, 0, 1023)?;
    let request = SearchRequest::create(runtime, table, &range, SELFTEST_TOP_K)?;

    let slots = queries as usize * SELFTEST_TOP_K as usize;
    let mut result_num = vec![0u32; queries as usize];
    let (mut id0, mut id1, mut offset) = (vec![0u32; slots], vec![0u32; slots], vec![0u32; slots]);
    let mut distance = vec![0f32; slots];
    let outputs = SearchOutputs {
        result_num: &mut result_num,
        id0: &mut id0,
        id1: &mut id1,
        offset: &mut offset,
        distance: &mut distance,
    };
    let mut result = SearchResult::create(runtime, queries, outputs, (slots * 4) as u32)?;
    repo.search(mode, &request, &mut result)?;
    Ok(format!("{queries} queries, topK {SELFTEST_TOP_K}, device result {}", result.device_result()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_passes() {
        let report = run_blocking(&OffloadConfig::default(), SelfTestOptions::default());
        for r in &report.results {
            assert_eq!(r.status, TestStatus::Pass, "{}: {}", r.step, r.details);
        }
        assert!(report.passed());
        assert_eq!(report.device.live_allocations, 0);

        let invocations = |name: &str| {
            report
                .results
                .iter()
                .find(|r| r.step == name)
                .map(|r| r.invocations)
                .unwrap()
        };
        assert_eq!(invocations("Init"), 1);
        assert_eq!(invocations("RepoAdd 1:N"), 1);
        assert_eq!(invocations("Search N:M"), 2);
        assert_eq!(invocations("Release"), 1);
    }

    #[test]
    fn test_invalid_options_fail_steps() {
        let options = SelfTestOptions {
            features: 0,
            queries: 2,
        };
        let report = run_blocking(&OffloadConfig::default(), options);
        assert!(!report.passed());
        let bulk = report.results.iter().find(|r| r.step == "RepoAdd N:M").unwrap();
        assert_eq!(bulk.status, TestStatus::Fail);
        assert_eq!(bulk.invocations, 0);
        assert!(bulk.remediation.is_some());
    }

    #[tokio::test]
    async fn test_async_entry_point() {
        let options = SelfTestOptions {
            features: 4,
            queries: 1,
        };
        let report = run(OffloadConfig::default(), options).await.unwrap();
        assert!(report.passed());
        assert!(report.finished_at >= report.started_at);
    }
}
