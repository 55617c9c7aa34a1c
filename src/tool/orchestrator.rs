use super::config::IndexToolConfig;
use super::provision::{ensure_index_table, IndexTableProvisioner};
use super::{IndexToolError, STATUS_JOB_FAILED, STATUS_SETUP, STATUS_SUCCESS};
use crate::core::adaptive::{AdaptiveScheduler, Task};
use crate::core::job::{JobHandle, JobRunner, JobState};
use crate::core::partition::{plan_splits, Split, SplitSource};
use crate::core::rdd::MapperRDD;
use crate::index::compare::CompareContext;
use crate::index::keys::tenant_ranges;
use crate::index::schema::{Catalog, IndexState};
use crate::mapper::{BuildPlan, Mapper, MapperKind, VerifyType};
use crate::stats::{CounterReport, JobCounters};
use crate::storage::snapshot::restore_snapshot;
use crate::storage::{now_ms, StorageClient, StorageError, TimeRange};
use crate::verify::ResultRepository;
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;

/// 提交前准备好的作业
struct PreparedJob {
    plan: Arc<BuildPlan>,
    kind: MapperKind,
    splits: Vec<Split>,
    output_path: PathBuf,
    restore_dir: Option<PathBuf>,
    parallelism: usize,
}

/// 作业结束后的收尾所需状态
struct Finalizer {
    handle: Arc<JobHandle>,
    catalog: Arc<RwLock<Catalog>>,
    plan: Arc<BuildPlan>,
    kind: MapperKind,
    tenant: Option<String>,
    output_path: PathBuf,
    restore_dir: Option<PathBuf>,
    report: Arc<Mutex<Option<CounterReport>>>,
}

/// 作业编排：一次 `run` 对应一次索引构建/校验
pub struct IndexTool {
    client: Arc<dyn StorageClient>,
    catalog: Arc<RwLock<Catalog>>,
    job: Mutex<Option<Arc<JobHandle>>>,
    finalizer: Mutex<Option<tokio::task::JoinHandle<i32>>>,
    report: Arc<Mutex<Option<CounterReport>>>,
}

impl IndexTool {
    pub fn new(client: Arc<dyn StorageClient>, catalog: Arc<RwLock<Catalog>>) -> Self {
        Self {
            client,
            catalog,
            job: Mutex::new(None),
            finalizer: Mutex::new(None),
            report: Arc::new(Mutex::new(None)),
        }
    }

    /// 最近一次提交的作业
    pub fn job(&self) -> Option<Arc<JobHandle>> {
        self.job.lock().clone()
    }

    /// 最近一次完成的作业报告
    pub fn report(&self) -> Option<CounterReport> {
        self.report.lock().clone()
    }

    /// 执行一次运行，返回进程状态码
    ///
    /// 前台模式等待作业结束；后台模式提交后立即返回 0，收尾由 [`IndexTool::wait`] 取回
    pub async fn run(&self, config: &IndexToolConfig) -> i32 {
        let prepared = {
            let client = self.client.clone();
            let catalog = self.catalog.clone();
            let config = config.clone();
            tokio::task::spawn_blocking(move || prepare(client.as_ref(), &catalog, &config)).await
        };
        let prepared = match prepared {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                tracing::error!("Index tool setup failed: {}", e);
                return e.status();
            }
            Err(e) => {
                tracing::error!("Index tool setup aborted: {}", e);
                return STATUS_SETUP;
            }
        };

        let plan = prepared.plan.clone();
        let job_id = format!("{}@{}", plan.index.full_name, plan.run_ts);
        let (tx, rx) = crossbeam::channel::unbounded();
        let mapper = Mapper::new(prepared.kind, self.client.clone(), plan.clone());
        let rdd = MapperRDD::new(prepared.splits, mapper, config.max_split_attempts).with_events(tx);
        let handle = match JobRunner::new(prepared.parallelism).submit(
            job_id,
            rdd,
            Arc::new(JobCounters::new()),
            rx,
        ) {
            Ok(h) => Arc::new(h),
            Err(e) => {
                tracing::error!("Failed to submit index job: {:#}", e);
                return STATUS_JOB_FAILED;
            }
        };
        *self.job.lock() = Some(handle.clone());

        let finalizer = Finalizer {
            handle,
            catalog: self.catalog.clone(),
            plan,
            kind: prepared.kind,
            tenant: config.tenant_id.clone(),
            output_path: prepared.output_path,
            restore_dir: prepared.restore_dir,
            report: self.report.clone(),
        };
        if config.run_foreground {
            finalizer.finish().await
        } else {
            tracing::info!("Index job running in background");
            *self.finalizer.lock() = Some(tokio::spawn(finalizer.finish()));
            STATUS_SUCCESS
        }
    }

    /// 等待后台作业收尾；没有后台作业时返回 None
    pub async fn wait(&self) -> Option<i32> {
        let task = self.finalizer.lock().take();
        match task {
            Some(task) => match task.await {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::error!("Index job finalizer aborted: {}", e);
                    Some(STATUS_JOB_FAILED)
                }
            },
            None => None,
        }
    }
}

impl Finalizer {
    async fn finish(self) -> i32 {
        let state = self.handle.wait_for_completion().await;
        let status = match &state {
            JobState::Succeeded => STATUS_SUCCESS,
            JobState::Failed(msg) => {
                tracing::error!("Index job {} failed: {}", self.handle.id(), msg);
                STATUS_JOB_FAILED
            }
            JobState::Running { .. } => STATUS_JOB_FAILED,
        };

        if status == STATUS_SUCCESS && self.plan.verify.mutates() {
            let updated = self.catalog.write().set_index_state(
                &self.plan.index.full_name,
                self.tenant.as_deref(),
                IndexState::Active,
            );
            if updated {
                tracing::info!("Index {} is now ACTIVE", self.plan.index.full_name);
            }
        }

        let report = CounterReport {
            data_table: self.plan.data_table.full_name.clone(),
            index_table: self.plan.index.full_name.clone(),
            run_ts: self.plan.run_ts,
            mapper: self.kind.name().to_string(),
            verify: self.plan.verify.value().to_string(),
            status,
            counters: self.handle.counters(),
        };
        let summary = self.output_path.join("job-summary.json");
        match serde_json::to_vec_pretty(&report.to_json()) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&summary, bytes).await {
                    tracing::warn!("Failed to write {:?}: {}", summary, e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode job summary: {}", e),
        }
        if let Some(dir) = &self.restore_dir {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                tracing::warn!("Failed to clean restored snapshot {:?}: {}", dir, e);
            }
        }

        *self.report.lock() = Some(report);
        status
    }
}

/// 校验、解析、预分区、切分（阻塞，运行在 spawn_blocking 中）
fn prepare(
    client: &dyn StorageClient,
    catalog: &RwLock<Catalog>,
    config: &IndexToolConfig,
) -> Result<PreparedJob, IndexToolError> {
    config.validate()?;
    let tenant = config.tenant_id.as_deref();

    let (table, index) = {
        let catalog = catalog.read();
        let table = catalog.resolve_table(&config.data_table_full(), tenant)?;
        let index = catalog.resolve_index(&config.index_full(), tenant)?;
        (table, index)
    };

    // 租户作业只能处理该租户自己的索引
    let tenant_owned = tenant.map_or(true, |t| index.def.tenant_id.as_deref() == Some(t));
    if !tenant_owned || index.def.data_table != table.full_name {
        return Err(IndexToolError::TenantMismatch {
            index: index.full_name,
            table: table.full_name,
            tenant: config.tenant_id.clone(),
        });
    }
    if index.is_local() {
        if let Some(provider) = table.transaction_provider {
            if !provider.supports_local_index() {
                return Err(IndexToolError::Unsupported(format!(
                    "local index {} on a {:?} transactional table",
                    index.full_name, provider
                )));
            }
        }
    }

    let run_ts = config.retry_verify.unwrap_or_else(now_ms);
    let as_of = config.end_time.unwrap_or(run_ts);
    let start = config.start_time.unwrap_or(0);
    if start >= as_of {
        return Err(IndexToolError::InvalidOption(format!(
            "start time {} must be before read time {}",
            start, as_of
        )));
    }
    if let Some(ts) = config.retry_verify {
        if !ResultRepository::new(client, config.client_retries).run_exists(ts, &index.full_name)? {
            return Err(IndexToolError::UnknownRun {
                run_ts: ts,
                index: index.full_name,
            });
        }
    }

    let admin = client.admin();
    if !admin.table_exists(&table.physical_name) {
        return Err(StorageError::TableNotFound(table.physical_name).into());
    }
    ensure_index_table(admin, &table, &index)?;

    let scopes = match (table.multi_tenant, tenant) {
        (true, Some(t)) => tenant_ranges(&table, t),
        _ => Vec::new(),
    };
    if config.sample_rate_percent.is_some() || config.split_above_regions.is_some() {
        IndexTableProvisioner::new(client, &table, &index, as_of).provision(
            config.sample_rate_percent,
            config.split_above_regions,
            &scopes,
        )?;
    }

    let kind = MapperKind::select(index.is_local(), table.is_transactional(), config.snapshot);
    if config.direct && kind == MapperKind::ServerPushed {
        tracing::info!("Direct mode requested; table properties select the ServerPushed mapper");
    }

    let output_path = config.resolved_output_path(run_ts);
    std::fs::create_dir_all(&output_path)
        .with_context(|| format!("Failed to create output path {:?}", output_path))?;

    let (splits, restore_dir) = if config.snapshot {
        let name = format!("{}-{}", table.physical_name, run_ts);
        let snapshot = admin.create_snapshot(&table.physical_name, &name)?;
        let dir = output_path.join("restore").join(&name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create restore dir {:?}", dir))?;
        let restored = restore_snapshot(admin, &snapshot, &dir)?;
        let splits = plan_splits(
            restored
                .into_iter()
                .map(|(info, path)| (info, SplitSource::Snapshot(path))),
            &scopes,
        );
        (splits, Some(dir))
    } else {
        let regions = admin.regions(&table.physical_name)?;
        let splits = plan_splits(regions.into_iter().map(|r| (r, SplitSource::Live)), &scopes);
        (splits, None)
    };

    let parallelism = config.parallelism.unwrap_or_else(|| {
        let mut scheduler = AdaptiveScheduler::new();
        scheduler.adjust_parallelism();
        let task = match config.verify {
            VerifyType::Only => Task::VerifyOnly { splits: splits.len() },
            _ => Task::Rebuild { splits: splits.len() },
        };
        scheduler.select_strategy(&task).workers()
    });

    tracing::info!(
        "Building {} on {} (run {}, as of {}, verify {}, mapper {}, {} split(s))",
        index.full_name,
        table.full_name,
        run_ts,
        as_of,
        config.verify.value(),
        kind.name(),
        splits.len()
    );

    let compare = CompareContext {
        as_of,
        now: now_ms(),
        ttl_ms: table.ttl_ms,
        max_lookback_ms: config.max_lookback_ms,
    };
    let plan = BuildPlan {
        data_table: table,
        index,
        verify: config.verify,
        disable_logging: config.disable_logging,
        run_ts,
        time: TimeRange::new(start, as_of),
        compare,
        page_size_rows: config.page_size_rows,
        batch_size: config.batch_size,
        client_retries: config.client_retries,
        reuse_verified_splits: config.retry_verify.is_some(),
    };

    Ok(PreparedJob {
        plan: Arc::new(plan),
        kind,
        splits,
        output_path,
        restore_dir,
        parallelism,
    })
}
