use super::elide::IndexMirror;
use super::source::RowSource;
use super::BuildPlan;
use crate::core::partition::Split;
use crate::index::compare::RowComparator;
use crate::index::mutation::{MutationGenerator, ProjectedVersion};
use crate::stats::{Counter, Phase, SplitCounters};
use crate::storage::{
    with_retries, Mutation, ReadMode, Row, StorageClient, StorageError, TimeRange,
};
use crate::verify::{OutputRecord, OutputRepository, ResultRecord, ResultRepository};
use roaring::RoaringBitmap;

/// 一页数据行及其投影（投影失败的行为 None，计入 FAILED_RECORDS）
struct Page {
    rows: Vec<Row>,
    versions: Vec<Option<Vec<ProjectedVersion>>>,
}

/// 单个 split 的处理流程（两种 Mapper 共用）
pub struct SplitProcessor<'c> {
    client: &'c dyn StorageClient,
    plan: &'c BuildPlan,
    split: &'c Split,
    generator: MutationGenerator<'c>,
    output: OutputRepository<'c>,
    results: ResultRepository<'c>,
}

impl<'c> SplitProcessor<'c> {
    pub fn new(client: &'c dyn StorageClient, plan: &'c BuildPlan, split: &'c Split) -> Self {
        Self {
            client,
            plan,
            split,
            generator: MutationGenerator::new(&plan.data_table, &plan.index, &split.region.range.start),
            output: OutputRepository::new(client, plan.client_retries),
            results: ResultRepository::new(client, plan.client_retries),
        }
    }

    fn index_table(&self) -> &str {
        &self.plan.index.physical_name
    }

    pub fn run(&self, source: &mut dyn RowSource) -> Result<SplitCounters, StorageError> {
        let plan = self.plan;
        if plan.reuse_verified_splits && plan.verify.verifies() {
            if let Some(done) = self.results.result_for(
                plan.run_ts,
                &plan.index.full_name,
                &self.split.region.name,
                &self.split.range.start,
                &self.split.range.stop,
            )? {
                tracing::info!(
                    "Split {} already verified in run {}, reusing stored result",
                    self.split.id,
                    plan.run_ts
                );
                return Ok(done.counters);
            }
        }

        let mut counters = SplitCounters::new();
        let mut pages = 0usize;
        loop {
            let mut rows = source.next_page(plan.page_size_rows)?;
            if rows.is_empty() {
                break;
            }
            if plan.is_incremental() {
                let keys: Vec<Vec<u8>> = rows.iter().map(|r| r.key.clone()).collect();
                let full = source.read_full(&keys, TimeRange::as_of(plan.as_of()))?;
                rows = rows
                    .into_iter()
                    .zip(full)
                    .map(|(scanned, full)| full.unwrap_or(scanned))
                    .collect();
            }
            self.process_page(rows, &mut counters)?;
            pages += 1;
        }
        tracing::debug!(
            "Split {} ({}) done: {} page(s), {} row(s)",
            self.split.id,
            self.split.region.name,
            pages,
            counters.get(Counter::ScannedDataRowCount)
        );

        if plan.verify.verifies() {
            self.results.ensure_table()?;
            self.results.append(&ResultRecord {
                run_ts: plan.run_ts,
                index_table: plan.index.full_name.clone(),
                region_name: self.split.region.name.clone(),
                scan_start: self.split.range.start.clone(),
                scan_stop: self.split.range.stop.clone(),
                scan_max_ts: plan.as_of(),
                counters,
            })?;
        }
        Ok(counters)
    }

    fn process_page(&self, rows: Vec<Row>, counters: &mut SplitCounters) -> Result<(), StorageError> {
        let verify = self.plan.verify;
        let mut versions = Vec::with_capacity(rows.len());
        for row in &rows {
            counters.incr(Counter::InputRecords);
            counters.incr(Counter::ScannedDataRowCount);
            match self.generator.versions(row) {
                Ok(v) => versions.push(Some(v)),
                Err(e) => {
                    tracing::warn!("Skipping data row {:?}: {}", row.key, e);
                    counters.incr(Counter::FailedRecords);
                    versions.push(None);
                }
            }
        }
        let page = Page { rows, versions };

        let mut rebuild = RoaringBitmap::new();
        if verify.verifies_before() {
            rebuild = self.verify_page(Phase::Before, &page, counters)?;
        }
        if verify.mutates() {
            if verify.rebuild_all() {
                rebuild = page
                    .versions
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_some())
                    .map(|(i, _)| i as u32)
                    .collect();
            }
            self.rebuild(&page, &rebuild, counters)?;
        }
        if verify.verifies_after() {
            self.verify_page(Phase::After, &page, counters)?;
        }
        Ok(())
    }

    /// 校验一页；返回需要重建的行序号
    fn verify_page(
        &self,
        phase: Phase,
        page: &Page,
        counters: &mut SplitCounters,
    ) -> Result<RoaringBitmap, StorageError> {
        let cmp = RowComparator::new(&self.generator, self.plan.compare);

        let mut probes: Vec<Vec<u8>> = Vec::new();
        let mut probe_of: Vec<Option<usize>> = vec![None; page.rows.len()];
        for (i, versions) in page.versions.iter().enumerate() {
            if let Some(key) = versions.as_deref().and_then(|v| cmp.probe_key(v)) {
                probe_of[i] = Some(probes.len());
                probes.push(key);
            }
        }
        let actual = if probes.is_empty() {
            Vec::new()
        } else {
            with_retries(self.plan.client_retries, "index get", || {
                self.client.get_rows(
                    self.index_table(),
                    &probes,
                    TimeRange::as_of(self.plan.as_of()),
                    ReadMode::Latest,
                )
            })?
        };

        let mut failed = RoaringBitmap::new();
        let mut records = Vec::new();
        for (i, (row, versions)) in page.rows.iter().zip(&page.versions).enumerate() {
            let Some(versions) = versions else {
                continue;
            };
            let actual_row = probe_of[i].and_then(|p| actual.get(p)).and_then(Option::as_ref);
            let verdict = cmp.compare(versions, actual_row);
            counters.record_outcome(phase, verdict.outcome);
            if !verdict.outcome.is_failure() {
                continue;
            }
            failed.insert(i as u32);
            if let Some(error_type) = verdict.error {
                if self.plan.disable_logging.logs(phase) {
                    records.push(OutputRecord {
                        run_ts: self.plan.run_ts,
                        data_table: self.plan.data_table.full_name.clone(),
                        index_table: self.plan.index.full_name.clone(),
                        data_row_key: row.key.clone(),
                        index_row_key: verdict.index_key,
                        data_ts: verdict.data_ts,
                        error_type,
                        message: verdict.message,
                        phase,
                    });
                }
            }
        }

        if !records.is_empty() {
            self.output.ensure_table()?;
            self.output.append(&records)?;
        }
        tracing::debug!(
            "Split {} {} verification: {} row(s), {} failed",
            self.split.id,
            phase.name(),
            page.rows.len(),
            failed.len()
        );
        Ok(failed)
    }

    /// 重建标记的行：生成 → 剔除已生效变更 → 分批写入
    fn rebuild(
        &self,
        page: &Page,
        marked: &RoaringBitmap,
        counters: &mut SplitCounters,
    ) -> Result<(), StorageError> {
        if marked.is_empty() {
            return Ok(());
        }

        let mut generated: Vec<(Vec<Mutation>, usize)> = Vec::new();
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for i in marked.iter() {
            let i = i as usize;
            let Some(versions) = page.versions[i].as_ref() else {
                continue;
            };
            match self.generator.generate(&page.rows[i]) {
                Ok(muts) => {
                    keys.extend(muts.iter().map(|m| m.row().to_vec()));
                    if let Some(img) = versions.last().and_then(|v| v.image.as_ref()) {
                        keys.push(img.key.clone());
                    }
                    generated.push((muts, i));
                }
                Err(e) => tracing::warn!("Cannot rebuild row {:?}: {}", page.rows[i].key, e),
            }
        }
        keys.sort();
        keys.dedup();

        let existing = if keys.is_empty() {
            Vec::new()
        } else {
            with_retries(self.plan.client_retries, "index get", || {
                self.client.get_rows(
                    self.index_table(),
                    &keys,
                    TimeRange::as_of(self.plan.as_of()),
                    ReadMode::Raw,
                )
            })?
        };
        let mut mirror = IndexMirror::new(
            self.index_table(),
            self.plan.as_of(),
            existing.into_iter().flatten(),
        );

        let mut batch: Vec<Mutation> = Vec::new();
        for (muts, i) in generated {
            let expected = page.versions[i]
                .as_ref()
                .and_then(|v| v.last())
                .and_then(|v| v.image.as_ref());
            let effective = mirror.effective(muts, expected);
            if effective.is_empty() {
                continue;
            }
            counters.incr(Counter::RebuiltIndexRowCount);
            batch.extend(effective);
            if batch.len() >= self.plan.batch_size.max(1) {
                self.flush(&mut batch)?;
            }
        }
        self.flush(&mut batch)
    }

    fn flush(&self, batch: &mut Vec<Mutation>) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        with_retries(self.plan.client_retries, "index write", || {
            self.client.batch_mutate(self.index_table(), &batch[..])
        })?;
        batch.clear();
        Ok(())
    }
}
