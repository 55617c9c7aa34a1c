use super::IndexToolError;
use crate::index::schema::{ResolvedIndex, ResolvedTable};
use crate::index::MutationGenerator;
use crate::storage::{
    Admin, KeyRange, ReadMode, RegionInfo, Row, ScanRequest, StorageClient, StorageError,
    TimeRange, Timestamp,
};
use xxhash_rust::xxh3::xxh3_64;

/// 采样扫描的分页大小
const SAMPLE_PAGE_ROWS: usize = 4096;

/// 本地索引与数据表同布局：沿用数据表 region 边界
pub fn local_index_split_points(
    admin: &dyn Admin,
    data_physical: &str,
) -> Result<Vec<Vec<u8>>, StorageError> {
    Ok(admin
        .regions(data_physical)?
        .into_iter()
        .skip(1)
        .map(|r| r.range.start)
        .collect())
}

/// 索引物理表不存在时创建；返回是否新建
pub fn ensure_index_table(
    admin: &dyn Admin,
    table: &ResolvedTable,
    index: &ResolvedIndex,
) -> Result<bool, StorageError> {
    if admin.table_exists(&index.physical_name) {
        return Ok(false);
    }
    let points = if index.is_local() {
        local_index_split_points(admin, &table.physical_name)?
    } else {
        Vec::new()
    };
    match admin.create_table(&index.physical_name, &points) {
        Ok(()) => {
            tracing::info!(
                "Created index table {} ({} regions)",
                index.physical_name,
                points.len() + 1
            );
            Ok(true)
        }
        Err(StorageError::TableExists(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// 全局索引表预分区：让索引 region 与数据分布大致均衡
pub struct IndexTableProvisioner<'a> {
    client: &'a dyn StorageClient,
    table: &'a ResolvedTable,
    index: &'a ResolvedIndex,
    as_of: Timestamp,
}

impl<'a> IndexTableProvisioner<'a> {
    pub fn new(
        client: &'a dyn StorageClient,
        table: &'a ResolvedTable,
        index: &'a ResolvedIndex,
        as_of: Timestamp,
    ) -> Self {
        Self {
            client,
            table,
            index,
            as_of,
        }
    }

    /// 满足条件时删除并按 N-1 个切分点重建索引表；返回是否重建
    ///
    /// `scopes`：参与采样的数据键区间（空表示整表）
    pub fn provision(
        &self,
        sample_rate_percent: Option<u8>,
        split_above_regions: Option<usize>,
        scopes: &[KeyRange],
    ) -> Result<bool, IndexToolError> {
        let physical = &self.index.physical_name;
        if self.index.is_local() {
            tracing::debug!("Local index {} shares the data layout, not pre-splitting", physical);
            return Ok(false);
        }
        let admin = self.client.admin();
        let regions = admin.regions(&self.table.physical_name)?;
        let n = regions.len();
        let requested = sample_rate_percent.is_some()
            || split_above_regions.map_or(false, |limit| n > limit);
        if !requested || n < 2 {
            return Ok(false);
        }
        if !self.index_table_is_empty()? {
            tracing::warn!("Index table {} is not empty, skipping pre-split", physical);
            return Ok(false);
        }

        let points = match sample_rate_percent {
            Some(rate) => self.sampled_points(rate, n, scopes)?,
            None => self.region_points(&regions)?,
        };
        if points.is_empty() {
            tracing::warn!("No split points found for index table {}", physical);
            return Ok(false);
        }

        if admin.table_exists(physical) {
            admin.disable_table(physical)?;
            admin.delete_table(physical)?;
        }
        admin.create_table(physical, &points)?;
        tracing::info!(
            "Pre-split index table {} into {} regions (data table has {})",
            physical,
            points.len() + 1,
            n
        );
        Ok(true)
    }

    fn index_table_is_empty(&self) -> Result<bool, StorageError> {
        let physical = &self.index.physical_name;
        if !self.client.admin().table_exists(physical) {
            return Ok(true);
        }
        let request = ScanRequest::new(KeyRange::all(), TimeRange::all())
            .mode(ReadMode::Raw)
            .limit(1);
        Ok(self.client.scan(physical, &request)?.is_empty())
    }

    fn index_key(&self, generator: &MutationGenerator<'_>, row: &Row) -> Option<Vec<u8>> {
        match generator.latest(row) {
            Ok(image) => image.map(|img| img.key),
            Err(e) => {
                tracing::debug!("Skipping unprojectable row while sampling: {}", e);
                None
            }
        }
    }

    /// 采样行索引键的分位点
    fn sampled_points(
        &self,
        rate: u8,
        regions: usize,
        scopes: &[KeyRange],
    ) -> Result<Vec<Vec<u8>>, StorageError> {
        let generator = MutationGenerator::new(self.table, self.index, b"");
        let ranges = if scopes.is_empty() {
            vec![KeyRange::all()]
        } else {
            scopes.to_vec()
        };

        let mut keys = Vec::new();
        for range in ranges {
            let mut after = None;
            loop {
                let request = ScanRequest::new(range.clone(), TimeRange::as_of(self.as_of))
                    .mode(ReadMode::Raw)
                    .after(after.take())
                    .limit(SAMPLE_PAGE_ROWS);
                let rows = self.client.scan(&self.table.physical_name, &request)?;
                let full_page = rows.len() == SAMPLE_PAGE_ROWS;
                for row in &rows {
                    if xxh3_64(&row.key) % 100 < u64::from(rate) {
                        keys.extend(self.index_key(&generator, row));
                    }
                }
                match rows.last() {
                    Some(last) if full_page => after = Some(last.key.clone()),
                    _ => break,
                }
            }
        }
        tracing::debug!("Sampled {} index keys at {}%", keys.len(), rate);

        keys.sort();
        let mut points: Vec<Vec<u8>> = (1..regions)
            .filter_map(|i| keys.get(i * keys.len() / regions).cloned())
            .collect();
        points.dedup();
        Ok(points)
    }

    /// 每个数据 region（首个除外）第一行的索引键
    fn region_points(&self, regions: &[RegionInfo]) -> Result<Vec<Vec<u8>>, StorageError> {
        let generator = MutationGenerator::new(self.table, self.index, b"");
        let mut points = Vec::new();
        for region in regions.iter().skip(1) {
            let request = ScanRequest::new(region.range.clone(), TimeRange::as_of(self.as_of))
                .mode(ReadMode::Raw)
                .limit(1);
            let rows = self.client.scan(&self.table.physical_name, &request)?;
            if let Some(row) = rows.first() {
                points.extend(self.index_key(&generator, row));
            }
        }
        points.sort();
        points.dedup();
        Ok(points)
    }
}
