use crate::storage::{KeyRange, RegionInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitSource {
    /// 直接读在线表
    Live,
    /// 读还原到本地的快照 region 文件
    Snapshot(PathBuf),
}

/// 一个 split = 一个数据 region 与作业键范围的交集
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub id: usize,
    pub region: RegionInfo,
    pub range: KeyRange,
    pub source: SplitSource,
}

/// 按 region 切分作业范围（scopes 为空表示全表）
pub fn plan_splits<I>(regions: I, scopes: &[KeyRange]) -> Vec<Split>
where
    I: IntoIterator<Item = (RegionInfo, SplitSource)>,
{
    let all = [KeyRange::all()];
    let scopes = if scopes.is_empty() { &all[..] } else { scopes };

    let mut splits = Vec::new();
    for (region, source) in regions {
        for scope in scopes {
            if let Some(range) = region.range.intersect(scope) {
                splits.push(Split {
                    id: splits.len(),
                    region: region.clone(),
                    range,
                    source: source.clone(),
                });
            }
        }
    }
    splits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: &[u8], stop: &[u8]) -> (RegionInfo, SplitSource) {
        (
            RegionInfo {
                table: "T".into(),
                name: format!("T,{:?}", start),
                range: KeyRange::new(start.to_vec(), stop.to_vec()),
            },
            SplitSource::Live,
        )
    }

    #[test]
    fn one_split_per_region_without_scope() {
        let splits = plan_splits(vec![region(b"", b"m"), region(b"m", b"")], &[]);
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[1].id, 1);
        assert_eq!(splits[1].range, KeyRange::new(b"m".to_vec(), Vec::new()));
    }

    #[test]
    fn scope_trims_and_drops_regions() {
        let scope = [KeyRange::prefix(b"q")];
        let splits = plan_splits(vec![region(b"", b"m"), region(b"m", b"")], &scope);
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].range, KeyRange::new(b"q".to_vec(), b"r".to_vec()));
    }
}
