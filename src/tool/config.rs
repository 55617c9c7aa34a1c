use super::IndexToolError;
use crate::index::schema::full_name;
use crate::mapper::{DisableLoggingType, VerifyType};
use crate::storage::Timestamp;
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 表、索引、schema 名
const NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_$]*$";

/// 一次运行的完整配置
///
/// 来源优先级：默认值 < `--config` TOML 文件 < 命令行参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexToolConfig {
    pub schema: String,
    pub data_table: String,
    pub index_table: String,
    pub tenant_id: Option<String>,
    /// 仅作兼容接受；mapper 由表属性决定
    pub direct: bool,
    pub verify: VerifyType,
    pub disable_logging: DisableLoggingType,
    pub snapshot: bool,
    pub run_foreground: bool,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub sample_rate_percent: Option<u8>,
    pub split_above_regions: Option<usize>,
    pub retry_verify: Option<Timestamp>,
    pub output_path: Option<PathBuf>,
    pub page_size_rows: usize,
    pub batch_size: usize,
    pub client_retries: usize,
    pub max_split_attempts: usize,
    pub max_lookback_ms: u64,
    /// None：按系统负载自适应
    pub parallelism: Option<usize>,
}

impl Default for IndexToolConfig {
    fn default() -> Self {
        Self {
            schema: String::new(),
            data_table: String::new(),
            index_table: String::new(),
            tenant_id: None,
            direct: false,
            verify: VerifyType::None,
            disable_logging: DisableLoggingType::None,
            snapshot: false,
            run_foreground: false,
            start_time: None,
            end_time: None,
            sample_rate_percent: None,
            split_above_regions: None,
            retry_verify: None,
            output_path: None,
            page_size_rows: 32_768,
            batch_size: 1_000,
            client_retries: 3,
            max_split_attempts: 4,
            max_lookback_ms: 0,
            parallelism: None,
        }
    }
}

impl IndexToolConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {:?}", path))
    }

    pub fn validate(&self) -> Result<(), IndexToolError> {
        let names = Regex::new(NAME_PATTERN).map_err(anyhow::Error::from)?;
        let check = |what: &str, value: &str| {
            if names.is_match(value) {
                Ok(())
            } else {
                Err(IndexToolError::InvalidOption(format!("invalid {} name '{}'", what, value)))
            }
        };
        if !self.schema.is_empty() {
            check("schema", &self.schema)?;
        }
        check("data table", &self.data_table)?;
        check("index table", &self.index_table)?;

        if let Some(t) = &self.tenant_id {
            if t.is_empty() {
                return Err(IndexToolError::InvalidOption("empty tenant id".into()));
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                return Err(IndexToolError::InvalidOption(format!(
                    "start time {} must be before end time {}",
                    start, end
                )));
            }
        }
        if self.retry_verify.is_some() && !self.verify.verifies() {
            return Err(IndexToolError::InvalidOption(
                "retry-verify requires a verify type other than NONE".into(),
            ));
        }
        if let Some(rate) = self.sample_rate_percent {
            if !(1..=100).contains(&rate) {
                return Err(IndexToolError::InvalidOption(format!(
                    "sample rate must be within 1..=100, got {}",
                    rate
                )));
            }
        }
        for (what, v) in [
            ("page size", self.page_size_rows),
            ("batch size", self.batch_size),
            ("client retries", self.client_retries),
            ("max split attempts", self.max_split_attempts),
        ] {
            if v == 0 {
                return Err(IndexToolError::InvalidOption(format!("{} must be positive", what)));
            }
        }
        if self.parallelism == Some(0) {
            return Err(IndexToolError::InvalidOption("parallelism must be positive".into()));
        }
        Ok(())
    }

    pub fn data_table_full(&self) -> String {
        full_name(&self.schema, &self.data_table)
    }

    pub fn index_full(&self) -> String {
        full_name(&self.schema, &self.index_table)
    }

    /// 未指定时落在缓存目录 `ix-rdd/<run_ts>`
    pub fn resolved_output_path(&self, run_ts: Timestamp) -> PathBuf {
        match &self.output_path {
            Some(p) => p.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("ix-rdd")
                .join(run_ts.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> IndexToolConfig {
        IndexToolConfig {
            schema: "S".into(),
            data_table: "PEOPLE".into(),
            index_table: "BY_NAME".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_tuned_for_large_tables() {
        let c = IndexToolConfig::default();
        assert_eq!(c.page_size_rows, 32_768);
        assert_eq!(c.batch_size, 1_000);
        assert_eq!(c.client_retries, 3);
        assert_eq!(c.max_split_attempts, 4);
        assert_eq!(c.parallelism, None);
        assert!(!c.run_foreground);
    }

    #[test]
    fn names_are_validated() {
        assert!(base().validate().is_ok());
        assert_eq!(base().index_full(), "S.BY_NAME");

        let mut c = base();
        c.data_table = "PEOPLE; DROP".into();
        assert!(matches!(c.validate(), Err(IndexToolError::InvalidOption(_))));

        let mut c = base();
        c.index_table = String::new();
        assert!(c.validate().is_err());

        let mut c = base();
        c.schema = String::new();
        assert!(c.validate().is_ok());
        assert_eq!(c.data_table_full(), "PEOPLE");
    }

    #[test]
    fn option_combinations_are_validated() {
        let mut c = base();
        c.start_time = Some(10);
        c.end_time = Some(10);
        assert!(c.validate().is_err());

        let mut c = base();
        c.retry_verify = Some(1);
        assert!(c.validate().is_err());
        c.verify = VerifyType::Only;
        assert!(c.validate().is_ok());

        let mut c = base();
        c.sample_rate_percent = Some(0);
        assert!(c.validate().is_err());

        let mut c = base();
        c.batch_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn toml_overrides_defaults() {
        let c: IndexToolConfig = toml::from_str(
            r#"
            schema = "S"
            data_table = "PEOPLE"
            index_table = "BY_NAME"
            verify = "BOTH"
            disable_logging = "BEFORE"
            batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(c.verify, VerifyType::Both);
        assert_eq!(c.disable_logging, DisableLoggingType::Before);
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.page_size_rows, 32_768);
    }

    #[test]
    fn output_path_defaults_under_cache_dir() {
        let c = base();
        let p = c.resolved_output_path(42);
        assert!(p.ends_with("ix-rdd/42"));

        let mut c = base();
        c.output_path = Some(PathBuf::from("/tmp/out"));
        assert_eq!(c.resolved_output_path(42), PathBuf::from("/tmp/out"));
    }
}
