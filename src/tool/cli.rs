use super::config::IndexToolConfig;
use crate::mapper::{DisableLoggingType, VerifyType};
use crate::storage::Timestamp;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ix-rdd",
    version,
    about = "Build and verify secondary indexes asynchronously",
    long_about = None
)]
pub struct Cli {
    #[arg(short = 's', long)]
    pub schema: Option<String>,

    #[arg(short = 'd', long = "data-table", visible_alias = "dt")]
    pub data_table: Option<String>,

    #[arg(short = 'i', long = "index-table", visible_alias = "it")]
    pub index_table: Option<String>,

    #[arg(long = "tenant-id", visible_alias = "tenant")]
    pub tenant_id: Option<String>,

    /// 兼容旧参数；mapper 由表属性决定
    #[arg(long)]
    pub direct: bool,

    #[arg(short = 'v', long, value_enum)]
    pub verify: Option<VerifyType>,

    #[arg(long = "disable-logging", visible_alias = "dl", value_enum)]
    pub disable_logging: Option<DisableLoggingType>,

    #[arg(long, visible_alias = "snap")]
    pub snapshot: bool,

    #[arg(long = "run-foreground", visible_alias = "runfg")]
    pub run_foreground: bool,

    #[arg(long = "start-time", visible_alias = "st")]
    pub start_time: Option<Timestamp>,

    #[arg(long = "end-time", visible_alias = "et")]
    pub end_time: Option<Timestamp>,

    /// 预分区采样比例（百分比）
    #[arg(long = "sample-rate", visible_alias = "sp")]
    pub sample_rate: Option<u8>,

    /// 数据表 region 数超过该值时预分区索引表
    #[arg(long = "split-above-regions", visible_alias = "spa")]
    pub split_above_regions: Option<usize>,

    /// 增量重建时保留的历史版本窗口（毫秒）
    #[arg(long = "lookback", visible_alias = "incremental-rebuild-lookback")]
    pub lookback_ms: Option<u64>,

    /// 以某次运行的时间戳重跑校验
    #[arg(long = "retry-verify", visible_alias = "rv")]
    pub retry_verify: Option<Timestamp>,

    #[arg(short = 'o', long = "output-path", visible_alias = "op")]
    pub output_path: Option<PathBuf>,

    #[arg(long = "page-size")]
    pub page_size: Option<usize>,

    #[arg(long)]
    pub parallelism: Option<usize>,

    /// TOML 配置文件
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// 内存存储的 JSON 数据集
    #[arg(long)]
    pub fixture: Option<PathBuf>,
}

impl Cli {
    /// 默认值 < 配置文件 < 命令行
    pub fn into_config(&self) -> anyhow::Result<IndexToolConfig> {
        let mut config = match &self.config {
            Some(path) => IndexToolConfig::from_toml_file(path)?,
            None => IndexToolConfig::default(),
        };
        if let Some(v) = &self.schema {
            config.schema = v.clone();
        }
        if let Some(v) = &self.data_table {
            config.data_table = v.clone();
        }
        if let Some(v) = &self.index_table {
            config.index_table = v.clone();
        }
        if let Some(v) = &self.tenant_id {
            config.tenant_id = Some(v.clone());
        }
        config.direct |= self.direct;
        if let Some(v) = self.verify {
            config.verify = v;
        }
        if let Some(v) = self.disable_logging {
            config.disable_logging = v;
        }
        config.snapshot |= self.snapshot;
        config.run_foreground |= self.run_foreground;
        config.start_time = self.start_time.or(config.start_time);
        config.end_time = self.end_time.or(config.end_time);
        config.sample_rate_percent = self.sample_rate.or(config.sample_rate_percent);
        config.split_above_regions = self.split_above_regions.or(config.split_above_regions);
        config.retry_verify = self.retry_verify.or(config.retry_verify);
        if let Some(v) = self.lookback_ms {
            config.max_lookback_ms = v;
        }
        if let Some(v) = &self.output_path {
            config.output_path = Some(v.clone());
        }
        if let Some(v) = self.page_size {
            config.page_size_rows = v;
        }
        config.parallelism = self.parallelism.or(config.parallelism);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_tmp_file(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ix-rdd-cli-{}-{}.toml", tag, nanos))
    }

    #[test]
    fn parses_legacy_aliases() {
        let cli = Cli::try_parse_from([
            "ix-rdd", "-s", "S", "--dt", "PEOPLE", "--it", "BY_NAME", "--tenant", "acme", "-v",
            "BOTH", "--runfg", "--snap", "--dl", "AFTER", "--st", "5", "--et", "9", "--rv", "7",
        ])
        .unwrap();
        let c = cli.into_config().unwrap();
        assert_eq!(c.index_full(), "S.BY_NAME");
        assert_eq!(c.tenant_id.as_deref(), Some("acme"));
        assert_eq!(c.verify, VerifyType::Both);
        assert_eq!(c.disable_logging, DisableLoggingType::After);
        assert!(c.run_foreground && c.snapshot);
        assert_eq!((c.start_time, c.end_time, c.retry_verify), (Some(5), Some(9), Some(7)));
    }

    #[test]
    fn sampling_and_lookback_flags() {
        let cli = Cli::try_parse_from([
            "ix-rdd", "-d", "T", "-i", "I", "--sp", "50", "--spa", "3",
            "--incremental-rebuild-lookback", "60000",
        ])
        .unwrap();
        let c = cli.into_config().unwrap();
        assert_eq!(c.sample_rate_percent, Some(50));
        assert_eq!(c.split_above_regions, Some(3));
        assert_eq!(c.max_lookback_ms, 60_000);

        let c = Cli::try_parse_from(["ix-rdd", "--lookback", "5"])
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(c.max_lookback_ms, 5);
    }

    #[test]
    fn unknown_verify_type_is_rejected() {
        assert!(Cli::try_parse_from(["ix-rdd", "-d", "T", "-i", "I", "-v", "SOMETIMES"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let path = unique_tmp_file("layer");
        std::fs::write(
            &path,
            "data_table = \"PEOPLE\"\nindex_table = \"BY_NAME\"\nbatch_size = 7\npage_size_rows = 100\nverify = \"AFTER\"\nmax_lookback_ms = 9\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "ix-rdd",
            "-c",
            path.to_str().unwrap(),
            "-i",
            "BY_ZIP",
            "--page-size",
            "50",
        ])
        .unwrap();
        let c = cli.into_config().unwrap();
        assert_eq!(c.data_table, "PEOPLE");
        assert_eq!(c.index_table, "BY_ZIP");
        assert_eq!(c.batch_size, 7);
        assert_eq!(c.page_size_rows, 50);
        assert_eq!(c.verify, VerifyType::After);
        assert_eq!(c.max_lookback_ms, 9);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["ix-rdd", "-c", "/nonexistent/ix-rdd.toml"]).unwrap();
        assert!(cli.into_config().is_err());
    }
}
