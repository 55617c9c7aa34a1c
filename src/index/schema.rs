use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 数据表默认列族
pub const DEFAULT_FAMILY: &str = "0";
/// 视图索引共享物理表前缀
pub const VIEW_INDEX_TABLE_PREFIX: &str = "_IDX_";
/// 本地索引物理表前缀
pub const LOCAL_INDEX_TABLE_PREFIX: &str = "_LOCAL_IDX_";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("index '{0}' not found")]
    IndexNotFound(String),
    #[error("view '{view}' refers to missing parent '{parent}'")]
    MissingParent { view: String, parent: String },
    #[error("column '{column}' not found in '{table}'")]
    ColumnNotFound { table: String, column: String },
    #[error("invalid index definition '{index}': {reason}")]
    InvalidIndex { index: String, reason: String },
    #[error("cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },
    #[error("cannot evaluate expression: {0}")]
    Eval(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Varchar,
}

/// 列值（fixture 中直接写 JSON null / 整数 / 字符串）
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// cell 值编码：整数 8 字节大端，文本 UTF-8；Null 不落 cell
    pub fn to_cell_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Int(v) => v.to_be_bytes().to_vec(),
            Value::Text(s) => s.as_bytes().to_vec(),
        }
    }

    pub fn from_cell_bytes(ty: ColumnType, column: &str, bytes: &[u8]) -> Result<Value, SchemaError> {
        match ty {
            ColumnType::Integer => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| SchemaError::Decode {
                    column: column.to_string(),
                    reason: format!("expected 8 bytes, got {}", bytes.len()),
                })?;
                Ok(Value::Int(i64::from_be_bytes(raw)))
            }
            ColumnType::Varchar => String::from_utf8(bytes.to_vec())
                .map(Value::Text)
                .map_err(|e| SchemaError::Decode {
                    column: column.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// 文本视图；Null 为 None
    fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

fn default_family() -> String {
    DEFAULT_FAMILY.to_string()
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            family: default_family(),
            ty,
        }
    }

    /// 索引行中覆盖列的 qualifier：`family:qualifier`
    pub fn index_qualifier(&self) -> String {
        format!("{}:{}", self.family, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionProvider {
    Tephra,
    Omid,
}

impl TransactionProvider {
    pub fn supports_local_index(self) -> bool {
        matches!(self, TransactionProvider::Tephra)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableKind {
    #[default]
    Table,
    /// 视图：物理存储与列定义继承自 parent（全名）
    View { parent: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub schema: String,
    pub name: String,
    /// 视图的所属租户；None 为全局对象
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub kind: TableKind,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// 主键列（多租户表首列为租户列）
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub multi_tenant: bool,
    #[serde(default)]
    pub transaction_provider: Option<TransactionProvider>,
    #[serde(default)]
    pub salt_buckets: Option<u8>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl TableDef {
    pub fn new(schema: &str, name: &str, columns: Vec<ColumnDef>, primary_key: &[&str]) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            tenant_id: None,
            kind: TableKind::Table,
            columns,
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            multi_tenant: false,
            transaction_provider: None,
            salt_buckets: None,
            ttl_ms: None,
        }
    }

    pub fn view(schema: &str, name: &str, parent: &str, tenant_id: Option<&str>) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            kind: TableKind::View {
                parent: parent.to_string(),
            },
            columns: Vec::new(),
            primary_key: Vec::new(),
            multi_tenant: false,
            transaction_provider: None,
            salt_buckets: None,
            ttl_ms: None,
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.schema, &self.name)
    }
}

/// 解析后的数据表/视图（物理名、继承的列与表属性已确定）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTable {
    pub full_name: String,
    pub physical_name: String,
    pub is_view: bool,
    pub tenant_id: Option<String>,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub multi_tenant: bool,
    pub transaction_provider: Option<TransactionProvider>,
    pub salt_buckets: Option<u8>,
    pub ttl_ms: Option<u64>,
}

impl ResolvedTable {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    pub fn is_transactional(&self) -> bool {
        self.transaction_provider.is_some()
    }

    /// 主键列类型（按主键顺序）
    pub fn pk_types(&self) -> Result<Vec<ColumnType>, SchemaError> {
        self.primary_key
            .iter()
            .map(|k| {
                self.column(k)
                    .map(|c| c.ty)
                    .ok_or_else(|| SchemaError::ColumnNotFound {
                        table: self.full_name.clone(),
                        column: k.clone(),
                    })
            })
            .collect()
    }

    /// 非主键列
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(move |c| !self.is_primary_key(&c.name))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Global,
    /// 与数据表同布局，键以所在数据 region 的 start key 为前缀
    Local,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// 所有行都入索引
    #[default]
    IndexNulls,
    /// 索引键全部为 null 时不入索引
    SkipAllNull,
    /// 任一索引键为 null 时不入索引
    SkipAnyNull,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexState {
    /// ASYNC 创建后等待构建
    #[default]
    Building,
    Active,
    Disabled,
}

/// 索引键表达式
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexExpr {
    Column(String),
    Literal(Value),
    Upper(Box<IndexExpr>),
    Lpad {
        expr: Box<IndexExpr>,
        len: usize,
        pad: char,
    },
    /// `||`：null 视为空串，全部为 null 时结果为 null
    Concat(Vec<IndexExpr>),
}

impl IndexExpr {
    pub fn column(name: &str) -> Self {
        IndexExpr::Column(name.to_string())
    }

    pub fn eval(&self, row: &BTreeMap<String, Value>) -> Result<Value, SchemaError> {
        match self {
            IndexExpr::Column(name) => row
                .get(name)
                .cloned()
                .ok_or_else(|| SchemaError::Eval(format!("unknown column '{}'", name))),
            IndexExpr::Literal(v) => Ok(v.clone()),
            IndexExpr::Upper(inner) => Ok(match inner.eval(row)?.as_text() {
                Some(s) => Value::Text(s.to_uppercase()),
                None => Value::Null,
            }),
            IndexExpr::Lpad { expr, len, pad } => Ok(match expr.eval(row)?.as_text() {
                Some(s) => {
                    let n = s.chars().count();
                    if n >= *len {
                        Value::Text(s.chars().take(*len).collect())
                    } else {
                        let mut out: String = std::iter::repeat(*pad).take(len - n).collect();
                        out.push_str(&s);
                        Value::Text(out)
                    }
                }
                None => Value::Null,
            }),
            IndexExpr::Concat(parts) => {
                let mut out = String::new();
                let mut any = false;
                for p in parts {
                    if let Some(s) = p.eval(row)?.as_text() {
                        out.push_str(&s);
                        any = true;
                    }
                }
                Ok(if any { Value::Text(out) } else { Value::Null })
            }
        }
    }

    /// 表达式引用的列
    pub fn referenced_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            IndexExpr::Column(name) => {
                out.insert(name.clone());
            }
            IndexExpr::Literal(_) => {}
            IndexExpr::Upper(inner) => inner.referenced_columns(out),
            IndexExpr::Lpad { expr, .. } => expr.referenced_columns(out),
            IndexExpr::Concat(parts) => parts.iter().for_each(|p| p.referenced_columns(out)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    #[serde(default)]
    pub schema: String,
    pub name: String,
    /// 数据表或视图的全名
    pub data_table: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub kind: IndexKind,
    /// 视图索引在共享物理表中的编号
    #[serde(default)]
    pub view_index_id: Option<i16>,
    pub key: Vec<IndexExpr>,
    #[serde(default)]
    pub covered: Vec<String>,
    #[serde(default)]
    pub null_policy: NullPolicy,
    #[serde(default)]
    pub state: IndexState,
}

impl IndexDef {
    pub fn new(schema: &str, name: &str, data_table: &str, key: Vec<IndexExpr>, covered: &[&str]) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            data_table: data_table.to_string(),
            tenant_id: None,
            kind: IndexKind::Global,
            view_index_id: None,
            key,
            covered: covered.iter().map(|s| s.to_string()).collect(),
            null_policy: NullPolicy::IndexNulls,
            state: IndexState::Building,
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.schema, &self.name)
    }

    pub fn validate(&self, table: &ResolvedTable) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidIndex {
            index: self.full_name(),
            reason,
        };
        if self.key.is_empty() {
            return Err(invalid("no key expressions".into()));
        }
        let mut referenced = BTreeSet::new();
        for e in &self.key {
            e.referenced_columns(&mut referenced);
        }
        for c in &referenced {
            if table.column(c).is_none() {
                return Err(SchemaError::ColumnNotFound {
                    table: table.full_name.clone(),
                    column: c.clone(),
                });
            }
        }
        let mut seen = BTreeSet::new();
        for c in &self.covered {
            if table.column(c).is_none() {
                return Err(SchemaError::ColumnNotFound {
                    table: table.full_name.clone(),
                    column: c.clone(),
                });
            }
            if table.is_primary_key(c) {
                return Err(invalid(format!("covered column '{}' is part of the primary key", c)));
            }
            if !seen.insert(c.as_str()) {
                return Err(invalid(format!("duplicate covered column '{}'", c)));
            }
        }
        Ok(())
    }
}

/// 解析后的索引
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIndex {
    pub def: IndexDef,
    pub full_name: String,
    pub physical_name: String,
    /// 视图索引编号（仅视图上的索引）
    pub view_index_id: Option<i16>,
}

impl ResolvedIndex {
    pub fn is_local(&self) -> bool {
        self.def.kind == IndexKind::Local
    }
}

pub fn full_name(schema: &str, name: &str) -> String {
    if schema.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", schema, name)
    }
}

/// 表与索引的元数据目录
///
/// 按租户可见性解析：租户自己的对象优先，其次是全局对象。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableDef) {
        self.tables.push(table);
    }

    pub fn add_index(&mut self, index: IndexDef) {
        self.indexes.push(index);
    }

    fn visible(owner: &Option<String>, tenant: Option<&str>) -> bool {
        match owner {
            None => true,
            Some(o) => tenant == Some(o.as_str()),
        }
    }

    fn find_table(&self, full: &str, tenant: Option<&str>) -> Option<&TableDef> {
        let mut candidates = self
            .tables
            .iter()
            .filter(|t| t.full_name() == full && Self::visible(&t.tenant_id, tenant));
        let first = candidates.next()?;
        if first.tenant_id.is_some() {
            return Some(first);
        }
        Some(candidates.find(|t| t.tenant_id.is_some()).unwrap_or(first))
    }

    fn find_index(&self, full: &str, tenant: Option<&str>) -> Option<&IndexDef> {
        let mut candidates = self
            .indexes
            .iter()
            .filter(|i| i.full_name() == full && Self::visible(&i.tenant_id, tenant));
        let first = candidates.next()?;
        if first.tenant_id.is_some() {
            return Some(first);
        }
        Some(candidates.find(|i| i.tenant_id.is_some()).unwrap_or(first))
    }

    pub fn resolve_table(&self, full: &str, tenant: Option<&str>) -> Result<ResolvedTable, SchemaError> {
        let def = self
            .find_table(full, tenant)
            .ok_or_else(|| SchemaError::TableNotFound(full.to_string()))?;
        match &def.kind {
            TableKind::Table => Ok(ResolvedTable {
                full_name: def.full_name(),
                physical_name: def.full_name(),
                is_view: false,
                tenant_id: def.tenant_id.clone(),
                columns: def.columns.clone(),
                primary_key: def.primary_key.clone(),
                multi_tenant: def.multi_tenant,
                transaction_provider: def.transaction_provider,
                salt_buckets: def.salt_buckets,
                ttl_ms: def.ttl_ms,
            }),
            TableKind::View { parent } => {
                // 视图可基于另一个视图
                let base = self.resolve_table(parent, tenant).map_err(|_| SchemaError::MissingParent {
                    view: def.full_name(),
                    parent: parent.clone(),
                })?;
                let mut columns = base.columns.clone();
                for c in &def.columns {
                    if !columns.iter().any(|b| b.name == c.name) {
                        columns.push(c.clone());
                    }
                }
                Ok(ResolvedTable {
                    full_name: def.full_name(),
                    physical_name: base.physical_name,
                    is_view: true,
                    tenant_id: def.tenant_id.clone().or(base.tenant_id),
                    columns,
                    primary_key: base.primary_key,
                    multi_tenant: base.multi_tenant,
                    transaction_provider: base.transaction_provider,
                    salt_buckets: base.salt_buckets,
                    ttl_ms: def.ttl_ms.or(base.ttl_ms),
                })
            }
        }
    }

    pub fn resolve_index(&self, full: &str, tenant: Option<&str>) -> Result<ResolvedIndex, SchemaError> {
        let def = self
            .find_index(full, tenant)
            .ok_or_else(|| SchemaError::IndexNotFound(full.to_string()))?;
        let table = self.resolve_table(&def.data_table, tenant)?;
        def.validate(&table)?;

        let (physical_name, view_index_id) = match (def.kind, table.is_view) {
            (IndexKind::Local, _) => (
                format!("{}{}", LOCAL_INDEX_TABLE_PREFIX, table.physical_name),
                table.is_view.then(|| def.view_index_id.unwrap_or(i16::MIN)),
            ),
            (IndexKind::Global, true) => (
                format!("{}{}", VIEW_INDEX_TABLE_PREFIX, table.physical_name),
                Some(def.view_index_id.unwrap_or(i16::MIN)),
            ),
            (IndexKind::Global, false) => (def.full_name(), None),
        };

        Ok(ResolvedIndex {
            def: def.clone(),
            full_name: def.full_name(),
            physical_name,
            view_index_id,
        })
    }

    /// 租户可见的、建在 table 上的索引
    pub fn indexes_on(&self, table_full: &str, tenant: Option<&str>) -> Vec<ResolvedIndex> {
        self.indexes
            .iter()
            .filter(|i| i.data_table == table_full && Self::visible(&i.tenant_id, tenant))
            .filter_map(|i| self.resolve_index(&i.full_name(), tenant).ok())
            .collect()
    }

    pub fn set_index_state(&mut self, full: &str, tenant: Option<&str>, state: IndexState) -> bool {
        let tenant_owned = self
            .indexes
            .iter()
            .position(|i| i.full_name() == full && i.tenant_id.is_some() && Self::visible(&i.tenant_id, tenant));
        let pos = tenant_owned.or_else(|| {
            self.indexes
                .iter()
                .position(|i| i.full_name() == full && i.tenant_id.is_none())
        });
        match pos {
            Some(p) => {
                self.indexes[p].state = state;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_table() -> TableDef {
        let mut t = TableDef::new(
            "S",
            "T",
            vec![
                ColumnDef::new("TENANT_ID", ColumnType::Varchar),
                ColumnDef::new("ID", ColumnType::Integer),
                ColumnDef::new("NAME", ColumnType::Varchar),
                ColumnDef::new("ZIP", ColumnType::Integer),
            ],
            &["TENANT_ID", "ID"],
        );
        t.multi_tenant = true;
        t
    }

    #[test]
    fn expression_evaluation() {
        let mut row = BTreeMap::new();
        row.insert("NAME".to_string(), Value::from("bob"));
        row.insert("MISSING".to_string(), Value::Null);

        let e = IndexExpr::Concat(vec![
            IndexExpr::Lpad {
                expr: Box::new(IndexExpr::Upper(Box::new(IndexExpr::column("NAME")))),
                len: 8,
                pad: 'x',
            },
            IndexExpr::Literal(Value::from("_xyz")),
        ]);
        assert_eq!(e.eval(&row).unwrap(), Value::from("xxxxxBOB_xyz"));

        let trunc = IndexExpr::Lpad {
            expr: Box::new(IndexExpr::column("NAME")),
            len: 2,
            pad: '0',
        };
        assert_eq!(trunc.eval(&row).unwrap(), Value::from("bo"));

        let nulls = IndexExpr::Concat(vec![IndexExpr::column("MISSING")]);
        assert_eq!(nulls.eval(&row).unwrap(), Value::Null);
    }

    #[test]
    fn tenant_view_inherits_parent_layout() {
        let mut cat = Catalog::new();
        cat.add_table(base_table());
        let mut view = TableDef::view("S", "V", "S.T", Some("acme"));
        view.columns.push(ColumnDef::new("EXTRA", ColumnType::Varchar));
        cat.add_table(view);

        let v = cat.resolve_table("S.V", Some("acme")).unwrap();
        assert!(v.is_view);
        assert_eq!(v.physical_name, "S.T");
        assert_eq!(v.columns.len(), 5);
        assert_eq!(v.primary_key, vec!["TENANT_ID".to_string(), "ID".to_string()]);

        // 其他租户看不到该视图
        assert!(matches!(
            cat.resolve_table("S.V", Some("other")),
            Err(SchemaError::TableNotFound(_))
        ));
        assert!(cat.resolve_table("S.V", None).is_err());
    }

    #[test]
    fn index_physical_names() {
        let mut cat = Catalog::new();
        cat.add_table(base_table());
        cat.add_table(TableDef::view("S", "V", "S.T", Some("acme")));

        cat.add_index(IndexDef::new("S", "G", "S.T", vec![IndexExpr::column("NAME")], &["ZIP"]));
        let mut local = IndexDef::new("S", "L", "S.T", vec![IndexExpr::column("NAME")], &[]);
        local.kind = IndexKind::Local;
        cat.add_index(local);
        let mut vi = IndexDef::new("S", "VI", "S.V", vec![IndexExpr::column("ZIP")], &[]);
        vi.tenant_id = Some("acme".into());
        cat.add_index(vi);

        let g = cat.resolve_index("S.G", None).unwrap();
        assert_eq!(g.physical_name, "S.G");
        assert_eq!(g.view_index_id, None);

        let l = cat.resolve_index("S.L", None).unwrap();
        assert_eq!(l.physical_name, "_LOCAL_IDX_S.T");

        let v = cat.resolve_index("S.VI", Some("acme")).unwrap();
        assert_eq!(v.physical_name, "_IDX_S.T");
        assert_eq!(v.view_index_id, Some(i16::MIN));
        assert!(cat.resolve_index("S.VI", None).is_err());
    }

    #[test]
    fn index_validation_rejects_unknown_columns() {
        let mut cat = Catalog::new();
        cat.add_table(base_table());
        cat.add_index(IndexDef::new("S", "BAD", "S.T", vec![IndexExpr::column("NOPE")], &[]));
        cat.add_index(IndexDef::new("S", "PKCOV", "S.T", vec![IndexExpr::column("NAME")], &["ID"]));
        assert!(matches!(
            cat.resolve_index("S.BAD", None),
            Err(SchemaError::ColumnNotFound { .. })
        ));
        assert!(matches!(
            cat.resolve_index("S.PKCOV", None),
            Err(SchemaError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn index_state_transitions() {
        let mut cat = Catalog::new();
        cat.add_table(base_table());
        cat.add_index(IndexDef::new("S", "G", "S.T", vec![IndexExpr::column("NAME")], &[]));
        assert_eq!(cat.resolve_index("S.G", None).unwrap().def.state, IndexState::Building);
        assert!(cat.set_index_state("S.G", None, IndexState::Active));
        assert_eq!(cat.resolve_index("S.G", None).unwrap().def.state, IndexState::Active);
        assert!(!cat.set_index_state("S.NOPE", None, IndexState::Active));
    }

    #[test]
    fn cell_value_codec() {
        let v = Value::from_cell_bytes(ColumnType::Integer, "ZIP", &Value::Int(-5).to_cell_bytes()).unwrap();
        assert_eq!(v, Value::Int(-5));
        assert!(Value::from_cell_bytes(ColumnType::Integer, "ZIP", b"abc").is_err());
    }
}
