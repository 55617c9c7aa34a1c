use crate::index::schema::{ColumnType, ResolvedIndex, ResolvedTable, SchemaError, Value};
use crate::storage::KeyRange;
use xxhash_rust::xxh3::xxh3_64;

const KEY_NULL_MARKER: u8 = 0x00;
const KEY_NOT_NULL_MARKER: u8 = 0x01;
const TEXT_ESCAPE: u8 = 0xFF;
const TEXT_TERMINATOR: [u8; 2] = [0x00, 0x01];
const SIGN_FLIP_MASK: u64 = 1u64 << 63;
const SIGN_FLIP_MASK_16: u16 = 1u16 << 15;

fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK).to_be_bytes()
}

fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK) as i64
}

/// 保序编码一个键元素（自定界）
pub fn encode_key_element(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(KEY_NULL_MARKER),
        Value::Int(v) => {
            out.push(KEY_NOT_NULL_MARKER);
            out.extend_from_slice(&encode_i64_ordered(*v));
        }
        Value::Text(s) => {
            out.push(KEY_NOT_NULL_MARKER);
            for b in s.as_bytes() {
                out.push(*b);
                if *b == 0x00 {
                    out.push(TEXT_ESCAPE);
                }
            }
            out.extend_from_slice(&TEXT_TERMINATOR);
        }
    }
}

/// 解码一个键元素，返回 (值, 消耗字节数)
pub fn decode_key_element(ty: ColumnType, bytes: &[u8]) -> Result<(Value, usize), SchemaError> {
    let truncated = || SchemaError::Decode {
        column: "<row key>".to_string(),
        reason: "truncated key element".to_string(),
    };
    match bytes.first() {
        None => Err(truncated()),
        Some(&KEY_NULL_MARKER) => Ok((Value::Null, 1)),
        Some(&KEY_NOT_NULL_MARKER) => match ty {
            ColumnType::Integer => {
                let raw: [u8; 8] = bytes
                    .get(1..9)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(truncated)?;
                Ok((Value::Int(decode_i64_ordered(raw)), 9))
            }
            ColumnType::Varchar => {
                let mut text = Vec::new();
                let mut i = 1;
                loop {
                    match (bytes.get(i), bytes.get(i + 1)) {
                        (Some(0x00), Some(&TEXT_ESCAPE)) => {
                            text.push(0x00);
                            i += 2;
                        }
                        (Some(0x00), Some(0x01)) => {
                            i += 2;
                            break;
                        }
                        (Some(b), _) => {
                            text.push(*b);
                            i += 1;
                        }
                        (None, _) => return Err(truncated()),
                    }
                }
                let s = String::from_utf8(text).map_err(|e| SchemaError::Decode {
                    column: "<row key>".to_string(),
                    reason: e.to_string(),
                })?;
                Ok((Value::Text(s), i))
            }
        },
        Some(other) => Err(SchemaError::Decode {
            column: "<row key>".to_string(),
            reason: format!("invalid key marker {:#04x}", other),
        }),
    }
}

pub fn salt_byte(rest: &[u8], buckets: u8) -> u8 {
    (xxh3_64(rest) % u64::from(buckets.max(1))) as u8
}

/// 视图索引编号：符号翻转后大端 2 字节
pub fn view_index_prefix(id: i16) -> [u8; 2] {
    (id as u16 ^ SIGN_FLIP_MASK_16).to_be_bytes()
}

/// 按主键值编码数据行键（加盐表前置 salt 字节）
pub fn encode_row_key(table: &ResolvedTable, pk: &[Value]) -> Result<Vec<u8>, SchemaError> {
    if pk.len() != table.primary_key.len() {
        return Err(SchemaError::Eval(format!(
            "'{}' expects {} primary key values, got {}",
            table.full_name,
            table.primary_key.len(),
            pk.len()
        )));
    }
    let mut rest = Vec::new();
    for v in pk {
        encode_key_element(v, &mut rest);
    }
    Ok(match table.salt_buckets {
        Some(b) => {
            let mut key = Vec::with_capacity(rest.len() + 1);
            key.push(salt_byte(&rest, b));
            key.extend_from_slice(&rest);
            key
        }
        None => rest,
    })
}

/// 解码数据行键得到主键值
pub fn decode_row_key(table: &ResolvedTable, key: &[u8]) -> Result<Vec<Value>, SchemaError> {
    let types = table.pk_types()?;
    let mut pos = usize::from(table.salt_buckets.is_some());
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        let (v, used) = decode_key_element(ty, key.get(pos..).unwrap_or_default())?;
        values.push(v);
        pos += used;
    }
    if pos != key.len() {
        return Err(SchemaError::Decode {
            column: "<row key>".to_string(),
            reason: format!("{} trailing bytes", key.len() - pos),
        });
    }
    Ok(values)
}

/// 多租户表中某租户的数据行键区间（加盐表每个 bucket 一段）
pub fn tenant_ranges(table: &ResolvedTable, tenant: &str) -> Vec<KeyRange> {
    let mut prefix = Vec::new();
    encode_key_element(&Value::Text(tenant.to_string()), &mut prefix);
    match table.salt_buckets {
        Some(b) => (0..b)
            .map(|bucket| {
                let mut p = vec![bucket];
                p.extend_from_slice(&prefix);
                KeyRange::prefix(&p)
            })
            .collect(),
        None => vec![KeyRange::prefix(&prefix)],
    }
}

/// 索引行键编码器
///
/// 布局：`[salt][本地索引 region 前缀][视图索引编号][租户段][索引元组][数据行键]`
#[derive(Clone, Debug)]
pub struct IndexKeyCodec {
    salt_buckets: Option<u8>,
    local: bool,
    view_index_id: Option<i16>,
    multi_tenant: bool,
    data_salted: bool,
}

impl IndexKeyCodec {
    pub fn new(table: &ResolvedTable, index: &ResolvedIndex) -> Self {
        let local = index.is_local();
        Self {
            // 本地索引沿用数据表布局（region 前缀已含数据 salt）
            salt_buckets: if local { None } else { table.salt_buckets },
            local,
            view_index_id: index.view_index_id,
            multi_tenant: table.multi_tenant,
            data_salted: table.salt_buckets.is_some(),
        }
    }

    /// 数据行键中租户元素的原始编码
    fn tenant_segment<'k>(&self, data_row_key: &'k [u8]) -> Result<&'k [u8], SchemaError> {
        let start = usize::from(self.data_salted);
        let body = data_row_key.get(start..).unwrap_or_default();
        let (_, used) = decode_key_element(ColumnType::Varchar, body)?;
        Ok(&body[..used])
    }

    pub fn encode(&self, tuple: &[Value], data_row_key: &[u8], region_start: &[u8]) -> Result<Vec<u8>, SchemaError> {
        let mut rest = Vec::with_capacity(data_row_key.len() + 16 * tuple.len());
        if let Some(id) = self.view_index_id {
            rest.extend_from_slice(&view_index_prefix(id));
        }
        if self.multi_tenant {
            rest.extend_from_slice(self.tenant_segment(data_row_key)?);
        }
        for v in tuple {
            encode_key_element(v, &mut rest);
        }
        rest.extend_from_slice(data_row_key);

        let mut key = Vec::with_capacity(rest.len() + region_start.len() + 1);
        if self.local {
            key.extend_from_slice(region_start);
        } else if let Some(b) = self.salt_buckets {
            key.push(salt_byte(&rest, b));
        }
        key.extend_from_slice(&rest);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{Catalog, ColumnDef, IndexDef, IndexExpr, IndexKind, TableDef};

    fn enc(v: Value) -> Vec<u8> {
        let mut out = Vec::new();
        encode_key_element(&v, &mut out);
        out
    }

    #[test]
    fn element_encoding_preserves_order() {
        assert!(enc(Value::Null) < enc(Value::Int(i64::MIN)));
        assert!(enc(Value::Int(-1)) < enc(Value::Int(0)));
        assert!(enc(Value::Int(0)) < enc(Value::Int(7)));
        assert!(enc(Value::from("ab")) < enc(Value::from("abc")));
        assert!(enc(Value::from("a")) < enc(Value::from("a\0")));
        assert!(enc(Value::from("a\0")) < enc(Value::from("a\u{1}")));
    }

    #[test]
    fn element_decoding_consumes_exactly_one_element() {
        let mut buf = enc(Value::from("x\0y"));
        buf.extend(enc(Value::Int(-42)));
        let (a, used) = decode_key_element(ColumnType::Varchar, &buf).unwrap();
        assert_eq!(a, Value::from("x\0y"));
        let (b, used2) = decode_key_element(ColumnType::Integer, &buf[used..]).unwrap();
        assert_eq!(b, Value::Int(-42));
        assert_eq!(used + used2, buf.len());
    }

    fn catalog(salt: Option<u8>) -> Catalog {
        let mut t = TableDef::new(
            "",
            "T",
            vec![
                ColumnDef::new("TENANT_ID", ColumnType::Varchar),
                ColumnDef::new("ID", ColumnType::Integer),
                ColumnDef::new("NAME", ColumnType::Varchar),
            ],
            &["TENANT_ID", "ID"],
        );
        t.multi_tenant = true;
        t.salt_buckets = salt;
        let mut cat = Catalog::new();
        cat.add_table(t);
        cat.add_index(IndexDef::new("", "G", "T", vec![IndexExpr::column("NAME")], &[]));
        let mut l = IndexDef::new("", "L", "T", vec![IndexExpr::column("NAME")], &[]);
        l.kind = IndexKind::Local;
        cat.add_index(l);
        cat
    }

    #[test]
    fn row_key_roundtrip_with_salt() {
        let cat = catalog(Some(4));
        let t = cat.resolve_table("T", None).unwrap();
        let pk = vec![Value::from("acme"), Value::Int(9)];
        let key = encode_row_key(&t, &pk).unwrap();
        assert!(key[0] < 4);
        assert_eq!(decode_row_key(&t, &key).unwrap(), pk);
        assert!(tenant_ranges(&t, "acme").iter().any(|r| r.contains(&key)));
        assert!(!tenant_ranges(&t, "acmf").iter().any(|r| r.contains(&key)));
    }

    #[test]
    fn index_key_leads_with_tenant_segment() {
        let cat = catalog(None);
        let t = cat.resolve_table("T", None).unwrap();
        let g = cat.resolve_index("G", None).unwrap();
        let codec = IndexKeyCodec::new(&t, &g);
        let row = encode_row_key(&t, &[Value::from("acme"), Value::Int(1)]).unwrap();
        let key = codec.encode(&[Value::from("bob")], &row, b"").unwrap();
        assert!(KeyRange::prefix(&enc(Value::from("acme"))).contains(&key));
        assert!(key.ends_with(&row));
    }

    #[test]
    fn local_index_key_uses_region_prefix() {
        let cat = catalog(None);
        let t = cat.resolve_table("T", None).unwrap();
        let l = cat.resolve_index("L", None).unwrap();
        let codec = IndexKeyCodec::new(&t, &l);
        let row = encode_row_key(&t, &[Value::from("acme"), Value::Int(1)]).unwrap();
        let key = codec.encode(&[Value::from("bob")], &row, b"\x01acm").unwrap();
        assert!(key.starts_with(b"\x01acm"));
    }

    #[test]
    fn view_index_prefix_orders_by_id() {
        assert!(view_index_prefix(i16::MIN) < view_index_prefix(-1));
        assert!(view_index_prefix(-1) < view_index_prefix(0));
    }
}
