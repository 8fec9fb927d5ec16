//! 二进制模板格式（.gjt）
//!
//! 布局（整数均为小端）：
//!
//! | 偏移 | 长度 | 内容 |
//! |------|------|------|
//! | 0    | 4    | 签名 `GJTP` |
//! | 4    | 2    | 格式版本 |
//! | 6    | 2    | 标志位，目前恒为 0 |
//! | 8    | 4    | 压缩数据长度 |
//! | 12   | 4    | 解压后 MessagePack 长度 |
//! | 16   | …    | Zstd 压缩的 MessagePack |
//!
//! 读取时两个长度都要与实际数据对得上，不按声明长度预先分配内存。

use crate::error::FileError;
use crate::template::Template;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const SIGNATURE: [u8; 4] = *b"GJTP";

const VERSION: u16 = 1;

const PREAMBLE_LEN: usize = 16;

/// 解压后数据的上限，参数集远小于此
const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

const ZSTD_LEVEL: i32 = 3;

/// 数据前的定长段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Preamble {
    version: u16,
    flags: u16,
    packed_len: u32,
    payload_len: u32,
}

impl Preamble {
    fn to_bytes(self) -> [u8; PREAMBLE_LEN] {
        let mut out = [0u8; PREAMBLE_LEN];
        out[..4].copy_from_slice(&SIGNATURE);
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.packed_len.to_le_bytes());
        out[12..].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    fn parse(raw: &[u8; PREAMBLE_LEN]) -> Result<Self, FileError> {
        if raw[..4] != SIGNATURE {
            return Err(FileError::InvalidFormat("Not a gujian template (bad signature)".to_string()));
        }
        let u16_at = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let preamble = Self {
            version: u16_at(4),
            flags: u16_at(6),
            packed_len: u32_at(8),
            payload_len: u32_at(12),
        };

        if preamble.version > VERSION {
            return Err(FileError::UnsupportedVersion(format!(
                "Template version {} is newer than supported version {}",
                preamble.version, VERSION
            )));
        }
        if preamble.payload_len > MAX_PAYLOAD_LEN {
            return Err(FileError::InvalidFormat(format!(
                "Declared payload of {} bytes exceeds the {} byte limit",
                preamble.payload_len, MAX_PAYLOAD_LEN
            )));
        }
        Ok(preamble)
    }
}

fn length_field(len: usize) -> Result<u32, FileError> {
    u32::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| FileError::InvalidFormat(format!("Template too large: {} bytes", len)))
}

/// 编码为 `.gjt` 字节
pub fn encode(template: &Template) -> Result<Vec<u8>, FileError> {
    template.params.validate()?;
    let payload = rmp_serde::to_vec_named(template)?;
    let packed = zstd::encode_all(payload.as_slice(), ZSTD_LEVEL)?;

    let preamble = Preamble {
        version: VERSION,
        flags: 0,
        packed_len: length_field(packed.len())?,
        payload_len: length_field(payload.len())?,
    };
    let mut bytes = Vec::with_capacity(PREAMBLE_LEN + packed.len());
    bytes.extend_from_slice(&preamble.to_bytes());
    bytes.extend_from_slice(&packed);
    Ok(bytes)
}

/// 从 `.gjt` 数据解码，加载后的参数经过校验
pub fn decode(reader: &mut impl Read) -> Result<Template, FileError> {
    let mut raw = [0u8; PREAMBLE_LEN];
    reader.read_exact(&mut raw)?;
    let preamble = Preamble::parse(&raw)?;
    if preamble.flags != 0 {
        tracing::warn!("Ignoring unknown template flags {:#x}", preamble.flags);
    }

    // 多读一个字节以发现声明长度之后的多余数据
    let mut packed = Vec::new();
    reader
        .take(u64::from(preamble.packed_len) + 1)
        .read_to_end(&mut packed)?;
    let expected = preamble.packed_len as usize;
    if packed.len() != expected {
        return Err(FileError::InvalidFormat(format!(
            "Template declares {} compressed bytes but {} follow",
            expected,
            if packed.len() > expected { "more".to_string() } else { packed.len().to_string() }
        )));
    }

    let payload = zstd::bulk::decompress(&packed, preamble.payload_len as usize)?;
    if payload.len() != preamble.payload_len as usize {
        return Err(FileError::InvalidFormat(format!(
            "Template payload is {} bytes, expected {}",
            payload.len(),
            preamble.payload_len
        )));
    }
    let template: Template = rmp_serde::from_slice(&payload)?;
    template.params.validate()?;
    Ok(template)
}

/// 保存模板
pub fn save(template: &Template, path: &Path) -> Result<(), FileError> {
    let bytes = encode(template)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;

    tracing::info!(
        "Saved template {} to {} ({} bytes)",
        template.name(),
        path.display(),
        bytes.len()
    );
    Ok(())
}

/// 加载模板
pub fn load(path: &Path) -> Result<Template, FileError> {
    let mut reader = BufReader::new(File::open(path)?);
    let template = decode(&mut reader)?;
    tracing::info!("Loaded template {} from {}", template.name(), path.display());
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gujian_core::params::{GridCell, ParameterSet, RoofStyle};
    use uuid::Uuid;

    fn hall() -> Template {
        Template::new("hall", ParameterSet::default())
    }

    #[test]
    fn test_save_load_roundtrip() {
        let path = std::env::temp_dir().join(format!("{}_hall.gjt", Uuid::new_v4()));
        let params = ParameterSet {
            roof_style: RoofStyle::Hip,
            x_rooms: 5,
            removed_pillars: [GridCell::new(1, 1)].into_iter().collect(),
            ..Default::default()
        };
        let template = Template::new("庑殿五间", params);
        save(&template, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let raw: [u8; PREAMBLE_LEN] = bytes[..PREAMBLE_LEN].try_into().unwrap();
        let preamble = Preamble::parse(&raw).unwrap();
        assert_eq!(preamble.version, VERSION);
        assert_eq!(preamble.packed_len as usize, bytes.len() - PREAMBLE_LEN);

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, template);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bad_signature() {
        let mut bytes = b"XXXX".to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(matches!(decode(&mut bytes.as_slice()), Err(FileError::InvalidFormat(_))));
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut bytes = encode(&hall()).unwrap();
        bytes[4..6].copy_from_slice(&(VERSION + 1).to_le_bytes());
        assert!(matches!(
            decode(&mut bytes.as_slice()),
            Err(FileError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_truncated_data() {
        let bytes = encode(&hall()).unwrap();
        let truncated = &bytes[..bytes.len() - 4];
        assert!(matches!(decode(&mut &truncated[..]), Err(FileError::InvalidFormat(_))));

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(decode(&mut padded.as_slice()), Err(FileError::InvalidFormat(_))));

        // 文件头不完整
        assert!(matches!(decode(&mut &bytes[..8]), Err(FileError::Io(_))));
    }

    #[test]
    fn test_oversized_lengths_rejected() {
        // 声明的压缩长度远大于实际数据，不会按声明长度分配
        let mut bytes = encode(&hall()).unwrap();
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&mut bytes.as_slice()), Err(FileError::InvalidFormat(_))));

        let mut bytes = encode(&hall()).unwrap();
        bytes[12..16].copy_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        assert!(matches!(decode(&mut bytes.as_slice()), Err(FileError::InvalidFormat(_))));

        // 解压长度与声明不符
        let mut bytes = encode(&hall()).unwrap();
        let payload_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        bytes[12..16].copy_from_slice(&(payload_len - 1).to_le_bytes());
        assert!(decode(&mut bytes.as_slice()).is_err());
    }
}
