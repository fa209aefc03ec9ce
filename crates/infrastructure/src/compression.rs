//! zlib payload compression for TASK and RESULTS frames.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use simfarm_core::{SimFarmError, SimFarmResult};

pub fn compress(bytes: &[u8]) -> SimFarmResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::fast());
    encoder
        .write_all(bytes)
        .map_err(|e| SimFarmError::Compression(format!("压缩失败: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SimFarmError::Compression(format!("压缩失败: {e}")))
}

/// 解压, 输出超过 `limit` 字节视为错误
pub fn decompress(bytes: &[u8], limit: usize) -> SimFarmResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes).take(limit as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SimFarmError::Compression(format!("解压失败: {e}")))?;

    if out.len() > limit {
        return Err(SimFarmError::Compression(format!(
            "解压后的负载超过上限 {limit} 字节"
        )));
    }

    Ok(out)
}
