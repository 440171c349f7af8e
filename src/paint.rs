//! Paint3D (.3mp) 文件与 BGRA 像素流编解码
//!
//! 像素流按 [`PAINT_SCAN`] 顺序排列，每个体素 4 字节（B, G, R, A），
//! 支持三种压缩方式：原始、游程编码、raw deflate。

use crate::coord::{from_paint_axes, to_paint_axes, PAINT_SCAN};
use crate::error::{Error, FormatError, Result};
use crate::model::{Bounds, Layer, Project, Rgba, VoxelGrid};
use crate::util::{ensure_extension, write_atomic, ByteReader};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// 文件标识，无结尾空字符
pub const MAGIC: &[u8; 3] = b"3MP";

/// 写出时使用的版本
pub const CURRENT_VERSION: u32 = 2;

/// 游程记录的最大长度
const MAX_RUN: usize = 255;

/// 像素流压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// 原始 BGRA
    Raw,
    /// (数量, BGRA) 游程记录
    #[serde(rename = "rle")]
    #[value(name = "rle")]
    RunLength,
    /// raw deflate 压缩的原始流
    Deflate,
}

impl Compression {
    pub fn from_byte(b: u8) -> std::result::Result<Self, FormatError> {
        match b {
            0 => Ok(Compression::Raw),
            1 => Ok(Compression::RunLength),
            2 => Ok(Compression::Deflate),
            other => Err(FormatError::UnsupportedCompression(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Compression::Raw => 0,
            Compression::RunLength => 1,
            Compression::Deflate => 2,
        }
    }
}

/// 颜色分量量化：<=0 为 0，>=1 为 255，其余四舍五入
pub fn pack_color_comp(f: f32) -> u8 {
    if f <= 0.0 {
        return 0;
    }
    if f >= 1.0 {
        return 255;
    }
    (f * 255.0).round() as u8
}

fn pack_bgra(c: Rgba) -> [u8; 4] {
    let [r, g, b, a] = c.to_bytes();
    [b, g, r, a]
}

fn unpack_bgra(bytes: &[u8]) -> Rgba {
    Rgba::from_bytes([bytes[2], bytes[1], bytes[0], bytes[3]])
}

/// 按扫描顺序输出原始 BGRA 流
fn raw_stream(grid: &VoxelGrid, colors: &[Rgba]) -> Vec<u8> {
    let bounds = grid.bounds();
    let mut buf = Vec::with_capacity(bounds.volume() * 4);
    for local in PAINT_SCAN.scan(bounds.size) {
        buf.extend_from_slice(&pack_bgra(colors[bounds.linear_index(local)]));
    }
    buf
}

/// 游程编码：相同颜色连续超过 255 个时拆成多条记录
fn run_length_encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut voxels = raw.chunks_exact(4);
    let Some(first) = voxels.next() else {
        return out;
    };

    let mut current = first;
    let mut count = 1usize;
    for voxel in voxels {
        if voxel == current && count < MAX_RUN {
            count += 1;
            continue;
        }
        out.push(count as u8);
        out.extend_from_slice(current);
        current = voxel;
        count = 1;
    }
    out.push(count as u8);
    out.extend_from_slice(current);
    out
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

/// 解压至多 `needed + 1` 字节，多出的一个字节用于发现多余数据
fn inflate(data: &[u8], needed: usize) -> std::result::Result<Vec<u8>, FormatError> {
    let mut decoder = flate2::read::DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .by_ref()
        .take(needed as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::Inflate(e.to_string()))?;
    Ok(out)
}

/// 将颜色网格编码为像素流
pub fn encode_stream(grid: &VoxelGrid, mode: Compression) -> Result<Vec<u8>> {
    let colors = grid.colors().ok_or(Error::NotColorData)?;
    let raw = raw_stream(grid, colors);
    match mode {
        Compression::Raw => Ok(raw),
        Compression::RunLength => Ok(run_length_encode(&raw)),
        Compression::Deflate => deflate(&raw),
    }
}

/// 体素总数，溢出视为格式错误
fn voxel_count(dims: [u32; 3]) -> std::result::Result<usize, FormatError> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
        .filter(|n| n.checked_mul(4).is_some())
        .ok_or(FormatError::GridTooLarge(dims))
}

/// 从像素流解码颜色网格，`dims` 为编辑器轴向的尺寸，网格位于原点
pub fn decode_stream(bytes: &[u8], dims: [u32; 3], mode: Compression) -> Result<VoxelGrid> {
    let total = voxel_count(dims)?;
    match mode {
        Compression::Raw => decode_raw(bytes, dims, total),
        Compression::RunLength => decode_run_length(bytes, dims, total),
        Compression::Deflate => {
            let raw = inflate(bytes, total * 4)?;
            decode_raw(&raw, dims, total)
        }
    }
}

fn decode_raw(bytes: &[u8], dims: [u32; 3], total: usize) -> Result<VoxelGrid> {
    let needed = total * 4;
    if bytes.len() < needed {
        return Err(FormatError::Truncated {
            needed,
            available: bytes.len(),
        }
        .into());
    }
    if bytes.len() > needed {
        log::warn!("像素流末尾有 {} 字节多余数据，已忽略", bytes.len() - needed);
    }

    let bounds = Bounds::new([0; 3], dims);
    let mut grid = VoxelGrid::new_color(bounds);
    if let Some(colors) = grid.colors_mut() {
        for (local, voxel) in PAINT_SCAN.scan(dims).zip(bytes.chunks_exact(4)) {
            colors[bounds.linear_index(local)] = unpack_bgra(voxel);
        }
    }
    Ok(grid)
}

fn decode_run_length(bytes: &[u8], dims: [u32; 3], total: usize) -> Result<VoxelGrid> {
    // 每条记录最多 255 个体素，先确认数据量足够再分配网格
    let max_voxels = (bytes.len() / 5).saturating_mul(MAX_RUN);
    if max_voxels < total {
        return Err(FormatError::Truncated {
            needed: total.div_ceil(MAX_RUN) * 5,
            available: bytes.len(),
        }
        .into());
    }

    let bounds = Bounds::new([0; 3], dims);
    let mut grid = VoxelGrid::new_color(bounds);
    let mut reader = ByteReader::new(bytes);
    let mut cursor = PAINT_SCAN.scan(dims);
    let mut filled = 0usize;

    if let Some(colors) = grid.colors_mut() {
        while filled < total {
            let offset = reader.position();
            let record = reader.take(5)?;
            let count = usize::from(record[0]);
            if count == 0 {
                return Err(FormatError::ZeroRun { offset }.into());
            }
            if filled + count > total {
                return Err(FormatError::RunOverflow { total }.into());
            }
            let color = unpack_bgra(&record[1..]);
            for local in cursor.by_ref().take(count) {
                colors[bounds.linear_index(local)] = color;
            }
            filled += count;
        }
    }

    let trailing = reader.rest().len();
    if trailing > 0 {
        log::warn!("游程数据末尾有 {} 字节多余数据，已忽略", trailing);
    }
    Ok(grid)
}

/// Paint3D 写出选项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaintOptions {
    pub compression: Compression,
    pub voxel_scale: [f32; 3],
}

impl Default for PaintOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Deflate,
            voxel_scale: [1.0; 3],
        }
    }
}

/// 解析后的 Paint3D 文件
#[derive(Debug, Clone, PartialEq)]
pub struct PaintFile {
    pub version: u32,
    pub voxel_scale: [f32; 3],
    pub compression: Compression,
    pub grid: VoxelGrid,
}

/// 写出 Paint3D 文件（版本 2）
pub fn write_paint<W: Write>(mut w: W, grid: &VoxelGrid, options: &PaintOptions) -> Result<()> {
    let stream = encode_stream(grid, options.compression)?;

    w.write_all(MAGIC)?;
    w.write_all(&CURRENT_VERSION.to_le_bytes())?;
    for d in to_paint_axes(grid.size()) {
        w.write_all(&d.to_le_bytes())?;
    }
    for s in options.voxel_scale {
        w.write_all(&s.to_le_bytes())?;
    }
    w.write_all(&[options.compression.as_byte()])?;
    w.write_all(&stream)?;
    w.flush()?;
    Ok(())
}

/// 读取 Paint3D 文件（版本 1 或 2）
pub fn read_paint<R: Read>(mut r: R) -> Result<PaintFile> {
    let mut data = Vec::new();
    r.read_to_end(&mut data)?;
    let mut reader = ByteReader::new(&data);

    let magic = reader.take(3)?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic {
            expected: "3MP".to_string(),
            found: String::from_utf8_lossy(magic).into_owned(),
        }
        .into());
    }

    let version = reader.u32()?;
    if version != 1 && version != 2 {
        return Err(FormatError::UnsupportedVersion(version).into());
    }

    let file_dims = [reader.u32()?, reader.u32()?, reader.u32()?];
    let voxel_scale = if version == 2 {
        [reader.f32()?, reader.f32()?, reader.f32()?]
    } else {
        [1.0; 3]
    };
    let compression = Compression::from_byte(reader.u8()?)?;

    log::debug!(
        "3MP v{}: {}x{}x{} 压缩方式 {:?}",
        version,
        file_dims[0],
        file_dims[1],
        file_dims[2],
        compression
    );

    let grid = decode_stream(reader.rest(), from_paint_axes(file_dims), compression)?;
    Ok(PaintFile {
        version,
        voxel_scale,
        compression,
        grid,
    })
}

/// 导出工程中的一个精灵为 .3mp 文件，返回实际写入的路径
pub fn export_paint_file(
    path: &Path,
    project: &Project,
    sprite_index: usize,
    options: &PaintOptions,
) -> Result<PathBuf> {
    let sprite = project
        .sprites
        .get(sprite_index)
        .ok_or(Error::NoSuchSprite(sprite_index))?;
    let path = ensure_extension(path, "3mp");

    let grid = project
        .bake_sprite(sprite)
        .to_color(project.sprite_palette(sprite));

    write_atomic(&path, |file| {
        write_paint(BufWriter::new(file), &grid, options)
    })?;
    log::debug!("已导出精灵 {:?} 到 {}", sprite.name, path.display());
    Ok(path)
}

/// 导入 .3mp 文件为新精灵，返回精灵序号
pub fn import_paint_file(path: &Path, project: &mut Project) -> Result<usize> {
    let file = File::open(path)?;
    let paint = read_paint(BufReader::new(file))?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let layer = Layer::new(paint.grid).with_name("main layer");
    Ok(project.add_sprite_with_layer(name, layer))
}
