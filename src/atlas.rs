//! 图块集 (.bin) 二进制格式
//!
//! 文件头之后是一个 zlib 压缩块，解压后的布局为：
//! `[精灵数 × 图块头] [以空字符结尾的名称] [各精灵的调色板索引]`。

use crate::coord::ATLAS_SCAN;
use crate::error::{FormatError, Result};
use crate::model::{Bounds, DataKind, Layer, Project, VoxelGrid};
use crate::util::{ensure_extension, write_atomic, ByteReader};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// 格式与版本标识
pub const MAGIC: u32 = 0x1202_0800;

/// 单个图块头：宽、高、深、数据偏移、名称偏移（均为 u32）
pub const TILE_HEADER_SIZE: usize = 20;

/// 默认 zlib 压缩级别
pub const DEFAULT_LEVEL: u32 = 9;

/// 一个图块：名称、尺寸和按图块集扫描顺序排列的索引
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub name: String,
    pub size: [u32; 3],
    pub indices: Vec<u8>,
}

/// 导出结果；有精灵不是索引数据时导出不完整，但文件仍会写出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtlasReport {
    pub sprite_count: usize,
    /// 以全零数据代替的精灵名称
    pub substituted: Vec<String>,
}

impl AtlasReport {
    pub fn is_complete(&self) -> bool {
        self.substituted.is_empty()
    }
}

/// 各段的偏移与总长度
struct Layout {
    name_offsets: Vec<u32>,
    data_offsets: Vec<u32>,
    total_len: usize,
}

fn to_u32(n: usize) -> std::result::Result<u32, FormatError> {
    u32::try_from(n).map_err(|_| FormatError::AtlasTooLarge(n))
}

/// 第一遍：计算所有偏移
fn plan(tiles: &[Tile]) -> std::result::Result<Layout, FormatError> {
    let mut pos = tiles.len() * TILE_HEADER_SIZE;

    let mut name_offsets = Vec::with_capacity(tiles.len());
    for tile in tiles {
        name_offsets.push(to_u32(pos)?);
        pos += tile.name.len() + 1;
    }

    let mut data_offsets = Vec::with_capacity(tiles.len());
    for tile in tiles {
        data_offsets.push(to_u32(pos)?);
        pos += tile.indices.len();
    }

    to_u32(pos)?;
    Ok(Layout {
        name_offsets,
        data_offsets,
        total_len: pos,
    })
}

/// 构建未压缩的图块集缓冲区：先规划偏移，再一次性写出各段
pub fn build_buffer(tiles: &[Tile]) -> Result<Vec<u8>> {
    let layout = plan(tiles)?;
    let mut buf = Vec::with_capacity(layout.total_len);

    for (i, tile) in tiles.iter().enumerate() {
        for v in tile.size {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&layout.data_offsets[i].to_le_bytes());
        buf.extend_from_slice(&layout.name_offsets[i].to_le_bytes());
    }
    for tile in tiles {
        buf.extend_from_slice(tile.name.as_bytes());
        buf.push(0);
    }
    for tile in tiles {
        buf.extend_from_slice(&tile.indices);
    }

    debug_assert_eq!(buf.len(), layout.total_len);
    Ok(buf)
}

/// 名称在第一个空字符处截断
fn c_name(name: &str) -> String {
    match name.find('\0') {
        Some(end) => {
            log::warn!("精灵名称 {:?} 含有空字符，已截断", name);
            name[..end].to_string()
        }
        None => name.to_string(),
    }
}

/// 把工程中的精灵转成图块，非索引精灵以全零数据代替
pub fn collect_tiles(project: &Project) -> (Vec<Tile>, AtlasReport) {
    let mut report = AtlasReport {
        sprite_count: project.sprites.len(),
        substituted: Vec::new(),
    };

    let tiles = project
        .sprites
        .iter()
        .map(|sprite| {
            let bounds = project.sprite_bounds(sprite);
            let mut baked = project.bake_sprite(sprite);
            if baked.kind() != DataKind::Indexed {
                log::warn!("精灵 {:?} 是 RGB 数据，以空白图块代替", sprite.name);
                report.substituted.push(sprite.name.clone());
                baked = VoxelGrid::new_indexed(bounds);
            }

            let source = baked.indices().unwrap_or_default();
            let indices = ATLAS_SCAN
                .scan(bounds.size)
                .map(|local| source[bounds.linear_index(local)])
                .collect();

            Tile {
                name: c_name(&sprite.name),
                size: bounds.size,
                indices,
            }
        })
        .collect();

    (tiles, report)
}

/// 编码整个图块集文件
pub fn encode(tiles: &[Tile], level: u32) -> Result<Vec<u8>> {
    let buf = build_buffer(tiles)?;

    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder.write_all(&buf)?;
    let packed = encoder.finish()?;

    let mut out = Vec::with_capacity(16 + packed.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&to_u32(tiles.len())?.to_le_bytes());
    out.extend_from_slice(&to_u32(buf.len())?.to_le_bytes());
    out.extend_from_slice(&to_u32(packed.len())?.to_le_bytes());
    out.extend_from_slice(&packed);
    Ok(out)
}

/// 导出图块集文件，返回实际路径与导出报告
pub fn export_atlas_file(
    path: &Path,
    project: &Project,
    level: u32,
) -> Result<(PathBuf, AtlasReport)> {
    let path = ensure_extension(path, "bin");
    let (tiles, report) = collect_tiles(project);
    let data = encode(&tiles, level)?;

    write_atomic(&path, |file| {
        file.write_all(&data)?;
        Ok(())
    })?;
    log::debug!("已写入 {} 个图块到 {}", tiles.len(), path.display());
    Ok((path, report))
}

fn inflate(data: &[u8], declared: usize) -> std::result::Result<Vec<u8>, FormatError> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    // 多读一个字节以发现超长数据
    decoder
        .by_ref()
        .take(declared as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::Inflate(e.to_string()))?;
    if out.len() != declared {
        return Err(FormatError::LengthMismatch {
            declared,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn check_range(
    what: &'static str,
    offset: usize,
    len: usize,
    buffer_len: usize,
) -> std::result::Result<(), FormatError> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer_len => Ok(()),
        _ => Err(FormatError::OffsetOutOfRange {
            what,
            offset,
            len,
            buffer_len,
        }),
    }
}

/// 解析解压后的缓冲区
pub fn parse_buffer(buf: &[u8], count: usize) -> Result<Vec<Tile>> {
    let table_len = count
        .checked_mul(TILE_HEADER_SIZE)
        .ok_or(FormatError::AtlasTooLarge(usize::MAX))?;
    check_range("图块头表", 0, table_len, buf.len())?;

    let mut reader = ByteReader::new(buf);
    let mut tiles = Vec::with_capacity(count);
    for _ in 0..count {
        let size = [reader.u32()?, reader.u32()?, reader.u32()?];
        let data_offset = reader.u32()? as usize;
        let name_offset = reader.u32()? as usize;

        let data_len = size
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
            .ok_or(FormatError::GridTooLarge(size))?;
        check_range("图块数据", data_offset, data_len, buf.len())?;
        check_range("图块名称", name_offset, 1, buf.len())?;

        let name_bytes = &buf[name_offset..];
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::UnterminatedName("图块名称"))?;

        tiles.push(Tile {
            name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
            size,
            indices: buf[data_offset..data_offset + data_len].to_vec(),
        });
    }
    Ok(tiles)
}

/// 解码整个图块集文件；任何错误都不会返回部分结果
pub fn decode(bytes: &[u8]) -> Result<Vec<Tile>> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic {
            expected: format!("{:#010x}", MAGIC),
            found: format!("{:#010x}", magic),
        }
        .into());
    }
    let count = reader.u32()? as usize;
    let raw_len = reader.u32()? as usize;
    let packed_len = reader.u32()? as usize;
    let packed = reader.take(packed_len)?;

    let buf = inflate(packed, raw_len)?;
    parse_buffer(&buf, count)
}

pub fn read_atlas_file(path: &Path) -> Result<Vec<Tile>> {
    let data = fs::read(path)?;
    decode(&data)
}

/// 把图块作为索引精灵加入工程，使用主调色板，返回新精灵序号
pub fn import_tiles(project: &mut Project, tiles: Vec<Tile>) -> Vec<usize> {
    let palette = project.main_palette_id();
    tiles
        .into_iter()
        .map(|tile| {
            let bounds = Bounds::new([0; 3], tile.size);
            let mut grid = VoxelGrid::new_indexed(bounds);
            if let Some(dest) = grid.indices_mut() {
                for (local, &v) in ATLAS_SCAN.scan(tile.size).zip(&tile.indices) {
                    dest[bounds.linear_index(local)] = v;
                }
            }
            let mut layer = Layer::new(grid).with_name("main layer");
            layer.palette = palette;
            project.add_sprite_with_layer(tile.name, layer)
        })
        .collect()
}
