//! 工程归档：ZIP 中保存 metadata.json 和每个图层一张 PNG

use crate::error::{Error, FormatError, Result};
use crate::layer_png::{decode_layer_png, encode_layer_png};
use crate::model::{Layer, LayerId, Palette, Project, Rgba, Sprite};
use crate::util::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 元数据格式版本
pub const CURRENT_VERSION: u32 = 1;

/// 元数据条目名
pub const METADATA_ENTRY: &str = "metadata.json";

/// 第 `i` 个图层的图像条目名
pub fn layer_entry_name(i: usize) -> String {
    format!("{:04}.png", i)
}

// ============== 元数据结构 ==============

/// metadata.json 顶层结构，缺少的字段取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
    #[serde(default)]
    pub sprites: Vec<SpriteDescriptor>,
    #[serde(default)]
    pub palettes: Vec<PaletteDescriptor>,
    /// 主调色板在 `palettes` 中的位置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_palette: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    #[serde(default = "default_layer_name")]
    pub name: String,
    #[serde(default)]
    pub offset: [i32; 3],
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// 图层调色板在 `palettes` 中的位置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteDescriptor {
    #[serde(default)]
    pub name: String,
    /// 去重图层列表中的位置
    #[serde(default)]
    pub layers: Vec<usize>,
    /// -1 表示没有当前图层
    #[serde(default = "default_cur_layer")]
    pub cur_layer: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub colors: Vec<[f32; 4]>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_layer_name() -> String {
    "layer".to_string()
}

fn default_visible() -> bool {
    true
}

fn default_cur_layer() -> i64 {
    -1
}

// ============== 保存 ==============

/// 按首次出现顺序收集所有精灵引用的图层
pub fn dedup_layers(project: &Project) -> Vec<LayerId> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for sprite in &project.sprites {
        for &id in sprite.layers() {
            if project.layer(id).is_none() {
                log::warn!("精灵 {:?} 引用了不存在的图层 {:?}，已跳过", sprite.name, id);
                continue;
            }
            if seen.insert(id) {
                order.push(id);
            }
        }
    }
    order
}

/// 生成元数据，返回值中的图层顺序即图像条目顺序
pub fn build_metadata(project: &Project) -> (ProjectMeta, Vec<LayerId>) {
    let order = dedup_layers(project);
    let index_of: HashMap<LayerId, usize> =
        order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let layers = order
        .iter()
        .filter_map(|&id| project.layer(id))
        .map(|l| LayerDescriptor {
            name: l.name.clone(),
            offset: l.offset(),
            visible: l.visible,
            palette: l.palette.map(|p| p.index() as i64),
        })
        .collect();

    let sprites = project
        .sprites
        .iter()
        .map(|s| SpriteDescriptor {
            name: s.name.clone(),
            layers: s
                .layers()
                .iter()
                .filter_map(|id| index_of.get(id).copied())
                .collect(),
            cur_layer: s.cur_layer().map_or(-1, |i| i as i64),
        })
        .collect();

    let palettes = project
        .palettes()
        .iter()
        .map(|p| PaletteDescriptor {
            name: p.name.clone(),
            colors: p.colors.iter().map(|c| [c.r, c.g, c.b, c.a]).collect(),
        })
        .collect();

    let meta = ProjectMeta {
        version: CURRENT_VERSION,
        layers,
        sprites,
        palettes,
        main_palette: project.main_palette_id().map(|id| id.index() as i64),
    };
    (meta, order)
}

fn entry_options(level: Option<i64>) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(level)
}

/// 把工程写入 ZIP
pub fn write_project<W: Write + Seek>(w: W, project: &Project, level: Option<i64>) -> Result<W> {
    let (meta, order) = build_metadata(project);
    let json = serde_json::to_string_pretty(&meta)?;

    let mut zip = ZipWriter::new(w);
    zip.start_file(METADATA_ENTRY, entry_options(level))?;
    zip.write_all(json.as_bytes())?;

    for (i, id) in order.iter().enumerate() {
        let Some(layer) = project.layer(*id) else {
            continue;
        };
        let png = encode_layer_png(layer.grid())?;
        zip.start_file(layer_entry_name(i), entry_options(level))?;
        zip.write_all(&png)?;
    }

    log::debug!(
        "工程归档: {} 个精灵, {} 个图层, {} 个调色板",
        meta.sprites.len(),
        order.len(),
        meta.palettes.len()
    );
    Ok(zip.finish()?)
}

/// 保存工程文件
pub fn save_project_file(path: &Path, project: &Project, level: Option<i64>) -> Result<()> {
    write_atomic(path, |file| {
        let mut w = write_project(BufWriter::new(file), project, level)?;
        w.flush()?;
        Ok(())
    })
}

// ============== 读取 ==============

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(FormatError::MissingEntry(name.to_string()).into())
        }
        Err(e) => return Err(Error::Archive(e)),
    };
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// 按元数据重建工程
pub fn project_from_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    meta: ProjectMeta,
) -> Result<Project> {
    if meta.version > CURRENT_VERSION {
        return Err(FormatError::UnsupportedVersion(meta.version).into());
    }

    let mut project = Project::new();

    for desc in meta.palettes {
        let colors = desc
            .colors
            .iter()
            .map(|&[r, g, b, a]| Rgba::new(r, g, b, a))
            .collect();
        project.add_palette(Palette::new(desc.name, colors));
    }

    let mut layer_ids = Vec::with_capacity(meta.layers.len());
    for (i, desc) in meta.layers.into_iter().enumerate() {
        let data = read_entry(archive, &layer_entry_name(i))?;
        let mut grid = decode_layer_png(&data)?;
        grid.set_origin(desc.offset);

        let mut layer = Layer::new(grid).with_name(desc.name);
        layer.visible = desc.visible;
        layer.palette = desc
            .palette
            .and_then(|p| usize::try_from(p).ok())
            .and_then(|p| project.palette_id(p));
        if desc.palette.is_some() && layer.palette.is_none() {
            log::warn!("图层 {:?} 的调色板序号越界，已忽略", layer.name);
        }
        layer_ids.push(project.add_layer(layer));
    }

    for (si, desc) in meta.sprites.into_iter().enumerate() {
        let mut sprite = Sprite::new(desc.name);
        for li in desc.layers {
            let id = layer_ids
                .get(li)
                .copied()
                .ok_or(FormatError::LayerIndexOutOfRange { sprite: si, index: li })?;
            sprite.push_layer(id);
        }
        sprite.set_cur_layer(usize::try_from(desc.cur_layer).ok());
        project.sprites.push(sprite);
    }

    // 主调色板序号缺失或越界时退回第一个调色板
    let main = meta
        .main_palette
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| project.palette_id(i))
        .or_else(|| project.palette_id(0));
    project.set_main_palette(main);

    Ok(project)
}

/// 从 ZIP 读取工程
pub fn read_project<R: Read + Seek>(r: R) -> Result<Project> {
    let mut archive = ZipArchive::new(r)?;
    let data = read_entry(&mut archive, METADATA_ENTRY)?;
    let meta: ProjectMeta = serde_json::from_slice(&data)?;
    project_from_archive(&mut archive, meta)
}

/// 读取工程文件
pub fn load_project_file(path: &Path) -> Result<Project> {
    let file = File::open(path)?;
    read_project(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bounds, VoxelGrid};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn roundtrip(project: &Project) -> Project {
        let bytes = write_project(Cursor::new(Vec::new()), project, None)
            .unwrap()
            .into_inner();
        read_project(Cursor::new(bytes)).unwrap()
    }

    fn entry_names(bytes: Vec<u8>) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn color_layer(name: &str, min: [i32; 3], size: [u32; 3]) -> Layer {
        let mut grid = VoxelGrid::new_color(Bounds::new(min, size));
        grid.set_color(min, Rgba::from_bytes([9, 8, 7, 255]));
        Layer::new(grid).with_name(name)
    }

    #[test]
    fn shared_layer_written_once() {
        let mut project = Project::new();
        let shared = project.add_layer(color_layer("shared", [0, 0, 0], [2, 2, 2]));
        let own = project.add_layer(color_layer("own", [-1, 0, 3], [1, 1, 1]));

        let mut a = Sprite::new("a");
        a.push_layer(shared);
        let mut b = Sprite::new("b");
        b.push_layer(own);
        b.push_layer(shared);
        project.sprites = vec![a, b];

        let (meta, order) = build_metadata(&project);
        assert_eq!(order, vec![shared, own]);
        assert_eq!(meta.sprites[0].layers, vec![0]);
        assert_eq!(meta.sprites[1].layers, vec![1, 0]);

        let bytes = write_project(Cursor::new(Vec::new()), &project, None)
            .unwrap()
            .into_inner();
        assert_eq!(
            entry_names(bytes),
            vec!["0000.png", "0001.png", "metadata.json"]
        );

        let loaded = roundtrip(&project);
        assert_eq!(loaded.layer_count(), 2);
        assert_eq!(loaded.sprites[0].layers()[0], loaded.sprites[1].layers()[1]);
        let layer = loaded.layer(loaded.sprites[1].layers()[0]).unwrap();
        assert_eq!(layer.name, "own");
        assert_eq!(layer.offset(), [-1, 0, 3]);
        assert_eq!(
            loaded.bake_sprite(&loaded.sprites[1]),
            project.bake_sprite(&project.sprites[1])
        );
    }

    #[test]
    fn palettes_and_indexed_layers_roundtrip() {
        let mut project = Project::new();
        project.add_palette(Palette::new("unused", vec![]));
        let pal = project.add_palette(Palette::new(
            "main",
            vec![Rgba::TRANSPARENT, Rgba::from_bytes([255, 0, 0, 255])],
        ));
        project.set_main_palette(Some(pal));

        let mut grid = VoxelGrid::new_indexed(Bounds::new([1, 2, 3], [2, 1, 1]));
        grid.set_index([2, 2, 3], 1);
        let mut layer = Layer::new(grid).with_name("ind");
        layer.palette = Some(pal);
        layer.visible = false;
        project.add_sprite_with_layer("s", layer);

        let loaded = roundtrip(&project);
        assert_eq!(loaded.palettes(), project.palettes());
        assert_eq!(loaded.main_palette_id(), Some(pal));
        let l = loaded.layer(loaded.sprites[0].layers()[0]).unwrap();
        assert!(!l.visible);
        assert_eq!(l.palette, Some(pal));
        assert_eq!(l.grid(), project.layer(project.sprites[0].layers()[0]).unwrap().grid());
    }

    #[test]
    fn cur_layer_roundtrip() {
        let mut project = Project::new();
        let a = project.add_layer(color_layer("a", [0, 0, 0], [1, 1, 1]));
        let b = project.add_layer(color_layer("b", [0, 0, 0], [1, 1, 1]));
        let mut s = Sprite::new("s");
        s.push_layer(a);
        s.push_layer(b);
        s.set_cur_layer(Some(1));
        let mut empty = Sprite::new("empty");
        empty.set_cur_layer(None);
        project.sprites = vec![s, empty];

        let loaded = roundtrip(&project);
        assert_eq!(loaded.sprites[0].cur_layer(), Some(1));
        assert_eq!(loaded.sprites[1].cur_layer(), None);
        assert!(loaded.sprites[1].layers().is_empty());
    }

    #[test]
    fn single_voxel_roundtrip() {
        let mut project = Project::new();
        project.add_sprite_with_layer("one", color_layer("l", [5, 5, 5], [1, 1, 1]));
        let loaded = roundtrip(&project);
        assert_eq!(
            loaded.bake_sprite(&loaded.sprites[0]),
            project.bake_sprite(&project.sprites[0])
        );
    }

    fn archive_with_metadata(json: &str, layers: &[VoxelGrid]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(METADATA_ENTRY, SimpleFileOptions::default()).unwrap();
        zip.write_all(json.as_bytes()).unwrap();
        for (i, grid) in layers.iter().enumerate() {
            zip.start_file(layer_entry_name(i), SimpleFileOptions::default())
                .unwrap();
            zip.write_all(&encode_layer_png(grid).unwrap()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn old_archive_without_palettes() {
        let grid = VoxelGrid::new_color(Bounds::new([0; 3], [1, 1, 1]));
        let json = r#"{
  "layers": [{"name": "main layer", "offset": [0, 0, 0], "visible": true}],
  "sprites": [{"curLayer": 0, "layers": [0], "name": "s"}],
  "version": 1
}"#;
        let project = read_project(Cursor::new(archive_with_metadata(json, &[grid]))).unwrap();
        assert!(project.palettes().is_empty());
        assert_eq!(project.main_palette_id(), None);
        assert!(project.main_palette().colors.is_empty());
        assert_eq!(project.sprites[0].cur_layer(), Some(0));
    }

    #[test]
    fn main_palette_falls_back_to_first() {
        let json = r#"{"version": 1, "palettes": [{"name": "a", "colors": [[1, 0, 0, 1]]}], "mainPalette": 4}"#;
        let project = read_project(Cursor::new(archive_with_metadata(json, &[]))).unwrap();
        assert_eq!(project.main_palette().name, "a");

        let json = r#"{"version": 1, "palettes": [{"name": "a"}, {"name": "b"}], "mainPalette": -1}"#;
        let project = read_project(Cursor::new(archive_with_metadata(json, &[]))).unwrap();
        assert_eq!(project.main_palette().name, "a");
    }

    #[test]
    fn layer_palette_out_of_range_is_dropped() {
        let grid = VoxelGrid::new_indexed(Bounds::new([0; 3], [1, 1, 1]));
        let json = r#"{
  "palettes": [{"name": "a"}],
  "layers": [
    {"name": "neg", "palette": -1},
    {"name": "far", "palette": 5},
    {"name": "ok", "palette": 0}
  ],
  "sprites": [{"name": "s", "layers": [0, 1, 2]}]
}"#;
        let bytes = archive_with_metadata(json, &[grid.clone(), grid.clone(), grid]);
        let project = read_project(Cursor::new(bytes)).unwrap();
        let palettes: Vec<_> = project.sprites[0]
            .layers()
            .iter()
            .map(|&id| project.layer(id).unwrap().palette)
            .collect();
        assert_eq!(palettes, vec![None, None, project.palette_id(0)]);
    }

    #[test]
    fn empty_layer_keeps_offset() {
        let mut project = Project::new();
        let grid = VoxelGrid::new_color(Bounds::new([4, -2, 7], [3, 0, 2]));
        project.add_sprite_with_layer("flat", Layer::new(grid).with_name("empty"));

        let loaded = roundtrip(&project);
        let layer = loaded.layer(loaded.sprites[0].layers()[0]).unwrap();
        assert_eq!(layer.name, "empty");
        assert_eq!(layer.offset(), [4, -2, 7]);
        assert_eq!(layer.bounds(), Bounds::new([4, -2, 7], [3, 0, 2]));
        assert!(layer.bounds().is_empty());
    }

    #[test]
    fn broken_archives_fail() {
        let json = r#"{"layers": [{"name": "x"}]}"#;
        let err = read_project(Cursor::new(archive_with_metadata(json, &[]))).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::MissingEntry(ref n)) if n == "0000.png"));

        let json = r#"{"sprites": [{"name": "s", "layers": [3]}]}"#;
        let err = read_project(Cursor::new(archive_with_metadata(json, &[]))).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::LayerIndexOutOfRange { sprite: 0, index: 3 })
        ));

        let json = r#"{"version": 99}"#;
        let err = read_project(Cursor::new(archive_with_metadata(json, &[]))).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::UnsupportedVersion(99))));
    }
}
