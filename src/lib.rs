//! 体素精灵导入导出编解码
//!
//! 支持 Paint3D `.3mp` 文件、游戏图块集 `.bin` 文件与 ZIP 工程归档

pub mod atlas;
pub mod config;
pub mod coord;
pub mod error;
pub mod layer_png;
pub mod model;
pub mod paint;
pub mod project;
pub mod util;

pub use atlas::{export_atlas_file, import_tiles, read_atlas_file, AtlasReport, Tile};
pub use config::Config;
pub use error::{Error, FormatError, Result};
pub use model::{Bounds, DataKind, Layer, LayerId, Palette, PaletteId, Project, Rgba, Sprite, VoxelGrid};
pub use paint::{
    export_paint_file, import_paint_file, read_paint, write_paint, Compression, PaintFile, PaintOptions,
};
pub use project::{load_project_file, read_project, save_project_file, write_project};
