//! 配置文件加载与管理

use crate::paint::{Compression, PaintOptions};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 当前目录下的配置文件名
pub const LOCAL_CONFIG: &str = "vxio.toml";

/// 主配置结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Paint3D 导出配置
    pub paint: PaintConfig,
    /// 图块集导出配置
    pub atlas: AtlasConfig,
    /// 工程归档配置
    pub project: ProjectConfig,
}

/// Paint3D 导出配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaintConfig {
    /// 像素流压缩方式: raw / rle / deflate
    pub compression: Compression,
    /// 写入文件头的体素缩放
    pub voxel_scale: [f32; 3],
}

/// 图块集导出配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// zlib 压缩级别 0-9
    pub level: u32,
}

/// 工程归档配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// ZIP deflate 压缩级别 0-9
    pub level: i64,
}

// ============== 默认值 ==============

impl Default for PaintConfig {
    fn default() -> Self {
        let options = PaintOptions::default();
        Self {
            compression: options.compression,
            voxel_scale: options.voxel_scale,
        }
    }
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            level: crate::atlas::DEFAULT_LEVEL,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl PaintConfig {
    pub fn options(&self) -> PaintOptions {
        PaintOptions {
            compression: self.compression,
            voxel_scale: self.voxel_scale,
        }
    }
}

// ============== 配置加载 ==============

impl Config {
    /// 从文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// 获取默认配置文件路径
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vxio").join("config.toml"))
    }

    /// 按优先级加载配置：
    /// 1. 当前目录的 vxio.toml
    /// 2. 用户配置目录的 config.toml
    /// 3. 默认配置
    pub fn load() -> Self {
        // 当前目录
        let local_config = Path::new(LOCAL_CONFIG);
        if local_config.exists() {
            match Self::load_from_file(local_config) {
                Ok(config) => {
                    log::info!("已加载配置: {}", LOCAL_CONFIG);
                    return config;
                }
                Err(e) => log::warn!("无法加载配置 {}: {}", LOCAL_CONFIG, e),
            }
        }

        // 用户配置目录
        if let Some(user_config) = Self::default_config_path() {
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("已加载配置: {}", user_config.display());
                        return config;
                    }
                    Err(e) => log::warn!("无法加载配置 {}: {}", user_config.display(), e),
                }
            }
        }

        // 默认配置
        Self::default()
    }

    /// 生成默认配置文件内容
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }
}
