//! 体素精灵导入导出工具

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use vxio::{
    atlas, export_atlas_file, export_paint_file, import_paint_file, load_project_file, read_paint,
    save_project_file, Compression, Config, Project,
};

/// 体素精灵导入导出工具
#[derive(Parser)]
#[command(name = "vxio", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 导入 .3mp 文件（或目录）到工程归档
    Import {
        /// .3mp 文件或包含 .3mp 的目录
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// 工程归档路径
        #[arg(short, long)]
        output: PathBuf,
        /// 追加到已有工程
        #[arg(long)]
        append: bool,
    },
    /// 导出精灵为 Paint3D .3mp 文件
    Export {
        /// 工程归档路径
        project: PathBuf,
        /// 输出文件路径
        #[arg(short, long)]
        output: PathBuf,
        /// 精灵序号
        #[arg(long, default_value_t = 0)]
        sprite: usize,
        /// 压缩方式（默认取配置）
        #[arg(long, value_enum)]
        compression: Option<Compression>,
    },
    /// 导出全部精灵为图块集 .bin
    Atlas {
        /// 工程归档路径
        project: PathBuf,
        /// 输出文件路径
        #[arg(short, long)]
        output: PathBuf,
    },
    /// 查看文件摘要
    Inspect {
        /// .3mp、.bin 或工程归档
        file: PathBuf,
    },
    /// 生成默认配置文件
    Config {
        /// 输出路径（默认: vxio.toml）
        #[arg(short, long, default_value = "vxio.toml")]
        output: PathBuf,
        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

fn load_config(config_path: Option<PathBuf>) -> Config {
    if let Some(path) = config_path {
        match Config::load_from_file(&path) {
            Ok(config) => {
                log::info!("已加载配置: {}", path.display());
                return config;
            }
            Err(e) => {
                log::warn!("无法加载配置 {}: {}", path.display(), e);
            }
        }
    }
    Config::load()
}

/// 展开输入列表，目录递归收集其中的 .3mp 文件
fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("3mp"))
            })
            .collect();
        found.sort();
        files.extend(found);
    }
    files
}

fn inspect(path: &Path) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("无法读取 {}", path.display()))?;

    if data.starts_with(vxio::paint::MAGIC) {
        let paint = read_paint(data.as_slice())?;
        let size = paint.grid.size();
        let solid = paint
            .grid
            .colors()
            .map(|c| c.iter().filter(|c| !c.is_transparent()).count())
            .unwrap_or(0);
        println!("Paint3D 文件 v{}", paint.version);
        println!("  尺寸: {}x{}x{}", size[0], size[1], size[2]);
        println!("  缩放: {:?}", paint.voxel_scale);
        println!("  压缩: {:?}", paint.compression);
        println!("  实心体素: {}", solid);
    } else if data.get(..4) == Some(&atlas::MAGIC.to_le_bytes()[..]) {
        let tiles = atlas::decode(&data)?;
        println!("图块集: {} 个精灵", tiles.len());
        for (i, tile) in tiles.iter().enumerate() {
            let [w, h, d] = tile.size;
            println!("  [{}] {} {}x{}x{}", i, tile.name, w, h, d);
        }
    } else if data.starts_with(b"PK") {
        let project = vxio::read_project(std::io::Cursor::new(data))?;
        print_project(&project);
    } else {
        anyhow::bail!("无法识别的文件格式: {}", path.display());
    }
    Ok(())
}

fn print_project(project: &Project) {
    println!(
        "工程: {} 个精灵, {} 个图层, {} 个调色板",
        project.sprites.len(),
        project.layer_count(),
        project.palettes().len()
    );
    for (i, sprite) in project.sprites.iter().enumerate() {
        let b = project.sprite_bounds(sprite);
        println!(
            "  [{}] {} 图层 {} 尺寸 {}x{}x{}",
            i,
            sprite.name,
            sprite.layers().len(),
            b.size[0],
            b.size[1],
            b.size[2]
        );
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config);

    match cli.command {
        Commands::Import {
            inputs,
            output,
            append,
        } => {
            let files = collect_inputs(&inputs);
            if files.is_empty() {
                anyhow::bail!("没有找到 .3mp 文件");
            }

            let mut project = if append && output.exists() {
                load_project_file(&output)
                    .with_context(|| format!("无法读取工程 {}", output.display()))?
            } else {
                Project::new()
            };

            println!("导入 {} 个文件 -> {}", files.len(), output.display());
            let start = Instant::now();
            for file in &files {
                let index = import_paint_file(file, &mut project)
                    .with_context(|| format!("无法导入 {}", file.display()))?;
                println!("  [{}] {}", index, file.display());
            }
            save_project_file(&output, &project, Some(config.project.level))
                .with_context(|| format!("无法保存工程 {}", output.display()))?;
            println!(
                "完成! 共 {} 个精灵, 耗时: {:.2}s",
                project.sprites.len(),
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Export {
            project,
            output,
            sprite,
            compression,
        } => {
            let mut options = config.paint.options();
            if let Some(c) = compression {
                options.compression = c;
            }

            let start = Instant::now();
            let loaded = load_project_file(&project)
                .with_context(|| format!("无法读取工程 {}", project.display()))?;
            let path = export_paint_file(&output, &loaded, sprite, &options)
                .with_context(|| format!("无法导出精灵 {}", sprite))?;
            println!(
                "已导出: {} ({:?}), 耗时: {:.2}s",
                path.display(),
                options.compression,
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Atlas { project, output } => {
            let start = Instant::now();
            let loaded = load_project_file(&project)
                .with_context(|| format!("无法读取工程 {}", project.display()))?;
            let (path, report) = export_atlas_file(&output, &loaded, config.atlas.level)
                .with_context(|| format!("无法写入图块集 {}", output.display()))?;
            println!(
                "已导出: {} ({} 个精灵), 耗时: {:.2}s",
                path.display(),
                report.sprite_count,
                start.elapsed().as_secs_f64()
            );
            if !report.is_complete() {
                println!("警告: 以下精灵不是调色板索引数据, 已写入空白图块:");
                for name in &report.substituted {
                    println!("  - {}", name);
                }
            }
        }
        Commands::Inspect { file } => {
            inspect(&file)?;
        }
        Commands::Config { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("文件已存在: {:?}\n使用 --force 覆盖", output);
            }

            let default_config = Config::default();
            fs::write(&output, Config::default_toml()?)
                .with_context(|| format!("无法写入 {}", output.display()))?;
            println!("已生成配置文件: {:?}", output);
            println!("\n配置项说明:");
            println!("  [paint]");
            println!(
                "    compression = {:?}  # raw / rle / deflate",
                default_config.paint.compression
            );
            println!("    voxel_scale = {:?}", default_config.paint.voxel_scale);
            println!("  [atlas]");
            println!("    level = {}  # zlib 压缩级别", default_config.atlas.level);
            println!("  [project]");
            println!("    level = {}  # ZIP 压缩级别", default_config.project.level);
        }
    }

    Ok(())
}
