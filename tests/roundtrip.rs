use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

use vxio::{
    export_atlas_file, export_paint_file, import_paint_file, import_tiles, load_project_file,
    read_atlas_file, save_project_file, Bounds, Compression, Layer, Palette, PaintOptions, Project,
    Rgba, VoxelGrid,
};

fn color_project() -> Project {
    let mut grid = VoxelGrid::new_color(Bounds::new([-1, 0, 2], [3, 2, 4]));
    grid.set_color([-1, 0, 2], Rgba::from_bytes([255, 0, 0, 255]));
    grid.set_color([1, 1, 5], Rgba::from_bytes([0, 128, 255, 255]));
    grid.set_color([0, 1, 3], Rgba::from_bytes([12, 34, 56, 78]));

    let mut project = Project::new();
    project.add_sprite_with_layer("ship", Layer::new(grid).with_name("hull"));
    project
}

fn indexed_project() -> Project {
    let mut project = Project::new();
    let palette = project.add_palette(Palette::new(
        "main",
        vec![Rgba::TRANSPARENT, Rgba::from_bytes([255, 255, 255, 255])],
    ));
    project.set_main_palette(Some(palette));

    let mut grid = VoxelGrid::new_indexed(Bounds::new([0; 3], [2, 3, 1]));
    grid.set_index([1, 2, 0], 1);
    grid.set_index([0, 0, 0], 7);
    let mut layer = Layer::new(grid).with_name("tiles");
    layer.palette = Some(palette);
    let id = project.add_layer(layer);

    for name in ["a", "b"] {
        let mut sprite = vxio::Sprite::new(name);
        sprite.push_layer(id);
        project.sprites.push(sprite);
    }
    project
}

#[test]
fn paint_file_roundtrip_for_every_compression() {
    let dir = tempdir().unwrap();
    let project = color_project();
    let expected = project.bake_sprite(&project.sprites[0]);

    for compression in [Compression::Raw, Compression::RunLength, Compression::Deflate] {
        let options = PaintOptions {
            compression,
            voxel_scale: [0.5, 1.0, 2.0],
        };
        let path = export_paint_file(&dir.path().join("ship"), &project, 0, &options).unwrap();
        assert_eq!(path.extension().unwrap(), "3mp");

        let paint = vxio::read_paint(fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(paint.version, 2);
        assert_eq!(paint.compression, compression);
        assert_eq!(paint.voxel_scale, [0.5, 1.0, 2.0]);

        let mut reloaded = Project::new();
        let index = import_paint_file(&path, &mut reloaded).unwrap();
        let sprite = &reloaded.sprites[index];
        assert_eq!(sprite.name, "ship");
        assert_eq!(sprite.cur_layer(), Some(0));
        let baked = reloaded.bake_sprite(sprite);
        // 导入的网格位于原点
        assert_eq!(baked.size(), expected.size());
        assert_eq!(baked.colors().unwrap(), expected.colors().unwrap());
    }
}

#[test]
fn export_missing_sprite_fails_without_writing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("none.3mp");
    let err = export_paint_file(&path, &color_project(), 3, &PaintOptions::default()).unwrap_err();
    assert!(matches!(err, vxio::Error::NoSuchSprite(3)));
    assert!(!path.exists());
}

#[test]
fn atlas_file_roundtrip() {
    let dir = tempdir().unwrap();
    let project = indexed_project();
    let (path, report) = export_atlas_file(&dir.path().join("tiles.BIN"), &project, 9).unwrap();
    assert_eq!(path, dir.path().join("tiles.BIN"));
    assert!(report.is_complete());
    assert_eq!(report.sprite_count, 2);

    let tiles = read_atlas_file(&path).unwrap();
    assert_eq!(tiles.len(), 2);
    assert_eq!(tiles[0].name, "a");
    assert_eq!(tiles[1].size, [2, 3, 1]);

    let mut reloaded = Project::new();
    let indices = import_tiles(&mut reloaded, tiles);
    assert_eq!(indices, vec![0, 1]);
    let grid = reloaded.bake_sprite(&reloaded.sprites[0]);
    assert_eq!(grid.index_at([1, 2, 0]), Some(1));
    assert_eq!(grid.index_at([0, 0, 0]), Some(7));
    assert_eq!(grid.index_at([1, 1, 0]), Some(0));
}

#[test]
fn atlas_with_color_sprite_is_partial() {
    let dir = tempdir().unwrap();
    let mut project = indexed_project();
    let grid = VoxelGrid::new_color(Bounds::new([0; 3], [1, 1, 1]));
    project.add_sprite_with_layer("rgb", Layer::new(grid));

    let (path, report) = export_atlas_file(&dir.path().join("mixed"), &project, 1).unwrap();
    assert!(path.exists());
    assert!(!report.is_complete());
    assert_eq!(report.substituted, vec!["rgb".to_string()]);
    assert_eq!(read_atlas_file(&path).unwrap().len(), 3);
}

#[test]
fn project_file_roundtrip_keeps_shared_layers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("project.zip");
    let project = indexed_project();
    save_project_file(&path, &project, Some(6)).unwrap();

    let loaded = load_project_file(&path).unwrap();
    assert_eq!(loaded.layer_count(), 1);
    assert_eq!(loaded.sprites[0].layers(), loaded.sprites[1].layers());
    assert_eq!(loaded.palettes().len(), 1);
    assert_eq!(loaded.main_palette().name, "main");
    assert_eq!(
        loaded.bake_sprite(&loaded.sprites[1]),
        project.bake_sprite(&project.sprites[1])
    );
}

#[test]
fn color_project_roundtrips_through_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("ship.zip");
    let project = color_project();
    save_project_file(&archive, &project, None).unwrap();

    let loaded = load_project_file(&archive).unwrap();
    let layer = loaded.layer(loaded.sprites[0].layers()[0]).unwrap();
    assert_eq!(layer.name, "hull");
    assert_eq!(layer.offset(), [-1, 0, 2]);
    assert_eq!(
        loaded.bake_sprite(&loaded.sprites[0]),
        project.bake_sprite(&project.sprites[0])
    );
}
