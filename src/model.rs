//! 体素精灵的内存模型
//!
//! 图层存放在工程的图层池中，精灵只保存 [`LayerId`] 列表，
//! 同一图层可以被多个精灵共享。

use crate::paint::pack_color_comp;

/// RGBA 颜色，各通道取值 0..1
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    /// 透明黑
    pub const TRANSPARENT: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// 由 RGBA 字节构造
    pub fn from_bytes([r, g, b, a]: [u8; 4]) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }

    /// 量化为 RGBA 字节
    pub fn to_bytes(self) -> [u8; 4] {
        [
            pack_color_comp(self.r),
            pack_color_comp(self.g),
            pack_color_comp(self.b),
            pack_color_comp(self.a),
        ]
    }

    pub fn is_transparent(&self) -> bool {
        self.a == 0.0
    }
}

/// 整数三维包围盒：下角 `min` 加各轴格数 `size`
///
/// 任一轴 `size` 为 0 时为空盒。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bounds {
    pub min: [i32; 3],
    pub size: [u32; 3],
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        min: [0; 3],
        size: [0; 3],
    };

    pub const fn new(min: [i32; 3], size: [u32; 3]) -> Self {
        Self { min, size }
    }

    /// 由闭区间 `[min, max]` 构造，`max < min` 的轴大小为 0
    pub fn from_min_max(min: [i32; 3], max: [i32; 3]) -> Self {
        let mut size = [0u32; 3];
        for axis in 0..3 {
            let extent = i64::from(max[axis]) - i64::from(min[axis]) + 1;
            size[axis] = u32::try_from(extent.max(0)).unwrap_or(u32::MAX);
        }
        Self { min, size }
    }

    /// 闭区间上角，空盒时某些轴会小于 `min`
    pub fn max(&self) -> [i32; 3] {
        let mut max = [0i32; 3];
        for axis in 0..3 {
            let m = i64::from(self.min[axis]) + i64::from(self.size[axis]) - 1;
            max[axis] = m.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        }
        max
    }

    pub fn is_empty(&self) -> bool {
        self.size.contains(&0)
    }

    /// 体素总数
    pub fn volume(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product()
    }

    pub fn contains(&self, p: [i32; 3]) -> bool {
        (0..3).all(|axis| {
            let d = i64::from(p[axis]) - i64::from(self.min[axis]);
            d >= 0 && d < i64::from(self.size[axis])
        })
    }

    /// 两个盒子的并集，空盒不参与
    pub fn union(&self, other: &Bounds) -> Bounds {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let (a, b) = (self.max(), other.max());
        let mut min = [0i32; 3];
        let mut max = [0i32; 3];
        for axis in 0..3 {
            min[axis] = self.min[axis].min(other.min[axis]);
            max[axis] = a[axis].max(b[axis]);
        }
        Bounds::from_min_max(min, max)
    }

    /// 世界坐标转局部坐标
    pub fn to_local(&self, p: [i32; 3]) -> Option<[u32; 3]> {
        if !self.contains(p) {
            return None;
        }
        Some([
            (i64::from(p[0]) - i64::from(self.min[0])) as u32,
            (i64::from(p[1]) - i64::from(self.min[1])) as u32,
            (i64::from(p[2]) - i64::from(self.min[2])) as u32,
        ])
    }

    pub fn to_world(&self, local: [u32; 3]) -> [i32; 3] {
        [
            self.min[0].wrapping_add(local[0] as i32),
            self.min[1].wrapping_add(local[1] as i32),
            self.min[2].wrapping_add(local[2] as i32),
        ]
    }

    /// 局部坐标在线性存储中的位置，x 变化最快
    pub fn linear_index(&self, local: [u32; 3]) -> usize {
        let [sx, sy, _] = self.size.map(|s| s as usize);
        (local[2] as usize * sy + local[1] as usize) * sx + local[0] as usize
    }
}

/// 网格的数据类型，创建后不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Color,
    Indexed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoxelData {
    Color(Vec<Rgba>),
    Indexed(Vec<u8>),
}

/// 三维体素网格
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    bounds: Bounds,
    data: VoxelData,
}

impl VoxelGrid {
    pub fn new(bounds: Bounds, kind: DataKind) -> Self {
        let n = bounds.volume();
        let data = match kind {
            DataKind::Color => VoxelData::Color(vec![Rgba::TRANSPARENT; n]),
            DataKind::Indexed => VoxelData::Indexed(vec![0; n]),
        };
        Self { bounds, data }
    }

    pub fn new_color(bounds: Bounds) -> Self {
        Self::new(bounds, DataKind::Color)
    }

    pub fn new_indexed(bounds: Bounds) -> Self {
        Self::new(bounds, DataKind::Indexed)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn size(&self) -> [u32; 3] {
        self.bounds.size
    }

    pub fn kind(&self) -> DataKind {
        match self.data {
            VoxelData::Color(_) => DataKind::Color,
            VoxelData::Indexed(_) => DataKind::Indexed,
        }
    }

    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    pub fn colors(&self) -> Option<&[Rgba]> {
        match &self.data {
            VoxelData::Color(c) => Some(c),
            VoxelData::Indexed(_) => None,
        }
    }

    pub fn colors_mut(&mut self) -> Option<&mut [Rgba]> {
        match &mut self.data {
            VoxelData::Color(c) => Some(c),
            VoxelData::Indexed(_) => None,
        }
    }

    pub fn indices(&self) -> Option<&[u8]> {
        match &self.data {
            VoxelData::Indexed(i) => Some(i),
            VoxelData::Color(_) => None,
        }
    }

    pub fn indices_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            VoxelData::Indexed(i) => Some(i),
            VoxelData::Color(_) => None,
        }
    }

    /// 移动网格位置，不改变内容
    pub fn set_origin(&mut self, min: [i32; 3]) {
        self.bounds.min = min;
    }

    /// 读取颜色；索引网格通过调色板取色，盒外为透明
    pub fn color_at(&self, p: [i32; 3], palette: &Palette) -> Rgba {
        let Some(local) = self.bounds.to_local(p) else {
            return Rgba::TRANSPARENT;
        };
        let i = self.bounds.linear_index(local);
        match &self.data {
            VoxelData::Color(c) => c[i],
            VoxelData::Indexed(ind) => palette.color(usize::from(ind[i])),
        }
    }

    /// 读取索引；颜色网格返回 `None`，盒外为 0
    pub fn index_at(&self, p: [i32; 3]) -> Option<u8> {
        let VoxelData::Indexed(ind) = &self.data else {
            return None;
        };
        Some(
            self.bounds
                .to_local(p)
                .map_or(0, |local| ind[self.bounds.linear_index(local)]),
        )
    }

    /// 写入颜色；盒外或索引网格时忽略
    pub fn set_color(&mut self, p: [i32; 3], color: Rgba) {
        if let Some(local) = self.bounds.to_local(p) {
            let i = self.bounds.linear_index(local);
            if let VoxelData::Color(c) = &mut self.data {
                c[i] = color;
            }
        }
    }

    /// 写入索引；盒外或颜色网格时忽略
    pub fn set_index(&mut self, p: [i32; 3], index: u8) {
        if let Some(local) = self.bounds.to_local(p) {
            let i = self.bounds.linear_index(local);
            if let VoxelData::Indexed(ind) = &mut self.data {
                ind[i] = index;
            }
        }
    }

    /// 通过调色板转为颜色网格
    pub fn to_color(&self, palette: &Palette) -> VoxelGrid {
        match &self.data {
            VoxelData::Color(_) => self.clone(),
            VoxelData::Indexed(ind) => VoxelGrid {
                bounds: self.bounds,
                data: VoxelData::Color(
                    ind.iter().map(|&i| palette.color(usize::from(i))).collect(),
                ),
            },
        }
    }
}

/// 图层池中的图层句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(usize);

impl LayerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 工程调色板句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaletteId(usize);

impl PaletteId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 图层：网格 + 名称 + 可见性 + 调色板引用
///
/// 图层偏移即网格包围盒的 `min`。
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    /// 索引图层使用的调色板，`None` 时使用工程主调色板
    pub palette: Option<PaletteId>,
    grid: VoxelGrid,
}

impl Layer {
    pub fn new(grid: VoxelGrid) -> Self {
        Self {
            name: "layer".to_string(),
            visible: true,
            palette: None,
            grid,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn offset(&self) -> [i32; 3] {
        self.grid.bounds().min
    }

    pub fn set_offset(&mut self, offset: [i32; 3]) {
        self.grid.set_origin(offset);
    }

    pub fn bounds(&self) -> Bounds {
        self.grid.bounds()
    }

    pub fn kind(&self) -> DataKind {
        self.grid.kind()
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut VoxelGrid {
        &mut self.grid
    }
}

/// 调色板
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Palette {
    pub name: String,
    pub colors: Vec<Rgba>,
}

static EMPTY_PALETTE: Palette = Palette {
    name: String::new(),
    colors: Vec::new(),
};

impl Palette {
    pub fn new(name: impl Into<String>, colors: Vec<Rgba>) -> Self {
        Self {
            name: name.into(),
            colors,
        }
    }

    /// 超出范围的索引返回透明
    pub fn color(&self, index: usize) -> Rgba {
        self.colors.get(index).copied().unwrap_or(Rgba::TRANSPARENT)
    }
}

/// 精灵：名称 + 图层句柄列表 + 当前图层
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sprite {
    pub name: String,
    layers: Vec<LayerId>,
    cur_layer: Option<usize>,
}

impl Sprite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            cur_layer: None,
        }
    }

    pub fn layers(&self) -> &[LayerId] {
        &self.layers
    }

    /// 在位置 `i` 插入图层，当前图层随之后移
    pub fn insert_layer(&mut self, i: usize, layer: LayerId) {
        let i = i.min(self.layers.len());
        self.layers.insert(i, layer);
        match self.cur_layer {
            Some(cur) if cur >= i => self.cur_layer = Some(cur + 1),
            None if self.layers.len() == 1 => self.cur_layer = Some(0),
            _ => {}
        }
    }

    pub fn push_layer(&mut self, layer: LayerId) {
        self.insert_layer(self.layers.len(), layer);
    }

    pub fn cur_layer(&self) -> Option<usize> {
        self.cur_layer
    }

    /// 越界的索引视为没有当前图层
    pub fn set_cur_layer(&mut self, index: Option<usize>) {
        self.cur_layer = index.filter(|&i| i < self.layers.len());
    }
}

/// 工程：图层池、精灵、调色板与主调色板
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Project {
    layers: Vec<Layer>,
    pub sprites: Vec<Sprite>,
    palettes: Vec<Palette>,
    main_palette: Option<PaletteId>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        self.layers.push(layer);
        LayerId(self.layers.len() - 1)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id.0)
    }

    /// 图层池中的全部图层（包括未被任何精灵引用的）
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn add_palette(&mut self, palette: Palette) -> PaletteId {
        self.palettes.push(palette);
        PaletteId(self.palettes.len() - 1)
    }

    pub fn palette(&self, id: PaletteId) -> Option<&Palette> {
        self.palettes.get(id.0)
    }

    pub fn palettes(&self) -> &[Palette] {
        &self.palettes
    }

    /// 按位置查找调色板句柄
    pub fn palette_id(&self, index: usize) -> Option<PaletteId> {
        (index < self.palettes.len()).then_some(PaletteId(index))
    }

    pub fn main_palette_id(&self) -> Option<PaletteId> {
        self.main_palette
    }

    /// 主调色板；未设置时为空调色板
    pub fn main_palette(&self) -> &Palette {
        self.main_palette
            .and_then(|id| self.palette(id))
            .unwrap_or(&EMPTY_PALETTE)
    }

    pub fn set_main_palette(&mut self, id: Option<PaletteId>) {
        self.main_palette = id.filter(|id| id.0 < self.palettes.len());
    }

    /// 添加只含一个图层的精灵，返回精灵序号
    pub fn add_sprite_with_layer(&mut self, name: impl Into<String>, layer: Layer) -> usize {
        let id = self.add_layer(layer);
        let mut sprite = Sprite::new(name);
        sprite.push_layer(id);
        self.sprites.push(sprite);
        self.sprites.len() - 1
    }

    /// 图层实际使用的调色板
    pub fn layer_palette(&self, layer: &Layer) -> &Palette {
        layer
            .palette
            .and_then(|id| self.palette(id))
            .unwrap_or_else(|| self.main_palette())
    }

    fn sprite_layers<'a>(&'a self, sprite: &'a Sprite) -> impl Iterator<Item = &'a Layer> + 'a {
        sprite.layers.iter().filter_map(|&id| self.layer(id))
    }

    /// 精灵所有图层包围盒的并集
    pub fn sprite_bounds(&self, sprite: &Sprite) -> Bounds {
        self.sprite_layers(sprite)
            .fold(Bounds::EMPTY, |acc, l| acc.union(&l.bounds()))
    }

    /// 精灵烘焙结果所对应的调色板
    pub fn sprite_palette(&self, sprite: &Sprite) -> &Palette {
        self.sprite_layers(sprite)
            .find(|l| l.kind() == DataKind::Indexed)
            .map_or_else(|| self.main_palette(), |l| self.layer_palette(l))
    }

    /// 把精灵的所有图层合成为一个网格
    ///
    /// 全部图层都是同一调色板的索引图层时结果为索引网格，
    /// 取第一个非零索引；否则为颜色网格，取第一个不透明颜色。
    pub fn bake_sprite(&self, sprite: &Sprite) -> VoxelGrid {
        let bounds = self.sprite_bounds(sprite);
        let layers: Vec<&Layer> = self.sprite_layers(sprite).collect();

        let indexed = !layers.is_empty()
            && layers.iter().all(|l| l.kind() == DataKind::Indexed)
            && layers.iter().all(|l| l.palette == layers[0].palette);

        if indexed {
            let mut out = VoxelGrid::new_indexed(bounds);
            for (i, v) in out.indices_mut().into_iter().flatten().enumerate() {
                let p = world_of(&bounds, i);
                *v = layers
                    .iter()
                    .filter_map(|l| l.grid().index_at(p))
                    .find(|&ind| ind != 0)
                    .unwrap_or(0);
            }
            return out;
        }

        let mut out = VoxelGrid::new_color(bounds);
        for (i, c) in out.colors_mut().into_iter().flatten().enumerate() {
            let p = world_of(&bounds, i);
            *c = layers
                .iter()
                .map(|l| l.grid().color_at(p, self.layer_palette(l)))
                .find(|c| !c.is_transparent())
                .unwrap_or(Rgba::TRANSPARENT);
        }
        out
    }
}

/// 线性存储位置转世界坐标
fn world_of(bounds: &Bounds, i: usize) -> [i32; 3] {
    let [sx, sy, _] = bounds.size.map(|s| s as usize);
    let x = i % sx;
    let y = (i / sx) % sy;
    let z = i / (sx * sy);
    bounds.to_world([x as u32, y as u32, z as u32])
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba = Rgba::new(1.0, 0.0, 0.0, 1.0);
    const BLUE: Rgba = Rgba::new(0.0, 0.0, 1.0, 1.0);

    #[test]
    fn bounds_min_max() {
        let b = Bounds::from_min_max([-1, 0, 2], [1, 0, 5]);
        assert_eq!(b.size, [3, 1, 4]);
        assert_eq!(b.max(), [1, 0, 5]);
        assert!(b.contains([-1, 0, 5]));
        assert!(!b.contains([2, 0, 5]));
        assert!(Bounds::from_min_max([0, 0, 0], [-1, 3, 3]).is_empty());
    }

    #[test]
    fn bounds_union_ignores_empty() {
        let a = Bounds::new([0, 0, 0], [2, 2, 2]);
        let b = Bounds::new([-3, 1, 1], [1, 1, 1]);
        assert_eq!(a.union(&Bounds::EMPTY), a);
        assert_eq!(Bounds::EMPTY.union(&a), a);
        assert_eq!(a.union(&b), Bounds::from_min_max([-3, 0, 0], [1, 1, 1]));
    }

    #[test]
    fn grid_reads_outside_are_empty() {
        let mut g = VoxelGrid::new_color(Bounds::new([5, 5, 5], [1, 1, 1]));
        g.set_color([5, 5, 5], RED);
        g.set_color([0, 0, 0], BLUE);
        let pal = Palette::default();
        assert_eq!(g.color_at([5, 5, 5], &pal), RED);
        assert_eq!(g.color_at([0, 0, 0], &pal), Rgba::TRANSPARENT);
        assert_eq!(g.index_at([5, 5, 5]), None);
    }

    #[test]
    fn sprite_cur_layer_follows_insert() {
        let mut project = Project::new();
        let a = project.add_layer(Layer::new(VoxelGrid::new_color(Bounds::EMPTY)));
        let b = project.add_layer(Layer::new(VoxelGrid::new_color(Bounds::EMPTY)));
        let mut s = Sprite::new("s");
        s.push_layer(a);
        assert_eq!(s.cur_layer(), Some(0));
        s.insert_layer(0, b);
        assert_eq!(s.cur_layer(), Some(1));
        s.set_cur_layer(Some(7));
        assert_eq!(s.cur_layer(), None);
    }

    #[test]
    fn bake_color_takes_first_opaque_layer() {
        let mut project = Project::new();
        let mut top = VoxelGrid::new_color(Bounds::new([0, 0, 0], [1, 1, 1]));
        top.set_color([0, 0, 0], RED);
        let mut bottom = VoxelGrid::new_color(Bounds::new([0, 0, 0], [2, 1, 1]));
        bottom.set_color([0, 0, 0], BLUE);
        bottom.set_color([1, 0, 0], BLUE);

        let mut s = Sprite::new("s");
        s.push_layer(project.add_layer(Layer::new(top)));
        s.push_layer(project.add_layer(Layer::new(bottom)));

        let baked = project.bake_sprite(&s);
        assert_eq!(baked.kind(), DataKind::Color);
        assert_eq!(baked.bounds(), Bounds::new([0, 0, 0], [2, 1, 1]));
        assert_eq!(baked.colors().unwrap(), &[RED, BLUE]);
    }

    #[test]
    fn bake_indexed_stays_indexed() {
        let mut project = Project::new();
        let pal = project.add_palette(Palette::new("p", vec![Rgba::TRANSPARENT, RED, BLUE]));
        let mut g = VoxelGrid::new_indexed(Bounds::new([0, 0, 0], [2, 1, 1]));
        g.set_index([1, 0, 0], 2);
        let mut layer = Layer::new(g);
        layer.palette = Some(pal);
        let i = project.add_sprite_with_layer("s", layer);

        let sprite = &project.sprites[i];
        let baked = project.bake_sprite(sprite);
        assert_eq!(baked.indices().unwrap(), &[0, 2]);
        assert_eq!(project.sprite_palette(sprite).color(2), BLUE);
    }

    #[test]
    fn main_palette_defaults_to_empty() {
        let mut project = Project::new();
        assert!(project.main_palette().colors.is_empty());
        let id = project.add_palette(Palette::new("x", vec![RED]));
        project.set_main_palette(Some(id));
        assert_eq!(project.main_palette().color(0), RED);
    }
}
