//! 编辑器坐标系与外部格式坐标系之间的轴变换和扫描顺序

/// 嵌套循环的扫描方式：`axes` 从外层到内层，`descending` 对应每一层是否倒序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPattern {
    axes: [usize; 3],
    descending: [bool; 3],
}

/// 图块集格式：z 倒序，y 正序，x 正序（最内层）
pub const ATLAS_SCAN: ScanPattern = ScanPattern {
    axes: [2, 1, 0],
    descending: [true, false, false],
};

/// Paint3D 格式：x 正序，z 倒序，y 正序（最内层）
pub const PAINT_SCAN: ScanPattern = ScanPattern {
    axes: [0, 2, 1],
    descending: [false, true, false],
};

impl ScanPattern {
    /// 按此方式遍历 `size` 大小网格的局部坐标
    pub fn scan(self, size: [u32; 3]) -> Scan {
        let total = size.iter().map(|&s| s as usize).product();
        Scan {
            pattern: self,
            size,
            pos: 0,
            total,
        }
    }
}

/// 扫描迭代器，产出编辑器轴向的局部坐标
#[derive(Debug, Clone)]
pub struct Scan {
    pattern: ScanPattern,
    size: [u32; 3],
    pos: usize,
    total: usize,
}

impl Scan {
    fn coord_at(&self, pos: usize) -> [u32; 3] {
        let [a0, a1, a2] = self.pattern.axes;
        let n1 = self.size[a1] as usize;
        let n2 = self.size[a2] as usize;
        let steps = [pos / (n1 * n2), (pos / n2) % n1, pos % n2];

        let mut out = [0u32; 3];
        for (k, &axis) in [a0, a1, a2].iter().enumerate() {
            let step = steps[k] as u32;
            out[axis] = if self.pattern.descending[k] {
                self.size[axis] - 1 - step
            } else {
                step
            };
        }
        out
    }
}

impl Iterator for Scan {
    type Item = [u32; 3];

    fn next(&mut self) -> Option<[u32; 3]> {
        if self.pos >= self.total {
            return None;
        }
        let c = self.coord_at(self.pos);
        self.pos += 1;
        Some(c)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.total - self.pos;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Scan {}

/// 编辑器 (x, y, z) 转 Paint3D (X, Y, Z) = (x, z, y)
pub fn to_paint_axes<T: Copy>(v: [T; 3]) -> [T; 3] {
    [v[0], v[2], v[1]]
}

/// [`to_paint_axes`] 的逆变换
pub fn from_paint_axes<T: Copy>(v: [T; 3]) -> [T; 3] {
    [v[0], v[2], v[1]]
}
