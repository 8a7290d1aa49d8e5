pub mod drawing;
pub mod wireframe;

pub mod geometry {
    use std::f64::consts::PI;

    use glam::{DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// 圆弧离散化的最小段数。
    pub const MIN_ARC_SEGMENTS: usize = 16;

    /// 每段最大跨角（π/24，即 7.5°）。
    pub const ARC_STEP: f64 = PI / 24.0;

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 二维向量，用于椭圆主轴等方向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        /// 逆时针旋转 90°。
        #[inline]
        pub fn perp(self) -> Vector2 {
            Self(self.0.perp())
        }
    }

    /// 三维点，IGES 线框的基本坐标。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 二维轴对齐边界框。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        pub fn include_point(&mut self, point: Point2) {
            if !point.0.is_finite() {
                return;
            }
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point2(self.min.0.min(point.0));
            self.max = Point2(self.max.0.max(point.0));
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            Point2((self.min.0 + self.max.0) * 0.5)
        }
    }

    /// 三维轴对齐边界框，用于线框视图的等比例范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds3D {
        min: Point3,
        max: Point3,
    }

    impl Bounds3D {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point3(DVec3::splat(f64::INFINITY)),
                max: Point3(DVec3::splat(f64::NEG_INFINITY)),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y() || self.min.z() > self.max.z()
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            if !point.0.is_finite() {
                return;
            }
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point3(self.min.0.min(point.0));
            self.max = Point3(self.max.0.max(point.0));
        }

        /// 三个轴向中最大的跨度。
        #[inline]
        pub fn max_extent(&self) -> f64 {
            (self.max.0 - self.min.0).max_element()
        }

        #[inline]
        pub fn center(&self) -> Point3 {
            debug_assert!(!self.is_empty());
            Point3((self.min.0 + self.max.0) * 0.5)
        }
    }

    /// 按跨角计算圆弧离散段数：`max(16, ceil(span / (π/24)))`。
    ///
    /// 减去 1e-9 的容差，避免 2π/(π/24) 之类的浮点误差多出一段。
    pub fn arc_segment_count(span: f64) -> usize {
        let steps = (span.abs() / ARC_STEP - 1e-9).ceil();
        if steps.is_finite() && steps > 0.0 {
            (steps as usize).max(MIN_ARC_SEGMENTS)
        } else {
            MIN_ARC_SEGMENTS
        }
    }
}

pub mod failure {
    use thiserror::Error;

    /// 单个预览策略失败的原因。保持为封闭且可复制的枚举，
    /// 由编排层统一决定是否升级为最终错误。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
    pub enum FailureReason {
        #[error("输入文件不存在")]
        MissingInput,
        #[error("文件签名不匹配")]
        BadSignature,
        #[error("字段超出允许范围")]
        OutOfRange,
        #[error("数据在预期位置之前结束")]
        Truncated,
        #[error("不支持的位图头")]
        UnsupportedHeader,
        #[error("外部工具不可用")]
        ToolUnavailable,
        #[error("外部工具执行超时")]
        Timeout,
        #[error("外部工具返回非零状态")]
        ToolFailed,
        #[error("未找到输出")]
        NoOutput,
        #[error("未解析到任何可绘制实体")]
        NoEntities,
        #[error("图像解码失败")]
        DecodeError,
        #[error("I/O 错误")]
        Io,
    }
}

pub use failure::FailureReason;
