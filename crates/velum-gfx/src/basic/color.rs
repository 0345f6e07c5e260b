/// debug label 的颜色
pub struct LabelColor;
impl LabelColor {
    const RED: glam::Vec4 = glam::vec4(1.0, 0.0, 0.0, 1.0);
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);
    const MAGENTA: glam::Vec4 = glam::vec4(1.0, 0.0, 1.0, 1.0);

    pub const COLOR_COMPUTE_PASS: glam::Vec4 = Self::BLUE;
    pub const COLOR_RENDER_PASS: glam::Vec4 = Self::GREEN;
    pub const COLOR_RAY_TRACING_PASS: glam::Vec4 = Self::MAGENTA;
    pub const COLOR_ENCODER: glam::Vec4 = Self::YELLOW;
    pub const COLOR_TRANSFER: glam::Vec4 = Self::RED;
}
