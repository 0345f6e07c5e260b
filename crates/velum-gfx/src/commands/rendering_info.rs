use crate::backend::GfxBackend;
use crate::commands::command_types::GfxRect;
use crate::resources::texture::GfxTexture;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color(glam::Vec4),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxLoadOp {
    Load,
    Clear(GfxClearValue),
    DontCare,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GfxStoreOp {
    #[default]
    Store,
    DontCare,
}

/// render pass 的 color attachment
pub struct GfxColorAttachmentDesc<'a, B: GfxBackend> {
    pub texture: &'a mut GfxTexture<B>,
    pub load: GfxLoadOp,
    pub store: GfxStoreOp,
    /// MSAA 时 resolve 的目标
    pub resolve_target: Option<&'a mut GfxTexture<B>>,
}

/// render pass 的 depth attachment
pub struct GfxDepthAttachmentDesc<'a, B: GfxBackend> {
    pub texture: &'a mut GfxTexture<B>,
    pub load: GfxLoadOp,
    pub store: GfxStoreOp,
    /// 只读深度使用 `DepthRead` 状态
    pub read_only: bool,
}

/// `begin_render_pass` 的参数
///
/// attachment 会在 pass 开始前被转换到需要的状态，pass 内部不能再插入 barrier
pub struct GfxRenderPassDesc<'a, B: GfxBackend> {
    pub label: &'a str,
    pub color_attachments: Vec<GfxColorAttachmentDesc<'a, B>>,
    pub depth_attachment: Option<GfxDepthAttachmentDesc<'a, B>>,
    /// 为空时使用第一个 attachment 的大小
    pub render_area: Option<GfxRect>,
}

impl<'a, B: GfxBackend> GfxRenderPassDesc<'a, B> {
    pub fn new(label: &'a str) -> Self {
        Self {
            label,
            color_attachments: Vec::new(),
            depth_attachment: None,
            render_area: None,
        }
    }

    /// builder
    pub fn color(mut self, texture: &'a mut GfxTexture<B>, load: GfxLoadOp, store: GfxStoreOp) -> Self {
        self.color_attachments.push(GfxColorAttachmentDesc {
            texture,
            load,
            store,
            resolve_target: None,
        });
        self
    }

    /// builder
    pub fn color_with_resolve(
        mut self,
        texture: &'a mut GfxTexture<B>,
        resolve_target: &'a mut GfxTexture<B>,
        load: GfxLoadOp,
    ) -> Self {
        self.color_attachments.push(GfxColorAttachmentDesc {
            texture,
            load,
            store: GfxStoreOp::DontCare,
            resolve_target: Some(resolve_target),
        });
        self
    }

    /// builder
    pub fn depth(mut self, texture: &'a mut GfxTexture<B>, load: GfxLoadOp, store: GfxStoreOp) -> Self {
        self.depth_attachment = Some(GfxDepthAttachmentDesc {
            texture,
            load,
            store,
            read_only: false,
        });
        self
    }

    /// builder
    pub fn render_area(mut self, render_area: GfxRect) -> Self {
        self.render_area = Some(render_area);
        self
    }
}

/// 传给后端的原生 attachment
pub struct GfxRenderingAttachment<'a, B: GfxBackend> {
    pub texture: &'a B::Texture,
    pub load: GfxLoadOp,
    pub store: GfxStoreOp,
    pub resolve_target: Option<&'a B::Texture>,
    pub read_only: bool,
}

/// 传给后端的 dynamic rendering 描述
pub struct GfxRenderingDesc<'a, B: GfxBackend> {
    pub color_attachments: Vec<GfxRenderingAttachment<'a, B>>,
    pub depth_attachment: Option<GfxRenderingAttachment<'a, B>>,
    pub render_area: GfxRect,
    pub layer_count: u32,
}
