//! 在 CPU 后端上跑几帧：上传、compute、render、跨 API 同步，最后回收并销毁 device
//!
//! 用法：`velum-demo [config.toml]`

use anyhow::Context;
use velum_gfx::backend::null::{NullBackend, NullExternalStream};
use velum_gfx::commands::rendering_info::{GfxClearValue, GfxLoadOp, GfxRenderPassDesc, GfxStoreOp};
use velum_gfx::config::GfxDeviceConfig;
use velum_gfx::device::GfxDevice;
use velum_gfx::resources::buffer::GfxBuffer;
use velum_gfx::resources::state::GfxResourceState;
use velum_gfx::resources::texture::{GfxTexture, GfxTextureDesc};

const FRAME_COUNT: u32 = 3;

fn main() -> anyhow::Result<()> {
    velum_crate_tools::init_log::init_log();

    let config: GfxDeviceConfig = velum_crate_tools::config::load_toml_or_default(std::env::args().nth(1))?;
    let backend = NullBackend::new_auto_complete();
    let device = GfxDevice::new(backend.clone(), config).context("failed to create device")?;

    let result = run_frames(&device, &backend);
    device.destroy().context("failed to destroy device")?;
    result?;

    log::info!(
        "done: {} submissions, {} objects released, {} transient heaps created",
        backend.submissions().len(),
        backend.released().len(),
        backend.heaps_created()
    );
    Ok(())
}

fn run_frames(device: &GfxDevice<NullBackend>, backend: &NullBackend) -> anyhow::Result<()> {
    let particle_count = 1024u64;
    let mut particles =
        GfxBuffer::from_native(backend.create_buffer(particle_count * 16), particle_count * 16, GfxResourceState::Undefined, "particles");
    let desc = GfxTextureDesc::new_2d(640, 480);
    let mut color = GfxTexture::from_native(backend.create_texture(), desc, GfxResourceState::Undefined, "color");
    let pipeline = backend.create_pipeline();

    let stream = if device.config().shared_fence {
        Some(NullExternalStream::import(backend, device.shared_fence_handle()?, "cuda-stream")?)
    } else {
        None
    };

    for frame in 0..FRAME_COUNT {
        let mut encoder = device.create_command_encoder(&format!("frame-{frame}"))?;

        let seeds = (0..particle_count * 4).map(|i| (i as f32 + frame as f32).to_bits()).collect::<Vec<_>>();
        encoder.upload_buffer_data(&mut particles, 0, bytemuck::cast_slice(&seeds))?;

        {
            let mut pass = encoder.begin_compute_pass("simulate")?;
            pass.bind_pipeline(&pipeline, None)?;
            pass.use_buffer(&mut particles, GfxResourceState::UnorderedAccess)?;
            pass.dispatch(glam::UVec3::new((particle_count as u32).div_ceil(64), 1, 1))?;
            pass.end()?;
        }

        {
            let clear = GfxLoadOp::Clear(GfxClearValue::Color(glam::Vec4::new(0.1, 0.1, 0.1, 1.0)));
            let mut pass =
                encoder.begin_render_pass(GfxRenderPassDesc::new("draw").color(&mut color, clear, GfxStoreOp::Store))?;
            pass.bind_pipeline(&pipeline, None)?;
            pass.draw(particle_count as u32, 1, 0, 0)?;
            pass.end()?;
        }
        encoder.set_texture_state(&mut color, GfxResourceState::Present)?;

        let value = device.submit_command_buffer(encoder.finish()?)?;
        if let Some(stream) = &stream {
            device.sync_to_cuda(stream)?;
            device.sync_to_device(stream)?;
        }

        let stats = device.run_garbage_collection()?;
        log::info!(
            "frame {} submitted at {}, gc: {} heaps reclaimed, {} objects released",
            frame,
            value,
            stats.heaps_reclaimed(),
            stats.objects_released()
        );
    }

    device.retire_buffer(particles)?;
    device.retire_texture(color)?;
    device.wait_and_collect()?;
    Ok(())
}
