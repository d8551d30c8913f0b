use std::sync::mpsc;

use super::pipeline::CAPTURE_FORMAT;
use super::GpuError;

const BYTES_PER_PIXEL: u32 = 4;

/// Offscreen colour target the user program renders into while frames are
/// being recorded, plus the staging buffer used to read it back.
pub(crate) struct CaptureTarget {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
}

impl CaptureTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("capture texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CAPTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let padded_bytes_per_row = padded_row_bytes(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("capture readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            texture,
            view,
            readback,
            width,
            height,
            padded_bytes_per_row,
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL as usize
    }

    /// Copies the texture to the staging buffer, waits for the GPU and returns
    /// tightly packed RGBA rows, top row first.
    pub fn read(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<u8>, GpuError> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("capture readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::PollType::Wait)?;
        receiver.recv().map_err(|_| GpuError::ReadbackLost)??;

        let pixels = {
            let mapped = slice.get_mapped_range();
            unpad_rows(
                &mapped,
                self.width * BYTES_PER_PIXEL,
                self.padded_bytes_per_row,
                self.height,
            )
        };
        self.readback.unmap();
        Ok(pixels)
    }

    /// Replaces the texture contents with a decoded frame.
    pub fn upload(&self, queue: &wgpu::Queue, rgba: &[u8]) -> Result<(), GpuError> {
        if rgba.len() != self.frame_len() {
            return Err(GpuError::FrameSize {
                width: self.width,
                height: self.height,
                actual: rgba.len(),
            });
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * BYTES_PER_PIXEL),
                rows_per_image: Some(self.height),
            },
            extent(self.width, self.height),
        );
        Ok(())
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn unpad_rows(padded: &[u8], row_bytes: u32, padded_row_bytes: u32, rows: u32) -> Vec<u8> {
    let row_bytes = row_bytes as usize;
    let mut out = Vec::with_capacity(row_bytes * rows as usize);
    for row in padded.chunks(padded_row_bytes as usize).take(rows as usize) {
        out.extend_from_slice(&row[..row_bytes]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_row_bytes(64), 256);
        assert_eq!(padded_row_bytes(65), 512);
        assert_eq!(padded_row_bytes(1920), 7680);
        assert_eq!(padded_row_bytes(1), 256);
    }

    #[test]
    fn unpad_strips_row_tails() {
        let mut padded = Vec::new();
        for row in 0..3u8 {
            padded.extend_from_slice(&[row; 8]);
            padded.extend_from_slice(&[0xff; 8]);
        }
        let tight = unpad_rows(&padded, 8, 16, 3);
        assert_eq!(tight.len(), 24);
        assert!(tight[..8].iter().all(|&b| b == 0));
        assert!(tight[16..].iter().all(|&b| b == 2));
    }

    fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()
    }

    #[test]
    fn uploaded_frame_reads_back_unchanged() {
        let Some((device, queue)) = headless_device() else {
            eprintln!("no GPU adapter available; skipping");
            return;
        };
        let target = CaptureTarget::new(&device, 3, 2);
        let frame: Vec<u8> = (0..3 * 2 * 4u8).map(|i| i.wrapping_mul(7)).collect();

        target.upload(&queue, &frame).unwrap();
        let read = target.read(&device, &queue).unwrap();

        assert_eq!(read, frame);
    }

    #[test]
    fn upload_rejects_wrong_frame_size() {
        let Some((device, queue)) = headless_device() else {
            return;
        };
        let target = CaptureTarget::new(&device, 4, 4);
        assert!(matches!(
            target.upload(&queue, &[0; 12]),
            Err(GpuError::FrameSize { actual: 12, .. })
        ));
    }
}
