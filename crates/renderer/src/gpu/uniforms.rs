use bytemuck::{Pod, Zeroable};

/// CPU mirror of the `WallpaperParams` std140 block.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct WallpaperUniforms {
    pub resolution: [f32; 2],
    pub mouse: [f32; 2],
    pub time: f32,
    pub _padding: [f32; 3],
}

unsafe impl Zeroable for WallpaperUniforms {}
unsafe impl Pod for WallpaperUniforms {}

impl WallpaperUniforms {
    /// Resolution is fixed for the session and the pointer starts centred.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: [width as f32, height as f32],
            mouse: [(width / 2) as f32, (height / 2) as f32],
            time: 0.0,
            _padding: [0.0; 3],
        }
    }

    pub fn set_time(&mut self, seconds: f32) {
        self.time = seconds;
    }

    pub fn set_mouse(&mut self, position: [f32; 2]) {
        self.mouse = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_std140_block_size() {
        assert_eq!(std::mem::size_of::<WallpaperUniforms>(), 32);
        assert_eq!(std::mem::offset_of!(WallpaperUniforms, mouse), 8);
        assert_eq!(std::mem::offset_of!(WallpaperUniforms, time), 16);
    }

    #[test]
    fn pointer_starts_at_centre() {
        let uniforms = WallpaperUniforms::new(2560, 1441);
        assert_eq!(uniforms.mouse, [1280.0, 720.0]);
        assert_eq!(uniforms.resolution, [2560.0, 1441.0]);
    }
}
