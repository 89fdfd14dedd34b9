use crate::{DepthStencilId, DeviceError, GeometryBuffer, GeometryBufferPool, GraphicsDevice, Viewport};

/**
 * Per-output rendering state: the depth buffer and the geometry buffers
 * used by multi-pass shaders and post-processing, all sized to the output.
 * Outlives frames, so buffers are reused from one frame to the next.
 */
pub struct SceneRenderingContext {
    width: u32,
    height: u32,
    depth: DepthStencilId,
    pool: GeometryBufferPool,
}

impl SceneRenderingContext {

    pub fn new(width: u32, height: u32, device: &mut dyn GraphicsDevice) -> Result<Self, DeviceError> {
        Ok(Self {
            width,
            height,
            depth: device.create_depth_stencil(width, height)?,
            pool: GeometryBufferPool::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::sized(self.width, self.height)
    }

    pub fn depth(&self) -> DepthStencilId {
        self.depth
    }

    pub fn geometry_buffer(&mut self, name: &str, device: &mut dyn GraphicsDevice) -> Result<GeometryBuffer, DeviceError> {
        self.pool.get_or_create(name, device)
    }

    pub fn geometry_buffer_sized(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        device: &mut dyn GraphicsDevice,
    ) -> Result<GeometryBuffer, DeviceError> {
        self.pool.get_or_create_sized(name, width, height, device)
    }

    /// Existing buffer, without creating it.
    pub fn existing_geometry_buffer(&self, name: &str) -> Option<GeometryBuffer> {
        self.pool.get(name)
    }

    pub fn swap_geometry_buffers(&mut self, a: &str, b: &str) {
        self.pool.swap(a, b);
    }

    /// Allocated geometry buffers in creation order, for debug inspection.
    pub fn geometry_buffers(&self) -> impl Iterator<Item = (&str, &GeometryBuffer)> + '_ {
        self.pool.iter()
    }

    /// Changes the output size. Depth is recreated immediately, geometry buffers on their next request.
    pub fn resize(&mut self, width: u32, height: u32, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        self.depth = device.create_depth_stencil(width, height)?;
        self.width = width;
        self.height = height;
        self.pool.resize(width, height, device);
        log::debug!("Resized rendering context to {width}x{height}");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{RecordingDevice, SceneRenderingContext};

    #[test]
    fn enumerates_buffers_in_creation_order() {
        let mut device = RecordingDevice::new();
        let mut context = SceneRenderingContext::new(100, 50, &mut device).unwrap();
        context.geometry_buffer("normals", &mut device).unwrap();
        context.geometry_buffer("albedo", &mut device).unwrap();
        context.geometry_buffer("normals", &mut device).unwrap();
        let names: Vec<&str> = context.geometry_buffers().map(|(name, _)| name).collect();
        assert_eq!(vec!["normals", "albedo"], names);
        assert_eq!(2.0, context.aspect_ratio());
    }

    #[test]
    fn resize_recreates_buffers_lazily() {
        let mut device = RecordingDevice::new();
        let mut context = SceneRenderingContext::new(100, 50, &mut device).unwrap();
        context.geometry_buffer("screen", &mut device).unwrap();
        context.resize(200, 100, &mut device).unwrap();
        assert_eq!(0, context.geometry_buffers().count());
        let screen = context.geometry_buffer("screen", &mut device).unwrap();
        assert_eq!((200, 100), (screen.width(), screen.height()));
    }
}
