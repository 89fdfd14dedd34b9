use vecmap::VecMap;
use crate::{DeviceError, GraphicsDevice, RenderTargetId, ShaderResource, Viewport};

/// Named off-screen color target that later passes can sample.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct GeometryBuffer {
    target: RenderTargetId,
    width: u32,
    height: u32,
}

impl GeometryBuffer {

    pub fn target(&self) -> RenderTargetId {
        self.target
    }

    /// View used to sample the buffer from a shader.
    pub fn shader_resource(&self) -> ShaderResource {
        ShaderResource::RenderTarget(self.target)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::sized(self.width, self.height)
    }
}

/**
 * Lazily allocated geometry buffers, keyed by name.
 * A buffer is created on first request and reused for every later request with the same name.
 */
pub struct GeometryBufferPool {
    width: u32,
    height: u32,
    buffers: VecMap<String, GeometryBuffer>,
}

impl GeometryBufferPool {

    /// Pool whose buffers default to the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffers: VecMap::new(),
        }
    }

    /// Gets the buffer with the given name, creating it at the pool's size if it does not exist yet.
    pub fn get_or_create(&mut self, name: &str, device: &mut dyn GraphicsDevice) -> Result<GeometryBuffer, DeviceError> {
        self.get_or_create_sized(name, self.width, self.height, device)
    }

    /// Gets the buffer with the given name, creating it with explicit dimensions if it does not exist yet.
    /// An existing buffer is returned as-is, whatever its size.
    pub fn get_or_create_sized(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        device: &mut dyn GraphicsDevice,
    ) -> Result<GeometryBuffer, DeviceError> {
        if let Some(buffer) = self.buffers.get(name) {
            return Ok(*buffer);
        }
        let target = device.create_render_target(width, height)?;
        let buffer = GeometryBuffer { target, width, height };
        self.buffers.insert(String::from(name), buffer);
        log::debug!("Created geometry buffer '{name}' ({width}x{height})");
        Ok(buffer)
    }

    pub fn get(&self, name: &str) -> Option<GeometryBuffer> {
        self.buffers.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    /// Exchanges the buffers stored under two names.
    /// If only one of them exists, it is moved to the other name.
    pub fn swap(&mut self, a: &str, b: &str) {
        let buffer_a = self.buffers.remove(a);
        let buffer_b = self.buffers.remove(b);
        if let Some(buffer) = buffer_a {
            self.buffers.insert(String::from(b), buffer);
        }
        if let Some(buffer) = buffer_b {
            self.buffers.insert(String::from(a), buffer);
        }
    }

    /// Buffers in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeometryBuffer)> + '_ {
        self.buffers.iter().map(|(name, buffer)| (name.as_str(), buffer))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Destroys every buffer. Later requests recreate them at the new size.
    pub fn resize(&mut self, width: u32, height: u32, device: &mut dyn GraphicsDevice) {
        self.width = width;
        self.height = height;
        self.clear(device);
    }

    pub fn clear(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, buffer) in self.buffers.iter() {
            device.destroy_render_target(buffer.target);
        }
        self.buffers.clear();
    }
}

#[cfg(test)]
mod test {
    use crate::{GeometryBufferPool, RecordingDevice};

    #[test]
    fn reuses_buffers_by_name() {
        let mut device = RecordingDevice::new();
        let mut pool = GeometryBufferPool::new(640, 480);
        let first = pool.get_or_create("X", &mut device).unwrap();
        let second = pool.get_or_create("X", &mut device).unwrap();
        assert_eq!(first, second);
        assert_eq!((640, 480), (first.width(), first.height()));
        assert_eq!(Some((640, 480)), device.render_target_size(first.target()));
        assert_eq!(1, device.render_target_count());
    }

    #[test]
    fn explicit_size() {
        let mut device = RecordingDevice::new();
        let mut pool = GeometryBufferPool::new(640, 480);
        let buffer = pool.get_or_create_sized("half", 320, 240, &mut device).unwrap();
        assert_eq!((320, 240), (buffer.width(), buffer.height()));
    }

    #[test]
    fn swaps_buffers() {
        let mut device = RecordingDevice::new();
        let mut pool = GeometryBufferPool::new(8, 8);
        let screen = pool.get_or_create("screen", &mut device).unwrap();
        let back = pool.get_or_create("screen_back", &mut device).unwrap();
        pool.swap("screen", "screen_back");
        assert_eq!(Some(back), pool.get("screen"));
        assert_eq!(Some(screen), pool.get("screen_back"));

        pool.swap("screen", "missing");
        assert_eq!(None, pool.get("screen"));
        assert_eq!(Some(back), pool.get("missing"));
    }

    #[test]
    fn resize_destroys_buffers() {
        let mut device = RecordingDevice::new();
        let mut pool = GeometryBufferPool::new(8, 8);
        pool.get_or_create("a", &mut device).unwrap();
        pool.get_or_create("b", &mut device).unwrap();
        pool.resize(16, 16, &mut device);
        assert!(pool.is_empty());
        assert_eq!(0, device.render_target_count());
        let a = pool.get_or_create("a", &mut device).unwrap();
        assert_eq!((16, 16), (a.width(), a.height()));
    }
}
