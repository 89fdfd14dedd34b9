use std::sync::mpsc::{channel, Receiver, Sender};
use crate::{BufferId, BufferKind, DeviceError, GraphicsDevice, TextureDesc, TextureId};

/// A device resource whose owner was dropped.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Released {
    Buffer(BufferId),
    Texture(TextureId),
}

/**
 * Receiving end of the channel owned resources report their drops through.
 * Held by a device, which hands out senders to everything it creates an [`OwnedBuffer`] or [`OwnedTexture`] for.
 */
pub struct ReleaseQueue {
    sender: Sender<Released>,
    receiver: Receiver<Released>,
}

impl ReleaseQueue {

    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> Sender<Released> {
        self.sender.clone()
    }

    /// Takes every release reported so far.
    pub fn drain(&self) -> Vec<Released> {
        self.receiver.try_iter().collect()
    }
}

impl Default for ReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Device buffer that is released when dropped.
#[derive(Debug)]
pub struct OwnedBuffer {
    id: BufferId,
    sender: Sender<Released>,
}

impl OwnedBuffer {

    pub fn create(kind: BufferKind, contents: &[u8], device: &mut dyn GraphicsDevice) -> Result<Self, DeviceError> {
        let id = device.create_buffer(kind, contents)?;
        Ok(Self { id, sender: device.release_sender() })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        let _ = self.sender.send(Released::Buffer(self.id));
    }
}

/// Device texture that is released when dropped.
#[derive(Debug)]
pub struct OwnedTexture {
    id: TextureId,
    sender: Sender<Released>,
}

impl OwnedTexture {

    pub fn create(desc: &TextureDesc, pixels: &[u8], device: &mut dyn GraphicsDevice) -> Result<Self, DeviceError> {
        let id = device.create_texture(desc, pixels)?;
        Ok(Self { id, sender: device.release_sender() })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }
}

impl Drop for OwnedTexture {
    fn drop(&mut self) {
        let _ = self.sender.send(Released::Texture(self.id));
    }
}
